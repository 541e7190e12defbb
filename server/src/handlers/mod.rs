//! Request handlers for sync operations.

mod changes;
mod documents;
mod push;

pub use changes::*;
pub use documents::*;
pub use push::*;
