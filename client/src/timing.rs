//! Debounce and throttle primitives on the tokio timer.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Runs an action once input has been quiet for `delay`.
///
/// Each [`schedule`](Debouncer::schedule) replaces the pending timer. A
/// replaced timer never fires, even if it already elapsed and is waiting to
/// be polled. Only the timer is cancelled: an action that already started
/// runs to completion on its own task.
pub struct Debouncer {
    delay: Duration,
    generation: Arc<AtomicU64>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            generation: Arc::new(AtomicU64::new(0)),
            timer: Mutex::new(None),
        }
    }

    /// (Re)start the quiet period; `action` runs when it ends.
    pub fn schedule<F, Fut>(&self, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = Arc::clone(&self.generation);
        let delay = self.delay;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if generation.load(Ordering::SeqCst) == ticket {
                tokio::spawn(action());
            }
        });
        if let Some(previous) = self.timer.lock().replace(timer) {
            previous.abort();
        }
    }

    /// Drop the pending timer, if any.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(previous) = self.timer.lock().take() {
            previous.abort();
        }
    }

    /// Whether a timer is waiting to fire.
    pub fn is_scheduled(&self) -> bool {
        self.timer
            .lock()
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.abort();
        }
    }
}

struct ThrottleState<T> {
    cooling: bool,
    trailing: Option<T>,
}

/// Rate-limits a callback to once per interval, firing on both edges.
///
/// The first call of a burst runs immediately. Later calls inside the window
/// overwrite one trailing value, delivered when the window closes; that
/// delivery opens a new window.
pub struct Throttler<T> {
    interval: Duration,
    state: Arc<Mutex<ThrottleState<T>>>,
    emit: Arc<dyn Fn(T) + Send + Sync>,
}

impl<T: Send + 'static> Throttler<T> {
    pub fn new(interval: Duration, emit: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            interval,
            state: Arc::new(Mutex::new(ThrottleState {
                cooling: false,
                trailing: None,
            })),
            emit: Arc::new(emit),
        }
    }

    pub fn call(&self, value: T) {
        {
            let mut state = self.state.lock();
            if state.cooling {
                state.trailing = Some(value);
                return;
            }
            state.cooling = true;
        }
        (self.emit)(value);

        let state = Arc::clone(&self.state);
        let emit = Arc::clone(&self.emit);
        let interval = self.interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let trailing = {
                    let mut state = state.lock();
                    let trailing = state.trailing.take();
                    if trailing.is_none() {
                        state.cooling = false;
                    }
                    trailing
                };
                match trailing {
                    Some(value) => emit(value),
                    None => return,
                }
            }
        });
    }
}
