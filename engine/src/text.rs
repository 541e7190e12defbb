//! Plain-text helpers over rich-text content blobs.
//!
//! Scene content is stored as markup. These helpers never interpret the
//! markup beyond stripping tags, which is all the derived projections need.

/// Hard cap on a single content payload, in characters.
pub const MAX_CONTENT_CHARS: usize = 5_000_000;

/// Truncate `content` to at most `max_chars` characters.
///
/// Returns the input unchanged (no allocation) when it already fits.
pub fn truncate_chars(content: &str, max_chars: usize) -> &str {
    match content.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &content[..byte_idx],
        None => content,
    }
}

/// Remove markup tags and decode the handful of entities editors emit.
pub fn strip_markup(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut in_tag = false;
    for ch in content.chars() {
        match ch {
            '<' => {
                in_tag = true;
                // Block boundaries separate words.
                out.push(' ');
            }
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

/// Count whitespace-separated words in a content blob.
pub fn word_count(content: &str) -> usize {
    strip_markup(content).split_whitespace().count()
}

/// Collapse a content blob into a single-line preview of at most `max_chars`.
pub fn preview(content: &str, max_chars: usize) -> String {
    let plain = strip_markup(content);
    let collapsed = plain.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, max_chars).to_string()
}
