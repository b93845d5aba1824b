//! String helpers shared by prompt building and summarization.

/// Trim and shorten free text to at most `max_chars` characters, ending
/// with an ellipsis when something was cut.
pub fn clamp_text(s: &str, max_chars: usize) -> String {
    let s = s.trim();
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }
    let kept: String = s.chars().take(max_chars - 1).collect();
    format!("{}…", kept.trim_end())
}

/// Collapse runs of whitespace into single spaces.
pub fn squash_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
