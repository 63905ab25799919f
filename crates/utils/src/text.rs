//! Text utilities

/// Normalize whitespace in text
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Shorten text for log lines, cutting on a char boundary
pub fn preview(text: &str, max_chars: usize) -> String {
    let single_line = normalize_whitespace(text);
    if single_line.chars().count() <= max_chars {
        return single_line;
    }
    let cut: String = single_line.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", cut)
}
