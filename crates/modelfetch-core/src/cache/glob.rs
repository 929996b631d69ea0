//! Wildcard matching for cache eviction patterns.
//!
//! Supports `*` (zero or more characters) and `?` (exactly one character).
//! Matching is ASCII case-insensitive.

/// Match `text` against a wildcard `pattern`.
///
/// Single pass with star backtracking: when a `*` is seen, its position and
/// the current text position are remembered. A later mismatch resumes just
/// after that star with the remembered text position advanced by one.
pub fn glob_match(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().map(|c| c.to_ascii_lowercase()).collect();
    let pattern: Vec<char> = pattern.chars().map(|c| c.to_ascii_lowercase()).collect();

    let mut t = 0;
    let mut p = 0;
    let mut star: Option<usize> = None;
    let mut star_text = 0;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            star_text = t;
            p += 1;
        } else if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if let Some(star_pos) = star {
            p = star_pos + 1;
            star_text += 1;
            t = star_text;
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }

    p == pattern.len()
}
