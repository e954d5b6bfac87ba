//! Small utility helpers used across modules.

/// True if the string, once trimmed, still contains whitespace.
/// Leading/trailing whitespace alone does not make a token multi-word.
pub fn has_inner_whitespace(s: &str) -> bool {
  s.trim().chars().any(char::is_whitespace)
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge model payloads. Cuts on a char boundary.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut end = max;
  while !s.is_char_boundary(end) {
    end -= 1;
  }
  format!("{}… ({} bytes total)", &s[..end], s.len())
}
