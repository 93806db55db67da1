//! Small utility helpers used across modules.

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Log-safe preview of learner text, cut on a char boundary.
pub fn preview_for_log(s: &str, max_chars: usize) -> String {
  let mut it = s.chars();
  let head: String = it.by_ref().take(max_chars).collect();
  if it.next().is_none() { head } else { format!("{}… ({} bytes total)", head, s.len()) }
}
