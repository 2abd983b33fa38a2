//! `{{ name }}` placeholder rendering.
//!
//! Single left-to-right pass: substituted values are never rescanned, so a
//! secret whose plaintext contains `{{...}}` is emitted verbatim. Only
//! catalog-stored values go through here, never caller-supplied ones.

use std::collections::HashMap;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Replace every `{{ name }}` token with its secret value.
///
/// Unknown names render as the empty string. An unterminated `{{` is kept
/// as literal text.
pub fn render(text: &str, secrets: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(OPEN) {
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            break;
        };
        out.push_str(&rest[..start]);
        let name = after_open[..end].trim();
        if let Some(value) = secrets.get(name) {
            out.push_str(value);
        }
        rest = &after_open[end + CLOSE.len()..];
    }

    out.push_str(rest);
    out
}

/// Render the value side of every pair, keeping names and order.
pub fn render_pairs(pairs: &[(String, String)], secrets: &HashMap<String, String>) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(name, value)| (name.clone(), render(value, secrets)))
        .collect()
}
