//! Placeholder substitution for notification templates.
//!
//! Templates use `{name}` placeholders; `{{` and `}}` produce literal braces.
//! Every placeholder must resolve, otherwise rendering fails and the
//! notification is skipped.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("Unknown placeholder '{{{0}}}'")]
    UnknownPlaceholder(String),

    #[error("Unmatched '{0}' at byte {1}")]
    UnmatchedBrace(char, usize),
}

/// Renders `template`, resolving placeholders through `lookup`
pub fn render<F>(template: &str, lookup: F) -> Result<String, FormatError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            '{' => {
                if matches!(chars.peek(), Some((_, '{'))) {
                    chars.next();
                    out.push('{');
                    continue;
                }
                let mut key = String::new();
                let mut closed = false;
                for (_, k) in chars.by_ref() {
                    if k == '}' {
                        closed = true;
                        break;
                    }
                    if k == '{' {
                        return Err(FormatError::UnmatchedBrace('{', pos));
                    }
                    key.push(k);
                }
                if !closed {
                    return Err(FormatError::UnmatchedBrace('{', pos));
                }
                let value = lookup(key.trim()).ok_or(FormatError::UnknownPlaceholder(key))?;
                out.push_str(&value);
            }
            '}' => {
                if matches!(chars.peek(), Some((_, '}'))) {
                    chars.next();
                    out.push('}');
                } else {
                    return Err(FormatError::UnmatchedBrace('}', pos));
                }
            }
            other => out.push(other),
        }
    }

    Ok(out)
}
