use crate::error::TemplateError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSpan {
    pub name: String,
    pub start: usize,
    /// Byte offset one past the closing `}}`.
    pub end: usize,
    pub raw_text: String,
}

/// Find every invocation of `name` in `text`, left to right.
///
/// An occurrence only counts when `{{name`, after optional whitespace, is
/// followed by `|` or `}`, so neither `{{REDaten}}` nor `{{RE siehe|A}}` is
/// matched by a search for `RE`. Nested
/// invocations of the same name inside an outer span are part of that span.
pub fn find(text: &str, name: &str) -> Result<Vec<TemplateSpan>, TemplateError> {
    let needle = format!("{{{{{name}");
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut cursor = 0usize;

    while let Some(found) = text[cursor..].find(&needle) {
        let start = cursor + found;
        let after = start + needle.len();
        if !ends_name(bytes, after) {
            cursor = after;
            continue;
        }
        let end = balanced_end(bytes, start).ok_or_else(|| TemplateError::Unbalanced {
            name: name.to_string(),
            start,
        })?;
        spans.push(TemplateSpan {
            name: name.to_string(),
            start,
            end,
            raw_text: text[start..end].to_string(),
        });
        cursor = end;
    }

    Ok(spans)
}

/// Whitespace may trail the name, but the next byte after it must open the
/// parameters or close the template.
fn ends_name(bytes: &[u8], after: usize) -> bool {
    let next = bytes[after.min(bytes.len())..]
        .iter()
        .find(|byte| !byte.is_ascii_whitespace())
        .copied();
    matches!(next, None | Some(b'|') | Some(b'}'))
}

/// Offset one past the `}}` that closes the `{{` at `start`.
pub(crate) fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut index = start;
    while index + 1 < bytes.len() {
        if bytes[index] == b'{' && bytes[index + 1] == b'{' {
            depth += 1;
            index += 2;
            continue;
        }
        if bytes[index] == b'}' && bytes[index + 1] == b'}' {
            depth = depth.saturating_sub(1);
            index += 2;
            if depth == 0 {
                return Some(index);
            }
            continue;
        }
        index += 1;
    }
    None
}
