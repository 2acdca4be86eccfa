//! Result extraction: pull the `<final_output>` block out of free-form token
//! text and make sure it is usable markup before anyone renders it.

use crate::error::{ExtractError, MarkupError};

pub const OPEN_TAG: &str = "<final_output>";
pub const CLOSE_TAG: &str = "</final_output>";

/// Structural check for an extracted markup payload.
pub trait MarkupValidator: Send + Sync {
    fn validate(&self, markup: &str) -> Result<(), MarkupError>;
}

/// Locate the delimited block and return its trimmed contents, unvalidated.
///
/// The first opening marker and the first closing marker after it win; any
/// further blocks are ignored with a warning.
pub fn extract_block(text: &str) -> Result<&str, ExtractError> {
    let start = text.find(OPEN_TAG).ok_or(ExtractError::MissingOpen)? + OPEN_TAG.len();
    let len = text[start..].find(CLOSE_TAG).ok_or(ExtractError::MissingClose)?;
    let rest = &text[start + len + CLOSE_TAG.len()..];
    if rest.contains(OPEN_TAG) {
        tracing::warn!("response contains more than one {OPEN_TAG} block; using the first");
    }
    Ok(text[start..start + len].trim())
}

/// Extract and validate the artifact markup.
pub fn extract_artifact(
    text: &str,
    validator: &dyn MarkupValidator,
) -> Result<String, ExtractError> {
    let block = extract_block(text)?;
    if block.is_empty() {
        return Err(ExtractError::Invalid(MarkupError::EmptyBody));
    }
    validator.validate(block)?;
    Ok(block.to_string())
}

// ---------------------------------------------------------------------------
// StructuralValidator
// ---------------------------------------------------------------------------

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea", "title"];

/// Elements that belong to the head until the body has started. After that
/// they count as body content like anything else.
const HEAD_ELEMENTS: &[&str] = &[
    "base", "link", "meta", "noscript", "script", "style", "template", "title",
];

/// Lenient HTML structure check.
///
/// Missing end tags are allowed (HTML closes them implicitly, `</head>`
/// included). Reported: unterminated tags and comments, raw-text elements that
/// never close, closing tags with no open element of that name, and documents
/// with no body content. A `<` that cannot start a tag is text.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralValidator;

impl MarkupValidator for StructuralValidator {
    fn validate(&self, markup: &str) -> Result<(), MarkupError> {
        let lower = markup.to_ascii_lowercase();
        let bytes = lower.as_bytes();
        let mut doc = Document::default();
        let mut i = 0;

        while i < bytes.len() {
            if bytes[i] != b'<' {
                if !bytes[i].is_ascii_whitespace() {
                    doc.text();
                }
                i += 1;
                continue;
            }

            let rest = &lower[i..];
            if rest.starts_with("<!--") {
                let end = rest[4..]
                    .find("-->")
                    .ok_or(MarkupError::UnterminatedComment { offset: i })?;
                i += 4 + end + 3;
                continue;
            }
            if rest.starts_with("<!") || rest.starts_with("<?") {
                let end = rest.find('>').ok_or(MarkupError::UnterminatedTag { offset: i })?;
                i += end + 1;
                continue;
            }

            let closing = rest.starts_with("</");
            let name_start = if closing { 2 } else { 1 };
            let name = tag_name(&rest[name_start..]);
            if name.is_empty() {
                // a bare `<` in text
                doc.text();
                i += 1;
                continue;
            }
            let end = match tag_end(rest) {
                TagEnd::At(end) => end,
                TagEnd::Stray => {
                    doc.text();
                    i += 1;
                    continue;
                }
                TagEnd::Missing if !closing && !rest.contains('=') => {
                    doc.text();
                    i += 1;
                    continue;
                }
                TagEnd::Missing => return Err(MarkupError::UnterminatedTag { offset: i }),
            };

            if closing {
                doc.close(name, i)?;
                i += end + 1;
                continue;
            }

            doc.open(name);
            let self_closing = rest[..end].ends_with('/');
            i += end + 1;

            if RAW_TEXT_ELEMENTS.contains(&name) {
                let close = format!("</{name}");
                let body_len = lower[i..]
                    .find(&close)
                    .ok_or_else(|| MarkupError::UnclosedRawText {
                        name: name.to_string(),
                    })?;
                let close_at = i + body_len;
                let close_end = match tag_end(&lower[close_at..]) {
                    TagEnd::At(end) => end,
                    TagEnd::Stray | TagEnd::Missing => {
                        return Err(MarkupError::UnterminatedTag { offset: close_at })
                    }
                };
                i = close_at + close_end + 1;
                continue;
            }

            if !self_closing && !VOID_ELEMENTS.contains(&name) {
                doc.stack.push(name.to_string());
            }
        }

        if doc.has_content {
            Ok(())
        } else {
            Err(MarkupError::EmptyBody)
        }
    }
}

/// Open-element stack plus the head/body phase.
#[derive(Default)]
struct Document {
    stack: Vec<String>,
    in_body: bool,
    has_content: bool,
}

impl Document {
    /// Non-whitespace text starts the body, as it does in a browser.
    fn text(&mut self) {
        self.start_body();
        self.has_content = true;
    }

    fn open(&mut self, name: &str) {
        match name {
            "html" | "head" => {}
            "body" => self.start_body(),
            _ if HEAD_ELEMENTS.contains(&name) && !self.in_body => {}
            _ => {
                self.start_body();
                self.has_content = true;
            }
        }
    }

    fn close(&mut self, name: &str, offset: usize) -> Result<(), MarkupError> {
        match self.stack.iter().rposition(|open| open == name) {
            Some(pos) => {
                self.stack.truncate(pos);
                Ok(())
            }
            // implied elements may be closed without being opened
            None if matches!(name, "html" | "head" | "body") => Ok(()),
            None => Err(MarkupError::UnmatchedClose {
                name: name.to_string(),
                offset,
            }),
        }
    }

    fn start_body(&mut self) {
        if let Some(pos) = self.stack.iter().rposition(|open| open == "head") {
            self.stack.truncate(pos);
        }
        self.in_body = true;
    }
}

fn tag_name(s: &str) -> &str {
    let first = s.as_bytes().first().copied();
    if !first.is_some_and(|b| b.is_ascii_alphabetic()) {
        return "";
    }
    let len = s
        .bytes()
        .take_while(|b| b.is_ascii_alphanumeric() || *b == b'-' || *b == b':')
        .count();
    &s[..len]
}

enum TagEnd {
    /// Index of the closing `>`.
    At(usize),
    /// An unquoted `<` came first: the opening `<` was text.
    Stray,
    /// Input ended inside the tag.
    Missing,
}

/// Find the `>` closing the tag that starts at `s[0]`, skipping quoted
/// attribute values.
fn tag_end(s: &str) -> TagEnd {
    let mut quote: Option<u8> = None;
    for (idx, b) in s.bytes().enumerate().skip(1) {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => return TagEnd::At(idx),
            None if b == b'<' => return TagEnd::Stray,
            None => {}
        }
    }
    TagEnd::Missing
}
