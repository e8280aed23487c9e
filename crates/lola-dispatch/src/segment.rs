//! Splitting a generated reply into a natural sequence of chat messages.

/// Replies shorter than this (in chars) go out as one message.
pub const SHORT_REPLY_CHARS: usize = 80;
/// Sentences are merged into chunks of roughly this many chars.
pub const CHUNK_TARGET_CHARS: usize = 120;

/// A reply ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presented {
    /// Full reply after presentation, as stored in history.
    pub text: String,
    /// Messages to send, in order.
    pub chunks: Vec<String>,
}

/// Capitalise the reply and split it. This is the only place a generated
/// reply is altered for presentation.
pub fn present(text: &str) -> Presented {
    let text = capitalize_first(text.trim());
    let chunks = segment(&text);
    Presented { text, chunks }
}

fn capitalize_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Split `text` into one or more chunks.
///
/// Several non-empty lines become one chunk each. Otherwise a short text is
/// a single chunk, and a long one is cut at sentence boundaries and
/// regrouped greedily up to [`CHUNK_TARGET_CHARS`]. Content is never
/// dropped; only the whitespace between chunks is.
pub fn segment(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.len() > 1 {
        return lines.into_iter().map(String::from).collect();
    }

    let text = text.trim();
    if text.chars().count() < SHORT_REPLY_CHARS {
        return vec![text.to_string()];
    }

    let sentences = split_sentences(text);
    if sentences.len() <= 1 {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut buf = String::new();
    for sentence in sentences {
        if !buf.is_empty() && buf.chars().count() + sentence.chars().count() > CHUNK_TARGET_CHARS {
            chunks.push(std::mem::take(&mut buf));
        }
        if !buf.is_empty() {
            buf.push(' ');
        }
        buf.push_str(sentence);
    }
    if !buf.is_empty() {
        chunks.push(buf);
    }
    chunks
}

/// Cut after every `.` that is followed by whitespace and then an
/// uppercase letter or a pictograph.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;

    for (i, c) in text.char_indices() {
        if c != '.' || i < start {
            continue;
        }
        let after = i + c.len_utf8();
        let Some((offset, next)) = text[after..]
            .char_indices()
            .find(|(_, ch)| !ch.is_whitespace())
        else {
            break;
        };
        if offset > 0 && starts_sentence(next) {
            parts.push(text[start..after].trim());
            start = after + offset;
        }
    }
    parts.push(text[start..].trim());
    parts.retain(|p| !p.is_empty());
    parts
}

fn starts_sentence(c: char) -> bool {
    c.is_uppercase() || ('\u{1F000}'..='\u{1FAFF}').contains(&c)
}
