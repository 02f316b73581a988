//! Reply formatting and byte-bounded chunking for Slack messages.

use crate::models::{ReplyPlan, ReplyTarget};

/// Fence used to keep tabular answers monospaced.
pub const LITERAL_BLOCK_FENCE: &str = "```";

/// Prefix of the message posted when the completion backend fails.
pub const FAILURE_INDICATOR: &str = ":x: Sorry, I couldn't get an answer";

/// Slack mention markup for a user.
pub fn mention(user_id: &str) -> String {
    format!("<@{user_id}>")
}

/// An answer that has both a column separator and a line break renders as a
/// table and needs a literal block to keep its alignment.
pub fn looks_tabular(text: &str) -> bool {
    text.contains('\n') && (text.contains('|') || text.contains('\t'))
}

pub fn wrap_literal_block(text: &str) -> String {
    format!("{LITERAL_BLOCK_FENCE}\n{text}\n{LITERAL_BLOCK_FENCE}")
}

/// Address `answer` to `user_id`, wrapping tabular answers before anything
/// gets split.
pub fn format_answer(user_id: &str, answer: &str) -> String {
    let body = if looks_tabular(answer) {
        wrap_literal_block(answer)
    } else {
        answer.to_string()
    };
    format!("{} {}", mention(user_id), body)
}

pub fn format_failure(user_id: &str, cause: &str) -> String {
    format!("{} {FAILURE_INDICATOR}: {cause}", mention(user_id))
}

/// Split `text` into chunks of at most `limit` bytes.
///
/// Lines, with their trailing newline, are packed greedily. A line longer
/// than `limit` is cut at the last UTF-8 char boundary that fits, so a chunk
/// never ends inside a multi-byte character. Concatenating the chunks
/// reproduces `text`. Empty input yields a single empty chunk. A `limit` of
/// zero disables splitting.
pub fn split_into_chunks(text: &str, limit: usize) -> Vec<String> {
    if text.is_empty() || limit == 0 {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in text.split_inclusive('\n') {
        if current.len() + line.len() <= limit {
            current.push_str(line);
            continue;
        }

        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }

        let mut rest = line;
        while rest.len() > limit {
            let cut = floor_char_boundary(rest, limit);
            chunks.push(rest[..cut].to_string());
            rest = &rest[cut..];
        }
        current.push_str(rest);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Largest char boundary `<= limit`, but always past the first char so the
/// caller makes progress even when `limit` is narrower than one character.
fn floor_char_boundary(s: &str, limit: usize) -> usize {
    let mut cut = limit.min(s.len());
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    if cut == 0 {
        cut = s.chars().next().map_or(s.len(), char::len_utf8);
    }
    cut
}

impl ReplyPlan {
    /// Build the ordered chunks for an already-formatted message.
    pub fn new(target: ReplyTarget, message: &str, limit: usize) -> Self {
        Self {
            target,
            chunks: split_into_chunks(message, limit),
        }
    }
}
