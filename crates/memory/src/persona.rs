//! Persona digest construction.
//!
//! Distills a pool of retrieved documents into a compact "who is this
//! user" text block. Recency-weighted with temporal diversity: recent
//! chat turns dominate, a couple of older chats and non-chat sources are
//! stride-sampled in so the digest is not just the last five minutes.
//! Deterministic given the same input, no randomness.

use minne_core::document::RetrievedDocument;

/// Total snippets in a digest.
const MAX_TOTAL: usize = 8;
/// Most-recent conversational snippets taken first.
const MAX_RECENT: usize = 5;
/// Older conversational snippets added for temporal diversity.
const MAX_OLDER: usize = 2;
/// Dedup key length, in characters.
const DEDUP_PREFIX: usize = 80;
/// Per-snippet length bound, in characters.
const SNIPPET_LEN: usize = 400;

/// The standing query used to fetch the persona pool.
pub const PERSONA_QUERY: &str = "persona preferences background motivation goals interests \
     tone style likes dislikes activities habits summary recent conversations";

/// Pool size requested for persona builds.
pub const PERSONA_POOL_SIZE: usize = 20;

/// Build a persona digest, or `None` when no usable text survives
/// selection and deduplication.
pub fn build_persona(documents: &[RetrievedDocument]) -> Option<String> {
    let mut chat: Vec<&RetrievedDocument> = Vec::new();
    let mut other: Vec<&RetrievedDocument> = Vec::new();
    for doc in documents {
        if doc.is_conversational() {
            chat.push(doc);
        } else {
            other.push(doc);
        }
    }
    chat.sort_by(|a, b| b.sort_timestamp().cmp(a.sort_timestamp()));
    other.sort_by(|a, b| b.sort_timestamp().cmp(a.sort_timestamp()));

    let mut selected: Vec<&RetrievedDocument> = Vec::new();
    selected.extend(chat.iter().take(MAX_RECENT).copied());

    let remaining_chat = chat.get(MAX_RECENT..).unwrap_or(&[]);
    if !remaining_chat.is_empty() {
        let stride = (remaining_chat.len() / MAX_OLDER).max(1);
        selected.extend(remaining_chat.iter().step_by(stride).take(MAX_OLDER).copied());
    }

    let slots = MAX_TOTAL.saturating_sub(selected.len());
    if slots > 0 && !other.is_empty() {
        let stride = (other.len() / slots).max(1);
        selected.extend(other.iter().step_by(stride).take(slots).copied());
    }

    let mut seen: Vec<String> = Vec::new();
    let mut pieces: Vec<String> = Vec::new();
    for doc in selected {
        let text = doc.text.trim();
        if text.is_empty() {
            continue;
        }
        let key: String = text.chars().take(DEDUP_PREFIX).collect();
        if seen.contains(&key) {
            continue;
        }
        seen.push(key);
        pieces.push(text.chars().take(SNIPPET_LEN).collect());
    }

    if pieces.is_empty() {
        None
    } else {
        Some(pieces.join("\n\n"))
    }
}
