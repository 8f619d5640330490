pub mod api;
pub mod events;
pub mod models;

pub use models::{ContentPart, ImageUrl, Message, MessageMetadata, Quest, QuestDetail, Role};

/// At most `max` characters of `raw`, for log lines.
pub fn preview(raw: &str, max: usize) -> &str {
    match raw.char_indices().nth(max) {
        Some((idx, _)) => &raw[..idx],
        None => raw,
    }
}
