//! Composer input classification.
//!
//! Raw input becomes exactly one of three drafts: an image message (the
//! upload path hands us a JSON payload), a GIF message (the text contains a
//! link that looks like a GIF), or a plain text message.

use shared::{domain::MessageKind, protocol::ComposerPayload};

use crate::ImageAttachment;

/// Extensions and hosting domains treated as GIF links. Matching is
/// case-insensitive and substring-based, mirroring the loose detection the
/// chat has always used.
const GIF_EXTENSIONS: [&str; 2] = [".gif", ".gifv"];
const GIF_DOMAINS: [&str; 4] = ["giphy.com", "tenor.com", "imgur.com", "media.giphy.com"];

#[derive(Debug, Clone, PartialEq)]
pub enum Draft {
    Plain { text: String },
    Gif { text: String, gif_url: String },
    Image { caption: String, image: ImageAttachment },
}

impl Draft {
    pub fn kind(&self) -> MessageKind {
        match self {
            Draft::Plain { .. } => MessageKind::Plain,
            Draft::Gif { .. } => MessageKind::Gif,
            Draft::Image { .. } => MessageKind::Image,
        }
    }

    /// The text that ends up in the record: the raw input for plain and GIF
    /// messages, the synthesized caption for images.
    pub fn text(&self) -> &str {
        match self {
            Draft::Plain { text } | Draft::Gif { text, .. } => text,
            Draft::Image { caption, .. } => caption,
        }
    }
}

/// Classifies raw composer input. Returns `None` for empty or
/// whitespace-only input.
pub fn classify(raw: &str) -> Option<Draft> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    // An image payload is a JSON object tagged "type": "image"; anything that
    // fails to parse as one falls through to text classification.
    if let Ok(ComposerPayload::Image {
        image_url,
        file_name,
        file_size,
        file_type,
        storage_path,
    }) = serde_json::from_str(trimmed)
    {
        if !image_url.is_empty() {
            let caption = format!("\u{1F4F7} {}", file_name.as_deref().unwrap_or("Image"));
            return Some(Draft::Image {
                caption,
                image: ImageAttachment {
                    url: image_url,
                    file_name,
                    file_size,
                    file_type,
                    storage_path,
                },
            });
        }
    }

    if let Some(gif_url) = find_gif_url(trimmed) {
        return Some(Draft::Gif {
            text: trimmed.to_string(),
            gif_url,
        });
    }

    Some(Draft::Plain {
        text: trimmed.to_string(),
    })
}

/// Finds the first URL in `text` that looks like a GIF link, normalizing
/// `.gifv` to `.gif` (first occurrence only) so it renders directly.
pub fn find_gif_url(text: &str) -> Option<String> {
    for (start, _) in text.match_indices("http") {
        let candidate = &text[start..];
        if !candidate.starts_with("http://") && !candidate.starts_with("https://") {
            continue;
        }
        let end = candidate
            .find(char::is_whitespace)
            .unwrap_or(candidate.len());
        let url = &candidate[..end];
        if is_gif_url(url) {
            return Some(url.replacen(".gifv", ".gif", 1));
        }
    }
    None
}

fn is_gif_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    GIF_EXTENSIONS.iter().any(|ext| lower.contains(ext))
        || GIF_DOMAINS.iter().any(|domain| lower.contains(domain))
}
