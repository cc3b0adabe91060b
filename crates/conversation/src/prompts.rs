//! Canned text shown around a chat: the greeting of an empty chat and the
//! suggested questions offered above the input box.

pub use shared::settings::DEFAULT_GREETING;

/// Suggested questions, each led by a decorative glyph
pub const SUGGESTIONS: &[&str] = &[
    "✨ Tell me about my birth chart",
    "💕 What about my future life partner?",
    "🔮 What does my future look like?",
    "🤝 How can I improve my relationships?",
    "🎯 What career path should I consider?",
    "⚡ What are my strengths and weaknesses?",
    "🎨 How can I enhance my creativity?",
];

/// Text placed in the input box when a suggestion is picked.
///
/// Drops the first whitespace-delimited token (the glyph) and the space after it.
pub fn suggestion_text(suggestion: &str) -> &str {
    match suggestion.split_once(char::is_whitespace) {
        Some((glyph, rest)) if !glyph.is_empty() => rest,
        _ => suggestion,
    }
}

/// Header caption for a transcript with `count` non-greeting entries
pub fn conversation_caption(count: usize) -> String {
    match count {
        0 => "New conversation".to_string(),
        1 => "1 message".to_string(),
        n => format!("{} messages", n),
    }
}
