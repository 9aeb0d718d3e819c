//! Filesystem-safe path segments for guild and channel names.
//!
//! `slug` is total: every input, including whitespace-only or emoji-only names,
//! yields a non-empty `[a-z0-9-]+` segment of at most [`MAX_SLUG_LEN`] chars.
//! Distinct names collapse to the same slug only by hash coincidence in the
//! fallback path, or when they transliterate identically.

mod translit;

use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

pub const MAX_SLUG_LEN: usize = 80;

const FALLBACK_HASH_LEN: usize = 10;

/// Katakana-hiragana prolonged sound mark.
const PROLONGED_SOUND_MARK: char = '\u{30FC}';

pub fn slug(name: &str) -> String {
    let normalized: String = name.trim().nfkc().collect();

    let mut raw = String::with_capacity(normalized.len());
    for ch in normalized.chars() {
        push_char(&mut raw, ch);
    }

    let collapsed = collapse(&raw);
    if collapsed.is_empty() {
        return fallback_slug(&normalized);
    }
    collapsed
}

fn push_char(out: &mut String, ch: char) {
    if ch.is_ascii() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
        } else if matches!(ch, ' ' | '-' | '_') {
            out.push('-');
        }
        return;
    }

    let ascii: String = std::iter::once(ch).nfkd().filter(char::is_ascii).collect();
    if !ascii.is_empty() {
        out.push_str(&ascii);
        return;
    }

    if ch == PROLONGED_SOUND_MARK {
        out.push('-');
        return;
    }

    if translit::is_ideograph(ch) {
        out.push_str(&codepoint_token(ch));
        return;
    }

    if ch.is_alphabetic() {
        if let Some(romaji) = translit::transliterate(ch) {
            out.push_str(romaji);
            return;
        }
    }

    out.push_str(&codepoint_token(ch));
}

fn codepoint_token(ch: char) -> String {
    format!("u{:04x}", ch as u32)
}

/// Collapses runs of anything outside `[0-9A-Za-z]` into one `-`, trims the
/// separators, lower-cases and bounds the length.
fn collapse(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_separator = false;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('-');
            }
            pending_separator = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }

    out.truncate(MAX_SLUG_LEN);
    while out.ends_with('-') {
        out.pop();
    }
    out
}

fn fallback_slug(normalized: &str) -> String {
    let digest = Sha256::digest(normalized.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("slug-{}", &hex[..FALLBACK_HASH_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_well_formed(value: &str) {
        assert!(!value.is_empty());
        assert!(value.len() <= MAX_SLUG_LEN, "too long: {}", value);
        assert!(
            value
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'),
            "bad characters in {}",
            value
        );
        assert!(!value.starts_with('-') && !value.ends_with('-'));
    }

    #[test]
    fn test_ascii_names() {
        assert_eq!(slug("General Chat"), "general-chat");
        assert_eq!(slug("  survey__box--2 "), "survey-box-2");
        assert_eq!(slug("Q&A (public)"), "qa-public");
    }

    #[test]
    fn test_accented_latin_decomposes() {
        assert_eq!(slug("Café Crème"), "cafe-creme");
    }

    #[test]
    fn test_full_width_is_folded() {
        assert_eq!(slug("ＡＢＣ１２３"), "abc123");
    }

    #[test]
    fn test_japanese_names() {
        assert_eq!(slug("ホテル"), "hoteru");
        assert_eq!(slug("アンケート"), "anke-to");
        assert_eq!(slug("店舗"), "u5e97u8217");
        assert_eq!(slug("店舗アンケート"), "u5e97u8217anke-to");
    }

    #[test]
    fn test_fallback_for_empty_results() {
        let blank = slug("   ");
        assert!(blank.starts_with("slug-"));
        assert_eq!(blank.len(), "slug-".len() + FALLBACK_HASH_LEN);
        assert_eq!(slug(""), blank);
        assert!(slug("!!!").starts_with("slug-"));
        assert_ne!(slug("!!!"), slug("???"));
    }

    #[test]
    fn test_totality_and_determinism() {
        let inputs = vec![
            String::new(),
            "😀🎉".to_string(),
            "あ".repeat(300),
            "x".repeat(300),
            "Ωmega ✨ канал".to_string(),
            "\u{200b}".to_string(),
        ];
        for input in &inputs {
            let first = slug(input);
            assert_well_formed(&first);
            assert_eq!(first, slug(input));
        }
    }

    #[test]
    fn test_emoji_uses_codepoints() {
        assert_eq!(slug("😀"), "u1f600");
    }
}
