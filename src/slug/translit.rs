//! Phonetic transliteration tables for scripts without an ASCII decomposition.

/// Romaji for U+3041..=U+3096. Small kana read like their full-size forms.
const HIRAGANA: [&str; 86] = [
    "a", "a", "i", "i", "u", "u", "e", "e", "o", "o", // ぁ..お
    "ka", "ga", "ki", "gi", "ku", "gu", "ke", "ge", "ko", "go", // か..ご
    "sa", "za", "shi", "ji", "su", "zu", "se", "ze", "so", "zo", // さ..ぞ
    "ta", "da", "chi", "ji", "tsu", "tsu", "zu", "te", "de", "to", "do", // た..ど
    "na", "ni", "nu", "ne", "no", // な..の
    "ha", "ba", "pa", "hi", "bi", "pi", "fu", "bu", "pu", "he", "be", "pe", "ho", "bo",
    "po", // は..ぽ
    "ma", "mi", "mu", "me", "mo", // ま..も
    "ya", "ya", "yu", "yu", "yo", "yo", // ゃ..よ
    "ra", "ri", "ru", "re", "ro", // ら..ろ
    "wa", "wa", "wi", "we", "o", "n", // ゎ..ん
    "vu", "ka", "ke", // ゔ ゕ ゖ
];

const HIRAGANA_START: u32 = 0x3041;
const KATAKANA_START: u32 = 0x30A1;

/// ヷ ヸ ヹ ヺ
const KATAKANA_V: [&str; 4] = ["va", "vi", "ve", "vo"];

/// U+03B1..=U+03C9, final sigma included.
const GREEK: [&str; 25] = [
    "a", "v", "g", "d", "e", "z", "i", "th", "i", "k", "l", "m", "n", "x", "o", "p", "r", "s",
    "s", "t", "y", "f", "ch", "ps", "o",
];

/// U+0430..=U+044F
const CYRILLIC: [&str; 32] = [
    "a", "b", "v", "g", "d", "e", "zh", "z", "i", "y", "k", "l", "m", "n", "o", "p", "r", "s",
    "t", "u", "f", "kh", "ts", "ch", "sh", "shch", "", "y", "", "e", "yu", "ya",
];

/// Looks up a phonetic spelling for an alphabetic character.
pub fn transliterate(ch: char) -> Option<&'static str> {
    let lower = ch.to_lowercase().next().unwrap_or(ch);
    let code = lower as u32;
    match code {
        0x3041..=0x3096 => Some(HIRAGANA[(code - HIRAGANA_START) as usize]),
        0x30A1..=0x30F6 => Some(HIRAGANA[(code - KATAKANA_START) as usize]),
        0x30F7..=0x30FA => Some(KATAKANA_V[(code - 0x30F7) as usize]),
        0x03B1..=0x03C9 => Some(GREEK[(code - 0x03B1) as usize]),
        0x0430..=0x044F => Some(CYRILLIC[(code - 0x0430) as usize]).filter(|s| !s.is_empty()),
        0x0451 => Some("yo"),
        _ => None,
    }
}

/// CJK unified and compatibility ideographs.
pub fn is_ideograph(ch: char) -> bool {
    matches!(
        ch as u32,
        0x3400..=0x4DBF
            | 0x4E00..=0x9FFF
            | 0xF900..=0xFAFF
            | 0x20000..=0x2A6DF
            | 0x2A700..=0x2EBEF
            | 0x30000..=0x3134F
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kana() {
        assert_eq!(transliterate('あ'), Some("a"));
        assert_eq!(transliterate('し'), Some("shi"));
        assert_eq!(transliterate('っ'), Some("tsu"));
        assert_eq!(transliterate('ん'), Some("n"));
        assert_eq!(transliterate('ゖ'), Some("ke"));
        assert_eq!(transliterate('ホ'), Some("ho"));
        assert_eq!(transliterate('テ'), Some("te"));
        assert_eq!(transliterate('ル'), Some("ru"));
        assert_eq!(transliterate('ヲ'), Some("o"));
        assert_eq!(transliterate('ヴ'), Some("vu"));
        assert_eq!(transliterate('ヺ'), Some("vo"));
    }

    #[test]
    fn test_other_scripts() {
        assert_eq!(transliterate('Ω'), Some("o"));
        assert_eq!(transliterate('λ'), Some("l"));
        assert_eq!(transliterate('Ж'), Some("zh"));
        assert_eq!(transliterate('ь'), None);
        assert_eq!(transliterate('ー'), None);
        assert_eq!(transliterate('店'), None);
    }

    #[test]
    fn test_ideographs() {
        assert!(is_ideograph('店'));
        assert!(is_ideograph('舗'));
        assert!(!is_ideograph('ア'));
        assert!(!is_ideograph('a'));
    }
}
