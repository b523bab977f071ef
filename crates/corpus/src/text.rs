//! Small character-level helpers shared by the splitter and downstream
//! crates that need to reason about mixed Japanese/ASCII text.

/// True for characters from the dense CJK scripts (kanji, kana). These
/// carry roughly one token each, unlike ASCII text.
pub fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{309F}'   // hiragana
        | '\u{30A0}'..='\u{30FF}' // katakana
        | '\u{3400}'..='\u{4DBF}' // CJK extension A
        | '\u{4E00}'..='\u{9FFF}' // CJK unified ideographs
        | '\u{FF66}'..='\u{FF9D}' // halfwidth katakana
    )
}

/// Length in characters, not bytes.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// The last `n` characters of `s`.
pub fn char_tail(s: &str, n: usize) -> String {
    let len = char_len(s);
    if len <= n {
        return s.to_string();
    }
    s.chars().skip(len - n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cjk_detection() {
        assert!(is_cjk('燃'));
        assert!(is_cjk('ご'));
        assert!(is_cjk('ボ'));
        assert!(!is_cjk('a'));
        assert!(!is_cjk('。'));
    }

    #[test]
    fn char_tail_counts_chars_not_bytes() {
        assert_eq!(char_tail("可燃ごみ", 2), "ごみ");
        assert_eq!(char_tail("ab", 5), "ab");
    }
}
