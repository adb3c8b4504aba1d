//! Character classification for identifiers and whitespace.
//!
//! ASCII gets a fast path; outside ASCII the ECMAScript identifier
//! categories are approximated with the standard library's Unicode tables
//! (letters for starts, letters/digits/combining joiners for continuations).

/// Can `c` start an identifier?
pub fn is_identifier_start(c: char) -> bool {
    match c {
        '$' | '_' => true,
        'a'..='z' | 'A'..='Z' => true,
        c if c.is_ascii() => false,
        c => c.is_alphabetic(),
    }
}

/// Can `c` continue an identifier?
pub fn is_identifier_char(c: char) -> bool {
    match c {
        '$' | '_' => true,
        'a'..='z' | 'A'..='Z' | '0'..='9' => true,
        '\u{200C}' | '\u{200D}' => true, // ZWNJ / ZWJ
        c if c.is_ascii() => false,
        c => c.is_alphanumeric(),
    }
}

/// Horizontal whitespace and other non-line-break space characters.
pub fn is_space(c: char) -> bool {
    matches!(
        c,
        ' ' | '\t' | '\u{0B}' | '\u{0C}' | '\u{A0}' | '\u{FEFF}'
    ) || (c > '\u{1000}' && matches!(c, '\u{1680}' | '\u{2000}'..='\u{200A}' | '\u{202F}' | '\u{205F}' | '\u{3000}'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_starts() {
        assert!(is_identifier_start('a'));
        assert!(is_identifier_start('$'));
        assert!(is_identifier_start('_'));
        assert!(!is_identifier_start('1'));
        assert!(!is_identifier_start('@'));
    }

    #[test]
    fn digits_continue_but_do_not_start() {
        assert!(!is_identifier_start('7'));
        assert!(is_identifier_char('7'));
    }

    #[test]
    fn unicode_letters() {
        assert!(is_identifier_start('é'));
        assert!(is_identifier_start('λ'));
        assert!(is_identifier_char('λ'));
        assert!(!is_identifier_start('\u{2028}'));
    }
}
