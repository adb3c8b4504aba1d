//! Source position utilities.
//!
//! Offsets are byte offsets into the input buffer. Lines are 1-based and a
//! CRLF pair counts as a single line break, as do the Unicode separators
//! U+2028 and U+2029.

/// A line/column pair attached to tokens and AST nodes when the `locations`
/// option is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// 1-based line number.
    pub line: u32,
    /// 0-based column, measured in Unicode scalar values from the line start.
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Result of [`line_info`]: the line and column of an offset plus the byte
/// range of the line that contains it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineInfo {
    pub line: u32,
    pub column: u32,
    /// Byte offset of the first character of the containing line.
    pub line_start: usize,
    /// Byte offset one past the last character of the containing line
    /// (excluding the terminator).
    pub line_end: usize,
}

/// True for every code point the lexer treats as a line terminator.
pub fn is_newline(c: char) -> bool {
    matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}')
}

/// Resolve a byte offset to its line, column, and containing-line bounds.
///
/// Offsets past the end of the input resolve to the end of the last line.
pub fn line_info(input: &str, offset: usize) -> LineInfo {
    let offset = offset.min(input.len());
    let mut line: u32 = 1;
    let mut line_start: usize = 0;

    let mut iter = input.char_indices().peekable();
    while let Some((i, c)) = iter.next() {
        if i >= offset {
            break;
        }
        if is_newline(c) {
            if c == '\r' {
                if let Some(&(_, '\n')) = iter.peek() {
                    iter.next();
                }
            }
            line += 1;
            line_start = match iter.peek() {
                Some(&(j, _)) => j,
                None => input.len(),
            };
        }
    }

    let line_end = input[line_start..]
        .char_indices()
        .find(|&(_, c)| is_newline(c))
        .map(|(i, _)| line_start + i)
        .unwrap_or(input.len());

    let column = input[line_start..offset].chars().count() as u32;
    LineInfo { line, column, line_start, line_end }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_line() {
        let info = line_info("var x = 1;", 4);
        assert_eq!(info.line, 1);
        assert_eq!(info.column, 4);
        assert_eq!(info.line_start, 0);
        assert_eq!(info.line_end, 10);
    }

    #[test]
    fn crlf_counts_as_one_break() {
        let src = "a\r\nb\nc";
        let info = line_info(src, 3); // 'b'
        assert_eq!(info.line, 2);
        assert_eq!(info.column, 0);
        let info = line_info(src, 5); // 'c'
        assert_eq!(info.line, 3);
    }

    #[test]
    fn unicode_separators() {
        let src = "a\u{2028}b";
        let info = line_info(src, 4); // 'b' (U+2028 is 3 bytes)
        assert_eq!(info.line, 2);
        assert_eq!(info.column, 0);
    }

    #[test]
    fn offset_past_end() {
        let info = line_info("xy", 100);
        assert_eq!(info.line, 1);
        assert_eq!(info.column, 2);
    }
}
