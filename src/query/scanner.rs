//! Lexer for the user-facing search syntax
//!
//! Splits the input into whitespace-delimited words and classifies each one
//! by its keyword prefix. Words keep their raw text; the parser decides how
//! a token translates into engine syntax.

/// Token kinds produced by the scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// A character that cannot start a word (`#`, `*`)
    Illegal,
    /// End of input
    Eof,
    /// A run of whitespace
    Whitespace,
    /// Plain search word (includes `ext:...` and other engine passthroughs)
    Ident,
    /// `type:<value>` filter
    Type,
    /// `modified:<value>` filter
    Modified,
    /// `updated:<value>` filter
    Updated,
    /// `size:<op><value>` filter, optionally `+`-prefixed
    Size,
}

/// Lexical unit: kind plus the literal text it was scanned from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchToken {
    pub kind: TokenKind,
    pub literal: String,
}

impl SearchToken {
    fn new(kind: TokenKind, literal: impl Into<String>) -> Self {
        Self {
            kind,
            literal: literal.into(),
        }
    }
}

/// Characters that may appear inside a word
fn is_word_char(ch: char) -> bool {
    !ch.is_whitespace() && ch != '#' && ch != '*'
}

/// Stateless tokenizer over a query string
pub struct Scanner<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    /// Scan the next token; returns an end-of-input token forever once done
    pub fn scan(&mut self) -> SearchToken {
        let Some(ch) = self.peek_char() else {
            return SearchToken::new(TokenKind::Eof, "");
        };

        if ch.is_whitespace() {
            return self.scan_whitespace();
        }

        if is_word_char(ch) {
            return self.scan_word();
        }

        self.advance();
        SearchToken::new(TokenKind::Illegal, ch)
    }

    /// Consume a contiguous whitespace run into a single token
    fn scan_whitespace(&mut self) -> SearchToken {
        let start = self.pos;
        while let Some(ch) = self.peek_char() {
            if !ch.is_whitespace() {
                break;
            }
            self.advance();
        }
        SearchToken::new(TokenKind::Whitespace, &self.input[start..self.pos])
    }

    /// Consume a word and classify it by keyword prefix
    fn scan_word(&mut self) -> SearchToken {
        let start = self.pos;
        while let Some(ch) = self.peek_char() {
            if !is_word_char(ch) {
                break;
            }
            self.advance();
        }

        let literal = &self.input[start..self.pos];
        SearchToken::new(classify_word(literal), literal)
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(ch) = self.peek_char() {
            self.pos += ch.len_utf8();
        }
    }
}

/// Keyword classification is case-insensitive; a `+` prefix is recognized
/// only for size filters (matching the engine's mandatory-match marker)
fn classify_word(literal: &str) -> TokenKind {
    let lowered = literal.to_lowercase();
    if lowered.starts_with("size:") || lowered.starts_with("+size:") {
        TokenKind::Size
    } else if lowered.starts_with("type:") {
        TokenKind::Type
    } else if lowered.starts_with("modified:") {
        TokenKind::Modified
    } else if lowered.starts_with("updated:") {
        TokenKind::Updated
    } else {
        TokenKind::Ident
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_one(input: &str) -> SearchToken {
        Scanner::new(input).scan()
    }

    #[test]
    fn test_scan_special_tokens() {
        let cases = [
            ("", TokenKind::Eof, ""),
            ("#", TokenKind::Illegal, "#"),
            (" ", TokenKind::Whitespace, " "),
            ("\t", TokenKind::Whitespace, "\t"),
            ("\n", TokenKind::Whitespace, "\n"),
            ("*", TokenKind::Illegal, "*"),
        ];

        for (input, kind, literal) in cases {
            let tok = scan_one(input);
            assert_eq!(tok.kind, kind, "input {:?}", input);
            assert_eq!(tok.literal, literal, "input {:?}", input);
        }
    }

    #[test]
    fn test_scan_identifiers() {
        let cases = ["foo", "\"foo\"", "bar~2", "ext:mp3"];
        for input in cases {
            let tok = scan_one(input);
            assert_eq!(tok.kind, TokenKind::Ident, "input {:?}", input);
            assert_eq!(tok.literal, input);
        }
    }

    #[test]
    fn test_scan_keywords() {
        let cases = [
            ("type:audio", TokenKind::Type),
            ("size:128MB", TokenKind::Size),
            ("size:128", TokenKind::Size),
            ("size:>=128", TokenKind::Size),
            ("+size:128", TokenKind::Size),
            ("+size:>128", TokenKind::Size),
            ("modified:today", TokenKind::Modified),
            ("updated:recently", TokenKind::Updated),
        ];

        for (input, kind) in cases {
            let tok = scan_one(input);
            assert_eq!(tok.kind, kind, "input {:?}", input);
            assert_eq!(tok.literal, input);
        }
    }

    #[test]
    fn test_keyword_case_insensitive() {
        assert_eq!(scan_one("TYPE:audio").kind, TokenKind::Type);
        assert_eq!(scan_one("Size:10mb").kind, TokenKind::Size);
        assert_eq!(scan_one("MODIFIED:today").kind, TokenKind::Modified);
    }

    #[test]
    fn test_whitespace_run_is_one_token() {
        let mut scanner = Scanner::new("foo  \t bar");
        assert_eq!(scanner.scan().literal, "foo");
        assert_eq!(
            scanner.scan(),
            SearchToken::new(TokenKind::Whitespace, "  \t ")
        );
        assert_eq!(scanner.scan().literal, "bar");
        assert_eq!(scanner.scan().kind, TokenKind::Eof);
    }

    #[test]
    fn test_illegal_breaks_word() {
        let mut scanner = Scanner::new("foo#bar");
        assert_eq!(scanner.scan(), SearchToken::new(TokenKind::Ident, "foo"));
        assert_eq!(scanner.scan(), SearchToken::new(TokenKind::Illegal, "#"));
        assert_eq!(scanner.scan(), SearchToken::new(TokenKind::Ident, "bar"));
    }

    #[test]
    fn test_eof_is_sticky() {
        let mut scanner = Scanner::new("a");
        assert_eq!(scanner.scan().kind, TokenKind::Ident);
        assert_eq!(scanner.scan().kind, TokenKind::Eof);
        assert_eq!(scanner.scan().kind, TokenKind::Eof);
    }

    #[test]
    fn test_plus_prefix_only_special_for_size() {
        assert_eq!(scan_one("+type:audio").kind, TokenKind::Ident);
        assert_eq!(scan_one("+modified:today").kind, TokenKind::Ident);
        assert_eq!(scan_one("+foo").kind, TokenKind::Ident);
    }
}
