//! Lexer/Scanner for lpcvm source code.
//!
//! The compiler pulls one token at a time with [`Scanner::scan_token`]; there
//! is no pushback.

use crate::error::LexerError;
use crate::lexer::token::{Token, TokenKind};

/// Hand-written scanner producing one token per call, tracking line numbers.
pub struct Scanner<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    current_pos: usize,
    line: usize,
    start_pos: usize,
    start_line: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            current_pos: 0,
            line: 1,
            start_pos: 0,
            start_line: 1,
        }
    }

    /// Scan all tokens from the source, stopping at the first error.
    pub fn scan_tokens(&mut self) -> Result<Vec<Token>, LexerError> {
        let mut tokens = Vec::new();

        loop {
            let token = self.scan_token()?;
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }

        Ok(tokens)
    }

    /// Scan the next token.
    ///
    /// After an error the scanner has already consumed the offending input,
    /// so calling this again continues with the rest of the source.
    pub fn scan_token(&mut self) -> Result<Token, LexerError> {
        self.skip_whitespace_and_comments()?;
        self.mark_start();

        let Some((_, c)) = self.advance() else {
            return Ok(Token::eof(self.line));
        };

        match c {
            // Single-character tokens
            '(' => Ok(self.make_token(TokenKind::LeftParen)),
            ')' => Ok(self.make_token(TokenKind::RightParen)),
            '{' => Ok(self.make_token(TokenKind::LeftBrace)),
            '}' => Ok(self.make_token(TokenKind::RightBrace)),
            ',' => Ok(self.make_token(TokenKind::Comma)),
            ';' => Ok(self.make_token(TokenKind::Semicolon)),
            '%' => Ok(self.make_token(TokenKind::Percent)),

            // One or two character tokens
            '+' => Ok(self.either('=', TokenKind::PlusEqual, TokenKind::Plus)),
            '*' => Ok(self.either('=', TokenKind::StarEqual, TokenKind::Star)),
            '/' => Ok(self.either('=', TokenKind::SlashEqual, TokenKind::Slash)),
            '-' => {
                if self.match_char('>') {
                    Ok(self.make_token(TokenKind::Arrow))
                } else if self.match_char('=') {
                    Ok(self.make_token(TokenKind::MinusEqual))
                } else {
                    Ok(self.make_token(TokenKind::Minus))
                }
            }
            '=' => Ok(self.either('=', TokenKind::EqualEqual, TokenKind::Equal)),
            '!' => Ok(self.either('=', TokenKind::BangEqual, TokenKind::Bang)),
            '<' => Ok(self.either('=', TokenKind::LessEqual, TokenKind::Less)),
            '>' => Ok(self.either('=', TokenKind::GreaterEqual, TokenKind::Greater)),
            '&' if self.match_char('&') => Ok(self.make_token(TokenKind::And)),
            '|' if self.match_char('|') => Ok(self.make_token(TokenKind::Or)),
            ':' if self.match_char(':') => Ok(self.make_token(TokenKind::DoubleColon)),

            // String literals
            '"' => self.scan_string(),

            // Numbers
            c if c.is_ascii_digit() => Ok(self.scan_number(c)),

            // Identifiers and keywords
            c if c.is_alphabetic() || c == '_' => Ok(self.scan_identifier(c)),

            _ => Err(LexerError::unexpected_char(c, self.line)),
        }
    }

    fn either(&mut self, next: char, matched: TokenKind, single: TokenKind) -> Token {
        if self.match_char(next) {
            self.make_token(matched)
        } else {
            self.make_token(single)
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), LexerError> {
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\r') => {
                    self.advance();
                }
                Some('\n') => {
                    self.advance();
                    self.line += 1;
                }
                Some('/') => {
                    if self.peek_next() == Some('/') {
                        // Line comment
                        while self.peek().is_some() && self.peek() != Some('\n') {
                            self.advance();
                        }
                    } else if self.peek_next() == Some('*') {
                        self.skip_block_comment()?;
                    } else {
                        return Ok(());
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Block comments nest.
    fn skip_block_comment(&mut self) -> Result<(), LexerError> {
        let start_line = self.line;
        self.advance(); // consume /
        self.advance(); // consume *
        let mut depth = 1;
        while depth > 0 {
            match self.peek() {
                None => return Err(LexerError::unterminated_comment(start_line)),
                Some('*') if self.peek_next() == Some('/') => {
                    self.advance();
                    self.advance();
                    depth -= 1;
                }
                Some('/') if self.peek_next() == Some('*') => {
                    self.advance();
                    self.advance();
                    depth += 1;
                }
                Some('\n') => {
                    self.advance();
                    self.line += 1;
                }
                _ => {
                    self.advance();
                }
            }
        }
        Ok(())
    }

    fn scan_string(&mut self) -> Result<Token, LexerError> {
        let mut value = String::new();

        loop {
            match self.peek() {
                None | Some('\n') => {
                    return Err(LexerError::unterminated_string(self.start_line));
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    match self.peek() {
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some('r') => value.push('\r'),
                        Some('\\') => value.push('\\'),
                        Some('"') => value.push('"'),
                        Some(c) => {
                            self.advance();
                            return Err(LexerError::invalid_escape(c, self.line));
                        }
                        None => {
                            return Err(LexerError::unterminated_string(self.start_line));
                        }
                    }
                    self.advance();
                }
                Some(c) => {
                    self.advance();
                    value.push(c);
                }
            }
        }

        Ok(self.make_token(TokenKind::StringLiteral(value)))
    }

    fn scan_number(&mut self, first: char) -> Token {
        let mut value = String::from(first);
        let mut is_float = false;

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                value.push(c);
                self.advance();
            } else if c == '.' && !is_float && self.peek_next().is_some_and(|n| n.is_ascii_digit())
            {
                is_float = true;
                value.push(c);
                self.advance();
            } else if c == '_' {
                // Digit separator: 1_000
                self.advance();
            } else {
                break;
            }
        }

        // Digits with at most one interior '.' always parse.
        let n: f64 = value.parse().unwrap_or(0.0);
        self.make_token(TokenKind::NumberLiteral(n))
    }

    fn scan_identifier(&mut self, first: char) -> Token {
        let mut value = String::from(first);

        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                value.push(c);
                self.advance();
            } else {
                break;
            }
        }

        let kind = TokenKind::keyword(&value).unwrap_or(TokenKind::Identifier(value));
        self.make_token(kind)
    }

    fn advance(&mut self) -> Option<(usize, char)> {
        let (pos, c) = self.chars.next()?;
        self.current_pos = pos + c.len_utf8();
        Some((pos, c))
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn peek_next(&self) -> Option<char> {
        let mut iter = self.source[self.current_pos..].chars();
        iter.next();
        iter.next()
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn mark_start(&mut self) {
        self.start_pos = self.current_pos;
        self.start_line = self.line;
    }

    fn make_token(&self, kind: TokenKind) -> Token {
        Token::new(
            kind,
            &self.source[self.start_pos..self.current_pos],
            self.start_line,
        )
    }
}
