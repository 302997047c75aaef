//! Regex-driven tokenizer for the path DSL.
//!
//! The parser supplies an ordered list of anchored rules; the first rule
//! matching at the current offset wins. The resulting [`TokenStream`] offers
//! lookahead and keyword matching.

use crate::error::{HybridError, Result};
use regex::Regex;

/// Token categories; a lexer only produces the kinds it has rules for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Whitespace and comments, dropped from the stream
    Skip,
    Quoted,
    Number,
    Word,
    Timestamp,
    Duration,
    Operator,
    Symbol,
    Connective,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub offset: usize,
}

impl Token {
    /// Case-insensitive keyword test for `Word` tokens.
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }
}

pub struct Lexer {
    rules: Vec<(TokenKind, Regex)>,
}

impl Lexer {
    /// Compiles the rules, anchoring each pattern at the current offset.
    pub fn new(rules: &[(TokenKind, &str)]) -> std::result::Result<Self, regex::Error> {
        let rules = rules
            .iter()
            .map(|(kind, pattern)| Ok((*kind, Regex::new(&format!("^(?:{})", pattern))?)))
            .collect::<std::result::Result<Vec<_>, regex::Error>>()?;
        Ok(Lexer { rules })
    }

    pub fn tokenize(&self, input: &str) -> Result<TokenStream> {
        let mut tokens = Vec::new();
        let mut offset = 0;
        while offset < input.len() {
            let rest = &input[offset..];
            let matched = self
                .rules
                .iter()
                .find_map(|(kind, regex)| regex.find(rest).filter(|m| !m.is_empty()).map(|m| (*kind, m.end())));
            let Some((kind, len)) = matched else {
                let snippet: String = rest.chars().take(12).collect();
                return Err(HybridError::ParseError(format!(
                    "unexpected input at offset {}: '{}'",
                    offset, snippet
                )));
            };
            if kind != TokenKind::Skip {
                tokens.push(Token { kind, text: rest[..len].to_string(), offset });
            }
            offset += len;
        }
        Ok(TokenStream::new(tokens))
    }
}

/// A stream of tokens with lookahead.
#[derive(Debug, Clone)]
pub struct TokenStream {
    tokens: Vec<Token>,
    pos: usize,
}

impl TokenStream {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    pub fn peek_n(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n)
    }

    pub fn next_token(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Consumes the next token, failing at end of input.
    pub fn expect_any(&mut self, what: &str) -> Result<Token> {
        self.next_token()
            .ok_or_else(|| HybridError::ParseError(format!("expected {}, found end of input", what)))
    }

    /// Consumes the next token if it has the given kind.
    pub fn expect_kind(&mut self, kind: TokenKind, what: &str) -> Result<Token> {
        match self.peek() {
            Some(token) if token.kind == kind => self.expect_any(what),
            Some(token) => Err(self.unexpected(token, what)),
            None => Err(HybridError::ParseError(format!("expected {}, found end of input", what))),
        }
    }

    /// Consumes an exact symbol or operator.
    pub fn expect_text(&mut self, text: &str) -> Result<Token> {
        match self.peek() {
            Some(token) if token.text == text => self.expect_any(text),
            Some(token) => Err(self.unexpected(token, &format!("'{}'", text))),
            None => Err(HybridError::ParseError(format!("expected '{}', found end of input", text))),
        }
    }

    pub fn expect_keyword(&mut self, keyword: &str) -> Result<Token> {
        match self.peek() {
            Some(token) if token.is_keyword(keyword) => self.expect_any(keyword),
            Some(token) => Err(self.unexpected(token, keyword)),
            None => Err(HybridError::ParseError(format!("expected {}, found end of input", keyword))),
        }
    }

    /// Consumes the keyword when present.
    pub fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_keyword(keyword)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Consumes the exact text when present.
    pub fn eat_text(&mut self, text: &str) -> bool {
        if self.peek().is_some_and(|t| t.text == text) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub fn unexpected(&self, token: &Token, expected: &str) -> HybridError {
        HybridError::ParseError(format!(
            "expected {} at offset {}, found '{}'",
            expected, token.offset, token.text
        ))
    }
}
