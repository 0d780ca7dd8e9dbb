//! FILENAME: core/expr-parser/src/lexer.rs
//! PURPOSE: Scans a raw expression string and produces a stream of Tokens.
//! CONTEXT: First stage of the parsing pipeline. Numbers and identifiers are
//! sliced straight out of the input; only string literals are copied, since a
//! doubled quote inside them stands for one quote.
//!
//! Identifiers are case-preserving (statistic ids are matched exactly) and may
//! contain dots, e.g. `census.population`.

use crate::token::Token;

pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer { src, pos: 0 }
    }

    /// Scans and returns the next token; `Token::EOF` once the input is used up.
    pub fn next_token(&mut self) -> Token {
        self.skip_while(char::is_whitespace);

        let ch = match self.peek() {
            Some(ch) => ch,
            None => return Token::EOF,
        };
        let start = self.pos;
        self.pos += ch.len_utf8();

        match ch {
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Asterisk,
            '/' => Token::Slash,
            '^' => Token::Caret,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            ',' => Token::Comma,
            '"' | '\'' => self.string(ch),
            c if c.is_ascii_digit() || c == '.' => self.number(start),
            c if starts_identifier(c) => {
                self.skip_while(continues_identifier);
                Token::Identifier(self.src[start..self.pos].to_string())
            }
            other => Token::Illegal(other),
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn skip_while(&mut self, keep: impl Fn(char) -> bool) {
        while let Some(ch) = self.peek().filter(|&c| keep(c)) {
            self.pos += ch.len_utf8();
        }
    }

    /// Everything up to the matching quote. An unterminated literal runs to
    /// the end of the input.
    fn string(&mut self, quote: char) -> Token {
        let mut text = String::new();
        while let Some(ch) = self.peek() {
            self.pos += ch.len_utf8();
            if ch != quote {
                text.push(ch);
            } else if self.peek() == Some(quote) {
                self.pos += quote.len_utf8();
                text.push(quote);
            } else {
                break;
            }
        }
        Token::String(text)
    }

    /// Digits with an optional fraction and an optional signed exponent.
    fn number(&mut self, start: usize) -> Token {
        self.skip_while(|c| c.is_ascii_digit() || c == '.');
        if matches!(self.peek(), Some('e' | 'E')) {
            self.pos += 1;
            if matches!(self.peek(), Some('+' | '-')) {
                self.pos += 1;
            }
            self.skip_while(|c| c.is_ascii_digit());
        }

        let text = &self.src[start..self.pos];
        match text.parse::<f64>() {
            Ok(n) => Token::Number(n),
            Err(_) => Token::Illegal(text.chars().next().unwrap_or('.')),
        }
    }
}

fn starts_identifier(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn continues_identifier(ch: char) -> bool {
    starts_identifier(ch) || ch.is_ascii_digit() || ch == '.'
}
