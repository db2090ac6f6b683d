//! Tokenizer for the filter language.

use crate::errors::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Whitespace,
    Identifier,
    Text,
    Number,
    Sign,
    Join,
    /// A parenthesized sub expression; the literal is the inner text.
    Group,
    /// A function call; the literal is the function name.
    Function,
    Comment,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub literal: String,
    /// Arguments of a [`TokenKind::Function`] token.
    pub args: Vec<Token>,
}

impl Token {
    pub fn new(kind: TokenKind, literal: impl Into<String>) -> Self {
        Self {
            kind,
            literal: literal.into(),
            args: Vec::new(),
        }
    }

    /// Whether the token can be used as an expression operand.
    pub fn is_operand(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Identifier | TokenKind::Text | TokenKind::Number | TokenKind::Function
        )
    }
}

const SIGNS: &[&str] = &[
    "=", "!=", "~", "!~", "<", "<=", ">", ">=", "?=", "?!=", "?~", "?!~", "?<", "?<=", "?>", "?>=",
];

const MAX_FUNCTION_DEPTH: usize = 3;

fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '@' || c == '#'
}

fn is_identifier_char(c: char) -> bool {
    is_identifier_start(c) || c.is_ascii_digit() || c == '.' || c == ':'
}

fn is_sign_char(c: char) -> bool {
    matches!(c, '=' | '!' | '~' | '<' | '>' | '?')
}

/// Sequential scanner over a filter string.
pub struct Scanner {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Scanner {
    pub fn new(input: &str) -> Self {
        Self::with_depth(input, 0)
    }

    fn with_depth(input: &str, depth: usize) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            depth,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    /// Returns the next token or `None` once the input is exhausted.
    pub fn scan(&mut self) -> CoreResult<Option<Token>> {
        let Some(c) = self.peek() else {
            return Ok(None);
        };

        let token = if c.is_whitespace() {
            self.scan_whitespace()
        } else if c == '/' && self.peek_at(1) == Some('/') {
            self.scan_comment()
        } else if is_identifier_start(c) {
            self.scan_identifier()?
        } else if c.is_ascii_digit() || (c == '-' && self.peek_at(1).is_some_and(|n| n.is_ascii_digit() || n == '.')) {
            self.scan_number()?
        } else if c == '\'' || c == '"' {
            self.scan_text()?
        } else if is_sign_char(c) {
            self.scan_sign()?
        } else if c == '&' || c == '|' {
            self.scan_join()?
        } else if c == '(' {
            let inner = self.scan_parenthesized()?;
            Token::new(TokenKind::Group, inner)
        } else {
            return Err(CoreError::filter(format!("unexpected character {c:?}")));
        };

        Ok(Some(token))
    }

    /// Scans everything, skipping whitespace and comments.
    pub fn scan_all(&mut self) -> CoreResult<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some(token) = self.scan()? {
            if !matches!(token.kind, TokenKind::Whitespace | TokenKind::Comment) {
                tokens.push(token);
            }
        }
        Ok(tokens)
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn scan_whitespace(&mut self) -> Token {
        Token::new(TokenKind::Whitespace, self.take_while(char::is_whitespace))
    }

    fn scan_comment(&mut self) -> Token {
        self.pos += 2;
        let text = self.take_while(|c| c != '\n');
        Token::new(TokenKind::Comment, text.trim())
    }

    fn scan_identifier(&mut self) -> CoreResult<Token> {
        let literal = self.take_while(is_identifier_char);
        if literal.ends_with('.') || literal.ends_with(':') || literal.contains("..") {
            return Err(CoreError::filter(format!("invalid identifier {literal:?}")));
        }

        if self.peek() == Some('(') {
            if self.depth >= MAX_FUNCTION_DEPTH {
                return Err(CoreError::filter(format!("max function nesting reached at {literal:?}")));
            }
            let inner = self.scan_parenthesized()?;
            let mut token = Token::new(TokenKind::Function, literal);
            token.args = self.scan_function_args(&inner)?;
            return Ok(token);
        }

        Ok(Token::new(TokenKind::Identifier, literal))
    }

    fn scan_function_args(&self, inner: &str) -> CoreResult<Vec<Token>> {
        let mut nested = Scanner::with_depth(inner, self.depth + 1);
        let mut args = Vec::new();
        let mut expect_arg = true;
        while let Some(token) = nested.scan()? {
            match token.kind {
                TokenKind::Whitespace | TokenKind::Comment => {}
                _ if expect_arg => {
                    if !token.is_operand() {
                        return Err(CoreError::filter(format!("invalid function argument {:?}", token.literal)));
                    }
                    args.push(token);
                    expect_arg = false;
                }
                _ => {
                    return Err(CoreError::filter(format!("expected a comma, got {:?}", token.literal)));
                }
            }
            if !expect_arg && nested.peek_non_ws() == Some(',') {
                nested.skip_ws();
                nested.pos += 1;
                expect_arg = true;
            }
        }
        if expect_arg && !args.is_empty() {
            return Err(CoreError::filter("trailing comma in function arguments"));
        }
        Ok(args)
    }

    fn peek_non_ws(&self) -> Option<char> {
        self.chars[self.pos..].iter().copied().find(|c| !c.is_whitespace())
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn scan_number(&mut self) -> CoreResult<Token> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        self.take_while(|c| c.is_ascii_digit() || c == '.');
        let literal: String = self.chars[start..self.pos].iter().collect();
        if literal.parse::<f64>().is_err() {
            return Err(CoreError::filter(format!("invalid number {literal:?}")));
        }
        Ok(Token::new(TokenKind::Number, literal))
    }

    fn scan_text(&mut self) -> CoreResult<Token> {
        let quote = self.chars[self.pos];
        self.pos += 1;
        let mut literal = String::new();
        while let Some(c) = self.peek() {
            self.pos += 1;
            if c == '\\' && self.peek() == Some(quote) {
                literal.push(quote);
                self.pos += 1;
                continue;
            }
            if c == quote {
                return Ok(Token::new(TokenKind::Text, literal));
            }
            literal.push(c);
        }
        Err(CoreError::filter(format!("unterminated quoted text {literal:?}")))
    }

    fn scan_sign(&mut self) -> CoreResult<Token> {
        let literal = self.take_while(is_sign_char);
        if !SIGNS.contains(&literal.as_str()) {
            return Err(CoreError::filter(format!("invalid sign operator {literal:?}")));
        }
        Ok(Token::new(TokenKind::Sign, literal))
    }

    fn scan_join(&mut self) -> CoreResult<Token> {
        let literal = self.take_while(|c| c == '&' || c == '|');
        if literal != "&&" && literal != "||" {
            return Err(CoreError::filter(format!("invalid join operator {literal:?}")));
        }
        Ok(Token::new(TokenKind::Join, literal))
    }

    /// Consumes a balanced `(...)` block and returns its inner text.
    fn scan_parenthesized(&mut self) -> CoreResult<String> {
        self.pos += 1;
        let start = self.pos;
        let mut depth = 1usize;
        let mut quote: Option<char> = None;
        while let Some(c) = self.peek() {
            self.pos += 1;
            match quote {
                Some(q) => {
                    if c == '\\' && self.peek() == Some(q) {
                        self.pos += 1;
                    } else if c == q {
                        quote = None;
                    }
                }
                None => match c {
                    '\'' | '"' => quote = Some(c),
                    '(' => depth += 1,
                    ')' => {
                        depth -= 1;
                        if depth == 0 {
                            return Ok(self.chars[start..self.pos - 1].iter().collect());
                        }
                    }
                    _ => {}
                },
            }
        }
        Err(CoreError::filter("unbalanced parenthesis"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<(TokenKind, String)> {
        Scanner::new(input)
            .scan_all()
            .unwrap()
            .into_iter()
            .map(|t| (t.kind, t.literal))
            .collect()
    }

    #[test]
    fn test_scan_expression() {
        assert_eq!(
            kinds("title ?~ 'a\\'b' && (n >= -1.5 || @request.auth.id != \"\") // note"),
            vec![
                (TokenKind::Identifier, "title".to_string()),
                (TokenKind::Sign, "?~".to_string()),
                (TokenKind::Text, "a'b".to_string()),
                (TokenKind::Join, "&&".to_string()),
                (TokenKind::Group, "n >= -1.5 || @request.auth.id != \"\"".to_string()),
            ]
        );
    }

    #[test]
    fn test_scan_function() {
        let tokens = Scanner::new("geoDistance(a.lon, a.lat, 1, 2.5) < 25").scan_all().unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Function);
        assert_eq!(tokens[0].literal, "geoDistance");
        let args: Vec<&str> = tokens[0].args.iter().map(|t| t.literal.as_str()).collect();
        assert_eq!(args, vec!["a.lon", "a.lat", "1", "2.5"]);
    }

    #[test]
    fn test_scan_errors() {
        for input in ["a = 'x", "a =! b", "a & b", "(a = b", "a. = 1", "f(a,)", "a $ b"] {
            assert!(Scanner::new(input).scan_all().is_err(), "expected error for {input:?}");
        }
    }
}
