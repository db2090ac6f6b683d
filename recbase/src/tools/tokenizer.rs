//! Separator based tokenizer that never splits inside quotes, brackets or parentheses.

/// Splits text into tokens at the configured separator characters.
///
/// Quoted sections (`'`, `"`, `` ` ``), `[...]` and balanced `(...)` groups are
/// always kept intact. Empty tokens are dropped unless `keep_empty` is set.
#[derive(Debug, Clone)]
pub struct Tokenizer<'a> {
    input: &'a str,
    separators: Vec<char>,
    keep_separator: bool,
    keep_empty: bool,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            separators: vec![','],
            keep_separator: false,
            keep_empty: false,
        }
    }

    pub fn separators(mut self, separators: &[char]) -> Self {
        self.separators = separators.to_vec();
        self
    }

    /// Emits each separator that is not whitespace as a standalone token.
    pub fn keep_separator(mut self, keep: bool) -> Self {
        self.keep_separator = keep;
        self
    }

    pub fn keep_empty(mut self, keep: bool) -> Self {
        self.keep_empty = keep;
        self
    }

    /// Scans the whole input and returns the trimmed tokens.
    ///
    /// Unbalanced quotes or parentheses are reported as an error.
    pub fn scan_all(&self) -> Result<Vec<String>, String> {
        let mut tokens = Vec::new();
        let mut buf = String::new();
        let mut quote: Option<char> = None;
        let mut depth: usize = 0;
        let mut in_bracket = false;

        for ch in self.input.chars() {
            if let Some(q) = quote {
                buf.push(ch);
                if ch == q {
                    quote = None;
                }
                continue;
            }
            if in_bracket {
                buf.push(ch);
                if ch == ']' {
                    in_bracket = false;
                }
                continue;
            }
            match ch {
                '\'' | '"' | '`' => {
                    quote = Some(ch);
                    buf.push(ch);
                }
                '[' => {
                    in_bracket = true;
                    buf.push(ch);
                }
                '(' => {
                    depth += 1;
                    buf.push(ch);
                }
                ')' => {
                    if depth == 0 {
                        return Err(format!("unbalanced parenthesis in {:?}", self.input));
                    }
                    depth -= 1;
                    buf.push(ch);
                }
                c if depth == 0 && self.separators.contains(&c) => {
                    self.flush(&mut buf, &mut tokens);
                    if self.keep_separator && !c.is_whitespace() {
                        tokens.push(c.to_string());
                    }
                }
                c => buf.push(c),
            }
        }

        if quote.is_some() {
            return Err(format!("unterminated quote in {:?}", self.input));
        }
        if depth != 0 || in_bracket {
            return Err(format!("unbalanced parenthesis in {:?}", self.input));
        }
        self.flush(&mut buf, &mut tokens);

        Ok(tokens)
    }

    fn flush(&self, buf: &mut String, tokens: &mut Vec<String>) {
        let token = buf.trim();
        if !token.is_empty() || self.keep_empty {
            tokens.push(token.to_string());
        }
        buf.clear();
    }
}
