use super::ast::Span;
use super::error::CompileError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Number(f64),
    /// `"..."`
    Str(String),
    /// `'...'`
    Text(String),

    // Identifiers & keywords
    Ident(String),
    If,
    Else,
    Local,
    Repeat,
    Schema,
    Foreach,
    In,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Colon,
    Arrow, // ->

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Lt,
    Gt,
    EqEq, // ==
    Eq,   // =

    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Tokenize `source`. Stops at the first malformed token.
pub fn lex(source_id: &str, source: &str) -> Result<Vec<SpannedToken>, CompileError> {
    let mut lexer = Lexer::new(source);
    lexer.tokenize().map_err(|e| e.in_source(source_id))
}

struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    tokens: Vec<SpannedToken>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            tokens: Vec::new(),
        }
    }

    fn tokenize(&mut self) -> Result<Vec<SpannedToken>, CompileError> {
        loop {
            self.skip_whitespace_and_comments();
            if self.pos >= self.bytes.len() {
                break;
            }

            let start = self.pos;
            let ch = self.bytes[self.pos];

            match ch {
                b'(' => self.single(Token::LParen),
                b')' => self.single(Token::RParen),
                b'{' => self.single(Token::LBrace),
                b'}' => self.single(Token::RBrace),
                b'[' => self.single(Token::LBracket),
                b']' => self.single(Token::RBracket),
                b',' => self.single(Token::Comma),
                b';' => self.single(Token::Semicolon),
                b':' => self.single(Token::Colon),
                b'+' => self.single(Token::Plus),
                b'*' => self.single(Token::Star),
                b'/' => self.single(Token::Slash),
                b'<' => self.single(Token::Lt),
                b'>' => self.single(Token::Gt),
                b'-' => {
                    self.pos += 1;
                    if self.peek() == Some(b'>') {
                        self.pos += 1;
                        self.push(Token::Arrow, start, self.pos);
                    } else {
                        self.push(Token::Minus, start, self.pos);
                    }
                }
                b'=' => {
                    self.pos += 1;
                    if self.peek() == Some(b'=') {
                        self.pos += 1;
                        self.push(Token::EqEq, start, self.pos);
                    } else {
                        self.push(Token::Eq, start, self.pos);
                    }
                }
                b'"' | b'\'' => {
                    self.pos += 1;
                    self.lex_quoted(start, ch)?;
                }
                b'0'..=b'9' => self.lex_number(start)?,
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.lex_ident(start),
                _ => {
                    let ch = self.source[start..].chars().next().unwrap_or('?');
                    return Err(CompileError::lex(
                        format!("Unexpected character: '{ch}'"),
                        Span::new(start, start + ch.len_utf8()),
                    ));
                }
            }
        }

        self.tokens.push(SpannedToken {
            token: Token::Eof,
            span: Span::new(self.pos, self.pos),
        });

        Ok(std::mem::take(&mut self.tokens))
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn single(&mut self, token: Token) {
        let start = self.pos;
        self.pos += 1;
        self.push(token, start, self.pos);
    }

    fn push(&mut self, token: Token, start: usize, end: usize) {
        self.tokens.push(SpannedToken {
            token,
            span: Span::new(start, end),
        });
    }

    fn skip_whitespace_and_comments(&mut self) {
        while self.pos < self.bytes.len() {
            match self.bytes[self.pos] {
                b' ' | b'\t' | b'\n' | b'\r' => self.pos += 1,
                b'/' if self.bytes.get(self.pos + 1) == Some(&b'/') => {
                    while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
    }

    /// String (`"`) and text (`'`) literals share one escape set.
    fn lex_quoted(&mut self, start: usize, quote: u8) -> Result<(), CompileError> {
        let mut value = String::new();
        let mut run_start = self.pos;
        loop {
            match self.peek() {
                None | Some(b'\n') => {
                    return Err(CompileError::lex(
                        "Unterminated string literal",
                        Span::new(start, self.pos),
                    ));
                }
                Some(b) if b == quote => {
                    value.push_str(&self.source[run_start..self.pos]);
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    value.push_str(&self.source[run_start..self.pos]);
                    let escape_start = self.pos;
                    self.pos += 1;
                    let escaped = match self.peek() {
                        Some(b'"') => '"',
                        Some(b'\'') => '\'',
                        Some(b'\\') => '\\',
                        Some(b'n') => '\n',
                        Some(b't') => '\t',
                        _ => {
                            return Err(CompileError::lex(
                                "Invalid escape sequence",
                                Span::new(escape_start, (self.pos + 1).min(self.bytes.len())),
                            ));
                        }
                    };
                    value.push(escaped);
                    self.pos += 1;
                    run_start = self.pos;
                }
                Some(_) => self.pos += 1,
            }
        }
        let token = if quote == b'"' {
            Token::Str(value)
        } else {
            Token::Text(value)
        };
        self.push(token, start, self.pos);
        Ok(())
    }

    fn lex_number(&mut self, start: usize) -> Result<(), CompileError> {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        if self.pos < self.bytes.len()
            && self.bytes[self.pos] == b'.'
            && self.bytes.get(self.pos + 1).is_some_and(u8::is_ascii_digit)
        {
            self.pos += 1;
            while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_digit() {
                self.pos += 1;
            }
        }
        let text = &self.source[start..self.pos];
        match text.parse::<f64>() {
            Ok(v) => {
                self.push(Token::Number(v), start, self.pos);
                Ok(())
            }
            Err(_) => Err(CompileError::lex(
                format!("Invalid number: {text}"),
                Span::new(start, self.pos),
            )),
        }
    }

    fn lex_ident(&mut self, start: usize) {
        while self.pos < self.bytes.len()
            && (self.bytes[self.pos].is_ascii_alphanumeric()
                || self.bytes[self.pos] == b'_'
                || self.bytes[self.pos] == b'.')
        {
            self.pos += 1;
        }
        let word = &self.source[start..self.pos];
        let token = match word {
            "if" => Token::If,
            "else" => Token::Else,
            "local" => Token::Local,
            "repeat" => Token::Repeat,
            "schema" => Token::Schema,
            "foreach" => Token::Foreach,
            "in" => Token::In,
            _ => Token::Ident(word.to_string()),
        };
        self.push(token, start, self.pos);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dsl::error::ErrorKind;

    fn tok(s: &str) -> Vec<Token> {
        lex("test", s).unwrap().into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn simple_tokens() {
        let tokens = tok("( ) { } [ ] , ; :");
        assert_eq!(
            tokens,
            vec![
                Token::LParen,
                Token::RParen,
                Token::LBrace,
                Token::RBrace,
                Token::LBracket,
                Token::RBracket,
                Token::Comma,
                Token::Semicolon,
                Token::Colon,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn keywords() {
        let tokens = tok("if else local repeat schema foreach in");
        assert_eq!(
            tokens,
            vec![
                Token::If,
                Token::Else,
                Token::Local,
                Token::Repeat,
                Token::Schema,
                Token::Foreach,
                Token::In,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn longest_match_operators() {
        let tokens = tok("a = b == c -> d - e");
        assert_eq!(
            tokens,
            vec![
                Token::Ident("a".into()),
                Token::Eq,
                Token::Ident("b".into()),
                Token::EqEq,
                Token::Ident("c".into()),
                Token::Arrow,
                Token::Ident("d".into()),
                Token::Minus,
                Token::Ident("e".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn numbers_are_always_floats() {
        assert_eq!(
            tok("42 2.5 0.125"),
            vec![
                Token::Number(42.0),
                Token::Number(2.5),
                Token::Number(0.125),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn string_and_text_literals() {
        let tokens = tok(r#""hi \"there\"" 'line\n'"#);
        assert_eq!(
            tokens,
            vec![
                Token::Str("hi \"there\"".into()),
                Token::Text("line\n".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn dotted_identifiers() {
        assert_eq!(
            tok("mob.spawn_at"),
            vec![Token::Ident("mob.spawn_at".into()), Token::Eof]
        );
    }

    #[test]
    fn comments_and_newlines_stripped() {
        let tokens = tok("x + y // this is a comment\nz");
        assert_eq!(
            tokens,
            vec![
                Token::Ident("x".into()),
                Token::Plus,
                Token::Ident("y".into()),
                Token::Ident("z".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn spans_partition_the_source() {
        let source = "schema greet(name: string) -> string {\n  // hi\n  local n = length(name) * 2.5\n  'x' + \"y\\n\"\n}\n";
        let tokens = lex("test", source).unwrap();
        let mut cursor = 0;
        for t in &tokens {
            assert!(t.span.start >= cursor, "overlapping span {:?}", t.span);
            let gap = &source[cursor..t.span.start];
            let without_comments: String = gap
                .lines()
                .map(|l| l.split("//").next().unwrap_or(""))
                .collect();
            assert!(
                without_comments.trim().is_empty(),
                "non-whitespace gap {gap:?}"
            );
            cursor = t.span.end;
        }
        assert_eq!(cursor, source.len());
        let last = tokens.last().unwrap();
        assert_eq!(last.token, Token::Eof);
        assert_eq!(last.span, Span::new(source.len(), source.len()));
    }

    #[test]
    fn spans_cover_token_text() {
        let source = "foo == 12.5";
        let tokens = lex("test", source).unwrap();
        let slices: Vec<&str> = tokens
            .iter()
            .map(|t| &source[t.span.start..t.span.end])
            .collect();
        assert_eq!(slices, vec!["foo", "==", "12.5", ""]);
    }

    #[test]
    fn unexpected_character_fails_fast() {
        let err = lex("bad.cds", "a # b $").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Lex);
        assert_eq!(err.span, Span::new(2, 3));
        assert_eq!(err.source_id.as_deref(), Some("bad.cds"));
    }

    #[test]
    fn unterminated_literal_is_an_error() {
        let err = lex("test", "\"abc").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Lex);
        assert_eq!(err.span, Span::new(0, 4));
    }

    #[test]
    fn invalid_escape_is_an_error() {
        let err = lex("test", r"'a\qb'").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Lex);
        assert_eq!(err.span, Span::new(2, 4));
    }
}
