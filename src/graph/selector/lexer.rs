//! Tokenizer for selector expressions.

use super::CompileError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    Ident(String),
    Int(i64),
    Str(String),
    True,
    False,
    Null,
    In,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Comma,
    Bang,
    Minus,
    AndAnd,
    OrOr,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Eof,
}

impl Token {
    pub(crate) fn describe(&self) -> String {
        match self {
            Token::Ident(name) => format!("identifier `{name}`"),
            Token::Int(n) => format!("integer {n}"),
            Token::Str(s) => format!("string {s:?}"),
            Token::Eof => "end of input".to_string(),
            other => format!("`{}`", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Token::True => "true",
            Token::False => "false",
            Token::Null => "null",
            Token::In => "in",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Dot => ".",
            Token::Comma => ",",
            Token::Bang => "!",
            Token::Minus => "-",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::Lt => "<",
            Token::Le => "<=",
            Token::Gt => ">",
            Token::Ge => ">=",
            Token::Ident(_) | Token::Int(_) | Token::Str(_) | Token::Eof => "",
        }
    }
}

/// A token and the byte offset it starts at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Spanned {
    pub(crate) token: Token,
    pub(crate) pos: usize,
}

struct Lexer<'src> {
    source: &'src [u8],
    text: &'src str,
    pos: usize,
}

fn syntax(position: usize, message: impl Into<String>) -> CompileError {
    CompileError::Syntax {
        position,
        message: message.into(),
    }
}

impl<'src> Lexer<'src> {
    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.source.get(self.pos + offset).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn next_token(&mut self) -> Result<Spanned, CompileError> {
        self.skip_whitespace();
        let start = self.pos;
        let Some(c) = self.peek() else {
            return Ok(Spanned {
                token: Token::Eof,
                pos: start,
            });
        };

        let two = |lexer: &mut Self, second: u8, long: Token, short: Option<Token>| {
            if lexer.peek_at(1) == Some(second) {
                lexer.pos += 2;
                Ok(long)
            } else if let Some(short) = short {
                lexer.pos += 1;
                Ok(short)
            } else {
                Err(syntax(start, format!("unexpected character {:?}", c as char)))
            }
        };

        let token = match c {
            b'(' => self.single(Token::LParen),
            b')' => self.single(Token::RParen),
            b'[' => self.single(Token::LBracket),
            b']' => self.single(Token::RBracket),
            b'.' => self.single(Token::Dot),
            b',' => self.single(Token::Comma),
            b'-' => self.single(Token::Minus),
            b'!' => two(self, b'=', Token::NotEq, Some(Token::Bang))?,
            b'=' => two(self, b'=', Token::EqEq, None)?,
            b'<' => two(self, b'=', Token::Le, Some(Token::Lt))?,
            b'>' => two(self, b'=', Token::Ge, Some(Token::Gt))?,
            b'&' => two(self, b'&', Token::AndAnd, None)?,
            b'|' => two(self, b'|', Token::OrOr, None)?,
            b'"' | b'\'' => self.string(c)?,
            b'0'..=b'9' => self.integer()?,
            c if c == b'_' || c.is_ascii_alphabetic() => self.word(),
            _ => {
                let ch = self.text[start..].chars().next().unwrap_or('?');
                return Err(syntax(start, format!("unexpected character {ch:?}")));
            }
        };
        Ok(Spanned { token, pos: start })
    }

    fn single(&mut self, token: Token) -> Token {
        self.pos += 1;
        token
    }

    fn word(&mut self) -> Token {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c == b'_' || c.is_ascii_alphanumeric()) {
            self.pos += 1;
        }
        match &self.text[start..self.pos] {
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            "in" => Token::In,
            word => Token::Ident(word.to_string()),
        }
    }

    fn integer(&mut self) -> Result<Token, CompileError> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        self.text[start..self.pos]
            .parse::<i64>()
            .map(Token::Int)
            .map_err(|e| syntax(start, format!("invalid integer: {e}")))
    }

    fn string(&mut self, quote: u8) -> Result<Token, CompileError> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        loop {
            let rest = &self.text[self.pos..];
            let Some(ch) = rest.chars().next() else {
                return Err(syntax(start, "unterminated string"));
            };
            self.pos += ch.len_utf8();
            match ch {
                c if c as u32 == quote as u32 => return Ok(Token::Str(out)),
                '\\' => {
                    let Some(escaped) = self.text[self.pos..].chars().next() else {
                        return Err(syntax(start, "unterminated string"));
                    };
                    self.pos += escaped.len_utf8();
                    out.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '\\' | '"' | '\'' => escaped,
                        other => return Err(syntax(self.pos - 2, format!("unknown escape \\{other}"))),
                    });
                }
                c => out.push(c),
            }
        }
    }
}

/// Split `text` into tokens, ending with [`Token::Eof`].
pub(crate) fn tokenize(text: &str) -> Result<Vec<Spanned>, CompileError> {
    let mut lexer = Lexer {
        source: text.as_bytes(),
        text,
        pos: 0,
    };
    let mut tokens = Vec::new();
    loop {
        let spanned = lexer.next_token()?;
        let is_eof = spanned.token == Token::Eof;
        tokens.push(spanned);
        if is_eof {
            return Ok(tokens);
        }
    }
}
