use std::{
    borrow::Cow,
    iter::{FusedIterator, Peekable},
};

use crate::{
    err::JsonError,
    util::{is_whitespace, unescape},
};

#[derive(Copy, Clone, PartialEq, Eq)]
pub(crate) enum TokenType {
    BeginObject,
    EndObject,
    BeginArray,
    EndArray,
    FieldName,
    Number,
    BoolTrue,
    BoolFalse,
    String,
    Null,

    // Never handed out by the parser
    Invalid,
    Comma,
    Colon,
}

impl std::fmt::Debug for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        self.as_ref().fmt(f)
    }
}

impl AsRef<str> for TokenType {
    fn as_ref(&self) -> &str {
        use TokenType::*;
        match self {
            BeginObject => "{",
            EndObject => "}",
            BeginArray => "[",
            EndArray => "]",
            FieldName => "<field name>",
            Number => "<number>",
            BoolTrue => "true",
            BoolFalse => "false",
            String => "<string>",
            Null => "null",
            Comma => ",",
            Colon => ":",
            Invalid => "<invalid>",
        }
    }
}

struct Lexer<'a> {
    src: &'a str,
    it: Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            it: src.char_indices().peekable(),
        }
    }

    fn cur_pos(&mut self) -> usize {
        self.it
            .peek()
            .map(|i| i.0)
            .unwrap_or_else(|| self.src.len())
    }
}

macro_rules! repeatedly_matches {
    ($e:expr, $($p:pat),+ $(,)*) => {
        ($(matches!($e, Some((_, $p))) && )+ true)
    };
}

impl<'a> Iterator for Lexer<'a> {
    type Item = LexerToken;
    fn next(&mut self) -> Option<Self::Item> {
        // On EOF inside a literal the match fails and we return `Invalid`.
        // `CharIndices` is fused, so later calls return `None`.
        let tup = loop {
            let tup = self.it.next()?;
            if is_whitespace(tup.1) {
                continue;
            }
            // Line comments, as emitted by the debug renderer
            if tup.1 == '/' && matches!(self.it.peek(), Some((_, '/'))) {
                while !matches!(self.it.next(), Some((_, '\n')) | None) {}
                continue;
            }
            break tup;
        };
        let kind = match tup.1 {
            '{' => TokenType::BeginObject,
            '}' => TokenType::EndObject,
            '[' => TokenType::BeginArray,
            ']' => TokenType::EndArray,
            ':' => TokenType::Colon,
            ',' => TokenType::Comma,
            't' => {
                if repeatedly_matches!(self.it.next(), 'r', 'u', 'e') {
                    TokenType::BoolTrue
                } else {
                    TokenType::Invalid
                }
            }
            'f' => {
                if repeatedly_matches!(self.it.next(), 'a', 'l', 's', 'e') {
                    TokenType::BoolFalse
                } else {
                    TokenType::Invalid
                }
            }
            'n' => {
                if repeatedly_matches!(self.it.next(), 'u', 'l', 'l') {
                    TokenType::Null
                } else {
                    TokenType::Invalid
                }
            }
            '"' => {
                // An unterminated string ends the token stream
                let mut esc = false;
                loop {
                    let nxt = self.it.next()?;
                    match nxt.1 {
                        '\\' => esc = !esc,
                        '"' if !esc => break,
                        _ => esc = false,
                    }
                }
                TokenType::String
            }
            '0'..='9' | '-' | '+' | '.' | 'E' | 'e' => {
                while matches!(
                    self.it.peek(),
                    Some((_, '0'..='9' | '-' | '+' | '.' | 'E' | 'e'))
                ) {
                    self.it.next();
                }
                TokenType::Number
            }
            _ => TokenType::Invalid,
        };

        Some(LexerToken {
            kind,
            span: Span {
                first: tup.0,
                end: self.cur_pos(),
            },
        })
    }
}

impl<'a> FusedIterator for Lexer<'a> {}

/// Byte range of a token in the source text.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Span {
    pub first: usize,
    pub end: usize,
}

struct LexerToken {
    kind: TokenType,
    span: Span,
}

/// A token with its text. Strings and field names are unescaped and unquoted.
#[derive(Clone, Debug)]
pub(crate) struct Token<'a> {
    pub kind: TokenType,
    pub dat: Cow<'a, str>,
    pub span: Span,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Value,
    FirstKey,
    NextKey,
    FirstElem,
    NextElem,
    End,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

/// Pull parser over the extended-JSON text form.
///
/// Validates structure (colons, commas, nesting) and hands out a flat stream
/// of tokens, with object keys as [`TokenType::FieldName`]. Exactly one
/// top-level value is accepted.
pub(crate) struct Parser<'a> {
    data: &'a str,
    lex: Peekable<Lexer<'a>>,
    stack: Vec<Container>,
    state: State,
    failed: bool,
}

impl<'a> Parser<'a> {
    pub fn new(data: &'a str) -> Self {
        Self {
            data,
            lex: Lexer::new(data).peekable(),
            stack: vec![],
            state: State::Value,
            failed: false,
        }
    }

    /// Next token, or an error at the end of input.
    pub fn exp_next(&mut self) -> Result<Token<'a>, JsonError> {
        match self.next_token() {
            Ok(Some(tok)) => Ok(tok),
            Ok(None) => Err(JsonError::Eof(self.data.len())),
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }

    /// Next token, which must be of kind `exp`.
    pub fn expect(&mut self, exp: TokenType) -> Result<Token<'a>, JsonError> {
        let tok = self.exp_next()?;
        if tok.kind != exp {
            return Err(JsonError::Expected(
                exp.as_ref().to_owned(),
                tok.span.first,
                tok.span.end,
            ));
        }
        Ok(tok)
    }

    /// Check that the top-level value is complete and nothing follows it.
    pub fn finish(&mut self) -> Result<(), JsonError> {
        if self.state != State::End {
            return Err(JsonError::Eof(self.data.len()));
        }
        match self.lex.next() {
            None => Ok(()),
            Some(tok) => Err(JsonError::Expected(
                "end of input".to_owned(),
                tok.span.first,
                tok.span.end,
            )),
        }
    }

    fn lex_next(&mut self) -> Result<LexerToken, JsonError> {
        self.lex.next().ok_or(JsonError::Eof(self.data.len()))
    }

    fn after_value(&mut self) {
        self.state = match self.stack.last() {
            Some(Container::Object) => State::NextKey,
            Some(Container::Array) => State::NextElem,
            None => State::End,
        };
    }

    fn close(&mut self, tok: LexerToken) -> Result<Token<'a>, JsonError> {
        self.stack.pop();
        self.after_value();
        json_to_token(self.data, tok)
    }

    fn field_name(&mut self, tok: LexerToken) -> Result<Token<'a>, JsonError> {
        if tok.kind != TokenType::String {
            return Err(JsonError::Expected(
                "field name".to_owned(),
                tok.span.first,
                tok.span.end,
            ));
        }
        let mut name = json_to_token(self.data, tok)?;
        name.kind = TokenType::FieldName;
        let colon = self.lex_next()?;
        if colon.kind != TokenType::Colon {
            return Err(JsonError::Expected(
                ":".to_owned(),
                colon.span.first,
                colon.span.end,
            ));
        }
        self.state = State::Value;
        Ok(name)
    }

    fn next_token(&mut self) -> Result<Option<Token<'a>>, JsonError> {
        if self.failed {
            return Ok(None);
        }
        loop {
            match self.state {
                State::End => return Ok(None),
                State::Value => {
                    let tok = self.lex_next()?;
                    match tok.kind {
                        TokenType::BeginObject => {
                            self.stack.push(Container::Object);
                            self.state = State::FirstKey;
                        }
                        TokenType::BeginArray => {
                            self.stack.push(Container::Array);
                            self.state = State::FirstElem;
                        }
                        TokenType::Number
                        | TokenType::BoolTrue
                        | TokenType::BoolFalse
                        | TokenType::String
                        | TokenType::Null => self.after_value(),
                        _ => return Err(JsonError::ExpectedValue(tok.span.first, tok.span.end)),
                    }
                    return json_to_token(self.data, tok).map(Some);
                }
                State::FirstKey => {
                    let tok = self.lex_next()?;
                    return match tok.kind {
                        TokenType::EndObject => self.close(tok).map(Some),
                        _ => self.field_name(tok).map(Some),
                    };
                }
                State::NextKey => {
                    let tok = self.lex_next()?;
                    return match tok.kind {
                        TokenType::EndObject => self.close(tok).map(Some),
                        TokenType::Comma => {
                            let tok = self.lex_next()?;
                            self.field_name(tok).map(Some)
                        }
                        _ => Err(JsonError::Expected(
                            ", (comma) or } (closing brace)".to_owned(),
                            tok.span.first,
                            tok.span.end,
                        )),
                    };
                }
                State::FirstElem => {
                    if matches!(self.lex.peek(), Some(t) if t.kind == TokenType::EndArray) {
                        let tok = self.lex_next()?;
                        return self.close(tok).map(Some);
                    }
                    self.state = State::Value;
                }
                State::NextElem => {
                    let tok = self.lex_next()?;
                    match tok.kind {
                        TokenType::EndArray => return self.close(tok).map(Some),
                        TokenType::Comma => self.state = State::Value,
                        _ => {
                            return Err(JsonError::Expected(
                                ", (comma) or ] (closing bracket)".to_owned(),
                                tok.span.first,
                                tok.span.end,
                            ))
                        }
                    }
                }
            }
        }
    }
}

impl<'a> Iterator for Parser<'a> {
    type Item = Result<Token<'a>, JsonError>;
    fn next(&mut self) -> Option<Self::Item> {
        match self.next_token() {
            Ok(tok) => tok.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

impl<'a> FusedIterator for Parser<'a> {}

fn json_to_token(data: &str, tok: LexerToken) -> Result<Token<'_>, JsonError> {
    let span = tok.span;
    let str_data = Cow::from(&data[span.first..span.end]);

    let str_data = match tok.kind {
        TokenType::String => {
            let st = &data[span.first + 1..span.end - 1];
            unescape(st).ok_or(JsonError::BareControl(span.first, span.end))?
        }
        TokenType::Number => {
            if str_data.parse::<i64>().is_err() && str_data.parse::<f64>().is_err() {
                return Err(JsonError::BadNumber(span.first, span.end));
            }
            str_data
        }
        _ => str_data,
    };

    Ok(Token {
        kind: tok.kind,
        dat: str_data,
        span,
    })
}
