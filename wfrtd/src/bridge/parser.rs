//! Lexer and parser for query documents.
//!
//! The accepted language is the operation subset of GraphQL: one `query`
//! or `mutation` (or an anonymous `{ ... }`), variable definitions with
//! defaults, aliases, arguments and nested selections. Fragments and
//! directives are rejected.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Enum(String),
    List(Vec<Literal>),
    Object(Vec<(String, Literal)>),
    Variable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableDef {
    pub name: String,
    pub type_name: String,
    pub default: Option<Literal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub alias: Option<String>,
    pub name: String,
    pub arguments: Vec<(String, Literal)>,
    pub selections: Vec<Field>,
}

impl Field {
    /// Key the field's value is stored under in the result.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub kind: OperationKind,
    pub name: Option<String>,
    pub variables: Vec<VariableDef>,
    pub selections: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Syntax Error ({line}:{column}) {message}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Punct(char),
    Spread,
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Punct(c) => write!(f, "\"{c}\""),
            Token::Spread => f.write_str("\"...\""),
            Token::Name(name) => write!(f, "Name \"{name}\""),
            Token::Int(value) => write!(f, "Int \"{value}\""),
            Token::Float(value) => write!(f, "Float \"{value}\""),
            Token::Str(value) => write!(f, "String \"{value}\""),
            Token::Eof => f.write_str("<EOF>"),
        }
    }
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    line: usize,
    column: usize,
}

struct Lexer<'s> {
    chars: std::iter::Peekable<std::str::Chars<'s>>,
    line: usize,
    column: usize,
}

impl<'s> Lexer<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, line: usize, column: usize, message: impl Into<String>) -> ParseError {
        ParseError {
            line,
            column,
            message: message.into(),
        }
    }

    fn tokenize(mut self) -> Result<Vec<Spanned>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_ignored();
            let (line, column) = (self.line, self.column);
            let Some(&c) = self.chars.peek() else {
                tokens.push(Spanned {
                    token: Token::Eof,
                    line,
                    column,
                });
                return Ok(tokens);
            };
            let token = match c {
                '{' | '}' | '(' | ')' | '[' | ']' | ':' | '!' | '$' | '=' | '@' | '|' => {
                    self.bump();
                    Token::Punct(c)
                }
                '.' => {
                    for _ in 0..3 {
                        if self.bump() != Some('.') {
                            return Err(self.error(line, column, "Unexpected \".\""));
                        }
                    }
                    Token::Spread
                }
                '"' => Token::Str(self.string(line, column)?),
                '-' | '0'..='9' => self.number(line, column)?,
                c if c == '_' || c.is_ascii_alphabetic() => {
                    let mut name = String::new();
                    while let Some(&c) = self.chars.peek() {
                        if c == '_' || c.is_ascii_alphanumeric() {
                            name.push(c);
                            self.bump();
                        } else {
                            break;
                        }
                    }
                    Token::Name(name)
                }
                other => {
                    return Err(self.error(line, column, format!("Unexpected character \"{other}\"")))
                }
            };
            tokens.push(Spanned {
                token,
                line,
                column,
            });
        }
    }

    fn skip_ignored(&mut self) {
        while let Some(&c) = self.chars.peek() {
            match c {
                ' ' | '\t' | '\n' | '\r' | ',' | '\u{feff}' => {
                    self.bump();
                }
                '#' => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn string(&mut self, line: usize, column: usize) -> Result<String, ParseError> {
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => return Err(self.error(line, column, "Unterminated string")),
                Some('"') => return Ok(value),
                Some('\\') => {
                    let escaped = match self.bump() {
                        Some('"') => '"',
                        Some('\\') => '\\',
                        Some('/') => '/',
                        Some('b') => '\u{8}',
                        Some('f') => '\u{c}',
                        Some('n') => '\n',
                        Some('r') => '\r',
                        Some('t') => '\t',
                        Some('u') => {
                            let hex: String = (0..4).filter_map(|_| self.bump()).collect();
                            u32::from_str_radix(&hex, 16)
                                .ok()
                                .and_then(char::from_u32)
                                .ok_or_else(|| {
                                    self.error(line, column, format!("Invalid unicode escape \"\\u{hex}\""))
                                })?
                        }
                        other => {
                            let shown = other.map(String::from).unwrap_or_default();
                            return Err(self.error(
                                line,
                                column,
                                format!("Invalid escape sequence \"\\{shown}\""),
                            ));
                        }
                    };
                    value.push(escaped);
                }
                Some(c) => value.push(c),
            }
        }
    }

    fn number(&mut self, line: usize, column: usize) -> Result<Token, ParseError> {
        let mut raw = String::new();
        let mut is_float = false;
        if self.chars.peek() == Some(&'-') {
            raw.push('-');
            self.bump();
        }
        while let Some(&c) = self.chars.peek() {
            match c {
                '0'..='9' => raw.push(c),
                '.' | 'e' | 'E' => {
                    is_float = true;
                    raw.push(c);
                }
                '+' | '-' if raw.ends_with(['e', 'E']) => raw.push(c),
                _ => break,
            }
            self.bump();
        }
        let invalid = || format!("Invalid number \"{raw}\"");
        if is_float {
            raw.parse::<f64>()
                .map(Token::Float)
                .map_err(|_| self.error(line, column, invalid()))
        } else {
            raw.parse::<i64>()
                .map(Token::Int)
                .map_err(|_| self.error(line, column, invalid()))
        }
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Spanned {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn next(&mut self) -> Spanned {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn error_at(&self, spanned: &Spanned, message: impl Into<String>) -> ParseError {
        ParseError {
            line: spanned.line,
            column: spanned.column,
            message: message.into(),
        }
    }

    fn unexpected(&self, spanned: &Spanned) -> ParseError {
        match &spanned.token {
            Token::Spread => self.error_at(spanned, "Fragments are not supported"),
            Token::Punct('@') => self.error_at(spanned, "Directives are not supported"),
            token => self.error_at(spanned, format!("Unexpected {token}")),
        }
    }

    fn at_punct(&self, c: char) -> bool {
        self.peek().token == Token::Punct(c)
    }

    fn expect_punct(&mut self, c: char) -> Result<(), ParseError> {
        let spanned = self.next();
        if spanned.token == Token::Punct(c) {
            Ok(())
        } else if matches!(spanned.token, Token::Spread | Token::Punct('@')) {
            Err(self.unexpected(&spanned))
        } else {
            Err(self.error_at(&spanned, format!("Expected \"{c}\", found {}", spanned.token)))
        }
    }

    fn expect_name(&mut self) -> Result<String, ParseError> {
        let spanned = self.next();
        match &spanned.token {
            Token::Name(name) => Ok(name.clone()),
            Token::Spread | Token::Punct('@') => Err(self.unexpected(&spanned)),
            token => Err(self.error_at(&spanned, format!("Expected Name, found {token}"))),
        }
    }

    fn document(&mut self) -> Result<Document, ParseError> {
        let start = self.peek().clone();
        let mut document = Document {
            kind: OperationKind::Query,
            name: None,
            variables: Vec::new(),
            selections: Vec::new(),
        };
        match &start.token {
            Token::Punct('{') => {}
            Token::Name(keyword) => {
                document.kind = match keyword.as_str() {
                    "query" => OperationKind::Query,
                    "mutation" => OperationKind::Mutation,
                    "fragment" => return Err(self.error_at(&start, "Fragments are not supported")),
                    "subscription" => {
                        return Err(self.error_at(&start, "Subscriptions are not supported"))
                    }
                    _ => return Err(self.unexpected(&start)),
                };
                self.next();
                if let Token::Name(name) = &self.peek().token {
                    document.name = Some(name.clone());
                    self.next();
                }
                if self.at_punct('(') {
                    document.variables = self.variable_definitions()?;
                }
            }
            _ => return Err(self.unexpected(&start)),
        }
        document.selections = self.selection_set()?;
        let trailing = self.next();
        if trailing.token != Token::Eof {
            return Err(self.error_at(&trailing, "Only one operation per document is supported"));
        }
        Ok(document)
    }

    fn variable_definitions(&mut self) -> Result<Vec<VariableDef>, ParseError> {
        self.expect_punct('(')?;
        let mut definitions = Vec::new();
        while !self.at_punct(')') {
            self.expect_punct('$')?;
            let name = self.expect_name()?;
            self.expect_punct(':')?;
            let type_name = self.type_ref()?;
            let default = if self.at_punct('=') {
                self.next();
                Some(self.value(true)?)
            } else {
                None
            };
            definitions.push(VariableDef {
                name,
                type_name,
                default,
            });
        }
        self.expect_punct(')')?;
        Ok(definitions)
    }

    fn type_ref(&mut self) -> Result<String, ParseError> {
        let mut rendered = if self.at_punct('[') {
            self.next();
            let inner = self.type_ref()?;
            self.expect_punct(']')?;
            format!("[{inner}]")
        } else {
            self.expect_name()?
        };
        if self.at_punct('!') {
            self.next();
            rendered.push('!');
        }
        Ok(rendered)
    }

    fn selection_set(&mut self) -> Result<Vec<Field>, ParseError> {
        self.expect_punct('{')?;
        let mut fields = Vec::new();
        while !self.at_punct('}') {
            fields.push(self.field()?);
        }
        let close = self.next();
        if fields.is_empty() {
            return Err(self.error_at(&close, "Selection set must not be empty"));
        }
        Ok(fields)
    }

    fn field(&mut self) -> Result<Field, ParseError> {
        let first = self.expect_name()?;
        let (alias, name) = if self.at_punct(':') {
            self.next();
            (Some(first), self.expect_name()?)
        } else {
            (None, first)
        };
        let mut arguments = Vec::new();
        if self.at_punct('(') {
            self.next();
            while !self.at_punct(')') {
                let key = self.expect_name()?;
                self.expect_punct(':')?;
                arguments.push((key, self.value(false)?));
            }
            self.next();
        }
        if self.at_punct('@') {
            let spanned = self.peek().clone();
            return Err(self.unexpected(&spanned));
        }
        let selections = if self.at_punct('{') {
            self.selection_set()?
        } else {
            Vec::new()
        };
        Ok(Field {
            alias,
            name,
            arguments,
            selections,
        })
    }

    fn value(&mut self, constant: bool) -> Result<Literal, ParseError> {
        let spanned = self.next();
        match &spanned.token {
            Token::Punct('$') if !constant => Ok(Literal::Variable(self.expect_name()?)),
            Token::Int(value) => Ok(Literal::Int(*value)),
            Token::Float(value) => Ok(Literal::Float(*value)),
            Token::Str(value) => Ok(Literal::String(value.clone())),
            Token::Name(name) => Ok(match name.as_str() {
                "true" => Literal::Bool(true),
                "false" => Literal::Bool(false),
                "null" => Literal::Null,
                _ => Literal::Enum(name.clone()),
            }),
            Token::Punct('[') => {
                let mut items = Vec::new();
                while !self.at_punct(']') {
                    if self.peek().token == Token::Eof {
                        return Err(self.unexpected(&self.peek().clone()));
                    }
                    items.push(self.value(constant)?);
                }
                self.next();
                Ok(Literal::List(items))
            }
            Token::Punct('{') => {
                let mut entries = Vec::new();
                while !self.at_punct('}') {
                    let key = self.expect_name()?;
                    self.expect_punct(':')?;
                    entries.push((key, self.value(constant)?));
                }
                self.next();
                Ok(Literal::Object(entries))
            }
            _ => Err(self.unexpected(&spanned)),
        }
    }
}

pub fn parse(source: &str) -> Result<Document, ParseError> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser { tokens, pos: 0 }.document()
}
