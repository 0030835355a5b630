use crate::error::{FilterError, Result};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Dot,
    DotDot,
    /// `.name` written without whitespace between the dot and the name
    Field(String),
    Ident(String),
    Keyword(Keyword),
    Var(String),
    Number(f64),
    Str(Vec<StrPart>),
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Pipe,
    Comma,
    Colon,
    Semicolon,
    Question,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Alt,
    /// `=`
    Assign,
    /// `|=`
    UpdatePipe,
    /// `+=`, `-=`, `*=`, `/=`, `%=`
    UpdateArith(char),
    /// `//=`
    UpdateAlt,
    /// `@name`
    Format(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Keyword {
    If,
    Then,
    Elif,
    Else,
    End,
    And,
    Or,
    As,
    Reduce,
    Foreach,
    Try,
    Catch,
    Def,
    Label,
    Break,
    Import,
    Include,
}

impl Keyword {
    fn from_ident(ident: &str) -> Option<Self> {
        Some(match ident {
            "if" => Self::If,
            "then" => Self::Then,
            "elif" => Self::Elif,
            "else" => Self::Else,
            "end" => Self::End,
            "and" => Self::And,
            "or" => Self::Or,
            "as" => Self::As,
            "reduce" => Self::Reduce,
            "foreach" => Self::Foreach,
            "try" => Self::Try,
            "catch" => Self::Catch,
            "def" => Self::Def,
            "label" => Self::Label,
            "break" => Self::Break,
            "import" => Self::Import,
            "include" => Self::Include,
            _ => return None,
        })
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::If => "if",
            Self::Then => "then",
            Self::Elif => "elif",
            Self::Else => "else",
            Self::End => "end",
            Self::And => "and",
            Self::Or => "or",
            Self::As => "as",
            Self::Reduce => "reduce",
            Self::Foreach => "foreach",
            Self::Try => "try",
            Self::Catch => "catch",
            Self::Def => "def",
            Self::Label => "label",
            Self::Break => "break",
            Self::Import => "import",
            Self::Include => "include",
        }
    }
}

/// Piece of a string literal. Interpolations keep their own token stream.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StrPart {
    Lit(String),
    Interp(Vec<Spanned>),
}

/// Token plus the byte offset where it starts.
pub(crate) type Spanned = (Token, usize);

pub(crate) fn tokenize(src: &str) -> Result<Vec<Spanned>> {
    let mut lexer = Lexer { src, pos: 0 };
    lexer.run(false)
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_at(&self, skip: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(skip)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn ident(&mut self) -> &'a str {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if is_ident_char(c)) {
            self.pos += 1;
        }
        &self.src[start..self.pos]
    }

    /// Lex until end of input, or until the `)` closing a string interpolation.
    fn run(&mut self, in_interp: bool) -> Result<Vec<Spanned>> {
        let mut tokens = Vec::new();
        let mut depth = 0usize;
        loop {
            while matches!(self.peek(), Some(c) if c.is_whitespace()) {
                self.bump();
            }
            if self.peek() == Some('#') {
                while !matches!(self.peek(), None | Some('\n')) {
                    self.bump();
                }
                continue;
            }
            let start = self.pos;
            let Some(c) = self.bump() else {
                if in_interp {
                    return Err(FilterError::syntax(start, "unterminated string interpolation"));
                }
                return Ok(tokens);
            };
            let token = match c {
                '.' => match self.peek() {
                    Some('.') => {
                        self.bump();
                        Token::DotDot
                    }
                    Some(n) if is_ident_start(n) => Token::Field(self.ident().to_string()),
                    Some(n) if n.is_ascii_digit() => {
                        self.pos = start;
                        self.number(start)?
                    }
                    _ => Token::Dot,
                },
                '$' => match self.peek() {
                    Some(n) if is_ident_start(n) => Token::Var(self.ident().to_string()),
                    _ => return Err(FilterError::syntax(start, "expected variable name after '$'")),
                },
                '"' => Token::Str(self.string(start)?),
                '[' => Token::LBracket,
                ']' => Token::RBracket,
                '{' => Token::LBrace,
                '}' => Token::RBrace,
                '(' => {
                    depth += 1;
                    Token::LParen
                }
                ')' => {
                    if in_interp && depth == 0 {
                        return Ok(tokens);
                    }
                    depth = depth.saturating_sub(1);
                    Token::RParen
                }
                '|' => self.with_assign(Token::Pipe, Token::UpdatePipe),
                ',' => Token::Comma,
                ':' => Token::Colon,
                ';' => Token::Semicolon,
                '?' => Token::Question,
                '+' => self.with_assign(Token::Plus, Token::UpdateArith('+')),
                '-' => self.with_assign(Token::Minus, Token::UpdateArith('-')),
                '*' => self.with_assign(Token::Star, Token::UpdateArith('*')),
                '%' => self.with_assign(Token::Percent, Token::UpdateArith('%')),
                '/' => {
                    if self.peek() == Some('/') {
                        self.bump();
                        self.with_assign(Token::Alt, Token::UpdateAlt)
                    } else {
                        self.with_assign(Token::Slash, Token::UpdateArith('/'))
                    }
                }
                '=' => self.with_assign(Token::Assign, Token::Eq),
                '!' => {
                    if self.peek() == Some('=') {
                        self.bump();
                        Token::Ne
                    } else {
                        return Err(FilterError::syntax(start, "unexpected '!'"));
                    }
                }
                '<' => {
                    if self.peek() == Some('=') {
                        self.bump();
                        Token::Le
                    } else {
                        Token::Lt
                    }
                }
                '>' => {
                    if self.peek() == Some('=') {
                        self.bump();
                        Token::Ge
                    } else {
                        Token::Gt
                    }
                }
                '@' => match self.peek() {
                    Some(n) if is_ident_start(n) => Token::Format(self.ident().to_string()),
                    _ => return Err(FilterError::syntax(start, "expected format name after '@'")),
                },
                c if c.is_ascii_digit() => self.number(start)?,
                c if is_ident_start(c) => {
                    self.pos = start;
                    let word = self.ident();
                    match Keyword::from_ident(word) {
                        Some(keyword) => Token::Keyword(keyword),
                        None => Token::Ident(word.to_string()),
                    }
                }
                other => return Err(FilterError::syntax(start, format!("unexpected character {other:?}"))),
            };
            tokens.push((token, start));
        }
    }

    /// `plain`, or `assign` when the next character is `=`.
    fn with_assign(&mut self, plain: Token, assign: Token) -> Token {
        if self.peek() == Some('=') {
            self.bump();
            assign
        } else {
            plain
        }
    }

    fn number(&mut self, start: usize) -> Result<Token> {
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek() == Some('.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            self.bump();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let mark = self.pos;
            self.bump();
            if matches!(self.peek(), Some('+' | '-')) {
                self.bump();
            }
            if matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.bump();
                }
            } else {
                self.pos = mark;
            }
        }
        let text = &self.src[start..self.pos];
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| FilterError::syntax(start, format!("invalid number literal {text:?}")))
    }

    /// Called after the opening quote.
    fn string(&mut self, start: usize) -> Result<Vec<StrPart>> {
        let mut parts = Vec::new();
        let mut buf = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(FilterError::syntax(start, "unterminated string literal"));
            };
            match c {
                '"' => break,
                '\\' => {
                    let escape_at = self.pos - 1;
                    let Some(e) = self.bump() else {
                        return Err(FilterError::syntax(start, "unterminated string literal"));
                    };
                    match e {
                        '"' => buf.push('"'),
                        '\\' => buf.push('\\'),
                        '/' => buf.push('/'),
                        'b' => buf.push('\u{8}'),
                        'f' => buf.push('\u{c}'),
                        'n' => buf.push('\n'),
                        'r' => buf.push('\r'),
                        't' => buf.push('\t'),
                        'u' => buf.push(self.unicode_escape(escape_at)?),
                        '(' => {
                            if !buf.is_empty() {
                                parts.push(StrPart::Lit(std::mem::take(&mut buf)));
                            }
                            let inner = self.run(true)?;
                            parts.push(StrPart::Interp(inner));
                        }
                        other => {
                            return Err(FilterError::syntax(
                                escape_at,
                                format!("invalid escape '\\{other}'"),
                            ))
                        }
                    }
                }
                other => buf.push(other),
            }
        }
        if !buf.is_empty() || parts.is_empty() {
            parts.push(StrPart::Lit(buf));
        }
        Ok(parts)
    }

    fn hex4(&mut self, escape_at: usize) -> Result<u32> {
        let digits = self.src.get(self.pos..self.pos + 4).unwrap_or("");
        let code = u32::from_str_radix(digits, 16)
            .ok()
            .filter(|_| digits.len() == 4)
            .ok_or_else(|| FilterError::syntax(escape_at, "invalid \\u escape"))?;
        self.pos += 4;
        Ok(code)
    }

    fn unicode_escape(&mut self, escape_at: usize) -> Result<char> {
        let high = self.hex4(escape_at)?;
        if (0xD800..0xDC00).contains(&high) && self.src[self.pos..].starts_with("\\u") {
            self.pos += 2;
            let low = self.hex4(escape_at)?;
            if (0xDC00..0xE000).contains(&low) {
                let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                return char::from_u32(code)
                    .ok_or_else(|| FilterError::syntax(escape_at, "invalid surrogate pair"));
            }
            return Err(FilterError::syntax(escape_at, "invalid surrogate pair"));
        }
        Ok(char::from_u32(high).unwrap_or('\u{FFFD}'))
    }
}
