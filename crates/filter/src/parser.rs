use crate::ast::{
    AssignOp, Ast, BinOp, Call, FuncDef, ObjectKey, Param, Pattern, PatternKey, StrSegment,
};
use crate::builtins::Builtin;
use crate::strings::compile_regex;
use crate::error::{FilterError, Result};
use crate::lexer::{tokenize, Keyword, Spanned, StrPart, Token};
use crate::{format, prelude, value};
use regex::Regex;
use serde_json::{json, Value};

const COMMA_PREC: u8 = 1;
const ALT_PREC: u8 = 2;
const ASSIGN_PREC: u8 = 3;

#[derive(Debug, Clone, Copy)]
enum Infix {
    Comma,
    Alt,
    Assign(AssignOp),
    Or,
    And,
    Bin(BinOp),
}

/// A name visible at the current parse position.
#[derive(Debug, Clone)]
enum Binding {
    Var(String),
    Func(String, usize),
    Label(String),
}

pub(crate) fn parse(src: &str) -> Result<Ast> {
    let prelude = prelude::definitions()?
        .iter()
        .map(|def| (def.name.clone(), def.params.len()))
        .collect();
    let mut parser = Parser::new(src, prelude)?;
    parser.parse_all()
}

/// Parse a sequence of top-level `def`s. Each definition may call itself and
/// the ones before it.
pub(crate) fn parse_definitions(src: &str) -> Result<Vec<FuncDef>> {
    let mut parser = Parser::new(src, Vec::new())?;
    parser.in_prelude = true;
    let mut defs = Vec::new();
    while parser.eat_keyword(Keyword::Def) {
        defs.push(parser.definition()?);
    }
    match parser.tokens.get(parser.pos) {
        None => Ok(defs),
        Some((token, offset)) => Err(FilterError::syntax(
            *offset,
            format!("unexpected {}", describe_token(token)),
        )),
    }
}

struct Parser<'s> {
    src: &'s str,
    tokens: Vec<Spanned>,
    pos: usize,
    /// Bindings in effect at the current position, innermost last.
    scope: Vec<Binding>,
    /// Name and arity of each prelude definition, by index.
    prelude: Vec<(String, usize)>,
    in_prelude: bool,
    def_depth: usize,
}

impl<'s> Parser<'s> {
    fn new(src: &'s str, prelude: Vec<(String, usize)>) -> Result<Self> {
        Ok(Self {
            src,
            tokens: tokenize(src)?,
            pos: 0,
            scope: Vec::new(),
            prelude,
            in_prelude: false,
            def_depth: 0,
        })
    }

    fn parse_all(&mut self) -> Result<Ast> {
        let ast = self.pipe(true)?;
        match self.tokens.get(self.pos) {
            None => Ok(ast),
            Some((token, offset)) => Err(FilterError::syntax(
                *offset,
                format!("unexpected {}", describe_token(token)),
            )),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(_, o)| *o)
            .unwrap_or(self.src.len())
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        self.eat(&Token::Keyword(keyword))
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<()> {
        if self.eat(token) {
            return Ok(());
        }
        Err(self.unexpected(what))
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> Result<()> {
        self.expect(&Token::Keyword(keyword), &format!("'{}'", keyword.as_str()))
    }

    fn unexpected(&self, expected: &str) -> FilterError {
        let found = match self.peek() {
            Some(token) => describe_token(token),
            None => "end of expression".to_string(),
        };
        FilterError::syntax(self.offset(), format!("expected {expected}, found {found}"))
    }

    fn has_var(&self, name: &str) -> bool {
        self.scope
            .iter()
            .any(|b| matches!(b, Binding::Var(bound) if bound == name))
    }

    fn bind_pattern_vars(&mut self, pattern: &Pattern) {
        for name in pattern.variables() {
            self.scope.push(Binding::Var(name));
        }
    }

    fn pipe(&mut self, allow_comma: bool) -> Result<Ast> {
        if self.eat_keyword(Keyword::Def) {
            let mark = self.scope.len();
            let parsed = self
                .definition()
                .and_then(|def| Ok((def, self.pipe(allow_comma)?)));
            self.scope.truncate(mark);
            let (def, rest) = parsed?;
            return Ok(Ast::Def {
                def: Box::new(def),
                rest: rest.boxed(),
            });
        }
        if self.eat_keyword(Keyword::Label) {
            let name = self.variable_name()?;
            self.expect(&Token::Pipe, "'|' after label")?;
            self.scope.push(Binding::Label(name.clone()));
            let body = self.pipe(allow_comma);
            self.scope.pop();
            return Ok(Ast::Label {
                name,
                body: body?.boxed(),
            });
        }
        let first = self.operand()?;
        if self.peek() == Some(&Token::Keyword(Keyword::As)) {
            return self.binding(first, allow_comma);
        }
        let min_prec = if allow_comma { COMMA_PREC } else { ALT_PREC };
        let lhs = self.climb(first, min_prec, allow_comma)?;
        if self.eat(&Token::Pipe) {
            let rhs = self.pipe(allow_comma)?;
            return Ok(Ast::Pipe(lhs.boxed(), rhs.boxed()));
        }
        Ok(lhs)
    }

    /// `SOURCE as PATTERN | BODY`; the body runs to the end of the pipe.
    fn binding(&mut self, source: Ast, allow_comma: bool) -> Result<Ast> {
        self.expect_keyword(Keyword::As)?;
        let pattern = self.pattern()?;
        self.expect(&Token::Pipe, "'|' after variable binding")?;
        let mark = self.scope.len();
        self.bind_pattern_vars(&pattern);
        let body = self.pipe(allow_comma);
        self.scope.truncate(mark);
        Ok(Ast::Bind {
            source: source.boxed(),
            pattern,
            body: body?.boxed(),
        })
    }

    fn peek_infix(&self) -> Option<(Infix, u8, bool)> {
        Some(match self.peek()? {
            Token::Comma => (Infix::Comma, COMMA_PREC, false),
            Token::Alt => (Infix::Alt, ALT_PREC, true),
            Token::Assign => (Infix::Assign(AssignOp::Set), ASSIGN_PREC, false),
            Token::UpdatePipe => (Infix::Assign(AssignOp::Update), ASSIGN_PREC, false),
            Token::UpdateAlt => (Infix::Assign(AssignOp::Alt), ASSIGN_PREC, false),
            Token::UpdateArith(op) => {
                let op = match op {
                    '+' => BinOp::Add,
                    '-' => BinOp::Sub,
                    '*' => BinOp::Mul,
                    '/' => BinOp::Div,
                    _ => BinOp::Rem,
                };
                (Infix::Assign(AssignOp::Arith(op)), ASSIGN_PREC, false)
            }
            Token::Keyword(Keyword::Or) => (Infix::Or, 4, false),
            Token::Keyword(Keyword::And) => (Infix::And, 5, false),
            Token::Eq => (Infix::Bin(BinOp::Eq), 6, false),
            Token::Ne => (Infix::Bin(BinOp::Ne), 6, false),
            Token::Lt => (Infix::Bin(BinOp::Lt), 6, false),
            Token::Le => (Infix::Bin(BinOp::Le), 6, false),
            Token::Gt => (Infix::Bin(BinOp::Gt), 6, false),
            Token::Ge => (Infix::Bin(BinOp::Ge), 6, false),
            Token::Plus => (Infix::Bin(BinOp::Add), 7, false),
            Token::Minus => (Infix::Bin(BinOp::Sub), 7, false),
            Token::Star => (Infix::Bin(BinOp::Mul), 8, false),
            Token::Slash => (Infix::Bin(BinOp::Div), 8, false),
            Token::Percent => (Infix::Bin(BinOp::Rem), 8, false),
            _ => return None,
        })
    }

    fn climb(&mut self, mut lhs: Ast, min_prec: u8, allow_comma: bool) -> Result<Ast> {
        while let Some((op, prec, _)) = self.peek_infix() {
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let mut rhs = self.operand()?;
            if self.peek() == Some(&Token::Keyword(Keyword::As)) {
                // `1, . as $x | $x`: the binding swallows the rest of the pipe
                let bound = self.binding(rhs, allow_comma)?;
                return Ok(combine(op, lhs, bound));
            }
            while let Some((_, next, right_assoc)) = self.peek_infix() {
                if next > prec {
                    rhs = self.climb(rhs, prec + 1, allow_comma)?;
                } else if next == prec && right_assoc {
                    rhs = self.climb(rhs, prec, allow_comma)?;
                } else {
                    break;
                }
            }
            lhs = combine(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn operand(&mut self) -> Result<Ast> {
        if self.eat(&Token::Minus) {
            return Ok(match self.postfix()? {
                Ast::Literal(Value::Number(n)) => {
                    Ast::Literal(value::number(-n.as_f64().unwrap_or(0.0)))
                }
                other => Ast::Neg(other.boxed()),
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Ast> {
        let mut term = self.term()?;
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some(Token::Field(name)), _) => {
                    let name = name.clone();
                    self.pos += 1;
                    term = Ast::field(term, name);
                }
                (Some(Token::Dot), Some(Token::Str(_))) => {
                    self.pos += 1;
                    let key = self.string_literal()?;
                    term = Ast::Index {
                        target: term.boxed(),
                        index: key.boxed(),
                    };
                }
                (Some(Token::Dot), Some(Token::LBracket)) => {
                    self.pos += 1;
                    term = self.bracket_suffix(term)?;
                }
                (Some(Token::LBracket), _) => term = self.bracket_suffix(term)?,
                (Some(Token::Question), _) => {
                    self.pos += 1;
                    term = Ast::Try {
                        body: term.boxed(),
                        handler: None,
                    };
                }
                _ => return Ok(term),
            }
        }
    }

    fn bracket_suffix(&mut self, target: Ast) -> Result<Ast> {
        self.expect(&Token::LBracket, "'['")?;
        if self.eat(&Token::RBracket) {
            return Ok(Ast::Iterate(target.boxed()));
        }
        if self.eat(&Token::Colon) {
            let to = self.pipe(true)?;
            self.expect(&Token::RBracket, "']'")?;
            return Ok(Ast::Slice {
                target: target.boxed(),
                from: None,
                to: Some(to.boxed()),
            });
        }
        let index = self.pipe(true)?;
        if self.eat(&Token::Colon) {
            let to = if self.peek() == Some(&Token::RBracket) {
                None
            } else {
                Some(self.pipe(true)?.boxed())
            };
            self.expect(&Token::RBracket, "']'")?;
            return Ok(Ast::Slice {
                target: target.boxed(),
                from: Some(index.boxed()),
                to,
            });
        }
        self.expect(&Token::RBracket, "']'")?;
        Ok(Ast::Index {
            target: target.boxed(),
            index: index.boxed(),
        })
    }

    fn term(&mut self) -> Result<Ast> {
        let offset = self.offset();
        let Some(token) = self.next() else {
            return Err(FilterError::syntax(offset, "unexpected end of expression"));
        };
        match token {
            Token::Dot => {
                if let Some(Token::Str(_)) = self.peek() {
                    let key = self.string_literal()?;
                    return Ok(Ast::Index {
                        target: Ast::Identity.boxed(),
                        index: key.boxed(),
                    });
                }
                Ok(Ast::Identity)
            }
            Token::DotDot => Ok(Ast::RecurseAll),
            Token::Field(name) => Ok(Ast::field(Ast::Identity, name)),
            Token::Number(n) => Ok(Ast::Literal(value::number(n))),
            Token::Str(parts) => self.string(parts, None),
            Token::Format(name) => self.format(name),
            Token::Var(name) => self.variable(name, offset),
            Token::LParen => {
                let inner = self.pipe(true)?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::LBracket => {
                if self.eat(&Token::RBracket) {
                    return Ok(Ast::Array(None));
                }
                let body = self.pipe(true)?;
                self.expect(&Token::RBracket, "']'")?;
                Ok(Ast::Array(Some(body.boxed())))
            }
            Token::LBrace => self.object(),
            Token::Keyword(Keyword::If) => self.if_chain(),
            Token::Keyword(Keyword::Try) => {
                let body = self.postfix()?;
                let handler = if self.eat_keyword(Keyword::Catch) {
                    Some(self.postfix()?.boxed())
                } else {
                    None
                };
                Ok(Ast::Try {
                    body: body.boxed(),
                    handler,
                })
            }
            Token::Keyword(Keyword::Reduce) => self.reduce(),
            Token::Keyword(Keyword::Foreach) => self.foreach(),
            Token::Keyword(Keyword::Break) => {
                let name = self.variable_name()?;
                let bound = self
                    .scope
                    .iter()
                    .any(|b| matches!(b, Binding::Label(label) if *label == name));
                if bound {
                    Ok(Ast::Break(name))
                } else {
                    Err(FilterError::UndefinedLabel(name))
                }
            }
            Token::Keyword(Keyword::Import | Keyword::Include) => {
                Err(FilterError::syntax(offset, "modules are not supported"))
            }
            Token::Ident(name) => self.call(name),
            other => Err(FilterError::syntax(
                offset,
                format!("unexpected {}", describe_token(&other)),
            )),
        }
    }

    fn string_literal(&mut self) -> Result<Ast> {
        match self.next() {
            Some(Token::Str(parts)) => self.string(parts, None),
            _ => Err(self.unexpected("string")),
        }
    }

    fn string(&mut self, parts: Vec<StrPart>, format: Option<String>) -> Result<Ast> {
        let mut segments = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                StrPart::Lit(text) => segments.push(StrSegment::Lit(text)),
                StrPart::Interp(tokens) => {
                    let outer_tokens = std::mem::replace(&mut self.tokens, tokens);
                    let outer_pos = std::mem::replace(&mut self.pos, 0);
                    let parsed = self.parse_all();
                    self.tokens = outer_tokens;
                    self.pos = outer_pos;
                    segments.push(StrSegment::Interp(parsed?));
                }
            }
        }
        if format.is_none() {
            match segments.as_slice() {
                [] => return Ok(Ast::Literal(Value::String(String::new()))),
                [StrSegment::Lit(text)] => return Ok(Ast::Literal(Value::String(text.clone()))),
                _ => {}
            }
        }
        Ok(Ast::Str {
            format,
            parts: segments,
        })
    }

    /// `@name` alone or followed by a string whose interpolations it escapes.
    fn format(&mut self, name: String) -> Result<Ast> {
        if !format::is_known(&name) {
            return Err(FilterError::UnknownFormat(format!("@{name}")));
        }
        if let Some(Token::Str(_)) = self.peek() {
            let Some(Token::Str(parts)) = self.next() else {
                return Err(self.unexpected("string"));
            };
            return self.string(parts, Some(name));
        }
        Ok(Ast::Format(name))
    }

    fn variable(&self, name: String, offset: usize) -> Result<Ast> {
        if self.has_var(&name) {
            return Ok(Ast::Var(name));
        }
        match name.as_str() {
            "__loc__" => {
                let line = self
                    .src
                    .get(..offset)
                    .map_or(0, |before| before.matches('\n').count());
                Ok(Ast::Literal(json!({"file": "<stdin>", "line": line + 1})))
            }
            "ENV" => Ok(Ast::EnvVars),
            _ => Err(FilterError::UndefinedVariable(name)),
        }
    }

    fn variable_name(&mut self) -> Result<String> {
        match self.peek() {
            Some(Token::Var(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected("'$name'")),
        }
    }

    /// After `def`: `name(params): body;`
    fn definition(&mut self) -> Result<FuncDef> {
        let offset = self.offset();
        let name = match self.next() {
            Some(Token::Ident(name)) => name,
            _ => {
                return Err(FilterError::syntax(
                    offset,
                    "expected function name after 'def'",
                ))
            }
        };
        let mut params = Vec::new();
        if self.eat(&Token::LParen) {
            loop {
                let offset = self.offset();
                match self.next() {
                    Some(Token::Ident(param)) => params.push(Param {
                        name: param,
                        is_var: false,
                    }),
                    Some(Token::Var(param)) => params.push(Param {
                        name: param,
                        is_var: true,
                    }),
                    _ => return Err(FilterError::syntax(offset, "expected parameter name")),
                }
                if self.eat(&Token::Semicolon) {
                    continue;
                }
                self.expect(&Token::RParen, "';' or ')'")?;
                break;
            }
        }
        self.expect(&Token::Colon, "':' after function signature")?;

        if self.in_prelude && self.def_depth == 0 {
            self.prelude.push((name.clone(), params.len()));
        } else {
            self.scope.push(Binding::Func(name.clone(), params.len()));
        }
        let mark = self.scope.len();
        for param in &params {
            self.scope.push(Binding::Func(param.name.clone(), 0));
            if param.is_var {
                self.scope.push(Binding::Var(param.name.clone()));
            }
        }
        self.def_depth += 1;
        let body = self.pipe(true);
        self.def_depth -= 1;
        self.scope.truncate(mark);
        let body = body?;
        self.expect(&Token::Semicolon, "';' after function body")?;
        Ok(FuncDef { name, params, body })
    }

    fn call(&mut self, name: String) -> Result<Ast> {
        let mut args = Vec::new();
        if self.eat(&Token::LParen) {
            loop {
                args.push(self.pipe(true)?);
                if self.eat(&Token::Semicolon) {
                    continue;
                }
                self.expect(&Token::RParen, "';' or ')'")?;
                break;
            }
        }
        let arity = args.len();
        match (name.as_str(), arity) {
            ("true", 0) => return Ok(Ast::Literal(Value::Bool(true))),
            ("false", 0) => return Ok(Ast::Literal(Value::Bool(false))),
            ("null", 0) => return Ok(Ast::Literal(Value::Null)),
            _ => {}
        }
        let local = self
            .scope
            .iter()
            .any(|b| matches!(b, Binding::Func(bound, n) if *bound == name && *n == arity));
        if local {
            return Ok(Ast::CallLocal { name, args });
        }
        if let Some(index) = self
            .prelude
            .iter()
            .rposition(|(bound, n)| *bound == name && *n == arity)
        {
            return Ok(Ast::CallPrelude { index, args });
        }
        let builtin = Builtin::resolve(&name, arity)
            .ok_or_else(|| FilterError::UnknownFunction { name, arity })?;
        let regex = precompile(builtin, &args)?;
        Ok(Ast::Call(Call {
            builtin,
            args,
            regex,
        }))
    }

    fn object(&mut self) -> Result<Ast> {
        let mut entries = Vec::new();
        if self.eat(&Token::RBrace) {
            return Ok(Ast::Object(entries));
        }
        loop {
            let offset = self.offset();
            let entry = match self.next() {
                Some(Token::Ident(name)) => self.object_entry(name)?,
                Some(Token::Keyword(keyword)) => {
                    self.object_entry(keyword.as_str().to_string())?
                }
                Some(Token::Var(name)) => {
                    let value = self.variable(name.clone(), offset)?;
                    (ObjectKey::Name(name), value)
                }
                Some(Token::Str(parts)) => {
                    let key = self.string(parts, None)?;
                    let shorthand = Ast::Index {
                        target: Ast::Identity.boxed(),
                        index: key.clone().boxed(),
                    };
                    let value = self.object_value()?.unwrap_or(shorthand);
                    match key {
                        Ast::Literal(Value::String(name)) => (ObjectKey::Name(name), value),
                        other => (ObjectKey::Expr(other), value),
                    }
                }
                Some(Token::LParen) => {
                    let key = self.pipe(true)?;
                    self.expect(&Token::RParen, "')'")?;
                    match self.object_value()? {
                        Some(value) => (ObjectKey::Expr(key), value),
                        None => return Err(self.unexpected("':' after computed key")),
                    }
                }
                Some(other) => {
                    return Err(FilterError::syntax(
                        offset,
                        format!("expected object key, found {}", describe_token(&other)),
                    ))
                }
                None => return Err(FilterError::syntax(offset, "unterminated object")),
            };
            entries.push(entry);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RBrace, "',' or '}'")?;
            return Ok(Ast::Object(entries));
        }
    }

    fn object_entry(&mut self, name: String) -> Result<(ObjectKey, Ast)> {
        let value = match self.object_value()? {
            Some(value) => value,
            None => Ast::field(Ast::Identity, name.clone()),
        };
        Ok((ObjectKey::Name(name), value))
    }

    fn object_value(&mut self) -> Result<Option<Ast>> {
        if self.eat(&Token::Colon) {
            Ok(Some(self.pipe(false)?))
        } else {
            Ok(None)
        }
    }

    fn pattern(&mut self) -> Result<Pattern> {
        let offset = self.offset();
        match self.next() {
            Some(Token::Var(name)) => Ok(Pattern::Var(name)),
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                loop {
                    items.push(self.pattern()?);
                    if self.eat(&Token::Comma) {
                        continue;
                    }
                    self.expect(&Token::RBracket, "',' or ']'")?;
                    return Ok(Pattern::Array(items));
                }
            }
            Some(Token::LBrace) => {
                let mut entries = Vec::new();
                loop {
                    entries.push(self.pattern_entry()?);
                    if self.eat(&Token::Comma) {
                        continue;
                    }
                    self.expect(&Token::RBrace, "',' or '}'")?;
                    return Ok(Pattern::Object(entries));
                }
            }
            _ => Err(FilterError::syntax(
                offset,
                "expected '$name', '[' or '{' in binding pattern",
            )),
        }
    }

    fn pattern_entry(&mut self) -> Result<(PatternKey, Option<Pattern>)> {
        let offset = self.offset();
        let key = match self.next() {
            Some(Token::Var(name)) => {
                let sub = if self.eat(&Token::Colon) {
                    Some(self.pattern()?)
                } else {
                    None
                };
                return Ok((PatternKey::Var(name), sub));
            }
            Some(Token::Ident(name)) => Ast::Literal(Value::String(name)),
            Some(Token::Keyword(keyword)) => {
                Ast::Literal(Value::String(keyword.as_str().to_string()))
            }
            Some(Token::Str(parts)) => self.string(parts, None)?,
            Some(Token::LParen) => {
                let key = self.pipe(true)?;
                self.expect(&Token::RParen, "')'")?;
                key
            }
            _ => return Err(FilterError::syntax(offset, "expected object pattern key")),
        };
        self.expect(&Token::Colon, "':' in object pattern")?;
        Ok((PatternKey::Expr(key), Some(self.pattern()?)))
    }

    fn if_chain(&mut self) -> Result<Ast> {
        let mut branches = Vec::new();
        loop {
            let cond = self.pipe(true)?;
            self.expect_keyword(Keyword::Then)?;
            let body = self.pipe(true)?;
            branches.push((cond, body));
            if !self.eat_keyword(Keyword::Elif) {
                break;
            }
        }
        let otherwise = if self.eat_keyword(Keyword::Else) {
            Some(self.pipe(true)?.boxed())
        } else {
            None
        };
        self.expect_keyword(Keyword::End)?;
        Ok(Ast::If {
            branches,
            otherwise,
        })
    }

    /// Shared head of `reduce` / `foreach`: `SOURCE as PATTERN (INIT;`
    fn fold_head(&mut self) -> Result<(Ast, Pattern, Ast)> {
        let source = self.postfix()?;
        self.expect_keyword(Keyword::As)?;
        let pattern = self.pattern()?;
        self.expect(&Token::LParen, "'('")?;
        let init = self.pipe(true)?;
        self.expect(&Token::Semicolon, "';'")?;
        Ok((source, pattern, init))
    }

    fn reduce(&mut self) -> Result<Ast> {
        let (source, pattern, init) = self.fold_head()?;
        let mark = self.scope.len();
        self.bind_pattern_vars(&pattern);
        let update = self.pipe(true);
        self.scope.truncate(mark);
        let update = update?;
        self.expect(&Token::RParen, "')'")?;
        Ok(Ast::Reduce {
            source: source.boxed(),
            pattern,
            init: init.boxed(),
            update: update.boxed(),
        })
    }

    fn foreach(&mut self) -> Result<Ast> {
        let (source, pattern, init) = self.fold_head()?;
        let mark = self.scope.len();
        self.bind_pattern_vars(&pattern);
        let rest = self.foreach_tail();
        self.scope.truncate(mark);
        let (update, extract) = rest?;
        Ok(Ast::Foreach {
            source: source.boxed(),
            pattern,
            init: init.boxed(),
            update: update.boxed(),
            extract: extract.map(Ast::boxed),
        })
    }

    fn foreach_tail(&mut self) -> Result<(Ast, Option<Ast>)> {
        let update = self.pipe(true)?;
        let extract = if self.eat(&Token::Semicolon) {
            Some(self.pipe(true)?)
        } else {
            None
        };
        self.expect(&Token::RParen, "')'")?;
        Ok((update, extract))
    }
}

fn combine(op: Infix, lhs: Ast, rhs: Ast) -> Ast {
    match op {
        Infix::Comma => Ast::Comma(lhs.boxed(), rhs.boxed()),
        Infix::Alt => Ast::Alternative(lhs.boxed(), rhs.boxed()),
        Infix::Assign(op) => Ast::Assign {
            op,
            lhs: lhs.boxed(),
            rhs: rhs.boxed(),
        },
        Infix::Or => Ast::Or(lhs.boxed(), rhs.boxed()),
        Infix::And => Ast::And(lhs.boxed(), rhs.boxed()),
        Infix::Bin(op) => Ast::Binary {
            op,
            lhs: lhs.boxed(),
            rhs: rhs.boxed(),
        },
    }
}

fn precompile(builtin: Builtin, args: &[Ast]) -> Result<Option<Regex>> {
    let Some(flags_at) = builtin.regex_flags_arg() else {
        return Ok(None);
    };
    let Some(pattern) = args.first().and_then(Ast::as_string_literal) else {
        return Ok(None);
    };
    let flags = match flags_at {
        None => "",
        Some(i) => match args.get(i) {
            Some(Ast::Literal(Value::Null)) => "",
            Some(arg) => match arg.as_string_literal() {
                Some(flags) => flags,
                None => return Ok(None),
            },
            None => return Ok(None),
        },
    };
    compile_regex(pattern, flags)
        .map(|(re, _)| Some(re))
        .map_err(|message| FilterError::InvalidRegex {
            pattern: pattern.to_string(),
            message,
        })
}

fn describe_token(token: &Token) -> String {
    let symbol = match token {
        Token::Ident(name) => return format!("'{name}'"),
        Token::Field(name) => return format!("'.{name}'"),
        Token::Var(name) => return format!("'${name}'"),
        Token::Format(name) => return format!("'@{name}'"),
        Token::Keyword(keyword) => return format!("'{}'", keyword.as_str()),
        Token::Number(n) => return format!("number {n}"),
        Token::Str(_) => return "string literal".to_string(),
        Token::UpdateArith(op) => return format!("'{op}='"),
        Token::Dot => ".",
        Token::DotDot => "..",
        Token::LBracket => "[",
        Token::RBracket => "]",
        Token::LBrace => "{",
        Token::RBrace => "}",
        Token::LParen => "(",
        Token::RParen => ")",
        Token::Pipe => "|",
        Token::Comma => ",",
        Token::Colon => ":",
        Token::Semicolon => ";",
        Token::Question => "?",
        Token::Plus => "+",
        Token::Minus => "-",
        Token::Star => "*",
        Token::Slash => "/",
        Token::Percent => "%",
        Token::Eq => "==",
        Token::Ne => "!=",
        Token::Lt => "<",
        Token::Le => "<=",
        Token::Gt => ">",
        Token::Ge => ">=",
        Token::Alt => "//",
        Token::Assign => "=",
        Token::UpdatePipe => "|=",
        Token::UpdateAlt => "//=",
    };
    format!("'{symbol}'")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parses(src: &str) -> Ast {
        parse(src).unwrap_or_else(|err| panic!("{src:?} failed to parse: {err}"))
    }

    #[test]
    fn pipe_binds_looser_than_comma() {
        assert!(
            matches!(parses(".a, .b | length"), Ast::Pipe(lhs, _) if matches!(*lhs, Ast::Comma(..)))
        );
    }

    #[test]
    fn arithmetic_precedence() {
        let Ast::Binary { op, rhs, .. } = parses("1 + 2 * 3") else {
            panic!("expected binary");
        };
        assert_eq!(op, BinOp::Add);
        assert!(matches!(*rhs, Ast::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn alternative_is_right_associative() {
        let Ast::Alternative(_, rhs) = parses(".a // .b // .c") else {
            panic!("expected alternative");
        };
        assert!(matches!(*rhs, Ast::Alternative(..)));
    }

    #[test]
    fn assignment_binds_tighter_than_alternative() {
        let Ast::Alternative(lhs, _) = parses(".a |= . + 1 // 2") else {
            panic!("expected alternative");
        };
        let Ast::Assign { op, rhs, .. } = *lhs else {
            panic!("expected assignment");
        };
        assert_eq!(op, AssignOp::Update);
        assert!(matches!(*rhs, Ast::Binary { op: BinOp::Add, .. }));
        assert!(matches!(
            parses(".n -= 1"),
            Ast::Assign {
                op: AssignOp::Arith(BinOp::Sub),
                ..
            }
        ));
    }

    #[test]
    fn bindings_scope_their_variable() {
        assert!(matches!(parses(". as $x | $x"), Ast::Bind { .. }));
        assert!(matches!(parses("1, . as $x | $x"), Ast::Comma(..)));
        assert_eq!(
            parse("$x").unwrap_err(),
            FilterError::UndefinedVariable("x".into())
        );
        assert_eq!(
            parse("(. as $x | $x), $x").unwrap_err(),
            FilterError::UndefinedVariable("x".into())
        );
    }

    #[test]
    fn destructuring_binds_every_variable() {
        assert!(parse(". as [$a, {b: $c, $d}] | $a, $c, $d").is_ok());
        assert!(parse(r#". as {"k": [$x], (.name): $y} | $x + $y"#).is_ok());
        assert_eq!(
            parse(". as [$a] | $b").unwrap_err(),
            FilterError::UndefinedVariable("b".into())
        );
    }

    #[test]
    fn reduce_variable_is_not_visible_in_init() {
        assert!(parse("reduce .[] as $n (0; . + $n)").is_ok());
        assert!(parse("reduce .[] as [$k, $v] ({}; .[$k] = $v)").is_ok());
        assert_eq!(
            parse("reduce .[] as $n ($n; .)").unwrap_err(),
            FilterError::UndefinedVariable("n".into())
        );
    }

    #[test]
    fn definitions_scope_their_name_and_params() {
        assert!(matches!(parses("def f: 1; f"), Ast::Def { .. }));
        assert!(parse("def f(g; $x): g + $x + x; f(.; 1)").is_ok());
        assert!(parse("def fac: if . <= 1 then 1 else . * (. - 1 | fac) end; fac").is_ok());
        assert_eq!(
            parse("(def f: 1; f), f").unwrap_err(),
            FilterError::UnknownFunction {
                name: "f".into(),
                arity: 0
            }
        );
    }

    #[test]
    fn labels_must_be_in_scope() {
        assert!(matches!(
            parses("label $out | 1, break $out"),
            Ast::Label { .. }
        ));
        assert_eq!(
            parse("break $nowhere").unwrap_err(),
            FilterError::UndefinedLabel("nowhere".into())
        );
    }

    #[test]
    fn prelude_and_local_calls_resolve_first() {
        assert!(matches!(parses("del(.a)"), Ast::CallPrelude { .. }));
        assert!(matches!(
            parses("def length: 0; length"),
            Ast::Def { rest, .. } if matches!(*rest, Ast::CallLocal { .. })
        ));
        assert!(matches!(parses("length"), Ast::Call(_)));
    }

    #[test]
    fn unknown_function_reports_arity() {
        assert_eq!(
            parse("select(.a; .b)").unwrap_err(),
            FilterError::UnknownFunction {
                name: "select".into(),
                arity: 2
            }
        );
    }

    #[test]
    fn formats_are_validated() {
        assert!(matches!(parses("@csv"), Ast::Format(_)));
        assert!(matches!(
            parses(r#"@base64 "x\(.)""#),
            Ast::Str {
                format: Some(_),
                ..
            }
        ));
        assert_eq!(
            parse("@nope").unwrap_err(),
            FilterError::UnknownFormat("@nope".into())
        );
    }

    #[test]
    fn special_variables() {
        assert!(matches!(parses("$ENV"), Ast::EnvVars));
        assert!(matches!(parses(". as $ENV | $ENV"), Ast::Bind { .. }));
        let Ast::Literal(loc) = parses("\n\n$__loc__") else {
            panic!("expected a literal");
        };
        assert_eq!(loc, json!({"file": "<stdin>", "line": 3}));
    }

    #[test]
    fn literal_regex_is_compiled_up_front() {
        let Ast::Call(call) = parses(r#"test("^a+"; "i")"#) else {
            panic!("expected call");
        };
        assert!(call.regex.is_some());
        assert!(matches!(
            parse(r#"test("(")"#),
            Err(FilterError::InvalidRegex { .. })
        ));
        let Ast::Call(dynamic) = parses("test(.pattern)") else {
            panic!("expected call");
        };
        assert!(dynamic.regex.is_none());
    }

    #[test]
    fn syntax_errors_point_at_the_offending_token() {
        assert_eq!(
            parse(".a )").unwrap_err(),
            FilterError::syntax(3, "unexpected ')'")
        );
        assert!(matches!(
            parse("select(.a"),
            Err(FilterError::Syntax { offset: 9, .. })
        ));
        assert!(matches!(
            parse("if . then 1"),
            Err(FilterError::Syntax { .. })
        ));
        assert!(matches!(
            parse(r#"import "a" as a; ."#),
            Err(FilterError::Syntax { offset: 0, .. })
        ));
    }

    #[test]
    fn object_shorthands() {
        let Ast::Object(entries) = parses(r#"{a, "b", c: 1, if: 2}"#) else {
            panic!("expected object");
        };
        assert_eq!(entries.len(), 4);
        assert!(parse(r#"{(.k): .v, "x\(.y)": 2}"#).is_ok());
        assert!(parse(". as $x | {$x}").is_ok());
        assert!(parse("{(.k)}").is_err());
    }

    #[test]
    fn negative_literals_fold() {
        assert!(matches!(parses("-1"), Ast::Literal(Value::Number(_))));
        assert!(matches!(parses("-.a"), Ast::Neg(_)));
    }
}
