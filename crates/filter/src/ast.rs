use crate::builtins::Builtin;
use regex::Regex;
use serde_json::Value;

/// Resolved filter tree. Every variable reference, label and function call
/// has been checked against its scope by the parser.
#[derive(Debug, Clone)]
pub(crate) enum Ast {
    Identity,
    /// `..`
    RecurseAll,
    Literal(Value),
    /// String with interpolations, optionally run through an `@format`
    Str {
        format: Option<String>,
        parts: Vec<StrSegment>,
    },
    /// `@name` applied to `.`
    Format(String),
    Var(String),
    /// `$ENV`
    EnvVars,
    Index {
        target: Box<Ast>,
        index: Box<Ast>,
    },
    Slice {
        target: Box<Ast>,
        from: Option<Box<Ast>>,
        to: Option<Box<Ast>>,
    },
    Iterate(Box<Ast>),
    Array(Option<Box<Ast>>),
    Object(Vec<(ObjectKey, Ast)>),
    Neg(Box<Ast>),
    Pipe(Box<Ast>, Box<Ast>),
    Comma(Box<Ast>, Box<Ast>),
    Binary {
        op: BinOp,
        lhs: Box<Ast>,
        rhs: Box<Ast>,
    },
    And(Box<Ast>, Box<Ast>),
    Or(Box<Ast>, Box<Ast>),
    Alternative(Box<Ast>, Box<Ast>),
    Assign {
        op: AssignOp,
        lhs: Box<Ast>,
        rhs: Box<Ast>,
    },
    If {
        branches: Vec<(Ast, Ast)>,
        otherwise: Option<Box<Ast>>,
    },
    Try {
        body: Box<Ast>,
        handler: Option<Box<Ast>>,
    },
    Reduce {
        source: Box<Ast>,
        pattern: Pattern,
        init: Box<Ast>,
        update: Box<Ast>,
    },
    Foreach {
        source: Box<Ast>,
        pattern: Pattern,
        init: Box<Ast>,
        update: Box<Ast>,
        extract: Option<Box<Ast>>,
    },
    Bind {
        source: Box<Ast>,
        pattern: Pattern,
        body: Box<Ast>,
    },
    /// `def name(params): body; rest`
    Def {
        def: Box<FuncDef>,
        rest: Box<Ast>,
    },
    Label {
        name: String,
        body: Box<Ast>,
    },
    Break(String),
    /// Call to a `def` or closure parameter in scope
    CallLocal {
        name: String,
        args: Vec<Ast>,
    },
    /// Call to a definition from the jq-source prelude
    CallPrelude {
        index: usize,
        args: Vec<Ast>,
    },
    Call(Call),
}

#[derive(Debug, Clone)]
pub(crate) enum StrSegment {
    Lit(String),
    Interp(Ast),
}

#[derive(Debug, Clone)]
pub(crate) enum ObjectKey {
    Name(String),
    Expr(Ast),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AssignOp {
    /// `=`
    Set,
    /// `|=`
    Update,
    /// `+=`, `-=`, `*=`, `/=`, `%=`
    Arith(BinOp),
    /// `//=`
    Alt,
}

#[derive(Debug, Clone)]
pub(crate) struct FuncDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Ast,
}

#[derive(Debug, Clone)]
pub(crate) struct Param {
    pub name: String,
    /// `$name` parameters are also bound as variables, once per argument output.
    pub is_var: bool,
}

/// Destructuring target of `as`, `reduce` and `foreach`.
#[derive(Debug, Clone)]
pub(crate) enum Pattern {
    Var(String),
    Array(Vec<Pattern>),
    Object(Vec<(PatternKey, Option<Pattern>)>),
}

#[derive(Debug, Clone)]
pub(crate) enum PatternKey {
    /// `$name`, which binds the field of the same name
    Var(String),
    Expr(Ast),
}

#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub builtin: Builtin,
    pub args: Vec<Ast>,
    /// Pattern compiled ahead of time when the first argument of a regex
    /// builtin is a string literal.
    pub regex: Option<Regex>,
}

impl Ast {
    pub(crate) fn boxed(self) -> Box<Ast> {
        Box::new(self)
    }

    pub(crate) fn field(target: Ast, name: impl Into<String>) -> Ast {
        Ast::Index {
            target: target.boxed(),
            index: Ast::Literal(Value::String(name.into())).boxed(),
        }
    }

    pub(crate) fn as_string_literal(&self) -> Option<&str> {
        match self {
            Ast::Literal(Value::String(text)) => Some(text),
            _ => None,
        }
    }
}

impl Pattern {
    /// Variables bound by this pattern, in binding order.
    pub(crate) fn variables(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_variables(&mut names);
        names
    }

    fn collect_variables(&self, names: &mut Vec<String>) {
        match self {
            Pattern::Var(name) => names.push(name.clone()),
            Pattern::Array(items) => items.iter().for_each(|p| p.collect_variables(names)),
            Pattern::Object(entries) => {
                for (key, sub) in entries {
                    if let PatternKey::Var(name) = key {
                        names.push(name.clone());
                    }
                    if let Some(sub) = sub {
                        sub.collect_variables(names);
                    }
                }
            }
        }
    }
}
