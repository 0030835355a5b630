use serde_json::Value;
use thiserror::Error;

/// Result type for filter compilation
pub type Result<T> = std::result::Result<T, FilterError>;

/// Errors detected while compiling a filter expression.
///
/// Nothing is evaluated when compilation fails.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// Malformed expression text
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    /// Call to a function that is not defined with that many arguments
    #[error("{name}/{arity} is not defined")]
    UnknownFunction { name: String, arity: usize },

    /// Reference to a `$name` with no enclosing binding
    #[error("${0} is not defined")]
    UndefinedVariable(String),

    /// `break $name` outside of a matching `label $name`
    #[error("$*label-{0} is not defined")]
    UndefinedLabel(String),

    /// `@name` that is not a known format
    #[error("{0} is not a valid format")]
    UnknownFormat(String),

    /// Literal pattern passed to a regex builtin does not compile
    #[error("invalid regex {pattern:?}: {message}")]
    InvalidRegex { pattern: String, message: String },
}

impl FilterError {
    pub(crate) fn syntax(offset: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            offset,
            message: message.into(),
        }
    }
}

/// A runtime failure raised while evaluating a filter against one input.
///
/// It terminates the output stream for that input only.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    /// Built-in failure such as indexing a number or adding a string to an array
    #[error("{0}")]
    Type(String),

    /// Raised by `error` / `error(msg)`
    #[error("{}", user_message(.0))]
    User(Value),

    /// The caller's interrupt check fired while the filter was running
    #[error("evaluation interrupted")]
    Interrupted,
}

impl EvalError {
    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }

    /// The value a `catch` handler receives.
    pub fn value(&self) -> Value {
        match self {
            Self::Type(message) => Value::String(message.clone()),
            Self::User(value) => value.clone(),
            Self::Interrupted => Value::String(self.to_string()),
        }
    }
}

fn user_message(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => format!("{other} (not a string)"),
    }
}
