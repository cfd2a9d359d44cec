//! Error types for all phases: scanning, compiling, loading and running.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Lexer errors. Each carries the line it was found on.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LexerError {
    #[error("Unexpected character '{0}'.")]
    UnexpectedChar(char, usize),

    #[error("Unterminated string.")]
    UnterminatedString(usize),

    #[error("Unterminated comment.")]
    UnterminatedComment(usize),

    #[error("Invalid escape sequence '\\{0}'.")]
    InvalidEscape(char, usize),
}

impl LexerError {
    pub fn unexpected_char(c: char, line: usize) -> Self {
        Self::UnexpectedChar(c, line)
    }

    pub fn unterminated_string(line: usize) -> Self {
        Self::UnterminatedString(line)
    }

    pub fn unterminated_comment(line: usize) -> Self {
        Self::UnterminatedComment(line)
    }

    pub fn invalid_escape(c: char, line: usize) -> Self {
        Self::InvalidEscape(c, line)
    }

    pub fn line(&self) -> usize {
        match self {
            Self::UnexpectedChar(_, line) => *line,
            Self::UnterminatedString(line) => *line,
            Self::UnterminatedComment(line) => *line,
            Self::InvalidEscape(_, line) => *line,
        }
    }
}

/// A single compile error.
///
/// `location` is already formatted: `" at 'name'"`, `" at end"`, or empty when
/// the error came from the scanner.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("[line {line}] Error{location}: {message}")]
pub struct CompileError {
    pub line: usize,
    pub location: String,
    pub message: String,
}

impl CompileError {
    pub fn new(line: usize, location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            line,
            location: location.into(),
            message: message.into(),
        }
    }
}

/// Every error reported while compiling one source unit.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}", render_lines(.0))]
pub struct CompileErrors(pub Vec<CompileError>);

impl CompileErrors {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CompileError> {
        self.0.iter()
    }

    /// True when any error message contains `needle`.
    pub fn mentions(&self, needle: &str) -> bool {
        self.0.iter().any(|e| e.message.contains(needle))
    }
}

fn render_lines(errors: &[CompileError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Failure to produce an object compilation for a path.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Can't read object '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Object '{path}' failed to compile:\n{errors}")]
    Compile { path: String, errors: CompileErrors },
}

/// Runtime errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("{0}")]
    TypeError(String),

    #[error("Undefined variable '{0}'.")]
    UndefinedVariable(String),

    #[error("Undefined property '{property}' on object '{object}'.")]
    UndefinedProperty { object: String, property: String },

    #[error("Only objects have properties; can't access '{property}' on {type_name}.")]
    NotAnObject {
        property: String,
        type_name: &'static str,
    },

    #[error("Can't call a value of type {0}.")]
    NotCallable(&'static str),

    #[error("Expected {expected} arguments but got {got}.")]
    WrongArity { expected: usize, got: usize },

    #[error("Expected at most {max} arguments but got {got}.")]
    TooManyArguments { max: usize, got: usize },

    #[error("Stack overflow.")]
    StackOverflow,

    #[error("Object '{object}' already inherits from '{parent}'.")]
    AlreadyInherits { object: String, parent: String },

    #[error("Can only inherit from an object, not {0}.")]
    InheritNonObject(&'static str),

    #[error("Object '{0}' has no parent.")]
    NoParent(String),

    #[error("{name}: {message}")]
    Native { name: String, message: String },

    #[error("{0}")]
    Load(#[from] LoadError),

    #[error("Unknown opcode {0}.")]
    InvalidOpcode(u8),

    #[error("{0}")]
    General(String),
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::General(message.into())
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::TypeError(message.into())
    }

    pub fn undefined_variable(name: impl Into<String>) -> Self {
        Self::UndefinedVariable(name.into())
    }

    pub fn undefined_property(object: impl Into<String>, property: impl Into<String>) -> Self {
        Self::UndefinedProperty {
            object: object.into(),
            property: property.into(),
        }
    }

    pub fn not_an_object(property: impl Into<String>, type_name: &'static str) -> Self {
        Self::NotAnObject {
            property: property.into(),
            type_name,
        }
    }

    pub fn wrong_arity(expected: usize, got: usize) -> Self {
        Self::WrongArity { expected, got }
    }

    pub fn native(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Native {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// One line of a runtime backtrace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub line: usize,
    pub name: String,
}

/// The active call frames at the moment a runtime error was raised, innermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallTrace {
    pub frames: Vec<TraceFrame>,
}

impl fmt::Display for CallTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, frame) in self.frames.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "[line {}] in {}", frame.line, frame.name)?;
        }
        Ok(())
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Can't read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value '{value}' for {name}")]
    InvalidEnv { name: String, value: String },
}

/// A unified error type for all phases.
#[derive(Debug, Error)]
pub enum LpcError {
    #[error("{0}")]
    Compile(#[from] CompileErrors),

    #[error("{error}\n{trace}")]
    Runtime { error: RuntimeError, trace: CallTrace },

    #[error("{0}")]
    Load(#[from] LoadError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LpcError {
    /// The runtime error, when this is one.
    pub fn as_runtime(&self) -> Option<&RuntimeError> {
        match self {
            Self::Runtime { error, .. } => Some(error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_error_format() {
        let err = CompileError::new(3, " at 'x'", "Invalid assignment target.");
        assert_eq!(err.to_string(), "[line 3] Error at 'x': Invalid assignment target.");
    }

    #[test]
    fn test_compile_errors_join_lines() {
        let errors = CompileErrors(vec![
            CompileError::new(1, " at end", "Expect ';' after expression."),
            CompileError::new(2, "", "Unterminated string."),
        ]);
        assert_eq!(
            errors.to_string(),
            "[line 1] Error at end: Expect ';' after expression.\n[line 2] Error: Unterminated string."
        );
        assert!(errors.mentions("Unterminated"));
    }

    #[test]
    fn test_runtime_error_with_call_trace() {
        let err = LpcError::Runtime {
            error: RuntimeError::wrong_arity(2, 3),
            trace: CallTrace {
                frames: vec![
                    TraceFrame {
                        line: 4,
                        name: "add()".to_string(),
                    },
                    TraceFrame {
                        line: 9,
                        name: "script main".to_string(),
                    },
                ],
            },
        };
        assert_eq!(
            err.to_string(),
            "Expected 2 arguments but got 3.\n[line 4] in add()\n[line 9] in script main"
        );
    }
}
