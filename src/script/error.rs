/// Errors produced while compiling or running a reel script.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    /// The source could not be tokenized or parsed.
    #[error("syntax error at line {line}: {message}")]
    Syntax { line: usize, message: String },

    /// The source parsed but breaks a structural rule of the language.
    #[error("compile error at line {line}: {message}")]
    Compile { line: usize, message: String },

    #[error("line {line}: {message}")]
    Runtime { line: usize, message: String },

    /// The interrupt flag was tripped while the script was running.
    #[error("execution interrupted")]
    Interrupted,
}

impl ScriptError {
    pub(crate) fn syntax(line: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn compile(line: usize, message: impl Into<String>) -> Self {
        Self::Compile {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn runtime(line: usize, message: impl Into<String>) -> Self {
        Self::Runtime {
            line,
            message: message.into(),
        }
    }

    pub fn line(&self) -> Option<usize> {
        match self {
            Self::Syntax { line, .. } | Self::Compile { line, .. } | Self::Runtime { line, .. } => {
                Some(*line)
            }
            Self::Interrupted => None,
        }
    }
}
