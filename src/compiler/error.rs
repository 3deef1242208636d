use serde::Serialize;

/// A compilation error tagged with the flattened line number it occurred on.
#[derive(Debug, Clone)]
pub struct CompileError {
    pub message: String,
    pub line_number: u32,
    pub kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Lexical,
    Structural,
    Resolution,
    Type,
    Io,
}

impl CompileError {
    pub fn lexical(message: impl Into<String>, line_number: u32) -> Self {
        Self {
            message: message.into(),
            line_number,
            kind: ErrorKind::Lexical,
        }
    }

    pub fn structural(message: impl Into<String>, line_number: u32) -> Self {
        Self {
            message: message.into(),
            line_number,
            kind: ErrorKind::Structural,
        }
    }

    pub fn resolution(message: impl Into<String>, line_number: u32) -> Self {
        Self {
            message: message.into(),
            line_number,
            kind: ErrorKind::Resolution,
        }
    }

    pub fn type_error(message: impl Into<String>, line_number: u32) -> Self {
        Self {
            message: message.into(),
            line_number,
            kind: ErrorKind::Type,
        }
    }

    pub fn io(message: impl Into<String>, line_number: u32) -> Self {
        Self {
            message: message.into(),
            line_number,
            kind: ErrorKind::Io,
        }
    }

    /// Diagnostic for an error whose line number is already a line of `filename`.
    pub fn in_file(self, filename: &str) -> Diagnostic {
        Diagnostic::new(self.message, filename, self.line_number)
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CompileError {}

/// User-facing error record: message plus original file and 1-based line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub message: String,
    pub filename: String,
    pub line: u32,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>, filename: impl Into<String>, line: u32) -> Self {
        Self {
            message: message.into(),
            filename: filename.into(),
            line,
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.filename, self.line, self.message)
    }
}
