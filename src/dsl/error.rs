use super::ast::Span;

/// A compilation error with source location.
///
/// Compilation is fail-fast: the first error found aborts the current
/// schema and no partial unit is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub message: String,
    pub span: Span,
    pub kind: ErrorKind,
    /// Identifier of the source text (usually a file path), when known.
    pub source_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Lex,
    Parse,
    Resolution,
    TypeMismatch,
    /// The code generator produced an inconsistent stack shape. Never caused
    /// by user input.
    CodegenInvariant,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Lex => "lex",
            ErrorKind::Parse => "parse",
            ErrorKind::Resolution => "resolution",
            ErrorKind::TypeMismatch => "type",
            ErrorKind::CodegenInvariant => "codegen",
        }
    }
}

impl CompileError {
    fn new(kind: ErrorKind, message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            kind,
            source_id: None,
        }
    }

    pub fn lex(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Lex, message, span)
    }

    pub fn parse(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Parse, message, span)
    }

    pub fn resolution(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Resolution, message, span)
    }

    pub fn type_mismatch(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::TypeMismatch, message, span)
    }

    pub fn codegen(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::CodegenInvariant, message, span)
    }

    /// Attach the source identifier unless one is already set.
    #[must_use]
    pub fn in_source(mut self, source_id: &str) -> Self {
        if self.source_id.is_none() {
            self.source_id = Some(source_id.to_string());
        }
        self
    }

    /// 1-based line and column of the error start within `source`.
    pub fn line_col(&self, source: &str) -> (usize, usize) {
        offset_to_line_col(source, self.span.start)
    }

    /// Format the error with source context.
    pub fn format_with_source(&self, source: &str) -> String {
        let (line, col) = self.line_col(source);
        format!(
            "[{}] {}:{}:{}: {}",
            self.kind.label(),
            self.source_id.as_deref().unwrap_or("<input>"),
            line,
            col,
            self.message,
        )
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CompileError {}

fn offset_to_line_col(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for (i, ch) in source.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}
