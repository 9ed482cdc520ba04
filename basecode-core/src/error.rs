#![forbid(unsafe_code)]

use std::fmt;

use basecode_ast::Span;
use thiserror::Error;

/// Stable diagnostic codes. These are external contract: tooling keys on
/// them, so variants are only ever added.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// cast between types lacking a number class
    C073,
    /// scalar/composite assignment mismatch
    C074,
    /// pointer dereference of a non-pointer
    C075,
    /// unresolved types remain after the resolution fixpoint
    C076,
    /// ambiguous procedure overload
    C077,
    /// unresolved symbol
    P081,
    /// no valid exit/continue label on the flow-control stack
    P082,
    /// intrinsic arity mismatch
    P091,
    /// codegen failure
    X000,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::C073 => "C073",
            ErrorCode::C074 => "C074",
            ErrorCode::C075 => "C075",
            ErrorCode::C076 => "C076",
            ErrorCode::C077 => "C077",
            ErrorCode::P081 => "P081",
            ErrorCode::P082 => "P082",
            ErrorCode::P091 => "P091",
            ErrorCode::X000 => "X000",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// One diagnostic produced during compilation.
#[derive(Clone, Debug, Error)]
#[error("[{code}] {message}")]
pub struct ResultMessage {
    pub code: ErrorCode,
    pub message: String,
    pub span: Span,
    pub severity: Severity,
}

impl miette::Diagnostic for ResultMessage {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(self.code))
    }

    fn severity(&self) -> Option<miette::Severity> {
        match self.severity {
            Severity::Error => Some(miette::Severity::Error),
            Severity::Warning => Some(miette::Severity::Warning),
        }
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = miette::LabeledSpan> + '_>> {
        Some(Box::new(std::iter::once(miette::LabeledSpan::underline(
            self.span,
        ))))
    }
}

/// Shared diagnostic sink. Failable operations report here and return
/// `false`/`None`; phase drivers consult `is_failed` at loop boundaries.
#[derive(Debug, Default)]
pub struct CompileResult {
    messages: Vec<ResultMessage>,
    failed: bool,
}

impl CompileResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, code: ErrorCode, message: impl Into<String>, span: Span) {
        self.messages.push(ResultMessage {
            code,
            message: message.into(),
            span,
            severity: Severity::Error,
        });
        self.failed = true;
    }

    pub fn warning(&mut self, code: ErrorCode, message: impl Into<String>, span: Span) {
        self.messages.push(ResultMessage {
            code,
            message: message.into(),
            span,
            severity: Severity::Warning,
        });
    }

    pub fn fail(&mut self) {
        self.failed = true;
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn messages(&self) -> &[ResultMessage] {
        &self.messages
    }

    pub fn has_code(&self, code: ErrorCode) -> bool {
        self.messages.iter().any(|m| m.code == code)
    }

    /// Diagnostics in source order, the order they are printed in.
    pub fn sorted_messages(&self) -> Vec<&ResultMessage> {
        let mut sorted: Vec<&ResultMessage> = self.messages.iter().collect();
        sorted.sort_by_key(|m| m.span.offset());
        sorted
    }

    pub fn take_failure(&mut self) -> Option<CompileFailure> {
        if !self.failed {
            return None;
        }
        let related = std::mem::take(&mut self.messages);
        let count = related
            .iter()
            .filter(|m| m.severity == Severity::Error)
            .count();
        Some(CompileFailure { count, related })
    }
}

/// Terminal failure for the `Result`-returning driver surface.
#[derive(Debug, Error)]
#[error("compilation failed with {count} error(s)")]
pub struct CompileFailure {
    pub count: usize,
    pub related: Vec<ResultMessage>,
}

impl miette::Diagnostic for CompileFailure {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new("basecode::compile"))
    }

    fn related<'a>(&'a self) -> Option<Box<dyn Iterator<Item = &'a dyn miette::Diagnostic> + 'a>> {
        Some(Box::new(
            self.related.iter().map(|m| m as &dyn miette::Diagnostic),
        ))
    }
}
