//! Compile-time diagnostics.

use crate::Span;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Option<Span>,
    pub line: u32,
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, span: Option<Span>, line: u32) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            span,
            line,
            help: None,
        }
    }

    pub fn warning(message: impl Into<String>, span: Option<Span>, line: u32) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            span,
            line,
            help: None,
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Render a diagnostic the way the CLI prints it.
pub fn render_diagnostic(file: &str, diag: &Diagnostic) -> String {
    let sev = match diag.severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
    };
    let mut out = format!("{file}:{}: {sev}: {}", diag.line, diag.message);
    if let Some(help) = &diag.help {
        out.push_str("\n  help: ");
        out.push_str(help);
    }
    out
}
