use std::collections::BTreeMap;

use crate::span::Span;

/// A compiler diagnostic (error or warning).
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Span,
    pub notes: Vec<String>,
    pub help: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Diagnostic {
    pub fn error(message: String, span: Span) -> Self {
        Self {
            severity: Severity::Error,
            message,
            span,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn warning(message: String, span: Span) -> Self {
        Self {
            severity: Severity::Warning,
            message,
            span,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn with_note(mut self, note: String) -> Self {
        self.notes.push(note);
        self
    }

    pub fn with_help(mut self, help: String) -> Self {
        self.help = Some(help);
        self
    }

    /// The single-line presentation: `<file>:<line>: <message>`.
    pub fn to_line(&self, filename: &str) -> String {
        format!("{}:{}: {}", filename, self.span.line, self.message)
    }

    /// Render the diagnostic to stderr using ariadne.
    pub fn render(&self, filename: &str, source: &str) {
        use ariadne::{Color, Label, Report, ReportKind, Source};

        let kind = match self.severity {
            Severity::Error => ReportKind::Error,
            Severity::Warning => ReportKind::Warning,
        };

        let color = match self.severity {
            Severity::Error => Color::Red,
            Severity::Warning => Color::Yellow,
        };

        let mut report = Report::build(kind, filename, self.span.start as usize)
            .with_message(&self.message)
            .with_label(
                Label::new((filename, self.span.start as usize..self.span.end as usize))
                    .with_message(&self.message)
                    .with_color(color),
            );

        for note in &self.notes {
            report = report.with_note(note);
        }

        if let Some(help) = &self.help {
            report = report.with_help(help);
        }

        let _ = report.finish().eprint((filename, Source::from(source)));
    }
}

/// Render a list of diagnostics.
pub fn render_diagnostics(diagnostics: &[Diagnostic], filename: &str, source: &str) {
    for diag in diagnostics {
        diag.render(filename, source);
    }
}

/// An unrecoverable condition: unreadable input, malformed library buffer,
/// frame-budget overflow, bad output extension. Printed and exits non-zero.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FatalError {
    pub message: String,
}

impl FatalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FatalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for FatalError {}

/// Line-keyed diagnostic collection.
///
/// Multiple diagnostics on the same source line collapse to the first one, and
/// draining yields them sorted by line. Line 0 holds file-independent errors.
#[derive(Debug, Default)]
pub struct DiagnosticSet {
    by_line: BTreeMap<u32, Diagnostic>,
}

impl DiagnosticSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, message: String, span: Span) {
        self.by_line
            .entry(span.line)
            .or_insert_with(|| Diagnostic::error(message, span));
    }

    /// An error with no source position (e.g. a missing entry point).
    pub fn error_global(&mut self, message: String) {
        self.error(message, Span::dummy());
    }

    pub fn is_empty(&self) -> bool {
        self.by_line.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_line.len()
    }

    /// Line-sorted diagnostics, consuming the set.
    pub fn into_sorted(self) -> Vec<Diagnostic> {
        self.by_line.into_values().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.by_line.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let span = Span::new(0, 3, 10, 15);
        let d = Diagnostic::error("type mismatch".to_string(), span);
        assert_eq!(d.severity, Severity::Error);
        assert_eq!(d.message, "type mismatch");
        assert_eq!(d.span.start, 10);
        assert_eq!(d.span.end, 15);
        assert!(d.notes.is_empty());
        assert!(d.help.is_none());
    }

    #[test]
    fn test_to_line_form() {
        let d = Diagnostic::error("undefined class: 'Foo'".to_string(), Span::new(0, 12, 0, 3));
        assert_eq!(d.to_line("hello.opl"), "hello.opl:12: undefined class: 'Foo'");
    }

    #[test]
    fn test_with_note_and_help() {
        let d = Diagnostic::error("error".to_string(), Span::dummy())
            .with_note("expected Int".to_string())
            .with_help("add an explicit cast".to_string());
        assert_eq!(d.notes.len(), 1);
        assert_eq!(d.help.as_deref(), Some("add an explicit cast"));
    }

    #[test]
    fn test_set_dedupes_by_line() {
        let mut set = DiagnosticSet::new();
        set.error("first".to_string(), Span::new(0, 7, 0, 1));
        set.error("second".to_string(), Span::new(0, 7, 5, 9));
        set.error("other line".to_string(), Span::new(0, 3, 0, 1));
        assert_eq!(set.len(), 2);
        let sorted = set.into_sorted();
        assert_eq!(sorted[0].message, "other line");
        assert_eq!(sorted[1].message, "first");
    }

    #[test]
    fn test_set_sorts_by_line() {
        let mut set = DiagnosticSet::new();
        set.error("late".to_string(), Span::new(0, 90, 0, 1));
        set.error("early".to_string(), Span::new(0, 2, 0, 1));
        set.error_global("global".to_string());
        let lines: Vec<u32> = set.into_sorted().iter().map(|d| d.span.line).collect();
        assert_eq!(lines, vec![0, 2, 90]);
    }

    #[test]
    fn test_render_does_not_panic() {
        let source = "x : Int := 1;\ny : Bool := x;\n";
        let d = Diagnostic::error("type mismatch".to_string(), Span::new(0, 2, 14, 27))
            .with_note("expected Bool, found Int".to_string());
        d.render("test.opl", source);
    }
}
