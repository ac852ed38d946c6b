//! Rich, rustc-style diagnostic rendering for [`crate::Error`].
//!
//! The lexer/parser/compiler raise plain [`crate::Error`] values (cheap,
//! `Clone`, comparable). A [`Diagnostic`] is built on demand from one of
//! those plus the original source text, for embedders that want a
//! source-snippet-with-carets rendering instead of a one-line message.

use std::fmt;

use crate::error::Error;

/// A span in the source code, as a half-open byte-offset range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// A label attached to a span with a message.
#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
    pub is_primary: bool,
}

impl Label {
    pub fn primary(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
            is_primary: true,
        }
    }

    pub fn secondary(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
            is_primary: false,
        }
    }
}

/// A rich diagnostic error with source context.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub message: String,
    pub source: String,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: String::new(),
            labels: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_label(mut self, span: Span, message: impl Into<String>) -> Self {
        self.labels.push(Label::primary(span, message));
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Build a diagnostic from an [`Error`] and the source it was raised
    /// against. Errors without a source line (runtime errors, version
    /// mismatches) render without a snippet.
    pub fn from_error(err: &Error, source: &str) -> Diagnostic {
        let diag = Diagnostic::new(err.to_string()).with_source(source);
        match err {
            Error::Syntax { line, .. } | Error::Semantic { line, .. } => {
                let offset = line_start_offset(source, *line);
                let end = offset + line_len(source, *line);
                diag.with_label(Span::new(offset, end), "here")
            }
            _ => diag,
        }
    }

    fn offset_to_line_col(&self, offset: usize) -> (usize, usize) {
        let mut line = 1;
        let mut col = 1;
        for (i, ch) in self.source.char_indices() {
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

    fn get_line(&self, line_num: usize) -> &str {
        self.source.lines().nth(line_num - 1).unwrap_or("")
    }

    fn line_number_width(&self) -> usize {
        self.source.lines().count().to_string().len().max(1)
    }
}

fn line_start_offset(source: &str, line: u32) -> usize {
    source
        .lines()
        .take(line.saturating_sub(1) as usize)
        .map(|l| l.len() + 1)
        .sum()
}

fn line_len(source: &str, line: u32) -> usize {
    source
        .lines()
        .nth(line.saturating_sub(1) as usize)
        .map(|l| l.len())
        .unwrap_or(0)
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "error: {}", self.message)?;

        if self.source.is_empty() || self.labels.is_empty() {
            for note in &self.notes {
                writeln!(f, "  = note: {}", note)?;
            }
            return Ok(());
        }

        let width = self.line_number_width();
        let mut labels_by_line: std::collections::BTreeMap<usize, Vec<&Label>> =
            std::collections::BTreeMap::new();
        for label in &self.labels {
            let (line, _) = self.offset_to_line_col(label.span.start);
            labels_by_line.entry(line).or_default().push(label);
        }

        writeln!(f, "{:width$} |", "", width = width)?;
        for (&line_num, labels) in &labels_by_line {
            let line_content = self.get_line(line_num);
            writeln!(f, "{:width$} | {}", line_num, line_content, width = width)?;
            for label in labels {
                let (_, start_col) = self.offset_to_line_col(label.span.start);
                let (_, end_col) = self.offset_to_line_col(label.span.end);
                let underline_start = start_col.saturating_sub(1);
                let underline_len = (end_col - start_col).max(1);
                let underline_char = if label.is_primary { '^' } else { '-' };

                write!(f, "{:width$} | ", "", width = width)?;
                write!(f, "{:underline_start$}", "")?;
                for _ in 0..underline_len {
                    write!(f, "{}", underline_char)?;
                }
                if !label.message.is_empty() {
                    write!(f, " {}", label.message)?;
                }
                writeln!(f)?;
            }
        }
        writeln!(f, "{:width$} |", "", width = width)?;

        for note in &self.notes {
            writeln!(f, "  = note: {}", note)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_a_caret_under_the_offending_line() {
        let err = Error::Semantic {
            line: 2,
            message: "undefined variable 'x'".to_string(),
        };
        let source = "y = 1\nprint(x)\n";
        let diag = Diagnostic::from_error(&err, source);
        let rendered = diag.to_string();
        assert!(rendered.contains("print(x)"));
        assert!(rendered.contains('^'));
    }

    #[test]
    fn runtime_errors_render_without_a_snippet() {
        let err = Error::Runtime("division by zero".to_string());
        let diag = Diagnostic::from_error(&err, "1 / 0");
        assert_eq!(diag.labels.len(), 0);
    }
}
