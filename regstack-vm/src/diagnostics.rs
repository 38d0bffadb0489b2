use owo_colors::OwoColorize;

use crate::assembler::Diagnostic;

fn error_label(styled: bool) -> String {
    if styled {
        format!("{}", "error".bright_red().bold())
    } else {
        "error".to_string()
    }
}

/// Renders an assembly diagnostic, quoting the offending source line when the
/// diagnostic carries one.
pub fn render_diagnostic(diagnostic: &Diagnostic, source: &str, styled: bool) -> String {
    let label = error_label(styled);
    let Some(line) = diagnostic.line else {
        return format!("{label}: {}", diagnostic.kind);
    };
    let Some(line_text) = source.lines().nth(line.saturating_sub(1)) else {
        return format!("{label}: line {line}: {}", diagnostic.kind);
    };
    let indent = line_text.len() - line_text.trim_start().len();
    let width = line_text.trim().len().max(1);
    let pointer = format!("{}{}", " ".repeat(indent), "^".repeat(width));
    let pointer = if styled {
        format!("{}", pointer.bright_red())
    } else {
        pointer
    };
    format!(
        "{label}: line {line}: {}\n{line:>3} | {line_text}\n    | {pointer}",
        diagnostic.kind
    )
}

pub fn render_diagnostics(diagnostics: &[Diagnostic], source: &str, styled: bool) -> String {
    diagnostics
        .iter()
        .map(|diagnostic| render_diagnostic(diagnostic, source, styled))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(feature = "runtime")]
pub fn render_vm_error(fault: &crate::engine::VmFault, styled: bool) -> String {
    let label = if styled {
        format!("{}", "runtime error".bright_red().bold())
    } else {
        "runtime error".to_string()
    };
    format!(
        "{label}: {}\nat ip {:04}\n  {}",
        fault.error,
        fault.ip,
        fault.instruction.replace('\t', " ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::DiagnosticKind;

    #[test]
    fn quotes_source_line_with_pointer() {
        let source = "iconst 1\n  bogus r1\nhalt\n";
        let diagnostic = Diagnostic::at(2, DiagnosticKind::UnknownInstruction("bogus".into()));
        let rendered = render_diagnostic(&diagnostic, source, false);
        assert_eq!(
            rendered,
            "error: line 2: unknown instruction: bogus\n  2 |   bogus r1\n    |   ^^^^^^^^"
        );
    }

    #[test]
    fn end_of_pass_diagnostics_have_no_snippet() {
        let diagnostic = Diagnostic::global(DiagnosticKind::UnresolvedLabel("done".into()));
        assert_eq!(
            render_diagnostic(&diagnostic, "", false),
            "error: unresolved reference: done"
        );
    }
}
