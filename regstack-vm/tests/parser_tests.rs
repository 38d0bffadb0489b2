mod common;

use common::*;
use vm::{AsmEvent, Operand, parse};

fn single_instruction(line: &str) -> (String, Vec<Operand>) {
    let parsed = parse(line);
    assert!(parsed.errors.is_empty(), "errors: {:?}", parsed.errors);
    match parsed.events.into_iter().next().map(|event| event.event) {
        Some(AsmEvent::Instruction { mnemonic, operands }) => (mnemonic, operands),
        other => panic!("expected an instruction, got {other:?}"),
    }
}

#[test]
fn classifies_operand_tokens() {
    let (_, operands) = single_instruction("op R12, f(), -.5");
    assert_eq!(
        operands,
        vec![
            Operand::Reg(12),
            Operand::Func("f".to_string()),
            Operand::Float(-0.5)
        ]
    );

    let (_, operands) = single_instruction("op -17, 'x', loop_2");
    assert_eq!(
        operands,
        vec![
            Operand::Int(-17),
            Operand::Char('x'),
            Operand::Label("loop_2".to_string())
        ]
    );
}

#[test]
fn string_literals_keep_commas_and_comment_markers() {
    let (mnemonic, operands) = single_instruction("sconst r1, \"a, b; #c\\n\" ; trailing");
    assert_eq!(mnemonic, "sconst");
    assert_eq!(
        operands,
        vec![Operand::Reg(1), Operand::Str("a, b; #c\n".to_string())]
    );
}

#[test]
fn char_escapes_decode() {
    let (_, operands) = single_instruction("cconst r1, '\\''");
    assert_eq!(operands, vec![Operand::Reg(1), Operand::Char('\'')]);
    let (_, operands) = single_instruction("cconst r1, '\\t'");
    assert_eq!(operands, vec![Operand::Reg(1), Operand::Char('\t')]);
}

#[test]
fn directives_labels_and_comments() {
    let source = "\
; header comment
.globals 2
.def main: args=0, locals=3   # entry
loop:
    halt
";
    let parsed = parse(source);
    assert!(parsed.errors.is_empty());
    let events: Vec<(usize, AsmEvent)> = parsed
        .events
        .into_iter()
        .map(|event| (event.line, event.event))
        .collect();
    assert_eq!(
        events,
        vec![
            (2, AsmEvent::Globals(2)),
            (
                3,
                AsmEvent::Function {
                    name: "main".to_string(),
                    args: 0,
                    locals: 3
                }
            ),
            (4, AsmEvent::Label("loop".to_string())),
            (
                5,
                AsmEvent::Instruction {
                    mnemonic: "halt".to_string(),
                    operands: Vec::new()
                }
            ),
        ]
    );
}

#[test]
fn malformed_lines_are_syntax_errors_with_line_numbers() {
    let source = "\
.globals two
iconst r1,
print r1 r2
.bogus
cconst r1, 'ab'
iadd r1, r2, r3, r4
iconst r1, 99999999999
halt
";
    let parsed = parse(source);
    let lines: Vec<Option<usize>> = parsed.errors.iter().map(|error| error.line).collect();
    assert_eq!(
        lines,
        vec![Some(1), Some(2), Some(3), Some(4), Some(5), Some(6), Some(7)]
    );
    assert!(parsed.errors.iter().all(|error| error.kind.is_syntax()));
    assert_eq!(parsed.events.len(), 1);
}

#[test]
fn second_globals_directive_is_rejected() {
    let parsed = parse(".globals 1\n.globals 2\n");
    assert_eq!(parsed.events, vec![vm::SourceEvent {
        line: 1,
        event: AsmEvent::Globals(1)
    }]);
    assert_eq!(parsed.errors.len(), 1);
    assert_eq!(
        parsed.errors[0].kind,
        DiagnosticKind::Syntax("duplicate .globals directive".to_string())
    );
}

#[test]
fn syntax_errors_flow_into_assembly() {
    let assembly = assemble("iconst r1, @\nhalt\n", MachineKind::Register);
    assert!(assembly.has_syntax_errors());
    assert_eq!(assembly.syntax_error_count(), 1);
    assert_eq!(assembly.image.code, vec![29]);
}

#[test]
fn oversized_declarations_are_syntax_errors() {
    let assembly = assemble(".globals 4294967295\nhalt\n", MachineKind::Stack);
    assert!(assembly.has_syntax_errors());
    assert_eq!(assembly.image.data_size, 0);

    let parsed = parse(".def f: args=4000000000, locals=4000000000\nret\n");
    assert_eq!(parsed.errors.len(), 1);
    assert_eq!(parsed.errors[0].line, Some(1));
    assert!(parsed.errors[0].kind.is_syntax());
}
