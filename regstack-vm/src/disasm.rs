use std::fmt::Write as _;

use crate::code::read_operand;
use crate::isa::{InstructionSet, OPERAND_WIDTH, OperandKind};
use crate::program::{Constant, ProgramImage};

/// Read-only textual view over a code buffer. Used for listings, per-step
/// tracing and fault reports alike.
#[derive(Clone, Copy, Debug)]
pub struct Disassembler<'a> {
    code: &'a [u8],
    constants: &'a [Constant],
    isa: &'a InstructionSet,
}

impl<'a> Disassembler<'a> {
    pub fn new(code: &'a [u8], constants: &'a [Constant], isa: &'a InstructionSet) -> Self {
        Self {
            code,
            constants,
            isa,
        }
    }

    pub fn for_image(image: &'a ProgramImage) -> Self {
        Self::new(&image.code, &image.constants, image.instruction_set())
    }

    /// Renders the instruction at `ip` and returns the address of the next one.
    pub fn instruction_at(&self, ip: usize) -> (String, usize) {
        let Some(&opcode) = self.code.get(ip) else {
            return (format!("{ip:04}:\t<end of code>"), self.code.len());
        };
        let Some(def) = self.isa.lookup_by_opcode(opcode) else {
            return (format!("{ip:04}:\t<invalid opcode {opcode}>"), ip + 1);
        };

        if def.operands.is_empty() {
            return (format!("{ip:04}:\t{}", def.mnemonic), ip + 1);
        }

        let mut text = format!("{ip:04}:\t{:<11}", def.mnemonic);
        let mut at = ip + 1;
        for (idx, kind) in def.operands.iter().enumerate() {
            if idx > 0 {
                text.push_str(", ");
            }
            let Some(word) = read_operand(self.code, at) else {
                text.push_str("<truncated>");
                return (text, self.code.len());
            };
            self.write_operand(&mut text, *kind, word);
            at += OPERAND_WIDTH;
        }
        (text, at)
    }

    fn write_operand(&self, out: &mut String, kind: OperandKind, word: i32) {
        match kind {
            OperandKind::Reg => {
                let _ = write!(out, "r{word}");
            }
            OperandKind::Int => {
                let _ = write!(out, "{word}");
            }
            OperandKind::Pool | OperandKind::Func => {
                let constant = usize::try_from(word)
                    .ok()
                    .and_then(|slot| self.constants.get(slot));
                match constant {
                    Some(Constant::Str(text)) => {
                        let _ = write!(out, "#{word}:\"{text}\"");
                    }
                    Some(Constant::Float(value)) => {
                        let _ = write!(out, "#{word}:{value:?}");
                    }
                    Some(Constant::Function(symbol)) => {
                        let _ = write!(out, "#{word}:{}()@{}", symbol.name, symbol.address);
                    }
                    None => {
                        let _ = write!(out, "#{word}:<invalid>");
                    }
                }
            }
        }
    }

    pub fn listing(&self) -> String {
        let mut out = String::from("Disassembly:\n");
        let mut ip = 0;
        while ip < self.code.len() {
            let (line, next) = self.instruction_at(ip);
            out.push_str(&line);
            out.push('\n');
            ip = next;
        }
        out
    }
}

pub fn disassemble_image(image: &ProgramImage) -> String {
    Disassembler::for_image(image).listing()
}
