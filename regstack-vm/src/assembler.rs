use tracing::debug;

use crate::code::CodeBuffer;
use crate::isa::{InstructionSet, MachineKind};
use crate::pool::{ConstantPool, FunctionDefinition};
use crate::program::{Constant, FunctionSymbol, ProgramImage};
use crate::symbols::{LabelDefinition, LabelSymbol, LabelTable};

/// An operand as the front end saw it. The lexical kind decides the encoding,
/// independently of what the instruction declares.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Reg(u32),
    Int(i32),
    Char(char),
    Float(f32),
    Str(String),
    Label(String),
    Func(String),
}

/// One semantic event produced by a front end, in source order.
#[derive(Clone, Debug, PartialEq)]
pub enum AsmEvent {
    Globals(usize),
    Function {
        name: String,
        args: u32,
        locals: u32,
    },
    Label(String),
    Instruction {
        mnemonic: String,
        operands: Vec<Operand>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct SourceEvent {
    pub line: usize,
    pub event: AsmEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiagnosticKind {
    Syntax(String),
    UnknownInstruction(String),
    OperandCount {
        mnemonic: String,
        expected: usize,
        got: usize,
    },
    LabelRedefinition(String),
    FunctionRedefinition(String),
    UnresolvedLabel(String),
    UnresolvedFunction(String),
}

impl DiagnosticKind {
    pub fn is_syntax(&self) -> bool {
        matches!(self, DiagnosticKind::Syntax(_))
    }
}

impl std::fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiagnosticKind::Syntax(message) => f.write_str(message),
            DiagnosticKind::UnknownInstruction(name) => write!(f, "unknown instruction: {name}"),
            DiagnosticKind::OperandCount {
                mnemonic,
                expected,
                got,
            } => write!(
                f,
                "instruction '{mnemonic}' takes {expected} operand(s), got {got}"
            ),
            DiagnosticKind::LabelRedefinition(name) => write!(f, "redefinition of symbol {name}"),
            DiagnosticKind::FunctionRedefinition(name) => {
                write!(f, "redefinition of function {name}")
            }
            DiagnosticKind::UnresolvedLabel(name) => write!(f, "unresolved reference: {name}"),
            DiagnosticKind::UnresolvedFunction(name) => {
                write!(f, "unresolved function reference: {name}()")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    /// Source line, absent for end-of-pass reports.
    pub line: Option<usize>,
    pub kind: DiagnosticKind,
}

impl Diagnostic {
    pub fn at(line: usize, kind: DiagnosticKind) -> Self {
        Self {
            line: Some(line),
            kind,
        }
    }

    pub fn global(kind: DiagnosticKind) -> Self {
        Self { line: None, kind }
    }

    pub fn syntax(line: usize, message: impl Into<String>) -> Self {
        Self::at(line, DiagnosticKind::Syntax(message.into()))
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {line}: {}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Diagnostic {}

/// Result of a complete pass. Assembly never aborts; problems are collected.
#[derive(Clone, Debug)]
pub struct Assembly {
    pub image: ProgramImage,
    pub diagnostics: Vec<Diagnostic>,
    pub labels: Vec<LabelSymbol>,
}

impl Assembly {
    pub fn syntax_error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|diagnostic| diagnostic.kind.is_syntax())
            .count()
    }

    pub fn semantic_error_count(&self) -> usize {
        self.diagnostics.len() - self.syntax_error_count()
    }

    pub fn has_syntax_errors(&self) -> bool {
        self.syntax_error_count() > 0
    }

    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn label(&self, name: &str) -> Option<&LabelSymbol> {
        self.labels.iter().find(|label| label.name == name)
    }
}

pub struct Assembler {
    isa: &'static InstructionSet,
    code: CodeBuffer,
    pool: ConstantPool,
    labels: LabelTable,
    data_size: usize,
    diagnostics: Vec<Diagnostic>,
}

impl Assembler {
    pub fn new(machine: MachineKind) -> Self {
        Self::with_instruction_set(machine.instruction_set())
    }

    pub fn with_instruction_set(isa: &'static InstructionSet) -> Self {
        Self {
            isa,
            code: CodeBuffer::new(),
            pool: ConstantPool::new(),
            labels: LabelTable::new(),
            data_size: 0,
            diagnostics: Vec::new(),
        }
    }

    pub fn position(&self) -> u32 {
        self.code.position()
    }

    pub fn pool(&self) -> &ConstantPool {
        &self.pool
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn report(&mut self, diagnostic: Diagnostic) {
        debug!(%diagnostic, "assembler diagnostic");
        self.diagnostics.push(diagnostic);
    }

    pub fn apply(&mut self, event: &SourceEvent) {
        let line = event.line;
        match &event.event {
            AsmEvent::Globals(count) => self.declare_globals(*count),
            AsmEvent::Function { name, args, locals } => {
                self.declare_function(line, name, *args, *locals)
            }
            AsmEvent::Label(name) => self.define_label(line, name),
            AsmEvent::Instruction { mnemonic, operands } => self.emit(line, mnemonic, operands),
        }
    }

    pub fn declare_globals(&mut self, count: usize) {
        self.data_size = count;
    }

    pub fn declare_function(&mut self, line: usize, name: &str, args: u32, locals: u32) {
        let symbol = FunctionSymbol::new(name, args, locals, self.position());
        match self.pool.define_function(symbol) {
            FunctionDefinition::New(index) => {
                debug!(function = name, index, "declared function");
            }
            FunctionDefinition::Completed(index) => {
                debug!(function = name, index, "completed forward-referenced function");
            }
            FunctionDefinition::Redefined(_) => {
                self.report(Diagnostic::at(
                    line,
                    DiagnosticKind::FunctionRedefinition(name.to_string()),
                ));
            }
        }
    }

    pub fn define_label(&mut self, line: usize, name: &str) {
        let address = self.position();
        match self.labels.define(name, address, &mut self.code) {
            LabelDefinition::Fresh => {}
            LabelDefinition::Backpatched(sites) => {
                debug!(
                    label = name,
                    address,
                    sites = sites.len(),
                    "backpatched forward references"
                );
            }
            LabelDefinition::Redefined { .. } => {
                self.report(Diagnostic::at(
                    line,
                    DiagnosticKind::LabelRedefinition(name.to_string()),
                ));
            }
        }
    }

    /// Emits one instruction. Unknown mnemonics and operand-count mismatches
    /// are reported and leave the buffer untouched.
    pub fn emit(&mut self, line: usize, mnemonic: &str, operands: &[Operand]) {
        let Some(opcode) = self.isa.lookup_by_mnemonic(mnemonic) else {
            self.report(Diagnostic::at(
                line,
                DiagnosticKind::UnknownInstruction(mnemonic.to_string()),
            ));
            return;
        };
        let expected = self
            .isa
            .lookup_by_opcode(opcode)
            .map_or(0, |def| def.arity());
        if expected != operands.len() {
            self.report(Diagnostic::at(
                line,
                DiagnosticKind::OperandCount {
                    mnemonic: mnemonic.to_string(),
                    expected,
                    got: operands.len(),
                },
            ));
            return;
        }

        self.code.emit_opcode(opcode);
        for operand in operands {
            let word = self.operand_word(operand);
            self.code.emit_operand(word);
        }
    }

    fn operand_word(&mut self, operand: &Operand) -> i32 {
        match operand {
            Operand::Reg(number) => *number as i32,
            Operand::Int(value) => *value,
            Operand::Char(ch) => *ch as i32,
            Operand::Float(value) => self.pool.get_or_insert(Constant::Float(*value)) as i32,
            Operand::Str(text) => self.pool.get_or_insert(Constant::Str(text.clone())) as i32,
            Operand::Label(name) => {
                let at = self.code.position();
                self.labels.reference(name, at) as i32
            }
            Operand::Func(name) => self.pool.function_stub(name) as i32,
        }
    }

    pub fn finish(mut self) -> Assembly {
        let unresolved_labels = self
            .labels
            .unresolved()
            .map(|label| DiagnosticKind::UnresolvedLabel(label.name.clone()))
            .collect::<Vec<_>>();
        let unresolved_functions = self
            .pool
            .undeclared_functions()
            .map(|symbol| DiagnosticKind::UnresolvedFunction(symbol.name.clone()))
            .collect::<Vec<_>>();
        for kind in unresolved_labels.into_iter().chain(unresolved_functions) {
            self.report(Diagnostic::global(kind));
        }

        let main = self
            .pool
            .function("main")
            .filter(|symbol| symbol.declared)
            .cloned();
        let labels = self.labels.iter().cloned().collect();
        let image = ProgramImage {
            machine: self.isa.machine(),
            code: self.code.finish(),
            constants: self.pool.finish(),
            data_size: self.data_size,
            main,
        };
        debug!(
            machine = %image.machine,
            code_bytes = image.code.len(),
            constants = image.constants.len(),
            diagnostics = self.diagnostics.len(),
            "assembly finished"
        );
        Assembly {
            image,
            diagnostics: self.diagnostics,
            labels,
        }
    }
}

/// Feeds an already-tokenized event stream through a fresh assembler.
pub fn assemble_events<'a>(
    machine: MachineKind,
    events: impl IntoIterator<Item = &'a SourceEvent>,
) -> Assembly {
    let mut assembler = Assembler::new(machine);
    for event in events {
        assembler.apply(event);
    }
    assembler.finish()
}
