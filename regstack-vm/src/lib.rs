pub mod assembler;
pub mod code;
pub mod diagnostics;
pub mod disasm;
#[cfg(feature = "runtime")]
pub mod engine;
pub mod isa;
pub mod logging;
pub mod parser;
pub mod pool;
pub mod program;
pub mod symbols;
#[cfg(feature = "runtime")]
pub mod value;
pub mod wire;

pub use assembler::{
    AsmEvent, Assembler, Assembly, Diagnostic, DiagnosticKind, Operand, SourceEvent,
    assemble_events,
};
pub use diagnostics::{render_diagnostic, render_diagnostics};
pub use disasm::{Disassembler, disassemble_image};
pub use isa::{InstructionDef, InstructionSet, MachineKind, OperandKind};
pub use parser::{ParsedSource, assemble, parse};
pub use pool::ConstantPool;
pub use program::{Constant, FunctionSymbol, ProgramImage};
pub use wire::{ValidationError, WireError, decode_program, encode_program, validate_program};

#[cfg(feature = "runtime")]
pub use diagnostics::render_vm_error;
#[cfg(feature = "runtime")]
pub use engine::{
    Engine, EngineConfig, Output, RegisterMachine, StackMachine, VmError, VmFault, VmResult,
    VmStatus, new_engine,
};
#[cfg(feature = "runtime")]
pub use value::{StructSpace, Value};
