pub mod frame;
pub mod register;
pub mod runtime;
pub mod stack;

use crate::isa::MachineKind;
use crate::program::{Constant, ProgramImage};
use crate::value::Value;

pub use register::RegisterMachine;
pub use runtime::{Output, VmError, VmFault, VmResult};
pub use stack::StackMachine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmStatus {
    Halted,
    EndOfCode,
    Returned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub trace: bool,
    pub operand_stack_size: usize,
    pub call_stack_size: usize,
    pub step_budget: Option<u64>,
    /// Upper bound on the field count of a single `struct`.
    pub max_struct_fields: usize,
    /// Collect program output in memory instead of writing to stdout.
    pub capture_output: bool,
}

impl EngineConfig {
    pub const DEFAULT_OPERAND_STACK_SIZE: usize = 100;
    pub const DEFAULT_CALL_STACK_SIZE: usize = 1000;
    pub const DEFAULT_MAX_STRUCT_FIELDS: usize = 1 << 16;

    pub fn captured() -> Self {
        Self {
            capture_output: true,
            ..Self::default()
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trace: false,
            operand_stack_size: Self::DEFAULT_OPERAND_STACK_SIZE,
            call_stack_size: Self::DEFAULT_CALL_STACK_SIZE,
            step_budget: None,
            max_struct_fields: Self::DEFAULT_MAX_STRUCT_FIELDS,
            capture_output: false,
        }
    }
}

pub trait Engine {
    fn kind(&self) -> MachineKind;

    /// Runs from the entry point until halt, end of code or a fatal error.
    /// Each call starts from a fresh machine state.
    fn run(&mut self) -> Result<VmStatus, VmFault>;

    /// Disassembly of the instruction at the current ip followed by the
    /// visible machine state.
    fn trace_line(&self) -> String;

    fn disassemble(&self) -> String;

    fn core_dump(&self) -> String;

    fn globals(&self) -> &[Value];

    fn constants(&self) -> &[Constant];

    fn output(&self) -> &Output;

    fn ip(&self) -> usize;

    /// Function names from the outermost frame to the active one.
    fn call_chain(&self) -> Vec<String>;

    fn steps(&self) -> u64;
}

/// Builds the engine matching the image's instruction set.
pub fn new_engine(image: ProgramImage, config: EngineConfig) -> Box<dyn Engine> {
    match image.machine {
        MachineKind::Stack => Box::new(StackMachine::new(image, config)),
        MachineKind::Register => Box::new(RegisterMachine::new(image, config)),
    }
}

pub(crate) fn render_call_chain(chain: &[String]) -> String {
    format!("calls=[ {} ]", chain.join(" "))
}
