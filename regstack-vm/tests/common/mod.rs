#![allow(dead_code, unused_imports)]

pub use vm::{
    Assembly, Constant, DiagnosticKind, Engine, EngineConfig, MachineKind, ProgramImage, Value,
    VmError, VmFault, VmStatus, assemble, new_engine,
};

pub struct RunResult {
    pub assembly: Assembly,
    pub engine: Box<dyn Engine>,
    pub outcome: Result<VmStatus, VmFault>,
}

impl RunResult {
    pub fn output(&self) -> &str {
        self.engine.output().captured().unwrap_or_default()
    }

    pub fn status(&self) -> VmStatus {
        self.outcome.clone().expect("program should run cleanly")
    }

    pub fn fault(&self) -> &VmFault {
        self.outcome
            .as_ref()
            .err()
            .expect("program should fault")
    }
}

pub fn run_with(source: &str, machine: MachineKind, config: EngineConfig) -> RunResult {
    let assembly = assemble(source, machine);
    let mut engine = new_engine(assembly.image.clone(), config);
    let outcome = engine.run();
    RunResult {
        assembly,
        engine,
        outcome,
    }
}

pub fn run(source: &str, machine: MachineKind) -> RunResult {
    run_with(source, machine, EngineConfig::captured())
}

/// Assembles and checks there were no diagnostics at all.
pub fn assemble_clean(source: &str, machine: MachineKind) -> Assembly {
    let assembly = assemble(source, machine);
    assert!(
        assembly.is_clean(),
        "unexpected diagnostics: {:?}",
        assembly.diagnostics
    );
    assembly
}

pub fn operand_at(code: &[u8], at: usize) -> i32 {
    i32::from_be_bytes([code[at], code[at + 1], code[at + 2], code[at + 3]])
}
