use serde::{Deserialize, Serialize};

use crate::code::read_operand;
use crate::isa::{InstructionSet, MachineKind, OPERAND_WIDTH, OperandKind};

/// Largest global data segment an image may declare.
pub const MAX_DATA_SIZE: usize = 1 << 16;

/// Largest `args + locals` a single function may declare.
pub const MAX_FRAME_SLOTS: usize = 1 << 16;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSymbol {
    pub name: String,
    pub args: u32,
    pub locals: u32,
    pub address: u32,
    /// False while the symbol is a stub created by a call that preceded the `.def`.
    pub declared: bool,
}

impl FunctionSymbol {
    pub fn new(name: impl Into<String>, args: u32, locals: u32, address: u32) -> Self {
        Self {
            name: name.into(),
            args,
            locals,
            address,
            declared: true,
        }
    }

    pub fn stub(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: 0,
            locals: 0,
            address: 0,
            declared: false,
        }
    }

    /// Entry used when a program declares no `main`.
    pub fn implicit_main() -> Self {
        Self::new("main", 0, 0, 0)
    }

    pub fn slot_count(&self) -> usize {
        self.args as usize + self.locals as usize
    }
}

impl std::fmt::Display for FunctionSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}(args={}, locals={})@{}",
            self.name, self.args, self.locals, self.address
        )
    }
}

/// Non-register operand values referenced from code by pool index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Constant {
    Float(f32),
    Str(String),
    Function(FunctionSymbol),
}

impl Constant {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Constant::Float(_) => "float",
            Constant::Str(_) => "string",
            Constant::Function(_) => "function",
        }
    }

    pub fn as_function(&self) -> Option<&FunctionSymbol> {
        match self {
            Constant::Function(symbol) => Some(symbol),
            _ => None,
        }
    }
}

impl std::fmt::Display for Constant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constant::Float(value) => write!(f, "{value:?}"),
            Constant::Str(value) => f.write_str(value),
            Constant::Function(symbol) => write!(f, "{symbol}"),
        }
    }
}

/// Everything an engine needs to run: the output of one assembly pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgramImage {
    pub machine: MachineKind,
    pub code: Vec<u8>,
    pub constants: Vec<Constant>,
    pub data_size: usize,
    pub main: Option<FunctionSymbol>,
}

impl ProgramImage {
    pub fn new(machine: MachineKind, code: Vec<u8>, constants: Vec<Constant>) -> Self {
        Self {
            machine,
            code,
            constants,
            data_size: 0,
            main: None,
        }
    }

    pub fn with_data_size(mut self, data_size: usize) -> Self {
        self.data_size = data_size;
        self
    }

    pub fn instruction_set(&self) -> &'static InstructionSet {
        self.machine.instruction_set()
    }

    pub fn entry_function(&self) -> FunctionSymbol {
        self.main.clone().unwrap_or_else(FunctionSymbol::implicit_main)
    }

    pub fn entry_address(&self) -> usize {
        self.main.as_ref().map_or(0, |main| main.address as usize)
    }

    /// Highest register number named by any decodable instruction.
    pub fn highest_register(&self) -> Option<u32> {
        let isa = self.instruction_set();
        let mut highest = None;
        let mut ip = 0usize;
        while let Some(def) = self.code.get(ip).and_then(|&op| isa.lookup_by_opcode(op)) {
            for (slot, kind) in def.operands.iter().enumerate() {
                if *kind != OperandKind::Reg {
                    continue;
                }
                let Some(word) = read_operand(&self.code, ip + 1 + slot * OPERAND_WIDTH) else {
                    return highest;
                };
                if let Ok(register) = u32::try_from(word) {
                    highest = highest.max(Some(register));
                }
            }
            ip += def.encoded_len();
        }
        highest
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
