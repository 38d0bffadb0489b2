use serde::{Deserialize, Serialize};

/// Which execution model a program image targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineKind {
    Stack,
    Register,
}

impl MachineKind {
    pub fn name(self) -> &'static str {
        match self {
            MachineKind::Stack => "stack",
            MachineKind::Register => "register",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "stack" => Some(MachineKind::Stack),
            "register" | "reg" => Some(MachineKind::Register),
            _ => None,
        }
    }

    pub fn instruction_set(self) -> &'static InstructionSet {
        match self {
            MachineKind::Stack => &STACK_INSTRUCTIONS,
            MachineKind::Register => &REGISTER_INSTRUCTIONS,
        }
    }
}

impl std::fmt::Display for MachineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperandKind {
    Reg,
    Int,
    Func,
    Pool,
}

/// Every operand is a big-endian 32-bit word, whatever its kind.
pub const OPERAND_WIDTH: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InstructionDef {
    pub mnemonic: &'static str,
    pub operands: &'static [OperandKind],
}

impl InstructionDef {
    const fn new(mnemonic: &'static str, operands: &'static [OperandKind]) -> Self {
        Self { mnemonic, operands }
    }

    pub fn arity(&self) -> usize {
        self.operands.len()
    }

    pub fn encoded_len(&self) -> usize {
        1 + OPERAND_WIDTH * self.arity()
    }
}

#[derive(Debug)]
pub struct InstructionSet {
    machine: MachineKind,
    defs: &'static [Option<InstructionDef>],
}

impl InstructionSet {
    pub fn machine(&self) -> MachineKind {
        self.machine
    }

    pub fn lookup_by_mnemonic(&self, name: &str) -> Option<u8> {
        self.defs.iter().enumerate().find_map(|(opcode, def)| {
            def.filter(|def| def.mnemonic.eq_ignore_ascii_case(name))
                .map(|_| opcode as u8)
        })
    }

    pub fn lookup_by_opcode(&self, opcode: u8) -> Option<&InstructionDef> {
        self.defs.get(opcode as usize).and_then(Option::as_ref)
    }

    /// Number of table slots, including the reserved slot 0.
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.iter().all(Option::is_none)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &InstructionDef)> {
        self.defs
            .iter()
            .enumerate()
            .filter_map(|(opcode, def)| def.as_ref().map(|def| (opcode as u8, def)))
    }
}

use OperandKind::{Func, Int, Pool, Reg};

pub mod stack_op {
    pub const IADD: u8 = 1;
    pub const ISUB: u8 = 2;
    pub const IMUL: u8 = 3;
    pub const ILT: u8 = 4;
    pub const IEQ: u8 = 5;
    pub const FADD: u8 = 6;
    pub const FSUB: u8 = 7;
    pub const FMUL: u8 = 8;
    pub const FLT: u8 = 9;
    pub const FEQ: u8 = 10;
    pub const ITOF: u8 = 11;
    pub const CALL: u8 = 12;
    pub const RET: u8 = 13;
    pub const BR: u8 = 14;
    pub const BRT: u8 = 15;
    pub const BRF: u8 = 16;
    pub const CCONST: u8 = 17;
    pub const ICONST: u8 = 18;
    pub const FCONST: u8 = 19;
    pub const SCONST: u8 = 20;
    pub const LOAD: u8 = 21;
    pub const GLOAD: u8 = 22;
    pub const FLOAD: u8 = 23;
    pub const STORE: u8 = 24;
    pub const GSTORE: u8 = 25;
    pub const FSTORE: u8 = 26;
    pub const PRINT: u8 = 27;
    pub const STRUCT: u8 = 28;
    pub const NULL: u8 = 29;
    pub const POP: u8 = 30;
    pub const HALT: u8 = 31;
}

pub mod reg_op {
    pub const IADD: u8 = 1;
    pub const ISUB: u8 = 2;
    pub const IMUL: u8 = 3;
    pub const ILT: u8 = 4;
    pub const IEQ: u8 = 5;
    pub const FADD: u8 = 6;
    pub const FSUB: u8 = 7;
    pub const FMUL: u8 = 8;
    pub const FLT: u8 = 9;
    pub const FEQ: u8 = 10;
    pub const ITOF: u8 = 11;
    pub const CALL: u8 = 12;
    pub const RET: u8 = 13;
    pub const BR: u8 = 14;
    pub const BRT: u8 = 15;
    pub const BRF: u8 = 16;
    pub const CCONST: u8 = 17;
    pub const ICONST: u8 = 18;
    pub const FCONST: u8 = 19;
    pub const SCONST: u8 = 20;
    pub const GLOAD: u8 = 21;
    pub const GSTORE: u8 = 22;
    pub const FLOAD: u8 = 23;
    pub const FSTORE: u8 = 24;
    pub const MOVE: u8 = 25;
    pub const PRINT: u8 = 26;
    pub const STRUCT: u8 = 27;
    pub const NULL: u8 = 28;
    pub const HALT: u8 = 29;
}

pub const STACK_OPCODE_COUNT: usize = 32;
pub const REGISTER_OPCODE_COUNT: usize = 30;

static STACK_DEFS: [Option<InstructionDef>; STACK_OPCODE_COUNT] = [
    None,
    Some(InstructionDef::new("iadd", &[])),
    Some(InstructionDef::new("isub", &[])),
    Some(InstructionDef::new("imul", &[])),
    Some(InstructionDef::new("ilt", &[])),
    Some(InstructionDef::new("ieq", &[])),
    Some(InstructionDef::new("fadd", &[])),
    Some(InstructionDef::new("fsub", &[])),
    Some(InstructionDef::new("fmul", &[])),
    Some(InstructionDef::new("flt", &[])),
    Some(InstructionDef::new("feq", &[])),
    Some(InstructionDef::new("itof", &[])),
    Some(InstructionDef::new("call", &[Func])),
    Some(InstructionDef::new("ret", &[])),
    Some(InstructionDef::new("br", &[Int])),
    Some(InstructionDef::new("brt", &[Int])),
    Some(InstructionDef::new("brf", &[Int])),
    Some(InstructionDef::new("cconst", &[Int])),
    Some(InstructionDef::new("iconst", &[Int])),
    Some(InstructionDef::new("fconst", &[Pool])),
    Some(InstructionDef::new("sconst", &[Pool])),
    Some(InstructionDef::new("load", &[Int])),
    Some(InstructionDef::new("gload", &[Int])),
    Some(InstructionDef::new("fload", &[Int])),
    Some(InstructionDef::new("store", &[Int])),
    Some(InstructionDef::new("gstore", &[Int])),
    Some(InstructionDef::new("fstore", &[Int])),
    Some(InstructionDef::new("print", &[])),
    Some(InstructionDef::new("struct", &[Int])),
    Some(InstructionDef::new("null", &[])),
    Some(InstructionDef::new("pop", &[])),
    Some(InstructionDef::new("halt", &[])),
];

static REGISTER_DEFS: [Option<InstructionDef>; REGISTER_OPCODE_COUNT] = [
    None,
    Some(InstructionDef::new("iadd", &[Reg, Reg, Reg])),
    Some(InstructionDef::new("isub", &[Reg, Reg, Reg])),
    Some(InstructionDef::new("imul", &[Reg, Reg, Reg])),
    Some(InstructionDef::new("ilt", &[Reg, Reg, Reg])),
    Some(InstructionDef::new("ieq", &[Reg, Reg, Reg])),
    Some(InstructionDef::new("fadd", &[Reg, Reg, Reg])),
    Some(InstructionDef::new("fsub", &[Reg, Reg, Reg])),
    Some(InstructionDef::new("fmul", &[Reg, Reg, Reg])),
    Some(InstructionDef::new("flt", &[Reg, Reg, Reg])),
    Some(InstructionDef::new("feq", &[Reg, Reg, Reg])),
    Some(InstructionDef::new("itof", &[Reg, Reg])),
    Some(InstructionDef::new("call", &[Func, Reg])),
    Some(InstructionDef::new("ret", &[])),
    Some(InstructionDef::new("br", &[Int])),
    Some(InstructionDef::new("brt", &[Reg, Int])),
    Some(InstructionDef::new("brf", &[Reg, Int])),
    Some(InstructionDef::new("cconst", &[Reg, Int])),
    Some(InstructionDef::new("iconst", &[Reg, Int])),
    Some(InstructionDef::new("fconst", &[Reg, Pool])),
    Some(InstructionDef::new("sconst", &[Reg, Pool])),
    Some(InstructionDef::new("gload", &[Reg, Int])),
    Some(InstructionDef::new("gstore", &[Reg, Int])),
    Some(InstructionDef::new("fload", &[Reg, Reg, Int])),
    Some(InstructionDef::new("fstore", &[Reg, Reg, Int])),
    Some(InstructionDef::new("move", &[Reg, Reg])),
    Some(InstructionDef::new("print", &[Reg])),
    Some(InstructionDef::new("struct", &[Reg, Int])),
    Some(InstructionDef::new("null", &[Reg])),
    Some(InstructionDef::new("halt", &[])),
];

pub static STACK_INSTRUCTIONS: InstructionSet = InstructionSet {
    machine: MachineKind::Stack,
    defs: &STACK_DEFS,
};

pub static REGISTER_INSTRUCTIONS: InstructionSet = InstructionSet {
    machine: MachineKind::Register,
    defs: &REGISTER_DEFS,
};
