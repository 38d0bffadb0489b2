use std::collections::HashSet;

use crate::code::read_operand;
use crate::isa::{MachineKind, OPERAND_WIDTH, OperandKind};
use crate::program::{Constant, FunctionSymbol, MAX_DATA_SIZE, MAX_FRAME_SLOTS, ProgramImage};

const MAGIC: [u8; 4] = *b"RSBC";
const VERSION: u16 = 1;
const FLAGS: u16 = 0;

const TAG_FLOAT: u8 = 0;
const TAG_STRING: u8 = 1;
const TAG_FUNCTION: u8 = 2;

const MACHINE_STACK: u8 = 0;
const MACHINE_REGISTER: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    UnexpectedEof,
    InvalidMagic([u8; 4]),
    UnsupportedVersion(u16),
    UnsupportedFlags(u16),
    InvalidMachine(u8),
    InvalidConstantTag(u8),
    InvalidBool(u8),
    InvalidUtf8,
    InvalidMainIndex(u32),
    LengthTooLarge(&'static str, usize),
    TrailingBytes,
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::UnexpectedEof => write!(f, "unexpected end of input"),
            WireError::InvalidMagic(found) => write!(f, "invalid magic: {found:?}"),
            WireError::UnsupportedVersion(version) => {
                write!(f, "unsupported version: {version}")
            }
            WireError::UnsupportedFlags(flags) => write!(f, "unsupported flags: {flags}"),
            WireError::InvalidMachine(tag) => write!(f, "invalid machine kind: {tag}"),
            WireError::InvalidConstantTag(tag) => write!(f, "invalid constant tag: {tag}"),
            WireError::InvalidBool(value) => write!(f, "invalid bool value: {value}"),
            WireError::InvalidUtf8 => write!(f, "invalid utf-8 string"),
            WireError::InvalidMainIndex(index) => {
                write!(f, "main index {index} does not name a function constant")
            }
            WireError::LengthTooLarge(field, len) => {
                write!(f, "{field} length too large: {len}")
            }
            WireError::TrailingBytes => write!(f, "trailing bytes after program payload"),
        }
    }
}

impl std::error::Error for WireError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    TruncatedOperand {
        offset: usize,
        opcode: u8,
        expected_bytes: usize,
    },
    InvalidOpcode {
        offset: usize,
        opcode: u8,
    },
    InvalidConstant {
        offset: usize,
        index: i32,
    },
    NotAFunction {
        offset: usize,
        index: i32,
    },
    InvalidJumpTarget {
        offset: usize,
        target: i32,
    },
    InvalidEntry {
        address: u32,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::TruncatedOperand {
                offset,
                opcode,
                expected_bytes,
            } => write!(
                f,
                "truncated operand at offset {offset} for opcode {opcode}, expected {expected_bytes} bytes",
            ),
            ValidationError::InvalidOpcode { offset, opcode } => {
                write!(f, "invalid opcode {opcode} at offset {offset}")
            }
            ValidationError::InvalidConstant { offset, index } => write!(
                f,
                "invalid constant index {index} referenced at offset {offset}",
            ),
            ValidationError::NotAFunction { offset, index } => write!(
                f,
                "call at offset {offset} targets constant {index}, which is not a function",
            ),
            ValidationError::InvalidJumpTarget { offset, target } => write!(
                f,
                "invalid jump target {target} referenced by instruction at offset {offset}",
            ),
            ValidationError::InvalidEntry { address } => {
                write!(f, "entry address {address} is not an instruction start")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

pub fn encode_program(image: &ProgramImage) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&FLAGS.to_le_bytes());
    out.push(match image.machine {
        MachineKind::Stack => MACHINE_STACK,
        MachineKind::Register => MACHINE_REGISTER,
    });
    write_u32_count("data", image.data_size, &mut out)?;
    write_u32_count("constants", image.constants.len(), &mut out)?;

    for constant in &image.constants {
        match constant {
            Constant::Float(value) => {
                out.push(TAG_FLOAT);
                out.extend_from_slice(&value.to_le_bytes());
            }
            Constant::Str(value) => {
                out.push(TAG_STRING);
                write_string("constant string", value, &mut out)?;
            }
            Constant::Function(symbol) => {
                out.push(TAG_FUNCTION);
                write_string("function name", &symbol.name, &mut out)?;
                out.extend_from_slice(&symbol.args.to_le_bytes());
                out.extend_from_slice(&symbol.locals.to_le_bytes());
                out.extend_from_slice(&symbol.address.to_le_bytes());
                out.push(u8::from(symbol.declared));
            }
        }
    }

    write_u32_count("code", image.code.len(), &mut out)?;
    out.extend_from_slice(&image.code);

    let main_index = image.main.as_ref().and_then(|main| {
        image
            .constants
            .iter()
            .position(|constant| constant.as_function().is_some_and(|f| f.name == main.name))
    });
    match main_index {
        Some(index) => {
            out.push(1);
            write_u32_count("main index", index, &mut out)?;
        }
        None => {
            out.push(0);
            out.extend_from_slice(&0u32.to_le_bytes());
        }
    }

    Ok(out)
}

pub fn decode_program(bytes: &[u8]) -> Result<ProgramImage, WireError> {
    let mut cursor = Cursor::new(bytes);

    let magic = cursor.read_exact_array::<4>()?;
    if magic != MAGIC {
        return Err(WireError::InvalidMagic(magic));
    }
    let version = cursor.read_u16()?;
    if version != VERSION {
        return Err(WireError::UnsupportedVersion(version));
    }
    let flags = cursor.read_u16()?;
    if flags != FLAGS {
        return Err(WireError::UnsupportedFlags(flags));
    }
    let machine = match cursor.read_u8()? {
        MACHINE_STACK => MachineKind::Stack,
        MACHINE_REGISTER => MachineKind::Register,
        other => return Err(WireError::InvalidMachine(other)),
    };
    let data_size = cursor.read_u32()? as usize;
    if data_size > MAX_DATA_SIZE {
        return Err(WireError::LengthTooLarge("data", data_size));
    }

    let constant_count = cursor.read_u32()? as usize;
    let mut constants = Vec::with_capacity(constant_count.min(cursor.remaining()));
    for _ in 0..constant_count {
        let constant = match cursor.read_u8()? {
            TAG_FLOAT => Constant::Float(f32::from_le_bytes(cursor.read_exact_array::<4>()?)),
            TAG_STRING => Constant::Str(cursor.read_string()?),
            TAG_FUNCTION => {
                let name = cursor.read_string()?;
                let args = cursor.read_u32()?;
                let locals = cursor.read_u32()?;
                let address = cursor.read_u32()?;
                let declared = cursor.read_bool()?;
                let slots = args as usize + locals as usize;
                if slots > MAX_FRAME_SLOTS {
                    return Err(WireError::LengthTooLarge("frame", slots));
                }
                Constant::Function(FunctionSymbol {
                    name,
                    args,
                    locals,
                    address,
                    declared,
                })
            }
            other => return Err(WireError::InvalidConstantTag(other)),
        };
        constants.push(constant);
    }

    let code_len = cursor.read_u32()? as usize;
    let code = cursor.read_exact(code_len)?.to_vec();

    let has_main = cursor.read_bool()?;
    let main_index = cursor.read_u32()?;
    let main = if has_main {
        let symbol = constants
            .get(main_index as usize)
            .and_then(Constant::as_function)
            .ok_or(WireError::InvalidMainIndex(main_index))?;
        Some(symbol.clone())
    } else {
        None
    };

    if !cursor.is_eof() {
        return Err(WireError::TrailingBytes);
    }

    Ok(ProgramImage {
        machine,
        code,
        constants,
        data_size,
        main,
    })
}

/// Walks the instruction stream and checks that an engine could decode every
/// instruction: known opcodes, complete operands, pool references in range and
/// branch targets landing on instruction starts (or the end of code).
pub fn validate_program(image: &ProgramImage) -> Result<(), ValidationError> {
    let isa = image.instruction_set();
    let code = &image.code;
    let branch_opcodes = ["br", "brt", "brf"]
        .iter()
        .filter_map(|name| isa.lookup_by_mnemonic(name))
        .collect::<HashSet<u8>>();

    let mut starts = HashSet::new();
    let mut jumps = Vec::new();
    let mut ip = 0usize;
    while ip < code.len() {
        starts.insert(ip);
        let opcode = code[ip];
        let def = isa
            .lookup_by_opcode(opcode)
            .ok_or(ValidationError::InvalidOpcode { offset: ip, opcode })?;
        if ip + def.encoded_len() > code.len() {
            return Err(ValidationError::TruncatedOperand {
                offset: ip,
                opcode,
                expected_bytes: def.arity() * OPERAND_WIDTH,
            });
        }

        for (slot, kind) in def.operands.iter().enumerate() {
            let at = ip + 1 + slot * OPERAND_WIDTH;
            let word = read_operand(code, at).ok_or(ValidationError::TruncatedOperand {
                offset: ip,
                opcode,
                expected_bytes: def.arity() * OPERAND_WIDTH,
            })?;
            match kind {
                OperandKind::Pool | OperandKind::Func => {
                    let constant = usize::try_from(word)
                        .ok()
                        .and_then(|index| image.constants.get(index))
                        .ok_or(ValidationError::InvalidConstant {
                            offset: ip,
                            index: word,
                        })?;
                    if *kind == OperandKind::Func && constant.as_function().is_none() {
                        return Err(ValidationError::NotAFunction {
                            offset: ip,
                            index: word,
                        });
                    }
                }
                OperandKind::Int if branch_opcodes.contains(&opcode) => {
                    jumps.push((ip, word));
                }
                OperandKind::Int | OperandKind::Reg => {}
            }
        }
        ip += def.encoded_len();
    }

    for (offset, target) in jumps {
        let valid = usize::try_from(target)
            .is_ok_and(|target| target == code.len() || starts.contains(&target));
        if !valid {
            return Err(ValidationError::InvalidJumpTarget { offset, target });
        }
    }

    if let Some(main) = &image.main {
        let address = main.address as usize;
        if address != code.len() && !starts.contains(&address) {
            return Err(ValidationError::InvalidEntry {
                address: main.address,
            });
        }
    }

    Ok(())
}

fn write_string(field: &'static str, value: &str, out: &mut Vec<u8>) -> Result<(), WireError> {
    write_u32_count(field, value.len(), out)?;
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

fn write_u32_count(field: &'static str, count: usize, out: &mut Vec<u8>) -> Result<(), WireError> {
    let value = u32::try_from(count).map_err(|_| WireError::LengthTooLarge(field, count))?;
    out.extend_from_slice(&value.to_le_bytes());
    Ok(())
}

struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn read_u8(&mut self) -> Result<u8, WireError> {
        let value = self
            .bytes
            .get(self.offset)
            .ok_or(WireError::UnexpectedEof)?;
        self.offset += 1;
        Ok(*value)
    }

    fn read_bool(&mut self) -> Result<bool, WireError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(WireError::InvalidBool(other)),
        }
    }

    fn read_u16(&mut self) -> Result<u16, WireError> {
        let bytes = self.read_exact_array::<2>()?;
        Ok(u16::from_le_bytes(bytes))
    }

    fn read_u32(&mut self) -> Result<u32, WireError> {
        let bytes = self.read_exact_array::<4>()?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_string(&mut self) -> Result<String, WireError> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_exact(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }

    fn read_exact_array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let bytes = self.read_exact(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn read_exact(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let end = self
            .offset
            .checked_add(len)
            .ok_or(WireError::UnexpectedEof)?;
        if end > self.bytes.len() {
            return Err(WireError::UnexpectedEof);
        }
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn is_eof(&self) -> bool {
        self.offset == self.bytes.len()
    }
}
