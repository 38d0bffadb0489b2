use std::fmt::Write as _;
use std::io::Write as _;

use tracing::warn;

use crate::program::{Constant, FunctionSymbol, MAX_DATA_SIZE};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    InvalidOpcode(u8),
    BytecodeBounds,
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    InvalidRegister(i32),
    InvalidLocal(i32),
    InvalidGlobal(i32),
    InvalidField(i32),
    InvalidConstant(i32),
    InvalidJumpTarget(i32),
    InvalidStructSize(i32),
    DataTooLarge(usize),
    FrameTooLarge {
        function: String,
        slots: usize,
    },
    InvalidChar(i32),
    NotAFunction(i32),
    UnresolvedFunction(String),
    StackUnderflow,
    StackOverflow(usize),
    CallStackOverflow(usize),
    StepBudgetExhausted(u64),
    OutputFailed(String),
}

impl VmError {
    pub fn type_mismatch(expected: &'static str, found: &Value) -> Self {
        VmError::TypeMismatch {
            expected,
            found: found.kind_name(),
        }
    }
}

impl std::fmt::Display for VmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VmError::InvalidOpcode(opcode) => write!(f, "invalid opcode {opcode}"),
            VmError::BytecodeBounds => write!(f, "operand runs past the end of code"),
            VmError::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected {expected}, found {found}")
            }
            VmError::InvalidRegister(index) => write!(f, "invalid register r{index}"),
            VmError::InvalidLocal(index) => write!(f, "invalid local {index}"),
            VmError::InvalidGlobal(index) => write!(f, "invalid global {index}"),
            VmError::InvalidField(index) => write!(f, "invalid struct field {index}"),
            VmError::InvalidConstant(index) => write!(f, "invalid constant {index}"),
            VmError::InvalidJumpTarget(target) => write!(f, "invalid jump target {target}"),
            VmError::InvalidStructSize(size) => write!(f, "invalid struct size {size}"),
            VmError::DataTooLarge(size) => {
                write!(f, "global data segment of {size} slots is too large")
            }
            VmError::FrameTooLarge { function, slots } => {
                write!(f, "frame of {function}() needs {slots} slots, which is too many")
            }
            VmError::InvalidChar(code) => write!(f, "invalid character code {code}"),
            VmError::NotAFunction(index) => write!(f, "constant {index} is not a function"),
            VmError::UnresolvedFunction(name) => {
                write!(f, "call to undeclared function {name}()")
            }
            VmError::StackUnderflow => write!(f, "operand stack underflow"),
            VmError::StackOverflow(limit) => {
                write!(f, "operand stack overflow (capacity {limit})")
            }
            VmError::CallStackOverflow(limit) => {
                write!(f, "call stack overflow (depth {limit})")
            }
            VmError::StepBudgetExhausted(budget) => {
                write!(f, "step budget of {budget} instructions exhausted")
            }
            VmError::OutputFailed(reason) => write!(f, "cannot write program output: {reason}"),
        }
    }
}

impl std::error::Error for VmError {}

pub type VmResult<T> = Result<T, VmError>;

/// A fatal runtime error together with where it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmFault {
    pub ip: usize,
    pub error: VmError,
    /// Disassembly of the faulting instruction.
    pub instruction: String,
}

impl std::fmt::Display for VmFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {:04}", self.error, self.ip)
    }
}

impl std::error::Error for VmFault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// What a handler asks the fetch loop to do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Halt,
    /// `ret` executed in the outermost frame.
    Exit,
}

pub type Operands = [i32; 3];

/// Where `print` and trace lines go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Output {
    Stdout,
    Captured(String),
}

impl Output {
    pub fn new(capture: bool) -> Self {
        if capture {
            Output::Captured(String::new())
        } else {
            Output::Stdout
        }
    }

    /// Writes one line. A failed stdout write (a closed pipe, say) is fatal
    /// to the run.
    pub fn line(&mut self, text: &str) -> VmResult<()> {
        match self {
            Output::Stdout => write_line(&mut std::io::stdout().lock(), text),
            Output::Captured(buffer) => {
                buffer.push_str(text);
                buffer.push('\n');
                Ok(())
            }
        }
    }

    pub fn captured(&self) -> Option<&str> {
        match self {
            Output::Stdout => None,
            Output::Captured(buffer) => Some(buffer),
        }
    }

    pub fn clear(&mut self) {
        if let Output::Captured(buffer) = self {
            buffer.clear();
        }
    }
}

pub fn constant_at(constants: &[Constant], index: i32) -> VmResult<&Constant> {
    usize::try_from(index)
        .ok()
        .and_then(|slot| constants.get(slot))
        .ok_or(VmError::InvalidConstant(index))
}

pub fn float_constant(constants: &[Constant], index: i32) -> VmResult<f32> {
    match constant_at(constants, index)? {
        Constant::Float(value) => Ok(*value),
        other => Err(VmError::TypeMismatch {
            expected: "float constant",
            found: other.kind_name(),
        }),
    }
}

pub fn string_constant(constants: &[Constant], index: i32) -> VmResult<String> {
    match constant_at(constants, index)? {
        Constant::Str(value) => Ok(value.clone()),
        other => Err(VmError::TypeMismatch {
            expected: "string constant",
            found: other.kind_name(),
        }),
    }
}

/// Resolves a `call` target. Stubs that never received a `.def` cannot run.
pub fn function_constant(constants: &[Constant], index: i32) -> VmResult<&FunctionSymbol> {
    let symbol = constant_at(constants, index)?
        .as_function()
        .ok_or(VmError::NotAFunction(index))?;
    if !symbol.declared {
        return Err(VmError::UnresolvedFunction(symbol.name.clone()));
    }
    Ok(symbol)
}

pub fn jump_target(target: i32) -> VmResult<usize> {
    usize::try_from(target).map_err(|_| VmError::InvalidJumpTarget(target))
}

pub fn global_slot(globals: &[Value], index: i32) -> VmResult<usize> {
    usize::try_from(index)
        .ok()
        .filter(|&slot| slot < globals.len())
        .ok_or(VmError::InvalidGlobal(index))
}

pub fn char_from_code(code: i32) -> VmResult<char> {
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .ok_or(VmError::InvalidChar(code))
}

fn write_line(writer: &mut impl std::io::Write, text: &str) -> VmResult<()> {
    writeln!(writer, "{text}").map_err(|error| {
        warn!(%error, "program output write failed");
        VmError::OutputFailed(error.to_string())
    })
}

/// Field count for `struct n`; negative counts and counts above `limit` are rejected.
pub fn struct_size(size: i32, limit: usize) -> VmResult<usize> {
    usize::try_from(size)
        .ok()
        .filter(|&fields| fields <= limit)
        .ok_or(VmError::InvalidStructSize(size))
}

/// Zeroed global segment, refusing sizes no program could have declared.
pub fn global_segment(data_size: usize) -> VmResult<Vec<Value>> {
    if data_size > MAX_DATA_SIZE {
        return Err(VmError::DataTooLarge(data_size));
    }
    Ok(vec![Value::Null; data_size])
}

pub fn load_field(target: &Value, field: i32) -> VmResult<Value> {
    let space = target.as_struct()?.borrow();
    usize::try_from(field)
        .ok()
        .and_then(|slot| space.get(slot))
        .cloned()
        .ok_or(VmError::InvalidField(field))
}

pub fn store_field(target: &Value, field: i32, value: Value) -> VmResult<()> {
    let mut space = target.as_struct()?.borrow_mut();
    let stored = usize::try_from(field)
        .map(|slot| space.set(slot, value))
        .unwrap_or(false);
    if stored {
        Ok(())
    } else {
        Err(VmError::InvalidField(field))
    }
}

/// Renders the "Constant pool / Data memory / Code memory" dump. Empty pool
/// and global sections are omitted.
pub fn render_core_dump(constants: &[Constant], globals: &[Value], code: &[u8]) -> String {
    let mut out = String::new();
    if !constants.is_empty() {
        out.push_str("Constant pool:\n");
        for (idx, constant) in constants.iter().enumerate() {
            match constant {
                Constant::Str(text) => {
                    let _ = writeln!(out, "{idx:04}: \"{text}\"");
                }
                other => {
                    let _ = writeln!(out, "{idx:04}: {other}");
                }
            }
        }
    }
    if !globals.is_empty() {
        out.push_str("Data memory:\n");
        for (idx, value) in globals.iter().enumerate() {
            if value.is_null() {
                let _ = writeln!(out, "{idx:04}: <null>");
            } else {
                let _ = writeln!(out, "{idx:04}: {value} <{}>", value.type_label());
            }
        }
    }
    out.push_str("Code memory:\n");
    for (row, chunk) in code.chunks(8).enumerate() {
        let _ = write!(out, "{:04}:", row * 8);
        for &byte in chunk {
            let _ = write!(out, " {:3}", byte as i8);
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::StructSpace;

    #[test]
    fn core_dump_omits_empty_sections() {
        let dump = render_core_dump(&[], &[], &[18, 0, 0, 0, 5, 27, 31]);
        assert!(!dump.contains("Constant pool:"));
        assert!(!dump.contains("Data memory:"));
        assert!(dump.contains("0000:  18   0   0   0   5  27  31\n"));
    }

    #[test]
    fn core_dump_lists_globals_with_kinds() {
        let globals = vec![Value::Int(7), Value::Null];
        let constants = vec![Constant::Str("hi".to_string())];
        let dump = render_core_dump(&constants, &globals, &[]);
        assert!(dump.contains("0000: \"hi\""));
        assert!(dump.contains("0000: 7 <Int>"));
        assert!(dump.contains("0001: <null>"));
    }

    #[test]
    fn field_access_checks_bounds() {
        let target = Value::Struct(StructSpace::shared(1));
        store_field(&target, 0, Value::Int(3)).expect("field 0 exists");
        assert_eq!(load_field(&target, 0), Ok(Value::Int(3)));
        assert_eq!(load_field(&target, 1), Err(VmError::InvalidField(1)));
        assert_eq!(
            store_field(&target, -1, Value::Null),
            Err(VmError::InvalidField(-1))
        );
    }

    #[test]
    fn stub_functions_cannot_be_called() {
        let constants = vec![Constant::Function(FunctionSymbol::stub("later"))];
        assert_eq!(
            function_constant(&constants, 0),
            Err(VmError::UnresolvedFunction("later".to_string()))
        );
        assert_eq!(
            function_constant(&constants, 3),
            Err(VmError::InvalidConstant(3))
        );
    }

    struct ClosedPipe;

    impl std::io::Write for ClosedPipe {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_output_write_is_an_error() {
        let err = write_line(&mut ClosedPipe, "lost").expect_err("pipe is closed");
        assert!(matches!(err, VmError::OutputFailed(_)));

        let mut sink = Vec::new();
        write_line(&mut sink, "kept").expect("vec accepts writes");
        assert_eq!(sink, b"kept\n");
    }

    #[test]
    fn struct_and_global_sizes_are_bounded() {
        assert_eq!(struct_size(4, 4), Ok(4));
        assert_eq!(struct_size(5, 4), Err(VmError::InvalidStructSize(5)));
        assert_eq!(struct_size(-1, 4), Err(VmError::InvalidStructSize(-1)));
        assert_eq!(
            global_segment(MAX_DATA_SIZE + 1),
            Err(VmError::DataTooLarge(MAX_DATA_SIZE + 1))
        );
        assert_eq!(global_segment(2).map(|globals| globals.len()), Ok(2));
    }
}
