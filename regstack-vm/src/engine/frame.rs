use crate::engine::runtime::{VmError, VmResult};
use crate::program::{FunctionSymbol, MAX_FRAME_SLOTS};
use crate::value::Value;

fn checked_slots(function: &FunctionSymbol, extra: usize) -> VmResult<usize> {
    let slots = function.slot_count() + extra;
    if slots > MAX_FRAME_SLOTS + extra {
        return Err(VmError::FrameTooLarge {
            function: function.name.clone(),
            slots,
        });
    }
    Ok(slots)
}

/// Activation record of the stack machine: `args + locals` flat slots.
#[derive(Clone, Debug)]
pub struct StackFrame {
    pub function: FunctionSymbol,
    /// None for the outermost frame.
    pub return_address: Option<usize>,
    pub locals: Vec<Value>,
}

impl StackFrame {
    pub fn new(function: FunctionSymbol, return_address: Option<usize>) -> VmResult<Self> {
        let locals = vec![Value::Null; checked_slots(&function, 0)?];
        Ok(Self {
            function,
            return_address,
            locals,
        })
    }

    pub fn local(&self, index: i32) -> VmResult<&Value> {
        usize::try_from(index)
            .ok()
            .and_then(|slot| self.locals.get(slot))
            .ok_or(VmError::InvalidLocal(index))
    }

    pub fn local_mut(&mut self, index: i32) -> VmResult<&mut Value> {
        usize::try_from(index)
            .ok()
            .and_then(|slot| self.locals.get_mut(slot))
            .ok_or(VmError::InvalidLocal(index))
    }
}

/// Activation record of the register machine. `r0` holds the return value,
/// `r1..=args` the arguments, then the locals.
#[derive(Clone, Debug)]
pub struct RegisterFrame {
    pub function: FunctionSymbol,
    pub return_address: Option<usize>,
    pub registers: Vec<Value>,
}

impl RegisterFrame {
    pub fn new(function: FunctionSymbol, return_address: Option<usize>) -> VmResult<Self> {
        let registers = vec![Value::Null; checked_slots(&function, 1)?];
        Ok(Self {
            function,
            return_address,
            registers,
        })
    }

    pub fn register(&self, index: i32) -> VmResult<&Value> {
        usize::try_from(index)
            .ok()
            .and_then(|slot| self.registers.get(slot))
            .ok_or(VmError::InvalidRegister(index))
    }

    pub fn register_mut(&mut self, index: i32) -> VmResult<&mut Value> {
        usize::try_from(index)
            .ok()
            .and_then(|slot| self.registers.get_mut(slot))
            .ok_or(VmError::InvalidRegister(index))
    }

    pub fn set(&mut self, index: i32, value: Value) -> VmResult<()> {
        *self.register_mut(index)? = value;
        Ok(())
    }

    /// `[ r0 | args | locals ]` with `?` for empty slots. Without arguments
    /// the two bars collapse into `||`; a missing section drops its bar.
    pub fn render_registers(&self) -> String {
        let first_local = self.function.args as usize + 1;
        let mut out = String::from("[");
        for (idx, value) in self.registers.iter().enumerate() {
            if idx == 1 {
                out.push_str(" |");
            }
            if idx == first_local {
                out.push_str(if idx == 1 { "|" } else { " |" });
            }
            out.push(' ');
            out.push_str(&value.trace_repr());
        }
        out.push_str(" ]");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_rendering_separates_args_and_locals() {
        let mut frame =
            RegisterFrame::new(FunctionSymbol::new("f", 1, 1, 0), None).expect("small frame");
        frame.set(1, Value::Int(4)).expect("r1 exists");
        assert_eq!(frame.render_registers(), "[ ? | 4 | ? ]");
    }

    #[test]
    fn register_rendering_without_args() {
        let frame =
            RegisterFrame::new(FunctionSymbol::new("main", 0, 1, 0), None).expect("small frame");
        assert_eq!(frame.render_registers(), "[ ? || ? ]");
        let bare =
            RegisterFrame::new(FunctionSymbol::new("main", 0, 0, 0), None).expect("small frame");
        assert_eq!(bare.render_registers(), "[ ? ]");
    }

    #[test]
    fn out_of_range_slots_are_errors() {
        let mut frame =
            StackFrame::new(FunctionSymbol::new("f", 1, 0, 0), Some(9)).expect("small frame");
        assert!(frame.local(0).is_ok());
        assert_eq!(frame.local(1).err(), Some(VmError::InvalidLocal(1)));
        assert_eq!(frame.local_mut(-2).err(), Some(VmError::InvalidLocal(-2)));
    }

    #[test]
    fn oversized_frames_are_refused() {
        let huge = FunctionSymbol::new("big", 1, u32::MAX - 1, 0);
        assert_eq!(
            RegisterFrame::new(huge.clone(), None).err(),
            Some(VmError::FrameTooLarge {
                function: "big".to_string(),
                slots: u32::MAX as usize + 1,
            })
        );
        assert!(StackFrame::new(huge, None).is_err());
        let widest = FunctionSymbol::new("ok", 0, MAX_FRAME_SLOTS as u32, 0);
        assert_eq!(
            RegisterFrame::new(widest, None).map(|frame| frame.registers.len()),
            Ok(MAX_FRAME_SLOTS + 1)
        );
    }
}
