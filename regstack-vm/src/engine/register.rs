use tracing::{debug, warn};

use crate::code::read_operand;
use crate::disasm::Disassembler;
use crate::engine::frame::RegisterFrame;
use crate::engine::runtime::{
    Flow, Operands, Output, VmError, VmFault, VmResult, char_from_code, float_constant,
    function_constant, global_segment, global_slot, jump_target, load_field, render_core_dump, store_field,
    string_constant, struct_size,
};
use crate::engine::{Engine, EngineConfig, VmStatus, render_call_chain};
use crate::isa::{
    MachineKind, OPERAND_WIDTH, REGISTER_INSTRUCTIONS, REGISTER_OPCODE_COUNT, reg_op,
};
use crate::program::{Constant, FunctionSymbol, ProgramImage};
use crate::value::{StructSpace, Value};

type Handler = fn(&mut RegisterMachine, Operands) -> VmResult<Flow>;

/// Register-file engine: every frame owns `args + locals + 1` registers and
/// instructions name their sources and destination explicitly.
pub struct RegisterMachine {
    image: ProgramImage,
    config: EngineConfig,
    ip: usize,
    frames: Vec<RegisterFrame>,
    globals: Vec<Value>,
    output: Output,
    steps: u64,
}

impl RegisterMachine {
    pub fn new(image: ProgramImage, config: EngineConfig) -> Self {
        let output = Output::new(config.capture_output);
        Self {
            image,
            config,
            ip: 0,
            frames: Vec::new(),
            globals: Vec::new(),
            output,
            steps: 0,
        }
    }

    pub fn frames(&self) -> &[RegisterFrame] {
        &self.frames
    }

    /// Entry frame symbol. A synthesized `main` gets a register file wide
    /// enough for every register the code names.
    fn entry_function(&self) -> FunctionSymbol {
        match &self.image.main {
            Some(main) => main.clone(),
            None => {
                let locals = self.image.highest_register().unwrap_or(0);
                FunctionSymbol::new("main", 0, locals, 0)
            }
        }
    }

    fn reset(&mut self) -> VmResult<()> {
        let entry = self.entry_function();
        self.ip = entry.address as usize;
        self.frames.clear();
        self.output.clear();
        self.steps = 0;
        self.globals = global_segment(self.image.data_size)?;
        self.frames.push(RegisterFrame::new(entry, None)?);
        Ok(())
    }

    fn step(&mut self) -> VmResult<Flow> {
        if let Some(budget) = self.config.step_budget
            && self.steps >= budget
        {
            return Err(VmError::StepBudgetExhausted(budget));
        }

        let ip = self.ip;
        let opcode = self.image.code[ip];
        let (Some(def), Some(handler)) = (
            REGISTER_INSTRUCTIONS.lookup_by_opcode(opcode),
            DISPATCH.get(opcode as usize).copied().flatten(),
        ) else {
            return Err(VmError::InvalidOpcode(opcode));
        };

        if self.config.trace {
            let line = self.trace_line();
            self.output.line(&line)?;
        }

        let mut operands: Operands = [0; 3];
        for (slot, operand) in operands.iter_mut().take(def.arity()).enumerate() {
            *operand = read_operand(&self.image.code, ip + 1 + slot * OPERAND_WIDTH)
                .ok_or(VmError::BytecodeBounds)?;
        }

        self.ip = ip + def.encoded_len();
        self.steps += 1;
        handler(self, operands)
    }

    fn fault(&self, ip: usize, error: VmError) -> VmFault {
        let (instruction, _) = self.disassembler().instruction_at(ip);
        VmFault {
            ip,
            error,
            instruction,
        }
    }

    fn disassembler(&self) -> Disassembler<'_> {
        Disassembler::new(
            &self.image.code,
            &self.image.constants,
            &REGISTER_INSTRUCTIONS,
        )
    }

    fn frame(&self) -> VmResult<&RegisterFrame> {
        self.frames.last().ok_or(VmError::StackUnderflow)
    }

    fn frame_mut(&mut self) -> VmResult<&mut RegisterFrame> {
        self.frames.last_mut().ok_or(VmError::StackUnderflow)
    }

    fn get(&self, register: i32) -> VmResult<&Value> {
        self.frame()?.register(register)
    }

    fn set(&mut self, register: i32, value: Value) -> VmResult<()> {
        self.frame_mut()?.set(register, value)
    }

    fn int_op(
        &mut self,
        [a, b, dst]: Operands,
        op: impl FnOnce(i32, i32) -> Value,
    ) -> VmResult<Flow> {
        let lhs = self.get(a)?.as_int()?;
        let rhs = self.get(b)?.as_int()?;
        self.set(dst, op(lhs, rhs))?;
        Ok(Flow::Continue)
    }

    fn float_op(
        &mut self,
        [a, b, dst]: Operands,
        op: impl FnOnce(f32, f32) -> Value,
    ) -> VmResult<Flow> {
        let lhs = self.get(a)?.as_float()?;
        let rhs = self.get(b)?.as_float()?;
        self.set(dst, op(lhs, rhs))?;
        Ok(Flow::Continue)
    }
}

impl Engine for RegisterMachine {
    fn kind(&self) -> MachineKind {
        MachineKind::Register
    }

    fn run(&mut self) -> Result<VmStatus, VmFault> {
        if let Err(error) = self.reset() {
            warn!(engine = "register", %error, "cannot start run");
            return Err(self.fault(self.ip, error));
        }
        debug!(engine = "register", entry = self.ip, "starting run");
        loop {
            if self.ip >= self.image.code.len() {
                debug!(steps = self.steps, "ran past end of code");
                return Ok(VmStatus::EndOfCode);
            }
            let ip = self.ip;
            match self.step() {
                Ok(Flow::Continue) => {}
                Ok(Flow::Halt) => {
                    debug!(steps = self.steps, "halted");
                    return Ok(VmStatus::Halted);
                }
                Ok(Flow::Exit) => {
                    debug!(steps = self.steps, "returned from entry frame");
                    return Ok(VmStatus::Returned);
                }
                Err(error) => {
                    warn!(engine = "register", ip, %error, "runtime error");
                    return Err(self.fault(ip, error));
                }
            }
        }
    }

    fn trace_line(&self) -> String {
        let (instruction, _) = self.disassembler().instruction_at(self.ip);
        let registers = match self.frames.last() {
            Some(frame) => format!(
                "{}.registers={}",
                frame.function.name,
                frame.render_registers()
            ),
            None => "registers=[ ]".to_string(),
        };
        format!(
            "{instruction:<35}{registers}  {}",
            render_call_chain(&self.call_chain())
        )
    }

    fn disassemble(&self) -> String {
        self.disassembler().listing()
    }

    fn core_dump(&self) -> String {
        render_core_dump(&self.image.constants, &self.globals, &self.image.code)
    }

    fn globals(&self) -> &[Value] {
        &self.globals
    }

    fn constants(&self) -> &[Constant] {
        &self.image.constants
    }

    fn output(&self) -> &Output {
        &self.output
    }

    fn ip(&self) -> usize {
        self.ip
    }

    fn call_chain(&self) -> Vec<String> {
        self.frames
            .iter()
            .map(|frame| frame.function.name.clone())
            .collect()
    }

    fn steps(&self) -> u64 {
        self.steps
    }
}

static DISPATCH: [Option<Handler>; REGISTER_OPCODE_COUNT] = {
    let mut table: [Option<Handler>; REGISTER_OPCODE_COUNT] = [None; REGISTER_OPCODE_COUNT];
    table[reg_op::IADD as usize] = Some(op_iadd);
    table[reg_op::ISUB as usize] = Some(op_isub);
    table[reg_op::IMUL as usize] = Some(op_imul);
    table[reg_op::ILT as usize] = Some(op_ilt);
    table[reg_op::IEQ as usize] = Some(op_ieq);
    table[reg_op::FADD as usize] = Some(op_fadd);
    table[reg_op::FSUB as usize] = Some(op_fsub);
    table[reg_op::FMUL as usize] = Some(op_fmul);
    table[reg_op::FLT as usize] = Some(op_flt);
    table[reg_op::FEQ as usize] = Some(op_feq);
    table[reg_op::ITOF as usize] = Some(op_itof);
    table[reg_op::CALL as usize] = Some(op_call);
    table[reg_op::RET as usize] = Some(op_ret);
    table[reg_op::BR as usize] = Some(op_br);
    table[reg_op::BRT as usize] = Some(op_brt);
    table[reg_op::BRF as usize] = Some(op_brf);
    table[reg_op::CCONST as usize] = Some(op_cconst);
    table[reg_op::ICONST as usize] = Some(op_iconst);
    table[reg_op::FCONST as usize] = Some(op_fconst);
    table[reg_op::SCONST as usize] = Some(op_sconst);
    table[reg_op::GLOAD as usize] = Some(op_gload);
    table[reg_op::GSTORE as usize] = Some(op_gstore);
    table[reg_op::FLOAD as usize] = Some(op_fload);
    table[reg_op::FSTORE as usize] = Some(op_fstore);
    table[reg_op::MOVE as usize] = Some(op_move);
    table[reg_op::PRINT as usize] = Some(op_print);
    table[reg_op::STRUCT as usize] = Some(op_struct);
    table[reg_op::NULL as usize] = Some(op_null);
    table[reg_op::HALT as usize] = Some(op_halt);
    table
};

fn op_iadd(vm: &mut RegisterMachine, operands: Operands) -> VmResult<Flow> {
    vm.int_op(operands, |a, b| Value::Int(a.wrapping_add(b)))
}

fn op_isub(vm: &mut RegisterMachine, operands: Operands) -> VmResult<Flow> {
    vm.int_op(operands, |a, b| Value::Int(a.wrapping_sub(b)))
}

fn op_imul(vm: &mut RegisterMachine, operands: Operands) -> VmResult<Flow> {
    vm.int_op(operands, |a, b| Value::Int(a.wrapping_mul(b)))
}

fn op_ilt(vm: &mut RegisterMachine, operands: Operands) -> VmResult<Flow> {
    vm.int_op(operands, |a, b| Value::Bool(a < b))
}

fn op_ieq(vm: &mut RegisterMachine, operands: Operands) -> VmResult<Flow> {
    vm.int_op(operands, |a, b| Value::Bool(a == b))
}

fn op_fadd(vm: &mut RegisterMachine, operands: Operands) -> VmResult<Flow> {
    vm.float_op(operands, |a, b| Value::Float(a + b))
}

fn op_fsub(vm: &mut RegisterMachine, operands: Operands) -> VmResult<Flow> {
    vm.float_op(operands, |a, b| Value::Float(a - b))
}

fn op_fmul(vm: &mut RegisterMachine, operands: Operands) -> VmResult<Flow> {
    vm.float_op(operands, |a, b| Value::Float(a * b))
}

fn op_flt(vm: &mut RegisterMachine, operands: Operands) -> VmResult<Flow> {
    vm.float_op(operands, |a, b| Value::Bool(a < b))
}

fn op_feq(vm: &mut RegisterMachine, operands: Operands) -> VmResult<Flow> {
    vm.float_op(operands, |a, b| Value::Bool(a == b))
}

fn op_itof(vm: &mut RegisterMachine, [src, dst, _]: Operands) -> VmResult<Flow> {
    let value = vm.get(src)?.as_int()?;
    vm.set(dst, Value::Float(value as f32))?;
    Ok(Flow::Continue)
}

/// `call f(), rB`: the caller's `rB..rB+args` become the callee's `r1..`.
fn op_call(vm: &mut RegisterMachine, [index, base, _]: Operands) -> VmResult<Flow> {
    let function = function_constant(&vm.image.constants, index)?.clone();
    if vm.frames.len() >= vm.config.call_stack_size {
        return Err(VmError::CallStackOverflow(vm.config.call_stack_size));
    }
    let target = function.address as usize;
    let args = function.args as usize;
    let mut frame = RegisterFrame::new(function, Some(vm.ip))?;
    {
        let caller = vm.frame()?;
        for offset in 0..args {
            let register = base
                .checked_add(offset as i32)
                .ok_or(VmError::InvalidRegister(base))?;
            frame.registers[offset + 1] = caller.register(register)?.clone();
        }
    }
    vm.frames.push(frame);
    vm.ip = target;
    Ok(Flow::Continue)
}

fn op_ret(vm: &mut RegisterMachine, _: Operands) -> VmResult<Flow> {
    let return_address = vm.frame()?.return_address;
    let Some(address) = return_address else {
        return Ok(Flow::Exit);
    };
    let callee = vm.frames.pop().ok_or(VmError::StackUnderflow)?;
    let result = callee.registers.into_iter().next().unwrap_or_default();
    vm.set(0, result)?;
    vm.ip = address;
    Ok(Flow::Continue)
}

fn op_br(vm: &mut RegisterMachine, [target, ..]: Operands) -> VmResult<Flow> {
    vm.ip = jump_target(target)?;
    Ok(Flow::Continue)
}

fn op_brt(vm: &mut RegisterMachine, [register, target, _]: Operands) -> VmResult<Flow> {
    if vm.get(register)?.as_condition()? {
        vm.ip = jump_target(target)?;
    }
    Ok(Flow::Continue)
}

fn op_brf(vm: &mut RegisterMachine, [register, target, _]: Operands) -> VmResult<Flow> {
    if !vm.get(register)?.as_condition()? {
        vm.ip = jump_target(target)?;
    }
    Ok(Flow::Continue)
}

fn op_cconst(vm: &mut RegisterMachine, [dst, code, _]: Operands) -> VmResult<Flow> {
    vm.set(dst, Value::Char(char_from_code(code)?))?;
    Ok(Flow::Continue)
}

fn op_iconst(vm: &mut RegisterMachine, [dst, value, _]: Operands) -> VmResult<Flow> {
    vm.set(dst, Value::Int(value))?;
    Ok(Flow::Continue)
}

fn op_fconst(vm: &mut RegisterMachine, [dst, index, _]: Operands) -> VmResult<Flow> {
    let value = float_constant(&vm.image.constants, index)?;
    vm.set(dst, Value::Float(value))?;
    Ok(Flow::Continue)
}

fn op_sconst(vm: &mut RegisterMachine, [dst, index, _]: Operands) -> VmResult<Flow> {
    let value = string_constant(&vm.image.constants, index)?;
    vm.set(dst, Value::Str(value))?;
    Ok(Flow::Continue)
}

fn op_gload(vm: &mut RegisterMachine, [dst, index, _]: Operands) -> VmResult<Flow> {
    let slot = global_slot(&vm.globals, index)?;
    let value = vm.globals[slot].clone();
    vm.set(dst, value)?;
    Ok(Flow::Continue)
}

fn op_gstore(vm: &mut RegisterMachine, [src, index, _]: Operands) -> VmResult<Flow> {
    let slot = global_slot(&vm.globals, index)?;
    let value = vm.get(src)?.clone();
    vm.globals[slot] = value;
    Ok(Flow::Continue)
}

fn op_fload(vm: &mut RegisterMachine, [dst, target, field]: Operands) -> VmResult<Flow> {
    let value = load_field(vm.get(target)?, field)?;
    vm.set(dst, value)?;
    Ok(Flow::Continue)
}

fn op_fstore(vm: &mut RegisterMachine, [src, target, field]: Operands) -> VmResult<Flow> {
    let value = vm.get(src)?.clone();
    store_field(vm.get(target)?, field, value)?;
    Ok(Flow::Continue)
}

fn op_move(vm: &mut RegisterMachine, [src, dst, _]: Operands) -> VmResult<Flow> {
    let value = vm.get(src)?.clone();
    vm.set(dst, value)?;
    Ok(Flow::Continue)
}

fn op_print(vm: &mut RegisterMachine, [src, ..]: Operands) -> VmResult<Flow> {
    let text = vm.get(src)?.to_string();
    vm.output.line(&text)?;
    Ok(Flow::Continue)
}

fn op_struct(vm: &mut RegisterMachine, [dst, size, _]: Operands) -> VmResult<Flow> {
    let fields = struct_size(size, vm.config.max_struct_fields)?;
    vm.set(dst, Value::Struct(StructSpace::shared(fields)))?;
    Ok(Flow::Continue)
}

fn op_null(vm: &mut RegisterMachine, [dst, ..]: Operands) -> VmResult<Flow> {
    vm.set(dst, Value::Null)?;
    Ok(Flow::Continue)
}

fn op_halt(_: &mut RegisterMachine, _: Operands) -> VmResult<Flow> {
    Ok(Flow::Halt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(constants: Vec<Constant>, main: FunctionSymbol) -> RegisterMachine {
        let mut image = ProgramImage::new(MachineKind::Register, Vec::new(), constants);
        image.main = Some(main);
        let mut vm = RegisterMachine::new(image, EngineConfig::captured());
        vm.reset().expect("reset");
        vm
    }

    fn registers(vm: &RegisterMachine) -> Vec<Value> {
        vm.frames.last().expect("active frame").registers.clone()
    }

    #[test]
    fn every_register_opcode_has_a_handler() {
        for (opcode, def) in REGISTER_INSTRUCTIONS.iter() {
            assert!(
                DISPATCH[opcode as usize].is_some(),
                "missing handler for {}",
                def.mnemonic
            );
        }
    }

    #[test]
    fn binary_ops_write_destination() {
        let mut vm = machine(Vec::new(), FunctionSymbol::new("main", 0, 3, 0));
        op_iconst(&mut vm, [1, 6, 0]).expect("iconst");
        op_iconst(&mut vm, [2, 7, 0]).expect("iconst");
        op_imul(&mut vm, [1, 2, 3]).expect("imul");
        op_ilt(&mut vm, [2, 1, 0]).expect("ilt");
        assert_eq!(
            registers(&vm),
            vec![Value::Bool(false), Value::Int(6), Value::Int(7), Value::Int(42)]
        );
    }

    #[test]
    fn register_bounds_are_checked() {
        let mut vm = machine(Vec::new(), FunctionSymbol::new("main", 0, 1, 0));
        assert_eq!(
            op_iconst(&mut vm, [2, 1, 0]),
            Err(VmError::InvalidRegister(2))
        );
        assert_eq!(
            op_move(&mut vm, [-1, 0, 0]),
            Err(VmError::InvalidRegister(-1))
        );
    }

    #[test]
    fn call_copies_arguments_and_ret_copies_result() {
        let callee = FunctionSymbol::new("twice", 1, 0, 30);
        let mut vm = machine(
            vec![Constant::Function(callee)],
            FunctionSymbol::new("main", 0, 2, 0),
        );
        op_iconst(&mut vm, [2, 21, 0]).expect("iconst");
        vm.ip = 12;
        op_call(&mut vm, [0, 2, 0]).expect("call");
        assert_eq!(vm.ip, 30);
        assert_eq!(registers(&vm), vec![Value::Null, Value::Int(21)]);

        op_iadd(&mut vm, [1, 1, 0]).expect("iadd");
        op_ret(&mut vm, [0; 3]).expect("ret");
        assert_eq!(vm.ip, 12);
        assert_eq!(registers(&vm)[0], Value::Int(42));
        assert_eq!(vm.call_chain(), vec!["main".to_string()]);
    }

    #[test]
    fn call_with_arguments_past_caller_registers_fails() {
        let callee = FunctionSymbol::new("f", 2, 0, 30);
        let mut vm = machine(
            vec![Constant::Function(callee)],
            FunctionSymbol::new("main", 0, 1, 0),
        );
        assert_eq!(
            op_call(&mut vm, [0, 1, 0]),
            Err(VmError::InvalidRegister(2))
        );
    }

    #[test]
    fn call_depth_is_bounded() {
        let callee = FunctionSymbol::new("f", 0, 0, 0);
        let image = ProgramImage::new(
            MachineKind::Register,
            Vec::new(),
            vec![Constant::Function(callee)],
        );
        let config = EngineConfig {
            call_stack_size: 2,
            ..EngineConfig::captured()
        };
        let mut vm = RegisterMachine::new(image, config);
        vm.reset().expect("reset");
        op_call(&mut vm, [0, 0, 0]).expect("second frame fits");
        assert_eq!(
            op_call(&mut vm, [0, 0, 0]),
            Err(VmError::CallStackOverflow(2))
        );
    }

    #[test]
    fn sconst_rejects_function_constants() {
        let mut vm = machine(
            vec![Constant::Function(FunctionSymbol::new("f", 0, 0, 0))],
            FunctionSymbol::new("main", 0, 1, 0),
        );
        let err = op_sconst(&mut vm, [1, 0, 0]).expect_err("function constant");
        assert_eq!(
            err,
            VmError::TypeMismatch {
                expected: "string constant",
                found: "function"
            }
        );
    }
}
