use tracing::{debug, warn};

use crate::code::read_operand;
use crate::disasm::Disassembler;
use crate::engine::frame::StackFrame;
use crate::engine::runtime::{
    Flow, Operands, Output, VmError, VmFault, VmResult, char_from_code, float_constant,
    function_constant, global_segment, global_slot, jump_target, load_field, render_core_dump, store_field,
    string_constant, struct_size,
};
use crate::engine::{Engine, EngineConfig, VmStatus, render_call_chain};
use crate::isa::{MachineKind, OPERAND_WIDTH, STACK_INSTRUCTIONS, STACK_OPCODE_COUNT, stack_op};
use crate::program::{Constant, ProgramImage};
use crate::value::{StructSpace, Value};

type Handler = fn(&mut StackMachine, Operands) -> VmResult<Flow>;

/// Operand-stack engine. Intermediates, call arguments and return values all
/// live on one shared stack; frames only hold locals.
pub struct StackMachine {
    image: ProgramImage,
    config: EngineConfig,
    ip: usize,
    stack: Vec<Value>,
    frames: Vec<StackFrame>,
    globals: Vec<Value>,
    output: Output,
    steps: u64,
}

impl StackMachine {
    pub fn new(image: ProgramImage, config: EngineConfig) -> Self {
        let output = Output::new(config.capture_output);
        Self {
            image,
            config,
            ip: 0,
            stack: Vec::new(),
            frames: Vec::new(),
            globals: Vec::new(),
            output,
            steps: 0,
        }
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    fn reset(&mut self) -> VmResult<()> {
        let entry = self.image.entry_function();
        self.ip = entry.address as usize;
        self.stack.clear();
        self.frames.clear();
        self.output.clear();
        self.steps = 0;
        self.globals = global_segment(self.image.data_size)?;
        self.frames.push(StackFrame::new(entry, None)?);
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
            STACK_INSTRUCTIONS.lookup_by_opcode(opcode),
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
        Disassembler::new(&self.image.code, &self.image.constants, &STACK_INSTRUCTIONS)
    }

    fn push(&mut self, value: Value) -> VmResult<()> {
        if self.stack.len() >= self.config.operand_stack_size {
            return Err(VmError::StackOverflow(self.config.operand_stack_size));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> VmResult<Value> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    fn pop_int(&mut self) -> VmResult<i32> {
        self.pop()?.as_int()
    }

    fn pop_float(&mut self) -> VmResult<f32> {
        self.pop()?.as_float()
    }

    fn pop_condition(&mut self) -> VmResult<bool> {
        self.pop()?.as_condition()
    }

    fn frame(&self) -> VmResult<&StackFrame> {
        self.frames.last().ok_or(VmError::StackUnderflow)
    }

    fn frame_mut(&mut self) -> VmResult<&mut StackFrame> {
        self.frames.last_mut().ok_or(VmError::StackUnderflow)
    }

    fn int_op(&mut self, op: impl FnOnce(i32, i32) -> Value) -> VmResult<Flow> {
        let rhs = self.pop_int()?;
        let lhs = self.pop_int()?;
        self.push(op(lhs, rhs))?;
        Ok(Flow::Continue)
    }

    fn float_op(&mut self, op: impl FnOnce(f32, f32) -> Value) -> VmResult<Flow> {
        let rhs = self.pop_float()?;
        let lhs = self.pop_float()?;
        self.push(op(lhs, rhs))?;
        Ok(Flow::Continue)
    }
}

impl Engine for StackMachine {
    fn kind(&self) -> MachineKind {
        MachineKind::Stack
    }

    fn run(&mut self) -> Result<VmStatus, VmFault> {
        if let Err(error) = self.reset() {
            warn!(engine = "stack", %error, "cannot start run");
            return Err(self.fault(self.ip, error));
        }
        debug!(engine = "stack", entry = self.ip, "starting run");
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
                    warn!(engine = "stack", ip, %error, "runtime error");
                    return Err(self.fault(ip, error));
                }
            }
        }
    }

    fn trace_line(&self) -> String {
        let (instruction, _) = self.disassembler().instruction_at(self.ip);
        let stack = self
            .stack
            .iter()
            .map(Value::trace_repr)
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "{instruction:<35}stack=[ {stack} ]  {}",
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

static DISPATCH: [Option<Handler>; STACK_OPCODE_COUNT] = {
    let mut table: [Option<Handler>; STACK_OPCODE_COUNT] = [None; STACK_OPCODE_COUNT];
    table[stack_op::IADD as usize] = Some(op_iadd);
    table[stack_op::ISUB as usize] = Some(op_isub);
    table[stack_op::IMUL as usize] = Some(op_imul);
    table[stack_op::ILT as usize] = Some(op_ilt);
    table[stack_op::IEQ as usize] = Some(op_ieq);
    table[stack_op::FADD as usize] = Some(op_fadd);
    table[stack_op::FSUB as usize] = Some(op_fsub);
    table[stack_op::FMUL as usize] = Some(op_fmul);
    table[stack_op::FLT as usize] = Some(op_flt);
    table[stack_op::FEQ as usize] = Some(op_feq);
    table[stack_op::ITOF as usize] = Some(op_itof);
    table[stack_op::CALL as usize] = Some(op_call);
    table[stack_op::RET as usize] = Some(op_ret);
    table[stack_op::BR as usize] = Some(op_br);
    table[stack_op::BRT as usize] = Some(op_brt);
    table[stack_op::BRF as usize] = Some(op_brf);
    table[stack_op::CCONST as usize] = Some(op_cconst);
    table[stack_op::ICONST as usize] = Some(op_iconst);
    table[stack_op::FCONST as usize] = Some(op_fconst);
    table[stack_op::SCONST as usize] = Some(op_sconst);
    table[stack_op::LOAD as usize] = Some(op_load);
    table[stack_op::GLOAD as usize] = Some(op_gload);
    table[stack_op::FLOAD as usize] = Some(op_fload);
    table[stack_op::STORE as usize] = Some(op_store);
    table[stack_op::GSTORE as usize] = Some(op_gstore);
    table[stack_op::FSTORE as usize] = Some(op_fstore);
    table[stack_op::PRINT as usize] = Some(op_print);
    table[stack_op::STRUCT as usize] = Some(op_struct);
    table[stack_op::NULL as usize] = Some(op_null);
    table[stack_op::POP as usize] = Some(op_pop);
    table[stack_op::HALT as usize] = Some(op_halt);
    table
};

fn op_iadd(vm: &mut StackMachine, _: Operands) -> VmResult<Flow> {
    vm.int_op(|a, b| Value::Int(a.wrapping_add(b)))
}

fn op_isub(vm: &mut StackMachine, _: Operands) -> VmResult<Flow> {
    vm.int_op(|a, b| Value::Int(a.wrapping_sub(b)))
}

fn op_imul(vm: &mut StackMachine, _: Operands) -> VmResult<Flow> {
    vm.int_op(|a, b| Value::Int(a.wrapping_mul(b)))
}

fn op_ilt(vm: &mut StackMachine, _: Operands) -> VmResult<Flow> {
    vm.int_op(|a, b| Value::Bool(a < b))
}

fn op_ieq(vm: &mut StackMachine, _: Operands) -> VmResult<Flow> {
    vm.int_op(|a, b| Value::Bool(a == b))
}

fn op_fadd(vm: &mut StackMachine, _: Operands) -> VmResult<Flow> {
    vm.float_op(|a, b| Value::Float(a + b))
}

fn op_fsub(vm: &mut StackMachine, _: Operands) -> VmResult<Flow> {
    vm.float_op(|a, b| Value::Float(a - b))
}

fn op_fmul(vm: &mut StackMachine, _: Operands) -> VmResult<Flow> {
    vm.float_op(|a, b| Value::Float(a * b))
}

fn op_flt(vm: &mut StackMachine, _: Operands) -> VmResult<Flow> {
    vm.float_op(|a, b| Value::Bool(a < b))
}

fn op_feq(vm: &mut StackMachine, _: Operands) -> VmResult<Flow> {
    vm.float_op(|a, b| Value::Bool(a == b))
}

fn op_itof(vm: &mut StackMachine, _: Operands) -> VmResult<Flow> {
    let value = vm.pop_int()?;
    vm.push(Value::Float(value as f32))?;
    Ok(Flow::Continue)
}

fn op_call(vm: &mut StackMachine, [index, ..]: Operands) -> VmResult<Flow> {
    let function = function_constant(&vm.image.constants, index)?.clone();
    if vm.frames.len() >= vm.config.call_stack_size {
        return Err(VmError::CallStackOverflow(vm.config.call_stack_size));
    }
    let target = function.address as usize;
    let mut frame = StackFrame::new(function, Some(vm.ip))?;
    for slot in (0..frame.function.args as usize).rev() {
        frame.locals[slot] = vm.pop()?;
    }
    vm.frames.push(frame);
    vm.ip = target;
    Ok(Flow::Continue)
}

fn op_ret(vm: &mut StackMachine, _: Operands) -> VmResult<Flow> {
    let return_address = vm.frame()?.return_address;
    let Some(address) = return_address else {
        return Ok(Flow::Exit);
    };
    vm.frames.pop();
    vm.ip = address;
    Ok(Flow::Continue)
}

fn op_br(vm: &mut StackMachine, [target, ..]: Operands) -> VmResult<Flow> {
    vm.ip = jump_target(target)?;
    Ok(Flow::Continue)
}

fn op_brt(vm: &mut StackMachine, [target, ..]: Operands) -> VmResult<Flow> {
    if vm.pop_condition()? {
        vm.ip = jump_target(target)?;
    }
    Ok(Flow::Continue)
}

fn op_brf(vm: &mut StackMachine, [target, ..]: Operands) -> VmResult<Flow> {
    if !vm.pop_condition()? {
        vm.ip = jump_target(target)?;
    }
    Ok(Flow::Continue)
}

fn op_cconst(vm: &mut StackMachine, [code, ..]: Operands) -> VmResult<Flow> {
    vm.push(Value::Char(char_from_code(code)?))?;
    Ok(Flow::Continue)
}

fn op_iconst(vm: &mut StackMachine, [value, ..]: Operands) -> VmResult<Flow> {
    vm.push(Value::Int(value))?;
    Ok(Flow::Continue)
}

fn op_fconst(vm: &mut StackMachine, [index, ..]: Operands) -> VmResult<Flow> {
    let value = float_constant(&vm.image.constants, index)?;
    vm.push(Value::Float(value))?;
    Ok(Flow::Continue)
}

fn op_sconst(vm: &mut StackMachine, [index, ..]: Operands) -> VmResult<Flow> {
    let value = string_constant(&vm.image.constants, index)?;
    vm.push(Value::Str(value))?;
    Ok(Flow::Continue)
}

fn op_load(vm: &mut StackMachine, [index, ..]: Operands) -> VmResult<Flow> {
    let value = vm.frame()?.local(index)?.clone();
    vm.push(value)?;
    Ok(Flow::Continue)
}

fn op_store(vm: &mut StackMachine, [index, ..]: Operands) -> VmResult<Flow> {
    let value = vm.pop()?;
    *vm.frame_mut()?.local_mut(index)? = value;
    Ok(Flow::Continue)
}

fn op_gload(vm: &mut StackMachine, [index, ..]: Operands) -> VmResult<Flow> {
    let slot = global_slot(&vm.globals, index)?;
    let value = vm.globals[slot].clone();
    vm.push(value)?;
    Ok(Flow::Continue)
}

fn op_gstore(vm: &mut StackMachine, [index, ..]: Operands) -> VmResult<Flow> {
    let slot = global_slot(&vm.globals, index)?;
    let value = vm.pop()?;
    vm.globals[slot] = value;
    Ok(Flow::Continue)
}

fn op_fload(vm: &mut StackMachine, [field, ..]: Operands) -> VmResult<Flow> {
    let target = vm.pop()?;
    let value = load_field(&target, field)?;
    vm.push(value)?;
    Ok(Flow::Continue)
}

fn op_fstore(vm: &mut StackMachine, [field, ..]: Operands) -> VmResult<Flow> {
    let target = vm.pop()?;
    let value = vm.pop()?;
    store_field(&target, field, value)?;
    Ok(Flow::Continue)
}

fn op_print(vm: &mut StackMachine, _: Operands) -> VmResult<Flow> {
    let value = vm.pop()?;
    vm.output.line(&value.to_string())?;
    Ok(Flow::Continue)
}

fn op_struct(vm: &mut StackMachine, [size, ..]: Operands) -> VmResult<Flow> {
    let fields = struct_size(size, vm.config.max_struct_fields)?;
    vm.push(Value::Struct(StructSpace::shared(fields)))?;
    Ok(Flow::Continue)
}

fn op_null(vm: &mut StackMachine, _: Operands) -> VmResult<Flow> {
    vm.push(Value::Null)?;
    Ok(Flow::Continue)
}

fn op_pop(vm: &mut StackMachine, _: Operands) -> VmResult<Flow> {
    vm.pop()?;
    Ok(Flow::Continue)
}

fn op_halt(_: &mut StackMachine, _: Operands) -> VmResult<Flow> {
    Ok(Flow::Halt)
}
