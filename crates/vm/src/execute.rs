//! Instruction interpreter for the SCOM VM.

use scom_common::{
    reg, ArgKind, FixupKind, InstanceId, Instruction, NativeId, Opcode, Pointer, RuntimeValue,
    NUM_REGISTERS,
};
use tracing::trace;

use crate::error::{ArithmeticError, Fault, FaultContext, RuntimeError};
use crate::instance::{CallKind, Frame};
use crate::stack::SLOT_SIZE;

/// What to do after an instruction.
enum Flow {
    Next,
    Jump(usize),
    Return(RuntimeValue),
}

/// Decoded argument words. Register and literal arguments keep their raw
/// word; the single value argument of LITTOREG and WRITELIT is resolved.
struct Args {
    words: [i32; 3],
    value: RuntimeValue,
}

impl Args {
    fn reg(&self, i: usize) -> usize {
        self.words[i] as usize
    }

    fn lit(&self, i: usize) -> i32 {
        self.words[i]
    }
}

/// Resolved target of an external call.
enum Callee {
    Native(NativeId),
    Script(InstanceId, u32),
}

/// Instance state preserved across a nested invocation.
struct Saved {
    pc: usize,
    line: i32,
    registers: [RuntimeValue; NUM_REGISTERS],
    stack_len: usize,
    frames_len: usize,
    ext_len: usize,
    pending_receiver: Option<RuntimeValue>,
    arg_count: Option<usize>,
    call_depth: usize,
}

impl crate::machine::Runtime {
    /// Run the function at `address` in instance `id` to completion.
    ///
    /// Arguments are pushed last to first, followed by the zero return
    /// sentinel, and removed again when the call ends. Whether it returns
    /// or faults, the instance's registers, stacks, frames and position are
    /// put back as they were.
    pub(crate) fn invoke(
        &mut self,
        id: InstanceId,
        address: usize,
        args: &[RuntimeValue],
        receiver: Option<RuntimeValue>,
    ) -> Result<RuntimeValue, RuntimeError> {
        let call_depth = self.call_depth;
        let inst = self.instance_mut(id)?;
        let saved = Saved {
            pc: inst.pc,
            line: inst.line,
            registers: inst.registers,
            stack_len: inst.stack.len(),
            frames_len: inst.frames.len(),
            ext_len: inst.ext_stack.len(),
            pending_receiver: inst.pending_receiver.take(),
            arg_count: inst.arg_count.take(),
            call_depth,
        };
        if let Some(this) = receiver {
            inst.registers[reg::OP] = this;
        }

        let mut pushed = Ok(());
        for &arg in args.iter().rev().chain(std::iter::once(&RuntimeValue::Int(0))) {
            pushed = inst.stack.push(arg);
            if pushed.is_err() {
                break;
            }
        }
        let outcome = match pushed {
            Ok(()) => {
                inst.running += 1;
                let outcome = self.run(id, address);
                if let Ok(inst) = self.instance_mut(id) {
                    inst.running -= 1;
                }
                outcome
            }
            Err(fault) => Err(fault.into()),
        };

        self.call_depth = saved.call_depth;
        let inst = self.instance_mut(id)?;
        let dropped = inst.stack.truncate(saved.stack_len);
        inst.frames.truncate(saved.frames_len);
        inst.ext_stack.truncate(saved.ext_len);
        inst.registers = saved.registers;
        inst.pc = saved.pc;
        inst.line = saved.line;
        inst.pending_receiver = saved.pending_receiver;
        inst.arg_count = saved.arg_count;
        for handle in dropped {
            self.pool.release(handle);
        }
        outcome
    }

    fn run(&mut self, id: InstanceId, entry: usize) -> Result<RuntimeValue, RuntimeError> {
        let inst = self.instance_mut(id)?;
        let base = inst.frames.len();
        inst.frames.push(Frame {
            return_line: inst.line,
            height: inst.stack.len(),
            func_start: entry,
            this_base: 0,
            loop_check_off: false,
        });
        inst.pc = entry;
        self.enter_call()?;

        loop {
            let inst = self.instance(id)?;
            let pc = inst.pc;
            let instr = match inst.image.instruction_at(pc) {
                Ok(instr) => instr,
                Err(e) => {
                    let mut err = RuntimeError::from(Fault::Decode(e));
                    err.context = Some(self.context(id, pc, None));
                    return Err(err);
                }
            };
            match self.step(id, &instr, base) {
                Ok(Flow::Next) => self.instance_mut(id)?.pc = instr.next(),
                Ok(Flow::Jump(target)) => self.instance_mut(id)?.pc = target,
                Ok(Flow::Return(value)) => return Ok(value),
                Err(mut err) => {
                    if err.context.is_none() {
                        err.context = Some(self.context(id, pc, Some(&instr)));
                    }
                    return Err(err);
                }
            }
        }
    }

    fn context(&self, id: InstanceId, pc: usize, instr: Option<&Instruction>) -> FaultContext {
        let inst = self.instance(id).ok();
        FaultContext {
            section: inst
                .and_then(|i| i.image.section_at(pc))
                .map(str::to_string),
            line: inst.map_or(0, |i| i.line),
            pc,
            opcode: instr.map_or("?", |i| i.opcode.mnemonic()),
            args: instr.map(describe_args).unwrap_or_default(),
        }
    }

    fn enter_call(&mut self) -> Result<(), Fault> {
        if self.call_depth >= self.config.max_call_depth {
            return Err(Fault::RecursionLimit {
                limit: self.config.max_call_depth,
            });
        }
        self.call_depth += 1;
        Ok(())
    }

    fn decode_args(&mut self, id: InstanceId, instr: &Instruction) -> Result<Args, Fault> {
        let mut args = Args {
            words: [0; 3],
            value: RuntimeValue::Invalid,
        };
        for (i, (operand, kind)) in instr.args().iter().zip(instr.opcode.args()).enumerate() {
            let param = i + 1;
            args.words[i] = operand.word;
            match kind {
                ArgKind::Reg => {
                    if operand.register().is_none() {
                        return Err(Fault::InvalidRegister {
                            param,
                            word: operand.word,
                        });
                    }
                }
                ArgKind::Lit => {
                    if operand.fixup.is_reference() {
                        return Err(Fault::UnexpectedFixup {
                            param,
                            kind: operand.fixup.name(),
                        });
                    }
                }
                ArgKind::Any => {
                    args.value = self.resolve_operand(id, param, operand.word, operand.fixup)?;
                }
            }
        }
        Ok(args)
    }

    /// The value a code word denotes under its fixup.
    fn resolve_operand(
        &mut self,
        id: InstanceId,
        param: usize,
        word: i32,
        fixup: FixupKind,
    ) -> Result<RuntimeValue, Fault> {
        Ok(match fixup {
            FixupKind::None => RuntimeValue::Int(word),
            FixupKind::GlobalData => RuntimeValue::GlobalPtr(Pointer::new(id, word)),
            FixupKind::Function => RuntimeValue::ScriptFunc {
                instance: id,
                address: word as u32,
            },
            FixupKind::String => RuntimeValue::StringLit(Pointer::new(id, word)),
            FixupKind::Stack => RuntimeValue::StackPtr(Pointer::new(id, word)),
            FixupKind::Import => self.import_value(id, word)?,
            FixupKind::DataData => {
                return Err(Fault::UnexpectedFixup {
                    param,
                    kind: fixup.name(),
                })
            }
        })
    }

    /// Resolve an import slot, binding it now if it was left unresolved
    /// at creation.
    fn import_value(&mut self, id: InstanceId, index: i32) -> Result<RuntimeValue, Fault> {
        let inst = self.instance(id)?;
        let slot = usize::try_from(index)
            .ok()
            .filter(|&i| i < inst.imports.len())
            .ok_or_else(|| Fault::UnresolvedImport {
                name: format!("#{index}"),
            })?;
        if let Some(target) = inst.imports[slot] {
            return Ok(target.value());
        }
        let name = &inst.image.imports()[slot];
        let target = self
            .registry
            .resolve(name)
            .ok_or_else(|| Fault::UnresolvedImport { name: name.clone() })?;
        trace!(import = %name, "late-bound import");
        self.instance_mut(id)?.imports[slot] = Some(target);
        Ok(target.value())
    }

    fn reg(&self, id: InstanceId, r: usize) -> Result<RuntimeValue, Fault> {
        let inst = self.instance(id)?;
        Ok(match r {
            reg::NULL => RuntimeValue::NULL,
            reg::SP => RuntimeValue::StackPtr(Pointer::new(id, inst.stack.height() as i32)),
            _ => inst.registers[r],
        })
    }

    fn set_reg(&mut self, id: InstanceId, r: usize, value: RuntimeValue) -> Result<(), Fault> {
        match r {
            reg::SP => Err(Fault::StackPointerWrite),
            reg::NULL => Ok(()),
            _ => {
                self.instance_mut(id)?.registers[r] = value;
                Ok(())
            }
        }
    }

    fn int_reg(&self, id: InstanceId, r: usize, param: usize) -> Result<i32, Fault> {
        let value = self.reg(id, r)?;
        value.as_int().ok_or(Fault::KindMismatch {
            param,
            expected: "int",
            found: value.kind_name(),
        })
    }

    fn float_reg(&self, id: InstanceId, r: usize, param: usize) -> Result<f32, Fault> {
        let value = self.reg(id, r)?;
        value.as_float().ok_or(Fault::KindMismatch {
            param,
            expected: "float",
            found: value.kind_name(),
        })
    }

    fn truth_reg(&self, id: InstanceId, r: usize, param: usize) -> Result<bool, Fault> {
        let value = self.reg(id, r)?;
        value.truthy().ok_or(Fault::KindMismatch {
            param,
            expected: "value",
            found: value.kind_name(),
        })
    }

    fn mar(&self, id: InstanceId) -> Result<RuntimeValue, Fault> {
        self.reg(id, reg::MAR)
    }

    fn frame_mut(&mut self, id: InstanceId) -> Result<&mut Frame, Fault> {
        self.instance_mut(id)?
            .frames
            .last_mut()
            .ok_or(Fault::StackUnderflow)
    }

    fn step(&mut self, id: InstanceId, instr: &Instruction, base: usize) -> Result<Flow, RuntimeError> {
        let a = self.decode_args(id, instr)?;
        match instr.opcode {
            // Register arithmetic with literals
            Opcode::Add => self.adjust(id, a.reg(0), a.lit(1) as i64)?,
            Opcode::Sub => self.adjust(id, a.reg(0), -(a.lit(1) as i64))?,
            Opcode::Mul => {
                let v = self.int_reg(id, a.reg(0), 1)?;
                self.set_reg(id, a.reg(0), RuntimeValue::Int(v.wrapping_mul(a.lit(1))))?;
            }
            Opcode::RegToReg => {
                let v = self.reg(id, a.reg(0))?;
                self.set_reg(id, a.reg(1), v)?;
            }
            Opcode::LitToReg => self.set_reg(id, a.reg(0), a.value)?,

            // Memory through MAR
            Opcode::WriteLit => {
                let mar = self.mar(id)?;
                match a.lit(0) {
                    4 => self.write_word(mar, a.value)?,
                    size @ (1 | 2) => {
                        let bits = a.value.scalar_bits().ok_or(Fault::KindMismatch {
                            param: 2,
                            expected: "scalar",
                            found: a.value.kind_name(),
                        })?;
                        self.write_narrow(mar, size as usize, bits as u32)?;
                    }
                    size => return Err(Fault::InvalidSize { size: size as i64 }.into()),
                }
            }
            Opcode::MemRead => {
                let v = self.read_word(self.mar(id)?)?;
                self.set_reg(id, a.reg(0), v)?;
            }
            Opcode::MemReadB => {
                let b = self.read_narrow(self.mar(id)?, 1)?;
                self.set_reg(id, a.reg(0), RuntimeValue::Int(b as i32))?;
            }
            Opcode::MemReadW => {
                let w = self.read_narrow(self.mar(id)?, 2)?;
                self.set_reg(id, a.reg(0), RuntimeValue::Int(w as u16 as i16 as i32))?;
            }
            Opcode::MemWrite => {
                let v = self.reg(id, a.reg(0))?;
                self.write_word(self.mar(id)?, v)?;
            }
            Opcode::MemWriteB | Opcode::MemWriteW => {
                let v = self.reg(id, a.reg(0))?;
                let bits = v.scalar_bits().ok_or(Fault::KindMismatch {
                    param: 1,
                    expected: "scalar",
                    found: v.kind_name(),
                })?;
                let size = if instr.opcode == Opcode::MemWriteB { 1 } else { 2 };
                self.write_narrow(self.mar(id)?, size, bits as u32)?;
            }
            Opcode::ZeroMemory => self.zero_memory(self.mar(id)?, a.lit(0))?,
            Opcode::LoadSpOffs => {
                let height = self.instance(id)?.stack.height();
                let offset = height as i64 - a.lit(0) as i64;
                if offset < 0 || offset > height as i64 {
                    return Err(Fault::OutOfBounds {
                        region: "stack",
                        offset,
                        len: height,
                    }
                    .into());
                }
                let sp = RuntimeValue::StackPtr(Pointer::new(id, offset as i32));
                self.set_reg(id, reg::MAR, sp)?;
            }

            // Object references through MAR
            Opcode::MemWritePtr => {
                let v = self.reg(id, a.reg(0))?;
                self.store_handle(self.mar(id)?, v, true)?;
            }
            Opcode::MemInitPtr => {
                let v = self.reg(id, a.reg(0))?;
                self.store_handle(self.mar(id)?, v, false)?;
            }
            Opcode::MemReadPtr => {
                let v = match self.read_handle(self.mar(id)?)? {
                    Some(handle) => RuntimeValue::Object { handle, offset: 0 },
                    None => RuntimeValue::NULL,
                };
                self.set_reg(id, a.reg(0), v)?;
            }
            Opcode::MemZeroPtr => self.clear_handle(self.mar(id)?, true)?,
            Opcode::MemZeroPtrNd => self.clear_handle(self.mar(id)?, false)?,

            // Integer register arithmetic
            Opcode::MulReg => self.int_op(id, &a, |x, y| Ok(x.wrapping_mul(y)))?,
            Opcode::DivReg => self.int_op(id, &a, |x, y| {
                if y == 0 {
                    return Err(ArithmeticError::DivisionByZero.into());
                }
                Ok(x.wrapping_div(y))
            })?,
            Opcode::ModReg => self.int_op(id, &a, |x, y| {
                if y == 0 {
                    return Err(ArithmeticError::DivisionByZero.into());
                }
                Ok(x.wrapping_rem(y))
            })?,
            Opcode::AddReg => self.add_sub_reg(id, &a, false)?,
            Opcode::SubReg => self.add_sub_reg(id, &a, true)?,
            Opcode::BitAnd => self.int_op(id, &a, |x, y| Ok(x & y))?,
            Opcode::BitOr => self.int_op(id, &a, |x, y| Ok(x | y))?,
            Opcode::XorReg => self.int_op(id, &a, |x, y| Ok(x ^ y))?,
            Opcode::ShiftLeft => self.int_op(id, &a, |x, y| Ok(x.wrapping_shl(y as u32)))?,
            Opcode::ShiftRight => self.int_op(id, &a, |x, y| Ok(x.wrapping_shr(y as u32)))?,

            // Comparisons and logic
            Opcode::IsEqual | Opcode::NotEqual => {
                let x = self.reg(id, a.reg(0))?;
                let y = self.reg(id, a.reg(1))?;
                for (param, v) in [(1, x), (2, y)] {
                    if v == RuntimeValue::Invalid {
                        return Err(Fault::KindMismatch {
                            param,
                            expected: "value",
                            found: v.kind_name(),
                        }
                        .into());
                    }
                }
                let equal = x.script_eq(&y);
                let result = equal == (instr.opcode == Opcode::IsEqual);
                self.set_reg(id, a.reg(0), RuntimeValue::Int(result as i32))?;
            }
            Opcode::Greater => self.int_op(id, &a, |x, y| Ok((x > y) as i32))?,
            Opcode::LessThan => self.int_op(id, &a, |x, y| Ok((x < y) as i32))?,
            Opcode::Gte => self.int_op(id, &a, |x, y| Ok((x >= y) as i32))?,
            Opcode::Lte => self.int_op(id, &a, |x, y| Ok((x <= y) as i32))?,
            Opcode::And | Opcode::Or => {
                let x = self.truth_reg(id, a.reg(0), 1)?;
                let y = self.truth_reg(id, a.reg(1), 2)?;
                let result = if instr.opcode == Opcode::And { x && y } else { x || y };
                self.set_reg(id, a.reg(0), RuntimeValue::Int(result as i32))?;
            }
            Opcode::NotReg => {
                let x = self.truth_reg(id, a.reg(0), 1)?;
                self.set_reg(id, a.reg(0), RuntimeValue::Int(!x as i32))?;
            }

            // Floats
            Opcode::FAdd | Opcode::FSub => {
                let x = self.float_reg(id, a.reg(0), 1)?;
                let y = a.lit(1) as f32;
                let result = if instr.opcode == Opcode::FAdd { x + y } else { x - y };
                self.set_reg(id, a.reg(0), RuntimeValue::Float(result))?;
            }
            Opcode::FMulReg => self.float_op(id, &a, |x, y| Ok(x * y))?,
            Opcode::FDivReg => self.float_op(id, &a, |x, y| {
                if y == 0.0 {
                    return Err(ArithmeticError::FloatDivisionByZero.into());
                }
                Ok(x / y)
            })?,
            Opcode::FAddReg => self.float_op(id, &a, |x, y| Ok(x + y))?,
            Opcode::FSubReg => self.float_op(id, &a, |x, y| Ok(x - y))?,
            Opcode::FGreater => self.float_cmp(id, &a, |x, y| x > y)?,
            Opcode::FLessThan => self.float_cmp(id, &a, |x, y| x < y)?,
            Opcode::FGte => self.float_cmp(id, &a, |x, y| x >= y)?,
            Opcode::FLte => self.float_cmp(id, &a, |x, y| x <= y)?,

            // Strings
            Opcode::CreateString => {
                let text = self
                    .read_string(self.reg(id, a.reg(0))?)?
                    .ok_or(Fault::NullPointer)?;
                let value = self.pool.new_string_value(text);
                self.set_reg(id, a.reg(0), value)?;
            }
            Opcode::StringsEqual | Opcode::StringsNotEq => {
                let x = self.read_string(self.reg(id, a.reg(0))?)?;
                let y = self.read_string(self.reg(id, a.reg(1))?)?;
                let result = (x == y) == (instr.opcode == Opcode::StringsEqual);
                self.set_reg(id, a.reg(0), RuntimeValue::Int(result as i32))?;
            }

            // Control flow
            Opcode::Jmp => return Ok(self.jump(id, instr, a.lit(0))?),
            Opcode::Jz | Opcode::Jnz => {
                let ax = self.reg(id, reg::AX)?;
                let truth = ax.truthy().ok_or(Fault::RegisterKind {
                    register: reg::NAMES[reg::AX],
                    expected: "value",
                    found: ax.kind_name(),
                })?;
                if truth == (instr.opcode == Opcode::Jnz) {
                    return Ok(self.jump(id, instr, a.lit(0))?);
                }
            }
            Opcode::Call => return Ok(self.call_local(id, instr, a.reg(0))?),
            Opcode::Ret => return Ok(self.ret(id, base)?),
            Opcode::PushReg => {
                let v = self.reg(id, a.reg(0))?;
                self.instance_mut(id)?.stack.push(v)?;
            }
            Opcode::PopReg => {
                let v = self.instance_mut(id)?.stack.pop()?;
                self.set_reg(id, a.reg(0), v)?;
            }
            Opcode::LineNum => self.instance_mut(id)?.line = a.lit(0),
            Opcode::ThisBase => self.frame_mut(id)?.this_base = a.lit(0),
            Opcode::LoopCheckOff => self.frame_mut(id)?.loop_check_off = true,

            // External calls
            Opcode::PushReal => {
                let v = self.reg(id, a.reg(0))?;
                let limit = self.config.max_external_args;
                let inst = self.instance_mut(id)?;
                if inst.ext_stack.len() >= limit {
                    return Err(Fault::ExternalStackOverflow { limit }.into());
                }
                inst.ext_stack.push(v);
            }
            Opcode::SubRealStack => {
                let n = a.lit(0);
                let inst = self.instance_mut(id)?;
                let count = usize::try_from(n).map_err(|_| Fault::InvalidSize { size: n as i64 })?;
                let available = inst.ext_stack.len();
                if count > available {
                    return Err(Fault::ExternalStackUnderflow {
                        requested: count,
                        available,
                    }
                    .into());
                }
                inst.ext_stack.truncate(available - count);
            }
            Opcode::NumFuncArgs => {
                let n = a.lit(0);
                let count = usize::try_from(n).map_err(|_| Fault::InvalidSize { size: n as i64 })?;
                self.instance_mut(id)?.arg_count = Some(count);
            }
            Opcode::CallObj => {
                let this = self.reg(id, a.reg(0))?;
                match this {
                    RuntimeValue::Int(0) => return Err(Fault::NullPointer.into()),
                    RuntimeValue::Object { .. } => {}
                    other => {
                        return Err(Fault::KindMismatch {
                            param: 1,
                            expected: "object",
                            found: other.kind_name(),
                        }
                        .into())
                    }
                }
                self.set_reg(id, reg::OP, this)?;
                self.instance_mut(id)?.pending_receiver = Some(this);
            }
            Opcode::CallExt => self.call_external(id, instr.at, a.reg(0), false)?,
            Opcode::CallAs => self.call_external(id, instr.at, a.reg(0), true)?,

            // Checks
            Opcode::CheckBounds => {
                let index = self.int_reg(id, a.reg(0), 1)?;
                let upper = a.lit(1);
                if index < 0 || index >= upper {
                    return Err(Fault::OutOfBounds {
                        region: "array index",
                        offset: index as i64,
                        len: upper.max(0) as usize,
                    }
                    .into());
                }
            }
            Opcode::CheckNull => {
                if self.mar(id)?.is_null() {
                    return Err(Fault::NullPointer.into());
                }
            }
            Opcode::CheckNullReg => {
                if self.reg(id, a.reg(0))?.is_null() {
                    return Err(Fault::NullPointer.into());
                }
            }
            Opcode::DynamicBounds => {
                let index = self.int_reg(id, a.reg(0), 1)?;
                let (handle, base_offset) = match self.mar(id)? {
                    RuntimeValue::Object { handle, offset } => (handle, offset),
                    RuntimeValue::Int(0) => return Err(Fault::NullPointer.into()),
                    other => {
                        return Err(Fault::RegisterKind {
                            register: reg::NAMES[reg::MAR],
                            expected: "object",
                            found: other.kind_name(),
                        }
                        .into())
                    }
                };
                let len = self.pool.region(handle)?.len();
                let at = base_offset as i64 + index as i64;
                if at < 0 || at >= len as i64 {
                    return Err(Fault::OutOfBounds {
                        region: "dynamic array",
                        offset: at,
                        len,
                    }
                    .into());
                }
            }

            // Allocation
            Opcode::NewArray => {
                let count = self.int_reg(id, a.reg(0), 1)?;
                let handle = self.pool.alloc_array(count, a.lit(1), a.lit(2) != 0)?;
                self.set_reg(id, a.reg(0), RuntimeValue::Object { handle, offset: 0 })?;
            }
            Opcode::NewUserObject => {
                let handle = self.pool.alloc_user(a.lit(1))?;
                self.set_reg(id, a.reg(0), RuntimeValue::Object { handle, offset: 0 })?;
            }
        }
        Ok(Flow::Next)
    }

    /// ADD and SUB: move the stack pointer, or add to an int or pointer.
    fn adjust(&mut self, id: InstanceId, r: usize, delta: i64) -> Result<(), Fault> {
        if r == reg::SP {
            let stack = &mut self.instance_mut(id)?.stack;
            let bytes = delta.unsigned_abs() as usize;
            if delta >= 0 {
                return stack.allocate(bytes);
            }
            // The value may still be live in a register; a sweep collects it.
            for handle in stack.free(bytes)? {
                self.pool.release_no_dispose(handle);
            }
            return Ok(());
        }
        let value = self.reg(id, r)?;
        let result = match value {
            RuntimeValue::Int(v) => RuntimeValue::Int(v.wrapping_add(delta as i32)),
            v if v.is_pointer() => {
                let delta = i32::try_from(delta).map_err(|_| Fault::PointerOverflow)?;
                v.offset_by(delta).ok_or(Fault::PointerOverflow)?
            }
            other => {
                return Err(Fault::KindMismatch {
                    param: 1,
                    expected: "int or pointer",
                    found: other.kind_name(),
                })
            }
        };
        self.set_reg(id, r, result)
    }

    fn int_op(
        &mut self,
        id: InstanceId,
        a: &Args,
        op: impl FnOnce(i32, i32) -> Result<i32, Fault>,
    ) -> Result<(), Fault> {
        let x = self.int_reg(id, a.reg(0), 1)?;
        let y = self.int_reg(id, a.reg(1), 2)?;
        self.set_reg(id, a.reg(0), RuntimeValue::Int(op(x, y)?))
    }

    fn float_op(
        &mut self,
        id: InstanceId,
        a: &Args,
        op: impl FnOnce(f32, f32) -> Result<f32, Fault>,
    ) -> Result<(), Fault> {
        let x = self.float_reg(id, a.reg(0), 1)?;
        let y = self.float_reg(id, a.reg(1), 2)?;
        self.set_reg(id, a.reg(0), RuntimeValue::Float(op(x, y)?))
    }

    fn float_cmp(
        &mut self,
        id: InstanceId,
        a: &Args,
        op: impl FnOnce(f32, f32) -> bool,
    ) -> Result<(), Fault> {
        let x = self.float_reg(id, a.reg(0), 1)?;
        let y = self.float_reg(id, a.reg(1), 2)?;
        self.set_reg(id, a.reg(0), RuntimeValue::Int(op(x, y) as i32))
    }

    /// ADDREG and SUBREG: ints, pointer plus or minus int, and the
    /// distance between two pointers into the same place.
    fn add_sub_reg(&mut self, id: InstanceId, a: &Args, subtract: bool) -> Result<(), Fault> {
        let x = self.reg(id, a.reg(0))?;
        let y = self.reg(id, a.reg(1))?;
        let result = match (x, y) {
            (RuntimeValue::Int(x), RuntimeValue::Int(y)) => RuntimeValue::Int(if subtract {
                x.wrapping_sub(y)
            } else {
                x.wrapping_add(y)
            }),
            (p, RuntimeValue::Int(d)) if p.is_pointer() => {
                let d = if subtract {
                    d.checked_neg().ok_or(Fault::PointerOverflow)?
                } else {
                    d
                };
                p.offset_by(d).ok_or(Fault::PointerOverflow)?
            }
            (RuntimeValue::Int(d), p) if p.is_pointer() && !subtract => {
                p.offset_by(d).ok_or(Fault::PointerOverflow)?
            }
            (p, q) if subtract && p.is_pointer() && q.is_pointer() => pointer_distance(p, q)?,
            (x, y) => {
                let (param, found) = if x.as_int().is_none() && !x.is_pointer() {
                    (1, x.kind_name())
                } else {
                    (2, y.kind_name())
                };
                return Err(Fault::KindMismatch {
                    param,
                    expected: "int or pointer",
                    found,
                });
            }
        };
        self.set_reg(id, a.reg(0), result)
    }

    /// Relative jump from the end of `instr`. Backward jumps count
    /// against the loop limit.
    fn jump(&mut self, id: InstanceId, instr: &Instruction, offset: i32) -> Result<Flow, Fault> {
        let target = instr.next() as i64 + offset as i64;
        let len = self.instance(id)?.image.code().len();
        if target < 0 || target >= len as i64 {
            return Err(Fault::InvalidJump { target });
        }
        let target = target as usize;
        if target <= instr.at {
            let checked = !self.frame_mut(id)?.loop_check_off;
            let limit = self.config.max_loop_iterations;
            if checked && limit > 0 {
                self.loop_count += 1;
                if self.loop_count > limit {
                    return Err(Fault::InfiniteLoop { limit });
                }
            }
        }
        Ok(Flow::Jump(target))
    }

    /// CALL: enter a function of the current instance.
    fn call_local(&mut self, id: InstanceId, instr: &Instruction, r: usize) -> Result<Flow, Fault> {
        let address = match self.reg(id, r)? {
            RuntimeValue::ScriptFunc { instance, address } if instance == id => address as i64,
            other => {
                return Err(Fault::KindMismatch {
                    param: 1,
                    expected: "local script function",
                    found: other.kind_name(),
                })
            }
        };
        let inst = self.instance_mut(id)?;
        let caller = inst.frames.last().copied().ok_or(Fault::StackUnderflow)?;
        let target = if caller.this_base != 0 {
            caller.func_start as i64 + (address - caller.this_base as i64)
        } else {
            address
        };
        if target < 0 || target >= inst.image.code().len() as i64 {
            return Err(Fault::InvalidJump { target });
        }
        inst.stack.push(RuntimeValue::Int(instr.next() as i32))?;
        let frame = Frame {
            return_line: inst.line,
            height: inst.stack.len(),
            func_start: target as usize,
            this_base: 0,
            loop_check_off: false,
        };
        inst.frames.push(frame);
        self.enter_call()?;
        Ok(Flow::Jump(target as usize))
    }

    fn ret(&mut self, id: InstanceId, base: usize) -> Result<Flow, Fault> {
        let inst = self.instance_mut(id)?;
        let frame = inst.frames.pop().ok_or(Fault::StackUnderflow)?;
        if inst.stack.len() != frame.height {
            return Err(Fault::StackCorruption {
                offset: inst.stack.height(),
                detail: "stack height differs from call entry",
            });
        }
        let address = inst.stack.pop()?;
        inst.line = frame.return_line;
        let ax = inst.registers[reg::AX];
        let code_len = inst.image.code().len();
        self.call_depth = self.call_depth.saturating_sub(1);

        let corrupt = Fault::StackCorruption {
            offset: frame.height.saturating_sub(1) * SLOT_SIZE,
            detail: "bad return address",
        };
        if self.instance(id)?.frames.len() <= base {
            return match address {
                RuntimeValue::Int(0) => Ok(Flow::Return(ax)),
                _ => Err(corrupt),
            };
        }
        match address {
            RuntimeValue::Int(target) if target > 0 && (target as usize) < code_len => {
                Ok(Flow::Jump(target as usize))
            }
            _ => Err(corrupt),
        }
    }

    /// CALLEXT and CALLAS: call a native or another script function with
    /// the top staged external arguments.
    fn call_external(
        &mut self,
        id: InstanceId,
        at: usize,
        r: usize,
        script_only: bool,
    ) -> Result<(), RuntimeError> {
        let callee = match self.reg(id, r)? {
            RuntimeValue::NativeFunc(native) if !script_only => Callee::Native(native),
            RuntimeValue::ScriptFunc { instance, address } => Callee::Script(instance, address),
            other => {
                return Err(Fault::KindMismatch {
                    param: 1,
                    expected: if script_only {
                        "script function"
                    } else {
                        "function"
                    },
                    found: other.kind_name(),
                }
                .into())
            }
        };
        let kind = match callee {
            Callee::Native(_) => CallKind::Native,
            Callee::Script(..) => CallKind::Script,
        };

        let inst = self.instance_mut(id)?;
        match inst.call_sites.get(&at) {
            Some(&cached) if cached == kind => {}
            cached => {
                trace!(pc = at, ?kind, previous = ?cached, "classified call site");
                inst.call_sites.insert(at, kind);
            }
        }

        let available = inst.ext_stack.len();
        let count = inst.arg_count.take().unwrap_or(available);
        if count > available {
            return Err(Fault::ExternalStackUnderflow {
                requested: count,
                available,
            }
            .into());
        }
        let args: Vec<RuntimeValue> = inst.ext_stack[available - count..]
            .iter()
            .rev()
            .copied()
            .collect();
        let receiver = inst.pending_receiver.take();

        let result = match callee {
            Callee::Native(native) => self.call_native(native, &args, receiver)?,
            Callee::Script(instance, address) => {
                trace!(caller = id.0, callee = instance.0, address, "script call");
                self.invoke(instance, address as usize, &args, receiver)?
            }
        };
        self.set_reg(id, reg::AX, result)?;
        Ok(())
    }
}

fn pointer_distance(p: RuntimeValue, q: RuntimeValue) -> Result<RuntimeValue, Fault> {
    let distance = match (p, q) {
        (RuntimeValue::StackPtr(a), RuntimeValue::StackPtr(b))
        | (RuntimeValue::GlobalPtr(a), RuntimeValue::GlobalPtr(b))
        | (RuntimeValue::StringLit(a), RuntimeValue::StringLit(b))
            if a.instance == b.instance =>
        {
            a.offset.checked_sub(b.offset)
        }
        (
            RuntimeValue::Object { handle: h1, offset: a },
            RuntimeValue::Object { handle: h2, offset: b },
        ) if h1 == h2 => a.checked_sub(b),
        _ => {
            return Err(Fault::KindMismatch {
                param: 2,
                expected: "pointer into the same place",
                found: q.kind_name(),
            })
        }
    };
    distance.map(RuntimeValue::Int).ok_or(Fault::PointerOverflow)
}

fn describe_args(instr: &Instruction) -> Vec<String> {
    instr
        .args()
        .iter()
        .zip(instr.opcode.args())
        .map(|(operand, kind)| match (kind, operand.register()) {
            (ArgKind::Reg, Some(r)) => reg::NAMES[r].to_string(),
            _ => operand.to_string(),
        })
        .collect()
}
