use std::fmt;

use tracing::trace;

use crate::sim::memory::BinaryMemory;
use crate::sim::operation::{Branch, BranchKind, Operation};
use crate::sim::types::{Value, U32, U8};
use crate::sim::SimError;

const SP: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DelayState {
    Idle,
    Pending(u32),
}

/// One disassembled instruction, produced only when disassembly is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disassembly {
    pub pc: u32,
    pub code: u16,
    pub mnemonic: &'static str,
    pub operands: Vec<String>,
    pub in_delay_slot: bool,
}

impl fmt::Display for Disassembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = if self.in_delay_slot { "_" } else { " " };
        write!(f, "{:08x} {:04x} {slot}{:<8}", self.pc, self.code, self.mnemonic)?;
        if !self.operands.is_empty() {
            write!(f, " {}", self.operands.join(","))?;
        }
        Ok(())
    }
}

/// SH4 integer and single-precision FPU subset.
///
/// `step` executes exactly one instruction. Delayed branches are held back
/// until the following (delay slot) instruction has executed.
pub struct Simulator {
    memory: BinaryMemory,
    registers: [U32; 16],
    float_registers: [f32; 16],
    pc: u32,
    pr: u32,
    t: bool,
    macl: u32,
    fpul: u32,
    delay: DelayState,
    instruction_pc: u32,
    in_delay_slot: bool,
    disassemble: bool,
    disassembly: Option<Disassembly>,
}

impl fmt::Debug for Simulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulator")
            .field("pc", &format_args!("{:#010x}", self.pc))
            .field("pr", &format_args!("{:#010x}", self.pr))
            .field("t", &self.t)
            .field("registers", &self.registers)
            .finish_non_exhaustive()
    }
}

fn rn(code: u16) -> usize {
    usize::from((code >> 8) & 0xf)
}

fn rm(code: u16) -> usize {
    usize::from((code >> 4) & 0xf)
}

fn imm8(code: u16) -> U8 {
    U8::new((code & 0xff) as u8)
}

fn disp4(code: u16) -> u32 {
    u32::from(code & 0xf)
}

fn disp8(code: u16) -> u32 {
    u32::from(code & 0xff)
}

fn sdisp8(code: u16) -> i32 {
    i32::from((code & 0xff) as u8 as i8)
}

fn sdisp12(code: u16) -> i32 {
    let v = i32::from(code & 0xfff);
    if v & 0x800 != 0 {
        v - 0x1000
    } else {
        v
    }
}

fn r(i: usize) -> String {
    format!("R{i}")
}

fn fr(i: usize) -> String {
    format!("FR{i}")
}

fn imm(v: U8) -> String {
    format!("#{}", v.signed())
}

fn hex(v: u32) -> String {
    format!("H'{v:08x}")
}

impl Simulator {
    #[must_use]
    pub fn new(memory: BinaryMemory) -> Self {
        let top = u32::try_from(memory.size()).unwrap_or(u32::MAX);
        let mut registers = [U32::ZERO; 16];
        registers[SP] = U32::new(top.wrapping_sub(4));
        Self {
            memory,
            registers,
            float_registers: [0.0; 16],
            pc: 0,
            pr: 0,
            t: false,
            macl: 0,
            fpul: 0,
            delay: DelayState::Idle,
            instruction_pc: 0,
            in_delay_slot: false,
            disassemble: false,
            disassembly: None,
        }
    }

    pub fn set_disassemble(&mut self, enabled: bool) {
        self.disassemble = enabled;
    }

    /// Disassembly of the last executed instruction, if enabled.
    pub fn take_disassembly(&mut self) -> Option<Disassembly> {
        self.disassembly.take()
    }

    #[must_use]
    pub fn memory(&self) -> &BinaryMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut BinaryMemory {
        &mut self.memory
    }

    #[must_use]
    pub fn register(&self, n: usize) -> U32 {
        self.registers[n & 0xf]
    }

    pub fn set_register(&mut self, n: usize, value: U32) {
        trace!(register = n & 0xf, value = %value.readable(), "set register");
        self.registers[n & 0xf] = value;
    }

    #[must_use]
    pub fn float_register(&self, n: usize) -> f32 {
        self.float_registers[n & 0xf]
    }

    pub fn set_float_register(&mut self, n: usize, value: f32) {
        trace!(register = n & 0xf, value, "set float register");
        self.float_registers[n & 0xf] = value;
    }

    #[must_use]
    pub fn sp(&self) -> u32 {
        self.registers[SP].value()
    }

    #[must_use]
    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.pc = pc;
    }

    #[must_use]
    pub fn pr(&self) -> u32 {
        self.pr
    }

    pub fn set_pr(&mut self, pr: u32) {
        self.pr = pr;
    }

    #[must_use]
    pub fn t(&self) -> bool {
        self.t
    }

    #[must_use]
    pub fn macl(&self) -> u32 {
        self.macl
    }

    #[must_use]
    pub fn fpul(&self) -> u32 {
        self.fpul
    }

    /// Address of the instruction executed by the last `step`.
    #[must_use]
    pub fn instruction_pc(&self) -> u32 {
        self.instruction_pc
    }

    #[must_use]
    pub fn in_delay_slot(&self) -> bool {
        self.in_delay_slot
    }

    /// True when the next `step` executes a delay slot.
    #[must_use]
    pub fn has_pending_branch(&self) -> bool {
        self.delay != DelayState::Idle
    }

    pub fn cancel_delayed_branch(&mut self) {
        self.delay = DelayState::Idle;
    }

    /// Fetches, decodes and executes one instruction.
    ///
    /// # Errors
    /// Unknown opcodes and out-of-bounds accesses are fatal.
    pub fn step(&mut self) -> Result<Operation, SimError> {
        let address = self.pc;
        let code = self.memory.read_u16(address)?.value();
        self.instruction_pc = address;
        self.pc = address.wrapping_add(2);
        self.disassembly = None;

        let delayed = std::mem::replace(&mut self.delay, DelayState::Idle);
        self.in_delay_slot = delayed != DelayState::Idle;
        let result = self.execute(code);
        if let DelayState::Pending(target) = delayed {
            self.pc = target;
        }
        self.in_delay_slot = false;
        result
    }

    fn disasm(&mut self, code: u16, mnemonic: &'static str, operands: impl FnOnce() -> Vec<String>) {
        if self.disassemble {
            self.disassembly = Some(Disassembly {
                pc: self.instruction_pc,
                code,
                mnemonic,
                operands: operands(),
                in_delay_slot: self.in_delay_slot,
            });
        }
    }

    /// `instr + 4 + disp * 2`, with `pc` already past the instruction.
    fn branch_target(&self, disp: i32) -> u32 {
        self.pc.wrapping_add(2).wrapping_add_signed(disp * 2)
    }

    fn store(&mut self, target: u32, value: Value) -> Operation {
        match value {
            Value::U8(v) => self.memory.write_u8(target, v),
            Value::U16(v) => self.memory.write_u16(target, v),
            Value::U32(v) => self.memory.write_u32(target, v),
        }
        Operation::Write { target, value }
    }

    fn load8(&mut self, n: usize, source: u32) -> Result<Operation, SimError> {
        let value = self.memory.read_u8(source)?;
        self.set_register(n, value.extend32());
        Ok(Operation::Read {
            source,
            value: Value::U8(value),
        })
    }

    fn load16(&mut self, n: usize, source: u32) -> Result<Operation, SimError> {
        let value = self.memory.read_u16(source)?;
        self.set_register(n, value.extend32());
        Ok(Operation::Read {
            source,
            value: Value::U16(value),
        })
    }

    fn load32(&mut self, n: usize, source: u32) -> Result<Operation, SimError> {
        let value = self.memory.read_u32(source)?;
        self.set_register(n, value);
        Ok(Operation::Read {
            source,
            value: Value::U32(value),
        })
    }

    fn load_float(&mut self, n: usize, source: u32) -> Result<Operation, SimError> {
        let bits = self.memory.read_u32(source)?;
        self.set_float_register(n, f32::from_bits(bits.value()));
        Ok(Operation::Read {
            source,
            value: Value::U32(bits),
        })
    }

    fn store_float(&mut self, m: usize, target: u32) -> Operation {
        let bits = U32::new(self.float_register(m).to_bits());
        self.store(target, Value::U32(bits))
    }

    fn delayed(&mut self, code: u16, kind: BranchKind, target: u32) -> Operation {
        self.delay = DelayState::Pending(target);
        Operation::Branch(Branch {
            opcode: code,
            kind,
            target,
        })
    }

    fn execute(&mut self, code: u16) -> Result<Operation, SimError> {
        match code {
            0x0009 => {
                self.disasm(code, "NOP", Vec::new);
                return Ok(Operation::Generic);
            }
            0x000b => {
                self.disasm(code, "RTS", Vec::new);
                let target = self.pr;
                return Ok(self.delayed(code, BranchKind::Rts, target));
            }
            _ => {}
        }

        if let Some(op) = self.execute_f000(code)? {
            return Ok(op);
        }
        if let Some(op) = self.execute_f00f(code)? {
            return Ok(op);
        }
        if let Some(op) = self.execute_ff00(code)? {
            return Ok(op);
        }
        if let Some(op) = self.execute_f0ff(code)? {
            return Ok(op);
        }
        if let Some(op) = self.execute_branch(code)? {
            return Ok(op);
        }

        Err(SimError::UnknownInstruction {
            code,
            pc: self.instruction_pc,
        })
    }

    fn execute_f000(&mut self, code: u16) -> Result<Option<Operation>, SimError> {
        let (n, m) = (rn(code), rm(code));
        let op = match code & 0xf000 {
            // MOV.L Rm,@(disp,Rn)
            0x1000 => {
                let disp = disp4(code) * 4;
                self.disasm(code, "MOV.L", || vec![r(m), format!("@({disp},R{n})")]);
                let target = self.register(n).value().wrapping_add(disp);
                self.store(target, Value::U32(self.register(m)))
            }
            // MOV.L @(disp,Rm),Rn
            0x5000 => {
                let disp = disp4(code) * 4;
                self.disasm(code, "MOV.L", || vec![format!("@({disp},R{m})"), r(n)]);
                let source = self.register(m).value().wrapping_add(disp);
                self.load32(n, source)?
            }
            // ADD #imm,Rn
            0x7000 => {
                let value = imm8(code);
                self.disasm(code, "ADD", || vec![imm(value), r(n)]);
                self.set_register(n, self.register(n).add(value.extend32()));
                Operation::Generic
            }
            // MOV.W @(disp,PC),Rn
            0x9000 => {
                let source = self.pc.wrapping_add(2).wrapping_add(disp8(code) * 2);
                self.disasm(code, "MOV.W", || vec![format!("@({},PC)", disp8(code) * 2), r(n)]);
                self.load16(n, source)?
            }
            // MOV #imm,Rn
            0xe000 => {
                let value = imm8(code);
                self.disasm(code, "MOV", || vec![imm(value), r(n)]);
                self.set_register(n, value.extend32());
                Operation::Generic
            }
            _ => return Ok(None),
        };
        Ok(Some(op))
    }

    #[allow(clippy::too_many_lines)]
    fn execute_f00f(&mut self, code: u16) -> Result<Option<Operation>, SimError> {
        let (n, m) = (rn(code), rm(code));
        let op = match code & 0xf00f {
            // MOV.x Rm,@(R0,Rn)
            0x0004 => {
                self.disasm(code, "MOV.B", || vec![r(m), format!("@(R0,R{n})")]);
                let target = self.register(n).add(self.register(0)).value();
                self.store(target, Value::U8(self.register(m).trunc8()))
            }
            0x0005 => {
                self.disasm(code, "MOV.W", || vec![r(m), format!("@(R0,R{n})")]);
                let target = self.register(n).add(self.register(0)).value();
                self.store(target, Value::U16(self.register(m).trunc16()))
            }
            0x0006 => {
                self.disasm(code, "MOV.L", || vec![r(m), format!("@(R0,R{n})")]);
                let target = self.register(n).add(self.register(0)).value();
                self.store(target, Value::U32(self.register(m)))
            }
            // MUL.L Rm,Rn
            0x0007 => {
                self.disasm(code, "MUL.L", || vec![r(m), r(n)]);
                self.macl = self.register(n).mul(self.register(m)).value();
                trace!(macl = self.macl, "MUL.L");
                Operation::Generic
            }
            // MOV.x @(R0,Rm),Rn
            0x000c => {
                self.disasm(code, "MOV.B", || vec![format!("@(R0,R{m})"), r(n)]);
                let source = self.register(0).add(self.register(m)).value();
                self.load8(n, source)?
            }
            0x000d => {
                self.disasm(code, "MOV.W", || vec![format!("@(R0,R{m})"), r(n)]);
                let source = self.register(0).add(self.register(m)).value();
                self.load16(n, source)?
            }
            0x000e => {
                self.disasm(code, "MOV.L", || vec![format!("@(R0,R{m})"), r(n)]);
                let source = self.register(0).add(self.register(m)).value();
                self.load32(n, source)?
            }
            // MOV.x Rm,@Rn
            0x2000 => {
                self.disasm(code, "MOV.B", || vec![r(m), format!("@R{n}")]);
                let target = self.register(n).value();
                self.store(target, Value::U8(self.register(m).trunc8()))
            }
            0x2001 => {
                self.disasm(code, "MOV.W", || vec![r(m), format!("@R{n}")]);
                let target = self.register(n).value();
                self.store(target, Value::U16(self.register(m).trunc16()))
            }
            0x2002 => {
                self.disasm(code, "MOV.L", || vec![r(m), format!("@R{n}")]);
                let target = self.register(n).value();
                self.store(target, Value::U32(self.register(m)))
            }
            // MOV.x Rm,@-Rn
            0x2004 => {
                self.disasm(code, "MOV.B", || vec![r(m), format!("@-R{n}")]);
                let value = Value::U8(self.register(m).trunc8());
                let target = self.register(n).value().wrapping_sub(1);
                self.set_register(n, U32::new(target));
                self.store(target, value)
            }
            0x2005 => {
                self.disasm(code, "MOV.W", || vec![r(m), format!("@-R{n}")]);
                let value = Value::U16(self.register(m).trunc16());
                let target = self.register(n).value().wrapping_sub(2);
                self.set_register(n, U32::new(target));
                self.store(target, value)
            }
            0x2006 => {
                self.disasm(code, "MOV.L", || vec![r(m), format!("@-R{n}")]);
                let value = Value::U32(self.register(m));
                let target = self.register(n).value().wrapping_sub(4);
                self.set_register(n, U32::new(target));
                self.store(target, value)
            }
            // TST Rm,Rn
            0x2008 => {
                self.disasm(code, "TST", || vec![r(m), r(n)]);
                self.t = self.register(n).band(self.register(m)) == U32::ZERO;
                Operation::Generic
            }
            0x2009 => {
                self.disasm(code, "AND", || vec![r(m), r(n)]);
                self.set_register(n, self.register(n).band(self.register(m)));
                Operation::Generic
            }
            0x200a => {
                self.disasm(code, "XOR", || vec![r(m), r(n)]);
                self.set_register(n, self.register(n).bxor(self.register(m)));
                Operation::Generic
            }
            0x200b => {
                self.disasm(code, "OR", || vec![r(m), r(n)]);
                self.set_register(n, self.register(n).bor(self.register(m)));
                Operation::Generic
            }
            // CMP/EQ Rm,Rn
            0x3000 => {
                self.disasm(code, "CMP/EQ", || vec![r(m), r(n)]);
                self.t = self.register(n) == self.register(m);
                Operation::Generic
            }
            // CMP/HS Rm,Rn (unsigned >=)
            0x3002 => {
                self.disasm(code, "CMP/HS", || vec![r(m), r(n)]);
                self.t = self.register(n) >= self.register(m);
                Operation::Generic
            }
            // CMP/GE Rm,Rn (signed >=)
            0x3003 => {
                self.disasm(code, "CMP/GE", || vec![r(m), r(n)]);
                self.t = self.register(n).signed_ge(self.register(m));
                Operation::Generic
            }
            // CMP/HI Rm,Rn (unsigned >)
            0x3006 => {
                self.disasm(code, "CMP/HI", || vec![r(m), r(n)]);
                self.t = self.register(n) > self.register(m);
                Operation::Generic
            }
            // CMP/GT Rm,Rn (signed >)
            0x3007 => {
                self.disasm(code, "CMP/GT", || vec![r(m), r(n)]);
                self.t = self.register(n).signed_gt(self.register(m));
                Operation::Generic
            }
            0x3008 => {
                self.disasm(code, "SUB", || vec![r(m), r(n)]);
                self.set_register(n, self.register(n).sub(self.register(m)));
                Operation::Generic
            }
            0x300c => {
                self.disasm(code, "ADD", || vec![r(m), r(n)]);
                self.set_register(n, self.register(n).add(self.register(m)));
                Operation::Generic
            }
            // ADDC Rm,Rn: T receives the carry.
            0x300e => {
                self.disasm(code, "ADDC", || vec![r(m), r(n)]);
                let before = self.register(n);
                let partial = before.add(self.register(m));
                let result = partial.add(U32::new(u32::from(self.t)));
                self.set_register(n, result);
                self.t = before > partial || partial > result;
                Operation::Generic
            }
            // SHAD Rm,Rn
            0x400c => {
                self.disasm(code, "SHAD", || vec![r(m), r(n)]);
                let shift = self.register(m).value();
                let value = self.register(n);
                let result = if shift & 0x8000_0000 == 0 {
                    value.shl(shift & 0x1f)
                } else if shift & 0x1f == 0 {
                    U32::new((value.signed() >> 31) as u32)
                } else {
                    let amount = (!shift & 0x1f) + 1;
                    U32::new((value.signed() >> amount) as u32)
                };
                self.set_register(n, result);
                Operation::Generic
            }
            // SHLD Rm,Rn
            0x400d => {
                self.disasm(code, "SHLD", || vec![r(m), r(n)]);
                let shift = self.register(m).value();
                let value = self.register(n);
                let result = if shift & 0x8000_0000 == 0 {
                    value.shl(shift & 0x1f)
                } else if shift & 0x1f == 0 {
                    U32::ZERO
                } else {
                    value.shr((!shift & 0x1f) + 1)
                };
                self.set_register(n, result);
                Operation::Generic
            }
            // MOV.x @Rm,Rn
            0x6000 => {
                self.disasm(code, "MOV.B", || vec![format!("@R{m}"), r(n)]);
                let source = self.register(m).value();
                self.load8(n, source)?
            }
            0x6001 => {
                self.disasm(code, "MOV.W", || vec![format!("@R{m}"), r(n)]);
                let source = self.register(m).value();
                self.load16(n, source)?
            }
            0x6002 => {
                self.disasm(code, "MOV.L", || vec![format!("@R{m}"), r(n)]);
                let source = self.register(m).value();
                self.load32(n, source)?
            }
            0x6003 => {
                self.disasm(code, "MOV", || vec![r(m), r(n)]);
                self.set_register(n, self.register(m));
                Operation::Generic
            }
            // MOV.x @Rm+,Rn
            0x6004 => {
                self.disasm(code, "MOV.B", || vec![format!("@R{m}+"), r(n)]);
                let source = self.register(m).value();
                let op = self.load8(n, source)?;
                if n != m {
                    self.set_register(m, U32::new(source.wrapping_add(1)));
                }
                op
            }
            0x6005 => {
                self.disasm(code, "MOV.W", || vec![format!("@R{m}+"), r(n)]);
                let source = self.register(m).value();
                let op = self.load16(n, source)?;
                if n != m {
                    self.set_register(m, U32::new(source.wrapping_add(2)));
                }
                op
            }
            0x6006 => {
                self.disasm(code, "MOV.L", || vec![format!("@R{m}+"), r(n)]);
                let source = self.register(m).value();
                let op = self.load32(n, source)?;
                if n != m {
                    self.set_register(m, U32::new(source.wrapping_add(4)));
                }
                op
            }
            0x6007 => {
                self.disasm(code, "NOT", || vec![r(m), r(n)]);
                self.set_register(n, self.register(m).not());
                Operation::Generic
            }
            0x600b => {
                self.disasm(code, "NEG", || vec![r(m), r(n)]);
                self.set_register(n, self.register(m).neg());
                Operation::Generic
            }
            0x600c => {
                self.disasm(code, "EXTU.B", || vec![r(m), r(n)]);
                self.set_register(n, self.register(m).trunc8().u32());
                Operation::Generic
            }
            0x600d => {
                self.disasm(code, "EXTU.W", || vec![r(m), r(n)]);
                self.set_register(n, self.register(m).trunc16().u32());
                Operation::Generic
            }
            0x600e => {
                self.disasm(code, "EXTS.B", || vec![r(m), r(n)]);
                self.set_register(n, self.register(m).trunc8().extend32());
                Operation::Generic
            }
            0x600f => {
                self.disasm(code, "EXTS.W", || vec![r(m), r(n)]);
                self.set_register(n, self.register(m).trunc16().extend32());
                Operation::Generic
            }
            0xf000 => {
                self.disasm(code, "FADD", || vec![fr(m), fr(n)]);
                self.set_float_register(n, self.float_register(n) + self.float_register(m));
                Operation::Generic
            }
            0xf001 => {
                self.disasm(code, "FSUB", || vec![fr(m), fr(n)]);
                self.set_float_register(n, self.float_register(n) - self.float_register(m));
                Operation::Generic
            }
            0xf002 => {
                self.disasm(code, "FMUL", || vec![fr(m), fr(n)]);
                self.set_float_register(n, self.float_register(n) * self.float_register(m));
                Operation::Generic
            }
            0xf003 => {
                self.disasm(code, "FDIV", || vec![fr(m), fr(n)]);
                self.set_float_register(n, self.float_register(n) / self.float_register(m));
                Operation::Generic
            }
            0xf004 => {
                self.disasm(code, "FCMP/EQ", || vec![fr(m), fr(n)]);
                self.t = self.float_register(n) == self.float_register(m);
                Operation::Generic
            }
            0xf005 => {
                self.disasm(code, "FCMP/GT", || vec![fr(m), fr(n)]);
                self.t = self.float_register(n) > self.float_register(m);
                Operation::Generic
            }
            // FMOV.S @(R0,Rm),FRn
            0xf006 => {
                self.disasm(code, "FMOV.S", || vec![format!("@(R0,R{m})"), fr(n)]);
                let source = self.register(m).add(self.register(0)).value();
                self.load_float(n, source)?
            }
            // FMOV.S FRm,@(R0,Rn)
            0xf007 => {
                self.disasm(code, "FMOV.S", || vec![fr(m), format!("@(R0,R{n})")]);
                let target = self.register(n).add(self.register(0)).value();
                self.store_float(m, target)
            }
            0xf008 => {
                self.disasm(code, "FMOV.S", || vec![format!("@R{m}"), fr(n)]);
                let source = self.register(m).value();
                self.load_float(n, source)?
            }
            0xf009 => {
                self.disasm(code, "FMOV.S", || vec![format!("@R{m}+"), fr(n)]);
                let source = self.register(m).value();
                let op = self.load_float(n, source)?;
                self.set_register(m, U32::new(source.wrapping_add(4)));
                op
            }
            0xf00a => {
                self.disasm(code, "FMOV.S", || vec![fr(m), format!("@R{n}")]);
                let target = self.register(n).value();
                self.store_float(m, target)
            }
            0xf00b => {
                self.disasm(code, "FMOV.S", || vec![fr(m), format!("@-R{n}")]);
                let target = self.register(n).value().wrapping_sub(4);
                self.set_register(n, U32::new(target));
                self.store_float(m, target)
            }
            0xf00c => {
                self.disasm(code, "FMOV", || vec![fr(m), fr(n)]);
                self.set_float_register(n, self.float_register(m));
                Operation::Generic
            }
            // FMAC FR0,FRm,FRn
            0xf00e => {
                self.disasm(code, "FMAC", || vec![fr(0), fr(m), fr(n)]);
                let result = self
                    .float_register(0)
                    .mul_add(self.float_register(m), self.float_register(n));
                self.set_float_register(n, result);
                Operation::Generic
            }
            _ => return Ok(None),
        };
        Ok(Some(op))
    }

    fn execute_ff00(&mut self, code: u16) -> Result<Option<Operation>, SimError> {
        // The register operand of the 0x8x00 forms lives in bits 4..8.
        let m = rm(code);
        let op = match code & 0xff00 {
            // MOV.B R0,@(disp,Rn)
            0x8000 => {
                let disp = disp4(code);
                self.disasm(code, "MOV.B", || vec![r(0), format!("@({disp},R{m})")]);
                let target = self.register(m).value().wrapping_add(disp);
                self.store(target, Value::U8(self.register(0).trunc8()))
            }
            // MOV.W R0,@(disp,Rn)
            0x8100 => {
                let disp = disp4(code) * 2;
                self.disasm(code, "MOV.W", || vec![r(0), format!("@({disp},R{m})")]);
                let target = self.register(m).value().wrapping_add(disp);
                self.store(target, Value::U16(self.register(0).trunc16()))
            }
            // MOV.B @(disp,Rm),R0
            0x8400 => {
                let disp = disp4(code);
                self.disasm(code, "MOV.B", || vec![format!("@({disp},R{m})"), r(0)]);
                let source = self.register(m).value().wrapping_add(disp);
                self.load8(0, source)?
            }
            // MOV.W @(disp,Rm),R0
            0x8500 => {
                let disp = disp4(code) * 2;
                self.disasm(code, "MOV.W", || vec![format!("@({disp},R{m})"), r(0)]);
                let source = self.register(m).value().wrapping_add(disp);
                self.load16(0, source)?
            }
            // CMP/EQ #imm,R0
            0x8800 => {
                let value = imm8(code);
                self.disasm(code, "CMP/EQ", || vec![imm(value), r(0)]);
                self.t = self.register(0) == value.extend32();
                Operation::Generic
            }
            0x8900 | 0x8b00 => {
                let target = self.branch_target(sdisp8(code));
                let on_true = code & 0xff00 == 0x8900;
                self.disasm(code, if on_true { "BT" } else { "BF" }, || vec![hex(target)]);
                let taken = self.t == on_true;
                if taken {
                    self.pc = target;
                }
                Operation::ControlFlow { target, taken }
            }
            0x8d00 | 0x8f00 => {
                let target = self.branch_target(sdisp8(code));
                let on_true = code & 0xff00 == 0x8d00;
                self.disasm(code, if on_true { "BT/S" } else { "BF/S" }, || vec![hex(target)]);
                let taken = self.t == on_true;
                if taken {
                    self.delay = DelayState::Pending(target);
                }
                Operation::ControlFlow { target, taken }
            }
            // MOVA @(disp,PC),R0
            0xc700 => {
                let address = (self.pc.wrapping_add(2) & !3).wrapping_add(disp8(code) * 4);
                self.disasm(code, "MOVA", || vec![hex(address), r(0)]);
                self.set_register(0, U32::new(address));
                Operation::Generic
            }
            // TST #imm,R0
            0xc800 => {
                let value = imm8(code);
                self.disasm(code, "TST", || vec![format!("#{}", value.value()), r(0)]);
                self.t = self.register(0).band(value.u32()) == U32::ZERO;
                Operation::Generic
            }
            0xc900 => {
                let value = imm8(code);
                self.disasm(code, "AND", || vec![format!("#{}", value.value()), r(0)]);
                self.set_register(0, self.register(0).band(value.u32()));
                Operation::Generic
            }
            0xca00 => {
                let value = imm8(code);
                self.disasm(code, "XOR", || vec![format!("#{}", value.value()), r(0)]);
                self.set_register(0, self.register(0).bxor(value.u32()));
                Operation::Generic
            }
            0xcb00 => {
                let value = imm8(code);
                self.disasm(code, "OR", || vec![format!("#{}", value.value()), r(0)]);
                self.set_register(0, self.register(0).bor(value.u32()));
                Operation::Generic
            }
            _ => return Ok(None),
        };
        Ok(Some(op))
    }

    #[allow(clippy::too_many_lines)]
    fn execute_f0ff(&mut self, code: u16) -> Result<Option<Operation>, SimError> {
        let n = rn(code);
        let op = match code & 0xf0ff {
            0x001a => {
                self.disasm(code, "STS", || vec!["MACL".into(), r(n)]);
                self.set_register(n, U32::new(self.macl));
                Operation::Generic
            }
            // BRAF Rn
            0x0023 => {
                let target = self.register(n).value().wrapping_add(self.pc).wrapping_add(2);
                self.disasm(code, "BRAF", || vec![r(n)]);
                self.delay = DelayState::Pending(target);
                Operation::ControlFlow {
                    target,
                    taken: true,
                }
            }
            0x0029 => {
                self.disasm(code, "MOVT", || vec![r(n)]);
                self.set_register(n, U32::new(u32::from(self.t)));
                Operation::Generic
            }
            0x002a => {
                self.disasm(code, "STS", || vec!["PR".into(), r(n)]);
                self.set_register(n, U32::new(self.pr));
                Operation::Generic
            }
            0x005a => {
                self.disasm(code, "STS", || vec!["FPUL".into(), r(n)]);
                self.set_register(n, U32::new(self.fpul));
                Operation::Generic
            }
            0x4000 => {
                self.disasm(code, "SHLL", || vec![r(n)]);
                let value = self.register(n);
                self.t = value.value() & 0x8000_0000 != 0;
                self.set_register(n, value.shl(1));
                Operation::Generic
            }
            0x4001 => {
                self.disasm(code, "SHLR", || vec![r(n)]);
                let value = self.register(n);
                self.t = value.value() & 1 != 0;
                self.set_register(n, value.shr(1));
                Operation::Generic
            }
            0x4008 => self.shift(code, "SHLL2", n, 2, true),
            0x4009 => self.shift(code, "SHLR2", n, 2, false),
            0x4018 => self.shift(code, "SHLL8", n, 8, true),
            0x4019 => self.shift(code, "SHLR8", n, 8, false),
            0x4028 => self.shift(code, "SHLL16", n, 16, true),
            0x4029 => self.shift(code, "SHLR16", n, 16, false),
            // JSR @Rn
            0x400b => {
                let target = self.register(n).value();
                self.disasm(code, "JSR", || vec![format!("@R{n}")]);
                self.pr = self.pc.wrapping_add(2);
                self.delayed(code, BranchKind::Jsr, target)
            }
            // DT Rn
            0x4010 => {
                self.disasm(code, "DT", || vec![r(n)]);
                let value = self.register(n).sub(U32::new(1));
                self.set_register(n, value);
                self.t = value == U32::ZERO;
                Operation::Generic
            }
            // CMP/PZ Rn
            0x4011 => {
                self.disasm(code, "CMP/PZ", || vec![r(n)]);
                self.t = self.register(n).signed() >= 0;
                Operation::Generic
            }
            // CMP/PL Rn
            0x4015 => {
                self.disasm(code, "CMP/PL", || vec![r(n)]);
                self.t = self.register(n).signed() > 0;
                Operation::Generic
            }
            0x401a => {
                self.disasm(code, "LDS", || vec![r(n), "MACL".into()]);
                self.macl = self.register(n).value();
                Operation::Generic
            }
            // SHAR Rn
            0x4021 => {
                self.disasm(code, "SHAR", || vec![r(n)]);
                let value = self.register(n);
                self.t = value.value() & 1 != 0;
                self.set_register(n, U32::new((value.signed() >> 1) as u32));
                Operation::Generic
            }
            // STS.L PR,@-Rn
            0x4022 => {
                self.disasm(code, "STS.L", || vec!["PR".into(), format!("@-R{n}")]);
                let target = self.register(n).value().wrapping_sub(4);
                self.set_register(n, U32::new(target));
                self.store(target, Value::U32(U32::new(self.pr)))
            }
            // LDS.L @Rm+,PR
            0x4026 => {
                self.disasm(code, "LDS.L", || vec![format!("@R{n}+"), "PR".into()]);
                let source = self.register(n).value();
                let value = self.memory.read_u32(source)?;
                self.pr = value.value();
                self.set_register(n, U32::new(source.wrapping_add(4)));
                Operation::Read {
                    source,
                    value: Value::U32(value),
                }
            }
            0x402a => {
                self.disasm(code, "LDS", || vec![r(n), "PR".into()]);
                self.pr = self.register(n).value();
                Operation::Generic
            }
            // JMP @Rn
            0x402b => {
                let target = self.register(n).value();
                self.disasm(code, "JMP", || vec![format!("@R{n}")]);
                self.delayed(code, BranchKind::Jmp, target)
            }
            0x405a => {
                self.disasm(code, "LDS", || vec![r(n), "FPUL".into()]);
                self.fpul = self.register(n).value();
                Operation::Generic
            }
            0xf00d => {
                self.disasm(code, "FSTS", || vec!["FPUL".into(), fr(n)]);
                self.set_float_register(n, f32::from_bits(self.fpul));
                Operation::Generic
            }
            0xf01d => {
                self.disasm(code, "FLDS", || vec![fr(n), "FPUL".into()]);
                self.fpul = self.float_register(n).to_bits();
                Operation::Generic
            }
            0xf02d => {
                self.disasm(code, "FLOAT", || vec!["FPUL".into(), fr(n)]);
                self.set_float_register(n, self.fpul as i32 as f32);
                Operation::Generic
            }
            0xf03d => {
                self.disasm(code, "FTRC", || vec![fr(n), "FPUL".into()]);
                self.fpul = self.float_register(n) as i32 as u32;
                Operation::Generic
            }
            0xf04d => {
                self.disasm(code, "FNEG", || vec![fr(n)]);
                self.set_float_register(n, -self.float_register(n));
                Operation::Generic
            }
            0xf08d => {
                self.disasm(code, "FLDI0", || vec![fr(n)]);
                self.set_float_register(n, 0.0);
                Operation::Generic
            }
            0xf09d => {
                self.disasm(code, "FLDI1", || vec![fr(n)]);
                self.set_float_register(n, 1.0);
                Operation::Generic
            }
            _ => return Ok(None),
        };
        Ok(Some(op))
    }

    fn shift(&mut self, code: u16, mnemonic: &'static str, n: usize, amount: u32, left: bool) -> Operation {
        self.disasm(code, mnemonic, || vec![r(n)]);
        let value = self.register(n);
        let result = if left {
            value.shl(amount)
        } else {
            value.shr(amount)
        };
        self.set_register(n, result);
        Operation::Generic
    }

    fn execute_branch(&mut self, code: u16) -> Result<Option<Operation>, SimError> {
        let op = match code & 0xf000 {
            0xa000 => {
                let target = self.branch_target(sdisp12(code));
                self.disasm(code, "BRA", || vec![hex(target)]);
                self.delayed(code, BranchKind::Bra, target)
            }
            0xb000 => {
                let target = self.branch_target(sdisp12(code));
                self.disasm(code, "BSR", || vec![hex(target)]);
                self.pr = self.pc.wrapping_add(2);
                self.delayed(code, BranchKind::Bsr, target)
            }
            // MOV.L @(disp,PC),Rn
            0xd000 => {
                let n = rn(code);
                let source = (self.pc.wrapping_add(2) & !3).wrapping_add(disp8(code) * 4);
                self.disasm(code, "MOV.L", || vec![format!("@({},PC)", disp8(code) * 4), r(n)]);
                self.load32(n, source)?
            }
            _ => return Ok(None),
        };
        Ok(Some(op))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::Simulator;
    use crate::sim::memory::BinaryMemory;
    use crate::sim::operation::{BranchKind, Operation};
    use crate::sim::types::{Value, U32};
    use crate::sim::SimError;

    fn load(program: &[u16]) -> Simulator {
        let mut memory = BinaryMemory::new(0x1000);
        for (i, word) in program.iter().enumerate() {
            memory.write_bytes((i * 2) as u32, &word.to_le_bytes());
        }
        Simulator::new(memory)
    }

    #[test]
    fn stack_pointer_starts_below_top() {
        let sim = load(&[]);
        assert_eq!(sim.sp(), 0x1000 - 4);
    }

    #[test]
    fn bsr_runs_delay_slot_before_jumping() {
        // BSR +4 ; MOV #1,R0
        let mut sim = load(&[0xb004, 0xe001]);
        let op = sim.step().expect("bsr");
        assert!(matches!(
            op,
            Operation::Branch(b) if b.kind == BranchKind::Bsr && b.target == 12
        ));
        assert_eq!(sim.pc(), 2);
        assert_eq!(sim.register(0).value(), 0);
        assert!(sim.has_pending_branch());

        sim.step().expect("delay slot");
        assert_eq!(sim.register(0).value(), 1);
        assert_eq!(sim.pc(), 12);
        assert_eq!(sim.pr(), 4);
        assert!(!sim.has_pending_branch());
    }

    #[test]
    fn rts_returns_to_pr_after_slot() {
        let mut sim = load(&[0x000b, 0x0009]);
        sim.set_pr(0x40);
        assert!(matches!(
            sim.step().expect("rts"),
            Operation::Branch(b) if b.kind == BranchKind::Rts && b.target == 0x40
        ));
        sim.step().expect("nop");
        assert_eq!(sim.pc(), 0x40);
    }

    #[test]
    fn cancelled_branch_falls_through() {
        let mut sim = load(&[0xa010, 0x0009, 0x0009]);
        sim.step().expect("bra");
        sim.cancel_delayed_branch();
        sim.step().expect("nop");
        assert_eq!(sim.pc(), 4);
    }

    #[test]
    fn add_immediate_sign_extends_and_wraps() {
        // MOV #0,R1 ; ADD #-1,R1 ; ADD R1,R1
        let mut sim = load(&[0xe100, 0x71ff, 0x311c]);
        sim.step().expect("mov");
        sim.step().expect("add imm");
        assert_eq!(sim.register(1).value(), 0xffff_ffff);
        sim.step().expect("add");
        assert_eq!(sim.register(1).value(), 0xffff_fffe);
    }

    #[test]
    fn pc_relative_long_load_aligns_base() {
        // NOP ; MOV.L @(4,PC),R1 ; ... ; literal at 8
        let mut sim = load(&[0x0009, 0xd101, 0x0009, 0x0009, 0x5678, 0x1234]);
        sim.step().expect("nop");
        let op = sim.step().expect("mov.l");
        assert_eq!(
            op,
            Operation::Read {
                source: 8,
                value: Value::U32(U32::new(0x1234_5678))
            }
        );
        assert_eq!(sim.register(1).value(), 0x1234_5678);
    }

    #[test]
    fn shad_is_arithmetic_and_shld_is_logical() {
        // MOV #-2,R2 ; MOV #-16,R1 ; SHAD R2,R1
        let mut sim = load(&[0xe2fe, 0xe1f0, 0x412c]);
        for _ in 0..3 {
            sim.step().expect("step");
        }
        assert_eq!(sim.register(1).value(), 0xffff_fffc);

        // MOV #-2,R2 ; MOV #-16,R1 ; SHLD R2,R1
        let mut sim = load(&[0xe2fe, 0xe1f0, 0x412d]);
        for _ in 0..3 {
            sim.step().expect("step");
        }
        assert_eq!(sim.register(1).value(), 0x3fff_fffc);
    }

    #[test]
    fn predecrement_store_reports_write() {
        // MOV #7,R1 ; MOV.L R1,@-R15
        let mut sim = load(&[0xe107, 0x2f16]);
        sim.step().expect("mov");
        let sp = sim.sp();
        let op = sim.step().expect("push");
        assert_eq!(
            op,
            Operation::Write {
                target: sp - 4,
                value: Value::U32(U32::new(7))
            }
        );
        assert_eq!(sim.sp(), sp - 4);
        assert_eq!(sim.memory().read_u32(sp - 4).expect("read").value(), 7);
    }

    #[test]
    fn conditional_branch_follows_t() {
        // CMP/EQ #0,R0 ; BT +2 ; ...
        let mut sim = load(&[0x8800, 0x8902]);
        sim.step().expect("cmp");
        assert!(sim.t());
        let op = sim.step().expect("bt");
        assert_eq!(op, Operation::ControlFlow { target: 10, taken: true });
        assert_eq!(sim.pc(), 10);
    }

    #[test]
    fn float_constants_and_add() {
        // FLDI1 FR2 ; FLDI1 FR3 ; FADD FR2,FR3
        let mut sim = load(&[0xf29d, 0xf39d, 0xf320]);
        for _ in 0..3 {
            sim.step().expect("step");
        }
        assert_eq!(sim.float_register(3), 2.0);
    }

    #[test]
    fn unknown_opcode_is_fatal() {
        let mut sim = load(&[0xffff]);
        assert_eq!(
            sim.step().expect_err("unknown"),
            SimError::UnknownInstruction {
                code: 0xffff,
                pc: 0
            }
        );
    }

    #[test]
    fn disassembly_is_opt_in() {
        let mut sim = load(&[0xe105, 0xe105]);
        sim.step().expect("mov");
        assert!(sim.take_disassembly().is_none());
        sim.set_disassemble(true);
        sim.step().expect("mov");
        let line = sim.take_disassembly().expect("disassembly");
        assert_eq!(line.mnemonic, "MOV");
        assert_eq!(line.operands, vec!["#5".to_string(), "R1".to_string()]);
    }
}
