use std::collections::VecDeque;

use tracing::{debug, info};

use crate::harness::convention::{ArgumentKind, ArgumentStorage, CallingConvention};
use crate::harness::coverage::Coverage;
use crate::harness::definition::{
    Argument, CallExpectation, EntryArgument, Expectation, MemoryInitialization, ReturnValue,
    TestDefinition,
};
use crate::harness::error::{AccessMismatch, AccessValue, ArgLocation, ExpectationError, RunError};
use crate::layout::LinkedObject;
use crate::resolver::{resolve, Resolution, ResolveError};
use crate::sim::memory::{BinaryMemory, DEFAULT_SIZE};
use crate::sim::operation::{Branch, BranchKind, Operation};
use crate::sim::types::{mask_to_width, RangeError, Value, U16, U32, U8};
use crate::sim::{Disassembly, SimError, Simulator};

const R0: usize = 0;
const R1: usize = 1;
const SP: usize = 15;
const STRING_LIMIT: usize = 256;

/// Runner-level knobs that are not part of a test definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Abort after this many executed instructions. `None` disables the limit.
    pub max_instructions: Option<u64>,
    /// Produce a disassembly line per instruction for the observer.
    pub disassemble: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_instructions: Some(10_000_000),
            disassemble: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMessage {
    Fulfilled(String),
    Info(String),
}

/// Receives what a run has to say. Every method defaults to doing nothing.
pub trait RunObserver {
    fn instruction(&mut self, _line: &Disassembly) {}

    fn message(&mut self, _message: &RunMessage) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Summary of a passing run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub coverage: Coverage,
    /// Expectations consumed, plus one for a checked return value.
    pub fulfilled: usize,
    pub instructions: u64,
}

/// Runs one test definition against a linked object.
///
/// Memory is fresh for every call; the linked object is only read.
///
/// # Errors
/// `RunError::Expectation` when the program misbehaves, `Simulation` or
/// `Setup` when the run itself cannot proceed, `Definition` when an integer
/// expectation does not fit a register.
pub fn execute(
    linked: &LinkedObject,
    definition: TestDefinition,
    options: &RunOptions,
    observer: &mut dyn RunObserver,
) -> Result<RunReport, RunError> {
    let TestDefinition {
        entry,
        arguments,
        returns,
        mut expectations,
        relocations,
        initializations,
        randomize_memory,
        stop_when_fulfilled,
    } = definition;

    let mut memory = if randomize_memory {
        BinaryMemory::randomized(DEFAULT_SIZE)
    } else {
        BinaryMemory::new(DEFAULT_SIZE)
    };
    memory.write_bytes(0, linked.image());
    for initialization in &initializations {
        initialize(&mut memory, initialization)?;
    }

    let resolution = resolve(linked, &mut memory, &relocations)?;
    let entry_address = linked
        .export_address(&entry)
        .ok_or_else(|| ResolveError::MissingEntry { name: entry.clone() })?;

    for expectation in &mut expectations {
        if let Expectation::Call(call) = expectation {
            if call.address.is_none() {
                call.address = relocations
                    .iter()
                    .find(|r| r.name == call.name)
                    .map(|r| r.address)
                    .or_else(|| linked.export_address(&call.name));
            }
        }
    }

    let mut sim = Simulator::new(memory);
    sim.set_disassemble(options.disassemble);
    sim.set_pc(entry_address);
    place_arguments(&mut sim, &arguments)?;
    debug!(%entry, pc = format_args!("{entry_address:#x}"), expectations = expectations.len(), "starting run");

    let mut run = Run {
        pending: expectations.into(),
        resolution,
        coverage: Coverage::new(),
        running: true,
        call_depth: 0,
        fulfilled: 0,
        observer,
    };
    let instructions = run.drive(&mut sim, options, stop_when_fulfilled)?;
    run.finish(&sim, returns)?;

    Ok(RunReport {
        coverage: run.coverage,
        fulfilled: run.fulfilled,
        instructions,
    })
}

fn initialize(memory: &mut BinaryMemory, init: &MemoryInitialization) -> Result<(), RunError> {
    match init.bits {
        8 => memory.write_u8(init.address, U8::new(init.value as u8)),
        16 => memory.write_u16(init.address, U16::new(init.value as u16)),
        32 => memory.write_u32(init.address, U32::new(init.value)),
        bits => {
            return Err(RunError::Unsupported(format!(
                "{bits}-bit memory initialization"
            )))
        }
    }
    Ok(())
}

/// Registers first, then stack slots above the lowered SP in convention order.
fn place_arguments(sim: &mut Simulator, arguments: &[EntryArgument]) -> Result<(), RangeError> {
    let mut convention = CallingConvention::new();
    let mut stack = Vec::new();
    for argument in arguments {
        let kind = match argument {
            EntryArgument::Int(_) => ArgumentKind::General,
            EntryArgument::Float(_) => ArgumentKind::Float,
        };
        let bits = argument.bits()?;
        match convention.next(kind) {
            ArgumentStorage::Register(n) => sim.set_register(n, U32::new(bits)),
            ArgumentStorage::FloatRegister(n) => sim.set_float_register(n, f32::from_bits(bits)),
            ArgumentStorage::Stack(offset) => stack.push((offset, bits)),
        }
    }
    if stack.is_empty() {
        return Ok(());
    }
    let sp = sim.sp().wrapping_sub(convention.stack_size());
    sim.set_register(SP, U32::new(sp));
    for (offset, bits) in stack {
        sim.memory_mut().write_u32(sp.wrapping_add(offset), U32::new(bits));
    }
    Ok(())
}

fn read_storage(sim: &Simulator, storage: ArgumentStorage) -> Result<(u32, ArgLocation), SimError> {
    Ok(match storage {
        ArgumentStorage::Register(n) => (sim.register(n).value(), ArgLocation::Register(n)),
        ArgumentStorage::FloatRegister(n) => {
            (sim.float_register(n).to_bits(), ArgLocation::FloatRegister(n))
        }
        ArgumentStorage::Stack(offset) => {
            let address = sim.sp().wrapping_add(offset);
            let value = sim.memory().read_u32(address)?.value();
            (value, ArgLocation::Stack { offset, address })
        }
    })
}

fn int_text(value: u32) -> String {
    format!("{} ({value:#x})", value as i32)
}

/// Enough bytes to tell a longer string apart from `expected`, and at
/// least `STRING_LIMIT` for the diagnostic.
fn string_limit(expected: &[u8]) -> usize {
    STRING_LIMIT.max(expected.len() + 1)
}

fn describe_next(next: Option<&Expectation>) -> String {
    next.map_or_else(|| "nothing".to_string(), Expectation::describe)
}

struct Run<'a> {
    pending: VecDeque<Expectation>,
    resolution: Resolution,
    coverage: Coverage,
    running: bool,
    /// Local subroutines entered through calls that matched nothing.
    call_depth: usize,
    fulfilled: usize,
    observer: &'a mut dyn RunObserver,
}

impl Run<'_> {
    fn drive(
        &mut self,
        sim: &mut Simulator,
        options: &RunOptions,
        stop_when_fulfilled: bool,
    ) -> Result<u64, RunError> {
        let mut instructions = 0u64;
        let mut delayed: Option<Branch> = None;

        while self.running || sim.has_pending_branch() {
            if let Some(limit) = options.max_instructions {
                if instructions >= limit {
                    return Err(SimError::InstructionLimit { limit }.into());
                }
            }

            let previous = delayed.take();
            self.coverage.log_execute(sim.pc(), 2);
            let stepped = sim.step();
            if let Some(line) = sim.take_disassembly() {
                self.observer.instruction(&line);
            }
            let operation = stepped?;
            instructions += 1;

            match operation {
                Operation::Branch(branch) => {
                    delayed = Some(branch);
                    if branch.kind == BranchKind::Rts {
                        self.on_return();
                    }
                }
                Operation::Write { target, value } => self.on_write(sim, target, value)?,
                Operation::Read { source, value } => self.on_read(sim, source, value)?,
                Operation::Generic | Operation::ControlFlow { .. } => {}
            }

            if let Some(branch) = previous {
                if branch.kind != BranchKind::Rts {
                    self.on_branch(sim, branch)?;
                }
            }

            if stop_when_fulfilled && self.pending.is_empty() {
                debug!("all expectations fulfilled, stopping early");
                break;
            }
        }

        Ok(instructions)
    }

    fn finish(&mut self, sim: &Simulator, returns: Option<ReturnValue>) -> Result<(), RunError> {
        if let Some(next) = self.pending.front() {
            return Err(ExpectationError::PendingExpectations {
                count: self.pending.len(),
                next: next.describe(),
            }
            .into());
        }

        match returns {
            Some(ReturnValue::Int(expected)) => {
                let expected = mask_to_width(expected, 32)?;
                let actual = sim.register(R0).value();
                if actual != expected {
                    return Err(ExpectationError::UnexpectedReturn {
                        expected: int_text(expected),
                        actual: int_text(actual),
                    }
                    .into());
                }
                self.fulfill(format!("Returned {}", int_text(expected)));
            }
            Some(ReturnValue::Float(expected)) => {
                let actual = sim.float_register(R0);
                if actual.to_bits() != expected.to_bits() {
                    return Err(ExpectationError::UnexpectedReturn {
                        expected: expected.to_string(),
                        actual: actual.to_string(),
                    }
                    .into());
                }
                self.fulfill(format!("Returned float {expected}"));
            }
            None => {}
        }
        Ok(())
    }

    fn fulfill(&mut self, message: String) {
        debug!(%message, "fulfilled");
        self.fulfilled += 1;
        self.observer.message(&RunMessage::Fulfilled(message));
    }

    fn note(&mut self, message: String) {
        info!("{message}");
        self.observer.message(&RunMessage::Info(message));
    }

    fn on_return(&mut self) {
        if self.call_depth == 0 {
            self.note("Program returned".to_string());
            self.running = false;
        } else {
            self.call_depth -= 1;
        }
    }

    fn on_branch(&mut self, sim: &mut Simulator, branch: Branch) -> Result<(), RunError> {
        let target = branch.target;
        let to_symbol = self.resolution.symbols.at(target).is_some();
        let to_expected_stub = !to_symbol
            && matches!(
                self.pending.front(),
                Some(Expectation::Call(call)) if call.address == Some(target)
            );

        if !to_symbol && !to_expected_stub {
            if branch.is_call() {
                self.call_depth += 1;
                debug!(target = format_args!("{target:#x}"), depth = self.call_depth, "local call");
            }
            return Ok(());
        }

        self.assert_call(sim, target)?;
        if branch.is_call() {
            let pr = sim.pr();
            sim.set_pc(pr);
            sim.cancel_delayed_branch();
        } else {
            let kind = if to_symbol { "symbol" } else { "address" };
            self.note(format!("Program jumped to {kind} at {target:#010x}"));
            self.running = false;
        }
        Ok(())
    }

    fn assert_call(&mut self, sim: &mut Simulator, target: u32) -> Result<(), RunError> {
        let name = self
            .resolution
            .symbols
            .at(target)
            .map(|s| s.name.clone())
            .or_else(|| self.resolution.name_at(target).map(str::to_owned));
        let readable = format!(
            "{} ({target:#010x})",
            name.as_deref().unwrap_or("<NO_SYMBOL>")
        );

        if let Some(name) = name.as_deref() {
            if intrinsic(sim, name)? {
                debug!(%name, "intrinsic call");
                return Ok(());
            }
        }

        let pc = sim.pc();
        let mut call = match self.pending.pop_front() {
            Some(Expectation::Call(call)) => call,
            other => {
                return Err(ExpectationError::UnexpectedCall {
                    target: readable,
                    pc,
                    next: describe_next(other.as_ref()),
                }
                .into())
            }
        };

        if name.as_deref() != Some(call.name.as_str()) {
            return Err(ExpectationError::NameMismatch {
                target: readable,
                pc,
                expected: call.name,
            }
            .into());
        }

        check_arguments(sim, &call, &readable)?;

        if let Some(callback) = call.callback.as_mut() {
            callback(sim, &call.arguments)?;
        }

        match call.returns {
            Some(value @ ReturnValue::Int(_)) => sim.set_register(R0, U32::new(value.bits()?)),
            Some(ReturnValue::Float(value)) => sim.set_float_register(R0, value),
            None => {}
        }

        self.fulfill(format!("Called {readable}"));
        Ok(())
    }

    fn on_write(&mut self, sim: &Simulator, target: u32, value: Value) -> Result<(), RunError> {
        self.coverage.log_write(target, value.bits() / 8);
        let location = self.resolution.describe(target);
        let actual = AccessValue::Int {
            value: value.raw(),
            bits: value.bits(),
        };

        let targets_front = match self.pending.front() {
            Some(Expectation::Write(access)) => access.address == target,
            Some(Expectation::StringWrite { address, .. }) => *address == target,
            _ => false,
        };
        if target >= sim.sp() && !targets_front {
            self.note(format!("Allowed stack write of {} to {location}", value.readable()));
            return Ok(());
        }

        let unexpected = |actual: AccessValue, reason: AccessMismatch| {
            RunError::from(ExpectationError::UnexpectedWrite {
                address: target,
                location: location.clone(),
                actual,
                reason,
            })
        };

        let message = match self.pending.front() {
            Some(Expectation::Write(access)) => {
                if value.bits() != access.bits {
                    return Err(unexpected(actual, AccessMismatch::Width { expected: access.bits }));
                }
                if access.address != target {
                    let expected = self.resolution.describe(access.address);
                    return Err(unexpected(actual, AccessMismatch::Address { expected }));
                }
                if value.raw() != access.value {
                    let expected = AccessValue::Int {
                        value: access.value,
                        bits: access.bits,
                    };
                    return Err(unexpected(actual, AccessMismatch::Value { expected }));
                }
                format!("Wrote {} to {location}", value.readable())
            }
            Some(Expectation::StringWrite { address, value: expected }) => {
                if value.bits() != 32 {
                    return Err(unexpected(actual, AccessMismatch::Width { expected: 32 }));
                }
                let written = sim
                    .memory()
                    .read_string_bounded(value.raw(), string_limit(expected))
                    .map_err(SimError::from)?;
                let written = AccessValue::Str(written);
                if *address != target {
                    let expected = self.resolution.describe(*address);
                    return Err(unexpected(written, AccessMismatch::Address { expected }));
                }
                if written != AccessValue::Str(expected.clone()) {
                    let expected = AccessValue::Str(expected.clone());
                    return Err(unexpected(written, AccessMismatch::Value { expected }));
                }
                format!("Wrote string {written} to {location}")
            }
            other => {
                let next = describe_next(other);
                return Err(unexpected(actual, AccessMismatch::NotExpected { next }));
            }
        };

        self.pending.pop_front();
        self.fulfill(message);
        Ok(())
    }

    fn on_read(&mut self, sim: &Simulator, source: u32, value: Value) -> Result<(), RunError> {
        self.coverage.log_read(source, value.bits() / 8);

        if let Some(relocation) = self.resolution.unresolved_at(source) {
            return Err(SimError::UnresolvedRelocationRead {
                address: source,
                name: relocation.name.clone(),
                pc: sim.instruction_pc(),
            }
            .into());
        }

        let Some(Expectation::Read(access)) = self.pending.front() else {
            return Ok(());
        };
        if access.address != source {
            return Ok(());
        }

        let location = self.resolution.describe(source);
        let unexpected = |reason: AccessMismatch| {
            RunError::from(ExpectationError::UnexpectedRead {
                address: source,
                location: location.clone(),
                actual: AccessValue::Int {
                    value: value.raw(),
                    bits: value.bits(),
                },
                reason,
            })
        };
        if value.bits() != access.bits {
            return Err(unexpected(AccessMismatch::Width { expected: access.bits }));
        }
        if value.raw() != access.value {
            return Err(unexpected(AccessMismatch::Value {
                expected: AccessValue::Int {
                    value: access.value,
                    bits: access.bits,
                },
            }));
        }

        let message = format!("Read {} from {location}", value.readable());
        self.pending.pop_front();
        self.fulfill(message);
        Ok(())
    }
}

/// Compiler runtime helpers: dividend in R1, divisor in R0, result in R0.
/// Returns false for any other name.
fn intrinsic(sim: &mut Simulator, name: &str) -> Result<bool, SimError> {
    let dividend = sim.register(R1);
    let divisor = sim.register(R0);
    let pc = sim.instruction_pc();
    let zero = || SimError::DivisionByZero {
        function: name.to_string(),
        pc,
    };
    let result = match name {
        "__modls" | "__divls" => {
            let (a, b) = (dividend.signed(), divisor.signed());
            if b == 0 {
                return Err(zero());
            }
            let r = if name == "__modls" {
                a.wrapping_rem(b)
            } else {
                a.wrapping_div(b)
            };
            U32::new(r as u32)
        }
        "__modlu" => dividend.checked_rem(divisor).ok_or_else(zero)?,
        "__divlu" => dividend.checked_div(divisor).ok_or_else(zero)?,
        _ => return Ok(false),
    };
    sim.set_register(R0, result);
    Ok(true)
}

fn check_arguments(sim: &Simulator, call: &CallExpectation, function: &str) -> Result<(), RunError> {
    let mut convention = CallingConvention::new();
    let mismatch = |location: ArgLocation, expected: String, actual: String| {
        RunError::from(ExpectationError::ArgumentMismatch {
            function: function.to_string(),
            location,
            expected,
            actual,
        })
    };

    for argument in &call.arguments {
        match argument {
            Argument::Wildcard => {
                convention.next(ArgumentKind::General);
            }
            Argument::Int(expected) => {
                let expected = mask_to_width(*expected, 32)?;
                let (actual, location) = read_storage(sim, convention.next(ArgumentKind::General))?;
                if actual != expected {
                    return Err(mismatch(location, int_text(expected), int_text(actual)));
                }
            }
            Argument::Float(expected) => {
                let (actual, location) = read_storage(sim, convention.next(ArgumentKind::Float))?;
                if actual != expected.to_bits() {
                    return Err(mismatch(
                        location,
                        expected.to_string(),
                        f32::from_bits(actual).to_string(),
                    ));
                }
            }
            Argument::Str(expected) => {
                let (pointer, location) = read_storage(sim, convention.next(ArgumentKind::General))?;
                let actual = sim
                    .memory()
                    .read_string_bounded(pointer, string_limit(expected))
                    .map_err(SimError::from)?;
                if actual != *expected {
                    return Err(mismatch(
                        location,
                        AccessValue::Str(expected.clone()).to_string(),
                        AccessValue::Str(actual).to_string(),
                    ));
                }
            }
            Argument::Local => {
                let (pointer, location) = read_storage(sim, convention.next(ArgumentKind::General))?;
                if pointer < sim.sp() {
                    return Err(mismatch(
                        location,
                        format!("a stack pointer (>= {:#010x})", sim.sp()),
                        format!("{pointer:#010x}"),
                    ));
                }
            }
        }
    }
    Ok(())
}
