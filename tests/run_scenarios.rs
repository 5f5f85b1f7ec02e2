mod common;

use common::ObjectBuilder;
use pretty_assertions::assert_eq;
use sh4objtest::harness::error::{AccessMismatch, ArgLocation};
use sh4objtest::harness::{
    execute, CallExpectation, ExpectationError, NoopObserver, RunError, RunMessage, RunObserver,
    RunOptions, RunReport, TestDefinition,
};
use sh4objtest::layout::LinkedObject;
use sh4objtest::sim::types::RangeError;
use sh4objtest::sim::{SimError, U32};

const RTS: u16 = 0x000b;
const NOP: u16 = 0x0009;
const PUSH_PR: u16 = 0x4f22;
const POP_PR: u16 = 0x4f26;

#[derive(Default)]
struct Recorder {
    messages: Vec<RunMessage>,
    lines: usize,
}

impl RunObserver for Recorder {
    fn instruction(&mut self, _line: &sh4objtest::sim::Disassembly) {
        self.lines += 1;
    }

    fn message(&mut self, message: &RunMessage) {
        self.messages.push(message.clone());
    }
}

fn run(linked: &LinkedObject, definition: TestDefinition) -> Result<RunReport, RunError> {
    execute(linked, definition, &RunOptions::default(), &mut NoopObserver)
}

fn expectation_error(result: Result<RunReport, RunError>) -> ExpectationError {
    match result {
        Err(RunError::Expectation(err)) => err,
        other => panic!("expected an expectation failure, got {other:?}"),
    }
}

/// `_myfunc`: returns immediately.
fn nop_object() -> LinkedObject {
    ObjectBuilder::new()
        .section("P", 4)
        .code(0, &[RTS, NOP])
        .export(0, 0, "_myfunc")
        .link()
}

/// `_add(a, b)`: returns `_helper(a, b)`.
fn add_object() -> LinkedObject {
    ObjectBuilder::new()
        .section("P", 4)
        .imports(&["_helper"])
        .code(
            0,
            &[
                PUSH_PR, // 00
                0xd003,  // 02 MOV.L @(0x10),R0
                0x400b,  // 04 JSR @R0
                NOP,     // 06
                POP_PR,  // 08
                RTS,     // 0a
                NOP,     // 0c
                NOP,     // 0e
                0, 0,    // 10 _helper
            ],
        )
        .external(0x10, 0)
        .export(0, 0, "_add")
        .link()
}

/// Calls `_foo` and then stores 42 at 0x1000, or the other way round.
fn call_and_write_object(write_first: bool) -> LinkedObject {
    let code: [u16; 14] = if write_first {
        [
            PUSH_PR, 0xd105, 0xe22a, 0x2122, 0xd002, 0x400b, NOP, POP_PR, RTS, NOP, 0, 0, 0x1000, 0,
        ]
    } else {
        [
            PUSH_PR, 0xd004, 0x400b, NOP, 0xd103, 0xe22a, 0x2122, POP_PR, RTS, NOP, 0, 0, 0x1000, 0,
        ]
    };
    ObjectBuilder::new()
        .section("P", 4)
        .imports(&["_foo"])
        .code(0, &code)
        .external(0x14, 0)
        .export(0, 0, "_main")
        .link()
}

#[test]
fn nop_function_passes_without_expectations() {
    let report = run(&nop_object(), TestDefinition::new("_myfunc")).expect("run");
    assert_eq!(report.fulfilled, 0);
    assert_eq!(report.instructions, 2);
}

#[test]
fn stubbed_call_returns_into_caller() {
    let definition = TestDefinition::new("_add")
        .with_args([4, 2])
        .bind("_helper", 0x800)
        .should_call(CallExpectation::new("_helper").with([4, 2]).and_return(6))
        .should_return(6);
    let report = run(&add_object(), definition).expect("run");
    assert_eq!(report.fulfilled, 2);
}

#[test]
fn wrong_argument_names_the_register() {
    let definition = TestDefinition::new("_add")
        .with_args([4, 2])
        .bind("_helper", 0x800)
        .should_call(CallExpectation::new("_helper").with([4, 3]).and_return(6))
        .should_return(6);
    let err = expectation_error(run(&add_object(), definition));
    assert_eq!(
        err,
        ExpectationError::ArgumentMismatch {
            function: "_helper (0x00000800)".to_string(),
            location: ArgLocation::Register(5),
            expected: "3 (0x3)".to_string(),
            actual: "2 (0x2)".to_string(),
        }
    );
}

#[test]
fn call_to_a_different_symbol_is_a_name_mismatch() {
    let definition = TestDefinition::new("_add")
        .bind("_helper", 0x800)
        .should_call(CallExpectation::new("_other"));
    let err = expectation_error(run(&add_object(), definition));
    assert!(matches!(
        err,
        ExpectationError::NameMismatch { ref expected, .. } if expected == "_other"
    ));
}

#[test]
fn unbound_relocation_read_is_fatal() {
    let result = run(&add_object(), TestDefinition::new("_add"));
    match result {
        Err(RunError::Simulation(SimError::UnresolvedRelocationRead { address, name, pc })) => {
            assert_eq!((address, name.as_str(), pc), (0x10, "_helper", 0x02));
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn expectations_are_consumed_in_order() {
    let expected = || {
        TestDefinition::new("_main")
            .bind("_foo", 0x900)
            .should_call(CallExpectation::new("_foo"))
            .should_write(32, 0x1000, 42)
            .expect("write")
    };

    let report = run(&call_and_write_object(false), expected()).expect("call then write");
    assert_eq!(report.fulfilled, 2);

    let err = expectation_error(run(&call_and_write_object(true), expected()));
    match err {
        ExpectationError::UnexpectedWrite {
            address, reason, ..
        } => {
            assert_eq!(address, 0x1000);
            assert_eq!(
                reason,
                AccessMismatch::NotExpected {
                    next: "call to _foo".to_string()
                }
            );
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn write_value_mismatch_reports_expected_value() {
    let definition = TestDefinition::new("_main")
        .bind("_foo", 0x900)
        .should_call(CallExpectation::new("_foo"))
        .should_write(32, 0x1000, 41)
        .expect("write");
    let err = expectation_error(run(&call_and_write_object(false), definition));
    assert!(matches!(
        err,
        ExpectationError::UnexpectedWrite {
            reason: AccessMismatch::Value { .. },
            ..
        }
    ));
}

#[test]
fn pending_expectations_fail_the_run() {
    let definition = TestDefinition::new("_myfunc").should_call(CallExpectation::new("_never"));
    let err = expectation_error(run(&nop_object(), definition));
    assert_eq!(
        err,
        ExpectationError::PendingExpectations {
            count: 1,
            next: "call to _never".to_string()
        }
    );
}

#[test]
fn wrong_return_value_is_reported() {
    let err = expectation_error(run(&nop_object(), TestDefinition::new("_myfunc").should_return(1)));
    assert_eq!(
        err,
        ExpectationError::UnexpectedReturn {
            expected: "1 (0x1)".to_string(),
            actual: "0 (0x0)".to_string()
        }
    );
}

/// `_get`: returns the word at `_value`, reached through a local relocation.
fn global_read_object() -> LinkedObject {
    ObjectBuilder::new()
        .section("P", 4)
        .section("D", 4)
        .select(0)
        .code(0, &[0xd101, 0x6012, RTS, NOP, 4, 0])
        .local_short(8, 1)
        .select(1)
        .data(0, &[0xde, 0xad, 0xbe, 0xef, 42, 0, 0, 0])
        .export(0, 0, "_get")
        .export(1, 4, "_value")
        .link()
}

#[test]
fn local_relocation_reaches_data_section() {
    let linked = global_read_object();
    let value = linked.export_address("_value").expect("_value");
    assert_eq!(value, 16);

    let definition = TestDefinition::new("_get")
        .should_read(32, value, 42)
        .expect("read")
        .should_return(42);
    let report = run(&linked, definition).expect("run");
    assert_eq!(report.fulfilled, 2);
    assert!(report.coverage.get(value).read);
}

#[test]
fn read_value_mismatch_is_reported() {
    let linked = global_read_object();
    let value = linked.export_address("_value").expect("_value");
    let definition = TestDefinition::new("_get")
        .should_read(32, value, 41)
        .expect("read");
    let err = expectation_error(run(&linked, definition));
    assert!(matches!(
        err,
        ExpectationError::UnexpectedRead {
            reason: AccessMismatch::Value { .. },
            ..
        }
    ));
}

#[test]
fn string_pointer_writes_compare_contents() {
    let linked = ObjectBuilder::new()
        .section("P", 4)
        .section("C", 4)
        .select(0)
        .code(
            0,
            &[0xd102, 0xd203, 0x2122, RTS, NOP, NOP, 0x2000, 0, 0, 0],
        )
        .local_long(0x10, 1, 0)
        .select(1)
        .data(0, b"hello\0")
        .export(0, 0, "_publish")
        .link();

    let pass = TestDefinition::new("_publish").should_write_string(0x2000, "hello");
    run(&linked, pass).expect("matching string");

    let fail = TestDefinition::new("_publish").should_write_string(0x2000, "help");
    let err = expectation_error(run(&linked, fail));
    assert!(matches!(
        err,
        ExpectationError::UnexpectedWrite {
            reason: AccessMismatch::Value { .. },
            ..
        }
    ));
}

#[test]
fn delay_slot_runs_before_local_subroutine() {
    let linked = ObjectBuilder::new()
        .section("P", 4)
        .code(
            0,
            &[
                PUSH_PR, // 00
                0xb003,  // 02 BSR 0x0c
                0xe405,  // 04 MOV #5,R4 (delay slot)
                POP_PR,  // 06
                RTS,     // 08
                NOP,     // 0a
                0x6043,  // 0c MOV R4,R0
                RTS,     // 0e
                0x7001,  // 10 ADD #1,R0 (delay slot)
            ],
        )
        .export(0, 0, "_outer")
        .link();

    let report = run(&linked, TestDefinition::new("_outer").should_return(6)).expect("run");
    assert_eq!(report.fulfilled, 1);
}

#[test]
fn division_intrinsics_need_no_expectation() {
    let linked = ObjectBuilder::new()
        .section("P", 4)
        .imports(&["__divls"])
        .code(
            0,
            &[PUSH_PR, 0xd203, 0xe1f9, 0x420b, 0xe002, POP_PR, RTS, NOP, 0, 0],
        )
        .external(0x10, 0)
        .export(0, 0, "_half")
        .link();

    let definition = TestDefinition::new("_half")
        .bind("__divls", 0x700)
        .should_return(-3);
    run(&linked, definition).expect("run");
}

#[test]
fn callbacks_can_change_memory() {
    let linked = ObjectBuilder::new()
        .section("P", 4)
        .imports(&["_fill"])
        .code(
            0,
            &[
                PUSH_PR, 0xd004, 0x400b, NOP, 0xd103, 0x6012, POP_PR, RTS, NOP, NOP, 0, 0, 0x4000,
                0,
            ],
        )
        .external(0x14, 0)
        .export(0, 0, "_load")
        .link();

    let definition = TestDefinition::new("_load")
        .bind("_fill", 0xa00)
        .should_call(CallExpectation::new("_fill").run(|sim, _| {
            sim.memory_mut().write_u32(0x4000, U32::new(99));
            Ok(())
        }))
        .should_return(99);
    run(&linked, definition).expect("run");
}

#[test]
fn float_arguments_and_returns_use_float_registers() {
    let linked = ObjectBuilder::new()
        .section("P", 4)
        .code(0, &[0xf04c, RTS, NOP])
        .export(0, 0, "_identity")
        .link();

    let definition = TestDefinition::new("_identity")
        .with_args([1.5f32])
        .should_return_float(1.5);
    run(&linked, definition).expect("run");

    let definition = TestDefinition::new("_identity")
        .with_args([1.5f32])
        .should_return_float(2.0);
    let err = expectation_error(run(&linked, definition));
    assert!(matches!(err, ExpectationError::UnexpectedReturn { .. }));
}

#[test]
fn watchdog_stops_runaway_loops() {
    let linked = ObjectBuilder::new()
        .section("P", 4)
        .code(0, &[NOP, 0xaffe, NOP])
        .export(0, 0, "_spin")
        .link();

    let options = RunOptions {
        max_instructions: Some(100),
        ..RunOptions::default()
    };
    let result = execute(&linked, TestDefinition::new("_spin"), &options, &mut NoopObserver);
    assert!(matches!(
        result,
        Err(RunError::Simulation(SimError::InstructionLimit { limit: 100 }))
    ));
}

#[test]
fn stop_when_fulfilled_ends_endless_programs() {
    let linked = ObjectBuilder::new()
        .section("P", 4)
        .code(0, &[0xd102, 0xe207, 0x2122, 0xaffe, NOP, NOP, 0x3000, 0])
        .export(0, 0, "_loop")
        .link();

    let definition = TestDefinition::new("_loop")
        .should_write(32, 0x3000, 7)
        .expect("write")
        .stop_when_fulfilled(true);
    let options = RunOptions {
        max_instructions: Some(1000),
        ..RunOptions::default()
    };
    let report = execute(&linked, definition, &options, &mut NoopObserver).expect("run");
    assert_eq!(report.fulfilled, 1);
}

#[test]
fn observer_sees_disassembly_and_messages() {
    let mut recorder = Recorder::default();
    let options = RunOptions {
        disassemble: true,
        ..RunOptions::default()
    };
    let definition = TestDefinition::new("_add")
        .with_args([1, 1])
        .bind("_helper", 0x800)
        .should_call(CallExpectation::new("_helper").with([1, 1]).and_return(2))
        .should_return(2);
    execute(&add_object(), definition, &options, &mut recorder).expect("run");

    assert!(recorder.lines > 0);
    let fulfilled: Vec<_> = recorder
        .messages
        .iter()
        .filter_map(|m| match m {
            RunMessage::Fulfilled(text) => Some(text.as_str()),
            RunMessage::Info(_) => None,
        })
        .collect();
    assert_eq!(
        fulfilled,
        vec!["Called _helper (0x00000800)", "Returned 2 (0x2)"]
    );
}

#[test]
fn coverage_covers_executed_bytes() {
    let linked = nop_object();
    let report = run(&linked, TestDefinition::new("_myfunc")).expect("run");
    assert!(report.coverage.get(0).execute);
    assert!(report.coverage.get(3).execute);
    assert!((report.coverage.ratio(&linked) - 1.0).abs() < f64::EPSILON);
}

#[test]
fn randomized_memory_keeps_the_image_and_initializations() {
    let definition = TestDefinition::new("_get")
        .randomize_memory(true)
        .should_return(42);
    run(&global_read_object(), definition).expect("image survives randomization");

    let linked = global_read_object();
    let value = linked.export_address("_value").expect("_value");
    let definition = TestDefinition::new("_get")
        .initialize(32, value, -1)
        .expect("init")
        .should_return(-1);
    run(&linked, definition).expect("initialized value");
}

#[test]
fn integer_expectations_must_fit_a_register() {
    let definition = TestDefinition::new("_add")
        .with_args([4, 2])
        .bind("_helper", 0x800)
        .should_call(
            CallExpectation::new("_helper")
                .with([0x1_0000_0004_i64, 2])
                .and_return(6),
        );
    assert!(matches!(
        run(&add_object(), definition),
        Err(RunError::Definition(RangeError {
            value: 0x1_0000_0004,
            bits: 32
        }))
    ));

    let definition = TestDefinition::new("_add")
        .with_args([4, 2])
        .bind("_helper", 0x800)
        .should_call(
            CallExpectation::new("_helper")
                .with([4, 2])
                .and_return(0x1_0000_0006_i64),
        );
    assert!(matches!(
        run(&add_object(), definition),
        Err(RunError::Definition(RangeError {
            value: 0x1_0000_0006,
            ..
        }))
    ));

    let definition = TestDefinition::new("_myfunc").should_return(1_i64 << 40);
    assert!(matches!(
        run(&nop_object(), definition),
        Err(RunError::Definition(_))
    ));

    let definition = TestDefinition::new("_myfunc").with_args([-(1_i64 << 31) - 1]);
    assert!(matches!(
        run(&nop_object(), definition),
        Err(RunError::Definition(_))
    ));
}

/// `_five`: calls `_sink(1, 2, 3, 4, 5)`; the fifth argument is on the stack.
fn stack_argument_object() -> LinkedObject {
    ObjectBuilder::new()
        .section("P", 4)
        .imports(&["_sink"])
        .code(
            0,
            &[
                PUSH_PR, // 00
                0x7ffc,  // 02 ADD #-4,R15
                0xe105,  // 04 MOV #5,R1
                0x2f12,  // 06 MOV.L R1,@R15
                0xe401,  // 08 MOV #1,R4
                0xe502,  // 0a MOV #2,R5
                0xe603,  // 0c MOV #3,R6
                0xe704,  // 0e MOV #4,R7
                0xd003,  // 10 MOV.L @(0x20),R0
                0x400b,  // 12 JSR @R0
                NOP,     // 14
                0x7f04,  // 16 ADD #4,R15
                POP_PR,  // 18
                RTS,     // 1a
                NOP,     // 1c
                NOP,     // 1e
                0, 0,    // 20 _sink
            ],
        )
        .external(0x20, 0)
        .export(0, 0, "_five")
        .link()
}

#[test]
fn fifth_argument_is_checked_on_the_stack() {
    let definition = TestDefinition::new("_five")
        .bind("_sink", 0xb00)
        .should_call(CallExpectation::new("_sink").with([1, 2, 3, 4, 5]));
    let report = run(&stack_argument_object(), definition).expect("matching stack argument");
    assert_eq!(report.fulfilled, 1);

    let definition = TestDefinition::new("_five")
        .bind("_sink", 0xb00)
        .should_call(CallExpectation::new("_sink").with([1, 2, 3, 4, 6]));
    let err = expectation_error(run(&stack_argument_object(), definition));
    match err {
        ExpectationError::ArgumentMismatch {
            location,
            expected,
            actual,
            ..
        } => {
            assert!(matches!(location, ArgLocation::Stack { offset: 0, .. }));
            assert_eq!((expected.as_str(), actual.as_str()), ("6 (0x6)", "5 (0x5)"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}
