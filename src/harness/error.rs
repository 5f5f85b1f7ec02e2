use std::fmt;

use thiserror::Error;

use crate::resolver::ResolveError;
use crate::sim::types::RangeError;
use crate::sim::SimError;

/// Where a call argument was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgLocation {
    Register(usize),
    FloatRegister(usize),
    Stack { offset: u32, address: u32 },
}

impl fmt::Display for ArgLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Register(n) => write!(f, "r{n}"),
            Self::FloatRegister(n) => write!(f, "fr{n}"),
            Self::Stack { offset, address } => write!(f, "stack offset {offset} ({address:#010x})"),
        }
    }
}

/// Value seen or expected at a memory access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessValue {
    Int { value: u32, bits: u32 },
    Str(Vec<u8>),
}

impl fmt::Display for AccessValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int { value, bits } => write!(f, "{value} ({value:#x}, {bits}-bit)"),
            Self::Str(bytes) => write!(f, "{:?}", String::from_utf8_lossy(bytes)),
        }
    }
}

/// Why a memory access did not match the front expectation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessMismatch {
    #[error("expecting {next}")]
    NotExpected { next: String },
    #[error("expecting a {expected}-bit access")]
    Width { expected: u32 },
    #[error("expecting an access to {expected}")]
    Address { expected: String },
    #[error("expecting {expected}")]
    Value { expected: AccessValue },
}

/// A test failure: the program did something the definition did not ask for.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpectationError {
    #[error("unexpected call to {target} at {pc:#010x}, expecting {next}")]
    UnexpectedCall { target: String, pc: u32, next: String },
    #[error("unexpected call to {target} at {pc:#010x}, expecting {expected}")]
    NameMismatch {
        target: String,
        pc: u32,
        expected: String,
    },
    #[error("unexpected argument for {function} in {location}: expected {expected}, got {actual}")]
    ArgumentMismatch {
        function: String,
        location: ArgLocation,
        expected: String,
        actual: String,
    },
    #[error("unexpected write of {actual} to {location}, {reason}")]
    UnexpectedWrite {
        address: u32,
        location: String,
        actual: AccessValue,
        reason: AccessMismatch,
    },
    #[error("unexpected read of {actual} from {location}, {reason}")]
    UnexpectedRead {
        address: u32,
        location: String,
        actual: AccessValue,
        reason: AccessMismatch,
    },
    #[error("{count} expectation(s) still pending, next is {next}")]
    PendingExpectations { count: usize, next: String },
    #[error("unexpected return value {actual}, expecting {expected}")]
    UnexpectedReturn { expected: String, actual: String },
}

/// Outcome of a failed run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Simulation(#[from] SimError),
    #[error(transparent)]
    Expectation(#[from] ExpectationError),
    #[error(transparent)]
    Setup(#[from] ResolveError),
    #[error("invalid test definition: {0}")]
    Definition(#[from] RangeError),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl RunError {
    /// True for ordinary test failures, false for problems with the
    /// simulator or the test setup.
    #[must_use]
    pub fn is_expectation(&self) -> bool {
        matches!(self, Self::Expectation(_))
    }
}
