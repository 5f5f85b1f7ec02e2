//! Drives a linked object through the simulator and checks what it does
//! against an ordered list of expectations.

pub mod convention;
pub mod coverage;
pub mod definition;
pub mod error;
pub mod run;

pub use coverage::{Access, Coverage};
pub use definition::{
    Argument, CallExpectation, EntryArgument, Expectation, MemoryAccess, MemoryInitialization,
    ReturnValue, TestDefinition, TestRelocation,
};
pub use error::{ExpectationError, RunError};
pub use run::{execute, NoopObserver, RunMessage, RunObserver, RunOptions, RunReport};
