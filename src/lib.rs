pub mod cli;
pub mod driver;
pub mod format;
pub mod harness;
pub mod layout;
pub mod object;
pub mod resolver;
pub mod sim;

pub use driver::run;
