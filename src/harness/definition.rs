use std::fmt;

use crate::sim::types::{mask_to_width, RangeError};
use crate::sim::{SimError, Simulator};

/// Side effect run at the moment an expected call happens.
pub type CallCallback = Box<dyn FnMut(&mut Simulator, &[Argument]) -> Result<(), SimError>>;

/// Expected value of one call argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Int(i64),
    Float(f32),
    /// A `char*` whose NUL-terminated contents must match.
    Str(Vec<u8>),
    /// Consumes an integer slot without checking it.
    Wildcard,
    /// A pointer into the caller's stack frame.
    Local,
}

impl From<i64> for Argument {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Argument {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for Argument {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f32> for Argument {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Argument {
    fn from(value: &str) -> Self {
        Self::Str(value.as_bytes().to_vec())
    }
}

/// Argument passed to the entry function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntryArgument {
    Int(i64),
    Float(f32),
}

impl EntryArgument {
    /// Bits placed in the argument's register or stack slot.
    ///
    /// # Errors
    /// `RangeError` when an integer does not fit 32 bits either way.
    pub fn bits(self) -> Result<u32, RangeError> {
        match self {
            Self::Int(v) => mask_to_width(v, 32),
            Self::Float(v) => Ok(v.to_bits()),
        }
    }
}

impl From<i64> for EntryArgument {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for EntryArgument {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for EntryArgument {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f32> for EntryArgument {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReturnValue {
    Int(i64),
    Float(f32),
}

impl ReturnValue {
    /// Bits placed in R0 or FR0.
    ///
    /// # Errors
    /// `RangeError` when an integer does not fit 32 bits either way.
    pub fn bits(self) -> Result<u32, RangeError> {
        match self {
            Self::Int(v) => mask_to_width(v, 32),
            Self::Float(v) => Ok(v.to_bits()),
        }
    }
}

pub struct CallExpectation {
    pub name: String,
    /// Call target for stubs that are not linked symbols. Filled from the
    /// bindings when left empty.
    pub address: Option<u32>,
    pub arguments: Vec<Argument>,
    pub returns: Option<ReturnValue>,
    pub callback: Option<CallCallback>,
}

impl fmt::Debug for CallExpectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallExpectation")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("arguments", &self.arguments)
            .field("returns", &self.returns)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl CallExpectation {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
            arguments: Vec::new(),
            returns: None,
            callback: None,
        }
    }

    #[must_use]
    pub fn at(mut self, address: u32) -> Self {
        self.address = Some(address);
        self
    }

    #[must_use]
    pub fn with<I, A>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Argument>,
    {
        self.arguments = arguments.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn and_return(mut self, value: i64) -> Self {
        self.returns = Some(ReturnValue::Int(value));
        self
    }

    #[must_use]
    pub fn and_return_float(mut self, value: f32) -> Self {
        self.returns = Some(ReturnValue::Float(value));
        self
    }

    #[must_use]
    pub fn run<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&mut Simulator, &[Argument]) -> Result<(), SimError> + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }
}

/// Width-checked memory access. `value` is stored masked to `bits`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryAccess {
    pub address: u32,
    pub value: u32,
    pub bits: u32,
}

impl MemoryAccess {
    /// # Errors
    /// `RangeError` when `value` does not fit `bits` or `bits` is not 8, 16 or 32.
    pub fn new(address: u32, value: i64, bits: u32) -> Result<Self, RangeError> {
        Ok(Self {
            address,
            value: mask_to_width(value, bits)?,
            bits,
        })
    }
}

#[derive(Debug)]
pub enum Expectation {
    Call(CallExpectation),
    Read(MemoryAccess),
    Write(MemoryAccess),
    StringWrite { address: u32, value: Vec<u8> },
}

impl Expectation {
    /// Short label for diagnostics.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Call(call) => format!("call to {}", call.name),
            Self::Read(access) => {
                format!("{}-bit read of {:#x} from {:#010x}", access.bits, access.value, access.address)
            }
            Self::Write(access) => {
                format!("{}-bit write of {:#x} to {:#010x}", access.bits, access.value, access.address)
            }
            Self::StringWrite { address, value } => format!(
                "char* write of {:?} to {address:#010x}",
                String::from_utf8_lossy(value)
            ),
        }
    }
}

impl From<CallExpectation> for Expectation {
    fn from(call: CallExpectation) -> Self {
        Self::Call(call)
    }
}

/// Pre-run memory poke, applied after the image is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInitialization {
    pub address: u32,
    pub value: u32,
    pub bits: u32,
}

impl MemoryInitialization {
    /// # Errors
    /// `RangeError` when `value` does not fit `bits` or `bits` is not 8, 16 or 32.
    pub fn new(bits: u32, address: u32, value: i64) -> Result<Self, RangeError> {
        Ok(Self {
            address,
            value: mask_to_width(value, bits)?,
            bits,
        })
    }
}

/// Binding of an external symbol to an address in simulated memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRelocation {
    pub name: String,
    pub address: u32,
}

/// Everything one test method declares about a single run.
#[derive(Debug)]
pub struct TestDefinition {
    pub entry: String,
    pub arguments: Vec<EntryArgument>,
    pub returns: Option<ReturnValue>,
    pub expectations: Vec<Expectation>,
    pub relocations: Vec<TestRelocation>,
    pub initializations: Vec<MemoryInitialization>,
    pub randomize_memory: bool,
    pub stop_when_fulfilled: bool,
}

impl TestDefinition {
    #[must_use]
    pub fn new(entry: impl Into<String>) -> Self {
        Self {
            entry: entry.into(),
            arguments: Vec::new(),
            returns: None,
            expectations: Vec::new(),
            relocations: Vec::new(),
            initializations: Vec::new(),
            randomize_memory: false,
            stop_when_fulfilled: false,
        }
    }

    #[must_use]
    pub fn with_args<I, A>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<EntryArgument>,
    {
        self.arguments.extend(arguments.into_iter().map(Into::into));
        self
    }

    /// Int and float returns are exclusive; the last one set wins.
    #[must_use]
    pub fn should_return(mut self, value: i64) -> Self {
        self.returns = Some(ReturnValue::Int(value));
        self
    }

    #[must_use]
    pub fn should_return_float(mut self, value: f32) -> Self {
        self.returns = Some(ReturnValue::Float(value));
        self
    }

    #[must_use]
    pub fn should_call(mut self, call: CallExpectation) -> Self {
        self.expectations.push(Expectation::Call(call));
        self
    }

    /// # Errors
    /// `RangeError` when `value` does not fit `bits`.
    pub fn should_read(mut self, bits: u32, address: u32, value: i64) -> Result<Self, RangeError> {
        self.expectations
            .push(Expectation::Read(MemoryAccess::new(address, value, bits)?));
        Ok(self)
    }

    /// # Errors
    /// `RangeError` when `value` does not fit `bits`.
    pub fn should_write(mut self, bits: u32, address: u32, value: i64) -> Result<Self, RangeError> {
        self.expectations
            .push(Expectation::Write(MemoryAccess::new(address, value, bits)?));
        Ok(self)
    }

    #[must_use]
    pub fn should_write_string(mut self, address: u32, value: impl AsRef<[u8]>) -> Self {
        self.expectations.push(Expectation::StringWrite {
            address,
            value: value.as_ref().to_vec(),
        });
        self
    }

    #[must_use]
    pub fn bind(mut self, name: impl Into<String>, address: u32) -> Self {
        self.relocations.push(TestRelocation {
            name: name.into(),
            address,
        });
        self
    }

    /// # Errors
    /// `RangeError` when `value` does not fit `bits`.
    pub fn initialize(mut self, bits: u32, address: u32, value: i64) -> Result<Self, RangeError> {
        self.initializations
            .push(MemoryInitialization::new(bits, address, value)?);
        Ok(self)
    }

    #[must_use]
    pub fn randomize_memory(mut self, enabled: bool) -> Self {
        self.randomize_memory = enabled;
        self
    }

    #[must_use]
    pub fn stop_when_fulfilled(mut self, enabled: bool) -> Self {
        self.stop_when_fulfilled = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{
        Argument, CallExpectation, EntryArgument, Expectation, MemoryAccess, ReturnValue,
        TestDefinition, TestRelocation,
    };
    use crate::sim::types::RangeError;

    #[test]
    fn memory_values_are_masked_to_width() {
        assert_eq!(
            MemoryAccess::new(0x10, -1, 8),
            Ok(MemoryAccess {
                address: 0x10,
                value: 0xff,
                bits: 8
            })
        );
        assert_eq!(
            MemoryAccess::new(0x10, 0x1_0000, 16),
            Err(RangeError {
                value: 0x1_0000,
                bits: 16
            })
        );
        assert!(MemoryAccess::new(0, 1, 12).is_err());
    }

    #[test]
    fn builder_collects_in_order() {
        let definition = TestDefinition::new("_main")
            .with_args([1, 2])
            .should_call(CallExpectation::new("_foo").with([Argument::Wildcard, "hi".into()]))
            .should_write(32, 0x1000, 42)
            .expect("write")
            .should_write_string(0x2000, "ok")
            .bind("_foo", 0x800)
            .should_return(-1);

        assert_eq!(definition.arguments.len(), 2);
        assert_eq!(definition.expectations.len(), 3);
        assert!(matches!(&definition.expectations[0], Expectation::Call(c) if c.name == "_foo"));
        assert_eq!(
            definition.relocations,
            vec![TestRelocation {
                name: "_foo".to_string(),
                address: 0x800
            }]
        );
        assert_eq!(definition.returns.map(ReturnValue::bits), Some(Ok(0xffff_ffff)));
    }

    #[test]
    fn integer_bits_must_fit_a_register() {
        assert_eq!(ReturnValue::Int(-1).bits(), Ok(0xffff_ffff));
        assert_eq!(ReturnValue::Int(0xffff_ffff).bits(), Ok(0xffff_ffff));
        assert_eq!(
            ReturnValue::Int(0x1_0000_0006).bits(),
            Err(RangeError {
                value: 0x1_0000_0006,
                bits: 32
            })
        );
        assert!(EntryArgument::Int(-(1 << 31) - 1).bits().is_err());
        assert_eq!(EntryArgument::Float(1.0).bits(), Ok(0x3f80_0000));
    }

    #[test]
    fn call_with_replaces_arguments() {
        let call = CallExpectation::new("_f").with([1]).with([2.5f32]);
        assert_eq!(call.arguments, vec![Argument::Float(2.5)]);
    }
}
