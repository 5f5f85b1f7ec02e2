#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentKind {
    General,
    Float,
}

/// Where one argument lives at the moment of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentStorage {
    Register(usize),
    FloatRegister(usize),
    /// Byte offset from SP.
    Stack(u32),
}

const GENERAL_REGISTERS: [usize; 4] = [4, 5, 6, 7];
const FLOAT_REGISTERS: [usize; 4] = [4, 5, 6, 7];

/// SH4 default calling convention: R4-R7 for integers, FR4-FR7 for floats,
/// then 4-byte stack slots shared by both kinds.
#[derive(Debug, Clone, Default)]
pub struct CallingConvention {
    general: usize,
    float: usize,
    stack_offset: u32,
}

impl CallingConvention {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, kind: ArgumentKind) -> ArgumentStorage {
        match kind {
            ArgumentKind::General => match GENERAL_REGISTERS.get(self.general) {
                Some(&register) => {
                    self.general += 1;
                    ArgumentStorage::Register(register)
                }
                None => self.next_stack(),
            },
            ArgumentKind::Float => match FLOAT_REGISTERS.get(self.float) {
                Some(&register) => {
                    self.float += 1;
                    ArgumentStorage::FloatRegister(register)
                }
                None => self.next_stack(),
            },
        }
    }

    /// Bytes of stack used so far.
    #[must_use]
    pub fn stack_size(&self) -> u32 {
        self.stack_offset
    }

    fn next_stack(&mut self) -> ArgumentStorage {
        let offset = self.stack_offset;
        self.stack_offset += 4;
        ArgumentStorage::Stack(offset)
    }
}
