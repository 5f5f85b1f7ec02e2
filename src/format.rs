use thiserror::Error;

/// Fatal problems found while reading a SYSROF object. Any of these aborts
/// parsing; nothing partial is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("invalid magic {found:02x?}, expected 80 21 00 80")]
    BadMagic { found: Vec<u8> },
    #[error("unexpected end of file at offset {offset:#x}")]
    UnexpectedEof { offset: usize },
    #[error("chunk at offset {offset:#x} declares length {len}, shorter than its header")]
    InvalidChunkLength { offset: usize, len: u8 },
    #[error("multiple modules are unsupported")]
    MultipleModules,
    #[error("multiple units are unsupported")]
    MultipleUnits,
    #[error("unit header at offset {offset:#x} appears before any module header")]
    UnitBeforeModule { offset: usize },
    #[error("object ends at offset {offset:#x} without a module header")]
    MissingModule { offset: usize },
    #[error("chunk at offset {offset:#x} requires a unit header first")]
    MissingUnit { offset: usize },
    #[error("object declares no sections but carries section data at offset {offset:#x}")]
    NoSection { offset: usize },
    #[error("unknown section index {index} referenced at offset {offset:#x}")]
    UnknownSection { index: usize, offset: usize },
    #[error("unsupported relocation operator {operator} at offset {offset:#x}")]
    UnsupportedOperator { operator: u8, offset: usize },
    #[error("unsupported relocation length {length} at offset {offset:#x}")]
    UnsupportedRelocationLength { length: u8, offset: usize },
    #[error("wrong terminator {found:#04x} at offset {offset:#x}, expected 0xff")]
    WrongTerminator { found: u8, offset: usize },
    #[error("unexpected object data address {address:#x} in section {section}, current length is {length:#x}")]
    BackwardObjectData {
        section: usize,
        address: u32,
        length: usize,
    },
}

/// Recoverable oddities. The offending record is left out of the model and
/// parsing continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseWarning {
    #[error("ignoring unknown chunk type {kind:#04x} at offset {offset:#x}")]
    UnknownChunk { kind: u8, offset: usize },
    #[error("skipping relocation at offset {offset:#x}: import index {index} out of range ({count} imports)")]
    ImportIndexOutOfRange {
        index: usize,
        count: usize,
        offset: usize,
    },
    #[error("unsupported relocation variant {discriminator} (length {length}) at offset {offset:#x}")]
    UnsupportedRelocationVariant {
        discriminator: u8,
        length: u8,
        offset: usize,
    },
    #[error("relocation high nibble byte is {value:#04x} at offset {offset:#x}, expected zero")]
    NonZeroHighNibble { value: u8, offset: usize },
}

/// Chunk types selected by the low seven bits of the chunk type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    ModuleHeader,
    UnitHeader,
    SectionHeader,
    Imports,
    Exports,
    SectionSelection,
    ObjectData,
    Relocation,
    Termination,
    Unknown(u8),
}

impl ChunkKind {
    #[must_use]
    pub fn from_u8(kind: u8) -> Self {
        match kind & 0x7f {
            0x04 => Self::ModuleHeader,
            0x06 => Self::UnitHeader,
            0x08 => Self::SectionHeader,
            0x0c => Self::Imports,
            0x14 => Self::Exports,
            0x1a => Self::SectionSelection,
            0x1c => Self::ObjectData,
            0x20 => Self::Relocation,
            0x7f => Self::Termination,
            other => Self::Unknown(other),
        }
    }
}

pub mod reader;
pub mod sysrof;
