use crate::format::{FormatError, ParseWarning};

/// Root of a parsed object file. Exactly one module with exactly one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedObject {
    pub module: ModuleHeader,
    pub unit: Unit,
    pub imports: Vec<ImportSymbol>,
    pub warnings: Vec<ParseWarning>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    Relative { unit: u16, section: u16 },
    Absolute(u32),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleHeader {
    pub module_type: u8,
    pub build_date: Vec<u8>,
    pub unit_count: u16,
    pub version: Vec<u8>,
    pub address_update: u8,
    pub segmented: bool,
    pub address_field_len: u8,
    pub space_within_segment: u8,
    pub segment_size: u8,
    pub segment_shift: u8,
    pub entry: Option<EntryPoint>,
    pub os_name: Vec<u8>,
    pub system_name: Vec<u8>,
    pub module_name: Vec<u8>,
    pub cpu_name: Vec<u8>,
}

impl ModuleHeader {
    pub const TYPE_ABSOLUTE: u8 = 0;
    pub const TYPE_RELATIVE: u8 = 1;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Unit {
    pub format: u8,
    pub section_count: u16,
    pub external_refs: u16,
    pub external_defs: u16,
    pub name: Vec<u8>,
    pub tool_name: Vec<u8>,
    pub tool_date: Vec<u8>,
    pub sections: Vec<Section>,
}

impl Unit {
    /// First export named `name`, scanning sections in declaration order.
    #[must_use]
    pub fn find_export(&self, name: &str) -> Option<&ExportSymbol> {
        self.sections
            .iter()
            .find_map(|section| section.exports.iter().find(|e| e.name == name))
    }

    /// First export whose linked address equals `address`.
    #[must_use]
    pub fn find_export_at(&self, address: u32) -> Option<&ExportSymbol> {
        self.sections.iter().find_map(|section| {
            section
                .exports
                .iter()
                .find(|e| e.linked_address == Some(address))
        })
    }

    pub fn exports(&self) -> impl Iterator<Item = &ExportSymbol> {
        self.sections.iter().flat_map(|s| s.exports.iter())
    }

    pub fn relocations(&self) -> impl Iterator<Item = &Relocation> {
        self.sections.iter().flat_map(|s| s.relocations.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionContents {
    Code,
    Data,
    Stack,
    Dummy,
    Special,
    Other(u8),
}

impl SectionContents {
    #[must_use]
    pub fn from_u8(contents: u8) -> Self {
        match contents {
            0 => Self::Code,
            1 => Self::Data,
            2 => Self::Stack,
            3 => Self::Dummy,
            4 => Self::Special,
            other => Self::Other(other),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    pub index: usize,
    pub format: u8,
    pub address: u32,
    pub length: u32,
    pub alignment: u32,
    pub contents: u8,
    pub concat: u8,
    pub read: u8,
    pub write: u8,
    pub exec: u8,
    pub init: u8,
    pub flags3: u8,
    pub name: String,
    pub object_data: Vec<ObjectData>,
    pub relocations: Vec<Relocation>,
    pub local_relocations_long: Vec<LocalRelocationLong>,
    pub local_relocations_short: Vec<LocalRelocationShort>,
    pub exports: Vec<ExportSymbol>,
    linked_address: Option<u32>,
    assembled_len: usize,
}

impl Section {
    #[must_use]
    pub fn new(index: usize, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn kind(&self) -> SectionContents {
        SectionContents::from_u8(self.contents)
    }

    #[must_use]
    pub fn linked_address(&self) -> Option<u32> {
        self.linked_address
    }

    /// Length of the assembled data once every fragment so far is laid out.
    #[must_use]
    pub fn assembled_len(&self) -> usize {
        self.assembled_len
    }

    /// Appends a fragment. Fragments must not start before the data already
    /// assembled; forward gaps are zero-filled on assembly.
    ///
    /// # Errors
    /// Returns `FormatError::BackwardObjectData` when the fragment overlaps or
    /// precedes what is already there.
    pub fn push_object_data(&mut self, fragment: ObjectData) -> Result<(), FormatError> {
        let address = fragment.address as usize;
        if address < self.assembled_len {
            return Err(FormatError::BackwardObjectData {
                section: self.index,
                address: fragment.address,
                length: self.assembled_len,
            });
        }
        self.assembled_len = address + fragment.data.len();
        self.object_data.push(fragment);
        Ok(())
    }

    #[must_use]
    pub fn assemble(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.assembled_len);
        for fragment in &self.object_data {
            let address = fragment.address as usize;
            if address > data.len() {
                data.resize(address, 0);
            }
            data.extend_from_slice(&fragment.data);
        }
        data
    }

    /// Assigns the linked base and propagates it to every record owned by the
    /// section. Only the linker calls this, once.
    pub(crate) fn relocate(&mut self, base: u32) {
        self.linked_address = Some(base);
        for relocation in &mut self.relocations {
            relocation.linked_address = Some(base.wrapping_add(relocation.address));
        }
        for export in &mut self.exports {
            export.linked_address = Some(base.wrapping_add(export.offset));
        }
        for local in &mut self.local_relocations_long {
            local.linked_address = Some(base.wrapping_add(local.address));
        }
        for local in &mut self.local_relocations_short {
            local.linked_address = Some(base.wrapping_add(local.address));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectData {
    pub flags: u8,
    pub address: u32,
    pub data: Vec<u8>,
}

impl ObjectData {
    pub const HAS_START_ADDRESS: u8 = 0x80;
    pub const COMPRESSED: u8 = 0x40;

    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.flags & Self::COMPRESSED != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSymbol {
    pub name: String,
    pub kind: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSymbol {
    pub name: String,
    pub section: usize,
    pub kind: u8,
    pub offset: u32,
    pub linked_address: Option<u32>,
}

/// Fixup of a literal-pool slot against an imported symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    pub flags: u8,
    /// Slot offset inside the owning section.
    pub address: u32,
    pub bitloc: u8,
    pub field_length: u8,
    pub bcount: u8,
    pub operator: u8,
    pub section: u16,
    pub opcode: u8,
    pub addend_len: u8,
    pub rel_len: u8,
    pub import_index: usize,
    pub name: String,
    pub offset: u32,
    pub linked_address: Option<u32>,
}

/// Inter-section pointer with an explicit offset into the target section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRelocationLong {
    pub section_index: usize,
    pub address: u32,
    pub target: u32,
    pub linked_address: Option<u32>,
}

/// Inter-section pointer whose offset lives in the slot itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRelocationShort {
    pub section_index: usize,
    pub address: u32,
    pub linked_address: Option<u32>,
}
