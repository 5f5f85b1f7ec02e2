#![allow(dead_code)]

use sh4objtest::format::sysrof::{FIRST_CHUNK, MAGIC};
use sh4objtest::layout::{link, LinkedObject};

pub const MODULE_HEADER: u8 = 0x04;
pub const UNIT_HEADER: u8 = 0x06;
pub const SECTION_HEADER: u8 = 0x08;
pub const IMPORTS: u8 = 0x0c;
pub const EXPORTS: u8 = 0x14;
pub const SECTION_SELECTION: u8 = 0x1a;
pub const OBJECT_DATA: u8 = 0x1c;
pub const RELOCATION: u8 = 0x20;
pub const TERMINATION: u8 = 0x7f;
pub const CONTINUATION: u8 = 0x80;

pub fn chunk(kind: u8, payload: &[u8]) -> Vec<u8> {
    let len = u8::try_from(payload.len() + 3).expect("chunk payload too long");
    let mut out = vec![0x00, kind, len];
    out.extend_from_slice(payload);
    out
}

pub fn prefixed(text: &str) -> Vec<u8> {
    let mut out = vec![u8::try_from(text.len()).expect("name too long")];
    out.extend_from_slice(text.as_bytes());
    out
}

/// Little-endian instruction words.
pub fn words(code: &[u16]) -> Vec<u8> {
    code.iter().flat_map(|w| w.to_le_bytes()).collect()
}

/// Builds SYSROF chunk streams the way the compiler lays them out.
#[derive(Debug, Clone)]
pub struct ObjectBuilder {
    chunks: Vec<Vec<u8>>,
}

impl Default for ObjectBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectBuilder {
    pub fn new() -> Self {
        let mut module = vec![0x01];
        module.extend_from_slice(&[0; 12]);
        module.extend_from_slice(&1u16.to_be_bytes());
        module.push(0);
        module.extend_from_slice(b"0100");
        module.push(0);
        module.push(0x20);
        module.extend_from_slice(&[0, 0, 0]);
        module.push(0);
        module.extend(prefixed(""));
        module.extend(prefixed(""));
        module.extend(prefixed("fixture"));
        module.extend(prefixed("SH4"));

        let mut unit = vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00];
        unit.extend(prefixed("fixture.c"));
        unit.extend(prefixed("SHC"));
        unit.extend_from_slice(&[0; 12]);

        Self {
            chunks: vec![chunk(MODULE_HEADER, &module), chunk(UNIT_HEADER, &unit)],
        }
    }

    pub fn raw(mut self, bytes: Vec<u8>) -> Self {
        self.chunks.push(bytes);
        self
    }

    pub fn section(self, name: &str, alignment: u32) -> Self {
        let mut p = vec![0x00];
        p.extend_from_slice(&0u32.to_be_bytes());
        p.extend_from_slice(&0u32.to_be_bytes());
        p.extend_from_slice(&alignment.to_be_bytes());
        p.push(0x00);
        p.push(0xd4);
        p.push(0x00);
        p.extend(prefixed(name));
        self.raw(chunk(SECTION_HEADER, &p))
    }

    pub fn select(self, section: u16) -> Self {
        let mut p = 0u16.to_be_bytes().to_vec();
        p.extend_from_slice(&section.to_be_bytes());
        self.raw(chunk(SECTION_SELECTION, &p))
    }

    /// Object data for the current section, split into chunk-sized records.
    pub fn data(mut self, address: u32, bytes: &[u8]) -> Self {
        for (i, part) in bytes.chunks(200).enumerate() {
            let mut p = vec![0x80];
            p.extend_from_slice(&(address + (i as u32) * 200).to_be_bytes());
            p.push(part.len() as u8);
            p.extend_from_slice(part);
            self = self.raw(chunk(OBJECT_DATA, &p));
        }
        self
    }

    pub fn code(self, address: u32, code: &[u16]) -> Self {
        self.data(address, &words(code))
    }

    pub fn imports_payload(names: &[&str]) -> Vec<u8> {
        names
            .iter()
            .flat_map(|name| {
                let mut record = vec![0x00];
                record.extend(prefixed(name));
                record
            })
            .collect()
    }

    pub fn imports(self, names: &[&str]) -> Self {
        self.raw(chunk(IMPORTS, &Self::imports_payload(names)))
    }

    pub fn export(self, section: u16, offset: u32, name: &str) -> Self {
        let mut p = section.to_be_bytes().to_vec();
        p.push(0x00);
        p.extend_from_slice(&offset.to_be_bytes());
        p.extend(prefixed(name));
        self.raw(chunk(EXPORTS, &p))
    }

    fn relocation_head(address: u32, rel_len: u8, discriminator: u8) -> Vec<u8> {
        let mut p = vec![0x00];
        p.extend_from_slice(&address.to_be_bytes());
        p.extend_from_slice(&[0x00, 0x20, 0x00, 0x08]);
        p.extend_from_slice(&[0x00, 0x00]);
        p.extend_from_slice(&[0x00, 0x00, rel_len, discriminator]);
        p
    }

    /// Slot at `address` points at `imports[index]`.
    pub fn external(self, address: u32, index: u8) -> Self {
        let mut p = Self::relocation_head(address, 4, 2);
        p.extend_from_slice(&[0x00, index, 0xff]);
        self.raw(chunk(RELOCATION, &p))
    }

    /// Slot at `address` points at `imports[index] + offset`.
    pub fn external_with_offset(self, address: u32, index: u8, offset: u8) -> Self {
        let mut p = Self::relocation_head(address, 11, 3);
        p.extend_from_slice(&[0, 0, 0, 0, offset, 0, 0, index, 0, 0xff]);
        self.raw(chunk(RELOCATION, &p))
    }

    /// Slot at `address` points into `section`; the offset is already in the slot.
    pub fn local_short(self, address: u32, section: u16) -> Self {
        let mut p = Self::relocation_head(address, 4, 0);
        p.extend_from_slice(&section.to_be_bytes());
        p.push(0xff);
        self.raw(chunk(RELOCATION, &p))
    }

    /// Slot at `address` points at `section + target`.
    pub fn local_long(self, address: u32, section: u8, target: u32) -> Self {
        let mut p = Self::relocation_head(address, 11, 0);
        p.extend_from_slice(&[0x00, section, 0x00, 0x00]);
        p.extend_from_slice(&target.to_be_bytes());
        p.extend_from_slice(&[0x00, 0xff]);
        self.raw(chunk(RELOCATION, &p))
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = MAGIC.to_vec();
        out.resize(FIRST_CHUNK, 0);
        for c in &self.chunks {
            out.extend_from_slice(c);
        }
        out.extend(chunk(TERMINATION, &[]));
        out
    }

    pub fn link(&self) -> LinkedObject {
        let parsed = sh4objtest::format::sysrof::parse_object(&self.build()).expect("parse fixture");
        link(parsed).expect("link fixture")
    }
}
