use tracing::{debug, trace, warn};

use crate::format::reader::Reader;
use crate::format::{ChunkKind, FormatError, ParseWarning};
use crate::object::{
    EntryPoint, ExportSymbol, ImportSymbol, LocalRelocationLong, LocalRelocationShort,
    ModuleHeader, ObjectData, ParsedObject, Relocation, Section, Unit,
};

pub const MAGIC: [u8; 4] = [0x80, 0x21, 0x00, 0x80];
pub const FIRST_CHUNK: usize = 0x20;
const CHUNK_HEADER_LEN: usize = 3;
const REPLACE_OPERATOR: u8 = 8;
const TERMINATOR: u8 = 0xff;

/// Parses a whole SYSROF object held in memory.
///
/// # Errors
/// Returns `FormatError` on any structural problem. Recoverable problems are
/// collected in `ParsedObject::warnings` instead.
pub fn parse_object(input: &[u8]) -> Result<ParsedObject, FormatError> {
    if input.len() < MAGIC.len() || input[..MAGIC.len()] != MAGIC {
        return Err(FormatError::BadMagic {
            found: input.iter().take(MAGIC.len()).copied().collect(),
        });
    }

    let mut ctx = ParserContext::new(input);
    ctx.reader.seek(FIRST_CHUNK);

    while !ctx.reader.is_eof() {
        let kind = ctx.begin_chunk()?;
        trace!(offset = ctx.chunk_base, ?kind, len = ctx.chunk_end - ctx.chunk_base, "chunk");
        match kind {
            ChunkKind::ModuleHeader => ctx.module_header()?,
            ChunkKind::UnitHeader => ctx.unit_header()?,
            ChunkKind::SectionHeader => ctx.section_header()?,
            ChunkKind::Imports => ctx.imports()?,
            ChunkKind::Exports => ctx.exports()?,
            ChunkKind::SectionSelection => ctx.section_selection()?,
            ChunkKind::ObjectData => ctx.object_data()?,
            ChunkKind::Relocation => ctx.relocations()?,
            ChunkKind::Termination => break,
            ChunkKind::Unknown(kind) => {
                ctx.warn(ParseWarning::UnknownChunk {
                    kind,
                    offset: ctx.chunk_base,
                });
            }
        }
        ctx.reader.seek(ctx.chunk_end);
    }

    ctx.finish()
}

/// Cursor state threaded through the chunk handlers.
///
/// `chunk_base`/`chunk_end` always describe the chunk the reader is inside.
/// Records that cross a chunk boundary advance them through
/// [`ParserContext::continue_chunk`].
struct ParserContext<'a> {
    reader: Reader<'a>,
    chunk_base: usize,
    chunk_end: usize,
    module: Option<ModuleHeader>,
    unit: Option<Unit>,
    current_section: Option<usize>,
    imports: Vec<ImportSymbol>,
    warnings: Vec<ParseWarning>,
}

impl<'a> ParserContext<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self {
            reader: Reader::new(input),
            chunk_base: 0,
            chunk_end: 0,
            module: None,
            unit: None,
            current_section: None,
            imports: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn finish(self) -> Result<ParsedObject, FormatError> {
        let offset = self.reader.tell();
        let module = self.module.ok_or(FormatError::MissingModule { offset })?;
        let unit = self.unit.ok_or(FormatError::MissingUnit { offset })?;
        debug!(
            sections = unit.sections.len(),
            imports = self.imports.len(),
            warnings = self.warnings.len(),
            "parsed object"
        );
        Ok(ParsedObject {
            module,
            unit,
            imports: self.imports,
            warnings: self.warnings,
        })
    }

    fn warn(&mut self, warning: ParseWarning) {
        warn!("{warning}");
        self.warnings.push(warning);
    }

    /// Reads a chunk header at the cursor and makes it the current chunk.
    fn begin_chunk(&mut self) -> Result<ChunkKind, FormatError> {
        let base = self.reader.tell();
        let _ukn = self.reader.read_u8()?;
        let kind = ChunkKind::from_u8(self.reader.read_u8()?);
        let len = self.reader.read_u8()?;
        if usize::from(len) < CHUNK_HEADER_LEN && kind != ChunkKind::Termination {
            return Err(FormatError::InvalidChunkLength { offset: base, len });
        }
        self.chunk_base = base;
        self.chunk_end = base + usize::from(len).max(CHUNK_HEADER_LEN);
        Ok(kind)
    }

    /// Moves into the next chunk when a record runs past the current one.
    fn continue_chunk(&mut self) -> Result<(), FormatError> {
        self.reader.seek(self.chunk_end);
        let kind = self.begin_chunk()?;
        trace!(offset = self.chunk_base, ?kind, "record continues in next chunk");
        Ok(())
    }

    fn spanning_u8(&mut self) -> Result<u8, FormatError> {
        if self.reader.tell() >= self.chunk_end {
            self.continue_chunk()?;
        }
        self.reader.read_u8()
    }

    fn spanning_u16_be(&mut self) -> Result<u16, FormatError> {
        Ok(u16::from_be_bytes([self.spanning_u8()?, self.spanning_u8()?]))
    }

    fn spanning_u32_be(&mut self) -> Result<u32, FormatError> {
        Ok(u32::from_be_bytes([
            self.spanning_u8()?,
            self.spanning_u8()?,
            self.spanning_u8()?,
            self.spanning_u8()?,
        ]))
    }

    fn spanning_prefixed(&mut self) -> Result<Vec<u8>, FormatError> {
        let len = self.spanning_u8()?;
        (0..len).map(|_| self.spanning_u8()).collect()
    }

    fn in_chunk(&self) -> bool {
        self.reader.tell() < self.chunk_end
    }

    fn unit_mut(&mut self) -> Result<&mut Unit, FormatError> {
        let offset = self.chunk_base;
        self.unit.as_mut().ok_or(FormatError::MissingUnit { offset })
    }

    /// Section targeted by ObjectData/Relocation chunks. Without an explicit
    /// selection the most recently declared section is used.
    fn current_section_mut(&mut self) -> Result<&mut Section, FormatError> {
        let offset = self.chunk_base;
        let selected = self.current_section;
        let unit = self.unit_mut()?;
        let index = match selected {
            Some(index) => index,
            None => unit
                .sections
                .len()
                .checked_sub(1)
                .ok_or(FormatError::NoSection { offset })?,
        };
        unit.sections
            .get_mut(index)
            .ok_or(FormatError::UnknownSection { index, offset })
    }

    fn section_count(&self) -> usize {
        self.unit.as_ref().map_or(0, |u| u.sections.len())
    }

    fn module_header(&mut self) -> Result<(), FormatError> {
        if self.module.is_some() {
            return Err(FormatError::MultipleModules);
        }
        let r = &mut self.reader;
        let module_type = r.read_u8()?;
        let build_date = r.read_bytes(12)?.to_vec();
        let unit_count = r.read_u16_be()?;
        if unit_count > 1 {
            return Err(FormatError::MultipleUnits);
        }
        let _code = r.read_u8()?;
        let version = r.read_bytes(4)?.to_vec();
        let address_update = r.read_u8()?;
        let segment = r.read_u8()?;
        let space_within_segment = r.read_u8()?;
        let segment_size = r.read_u8()?;
        let segment_shift = r.read_u8()?;
        let has_entry = r.read_u8()? != 0;
        let entry = if !has_entry {
            None
        } else if module_type != ModuleHeader::TYPE_ABSOLUTE {
            Some(EntryPoint::Relative {
                unit: r.read_u16_le()?,
                section: r.read_u16_le()?,
            })
        } else {
            Some(EntryPoint::Absolute(r.read_u32_le()?))
        };
        let header = ModuleHeader {
            module_type,
            build_date,
            unit_count,
            version,
            address_update,
            segmented: segment & 0x80 != 0,
            address_field_len: (segment >> 3) & 0xf,
            space_within_segment,
            segment_size,
            segment_shift,
            entry,
            os_name: r.read_prefixed()?,
            system_name: r.read_prefixed()?,
            module_name: r.read_prefixed()?,
            cpu_name: r.read_prefixed()?,
        };
        debug!(
            module = %String::from_utf8_lossy(&header.module_name),
            cpu = %String::from_utf8_lossy(&header.cpu_name),
            "module header"
        );
        self.module = Some(header);
        Ok(())
    }

    fn unit_header(&mut self) -> Result<(), FormatError> {
        if self.module.is_none() {
            return Err(FormatError::UnitBeforeModule {
                offset: self.chunk_base,
            });
        }
        if self.unit.is_some() {
            return Err(FormatError::MultipleUnits);
        }
        let r = &mut self.reader;
        let unit = Unit {
            format: r.read_u8()? & 3,
            section_count: r.read_u16_le()?,
            external_refs: r.read_u16_le()?,
            external_defs: r.read_u16_le()?,
            name: r.read_prefixed()?,
            tool_name: r.read_prefixed()?,
            tool_date: r.read_bytes(12)?.to_vec(),
            sections: Vec::new(),
        };
        debug!(unit = %String::from_utf8_lossy(&unit.name), "unit header");
        self.unit = Some(unit);
        Ok(())
    }

    fn section_header(&mut self) -> Result<(), FormatError> {
        let index = self.section_count();
        let r = &mut self.reader;
        let format = (r.read_u8()? >> 6) & 3;
        let address = r.read_u32_be()?;
        let length = r.read_u32_be()?;
        let alignment = r.read_u32_be()?;
        let flags1 = r.read_u8()?;
        let rwx = r.read_u8()?;
        let flags3 = r.read_u8()?;
        let name = String::from_utf8_lossy(&r.read_prefixed()?).into_owned();
        let mut section = Section::new(index, name);
        section.format = format;
        section.address = address;
        section.length = length;
        section.alignment = alignment;
        section.contents = flags1 >> 4;
        section.concat = flags1 & 0xf;
        section.read = (rwx >> 6) & 3;
        section.write = (rwx >> 4) & 3;
        section.exec = (rwx >> 2) & 3;
        section.init = rwx & 3;
        section.flags3 = flags3;
        debug!(index, name = %section.name, length, alignment, "section header");
        self.unit_mut()?.sections.push(section);
        Ok(())
    }

    fn imports(&mut self) -> Result<(), FormatError> {
        while self.in_chunk() {
            let kind = self.spanning_u8()?;
            let name = String::from_utf8_lossy(&self.spanning_prefixed()?).into_owned();
            trace!(index = self.imports.len(), %name, "import");
            self.imports.push(ImportSymbol { name, kind });
        }
        Ok(())
    }

    fn exports(&mut self) -> Result<(), FormatError> {
        while self.in_chunk() {
            let offset = self.reader.tell();
            let section = usize::from(self.spanning_u16_be()?);
            let kind = self.spanning_u8()?;
            let symbol_offset = self.spanning_u32_be()?;
            let name = String::from_utf8_lossy(&self.spanning_prefixed()?).into_owned();
            trace!(section, %name, offset = symbol_offset, "export");
            let target = self
                .unit_mut()?
                .sections
                .get_mut(section)
                .ok_or(FormatError::UnknownSection {
                    index: section,
                    offset,
                })?;
            target.exports.push(ExportSymbol {
                name,
                section,
                kind,
                offset: symbol_offset,
                linked_address: None,
            });
        }
        Ok(())
    }

    fn section_selection(&mut self) -> Result<(), FormatError> {
        let offset = self.chunk_base;
        let _unit = self.reader.read_u16_be()?;
        let section = usize::from(self.reader.read_u16_be()?);
        if section >= self.section_count() {
            return Err(FormatError::UnknownSection {
                index: section,
                offset,
            });
        }
        trace!(section, "section selected");
        self.current_section = Some(section);
        Ok(())
    }

    fn object_data(&mut self) -> Result<(), FormatError> {
        let r = &mut self.reader;
        let flags = r.read_u8()?;
        let address = r.read_u32_be()?;
        let compressed = flags & ObjectData::COMPRESSED != 0;
        let repetitions = if compressed { r.read_u32_be()? } else { 1 };
        let payload = r.read_prefixed()?;
        let data = if compressed {
            payload.repeat(repetitions as usize)
        } else {
            payload
        };
        self.current_section_mut()?.push_object_data(ObjectData {
            flags,
            address,
            data,
        })
    }

    fn relocations(&mut self) -> Result<(), FormatError> {
        while self.in_chunk() {
            self.relocation()?;
        }
        Ok(())
    }

    fn expect_terminator(&mut self) -> Result<(), FormatError> {
        let offset = self.reader.tell();
        let found = self.reader.read_u8()?;
        if found != TERMINATOR {
            return Err(FormatError::WrongTerminator { found, offset });
        }
        Ok(())
    }

    /// Resolves an import index, warning and eating the terminator when it is
    /// out of range.
    fn import_name(&mut self, index: usize, record: usize) -> Result<Option<String>, FormatError> {
        match self.imports.get(index) {
            Some(import) => Ok(Some(import.name.clone())),
            None => {
                self.warn(ParseWarning::ImportIndexOutOfRange {
                    index,
                    count: self.imports.len(),
                    offset: record,
                });
                self.expect_terminator()?;
                Ok(None)
            }
        }
    }

    fn relocation(&mut self) -> Result<(), FormatError> {
        let record = self.reader.tell();
        let r = &mut self.reader;
        let flags = r.read_u8()?;
        let address = r.read_u32_be()?;
        let bitloc = r.read_u8()?;
        let field_length = r.read_u8()?;
        let bcount = r.read_u8()?;
        let operator = r.read_u8()?;
        if operator != REPLACE_OPERATOR {
            return Err(FormatError::UnsupportedOperator {
                operator,
                offset: record,
            });
        }
        let section = r.read_u16_le()?;
        let opcode = r.read_u8()?;
        let addend_len = r.read_u8()?;
        let rel_len = r.read_u8()?;
        let discriminator = r.read_u8()?;

        let (import_index, offset) = match (rel_len, discriminator) {
            (4, 2) => {
                let nibble_offset = self.reader.tell();
                let nibble = self.reader.read_u8()?;
                if nibble != 0 {
                    self.warn(ParseWarning::NonZeroHighNibble {
                        value: nibble,
                        offset: nibble_offset,
                    });
                }
                (usize::from(self.reader.read_u8()?), 0)
            }
            (4, 0) => {
                let section_index = usize::from(self.reader.read_u16_be()?);
                self.expect_terminator()?;
                trace!(address, section_index, "local relocation (short)");
                self.current_section_mut()?
                    .local_relocations_short
                    .push(LocalRelocationShort {
                        section_index,
                        address,
                        linked_address: None,
                    });
                return Ok(());
            }
            (11, 3) => {
                let r = &mut self.reader;
                r.skip(4)?;
                let offset = u32::from(r.read_u8()?);
                r.skip(2)?;
                let index = usize::from(r.read_u8()?);
                r.skip(1)?;
                (index, offset)
            }
            (11, 0) => {
                let r = &mut self.reader;
                r.skip(1)?;
                let section_index = usize::from(r.read_u8()?);
                r.skip(2)?;
                let target = r.read_u32_be()?;
                r.skip(1)?;
                self.expect_terminator()?;
                trace!(address, section_index, target, "local relocation (long)");
                self.current_section_mut()?
                    .local_relocations_long
                    .push(LocalRelocationLong {
                        section_index,
                        address,
                        target,
                        linked_address: None,
                    });
                return Ok(());
            }
            (4 | 11, _) => {
                self.warn(ParseWarning::UnsupportedRelocationVariant {
                    discriminator,
                    length: rel_len,
                    offset: record,
                });
                self.reader.skip(usize::from(rel_len) - 1)?;
                return Ok(());
            }
            (length, _) => {
                return Err(FormatError::UnsupportedRelocationLength {
                    length,
                    offset: record,
                })
            }
        };

        let Some(name) = self.import_name(import_index, record)? else {
            return Ok(());
        };
        self.expect_terminator()?;
        trace!(address, %name, offset, "relocation");
        self.current_section_mut()?.relocations.push(Relocation {
            flags,
            address,
            bitloc,
            field_length,
            bcount,
            operator,
            section,
            opcode,
            addend_len,
            rel_len,
            import_index,
            name,
            offset,
            linked_address: None,
        });
        Ok(())
    }
}
