use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use crate::harness::definition::TestRelocation;
use crate::layout::LinkedObject;
use crate::object::Section;
use crate::sim::memory::{BinaryMemory, MemoryError};
use crate::sim::symbols::SymbolTable;
use crate::sim::types::U32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("entry symbol {name} not found")]
    MissingEntry { name: String },
    #[error("relocation {name} has both a built-in offset {offset:#x} and a code offset {in_image:#x}")]
    ConflictingOffsets {
        name: String,
        offset: u32,
        in_image: u32,
    },
    #[error("local relocation in section {section} targets unknown section {index}")]
    UnknownSection { section: usize, index: usize },
    #[error("section {index} has not been linked")]
    Unlinked { index: usize },
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// External relocation left without a binding. Reading its slot is fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedRelocation {
    pub name: String,
    pub address: u32,
}

/// Per-run view of the patched image.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub symbols: SymbolTable,
    pub unresolved: Vec<UnresolvedRelocation>,
    bindings: BTreeMap<u32, String>,
}

impl Resolution {
    /// Binding name at `address`, else the symbol exactly there.
    #[must_use]
    pub fn name_at(&self, address: u32) -> Option<&str> {
        self.bindings
            .get(&address)
            .map(String::as_str)
            .or_else(|| self.symbols.at(address).map(|s| s.name.as_str()))
    }

    #[must_use]
    pub fn unresolved_at(&self, address: u32) -> Option<&UnresolvedRelocation> {
        self.unresolved.iter().find(|r| r.address == address)
    }

    /// `name(0x...)` when a name is known, else the bare address.
    #[must_use]
    pub fn describe(&self, address: u32) -> String {
        match self.name_at(address) {
            Some(name) => format!("{name}({address:#x})"),
            None => format!("{address:#x}"),
        }
    }
}

fn linked_base(section: &Section) -> Result<u32, ResolveError> {
    section.linked_address().ok_or(ResolveError::Unlinked {
        index: section.index,
    })
}

fn target_base(sections: &[Section], section: &Section, index: usize) -> Result<u32, ResolveError> {
    let target = sections.get(index).ok_or(ResolveError::UnknownSection {
        section: section.index,
        index,
    })?;
    linked_base(target)
}

/// Patches the loaded image for one run and builds its symbol table.
///
/// Local relocations point slots at other sections. External relocations are
/// patched against `bindings` by name; those without a binding are returned as
/// unresolved. Exports are added last, so they win over a binding at the same
/// address.
///
/// # Errors
/// Fails when a relocation names an unknown section, a bound relocation has
/// both kinds of offset, or a slot lies outside memory.
pub fn resolve(
    linked: &LinkedObject,
    memory: &mut BinaryMemory,
    bindings: &[TestRelocation],
) -> Result<Resolution, ResolveError> {
    let sections = linked.sections();
    let mut resolution = Resolution::default();

    for section in sections {
        let base = linked_base(section)?;
        for local in &section.local_relocations_long {
            let value = target_base(sections, section, local.section_index)?.wrapping_add(local.target);
            memory.write_u32(base.wrapping_add(local.address), U32::new(value));
        }
    }

    for section in sections {
        let base = linked_base(section)?;
        for local in &section.local_relocations_short {
            let slot = base.wrapping_add(local.address);
            let offset = memory.read_u32(slot)?;
            let target = U32::new(target_base(sections, section, local.section_index)?);
            memory.write_u32(slot, target.add(offset));
        }
    }

    for binding in bindings {
        resolution
            .bindings
            .entry(binding.address)
            .or_insert_with(|| binding.name.clone());
    }

    for section in sections {
        let base = linked_base(section)?;
        for relocation in &section.relocations {
            let slot = base.wrapping_add(relocation.address);
            let Some(binding) = bindings.iter().find(|b| b.name == relocation.name) else {
                debug!(name = %relocation.name, slot = format_args!("{slot:#x}"), "unresolved relocation");
                resolution.unresolved.push(UnresolvedRelocation {
                    name: relocation.name.clone(),
                    address: slot,
                });
                continue;
            };

            let in_image = memory.read_u32(slot)?.value();
            if relocation.offset != 0 && in_image != 0 {
                return Err(ResolveError::ConflictingOffsets {
                    name: relocation.name.clone(),
                    offset: relocation.offset,
                    in_image,
                });
            }
            let address = binding
                .address
                .wrapping_add(relocation.offset)
                .wrapping_add(in_image);
            memory.write_u32(slot, U32::new(address));
            resolution.symbols.add(relocation.name.clone(), address);
            debug!(
                name = %relocation.name,
                slot = format_args!("{slot:#x}"),
                address = format_args!("{address:#x}"),
                "bound relocation"
            );
        }
    }

    for section in sections {
        for export in &section.exports {
            let address = export.linked_address.ok_or(ResolveError::Unlinked {
                index: section.index,
            })?;
            resolution.symbols.add(export.name.clone(), address);
        }
    }

    Ok(resolution)
}
