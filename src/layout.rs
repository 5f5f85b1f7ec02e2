use thiserror::Error;
use tracing::debug;

use crate::object::{ParsedObject, Section, Unit};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("section {index} is already linked at {address:#x}")]
    AlreadyLinked { index: usize, address: u32 },
    #[error("linked image exceeds the 32-bit address space")]
    ImageTooLarge,
}

/// A parsed object whose sections have been placed into one flat image.
///
/// Linking happens once per object; the result is read-only afterwards and
/// can be shared by any number of runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedObject {
    object: ParsedObject,
    image: Vec<u8>,
}

impl LinkedObject {
    #[must_use]
    pub fn object(&self) -> &ParsedObject {
        &self.object
    }

    #[must_use]
    pub fn unit(&self) -> &Unit {
        &self.object.unit
    }

    #[must_use]
    pub fn sections(&self) -> &[Section] {
        &self.object.unit.sections
    }

    #[must_use]
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// Linked address of an exported symbol.
    #[must_use]
    pub fn export_address(&self, name: &str) -> Option<u32> {
        self.unit()
            .find_export(name)
            .and_then(|export| export.linked_address)
    }

    /// `(start, end)` of every linked section, in declaration order.
    pub fn section_ranges(&self) -> impl Iterator<Item = (&Section, u32, u32)> {
        self.sections().iter().filter_map(|section| {
            let start = section.linked_address()?;
            let len = u32::try_from(section.assembled_len()).ok()?;
            Some((section, start, start.wrapping_add(len)))
        })
    }
}

/// Concatenates sections in declaration order, zero-padding each one up to its
/// alignment, and propagates linked addresses into relocations and exports.
///
/// # Errors
/// Returns `LinkError` if a section is already linked or the image would not
/// fit a 32-bit address space.
pub fn link(mut object: ParsedObject) -> Result<LinkedObject, LinkError> {
    let mut image = Vec::new();

    for section in &mut object.unit.sections {
        if let Some(address) = section.linked_address() {
            return Err(LinkError::AlreadyLinked {
                index: section.index,
                address,
            });
        }
        let cursor = u32::try_from(image.len()).map_err(|_| LinkError::ImageTooLarge)?;
        let base = align_up(cursor, section.alignment).ok_or(LinkError::ImageTooLarge)?;
        image.resize(base as usize, 0);
        section.relocate(base);
        image.extend_from_slice(&section.assemble());
        debug!(
            section = %section.name,
            base = format_args!("{base:#x}"),
            len = section.assembled_len(),
            "linked section"
        );
    }
    u32::try_from(image.len()).map_err(|_| LinkError::ImageTooLarge)?;

    Ok(LinkedObject { object, image })
}

/// Rounds `value` up to the next multiple of `align`. Alignment 0 behaves as 1.
fn align_up(value: u32, align: u32) -> Option<u32> {
    let align = align.max(1);
    let rem = value % align;
    if rem == 0 {
        Some(value)
    } else {
        value.checked_add(align - rem)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{align_up, link, LinkError};
    use crate::object::{ExportSymbol, ObjectData, ParsedObject, Section, Unit};

    fn section(index: usize, alignment: u32, data: &[u8]) -> Section {
        let mut section = Section::new(index, format!("S{index}"));
        section.alignment = alignment;
        section
            .push_object_data(ObjectData {
                flags: ObjectData::HAS_START_ADDRESS,
                address: 0,
                data: data.to_vec(),
            })
            .expect("fragment");
        section
    }

    fn parsed(sections: Vec<Section>) -> ParsedObject {
        ParsedObject {
            module: Default::default(),
            unit: Unit {
                sections,
                ..Unit::default()
            },
            imports: Vec::new(),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn aligns_each_section_and_zero_pads() {
        let linked = link(parsed(vec![
            section(0, 4, &[1, 2, 3]),
            section(1, 4, &[4]),
            section(2, 2, &[5, 6]),
        ]))
        .expect("link");

        let bases: Vec<_> = linked
            .sections()
            .iter()
            .map(|s| s.linked_address())
            .collect();
        assert_eq!(bases, vec![Some(0), Some(4), Some(6)]);
        assert_eq!(linked.image(), &[1, 2, 3, 0, 4, 0, 5, 6]);
    }

    #[test]
    fn zero_alignment_is_treated_as_byte_alignment() {
        let linked = link(parsed(vec![section(0, 0, &[1]), section(1, 0, &[2])])).expect("link");
        assert_eq!(linked.sections()[1].linked_address(), Some(1));
    }

    #[test]
    fn exports_receive_linked_addresses() {
        let mut code = section(1, 4, &[0; 8]);
        code.exports.push(ExportSymbol {
            name: "_main".to_string(),
            section: 1,
            kind: 0,
            offset: 4,
            linked_address: None,
        });
        let linked = link(parsed(vec![section(0, 1, &[0xff; 3]), code])).expect("link");
        assert_eq!(linked.export_address("_main"), Some(8));
        let ranges: Vec<_> = linked.section_ranges().map(|(_, s, e)| (s, e)).collect();
        assert_eq!(ranges, vec![(0, 3), (4, 12)]);
    }

    #[test]
    fn linking_twice_is_rejected() {
        let linked = link(parsed(vec![section(0, 4, &[1])])).expect("link");
        let err = link(linked.object().clone()).expect_err("already linked");
        assert_eq!(err, LinkError::AlreadyLinked { index: 0, address: 0 });
    }

    #[test]
    fn align_up_rounds_to_boundary() {
        assert_eq!(align_up(5, 4), Some(8));
        assert_eq!(align_up(8, 4), Some(8));
        assert_eq!(align_up(u32::MAX, 4), None);
    }
}
