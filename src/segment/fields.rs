//! Field metadata: the legacy field index and the section index.

use serde::Serialize;

use crate::document::{Field, FieldOptions};
use crate::error::{Result, StrataError};
use crate::section::{NUM_SECTION_TYPES, SectionType};
use crate::segment::footer::Footer;
use crate::storage::ByteView;
use crate::storage::structured::CountHashWriter;

const VECTOR_BIT: u8 = 0x08;
const SYNONYM_BIT: u8 = 0x10;

/// Which payload a field carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FieldKind {
    Text,
    Vector,
    Synonym,
}

impl FieldKind {
    pub fn of(field: &Field) -> Self {
        if field.is_vector() {
            FieldKind::Vector
        } else if field.is_synonym() {
            FieldKind::Synonym
        } else {
            FieldKind::Text
        }
    }
}

/// Name, options and kind of a segment field. A field's id is its index
/// in the segment's field list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldInfo {
    pub name: String,
    pub options: FieldOptions,
    pub kind: FieldKind,
}

impl FieldInfo {
    pub fn new<S: Into<String>>(name: S, options: FieldOptions, kind: FieldKind) -> Self {
        FieldInfo {
            name: name.into(),
            options,
            kind,
        }
    }

    /// Options and kind packed into one byte.
    pub fn flags(&self) -> u8 {
        let kind = match self.kind {
            FieldKind::Text => 0,
            FieldKind::Vector => VECTOR_BIT,
            FieldKind::Synonym => SYNONYM_BIT,
        };
        self.options.to_bits() | kind
    }

    fn from_flags(name: String, flags: u8) -> Result<Self> {
        let kind = match flags & (VECTOR_BIT | SYNONYM_BIT) {
            0 => FieldKind::Text,
            VECTOR_BIT => FieldKind::Vector,
            SYNONYM_BIT => FieldKind::Synonym,
            _ => {
                return Err(StrataError::corrupt(format!(
                    "field {name} flagged as both vector and synonym"
                )));
            }
        };
        Ok(FieldInfo {
            name,
            options: FieldOptions::from_bits(flags),
            kind,
        })
    }
}

/// Section addresses of one field, indexed by [`SectionType::index`].
pub type FieldSections = [Option<u64>; NUM_SECTION_TYPES];

/// Write the legacy field index, returning the offset of its offsets table.
pub fn write_fields_index(w: &mut CountHashWriter<'_>, fields: &[FieldInfo]) -> Result<u64> {
    let mut offsets = Vec::with_capacity(fields.len());
    for field in fields {
        offsets.push(w.count());
        w.write_len_prefixed(field.name.as_bytes())?;
        w.write_raw(&[field.flags()])?;
    }

    let table = w.count();
    for offset in offsets {
        w.write_u64_be(offset)?;
    }
    Ok(table)
}

/// Write the section index, returning its offset.
pub fn write_sections_index(
    w: &mut CountHashWriter<'_>,
    fields: &[FieldInfo],
    sections: &[FieldSections],
) -> Result<u64> {
    let mut offsets = Vec::with_capacity(fields.len());
    for (field_id, field) in fields.iter().enumerate() {
        offsets.push(w.count());
        w.write_uvarint(field_id as u64)?;
        w.write_len_prefixed(field.name.as_bytes())?;

        let present: Vec<(SectionType, u64)> = SectionType::ALL
            .iter()
            .filter_map(|&t| sections[field_id][t.index()].map(|addr| (t, addr)))
            .collect();
        w.write_uvarint(present.len() as u64)?;
        for (section_type, addr) in present {
            w.write_uvarint(section_type.code())?;
            w.write_uvarint(addr)?;
        }
    }

    let index = w.count();
    w.write_uvarint(fields.len() as u64)?;
    for offset in offsets {
        w.write_u64_be(offset)?;
    }
    Ok(index)
}

/// Parse both field indexes.
pub fn read_fields(view: ByteView<'_>, footer: &Footer) -> Result<(Vec<FieldInfo>, Vec<FieldSections>)> {
    let content_end = Footer::content_end(view);
    let (num_fields, read) = view.read_uvarint(footer.sections_index_offset)?;
    if num_fields > u16::MAX as u64 + 1 || num_fields * 8 > content_end {
        return Err(StrataError::corrupt(format!(
            "section index declares {num_fields} fields"
        )));
    }
    let table = footer.sections_index_offset + read as u64;

    let mut names: Vec<Option<String>> = vec![None; num_fields as usize];
    let mut sections: Vec<FieldSections> = vec![[None; NUM_SECTION_TYPES]; num_fields as usize];

    for i in 0..num_fields {
        let record = view.read_u64_be(table + i * 8)?;
        let mut reader = view.reader_at(record)?;
        let field_id = reader.read_uvarint()?;
        if field_id >= num_fields {
            return Err(StrataError::corrupt(format!(
                "section index record {i} names field id {field_id} of {num_fields}"
            )));
        }
        let name_len = reader.read_uvarint()?;
        let name = reader.read_bytes(name_len as usize)?;
        let name = String::from_utf8(name.to_vec()).map_err(|_| {
            StrataError::corrupt(format!("field name of field {field_id} is not UTF-8"))
        })?;

        let n = reader.read_uvarint()?;
        for _ in 0..n {
            let section_type = SectionType::from_code(reader.read_uvarint()?)?;
            let addr = reader.read_uvarint()?;
            if addr >= content_end {
                return Err(StrataError::corrupt(format!(
                    "{section_type} section of field {name} at {addr} points past content end {content_end}"
                )));
            }
            sections[field_id as usize][section_type.index()] = Some(addr);
        }
        names[field_id as usize] = Some(name);
    }

    let mut fields = Vec::with_capacity(num_fields as usize);
    for (field_id, name) in names.into_iter().enumerate() {
        let name = name.ok_or_else(|| {
            StrataError::corrupt(format!("section index has no record for field {field_id}"))
        })?;

        let record = view.read_u64_be(footer.fields_index_offset + field_id as u64 * 8)?;
        let mut reader = view.reader_at(record)?;
        let name_len = reader.read_uvarint()?;
        if reader.read_bytes(name_len as usize)? != name.as_bytes() {
            return Err(StrataError::corrupt(format!(
                "field index and section index disagree on field {field_id} ({name})"
            )));
        }
        let flags = reader.read_bytes(1)?[0];
        fields.push(FieldInfo::from_flags(name, flags)?);
    }

    Ok((fields, sections))
}
