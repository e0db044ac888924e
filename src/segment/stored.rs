//! Stored field records.
//!
//! Every document gets one record: `uvarint meta_len`, `uvarint data_len`,
//! `uvarint id_len`, the `_id` bytes, then `meta` and `data`. `meta` holds
//! one entry per stored value (`field_id`, type byte, start within `data`,
//! length, array position count, array positions). The stored index that
//! follows the records is one big-endian u64 record offset per document.

use crate::error::{Result, StrataError};
use crate::storage::ByteView;
use crate::storage::structured::CountHashWriter;
use crate::util::varint::{VarintReader, put_uvarint};

/// A stored value ready to be written.
#[derive(Debug, Clone, Copy)]
pub struct StoredValue<'a> {
    pub field_id: u16,
    pub type_byte: u8,
    pub value: &'a [u8],
    pub array_positions: &'a [u64],
}

/// A stored value decoded from a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFieldValue<'a> {
    pub field_id: u16,
    pub type_byte: u8,
    pub value: &'a [u8],
    pub array_positions: Vec<u64>,
}

/// Encode one document record into `out`, reusing its buffer.
pub fn encode_record(out: &mut Vec<u8>, id: &[u8], values: &[StoredValue<'_>]) {
    let mut meta = Vec::new();
    let mut data = Vec::new();
    for value in values {
        put_uvarint(&mut meta, value.field_id as u64);
        meta.push(value.type_byte);
        put_uvarint(&mut meta, data.len() as u64);
        put_uvarint(&mut meta, value.value.len() as u64);
        put_uvarint(&mut meta, value.array_positions.len() as u64);
        for &pos in value.array_positions {
            put_uvarint(&mut meta, pos);
        }
        data.extend_from_slice(value.value);
    }

    out.clear();
    put_uvarint(out, meta.len() as u64);
    put_uvarint(out, data.len() as u64);
    put_uvarint(out, id.len() as u64);
    out.extend_from_slice(id);
    out.extend_from_slice(&meta);
    out.extend_from_slice(&data);
}

/// Write the stored index, returning its offset.
pub fn write_stored_index(w: &mut CountHashWriter<'_>, record_offsets: &[u64]) -> Result<u64> {
    let offset = w.count();
    for &record in record_offsets {
        w.write_u64_be(record)?;
    }
    Ok(offset)
}

/// A decoded (but not yet value-parsed) stored record.
#[derive(Debug, Clone, Copy)]
pub struct StoredRecord<'a> {
    /// The whole encoded record, header included.
    pub raw: &'a [u8],
    pub id: &'a [u8],
    meta: &'a [u8],
    data: &'a [u8],
}

impl<'a> StoredRecord<'a> {
    /// Parse the record at `offset` of `view`.
    pub fn read(view: ByteView<'a>, offset: u64) -> Result<Self> {
        let mut reader = view.reader_at(offset)?;
        let meta_len = reader.read_uvarint()?;
        let data_len = reader.read_uvarint()?;
        let id_len = reader.read_uvarint()?;
        let header_len = reader.position() as u64;

        let total = [meta_len, data_len, id_len]
            .iter()
            .try_fold(header_len, |acc, &len| acc.checked_add(len))
            .ok_or_else(|| StrataError::corrupt(format!("stored record at {offset} overflows")))?;
        let raw = view.slice(offset, total)?;

        let id = reader.read_bytes(id_len as usize)?;
        let meta = reader.read_bytes(meta_len as usize)?;
        let data = reader.read_bytes(data_len as usize)?;
        Ok(StoredRecord { raw, id, meta, data })
    }

    /// Decode every stored value, in the order they were written.
    pub fn values(&self) -> Result<Vec<StoredFieldValue<'a>>> {
        let mut values = Vec::new();
        let mut reader = VarintReader::new(self.meta);
        while !reader.is_empty() {
            let field_id = reader.read_uvarint()?;
            let field_id = u16::try_from(field_id).map_err(|_| {
                StrataError::corrupt(format!("stored field id {field_id} out of range"))
            })?;
            let type_byte = reader.read_bytes(1)?[0];
            let start = reader.read_uvarint()?;
            let len = reader.read_uvarint()?;
            let num_positions = reader.read_uvarint()?;
            let mut array_positions = Vec::new();
            for _ in 0..num_positions {
                array_positions.push(reader.read_uvarint()?);
            }

            let value = ByteView::new(self.data).slice(start, len)?;
            values.push(StoredFieldValue {
                field_id,
                type_byte,
                value,
                array_positions,
            });
        }
        Ok(values)
    }
}

/// Offset of the stored record of `doc_num`.
pub fn record_offset(view: ByteView<'_>, stored_index: u64, num_docs: u64, doc_num: u64) -> Result<u64> {
    if doc_num >= num_docs {
        return Err(StrataError::invalid_argument(format!(
            "document number {doc_num} out of range (segment holds {num_docs})"
        )));
    }
    let pos = doc_num
        .checked_mul(8)
        .and_then(|off| off.checked_add(stored_index))
        .ok_or_else(|| StrataError::corrupt(format!("stored index entry of doc {doc_num} overflows")))?;
    view.read_u64_be(pos)
}
