//! Fixed-size segment trailer.

use serde::Serialize;

use crate::config::ChunkMode;
use crate::error::{Result, StrataError};
use crate::storage::ByteView;
use crate::storage::structured::CountHashWriter;

/// On-disk format version written by this crate.
pub const FORMAT_VERSION: u32 = 1;

/// Size of the footer in bytes: five u64 fields and three u32 fields.
pub const FOOTER_SIZE: u64 = 5 * 8 + 3 * 4;

/// Marker stored in place of a global doc-values offset; doc values live
/// per field inside the inverted text section.
pub const NO_DOC_VALUES: u64 = u64::MAX;

/// Decoded segment footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Footer {
    pub num_docs: u64,
    pub stored_index_offset: u64,
    pub fields_index_offset: u64,
    pub sections_index_offset: u64,
    pub doc_value_offset: u64,
    pub chunk_mode: u32,
    pub version: u32,
    pub crc: u32,
}

impl Footer {
    /// Write the footer; the CRC covers every byte before it, including
    /// the footer's own leading fields.
    pub fn write(&mut self, w: &mut CountHashWriter<'_>) -> Result<()> {
        w.write_u64_be(self.num_docs)?;
        w.write_u64_be(self.stored_index_offset)?;
        w.write_u64_be(self.fields_index_offset)?;
        w.write_u64_be(self.sections_index_offset)?;
        w.write_u64_be(self.doc_value_offset)?;
        w.write_u32_be(self.chunk_mode)?;
        w.write_u32_be(self.version)?;
        self.crc = w.crc32();
        w.write_u32_be(self.crc)?;
        Ok(())
    }

    /// Parse and validate the footer at the end of `view`.
    pub fn parse(view: ByteView<'_>, verify_checksum: bool) -> Result<Self> {
        let len = view.len() as u64;
        if len < FOOTER_SIZE {
            return Err(StrataError::corrupt(format!(
                "segment of {len} bytes is shorter than its {FOOTER_SIZE} byte footer"
            )));
        }

        let start = len - FOOTER_SIZE;
        let footer = Footer {
            num_docs: view.read_u64_be(start)?,
            stored_index_offset: view.read_u64_be(start + 8)?,
            fields_index_offset: view.read_u64_be(start + 16)?,
            sections_index_offset: view.read_u64_be(start + 24)?,
            doc_value_offset: view.read_u64_be(start + 32)?,
            chunk_mode: view.read_u32_be(start + 40)?,
            version: view.read_u32_be(start + 44)?,
            crc: view.read_u32_be(start + 48)?,
        };

        if footer.version != FORMAT_VERSION {
            return Err(StrataError::corrupt(format!(
                "unsupported format version {} (expected {FORMAT_VERSION})",
                footer.version
            )));
        }

        ChunkMode::from_code(footer.chunk_mode)?;

        if verify_checksum {
            let actual = crc32fast::hash(view.range(0, len - 4)?);
            if actual != footer.crc {
                return Err(StrataError::corrupt(format!(
                    "checksum mismatch: footer records {:#010x}, content hashes to {actual:#010x}",
                    footer.crc
                )));
            }
        }

        for (name, offset) in [
            ("stored index", footer.stored_index_offset),
            ("fields index", footer.fields_index_offset),
            ("sections index", footer.sections_index_offset),
        ] {
            if offset > start {
                return Err(StrataError::corrupt(format!(
                    "{name} offset {offset} points past the footer at {start}"
                )));
            }
        }

        let stored_index_end = footer
            .num_docs
            .checked_mul(8)
            .and_then(|len| len.checked_add(footer.stored_index_offset));
        match stored_index_end {
            Some(end) if end <= footer.fields_index_offset => {}
            _ => {
                return Err(StrataError::corrupt(format!(
                    "stored index of {} docs at {} overruns the fields index at {}",
                    footer.num_docs, footer.stored_index_offset, footer.fields_index_offset
                )));
            }
        }

        Ok(footer)
    }

    /// Offset of the first footer byte, i.e. the end of the content.
    pub fn content_end(view: ByteView<'_>) -> u64 {
        (view.len() as u64).saturating_sub(FOOTER_SIZE)
    }

    pub fn chunk_mode(&self) -> Result<ChunkMode> {
        ChunkMode::from_code(self.chunk_mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_footer() -> Footer {
        Footer {
            num_docs: 0,
            stored_index_offset: 4,
            fields_index_offset: 4,
            sections_index_offset: 4,
            doc_value_offset: NO_DOC_VALUES,
            chunk_mode: ChunkMode::Balanced.code(),
            version: FORMAT_VERSION,
            crc: 0,
        }
    }

    fn write_segment(footer: &mut Footer) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut w = CountHashWriter::new(&mut buf);
        w.write_raw(b"data").unwrap();
        footer.write(&mut w).unwrap();
        drop(w);
        buf
    }

    #[test]
    fn test_footer_round_trip() {
        let mut footer = sample_footer();
        let buf = write_segment(&mut footer);
        assert_eq!(buf.len() as u64, 4 + FOOTER_SIZE);

        let parsed = Footer::parse(ByteView::new(&buf), true).unwrap();
        assert_eq!(parsed, footer);
    }

    #[test]
    fn test_footer_detects_corruption() {
        let mut footer = sample_footer();
        let mut buf = write_segment(&mut footer);
        buf[1] ^= 0xFF;

        assert!(Footer::parse(ByteView::new(&buf), true).unwrap_err().is_corrupt());
        assert!(Footer::parse(ByteView::new(&buf), false).is_ok());
    }

    #[test]
    fn test_footer_rejects_bad_version_and_short_input() {
        let mut footer = sample_footer();
        footer.version = 99;
        let buf = write_segment(&mut footer);
        assert!(Footer::parse(ByteView::new(&buf), false).is_err());

        assert!(Footer::parse(ByteView::new(&buf[..10]), false).is_err());
    }

    #[test]
    fn test_footer_rejects_oversized_doc_count() {
        for num_docs in [1, 1 << 40, u64::MAX] {
            let mut footer = sample_footer();
            footer.num_docs = num_docs;
            let buf = write_segment(&mut footer);
            let err = Footer::parse(ByteView::new(&buf), true).unwrap_err();
            assert!(err.is_corrupt(), "num_docs {num_docs}: {err}");
        }
    }
}
