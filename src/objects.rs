use std::io::Cursor;

use log::trace;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::format::DATA_PAGE_SIZE;
use crate::index::Key;
use crate::mapping::Mapping;

/// One table-of-contents entry of a data page.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TocEntry {
    pub record_id: u32,
    pub offset: u32,
    pub size: u32,
    pub crc: u32,
}

impl TocEntry {
    fn is_terminator(&self) -> bool {
        self.record_id == 0 && self.offset == 0 && self.size == 0 && self.crc == 0
    }
}

#[derive(Debug, Clone)]
pub struct Toc {
    entries: Vec<TocEntry>,
}

impl Toc {
    fn read(buf: &[u8]) -> Result<Self> {
        let mut input = Cursor::new(buf);
        let mut entries = Vec::new();
        loop {
            let raw: [u32; 4] = bincode::deserialize_from(&mut input)
                .map_err(|_| Error::invalid("data page TOC has no terminator"))?;
            let entry = TocEntry {
                record_id: raw[0],
                offset: raw[1],
                size: raw[2],
                crc: raw[3],
            };
            if entry.is_terminator() {
                break;
            }
            entries.push(entry);
        }
        Ok(Toc { entries })
    }

    pub fn entries(&self) -> &[TocEntry] {
        &self.entries
    }
}

/// A data page: TOC plus heap. The borrowed bytes cover the whole
/// `0x2000` page.
pub struct DataPage<'a> {
    pub logical_num: u32,
    pub page_number: u32,
    pub toc: Toc,
    bytes: &'a [u8],
}

impl DataPage<'_> {
    /// The on-page slice of the record with the given id, clamped to
    /// the page end. Callers splice successor pages when the record
    /// continues past this page.
    fn record_slice(&self, record_id: u32, expected_len: u32) -> Result<&[u8]> {
        for entry in self.toc.entries() {
            if entry.record_id != record_id {
                continue;
            }
            if entry.size < expected_len {
                return Err(Error::invalid(format!(
                    "record size smaller than reference length: {} < {expected_len}",
                    entry.size
                )));
            }
            // TODO entry.size > DATA_PAGE_SIZE - entry.offset means the
            // record overflows its own page even though the reference
            // length fits; needs a fixture before deciding whether that
            // should splice or fail (the clamp below keeps the read in
            // bounds either way)
            let start = entry.offset as usize;
            let end = (start + entry.size as usize).min(self.bytes.len());
            return self
                .bytes
                .get(start..end)
                .ok_or_else(|| Error::invalid("TOC entry offset out of page bounds"));
        }
        Err(Error::NotFound(format!(
            "record {record_id} in data page {}",
            self.logical_num
        )))
    }
}

#[derive(Debug)]
pub(crate) struct Store {
    data: Vec<u8>,
    mapping: Mapping,
}

impl Store {
    fn page(&self, logical_num: u32) -> Result<DataPage<'_>> {
        let page_number = self.mapping.get_entry(logical_num)?.page_number;
        let bytes = self.physical_page(page_number)?;
        let toc = Toc::read(bytes)?;
        Ok(DataPage {
            logical_num,
            page_number,
            toc,
            bytes,
        })
    }

    fn logical_page(&self, logical_num: u32) -> Result<&[u8]> {
        self.physical_page(self.mapping.get_entry(logical_num)?.page_number)
    }

    fn physical_page(&self, page_number: u32) -> Result<&[u8]> {
        let start = page_number as usize * DATA_PAGE_SIZE;
        self.data
            .get(start..start + DATA_PAGE_SIZE)
            .ok_or_else(|| {
                Error::invalid(format!("data page {page_number} out of file bounds"))
            })
    }
}

/// The object store: resolves data-reference keys into contiguous
/// record bytes, splicing overflow from successor logical pages.
#[derive(Debug)]
pub struct Objects {
    store: Store,
}

impl Objects {
    pub(crate) fn new(data: Vec<u8>, mapping: Mapping) -> Self {
        Objects {
            store: Store { data, mapping },
        }
    }

    /// Fetch the record behind a data-reference key. The result is
    /// exactly `data_length` bytes long.
    pub fn get(&self, key: &Key) -> Result<Vec<u8>> {
        if !key.is_data_reference() {
            return Err(Error::invalid(format!(
                "key is not a data reference: {key}"
            )));
        }

        let data_len = key.data_length()? as usize;
        let page = self.store.page(key.data_page()?)?;
        let mut buf = page
            .record_slice(key.data_id()?, key.data_length()?)?
            .to_vec();

        // Overflow records occupy the following logical pages as raw
        // bytes, not TOC-indexed.
        let mut cur_page = key.data_page()? + 1;
        while buf.len() < data_len {
            let next = self.store.logical_page(cur_page)?;
            let take = next.len().min(data_len - buf.len());
            buf.extend_from_slice(&next[..take]);
            cur_page += 1;
        }
        buf.truncate(data_len);

        trace!(
            "object {key}: {} bytes over {} page(s)",
            buf.len(),
            cur_page - key.data_page()?
        );
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::CimVariant;

    fn toc_bytes(entries: &[(u32, u32, u32)]) -> Vec<u8> {
        let mut buf = Vec::new();
        for &(id, offset, size) in entries {
            for value in [id, offset, size, 0] {
                buf.extend_from_slice(&value.to_le_bytes());
            }
        }
        buf.extend_from_slice(&[0u8; 16]);
        buf
    }

    #[test]
    fn toc_stops_at_terminator() {
        let buf = toc_bytes(&[(1, 0x20, 8), (2, 0x28, 16)]);
        let toc = Toc::read(&buf).unwrap();
        assert_eq!(toc.entries().len(), 2);
        assert_eq!(toc.entries()[1].record_id, 2);
    }

    #[test]
    fn missing_terminator_is_malformed() {
        let buf = toc_bytes(&[(1, 0x20, 8)]);
        assert!(Toc::read(&buf[..16]).is_err());
    }

    #[test]
    fn record_smaller_than_reference_fails() {
        let mut page = toc_bytes(&[(1, 0x20, 4)]);
        page.resize(DATA_PAGE_SIZE, 0);
        let page = DataPage {
            logical_num: 0,
            page_number: 0,
            toc: Toc::read(&page).unwrap(),
            bytes: &page,
        };
        assert!(page.record_slice(1, 100).is_err());
        assert!(matches!(
            page.record_slice(9, 1),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn non_data_reference_is_rejected() {
        let objects = Objects::new(vec![], mapping_with_identity(1));
        let key = Key::new(CimVariant::Modern).ns("root");
        assert!(objects.get(&key).is_err());
    }

    fn mapping_with_identity(pages: u32) -> Mapping {
        let mut buf = Vec::new();
        for value in [crate::format::MAPPING_SIGNATURE, 1, 2, 1, pages, pages] {
            buf.extend_from_slice(&value.to_le_bytes());
        }
        for page in 0..pages {
            buf.extend_from_slice(&page.to_le_bytes());
            buf.extend_from_slice(&[0u8; 20]);
        }
        buf.extend_from_slice(&0u32.to_le_bytes());
        Mapping::read(
            &mut Cursor::new(buf.as_slice()),
            CimVariant::Modern,
        )
        .unwrap()
    }
}
