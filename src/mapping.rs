use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{Cursor, Read, Seek, SeekFrom};

use log::debug;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::format::{CimVariant, MAPPING_PAGE_ID_MASK, MAPPING_SIGNATURE, UNMAPPED_PAGE_VALUE};
use crate::reader::CimRead;

/// Header of a mapping record. The XP layout drops the two id fields.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MappingHeader {
    pub signature: u32,
    pub version: u32,
    pub first_id: Option<u32>,
    pub second_id: Option<u32>,
    pub physical_page_count: u32,
    pub mapping_entry_count: u32,
}

impl MappingHeader {
    pub(crate) fn read<I: Read>(input: &mut I, variant: CimVariant) -> Result<Self> {
        let signature = input.read_u32()?;
        let version = input.read_u32()?;
        let (first_id, second_id) = match variant {
            CimVariant::Modern => (Some(input.read_u32()?), Some(input.read_u32()?)),
            CimVariant::Xp => (None, None),
        };
        let physical_page_count = input.read_u32()?;
        let mapping_entry_count = input.read_u32()?;
        Ok(MappingHeader {
            signature,
            version,
            first_id,
            second_id,
            physical_page_count,
            mapping_entry_count,
        })
    }
}

/// Heuristic XP detection, run on a header parsed with the modern
/// layout: a tiny entry table relative to the physical page count, or
/// id fields that are not consecutive, indicate the XP layout.
pub(crate) fn is_xp_mapping(header: &MappingHeader) -> Result<bool> {
    if header.signature != MAPPING_SIGNATURE {
        return Err(Error::invalid(format!(
            "invalid mapping file signature {:#x}",
            header.signature
        )));
    }

    if header.mapping_entry_count < header.physical_page_count / 10 {
        return Ok(true);
    }

    if let (Some(first_id), Some(second_id)) = (header.first_id, header.second_id) {
        if i64::from(first_id) - 1 != i64::from(second_id) {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Pick the authoritative mapping among the candidate files.
///
/// The variant is fixed by running the XP heuristic on the first
/// candidate; every header is then (re-)read under that layout and the
/// one with the highest version wins.
pub(crate) fn find_current_mapping(mappings: &[Vec<u8>]) -> Result<(CimVariant, usize)> {
    let mut variant = None;
    let mut current = None;
    let mut max_version = 0u32;

    for (i, buf) in mappings.iter().enumerate() {
        let mut input = Cursor::new(buf.as_slice());
        let mut header = MappingHeader::read(&mut input, CimVariant::Modern)?;

        let variant = *variant.get_or_insert_with(|| {
            if matches!(is_xp_mapping(&header), Ok(true)) {
                CimVariant::Xp
            } else {
                CimVariant::Modern
            }
        });
        // signature check also for candidates past the first
        is_xp_mapping(&header)?;
        if variant.is_xp() {
            input.seek(SeekFrom::Start(0))?;
            header = MappingHeader::read(&mut input, CimVariant::Xp)?;
        }

        if header.version > max_version {
            current = Some(i);
            max_version = header.version;
        }
    }

    let variant = variant.ok_or_else(|| Error::invalid("no mapping files"))?;
    let current = current.ok_or_else(|| Error::invalid("couldn't find current map file"))?;
    debug!(
        "current mapping: file #{current}, version {max_version}, variant {variant:?}"
    );
    Ok((variant, current))
}

/// One logical → physical page translation. XP entries carry only the
/// page number.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MappingEntry {
    /// Physical page index, already masked with the low 30 bits.
    pub page_number: u32,
    pub page_crc: Option<u32>,
    pub free_space: Option<u32>,
    pub used_space: Option<u32>,
    pub first_id: Option<u32>,
    pub second_id: Option<u32>,
}

impl MappingEntry {
    pub fn is_mapped(&self) -> bool {
        self.page_number != UNMAPPED_PAGE_VALUE
    }
}

/// A parsed mapping record, providing forward and reverse lookup of
/// logical and physical pages.
#[derive(Debug)]
pub struct Mapping {
    pub header: MappingHeader,
    entries: Vec<MappingEntry>,
    reverse_map: RefCell<Option<HashMap<u32, u32>>>,
}

impl Mapping {
    /// Parse one mapping record at the current position, leaving the
    /// cursor just past the free list. The footer signature, when
    /// present, is *not* consumed here.
    pub(crate) fn read(
        input: &mut Cursor<&[u8]>,
        variant: CimVariant,
    ) -> Result<Self> {
        let header = MappingHeader::read(&mut *input, variant)?;
        if header.signature != MAPPING_SIGNATURE {
            return Err(Error::invalid(format!(
                "invalid mapping signature {:#x}",
                header.signature
            )));
        }

        let count = header.mapping_entry_count as usize;
        let mut entries = Vec::with_capacity(count);
        match variant {
            CimVariant::Modern => {
                for _ in 0..count {
                    let raw: [u32; 6] = bincode::deserialize_from(&mut *input)?;
                    entries.push(MappingEntry {
                        page_number: raw[0] & MAPPING_PAGE_ID_MASK,
                        page_crc: Some(raw[1]),
                        free_space: Some(raw[2]),
                        used_space: Some(raw[3]),
                        first_id: Some(raw[4]),
                        second_id: Some(raw[5]),
                    });
                }
            }
            CimVariant::Xp => {
                for _ in 0..count {
                    let raw = input.read_u32()?;
                    entries.push(MappingEntry {
                        page_number: raw & MAPPING_PAGE_ID_MASK,
                        page_crc: None,
                        free_space: None,
                        used_space: None,
                        first_id: None,
                        second_id: None,
                    });
                }
            }
        }

        let free_dword_count = input.read_u32()?;
        input.seek(SeekFrom::Current(i64::from(free_dword_count) * 4))?;

        Ok(Mapping {
            header,
            entries,
            reverse_map: RefCell::new(None),
        })
    }

    /// Translate a logical page number into its mapping entry.
    pub fn get_entry(&self, logical_num: u32) -> Result<MappingEntry> {
        let entry = self
            .entries
            .get(logical_num as usize)
            .ok_or(Error::UnmappedPage(logical_num))?;
        if !entry.is_mapped() {
            return Err(Error::UnmappedPage(logical_num));
        }
        Ok(*entry)
    }

    /// Translate a physical page number back to its logical number.
    pub fn reverse(&self, physical_num: u32) -> Result<u32> {
        let mut map = self.reverse_map.borrow_mut();
        let map = map.get_or_insert_with(|| {
            self.entries
                .iter()
                .enumerate()
                .filter(|(_, e)| e.is_mapped())
                .map(|(i, e)| (e.page_number, i as u32))
                .collect()
        });
        map.get(&physical_num)
            .copied()
            .ok_or(Error::UnmappedPage(physical_num))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_u32(buf: &mut Vec<u8>, value: u32) {
        buf.extend_from_slice(&value.to_le_bytes());
    }

    fn modern_mapping(version: u32, entries: &[u32]) -> Vec<u8> {
        let mut buf = Vec::new();
        push_u32(&mut buf, MAPPING_SIGNATURE);
        push_u32(&mut buf, version);
        push_u32(&mut buf, 2); // first_id
        push_u32(&mut buf, 1); // second_id
        push_u32(&mut buf, entries.len() as u32);
        push_u32(&mut buf, entries.len() as u32);
        for &page in entries {
            push_u32(&mut buf, page);
            for _ in 0..5 {
                push_u32(&mut buf, 0);
            }
        }
        push_u32(&mut buf, 0); // free_dword_count
        buf
    }

    #[test]
    fn current_mapping_is_highest_version() {
        let files = vec![
            modern_mapping(3, &[0]),
            modern_mapping(7, &[0]),
            modern_mapping(5, &[0]),
        ];
        let (variant, winner) = find_current_mapping(&files).unwrap();
        assert_eq!(variant, CimVariant::Modern);
        assert_eq!(winner, 1);
        // deterministic and idempotent
        assert_eq!(find_current_mapping(&files).unwrap().1, 1);
    }

    #[test]
    fn bad_signature_is_fatal() {
        let mut bad = modern_mapping(1, &[0]);
        bad[0] = 0xFF;
        assert!(find_current_mapping(&[bad]).is_err());
    }

    #[test]
    fn xp_detection_is_stable() {
        // entry count far below the physical page count
        let mut buf = Vec::new();
        for value in [MAPPING_SIGNATURE, 1, 2, 1, 100, 2] {
            push_u32(&mut buf, value);
        }
        let header = MappingHeader::read(
            &mut Cursor::new(buf.as_slice()),
            CimVariant::Modern,
        )
        .unwrap();
        assert!(is_xp_mapping(&header).unwrap());
        assert!(is_xp_mapping(&header).unwrap());

        // consecutive ids and a dense entry table read as modern
        let mut buf = Vec::new();
        for value in [MAPPING_SIGNATURE, 1, 2, 1, 100, 100] {
            push_u32(&mut buf, value);
        }
        let header = MappingHeader::read(
            &mut Cursor::new(buf.as_slice()),
            CimVariant::Modern,
        )
        .unwrap();
        assert!(!is_xp_mapping(&header).unwrap());
    }

    #[test]
    fn unmapped_entries_error() {
        let data = modern_mapping(1, &[0, UNMAPPED_PAGE_VALUE]);
        let mapping =
            Mapping::read(&mut Cursor::new(data.as_slice()), CimVariant::Modern).unwrap();
        assert!(mapping.get_entry(0).is_ok());
        assert!(matches!(
            mapping.get_entry(1),
            Err(Error::UnmappedPage(1))
        ));
        assert!(matches!(
            mapping.get_entry(9),
            Err(Error::UnmappedPage(9))
        ));
    }

    #[test]
    fn reverse_skips_unmapped() {
        let data = modern_mapping(1, &[4, UNMAPPED_PAGE_VALUE, 6]);
        let mapping =
            Mapping::read(&mut Cursor::new(data.as_slice()), CimVariant::Modern).unwrap();
        assert_eq!(mapping.reverse(4).unwrap(), 0);
        assert_eq!(mapping.reverse(6).unwrap(), 2);
        assert!(mapping.reverse(5).is_err());
    }
}
