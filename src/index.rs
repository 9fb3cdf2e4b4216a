use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{Cursor, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::rc::Rc;

use log::trace;
use lru::LruCache;
use md5::Md5;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::format::{
    CimVariant, INDEX_PAGE_INVALID, INDEX_PAGE_INVALID2, INDEX_PAGE_SIZE,
};
use crate::mapping::Mapping;
use crate::reader::CimRead;
use crate::Cim;

const PAGE_CACHE_SIZE: usize = 256;
const LOOKUP_CACHE_SIZE: usize = 1024;

/// One `0x2000`-byte index page, with its keys reconstructed from the
/// string-definition and string tables.
#[derive(Debug, Clone)]
pub struct IndexPage {
    pub logical_num: u32,
    pub page_num: u32,
    pub signature: u32,
    pub root_page: u32,
    children: Vec<u32>,
    keys: Vec<String>,
}

impl IndexPage {
    fn read(buf: &[u8], logical_num: u32, page_num: u32) -> Result<Self> {
        let mut input = Cursor::new(buf);
        let signature = input.read_u32()?;
        let _logical_id = input.read_u32()?;
        let _pad = input.read_u32()?;
        let root_page = input.read_u32()?;
        let record_count = input.read_u32()? as usize;

        // unknown dwords, one per record
        input.seek(SeekFrom::Current(record_count as i64 * 4))?;

        let mut children = Vec::with_capacity(record_count + 1);
        for _ in 0..record_count + 1 {
            children.push(input.read_u32()?);
        }

        let mut key_descriptors = Vec::with_capacity(record_count);
        for _ in 0..record_count {
            key_descriptors.push(input.read_u16()?);
        }

        let definition_count = input.read_u16()? as usize;
        let mut definitions = Vec::with_capacity(definition_count);
        for _ in 0..definition_count {
            definitions.push(input.read_u16()?);
        }

        let string_count = input.read_u16()? as usize;
        let mut string_table = Vec::with_capacity(string_count + 1);
        for _ in 0..string_count + 1 {
            string_table.push(input.read_u16()?);
        }

        let data = &buf[input.position() as usize..];

        let keys = key_descriptors
            .iter()
            .map(|&descriptor| {
                Self::string(&definitions, &string_table, data, descriptor as usize)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(IndexPage {
            logical_num,
            page_num,
            signature,
            root_page,
            children,
            keys,
        })
    }

    /// Reassemble the "/"-joined key whose part list starts at `idx` in
    /// the string-definition table.
    fn string(
        definitions: &[u16],
        string_table: &[u16],
        data: &[u8],
        idx: usize,
    ) -> Result<String> {
        let malformed = || Error::invalid("malformed index page string tables");
        let part_count = *definitions.get(idx).ok_or_else(malformed)? as usize;

        let mut parts = Vec::with_capacity(part_count);
        for i in 0..part_count {
            let part_idx =
                *definitions.get(idx + 1 + i).ok_or_else(malformed)? as usize;
            let offset = *string_table.get(part_idx).ok_or_else(malformed)? as usize;
            let tail = data.get(offset..).ok_or_else(malformed)?;
            let end = tail.iter().position(|b| *b == 0).ok_or_else(malformed)?;
            let part = std::str::from_utf8(&tail[..end]).map_err(|_| malformed())?;
            parts.push(part);
        }

        Ok(parts.join("/"))
    }

    pub fn count(&self) -> usize {
        self.keys.len()
    }

    pub fn key(&self, idx: usize) -> &str {
        &self.keys[idx]
    }

    fn child(&self, idx: usize) -> Result<u32> {
        self.children
            .get(idx)
            .copied()
            .ok_or_else(|| Error::invalid("index page child out of range"))
    }
}

#[derive(Debug)]
pub(crate) struct Store {
    data: Vec<u8>,
    mapping: Mapping,
    pages: RefCell<LruCache<u32, Rc<IndexPage>>>,
    root: Rc<IndexPage>,
}

impl Store {
    pub(crate) fn new(data: Vec<u8>, mapping: Mapping) -> Result<Self> {
        let mut store = Store {
            data,
            mapping,
            pages: RefCell::new(LruCache::new(
                NonZeroUsize::new(PAGE_CACHE_SIZE).unwrap(),
            )),
            // placeholder until the root page number is known
            root: Rc::new(IndexPage {
                logical_num: 0,
                page_num: 0,
                signature: 0,
                root_page: 0,
                children: vec![],
                keys: vec![],
            }),
        };

        // The root page comes from the first mapping entry when the
        // mapping carries per-page metadata, from the page-0 header
        // otherwise.
        let root_num = match store.mapping.get_entry(0)?.used_space {
            Some(num) => num,
            None => store.page(0)?.root_page,
        };
        store.root = store.page(root_num)?;
        Ok(store)
    }

    pub(crate) fn root(&self) -> Rc<IndexPage> {
        Rc::clone(&self.root)
    }

    pub(crate) fn page(&self, logical_num: u32) -> Result<Rc<IndexPage>> {
        if let Some(page) = self.pages.borrow_mut().get(&logical_num) {
            return Ok(Rc::clone(page));
        }

        let page_num = self.mapping.get_entry(logical_num)?.page_number;
        let start = page_num as usize * INDEX_PAGE_SIZE;
        let buf = self
            .data
            .get(start..start + INDEX_PAGE_SIZE)
            .ok_or_else(|| {
                Error::invalid(format!("index page {page_num} out of file bounds"))
            })?;
        let page = IndexPage::read(buf, logical_num, page_num).map_err(|e| match e {
            Error::Io(_) => {
                Error::invalid(format!("truncated index page {logical_num}"))
            }
            other => other,
        })?;

        let page = Rc::new(page);
        self.pages.borrow_mut().put(logical_num, Rc::clone(&page));
        Ok(page)
    }
}

/// The paged B-tree index. Lookups are substring-inclusive: every
/// stored key that contains the target as a substring is returned, in
/// traversal order.
#[derive(Debug)]
pub struct Index {
    variant: CimVariant,
    store: Store,
    lookups: RefCell<LruCache<(u32, String), Vec<Key>>>,
}

impl Index {
    pub(crate) fn new(
        variant: CimVariant,
        data: Vec<u8>,
        mapping: Mapping,
    ) -> Result<Self> {
        let store = Store::new(data, mapping)?;
        Ok(Index {
            variant,
            store,
            lookups: RefCell::new(LruCache::new(
                NonZeroUsize::new(LOOKUP_CACHE_SIZE).unwrap(),
            )),
        })
    }

    pub fn lookup(&self, key: &Key) -> Result<Vec<Key>> {
        let target = key.to_string();
        trace!("index lookup: {target}");
        self.lookup_in(&target, &self.store.root())
    }

    fn lookup_in(&self, target: &str, page: &IndexPage) -> Result<Vec<Key>> {
        let cache_key = (page.logical_num, target.to_owned());
        if let Some(hit) = self.lookups.borrow_mut().get(&cache_key) {
            return Ok(hit.clone());
        }

        let count = page.count();
        let mut matches = Vec::new();

        for i in 0..count {
            let page_key = page.key(i);

            if page_key.contains(target) {
                matches.extend(self.lookup_child(target, page, i)?);
                matches.push(Key::from_path(self.variant, page_key.to_owned()));
                matches.extend(self.lookup_child(target, page, i + 1)?);
                // further keys on this level may also contain the
                // target, keep scanning unless this was the last one
                if i == count - 1 {
                    break;
                }
                continue;
            }
            if target < page_key {
                matches.extend(self.lookup_child(target, page, i)?);
                break;
            }
            if i == count - 1 {
                matches.extend(self.lookup_child(target, page, i + 1)?);
                break;
            }
        }

        self.lookups.borrow_mut().put(cache_key, matches.clone());
        Ok(matches)
    }

    fn lookup_child(
        &self,
        target: &str,
        page: &IndexPage,
        idx: usize,
    ) -> Result<Vec<Key>> {
        let child = page.child(idx)?;
        if child == INDEX_PAGE_INVALID || child == INDEX_PAGE_INVALID2 {
            return Ok(vec![]);
        }
        let child_page = self.store.page(child)?;
        self.lookup_in(target, &child_page)
    }
}

/// A textual index key: "/"-joined `PREFIX_HEXDIGEST` segments, plus an
/// optional `.page.id.length` data-reference tail on the final segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Key {
    variant: CimVariant,
    path: String,
}

impl Key {
    pub(crate) fn new(variant: CimVariant) -> Self {
        Key {
            variant,
            path: String::new(),
        }
    }

    pub(crate) fn from_path(variant: CimVariant, path: String) -> Self {
        Key {
            variant,
            path: path.trim_matches('/').to_owned(),
        }
    }

    fn push(&self, segment: &str) -> Key {
        let path = if self.path.is_empty() {
            segment.to_owned()
        } else {
            format!("{}/{segment}", self.path)
        };
        Key {
            variant: self.variant,
            path,
        }
    }

    fn prefixed(&self, prefix: &str, name: Option<&str>) -> Key {
        match name {
            None => self.push(prefix),
            Some(name) => self.push(&format!("{prefix}_{}", self.digest(name))),
        }
    }

    /// Namespace segment.
    pub fn ns(&self, name: &str) -> Key {
        self.prefixed("NS", Some(name))
    }

    /// Class-definition segment.
    pub fn cd(&self, name: &str) -> Key {
        self.prefixed("CD", Some(name))
    }

    /// Bare class-definition prefix, for enumeration queries.
    pub fn cd_all(&self) -> Key {
        self.prefixed("CD", None)
    }

    /// Class-instance segment.
    pub fn ci(&self, name: &str) -> Key {
        self.prefixed("CI", Some(name))
    }

    /// Bare instance-list prefix.
    pub fn il(&self) -> Key {
        self.prefixed("IL", None)
    }

    /// Digest of the uppercased name in UTF-16LE: MD5 on XP, SHA-256 on
    /// modern repositories. A name that already is uppercase hex is
    /// used verbatim so digests can be re-fed as names.
    fn digest(&self, name: &str) -> String {
        if is_upper_hex(name) {
            return name.to_owned();
        }
        let wide: Vec<u8> = name
            .to_uppercase()
            .encode_utf16()
            .flat_map(u16::to_le_bytes)
            .collect();
        match self.variant {
            CimVariant::Xp => hex_upper(Md5::digest(&wide).as_slice()),
            CimVariant::Modern => hex_upper(Sha256::digest(&wide).as_slice()),
        }
    }

    /// Split the key into a prefix → digest map.
    pub fn parts(&self) -> Result<HashMap<String, String>> {
        let mut parts = HashMap::new();
        for segment in self.path.split('/') {
            let (prefix, digest) = segment.split_once('_').ok_or_else(|| {
                Error::invalid(format!("malformed key segment: {segment}"))
            })?;
            parts.insert(prefix.to_owned(), digest.to_owned());
        }
        Ok(parts)
    }

    /// The single reference this key resolves to, if any.
    pub fn reference(&self, cim: &Cim) -> Result<Option<Key>> {
        let mut refs = self.references(cim)?;
        if refs.len() > 1 {
            return Err(Error::invalid(format!(
                "key {self} returned more than one reference"
            )));
        }
        Ok(refs.pop())
    }

    /// All references this key resolves to, in traversal order.
    pub fn references(&self, cim: &Cim) -> Result<Vec<Key>> {
        cim.index.lookup(self)
    }

    /// The object bytes behind this key's single reference.
    pub fn object(&self, cim: &Cim) -> Result<Vec<u8>> {
        let reference = self
            .reference(cim)?
            .ok_or_else(|| Error::ReferenceNotFound(self.to_string()))?;
        cim.objects.get(&reference)
    }

    /// The object bytes behind every reference of this key.
    pub fn objects(&self, cim: &Cim) -> Result<Vec<(Key, Vec<u8>)>> {
        self.references(cim)?
            .into_iter()
            .map(|reference| {
                let buf = cim.objects.get(&reference)?;
                Ok((reference, buf))
            })
            .collect()
    }

    pub fn is_data_reference(&self) -> bool {
        self.path.contains('.')
    }

    fn data_part(&self, idx: usize) -> Result<u32> {
        if !self.is_data_reference() {
            return Err(Error::invalid(format!(
                "key is not a data reference: {self}"
            )));
        }
        let part = self
            .path
            .split('.')
            .nth(idx)
            .ok_or_else(|| Error::invalid(format!("malformed data reference: {self}")))?;
        part.parse()
            .map_err(|_| Error::invalid(format!("malformed data reference: {self}")))
    }

    /// Logical data page of the referenced record.
    pub fn data_page(&self) -> Result<u32> {
        self.data_part(1)
    }

    /// Record id within the data page.
    pub fn data_id(&self) -> Result<u32> {
        self.data_part(2)
    }

    /// Total length of the referenced record.
    pub fn data_length(&self) -> Result<u32> {
        self.data_part(3)
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path)
    }
}

fn is_upper_hex(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|c| c.is_ascii_hexdigit())
        && name.chars().any(|c| c.is_ascii_uppercase())
        && !name.chars().any(|c| c.is_ascii_lowercase())
}

fn hex_upper(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{b:02X}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA256_EMPTY: &str =
        "E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855";
    const MD5_EMPTY: &str = "D41D8CD98F00B204E9800998ECF8427E";

    #[test]
    fn digest_of_empty_name() {
        let modern = Key::new(CimVariant::Modern);
        assert_eq!(modern.cd("").to_string(), format!("CD_{SHA256_EMPTY}"));
        let xp = Key::new(CimVariant::Xp);
        assert_eq!(xp.cd("").to_string(), format!("CD_{MD5_EMPTY}"));
    }

    #[test]
    fn digest_is_case_insensitive() {
        let key = Key::new(CimVariant::Modern);
        assert_eq!(key.cd("root").to_string(), key.cd("ROOT").to_string());
        assert_eq!(key.cd("RoOt").to_string(), key.cd("root").to_string());
    }

    #[test]
    fn upper_hex_names_are_verbatim() {
        let key = Key::new(CimVariant::Modern);
        let digest = "ABCDEF0123456789";
        assert_eq!(key.cd(digest).to_string(), format!("CD_{digest}"));
        // all-digit names are not "uppercase" and must be hashed
        assert_ne!(key.cd("1234").to_string(), "CD_1234");
        // lowercase hex is hashed too
        assert_ne!(key.cd("abcdef").to_string(), "CD_ABCDEF");
    }

    #[test]
    fn parts_round_trip() {
        let key = Key::new(CimVariant::Modern).ns("root").cd("MyClass");
        let parts = key.parts().unwrap();
        assert_eq!(parts.len(), 2);
        let digest = &parts["CD"];
        // feeding the digest back must build the same key
        assert_eq!(
            Key::new(CimVariant::Modern).ns("root").cd(digest).to_string(),
            key.to_string()
        );
    }

    #[test]
    fn data_reference_accessors() {
        let key = Key::from_path(
            CimVariant::Modern,
            "NS_AA/CD_BB.123.17.4096".to_owned(),
        );
        assert!(key.is_data_reference());
        assert_eq!(key.data_page().unwrap(), 123);
        assert_eq!(key.data_id().unwrap(), 17);
        assert_eq!(key.data_length().unwrap(), 4096);
    }

    #[test]
    fn plain_keys_are_not_data_references() {
        let key = Key::new(CimVariant::Modern).ns("root");
        assert!(!key.is_data_reference());
        assert!(key.data_page().is_err());
    }

    #[test]
    fn bare_prefixes() {
        let key = Key::new(CimVariant::Modern).ns("root");
        assert!(key.cd_all().to_string().ends_with("/CD"));
        assert!(key.il().to_string().ends_with("/IL"));
    }
}
