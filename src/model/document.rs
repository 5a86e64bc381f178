//! Document Model: catalog, page tree and trailer over an Object Store

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use tracing::debug;

use crate::error::{Error, ParseError, Result};
use crate::layout::{PageDimensions, Rect};
use crate::model::object::{Dictionary, Object, ObjectId};
use crate::model::store::ObjectStore;
use crate::model::writer;
use crate::model::xref::{parse_header, read_xref};

/// Page attributes a page may inherit from its ancestors in the page tree
pub const INHERITABLE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

const MAX_TREE_DEPTH: usize = 64;

/// Producer written into the Info dictionary of new documents
const PRODUCER: &str = concat!("pdf-pages ", env!("CARGO_PKG_VERSION"));

/// Handle to a page dictionary inside one document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageHandle(ObjectId);

impl PageHandle {
    pub(crate) fn new(id: ObjectId) -> Self {
        Self(id)
    }

    pub fn id(&self) -> ObjectId {
        self.0
    }
}

/// Lifecycle of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    Empty,
    Loaded,
    Mutated,
    Saved,
}

/// A PDF document: object store plus catalog, page tree root and trailer
#[derive(Debug)]
pub struct Document {
    version: String,
    store: ObjectStore,
    trailer: Dictionary,
    catalog: ObjectId,
    pages_root: ObjectId,
    pages: Vec<PageHandle>,
    state: DocumentState,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create an empty document with a catalog and an empty page tree
    pub fn new() -> Self {
        let mut store = ObjectStore::new();

        let pages_root = store.allocate();
        let mut pages = Dictionary::new();
        pages.set("Type", Object::name("Pages"));
        pages.set("Kids", Object::Array(Vec::new()));
        pages.set("Count", Object::Integer(0));
        store.put(pages_root, pages.into());

        let mut catalog = Dictionary::new();
        catalog.set("Type", Object::name("Catalog"));
        catalog.set("Pages", pages_root);
        let catalog_id = store.add(catalog.into());

        let mut info = Dictionary::new();
        info.set("Producer", Object::string_literal(PRODUCER));
        let info_id = store.add(info.into());

        let mut trailer = Dictionary::new();
        trailer.set("Root", catalog_id);
        trailer.set("Info", info_id);

        Self {
            version: "1.7".to_string(),
            store,
            trailer,
            catalog: catalog_id,
            pages_root,
            pages: Vec::new(),
            state: DocumentState::Empty,
        }
    }

    /// Parse a document from its bytes
    ///
    /// Objects stay unparsed until first use; only the catalog and the page
    /// tree are walked here.
    pub fn load(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        let version = parse_header(&bytes)?;
        let xref = read_xref(&bytes)?;

        if xref.trailer.contains_key(b"Encrypt") {
            return Err(ParseError::Encrypted.into());
        }

        let catalog = xref
            .trailer
            .get(b"Root")
            .and_then(Object::as_reference)
            .ok_or(ParseError::MissingCatalog)?;

        let mut trailer = Dictionary::new();
        trailer.set("Root", catalog);
        for key in [&b"Info"[..], &b"ID"[..]] {
            if let Some(value) = xref.trailer.get(key) {
                trailer.set(key, value.clone());
            }
        }

        let store = ObjectStore::from_xref(bytes, &xref);
        let pages_root = match store.get(catalog) {
            Ok(Object::Dictionary(dict)) => {
                dict.get(b"Pages").and_then(Object::as_reference).ok_or(ParseError::MissingCatalog)?
            }
            Ok(_) | Err(Error::MissingObject(_)) => return Err(ParseError::MissingCatalog.into()),
            Err(other) => return Err(other),
        };

        let mut document = Self {
            version,
            store,
            trailer,
            catalog,
            pages_root,
            pages: Vec::new(),
            state: DocumentState::Loaded,
        };
        document.pages = document.collect_pages()?;
        debug!(
            version = %document.version,
            pages = document.pages.len(),
            objects = document.store.len(),
            "loaded document"
        );
        Ok(document)
    }

    /// Load a document from a file on disk
    pub fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        Self::load(std::fs::read(path)?)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn state(&self) -> DocumentState {
        self.state
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ObjectStore {
        self.mark_mutated();
        &mut self.store
    }

    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    pub fn catalog_id(&self) -> ObjectId {
        self.catalog
    }

    pub fn pages_root_id(&self) -> ObjectId {
        self.pages_root
    }

    /// Allocate and store a new object
    pub fn add_object(&mut self, object: Object) -> ObjectId {
        self.store_mut().add(object)
    }

    pub fn get_object(&self, id: ObjectId) -> Result<&Object> {
        self.store.get(id)
    }

    pub fn get_object_mut(&mut self, id: ObjectId) -> Result<&mut Object> {
        self.store_mut().get_mut(id)
    }

    /// Follow one level of indirection
    pub fn resolve<'a>(&'a self, object: &'a Object) -> Result<&'a Object> {
        self.store.resolve(object)
    }

    /// Pages in tree order
    pub fn pages(&self) -> &[PageHandle] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Page at a 0-based index
    pub fn page_at(&self, index: usize) -> Result<PageHandle> {
        self.pages
            .get(index)
            .copied()
            .ok_or(Error::PageOutOfRange { index, page_count: self.pages.len() })
    }

    pub fn page_dict(&self, page: PageHandle) -> Result<&Dictionary> {
        match self.store.get(page.id())? {
            Object::Dictionary(dict) => Ok(dict),
            other => Err(ParseError::CorruptPageTree(format!(
                "page {} is a {}",
                page.id(),
                other.kind()
            ))
            .into()),
        }
    }

    pub fn page_dict_mut(&mut self, page: PageHandle) -> Result<&mut Dictionary> {
        match self.get_object_mut(page.id())? {
            Object::Dictionary(dict) => Ok(dict),
            _ => Err(ParseError::CorruptPageTree(format!("page {} is not a dictionary", page.id()))
                .into()),
        }
    }

    /// Look up a page attribute, walking `Parent` links for inheritable keys
    pub fn inherited(&self, page: PageHandle, key: &[u8]) -> Result<Option<&Object>> {
        let mut node = self.page_dict(page)?;
        if let Some(value) = node.get(key) {
            return Ok(Some(value));
        }
        if !INHERITABLE_KEYS.contains(&key) {
            return Ok(None);
        }
        for _ in 0..MAX_TREE_DEPTH {
            let Some(parent) = node.get(b"Parent").and_then(Object::as_reference) else {
                return Ok(None);
            };
            node = match self.store.get(parent)? {
                Object::Dictionary(dict) => dict,
                _ => return Ok(None),
            };
            if let Some(value) = node.get(key) {
                return Ok(Some(value));
            }
        }
        Err(ParseError::CorruptPageTree("page tree too deep".into()).into())
    }

    /// The page's MediaBox, defaulting to US Letter when absent
    pub fn media_box(&self, page: PageHandle) -> Result<Rect> {
        let Some(value) = self.inherited(page, b"MediaBox")? else {
            return Ok(Rect::from_dimensions(PageDimensions::letter()));
        };
        let items = self
            .resolve(value)?
            .as_array()
            .ok_or_else(|| ParseError::CorruptPageTree("MediaBox is not an array".into()))?;
        let mut numbers = Vec::with_capacity(4);
        for item in items {
            let number = self.resolve(item)?.as_f32().ok_or_else(|| {
                ParseError::CorruptPageTree("MediaBox entry is not a number".into())
            })?;
            numbers.push(number);
        }
        match numbers.as_slice() {
            [x0, y0, x1, y1] => Ok(Rect::new(*x0, *y0, *x1, *y1)),
            _ => Err(ParseError::CorruptPageTree("MediaBox needs four numbers".into()).into()),
        }
    }

    /// Splice pages into the page tree before `index`
    ///
    /// `index == page_count()` appends. Identifiers are untouched; only the
    /// tree is rewired.
    pub fn insert_pages(&mut self, index: usize, pages: &[PageHandle]) -> Result<()> {
        if index > self.pages.len() {
            return Err(Error::PageOutOfRange { index, page_count: self.pages.len() });
        }
        for page in pages {
            let dict = self.page_dict(*page)?;
            if !dict.has_type(b"Page") {
                return Err(Error::Validation(format!("object {} is not a page", page.id())));
            }
        }
        self.pages.splice(index..index, pages.iter().copied());
        self.rewire_page_tree()
    }

    /// Drop pages from the page tree by 0-based index
    ///
    /// The page objects remain in the store and are left out of the next
    /// save by the reachability sweep.
    pub fn remove_pages(&mut self, indices: &BTreeSet<usize>) -> Result<()> {
        if let Some(&index) = indices.iter().find(|&&i| i >= self.pages.len()) {
            return Err(Error::PageOutOfRange { index, page_count: self.pages.len() });
        }
        let mut position = 0;
        self.pages.retain(|_| {
            let keep = !indices.contains(&position);
            position += 1;
            keep
        });
        self.rewire_page_tree()
    }

    /// Serialize the whole reachable graph
    pub fn save(&mut self) -> Result<Vec<u8>> {
        let bytes = writer::write_document(self)?;
        self.state = DocumentState::Saved;
        Ok(bytes)
    }

    /// Serialize straight to a file
    pub fn save_to(&mut self, path: &Path) -> Result<()> {
        let bytes = self.save()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub(crate) fn mark_mutated(&mut self) {
        self.state = DocumentState::Mutated;
    }

    /// Make the root node the direct parent of every page
    ///
    /// Inherited attributes are copied onto pages whose parent was an
    /// intermediate node, so flattening does not change how they render.
    fn rewire_page_tree(&mut self) -> Result<()> {
        let root = self.pages_root;
        for page in self.pages.clone() {
            let parent = self.page_dict(page)?.get(b"Parent").and_then(Object::as_reference);
            let mut materialized = Vec::new();
            if parent != Some(root) {
                for key in INHERITABLE_KEYS {
                    if !self.page_dict(page)?.contains_key(key) {
                        if let Some(value) = self.inherited(page, key)? {
                            materialized.push((key, value.clone()));
                        }
                    }
                }
            }
            let dict = self.page_dict_mut(page)?;
            for (key, value) in materialized {
                dict.set(key, value);
            }
            dict.set("Parent", root);
        }

        let kids: Vec<Object> = self.pages.iter().map(|p| Object::Reference(p.id())).collect();
        let count = kids.len() as i64;
        let node = self
            .get_object_mut(root)?
            .as_dict_mut()
            .ok_or_else(|| ParseError::CorruptPageTree("page tree root is not a dictionary".into()))?;
        node.set("Kids", Object::Array(kids));
        node.set("Count", Object::Integer(count));
        Ok(())
    }

    /// Flatten the page tree into tree order
    fn collect_pages(&self) -> Result<Vec<PageHandle>> {
        let mut pages = Vec::new();
        let mut visited = HashSet::new();
        // (node, depth), children pushed in reverse to pop in order
        let mut stack = vec![(self.pages_root, 0usize)];

        while let Some((id, depth)) = stack.pop() {
            if depth > MAX_TREE_DEPTH {
                return Err(ParseError::CorruptPageTree("page tree too deep".into()).into());
            }
            if !visited.insert(id) {
                return Err(ParseError::CorruptPageTree(format!("node {id} appears twice")).into());
            }
            let dict = match self.store.get(id) {
                Ok(Object::Dictionary(dict)) => dict,
                Ok(other) => {
                    return Err(ParseError::CorruptPageTree(format!(
                        "node {id} is a {}",
                        other.kind()
                    ))
                    .into())
                }
                Err(Error::MissingObject(_)) => {
                    return Err(ParseError::CorruptPageTree(format!("node {id} is missing")).into())
                }
                Err(other) => return Err(other),
            };

            let is_leaf = dict.has_type(b"Page") || (!dict.has_type(b"Pages") && !dict.contains_key(b"Kids"));
            if is_leaf {
                if id == self.pages_root {
                    return Err(ParseError::CorruptPageTree("root is a page".into()).into());
                }
                pages.push(PageHandle(id));
                continue;
            }

            let kids = match dict.get(b"Kids") {
                Some(kids) => self.resolve(kids)?.as_array().ok_or_else(|| {
                    ParseError::CorruptPageTree(format!("Kids of {id} is not an array"))
                })?,
                None => continue,
            };
            for kid in kids.iter().rev() {
                let kid = kid.as_reference().ok_or_else(|| {
                    ParseError::CorruptPageTree(format!("Kids of {id} holds a direct object"))
                })?;
                stack.push((kid, depth + 1));
            }
        }
        Ok(pages)
    }

    /// Text value from the Info dictionary
    pub fn info_string(&self, key: &[u8]) -> Option<String> {
        let info = self.trailer.get(b"Info")?;
        let dict = self.resolve(info).ok()?.as_dict()?;
        let bytes = self.resolve(dict.get(key)?).ok()?.as_str()?;
        Some(decode_text_string(bytes))
    }
}

/// Decode a PDF text string (UTF-16BE with BOM, or single-byte)
pub fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(body) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = body
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::object::Stream;

    /// Append a blank page directly under the root
    fn push_page(doc: &mut Document, media_box: [i64; 4]) -> PageHandle {
        let content = doc.add_object(Stream::new(Dictionary::new(), b"0 0 m".to_vec()).into());
        let mut page = Dictionary::new();
        page.set("Type", Object::name("Page"));
        page.set("MediaBox", Object::Array(media_box.iter().map(|&n| Object::Integer(n)).collect()));
        page.set("Contents", content);
        let handle = PageHandle(doc.add_object(page.into()));
        let count = doc.page_count();
        doc.insert_pages(count, &[handle]).expect("insert");
        handle
    }

    #[test]
    fn test_new_document_is_empty() {
        let doc = Document::new();
        assert_eq!(doc.page_count(), 0);
        assert_eq!(doc.state(), DocumentState::Empty);
        assert!(matches!(doc.page_at(0), Err(Error::PageOutOfRange { index: 0, page_count: 0 })));
    }

    #[test]
    fn test_insert_and_remove_rewire_kids() {
        let mut doc = Document::new();
        let a = push_page(&mut doc, [0, 0, 100, 100]);
        let b = push_page(&mut doc, [0, 0, 200, 200]);
        let c = push_page(&mut doc, [0, 0, 300, 300]);
        assert_eq!(doc.pages(), &[a, b, c]);
        assert_eq!(doc.state(), DocumentState::Mutated);

        doc.remove_pages(&BTreeSet::from([1])).expect("remove");
        assert_eq!(doc.pages(), &[a, c]);

        doc.insert_pages(0, &[b]).expect("insert");
        assert_eq!(doc.pages(), &[b, a, c]);

        let root = doc.get_object(doc.pages_root_id()).expect("root").as_dict().expect("dict");
        assert_eq!(root.get(b"Count"), Some(&Object::Integer(3)));
        assert_eq!(doc.page_dict(b).expect("page").get(b"Parent"),
            Some(&Object::Reference(doc.pages_root_id())));
        // Removed pages stay in the store
        assert!(doc.store().contains(b.id()));
    }

    #[test]
    fn test_insert_rejects_bad_index() {
        let mut doc = Document::new();
        let page = push_page(&mut doc, [0, 0, 10, 10]);
        assert!(matches!(doc.insert_pages(5, &[page]), Err(Error::PageOutOfRange { .. })));
        assert!(matches!(
            doc.remove_pages(&BTreeSet::from([3])),
            Err(Error::PageOutOfRange { index: 3, page_count: 1 })
        ));
    }

    #[test]
    fn test_media_box_inherited_from_root() {
        let mut doc = Document::new();
        let page = push_page(&mut doc, [0, 0, 1, 1]);
        doc.page_dict_mut(page).expect("page").remove(b"MediaBox");
        let root = doc.pages_root_id();
        doc.get_object_mut(root)
            .expect("root")
            .as_dict_mut()
            .expect("dict")
            .set("MediaBox", Object::Array(vec![
                Object::Integer(0), Object::Integer(0), Object::Real(595.5), Object::Integer(842),
            ]));
        assert_eq!(doc.media_box(page).expect("box"), Rect::new(0.0, 0.0, 595.5, 842.0));
    }

    #[test]
    fn test_decode_text_string() {
        assert_eq!(decode_text_string(b"Plain"), "Plain");
        assert_eq!(decode_text_string(&[0xFE, 0xFF, 0x00, 0x48, 0x00, 0x69]), "Hi");
    }
}
