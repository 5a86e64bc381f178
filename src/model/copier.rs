//! Cross-Document Page Copier
//!
//! Copying a page works in two passes over the page's dependency closure:
//! every source identifier gets a destination identifier first, then each
//! object is cloned with its references rewritten. Forward references and
//! cycles inside the closure need no special handling that way.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::{Error, Result};
use crate::layout::{PageDimensions, Rect};
use crate::model::document::{Document, PageHandle};
use crate::model::object::{Dictionary, Object, ObjectId};
use crate::model::writer::collect_references;

/// Page entries carried over to the copy; inheritable ones are read through
/// the source page tree
const PAGE_KEYS: [&[u8]; 10] = [
    b"Resources",
    b"Contents",
    b"MediaBox",
    b"CropBox",
    b"BleedBox",
    b"TrimBox",
    b"ArtBox",
    b"Rotate",
    b"UserUnit",
    b"Group",
];

/// Source to destination identifier mapping for one copy batch
///
/// A table must only ever be used with a single source document.
#[derive(Debug, Default)]
pub struct DedupeTable {
    copied: HashMap<ObjectId, ObjectId>,
    // Page tree nodes reached from resources; references to them become null
    pruned: HashSet<ObjectId>,
}

impl DedupeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Destination identifier of an already copied source object
    pub fn get(&self, source: ObjectId) -> Option<ObjectId> {
        self.copied.get(&source).copied()
    }

    pub fn len(&self) -> usize {
        self.copied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.copied.is_empty()
    }

    fn is_known(&self, source: ObjectId) -> bool {
        self.copied.contains_key(&source) || self.pruned.contains(&source)
    }

    fn rewrite(&self, object: &mut Object) -> Result<()> {
        match object {
            Object::Reference(id) => {
                let source = *id;
                if let Some(target) = self.copied.get(&source) {
                    *object = Object::Reference(*target);
                } else if self.pruned.contains(&source) {
                    *object = Object::Null;
                } else {
                    return Err(Error::Serialization(format!(
                        "reference {source} escaped the copied closure"
                    )));
                }
            }
            Object::Array(items) => {
                for item in items {
                    self.rewrite(item)?;
                }
            }
            Object::Dictionary(dict) => self.rewrite_dict(dict)?,
            Object::Stream(stream) => self.rewrite_dict(&mut stream.dict)?,
            _ => {}
        }
        Ok(())
    }

    fn rewrite_dict(&self, dict: &mut Dictionary) -> Result<()> {
        for (_, value) in dict.iter_mut() {
            self.rewrite(value)?;
        }
        Ok(())
    }
}

/// Copy one page of `source` into `dest`
///
/// The returned page is not yet part of the destination page tree; splice
/// it in with [`Document::insert_pages`]. The source is never modified.
pub fn copy_page(
    source: &Document,
    page: PageHandle,
    dest: &mut Document,
    table: &mut DedupeTable,
) -> Result<PageHandle> {
    let mut attributes = Vec::with_capacity(PAGE_KEYS.len());
    for key in PAGE_KEYS {
        if let Some(value) = source.inherited(page, key)? {
            attributes.push((key, value.clone()));
        }
    }
    if !attributes.iter().any(|(key, _)| *key == b"MediaBox") {
        let letter = Rect::from_dimensions(PageDimensions::letter());
        let media_box = [letter.llx, letter.lly, letter.urx, letter.ury]
            .into_iter()
            .map(|n| Object::Integer(n as i64))
            .collect::<Vec<_>>();
        attributes.push((&b"MediaBox"[..], Object::Array(media_box)));
    }

    let closure = dependency_closure(source, attributes.iter().map(|(_, value)| value), table)?;

    // Pass 1: reserve every destination identifier
    for id in &closure {
        let target = dest.store_mut().allocate();
        table.copied.insert(*id, target);
    }

    // Pass 2: clone and rewrite
    for id in &closure {
        let mut object = source.get_object(*id)?.clone();
        table.rewrite(&mut object)?;
        if let Some(target) = table.get(*id) {
            dest.store_mut().put(target, object);
        }
    }

    let mut dict = Dictionary::new();
    dict.set("Type", Object::name("Page"));
    for (key, mut value) in attributes {
        table.rewrite(&mut value)?;
        dict.set(key, value);
    }
    let id = dest.add_object(dict.into());

    debug!(
        source_page = %page.id(),
        dest_page = %id,
        copied = closure.len(),
        "copied page"
    );
    Ok(PageHandle::new(id))
}

/// Source objects reachable from `roots` that the table has not seen yet,
/// in depth-first visit order
fn dependency_closure<'a>(
    source: &Document,
    roots: impl Iterator<Item = &'a Object>,
    table: &mut DedupeTable,
) -> Result<Vec<ObjectId>> {
    let mut stack = Vec::new();
    for root in roots {
        collect_references(root, &mut stack);
    }
    stack.reverse();

    let mut visited = HashSet::new();
    let mut order = Vec::new();
    while let Some(id) = stack.pop() {
        if table.is_known(id) || !visited.insert(id) {
            continue;
        }
        let object = match source.get_object(id) {
            Ok(object) => object,
            Err(Error::MissingObject(_)) => return Err(Error::UnresolvedReference(id)),
            Err(other) => return Err(other),
        };
        if let Object::Dictionary(dict) = object {
            if dict.has_type(b"Page") || dict.has_type(b"Pages") {
                table.pruned.insert(id);
                continue;
            }
        }
        order.push(id);

        let mut children = Vec::new();
        collect_references(object, &mut children);
        stack.extend(children.into_iter().rev());
    }
    Ok(order)
}

/// Copies pages from one source document, sharing a dedupe table across
/// every page of the batch
pub struct PageCopier<'a> {
    source: &'a Document,
    table: DedupeTable,
}

impl<'a> PageCopier<'a> {
    pub fn new(source: &'a Document) -> Self {
        Self { source, table: DedupeTable::new() }
    }

    pub fn copy_page(&mut self, page: PageHandle, dest: &mut Document) -> Result<PageHandle> {
        copy_page(self.source, page, dest, &mut self.table)
    }

    /// Copy pages by 0-based index and append them to `dest` in the given order
    pub fn copy_pages(&mut self, indices: &[usize], dest: &mut Document) -> Result<Vec<PageHandle>> {
        let mut copied = Vec::with_capacity(indices.len());
        for &index in indices {
            let page = self.source.page_at(index)?;
            copied.push(self.copy_page(page, dest)?);
        }
        let end = dest.page_count();
        dest.insert_pages(end, &copied)?;
        Ok(copied)
    }

    /// Append every page of the source to `dest`
    pub fn copy_all(&mut self, dest: &mut Document) -> Result<Vec<PageHandle>> {
        let indices: Vec<usize> = (0..self.source.page_count()).collect();
        self.copy_pages(&indices, dest)
    }

    pub fn table(&self) -> &DedupeTable {
        &self.table
    }
}
