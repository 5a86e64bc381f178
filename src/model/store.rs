//! Object Store: identifier to object mapping for one document

use std::cell::{OnceCell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, ParseError, Result};
use crate::model::filter::decode_stream;
use crate::model::lexer::Lexer;
use crate::model::object::{Object, ObjectId};
use crate::model::xref::{XrefEntry, XrefTable};

/// Where a slot's object comes from until it is first read
#[derive(Debug, Clone, Copy)]
enum Location {
    Memory,
    Offset(usize),
    Compressed { container: u32, index: u32 },
}

#[derive(Debug)]
struct Slot {
    location: Location,
    object: OnceCell<Object>,
}

/// Decoded body of an object stream: (object number, byte offset) pairs
#[derive(Debug)]
struct ObjectStreamBody {
    offsets: Vec<(u32, usize)>,
    data: Vec<u8>,
}

/// Owns every object of one document
///
/// Objects loaded from a file stay as byte offsets until first read;
/// `get` parses and caches them.
#[derive(Debug, Default)]
pub struct ObjectStore {
    slots: BTreeMap<ObjectId, Slot>,
    source: Vec<u8>,
    max_number: u32,
    object_streams: RefCell<HashMap<u32, Arc<ObjectStreamBody>>>,
    loading: RefCell<Vec<ObjectId>>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store whose entries lazily parse `source`
    pub fn from_xref(source: Vec<u8>, xref: &XrefTable) -> Self {
        let mut store = Self { source, ..Self::default() };
        for (&number, entry) in &xref.entries {
            let (id, location) = match *entry {
                XrefEntry::Free => continue,
                XrefEntry::InUse { offset, generation } => {
                    (ObjectId::new(number, generation), Location::Offset(offset))
                }
                XrefEntry::Compressed { container, index } => {
                    (ObjectId::new(number, 0), Location::Compressed { container, index })
                }
            };
            if number == 0 {
                continue;
            }
            store.max_number = store.max_number.max(number);
            store.slots.insert(id, Slot { location, object: OnceCell::new() });
        }
        store
    }

    /// Reserve a fresh identifier; nothing is stored until `put`
    pub fn allocate(&mut self) -> ObjectId {
        self.max_number += 1;
        ObjectId::new(self.max_number, 0)
    }

    /// Store `object` under `id`, replacing any previous object
    pub fn put(&mut self, id: ObjectId, object: Object) {
        self.max_number = self.max_number.max(id.number);
        let cell = OnceCell::new();
        let _ = cell.set(object);
        self.slots.insert(id, Slot { location: Location::Memory, object: cell });
    }

    /// Allocate and store in one step
    pub fn add(&mut self, object: Object) -> ObjectId {
        let id = self.allocate();
        self.put(id, object);
        id
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn max_number(&self) -> u32 {
        self.max_number
    }

    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.slots.keys().copied()
    }

    /// Look up an object, parsing it from the source on first access
    pub fn get(&self, id: ObjectId) -> Result<&Object> {
        let slot = self.slots.get(&id).ok_or(Error::MissingObject(id))?;
        if let Some(object) = slot.object.get() {
            return Ok(object);
        }
        let object = self.materialize(id, slot.location)?;
        Ok(slot.object.get_or_init(|| object))
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Result<&mut Object> {
        self.get(id)?;
        self.slots
            .get_mut(&id)
            .and_then(|slot| slot.object.get_mut())
            .ok_or(Error::MissingObject(id))
    }

    /// Follow one level of indirection
    ///
    /// A reference whose target is itself a reference is rejected, as is a
    /// reference to an absent object.
    pub fn resolve<'a>(&'a self, object: &'a Object) -> Result<&'a Object> {
        match object {
            Object::Reference(id) => match self.get(*id) {
                Ok(Object::Reference(_)) => Err(Error::UnresolvedReference(*id)),
                Ok(target) => Ok(target),
                Err(Error::MissingObject(_)) => Err(Error::UnresolvedReference(*id)),
                Err(other) => Err(other),
            },
            direct => Ok(direct),
        }
    }

    fn materialize(&self, id: ObjectId, location: Location) -> Result<Object> {
        if self.loading.borrow().contains(&id) {
            return Err(ParseError::MalformedObject {
                offset: 0,
                detail: format!("object {id} depends on itself while loading"),
            }
            .into());
        }
        self.loading.borrow_mut().push(id);
        let result = match location {
            Location::Memory => Err(Error::MissingObject(id)),
            Location::Offset(offset) => self.parse_at(id, offset),
            Location::Compressed { container, index } => {
                self.parse_compressed(id, container, index)
            }
        };
        self.loading.borrow_mut().retain(|loading| *loading != id);
        result
    }

    fn parse_at(&self, id: ObjectId, offset: usize) -> Result<Object> {
        if offset >= self.source.len() {
            return Err(ParseError::CorruptXref(format!("object {id} offset {offset} past end")).into());
        }
        let mut lexer = Lexer::at(&self.source, offset);
        let (found, object) = lexer.parse_indirect_object(|length_id| {
            self.get(length_id).ok().and_then(Object::as_i64)
        })?;
        if found.number != id.number {
            return Err(ParseError::CorruptXref(format!(
                "xref points {id} at offset {offset} but found {found}"
            ))
            .into());
        }
        Ok(object)
    }

    fn parse_compressed(&self, id: ObjectId, container: u32, index: u32) -> Result<Object> {
        let body = self.object_stream(container)?;
        let (number, offset) = body.offsets.get(index as usize).copied().ok_or_else(|| {
            ParseError::CorruptXref(format!("object stream {container} has no index {index}"))
        })?;
        if number != id.number {
            return Err(ParseError::CorruptXref(format!(
                "object stream {container} index {index} holds {number}, expected {id}"
            ))
            .into());
        }
        let mut lexer = Lexer::at(&body.data, offset);
        Ok(lexer.parse_object()?)
    }

    fn object_stream(&self, container: u32) -> Result<Arc<ObjectStreamBody>> {
        if let Some(body) = self.object_streams.borrow().get(&container) {
            return Ok(Arc::clone(body));
        }

        let container_id = ObjectId::new(container, 0);
        let stream = match self.get(container_id)? {
            Object::Stream(stream) if stream.dict.has_type(b"ObjStm") => stream,
            other => {
                return Err(ParseError::CorruptXref(format!(
                    "object {container_id} is a {} rather than an object stream",
                    other.kind()
                ))
                .into())
            }
        };

        let count = stream.dict.get(b"N").and_then(Object::as_i64).unwrap_or(0).max(0);
        let first = stream.dict.get(b"First").and_then(Object::as_i64).unwrap_or(0).max(0) as usize;
        let data = decode_stream(stream).map_err(ParseError::CorruptXref)?;

        let corrupt = || ParseError::CorruptXref(format!("object stream {container} header"));
        let mut lexer = Lexer::new(&data);
        // Each header pair takes at least four bytes ("1 0 ")
        let capacity = usize::try_from(count).unwrap_or(usize::MAX).min(data.len() / 4);
        let mut offsets = Vec::with_capacity(capacity);
        for _ in 0..count {
            let number = lexer.read_unsigned().ok_or_else(corrupt)?;
            let offset = lexer.read_unsigned().ok_or_else(corrupt)?;
            let number = u32::try_from(number).map_err(|_| corrupt())?;
            let offset = usize::try_from(offset)
                .ok()
                .and_then(|offset| first.checked_add(offset))
                .filter(|&at| at < data.len())
                .ok_or_else(corrupt)?;
            offsets.push((number, offset));
        }
        debug!(container, objects = offsets.len(), "decoded object stream");

        let body = Arc::new(ObjectStreamBody { offsets, data });
        self.object_streams.borrow_mut().insert(container, Arc::clone(&body));
        Ok(body)
    }
}
