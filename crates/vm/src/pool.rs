//! The managed object pool.
//!
//! Objects are reference counted. A reference is counted when it is stored
//! into a data segment slot, a stack slot, or a managed array element
//! through the pointer opcodes; references held only in registers are not.
//! Newly allocated objects start at zero and are freed by [`ManagedPool::sweep`]
//! if nothing stores them.

use std::collections::BTreeMap;

use scom_common::{ObjectHandle, RuntimeValue};
use tracing::trace;

use crate::error::Fault;
use crate::memory::Region;

/// Largest byte size of a single allocation.
pub const MAX_OBJECT_SIZE: usize = 1 << 24;

/// Type tag reported for dynamic arrays.
pub const ARRAY_TYPE: &str = "Array";
/// Type tag reported for script-defined objects.
pub const USER_OBJECT_TYPE: &str = "UserObject";
/// Type tag reported for managed strings.
pub const STRING_TYPE: &str = "String";

/// A heap object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagedObject {
    /// Dynamic array. Elements of a managed array are object references.
    Array {
        elem_size: u32,
        managed: bool,
        data: Region,
    },
    /// Script-defined object with raw field storage.
    UserObject { data: Region },
    /// Immutable managed string.
    String(String),
    /// Host-owned object; `key` identifies it in the host's own tables.
    Host { type_name: String, key: u64 },
}

impl ManagedObject {
    pub fn type_name(&self) -> &str {
        match self {
            ManagedObject::Array { .. } => ARRAY_TYPE,
            ManagedObject::UserObject { .. } => USER_OBJECT_TYPE,
            ManagedObject::String(_) => STRING_TYPE,
            ManagedObject::Host { type_name, .. } => type_name,
        }
    }

    fn region(&self) -> Option<&Region> {
        match self {
            ManagedObject::Array { data, .. } | ManagedObject::UserObject { data } => Some(data),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    object: ManagedObject,
    refs: u32,
}

/// Owner of every heap object in a runtime.
#[derive(Debug, Clone, Default)]
pub struct ManagedPool {
    entries: BTreeMap<u32, Entry>,
    next: u32,
}

impl ManagedPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add an object with no references.
    pub fn alloc(&mut self, object: ManagedObject) -> ObjectHandle {
        loop {
            self.next = self.next.wrapping_add(1);
            if let Some(handle) = ObjectHandle::new(self.next) {
                if !self.entries.contains_key(&handle.get()) {
                    trace!(handle = handle.get(), kind = object.type_name(), "alloc");
                    self.entries.insert(handle.get(), Entry { object, refs: 0 });
                    return handle;
                }
            }
        }
    }

    pub fn alloc_string(&mut self, s: impl Into<String>) -> ObjectHandle {
        self.alloc(ManagedObject::String(s.into()))
    }

    /// Allocate a zeroed array of `count` elements.
    pub fn alloc_array(
        &mut self,
        count: i32,
        elem_size: i32,
        managed: bool,
    ) -> Result<ObjectHandle, Fault> {
        if elem_size <= 0 || (managed && elem_size != 4) {
            return Err(Fault::InvalidSize {
                size: elem_size as i64,
            });
        }
        let bytes = usize::try_from(count)
            .ok()
            .and_then(|n| n.checked_mul(elem_size as usize))
            .filter(|&b| b <= MAX_OBJECT_SIZE)
            .ok_or(Fault::InvalidSize { size: count as i64 })?;
        Ok(self.alloc(ManagedObject::Array {
            elem_size: elem_size as u32,
            managed,
            data: Region::zeroed(bytes),
        }))
    }

    /// Allocate a zeroed user object of `size` bytes.
    pub fn alloc_user(&mut self, size: i32) -> Result<ObjectHandle, Fault> {
        let bytes = usize::try_from(size)
            .ok()
            .filter(|&b| b <= MAX_OBJECT_SIZE)
            .ok_or(Fault::InvalidSize { size: size as i64 })?;
        Ok(self.alloc(ManagedObject::UserObject {
            data: Region::zeroed(bytes),
        }))
    }

    /// Register a host object under a type tag.
    pub fn alloc_host(&mut self, type_name: impl Into<String>, key: u64) -> ObjectHandle {
        self.alloc(ManagedObject::Host {
            type_name: type_name.into(),
            key,
        })
    }

    pub fn is_live(&self, handle: ObjectHandle) -> bool {
        self.entries.contains_key(&handle.get())
    }

    pub fn get(&self, handle: ObjectHandle) -> Result<&ManagedObject, Fault> {
        self.entries
            .get(&handle.get())
            .map(|e| &e.object)
            .ok_or(Fault::DeadObject(handle.get()))
    }

    pub fn get_mut(&mut self, handle: ObjectHandle) -> Result<&mut ManagedObject, Fault> {
        self.entries
            .get_mut(&handle.get())
            .map(|e| &mut e.object)
            .ok_or(Fault::DeadObject(handle.get()))
    }

    /// Type tag of a live object.
    pub fn type_name(&self, handle: ObjectHandle) -> Option<&str> {
        self.entries.get(&handle.get()).map(|e| e.object.type_name())
    }

    /// Contents of a managed string.
    pub fn string(&self, handle: ObjectHandle) -> Option<&str> {
        match self.get(handle) {
            Ok(ManagedObject::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Reference count of a live object.
    pub fn refs(&self, handle: ObjectHandle) -> Option<u32> {
        self.entries.get(&handle.get()).map(|e| e.refs)
    }

    /// Addressable storage of an array or user object.
    pub fn region(&self, handle: ObjectHandle) -> Result<&Region, Fault> {
        let object = self.get(handle)?;
        object.region().ok_or(Fault::NotAnAddress {
            found: "non-addressable object",
        })
    }

    pub fn region_mut(&mut self, handle: ObjectHandle) -> Result<&mut Region, Fault> {
        match self.get_mut(handle)? {
            ManagedObject::Array { data, .. } | ManagedObject::UserObject { data } => Ok(data),
            _ => Err(Fault::NotAnAddress {
                found: "non-addressable object",
            }),
        }
    }

    pub fn add_ref(&mut self, handle: ObjectHandle) -> Result<(), Fault> {
        let entry = self
            .entries
            .get_mut(&handle.get())
            .ok_or(Fault::DeadObject(handle.get()))?;
        entry.refs = entry.refs.saturating_add(1);
        Ok(())
    }

    /// Drop one reference; free the object when none remain.
    pub fn release(&mut self, handle: ObjectHandle) {
        let mut pending = vec![handle];
        while let Some(h) = pending.pop() {
            let Some(entry) = self.entries.get_mut(&h.get()) else {
                continue;
            };
            entry.refs = entry.refs.saturating_sub(1);
            if entry.refs == 0 {
                pending.extend(self.free(h));
            }
        }
    }

    /// Drop one reference without freeing; a later sweep collects it.
    pub fn release_no_dispose(&mut self, handle: ObjectHandle) {
        if let Some(entry) = self.entries.get_mut(&handle.get()) {
            entry.refs = entry.refs.saturating_sub(1);
        }
    }

    /// Free every object with no references. Returns how many were freed.
    pub fn sweep(&mut self) -> usize {
        let before = self.entries.len();
        loop {
            let dead: Vec<ObjectHandle> = self
                .entries
                .iter()
                .filter(|(_, e)| e.refs == 0)
                .filter_map(|(&h, _)| ObjectHandle::new(h))
                .collect();
            if dead.is_empty() {
                break;
            }
            for h in dead {
                if self.entries.contains_key(&h.get()) {
                    for child in self.free(h) {
                        self.release_no_dispose(child);
                    }
                }
            }
        }
        before - self.entries.len()
    }

    /// Remove an object, returning the references it held.
    fn free(&mut self, handle: ObjectHandle) -> Vec<ObjectHandle> {
        trace!(handle = handle.get(), "free");
        match self.entries.remove(&handle.get()) {
            Some(entry) => entry
                .object
                .region()
                .map(|r| r.objects.values().copied().collect())
                .unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Wrap a fresh string as a value.
    pub fn new_string_value(&mut self, s: impl Into<String>) -> RuntimeValue {
        RuntimeValue::Object {
            handle: self.alloc_string(s),
            offset: 0,
        }
    }
}
