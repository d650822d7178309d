//! Memory access by tagged address.
//!
//! Every load and store dispatches on the kind of the address value:
//! global pointers reach a data segment, stack pointers reach an operand
//! stack, object references reach heap object storage, and string
//! literals reach an image's string pool (read-only).

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use scom_common::{InstanceId, ObjectHandle, RuntimeValue};

use crate::error::Fault;
use crate::instance::DataSegment;
use crate::machine::Runtime;
use crate::pool::ManagedObject;

/// Byte storage plus the object references stored in it.
///
/// An entry in `objects` takes precedence over the bytes of its 4-byte
/// slot; those bytes are kept zeroed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Region {
    pub bytes: Vec<u8>,
    pub objects: BTreeMap<u32, ObjectHandle>,
}

impl Region {
    pub fn zeroed(len: usize) -> Self {
        Self::from_bytes(vec![0; len])
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            objects: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bounds-check `[offset, offset + size)` and return the start.
    pub fn span(&self, offset: i32, size: usize, region: &'static str) -> Result<usize, Fault> {
        let out = || Fault::OutOfBounds {
            region,
            offset: offset as i64,
            len: self.bytes.len(),
        };
        let start = usize::try_from(offset).map_err(|_| out())?;
        if start + size > self.bytes.len() {
            return Err(out());
        }
        Ok(start)
    }

    /// An object slot overlapping `[start, start + size)` other than one
    /// starting exactly at `start`.
    fn overlapping_object(&self, start: usize, size: usize) -> Option<u32> {
        let lo = start.saturating_sub(3) as u32;
        let hi = (start + size) as u32;
        self.objects
            .range(lo..hi)
            .map(|(&k, _)| k)
            .find(|&k| k as usize + 4 > start)
    }

    pub fn read_word(&self, offset: i32, region: &'static str) -> Result<RuntimeValue, Fault> {
        let start = self.span(offset, 4, region)?;
        if let Some(&handle) = self.objects.get(&(start as u32)) {
            return Ok(RuntimeValue::Object { handle, offset: 0 });
        }
        if let Some(slot) = self.overlapping_object(start, 4) {
            return Err(Fault::PointerSlotAccess { offset: slot });
        }
        let b = &self.bytes[start..start + 4];
        Ok(RuntimeValue::Int(i32::from_le_bytes([b[0], b[1], b[2], b[3]])))
    }

    pub fn read_narrow(&self, offset: i32, size: usize, region: &'static str) -> Result<u32, Fault> {
        let start = self.span(offset, size, region)?;
        if let Some(slot) = self.overlapping_object(start, size) {
            return Err(Fault::PointerSlotAccess { offset: slot });
        }
        let mut raw = [0u8; 4];
        raw[..size].copy_from_slice(&self.bytes[start..start + size]);
        Ok(u32::from_le_bytes(raw))
    }

    pub fn write_scalar(
        &mut self,
        offset: i32,
        size: usize,
        bits: u32,
        region: &'static str,
    ) -> Result<(), Fault> {
        let start = self.span(offset, size, region)?;
        if let Some(slot) = self.overlapping_object(start, size) {
            return Err(Fault::PointerSlotAccess { offset: slot });
        }
        self.bytes[start..start + size].copy_from_slice(&bits.to_le_bytes()[..size]);
        Ok(())
    }

    /// The object reference in the slot at `offset`. A zeroed slot is null.
    pub fn handle_at(&self, offset: i32, region: &'static str) -> Result<Option<ObjectHandle>, Fault> {
        let start = self.span(offset, 4, region)?;
        if let Some(&handle) = self.objects.get(&(start as u32)) {
            return Ok(Some(handle));
        }
        if let Some(slot) = self.overlapping_object(start, 4) {
            return Err(Fault::PointerSlotAccess { offset: slot });
        }
        if self.bytes[start..start + 4].iter().any(|&b| b != 0) {
            return Err(Fault::NotAnObject {
                offset: offset as i64,
            });
        }
        Ok(None)
    }

    /// Store an object reference (or null), returning the previous one.
    pub fn swap_handle(
        &mut self,
        offset: i32,
        handle: Option<ObjectHandle>,
        region: &'static str,
    ) -> Result<Option<ObjectHandle>, Fault> {
        let old = self.handle_at(offset, region)?;
        let start = offset as u32;
        match handle {
            Some(h) => self.objects.insert(start, h),
            None => self.objects.remove(&start),
        };
        Ok(old)
    }

    /// Bytes from `offset` up to the next NUL.
    pub fn c_string(&self, offset: i32, region: &'static str) -> Result<&[u8], Fault> {
        let start = self.span(offset, 0, region)?;
        let tail = &self.bytes[start..];
        let end = tail.iter().position(|&b| b == 0).ok_or(Fault::OutOfBounds {
            region,
            offset: self.bytes.len() as i64,
            len: self.bytes.len(),
        })?;
        Ok(&tail[..end])
    }
}

/// Where an address points.
enum Target {
    Global {
        owner: InstanceId,
        data: Rc<RefCell<DataSegment>>,
        offset: i32,
    },
    Stack {
        instance: InstanceId,
        offset: i32,
    },
    Object {
        handle: ObjectHandle,
        offset: i32,
    },
    StringLit {
        instance: InstanceId,
        offset: i32,
    },
}

impl Runtime {
    fn target(&self, addr: RuntimeValue) -> Result<Target, Fault> {
        match addr {
            RuntimeValue::GlobalPtr(p) => Ok(Target::Global {
                owner: p.instance,
                data: self.instance(p.instance)?.data.clone(),
                offset: p.offset,
            }),
            RuntimeValue::StackPtr(p) => {
                self.instance(p.instance)?;
                Ok(Target::Stack {
                    instance: p.instance,
                    offset: p.offset,
                })
            }
            RuntimeValue::Object { handle, offset } => Ok(Target::Object { handle, offset }),
            RuntimeValue::StringLit(p) => {
                self.instance(p.instance)?;
                Ok(Target::StringLit {
                    instance: p.instance,
                    offset: p.offset,
                })
            }
            RuntimeValue::Int(0) => Err(Fault::NullPointer),
            other => Err(Fault::NotAnAddress {
                found: other.kind_name(),
            }),
        }
    }

    fn string_pool_span(&self, instance: InstanceId, offset: i32, size: usize) -> Result<&[u8], Fault> {
        let strings = self.instance(instance)?.image.strings();
        let out = || Fault::OutOfBounds {
            region: "string pool",
            offset: offset as i64,
            len: strings.len(),
        };
        let start = usize::try_from(offset).map_err(|_| out())?;
        strings.get(start..start + size).ok_or_else(out)
    }

    /// Full-width load.
    pub(crate) fn read_word(&self, addr: RuntimeValue) -> Result<RuntimeValue, Fault> {
        match self.target(addr)? {
            Target::Global {
                owner,
                data,
                offset,
            } => {
                let seg = data.borrow();
                seg.read_word(owner, offset)
            }
            Target::Stack { instance, offset } => self.instance(instance)?.stack.read_word(offset),
            Target::Object { handle, offset } => self.pool.region(handle)?.read_word(offset, "object"),
            Target::StringLit { instance, offset } => {
                let b = self.string_pool_span(instance, offset, 4)?;
                Ok(RuntimeValue::Int(i32::from_le_bytes([b[0], b[1], b[2], b[3]])))
            }
        }
    }

    /// Load `size` (1 or 2) bytes, zero-extended.
    pub(crate) fn read_narrow(&self, addr: RuntimeValue, size: usize) -> Result<u32, Fault> {
        match self.target(addr)? {
            Target::Global { data, offset, .. } => {
                let seg = data.borrow();
                seg.read_narrow(offset, size)
            }
            Target::Stack { instance, offset } => {
                self.instance(instance)?.stack.read_narrow(offset, size)
            }
            Target::Object { handle, offset } => {
                self.pool.region(handle)?.read_narrow(offset, size, "object")
            }
            Target::StringLit { instance, offset } => {
                let b = self.string_pool_span(instance, offset, size)?;
                let mut raw = [0u8; 4];
                raw[..size].copy_from_slice(b);
                Ok(u32::from_le_bytes(raw))
            }
        }
    }

    /// Full-width store. Stack slots hold any value; data segments and
    /// objects hold scalars, plus pointers in the image's pointer slots.
    pub(crate) fn write_word(&mut self, addr: RuntimeValue, value: RuntimeValue) -> Result<(), Fault> {
        match self.target(addr)? {
            Target::Global { data, offset, .. } => {
                let pointer = match value {
                    RuntimeValue::GlobalPtr(q) => {
                        if !Rc::ptr_eq(&self.instance(q.instance)?.data, &data) {
                            return Err(Fault::ForeignPointer);
                        }
                        Some(q.offset)
                    }
                    _ => None,
                };
                let mut seg = data.borrow_mut();
                seg.write_word(offset, value, pointer)
            }
            Target::Stack { instance, offset } => {
                self.instance_mut(instance)?.stack.write_word(offset, value)
            }
            Target::Object { handle, offset } => {
                let bits = value.scalar_bits().ok_or(Fault::PointerToScalarMemory {
                    found: value.kind_name(),
                })?;
                self.pool
                    .region_mut(handle)?
                    .write_scalar(offset, 4, bits as u32, "object")
            }
            Target::StringLit { .. } => Err(Fault::ReadOnly),
        }
    }

    /// Store the low `size` (1 or 2) bytes of `bits`.
    pub(crate) fn write_narrow(&mut self, addr: RuntimeValue, size: usize, bits: u32) -> Result<(), Fault> {
        match self.target(addr)? {
            Target::Global { data, offset, .. } => {
                let mut seg = data.borrow_mut();
                seg.write_narrow(offset, size, bits)
            }
            Target::Stack { instance, offset } => self
                .instance_mut(instance)?
                .stack
                .write_narrow(offset, size, bits),
            Target::Object { handle, offset } => self
                .pool
                .region_mut(handle)?
                .write_scalar(offset, size, bits, "object"),
            Target::StringLit { .. } => Err(Fault::ReadOnly),
        }
    }

    /// The object reference stored at `addr`, or `None` for null.
    pub(crate) fn read_handle(&self, addr: RuntimeValue) -> Result<Option<ObjectHandle>, Fault> {
        match self.target(addr)? {
            Target::Global { data, offset, .. } => {
                let seg = data.borrow();
                seg.handle_at(offset)
            }
            Target::Stack { instance, offset } => {
                match self.instance(instance)?.stack.read_word(offset)? {
                    RuntimeValue::Object { handle, .. } => Ok(Some(handle)),
                    RuntimeValue::Int(0) => Ok(None),
                    _ => Err(Fault::NotAnObject {
                        offset: offset as i64,
                    }),
                }
            }
            Target::Object { handle, offset } => self.pool.region(handle)?.handle_at(offset, "object"),
            Target::StringLit { offset, .. } => Err(Fault::NotAnObject {
                offset: offset as i64,
            }),
        }
    }

    /// Replace the object reference at `addr`, returning the old one.
    /// Reference counts are not touched.
    fn swap_handle(
        &mut self,
        addr: RuntimeValue,
        handle: Option<ObjectHandle>,
    ) -> Result<Option<ObjectHandle>, Fault> {
        match self.target(addr)? {
            Target::Global { data, offset, .. } => {
                let mut seg = data.borrow_mut();
                seg.swap_handle(offset, handle)
            }
            Target::Stack { instance, offset } => {
                let stack = &mut self.instance_mut(instance)?.stack;
                let old = match stack.read_word(offset) {
                    Ok(RuntimeValue::Object { handle, .. }) => Some(handle),
                    Ok(RuntimeValue::Int(0)) => None,
                    // Freshly allocated locals have never been written.
                    Err(Fault::StackCorruption { .. }) => None,
                    Ok(_) => {
                        return Err(Fault::NotAnObject {
                            offset: offset as i64,
                        })
                    }
                    Err(e) => return Err(e),
                };
                let value = match handle {
                    Some(handle) => RuntimeValue::Object { handle, offset: 0 },
                    None => RuntimeValue::NULL,
                };
                stack.write_word(offset, value)?;
                stack.set_counted(offset, handle)?;
                Ok(old)
            }
            Target::Object { handle: owner, offset } => {
                if let ManagedObject::Array { managed: false, .. } = self.pool.get(owner)? {
                    return Err(Fault::NotAnObject {
                        offset: offset as i64,
                    });
                }
                self.pool
                    .region_mut(owner)?
                    .swap_handle(offset, handle, "object")
            }
            Target::StringLit { .. } => Err(Fault::ReadOnly),
        }
    }

    /// MEMWRITEPTR (`release_old`) and MEMINITPTR: store an object
    /// reference and count it.
    pub(crate) fn store_handle(
        &mut self,
        addr: RuntimeValue,
        value: RuntimeValue,
        release_old: bool,
    ) -> Result<(), Fault> {
        let handle = match value {
            RuntimeValue::Object { handle, .. } => {
                self.pool.get(handle)?;
                Some(handle)
            }
            RuntimeValue::Int(0) => None,
            other => {
                return Err(Fault::KindMismatch {
                    param: 1,
                    expected: "object or null",
                    found: other.kind_name(),
                })
            }
        };
        let old = self.swap_handle(addr, handle)?;
        if let Some(h) = handle {
            self.pool.add_ref(h)?;
        }
        if release_old {
            if let Some(o) = old {
                self.pool.release(o);
            }
        }
        Ok(())
    }

    /// MEMZEROPTR (`dispose`) and MEMZEROPTRND: clear an object reference.
    pub(crate) fn clear_handle(&mut self, addr: RuntimeValue, dispose: bool) -> Result<(), Fault> {
        if let Some(old) = self.swap_handle(addr, None)? {
            if dispose {
                self.pool.release(old);
            } else {
                self.pool.release_no_dispose(old);
            }
        }
        Ok(())
    }

    /// Zero `len` bytes starting at `addr`.
    pub(crate) fn zero_memory(&mut self, addr: RuntimeValue, len: i32) -> Result<(), Fault> {
        if len < 0 {
            return Err(Fault::InvalidSize { size: len as i64 });
        }
        self.target(addr)?;
        let mut done = 0;
        while done < len {
            let at = addr.offset_by(done).ok_or(Fault::PointerOverflow)?;
            let aligned = offset_of(at) % 4 == 0;
            if aligned && len - done >= 4 {
                self.write_word(at, RuntimeValue::Int(0))?;
                done += 4;
            } else {
                self.write_narrow(at, 1, 0)?;
                done += 1;
            }
        }
        Ok(())
    }

    /// The NUL-terminated string at `addr`; `None` for null.
    pub(crate) fn read_string(&self, addr: RuntimeValue) -> Result<Option<String>, Fault> {
        if addr.is_null() {
            return Ok(None);
        }
        let text = match self.target(addr)? {
            Target::StringLit { instance, offset } => {
                let image = &self.instance(instance)?.image;
                let bytes = usize::try_from(offset)
                    .ok()
                    .and_then(|o| image.string_at(o))
                    .ok_or(Fault::OutOfBounds {
                        region: "string pool",
                        offset: offset as i64,
                        len: image.strings().len(),
                    })?;
                String::from_utf8_lossy(bytes).into_owned()
            }
            Target::Object { handle, offset } => match self.pool.get(handle)? {
                ManagedObject::String(s) => usize::try_from(offset)
                    .ok()
                    .and_then(|o| s.get(o..))
                    .ok_or(Fault::OutOfBounds {
                        region: "string",
                        offset: offset as i64,
                        len: s.len(),
                    })?
                    .to_string(),
                _ => {
                    let region = self.pool.region(handle)?;
                    String::from_utf8_lossy(region.c_string(offset, "object")?).into_owned()
                }
            },
            Target::Global { data, offset, .. } => {
                let seg = data.borrow();
                let bytes = seg.region.c_string(offset, "global data")?;
                String::from_utf8_lossy(bytes).into_owned()
            }
            Target::Stack { instance, offset } => {
                let stack = &self.instance(instance)?.stack;
                let mut bytes = Vec::new();
                let mut at = offset;
                loop {
                    let b = stack.read_narrow(at, 1)? as u8;
                    if b == 0 {
                        break;
                    }
                    bytes.push(b);
                    at = at.checked_add(1).ok_or(Fault::PointerOverflow)?;
                }
                String::from_utf8_lossy(&bytes).into_owned()
            }
        };
        Ok(Some(text))
    }
}

fn offset_of(addr: RuntimeValue) -> i32 {
    match addr {
        RuntimeValue::StackPtr(p) | RuntimeValue::GlobalPtr(p) | RuntimeValue::StringLit(p) => p.offset,
        RuntimeValue::Object { offset, .. } => offset,
        _ => 0,
    }
}
