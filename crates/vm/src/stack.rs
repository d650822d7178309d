//! The operand stack: 4-byte slots with per-slot validity.
//!
//! Each slot holds a whole [`RuntimeValue`], nothing, or a few bytes from
//! a narrow write. A narrow write keeps only the bytes it wrote; the rest
//! of the slot becomes unreadable, so a full-width read of that slot is a
//! stack corruption fault.
//!
//! Slots that received an object reference through a counted pointer
//! write remember the handle, so whoever drops those slots can release it.

use std::collections::BTreeMap;

use scom_common::{ObjectHandle, RuntimeValue};

use crate::error::Fault;

/// Size of one stack slot in bytes.
pub const SLOT_SIZE: usize = 4;

/// State of one stack slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Allocated but never written.
    Invalid,
    /// A complete value.
    Value(RuntimeValue),
    /// Bytes from narrow writes; `valid` has one bit per byte.
    Partial { bytes: [u8; SLOT_SIZE], valid: u8 },
}

/// A bounded stack of slots, addressed by byte offset from the bottom.
#[derive(Debug, Clone)]
pub struct OperandStack {
    slots: Vec<Slot>,
    limit: usize,
    /// Slot index to the reference counted on its behalf.
    counted: BTreeMap<usize, ObjectHandle>,
}

impl OperandStack {
    pub fn new(limit: usize) -> Self {
        Self {
            slots: Vec::new(),
            limit,
            counted: BTreeMap::new(),
        }
    }

    /// Number of slots in use.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Height in bytes; the value of the stack pointer.
    pub fn height(&self) -> usize {
        self.slots.len() * SLOT_SIZE
    }

    pub fn push(&mut self, value: RuntimeValue) -> Result<(), Fault> {
        if self.slots.len() >= self.limit {
            return Err(Fault::StackOverflow { limit: self.limit });
        }
        self.slots.push(Slot::Value(value));
        Ok(())
    }

    /// Pop the top slot, which must hold a complete value.
    pub fn pop(&mut self) -> Result<RuntimeValue, Fault> {
        let offset = self.height().saturating_sub(SLOT_SIZE);
        // A popped reference moves to a register and is no longer counted.
        self.counted.remove(&(offset / SLOT_SIZE));
        match self.slots.pop() {
            Some(Slot::Value(RuntimeValue::Invalid)) | Some(Slot::Invalid) => {
                Err(Fault::StackCorruption {
                    offset,
                    detail: "pop of uninitialized slot",
                })
            }
            Some(Slot::Value(v)) => Ok(v),
            Some(_) => Err(Fault::StackCorruption {
                offset,
                detail: "pop of a slot without a complete value",
            }),
            None => Err(Fault::StackUnderflow),
        }
    }

    /// Reserve `bytes` of uninitialized space, rounded up to whole slots.
    pub fn allocate(&mut self, bytes: usize) -> Result<(), Fault> {
        let count = bytes.div_ceil(SLOT_SIZE);
        if count > self.limit - self.slots.len() {
            return Err(Fault::StackOverflow { limit: self.limit });
        }
        self.slots.resize(self.slots.len() + count, Slot::Invalid);
        Ok(())
    }

    /// Release `bytes` of space, rounded up to whole slots. Returns the
    /// counted references the released slots held.
    pub fn free(&mut self, bytes: usize) -> Result<Vec<ObjectHandle>, Fault> {
        let count = bytes.div_ceil(SLOT_SIZE);
        if count > self.slots.len() {
            return Err(Fault::StackUnderflow);
        }
        Ok(self.truncate(self.slots.len() - count))
    }

    /// Drop slots above `len`, returning the counted references they held.
    pub fn truncate(&mut self, len: usize) -> Vec<ObjectHandle> {
        self.slots.truncate(len);
        self.counted.split_off(&len).into_values().collect()
    }

    /// Record that the slot at byte `offset` holds a counted reference to
    /// `handle`, or no longer holds one.
    pub fn set_counted(&mut self, offset: i32, handle: Option<ObjectHandle>) -> Result<(), Fault> {
        let (index, _) = self.locate(offset, SLOT_SIZE)?;
        match handle {
            Some(h) => self.counted.insert(index, h),
            None => self.counted.remove(&index),
        };
        Ok(())
    }

    /// The counted reference held by the slot at `index`, if any.
    pub fn counted(&self, index: usize) -> Option<ObjectHandle> {
        self.counted.get(&index).copied()
    }

    /// Raw slot state, for inspection.
    pub fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    fn locate(&self, offset: i32, size: usize) -> Result<(usize, usize), Fault> {
        let start = usize::try_from(offset).map_err(|_| self.out_of_bounds(offset))?;
        if start + size > self.height() {
            return Err(self.out_of_bounds(offset));
        }
        let (index, within) = (start / SLOT_SIZE, start % SLOT_SIZE);
        if within + size > SLOT_SIZE {
            return Err(Fault::StackCorruption {
                offset: start,
                detail: "access straddles two slots",
            });
        }
        Ok((index, within))
    }

    fn out_of_bounds(&self, offset: i32) -> Fault {
        Fault::OutOfBounds {
            region: "stack",
            offset: offset as i64,
            len: self.height(),
        }
    }

    /// Full-width read of the slot at byte `offset`.
    pub fn read_word(&self, offset: i32) -> Result<RuntimeValue, Fault> {
        let (index, _) = self.locate(offset, SLOT_SIZE)?;
        match self.slots[index] {
            Slot::Value(RuntimeValue::Invalid) | Slot::Invalid => Err(Fault::StackCorruption {
                offset: index * SLOT_SIZE,
                detail: "read of uninitialized slot",
            }),
            Slot::Partial { .. } => Err(Fault::StackCorruption {
                offset: index * SLOT_SIZE,
                detail: "full read of partially written slot",
            }),
            Slot::Value(v) => Ok(v),
        }
    }

    /// Full-width write of the slot at byte `offset`.
    pub fn write_word(&mut self, offset: i32, value: RuntimeValue) -> Result<(), Fault> {
        let (index, _) = self.locate(offset, SLOT_SIZE)?;
        self.slots[index] = Slot::Value(value);
        Ok(())
    }

    /// Read `size` bytes (1 or 2) as a little-endian unsigned value.
    pub fn read_narrow(&self, offset: i32, size: usize) -> Result<u32, Fault> {
        let (index, within) = self.locate(offset, size)?;
        let corrupt = |detail| Fault::StackCorruption {
            offset: index * SLOT_SIZE + within,
            detail,
        };
        let bytes = match self.slots[index] {
            Slot::Value(RuntimeValue::Invalid) | Slot::Invalid => {
                return Err(corrupt("read of uninitialized slot"))
            }
            Slot::Value(v) => v
                .scalar_bits()
                .ok_or(corrupt("narrow read of a pointer"))?
                .to_le_bytes(),
            Slot::Partial { bytes, valid } => {
                let wanted = span_mask(within, size);
                if valid & wanted != wanted {
                    return Err(corrupt("narrow read of unwritten bytes"));
                }
                bytes
            }
        };
        let mut raw = [0u8; SLOT_SIZE];
        raw[..size].copy_from_slice(&bytes[within..within + size]);
        Ok(u32::from_le_bytes(raw))
    }

    /// Write the low `size` bytes (1 or 2) of `bits`. Only those bytes of
    /// the slot remain valid afterwards.
    pub fn write_narrow(&mut self, offset: i32, size: usize, bits: u32) -> Result<(), Fault> {
        let (index, within) = self.locate(offset, size)?;
        let mut bytes = [0u8; SLOT_SIZE];
        bytes[within..within + size].copy_from_slice(&bits.to_le_bytes()[..size]);
        self.slots[index] = Slot::Partial {
            bytes,
            valid: span_mask(within, size),
        };
        Ok(())
    }
}

fn span_mask(within: usize, size: usize) -> u8 {
    (((1u16 << size) - 1) << within) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack() -> OperandStack {
        OperandStack::new(8)
    }

    #[test]
    fn push_pop() {
        let mut s = stack();
        s.push(RuntimeValue::Int(5)).unwrap();
        assert_eq!(s.height(), 4);
        assert_eq!(s.pop(), Ok(RuntimeValue::Int(5)));
        assert_eq!(s.pop(), Err(Fault::StackUnderflow));
    }

    #[test]
    fn overflow() {
        let mut s = OperandStack::new(1);
        s.push(RuntimeValue::Int(1)).unwrap();
        assert_eq!(
            s.push(RuntimeValue::Int(2)),
            Err(Fault::StackOverflow { limit: 1 })
        );
        assert!(s.allocate(1).is_err());
    }

    #[test]
    fn allocate_rounds_up() {
        let mut s = stack();
        s.allocate(5).unwrap();
        assert_eq!(s.len(), 2);
        s.free(1).unwrap();
        assert_eq!(s.len(), 1);
        assert_eq!(s.free(8), Err(Fault::StackUnderflow));
    }

    #[test]
    fn uninitialized_read_faults() {
        let mut s = stack();
        s.allocate(4).unwrap();
        assert!(matches!(
            s.read_word(0),
            Err(Fault::StackCorruption { offset: 0, .. })
        ));
    }

    #[test]
    fn narrow_write_invalidates_rest_of_slot() {
        let mut s = stack();
        s.push(RuntimeValue::Int(0x1234_5678)).unwrap();
        s.write_narrow(0, 1, 0xAB).unwrap();
        assert_eq!(s.read_narrow(0, 1), Ok(0xAB));
        assert!(matches!(s.read_narrow(1, 1), Err(Fault::StackCorruption { .. })));
        assert!(matches!(s.read_word(0), Err(Fault::StackCorruption { .. })));
    }

    #[test]
    fn narrow_read_of_int_extracts_bytes() {
        let mut s = stack();
        s.push(RuntimeValue::Int(0x1234_5678)).unwrap();
        assert_eq!(s.read_narrow(0, 1), Ok(0x78));
        assert_eq!(s.read_narrow(2, 2), Ok(0x1234));
    }

    #[test]
    fn straddling_access_faults() {
        let mut s = stack();
        s.push(RuntimeValue::Int(0)).unwrap();
        s.push(RuntimeValue::Int(0)).unwrap();
        assert!(matches!(s.read_narrow(3, 2), Err(Fault::StackCorruption { .. })));
        assert!(matches!(s.read_word(2), Err(Fault::StackCorruption { .. })));
    }

    #[test]
    fn out_of_bounds() {
        let mut s = stack();
        s.push(RuntimeValue::Int(0)).unwrap();
        assert!(matches!(s.read_word(4), Err(Fault::OutOfBounds { .. })));
        assert!(matches!(s.read_word(-4), Err(Fault::OutOfBounds { .. })));
    }

    #[test]
    fn pop_of_partial_slot_faults() {
        let mut s = stack();
        s.allocate(4).unwrap();
        s.write_narrow(0, 2, 7).unwrap();
        assert!(matches!(s.pop(), Err(Fault::StackCorruption { .. })));
    }

    #[test]
    fn invalid_value_reads_as_uninitialized() {
        let mut s = stack();
        s.push(RuntimeValue::Invalid).unwrap();
        assert_eq!(
            s.read_word(0),
            Err(Fault::StackCorruption {
                offset: 0,
                detail: "read of uninitialized slot"
            })
        );
        assert!(matches!(s.read_narrow(0, 1), Err(Fault::StackCorruption { .. })));
        assert_eq!(
            s.pop(),
            Err(Fault::StackCorruption {
                offset: 0,
                detail: "pop of uninitialized slot"
            })
        );
    }

    #[test]
    fn dropped_slots_hand_back_counted_references() {
        let a = ObjectHandle::new(1).unwrap();
        let b = ObjectHandle::new(2).unwrap();
        let mut s = stack();
        s.allocate(12).unwrap();
        s.set_counted(0, Some(a)).unwrap();
        s.set_counted(8, Some(b)).unwrap();
        assert_eq!(s.counted(2), Some(b));

        assert_eq!(s.free(4), Ok(vec![b]));
        assert_eq!(s.counted(2), None);
        s.set_counted(0, None).unwrap();
        assert_eq!(s.truncate(0), vec![]);

        s.allocate(4).unwrap();
        s.set_counted(0, Some(a)).unwrap();
        assert_eq!(s.truncate(0), vec![a]);
    }

    #[test]
    fn span_masks() {
        assert_eq!(span_mask(0, 1), 0b0001);
        assert_eq!(span_mask(2, 2), 0b1100);
        assert_eq!(span_mask(0, 4), 0b1111);
    }
}
