//! Execution instances and their data segments.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use scom_common::{
    BytecodeImage, InstanceId, ObjectHandle, Pointer, RuntimeValue, NUM_REGISTERS,
};
use serde::{Deserialize, Serialize};

use crate::error::Fault;
use crate::memory::Region;
use crate::registry::ImportTarget;
use crate::stack::OperandStack;

/// How to initialize a new instance's data segment.
#[derive(Debug, Clone)]
pub enum CreateMode {
    /// Copy the module's global data template.
    Fresh,
    /// Share the data segment of a live instance of the same module.
    Fork(InstanceId),
    /// Adopt a previously captured snapshot.
    Restore(DataSnapshot),
}

/// Saved contents of a data segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSnapshot {
    /// Digest of the module the snapshot was taken from.
    pub digest: [u8; 32],
    pub globals: Vec<u8>,
    /// Object references stored in the data, by byte offset.
    pub objects: BTreeMap<u32, ObjectHandle>,
}

/// Mutable global data of a module, shared by forks.
#[derive(Debug)]
pub struct DataSegment {
    pub(crate) image: Rc<BytecodeImage>,
    pub(crate) region: Region,
}

impl DataSegment {
    pub fn new(image: Rc<BytecodeImage>) -> Self {
        let region = Region::from_bytes(image.global_data().to_vec());
        Self { image, region }
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    /// Start of the image pointer slot overlapping `[offset, offset + size)`.
    fn pointer_slot(&self, offset: i32, size: usize) -> Option<u32> {
        let start = u32::try_from(offset).ok()?;
        let end = start.checked_add(size as u32)?;
        let slots = self.image.global_fixups();
        let idx = slots.partition_point(|&s| s + 4 <= start);
        slots.get(idx).copied().filter(|&s| s < end)
    }

    /// Full-width read. Object references take precedence over bytes;
    /// image pointer slots read as pointers into `owner`'s data.
    pub fn read_word(&self, owner: InstanceId, offset: i32) -> Result<RuntimeValue, Fault> {
        self.region.span(offset, 4, "global data")?;
        if let Some(&handle) = self.region.objects.get(&(offset as u32)) {
            return Ok(RuntimeValue::Object { handle, offset: 0 });
        }
        match self.pointer_slot(offset, 4) {
            Some(slot) if slot == offset as u32 => {
                let stored = self.region.read_word(offset, "global data")?;
                let target = stored.as_int().unwrap_or_default();
                Ok(RuntimeValue::GlobalPtr(Pointer::new(owner, target)))
            }
            Some(slot) => Err(Fault::PointerSlotAccess { offset: slot }),
            None => self.region.read_word(offset, "global data"),
        }
    }

    pub fn read_narrow(&self, offset: i32, size: usize) -> Result<u32, Fault> {
        if let Some(slot) = self.pointer_slot(offset, size) {
            return Err(Fault::PointerSlotAccess { offset: slot });
        }
        self.region.read_narrow(offset, size, "global data")
    }

    /// Full-width write. `pointer` is the target offset when `value` is a
    /// pointer into this segment.
    pub fn write_word(
        &mut self,
        offset: i32,
        value: RuntimeValue,
        pointer: Option<i32>,
    ) -> Result<(), Fault> {
        self.region.span(offset, 4, "global data")?;
        match (self.pointer_slot(offset, 4), pointer) {
            (Some(slot), Some(target)) if slot == offset as u32 => {
                self.region
                    .write_scalar(offset, 4, target as u32, "global data")
            }
            (Some(slot), _) => Err(Fault::PointerSlotAccess { offset: slot }),
            (None, Some(_)) => Err(Fault::PointerToScalarMemory {
                found: value.kind_name(),
            }),
            (None, None) => {
                let bits = value.scalar_bits().ok_or(Fault::PointerToScalarMemory {
                    found: value.kind_name(),
                })?;
                self.region.write_scalar(offset, 4, bits as u32, "global data")
            }
        }
    }

    pub fn write_narrow(&mut self, offset: i32, size: usize, bits: u32) -> Result<(), Fault> {
        if let Some(slot) = self.pointer_slot(offset, size) {
            return Err(Fault::PointerSlotAccess { offset: slot });
        }
        self.region.write_scalar(offset, size, bits, "global data")
    }

    /// Replace the object reference at `offset`, returning the old one.
    pub fn swap_handle(
        &mut self,
        offset: i32,
        handle: Option<ObjectHandle>,
    ) -> Result<Option<ObjectHandle>, Fault> {
        if let Some(slot) = self.pointer_slot(offset, 4) {
            return Err(Fault::PointerSlotAccess { offset: slot });
        }
        self.region.swap_handle(offset, handle, "global data")
    }

    pub fn handle_at(&self, offset: i32) -> Result<Option<ObjectHandle>, Fault> {
        if let Some(slot) = self.pointer_slot(offset, 4) {
            return Err(Fault::PointerSlotAccess { offset: slot });
        }
        self.region.handle_at(offset, "global data")
    }
}

/// One active function invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Line number to restore on return.
    pub return_line: i32,
    /// Stack length (slots) right after the return address was pushed.
    pub height: usize,
    /// Code offset the function was entered at.
    pub func_start: usize,
    /// Compile-time base set by THISBASE; 0 when unset.
    pub this_base: i32,
    /// Set by LOOPCHECKOFF.
    pub loop_check_off: bool,
}

/// Kind of callee last seen at an external call site. Dispatch follows
/// the function register; this is a record of what each site called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Native,
    Script,
}

/// One running or suspended copy of a module.
#[derive(Debug)]
pub struct Instance {
    pub(crate) id: InstanceId,
    pub(crate) image: Rc<BytecodeImage>,
    pub(crate) data: Rc<RefCell<DataSegment>>,
    pub(crate) registers: [RuntimeValue; NUM_REGISTERS],
    pub(crate) stack: OperandStack,
    /// Staged external-call parameters.
    pub(crate) ext_stack: Vec<RuntimeValue>,
    /// Resolved import targets, parallel to the image's import table.
    pub(crate) imports: Vec<Option<ImportTarget>>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) call_sites: HashMap<usize, CallKind>,
    pub(crate) pc: usize,
    pub(crate) line: i32,
    /// Receiver recorded by CALLOBJ for the next external call.
    pub(crate) pending_receiver: Option<RuntimeValue>,
    /// Count set by NUMFUNCARGS for the next external call.
    pub(crate) arg_count: Option<usize>,
    /// Active invocations on this instance.
    pub(crate) running: u32,
}

impl Instance {
    pub(crate) fn new(
        id: InstanceId,
        image: Rc<BytecodeImage>,
        data: Rc<RefCell<DataSegment>>,
        imports: Vec<Option<ImportTarget>>,
        stack_slots: usize,
    ) -> Self {
        Self {
            id,
            image,
            data,
            registers: [RuntimeValue::Invalid; NUM_REGISTERS],
            stack: OperandStack::new(stack_slots),
            ext_stack: Vec::new(),
            imports,
            frames: Vec::new(),
            call_sites: HashMap::new(),
            pc: 0,
            line: 0,
            pending_receiver: None,
            arg_count: None,
            running: 0,
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn image(&self) -> &Rc<BytecodeImage> {
        &self.image
    }

    pub fn is_running(&self) -> bool {
        self.running > 0
    }

    pub fn stack(&self) -> &OperandStack {
        &self.stack
    }

    /// What the CALLEXT or CALLAS at `pc` last called.
    pub fn call_site(&self, pc: usize) -> Option<CallKind> {
        self.call_sites.get(&pc).copied()
    }

    /// Most recent LINENUM value.
    pub fn line(&self) -> i32 {
        self.line
    }

    /// True if this instance shares its data segment with another holder.
    pub fn shares_data(&self) -> bool {
        Rc::strong_count(&self.data) > 1
    }

    pub(crate) fn snapshot(&self) -> DataSnapshot {
        let data = self.data.borrow();
        DataSnapshot {
            digest: *self.image.digest(),
            globals: data.region.bytes.clone(),
            objects: data.region.objects.clone(),
        }
    }
}
