//! The runtime context: live instances, the import registry, registered
//! natives, and the managed object pool.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use scom_common::{BytecodeImage, ExportKind, InstanceId, Pointer, RuntimeValue};
use tracing::{debug, warn};

use crate::config::{LinkPolicy, VmConfig};
use crate::error::{Fault, LinkError, RuntimeError};
use crate::instance::{CreateMode, DataSegment, DataSnapshot, Instance};
use crate::memory::Region;
use crate::native::NativeRegistry;
use crate::pool::ManagedPool;
use crate::registry::{strip_suffix, ImportRegistry, ImportTarget};

/// Owner of everything a script can reach.
///
/// There is no ambient "current instance": every operation names the
/// instance it acts on, and pointer values carry their owner.
#[derive(Debug)]
pub struct Runtime {
    pub(crate) config: VmConfig,
    /// Indexed by instance id; ids are never reused.
    pub(crate) instances: Vec<Option<Instance>>,
    pub(crate) registry: ImportRegistry,
    pub(crate) natives: NativeRegistry,
    pub(crate) pool: ManagedPool,
    /// Instance whose exports are published, per module digest.
    publishers: HashMap<[u8; 32], InstanceId>,
    /// Nested calls currently active, across all instances.
    pub(crate) call_depth: usize,
    /// Backward jumps taken during the current top-level call.
    pub(crate) loop_count: u32,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(VmConfig::default())
    }
}

impl Runtime {
    pub fn new(config: VmConfig) -> Self {
        Self {
            config,
            instances: Vec::new(),
            registry: ImportRegistry::new(),
            natives: NativeRegistry::default(),
            pool: ManagedPool::new(),
            publishers: HashMap::new(),
            call_depth: 0,
            loop_count: 0,
        }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn registry(&self) -> &ImportRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &ManagedPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut ManagedPool {
        &mut self.pool
    }

    pub(crate) fn instance(&self, id: InstanceId) -> Result<&Instance, Fault> {
        self.instances
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(Fault::DeadInstance(id))
    }

    pub(crate) fn instance_mut(&mut self, id: InstanceId) -> Result<&mut Instance, Fault> {
        self.instances
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(Fault::DeadInstance(id))
    }

    /// A live instance, for inspection.
    pub fn get(&self, id: InstanceId) -> Option<&Instance> {
        self.instance(id).ok()
    }

    pub fn is_live(&self, id: InstanceId) -> bool {
        self.get(id).is_some()
    }

    /// Ids of all live instances, in creation order.
    pub fn live_instances(&self) -> Vec<InstanceId> {
        self.instances
            .iter()
            .flatten()
            .map(|inst| inst.id)
            .collect()
    }

    /// Create an instance with a fresh copy of the module's global data.
    pub fn instantiate(&mut self, image: Rc<BytecodeImage>) -> Result<InstanceId, LinkError> {
        self.create_instance(image, CreateMode::Fresh)
    }

    /// Create an instance sharing `source`'s data segment.
    pub fn fork(&mut self, source: InstanceId) -> Result<InstanceId, LinkError> {
        let image = self
            .get(source)
            .ok_or(LinkError::DeadInstance(source))?
            .image
            .clone();
        self.create_instance(image, CreateMode::Fork(source))
    }

    /// Create an instance whose data segment is a saved snapshot.
    pub fn restore(
        &mut self,
        image: Rc<BytecodeImage>,
        snapshot: DataSnapshot,
    ) -> Result<InstanceId, LinkError> {
        self.create_instance(image, CreateMode::Restore(snapshot))
    }

    pub fn create_instance(
        &mut self,
        image: Rc<BytecodeImage>,
        mode: CreateMode,
    ) -> Result<InstanceId, LinkError> {
        let id = InstanceId(self.instances.len() as u32);
        let (data, imports, forked) = match mode {
            CreateMode::Fresh => {
                let imports = self.resolve_imports(&image)?;
                let data = DataSegment::new(image.clone());
                (Rc::new(RefCell::new(data)), imports, false)
            }
            CreateMode::Fork(source) => {
                let sibling = self.get(source).ok_or(LinkError::DeadInstance(source))?;
                if sibling.image.digest() != image.digest() {
                    return Err(LinkError::ImageMismatch(source));
                }
                (sibling.data.clone(), sibling.imports.clone(), true)
            }
            CreateMode::Restore(snapshot) => {
                let imports = self.resolve_imports(&image)?;
                let data = self.adopt_snapshot(&image, snapshot)?;
                (Rc::new(RefCell::new(data)), imports, false)
            }
        };

        let instance = Instance::new(
            id,
            image.clone(),
            data,
            imports,
            self.config.max_stack_slots,
        );
        self.instances.push(Some(instance));
        debug!(
            instance = id.0,
            module = %image.short_digest(),
            forked,
            "instance created"
        );

        if !forked {
            let published = self
                .publishers
                .get(image.digest())
                .is_some_and(|&p| self.is_live(p));
            if !published {
                self.publish_exports(id, &image);
                self.publishers.insert(*image.digest(), id);
            }
        }
        Ok(id)
    }

    fn resolve_imports(
        &self,
        image: &BytecodeImage,
    ) -> Result<Vec<Option<ImportTarget>>, LinkError> {
        image
            .imports()
            .iter()
            .map(|name| match self.registry.resolve(name) {
                Some(target) => Ok(Some(target)),
                None if self.config.link_policy == LinkPolicy::Lenient => {
                    warn!(import = %name, "unresolved import; binding deferred to first use");
                    Ok(None)
                }
                None => Err(LinkError::UnresolvedImport { name: name.clone() }),
            })
            .collect()
    }

    fn publish_exports(&mut self, id: InstanceId, image: &BytecodeImage) {
        let mut count = 0;
        for export in image.exports() {
            let target = match export.kind {
                ExportKind::Function => ImportTarget::ScriptFunction {
                    instance: id,
                    address: export.address,
                },
                ExportKind::Data => {
                    ImportTarget::ScriptData(Pointer::new(id, export.address as i32))
                }
            };
            if self.registry.register(&export.name, target, Some(id)) {
                count += 1;
            }
            if let Some(alias) = strip_suffix(&export.name, '$') {
                if self.registry.register(alias, target, Some(id)) {
                    count += 1;
                }
            }
        }
        debug!(instance = id.0, count, "published exports");
    }

    /// Validate a snapshot against `image` and take references to its
    /// objects.
    fn adopt_snapshot(
        &mut self,
        image: &Rc<BytecodeImage>,
        snapshot: DataSnapshot,
    ) -> Result<DataSegment, LinkError> {
        if &snapshot.digest != image.digest() {
            return Err(LinkError::DigestMismatch);
        }
        let expected = image.global_data().len();
        if snapshot.globals.len() != expected {
            return Err(LinkError::DataLengthMismatch {
                expected,
                found: snapshot.globals.len(),
            });
        }

        let mut previous_end = 0u32;
        for (&offset, &handle) in &snapshot.objects {
            let end = offset.checked_add(4).unwrap_or(u32::MAX);
            let misplaced = offset < previous_end
                || end as usize > expected
                || image.global_fixup_covering(offset).is_some()
                || image.global_fixup_covering(end - 1).is_some()
                || snapshot.globals[offset as usize..end as usize]
                    .iter()
                    .any(|&b| b != 0);
            if misplaced {
                return Err(LinkError::SnapshotOffset { offset });
            }
            if !self.pool.is_live(handle) {
                return Err(LinkError::StaleObject {
                    offset,
                    handle: handle.get(),
                });
            }
            previous_end = end;
        }

        for &handle in snapshot.objects.values() {
            // Liveness was checked above.
            let _ = self.pool.add_ref(handle);
        }
        Ok(DataSegment {
            image: image.clone(),
            region: Region {
                bytes: snapshot.globals,
                objects: snapshot.objects,
            },
        })
    }

    /// Destroy an instance, withdrawing the registry entries it published.
    /// The last holder of a data segment releases its object references.
    pub fn destroy(&mut self, id: InstanceId) -> Result<(), LinkError> {
        let slot = self
            .instances
            .get_mut(id.0 as usize)
            .ok_or(LinkError::DeadInstance(id))?;
        match slot {
            None => return Err(LinkError::DeadInstance(id)),
            Some(inst) if inst.is_running() => return Err(LinkError::InstanceBusy(id)),
            Some(_) => {}
        }
        let Some(mut instance) = slot.take() else {
            return Err(LinkError::DeadInstance(id));
        };

        self.registry.remove_owned(id);
        self.publishers.retain(|_, owner| *owner != id);

        for handle in instance.stack.truncate(0) {
            self.pool.release(handle);
        }
        if Rc::strong_count(&instance.data) == 1 {
            let handles: Vec<_> = instance.data.borrow().region.objects.values().copied().collect();
            for handle in handles {
                self.pool.release(handle);
            }
        }
        debug!(instance = id.0, "instance destroyed");
        Ok(())
    }

    /// Capture an instance's data segment.
    pub fn snapshot(&self, id: InstanceId) -> Result<DataSnapshot, LinkError> {
        self.get(id)
            .map(Instance::snapshot)
            .ok_or(LinkError::DeadInstance(id))
    }

    /// True if the instance's module exports `name`, exactly or with a
    /// `$N` parameter-count suffix.
    pub fn exports_symbol(&self, id: InstanceId, name: &str) -> bool {
        self.get(id).is_some_and(|inst| {
            inst.image
                .exports()
                .iter()
                .any(|e| e.name == name || strip_suffix(&e.name, '$') == Some(name))
        })
    }

    /// Call an exported function from the host.
    ///
    /// Looks up a function export `name`, then `name$argc`. Arguments are
    /// passed first to last; the result is the callee's AX.
    pub fn call(
        &mut self,
        id: InstanceId,
        name: &str,
        args: &[RuntimeValue],
    ) -> Result<RuntimeValue, RuntimeError> {
        let inst = self.instance(id)?;
        let mangled = format!("{name}${}", args.len());
        let address = [name, mangled.as_str()]
            .into_iter()
            .find_map(|n| {
                inst.image
                    .export(n)
                    .filter(|e| e.kind == ExportKind::Function)
            })
            .map(|e| e.address as usize)
            .ok_or_else(|| Fault::NoSuchExport {
                name: name.to_string(),
            })?;
        if inst.is_running() {
            return Err(Fault::InstanceBusy(id).into());
        }
        if self.call_depth == 0 {
            self.loop_count = 0;
        }
        self.invoke(id, address, args, None)
    }

    /// Full-width read of an instance's global data.
    pub fn read_global(&self, id: InstanceId, offset: i32) -> Result<RuntimeValue, Fault> {
        self.instance(id)?;
        self.read_word(RuntimeValue::GlobalPtr(Pointer::new(id, offset)))
    }

    /// Full-width write of an instance's global data.
    pub fn write_global(
        &mut self,
        id: InstanceId,
        offset: i32,
        value: RuntimeValue,
    ) -> Result<(), Fault> {
        self.instance(id)?;
        self.write_word(RuntimeValue::GlobalPtr(Pointer::new(id, offset)), value)
    }

    /// Operand stack height of an instance, in bytes.
    pub fn stack_height(&self, id: InstanceId) -> Result<usize, Fault> {
        Ok(self.instance(id)?.stack.height())
    }
}
