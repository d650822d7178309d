//! SCOM virtual machine: executes compiled adventure-game script modules.
//!
//! The VM is a register machine with:
//! - Eight registers holding tagged [`RuntimeValue`]s
//! - A per-instance operand stack of 4-byte slots with per-slot validity
//! - A staging stack for external (native or cross-instance) calls
//! - A reference-counted pool of heap objects
//!
//! A [`Runtime`] owns every instance, the import registry that links
//! modules together, and the registered native functions.
//!
//! # Usage
//!
//! ```
//! use std::rc::Rc;
//! use scom_common::{reg, BytecodeImage, Export, ImageParts, Opcode, RuntimeValue};
//! use scom_vm::Runtime;
//!
//! let image = BytecodeImage::from_parts(ImageParts {
//!     code: vec![Opcode::LitToReg as i32, reg::AX as i32, 42, Opcode::Ret as i32],
//!     exports: vec![Export::function("Answer", 0)],
//!     ..ImageParts::default()
//! })
//! .unwrap();
//!
//! let mut runtime = Runtime::default();
//! let id = runtime.instantiate(Rc::new(image)).unwrap();
//! assert_eq!(runtime.call(id, "Answer", &[]).unwrap(), RuntimeValue::Int(42));
//! ```

pub mod config;
pub mod error;
pub mod execute;
pub mod instance;
pub mod machine;
pub mod memory;
pub mod native;
pub mod pool;
pub mod registry;
pub mod stack;

pub use config::{LinkPolicy, VmConfig};
pub use error::{ArithmeticError, Fault, FaultContext, LinkError, NativeCallError, RuntimeError};
pub use instance::{CallKind, CreateMode, DataSnapshot, Instance};
pub use machine::Runtime;
pub use native::{NativeArg, NativeContext, Signature};
pub use pool::{ManagedObject, ManagedPool};
pub use registry::{ImportRegistry, ImportTarget};

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use scom_common::{reg, BytecodeImage, Export, ImageParts, Opcode, RuntimeValue};
    use std::rc::Rc;

    fn answer(word: i32) -> Rc<BytecodeImage> {
        Rc::new(
            BytecodeImage::from_parts(ImageParts {
                code: vec![
                    Opcode::LitToReg as i32,
                    reg::AX as i32,
                    word,
                    Opcode::Ret as i32,
                ],
                exports: vec![Export::function("f", 0)],
                ..ImageParts::default()
            })
            .unwrap(),
        )
    }

    proptest! {
        /// Code words without a fixup are plain integers, never pointers.
        #[test]
        fn unfixed_words_are_literals(word in any::<i32>()) {
            let mut rt = Runtime::default();
            let id = rt.instantiate(answer(word)).unwrap();
            let value = rt.call(id, "f", &[]).unwrap();
            prop_assert_eq!(value, RuntimeValue::Int(word));
            prop_assert!(!value.is_pointer());
            prop_assert_eq!(rt.stack_height(id).unwrap(), 0);
        }

        /// Random code either runs or faults; it never panics and always
        /// leaves the instance callable.
        #[test]
        fn random_code_never_panics(code in prop::collection::vec(0i32..80, 1..40)) {
            let image = BytecodeImage::from_parts(ImageParts {
                global_data: vec![0; 16],
                code,
                exports: vec![Export::function("f", 0)],
                ..ImageParts::default()
            });
            if let Ok(image) = image {
                let mut rt = Runtime::new(VmConfig::new().with_max_loop_iterations(100));
                let id = rt.instantiate(Rc::new(image)).unwrap();
                let _ = rt.call(id, "f", &[]);
                prop_assert_eq!(rt.stack_height(id).unwrap(), 0);
                prop_assert!(!rt.get(id).unwrap().is_running());
            }
        }
    }
}
