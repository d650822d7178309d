//! SCOM common types: runtime values, the instruction set, and the
//! compiled module format.
//!
//! - [`RuntimeValue`]: the tagged value held by registers and stack slots
//! - [`Opcode`]: the 73 opcodes with their argument kinds
//! - [`FixupKind`]: how a code word's payload is interpreted
//! - [`Instruction`]: one instruction decoded from the code stream
//! - [`BytecodeImage`]: a validated module, shared read-only by instances
//! - [`FormatError`] / [`DecodeError`]: load and decode failures

pub mod error;
pub mod fixup;
pub mod image;
pub mod instruction;
pub mod opcode;
pub mod value;

// Re-export commonly used types at the crate root.
pub use error::{DecodeError, FormatError};
pub use fixup::FixupKind;
pub use image::{BytecodeImage, Export, ExportKind, Fixup, ImageParts, Section};
pub use instruction::{Instruction, Operand};
pub use opcode::{reg, ArgKind, Opcode, NUM_REGISTERS};
pub use value::{InstanceId, NativeId, ObjectHandle, Pointer, RuntimeValue};
