//! SCOM verifier: static checks over a loaded module's code.
//!
//! The verifier checks a [`BytecodeImage`] BEFORE execution. It collects
//! ALL errors (not just the first) and returns them. The interpreter
//! performs the same checks at run time, so verification is optional; it
//! reports problems in code that may never execute.
//!
//! # Usage
//!
//! ```
//! use scom_common::{reg, BytecodeImage, ImageParts, Opcode};
//! use scom_verifier::verify;
//!
//! let image = BytecodeImage::from_parts(ImageParts {
//!     code: vec![Opcode::LitToReg as i32, reg::AX as i32, 42, Opcode::Ret as i32],
//!     ..ImageParts::default()
//! })
//! .unwrap();
//!
//! assert!(verify(&image).is_ok());
//! ```
//!
//! # Passes
//!
//! 1. **Structural**: instruction boundaries, operand kinds, stack pointer writes
//! 2. **Limits**: module sizes, size and count literals
//! 3. **Control**: jump targets, falling off the end

pub mod control;
pub mod error;
pub mod limits;
pub mod structural;

pub use error::VerifyError;

use scom_common::BytecodeImage;

/// Verify a module's code.
///
/// Returns `Ok(())` if the module passes all checks, or
/// `Err(Vec<VerifyError>)` with all errors found.
///
/// If the code cannot be decoded to the end, the passes that depend on
/// instruction boundaries are skipped.
pub fn verify(image: &BytecodeImage) -> Result<(), Vec<VerifyError>> {
    // Pass 1: Structural (builds CodeMap)
    let (map, mut all_errors) = structural::check_structural(image);

    // Pass 2: Limits
    all_errors.extend(limits::check_limits(image, &map.instructions));

    if !map.fatal {
        // Pass 3: Control
        all_errors.extend(control::check_control(&map));
    }

    if all_errors.is_empty() {
        Ok(())
    } else {
        Err(all_errors)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use scom_common::ImageParts;

    proptest! {
        /// Arbitrary code never panics the verifier, and jump errors are
        /// only reported for code that decodes to the end.
        #[test]
        fn arbitrary_code_is_handled(code in prop::collection::vec(-4i32..80, 0..64)) {
            let image = BytecodeImage::from_parts(ImageParts {
                code,
                ..ImageParts::default()
            })
            .unwrap();
            if let Err(errors) = verify(&image) {
                prop_assert!(!errors.is_empty());
                let undecodable = errors
                    .iter()
                    .any(|e| matches!(e, VerifyError::Undecodable { .. }));
                let control = errors.iter().any(|e| {
                    matches!(
                        e,
                        VerifyError::BadJumpTarget { .. } | VerifyError::FallsOffEnd { .. }
                    )
                });
                prop_assert!(!(undecodable && control));
            }
        }
    }
}
