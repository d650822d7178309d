//! Runtime limits and link policy.

use std::str::FromStr;

/// Default operand stack size, in 4-byte slots.
pub const DEFAULT_MAX_STACK_SLOTS: usize = 1024;
/// Default capacity of the external parameter stack.
pub const DEFAULT_MAX_EXTERNAL_ARGS: usize = 256;
/// Default limit on nested calls across all instances.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 128;
/// Default number of backward jumps allowed per top-level call.
pub const DEFAULT_MAX_LOOP_ITERATIONS: u32 = 150_000;

/// What to do with an import that nothing in the registry provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkPolicy {
    /// Refuse to create the instance.
    #[default]
    Strict,
    /// Create the instance; resolve again on first use and fault then.
    Lenient,
}

impl FromStr for LinkPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(LinkPolicy::Strict),
            "lenient" => Ok(LinkPolicy::Lenient),
            other => Err(format!("unknown link policy '{other}'")),
        }
    }
}

/// VM configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    /// Operand stack size per instance, in slots
    pub max_stack_slots: usize,

    /// External parameter stack size per instance
    pub max_external_args: usize,

    /// Maximum call depth (recursion limit)
    pub max_call_depth: usize,

    /// Backward jumps allowed per top-level call; 0 disables the guard
    pub max_loop_iterations: u32,

    pub link_policy: LinkPolicy,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_stack_slots: DEFAULT_MAX_STACK_SLOTS,
            max_external_args: DEFAULT_MAX_EXTERNAL_ARGS,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_loop_iterations: DEFAULT_MAX_LOOP_ITERATIONS,
            link_policy: LinkPolicy::Strict,
        }
    }
}

impl VmConfig {
    /// Create a new configuration with default limits
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_link_policy(mut self, policy: LinkPolicy) -> Self {
        self.link_policy = policy;
        self
    }

    pub fn with_max_loop_iterations(mut self, limit: u32) -> Self {
        self.max_loop_iterations = limit;
        self
    }
}
