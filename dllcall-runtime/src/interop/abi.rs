//! ABI (Application Binary Interface) handling
//!
//! Calling conventions and the call-frame capability each target implements.

use core::ffi::c_void;

use super::types::{ArgDescriptor, InvocationResult};

/// Calling convention specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Convention {
    /// Callee pops its own arguments (`__stdcall`)
    #[default]
    StandardCall,
    /// Caller pops the arguments (`__cdecl`)
    CCall,
}

impl Convention {
    /// Whether the callee removes the arguments it was passed
    #[inline]
    pub const fn callee_cleans(self) -> bool {
        matches!(self, Self::StandardCall)
    }

    /// Whether a post-call stack delta says anything about the signature
    #[inline]
    pub const fn measures_stack(self) -> bool {
        self.callee_cleans()
    }
}

/// A native call frame under construction
///
/// Arguments are pushed last-to-first, the order a compiler pushes them.
/// Implementations decide whether that means hand-written stack words or a
/// trampoline's argument vector.
pub trait CallFrame {
    /// Pass the descriptor's payload by value
    fn push_value(&mut self, desc: &ArgDescriptor);

    /// Pass the address of the descriptor's payload slot
    ///
    /// The callee may write through it; the slot must stay put until `invoke`
    /// returns.
    fn push_address_of(&mut self, desc: &mut ArgDescriptor);

    /// Pass the hidden result-buffer pointer for memory-returned values
    fn push_hidden_return(&mut self, buffer: *mut c_void);

    /// Bytes of argument storage currently held by the frame
    fn reserved_bytes(&self) -> usize;

    /// Transfer control to `target`
    ///
    /// # Safety
    /// - `target` must be callable with the pushed arguments
    /// - every descriptor pushed must outlive this call
    unsafe fn invoke(
        self,
        target: *const c_void,
        convention: Convention,
        ret: &ArgDescriptor,
    ) -> InvocationResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convention_cleanup() {
        assert!(Convention::StandardCall.callee_cleans());
        assert!(!Convention::CCall.callee_cleans());
        assert!(!Convention::CCall.measures_stack());
        assert_eq!(Convention::default(), Convention::StandardCall);
    }
}
