//! Dynamic function calling
//!
//! Drives a [`CallFrame`] from a [`CallPlan`] and runs the transfer of control
//! inside the fault trap. Which frame is used depends on the target: a
//! hand-built stack on 32-bit x86, libffi everywhere else.

use core::ffi::c_void;

use super::abi::{CallFrame, Convention};
use super::trap::{guarded, Guarded};
use super::types::{CallPlan, InvocationResult};

#[cfg(target_arch = "x86")]
type PlatformFrame = super::frame::StackFrame;

#[cfg(not(target_arch = "x86"))]
type PlatformFrame = super::ffi_frame::FfiFrame;

/// Function call descriptor
#[derive(Debug, Clone, Copy)]
pub struct FunctionCall {
    ptr: *const c_void,
}

impl FunctionCall {
    #[inline]
    pub fn new(ptr: *const c_void) -> Self {
        Self { ptr }
    }

    #[inline]
    pub fn ptr(&self) -> *const c_void {
        self.ptr
    }

    /// Call the function with the plan's arguments
    ///
    /// By-address payloads in `plan` may be rewritten by the callee.
    ///
    /// # Safety
    /// Caller must ensure:
    /// - Function pointer is non-null and executable
    /// - The plan's argument list matches what the callee reads, or the
    ///   callee is trusted to fault rather than corrupt memory
    pub unsafe fn invoke(&self, plan: &mut CallPlan) -> InvocationResult {
        let frame = PlatformFrame::with_capacity(plan.args.len());
        self.invoke_with(frame, plan)
    }

    /// Call through a specific frame implementation
    ///
    /// # Safety
    /// See [`FunctionCall::invoke`]
    pub unsafe fn invoke_with<F: CallFrame>(&self, mut frame: F, plan: &mut CallPlan) -> InvocationResult {
        let convention: Convention = plan.convention;
        let ret = plan.return_descriptor;

        for desc in plan.args.iter_mut().rev() {
            if desc.by_address {
                frame.push_address_of(desc);
            } else {
                frame.push_value(desc);
            }
        }

        let mut hidden_return = [0u64; 2];
        if ret.kind.returns_through_memory() {
            frame.push_hidden_return(hidden_return.as_mut_ptr() as *mut c_void);
        }

        let reserved = frame.reserved_bytes();
        let target = self.ptr;
        let result = match guarded(move || frame.invoke(target, convention, &ret)) {
            Guarded::Completed(result) => result,
            Guarded::Faulted(code) => InvocationResult {
                fault_code: code,
                ..InvocationResult::default()
            },
        };
        InvocationResult {
            scratch_bytes: reserved,
            ..result
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::interop::types::{ArgDescriptor, ArgKind};

    type Log = Rc<RefCell<Vec<(&'static str, i64)>>>;

    /// Frame that records the order it is driven in
    struct RecordingFrame {
        log: Log,
    }

    impl CallFrame for RecordingFrame {
        fn push_value(&mut self, desc: &ArgDescriptor) {
            self.log.borrow_mut().push(("value", desc.read_integer()));
        }

        fn push_address_of(&mut self, desc: &mut ArgDescriptor) {
            self.log.borrow_mut().push(("address", desc.read_integer()));
        }

        fn push_hidden_return(&mut self, _buffer: *mut c_void) {
            self.log.borrow_mut().push(("hidden", 0));
        }

        fn reserved_bytes(&self) -> usize {
            self.log.borrow().len() * 4
        }

        unsafe fn invoke(
            self,
            _target: *const c_void,
            convention: Convention,
            _ret: &ArgDescriptor,
        ) -> InvocationResult {
            InvocationResult {
                int_bits: self.log.borrow().len() as u64,
                stack_delta: if convention.measures_stack() { 4 } else { 0 },
                ..InvocationResult::default()
            }
        }
    }

    fn plan_of(values: &[(i64, bool)], convention: Convention) -> CallPlan {
        let mut plan = CallPlan::new(convention, ArgDescriptor::default_return());
        for &(value, by_address) in values {
            let mut desc = ArgDescriptor::new(ArgKind::Int32);
            desc.store_integer(value);
            desc.by_address = by_address;
            plan.push(desc, None);
        }
        plan
    }

    #[test]
    fn test_arguments_are_pushed_right_to_left() {
        let mut plan = plan_of(&[(1, false), (2, true), (3, false)], Convention::StandardCall);
        let log = Log::default();
        let frame = RecordingFrame { log: log.clone() };

        let result = unsafe { FunctionCall::new(core::ptr::null()).invoke_with(frame, &mut plan) };

        assert_eq!(result.int_bits, 3);
        assert_eq!(result.scratch_bytes, 12);
        assert!(!result.faulted());
        assert_eq!(
            *log.borrow(),
            vec![("value", 3), ("address", 2), ("value", 1)]
        );
    }

    #[test]
    fn test_convention_reaches_the_frame() {
        let mut plan = plan_of(&[(1, false)], Convention::CCall);
        let frame = RecordingFrame { log: Log::default() };
        let result = unsafe { FunctionCall::new(core::ptr::null()).invoke_with(frame, &mut plan) };
        assert_eq!(result.stack_delta, 0);

        let mut plan = plan_of(&[(1, false)], Convention::StandardCall);
        let frame = RecordingFrame { log: Log::default() };
        let result = unsafe { FunctionCall::new(core::ptr::null()).invoke_with(frame, &mut plan) };
        assert_eq!(result.stack_delta, 4);
    }
}
