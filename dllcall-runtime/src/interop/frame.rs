//! Hand-built 32-bit stack frames
//!
//! Arguments become 4-byte words pushed last-to-first. An 8-byte value pushes
//! its high word before its low word, so once the push order is reversed into
//! memory order each value reads back little-endian.
//!
//! On x86 a single `asm!` block reserves a 16-byte aligned region, copies the
//! words in, calls the target, then measures where the callee left `esp`
//! before snapping it back. The word layout itself is plain data and is tested
//! on every target.

use super::types::ArgDescriptor;

/// Argument words for one 32-bit call
#[derive(Debug, Default)]
pub struct StackFrame {
    /// Words in push order (last argument first)
    pushed: Vec<u32>,
}

impl StackFrame {
    /// Frame for `arg_count` arguments, sized for the worst case of every
    /// argument taking two words plus a hidden return pointer
    pub fn with_capacity(arg_count: usize) -> Self {
        Self {
            pushed: Vec::with_capacity(arg_count * 2 + 1),
        }
    }

    /// Push the words of a by-value payload
    pub fn push_payload(&mut self, desc: &ArgDescriptor) {
        let bits = desc.payload.bits();
        // Sub-word integers sit right-justified in a full slot
        for word in (0..desc.kind.stack_words()).rev() {
            self.pushed.push((bits >> (32 * word)) as u32);
        }
    }

    /// Push one address-sized word
    pub fn push_address(&mut self, address: usize) {
        self.pushed.push(address as u32);
    }

    /// Words in memory order, lowest address first
    pub fn layout(&self) -> Vec<u32> {
        self.pushed.iter().rev().copied().collect()
    }

    /// Bytes the callee should pop under the standard convention
    pub fn argument_bytes(&self) -> usize {
        self.pushed.len() * 4
    }

    /// Bytes held by the word buffer, grown or not
    pub fn reserved_bytes(&self) -> usize {
        self.pushed.capacity() * 4
    }
}

#[cfg(target_arch = "x86")]
mod native {
    use core::ffi::c_void;

    use super::super::abi::{CallFrame, Convention};
    use super::super::types::{ArgDescriptor, ArgKind, InvocationResult};
    use super::StackFrame;

    /// Shared with the asm block; field offsets are hard-coded there
    #[repr(C)]
    struct FrameState {
        target: u32,     // +0
        words: u32,      // +4
        count: u32,      // +8
        float_kind: u32, // +12: 0 none, 1 single, 2 double
        ret_lo: u32,     // +16
        ret_hi: u32,     // +20
        delta: i32,      // +24
        expected: u32,   // +28: esp a fully-popping callee leaves behind
        float_bits: u64, // +32
    }

    impl CallFrame for StackFrame {
        fn push_value(&mut self, desc: &ArgDescriptor) {
            self.push_payload(desc);
        }

        fn push_address_of(&mut self, desc: &mut ArgDescriptor) {
            self.push_address(desc.payload_address() as usize);
        }

        fn reserved_bytes(&self) -> usize {
            StackFrame::reserved_bytes(self)
        }

        fn push_hidden_return(&mut self, buffer: *mut c_void) {
            self.push_address(buffer as usize);
        }

        unsafe fn invoke(
            self,
            target: *const c_void,
            convention: Convention,
            ret: &ArgDescriptor,
        ) -> InvocationResult {
            let words = self.layout();
            let float_kind = match (ret.kind, ret.by_address) {
                (ArgKind::Float32, false) => 1,
                (ArgKind::Float64, false) => 2,
                _ => 0,
            };

            let mut state = FrameState {
                target: target as u32,
                words: words.as_ptr() as u32,
                count: words.len() as u32,
                float_kind,
                ret_lo: 0,
                ret_hi: 0,
                delta: 0,
                expected: 0,
                float_bits: 0,
            };
            let state_ptr: *mut FrameState = &mut state;

            core::arch::asm!(
                "push ebp",
                "push ebx",
                "mov ebx, ecx",
                "mov edi, esp",
                // Reserve and align the argument region
                "mov eax, [ebx + 4]",
                "mov ecx, [ebx + 8]",
                "lea edx, [ecx * 4]",
                "sub esp, edx",
                "and esp, -16",
                "lea edx, [esp + ecx * 4]",
                "mov [ebx + 28], edx",
                // Collapse to the region end and push the words back into it
                "mov esp, edx",
                "test ecx, ecx",
                "jz 5f",
                "4:",
                "push dword ptr [eax + ecx * 4 - 4]",
                "dec ecx",
                "jnz 4b",
                "5:",
                "mov eax, [ebx]",
                "call eax",
                "mov [ebx + 16], eax",
                "mov [ebx + 20], edx",
                "mov eax, [ebx + 28]",
                "sub eax, esp",
                "mov [ebx + 24], eax",
                "mov ecx, [ebx + 12]",
                "test ecx, ecx",
                "jz 7f",
                "cmp ecx, 1",
                "jne 6f",
                "fstp dword ptr [ebx + 32]",
                "jmp 7f",
                "6:",
                "fstp qword ptr [ebx + 32]",
                "7:",
                "mov esp, edi",
                "pop ebx",
                "pop ebp",
                inout("ecx") state_ptr => _,
                out("edi") _,
                clobber_abi("C"),
            );

            InvocationResult {
                int_bits: (state.ret_hi as u64) << 32 | state.ret_lo as u64,
                float_bits: state.float_bits,
                fault_code: 0,
                stack_delta: if convention.measures_stack() { state.delta } else { 0 },
                scratch_bytes: 0,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interop::ArgKind;

    fn int_desc(kind: ArgKind, value: i64) -> ArgDescriptor {
        let mut desc = ArgDescriptor::new(kind);
        desc.store_integer(value);
        desc
    }

    #[test]
    fn test_single_word_arguments() {
        let mut frame = StackFrame::with_capacity(2);
        // Right-to-left: second argument first
        frame.push_payload(&int_desc(ArgKind::Int32, 2));
        frame.push_payload(&int_desc(ArgKind::Int32, 1));
        assert_eq!(frame.layout(), vec![1, 2]);
        assert_eq!(frame.argument_bytes(), 8);
    }

    #[test]
    fn test_eight_byte_values_are_little_endian_in_memory() {
        let mut frame = StackFrame::with_capacity(2);
        frame.push_payload(&int_desc(ArgKind::Int32, 7));
        frame.push_payload(&int_desc(ArgKind::Int64, 0x1122_3344_5566_7788));
        assert_eq!(frame.layout(), vec![0x5566_7788, 0x1122_3344, 7]);
    }

    #[test]
    fn test_doubles_split_into_two_words() {
        let mut desc = ArgDescriptor::new(ArgKind::Float64);
        desc.store_float(1.5);
        let bits = 1.5f64.to_bits();

        let mut frame = StackFrame::with_capacity(1);
        frame.push_payload(&desc);
        assert_eq!(frame.layout(), vec![bits as u32, (bits >> 32) as u32]);
    }

    #[test]
    fn test_floats_keep_their_bit_pattern() {
        let mut desc = ArgDescriptor::new(ArgKind::Float32);
        desc.store_float(2.25);

        let mut frame = StackFrame::with_capacity(1);
        frame.push_payload(&desc);
        assert_eq!(frame.layout(), vec![2.25f32.to_bits()]);
    }

    #[test]
    fn test_narrow_integers_fill_a_whole_slot() {
        let mut frame = StackFrame::with_capacity(2);
        frame.push_payload(&int_desc(ArgKind::Int8, -1));
        frame.push_payload(&int_desc(ArgKind::Int16, 0x1234));
        assert_eq!(frame.layout(), vec![0x1234, 0xFF]);
    }

    #[test]
    fn test_reserved_bytes_track_growth() {
        let mut frame = StackFrame::with_capacity(1);
        let initial = frame.reserved_bytes();
        assert!(initial >= 12);

        frame.push_payload(&int_desc(ArgKind::Int64, 1));
        assert_eq!(frame.reserved_bytes(), initial);

        for value in 2..6 {
            frame.push_payload(&int_desc(ArgKind::Int64, value));
        }
        assert!(frame.reserved_bytes() > initial);
    }

    #[test]
    fn test_addresses_take_one_word() {
        let mut frame = StackFrame::with_capacity(1);
        frame.push_address(0x1000);
        frame.push_payload(&int_desc(ArgKind::Int64, -1));
        assert_eq!(frame.layout(), vec![u32::MAX, u32::MAX, 0x1000]);
        assert_eq!(frame.argument_bytes(), 12);
    }
}
