//! Type definitions for native call plans
//!
//! Descriptors, call plans, and raw results. Every value here lives for
//! exactly one invocation.

use core::ffi::c_char;

use super::abi::Convention;

/// Argument kind catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ArgKind {
    Str,
    Int32,
    Int16,
    Int8,
    Int64,
    Float32,
    Float64,
}

impl ArgKind {
    /// Payload size in bytes
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            Self::Int8 => 1,
            Self::Int16 => 2,
            Self::Int32 | Self::Float32 => 4,
            Self::Int64 | Self::Float64 => 8,
            Self::Str => core::mem::size_of::<*const c_char>(),
        }
    }

    /// 32-bit stack slots occupied when passed by value
    #[inline]
    pub const fn stack_words(self) -> usize {
        match self {
            Self::Int64 | Self::Float64 => 2,
            _ => 1,
        }
    }

    /// Check if kind is floating point
    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// Whether a return of this kind comes back through a hidden pointer
    ///
    /// Always false for the scalar catalog; aggregates would answer true.
    #[inline]
    pub const fn returns_through_memory(self) -> bool {
        false
    }

    /// Canonical type token
    pub const fn name(self) -> &'static str {
        match self {
            Self::Str => "Str",
            Self::Int32 => "Int",
            Self::Int16 => "Short",
            Self::Int8 => "Char",
            Self::Int64 => "Int64",
            Self::Float32 => "Float",
            Self::Float64 => "Double",
        }
    }
}

/// Raw 8-byte argument slot (untagged union)
#[repr(C)]
pub union Payload {
    pub i8: i8,
    pub i16: i16,
    pub i32: i32,
    pub i64: i64,
    pub u8: u8,
    pub u16: u16,
    pub u32: u32,
    pub u64: u64,
    pub f32: f32,
    pub f64: f64,
    pub ptr: *mut c_char,
}

impl Payload {
    /// All-zero slot
    #[inline]
    pub const fn zeroed() -> Self {
        Self { u64: 0 }
    }

    /// Create from pointer
    #[inline]
    pub fn from_ptr(ptr: *mut c_char) -> Self {
        let mut slot = Self::zeroed();
        slot.ptr = ptr;
        slot
    }

    /// All eight bytes as an integer
    #[inline]
    pub fn bits(&self) -> u64 {
        unsafe { self.u64 }
    }
}

impl Default for Payload {
    #[inline]
    fn default() -> Self {
        Self::zeroed()
    }
}

// Manual implementations for Copy, Clone, and Debug since union doesn't auto-derive
impl Copy for Payload {}
impl Clone for Payload {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl core::fmt::Debug for Payload {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Payload({:#018x})", self.bits())
    }
}

/// One argument (or the return value) of a native call
#[derive(Debug, Clone, Copy)]
pub struct ArgDescriptor {
    pub kind: ArgKind,
    pub is_unsigned: bool,
    pub by_address: bool,
    pub payload: Payload,
}

impl ArgDescriptor {
    /// Signed, by-value descriptor with an empty payload
    #[inline]
    pub const fn new(kind: ArgKind) -> Self {
        Self {
            kind,
            is_unsigned: false,
            by_address: false,
            payload: Payload::zeroed(),
        }
    }

    /// The default return descriptor: a signed 32-bit integer
    #[inline]
    pub const fn default_return() -> Self {
        Self::new(ArgKind::Int32)
    }

    /// Address of this descriptor's own payload slot
    #[inline]
    pub fn payload_address(&mut self) -> *mut Payload {
        &mut self.payload
    }

    /// Store an integer, narrowed to the declared width
    ///
    /// The whole slot is rewritten so stale high bytes never leak through.
    pub fn store_integer(&mut self, value: i64) {
        let mut slot = Payload::zeroed();
        match self.kind {
            ArgKind::Int8 => slot.i8 = value as i8,
            ArgKind::Int16 => slot.i16 = value as i16,
            ArgKind::Int32 => slot.i32 = value as i32,
            _ => slot.i64 = value,
        }
        self.payload = slot;
    }

    /// Read the payload as an integer, sign- or zero-extended per width
    pub fn read_integer(&self) -> i64 {
        integer_from_bits(self.payload.bits(), self.kind, self.is_unsigned)
    }

    /// Store a double, narrowed for `Float32`
    pub fn store_float(&mut self, value: f64) {
        let mut slot = Payload::zeroed();
        match self.kind {
            ArgKind::Float32 => slot.f32 = value as f32,
            _ => slot.f64 = value,
        }
        self.payload = slot;
    }

    /// Read the payload as a double
    pub fn read_float(&self) -> f64 {
        float_from_bits(self.payload.bits(), self.kind)
    }
}

/// Interpret raw little-endian bits as an integer of `kind`'s width
pub(crate) fn integer_from_bits(bits: u64, kind: ArgKind, unsigned: bool) -> i64 {
    match (kind, unsigned) {
        (ArgKind::Int8, false) => bits as u8 as i8 as i64,
        (ArgKind::Int8, true) => bits as u8 as i64,
        (ArgKind::Int16, false) => bits as u16 as i16 as i64,
        (ArgKind::Int16, true) => bits as u16 as i64,
        (ArgKind::Int32, false) => bits as u32 as i32 as i64,
        (ArgKind::Int32, true) => bits as u32 as i64,
        _ => bits as i64,
    }
}

/// Interpret raw bits as a float of `kind`'s width
pub(crate) fn float_from_bits(bits: u64, kind: ArgKind) -> f64 {
    match kind {
        ArgKind::Float32 => f32::from_bits(bits as u32) as f64,
        _ => f64::from_bits(bits),
    }
}

/// Owned, NUL-terminated narrow string handed to a callee
pub struct StringBuffer {
    bytes: Box<[u8]>,
}

impl StringBuffer {
    /// Buffer holding `text`, at least `capacity` bytes long
    pub fn with_text(text: &str, capacity: usize) -> Self {
        let len = capacity.max(text.len() + 1);
        let mut bytes = vec![0u8; len].into_boxed_slice();
        bytes[..text.len()].copy_from_slice(text.as_bytes());
        Self { bytes }
    }

    /// Pointer handed to the callee
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut c_char {
        self.bytes.as_mut_ptr() as *mut c_char
    }

    /// Size in bytes, terminator included
    #[inline]
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Whether `ptr` still points at the start of this buffer
    #[inline]
    pub fn is_start(&self, ptr: *const c_char) -> bool {
        core::ptr::eq(self.bytes.as_ptr() as *const c_char, ptr)
    }

    /// Text up to the first NUL, bounded by the buffer size
    ///
    /// A callee that forgot to terminate gets its last byte overwritten with
    /// the terminator.
    pub fn read_terminated(&mut self) -> String {
        let end = match self.bytes.iter().position(|&b| b == 0) {
            Some(end) => end,
            None => {
                let last = self.bytes.len() - 1;
                self.bytes[last] = 0;
                last
            }
        };
        String::from_utf8_lossy(&self.bytes[..end]).into_owned()
    }
}

impl core::fmt::Debug for StringBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StringBuffer")
            .field("capacity", &self.bytes.len())
            .finish()
    }
}

/// Ordered descriptors plus everything needed to invoke and interpret
#[derive(Debug)]
pub struct CallPlan {
    pub args: Vec<ArgDescriptor>,
    pub convention: Convention,
    pub return_descriptor: ArgDescriptor,
    /// Backing storage for `Str` arguments, index-aligned with `args`
    pub(crate) strings: Vec<Option<StringBuffer>>,
}

impl CallPlan {
    /// Empty plan
    pub fn new(convention: Convention, return_descriptor: ArgDescriptor) -> Self {
        Self {
            args: Vec::new(),
            convention,
            return_descriptor,
            strings: Vec::new(),
        }
    }

    /// Append an argument, with its string storage if it has any
    pub(crate) fn push(&mut self, mut desc: ArgDescriptor, buffer: Option<StringBuffer>) {
        let buffer = buffer.map(|mut buf| {
            desc.payload = Payload::from_ptr(buf.as_mut_ptr());
            buf
        });
        self.args.push(desc);
        self.strings.push(buffer);
    }

    /// String storage for argument `index`
    pub(crate) fn string_mut(&mut self, index: usize) -> Option<&mut StringBuffer> {
        self.strings.get_mut(index).and_then(Option::as_mut)
    }
}

/// Raw outcome of transferring control to the callee
///
/// Both register snapshots are kept; the return descriptor decides which one
/// means anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvocationResult {
    /// Integer return registers (`eax:edx`, `rax`, `x0`)
    pub int_bits: u64,
    /// Floating-point return in its own width; `f32` bits sit in the low half
    pub float_bits: u64,
    /// Platform fault code, 0 when the call returned normally
    pub fault_code: u32,
    /// Bytes pushed minus bytes the callee popped (standard call only)
    pub stack_delta: i32,
    /// Bytes the frame had reserved for arguments when control transferred
    pub scratch_bytes: usize,
}

impl InvocationResult {
    #[inline]
    pub fn faulted(&self) -> bool {
        self.fault_code != 0
    }
}
