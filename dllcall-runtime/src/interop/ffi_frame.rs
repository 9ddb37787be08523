//! libffi-backed call frames for targets without a hand-built stack
//!
//! Register assignment differs per ABI, so arguments are described to libffi
//! and its trampoline places them. Both conventions map to the platform
//! default here; there is no callee cleanup to measure.

use core::ffi::c_void;

use libffi::middle::{Arg, Cif, CodePtr, Type};

use super::abi::{CallFrame, Convention};
use super::types::{ArgDescriptor, ArgKind, InvocationResult, Payload};

/// Argument vector for one libffi call
#[derive(Default)]
pub struct FfiFrame {
    /// Types and value addresses, in push order (last argument first)
    types: Vec<Type>,
    values: Vec<*const c_void>,
    /// Boxed pointer slots for by-address arguments
    addresses: Vec<Box<*mut c_void>>,
}

impl FfiFrame {
    pub fn with_capacity(arg_count: usize) -> Self {
        Self {
            types: Vec::with_capacity(arg_count + 1),
            values: Vec::with_capacity(arg_count + 1),
            addresses: Vec::new(),
        }
    }

    fn push_pointer(&mut self, address: *mut c_void) {
        let slot = Box::new(address);
        self.types.push(Type::pointer());
        self.values.push(&*slot as *const *mut c_void as *const c_void);
        self.addresses.push(slot);
    }
}

/// libffi type for a by-value descriptor
fn ffi_type(desc: &ArgDescriptor) -> Type {
    match (desc.kind, desc.is_unsigned) {
        (ArgKind::Str, _) => Type::pointer(),
        (ArgKind::Int8, false) => Type::i8(),
        (ArgKind::Int8, true) => Type::u8(),
        (ArgKind::Int16, false) => Type::i16(),
        (ArgKind::Int16, true) => Type::u16(),
        (ArgKind::Int32, false) => Type::i32(),
        (ArgKind::Int32, true) => Type::u32(),
        (ArgKind::Int64, false) => Type::i64(),
        (ArgKind::Int64, true) => Type::u64(),
        (ArgKind::Float32, _) => Type::f32(),
        (ArgKind::Float64, _) => Type::f64(),
    }
}

impl CallFrame for FfiFrame {
    fn push_value(&mut self, desc: &ArgDescriptor) {
        // Every union field starts at offset 0, so the slot address is the
        // value address for any width
        self.types.push(ffi_type(desc));
        self.values
            .push(&desc.payload as *const Payload as *const c_void);
    }

    fn push_address_of(&mut self, desc: &mut ArgDescriptor) {
        self.push_pointer(desc.payload_address() as *mut c_void);
    }

    fn push_hidden_return(&mut self, buffer: *mut c_void) {
        self.push_pointer(buffer);
    }

    fn reserved_bytes(&self) -> usize {
        let word = core::mem::size_of::<*const c_void>();
        self.values.capacity() * word + self.addresses.len() * word
    }

    unsafe fn invoke(
        self,
        target: *const c_void,
        _convention: Convention,
        ret: &ArgDescriptor,
    ) -> InvocationResult {
        let return_type = if ret.by_address {
            Type::pointer()
        } else {
            ffi_type(ret)
        };
        let cif = Cif::new(self.types.into_iter().rev(), return_type);
        let args: Vec<Arg> = self
            .values
            .iter()
            .rev()
            .map(|&value| Arg::new(&*(value as *const u8)))
            .collect();
        let code = CodePtr(target as *mut c_void);

        let mut result = InvocationResult::default();
        match (ret.kind, ret.by_address) {
            (ArgKind::Float32, false) => {
                result.float_bits = cif.call::<f32>(code, &args).to_bits() as u64;
            }
            (ArgKind::Float64, false) => {
                result.float_bits = cif.call::<f64>(code, &args).to_bits();
            }
            // libffi widens integral returns to a full register
            _ => result.int_bits = cif.call::<u64>(code, &args),
        }
        drop(self.addresses);
        result
    }
}
