//! Result interpretation and output-parameter writeback

use core::ffi::{c_char, CStr};

use super::status::Status;
use super::trap::{guarded, Guarded};
use super::types::{
    float_from_bits, integer_from_bits, ArgDescriptor, ArgKind, CallPlan, InvocationResult,
};
use crate::value::{HostValue, Operand};

/// Turn a raw result into the host value and status, then copy outputs back
///
/// `params` is the host list minus its function operand; argument `i`'s value
/// sits at `params[2 * i + 1]`. A faulted call skips writeback entirely. Any
/// non-zero status returns the empty value of the return kind.
pub fn finish(
    result: &InvocationResult,
    plan: &mut CallPlan,
    params: &mut [Operand<'_>],
) -> (HostValue, Status) {
    let ret = plan.return_descriptor;
    let status = Status::after_call(result.stack_delta, result.fault_code);

    if result.faulted() {
        return (HostValue::empty_for(ret.kind), status);
    }

    let (value, status) = match read_return(result, &ret) {
        Guarded::Completed(value) => (value, status),
        // Dereferencing the returned address faulted
        Guarded::Faulted(code) => (
            HostValue::empty_for(ret.kind),
            Status::after_call(result.stack_delta, code),
        ),
    };

    write_outputs(plan, params);
    match status {
        Status::Success => (value, status),
        _ => (HostValue::empty_for(ret.kind), status),
    }
}

/// Interpret the return registers per the return descriptor
///
/// Pointer reads happen under the trap since the address comes from the
/// callee.
fn read_return(result: &InvocationResult, ret: &ArgDescriptor) -> Guarded<HostValue> {
    if ret.by_address {
        let address = result.int_bits as usize;
        if address == 0 {
            return Guarded::Completed(HostValue::empty_for(ret.kind));
        }
        return guarded(|| unsafe { value_at(address as *const u8, ret) });
    }

    match ret.kind {
        ArgKind::Str => {
            let ptr = result.int_bits as usize as *const c_char;
            guarded(|| HostValue::Str(unsafe { text_at(ptr) }))
        }
        ArgKind::Float32 | ArgKind::Float64 => {
            Guarded::Completed(HostValue::Float(float_from_bits(result.float_bits, ret.kind)))
        }
        kind => Guarded::Completed(HostValue::Int(integer_from_bits(
            result.int_bits,
            kind,
            ret.is_unsigned,
        ))),
    }
}

/// Read a `ret.kind` value stored at `address`
unsafe fn value_at(address: *const u8, ret: &ArgDescriptor) -> HostValue {
    match ret.kind {
        ArgKind::Str => HostValue::Str(text_at(*(address as *const *const c_char))),
        kind => {
            let mut raw = [0u8; 8];
            core::ptr::copy_nonoverlapping(address, raw.as_mut_ptr(), kind.size());
            let bits = u64::from_le_bytes(raw);
            if kind.is_float() {
                HostValue::Float(float_from_bits(bits, kind))
            } else {
                HostValue::Int(integer_from_bits(bits, kind, ret.is_unsigned))
            }
        }
    }
}

/// Copy a NUL-terminated string; null reads as empty
unsafe fn text_at(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

/// Copy by-address payloads and string buffers back into host variables
fn write_outputs(plan: &mut CallPlan, params: &mut [Operand<'_>]) {
    for index in 0..plan.args.len() {
        let desc = plan.args[index];
        let Some(var) = params.get_mut(2 * index + 1).and_then(Operand::variable_mut) else {
            continue;
        };

        let value = match desc.kind {
            ArgKind::Str => {
                let Some(text) = string_output(plan, index, &desc) else {
                    continue;
                };
                if var.value().to_text() == text {
                    continue;
                }
                HostValue::Str(text)
            }
            _ if !desc.by_address => continue,
            kind if kind.is_float() => HostValue::Float(desc.read_float()),
            _ => HostValue::Int(desc.read_integer()),
        };
        var.assign(value);
    }
}

/// Text a `Str` argument's variable should hold after the call
///
/// `None` when the callee left an unreadable pointer behind.
fn string_output(plan: &mut CallPlan, index: usize, desc: &ArgDescriptor) -> Option<String> {
    let ptr = unsafe { desc.payload.ptr };
    let buffer = plan.string_mut(index)?;
    if buffer.is_start(ptr) {
        return Some(buffer.read_terminated());
    }

    // Only `Str*` lets the callee swap the pointer
    match guarded(|| unsafe { text_at(ptr) }) {
        Guarded::Completed(text) => Some(text),
        Guarded::Faulted(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interop::abi::Convention;
    use crate::interop::marshal::marshal;
    use crate::value::Variable;

    fn completed(int_bits: u64) -> InvocationResult {
        InvocationResult {
            int_bits,
            ..InvocationResult::default()
        }
    }

    #[test]
    fn test_integer_return_extension() {
        let mut plan = CallPlan::new(Convention::StandardCall, ArgDescriptor::new(ArgKind::Int16));
        let (value, status) = finish(&completed(0xFFFF_8001), &mut plan, &mut []);
        assert_eq!(value, HostValue::Int(-32767));
        assert_eq!(status, Status::Success);

        plan.return_descriptor.is_unsigned = true;
        let (value, _) = finish(&completed(0xFFFF_8001), &mut plan, &mut []);
        assert_eq!(value, HostValue::Int(0x8001));
    }

    #[test]
    fn test_float_return_uses_float_bits() {
        let mut plan = CallPlan::new(Convention::CCall, ArgDescriptor::new(ArgKind::Float32));
        let result = InvocationResult {
            int_bits: 99,
            float_bits: 0.5f32.to_bits() as u64,
            ..InvocationResult::default()
        };
        let (value, _) = finish(&result, &mut plan, &mut []);
        assert_eq!(value, HostValue::Float(0.5));
    }

    #[test]
    fn test_return_by_address_is_dereferenced() {
        let target: i64 = -12345;
        let mut ret = ArgDescriptor::new(ArgKind::Int64);
        ret.by_address = true;
        let mut plan = CallPlan::new(Convention::CCall, ret);

        let (value, _) = finish(&completed(&target as *const i64 as u64), &mut plan, &mut []);
        assert_eq!(value, HostValue::Int(-12345));

        let (value, status) = finish(&completed(0), &mut plan, &mut []);
        assert_eq!(value, HostValue::Int(0));
        assert_eq!(status, Status::Success);
    }

    #[test]
    fn test_string_return_copies_text() {
        let text = b"native\0";
        let mut plan = CallPlan::new(Convention::CCall, ArgDescriptor::new(ArgKind::Str));
        let (value, _) = finish(&completed(text.as_ptr() as u64), &mut plan, &mut []);
        assert_eq!(value, HostValue::Str("native".into()));
    }

    #[test]
    fn test_fault_skips_writeback() {
        let mut var = Variable::with_value("n", 5i64);
        let mut params = vec![Operand::from("Int*"), Operand::from(&mut var)];
        let mut plan = marshal(&params).unwrap();
        plan.args[0].store_integer(10);

        let result = InvocationResult {
            fault_code: 11,
            ..InvocationResult::default()
        };
        let (value, status) = finish(&result, &mut plan, &mut params);
        assert_eq!(value, HostValue::Int(0));
        assert_eq!(status, Status::CalleeFault(11));
        drop(params);
        assert_eq!(var.value(), &HostValue::Int(5));
    }

    #[test]
    fn test_imbalance_empties_value_but_writes_back() {
        let mut var = Variable::with_value("n", 5i64);
        let mut params = vec![Operand::from("Int*"), Operand::from(&mut var)];
        let mut plan = marshal(&params).unwrap();
        plan.args[0].store_integer(10);

        let result = InvocationResult {
            int_bits: 1234,
            stack_delta: 4,
            ..InvocationResult::default()
        };
        let (value, status) = finish(&result, &mut plan, &mut params);
        assert_eq!(value, HostValue::Int(0));
        assert_eq!(status, Status::StackImbalance(4));
        drop(params);
        assert_eq!(var.value(), &HostValue::Int(10));
    }

    #[test]
    fn test_literals_are_never_written() {
        let mut params = vec![Operand::from("Int*"), Operand::from(5i64)];
        let mut plan = marshal(&params).unwrap();
        plan.args[0].store_integer(10);
        finish(&completed(0), &mut plan, &mut params);
        assert_eq!(params[1].value(), &HostValue::Int(5));
    }

    #[test]
    fn test_string_buffer_writeback() {
        let mut var = Variable::with_value("buf", "");
        var.set_capacity(16);
        let mut params = vec![Operand::from("Str"), Operand::from(&mut var)];
        let mut plan = marshal(&params).unwrap();

        unsafe {
            let ptr = plan.args[0].payload.ptr as *mut u8;
            core::ptr::copy_nonoverlapping(b"written\0".as_ptr(), ptr, 8);
        }
        finish(&completed(0), &mut plan, &mut params);
        drop(params);
        assert_eq!(var.value(), &HostValue::Str("written".into()));
    }

    #[test]
    fn test_unchanged_string_keeps_numeric_variable() {
        let mut var = Variable::with_value("n", 42i64);
        let mut params = vec![Operand::from("Str"), Operand::from(&mut var)];
        let mut plan = marshal(&params).unwrap();
        finish(&completed(0), &mut plan, &mut params);
        drop(params);
        assert_eq!(var.value(), &HostValue::Int(42));
    }

    #[test]
    fn test_replaced_string_pointer() {
        static REPLACEMENT: &[u8] = b"swapped\0";
        let mut var = Variable::with_value("s", "orig");
        let mut params = vec![Operand::from("Str*"), Operand::from(&mut var)];
        let mut plan = marshal(&params).unwrap();
        plan.args[0].payload.ptr = REPLACEMENT.as_ptr() as *mut c_char;

        finish(&completed(0), &mut plan, &mut params);
        drop(params);
        assert_eq!(var.value(), &HostValue::Str("swapped".into()));
    }

    #[test]
    fn test_null_string_pointer_reads_empty() {
        let mut var = Variable::with_value("s", "orig");
        let mut params = vec![Operand::from("Str*"), Operand::from(&mut var)];
        let mut plan = marshal(&params).unwrap();
        plan.args[0].payload.ptr = core::ptr::null_mut();

        finish(&completed(0), &mut plan, &mut params);
        drop(params);
        assert_eq!(var.value(), &HostValue::Str(String::new()));
    }
}
