//! Fault trapping around native calls
//!
//! A callee that dereferences a bad pointer, divides by zero, or executes
//! garbage raises a signal. While a recovery point is active on the faulting
//! thread, the handler records the signal and `siglongjmp`s back to it, so the
//! call reports a fault code instead of taking the process down.
//!
//! Only unix targets have a trap. Elsewhere the callee runs unguarded and a
//! fault ends the process.
//!
//! # Safety
//!
//! - The handler only reads thread-local data and calls `siglongjmp`, both
//!   permitted in a signal context.
//! - `siglongjmp` skips destructors of frames between the recovery point and
//!   the fault. Only the callee's frames (and trampoline frames) live there.
//! - Faults outside any recovery point are chained to the previous handler.
//! - Recovery points nest: a callee that calls back into the host, which calls
//!   native code again, gets a fresh point linked to the outer one.

/// Outcome of a guarded region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guarded<T> {
    Completed(T),
    Faulted(u32),
}

impl<T> Guarded<T> {
    /// Fault code, or 0 for a normal return
    pub fn fault_code(&self) -> u32 {
        match self {
            Self::Completed(_) => 0,
            Self::Faulted(code) => *code,
        }
    }
}

#[cfg(unix)]
pub use self::unix::guarded;

#[cfg(not(unix))]
pub use self::unguarded::guarded;

#[cfg(unix)]
mod unix {
    use super::Guarded;
    use core::ptr;
    use std::cell::Cell;
    use std::mem::ManuallyDrop;
    use std::sync::Once;

    use crate::logging::log_trap_installed;

    /// Alternate signal stack size (bytes) so a callee stack overflow can
    /// still be handled
    const ALT_STACK_SIZE: usize = 64 * 1024;

    /// sigjmp_buf storage; 512 bytes covers every supported libc
    const JMP_BUF_SIZE: usize = 512;

    const TRAPPED_SIGNALS: [libc::c_int; 4] =
        [libc::SIGSEGV, libc::SIGBUS, libc::SIGFPE, libc::SIGILL];

    extern "C" {
        #[cfg_attr(all(target_os = "linux", target_env = "gnu"), link_name = "__sigsetjmp")]
        fn sigsetjmp(env: *mut u8, save_mask: libc::c_int) -> libc::c_int;
        fn siglongjmp(env: *mut u8, val: libc::c_int) -> !;
    }

    #[repr(C, align(16))]
    struct JmpBuf([u8; JMP_BUF_SIZE]);

    struct RecoveryPoint {
        env: JmpBuf,
        signal: libc::c_int,
        previous: *mut RecoveryPoint,
    }

    thread_local! {
        static ACTIVE: Cell<*mut RecoveryPoint> = const { Cell::new(ptr::null_mut()) };
        static ALT_STACK_READY: Cell<bool> = const { Cell::new(false) };
    }

    /// Handlers that were installed before ours, in `TRAPPED_SIGNALS` order
    static mut PREVIOUS: [libc::sigaction; 4] = unsafe { std::mem::zeroed() };

    static INSTALL_ONCE: Once = Once::new();

    /// Run `f` with faults converted into [`Guarded::Faulted`]
    ///
    /// The code is the signal number.
    #[inline(never)]
    pub fn guarded<T, F: FnOnce() -> T>(f: F) -> Guarded<T> {
        INSTALL_ONCE.call_once(|| unsafe { install_handlers() });
        ensure_alt_stack();

        let mut f = ManuallyDrop::new(f);
        let mut point = RecoveryPoint {
            env: JmpBuf([0u8; JMP_BUF_SIZE]),
            signal: 0,
            previous: ACTIVE.with(Cell::get),
        };
        let point_ptr: *mut RecoveryPoint = &mut point;

        unsafe {
            if sigsetjmp((*point_ptr).env.0.as_mut_ptr(), 1) != 0 {
                let signal = ptr::read_volatile(ptr::addr_of!((*point_ptr).signal));
                ACTIVE.with(|active| active.set((*point_ptr).previous));
                return Guarded::Faulted(signal as u32);
            }

            ACTIVE.with(|active| active.set(point_ptr));
            let value = ManuallyDrop::take(&mut f)();
            ACTIVE.with(|active| active.set((*point_ptr).previous));
            Guarded::Completed(value)
        }
    }

    unsafe fn install_handlers() {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = on_fault as usize;
        action.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK;
        libc::sigemptyset(&mut action.sa_mask);

        let previous = ptr::addr_of_mut!(PREVIOUS) as *mut libc::sigaction;
        for (slot, &signal) in TRAPPED_SIGNALS.iter().enumerate() {
            libc::sigaction(signal, &action, previous.add(slot));
        }
        log_trap_installed(TRAPPED_SIGNALS.len());
    }

    /// Give this thread an alternate signal stack unless it already has one
    fn ensure_alt_stack() {
        if ALT_STACK_READY.with(Cell::get) {
            return;
        }

        unsafe {
            let mut current: libc::stack_t = std::mem::zeroed();
            libc::sigaltstack(ptr::null(), &mut current);
            if current.ss_flags & libc::SS_DISABLE == 0 {
                ALT_STACK_READY.with(|ready| ready.set(true));
                return;
            }

            let stack = libc::mmap(
                ptr::null_mut(),
                ALT_STACK_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            );
            if stack == libc::MAP_FAILED {
                return;
            }

            let alt = libc::stack_t {
                ss_sp: stack,
                ss_flags: 0,
                ss_size: ALT_STACK_SIZE,
            };
            if libc::sigaltstack(&alt, ptr::null_mut()) == 0 {
                ALT_STACK_READY.with(|ready| ready.set(true));
            } else {
                libc::munmap(stack, ALT_STACK_SIZE);
            }
        }
    }

    unsafe extern "C" fn on_fault(
        signal: libc::c_int,
        info: *mut libc::siginfo_t,
        context: *mut libc::c_void,
    ) {
        let point = ACTIVE
            .try_with(Cell::get)
            .unwrap_or(ptr::null_mut());

        if point.is_null() {
            chain_to_previous(signal, info, context);
            return;
        }

        ptr::write_volatile(ptr::addr_of_mut!((*point).signal), signal);
        siglongjmp((*point).env.0.as_mut_ptr(), 1);
    }

    /// Hand a fault we don't own to whoever was installed before us
    unsafe fn chain_to_previous(
        signal: libc::c_int,
        info: *mut libc::siginfo_t,
        context: *mut libc::c_void,
    ) {
        let Some(slot) = TRAPPED_SIGNALS.iter().position(|&s| s == signal) else {
            return;
        };
        let previous = (ptr::addr_of!(PREVIOUS) as *const libc::sigaction)
            .add(slot)
            .read();

        if previous.sa_flags & libc::SA_SIGINFO != 0 {
            let handler: unsafe extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void) =
                std::mem::transmute(previous.sa_sigaction);
            handler(signal, info, context);
        } else if previous.sa_sigaction == libc::SIG_DFL {
            libc::signal(signal, libc::SIG_DFL);
            libc::raise(signal);
        } else if previous.sa_sigaction != libc::SIG_IGN {
            let handler: unsafe extern "C" fn(libc::c_int) =
                std::mem::transmute(previous.sa_sigaction);
            handler(signal);
        }
    }
}

#[cfg(not(unix))]
mod unguarded {
    use super::Guarded;

    /// No trap exists on this platform; `f` runs unprotected
    pub fn guarded<T, F: FnOnce() -> T>(f: F) -> Guarded<T> {
        Guarded::Completed(f())
    }
}
