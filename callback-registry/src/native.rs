//! Native boundary
//!
//! Native code never holds a callback, only its integer [`Handle`] and a
//! function pointer to [`registry_trampoline`]. This module provides the FFI
//! declarations of the bundled C module, the trampoline native code calls to
//! reach the registry, and a safe [`NativeBridge`] wrapper for Rust callers.
//!
//! Errors cannot cross the boundary as Rust values. The trampoline reports a
//! [`CallStatus`] to native code and parks the full [`RegistryError`] in the
//! current call frame; the bridge re-surfaces it unchanged once native code
//! returns.

use crate::registry::CallbackRegistry;
use crate::types::{Handle, RegistryError, Result};
use std::cell::Cell;
use std::os::raw::c_void;
use std::panic::{self, AssertUnwindSafe};

/// Status codes shared with native code (see `native/cbr_native.h`)
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallStatus {
    Ok = 0,
    UnknownCallback = 1,
    SentinelInvoked = 2,
    InvalidBuffer = 3,
    CallbackFailed = 4,
    Panicked = 5,
    NativeFailure = 6,
}

impl CallStatus {
    /// Decode a status written by native code; unknown codes are native failures
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => CallStatus::Ok,
            1 => CallStatus::UnknownCallback,
            2 => CallStatus::SentinelInvoked,
            3 => CallStatus::InvalidBuffer,
            4 => CallStatus::CallbackFailed,
            5 => CallStatus::Panicked,
            _ => CallStatus::NativeFailure,
        }
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

/// Signature of the trampoline handed to native code
pub type NativeCallFn = unsafe extern "C" fn(
    ctx: *mut c_void,
    handle: u64,
    args: *mut u8,
    length: usize,
    status: *mut i32,
) -> i32;

/// Signature of a native entry point that invokes a handle through the trampoline
pub type NativeInvokeFn = unsafe extern "C" fn(
    call: NativeCallFn,
    ctx: *mut c_void,
    handle: u64,
    args: *mut u8,
    length: usize,
    status: *mut i32,
) -> i32;

/// Symbol name of the invoke entry point, for dynamically loaded modules
pub const INVOKE_SYMBOL: &[u8] = b"cbr_invoke\0";

extern "C" {
    pub fn cbr_invoke(
        call: NativeCallFn,
        ctx: *mut c_void,
        handle: u64,
        args: *mut u8,
        length: usize,
        status: *mut i32,
    ) -> i32;
    pub fn cbr_sum_i32(
        call: NativeCallFn,
        ctx: *mut c_void,
        handle: u64,
        values: *const i32,
        count: usize,
        status: *mut i32,
    ) -> i32;
    pub fn cbr_prefix_sum_i32(
        call: NativeCallFn,
        ctx: *mut c_void,
        handle: u64,
        values: *mut i32,
        count: usize,
        status: *mut i32,
    ) -> i32;
    pub fn cbr_copy_invoke(
        call: NativeCallFn,
        ctx: *mut c_void,
        handle: u64,
        input: *const u8,
        output: *mut u8,
        length: usize,
        status: *mut i32,
    ) -> i32;
}

/// State of one Rust -> native -> Rust round trip
///
/// Lives on the stack of the Rust caller for the duration of the native call;
/// native code only ever sees it as an opaque `ctx` pointer.
struct CallFrame<'r> {
    registry: &'r CallbackRegistry,
    parked: Cell<Option<RegistryError>>,
}

impl<'r> CallFrame<'r> {
    fn new(registry: &'r CallbackRegistry) -> Self {
        Self {
            registry,
            parked: Cell::new(None),
        }
    }

    fn as_ctx(&self) -> *mut c_void {
        self as *const CallFrame<'r> as *mut c_void
    }

    fn park(&self, error: RegistryError) {
        self.parked.set(Some(error));
    }

    /// Turn what native code reported into a Rust result
    fn finish(self, value: i32, raw_status: i32) -> Result<i32> {
        match CallStatus::from_raw(raw_status) {
            CallStatus::Ok => Ok(value),
            status => Err(self
                .parked
                .into_inner()
                .unwrap_or(RegistryError::NativeStatus(status))),
        }
    }
}

/// Entry point native code calls to invoke a handle
///
/// `ctx` must be the frame pointer the bridge passed into native code.
/// A null `args` is accepted only together with a zero `length`. Panics in
/// callbacks are caught here and reported as [`CallStatus::Panicked`].
///
/// # Safety
///
/// `ctx` must be null or point to a live call frame, `args` must be valid for
/// reads and writes of `length` bytes, and `status` must be null or writable.
pub unsafe extern "C" fn registry_trampoline(
    ctx: *mut c_void,
    handle: u64,
    args: *mut u8,
    length: usize,
    status: *mut i32,
) -> i32 {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        if ctx.is_null() {
            return (0, CallStatus::NativeFailure);
        }
        // SAFETY: non-null ctx always comes from CallFrame::as_ctx of a frame
        // that outlives the native call
        let frame = unsafe { &*(ctx as *const CallFrame<'_>) };

        // A null buffer is empty; `call` rejects any non-zero length for it
        // once the handle has been resolved
        let bytes: &mut [u8] = if length == 0 || args.is_null() {
            &mut []
        } else {
            // SAFETY: caller guarantees args is valid for `length` bytes
            unsafe { std::slice::from_raw_parts_mut(args, length) }
        };

        match frame.registry.call(Handle::from_raw(handle), bytes, length) {
            Ok(value) => (value, CallStatus::Ok),
            Err(error) => {
                let code = error.status();
                frame.park(error);
                (0, code)
            }
        }
    }));

    let (value, code) = outcome.unwrap_or_else(|_| {
        log::error!("Callback {} panicked across the native boundary", handle);
        (0, CallStatus::Panicked)
    });

    if !status.is_null() {
        // SAFETY: checked for null above, caller guarantees it is writable
        unsafe { *status = code.as_raw() };
    }
    value
}

/// Safe wrapper for calling into native code with a registry
///
/// # Example
/// ```
/// use callback_registry::{CallbackRegistry, NativeBridge};
///
/// let registry = CallbackRegistry::new();
/// let handle = registry
///     .wrap_once(|_, args| Ok(args.read_i32s()?.iter().sum()))
///     .unwrap();
///
/// let bridge = NativeBridge::new(&registry);
/// assert_eq!(bridge.sum(handle, &[1, 2, 3]).unwrap(), 6);
/// ```
#[derive(Clone, Copy)]
pub struct NativeBridge<'r> {
    registry: &'r CallbackRegistry,
    entry: NativeInvokeFn,
}

impl<'r> NativeBridge<'r> {
    /// Bridge through the bundled native module
    pub fn new(registry: &'r CallbackRegistry) -> Self {
        Self {
            registry,
            entry: cbr_invoke,
        }
    }

    /// Bridge through an external invoke entry point
    ///
    /// # Safety
    ///
    /// `entry` must honor the `cbr_invoke` contract: call the trampoline it is
    /// given at most with the `ctx`, handle, buffer and status pointers it
    /// received, and only while it is itself running.
    pub unsafe fn with_entry(registry: &'r CallbackRegistry, entry: NativeInvokeFn) -> Self {
        Self { registry, entry }
    }

    /// Have native code invoke `handle` on a shared buffer
    pub fn invoke(&self, handle: Handle, args: &mut [u8]) -> Result<i32> {
        let frame = CallFrame::new(self.registry);
        let mut status = CallStatus::Ok.as_raw();
        // SAFETY: frame and args outlive the native call
        let value = unsafe {
            (self.entry)(
                registry_trampoline,
                frame.as_ctx(),
                handle.as_raw(),
                args.as_mut_ptr(),
                args.len(),
                &mut status,
            )
        };
        frame.finish(value, status)
    }

    /// Native code packs `values` little-endian and invokes `handle` on them
    pub fn sum(&self, handle: Handle, values: &[i32]) -> Result<i32> {
        let frame = CallFrame::new(self.registry);
        let mut status = CallStatus::Ok.as_raw();
        // SAFETY: frame and values outlive the native call
        let value = unsafe {
            cbr_sum_i32(
                registry_trampoline,
                frame.as_ctx(),
                handle.as_raw(),
                values.as_ptr(),
                values.len(),
                &mut status,
            )
        };
        frame.finish(value, status)
    }

    /// Like [`sum`](Self::sum), but native code writes the (possibly mutated)
    /// buffer back into `values` when the callback succeeds
    pub fn prefix_sum(&self, handle: Handle, values: &mut [i32]) -> Result<i32> {
        let frame = CallFrame::new(self.registry);
        let mut status = CallStatus::Ok.as_raw();
        // SAFETY: frame and values outlive the native call
        let value = unsafe {
            cbr_prefix_sum_i32(
                registry_trampoline,
                frame.as_ctx(),
                handle.as_raw(),
                values.as_mut_ptr(),
                values.len(),
                &mut status,
            )
        };
        frame.finish(value, status)
    }

    /// Native code copies `input` into its own scratch memory, invokes
    /// `handle` on the copy and hands the copy back
    pub fn copy_invoke(&self, handle: Handle, input: &[u8]) -> Result<(i32, Vec<u8>)> {
        let frame = CallFrame::new(self.registry);
        let mut output = vec![0u8; input.len()];
        let mut status = CallStatus::Ok.as_raw();
        // SAFETY: frame, input and output outlive the native call and output
        // has the same length as input
        let value = unsafe {
            cbr_copy_invoke(
                registry_trampoline,
                frame.as_ctx(),
                handle.as_raw(),
                input.as_ptr(),
                output.as_mut_ptr(),
                input.len(),
                &mut status,
            )
        };
        let value = frame.finish(value, status)?;
        Ok((value, output))
    }
}

impl std::fmt::Debug for NativeBridge<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeBridge")
            .field("registry", self.registry)
            .finish_non_exhaustive()
    }
}
