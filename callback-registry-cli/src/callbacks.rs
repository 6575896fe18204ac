//! Callbacks driven by the workloads, and the routes used to reach them
//!
//! A [`Route`] decides who invokes a handle: Rust directly, the bundled C
//! module, or an invoke entry point loaded from a shared library.

use crate::native_lib::NativeLibrary;
use callback_registry::{ArgBuffer, CallbackRegistry, Handle, NativeBridge, Result};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// How a handle gets invoked
#[derive(Clone)]
pub enum Route {
    /// Rust calls the registry itself
    Direct,
    /// Through the C module linked into the library
    Bundled,
    /// Through the entry point of a library loaded at runtime; the route
    /// holds the library, so it cannot be unloaded underneath it
    External(Arc<NativeLibrary>),
}

impl Route {
    /// Invoke `handle` on a shared buffer
    pub fn invoke(&self, registry: &CallbackRegistry, handle: Handle, args: &mut [u8]) -> Result<i32> {
        match self {
            Route::Direct => {
                let length = args.len();
                registry.call(handle, args, length)
            }
            Route::Bundled => NativeBridge::new(registry).invoke(handle, args),
            Route::External(library) => {
                // SAFETY: the entry was resolved from a module exporting the
                // cbr_invoke contract, and `library` keeps it loaded for the
                // whole call
                let bridge = unsafe { NativeBridge::with_entry(registry, library.entry()) };
                bridge.invoke(handle, args)
            }
        }
    }

    /// Run a prefix sum over `values`, letting native code pack the buffer
    /// when the bundled module is in use
    pub fn prefix_sum(&self, registry: &CallbackRegistry, handle: Handle, values: &mut [i32]) -> Result<i32> {
        match self {
            Route::Bundled => NativeBridge::new(registry).prefix_sum(handle, values),
            route => {
                let mut bytes = callback_registry::pack_i32s(values);
                let result = route.invoke(registry, handle, &mut bytes)?;
                values.copy_from_slice(&callback_registry::unpack_i32s(&bytes)?);
                Ok(result)
            }
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Direct => write!(f, "direct"),
            Route::Bundled => write!(f, "bundled-native"),
            Route::External(_) => write!(f, "external-native"),
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Sum of all packed `i32` values
pub fn sum(_registry: &CallbackRegistry, args: ArgBuffer<'_>) -> Result<i32> {
    Ok(args
        .read_i32s()?
        .into_iter()
        .fold(0i32, |acc, value| acc.wrapping_add(value)))
}

/// Running prefix sum, written back into the shared buffer; returns the last sum
pub fn prefix_sum(_registry: &CallbackRegistry, mut args: ArgBuffer<'_>) -> Result<i32> {
    let mut values = args.read_i32s()?;
    for i in 1..values.len() {
        values[i] = values[i].wrapping_add(values[i - 1]);
    }
    args.write_i32s(&values)?;
    Ok(values.last().copied().unwrap_or(0))
}

/// Callback counting its own invocations
pub fn counter(calls: Arc<AtomicU64>) -> impl Fn(&CallbackRegistry, ArgBuffer<'_>) -> Result<i32> + Send + Sync + 'static {
    move |_, _| {
        let previous = calls.fetch_add(1, Ordering::Relaxed);
        Ok((previous % i32::MAX as u64) as i32)
    }
}

/// Build a chain of `depth` nested invocations through `route` and run it
///
/// Every level registers the next one as an auto-disposed callback, so the
/// registry is back to its initial size once the chain unwinds. Returns the
/// number of levels below the first one.
pub fn run_chain(registry: &CallbackRegistry, route: &Route, depth: u32) -> Result<i32> {
    let next = route.clone();
    let handle = registry.wrap_once(move |registry, _| {
        if depth == 0 {
            Ok(0)
        } else {
            Ok(run_chain(registry, &next, depth - 1)? + 1)
        }
    })?;
    route.invoke(registry, handle, &mut [])
}
