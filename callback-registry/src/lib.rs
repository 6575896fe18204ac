//! Callback Registry Library
//!
//! A handle-indirection layer for calling Rust callbacks from native code.
//!
//! # Architecture
//!
//! This library is intentionally small and focused on dispatch:
//! - Callbacks are registered once and referenced only by an integer [`Handle`]
//! - Native code invokes a handle with a raw byte buffer and gets an `i32` back
//! - Registrations are either auto-disposed by their first invocation or
//!   persistent until explicitly disposed
//! - Handle 0 is a sentinel that always fails
//! - Callbacks may re-enter the registry, directly or through native code
//!
//! The library does NOT:
//! - Define an argument schema beyond packed little-endian values
//! - Provide any transport beyond an in-process function call
//! - Keep any global state
//!
//! Workload drivers and reporting live in the application layer
//! (callback-registry-cli).
//!
//! # Example Usage
//!
//! ```
//! use callback_registry::{pack_i32s, unpack_i32s, CallbackRegistry, NativeBridge};
//!
//! let registry = CallbackRegistry::new();
//!
//! // Running prefix sum, written back into the shared buffer
//! let handle = registry
//!     .wrap_once(|_, mut args| {
//!         let mut values = args.read_i32s()?;
//!         for i in 1..values.len() {
//!             values[i] += values[i - 1];
//!         }
//!         args.write_i32s(&values)?;
//!         Ok(0)
//!     })
//!     .unwrap();
//!
//! let mut bytes = pack_i32s(&[100, 200, 300, -1000]);
//! let length = bytes.len();
//! registry.call(handle, &mut bytes, length).unwrap();
//! assert_eq!(unpack_i32s(&bytes).unwrap(), vec![100, 300, 600, -400]);
//!
//! // The same handle is gone now, wherever the call comes from
//! let bridge = NativeBridge::new(&registry);
//! assert!(bridge.invoke(handle, &mut bytes).is_err());
//! ```

// Public modules
pub mod buffer;
pub mod config;
pub mod native;
pub mod registry;
pub mod types;

// Re-export main types for convenience
pub use buffer::{pack_i32s, unpack_i32s, ArgBuffer};
pub use config::RegistryConfig;
pub use native::{CallStatus, NativeBridge, NativeCallFn, NativeInvokeFn};
pub use registry::{Callback, CallbackRegistry, RegistryStats};
pub use types::{Disposal, Handle, RegistryError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
