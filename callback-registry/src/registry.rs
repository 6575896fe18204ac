//! Callback registry
//!
//! This module provides the handle table that sits on the managed side of the
//! boundary. Callbacks are registered once, referenced afterwards only by
//! their [`Handle`], and invoked with a raw argument buffer.
//!
//! The registry is an ordinary owned value: there is no global instance.
//! Every callback receives the registry it was invoked through, so nested
//! calls go back through the same table.

use crate::buffer::ArgBuffer;
use crate::config::RegistryConfig;
use crate::types::{Disposal, Handle, RegistryError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Something invocable through the registry
///
/// Implemented for every `Fn(&CallbackRegistry, ArgBuffer<'_>) -> Result<i32>`
/// closure; implement it directly for callbacks that carry their own state.
pub trait Callback: Send + Sync {
    fn invoke(&self, registry: &CallbackRegistry, args: ArgBuffer<'_>) -> Result<i32>;
}

impl<F> Callback for F
where
    F: Fn(&CallbackRegistry, ArgBuffer<'_>) -> Result<i32> + Send + Sync,
{
    fn invoke(&self, registry: &CallbackRegistry, args: ArgBuffer<'_>) -> Result<i32> {
        self(registry, args)
    }
}

/// Trap stored under handle 0
///
/// Catches code that treats 0 as a valid handle or forgot to initialize one.
struct SentinelCallback;

impl Callback for SentinelCallback {
    fn invoke(&self, _registry: &CallbackRegistry, args: ArgBuffer<'_>) -> Result<i32> {
        log::warn!("Sentinel callback invoked with {} byte(s)", args.len());
        Err(RegistryError::SentinelInvoked)
    }
}

#[derive(Clone)]
struct CallbackEntry {
    callback: Arc<dyn Callback>,
    disposal: Disposal,
}

/// Counters describing the registry's activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Entries currently registered, sentinel included
    pub live_entries: usize,
    /// Successful `wrap` calls
    pub wrapped: u64,
    /// Callbacks actually invoked (sentinel included)
    pub invocations: u64,
    /// Entries removed by `dispose`
    pub disposed: u64,
    /// Entries removed by their first invocation
    pub auto_disposed: u64,
    /// `call`s on handles with no live entry
    pub failed_lookups: u64,
}

struct RegistryState {
    entries: HashMap<Handle, CallbackEntry>,
    next_handle: u64,
    stats: RegistryStats,
}

impl RegistryState {
    /// Allocate a handle and make its entry visible in one step
    fn insert(&mut self, entry: CallbackEntry) -> Result<Handle> {
        let raw = self.next_handle;
        self.next_handle = raw
            .checked_add(1)
            .ok_or(RegistryError::HandleSpaceExhausted)?;

        let handle = Handle::from_raw(raw);
        self.entries.insert(handle, entry);
        Ok(handle)
    }
}

/// Handle table mapping opaque integers to callbacks
///
/// All state sits behind a single mutex that is only held for the duration
/// of one table operation, never while a callback runs. Callbacks may
/// therefore call back into the registry, recursively and from any thread.
pub struct CallbackRegistry {
    state: Mutex<RegistryState>,
    config: RegistryConfig,
}

impl CallbackRegistry {
    /// Create a registry with default configuration
    ///
    /// Handle 0 is taken by the sentinel entry before anything else is
    /// registered.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a registry with the given configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        let mut entries = HashMap::with_capacity(config.initial_capacity);
        entries.insert(
            Handle::SENTINEL,
            CallbackEntry {
                callback: Arc::new(SentinelCallback),
                disposal: Disposal::Persistent,
            },
        );

        let state = RegistryState {
            entries,
            next_handle: Handle::SENTINEL.as_raw() + 1,
            stats: RegistryStats::default(),
        };

        Self {
            state: Mutex::new(state),
            config,
        }
    }

    /// Register a closure and return its handle
    ///
    /// # Example
    /// ```
    /// use callback_registry::{CallbackRegistry, Disposal};
    ///
    /// let registry = CallbackRegistry::new();
    /// let handle = registry.wrap(|_, _| Ok(42), Disposal::AutoDispose).unwrap();
    /// let mut args: [u8; 0] = [];
    /// assert_eq!(registry.call(handle, &mut args, 0).unwrap(), 42);
    /// assert!(registry.call(handle, &mut args, 0).is_err());
    /// ```
    pub fn wrap<F>(&self, callback: F, disposal: Disposal) -> Result<Handle>
    where
        F: Fn(&CallbackRegistry, ArgBuffer<'_>) -> Result<i32> + Send + Sync + 'static,
    {
        self.wrap_callback(Arc::new(callback), disposal)
    }

    /// Register a closure that is disposed by its first invocation
    pub fn wrap_once<F>(&self, callback: F) -> Result<Handle>
    where
        F: Fn(&CallbackRegistry, ArgBuffer<'_>) -> Result<i32> + Send + Sync + 'static,
    {
        self.wrap(callback, Disposal::AutoDispose)
    }

    /// Register a closure that stays registered until disposed
    pub fn wrap_persistent<F>(&self, callback: F) -> Result<Handle>
    where
        F: Fn(&CallbackRegistry, ArgBuffer<'_>) -> Result<i32> + Send + Sync + 'static,
    {
        self.wrap(callback, Disposal::Persistent)
    }

    /// Register an already shared callback object
    pub fn wrap_callback(&self, callback: Arc<dyn Callback>, disposal: Disposal) -> Result<Handle> {
        let handle = {
            let mut state = self.lock();
            let handle = state.insert(CallbackEntry { callback, disposal })?;
            state.stats.wrapped += 1;
            handle
        };

        log::debug!("Registered callback {} ({})", handle, disposal);
        Ok(handle)
    }

    /// Invoke the callback registered under `handle`
    ///
    /// The handle is resolved first: unknown handles fail with
    /// [`RegistryError::UnknownCallback`] and the sentinel with
    /// [`RegistryError::SentinelInvoked`] whatever the buffer. For any other
    /// entry `length` is the byte count of the argument region and must not
    /// exceed `args.len()`; a rejected buffer leaves the entry in place.
    ///
    /// Auto-disposable entries are removed before their callback runs, so a
    /// callback re-entering its own handle observes
    /// [`RegistryError::UnknownCallback`]. The callback's result and errors
    /// are returned unchanged.
    pub fn call(&self, handle: Handle, args: &mut [u8], length: usize) -> Result<i32> {
        let (entry, visible) = {
            let mut state = self.lock();
            let found = state.entries.get(&handle).cloned();
            let entry = match found {
                Some(entry) => entry,
                None => {
                    state.stats.failed_lookups += 1;
                    return Err(RegistryError::UnknownCallback(handle));
                }
            };

            let visible = if length <= args.len() {
                length
            } else if handle.is_sentinel() {
                args.len()
            } else {
                return Err(RegistryError::InvalidBuffer(format!(
                    "length {} exceeds the {} byte(s) provided",
                    length,
                    args.len()
                )));
            };

            if entry.disposal.is_auto() {
                state.entries.remove(&handle);
                state.stats.auto_disposed += 1;
            }
            state.stats.invocations += 1;
            (entry, visible)
        };

        if self.config.trace_calls {
            log::trace!("Invoking callback {} with {} byte(s)", handle, visible);
        }

        entry
            .callback
            .invoke(self, ArgBuffer::new(&mut args[..visible]))
    }

    /// Remove the entry for `handle`
    ///
    /// Disposing an absent handle is a no-op. Returns whether an entry was
    /// removed.
    pub fn dispose(&self, handle: Handle) -> bool {
        let removed = {
            let mut state = self.lock();
            let removed = state.entries.remove(&handle).is_some();
            if removed {
                state.stats.disposed += 1;
            }
            removed
        };

        if removed {
            log::debug!("Disposed callback {}", handle);
        }
        removed
    }

    /// True if `handle` currently resolves to an entry
    pub fn contains(&self, handle: Handle) -> bool {
        self.lock().entries.contains_key(&handle)
    }

    /// Number of live entries, sentinel included
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the activity counters
    pub fn stats(&self) -> RegistryStats {
        let state = self.lock();
        RegistryStats {
            live_entries: state.entries.len(),
            ..state.stats
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // User code never runs under this lock, so poisoning carries no torn state
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("stats", &self.stats())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{pack_i32s, unpack_i32s};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn no_args() -> Vec<u8> {
        Vec::new()
    }

    #[test]
    fn test_new_registry_holds_only_sentinel() {
        let registry = CallbackRegistry::new();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(Handle::SENTINEL));
        assert_eq!(registry.stats().wrapped, 0);
    }

    #[test]
    fn test_first_handle_is_one() {
        let registry = CallbackRegistry::new();
        let handle = registry.wrap_once(|_, _| Ok(42)).unwrap();
        assert_eq!(handle, Handle::from_raw(1));

        let mut args = no_args();
        assert_eq!(registry.call(handle, &mut args, 0).unwrap(), 42);
        assert_eq!(
            registry.call(handle, &mut args, 0),
            Err(RegistryError::UnknownCallback(handle))
        );
        assert_eq!(
            registry.call(Handle::SENTINEL, &mut args, 0),
            Err(RegistryError::SentinelInvoked)
        );
    }

    #[test]
    fn test_sentinel_fails_regardless_of_args() {
        let registry = CallbackRegistry::new();
        let mut args = pack_i32s(&[1, 2, 3]);
        let len = args.len();
        assert_eq!(
            registry.call(Handle::SENTINEL, &mut args, len),
            Err(RegistryError::SentinelInvoked)
        );
        // Sentinel is persistent
        assert!(registry.contains(Handle::SENTINEL));
    }

    #[test]
    fn test_sentinel_wins_over_oversized_length() {
        let registry = CallbackRegistry::new();
        let mut args = no_args();
        assert_eq!(
            registry.call(Handle::SENTINEL, &mut args, 4),
            Err(RegistryError::SentinelInvoked)
        );
        assert_eq!(registry.stats().invocations, 1);
    }

    #[test]
    fn test_unknown_handle_wins_over_oversized_length() {
        let registry = CallbackRegistry::new();
        let mut args = no_args();
        let handle = Handle::from_raw(9);
        assert_eq!(
            registry.call(handle, &mut args, 4),
            Err(RegistryError::UnknownCallback(handle))
        );
        assert_eq!(registry.stats().failed_lookups, 1);
    }

    #[test]
    fn test_rejected_buffer_keeps_auto_entry() {
        let registry = CallbackRegistry::new();
        let handle = registry.wrap_once(|_, args| Ok(args.len() as i32)).unwrap();

        let mut bytes = vec![0u8; 4];
        assert!(matches!(
            registry.call(handle, &mut bytes, 8),
            Err(RegistryError::InvalidBuffer(_))
        ));
        assert!(registry.contains(handle));
        assert_eq!(registry.stats().invocations, 0);

        assert_eq!(registry.call(handle, &mut bytes, 4).unwrap(), 4);
        assert!(!registry.contains(handle));
    }

    #[test]
    fn test_disposed_sentinel_is_unknown() {
        let registry = CallbackRegistry::new();
        assert!(registry.dispose(Handle::SENTINEL));
        let mut args = no_args();
        assert_eq!(
            registry.call(Handle::SENTINEL, &mut args, 0),
            Err(RegistryError::UnknownCallback(Handle::SENTINEL))
        );
    }

    #[test]
    fn test_handles_are_never_reused() {
        let registry = CallbackRegistry::new();
        let mut seen = HashSet::new();
        seen.insert(Handle::SENTINEL);

        for _ in 0..100 {
            let handle = registry.wrap_persistent(|_, _| Ok(0)).unwrap();
            assert!(seen.insert(handle), "handle {} handed out twice", handle);
            registry.dispose(handle);
        }
    }

    #[test]
    fn test_unregistered_handle_is_unknown() {
        let registry = CallbackRegistry::new();
        let mut args = no_args();
        let handle = Handle::from_raw(5);
        assert_eq!(
            registry.call(handle, &mut args, 0),
            Err(RegistryError::UnknownCallback(handle))
        );
        assert_eq!(registry.stats().failed_lookups, 1);
    }

    #[test]
    fn test_persistent_callback_until_disposed() {
        let registry = CallbackRegistry::new();
        let counter = Arc::new(AtomicI32::new(0));
        let seen = Arc::clone(&counter);
        let handle = registry
            .wrap_persistent(move |_, _| Ok(seen.fetch_add(1, Ordering::SeqCst) + 1))
            .unwrap();

        let mut args = no_args();
        for expected in 1..=5 {
            assert_eq!(registry.call(handle, &mut args, 0).unwrap(), expected);
        }

        assert!(registry.dispose(handle));
        assert_eq!(
            registry.call(handle, &mut args, 0),
            Err(RegistryError::UnknownCallback(handle))
        );
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let registry = CallbackRegistry::new();
        let handle = registry.wrap_persistent(|_, _| Ok(1)).unwrap();

        assert!(registry.dispose(handle));
        let after_first = registry.stats();
        assert!(!registry.dispose(handle));
        assert!(!registry.dispose(Handle::from_raw(999)));
        assert_eq!(registry.stats(), after_first);
    }

    #[test]
    fn test_auto_dispose_happens_before_invocation() {
        let registry = CallbackRegistry::new();
        let handle = registry
            .wrap_once(|registry, _| {
                // Our own handle is already gone
                let self_handle = Handle::from_raw(1);
                assert!(!registry.contains(self_handle));
                let mut args = Vec::new();
                match registry.call(self_handle, &mut args, 0) {
                    Err(RegistryError::UnknownCallback(_)) => Ok(7),
                    other => Err(RegistryError::CallbackFailed(format!(
                        "unexpected re-entrant result: {:?}",
                        other
                    ))),
                }
            })
            .unwrap();
        assert_eq!(handle, Handle::from_raw(1));

        let mut args = no_args();
        assert_eq!(registry.call(handle, &mut args, 0).unwrap(), 7);
    }

    #[test]
    fn test_auto_dispose_even_when_callback_fails() {
        let registry = CallbackRegistry::new();
        let handle = registry
            .wrap_once(|_, _| Err(RegistryError::CallbackFailed("boom".to_string())))
            .unwrap();

        let mut args = no_args();
        assert_eq!(
            registry.call(handle, &mut args, 0),
            Err(RegistryError::CallbackFailed("boom".to_string()))
        );
        assert!(!registry.contains(handle));
    }

    #[test]
    fn test_prefix_sum_callback_mutates_shared_buffer() {
        let registry = CallbackRegistry::new();
        let handle = registry
            .wrap_once(|_, mut args| {
                let mut values = args.read_i32s()?;
                for i in 1..values.len() {
                    values[i] = values[i].wrapping_add(values[i - 1]);
                }
                args.write_i32s(&values)?;
                Ok(values.len() as i32)
            })
            .unwrap();

        let mut bytes = pack_i32s(&[100, 200, 300, -1000]);
        let len = bytes.len();
        assert_eq!(registry.call(handle, &mut bytes, len).unwrap(), 4);
        assert_eq!(unpack_i32s(&bytes).unwrap(), vec![100, 300, 600, -400]);
    }

    #[test]
    fn test_length_limits_visible_region() {
        let registry = CallbackRegistry::new();
        let handle = registry
            .wrap_persistent(|_, args| Ok(args.len() as i32))
            .unwrap();

        let mut bytes = vec![0u8; 16];
        assert_eq!(registry.call(handle, &mut bytes, 8).unwrap(), 8);
        assert!(matches!(
            registry.call(handle, &mut bytes, 17),
            Err(RegistryError::InvalidBuffer(_))
        ));
        // A rejected buffer does not consume the entry
        assert!(registry.contains(handle));
    }

    #[test]
    fn test_recursive_calls_on_other_handles() {
        let registry = CallbackRegistry::new();
        let counter = Arc::new(AtomicI32::new(0));

        let inner_counter = Arc::clone(&counter);
        let inner = registry
            .wrap_persistent(move |_, _| Ok(inner_counter.fetch_add(1, Ordering::SeqCst) + 1))
            .unwrap();

        let outer_counter = Arc::clone(&counter);
        let outer = registry
            .wrap_once(move |registry, mut args| {
                let first = registry.call(inner, args.as_bytes_mut(), 0)?;
                let second = registry.call(inner, args.as_bytes_mut(), 0)?;
                // Mutations made by the nested calls are visible here
                assert_eq!(outer_counter.load(Ordering::SeqCst), 2);
                Ok(first + second)
            })
            .unwrap();

        let mut args = no_args();
        assert_eq!(registry.call(outer, &mut args, 0).unwrap(), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_nested_errors_propagate_unchanged() {
        let registry = CallbackRegistry::new();
        let outer = registry
            .wrap_once(|registry, mut args| registry.call(Handle::SENTINEL, args.as_bytes_mut(), 0))
            .unwrap();

        let mut args = no_args();
        assert_eq!(
            registry.call(outer, &mut args, 0),
            Err(RegistryError::SentinelInvoked)
        );
    }

    #[test]
    fn test_deep_recursion_chain() {
        let registry = CallbackRegistry::new();

        // Each level re-registers the next one until depth reaches zero
        fn descend(registry: &CallbackRegistry, depth: i32) -> Result<i32> {
            if depth == 0 {
                return Ok(0);
            }
            let handle = registry.wrap_once(move |registry, _| descend(registry, depth - 1))?;
            let mut args = Vec::new();
            Ok(registry.call(handle, &mut args, 0)? + 1)
        }

        assert_eq!(descend(&registry, 300).unwrap(), 300);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.stats().auto_disposed, 300);
    }

    #[test]
    fn test_handle_exhaustion_leaves_state_unchanged() {
        let registry = CallbackRegistry::new();
        registry.lock().next_handle = u64::MAX;

        assert_eq!(
            registry.wrap_once(|_, _| Ok(0)),
            Err(RegistryError::HandleSpaceExhausted)
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.stats().wrapped, 0);
    }

    #[test]
    fn test_concurrent_wraps_are_distinct() {
        let registry = Arc::new(CallbackRegistry::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    (0..250)
                        .map(|_| registry.wrap_persistent(|_, _| Ok(0)).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = HashSet::new();
        for thread in threads {
            for handle in thread.join().unwrap() {
                assert!(all.insert(handle));
                assert!(registry.contains(handle));
            }
        }
        assert_eq!(all.len(), 2000);
        assert!(!all.contains(&Handle::SENTINEL));
    }

    #[test]
    fn test_struct_callback() {
        struct Doubler;

        impl Callback for Doubler {
            fn invoke(&self, _registry: &CallbackRegistry, args: ArgBuffer<'_>) -> Result<i32> {
                Ok(args.read_i32(0)? * 2)
            }
        }

        let registry = CallbackRegistry::new();
        let handle = registry
            .wrap_callback(Arc::new(Doubler), Disposal::Persistent)
            .unwrap();
        let mut bytes = pack_i32s(&[21]);
        assert_eq!(registry.call(handle, &mut bytes, 4).unwrap(), 42);
    }
}
