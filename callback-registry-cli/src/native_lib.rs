//! Loading external native modules
//!
//! An external module is any shared library exporting a `cbr_invoke` entry
//! point with the signature of [`NativeInvokeFn`]. Workloads then reach the
//! registry through that library instead of the bundled C module.

use crate::callbacks::Route;
use anyhow::{Context, Result};
use callback_registry::native::INVOKE_SYMBOL;
use callback_registry::NativeInvokeFn;
use libloading::Library;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A loaded native module
///
/// Shared through an `Arc`: every [`Route`] built from it holds a reference,
/// so the module stays mapped as long as any route can still call into it.
pub struct NativeLibrary {
    path: PathBuf,
    entry: NativeInvokeFn,
    _library: Library,
}

impl NativeLibrary {
    /// Load `path` and resolve its `cbr_invoke` symbol
    pub fn load(path: &Path) -> Result<Arc<Self>> {
        log::info!("Loading native library: {:?}", path);

        // SAFETY: loading runs the library's initializers; the user asked for
        // this library explicitly
        let library = unsafe { Library::new(path) }
            .with_context(|| format!("Failed to load native library: {:?}", path))?;

        let entry = {
            // SAFETY: the symbol is declared with the cbr_invoke signature
            // shared by every native module
            let symbol = unsafe { library.get::<NativeInvokeFn>(INVOKE_SYMBOL) }
                .with_context(|| format!("Missing cbr_invoke in native library: {:?}", path))?;
            // Stays valid while `_library` is alive, which `entry()` callers
            // guarantee by borrowing `self`
            *symbol
        };

        log::debug!("Resolved cbr_invoke in {:?}", path);
        Ok(Arc::new(Self {
            path: path.to_path_buf(),
            entry,
            _library: library,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entry point, valid for as long as `self` is borrowed
    pub fn entry(&self) -> NativeInvokeFn {
        self.entry
    }

    /// Route through this library, keeping it loaded while the route lives
    pub fn route(self: &Arc<Self>) -> Route {
        Route::External(Arc::clone(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callback_registry::{pack_i32s, CallbackRegistry, Handle, RegistryError};

    /// Shared build of the bundled C module, when the build script could make one
    fn external_module() -> Option<&'static Path> {
        option_env!("CBR_EXTERNAL_MODULE").map(Path::new)
    }

    #[test]
    fn test_missing_library_is_an_error() {
        let err = NativeLibrary::load(Path::new("/nonexistent/libcbr_external.so"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("Failed to load native library"));
    }

    #[test]
    fn test_external_route_round_trip() {
        let Some(path) = external_module() else {
            return;
        };
        let library = NativeLibrary::load(path).unwrap();
        let route = library.route();
        assert_eq!(route.to_string(), "external-native");

        let registry = CallbackRegistry::new();
        let handle = registry
            .wrap_once(|_, args| Ok(args.read_i32s()?.iter().sum()))
            .unwrap();
        let mut bytes = pack_i32s(&[100, 200, 300, -1000]);
        assert_eq!(route.invoke(&registry, handle, &mut bytes).unwrap(), -400);
        assert_eq!(
            route.invoke(&registry, Handle::SENTINEL, &mut []),
            Err(RegistryError::SentinelInvoked)
        );
    }

    #[test]
    fn test_route_keeps_library_loaded() {
        let Some(path) = external_module() else {
            return;
        };
        let library = NativeLibrary::load(path).unwrap();
        let route = library.route();
        assert_eq!(Arc::strong_count(&library), 2);
        drop(library);

        let registry = CallbackRegistry::new();
        let handle = registry.wrap_once(|_, _| Ok(7)).unwrap();
        assert_eq!(route.invoke(&registry, handle, &mut []).unwrap(), 7);

        let copy = route.clone();
        drop(route);
        let handle = registry.wrap_once(|_, _| Ok(8)).unwrap();
        assert_eq!(copy.invoke(&registry, handle, &mut []).unwrap(), 8);
    }
}
