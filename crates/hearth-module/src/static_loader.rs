//! Modules linked into the host binary.
//!
//! Builds without hot reload register each module's constructor under
//! the path it would otherwise be loaded from. The manager then drives
//! them exactly like native modules.

use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use hearth_core::{LoadError, ModuleApi, ModuleImage, ModuleLoader, ReloadOutcome};
use indexmap::IndexMap;

type Constructor = Rc<dyn Fn() -> Box<dyn ModuleApi>>;

/// [`ModuleLoader`] over a manifest of statically linked modules.
///
/// Registration order is preserved, so [`paths`](Self::paths) lists
/// modules in the order a host would load them.
#[derive(Default)]
pub struct StaticLoader {
    manifest: IndexMap<PathBuf, Constructor>,
}

impl StaticLoader {
    /// Empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `constructor` under `path`, replacing any earlier entry.
    pub fn register<F>(&mut self, path: impl Into<PathBuf>, constructor: F) -> &mut Self
    where
        F: Fn() -> Box<dyn ModuleApi> + 'static,
    {
        self.manifest.insert(path.into(), Rc::new(constructor));
        self
    }

    /// Registered paths in registration order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.manifest.keys().map(PathBuf::as_path)
    }

    /// Number of registered modules.
    pub fn len(&self) -> usize {
        self.manifest.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.manifest.is_empty()
    }
}

impl fmt::Debug for StaticLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticLoader")
            .field("paths", &self.manifest.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModuleLoader for StaticLoader {
    fn load(&mut self, path: &Path) -> Result<Box<dyn ModuleImage>, LoadError> {
        let constructor = self
            .manifest
            .get(path)
            .ok_or_else(|| LoadError::UnknownModule {
                path: path.to_path_buf(),
            })?;
        tracing::debug!(path = %path.display(), "Resolved static module");
        Ok(Box::new(StaticImage {
            path: path.to_path_buf(),
            constructor: Rc::clone(constructor),
        }))
    }
}

/// Linked code never changes, so a static image never needs reloading.
struct StaticImage {
    path: PathBuf,
    constructor: Constructor,
}

impl ModuleImage for StaticImage {
    fn path(&self) -> &Path {
        &self.path
    }

    fn entry_point(&self, _symbol: &str) -> Result<Box<dyn ModuleApi>, LoadError> {
        Ok((self.constructor)())
    }

    fn needs_reload(&self) -> bool {
        false
    }

    fn reload(&mut self) -> Result<ReloadOutcome, LoadError> {
        Ok(ReloadOutcome::Upgraded)
    }
}
