//! Native module loading from private copies.
//!
//! A module file is never mapped directly. [`NativeLoader`] copies it to
//! a uniquely named sibling (`<path>.<secs>.<n>.tmp`) and maps the copy,
//! so a build can overwrite the original while the old code keeps
//! running. [`NativeImage::reload`] repeats the copy for the rebuilt file
//! and falls back to the previous copy if that fails.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hearth_core::abi::EntryPointFn;
use hearth_core::{LoadError, ModuleApi, ModuleImage, ModuleLoader, ReloadOutcome};
use libloading::Library;

use crate::native::NativeModuleApi;

/// Distinguishes copies made within the same second.
static COPY_COUNTER: AtomicU64 = AtomicU64::new(0);

/// [`ModuleLoader`] for native dynamic libraries.
#[derive(Clone, Debug)]
pub struct NativeLoader {
    settle_delay: Duration,
}

impl NativeLoader {
    /// Pause between unmapping a module and copying its rebuilt file,
    /// giving the OS time to drop file locks: 50 ms.
    pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(50);

    /// Loader with the default settle delay.
    pub fn new() -> Self {
        Self::with_settle_delay(Self::DEFAULT_SETTLE_DELAY)
    }

    /// Loader with a custom settle delay.
    pub fn with_settle_delay(settle_delay: Duration) -> Self {
        Self { settle_delay }
    }

    /// Map the module at `path` through a private copy.
    pub fn open(&self, path: &Path) -> Result<NativeImage, LoadError> {
        let stamp = modified(path);
        let (copy_path, library) = map_private_copy(path)?;
        tracing::info!(path = %path.display(), copy = %copy_path.display(), "Loaded module");
        Ok(NativeImage {
            path: path.to_path_buf(),
            copy_path,
            library: Some(library),
            stamp,
            settle_delay: self.settle_delay,
        })
    }
}

impl Default for NativeLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleLoader for NativeLoader {
    fn load(&mut self, path: &Path) -> Result<Box<dyn ModuleImage>, LoadError> {
        self.open(path).map(|image| Box::new(image) as Box<dyn ModuleImage>)
    }
}

/// One native module, mapped from a private copy of its file.
///
/// Dropping the image unmaps the library and deletes the copy.
pub struct NativeImage {
    path: PathBuf,
    copy_path: PathBuf,
    library: Option<Library>,
    /// Modification time of `path` when the current code was copied.
    stamp: Option<SystemTime>,
    settle_delay: Duration,
}

impl NativeImage {
    /// The private copy currently mapped (or last mapped).
    pub fn copy_path(&self) -> &Path {
        &self.copy_path
    }

    /// Whether code is currently mapped.
    pub fn is_loaded(&self) -> bool {
        self.library.is_some()
    }
}

impl ModuleImage for NativeImage {
    fn path(&self) -> &Path {
        &self.path
    }

    #[allow(unsafe_code)]
    fn entry_point(&self, symbol: &str) -> Result<Box<dyn ModuleApi>, LoadError> {
        let library = self.library.as_ref().ok_or_else(|| LoadError::NotLoaded {
            path: self.path.clone(),
        })?;
        // SAFETY: every module exports `symbol` with the `EntryPointFn`
        // signature; that is the module ABI.
        let entry = unsafe { library.get::<EntryPointFn>(symbol.as_bytes()) }.map_err(|e| {
            LoadError::MissingSymbol {
                symbol: symbol.to_string(),
                reason: e.to_string(),
            }
        })?;
        // SAFETY: as above; the accessor takes no arguments.
        let vtable = unsafe { entry() };
        let vtable = NonNull::new(vtable).ok_or_else(|| LoadError::NullVTable {
            symbol: symbol.to_string(),
        })?;
        Ok(Box::new(NativeModuleApi::new(vtable, &module_stem(&self.path))))
    }

    fn needs_reload(&self) -> bool {
        match (modified(&self.path), self.stamp) {
            (Some(now), Some(then)) => now > then,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    fn reload(&mut self) -> Result<ReloadOutcome, LoadError> {
        tracing::info!(path = %self.path.display(), "Reloading module");
        drop(self.library.take());
        thread::sleep(self.settle_delay);

        let stamp = modified(&self.path);
        match map_private_copy(&self.path) {
            Ok((copy_path, library)) => {
                let old_copy = std::mem::replace(&mut self.copy_path, copy_path);
                self.library = Some(library);
                self.stamp = stamp;
                remove_copy(&old_copy);
                tracing::info!(copy = %self.copy_path.display(), "Module reloaded");
                Ok(ReloadOutcome::Upgraded)
            }
            Err(reason) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %reason,
                    "Reload failed; attempting previous copy"
                );
                let library = open_library(&self.copy_path).inspect_err(|e| {
                    tracing::error!(copy = %self.copy_path.display(), error = %e, "Previous copy failed to load");
                })?;
                self.library = Some(library);
                tracing::warn!(copy = %self.copy_path.display(), "Reloaded previous version");
                Ok(ReloadOutcome::FellBack { reason })
            }
        }
    }
}

impl Drop for NativeImage {
    fn drop(&mut self) {
        drop(self.library.take());
        remove_copy(&self.copy_path);
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn module_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// `<path>.<unix secs>.<counter>.tmp`
fn private_copy_path(path: &Path) -> PathBuf {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    let n = COPY_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{secs}.{n}.tmp"));
    PathBuf::from(name)
}

fn map_private_copy(path: &Path) -> Result<(PathBuf, Library), LoadError> {
    let copy_path = private_copy_path(path);
    fs::copy(path, &copy_path).map_err(|e| LoadError::Copy {
        from: path.to_path_buf(),
        to: copy_path.clone(),
        reason: e.to_string(),
    })?;
    match open_library(&copy_path) {
        Ok(library) => Ok((copy_path, library)),
        Err(e) => {
            remove_copy(&copy_path);
            Err(e)
        }
    }
}

#[allow(unsafe_code)]
fn open_library(path: &Path) -> Result<Library, LoadError> {
    // SAFETY: loading runs the library's initialisers. Module files are
    // trusted code built against this host's ABI.
    unsafe { Library::new(path) }.map_err(|e| LoadError::Open {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn remove_copy(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        tracing::debug!(copy = %path.display(), error = %e, "Could not remove module copy");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(dir: &Path) -> Vec<PathBuf> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn copy_paths_are_unique_siblings() {
        let path = Path::new("/tmp/game.so");
        let a = private_copy_path(path);
        let b = private_copy_path(path);
        assert_ne!(a, b);
        assert_eq!(a.parent(), path.parent());
        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("game.so."));
        assert!(name.ends_with(".tmp"));
    }

    #[test]
    fn missing_file_is_a_copy_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = NativeLoader::new()
            .open(&dir.path().join("absent.so"))
            .err()
            .unwrap();
        assert!(matches!(err, LoadError::Copy { .. }));
        assert!(entries(dir.path()).is_empty());
    }

    #[test]
    fn non_library_fails_to_open_and_leaves_no_copy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.so");
        fs::write(&path, b"not a shared object").unwrap();
        let err = NativeLoader::new().open(&path).err().unwrap();
        assert!(matches!(err, LoadError::Open { .. }));
        assert_eq!(entries(dir.path()), vec![path]);
    }

    #[test]
    fn modification_time_is_compared_against_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.so");
        fs::write(&path, b"v1").unwrap();
        let then = modified(&path).unwrap();

        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(then + Duration::from_secs(5)).unwrap();
        let now = modified(&path).unwrap();
        assert!(now > then);
        assert!(modified(&dir.path().join("gone.so")).is_none());
    }

    #[test]
    fn stem_names_unnamed_modules() {
        assert_eq!(module_stem(Path::new("mods/physics.so")), "physics");
    }

    // ── Reload against a real shared object ─────────────────────────

    #[cfg(target_os = "linux")]
    mod reload {
        use super::*;
        use hearth_core::abi::ENTRY_SYMBOL;

        const SYSTEM_LIBRARIES: &[&str] = &[
            "/lib/x86_64-linux-gnu/libm.so.6",
            "/usr/lib/x86_64-linux-gnu/libm.so.6",
            "/lib/aarch64-linux-gnu/libm.so.6",
            "/usr/lib64/libm.so.6",
            "/usr/lib/libm.so.6",
        ];

        fn system_library() -> Option<PathBuf> {
            SYSTEM_LIBRARIES
                .iter()
                .map(PathBuf::from)
                .find(|p| p.is_file())
        }

        /// Copy a system library into `dir` to stand in for a built module.
        fn stage(dir: &Path) -> Option<PathBuf> {
            let source = system_library()?;
            let path = dir.join("libmodule.so");
            fs::copy(source, &path).unwrap();
            Some(path)
        }

        fn rebuild_from(source: &Path, path: &Path, by: Duration) {
            fs::copy(source, path).unwrap();
            push_mtime(path, by);
        }

        fn push_mtime(path: &Path, by: Duration) {
            let then = modified(path).unwrap();
            let file = fs::File::options().write(true).open(path).unwrap();
            file.set_modified(then + by).unwrap();
        }

        fn loader() -> NativeLoader {
            NativeLoader::with_settle_delay(Duration::ZERO)
        }

        fn sorted(mut paths: Vec<PathBuf>) -> Vec<PathBuf> {
            paths.sort();
            paths
        }

        #[test]
        fn upgrade_replaces_the_private_copy() {
            let dir = tempfile::tempdir().unwrap();
            let Some(path) = stage(dir.path()) else {
                return;
            };
            let mut image = loader().open(&path).unwrap();
            let first = image.copy_path().to_path_buf();
            assert!(image.is_loaded());
            assert!(!image.needs_reload());
            assert_eq!(entries(dir.path()), sorted(vec![path.clone(), first.clone()]));

            push_mtime(&path, Duration::from_secs(5));
            assert!(image.needs_reload());
            assert_eq!(image.reload(), Ok(ReloadOutcome::Upgraded));
            assert!(image.is_loaded());
            assert!(!image.needs_reload());
            assert!(!first.exists());
            assert_ne!(image.copy_path(), first);
            assert_eq!(
                entries(dir.path()),
                sorted(vec![path, image.copy_path().to_path_buf()])
            );
        }

        #[test]
        fn missing_original_falls_back_to_previous_copy() {
            let dir = tempfile::tempdir().unwrap();
            let Some(path) = stage(dir.path()) else {
                return;
            };
            let mut image = loader().open(&path).unwrap();
            let copy = image.copy_path().to_path_buf();

            fs::remove_file(&path).unwrap();
            assert!(!image.needs_reload());
            let outcome = image.reload().unwrap();
            assert!(matches!(
                outcome,
                ReloadOutcome::FellBack {
                    reason: LoadError::Copy { .. }
                }
            ));
            assert!(image.is_loaded());
            assert_eq!(image.copy_path(), copy);
            assert_eq!(entries(dir.path()), vec![copy]);
        }

        #[test]
        fn broken_rebuild_falls_back_and_keeps_the_old_stamp() {
            let dir = tempfile::tempdir().unwrap();
            let Some(path) = stage(dir.path()) else {
                return;
            };
            let mut image = loader().open(&path).unwrap();
            let copy = image.copy_path().to_path_buf();

            fs::write(&path, b"half-written build").unwrap();
            push_mtime(&path, Duration::from_secs(5));
            let outcome = image.reload().unwrap();
            assert!(matches!(
                outcome,
                ReloadOutcome::FellBack {
                    reason: LoadError::Open { .. }
                }
            ));
            assert!(image.is_loaded());
            assert!(image.needs_reload());
            assert_eq!(entries(dir.path()), sorted(vec![path.clone(), copy.clone()]));

            // The next good build upgrades normally.
            let source = system_library().unwrap();
            rebuild_from(&source, &path, Duration::from_secs(10));
            assert_eq!(image.reload(), Ok(ReloadOutcome::Upgraded));
            assert!(!image.needs_reload());
            assert!(!copy.exists());
        }

        #[test]
        fn losing_both_copies_leaves_nothing_mapped() {
            let dir = tempfile::tempdir().unwrap();
            let Some(path) = stage(dir.path()) else {
                return;
            };
            let mut image = loader().open(&path).unwrap();
            fs::remove_file(&path).unwrap();
            fs::remove_file(image.copy_path()).unwrap();

            assert!(matches!(image.reload(), Err(LoadError::Open { .. })));
            assert!(!image.is_loaded());
            assert!(matches!(
                image.entry_point(ENTRY_SYMBOL),
                Err(LoadError::NotLoaded { .. })
            ));
        }

        #[test]
        fn library_without_entry_point_is_reported() {
            let dir = tempfile::tempdir().unwrap();
            let Some(path) = stage(dir.path()) else {
                return;
            };
            let image = loader().open(&path).unwrap();
            assert!(matches!(
                image.entry_point(ENTRY_SYMBOL),
                Err(LoadError::MissingSymbol { .. })
            ));
        }

        #[test]
        fn drop_unmaps_and_deletes_the_copy() {
            let dir = tempfile::tempdir().unwrap();
            let Some(path) = stage(dir.path()) else {
                return;
            };
            let mut image = loader().open(&path).unwrap();
            push_mtime(&path, Duration::from_secs(5));
            image.reload().unwrap();
            assert_eq!(entries(dir.path()).len(), 2);

            drop(image);
            assert_eq!(entries(dir.path()), vec![path]);
        }
    }
}
