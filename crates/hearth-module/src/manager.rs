//! The module table and its lifecycle operations.

use std::fmt;
use std::path::{Path, PathBuf};

use hearth_core::{
    HostServices, LoadError, ModuleApi, ModuleImage, ModuleLoader, ModuleState, ReloadOutcome,
};

use crate::config::ManagerConfig;
use crate::error::ModuleError;

/// Position of a module in the manager's table, in load order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleIndex(pub usize);

impl ModuleIndex {
    /// The raw slot index.
    pub fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for ModuleIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module#{}", self.0)
    }
}

/// Where a slot is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModulePhase {
    /// Running its most recently loaded code.
    Active,
    /// Running, but the last reload fell back to the previous code.
    Stale,
    /// Unloaded; the slot stays reserved.
    Unloaded,
}

impl ModulePhase {
    /// Whether the module is running (fresh or stale code).
    pub fn is_running(self) -> bool {
        !matches!(self, Self::Unloaded)
    }
}

/// Snapshot of one slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleInfo {
    /// The slot.
    pub index: ModuleIndex,
    /// Display name reported by the module.
    pub name: String,
    /// Version reported by the module's current code.
    pub version: u32,
    /// The original module path.
    pub path: PathBuf,
    /// Lifecycle phase.
    pub phase: ModulePhase,
}

/// Counts from one [`ModuleManager::check_reload_all`] pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReloadReport {
    /// Modules now running freshly loaded code.
    pub upgraded: usize,
    /// Modules whose fresh code failed to map and kept their old code.
    pub fell_back: usize,
    /// Modules left with no code at all and unloaded.
    pub failed: usize,
}

impl ReloadReport {
    /// Whether no module was reloaded.
    pub fn is_empty(&self) -> bool {
        self.upgraded + self.fell_back + self.failed == 0
    }
}

/// Code, state and mapping of a running module.
///
/// Field order is drop order: the API borrows code from the image and
/// must go first.
struct Live {
    api: Box<dyn ModuleApi>,
    state: ModuleState,
    image: Box<dyn ModuleImage>,
}

struct Slot {
    path: PathBuf,
    name: String,
    version: u32,
    stale: bool,
    live: Option<Live>,
}

impl Slot {
    fn phase(&self) -> ModulePhase {
        match (&self.live, self.stale) {
            (None, _) => ModulePhase::Unloaded,
            (Some(_), true) => ModulePhase::Stale,
            (Some(_), false) => ModulePhase::Active,
        }
    }
}

/// Owner of every loaded module.
///
/// Modules live in an append-only table of at most
/// [`capacity`](ManagerConfig::capacity) slots. A slot is either fully
/// running (code mapped, interface resolved, state held) or fully
/// unloaded; no operation leaves one half-built.
///
/// The host services table is boxed so modules can keep pointers to it
/// for the manager's whole lifetime.
///
/// # Lifecycle
///
/// 1. [`new`](Self::new), then [`init`](Self::init).
/// 2. [`load`](Self::load) each module.
/// 3. Per frame: [`check_reload_all`](Self::check_reload_all),
///    [`update_all`](Self::update_all), [`render_all`](Self::render_all).
/// 4. [`shutdown`](Self::shutdown) (or drop) unloads newest-first.
pub struct ModuleManager {
    config: ManagerConfig,
    loader: Box<dyn ModuleLoader>,
    services: Box<HostServices>,
    slots: Vec<Slot>,
    initialized: bool,
}

impl ModuleManager {
    /// Create an uninitialised manager.
    pub fn new(
        config: ManagerConfig,
        loader: Box<dyn ModuleLoader>,
        services: HostServices,
    ) -> Self {
        Self {
            config,
            loader,
            services: Box::new(services),
            slots: Vec::new(),
            initialized: false,
        }
    }

    /// Prepare an empty table.
    ///
    /// Calling this on an initialised manager logs a warning and leaves
    /// every loaded module in place.
    pub fn init(&mut self) {
        if self.initialized {
            tracing::warn!("Module manager already initialized");
            return;
        }
        self.slots.clear();
        self.initialized = true;
        tracing::info!(capacity = self.config.capacity, "Module manager initialized");
    }

    /// Whether [`init`](Self::init) has run and [`shutdown`](Self::shutdown)
    /// has not.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The configuration in use.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The service tables handed to modules.
    pub fn services(&self) -> &HostServices {
        &self.services
    }

    /// Load, resolve and initialise the module at `path`.
    ///
    /// On failure nothing is registered: a mapped image is unloaded and
    /// an interface obtained from it is dropped first.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<ModuleIndex, ModuleError> {
        let path = path.as_ref();
        if !self.initialized {
            tracing::error!(path = %path.display(), "Module manager not initialized");
            return Err(ModuleError::NotInitialized);
        }
        if self.slots.len() >= self.config.capacity {
            tracing::error!(capacity = self.config.capacity, "Maximum modules loaded");
            return Err(ModuleError::TableFull {
                capacity: self.config.capacity,
            });
        }
        let len = path.as_os_str().len();
        if len > self.config.max_path_len {
            tracing::error!(len, max = self.config.max_path_len, "Module path too long");
            return Err(ModuleError::PathTooLong {
                len,
                max: self.config.max_path_len,
            });
        }

        let image = self.loader.load(path).map_err(|source| {
            tracing::error!(path = %path.display(), error = %source, "Failed to load module");
            ModuleError::LoadFailed {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let api = image
            .entry_point(&self.config.entry_symbol)
            .map_err(|source| {
                tracing::error!(path = %path.display(), error = %source, "Module entry point unavailable");
                entry_point_error(path, source)
            })?;
        let state = match api.init(&self.services) {
            Ok(state) => state,
            Err(source) => {
                tracing::error!(path = %path.display(), error = %source, "Module init failed");
                drop(api);
                drop(image);
                return Err(ModuleError::InitFailed {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let index = ModuleIndex(self.slots.len());
        let name = api.name().to_string();
        let version = api.version();
        tracing::info!(%index, %name, version, path = %path.display(), "Loaded module");
        self.slots.push(Slot {
            path: path.to_path_buf(),
            name,
            version,
            stale: false,
            live: Some(Live { api, state, image }),
        });
        Ok(index)
    }

    /// Shut down and unmap one module.
    ///
    /// The module's `shutdown` receives its state back. The slot stays
    /// reserved. Unknown or already unloaded slots are reported and
    /// otherwise ignored.
    pub fn unload(&mut self, index: ModuleIndex) -> Result<(), ModuleError> {
        let Some(slot) = self.slots.get_mut(index.0) else {
            tracing::warn!(%index, "Invalid module index");
            return Err(ModuleError::InvalidIndex { index: index.0 });
        };
        let Some(live) = slot.live.take() else {
            tracing::warn!(%index, "Module already unloaded");
            return Err(ModuleError::NotActive { index: index.0 });
        };
        slot.stale = false;
        tracing::info!(%index, name = %slot.name, "Unloading module");
        retire(live);
        Ok(())
    }

    /// Unload every running module, newest first, and empty the table.
    pub fn shutdown(&mut self) {
        if !self.initialized {
            return;
        }
        for index in (0..self.slots.len()).rev() {
            if self.slots[index].live.is_some() {
                let _ = self.unload(ModuleIndex(index));
            }
        }
        self.slots.clear();
        self.initialized = false;
        tracing::info!("Module manager shutdown");
    }

    /// Advance every running module by `dt` seconds, in load order.
    pub fn update_all(&mut self, dt: f32) {
        for live in self.slots.iter_mut().filter_map(|s| s.live.as_mut()) {
            live.api.update(&mut live.state, dt);
        }
    }

    /// Render every running module, in load order.
    pub fn render_all(&mut self) {
        for live in self.slots.iter_mut().filter_map(|s| s.live.as_mut()) {
            live.api.render(&mut live.state);
        }
    }

    /// Reload every running module whose file changed since it was mapped.
    ///
    /// A reload keeps the module's state: the old interface is dropped,
    /// the image swaps its code, the interface is resolved again and
    /// rebound to the host services, and the same state is handed to
    /// the new code. If the fresh code cannot be mapped the image falls
    /// back to its previous code and the slot becomes
    /// [`Stale`](ModulePhase::Stale). If neither can be mapped the slot is
    /// unloaded and its state dropped without a `shutdown` call.
    pub fn check_reload_all(&mut self) -> ReloadReport {
        let mut report = ReloadReport::default();
        for index in 0..self.slots.len() {
            let changed = self.slots[index]
                .live
                .as_ref()
                .is_some_and(|live| live.image.needs_reload());
            if changed {
                self.reload(ModuleIndex(index), &mut report);
            }
        }
        report
    }

    fn reload(&mut self, index: ModuleIndex, report: &mut ReloadReport) {
        let slot = &mut self.slots[index.0];
        let Some(Live {
            api,
            state,
            mut image,
        }) = slot.live.take()
        else {
            return;
        };
        tracing::info!(%index, name = %slot.name, "Reloading module");
        drop(api);

        let outcome = match image.reload() {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    %index,
                    path = %slot.path.display(),
                    error = %e,
                    state_leaked = state.is_live(),
                    "Module reload lost its code; unloading without shutdown, module state leaked"
                );
                drop(state);
                report.failed += 1;
                return;
            }
        };
        let api = match image.entry_point(&self.config.entry_symbol) {
            Ok(api) => api,
            Err(e) => {
                tracing::error!(
                    %index,
                    path = %slot.path.display(),
                    error = %e,
                    state_leaked = state.is_live(),
                    "Reloaded module has no entry point; unloading without shutdown, module state leaked"
                );
                drop(state);
                drop(image);
                report.failed += 1;
                return;
            }
        };
        api.rebind(&self.services);
        slot.name = api.name().to_string();
        slot.version = api.version();
        match outcome {
            ReloadOutcome::Upgraded => {
                slot.stale = false;
                report.upgraded += 1;
                tracing::info!(%index, name = %slot.name, version = slot.version, "Module reloaded");
            }
            ReloadOutcome::FellBack { reason } => {
                slot.stale = true;
                report.fell_back += 1;
                tracing::warn!(%index, name = %slot.name, error = %reason, "Module reload fell back to previous code");
            }
        }
        slot.live = Some(Live { api, state, image });
    }

    /// Slots used so far, including unloaded ones.
    pub fn count(&self) -> usize {
        self.slots.len()
    }

    /// Modules currently running.
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.live.is_some()).count()
    }

    /// Snapshot of one slot.
    pub fn module(&self, index: ModuleIndex) -> Option<ModuleInfo> {
        self.slots.get(index.0).map(|slot| info(index, slot))
    }

    /// Snapshots of every slot, in load order.
    pub fn modules(&self) -> impl Iterator<Item = ModuleInfo> + '_ {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, slot)| info(ModuleIndex(i), slot))
    }
}

impl Drop for ModuleManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn info(index: ModuleIndex, slot: &Slot) -> ModuleInfo {
    ModuleInfo {
        index,
        name: slot.name.clone(),
        version: slot.version,
        path: slot.path.clone(),
        phase: slot.phase(),
    }
}

fn entry_point_error(path: &Path, source: LoadError) -> ModuleError {
    if source.is_entry_point() {
        ModuleError::MissingEntryPoint {
            path: path.to_path_buf(),
            source,
        }
    } else {
        ModuleError::LoadFailed {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Hand the state back to the module, then drop its code.
fn retire(live: Live) {
    let Live { api, state, image } = live;
    if state.is_live() {
        api.shutdown(state);
    }
    drop(api);
    drop(image);
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_test_utils::{
        EntryBehavior, Event, EventLog, LogCapture, MockLoader, MockModuleSpec,
    };
    use proptest::prelude::*;

    fn manager_with(loader: MockLoader) -> ModuleManager {
        let mut manager = ModuleManager::new(
            ManagerConfig::default(),
            Box::new(loader),
            HostServices::default(),
        );
        manager.init();
        manager
    }

    fn shutdowns(log: &EventLog, name: &str) -> usize {
        log.count(|e| matches!(e, Event::Shutdown { module, .. } if module == name))
    }

    // ── Load ────────────────────────────────────────────────────

    #[test]
    fn load_before_init_fails() {
        let mut loader = MockLoader::new();
        loader.add("a.mod", MockModuleSpec::new("a"));
        let mut manager = ModuleManager::new(
            ManagerConfig::default(),
            Box::new(loader),
            HostServices::default(),
        );
        assert_eq!(manager.load("a.mod"), Err(ModuleError::NotInitialized));
    }

    #[test]
    fn load_records_info() {
        let mut loader = MockLoader::new();
        loader.add("mods/a.mod", MockModuleSpec::new("alpha"));
        let mut manager = manager_with(loader);
        let index = manager.load("mods/a.mod").unwrap();
        assert_eq!(index, ModuleIndex(0));
        let info = manager.module(index).unwrap();
        assert_eq!(info.name, "alpha");
        assert_eq!(info.version, 1);
        assert_eq!(info.path, PathBuf::from("mods/a.mod"));
        assert_eq!(info.phase, ModulePhase::Active);
    }

    #[test]
    fn missing_entry_point_unmaps_and_registers_nothing() {
        let mut loader = MockLoader::new();
        loader.add("good.mod", MockModuleSpec::new("good"));
        loader.add(
            "bad.mod",
            MockModuleSpec::new("bad").with_entry(EntryBehavior::Missing),
        );
        let log = loader.log();
        let mut manager = manager_with(loader);

        assert_eq!(manager.load("good.mod"), Ok(ModuleIndex(0)));
        let err = manager.load("bad.mod").unwrap_err();
        assert!(matches!(err, ModuleError::MissingEntryPoint { .. }));
        assert_eq!(manager.count(), 1);
        assert_eq!(manager.active_count(), 1);
        assert_eq!(
            log.count(|e| *e == Event::Unmapped("bad.mod".into())),
            1
        );

        manager.shutdown();
        assert_eq!(shutdowns(&log, "good"), 1);
    }

    #[test]
    fn null_vtable_is_a_missing_entry_point() {
        let mut loader = MockLoader::new();
        loader.add("n.mod", MockModuleSpec::new("n").with_entry(EntryBehavior::Null));
        let mut manager = manager_with(loader);
        assert!(matches!(
            manager.load("n.mod"),
            Err(ModuleError::MissingEntryPoint { .. })
        ));
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn init_failure_unmaps_and_registers_nothing() {
        let mut loader = MockLoader::new();
        loader.add("f.mod", MockModuleSpec::new("f").failing_init());
        let log = loader.log();
        let mut manager = manager_with(loader);
        assert!(matches!(
            manager.load("f.mod"),
            Err(ModuleError::InitFailed { .. })
        ));
        assert_eq!(manager.count(), 0);
        assert_eq!(log.count(|e| matches!(e, Event::Unmapped(_))), 1);
        assert_eq!(log.count(|e| matches!(e, Event::Shutdown { .. })), 0);
    }

    #[test]
    fn unknown_file_is_load_failed() {
        let mut manager = manager_with(MockLoader::new());
        assert!(matches!(
            manager.load("absent.mod"),
            Err(ModuleError::LoadFailed { .. })
        ));
    }

    #[test]
    fn table_fills_at_capacity() {
        let mut loader = MockLoader::new();
        loader.add("a.mod", MockModuleSpec::new("a"));
        let config = ManagerConfig {
            capacity: 2,
            ..ManagerConfig::default()
        };
        let mut manager = ModuleManager::new(config, Box::new(loader), HostServices::default());
        manager.init();
        manager.load("a.mod").unwrap();
        manager.load("a.mod").unwrap();
        manager.unload(ModuleIndex(0)).unwrap();
        assert_eq!(
            manager.load("a.mod"),
            Err(ModuleError::TableFull { capacity: 2 })
        );
    }

    #[test]
    fn overlong_path_is_rejected() {
        let mut manager = manager_with(MockLoader::new());
        let long = "m".repeat(256);
        assert_eq!(
            manager.load(&long),
            Err(ModuleError::PathTooLong { len: 256, max: 255 })
        );
    }

    // ── Unload / shutdown ───────────────────────────────────────

    #[test]
    fn unload_passes_state_to_shutdown_once() {
        let mut loader = MockLoader::new();
        loader.add("a.mod", MockModuleSpec::new("a"));
        let log = loader.log();
        let mut manager = manager_with(loader);
        let index = manager.load("a.mod").unwrap();
        manager.update_all(0.1);
        manager.unload(index).unwrap();

        assert_eq!(
            log.count(|e| matches!(e, Event::Shutdown { updates: 1, .. })),
            1
        );
        assert_eq!(manager.module(index).unwrap().phase, ModulePhase::Unloaded);
        assert_eq!(manager.count(), 1);
        assert_eq!(manager.active_count(), 0);
        assert_eq!(
            manager.unload(index),
            Err(ModuleError::NotActive { index: 0 })
        );
        assert_eq!(
            manager.unload(ModuleIndex(7)),
            Err(ModuleError::InvalidIndex { index: 7 })
        );
        assert_eq!(shutdowns(&log, "a"), 1);
    }

    #[test]
    fn shutdown_unloads_newest_first() {
        let mut loader = MockLoader::new();
        loader.add("a.mod", MockModuleSpec::new("a"));
        loader.add("b.mod", MockModuleSpec::new("b"));
        loader.add("c.mod", MockModuleSpec::new("c"));
        let log = loader.log();
        let mut manager = manager_with(loader);
        manager.load("a.mod").unwrap();
        manager.load("b.mod").unwrap();
        manager.load("c.mod").unwrap();
        manager.unload(ModuleIndex(1)).unwrap();
        log.clear();

        manager.shutdown();
        let order: Vec<_> = log
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Shutdown { module, .. } => Some(module),
                _ => None,
            })
            .collect();
        assert_eq!(order, vec!["c".to_string(), "a".to_string()]);
        assert_eq!(manager.count(), 0);
        assert!(!manager.is_initialized());
    }

    #[test]
    fn drop_shuts_down() {
        let mut loader = MockLoader::new();
        loader.add("a.mod", MockModuleSpec::new("a"));
        let log = loader.log();
        {
            let mut manager = manager_with(loader);
            manager.load("a.mod").unwrap();
        }
        assert_eq!(shutdowns(&log, "a"), 1);
        assert_eq!(log.count(|e| matches!(e, Event::Unmapped(_))), 1);
    }

    #[test]
    fn second_init_keeps_modules() {
        let mut loader = MockLoader::new();
        loader.add("a.mod", MockModuleSpec::new("a"));
        let mut manager = manager_with(loader);
        manager.load("a.mod").unwrap();
        manager.init();
        assert_eq!(manager.active_count(), 1);
    }

    // ── Update / render ─────────────────────────────────────────

    #[test]
    fn update_and_render_skip_unloaded_slots() {
        let mut loader = MockLoader::new();
        loader.add("a.mod", MockModuleSpec::new("a"));
        loader.add("b.mod", MockModuleSpec::new("b"));
        let log = loader.log();
        let mut manager = manager_with(loader);
        manager.load("a.mod").unwrap();
        manager.load("b.mod").unwrap();
        manager.unload(ModuleIndex(0)).unwrap();
        log.clear();

        manager.update_all(0.5);
        manager.render_all();
        assert_eq!(
            log.events(),
            vec![
                Event::Update("b".into(), 0.5),
                Event::Render("b".into())
            ]
        );
    }

    // ── Reload ──────────────────────────────────────────────────

    #[test]
    fn unchanged_files_are_not_reloaded() {
        let mut loader = MockLoader::new();
        loader.add("a.mod", MockModuleSpec::new("a"));
        let log = loader.log();
        let mut manager = manager_with(loader);
        manager.load("a.mod").unwrap();
        log.clear();

        assert!(manager.check_reload_all().is_empty());
        assert!(log.events().is_empty());
    }

    #[test]
    fn reload_swaps_code_and_keeps_state() {
        let mut loader = MockLoader::new();
        let file = loader.add("a.mod", MockModuleSpec::new("a"));
        let log = loader.log();
        let mut manager = manager_with(loader);
        let index = manager.load("a.mod").unwrap();
        manager.update_all(0.1);
        manager.update_all(0.1);

        file.rebuild(2);
        let report = manager.check_reload_all();
        assert_eq!(
            report,
            ReloadReport {
                upgraded: 1,
                ..ReloadReport::default()
            }
        );
        let info = manager.module(index).unwrap();
        assert_eq!(info.version, 2);
        assert_eq!(info.phase, ModulePhase::Active);
        assert_eq!(log.count(|e| *e == Event::Rebind("a".into())), 1);
        assert_eq!(log.count(|e| matches!(e, Event::Init(_))), 1);

        manager.update_all(0.1);
        manager.unload(index).unwrap();
        assert_eq!(
            log.count(|e| matches!(e, Event::Shutdown { updates: 3, .. })),
            1
        );
    }

    #[test]
    fn failed_copy_falls_back_with_state_intact() {
        let mut loader = MockLoader::new();
        let file = loader.add("a.mod", MockModuleSpec::new("a"));
        let log = loader.log();
        let mut manager = manager_with(loader);
        let index = manager.load("a.mod").unwrap();
        manager.update_all(0.1);

        file.rebuild(2);
        file.fail_next_copy();
        let report = manager.check_reload_all();
        assert_eq!(report.fell_back, 1);
        let info = manager.module(index).unwrap();
        assert_eq!(info.version, 1);
        assert_eq!(info.phase, ModulePhase::Stale);
        assert_eq!(manager.count(), 1);
        assert_eq!(manager.active_count(), 1);

        // The stamp was not refreshed, so the next pass retries.
        assert_eq!(manager.check_reload_all().upgraded, 1);
        assert_eq!(manager.module(index).unwrap().phase, ModulePhase::Active);
        assert_eq!(manager.module(index).unwrap().version, 2);

        manager.update_all(0.1);
        manager.shutdown();
        assert_eq!(
            log.count(|e| matches!(e, Event::Shutdown { updates: 2, .. })),
            1
        );
    }

    #[test]
    fn lost_reload_unloads_without_shutdown() {
        let mut loader = MockLoader::new();
        let file = loader.add("a.mod", MockModuleSpec::new("a"));
        let log = loader.log();
        let mut manager = manager_with(loader);
        let index = manager.load("a.mod").unwrap();

        file.touch();
        file.fail_next_reload();
        assert_eq!(manager.check_reload_all().failed, 1);
        assert_eq!(manager.module(index).unwrap().phase, ModulePhase::Unloaded);
        assert_eq!(manager.active_count(), 0);
        manager.shutdown();
        assert_eq!(shutdowns(&log, "a"), 0);
    }

    #[test]
    fn reload_without_entry_point_unloads() {
        let mut loader = MockLoader::new();
        let file = loader.add("a.mod", MockModuleSpec::new("a"));
        let mut manager = manager_with(loader);
        let index = manager.load("a.mod").unwrap();

        file.set_entry(EntryBehavior::Missing);
        file.touch();
        assert_eq!(manager.check_reload_all().failed, 1);
        assert_eq!(manager.module(index).unwrap().phase, ModulePhase::Unloaded);
    }

    #[test]
    fn lost_reload_reports_leaked_state() {
        let mut loader = MockLoader::new();
        let a = loader.add("a.mod", MockModuleSpec::new("a"));
        let b = loader.add("b.mod", MockModuleSpec::new("b"));
        let mut manager = manager_with(loader);
        manager.load("a.mod").unwrap();
        manager.load("b.mod").unwrap();

        a.touch();
        a.fail_next_reload();
        b.set_entry(EntryBehavior::Null);
        b.touch();
        let capture = LogCapture::new();
        let report = capture.record(|| manager.check_reload_all());
        assert_eq!(report.failed, 2);

        let errors = capture.at(tracing::Level::ERROR);
        let leaked: Vec<_> = errors
            .iter()
            .filter(|e| e.message.contains("module state leaked"))
            .collect();
        assert_eq!(leaked.len(), 2);
        for event in leaked {
            assert_eq!(event.field("state_leaked"), Some("true"));
        }
    }

    #[test]
    fn only_changed_modules_reload() {
        let mut loader = MockLoader::new();
        loader.add("a.mod", MockModuleSpec::new("a"));
        let b = loader.add("b.mod", MockModuleSpec::new("b"));
        let log = loader.log();
        let mut manager = manager_with(loader);
        manager.load("a.mod").unwrap();
        manager.load("b.mod").unwrap();
        log.clear();

        b.touch();
        assert_eq!(manager.check_reload_all().upgraded, 1);
        assert_eq!(log.count(|e| matches!(e, Event::Unmapped(_))), 1);
        assert_eq!(log.count(|e| *e == Event::Unmapped("b.mod".into())), 1);
    }

    proptest! {
        #[test]
        fn failed_loads_never_consume_slots(good in prop::collection::vec(any::<bool>(), 0..40)) {
            let mut loader = MockLoader::new();
            loader.add("good.mod", MockModuleSpec::new("good"));
            loader.add("bad.mod", MockModuleSpec::new("bad").with_entry(EntryBehavior::Missing));
            let log = loader.log();
            let mut manager = manager_with(loader);

            let mut expected = 0;
            for is_good in good {
                let result = manager.load(if is_good { "good.mod" } else { "bad.mod" });
                if is_good && expected < ManagerConfig::DEFAULT_CAPACITY {
                    prop_assert_eq!(result, Ok(ModuleIndex(expected)));
                    expected += 1;
                } else {
                    prop_assert!(result.is_err());
                }
                prop_assert_eq!(manager.count(), expected);
            }
            manager.shutdown();
            prop_assert_eq!(shutdowns(&log, "good"), expected);
            prop_assert_eq!(
                log.count(|e| matches!(e, Event::Mapped(_))),
                log.count(|e| matches!(e, Event::Unmapped(_)))
            );
        }
    }
}
