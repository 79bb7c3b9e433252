//! In-memory module loader with scriptable failures.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use hearth_core::{
    ArenaHandle, ArenaServices, HostServices, InitError, LoadError, ModuleApi, ModuleImage,
    ModuleLoader, ModuleState, ReloadOutcome,
};

/// Something a mock module or image did.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Code for this path was mapped (load, reload or fallback).
    Mapped(PathBuf),
    /// Code for this path was unmapped.
    Unmapped(PathBuf),
    Init(String),
    Update(String, f32),
    Render(String),
    Rebind(String),
    /// The module carved its own arena through the host services.
    ArenaCreated { module: String, arena: ArenaHandle },
    /// `updates` is the number of updates the state saw over its lifetime.
    Shutdown { module: String, updates: u64 },
}

/// Shared, append-only record of [`Event`]s.
#[derive(Clone, Debug, Default)]
pub struct EventLog {
    events: Rc<RefCell<Vec<Event>>>,
}

impl EventLog {
    pub fn push(&self, event: Event) {
        self.events.borrow_mut().push(event);
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.borrow().iter().filter(|e| pred(e)).count()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

/// How a mock file's entry point behaves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryBehavior {
    /// Resolves to a working module.
    Present,
    /// The symbol is not exported.
    Missing,
    /// The symbol exists but returns a null vtable.
    Null,
}

/// Description of the module a mock file contains.
#[derive(Clone, Debug)]
pub struct MockModuleSpec {
    pub name: String,
    pub version: u32,
    pub entry: EntryBehavior,
    pub fail_init: bool,
    /// Bytes of a bump arena the module creates on init and allocates
    /// [`MockState::CHUNK`] bytes from on every update.
    pub arena_bytes: Option<usize>,
}

impl MockModuleSpec {
    /// A well-behaved module.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: 1,
            entry: EntryBehavior::Present,
            fail_init: false,
            arena_bytes: None,
        }
    }

    pub fn with_entry(mut self, entry: EntryBehavior) -> Self {
        self.entry = entry;
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn with_arena(mut self, bytes: usize) -> Self {
        self.arena_bytes = Some(bytes);
        self
    }
}

struct FileState {
    spec: MockModuleSpec,
    stamp: u64,
    fail_copy: bool,
    fail_fallback: bool,
}

/// Handle on one in-memory module file.
///
/// Changing the file through the handle is what an external rebuild
/// would do on disk.
#[derive(Clone)]
pub struct MockFile {
    state: Rc<RefCell<FileState>>,
}

impl MockFile {
    /// Mark the file as rebuilt without changing its contents.
    pub fn touch(&self) {
        self.state.borrow_mut().stamp += 1;
    }

    /// Rebuild the file with a new module version.
    pub fn rebuild(&self, version: u32) {
        let mut state = self.state.borrow_mut();
        state.spec.version = version;
        state.stamp += 1;
    }

    /// Change the entry point of the next mapping.
    pub fn set_entry(&self, entry: EntryBehavior) {
        self.state.borrow_mut().spec.entry = entry;
    }

    /// Make the next private copy of this file fail.
    pub fn fail_next_copy(&self) {
        self.state.borrow_mut().fail_copy = true;
    }

    /// Make the next reload lose both the fresh and the previous copy.
    pub fn fail_next_reload(&self) {
        let mut state = self.state.borrow_mut();
        state.fail_copy = true;
        state.fail_fallback = true;
    }
}

/// [`ModuleLoader`] over registered in-memory files.
#[derive(Default)]
pub struct MockLoader {
    files: HashMap<PathBuf, MockFile>,
    log: EventLog,
}

impl MockLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a loader that records into an existing log.
    pub fn with_log(log: EventLog) -> Self {
        Self {
            files: HashMap::new(),
            log,
        }
    }

    /// Register a file at `path` holding `spec`.
    pub fn add(&mut self, path: impl Into<PathBuf>, spec: MockModuleSpec) -> MockFile {
        let file = MockFile {
            state: Rc::new(RefCell::new(FileState {
                spec,
                stamp: 0,
                fail_copy: false,
                fail_fallback: false,
            })),
        };
        self.files.insert(path.into(), file.clone());
        file
    }

    pub fn log(&self) -> EventLog {
        self.log.clone()
    }
}

impl ModuleLoader for MockLoader {
    fn load(&mut self, path: &Path) -> Result<Box<dyn ModuleImage>, LoadError> {
        let file = self.files.get(path).ok_or_else(|| LoadError::Open {
            path: path.to_path_buf(),
            reason: "no such file".into(),
        })?;
        let (stamp, version) = {
            let mut state = file.state.borrow_mut();
            if std::mem::take(&mut state.fail_copy) {
                return Err(copy_error(path));
            }
            (state.stamp, state.spec.version)
        };
        self.log.push(Event::Mapped(path.to_path_buf()));
        Ok(Box::new(MockImage {
            path: path.to_path_buf(),
            file: file.clone(),
            log: self.log.clone(),
            mapped: true,
            stamp,
            version,
        }))
    }
}

fn copy_error(path: &Path) -> LoadError {
    LoadError::Copy {
        from: path.to_path_buf(),
        to: path.with_extension("tmp"),
        reason: "injected failure".into(),
    }
}

struct MockImage {
    path: PathBuf,
    file: MockFile,
    log: EventLog,
    mapped: bool,
    /// File stamp when the current code was mapped.
    stamp: u64,
    /// Module version the current code reports.
    version: u32,
}

impl MockImage {
    fn unmap(&mut self) {
        if std::mem::take(&mut self.mapped) {
            self.log.push(Event::Unmapped(self.path.clone()));
        }
    }

    fn map(&mut self) {
        self.mapped = true;
        self.log.push(Event::Mapped(self.path.clone()));
    }
}

impl ModuleImage for MockImage {
    fn path(&self) -> &Path {
        &self.path
    }

    fn entry_point(&self, symbol: &str) -> Result<Box<dyn ModuleApi>, LoadError> {
        if !self.mapped {
            return Err(LoadError::NotLoaded {
                path: self.path.clone(),
            });
        }
        let state = self.file.state.borrow();
        match state.spec.entry {
            EntryBehavior::Present => Ok(Box::new(MockApi {
                name: state.spec.name.clone(),
                version: self.version,
                fail_init: state.spec.fail_init,
                arena_bytes: state.spec.arena_bytes,
                log: self.log.clone(),
            })),
            EntryBehavior::Missing => Err(LoadError::MissingSymbol {
                symbol: symbol.to_string(),
                reason: "symbol not exported".into(),
            }),
            EntryBehavior::Null => Err(LoadError::NullVTable {
                symbol: symbol.to_string(),
            }),
        }
    }

    fn needs_reload(&self) -> bool {
        self.file.state.borrow().stamp > self.stamp
    }

    fn reload(&mut self) -> Result<ReloadOutcome, LoadError> {
        self.unmap();
        let mut state = self.file.state.borrow_mut();
        if std::mem::take(&mut state.fail_copy) {
            let reason = copy_error(&self.path);
            if std::mem::take(&mut state.fail_fallback) {
                return Err(LoadError::Open {
                    path: self.path.clone(),
                    reason: "previous copy is gone".into(),
                });
            }
            drop(state);
            self.map();
            return Ok(ReloadOutcome::FellBack { reason });
        }
        self.stamp = state.stamp;
        self.version = state.spec.version;
        drop(state);
        self.map();
        Ok(ReloadOutcome::Upgraded)
    }
}

impl Drop for MockImage {
    fn drop(&mut self) {
        self.unmap();
    }
}

/// State a mock module keeps in its [`ModuleState`].
#[derive(Debug, Default)]
pub struct MockState {
    pub updates: u64,
    pub renders: u64,
    /// The module's own arena and the table it was created through.
    pub arena: Option<(ArenaServices, ArenaHandle)>,
}

impl MockState {
    /// Bytes allocated from the module arena per update.
    pub const CHUNK: usize = 64;
}

struct MockApi {
    name: String,
    version: u32,
    fail_init: bool,
    arena_bytes: Option<usize>,
    log: EventLog,
}

impl MockApi {
    fn create_arena(
        &self,
        services: &HostServices,
        bytes: usize,
    ) -> Result<(ArenaServices, ArenaHandle), InitError> {
        let table = services.platform.arena;
        let arena = table
            .root()
            .and_then(|root| table.create_bump(root, bytes, 16))
            .ok_or_else(|| InitError {
                reason: format!("{} could not create its arena", self.name),
            })?;
        self.log.push(Event::ArenaCreated {
            module: self.name.clone(),
            arena,
        });
        Ok((table, arena))
    }
}

impl ModuleApi for MockApi {
    fn version(&self) -> u32 {
        self.version
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn init(&self, services: &HostServices) -> Result<ModuleState, InitError> {
        self.log.push(Event::Init(self.name.clone()));
        if self.fail_init {
            return Err(InitError {
                reason: format!("{} refused to start", self.name),
            });
        }
        let arena = match self.arena_bytes {
            Some(bytes) => Some(self.create_arena(services, bytes)?),
            None => None,
        };
        Ok(ModuleState::new(MockState {
            arena,
            ..MockState::default()
        }))
    }

    fn update(&self, state: &mut ModuleState, dt: f32) {
        if let Some(state) = state.downcast_mut::<MockState>() {
            state.updates += 1;
            if let Some((table, arena)) = state.arena {
                table.alloc_aligned(arena, MockState::CHUNK, 16);
            }
        }
        self.log.push(Event::Update(self.name.clone(), dt));
    }

    fn render(&self, state: &mut ModuleState) {
        if let Some(state) = state.downcast_mut::<MockState>() {
            state.renders += 1;
        }
        self.log.push(Event::Render(self.name.clone()));
    }

    fn shutdown(&self, mut state: ModuleState) {
        let state = state.take::<MockState>().unwrap_or_default();
        if let Some((table, arena)) = state.arena {
            table.destroy(arena);
        }
        let updates = state.updates;
        self.log.push(Event::Shutdown {
            module: self.name.clone(),
            updates,
        });
    }

    fn rebind(&self, _services: &HostServices) {
        self.log.push(Event::Rebind(self.name.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::abi::ENTRY_SYMBOL;

    #[test]
    fn load_unknown_path_fails() {
        let mut loader = MockLoader::new();
        let err = loader.load(Path::new("nope.mod")).err().unwrap();
        assert!(matches!(err, LoadError::Open { .. }));
    }

    #[test]
    fn drop_unmaps_once() {
        let mut loader = MockLoader::new();
        loader.add("a.mod", MockModuleSpec::new("a"));
        let image = loader.load(Path::new("a.mod")).unwrap();
        drop(image);
        let log = loader.log();
        assert_eq!(
            log.events(),
            vec![
                Event::Mapped("a.mod".into()),
                Event::Unmapped("a.mod".into())
            ]
        );
    }

    #[test]
    fn touch_triggers_reload_and_upgrade_clears_it() {
        let mut loader = MockLoader::new();
        let file = loader.add("a.mod", MockModuleSpec::new("a"));
        let mut image = loader.load(Path::new("a.mod")).unwrap();
        assert!(!image.needs_reload());
        file.rebuild(2);
        assert!(image.needs_reload());
        assert_eq!(image.reload(), Ok(ReloadOutcome::Upgraded));
        assert!(!image.needs_reload());
        assert_eq!(image.entry_point(ENTRY_SYMBOL).unwrap().version(), 2);
    }

    #[test]
    fn failed_copy_falls_back_and_keeps_stamp() {
        let mut loader = MockLoader::new();
        let file = loader.add("a.mod", MockModuleSpec::new("a"));
        let mut image = loader.load(Path::new("a.mod")).unwrap();
        file.rebuild(2);
        file.fail_next_copy();
        assert!(matches!(
            image.reload(),
            Ok(ReloadOutcome::FellBack { .. })
        ));
        assert!(image.needs_reload());
        assert_eq!(image.entry_point(ENTRY_SYMBOL).unwrap().version(), 1);
    }

    #[test]
    fn failed_fallback_leaves_nothing_mapped() {
        let mut loader = MockLoader::new();
        let file = loader.add("a.mod", MockModuleSpec::new("a"));
        let mut image = loader.load(Path::new("a.mod")).unwrap();
        file.fail_next_reload();
        assert!(image.reload().is_err());
        assert!(matches!(
            image.entry_point(ENTRY_SYMBOL),
            Err(LoadError::NotLoaded { .. })
        ));
    }

    #[test]
    fn entry_behaviours() {
        let mut loader = MockLoader::new();
        loader.add(
            "m.mod",
            MockModuleSpec::new("m").with_entry(EntryBehavior::Missing),
        );
        loader.add("n.mod", MockModuleSpec::new("n").with_entry(EntryBehavior::Null));
        let m = loader.load(Path::new("m.mod")).unwrap();
        let n = loader.load(Path::new("n.mod")).unwrap();
        assert!(m.entry_point(ENTRY_SYMBOL).err().unwrap().is_entry_point());
        assert!(n.entry_point(ENTRY_SYMBOL).err().unwrap().is_entry_point());
    }

    #[test]
    fn arena_module_fails_init_without_a_host() {
        let mut loader = MockLoader::new();
        loader.add("a.mod", MockModuleSpec::new("a").with_arena(1024));
        let image = loader.load(Path::new("a.mod")).unwrap();
        let api = image.entry_point(ENTRY_SYMBOL).unwrap();
        let err = api.init(&HostServices::default()).err().unwrap();
        assert!(err.reason.contains("arena"));
        assert_eq!(
            loader.log().count(|e| matches!(e, Event::ArenaCreated { .. })),
            0
        );
    }

    #[test]
    fn mock_state_counts_updates() {
        let mut loader = MockLoader::new();
        loader.add("a.mod", MockModuleSpec::new("a"));
        let image = loader.load(Path::new("a.mod")).unwrap();
        let api = image.entry_point(ENTRY_SYMBOL).unwrap();
        let mut state = api.init(&HostServices::default()).unwrap();
        api.update(&mut state, 0.5);
        api.update(&mut state, 0.5);
        assert_eq!(state.downcast_ref::<MockState>().unwrap().updates, 2);
        api.shutdown(state);
        assert_eq!(
            loader.log().count(|e| matches!(e, Event::Shutdown { updates: 2, .. })),
            1
        );
    }
}
