//! The host context: arenas, modules and the frame sequence.

use std::cell::{Ref, RefCell, RefMut};
use std::path::Path;
use std::ptr::NonNull;
use std::rc::Rc;
use std::time::Instant;

use hearth_arena::{ArenaForest, ArenaId};
use hearth_core::align::DEFAULT_ALIGNMENT;
use hearth_core::{ArenaServices, HostServices, ModuleLoader, VirtualMemory};
use hearth_module::{ModuleIndex, ModuleManager, ReloadReport};
use hearth_platform::{host_services, ArenaBinding, NativeLoader, SystemMemory};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::metrics::FrameMetrics;

/// Owner of the arena forest and the module manager.
///
/// Startup reserves one virtual root and carves two bump arenas from it:
/// a persistent arena for data that lives as long as the engine, and a
/// frame arena that is reset at the start of every [`frame`](Self::frame).
/// Startup modules are then loaded in order.
///
/// Modules reach the forest through the arena services in their
/// [`HostServices`]; arenas they create hang off the root and outlive
/// module reloads.
///
/// Shutdown runs in reverse: modules first (newest first), then the root
/// and everything carved from it.
///
/// # Frame sequence
///
/// 1. Reset the frame arena.
/// 2. Reload changed modules (when hot reload is enabled).
/// 3. `update_all(dt)`.
/// 4. `render_all()`.
pub struct Engine<M: VirtualMemory> {
    // Modules go first so their state is released while the arena
    // services still reach the forest.
    modules: ModuleManager,
    arena_binding: ArenaBinding,
    forest: Rc<RefCell<ArenaForest<M>>>,
    root: ArenaId,
    persistent: ArenaId,
    frame_arena: ArenaId,
    hot_reload: bool,
    frame_index: u64,
    shut_down: bool,
}

impl<M: VirtualMemory + 'static> Engine<M> {
    /// Validate `config`, build the arenas and load the startup modules.
    ///
    /// The arena table in `services` is replaced by one bound to the new
    /// forest. Any failure tears down whatever was built before it.
    pub fn new(
        config: EngineConfig,
        memory: M,
        loader: Box<dyn ModuleLoader>,
        mut services: HostServices,
    ) -> Result<Self, EngineError> {
        config.validate().inspect_err(|e| {
            tracing::error!(error = %e, "Invalid engine config");
        })?;
        tracing::info!("Engine initializing");

        let mut forest = ArenaForest::new(memory);
        let root = forest.create_virtual(&config.root)?;
        let persistent =
            forest.create_bump(root, config.persistent_arena_bytes, DEFAULT_ALIGNMENT)?;
        let frame_arena = forest.create_bump(root, config.frame_arena_bytes, DEFAULT_ALIGNMENT)?;
        forest.set_debug_name(root, "root")?;
        forest.set_debug_name(persistent, "persistent")?;
        forest.set_debug_name(frame_arena, "frame")?;
        let forest = Rc::new(RefCell::new(forest));
        let arena_binding = ArenaBinding::attach(&forest, root);
        services.platform.arena = arena_binding.services();

        let mut modules = ModuleManager::new(config.manager, loader, services);
        modules.init();
        for path in &config.module_paths {
            modules.load(path)?;
        }

        tracing::info!(
            modules = modules.active_count(),
            hot_reload = config.hot_reload,
            "Engine initialized"
        );
        Ok(Self {
            modules,
            arena_binding,
            forest,
            root,
            persistent,
            frame_arena,
            hot_reload: config.hot_reload,
            frame_index: 0,
            shut_down: false,
        })
    }
}

impl<M: VirtualMemory> Engine<M> {
    /// Run one frame of `dt` seconds.
    pub fn frame(&mut self, dt: f32) -> Result<FrameMetrics, EngineError> {
        let start = Instant::now();
        let frame_arena_bytes = {
            let mut forest = self.forest.borrow_mut();
            let used = forest.used(self.frame_arena).unwrap_or(0);
            forest.reset(self.frame_arena)?;
            used
        };

        let reload_start = Instant::now();
        let reload = if self.hot_reload {
            self.modules.check_reload_all()
        } else {
            ReloadReport::default()
        };
        let reload_us = micros_since(reload_start);

        let update_start = Instant::now();
        self.modules.update_all(dt);
        let update_us = micros_since(update_start);

        let render_start = Instant::now();
        self.modules.render_all();
        let render_us = micros_since(render_start);

        let forest = self.forest.borrow();
        let metrics = FrameMetrics {
            frame: self.frame_index,
            total_us: micros_since(start),
            reload_us,
            update_us,
            render_us,
            reload,
            frame_arena_bytes,
            persistent_bytes: forest.used(self.persistent).unwrap_or(0),
            committed_bytes: forest
                .stats(self.root)
                .and_then(|s| s.committed)
                .unwrap_or(0),
            active_modules: self.modules.active_count(),
        };
        drop(forest);
        self.frame_index += 1;
        tracing::trace!(frame = metrics.frame, total_us = metrics.total_us, "Frame complete");
        Ok(metrics)
    }

    /// Allocate from the frame arena. Valid until the next frame starts.
    pub fn frame_alloc(
        &mut self,
        size: usize,
        alignment: usize,
    ) -> Result<NonNull<u8>, EngineError> {
        Ok(self
            .forest
            .borrow_mut()
            .alloc_aligned(self.frame_arena, size, alignment)?)
    }

    /// Allocate from the persistent arena. Valid until shutdown.
    pub fn persistent_alloc(
        &mut self,
        size: usize,
        alignment: usize,
    ) -> Result<NonNull<u8>, EngineError> {
        Ok(self
            .forest
            .borrow_mut()
            .alloc_aligned(self.persistent, size, alignment)?)
    }

    /// Load another module after startup.
    pub fn load_module(&mut self, path: impl AsRef<Path>) -> Result<ModuleIndex, EngineError> {
        Ok(self.modules.load(path)?)
    }

    /// Shut down modules, then release the root.
    ///
    /// Dropping the engine does the same.
    pub fn shutdown(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if std::mem::replace(&mut self.shut_down, true) {
            return;
        }
        tracing::info!(frames = self.frame_index, "Engine shutting down");
        self.modules.shutdown();
        if let Err(e) = self.forest.borrow_mut().destroy(self.root) {
            tracing::warn!(error = %e, "Failed to destroy root arena");
        }
    }

    /// Frames run so far.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Whether changed modules are reloaded each frame.
    pub fn hot_reload(&self) -> bool {
        self.hot_reload
    }

    /// Enable or disable per-frame reload checks.
    pub fn set_hot_reload(&mut self, enabled: bool) {
        self.hot_reload = enabled;
    }

    /// The module manager.
    pub fn modules(&self) -> &ModuleManager {
        &self.modules
    }

    /// Mutable access to the module manager.
    pub fn modules_mut(&mut self) -> &mut ModuleManager {
        &mut self.modules
    }

    /// The arena forest.
    ///
    /// The forest is shared with the arena services; release the borrow
    /// before running a frame or calling into modules.
    pub fn forest(&self) -> Ref<'_, ArenaForest<M>> {
        self.forest.borrow()
    }

    /// Mutable access to the arena forest, for carving further arenas.
    pub fn forest_mut(&mut self) -> RefMut<'_, ArenaForest<M>> {
        self.forest.borrow_mut()
    }

    /// The arena table handed to modules.
    pub fn arena_services(&self) -> ArenaServices {
        self.arena_binding.services()
    }

    /// The virtual root every engine arena is carved from.
    pub fn root(&self) -> ArenaId {
        self.root
    }

    /// The persistent bump arena.
    pub fn persistent_arena(&self) -> ArenaId {
        self.persistent
    }

    /// The per-frame bump arena.
    pub fn frame_arena(&self) -> ArenaId {
        self.frame_arena
    }
}

impl Engine<SystemMemory> {
    /// Engine on the platform's virtual memory, loading native modules
    /// with the default host services.
    pub fn native(config: EngineConfig) -> Result<Self, EngineError> {
        Self::new(
            config,
            SystemMemory::new(),
            Box::new(NativeLoader::new()),
            host_services(),
        )
    }
}

impl<M: VirtualMemory> Drop for Engine<M> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn micros_since(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX)
}
