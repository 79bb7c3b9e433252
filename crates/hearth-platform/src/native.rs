//! Safe wrapper over a native module's C vtable.

use std::ffi::{c_void, CStr};
use std::ptr::{self, NonNull};

use hearth_core::{HostServices, InitError, ModuleApi, ModuleState, ModuleVTable};

/// The opaque state pointer a native module's `init` produced.
///
/// Stored inside a [`ModuleState`]; only the module that created it
/// knows what it points at.
#[derive(Debug)]
pub struct NativeState(pub *mut c_void);

/// [`ModuleApi`] over a vtable living in a mapped library.
///
/// The vtable pointer is only valid while the mapping it came from is;
/// the [`NativeImage`](crate::NativeImage) that produced this value must
/// outlive it, which the [`ModuleImage`](hearth_core::ModuleImage)
/// contract already requires.
pub struct NativeModuleApi {
    vtable: NonNull<ModuleVTable>,
    name: String,
}

impl NativeModuleApi {
    /// Wrap a vtable returned by a module's entry point.
    ///
    /// `fallback_name` is used when the vtable carries no name.
    #[allow(unsafe_code)]
    pub(crate) fn new(vtable: NonNull<ModuleVTable>, fallback_name: &str) -> Self {
        // SAFETY: `vtable` was just returned by the entry point of a
        // mapped image and points at its static vtable.
        let name_ptr = unsafe { vtable.as_ref() }.name;
        let name = if name_ptr.is_null() {
            fallback_name.to_string()
        } else {
            // SAFETY: the ABI requires a NUL-terminated name in static
            // memory of the same image.
            unsafe { CStr::from_ptr(name_ptr) }
                .to_string_lossy()
                .into_owned()
        };
        Self { vtable, name }
    }

    #[allow(unsafe_code)]
    fn table(&self) -> &ModuleVTable {
        // SAFETY: the image outlives `self` (see type docs).
        unsafe { self.vtable.as_ref() }
    }

    fn raw_state(state: &ModuleState) -> *mut c_void {
        state
            .downcast_ref::<NativeState>()
            .map_or(ptr::null_mut(), |s| s.0)
    }
}

impl ModuleApi for NativeModuleApi {
    fn version(&self) -> u32 {
        self.table().version
    }

    fn name(&self) -> &str {
        &self.name
    }

    #[allow(unsafe_code)]
    fn init(&self, services: &HostServices) -> Result<ModuleState, InitError> {
        self.rebind(services);
        let Some(init) = self.table().init else {
            return Ok(ModuleState::new(NativeState(ptr::null_mut())));
        };
        let mut state: *mut c_void = ptr::null_mut();
        // SAFETY: `init` comes from the mapped image; the service
        // pointers refer to `services`, which the caller keeps alive for
        // as long as the module is loaded.
        let ok = unsafe { init(&mut state, &services.platform, &services.engine) };
        if ok {
            Ok(ModuleState::new(NativeState(state)))
        } else {
            Err(InitError {
                reason: format!("{} init returned false", self.name),
            })
        }
    }

    #[allow(unsafe_code)]
    fn update(&self, state: &mut ModuleState, dt: f32) {
        if let Some(update) = self.table().update {
            // SAFETY: the state pointer is the one this module's init
            // produced (or null if it had no init).
            unsafe { update(Self::raw_state(state), dt) };
        }
    }

    #[allow(unsafe_code)]
    fn render(&self, state: &mut ModuleState) {
        if let Some(render) = self.table().render {
            // SAFETY: as for update.
            unsafe { render(Self::raw_state(state)) };
        }
    }

    #[allow(unsafe_code)]
    fn shutdown(&self, mut state: ModuleState) {
        let Some(NativeState(mut raw)) = state.take::<NativeState>() else {
            return;
        };
        if raw.is_null() {
            return;
        }
        if let Some(shutdown) = self.table().shutdown {
            // SAFETY: ownership of the state pointer passes back to the
            // module that allocated it.
            unsafe { shutdown(&mut raw) };
        }
    }

    #[allow(unsafe_code)]
    fn rebind(&self, services: &HostServices) {
        let table = self.vtable.as_ptr();
        // SAFETY: the vtable is writable static data of the mapped image
        // and nothing else holds a reference into it during this call.
        unsafe {
            (*table).platform = &services.platform;
            (*table).engine = &services.engine;
        }
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use hearth_core::abi::{EngineServices, PlatformServices};
    use std::cell::Cell;

    thread_local! {
        static UPDATES: Cell<u32> = const { Cell::new(0) };
        static FREED: Cell<bool> = const { Cell::new(false) };
    }

    unsafe extern "C" fn init_ok(
        state: *mut *mut c_void,
        _platform: *const PlatformServices,
        engine: *const EngineServices,
    ) -> bool {
        let value = Box::new((*engine).abi_version);
        *state = Box::into_raw(value).cast();
        true
    }

    unsafe extern "C" fn init_fail(
        _state: *mut *mut c_void,
        _platform: *const PlatformServices,
        _engine: *const EngineServices,
    ) -> bool {
        false
    }

    unsafe extern "C" fn update(state: *mut c_void, _dt: f32) {
        assert!(!state.is_null());
        UPDATES.with(|u| u.set(u.get() + 1));
    }

    unsafe extern "C" fn shutdown(state: *mut *mut c_void) {
        drop(Box::from_raw((*state).cast::<u32>()));
        *state = ptr::null_mut();
        FREED.with(|f| f.set(true));
    }

    fn vtable(init: Option<hearth_core::abi::InitFn>) -> Box<ModuleVTable> {
        Box::new(ModuleVTable {
            version: 7,
            name: c"native-test".as_ptr(),
            init,
            update: Some(update),
            render: None,
            shutdown: Some(shutdown),
            platform: ptr::null(),
            engine: ptr::null(),
        })
    }

    #[test]
    fn full_lifecycle_through_vtable() {
        let mut table = vtable(Some(init_ok));
        let api = NativeModuleApi::new(NonNull::from(&mut *table), "fallback");
        assert_eq!(api.name(), "native-test");
        assert_eq!(api.version(), 7);

        let services = HostServices::default();
        let mut state = api.init(&services).unwrap();
        assert!(!table.platform.is_null());
        api.update(&mut state, 0.016);
        api.render(&mut state);
        assert_eq!(UPDATES.with(Cell::get), 1);
        api.shutdown(state);
        assert!(FREED.with(Cell::get));
    }

    #[test]
    fn failed_init_is_reported() {
        let mut table = vtable(Some(init_fail));
        let api = NativeModuleApi::new(NonNull::from(&mut *table), "fallback");
        assert!(api.init(&HostServices::default()).is_err());
    }

    #[test]
    fn missing_name_and_init_use_defaults() {
        let mut table = vtable(None);
        table.name = ptr::null();
        let api = NativeModuleApi::new(NonNull::from(&mut *table), "fallback");
        assert_eq!(api.name(), "fallback");
        let state = api.init(&HostServices::default()).unwrap();
        // Null state: shutdown must not be called.
        api.shutdown(state);
    }
}
