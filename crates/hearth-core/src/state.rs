//! Opaque per-module state carried across reloads.

use std::any::Any;
use std::fmt;

/// Type-erased state owned by a module and held by the manager.
///
/// The manager never looks inside; it stores the token between calls and
/// hands it back to the module's own `update`/`render`/`shutdown`. The
/// boxed value keeps its heap address for as long as the token lives,
/// which is what lets a module's state survive a code swap.
#[derive(Default)]
pub struct ModuleState {
    inner: Option<Box<dyn Any>>,
}

impl ModuleState {
    /// A token carrying no state.
    pub const fn empty() -> Self {
        Self { inner: None }
    }

    /// Wrap a module-defined value.
    pub fn new<T: Any>(value: T) -> Self {
        Self {
            inner: Some(Box::new(value)),
        }
    }

    /// Whether the token carries state.
    pub fn is_live(&self) -> bool {
        self.inner.is_some()
    }

    /// Borrow the state as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.as_ref()?.downcast_ref()
    }

    /// Mutably borrow the state as `T`.
    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.inner.as_mut()?.downcast_mut()
    }

    /// Take the state out as `T`, leaving the token empty.
    ///
    /// If the state is not a `T`, it is left in place and `None` is
    /// returned.
    pub fn take<T: Any>(&mut self) -> Option<T> {
        let boxed = self.inner.take()?;
        match boxed.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                self.inner = Some(other);
                None
            }
        }
    }

    /// Heap address of the state, for identity checks in diagnostics.
    ///
    /// Zero-sized states share a dangling address.
    pub fn addr(&self) -> Option<usize> {
        self.inner
            .as_deref()
            .map(|value| (value as *const dyn Any).cast::<()>() as usize)
    }
}

impl fmt::Debug for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addr() {
            Some(addr) => write!(f, "ModuleState({addr:#x})"),
            None => write!(f, "ModuleState(empty)"),
        }
    }
}
