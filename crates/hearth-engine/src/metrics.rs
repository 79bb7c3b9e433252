//! Per-frame metrics for the host loop.
//!
//! [`FrameMetrics`] captures timing and arena usage for a single
//! [`Engine::frame`](crate::Engine::frame) call.

use hearth_module::ReloadReport;

/// Timing and memory metrics collected during a single frame.
///
/// All durations are in microseconds.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameMetrics {
    /// Zero-based index of the frame.
    pub frame: u64,
    /// Wall-clock time for the entire frame.
    pub total_us: u64,
    /// Time spent checking for and performing module reloads.
    pub reload_us: u64,
    /// Time spent in module `update` callbacks.
    pub update_us: u64,
    /// Time spent in module `render` callbacks.
    pub render_us: u64,
    /// What the reload check did this frame. Empty when hot reload is off.
    pub reload: ReloadReport,
    /// Bytes the previous frame left in the frame arena before it was reset.
    pub frame_arena_bytes: usize,
    /// Bytes currently allocated from the persistent arena.
    pub persistent_bytes: usize,
    /// Bytes the root currently has committed, header included.
    pub committed_bytes: usize,
    /// Modules running after the frame.
    pub active_modules: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_metrics_are_zero() {
        let m = FrameMetrics::default();
        assert_eq!(m.frame, 0);
        assert_eq!(m.total_us, 0);
        assert!(m.reload.is_empty());
        assert_eq!(m.frame_arena_bytes, 0);
        assert_eq!(m.active_modules, 0);
    }
}
