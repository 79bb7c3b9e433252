//! The default host service table.

use std::ffi::{c_char, CStr};

use hearth_core::{HostServices, LogLevel};

/// Services whose log callback forwards into `tracing` under the
/// `hearth::module` target.
pub fn host_services() -> HostServices {
    HostServices::with_log(tracing_log)
}

#[allow(unsafe_code)]
extern "C" fn tracing_log(level: u32, message: *const c_char) {
    if message.is_null() {
        return;
    }
    // SAFETY: the ABI requires `message` to be a NUL-terminated string
    // that stays valid for the duration of the call.
    let message = unsafe { CStr::from_ptr(message) }.to_string_lossy();
    forward(LogLevel::from_raw(level), &message);
}

fn forward(level: LogLevel, message: &str) {
    match level {
        LogLevel::Error => tracing::error!(target: "hearth::module", "{message}"),
        LogLevel::Warn => tracing::warn!(target: "hearth::module", "{message}"),
        LogLevel::Info => tracing::info!(target: "hearth::module", "{message}"),
        LogLevel::Debug => tracing::debug!(target: "hearth::module", "{message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::abi::ABI_VERSION;

    #[test]
    fn services_carry_abi_version() {
        assert_eq!(host_services().engine.abi_version, ABI_VERSION);
    }

    #[test]
    fn log_callback_tolerates_null_and_text() {
        let services = host_services();
        (services.platform.log)(0, std::ptr::null());
        (services.platform.log)(2, c"module says hi".as_ptr());
        (services.platform.log)(99, c"unknown level".as_ptr());
    }

    #[test]
    fn clock_is_monotonic() {
        let services = host_services();
        let a = (services.platform.ticks_ns)();
        let b = (services.platform.ticks_ns)();
        assert!(b >= a);
    }
}
