//! CPU affinity capability
//!
//! Pinning keeps the synchronizer and the ingest workers on one cache
//! complex so buffer handoffs stay within the shared cache domain. It is
//! advisory: correctness never depends on it, and on platforms without
//! an affinity syscall the call degrades to a logged no-op.

use crate::error::Result;

/// Pin the calling thread to the given core
#[cfg(target_os = "linux")]
pub fn pin_current_thread(core: usize) -> Result<()> {
    use crate::error::Error;

    // Safety: cpu_set_t is a plain bitmask struct; zeroed is its empty
    // state and the CPU_* macros only touch bits within it.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);

        // tid 0 targets the calling thread.
        let rc = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
        if rc != 0 {
            return Err(Error::Resource(format!(
                "Failed to pin thread to core {}: {}",
                core,
                std::io::Error::last_os_error()
            )));
        }
    }

    log::debug!("Pinned thread to core {}", core);
    Ok(())
}

/// Pin the calling thread to the given core (no-op on this platform)
#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(core: usize) -> Result<()> {
    log::debug!(
        "CPU pinning not available on this platform (core {} requested)",
        core
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_os = "linux")]
    fn pins_to_core_zero() {
        // Core 0 exists on every machine the tests run on.
        pin_current_thread(0).unwrap();
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn rejects_absurd_core() {
        // Far beyond CPU_SETSIZE-supported cores on any real host.
        assert!(pin_current_thread(100_000).is_err());
    }
}
