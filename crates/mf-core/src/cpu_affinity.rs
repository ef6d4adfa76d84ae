//! Pinning the table writer thread to a core.
//!
//! The populator applies every price update on one blocking thread. Pinning
//! it keeps the table lock hold times short and predictable; the feature is
//! off unless `populator.cpu_core` is configured.

use tracing::{info, warn};

/// Bind the calling thread to `core_id`. Returns `false` if the core does not
/// exist or the OS refused.
pub fn bind_to_core(core_id: usize) -> bool {
    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    let Some(core) = core_ids.get(core_id) else {
        warn!("CPU core {core_id} not available (system has {} cores)", core_ids.len());
        return false;
    };
    let ok = core_affinity::set_for_current(*core);
    if ok {
        info!("bound thread to CPU core {core_id}");
    } else {
        warn!("failed to bind thread to CPU core {core_id}");
    }
    ok
}

/// [`bind_to_core`] for an optional, possibly negative config value.
/// `None` and negative ids leave the thread unpinned.
pub fn maybe_bind(core_id: Option<i32>) -> bool {
    match core_id.and_then(|id| usize::try_from(id).ok()) {
        Some(id) => bind_to_core(id),
        None => false,
    }
}
