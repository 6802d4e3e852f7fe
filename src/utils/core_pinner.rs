use anyhow::anyhow;
use core_affinity::{CoreId, get_core_ids, set_for_current};
use std::io;

/// Ids of the cores the OS lets this process run on.
pub fn available_core_ids() -> Vec<usize> {
    get_core_ids()
        .map(|ids| ids.into_iter().map(|c| c.id).collect())
        .unwrap_or_default()
}

/// Pin the calling thread to `core_id`.
pub fn try_pin_core(core_id: usize) -> anyhow::Result<usize> {
    let known = get_core_ids().ok_or_else(|| anyhow!("core ids are not available"))?;
    if !known.iter().any(|c| c.id == core_id) {
        return Err(anyhow!("core {core_id} is not available"));
    }
    if set_for_current(CoreId { id: core_id }) {
        Ok(core_id)
    } else {
        Err(anyhow!("failed to pin core {core_id}"))
    }
}

/// Switch the calling thread to `SCHED_FIFO` with `priority`
/// (clamped to the range the kernel reports).
#[cfg(target_os = "linux")]
pub fn try_set_realtime(priority: i32) -> io::Result<i32> {
    // SAFETY: plain syscalls on the calling thread; `param` outlives the call.
    unsafe {
        let min = libc::sched_get_priority_min(libc::SCHED_FIFO);
        let max = libc::sched_get_priority_max(libc::SCHED_FIFO);
        if min < 0 || max < 0 {
            return Err(io::Error::last_os_error());
        }
        let prio = priority.clamp(min, max);
        let param = libc::sched_param {
            sched_priority: prio,
        };
        if libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(prio)
    }
}

#[cfg(not(target_os = "linux"))]
pub fn try_set_realtime(_priority: i32) -> io::Result<i32> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "realtime scheduling is only wired for linux",
    ))
}
