//! Real-time scheduling helpers (Linux SCHED_FIFO and mlockall).
//!
//! The HX711 read loop bit-bangs its clock line; a preempted pulse longer than
//! 60 us powers the chip down and costs a sample.

use crate::cli::RtLock;

#[cfg(target_os = "linux")]
pub fn setup_rt_once(rt: bool, prio: Option<i32>, lock: RtLock) {
    use libc::{SCHED_FIFO, sched_get_priority_max, sched_get_priority_min, sched_param};
    use std::sync::OnceLock;
    static RT_ONCE: OnceLock<()> = OnceLock::new();

    if !rt {
        return;
    }

    #[inline]
    fn is_retryable_memlock_error(err: &std::io::Error) -> bool {
        matches!(err.raw_os_error(), Some(code) if code == libc::EPERM || code == libc::ENOMEM)
    }

    fn mlock(flags: libc::c_int) -> std::io::Result<()> {
        let rc = unsafe { libc::mlockall(flags) };
        if rc != 0 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    fn try_apply_mem_lock(lock: RtLock) -> eyre::Result<()> {
        let result = match lock {
            RtLock::None => return Ok(()),
            RtLock::Current => mlock(libc::MCL_CURRENT),
            RtLock::All => mlock(libc::MCL_CURRENT | libc::MCL_FUTURE),
        };
        let Err(err) = result else {
            return Ok(());
        };
        // All failed on limits: Current may still fit
        if lock == RtLock::All && is_retryable_memlock_error(&err) && mlock(libc::MCL_CURRENT).is_ok()
        {
            return Ok(());
        }
        let mut msg = format!("mlockall failed: {err}");
        if is_retryable_memlock_error(&err) {
            msg.push_str("; hint: needs CAP_IPC_LOCK (or root) and sufficient 'ulimit -l'");
        }
        Err(eyre::eyre!(msg))
    }

    fn try_apply_fifo_priority(prio: Option<i32>) -> eyre::Result<i32> {
        let (min, max) = unsafe {
            let min = sched_get_priority_min(SCHED_FIFO);
            let max = sched_get_priority_max(SCHED_FIFO);
            if min < 0 || max < 0 { (1, 99) } else { (min, max) }
        };
        let prio_val = prio.unwrap_or(max).clamp(min, max);
        let param = sched_param {
            sched_priority: prio_val,
        };
        let rc = unsafe { libc::sched_setscheduler(0, SCHED_FIFO, &param) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            eyre::bail!("{err}; hint: run as root or grant CAP_SYS_NICE (setcap cap_sys_nice=ep)");
        }
        Ok(prio_val)
    }

    RT_ONCE.get_or_init(|| {
        match try_apply_mem_lock(lock) {
            Ok(()) => tracing::info!(?lock, "rt: memory locked"),
            Err(err) => tracing::warn!(error = %err, "rt: memory lock not applied"),
        }
        match try_apply_fifo_priority(prio) {
            Ok(p) => tracing::info!(prio = p, "rt: SCHED_FIFO enabled"),
            Err(err) => tracing::warn!(error = %err, "rt: SCHED_FIFO not applied"),
        }
    });
}

#[cfg(not(target_os = "linux"))]
pub fn setup_rt_once(rt: bool, _prio: Option<i32>, _lock: RtLock) {
    if rt {
        tracing::warn!("rt: real-time mode is only supported on Linux; ignoring --rt");
    }
}
