use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

/// Shared view of the sandboxed command currently running, if any.
///
/// The runner publishes the child's pid here right after spawning it and
/// clears it when the child has been reaped. Clones share the same slot, so a
/// supervisor on another thread can watch or signal the command while the
/// reconciliation pass blocks. A supervisor can also [`cancel`] the pass,
/// which stops it before its next step.
///
/// [`cancel`]: ProcessHandle::cancel
#[derive(Debug, Clone, Default)]
pub struct ProcessHandle {
    active: Arc<AtomicI32>,
    cancelled: Arc<AtomicBool>,
}

impl ProcessHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pid of the running sandboxed command, `None` when idle.
    pub fn active_pid(&self) -> Option<u32> {
        match self.active.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid as u32),
        }
    }

    /// Send `signal` to the running command's process group.
    ///
    /// Commands are started in their own session, so the group id equals the
    /// pid. Returns `Ok(false)` when nothing is running.
    pub fn signal(&self, signal: Signal) -> nix::Result<bool> {
        let Some(pid) = self.active_pid() else {
            return Ok(false);
        };
        killpg(Pid::from_raw(pid as i32), signal)?;
        Ok(true)
    }

    /// Ask the running command to stop (SIGTERM).
    pub fn terminate(&self) -> nix::Result<bool> {
        self.signal(Signal::SIGTERM)
    }

    /// Stop the pass at the next step boundary and terminate the running
    /// command, if any. Returns whether a command was signalled.
    pub fn cancel(&self) -> nix::Result<bool> {
        self.cancelled.store(true, Ordering::SeqCst);
        self.terminate()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Publish `pid` as active until the returned guard is dropped.
    pub(crate) fn track(&self, pid: u32) -> ActivePidGuard<'_> {
        self.active.store(pid as i32, Ordering::SeqCst);
        ActivePidGuard { handle: self }
    }
}

/// Clears the active pid on drop, whatever way the command ended.
pub(crate) struct ActivePidGuard<'a> {
    handle: &'a ProcessHandle,
}

impl Drop for ActivePidGuard<'_> {
    fn drop(&mut self) {
        self.handle.active.store(0, Ordering::SeqCst);
    }
}
