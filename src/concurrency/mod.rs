pub mod sandbox_lock;

pub use sandbox_lock::{SandboxLock, SandboxLockGuard};
