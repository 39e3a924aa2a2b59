//! System-level utilities: named locks, periodic tasks, resource detection

mod locker;
mod resources;
mod ticker;

pub use locker::{Locker, LockerError, LockerGuard, LockerRegistry};
pub use resources::{detect, GpuLister, NoGpus, ResourceInventory};
pub use ticker::{spawn_periodic, TickerHandle, TickerStats};
