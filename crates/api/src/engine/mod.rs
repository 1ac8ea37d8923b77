//! The dispatch engine: submission orchestration, queue repair, and
//! perpetual-task assignment.

pub mod dispatch;
pub mod handlers;
pub mod perpetual;
pub mod reaper;
pub mod sync_cache;

pub use dispatch::TaskDispatcher;
pub use perpetual::PerpetualTaskService;
pub use reaper::TaskReaper;
pub use sync_cache::SyncTaskCache;
