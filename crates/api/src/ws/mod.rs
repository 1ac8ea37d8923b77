pub mod broadcast;
pub mod handler;
pub mod heartbeat;
pub mod protocol;
pub mod registry;

pub use broadcast::TaskBroadcaster;
pub use heartbeat::start_heartbeat;
pub use registry::{DelegateRegistry, DelegateSnapshot};
