pub mod dial;
pub mod handler;
pub mod pool;
pub mod queue;
pub mod wallclock;
pub mod watched;

pub use dial::{DialError, Dialer};
pub use handler::{handle_client, HandlerConfig};
pub use pool::{ConnPool, GetError, PoolConfig};
pub use queue::{Lsn, RaQueue};
pub use watched::{arm_watcher, ProbeOutcome, WatchedConn};
