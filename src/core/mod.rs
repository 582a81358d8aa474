/*!
 * Core Module
 * Fundamental types, limits and error handling
 */

pub mod errors;
pub mod id;
pub mod limits;
pub mod time;

// Re-export for convenience
pub use errors::*;
pub use id::{CheckpointId, MonitorId};
pub use self::time::{now_millis, Millis};
