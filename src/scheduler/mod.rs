/*!
 * Scheduling
 * Background timers and wall-clock interval alignment
 *
 * Two shared timers exist per agent: the priority timer only pushes data to
 * appenders, the utility timer runs everything else, so a slow utility task
 * never delays data delivery.
 */

mod interval;
mod timer;

pub use interval::round_interval;
pub use timer::{CancelToken, TaskTimer, TimerHandle, TimerTask};
