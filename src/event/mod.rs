//! Cross-process binary signal.
//!
//! A [`DuplexEvent`] is either set or unset. It is backed by a connected pair of Unix domain
//! socket endpoints, so one end can be given to a child process (as its stdin) and the child
//! observes the state changes made by the parent.
//!
//! Wire protocol between the two endpoints: the writing side sends one byte per transition
//! (`b'1'` when set, `b'0'` when cleared). The reading side drains every pending byte and
//! keeps the last one.

#[cfg(unix)]
mod event_unix;

#[cfg(unix)]
pub use event_unix::*;

#[cfg(not(unix))]
mod event_stub;

#[cfg(not(unix))]
pub use event_stub::*;

use std::time::Duration;

/// Granularity of the polling loop behind [`DuplexEvent::wait`].
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);
