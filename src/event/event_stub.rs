use std::{
    io::{self, ErrorKind},
    process::Stdio,
    time::Duration,
};

fn unsupported() -> io::Error {
    io::Error::new(ErrorKind::Unsupported, "duplex events are only available on unix")
}

/// Binary signal shared between a process and one child process.
#[derive(Debug)]
pub struct DuplexEvent {
    _private: (),
}

/// The far end of an event created by [`DuplexEvent::pair_for_child`].
#[derive(Debug)]
pub struct ChildEndpoint {
    _private: (),
}

impl DuplexEvent {
    /// Always fails: duplex events need unix sockets.
    pub fn new() -> io::Result<DuplexEvent> {
        Err(unsupported())
    }

    /// Always fails.
    pub fn pair_for_child() -> io::Result<(DuplexEvent, ChildEndpoint)> {
        Err(unsupported())
    }

    /// Always fails.
    pub fn from_stdin() -> io::Result<DuplexEvent> {
        Err(unsupported())
    }

    /// Always fails.
    pub fn set(&self) -> io::Result<()> {
        Err(unsupported())
    }

    /// Always fails.
    pub fn clear(&self) -> io::Result<()> {
        Err(unsupported())
    }

    /// Always fails.
    pub fn is_set(&self) -> io::Result<bool> {
        Err(unsupported())
    }

    /// Always fails.
    pub fn wait(&self, _timeout: Option<Duration>) -> io::Result<bool> {
        Err(unsupported())
    }
}

impl ChildEndpoint {
    /// Always fails.
    pub fn into_event(self) -> io::Result<DuplexEvent> {
        Err(unsupported())
    }
}

impl From<ChildEndpoint> for Stdio {
    fn from(_endpoint: ChildEndpoint) -> Stdio {
        Stdio::null()
    }
}
