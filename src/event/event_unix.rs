use std::{
    io::{self, ErrorKind, Read, Write},
    os::{
        fd::{AsFd, OwnedFd},
        unix::net::UnixStream,
    },
    process::Stdio,
    sync::{Mutex, MutexGuard, PoisonError},
    thread,
    time::{Duration, Instant},
};

use super::POLL_INTERVAL;

const SET: u8 = b'1';
const CLEARED: u8 = b'0';

/// Binary signal shared between a process and, optionally, one child process.
#[derive(Debug)]
pub struct DuplexEvent {
    writer: Option<UnixStream>,
    reader: Option<UnixStream>,
    state: Mutex<bool>,
}

/// The far end of an event created by [`DuplexEvent::pair_for_child`].
///
/// Convert it into a [`Stdio`] to hand it to a child process, or into a local event with
/// [`ChildEndpoint::into_event`].
#[derive(Debug)]
pub struct ChildEndpoint(UnixStream);

impl DuplexEvent {
    /// Creates an unset event observed and driven by the current process only.
    pub fn new() -> io::Result<DuplexEvent> {
        let (writer, reader) = UnixStream::pair()?;
        DuplexEvent::from_parts(Some(writer), Some(reader))
    }

    /// Creates an unset event whose state is observed through the returned endpoint.
    ///
    /// The local event is the driving side: [`set`](DuplexEvent::set) and
    /// [`clear`](DuplexEvent::clear) are forwarded to the endpoint.
    pub fn pair_for_child() -> io::Result<(DuplexEvent, ChildEndpoint)> {
        let (local, remote) = UnixStream::pair()?;
        Ok((DuplexEvent::from_parts(Some(local), None)?, ChildEndpoint(remote)))
    }

    /// Reopens the endpoint a parent handed to this process as stdin.
    pub fn from_stdin() -> io::Result<DuplexEvent> {
        let fd = io::stdin().as_fd().try_clone_to_owned()?;
        let stream = UnixStream::from(fd);
        // fails with ENOTSOCK when stdin is not the expected endpoint
        stream.local_addr()?;
        DuplexEvent::from_parts(None, Some(stream))
    }

    fn from_parts(writer: Option<UnixStream>, reader: Option<UnixStream>) -> io::Result<Self> {
        if let Some(reader) = &reader {
            reader.set_nonblocking(true)?;
        }
        Ok(DuplexEvent {
            writer,
            reader,
            state: Mutex::new(false),
        })
    }

    /// Sets the event. Setting an already set event does nothing.
    pub fn set(&self) -> io::Result<()> {
        let mut state = self.lock();
        self.drain(&mut state)?;
        if !*state {
            self.signal(SET)?;
            *state = true;
        }
        Ok(())
    }

    /// Clears the event. Clearing an unset event does nothing.
    pub fn clear(&self) -> io::Result<()> {
        let mut state = self.lock();
        self.drain(&mut state)?;
        if *state {
            self.signal(CLEARED)?;
            *state = false;
        }
        Ok(())
    }

    /// Returns the current state without blocking.
    pub fn is_set(&self) -> io::Result<bool> {
        let mut state = self.lock();
        self.drain(&mut state)?;
        Ok(*state)
    }

    /// Blocks until the event is set or `timeout` elapses (forever on `None`).
    ///
    /// Returns whether the event is set.
    pub fn wait(&self, timeout: Option<Duration>) -> io::Result<bool> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            if self.is_set()? {
                return Ok(true);
            }
            let pause = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(false);
                    }
                    remaining.min(POLL_INTERVAL)
                }
                None => POLL_INTERVAL,
            };
            thread::sleep(pause);
        }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn signal(&self, byte: u8) -> io::Result<()> {
        match self.writer.as_ref() {
            Some(mut writer) => writer.write_all(&[byte]),
            None => Ok(()),
        }
    }

    fn drain(&self, state: &mut bool) -> io::Result<()> {
        let Some(mut reader) = self.reader.as_ref() else {
            return Ok(());
        };
        let mut buf = [0u8; 64];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    return Err(io::Error::new(
                        ErrorKind::BrokenPipe,
                        "the other end of the event was closed",
                    ))
                }
                Ok(n) => *state = buf[n - 1] == SET,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl ChildEndpoint {
    /// Opens the endpoint in the current process, as a child would with
    /// [`DuplexEvent::from_stdin`].
    pub fn into_event(self) -> io::Result<DuplexEvent> {
        DuplexEvent::from_parts(None, Some(self.0))
    }
}

impl From<ChildEndpoint> for Stdio {
    fn from(endpoint: ChildEndpoint) -> Stdio {
        Stdio::from(OwnedFd::from(endpoint.0))
    }
}
