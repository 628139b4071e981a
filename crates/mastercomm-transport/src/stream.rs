use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::{Result, TransportError};

/// Maximum number of drain reads per wake-up step in [`LinkStream::flush_input`].
const FLUSH_MAX_READS: usize = 100;
const FLUSH_CHUNK_SIZE: usize = 64;

/// A connected link to the master: implements `Read + Write`.
///
/// Either a native TTY or a Unix domain socket carrying the same byte stream.
pub struct LinkStream {
    inner: LinkStreamInner,
}

enum LinkStreamInner {
    #[cfg(unix)]
    Serial(serialport::TTYPort),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Read for LinkStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            LinkStreamInner::Serial(port) => port.read(buf),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for LinkStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            LinkStreamInner::Serial(port) => port.write(buf),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            LinkStreamInner::Serial(port) => port.flush(),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl LinkStream {
    #[cfg(unix)]
    pub(crate) fn from_serial(port: serialport::TTYPort) -> Self {
        Self {
            inner: LinkStreamInner::Serial(port),
        }
    }

    /// Wrap an already connected Unix stream (socket bridge or test pair).
    #[cfg(unix)]
    pub fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: LinkStreamInner::Unix(stream),
        }
    }

    /// Connect to a socket-bridged master.
    #[cfg(unix)]
    pub fn connect_unix(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream = std::os::unix::net::UnixStream::connect(path).map_err(|source| {
            TransportError::Connect {
                path: path.to_path_buf(),
                source,
            }
        })?;
        debug!(?path, "connected to socket-bridged link");
        Ok(Self::from_unix(stream))
    }

    /// Try to clone this link (new file descriptor on the same device).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            #[cfg(unix)]
            LinkStreamInner::Serial(port) => Ok(Self::from_serial(port.try_clone_native()?)),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => Ok(Self::from_unix(stream.try_clone()?)),
        }
    }

    /// Set the timeout for blocking reads. `None` blocks indefinitely.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            LinkStreamInner::Serial(port) => {
                use serialport::SerialPort;
                // The TTY driver has no "infinite" setting; a day is close enough.
                let timeout = timeout.unwrap_or(Duration::from_secs(86_400));
                port.set_timeout(timeout).map_err(Into::into)
            }
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Wait until the link has bytes to read, or until `timeout` elapses.
    ///
    /// Returns `Ok(false)` on timeout. A hung-up peer reports readable so the
    /// following `read` can observe EOF.
    #[cfg(unix)]
    pub fn wait_readable(&self, timeout: Duration) -> Result<bool> {
        use std::os::fd::AsRawFd;

        let fd = match &self.inner {
            LinkStreamInner::Serial(port) => port.as_raw_fd(),
            LinkStreamInner::Unix(stream) => stream.as_raw_fd(),
        };
        poll_readable(fd, timeout)
    }

    /// Read whatever is available, retrying on `Interrupted`.
    ///
    /// Returns `Err(TransportError::Closed)` on EOF.
    pub fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.read(buf) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    /// Write all of `data` and flush.
    pub fn write_all_flush(&mut self, data: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < data.len() {
            match self.write(&data[offset..]) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
        loop {
            match self.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    /// Bring the master back to a known state and discard pending input.
    ///
    /// Sends a line of spaces (terminates any half-received command), `exit`
    /// (leaves the CLI if it was left open) and a few spaces, draining the
    /// input after each step. Returns the number of bytes discarded.
    #[cfg(unix)]
    pub fn flush_input(&mut self, timeout: Duration) -> Result<usize> {
        let mut spaces = vec![b' '; 18];
        spaces.extend_from_slice(b"\r\n");
        let steps: [&[u8]; 3] = [&spaces, b"exit\r\n", &[b' '; 10]];

        let mut discarded = 0usize;
        for step in steps {
            self.write_all_flush(step)?;
            discarded += self.drain(timeout)?;
        }
        debug!(discarded, "flushed master input");
        Ok(discarded)
    }

    #[cfg(unix)]
    fn drain(&mut self, timeout: Duration) -> Result<usize> {
        let mut chunk = [0u8; FLUSH_CHUNK_SIZE];
        let mut total = 0usize;
        for _ in 0..FLUSH_MAX_READS {
            if !self.wait_readable(timeout)? {
                break;
            }
            match self.read_available(&mut chunk) {
                Ok(n) => {
                    trace!(n, "discarding input");
                    total += n;
                }
                Err(TransportError::Closed) => break,
                Err(err) => return Err(err),
            }
        }
        Ok(total)
    }
}

#[cfg(unix)]
fn poll_readable(fd: std::os::fd::RawFd, timeout: Duration) -> Result<bool> {
    let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    loop {
        // SAFETY: `pfd` is a valid, writable pollfd and we pass a count of exactly one;
        // `fd` is owned by a live stream for the duration of the call.
        let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                continue;
            }
            return Err(TransportError::Io(err));
        }
        return Ok(rc > 0 && pfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0);
    }
}

impl std::fmt::Debug for LinkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            #[cfg(unix)]
            LinkStreamInner::Serial(_) => f.debug_struct("LinkStream").field("type", &"serial").finish(),
            #[cfg(unix)]
            LinkStreamInner::Unix(_) => f.debug_struct("LinkStream").field("type", &"unix").finish(),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::net::UnixStream;
    use std::thread;

    use super::*;

    fn pair() -> (LinkStream, UnixStream) {
        let (left, right) = UnixStream::pair().unwrap();
        (LinkStream::from_unix(left), right)
    }

    #[test]
    fn wait_readable_times_out_without_data() {
        let (link, _peer) = pair();
        let ready = link.wait_readable(Duration::from_millis(20)).unwrap();
        assert!(!ready);
    }

    #[test]
    fn wait_readable_reports_pending_bytes() {
        let (mut link, mut peer) = pair();
        peer.write_all(b"OK").unwrap();

        assert!(link.wait_readable(Duration::from_millis(500)).unwrap());
        let mut buf = [0u8; 8];
        let n = link.read_available(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"OK");
    }

    #[test]
    fn read_available_reports_closed_on_eof() {
        let (mut link, peer) = pair();
        drop(peer);

        assert!(link.wait_readable(Duration::from_millis(500)).unwrap());
        let mut buf = [0u8; 8];
        assert!(matches!(
            link.read_available(&mut buf),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn clone_shares_the_same_stream() {
        let (link, mut peer) = pair();
        let mut writer = link.try_clone().unwrap();
        writer.write_all_flush(b"STRBA").unwrap();

        let mut buf = [0u8; 5];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"STRBA");
    }

    #[test]
    fn flush_input_sends_wakeup_sequence_and_discards_replies() {
        let (mut link, mut peer) = pair();

        let master = thread::spawn(move || {
            let mut expected = vec![b' '; 18];
            expected.extend_from_slice(b"\r\nexit\r\n");
            expected.extend_from_slice(&[b' '; 10]);

            let mut seen = Vec::new();
            let mut buf = [0u8; 64];
            let mut replied = false;
            while seen.len() < expected.len() {
                let n = peer.read(&mut buf).unwrap();
                seen.extend_from_slice(&buf[..n]);
                if !replied {
                    peer.write_all(b"garbage").unwrap();
                    replied = true;
                }
            }
            assert_eq!(seen, expected);
            peer
        });

        let discarded = link.flush_input(Duration::from_millis(200)).unwrap();
        let _peer = master.join().unwrap();
        assert_eq!(discarded, 7);
    }
}
