use std::io;
use std::os::unix::io::RawFd;

///
/// The descriptors watched by one pass of the event loop.  add()
/// returns a slot used to ask about the descriptor after poll().
///
#[derive(Debug, Default)]
pub struct Fdset {
    fds: Vec<libc::pollfd>,
}

impl Fdset {
    pub fn new() -> Fdset {
        Fdset::default()
    }

    pub fn len(&self) -> usize {
        self.fds.len()
    }
    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    pub fn add(&mut self, fd: RawFd, read: bool, write: bool) -> usize {
        let mut events = 0;
        if read {
            events |= libc::POLLIN;
        }
        if write {
            events |= libc::POLLOUT;
        }
        self.fds.push(libc::pollfd {
            fd,
            events,
            revents: 0,
        });
        self.fds.len() - 1
    }
    ///
    /// Wait at most `timeout_ms` for any descriptor to become ready.
    /// Returns the number of ready descriptors; an interrupted wait
    /// counts as a timeout.
    ///
    pub fn poll(&mut self, timeout_ms: i32) -> io::Result<usize> {
        for p in self.fds.iter_mut() {
            p.revents = 0;
        }
        let n = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout_ms,
            )
        };
        if n < 0 {
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(e);
        }
        Ok(n as usize)
    }
    ///
    /// Readable, or hung up / in error: a read will not block.
    ///
    pub fn readable(&self, slot: usize) -> bool {
        self.fds
            .get(slot)
            .map_or(false, |p| p.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0)
    }
    pub fn writable(&self, slot: usize) -> bool {
        self.fds
            .get(slot)
            .map_or(false, |p| p.revents & (libc::POLLOUT | libc::POLLERR) != 0)
    }
}

#[cfg(test)]
mod fdset_test {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn reports_readiness() {
        let (mut a, b) = UnixStream::pair().unwrap();
        let mut fds = Fdset::new();
        let slot = fds.add(b.as_raw_fd(), true, false);
        assert_eq!(fds.poll(0).unwrap(), 0);
        assert!(!fds.readable(slot));

        a.write_all(b"x").unwrap();
        assert_eq!(fds.poll(1000).unwrap(), 1);
        assert!(fds.readable(slot));
        assert!(!fds.writable(slot));
        assert!(!fds.readable(slot + 1));
    }

    #[test]
    fn write_interest() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut fds = Fdset::new();
        let slot = fds.add(a.as_raw_fd(), false, true);
        assert_eq!(fds.poll(1000).unwrap(), 1);
        assert!(fds.writable(slot));
        assert_eq!(fds.len(), 1);
    }
}
