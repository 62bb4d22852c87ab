use std::{
    io,
    os::fd::RawFd,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use signal_hook::{
    SigId,
    consts::{SIGHUP, SIGINT, SIGTERM},
    flag,
    low_level::{self, pipe},
};
use tracing::debug;

/// Signals that drive an orderly shutdown.
const STOP_SIGNALS: [i32; 3] = [SIGHUP, SIGINT, SIGTERM];

/// Non-blocking self-pipe used to knock the selector out of its poll.
///
/// `trigger` is called from worker threads (under `com_lock`) and from
/// signal context via `signal-hook`'s pipe registration; a full pipe
/// means a wakeup is already pending and is ignored.
pub struct WakePipe {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl WakePipe {
    pub fn new() -> io::Result<Self> {
        let mut fds = [0; 2];
        // SAFETY: plain pipe2 call; fds is a valid out-parameter.
        let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { read_fd: fds[0], write_fd: fds[1] })
    }

    #[inline]
    pub fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    #[inline]
    pub fn write_fd(&self) -> RawFd {
        self.write_fd
    }

    /// Writes one wakeup byte. Interrupted writes are retried; a full
    /// pipe already wakes the selector, so `EAGAIN` is ignored.
    pub fn trigger(&self) {
        let byte = [1u8];
        loop {
            // SAFETY: write of one byte from a live stack buffer.
            let rc = unsafe { libc::write(self.write_fd, byte.as_ptr().cast(), 1) };
            if rc >= 0 {
                break;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                break;
            }
        }
    }

    /// Reads and discards every pending wakeup byte.
    pub fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            // SAFETY: read into a live stack buffer of the given size.
            let rc = unsafe { libc::read(self.read_fd, buf.as_mut_ptr().cast(), buf.len()) };
            if rc > 0 {
                continue;
            }
            if rc == 0 {
                break;
            }
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            break;
        }
    }
}

impl Drop for WakePipe {
    fn drop(&mut self) {
        // SAFETY: both descriptors were created by pipe2 and are closed
        // exactly once, here.
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

/// Process-wide stop flag fed by SIGINT/SIGTERM/SIGHUP.
///
/// Signal delivery sets the flag and, while a wakeup fd is registered,
/// writes one trigger byte to it from signal context (the self-pipe
/// registration is async-signal-safe). The selector polls
/// `is_signaled` at the top of every sweep.
pub struct StopSignal {
    flag: Arc<AtomicBool>,
    flag_ids: Vec<SigId>,
    pipe_ids: Mutex<Vec<SigId>>,
}

impl StopSignal {
    /// Installs the signal handlers. The wakeup fd is registered
    /// separately once the selector's pipe exists.
    pub fn install() -> io::Result<Self> {
        let flag = Arc::new(AtomicBool::new(false));
        let mut flag_ids = Vec::with_capacity(STOP_SIGNALS.len());
        for sig in STOP_SIGNALS {
            flag_ids.push(flag::register(sig, Arc::clone(&flag))?);
        }
        Ok(Self { flag, flag_ids, pipe_ids: Mutex::new(Vec::new()) })
    }

    /// Routes future signal deliveries to `fd` as well. The caller must
    /// keep `fd` open until `disable_wakeup_fd` runs.
    pub fn enable_wakeup_fd(&self, fd: RawFd) -> io::Result<()> {
        let mut ids = self.pipe_ids.lock().expect("signal pipe registration poisoned");
        for sig in STOP_SIGNALS {
            ids.push(pipe::register_raw(sig, fd)?);
        }
        Ok(())
    }

    /// Stops signal-context writes to the wakeup fd. Must run before
    /// the pipe descriptors are closed.
    pub fn disable_wakeup_fd(&self) {
        let mut ids = self.pipe_ids.lock().expect("signal pipe registration poisoned");
        for id in ids.drain(..) {
            low_level::unregister(id);
        }
    }

    #[inline]
    pub fn is_signaled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Trips the stop flag from regular (non-signal) code.
    pub fn signal(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

impl Drop for StopSignal {
    fn drop(&mut self) {
        self.disable_wakeup_fd();
        for id in self.flag_ids.drain(..) {
            low_level::unregister(id);
        }
        debug!("signal handlers removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_then_drain() {
        let pipe = WakePipe::new().unwrap();
        pipe.trigger();
        pipe.trigger();
        pipe.drain();

        let mut buf = [0u8; 8];
        // SAFETY: read into a live stack buffer.
        let rc = unsafe { libc::read(pipe.read_fd(), buf.as_mut_ptr().cast(), buf.len()) };
        assert_eq!(rc, -1, "pipe should be empty after drain");
    }

    #[test]
    fn full_pipe_does_not_block_trigger() {
        let pipe = WakePipe::new().unwrap();
        // A pipe has finite capacity; triggering far past it must not
        // wedge the caller.
        for _ in 0..(128 * 1024) {
            pipe.trigger();
        }
        pipe.drain();
    }

    #[test]
    fn manual_signal_trips_flag() {
        let stop = StopSignal::install().unwrap();
        assert!(!stop.is_signaled());
        stop.signal();
        assert!(stop.is_signaled());
    }
}
