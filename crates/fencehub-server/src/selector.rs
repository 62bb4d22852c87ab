use std::{io, net::SocketAddr, sync::Arc};

use fencehub_utils::safe_panic;
use mio::{Events, Interest, Poll, Token, net::TcpListener, unix::SourceFd};
use tracing::{debug, error, info, warn};

use crate::{
    MAX_CONNECTIONS, ServerError,
    conn::{IoOp, Phase, StepResult},
    state::ServerShared,
};

const LISTENER: Token = Token(MAX_CONNECTIONS);
const WAKEUP: Token = Token(MAX_CONNECTIONS + 1);

/// Readiness observed for each connection slot in one poll round.
struct Readiness {
    readable: [bool; MAX_CONNECTIONS],
    writable: [bool; MAX_CONNECTIONS],
    accept: bool,
    wakeup: bool,
}

/// The event loop at the center of the server.
///
/// One dedicated thread owns the poller, the listening socket, the
/// wakeup pipe's read end, and the I/O queue membership of every
/// connection. Each sweep arms interests from queue state, waits for
/// readiness, accepts while below the connection cap, and drives
/// per-connection receive/send steps. Poll tokens are pool slot
/// indices, with two reserved tokens for the listener and the wakeup
/// pipe.
pub struct Selector {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    listener_armed: bool,
    shared: Arc<ServerShared>,
}

impl Selector {
    pub fn bind(addr: SocketAddr, shared: Arc<ServerShared>) -> Result<Self, ServerError> {
        let mut listener =
            TcpListener::bind(addr).map_err(|source| ServerError::Bind { addr, source })?;
        let poll = Poll::new().map_err(ServerError::Poll)?;

        {
            let io = shared.lock_io();
            let wake = io.wake.as_ref().expect("wakeup pipe closed before startup");
            poll.registry()
                .register(&mut SourceFd(&wake.read_fd()), WAKEUP, Interest::READABLE)
                .map_err(ServerError::Wakeup)?;
        }
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .map_err(ServerError::Poll)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(MAX_CONNECTIONS + 2),
            listener,
            listener_armed: true,
            shared,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the selector loop until the stop signal trips, then tears
    /// everything down. Fatal loop errors also run the teardown before
    /// propagating.
    pub fn run(&mut self) -> Result<(), ServerError> {
        {
            let io = self.shared.lock_io();
            let wake = io.wake.as_ref().expect("wakeup pipe closed before startup");
            self.shared
                .stop
                .enable_wakeup_fd(wake.write_fd())
                .map_err(ServerError::Signals)?;
        }

        let result = self.selector_loop();
        self.cleanup();
        result
    }

    fn selector_loop(&mut self) -> Result<(), ServerError> {
        while !self.shared.stop.is_signaled() {
            self.arm_interests().map_err(ServerError::Poll)?;

            match self.poll.poll(&mut self.events, None) {
                Ok(()) => {}
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(ServerError::Poll(err)),
            }

            let mut ready = Readiness {
                readable: [false; MAX_CONNECTIONS],
                writable: [false; MAX_CONNECTIONS],
                accept: false,
                wakeup: false,
            };
            for event in &self.events {
                match event.token() {
                    LISTENER => ready.accept = true,
                    WAKEUP => ready.wakeup = true,
                    Token(idx) if idx < MAX_CONNECTIONS => {
                        // Error and peer-close conditions are folded
                        // into both directions; the receive/send step
                        // surfaces them as a closed connection.
                        if event.is_readable() || event.is_read_closed() || event.is_error() {
                            ready.readable[idx] = true;
                        }
                        if event.is_writable() || event.is_write_closed() || event.is_error() {
                            ready.writable[idx] = true;
                        }
                    }
                    token => safe_panic!("event for unknown token {token:?}"),
                }
            }

            if ready.accept {
                self.accept_connections();
            }
            if ready.wakeup {
                let io = self.shared.lock_io();
                if let Some(wake) = &io.wake {
                    wake.drain();
                }
            }
            self.service_connections(&ready);
        }
        Ok(())
    }

    /// Reconciles poll registrations with queue state under `com_lock`.
    ///
    /// The listener is only watched while there is room for another
    /// connection, which is what makes pool exhaustion unreachable.
    fn arm_interests(&mut self) -> io::Result<()> {
        let mut io = self.shared.lock_io();

        let want_listener = io.queue.len() < self.shared.pool.capacity();
        if want_listener != self.listener_armed {
            if want_listener {
                self.poll.registry().register(&mut self.listener, LISTENER, Interest::READABLE)?;
            } else {
                self.poll.registry().deregister(&mut self.listener)?;
            }
            self.listener_armed = want_listener;
        }

        let mut failed = Vec::new();
        let mut cursor = io.queue.first();
        while let Some(idx) = cursor {
            cursor = io.queue.next_of(idx);
            let mut conn = self.shared.pool.lock_slot(idx);
            let want = match conn.io_state {
                IoOp::Read => Some(Interest::READABLE),
                IoOp::Write => Some(Interest::WRITABLE),
                IoOp::Noop => None,
            };
            if conn.armed == want {
                continue;
            }
            let armed = conn.armed;
            let Some(stream) = conn.socket.as_mut() else {
                continue;
            };
            let registered = match (armed, want) {
                (None, Some(interest)) => {
                    self.poll.registry().register(stream, Token(idx), interest)
                }
                (Some(_), Some(interest)) => {
                    self.poll.registry().reregister(stream, Token(idx), interest)
                }
                (Some(_), None) => self.poll.registry().deregister(stream),
                (None, None) => Ok(()),
            };
            match registered {
                Ok(()) => conn.armed = want,
                Err(err) => {
                    // Contained to this connection, like any other
                    // per-client I/O failure.
                    warn!(peer = ?conn.peer_addr, ?err, "poll registration failed");
                    drop(conn);
                    failed.push(idx);
                }
            }
        }
        for idx in failed {
            self.shared.close_connection(&mut io, idx);
        }
        Ok(())
    }

    /// Accepts pending connections while the I/O queue has room.
    fn accept_connections(&mut self) {
        loop {
            {
                let io = self.shared.lock_io();
                if io.queue.len() >= self.shared.pool.capacity() {
                    break;
                }
            }
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    let Some(idx) = self.shared.pool.allocate() else {
                        // Unreachable while the listener gating holds.
                        error!(?peer_addr, "connection pool exhausted, dropping connection");
                        drop(stream);
                        continue;
                    };
                    {
                        let mut conn = self.shared.pool.lock_slot(idx);
                        conn.clear();
                        conn.socket = Some(stream);
                        conn.peer_addr = Some(peer_addr);
                        conn.io_state = IoOp::Read;
                        conn.phase = Phase::Recv;
                        conn.next_phase = Phase::Pending;
                    }
                    let mut io = self.shared.lock_io();
                    io.queue.push_back(idx);
                    debug!(?peer_addr, slot = idx, "client connected");
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    warn!(?err, "accept failed");
                    break;
                }
            }
        }
    }

    /// Walks the I/O queue once, driving receive/send on the ready
    /// connections and advancing phases on completion.
    fn service_connections(&mut self, ready: &Readiness) {
        let mut io = self.shared.lock_io();
        let mut cursor = io.queue.first();
        while let Some(idx) = cursor {
            // Teardown may unlink the current slot, so fetch the
            // successor first.
            cursor = io.queue.next_of(idx);

            let mut conn = self.shared.pool.lock_slot(idx);
            if conn.phase == Phase::Canceled {
                drop(conn);
                self.shared.close_connection(&mut io, idx);
                continue;
            }

            // The armed io_state decides which step runs; readiness for
            // the other direction can only mean an error condition and
            // is picked up by the step itself.
            if conn.io_state == IoOp::Read && ready.readable[idx] {
                match conn.receive_step() {
                    StepResult::Complete => {
                        conn.phase = conn.next_phase;
                        match conn.phase {
                            Phase::Pending => {
                                // No events may arrive while a worker
                                // owns the connection.
                                if let Some(stream) = conn.socket.as_mut() {
                                    let _ = self.poll.registry().deregister(stream);
                                }
                                conn.armed = None;
                                conn.io_state = IoOp::Noop;
                                drop(conn);
                                io.queue.remove(idx);
                                let mut actions = self.shared.actions.lock();
                                actions.queue.push_back(idx);
                                self.shared.actions.notify();
                            }
                            Phase::Canceled => {
                                drop(conn);
                                self.shared.close_connection(&mut io, idx);
                            }
                            _ => {}
                        }
                    }
                    StepResult::NotReady => {}
                    StepResult::Closed => {
                        drop(conn);
                        self.shared.close_connection(&mut io, idx);
                    }
                }
            } else if conn.io_state == IoOp::Write && ready.writable[idx] {
                match conn.send_step() {
                    StepResult::Complete => {
                        conn.phase = conn.next_phase;
                        match conn.phase {
                            Phase::Recv => {
                                conn.clear_io_buffer();
                                conn.next_phase = Phase::Pending;
                                conn.io_state = IoOp::Read;
                            }
                            Phase::Canceled => {
                                drop(conn);
                                self.shared.close_connection(&mut io, idx);
                            }
                            _ => {}
                        }
                    }
                    StepResult::NotReady => {}
                    StepResult::Closed => {
                        drop(conn);
                        self.shared.close_connection(&mut io, idx);
                    }
                }
            }
        }
    }

    /// Tears the whole connector down: the listener, every queued
    /// connection on both queues, and finally the wakeup pipe.
    fn cleanup(&mut self) {
        info!("shutting down network connector");
        if self.listener_armed {
            let _ = self.poll.registry().deregister(&mut self.listener);
            self.listener_armed = false;
        }

        // Pop the action queue first, then close under com_lock; the
        // com-before-action lock order forbids holding both.
        let pending: Vec<_> = {
            let mut actions = self.shared.actions.lock();
            let mut drained = Vec::with_capacity(actions.queue.len());
            while let Some(idx) = actions.queue.pop_front() {
                drained.push(idx);
            }
            drained
        };

        let mut io = self.shared.lock_io();
        self.shared.stop.disable_wakeup_fd();
        self.shared.stop.signal();
        for idx in pending {
            self.shared.close_connection(&mut io, idx);
        }
        while let Some(idx) = io.queue.first() {
            self.shared.close_connection(&mut io, idx);
        }
        // Dropping the pipe closes both descriptors; the signal-side
        // registration was removed above.
        io.wake = None;
    }
}
