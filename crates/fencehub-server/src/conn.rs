use std::{
    io::{self, Read, Write},
    net::SocketAddr,
    sync::{Mutex, MutexGuard},
};

use fencehub_proto::{
    FIELD_SIZE, HEADER_SIZE, IO_BUFFER_SIZE, MAX_NODENAME_LEN, MAX_SECRET_LEN, MsgHeader,
    ProtoError,
};
use fencehub_utils::{ByteBuf, safe_assert};
use mio::{Interest, net::TcpStream};
use tracing::{debug, warn};

use crate::queue::SlotIdx;

/// I/O direction the selector should arm for a queued connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoOp {
    Noop,
    Read,
    Write,
}

/// Connection lifecycle phase.
///
/// `Recv`/`Send` run under the selector, `Pending` sits on the action
/// queue, `Executing` is owned by a worker, `Canceled` is torn down at
/// the next opportunity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Recv,
    Send,
    Pending,
    Executing,
    Canceled,
}

/// Outcome of one `receive_step`/`send_step` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepResult {
    /// The frame transfer finished; advance the phase.
    Complete,
    /// The socket would block; wait for the next readiness event.
    NotReady,
    /// End of stream or a hard error; tear the connection down.
    Closed,
}

/// Per-client state, owned by a pool slot for the connection's whole
/// accept-to-close lifetime.
///
/// The single I/O buffer is shared between receive and send: the
/// dispatcher resets it before writing the reply header into it.
pub struct Connection {
    pub socket: Option<TcpStream>,
    pub peer_addr: Option<SocketAddr>,
    pub io_buffer: [u8; IO_BUFFER_SIZE],
    pub io_offset: usize,
    pub header: MsgHeader,
    pub have_header: bool,
    pub phase: Phase,
    pub next_phase: Phase,
    pub io_state: IoOp,
    /// Interest currently registered with the poller, if any. Only the
    /// selector thread reads or writes this.
    pub armed: Option<Interest>,
    pub key: ByteBuf<FIELD_SIZE>,
    pub value: ByteBuf<FIELD_SIZE>,
    pub nodename: ByteBuf<MAX_NODENAME_LEN>,
    pub secret: ByteBuf<MAX_SECRET_LEN>,
}

impl Connection {
    pub fn new() -> Self {
        Self {
            socket: None,
            peer_addr: None,
            io_buffer: [0; IO_BUFFER_SIZE],
            io_offset: 0,
            header: MsgHeader::new(),
            have_header: false,
            phase: Phase::Recv,
            next_phase: Phase::Pending,
            io_state: IoOp::Noop,
            armed: None,
            key: ByteBuf::new(),
            value: ByteBuf::new(),
            nodename: ByteBuf::new(),
            secret: ByteBuf::new(),
        }
    }

    /// Resets all per-request state and wipes the secret-bearing
    /// buffers. Dropping the socket closes it.
    pub fn clear(&mut self) {
        self.socket = None;
        self.peer_addr = None;
        self.phase = Phase::Recv;
        self.next_phase = Phase::Pending;
        self.io_state = IoOp::Noop;
        self.armed = None;
        self.header.clear();
        self.key.wipe();
        self.value.wipe();
        self.nodename.wipe();
        self.secret.wipe();
        self.clear_io_buffer();
    }

    /// Resets the framing cursor and zeroes the I/O buffer so the next
    /// transfer starts from a clean slate.
    pub fn clear_io_buffer(&mut self) {
        self.io_offset = 0;
        self.have_header = false;
        self.io_buffer = [0; IO_BUFFER_SIZE];
    }

    /// Drives one readable event: reads the 4-byte header, then the
    /// remainder of the frame, looping until the frame is complete or
    /// the socket would block.
    ///
    /// A decoded length above the buffer size is clamped to it; a
    /// length below the header size is a protocol violation and closes
    /// the connection without a reply.
    pub fn receive_step(&mut self) -> StepResult {
        loop {
            let target = if self.have_header { self.header.length as usize } else { HEADER_SIZE };
            if self.io_offset >= target {
                return StepResult::Complete;
            }
            let Some(stream) = self.socket.as_mut() else {
                return StepResult::Closed;
            };
            match stream.read(&mut self.io_buffer[self.io_offset..target]) {
                Ok(0) => return StepResult::Closed,
                Ok(read_size) => {
                    self.io_offset += read_size;
                    if self.have_header {
                        if self.io_offset >= self.header.length as usize {
                            return StepResult::Complete;
                        }
                    } else if self.io_offset >= HEADER_SIZE {
                        self.header = MsgHeader::decode(&self.io_buffer);
                        if (self.header.length as usize) < HEADER_SIZE {
                            let err = ProtoError::UndersizedFrame(self.header.length);
                            warn!(peer = ?self.peer_addr, %err, "protocol violation");
                            return StepResult::Closed;
                        }
                        if self.header.length as usize > IO_BUFFER_SIZE {
                            self.header.length = IO_BUFFER_SIZE as u16;
                        }
                        self.have_header = true;
                        if self.header.length as usize <= HEADER_SIZE {
                            return StepResult::Complete;
                        }
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return StepResult::NotReady;
                }
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    debug!(peer = ?self.peer_addr, ?err, "receive failed");
                    return StepResult::Closed;
                }
            }
        }
    }

    /// Drives one writable event: encodes the reply header on the first
    /// call, then writes until the frame is out or the socket would
    /// block.
    pub fn send_step(&mut self) -> StepResult {
        if !self.have_header {
            let length = (self.header.length as usize).clamp(HEADER_SIZE, IO_BUFFER_SIZE);
            self.header.length = length as u16;
            self.header.encode(&mut self.io_buffer);
            self.have_header = true;
        }
        loop {
            let length = self.header.length as usize;
            if self.io_offset >= length {
                return StepResult::Complete;
            }
            let Some(stream) = self.socket.as_mut() else {
                return StepResult::Closed;
            };
            match stream.write(&self.io_buffer[self.io_offset..length]) {
                Ok(0) => return StepResult::Closed,
                Ok(write_size) => {
                    self.io_offset += write_size;
                    if self.io_offset >= length {
                        return StepResult::Complete;
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return StepResult::NotReady;
                }
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    debug!(peer = ?self.peer_addr, ?err, "send failed");
                    return StepResult::Closed;
                }
            }
        }
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-capacity connection pool.
///
/// The free list is LIFO and guarded by its own leaf-level mutex; each
/// slot carries its own mutex so the selector and a worker can never
/// touch the same connection concurrently.
pub struct ConnPool {
    slots: Vec<Mutex<Connection>>,
    free: Mutex<Vec<SlotIdx>>,
}

impl ConnPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Mutex::new(Connection::new())).collect(),
            free: Mutex::new((0..capacity).rev().collect()),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Takes a free slot, or `None` when the pool is exhausted. The
    /// selector's accept gating keeps exhaustion unreachable in
    /// practice.
    pub fn allocate(&self) -> Option<SlotIdx> {
        self.free.lock().expect("connection pool free list poisoned").pop()
    }

    /// Returns a slot to the free list. The caller must have cleared
    /// the connection first.
    pub fn deallocate(&self, idx: SlotIdx) {
        let mut free = self.free.lock().expect("connection pool free list poisoned");
        safe_assert!(!free.contains(&idx), "slot {idx} freed twice");
        if !free.contains(&idx) {
            free.push(idx);
        }
    }

    #[inline]
    pub fn slot(&self, idx: SlotIdx) -> &Mutex<Connection> {
        &self.slots[idx]
    }

    /// Convenience lock with the poison policy applied.
    pub fn lock_slot(&self, idx: SlotIdx) -> MutexGuard<'_, Connection> {
        self.slots[idx].lock().expect("connection slot poisoned")
    }

    pub fn free_count(&self) -> usize {
        self.free.lock().expect("connection pool free list poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_allocates_lifo_until_exhausted() {
        let pool = ConnPool::new(3);
        assert_eq!(pool.capacity(), 3);
        assert_eq!(pool.allocate(), Some(0));
        assert_eq!(pool.allocate(), Some(1));
        assert_eq!(pool.allocate(), Some(2));
        assert_eq!(pool.allocate(), None);

        pool.deallocate(1);
        assert_eq!(pool.allocate(), Some(1));
        assert_eq!(pool.allocate(), None);
    }

    #[test]
    fn pool_balance_is_preserved() {
        let pool = ConnPool::new(4);
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        assert_eq!(pool.free_count(), 2);
        pool.deallocate(a);
        pool.deallocate(b);
        assert_eq!(pool.free_count(), 4);
    }

    #[test]
    fn clear_wipes_request_state() {
        let mut conn = Connection::new();
        conn.io_offset = 10;
        conn.have_header = true;
        conn.header.msg_type = 0x0081;
        conn.header.length = 35;
        conn.phase = Phase::Executing;
        conn.next_phase = Phase::Canceled;
        conn.io_state = IoOp::Write;
        conn.nodename.assign(b"node7").unwrap();
        conn.secret.assign(b"s3cret").unwrap();
        conn.io_buffer[0] = 0xAB;

        conn.clear();

        assert_eq!(conn.io_offset, 0);
        assert!(!conn.have_header);
        assert_eq!(conn.header, MsgHeader::new());
        assert_eq!(conn.phase, Phase::Recv);
        assert_eq!(conn.next_phase, Phase::Pending);
        assert_eq!(conn.io_state, IoOp::Noop);
        assert!(conn.nodename.is_empty());
        assert!(conn.secret.is_empty());
        assert_eq!(conn.io_buffer, [0; IO_BUFFER_SIZE]);
        assert!(conn.socket.is_none());
    }
}
