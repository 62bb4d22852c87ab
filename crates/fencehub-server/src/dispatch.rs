use fencehub_proto::{
    HEADER_SIZE, KEY_NODENAME, KEY_SECRET, MsgHeader, MsgType, ProtoError, read_field,
    split_key_value,
};
use tracing::{info, warn};

use crate::{
    backend::FenceBackend,
    conn::{Connection, IoOp, Phase},
    queue::SlotIdx,
    state::ServerShared,
};

/// Fencing operation selected by the request's message type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FenceOp {
    Off,
    On,
    Reboot,
}

impl FenceOp {
    fn label(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::On => "ON",
            Self::Reboot => "REBOOT",
        }
    }
}

/// Worker body for one popped connection: parse the request, invoke the
/// back-end where applicable, stage the reply, and re-integrate the
/// connection with the selector.
pub fn execute(shared: &ServerShared, backend: &dyn FenceBackend, idx: SlotIdx) {
    {
        let mut conn = shared.pool.lock_slot(idx);
        conn.phase = Phase::Executing;
        process_message(&mut conn, backend);
    }
    reintegrate(shared, idx);
}

fn process_message(conn: &mut Connection, backend: &dyn FenceBackend) {
    match MsgType::from_u16(conn.header.msg_type) {
        Some(MsgType::EchoRequest) => {
            conn.clear_io_buffer();
            conn.header = MsgHeader::reply(MsgType::EchoReply);
            conn.phase = Phase::Send;
            conn.next_phase = Phase::Recv;
            conn.io_state = IoOp::Write;
        }
        Some(MsgType::FenceOff) => fence_action(conn, backend, FenceOp::Off),
        Some(MsgType::FenceOn) => fence_action(conn, backend, FenceOp::On),
        Some(MsgType::FenceReboot) => fence_action(conn, backend, FenceOp::Reboot),
        Some(MsgType::VersionRequest) => {
            // Not part of the wire protocol's current revision; closing
            // beats leaving the client waiting for a reply that never
            // comes.
            warn!(peer = ?conn.peer_addr, "version request not supported");
            conn.phase = Phase::Canceled;
        }
        _ => {
            warn!(
                peer = ?conn.peer_addr,
                msg_type = conn.header.msg_type,
                "request with a server-direction or unknown message type"
            );
            conn.phase = Phase::Canceled;
        }
    }
}

fn fence_action(conn: &mut Connection, backend: &dyn FenceBackend, op: FenceOp) {
    if let Err(err) = parse_fence_fields(conn) {
        warn!(peer = ?conn.peer_addr, %err, "protocol error in fencing request");
        conn.phase = Phase::Canceled;
        conn.io_state = IoOp::Noop;
        return;
    }

    conn.clear_io_buffer();
    conn.header.clear();

    if conn.nodename.is_empty() {
        warn!(peer = ?conn.peer_addr, "fencing request without a node name");
        conn.phase = Phase::Canceled;
        conn.io_state = IoOp::Noop;
        return;
    }

    let node = String::from_utf8_lossy(conn.nodename.as_slice()).into_owned();
    info!(action = op.label(), node = %node, "executing fencing action");
    let success = match op {
        FenceOp::Off => backend.power_off(conn.nodename.as_slice()),
        FenceOp::On => backend.power_on(conn.nodename.as_slice()),
        FenceOp::Reboot => backend.reboot(conn.nodename.as_slice()),
    };
    if success {
        info!(action = op.label(), node = %node, "fencing action succeeded");
    } else {
        warn!(action = op.label(), node = %node, "fencing action failed");
    }

    conn.header =
        MsgHeader::reply(if success { MsgType::FenceSuccess } else { MsgType::FenceFail });
    conn.phase = Phase::Send;
    // Disconnect after the reply; one fencing action per connection in
    // this release.
    conn.next_phase = Phase::Canceled;
    conn.io_state = IoOp::Write;
}

/// Walks the payload fields and routes NODENAME/SECRET into their
/// bounded buffers. Unknown keys are skipped; the secret is opaque auth
/// material handed to the back-end policy, not interpreted here.
fn parse_fence_fields(conn: &mut Connection) -> Result<(), ProtoError> {
    let data_len = conn.io_offset;
    let mut offset = HEADER_SIZE;
    while offset < data_len {
        read_field(&conn.io_buffer, data_len, &mut offset, &mut conn.key)?;
        split_key_value(&mut conn.key, &mut conn.value)?;
        if *conn.key == *KEY_NODENAME {
            conn.nodename.assign(conn.value.as_slice())?;
        } else if *conn.key == *KEY_SECRET {
            conn.secret.assign(conn.value.as_slice())?;
        }
    }
    Ok(())
}

/// Hands the connection back to the selector, or closes it.
///
/// Connections that still have I/O to do rejoin the I/O queue and the
/// selector is woken; once shutdown has started they are closed here
/// instead, because the selector will never service them again.
fn reintegrate(shared: &ServerShared, idx: SlotIdx) {
    let mut io = shared.lock_io();
    let phase = shared.pool.lock_slot(idx).phase;
    match phase {
        Phase::Recv | Phase::Send => {
            if shared.stop.is_signaled() {
                shared.close_connection(&mut io, idx);
            } else {
                io.queue.push_back(idx);
                io.wake_selector();
            }
        }
        _ => shared.close_connection(&mut io, idx),
    }
}
