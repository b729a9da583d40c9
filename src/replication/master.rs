//! Master-side replication: full resynchronization, command propagation,
//! and the WAIT primitive.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, info, warn};

use crate::replication::{ReplicaHandle, Replication, ReplicationError};
use crate::resp;
use crate::server::Server;

/// Answers an accepted `PSYNC ? -1`: sends the `+FULLRESYNC` line, saves a
/// fresh snapshot to the configured file, and streams it as a bulk frame
/// with no trailing terminator. The caller registers the connection as a
/// replica afterwards.
pub async fn full_resync(conn: &mut TcpStream, server: &Server) -> crate::Result<()> {
    let repl = server.repl();
    let mut header = Vec::new();
    resp::append_simple(
        &mut header,
        &format!("FULLRESYNC {} {}", repl.replid(), repl.offset()),
    );
    conn.write_all(&header).await?;

    let snapshot = server
        .save_snapshot()
        .await
        .map_err(ReplicationError::FullResyncFailed)?;

    conn.write_all(format!("${}\r\n", snapshot.len()).as_bytes())
        .await?;
    conn.write_all(&snapshot).await?;

    info!(bytes = snapshot.len(), "streamed snapshot to new replica");
    Ok(())
}

impl Replication {
    /// Serializes the command and writes it to every replica. The replica
    /// list stays locked across the fan-out so concurrent writers cannot
    /// interleave their commands differently on different replicas.
    /// Replicas that fail the write are dropped.
    pub async fn propagate(&self, args: &[Bytes]) {
        let payload = Bytes::from(resp::encode_command(args));
        let mut replicas = self.replicas.lock().await;
        self.add_offset(payload.len() as i64);
        if replicas.is_empty() {
            return;
        }
        debug!(replicas = replicas.len(), "propagating command");

        let mut writes = JoinSet::new();
        for (idx, handle) in replicas.iter().enumerate() {
            let handle = Arc::clone(handle);
            let payload = payload.clone();
            writes.spawn(async move {
                let mut writer = handle.writer.lock().await;
                (idx, writer.write_all(&payload).await.is_ok())
            });
        }

        let mut failed = Vec::new();
        while let Some(result) = writes.join_next().await {
            if let Ok((idx, ok)) = result {
                if !ok {
                    failed.push(idx);
                }
            }
        }

        if !failed.is_empty() {
            warn!(count = failed.len(), "dropping unreachable replicas");
            let mut idx = 0;
            replicas.retain(|_| {
                let keep = !failed.contains(&idx);
                idx += 1;
                keep
            });
        }
    }

    /// `WAIT numreplicas timeout_ms`: counts replicas whose acknowledged
    /// offset has reached the master's current offset. Lagging replicas
    /// are probed with `REPLCONF GETACK *` in parallel; the reply goes out
    /// as soon as the requested count is reached or the deadline fires.
    pub async fn wait(&self, numreplicas: i64, timeout_ms: i64) -> i64 {
        let target = self.offset();
        let deadline = Instant::now() + Duration::from_millis(timeout_ms.max(0) as u64);
        let handles: Vec<Arc<ReplicaHandle>> = self.replicas.lock().await.clone();

        let acked = Arc::new(AtomicI64::new(0));
        let notify = Arc::new(Notify::new());
        let mut lagging = 0;

        for handle in &handles {
            if handle.ack_offset.load(Ordering::SeqCst) >= target {
                acked.fetch_add(1, Ordering::SeqCst);
            } else {
                lagging += 1;
                tokio::spawn(probe_ack(
                    Arc::clone(handle),
                    target,
                    deadline,
                    Arc::clone(&acked),
                    Arc::clone(&notify),
                ));
            }
        }

        while lagging > 0 && acked.load(Ordering::SeqCst) < numreplicas {
            tokio::select! {
                _ = notify.notified() => {}
                _ = time::sleep_until(deadline) => break,
            }
        }

        acked.load(Ordering::SeqCst)
    }
}

// One in-flight probe per replica: the reader mutex is held across
// request and reply so a late ACK cannot be attributed to a newer probe.
async fn probe_ack(
    handle: Arc<ReplicaHandle>,
    target: i64,
    deadline: Instant,
    acked: Arc<AtomicI64>,
    notify: Arc<Notify>,
) {
    match time::timeout_at(deadline, request_ack(&handle)).await {
        Ok(Ok(offset)) => {
            handle.ack_offset.fetch_max(offset, Ordering::SeqCst);
            if offset >= target {
                acked.fetch_add(1, Ordering::SeqCst);
                notify.notify_one();
            }
        }
        Ok(Err(err)) => debug!(%err, "ack probe failed"),
        Err(_) => debug!("ack probe deadline elapsed"),
    }
}

async fn request_ack(handle: &ReplicaHandle) -> crate::Result<i64> {
    let mut reader = handle.reader.lock().await;
    {
        let mut writer = handle.writer.lock().await;
        writer
            .write_all(&resp::encode_command(["REPLCONF", "GETACK", "*"]))
            .await?;
    }

    let mut buf = BytesMut::with_capacity(128);
    loop {
        match resp::parse_command(&buf) {
            Ok((args, _)) => {
                if args.len() == 3
                    && args[0].eq_ignore_ascii_case(b"REPLCONF")
                    && args[1].eq_ignore_ascii_case(b"ACK")
                {
                    let offset = std::str::from_utf8(args[2])?.parse::<i64>()?;
                    return Ok(offset);
                }
                return Err("unexpected reply to GETACK".into());
            }
            Err(resp::ParseError::Incomplete) => {
                if reader.read_buf(&mut buf).await? == 0 {
                    return Err("replica closed during ack probe".into());
                }
            }
            Err(err) => return Err(err.into()),
        }
    }
}
