//! Replica-side replication: handshake with the master, snapshot
//! download, and the steady-state command stream consumer.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error, info};

use crate::codec::Wire;
use crate::config::Config;
use crate::connection::Connection;
use crate::replication::ReplicationError;
use crate::resp;
use crate::server::Server;

/// The outcome of a successful handshake: the master connection, any
/// command-stream bytes that arrived on the tail of the snapshot, and the
/// master's replication offset at the moment of the resync. The offset
/// seeds the replica's own counter so acknowledgements line up with the
/// master's absolute numbering.
pub struct MasterLink {
    pub stream: TcpStream,
    pub leftover: BytesMut,
    pub start_offset: i64,
}

/// Dials the master, performs the handshake, and downloads the full
/// snapshot to the configured file.
pub async fn sync(addr: &str, config: &Config) -> crate::Result<MasterLink> {
    let mut stream = TcpStream::connect(addr).await?;
    let mut buf = BytesMut::with_capacity(4096);

    stream.write_all(&resp::encode_command(["PING"])).await?;
    expect_line(&mut stream, &mut buf, "+PONG").await?;

    let port = config.port.to_string();
    stream
        .write_all(&resp::encode_command([
            "REPLCONF",
            "listening-port",
            port.as_str(),
        ]))
        .await?;
    expect_line(&mut stream, &mut buf, "+OK").await?;

    stream
        .write_all(&resp::encode_command(["REPLCONF", "capa", "psync2"]))
        .await?;
    expect_line(&mut stream, &mut buf, "+OK").await?;

    stream.write_all(&resp::encode_command(["PSYNC", "?", "-1"])).await?;
    let line = read_line(&mut stream, &mut buf).await?;
    let rest = line.strip_prefix("+FULLRESYNC ").ok_or_else(|| {
        ReplicationError::HandshakeFailed(format!("unexpected PSYNC reply: {line}"))
    })?;
    let (replid, offset) = rest.split_once(' ').ok_or_else(|| {
        ReplicationError::HandshakeFailed(format!("invalid FULLRESYNC line: {line}"))
    })?;
    let start_offset = offset.parse::<i64>().map_err(|_| {
        ReplicationError::HandshakeFailed(format!("invalid FULLRESYNC offset: {offset}"))
    })?;
    info!(replid, offset = start_offset, "full resync granted by master");

    // `$<len>\r\n` followed by exactly `len` snapshot bytes; no trailing
    // CRLF after the payload.
    let header = read_line(&mut stream, &mut buf).await?;
    let len = header
        .strip_prefix('$')
        .and_then(|l| l.parse::<usize>().ok())
        .ok_or_else(|| {
            ReplicationError::HandshakeFailed(format!("invalid snapshot header: {header}"))
        })?;

    let mut payload = BytesMut::with_capacity(len);
    let buffered = buf.len().min(len);
    payload.extend_from_slice(&buf.split_to(buffered));
    while payload.len() < len {
        if stream.read_buf(&mut payload).await? == 0 {
            return Err(ReplicationError::HandshakeFailed(format!(
                "master closed with {} of {} snapshot bytes received",
                payload.len(),
                len
            ))
            .into());
        }
    }
    // Anything past the payload is the start of the command stream.
    let mut leftover = payload.split_off(len);
    leftover.extend_from_slice(&buf);

    if let Some(parent) = config.db_path().parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(config.db_path(), &payload).await?;
    info!(bytes = len, path = %config.db_path().display(), "snapshot received from master");

    Ok(MasterLink {
        stream,
        leftover,
        start_offset,
    })
}

/// Steady state: consume the master's command stream, apply write
/// commands, and answer GETACK probes. Every fully consumed frame,
/// applied or not, advances the replication offset by its wire length.
pub async fn run(server: Arc<Server>, stream: TcpStream, leftover: BytesMut) {
    let mut conn = Connection::from_parts(stream, leftover);
    info!("listening for commands from master");

    loop {
        let Wire { args, wire_len } = match conn.read_command().await {
            Ok(Some(wire)) => wire,
            Ok(None) => {
                info!("master disconnected");
                return;
            }
            Err(err) => {
                error!(%err, "error on master connection");
                return;
            }
        };

        let name = args.first().map(|a| a.to_ascii_lowercase());
        match name.as_deref() {
            Some(b"set") | Some(b"incr") | Some(b"xadd") => {
                let _ = server.execute(args).await;
            }
            Some(b"replconf") if args.len() >= 2 && args[1].eq_ignore_ascii_case(b"getack") => {
                // The acknowledged offset excludes this GETACK frame; its
                // own length is added below like any other frame.
                let offset = server.repl().offset().to_string();
                let ack = resp::encode_command(["REPLCONF", "ACK", offset.as_str()]);
                if let Err(err) = conn.write_all(&ack).await {
                    error!(%err, "failed to answer GETACK");
                    return;
                }
            }
            Some(other) => {
                debug!(
                    command = %String::from_utf8_lossy(other),
                    "not applying command from master"
                );
            }
            None => {}
        }

        server.repl().add_offset(wire_len as i64);
    }
}

async fn read_line(stream: &mut TcpStream, buf: &mut BytesMut) -> crate::Result<String> {
    loop {
        if let Some(pos) = buf.windows(2).position(|w| w == b"\r\n") {
            let line = buf.split_to(pos + 2);
            return Ok(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        if stream.read_buf(buf).await? == 0 {
            return Err(
                ReplicationError::HandshakeFailed("connection closed by master".to_string())
                    .into(),
            );
        }
    }
}

async fn expect_line(stream: &mut TcpStream, buf: &mut BytesMut, want: &str) -> crate::Result<()> {
    let line = read_line(stream, buf).await?;
    if line != want {
        return Err(ReplicationError::HandshakeFailed(format!(
            "expected {want}, got {line}"
        ))
        .into());
    }
    Ok(())
}
