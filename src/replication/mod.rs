pub mod master;
pub mod replica;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use thiserror::Error as ThisError;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Fixed 40-hex replication ID. Partial resynchronization is out of scope,
/// so nothing ever compares IDs across restarts.
pub const REPLICATION_ID: &str = "8371b4fb1155b71f4a04d3e1bc3e18c4a990aeeb";

#[derive(Debug, ThisError)]
pub enum ReplicationError {
    #[error("replication handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("full resync failed: {0}")]
    FullResyncFailed(crate::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Replica,
}

impl Role {
    /// The role name used on the wire and in INFO output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Replica => "slave",
        }
    }
}

/// One accepted replica: its socket, split so propagation writes never
/// wait behind an in-flight ACK read, and the highest offset it has
/// acknowledged. The reader mutex is the ordering lock: at most one
/// in-flight GETACK probe per replica.
pub struct ReplicaHandle {
    pub(crate) reader: Mutex<OwnedReadHalf>,
    pub(crate) writer: Mutex<OwnedWriteHalf>,
    pub(crate) ack_offset: AtomicI64,
}

/// Replication state shared by every connection task.
pub struct Replication {
    role: Role,
    replid: String,
    offset: AtomicI64,
    replicas: Mutex<Vec<Arc<ReplicaHandle>>>,
}

impl Replication {
    pub fn new(role: Role) -> Replication {
        Replication {
            role,
            replid: REPLICATION_ID.to_string(),
            offset: AtomicI64::new(0),
            replicas: Mutex::new(Vec::new()),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn replid(&self) -> &str {
        &self.replid
    }

    /// Master: total bytes of propagated commands. Replica: total bytes
    /// consumed from the master. Monotone non-decreasing either way.
    pub fn offset(&self) -> i64 {
        self.offset.load(Ordering::SeqCst)
    }

    pub fn add_offset(&self, n: i64) {
        self.offset.fetch_add(n, Ordering::SeqCst);
    }

    /// Promotes a finished PSYNC connection to a replica. The new replica
    /// starts fully acknowledged: it just received a snapshot taken at the
    /// current offset.
    pub async fn register_replica(&self, conn: TcpStream) {
        let (reader, writer) = conn.into_split();
        let handle = Arc::new(ReplicaHandle {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            ack_offset: AtomicI64::new(self.offset()),
        });
        self.replicas.lock().await.push(handle);
    }

    pub async fn replica_count(&self) -> usize {
        self.replicas.lock().await.len()
    }
}
