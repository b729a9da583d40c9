use tracing::error;

use crate::commands::error_reply;
use crate::resp;
use crate::server::Server;

/// Writes a snapshot of every database to the configured file.
#[derive(Debug, PartialEq)]
pub struct Save;

impl Save {
    pub async fn exec(self, server: &Server) -> Vec<u8> {
        match server.save_snapshot().await {
            Ok(_) => {
                let mut buf = Vec::new();
                resp::append_ok(&mut buf);
                buf
            }
            Err(err) => {
                error!(%err, "snapshot save failed");
                error_reply(&format!("ERR {err}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::replication::{Replication, Role};
    use crate::snapshot;
    use crate::store::Store;
    use bytes::Bytes;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn save_writes_a_loadable_snapshot() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            port: 6379,
            dir: dir.path().to_path_buf(),
            dbfilename: "dump.rdb".to_string(),
            replicaof: None,
        };
        let store = Store::new();
        store.set("k".to_string(), Bytes::from("v"), 0);
        let server = Server::new(
            config.clone(),
            vec![store],
            Arc::new(Replication::new(Role::Master)),
        );

        assert_eq!(Save.exec(&server).await, b"+OK\r\n");

        let bytes = std::fs::read(config.db_path()).unwrap();
        let databases = snapshot::load(&bytes).unwrap();
        assert_eq!(databases[0].entries[0].key, "k");
    }
}
