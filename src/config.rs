use std::path::{Path, PathBuf};

/// Runtime configuration, assembled by the CLI in `bin/server.rs`.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Directory holding the snapshot file.
    pub dir: PathBuf,
    /// Snapshot file name inside `dir`.
    pub dbfilename: String,
    /// `host:port` of the master to replicate from. `None` makes this
    /// server a master.
    pub replicaof: Option<String>,
}

impl Config {
    pub fn db_path(&self) -> PathBuf {
        Path::new(&self.dir).join(&self.dbfilename)
    }

    pub fn is_replica(&self) -> bool {
        self.replicaof.is_some()
    }
}
