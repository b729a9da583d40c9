use std::path::PathBuf;

use clap::Parser;
use rudis::config::Config;
use rudis::{server, Error};

const PORT: u16 = 6379;

#[derive(Parser, Debug)]
struct Args {
    /// The port to listen on
    #[arg(short, long, default_value_t = PORT)]
    port: u16,

    /// Directory holding the snapshot file
    #[arg(long, default_value = "/tmp/rudis-data")]
    dir: PathBuf,

    /// Snapshot file name inside the data directory
    #[arg(long, default_value = "dump.rdb")]
    dbfilename: String,

    /// Replicate from the given master, as host:port
    #[arg(long)]
    replicaof: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    server::run(Config {
        port: args.port,
        dir: args.dir,
        dbfilename: args.dbfilename,
        replicaof: args.replicaof,
    })
    .await
}
