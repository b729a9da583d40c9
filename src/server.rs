use std::sync::Arc;

use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use crate::codec::Wire;
use crate::commands::config::Config as ConfigCmd;
use crate::commands::echo::Echo;
use crate::commands::get::Get;
use crate::commands::incr::Incr;
use crate::commands::info::Info;
use crate::commands::keys::Keys;
use crate::commands::ping::Ping;
use crate::commands::save::Save;
use crate::commands::set::Set;
use crate::commands::type_::Type;
use crate::commands::xadd::Xadd;
use crate::commands::xrange::Xrange;
use crate::commands::xread::Xread;
use crate::commands::{self, error_reply, Args, CommandError};
use crate::config::Config;
use crate::connection::Connection;
use crate::replication::{master, replica, Replication, Role};
use crate::resp;
use crate::snapshot::{self, Database};
use crate::store::Store;
use crate::transaction::Transaction;

pub struct Server {
    config: Config,
    /// Databases by index; the dispatcher always works on index 0. Higher
    /// indices exist only when a snapshot carried them.
    stores: Vec<Store>,
    repl: Arc<Replication>,
}

pub async fn run(config: Config) -> crate::Result<()> {
    let _ = tracing_subscriber::fmt()
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let role = if config.is_replica() {
        Role::Replica
    } else {
        Role::Master
    };
    let repl = Arc::new(Replication::new(role));

    // A replica first pulls a fresh snapshot from its master; the stores
    // are then built from the file it just wrote.
    let master_link = match &config.replicaof {
        Some(addr) => Some(replica::sync(addr, &config).await?),
        None => None,
    };

    let stores = load_stores(&config).await?;
    for store in &stores {
        store.spawn_sweeper();
    }

    let server = Arc::new(Server::new(config, stores, repl));

    if let Some(link) = master_link {
        // Pick up the master's numbering so acknowledged offsets compare
        // against the same scale on both ends.
        server.repl.add_offset(link.start_offset);
        tokio::spawn(replica::run(
            Arc::clone(&server),
            link.stream,
            link.leftover,
        ));
    }

    let listener = TcpListener::bind(("127.0.0.1", server.config.port)).await?;
    info!(
        role = server.repl.role().as_str(),
        "listening on {}",
        listener.local_addr()?
    );

    loop {
        let (socket, client_address) = listener.accept().await?;
        let server = Arc::clone(&server);
        info!("accepted connection from {:?}", client_address);

        tokio::spawn(async move {
            if let Err(e) = handle_connection(server, socket).await {
                error!(%e, "connection error");
            }
        });
    }
}

async fn load_stores(config: &Config) -> crate::Result<Vec<Store>> {
    let path = config.db_path();
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(_) => return Ok(vec![Store::new()]),
    };

    // A present-but-malformed snapshot is a fatal startup condition;
    // silently serving an empty keyspace would look like data loss.
    let databases = snapshot::load(&bytes)?;
    if databases.is_empty() {
        return Ok(vec![Store::new()]);
    }

    let top = databases.iter().map(|db| db.index).max().unwrap_or(0);
    let stores: Vec<Store> = (0..=top).map(|_| Store::new()).collect();
    for db in databases {
        stores[db.index].load(db.entries);
    }
    info!(path = %path.display(), "loaded snapshot");
    Ok(stores)
}

async fn handle_connection(server: Arc<Server>, stream: TcpStream) -> crate::Result<()> {
    let mut conn = Connection::new(stream);
    let mut tx = Transaction::new();

    loop {
        let Wire { args, .. } = match conn.read_command().await {
            Ok(Some(wire)) => wire,
            Ok(None) => {
                debug!("connection closed");
                return Ok(());
            }
            Err(err) => {
                // One error reply for malformed input, then drop the
                // connection; there is no way to resynchronize the stream.
                let _ = conn.write_all(&error_reply(&err.to_string())).await;
                return Err(err);
            }
        };

        if args.is_empty() {
            continue;
        }
        let name = String::from_utf8_lossy(&args[0]).to_lowercase();

        if name == "psync" {
            if server.repl.role() != Role::Master {
                conn.write_all(&error_reply("ERR PSYNC can only be sent to a master"))
                    .await?;
                continue;
            }
            if args.len() < 3 || args[1].as_ref() != b"?" {
                conn.write_all(&error_reply("ERR only full resynchronization is supported"))
                    .await?;
                continue;
            }
            let (mut stream, _) = conn.into_parts();
            master::full_resync(&mut stream, &server).await?;
            server.repl.register_replica(stream).await;
            info!("connection promoted to replica");
            return Ok(());
        }

        let reply = match name.as_str() {
            "multi" => {
                if tx.begin() {
                    ok_reply()
                } else {
                    error_reply("ERR MULTI calls can not be nested")
                }
            }
            "exec" => match tx.take() {
                None => error_reply("ERR EXEC without MULTI"),
                Some(queued) => {
                    let mut buf = Vec::new();
                    resp::append_array(&mut buf, queued.len());
                    for queued_args in queued {
                        let reply = server.execute(queued_args).await;
                        buf.extend_from_slice(&reply);
                    }
                    buf
                }
            },
            "discard" => {
                if tx.discard() {
                    ok_reply()
                } else {
                    error_reply("ERR DISCARD without MULTI")
                }
            }
            _ if tx.in_multi() => {
                tx.queue(args);
                let mut buf = Vec::new();
                resp::append_simple(&mut buf, "QUEUED");
                buf
            }
            _ => server.execute(args).await,
        };

        conn.write_all(&reply).await?;
    }
}

impl Server {
    pub(crate) fn new(config: Config, stores: Vec<Store>, repl: Arc<Replication>) -> Server {
        Server {
            config,
            stores,
            repl,
        }
    }

    pub fn repl(&self) -> &Replication {
        &self.repl
    }

    /// Runs one parsed command and returns its reply. Write-class
    /// commands that succeed are propagated to the replicas afterwards.
    pub(crate) async fn execute(&self, args: Vec<Bytes>) -> Vec<u8> {
        let name = String::from_utf8_lossy(&args[0]).to_lowercase();
        let propagated = (commands::is_write(&name) && self.repl.role() == Role::Master)
            .then(|| args.clone());

        let store = &self.stores[0];
        let reply = match name.as_str() {
            "ping" => Ping.exec(),
            "echo" => or_error(Echo::parse(Args::new("echo", args)).map(|c| c.exec())),
            "get" => or_error(Get::parse(Args::new("get", args)).map(|c| c.exec(store))),
            "set" => or_error(Set::parse(Args::new("set", args)).map(|c| c.exec(store))),
            "incr" => or_error(Incr::parse(Args::new("incr", args)).map(|c| c.exec(store))),
            "type" => or_error(Type::parse(Args::new("type", args)).map(|c| c.exec(store))),
            "keys" => or_error(Keys::parse(Args::new("keys", args)).map(|c| c.exec(store))),
            "xadd" => or_error(Xadd::parse(Args::new("xadd", args)).map(|c| c.exec(store))),
            "xrange" => {
                or_error(Xrange::parse(Args::new("xrange", args)).map(|c| c.exec(store)))
            }
            "xread" => match Xread::parse(Args::new("xread", args)) {
                Ok(cmd) => cmd.exec(store).await,
                Err(err) => error_reply(&err.to_string()),
            },
            "config" => {
                or_error(ConfigCmd::parse(Args::new("config", args)).map(|c| c.exec(&self.config)))
            }
            "info" => Info.exec(&self.repl),
            "save" => Save.exec(self).await,
            "replconf" => {
                if self.repl.role() == Role::Master {
                    ok_reply()
                } else {
                    error_reply("ERR REPLCONF is only handled on a master")
                }
            }
            "wait" => self.exec_wait(args).await,
            _ => error_reply(&format!("ERR unknown command '{name}'")),
        };

        if let Some(raw) = propagated {
            if !reply.starts_with(b"-") {
                self.repl.propagate(&raw).await;
            }
        }
        reply
    }

    async fn exec_wait(&self, args: Vec<Bytes>) -> Vec<u8> {
        if self.repl.role() != Role::Master {
            return error_reply("ERR WAIT cannot be used with replica instances");
        }
        let mut args = Args::new("wait", args);
        let parsed: Result<(i64, i64), CommandError> =
            args.next_i64().and_then(|n| Ok((n, args.next_i64()?)));
        match parsed {
            Ok((numreplicas, timeout_ms)) => {
                let count = self.repl.wait(numreplicas, timeout_ms).await;
                let mut buf = Vec::new();
                resp::append_int(&mut buf, count);
                buf
            }
            Err(err) => error_reply(&err.to_string()),
        }
    }

    /// Encodes every database into a snapshot, writes it to the
    /// configured file, and hands back the encoded bytes for callers that
    /// stream them (full resync).
    pub(crate) async fn save_snapshot(&self) -> crate::Result<Vec<u8>> {
        let databases: Vec<Database> = self
            .stores
            .iter()
            .enumerate()
            .map(|(index, store)| Database {
                index,
                entries: store.export(),
            })
            .collect();

        let bytes = snapshot::save(&databases);
        tokio::fs::create_dir_all(&self.config.dir).await?;
        tokio::fs::write(self.config.db_path(), &bytes).await?;
        info!(
            path = %self.config.db_path().display(),
            bytes = bytes.len(),
            "snapshot saved"
        );
        Ok(bytes)
    }
}

fn ok_reply() -> Vec<u8> {
    let mut buf = Vec::new();
    resp::append_ok(&mut buf);
    buf
}

fn or_error(result: Result<Vec<u8>, CommandError>) -> Vec<u8> {
    result.unwrap_or_else(|err| error_reply(&err.to_string()))
}
