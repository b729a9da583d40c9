use std::sync::atomic::{AtomicU16, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, Duration};

use rudis::config::Config;
use rudis::server;

static NEXT_PORT: AtomicU16 = AtomicU16::new(16380);

async fn start_server() -> u16 {
    let port = NEXT_PORT.fetch_add(1, Ordering::SeqCst);
    let dir = tempfile::TempDir::new().unwrap();
    let config = Config {
        port,
        dir: dir.path().to_path_buf(),
        dbfilename: "dump.rdb".to_string(),
        replicaof: None,
    };
    tokio::spawn(async move {
        let _dir = dir; // keep the data directory alive with the server
        let _ = server::run(config).await;
    });
    sleep(Duration::from_millis(150)).await;
    port
}

async fn connect(port: u16) -> TcpStream {
    TcpStream::connect(("127.0.0.1", port)).await.unwrap()
}

async fn roundtrip(stream: &mut TcpStream, command: &[u8], expected: &[u8]) {
    stream.write_all(command).await.unwrap();
    let mut reply = vec![0u8; expected.len()];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(
        reply,
        expected,
        "got {:?}, want {:?}",
        String::from_utf8_lossy(&reply),
        String::from_utf8_lossy(expected)
    );
}

#[tokio::test]
async fn ping_and_echo() {
    let port = start_server().await;
    let mut conn = connect(port).await;

    roundtrip(&mut conn, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;
    roundtrip(&mut conn, b"*2\r\n$4\r\nECHO\r\n$5\r\nhello\r\n", b"+hello\r\n").await;
}

#[tokio::test]
async fn set_with_px_expires() {
    let port = start_server().await;
    let mut conn = connect(port).await;

    roundtrip(
        &mut conn,
        b"*5\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n$2\r\nPX\r\n$3\r\n100\r\n",
        b"+OK\r\n",
    )
    .await;
    roundtrip(&mut conn, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n", b"$1\r\nv\r\n").await;

    sleep(Duration::from_millis(200)).await;

    roundtrip(&mut conn, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n", b"$-1\r\n").await;
}

#[tokio::test]
async fn incr_counts_and_rejects_garbage() {
    let port = start_server().await;
    let mut conn = connect(port).await;

    roundtrip(&mut conn, b"*2\r\n$4\r\nINCR\r\n$1\r\nn\r\n", b":1\r\n").await;
    roundtrip(&mut conn, b"*2\r\n$4\r\nINCR\r\n$1\r\nn\r\n", b":2\r\n").await;

    roundtrip(
        &mut conn,
        b"*3\r\n$3\r\nSET\r\n$1\r\ns\r\n$3\r\nabc\r\n",
        b"+OK\r\n",
    )
    .await;
    roundtrip(
        &mut conn,
        b"*2\r\n$4\r\nINCR\r\n$1\r\ns\r\n",
        b"-ERR value is not an integer or out of range\r\n",
    )
    .await;
}

#[tokio::test]
async fn transaction_queues_and_executes_in_order() {
    let port = start_server().await;
    let mut conn = connect(port).await;

    roundtrip(&mut conn, b"*1\r\n$5\r\nMULTI\r\n", b"+OK\r\n").await;
    roundtrip(
        &mut conn,
        b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n",
        b"+QUEUED\r\n",
    )
    .await;
    roundtrip(&mut conn, b"*2\r\n$4\r\nINCR\r\n$1\r\na\r\n", b"+QUEUED\r\n").await;
    roundtrip(&mut conn, b"*1\r\n$4\r\nEXEC\r\n", b"*2\r\n+OK\r\n:2\r\n").await;

    // The writes landed.
    roundtrip(&mut conn, b"*2\r\n$3\r\nGET\r\n$1\r\na\r\n", b"$1\r\n2\r\n").await;
}

#[tokio::test]
async fn transaction_errors() {
    let port = start_server().await;
    let mut conn = connect(port).await;

    roundtrip(&mut conn, b"*1\r\n$4\r\nEXEC\r\n", b"-ERR EXEC without MULTI\r\n").await;
    roundtrip(
        &mut conn,
        b"*1\r\n$7\r\nDISCARD\r\n",
        b"-ERR DISCARD without MULTI\r\n",
    )
    .await;

    roundtrip(&mut conn, b"*1\r\n$5\r\nMULTI\r\n", b"+OK\r\n").await;
    roundtrip(
        &mut conn,
        b"*1\r\n$5\r\nMULTI\r\n",
        b"-ERR MULTI calls can not be nested\r\n",
    )
    .await;
    roundtrip(
        &mut conn,
        b"*3\r\n$3\r\nSET\r\n$1\r\nx\r\n$1\r\n9\r\n",
        b"+QUEUED\r\n",
    )
    .await;
    roundtrip(&mut conn, b"*1\r\n$7\r\nDISCARD\r\n", b"+OK\r\n").await;

    // The discarded write never ran.
    roundtrip(&mut conn, b"*2\r\n$3\r\nGET\r\n$1\r\nx\r\n", b"$-1\r\n").await;
}

#[tokio::test]
async fn stream_add_and_range() {
    let port = start_server().await;
    let mut conn = connect(port).await;

    roundtrip(
        &mut conn,
        b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n1-1\r\n$1\r\nk\r\n$1\r\nv\r\n",
        b"$3\r\n1-1\r\n",
    )
    .await;
    roundtrip(
        &mut conn,
        b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n1-1\r\n$1\r\nk\r\n$1\r\nv\r\n",
        b"-ERR The ID specified in XADD is equal or smaller than the target stream top item\r\n",
    )
    .await;
    roundtrip(
        &mut conn,
        b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n1-2\r\n$1\r\nk\r\n$2\r\nv2\r\n",
        b"$3\r\n1-2\r\n",
    )
    .await;

    roundtrip(
        &mut conn,
        b"*4\r\n$6\r\nXRANGE\r\n$1\r\ns\r\n$1\r\n-\r\n$1\r\n+\r\n",
        b"*2\r\n\
          *2\r\n$3\r\n1-1\r\n*2\r\n$1\r\nk\r\n$1\r\nv\r\n\
          *2\r\n$3\r\n1-2\r\n*2\r\n$1\r\nk\r\n$2\r\nv2\r\n",
    )
    .await;

    roundtrip(&mut conn, b"*2\r\n$4\r\nTYPE\r\n$1\r\ns\r\n", b"+stream\r\n").await;
}

#[tokio::test]
async fn xread_returns_entries_after_the_given_id() {
    let port = start_server().await;
    let mut conn = connect(port).await;

    roundtrip(
        &mut conn,
        b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n1-1\r\n$1\r\nk\r\n$1\r\nv\r\n",
        b"$3\r\n1-1\r\n",
    )
    .await;
    roundtrip(
        &mut conn,
        b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n1-2\r\n$1\r\nk\r\n$1\r\nw\r\n",
        b"$3\r\n1-2\r\n",
    )
    .await;

    roundtrip(
        &mut conn,
        b"*4\r\n$5\r\nXREAD\r\n$7\r\nSTREAMS\r\n$1\r\ns\r\n$3\r\n1-1\r\n",
        b"*1\r\n*2\r\n$1\r\ns\r\n*1\r\n*2\r\n$3\r\n1-2\r\n*2\r\n$1\r\nk\r\n$1\r\nw\r\n",
    )
    .await;
}

#[tokio::test]
async fn pipelined_commands_answer_in_order() {
    let port = start_server().await;
    let mut conn = connect(port).await;

    // Three commands in a single write.
    let batch = b"*3\r\n$3\r\nSET\r\n$1\r\np\r\n$1\r\n1\r\n\
                  *2\r\n$4\r\nINCR\r\n$1\r\np\r\n\
                  *2\r\n$3\r\nGET\r\n$1\r\np\r\n";
    roundtrip(&mut conn, batch, b"+OK\r\n:2\r\n$1\r\n2\r\n").await;
}

#[tokio::test]
async fn keys_matches_glob_patterns() {
    let port = start_server().await;
    let mut conn = connect(port).await;

    roundtrip(
        &mut conn,
        b"*3\r\n$3\r\nSET\r\n$6\r\nuser:1\r\n$1\r\na\r\n",
        b"+OK\r\n",
    )
    .await;
    roundtrip(
        &mut conn,
        b"*3\r\n$3\r\nSET\r\n$7\r\norder:1\r\n$1\r\nb\r\n",
        b"+OK\r\n",
    )
    .await;

    roundtrip(
        &mut conn,
        b"*2\r\n$4\r\nKEYS\r\n$6\r\nuser:*\r\n",
        b"*1\r\n$6\r\nuser:1\r\n",
    )
    .await;
}

#[tokio::test]
async fn unknown_command_keeps_the_connection_alive() {
    let port = start_server().await;
    let mut conn = connect(port).await;

    roundtrip(
        &mut conn,
        b"*1\r\n$5\r\nBOGUS\r\n",
        b"-ERR unknown command 'bogus'\r\n",
    )
    .await;
    roundtrip(&mut conn, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;
}

#[tokio::test]
async fn malformed_input_gets_one_error_then_close() {
    let port = start_server().await;
    let mut conn = connect(port).await;

    conn.write_all(b"$3\r\nfoo\r\n").await.unwrap();

    let mut reply = Vec::new();
    conn.read_to_end(&mut reply).await.unwrap();

    assert!(reply.starts_with(b"-"), "{:?}", String::from_utf8_lossy(&reply));
    assert!(reply.ends_with(b"\r\n"));
}

#[tokio::test]
async fn empty_array_is_ignored() {
    let port = start_server().await;
    let mut conn = connect(port).await;

    conn.write_all(b"*0\r\n").await.unwrap();
    roundtrip(&mut conn, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;
}
