use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::Decoder;

use crate::codec::{CommandCodec, Wire};

/// A TCP peer speaking framed commands. Data is read from the socket into
/// the buffer; when a frame completes, the codec trims the consumed bytes.
pub struct Connection {
    stream: TcpStream,
    buffer: BytesMut,
    codec: CommandCodec,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Connection {
        Connection::from_parts(stream, BytesMut::with_capacity(4096))
    }

    /// Wraps a stream together with bytes that were already read off it,
    /// e.g. command-stream bytes that arrived on the tail of a snapshot
    /// transfer.
    pub fn from_parts(stream: TcpStream, buffer: BytesMut) -> Connection {
        Connection {
            stream,
            buffer,
            codec: CommandCodec,
        }
    }

    /// Next complete command, buffering across arbitrary TCP re-chunking.
    /// `None` on clean EOF; an error on EOF mid-frame or malformed input.
    pub async fn read_command(&mut self) -> crate::Result<Option<Wire>> {
        loop {
            if let Some(wire) = self.codec.decode(&mut self.buffer)? {
                return Ok(Some(wire));
            }
            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err("connection reset mid-command".into());
            }
        }
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(bytes).await
    }

    /// Hands the raw stream back, e.g. to promote a client connection to a
    /// replica after PSYNC. Unconsumed buffered bytes come with it.
    pub fn into_parts(self) -> (TcpStream, BytesMut) {
        (self.stream, self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::net::TcpListener;

    async fn pair() -> (TcpStream, Connection) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (accepted, _) = listener.accept().await.unwrap();
        (client, Connection::new(accepted))
    }

    #[tokio::test]
    async fn reads_a_command_split_across_writes() {
        let (mut client, mut conn) = pair().await;

        tokio::spawn(async move {
            for chunk in [&b"*3\r\n$3\r\nSE"[..], b"T\r\n$3\r\nfoo", b"\r\n$3\r\nbar\r\n"] {
                client.write_all(chunk).await.unwrap();
                tokio::time::sleep(tokio::time::Duration::from_millis(5)).await;
            }
        });

        let wire = conn.read_command().await.unwrap().unwrap();

        assert_eq!(
            wire.args,
            vec![
                Bytes::from_static(b"SET"),
                Bytes::from_static(b"foo"),
                Bytes::from_static(b"bar"),
            ]
        );
    }

    #[tokio::test]
    async fn clean_eof_yields_none() {
        let (client, mut conn) = pair().await;
        drop(client);

        assert!(conn.read_command().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_mid_frame_is_an_error() {
        let (mut client, mut conn) = pair().await;

        client.write_all(b"*1\r\n$4\r\nPI").await.unwrap();
        drop(client);

        assert!(conn.read_command().await.is_err());
    }

    #[tokio::test]
    async fn seeded_buffer_is_drained_first() {
        let (_client, stream) = pair().await;
        let (stream, _) = stream.into_parts();
        let mut conn =
            Connection::from_parts(stream, BytesMut::from(&b"*1\r\n$4\r\nPING\r\n"[..]));

        let wire = conn.read_command().await.unwrap().unwrap();

        assert_eq!(wire.args, vec![Bytes::from_static(b"PING")]);
    }
}
