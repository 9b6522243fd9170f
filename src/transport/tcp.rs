use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::{Transport, TransportError};

/// Newline-delimited raw TCP transport used by the Ensto dialect.
pub struct TcpLineTransport {
    write: Mutex<tokio::net::tcp::OwnedWriteHalf>,
    read: Mutex<BufReader<tokio::net::tcp::OwnedReadHalf>>,
}

impl TcpLineTransport {
    pub async fn connect(host: &str, port: u16) -> Result<Self, TransportError> {
        let stream = TcpStream::connect((host, port)).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            write: Mutex::new(write_half),
            read: Mutex::new(BufReader::new(read_half)),
        })
    }
}

#[async_trait::async_trait]
impl Transport for TcpLineTransport {
    async fn send_frame(&self, frame: &str) -> Result<(), TransportError> {
        let mut write = self.write.lock().await;
        write.write_all(frame.as_bytes()).await?;
        write.write_all(b"\n").await?;
        write.flush().await?;
        Ok(())
    }

    async fn receive_frame(&self) -> Result<String, TransportError> {
        let mut read = self.read.lock().await;
        let mut line = String::new();
        let bytes_read = read.read_line(&mut line).await?;
        if bytes_read == 0 {
            return Err(TransportError::Closed);
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut write = self.write.lock().await;
        write.shutdown().await?;
        Ok(())
    }
}
