//! Sender side of a single transfer.
//!
//! Dial, write header then payload, shut the write half down, close.

use crate::payload;
use crate::protocol::{self, Header, HeaderError, HEADER_LEN};
use std::io;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

/// Errors that end a single transfer
#[derive(Debug)]
pub enum TransferError {
    /// Could not connect to the receiver
    Connect(String, io::Error),
    /// Header could not be built or written
    Header(HeaderError),
    /// Connection failed while writing the payload or closing
    StreamWrite(io::Error),
}

impl std::fmt::Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferError::Connect(addr, e) => write!(f, "Cannot connect to {}: {}", addr, e),
            TransferError::Header(e) => write!(f, "{}", e),
            TransferError::StreamWrite(e) => write!(f, "Stream write error: {}", e),
        }
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransferError::Connect(_, e) | TransferError::StreamWrite(e) => Some(e),
            TransferError::Header(e) => Some(e),
        }
    }
}

impl From<HeaderError> for TransferError {
    fn from(e: HeaderError) -> Self {
        TransferError::Header(e)
    }
}

/// Send `header` followed by `payload` as one transfer.
///
/// The write half is shut down, flushing everything queued, before the
/// stream is dropped.
pub async fn send_transfer(
    address: &str,
    header: &Header,
    payload: &[u8],
) -> Result<(), TransferError> {
    let mut stream = TcpStream::connect(address)
        .await
        .map_err(|e| TransferError::Connect(address.to_string(), e))?;
    stream.set_nodelay(true).map_err(TransferError::StreamWrite)?;

    protocol::write_header(&mut stream, header).await?;
    stream
        .write_all(payload)
        .await
        .map_err(TransferError::StreamWrite)?;
    stream.shutdown().await.map_err(TransferError::StreamWrite)?;

    Ok(())
}

/// Generate a file for transfer `id` and send it.
///
/// Returns the bytes accounted for: declared size plus header width.
pub async fn send_generated(id: u64, address: &str) -> Result<u64, TransferError> {
    let header = Header::new(payload::generate_name(id), payload::generate_size())?;
    let data = payload::generate_payload(header.size);
    debug!(id, name = %header.name, size = header.size, "Sending file");

    send_transfer(address, &header, &data).await?;

    Ok(data.len() as u64 + HEADER_LEN as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{read_header, NAME_FIELD_LEN};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_send_transfer_wire_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let reader = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut bytes = Vec::new();
            stream.read_to_end(&mut bytes).await.unwrap();
            bytes
        });

        let header = Header::new("wire.dat", 3).unwrap();
        send_transfer(&addr, &header, b"xyz").await.unwrap();

        let bytes = reader.await.unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 3);
        assert_eq!(&bytes[..8], b"wire.dat");
        assert_eq!(&bytes[NAME_FIELD_LEN..HEADER_LEN], &3i64.to_le_bytes());
        assert_eq!(&bytes[HEADER_LEN..], b"xyz");
    }

    #[tokio::test]
    async fn test_send_generated_accounting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let reader = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let header = read_header(&mut stream).await.unwrap();
            let mut payload = Vec::new();
            stream.read_to_end(&mut payload).await.unwrap();
            (header, payload.len())
        });

        let total = send_generated(30002, &addr).await.unwrap();
        let (header, received) = reader.await.unwrap();

        assert!(header.name.ends_with("_30002"));
        assert_eq!(received as i64, header.size);
        assert_eq!(total, header.size as u64 + HEADER_LEN as u64);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        // Bind then drop to get a port with nothing listening
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };

        let err = send_generated(1, &addr).await.unwrap_err();
        assert!(matches!(err, TransferError::Connect(..)));
    }
}
