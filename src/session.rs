//! Receiver side of a single transfer.
//!
//! A session owns one accepted connection from header to end-of-stream:
//!
//! ```text
//! AwaitingHeader -> StreamingPayload -> Reconciled
//!        \                 \
//!         +-----------------+--------> Faulted
//! ```
//!
//! Faults are confined to the session. The stream is owned by the session
//! and dropped, closing the connection, on every exit path.

use crate::protocol::{self, HeaderError};
use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Payload read chunk size
const CHUNK_SIZE: usize = 16 * 1024;

/// Current state of a receiving session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the fixed-width header.
    AwaitingHeader,
    /// Copying payload bytes to the destination file.
    StreamingPayload {
        /// Size declared in the header.
        declared: i64,
        /// Bytes written so far.
        received: u64,
    },
    /// Peer closed the stream and the counts were compared.
    Reconciled(Reconciliation),
    /// The session hit an error and the connection was dropped.
    Faulted,
}

/// Declared versus received byte count after end-of-stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    Match { received: u64 },
    Mismatch { expected: i64, received: u64 },
}

impl Reconciliation {
    pub fn new(expected: i64, received: u64) -> Self {
        if i64::try_from(received).is_ok_and(|r| r == expected) {
            Reconciliation::Match { received }
        } else {
            Reconciliation::Mismatch { expected, received }
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, Reconciliation::Match { .. })
    }

    pub fn received(&self) -> u64 {
        match self {
            Reconciliation::Match { received } | Reconciliation::Mismatch { received, .. } => {
                *received
            }
        }
    }
}

impl std::fmt::Display for Reconciliation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reconciliation::Match { received } => write!(f, "match: received {}", received),
            Reconciliation::Mismatch { expected, received } => write!(
                f,
                "mismatch: expected {}, received {}",
                expected, received
            ),
        }
    }
}

/// Errors that end a session
#[derive(Debug)]
pub enum SessionError {
    /// Header could not be read
    Header(HeaderError),
    /// Name is not usable as a single file name
    InvalidName(String),
    /// Destination folder or file could not be created
    StorageCreate(PathBuf, io::Error),
    /// Connection failed while streaming the payload
    StreamRead(io::Error),
    /// Destination file could not be written
    StorageWrite(PathBuf, io::Error),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Header(e) => write!(f, "{}", e),
            SessionError::InvalidName(name) => write!(f, "Invalid file name: {:?}", name),
            SessionError::StorageCreate(path, e) => {
                write!(f, "Cannot create '{}': {}", path.display(), e)
            }
            SessionError::StreamRead(e) => write!(f, "Stream read error: {}", e),
            SessionError::StorageWrite(path, e) => {
                write!(f, "Cannot write '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Header(e) => Some(e),
            SessionError::InvalidName(_) => None,
            SessionError::StorageCreate(_, e)
            | SessionError::StreamRead(e)
            | SessionError::StorageWrite(_, e) => Some(e),
        }
    }
}

impl From<HeaderError> for SessionError {
    fn from(e: HeaderError) -> Self {
        SessionError::Header(e)
    }
}

/// One receiving session, bound to a single peer.
#[derive(Debug)]
pub struct Session {
    peer: SocketAddr,
    state: SessionState,
}

impl Session {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            state: SessionState::AwaitingHeader,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Drive the session to a terminal state, consuming the stream.
    pub async fn run<S>(
        &mut self,
        mut stream: S,
        folder: &Path,
    ) -> Result<Reconciliation, SessionError>
    where
        S: AsyncRead + Unpin,
    {
        match self.transfer(&mut stream, folder).await {
            Ok(reconciliation) => {
                self.state = SessionState::Reconciled(reconciliation);
                Ok(reconciliation)
            }
            Err(e) => {
                self.state = SessionState::Faulted;
                Err(e)
            }
        }
    }

    async fn transfer<S>(
        &mut self,
        stream: &mut S,
        folder: &Path,
    ) -> Result<Reconciliation, SessionError>
    where
        S: AsyncRead + Unpin,
    {
        let header = protocol::read_header(stream).await?;
        info!(peer = %self.peer, name = %header.name, size = header.size, "Header received");

        let path = destination_path(folder, &header.name)
            .ok_or_else(|| SessionError::InvalidName(header.name.clone()))?;

        fs::create_dir_all(folder)
            .await
            .map_err(|e| SessionError::StorageCreate(folder.to_path_buf(), e))?;
        let mut file = File::create(&path)
            .await
            .map_err(|e| SessionError::StorageCreate(path.clone(), e))?;

        self.state = SessionState::StreamingPayload {
            declared: header.size,
            received: 0,
        };
        let received = self.stream_payload(stream, &mut file, &path).await?;

        let reconciliation = Reconciliation::new(header.size, received);
        if reconciliation.is_match() {
            info!(peer = %self.peer, name = %header.name, received, "File received");
        } else {
            warn!(
                peer = %self.peer,
                name = %header.name,
                expected = header.size,
                received,
                "Size mismatch"
            );
        }
        Ok(reconciliation)
    }

    async fn stream_payload<S>(
        &mut self,
        stream: &mut S,
        file: &mut File,
        path: &Path,
    ) -> Result<u64, SessionError>
    where
        S: AsyncRead + Unpin,
    {
        let mut buffer = BytesMut::with_capacity(CHUNK_SIZE);
        let mut total: u64 = 0;

        loop {
            buffer.clear();
            let n = stream
                .read_buf(&mut buffer)
                .await
                .map_err(SessionError::StreamRead)?;
            if n == 0 {
                break;
            }

            file.write_all(&buffer)
                .await
                .map_err(|e| SessionError::StorageWrite(path.to_path_buf(), e))?;

            total += n as u64;
            if let SessionState::StreamingPayload { received, .. } = &mut self.state {
                *received = total;
            }
        }

        file.flush()
            .await
            .map_err(|e| SessionError::StorageWrite(path.to_path_buf(), e))?;
        Ok(total)
    }
}

/// Resolve `name` inside `folder`, refusing anything but a plain file name.
fn destination_path(folder: &Path, name: &str) -> Option<PathBuf> {
    if name.contains(std::path::is_separator) {
        return None;
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Some(folder.join(name)),
        _ => None,
    }
}

/// Handle one accepted connection, logging the outcome.
pub async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    folder: &Path,
) -> Result<Reconciliation, SessionError>
where
    S: AsyncRead + Unpin,
{
    let mut session = Session::new(peer);
    let result = session.run(stream, folder).await;

    match &result {
        Ok(reconciliation) => debug!(
            peer = %peer,
            received = reconciliation.received(),
            state = ?session.state(),
            "Session closed"
        ),
        Err(e) => warn!(peer = %peer, error = %e, "Session failed"),
    }
    result
}
