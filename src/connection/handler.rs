//! Connection Handler Module
//!
//! This module handles individual client connections to memkv.
//! Each client gets its own handler task that runs in a loop,
//! reading command lines and sending replies.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. ConnectionHandler spawned
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │      Main Loop               │
//!    │                              │
//!    │  Read bytes from socket      │
//!    │  Split off complete lines     │
//!    │  Execute (blocking pool)     │
//!    │  Send reply                  │
//!    │         [Loop back]          │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. Client disconnects / error
//! ```
//!
//! ## Framing
//!
//! One command per line. The line ends at `\n`; a trailing `\r` is dropped.
//! Several lines may arrive in one read and are answered in order.

use crate::commands::{CommandError, CommandHandler};
use crate::protocol::Reply;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

/// Maximum length of a single command line (64 KB)
const MAX_LINE_SIZE: usize = 64 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Handles a single client connection.
pub struct ConnectionHandler {
    /// The TCP stream for this connection
    stream: BufWriter<TcpStream>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Buffer for incoming data
    buffer: BytesMut,

    /// The command handler (shared across connections)
    command_handler: CommandHandler,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    /// Creates a new connection handler.
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            stats,
        }
    }

    /// Runs the main connection loop until the client disconnects or an
    /// error occurs.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected gracefully"),
            Err(e) => match e {
                ConnectionError::IoError(io_err)
                    if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
                {
                    debug!(client = %self.addr, "Connection reset by client")
                }
                _ => warn!(client = %self.addr, error = %e, "Connection error"),
            },
        }

        self.stats.connection_closed();
        result
    }

    /// The main read-execute-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(line) = self.next_line() {
                let reply = self.execute(line).await?;
                self.stats.command_processed();
                self.send_reply(&reply).await?;
            }

            if !self.read_more_data().await? {
                return Ok(());
            }
        }
    }

    /// Splits the next complete line off the buffer, without its terminator.
    fn next_line(&mut self) -> Option<Bytes> {
        let end = self.buffer.iter().position(|&b| b == b'\n')?;

        let mut line = self.buffer.split_to(end + 1).freeze();
        line.truncate(end);
        if line.last() == Some(&b'\r') {
            line.truncate(end - 1);
        }

        trace!(
            client = %self.addr,
            len = line.len(),
            remaining = self.buffer.len(),
            "Split command line"
        );
        Some(line)
    }

    /// Runs one command line on the blocking pool, since a store may wait on
    /// a key lock.
    async fn execute(&self, line: Bytes) -> Result<Reply, ConnectionError> {
        let command = match std::str::from_utf8(&line) {
            Ok(command) => command.to_string(),
            Err(_) => {
                debug!(client = %self.addr, "Command line is not valid UTF-8");
                return Ok(Reply::from(&CommandError::InvalidCommand));
            }
        };

        let handler = self.command_handler.clone();
        let reply = tokio::task::spawn_blocking(move || handler.respond(&command)).await?;
        Ok(reply)
    }

    /// Reads more data from the socket into the buffer.
    ///
    /// Returns `false` when the client closed the connection between lines.
    async fn read_more_data(&mut self) -> Result<bool, ConnectionError> {
        // Everything left in the buffer is one unfinished line
        if self.buffer.len() >= MAX_LINE_SIZE {
            error!(
                client = %self.addr,
                size = self.buffer.len(),
                "Command line too long"
            );
            return Err(ConnectionError::LineTooLong);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

        if n == 0 {
            if self.buffer.is_empty() {
                return Ok(false);
            }
            return Err(ConnectionError::UnexpectedEof);
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(true)
    }

    /// Sends a reply to the client.
    async fn send_reply(&mut self, reply: &Reply) -> Result<(), ConnectionError> {
        let bytes = reply.serialize();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(bytes.len());
        trace!(
            client = %self.addr,
            bytes = bytes.len(),
            "Sent reply"
        );
        Ok(())
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The blocking task running a command panicked or was cancelled
    #[error("command task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),

    /// Unexpected end of stream (partial command line)
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// A command line exceeded the size limit
    #[error("Command line too long")]
    LineTooLong,
}

/// Handles a client connection.
///
/// This is a convenience function that creates a ConnectionHandler
/// and runs it to completion.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageEngine;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::{timeout, Duration};

    async fn create_test_server() -> (SocketAddr, Arc<StorageEngine>, Arc<ConnectionStats>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let storage = Arc::new(StorageEngine::new());
        let stats = Arc::new(ConnectionStats::new());

        let storage_clone = Arc::clone(&storage);
        let stats_clone = Arc::clone(&stats);

        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                let handler = CommandHandler::new(Arc::clone(&storage_clone));
                let stats = Arc::clone(&stats_clone);
                tokio::spawn(handle_connection(stream, client_addr, handler, stats));
            }
        });

        (addr, storage, stats)
    }

    /// Reads until exactly `expected` bytes arrived or two seconds passed.
    async fn read_exact_len(client: &mut TcpStream, expected: usize) -> Vec<u8> {
        let mut buf = vec![0u8; expected];
        timeout(Duration::from_secs(2), client.read_exact(&mut buf))
            .await
            .expect("timed out waiting for reply")
            .unwrap();
        buf
    }

    #[tokio::test]
    async fn test_store_retrieve() {
        let (addr, storage, _) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"STORE name Ariz\n").await.unwrap();
        assert_eq!(read_exact_len(&mut client, 5).await, b"+OK\r\n");

        client.write_all(b"RETRIEVE name\r\n").await.unwrap();
        assert_eq!(read_exact_len(&mut client, 10).await, b"$4\r\nAriz\r\n");

        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn test_error_replies() {
        let (addr, _, _) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"STORE k\n").await.unwrap();
        let expected = b"-INVALID invalid command\r\n";
        assert_eq!(read_exact_len(&mut client, expected.len()).await, expected);

        client.write_all(b"RETRIEVE missing\n").await.unwrap();
        let expected = b"-NOTFOUND key not found\r\n";
        assert_eq!(read_exact_len(&mut client, expected.len()).await, expected);

        client.write_all(b"STORE k v EX soon\n").await.unwrap();
        let expected = b"-PARSE invalid expiry 'soon': invalid digit found in string\r\n";
        assert_eq!(read_exact_len(&mut client, expected.len()).await, expected);
    }

    #[tokio::test]
    async fn test_non_utf8_line_is_invalid() {
        let (addr, _, _) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"STORE k \xff\xfe\n").await.unwrap();
        let expected = b"-INVALID invalid command\r\n";
        assert_eq!(read_exact_len(&mut client, expected.len()).await, expected);
    }

    #[tokio::test]
    async fn test_multiple_commands() {
        let (addr, _, _) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();

        // Several lines in a single write
        client
            .write_all(b"STORE k1 v1\nSTORE k2 v2\nRETRIEVE k1\nRETRIEVE k2\n")
            .await
            .unwrap();

        // +OK\r\n+OK\r\n$2\r\nv1\r\n$2\r\nv2\r\n
        let response = read_exact_len(&mut client, 26).await;
        assert_eq!(response, b"+OK\r\n+OK\r\n$2\r\nv1\r\n$2\r\nv2\r\n");
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let (addr, _, stats) = create_test_server().await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = TcpStream::connect(addr).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);

        client.write_all(b"STORE k v\n").await.unwrap();
        let _ = read_exact_len(&mut client, 5).await;

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(stats.commands_processed.load(Ordering::Relaxed) >= 1);
        assert!(stats.bytes_read.load(Ordering::Relaxed) > 0);
        assert!(stats.bytes_written.load(Ordering::Relaxed) > 0);

        drop(client);

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_clean_disconnect_is_ok() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let (stream, client_addr) = listener.accept().await.unwrap();

        let stats = Arc::new(ConnectionStats::new());
        let handler = ConnectionHandler::new(
            stream,
            client_addr,
            CommandHandler::new(Arc::new(StorageEngine::new())),
            Arc::clone(&stats),
        );
        let server = tokio::spawn(handler.run());

        client.write_all(b"STORE k v\n").await.unwrap();
        assert_eq!(read_exact_len(&mut client, 5).await, b"+OK\r\n");
        client.shutdown().await.unwrap();

        let result = timeout(Duration::from_secs(2), server).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_partial_line_at_eof_is_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let (stream, client_addr) = listener.accept().await.unwrap();

        let handler = ConnectionHandler::new(
            stream,
            client_addr,
            CommandHandler::new(Arc::new(StorageEngine::new())),
            Arc::new(ConnectionStats::new()),
        );
        let server = tokio::spawn(handler.run());

        client.write_all(b"STORE k").await.unwrap();
        client.shutdown().await.unwrap();

        let result = timeout(Duration::from_secs(2), server).await.unwrap().unwrap();
        assert!(matches!(result, Err(ConnectionError::UnexpectedEof)));
    }
}
