//! Client Connections
//!
//! Each accepted socket gets its own task running a [`ConnectionHandler`].
//! The handler speaks the line protocol: one command per `\n`-terminated
//! line in, one [`Reply`](crate::protocol::Reply) per line out, in order.
//!
//! ```text
//!  socket ──read──> BytesMut ──split \n──> line
//!                                           │
//!                              spawn_blocking(respond)
//!                                           │
//!  socket <──flush── BufWriter <──encode── Reply
//! ```
//!
//! Commands leave the async runtime because a STORE may sit on a busy key
//! lock for up to the configured acquire timeout. A line with invalid UTF-8
//! is answered with `-INVALID` and the connection stays open. A line longer
//! than 64 KiB, or a half-sent line at EOF, ends the connection.
//!
//! Counters for accepted connections, commands and bytes live in
//! [`ConnectionStats`], shared by every handler.

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
