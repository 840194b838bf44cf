//! # Volley
//!
//! Engine.IO/Socket.IO-compatible transport and framing core.
//!
//! Volley carries an ordered stream of events, some holding binary
//! payloads, over interchangeable substrates (HTTP long-polling or
//! WebSocket). The layers live in their own crates and are re-exported
//! here:
//!
//! - [`transport`]: frames, packets, the [`Conn`](transport::Conn)
//!   contract and both transports
//! - [`parser`]: the event header, [`Buffer`](parser::Buffer)
//!   placeholders and the encoder/decoder
//!
//! [`Socket`] ties the two together.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use volley::prelude::*;
//! use volley::transport::WebSocketTransport;
//!
//! # async fn run() -> Result<(), VolleyError> {
//! let url = "http://127.0.0.1:8080/eio/".parse().expect("valid url");
//! let conn = WebSocketTransport::default()
//!     .dial(url, Default::default())
//!     .await?;
//! let socket = Socket::new(conn);
//!
//! let mut args = vec![Buffer::new(vec![1, 2, 3])];
//! socket.emit_event("upload", &mut args).await?;
//! let reply = socket.recv().await?;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

pub use volley_parser as parser;
pub use volley_transport as transport;

mod error;
mod socket;

pub use error::VolleyError;
pub use socket::Socket;

/// Commonly used types for working with Volley.
pub mod prelude {
    pub use crate::{Socket, VolleyError};
    pub use volley_parser::{attachments, Attachments, Buffer, Decoded, Header, PacketType};
    pub use volley_transport::{Conn, FrameType, Transport};
}
