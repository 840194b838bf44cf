//! Unified error type for Volley.

use volley_parser::ParserError;
use volley_transport::TransportError;

/// Top-level error that wraps the errors of each layer.
///
/// The `#[from]` attributes let `?` convert transport and codec errors
/// automatically.
#[derive(Debug, thiserror::Error)]
pub enum VolleyError {
    /// A transport-level error (dial, HTTP exchange, socket, closed conn).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A codec error (bad header, missing attachments, JSON).
    #[error(transparent)]
    Parser(#[from] ParserError),
}

impl VolleyError {
    /// Returns `true` if the error means the connection is gone.
    pub fn is_closed(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_closed(),
            Self::Parser(ParserError::Transport(e)) => e.is_closed(),
            Self::Parser(ParserError::EndOfStream) => true,
            Self::Parser(_) => false,
        }
    }
}
