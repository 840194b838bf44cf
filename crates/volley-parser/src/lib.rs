//! Socket.IO event codec for Volley.
//!
//! Turns an event (a [`Header`] plus one argument value) into frames and
//! back. Binary data inside the arguments is carried in [`Buffer`]s, which
//! travel as separate binary frames after the text frame:
//!
//! ```text
//! encode(Header{Event, "/up"}, ["photo", Buffer(..)])
//!
//! text   51-/up,["photo",{"_placeholder":true,"num":0}]
//! binary <buffer 0 bytes>
//! ```
//!
//! Frames go through the [`FrameWrite`]/[`FrameRead`] traits, so the codec
//! runs on any [`Conn`](volley_transport::Conn) via [`ConnFrames`] or in
//! memory via [`FrameQueue`].

#![allow(async_fn_in_trait)]

mod buffer;
mod decoder;
mod encoder;
mod error;
mod frames;
mod header;

pub use buffer::{attach, restore, Attachments, Buffer, Walker};
pub use decoder::{Decoded, Decoder};
pub use encoder::Encoder;
pub use error::ParserError;
pub use frames::{ConnFrames, FrameQueue, FrameRead, FrameWrite};
pub use header::{Header, PacketType};
