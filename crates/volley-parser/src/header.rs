//! The event envelope carried at the front of every text frame.
//!
//! ```text
//! <type digit>[<attachments>-][<namespace>,][<id>]<JSON body>
//!
//! 2["chat","hi"]                 Event, no namespace, no ack
//! 2/admin,17["kick",4]           Event on /admin, ack id 17
//! 51-["file",{"_placeholder":true,"num":0}]   BinaryEvent, 1 attachment
//! ```

use std::fmt;

/// Socket.IO packet types.
///
/// `BinaryEvent` and `BinaryAck` are never picked by the caller: the
/// encoder promotes `Event`/`Ack` to them when the arguments carry at
/// least one [`Buffer`](crate::Buffer).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Join a namespace.
    #[default]
    Connect = 0,
    /// Leave a namespace.
    Disconnect = 1,
    /// An application event.
    Event = 2,
    /// Reply to an event that asked for one.
    Ack = 3,
    /// Namespace-level error.
    Error = 4,
    /// `Event` with binary attachments.
    BinaryEvent = 5,
    /// `Ack` with binary attachments.
    BinaryAck = 6,
}

impl PacketType {
    /// The ASCII digit written on the wire.
    pub fn as_byte(self) -> u8 {
        b'0' + self as u8
    }

    /// Parses the ASCII digit written on the wire.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'0' => Some(Self::Connect),
            b'1' => Some(Self::Disconnect),
            b'2' => Some(Self::Event),
            b'3' => Some(Self::Ack),
            b'4' => Some(Self::Error),
            b'5' => Some(Self::BinaryEvent),
            b'6' => Some(Self::BinaryAck),
            _ => None,
        }
    }

    /// Returns `true` for the variants that announce attachments.
    pub fn is_binary(self) -> bool {
        matches!(self, Self::BinaryEvent | Self::BinaryAck)
    }

    /// The binary variant of `Event`/`Ack`; other types are unchanged.
    pub fn promoted(self) -> Self {
        match self {
            Self::Event => Self::BinaryEvent,
            Self::Ack => Self::BinaryAck,
            other => other,
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Event => "event",
            Self::Ack => "ack",
            Self::Error => "error",
            Self::BinaryEvent => "binary event",
            Self::BinaryAck => "binary ack",
        };
        f.write_str(name)
    }
}

/// Envelope of one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    /// Packet type.
    pub packet_type: PacketType,
    /// Namespace, `/`-prefixed; empty means the default namespace.
    pub namespace: String,
    /// Ack id; only written when `need_ack` is set.
    pub id: u64,
    /// Whether the sender waits for an `Ack` carrying `id`.
    pub need_ack: bool,
}

impl Header {
    /// A header of the given type on the default namespace.
    pub fn new(packet_type: PacketType) -> Self {
        Self {
            packet_type,
            ..Self::default()
        }
    }

    /// Moves the header to a namespace. A missing leading `/` is added,
    /// so `"chat"` and `"/chat"` name the same namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        let mut namespace = namespace.into();
        if !namespace.is_empty() && !namespace.starts_with('/') {
            namespace.insert(0, '/');
        }
        self.namespace = namespace;
        self
    }

    /// Asks the peer to acknowledge with `id`.
    pub fn with_ack(mut self, id: u64) -> Self {
        self.id = id;
        self.need_ack = true;
        self
    }
}
