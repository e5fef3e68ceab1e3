// Wire protocol adapters: framing, message codecs, and the connection port.

pub mod codec;
pub mod connection;
pub mod path_hash;
pub mod update_codec;

pub use codec::{CodecError, EventDirection, TransportCodec, TransportMessage, WireEncoding};
pub use connection::{Connection, ConnectionError, WireFrame};
pub use path_hash::PathHasher;
pub use update_codec::{EncoderScope, UpdateDecoder, UpdateEncoder};
