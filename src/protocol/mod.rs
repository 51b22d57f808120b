//! Wire protocol: framing, message types, and the two codecs

pub mod codec;
pub mod frame;
pub mod messages;

pub use codec::{BinaryCodec, MessageCodec, TextualCodec, WireFormat};
pub use frame::{FrameCodec, FRAME_HEADER_LEN, MAX_PAYLOAD_LEN};
pub use messages::{ClientRequest, MessageType, ServerReply};
