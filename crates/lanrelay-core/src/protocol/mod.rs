//! Protocol module containing message types, the text codec, and stream framing.

pub mod codec;
pub mod framing;
pub mod messages;

pub use codec::{decode_announcement, decode_chat, encode_announcement, encode_chat};
pub use framing::{encode_frame, FrameDecoder, FramingError, Utf8StreamDecoder, MAX_FRAME_LEN};
pub use messages::*;
