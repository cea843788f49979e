//! Wire protocol module.
//!
//! Defines the message envelope, payload values and message framing.
//!
//! ## Wire Format
//!
//! Messages are newline-delimited JSON, one message per line:
//! ```text
//! {"type":"PING","id":1,"status":"SUCCESS","content":"pong","data":{}}\n
//! ```

mod codec;
mod message;
mod value;

pub use codec::{
    decode, encode, MessageCodec, DEFAULT_MAX_FRAME_SIZE, FRAME_DELIMITER, MAX_VALUE_DEPTH,
};
pub use message::{Message, Status};
pub use value::{Object, Value};
