//! Bencode codec used for tracker responses
//!
//! Decoding is prefix-exact: a call consumes one value from the front of the
//! input and leaves any trailing bytes for the caller.

mod decode;
mod encode;
mod value;


pub use decode::{decode, decode_exact, decode_prefix};
pub use encode::encode;
pub use value::Value;

/// Errors produced while decoding bencoded data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BencodeError {
    #[error("Unexpected end of input at byte {position}")]
    UnexpectedEof { position: usize },

    #[error("Unexpected byte 0x{byte:02x} at byte {position}")]
    UnexpectedByte { byte: u8, position: usize },

    #[error("Invalid integer: {reason}")]
    InvalidInteger { reason: String },

    #[error("Invalid string length at byte {position}")]
    InvalidStringLength { position: usize },

    #[error("Dictionary key at byte {position} is not a string")]
    NonStringKey { position: usize },

    #[error("Nesting deeper than {max} levels")]
    NestingTooDeep { max: usize },

    #[error("{remaining} trailing bytes after value")]
    TrailingData { remaining: usize },
}
