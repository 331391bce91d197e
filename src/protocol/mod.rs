//! Protocol module - recording format, frames and sequential reading.
//!
//! This module implements the on-disk record layout shared by both engines:
//! - 14-byte header encoding/decoding
//! - Frame struct with optional topic and payload
//! - Forward-only reader for recordings

mod frame;
mod reader;
mod wire_format;

pub use frame::{decode_body, Frame};
pub use reader::RecordReader;
pub use wire_format::{
    decode_header, encode_header, Header, HEADER_SIZE, MAX_BODY_SIZE, MAX_FRAME_SIZE,
};
