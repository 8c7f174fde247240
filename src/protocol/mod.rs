//! Protocol Module
//!
//! Defines the wire protocol between a log server and its remote readers.
//!
//! ## Frame Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Kind (1) │ Len (4)  │      Body (bincode)         │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Frame Kinds
//! - 0x01: REQUEST  - Body: [`Request`]
//! - 0x02: RESPONSE - Body: [`Response`]
//!
//! Every request is answered by exactly one response on the same connection.

mod codec;
mod request;
mod response;

pub use codec::{
    decode_request, decode_response, encode_request, encode_response, read_request, read_response,
    write_request, write_response, FrameKind, HEADER_SIZE, MAX_PAYLOAD_SIZE,
};
pub use request::Request;
pub use response::{ErrorKind, Response};
