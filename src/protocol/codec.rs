//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Wire Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Kind (1) │ Len (4)  │         Body                │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! Length is big-endian; the body is the bincode encoding of a [`Request`]
//! or [`Response`].

use std::io::{Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, WalError};
use super::{Request, Response};

/// Header size: 1 byte kind + 4 bytes length
pub const HEADER_SIZE: usize = 5;

/// Maximum body size (16 MB)
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Frame kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Request = 0x01,
    Response = 0x02,
}

// =============================================================================
// Request Encoding/Decoding
// =============================================================================

/// Encode a request to bytes
pub fn encode_request(request: &Request) -> Result<Vec<u8>> {
    encode_frame(FrameKind::Request, request)
}

/// Decode a request from bytes
pub fn decode_request(bytes: &[u8]) -> Result<Request> {
    decode_frame(FrameKind::Request, bytes)
}

// =============================================================================
// Response Encoding/Decoding
// =============================================================================

/// Encode a response to bytes
pub fn encode_response(response: &Response) -> Result<Vec<u8>> {
    encode_frame(FrameKind::Response, response)
}

/// Decode a response from bytes
pub fn decode_response(bytes: &[u8]) -> Result<Response> {
    decode_frame(FrameKind::Response, bytes)
}

// =============================================================================
// Framing
// =============================================================================

fn encode_frame<T: Serialize>(kind: FrameKind, body: &T) -> Result<Vec<u8>> {
    let body = bincode::serialize(body)?;
    if body.len() > MAX_PAYLOAD_SIZE as usize {
        return Err(WalError::Protocol(format!(
            "Payload too large: {} bytes (max {})",
            body.len(),
            MAX_PAYLOAD_SIZE
        )));
    }

    let mut message = Vec::with_capacity(HEADER_SIZE + body.len());
    message.push(kind as u8);
    message.extend_from_slice(&(body.len() as u32).to_be_bytes());
    message.extend_from_slice(&body);

    Ok(message)
}

fn decode_frame<T: DeserializeOwned>(expected: FrameKind, bytes: &[u8]) -> Result<T> {
    if bytes.len() < HEADER_SIZE {
        return Err(WalError::Protocol(format!(
            "Incomplete header: expected {} bytes, got {}",
            HEADER_SIZE,
            bytes.len()
        )));
    }

    let header = [bytes[0], bytes[1], bytes[2], bytes[3], bytes[4]];
    let body_len = parse_header(expected, &header)?;

    let total_len = HEADER_SIZE + body_len;
    if bytes.len() < total_len {
        return Err(WalError::Protocol(format!(
            "Incomplete payload: expected {} bytes, got {}",
            total_len,
            bytes.len()
        )));
    }

    bincode::deserialize(&bytes[HEADER_SIZE..total_len])
        .map_err(|e| WalError::Protocol(format!("Malformed {:?} body: {}", expected, e)))
}

/// Validate a frame header, returning the body length
fn parse_header(expected: FrameKind, header: &[u8; HEADER_SIZE]) -> Result<usize> {
    if header[0] != expected as u8 {
        return Err(WalError::Protocol(format!(
            "Unexpected frame kind: 0x{:02x} (expected 0x{:02x})",
            header[0], expected as u8
        )));
    }

    let body_len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    if body_len > MAX_PAYLOAD_SIZE {
        return Err(WalError::Protocol(format!(
            "Payload too large: {} bytes (max {})",
            body_len, MAX_PAYLOAD_SIZE
        )));
    }

    Ok(body_len as usize)
}

fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R, expected: FrameKind) -> Result<T> {
    // Read header first
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;
    let body_len = parse_header(expected, &header)?;

    let mut body = vec![0u8; body_len];
    if body_len > 0 {
        reader.read_exact(&mut body)?;
    }

    bincode::deserialize(&body)
        .map_err(|e| WalError::Protocol(format!("Malformed {:?} body: {}", expected, e)))
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read a complete request from a stream
///
/// Blocks until a complete request is received or an error occurs
pub fn read_request<R: Read>(reader: &mut R) -> Result<Request> {
    read_frame(reader, FrameKind::Request)
}

/// Write a request to a stream
pub fn write_request<W: Write>(writer: &mut W, request: &Request) -> Result<()> {
    let bytes = encode_request(request)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Read a complete response from a stream
pub fn read_response<R: Read>(reader: &mut R) -> Result<Response> {
    read_frame(reader, FrameKind::Response)
}

/// Write a response to a stream
pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> Result<()> {
    let bytes = encode_response(response)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}
