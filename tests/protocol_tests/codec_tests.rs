//! Codec Tests
//!
//! Tests for request and response framing, and for the mapping between
//! error responses and `WalError`.

use std::io::Cursor;

use atlaswal::protocol::{
    decode_request, decode_response, encode_request, encode_response, read_request, read_response,
    write_request, write_response, ErrorKind, Request, Response, HEADER_SIZE, MAX_PAYLOAD_SIZE,
};
use atlaswal::{LogEntry, Lsn, WalError};
use bytes::Bytes;

// =============================================================================
// Request Tests
// =============================================================================

#[test]
fn test_request_frame_header() {
    let encoded = encode_request(&Request::Ping).unwrap();

    assert_eq!(encoded[0], 0x01);
    let body_len = u32::from_be_bytes([encoded[1], encoded[2], encoded[3], encoded[4]]) as usize;
    assert_eq!(encoded.len(), HEADER_SIZE + body_len);
}

#[test]
fn test_encode_decode_next() {
    let request = Request::Next {
        from: Lsn::new(2, 300),
        wait_ms: Some(1000),
    };
    let decoded = decode_request(&encode_request(&request).unwrap()).unwrap();

    assert_eq!(decoded, request);
    assert_eq!(decoded.wait_ms(), Some(1000));
}

#[test]
fn test_encode_decode_append() {
    let request = Request::Append {
        payload: Bytes::from_static(b"\x00\x01binary\xff"),
    };
    let decoded = decode_request(&encode_request(&request).unwrap()).unwrap();

    match decoded {
        Request::Append { payload } => assert_eq!(&payload[..], b"\x00\x01binary\xff"),
        other => panic!("Expected APPEND request, got {:?}", other),
    }
}

#[test]
fn test_non_blocking_requests_have_no_wait() {
    assert_eq!(Request::Last.wait_ms(), None);
    assert_eq!(Request::Get { lsn: Lsn::segment_start(0) }.wait_ms(), None);
    assert_eq!(Request::First { wait_ms: None }.wait_ms(), None);
}

// =============================================================================
// Response Tests
// =============================================================================

#[test]
fn test_response_frame_header() {
    let encoded = encode_response(&Response::Done).unwrap();
    assert_eq!(encoded[0], 0x02);
}

#[test]
fn test_entry_response_keeps_tail_hint() {
    let entry = LogEntry::new(Lsn::segment_start(1), "payload").with_tail_hint(Some(Lsn::new(1, 900)));
    let response = Response::Entry(Some(entry.clone()));

    let decoded = decode_response(&encode_response(&response).unwrap()).unwrap();
    assert_eq!(decoded, Response::Entry(Some(entry)));
}

#[test]
fn test_empty_entry_response() {
    let decoded = decode_response(&encode_response(&Response::Entry(None)).unwrap()).unwrap();
    assert_eq!(decoded, Response::Entry(None));
}

// =============================================================================
// Error Mapping Tests
// =============================================================================

#[test]
fn test_error_kinds_survive_the_wire() {
    let cases = vec![
        WalError::Timeout,
        WalError::ReadOnly,
        WalError::NotOpen("closed".to_string()),
        WalError::InvalidLsn(Lsn::new(0, 1)),
    ];

    for error in cases {
        let response = decode_response(&encode_response(&Response::error(&error)).unwrap()).unwrap();
        let back = match response {
            Response::Error { kind, message } => Response::into_error(kind, message),
            other => panic!("Expected ERROR response, got {:?}", other),
        };
        assert_eq!(std::mem::discriminant(&back), std::mem::discriminant(&error));
        assert!(!back.is_retryable());
    }
}

#[test]
fn test_other_errors_become_remote() {
    let response = Response::error(&WalError::WalCorruption("bad crc".to_string()));
    match response {
        Response::Error { kind, message } => {
            assert_eq!(kind, ErrorKind::Application);
            let error = Response::into_error(kind, message);
            assert!(matches!(error, WalError::Remote(ref m) if m.contains("bad crc")));
            assert!(!error.is_retryable());
        }
        other => panic!("Expected ERROR response, got {:?}", other),
    }
}

// =============================================================================
// Malformed Input Tests
// =============================================================================

#[test]
fn test_decode_incomplete_header() {
    let result = decode_request(&[0x01, 0x00]);
    assert!(matches!(result, Err(WalError::Protocol(_))));
}

#[test]
fn test_decode_incomplete_body() {
    let mut encoded = encode_request(&Request::Get { lsn: Lsn::segment_start(0) }).unwrap();
    encoded.truncate(encoded.len() - 1);
    assert!(matches!(decode_request(&encoded), Err(WalError::Protocol(_))));
}

#[test]
fn test_decode_wrong_frame_kind() {
    let encoded = encode_response(&Response::Pong).unwrap();
    assert!(matches!(decode_request(&encoded), Err(WalError::Protocol(_))));
}

#[test]
fn test_decode_oversized_body() {
    let mut frame = vec![0x01];
    frame.extend_from_slice(&(MAX_PAYLOAD_SIZE + 1).to_be_bytes());
    assert!(matches!(decode_request(&frame), Err(WalError::Protocol(_))));
}

#[test]
fn test_decode_garbage_body() {
    let frame = vec![0x01, 0x00, 0x00, 0x00, 0x01, 0xee];
    assert!(matches!(decode_request(&frame), Err(WalError::Protocol(_))));
}

// =============================================================================
// Stream I/O Tests
// =============================================================================

#[test]
fn test_stream_sequence() {
    let mut buffer = Vec::new();
    write_request(&mut buffer, &Request::Ping).unwrap();
    write_request(&mut buffer, &Request::Last).unwrap();
    write_request(&mut buffer, &Request::Sync).unwrap();

    let mut cursor = Cursor::new(buffer);
    assert_eq!(read_request(&mut cursor).unwrap(), Request::Ping);
    assert_eq!(read_request(&mut cursor).unwrap(), Request::Last);
    assert_eq!(read_request(&mut cursor).unwrap(), Request::Sync);
    assert!(matches!(read_request(&mut cursor), Err(WalError::Io(_))));
}

#[test]
fn test_stream_response() {
    let mut buffer = Vec::new();
    write_response(&mut buffer, &Response::Pong).unwrap();

    let mut cursor = Cursor::new(buffer);
    assert_eq!(read_response(&mut cursor).unwrap(), Response::Pong);
}
