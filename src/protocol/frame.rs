//! Framing: `u32` little-endian length, ASCII payload, one NUL byte.
//!
//! The length field counts the payload plus the terminating NUL.

use crate::error::TransportFault;

/// Largest accepted value of the length field.
pub const MAX_FRAME_LEN: u32 = 1024 * 1024;

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Builds the bytes of one frame carrying `payload`.
pub fn encode_frame(payload: &str) -> Vec<u8> {
    let len = payload.len() as u32 + 1;
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + 1);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload.as_bytes());
    frame.push(0);
    frame
}

/// Validates a length prefix and returns how many bytes follow it.
pub fn decode_header(header: [u8; HEADER_LEN]) -> Result<usize, TransportFault> {
    let len = u32::from_le_bytes(header);
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(TransportFault::BadLength(len));
    }
    Ok(len as usize)
}

/// Checks the bytes following the header and extracts the payload.
pub fn decode_body(body: &[u8]) -> Result<String, TransportFault> {
    let Some((&last, payload)) = body.split_last() else {
        return Err(TransportFault::BadLength(0));
    };
    if last != 0 {
        return Err(TransportFault::MissingTerminator);
    }
    if let Some(at) = payload.iter().position(|&b| b == 0) {
        return Err(TransportFault::EarlyTerminator(at));
    }
    if !payload.is_ascii() {
        return Err(TransportFault::NotAscii);
    }
    // ASCII is valid UTF-8
    Ok(String::from_utf8_lossy(payload).into_owned())
}

#[cfg(test)]
mod frame_tests {
    use super::*;

    #[test]
    fn frame_layout() {
        let frame = encode_frame("SLEEP");
        assert_eq!(&frame[..4], &6u32.to_le_bytes());
        assert_eq!(&frame[4..9], b"SLEEP");
        assert_eq!(frame[9], 0);
        assert_eq!(decode_header([6, 0, 0, 0]).unwrap(), 6);
        assert_eq!(decode_body(&frame[4..]).unwrap(), "SLEEP");
    }

    #[test]
    fn length_bounds() {
        assert_eq!(decode_header([0; 4]), Err(TransportFault::BadLength(0)));
        let too_big = (MAX_FRAME_LEN + 1).to_le_bytes();
        assert!(decode_header(too_big).is_err());
        assert!(decode_header(MAX_FRAME_LEN.to_le_bytes()).is_ok());
    }

    #[test]
    fn body_must_end_with_nul() {
        assert_eq!(
            decode_body(b"SLEEPX"),
            Err(TransportFault::MissingTerminator)
        );
        assert_eq!(decode_body(b"caf\xc3\xa9\0"), Err(TransportFault::NotAscii));
        // the length covers two frames' worth of bytes
        assert_eq!(
            decode_body(b"SLE\0EP\0"),
            Err(TransportFault::EarlyTerminator(3))
        );
        assert_eq!(decode_body(b"\0\0"), Err(TransportFault::EarlyTerminator(0)));
    }
}
