//! The ZCL1 wire frame: a 24-byte little-endian header plus variable
//! payload, shared by every request/ack/completion on a capability
//! stream.

pub const MAGIC: [u8; 4] = *b"ZCL1";
pub const VERSION: u16 = 1;
pub const HEADER_LEN: usize = 24;

pub const STATUS_ERR: u32 = 0;
pub const STATUS_OK: u32 = 1;

/// A parsed ZCL1 frame borrowing its payload from the caller's buffer.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub op: u16,
    pub rid: u32,
    pub status: u32,
    pub payload: &'a [u8],
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("short buffer: need at least {need} bytes, have {have}")]
    ShortHeader { need: usize, have: usize },
    #[error("bad magic")]
    BadMagic,
    #[error("unsupported version {0}")]
    BadVersion(u16),
    #[error("payload_len {0} exceeds the caller's frame buffer")]
    PayloadTooLarge(u32),
}

/// Reads the `payload_len` field out of a buffer that is known to hold
/// at least [`HEADER_LEN`] bytes, without validating the rest of the
/// header. Used by the drain loop to decide whether a full frame is
/// buffered yet before calling [`parse`].
pub fn peek_payload_len(buf: &[u8]) -> u32 {
    u32::from_le_bytes(buf[20..24].try_into().unwrap())
}

/// Parses one frame occupying the front of `buf`. `buf` must be exactly
/// `HEADER_LEN + payload_len` bytes (the caller slices to the known
/// frame length first, having already consulted [`peek_payload_len`]).
pub fn parse(buf: &[u8]) -> Result<Frame<'_>, FrameError> {
    if buf.len() < HEADER_LEN {
        return Err(FrameError::ShortHeader { need: HEADER_LEN, have: buf.len() });
    }
    if buf[0..4] != MAGIC {
        return Err(FrameError::BadMagic);
    }
    let version = u16::from_le_bytes(buf[4..6].try_into().unwrap());
    if version != VERSION {
        return Err(FrameError::BadVersion(version));
    }
    let op = u16::from_le_bytes(buf[6..8].try_into().unwrap());
    let rid = u32::from_le_bytes(buf[8..12].try_into().unwrap());
    let status = u32::from_le_bytes(buf[12..16].try_into().unwrap());
    let payload_len = u32::from_le_bytes(buf[20..24].try_into().unwrap());
    let payload_end = HEADER_LEN + payload_len as usize;
    if buf.len() < payload_end {
        return Err(FrameError::PayloadTooLarge(payload_len));
    }
    Ok(Frame { op, rid, status, payload: &buf[HEADER_LEN..payload_end] })
}

fn write_header(out: &mut Vec<u8>, op: u16, rid: u32, status: u32, payload_len: u32) {
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&op.to_le_bytes());
    out.extend_from_slice(&rid.to_le_bytes());
    out.extend_from_slice(&status.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // reserved
    out.extend_from_slice(&payload_len.to_le_bytes());
}

/// Encodes a success frame, `payload` defaulting to empty for the
/// request-acknowledgement case.
pub fn write_ok(op: u16, rid: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    write_header(&mut out, op, rid, STATUS_OK, payload.len() as u32);
    out.extend_from_slice(payload);
    out
}

/// Encodes an error frame carrying a short diagnostic message.
pub fn write_error(op: u16, rid: u32, msg: &str) -> Vec<u8> {
    let bytes = msg.as_bytes();
    let mut out = Vec::with_capacity(HEADER_LEN + bytes.len());
    write_header(&mut out, op, rid, STATUS_ERR, bytes.len() as u32);
    out.extend_from_slice(bytes);
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_round_trip_ok_frame() {
        let fr = write_ok(3, 42, b"hello");
        let parsed = parse(&fr).unwrap();
        assert_eq!(parsed.op, 3);
        assert_eq!(parsed.rid, 42);
        assert_eq!(parsed.status, STATUS_OK);
        assert_eq!(parsed.payload, b"hello");
    }

    #[test]
    fn test_round_trip_error_frame() {
        let fr = write_error(100, 7, "denied");
        let parsed = parse(&fr).unwrap();
        assert_eq!(parsed.status, STATUS_ERR);
        assert_eq!(parsed.payload, b"denied");
    }

    #[test]
    fn test_round_trip_empty_payload() {
        let fr = write_ok(1, 1, &[]);
        let parsed = parse(&fr).unwrap();
        assert_eq!(parsed.payload.len(), 0);
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let mut fr = write_ok(1, 1, &[]);
        fr[0] = b'X';
        assert_eq!(parse(&fr).unwrap_err(), FrameError::BadMagic);
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        assert!(matches!(parse(&[0u8; 10]), Err(FrameError::ShortHeader { .. })));
    }

    #[test]
    fn test_peek_payload_len_matches_written_value() {
        let fr = write_ok(1, 1, b"abc");
        assert_eq!(peek_payload_len(&fr), 3);
    }
}
