//! FPM stream framing.
//!
//! Each netlink frame on the FPM TCP stream is preceded by a 4-byte
//! header: protocol version, payload type, and the total message
//! length (header included) in network byte order.

use crate::error::{Error, Result};

/// FPM protocol version.
pub const FPM_VERSION: u8 = 1;

/// Payload type: netlink.
pub const FPM_MSG_TYPE_NETLINK: u8 = 1;

/// Size of the stream header.
pub const FPM_HDRLEN: usize = 4;

/// Write the FPM header for a netlink payload of `payload_len` bytes
/// into the first [`FPM_HDRLEN`] bytes of `buf`.
pub fn write_header(buf: &mut [u8], payload_len: usize) -> Result<()> {
    let total = FPM_HDRLEN + payload_len;
    if buf.len() < FPM_HDRLEN {
        return Err(Error::EncodeOverflow {
            needed: FPM_HDRLEN,
            capacity: buf.len(),
        });
    }
    if total > u16::MAX as usize {
        return Err(Error::config(format!(
            "FPM payload of {} bytes exceeds the 16-bit length field",
            payload_len
        )));
    }
    buf[0] = FPM_VERSION;
    buf[1] = FPM_MSG_TYPE_NETLINK;
    buf[2..4].copy_from_slice(&(total as u16).to_be_bytes());
    Ok(())
}

/// Encode a netlink payload into `buf` after the FPM header, using
/// `encode` for the payload, then stamp the header. Returns the total
/// frame length.
pub fn frame_with_header(
    buf: &mut [u8],
    encode: impl FnOnce(&mut [u8]) -> Result<usize>,
) -> Result<usize> {
    if buf.len() < FPM_HDRLEN {
        return Err(Error::EncodeOverflow {
            needed: FPM_HDRLEN,
            capacity: buf.len(),
        });
    }
    let payload_len = {
        let (_, payload) = buf.split_at_mut(FPM_HDRLEN);
        encode(payload)?
    };
    write_header(buf, payload_len)?;
    Ok(FPM_HDRLEN + payload_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut buf = [0u8; 8];
        write_header(&mut buf, 100).unwrap();
        assert_eq!(buf[0], 1);
        assert_eq!(buf[1], 1);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 104);
    }

    #[test]
    fn test_frame_with_header() {
        let mut buf = [0u8; 32];
        let n = frame_with_header(&mut buf, |payload| {
            payload[..4].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
            Ok(4)
        })
        .unwrap();
        assert_eq!(n, 8);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 8);
        assert_eq!(&buf[4..8], &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_tiny_buffer() {
        let mut buf = [0u8; 2];
        assert!(write_header(&mut buf, 4).unwrap_err().is_overflow());
    }
}
