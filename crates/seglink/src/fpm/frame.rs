//! Frame writer over a caller-owned buffer.
//!
//! The FPM path sits on the hot side of route churn, so the encoder
//! writes into a buffer the caller provides and never allocates. A
//! message that does not fit yields [`Error::EncodeOverflow`] and
//! leaves the caller to drop or resize.

use zerocopy::IntoBytes;

use crate::error::{Error, Result};

use super::netlink::{NLMSG_HDRLEN, NlMsgHdr, nl_align};

/// Attribute header size.
const ATTR_HDRLEN: usize = 4;

/// Nested-attribute flag on the attribute type.
const NLA_F_NESTED: u16 = 1 << 15;

/// Token returned when starting a nested attribute or a length-
/// patched region; finalizing writes the accumulated length back.
#[derive(Debug, Clone, Copy)]
pub struct NestToken {
    offset: usize,
}

/// Writer that appends netlink-framed data to a borrowed buffer.
#[derive(Debug)]
pub struct FrameWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> FrameWriter<'a> {
    /// Start a message with the given type and flags. Fails if even
    /// the header does not fit.
    pub fn new(buf: &'a mut [u8], msg_type: u16, flags: u16) -> Result<Self> {
        if buf.len() < NLMSG_HDRLEN {
            return Err(Error::EncodeOverflow {
                needed: NLMSG_HDRLEN,
                capacity: buf.len(),
            });
        }
        let hdr = NlMsgHdr {
            nlmsg_len: 0, // patched in finish()
            nlmsg_type: msg_type,
            nlmsg_flags: flags,
            nlmsg_seq: 0,
            nlmsg_pid: 0,
        };
        buf[..NLMSG_HDRLEN].copy_from_slice(hdr.as_bytes());
        Ok(Self {
            buf,
            len: NLMSG_HDRLEN,
        })
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether only the header has been written.
    pub fn is_empty(&self) -> bool {
        self.len == NLMSG_HDRLEN
    }

    fn reserve(&mut self, extra: usize) -> Result<usize> {
        let start = self.len;
        let end = start
            .checked_add(extra)
            .ok_or(Error::EncodeOverflow {
                needed: usize::MAX,
                capacity: self.buf.len(),
            })?;
        if end > self.buf.len() {
            return Err(Error::EncodeOverflow {
                needed: end,
                capacity: self.buf.len(),
            });
        }
        self.len = end;
        Ok(start)
    }

    /// Append raw bytes with alignment padding.
    pub fn put_bytes(&mut self, data: &[u8]) -> Result<()> {
        let padded = nl_align(data.len());
        let start = self.reserve(padded)?;
        self.buf[start..start + data.len()].copy_from_slice(data);
        self.buf[start + data.len()..start + padded].fill(0);
        Ok(())
    }

    /// Append a fixed-layout struct.
    pub fn put_struct<T: IntoBytes + zerocopy::Immutable>(&mut self, value: &T) -> Result<()> {
        self.put_bytes(value.as_bytes())
    }

    /// Append an attribute with the given type and payload.
    pub fn put_attr(&mut self, attr_type: u16, data: &[u8]) -> Result<()> {
        let total = ATTR_HDRLEN + data.len();
        let padded = nl_align(total);
        let start = self.reserve(padded)?;
        self.buf[start..start + 2].copy_from_slice(&(total as u16).to_ne_bytes());
        self.buf[start + 2..start + 4].copy_from_slice(&attr_type.to_ne_bytes());
        self.buf[start + 4..start + total].copy_from_slice(data);
        self.buf[start + total..start + padded].fill(0);
        Ok(())
    }

    /// Append a u8 attribute.
    pub fn put_attr_u8(&mut self, attr_type: u16, value: u8) -> Result<()> {
        self.put_attr(attr_type, &[value])
    }

    /// Append a u16 attribute (host order).
    pub fn put_attr_u16(&mut self, attr_type: u16, value: u16) -> Result<()> {
        self.put_attr(attr_type, &value.to_ne_bytes())
    }

    /// Append a u32 attribute (host order).
    pub fn put_attr_u32(&mut self, attr_type: u16, value: u32) -> Result<()> {
        self.put_attr(attr_type, &value.to_ne_bytes())
    }

    /// Append a null-terminated string attribute.
    pub fn put_attr_str(&mut self, attr_type: u16, value: &str) -> Result<()> {
        let bytes = value.as_bytes();
        let total = ATTR_HDRLEN + bytes.len() + 1;
        let padded = nl_align(total);
        let start = self.reserve(padded)?;
        self.buf[start..start + 2].copy_from_slice(&(total as u16).to_ne_bytes());
        self.buf[start + 2..start + 4].copy_from_slice(&attr_type.to_ne_bytes());
        self.buf[start + 4..start + 4 + bytes.len()].copy_from_slice(bytes);
        self.buf[start + 4 + bytes.len()..start + padded].fill(0);
        Ok(())
    }

    /// Start a nested attribute.
    pub fn nest_start(&mut self, attr_type: u16) -> Result<NestToken> {
        let start = self.reserve(ATTR_HDRLEN)?;
        self.buf[start..start + 2].copy_from_slice(&0u16.to_ne_bytes());
        self.buf[start + 2..start + 4]
            .copy_from_slice(&(attr_type | NLA_F_NESTED).to_ne_bytes());
        Ok(NestToken { offset: start })
    }

    /// Finalize a nested attribute, patching its length.
    pub fn nest_end(&mut self, token: NestToken) {
        let nested_len = (self.len - token.offset) as u16;
        self.buf[token.offset..token.offset + 2].copy_from_slice(&nested_len.to_ne_bytes());
    }

    /// Start a length-patched raw region (an rtnexthop entry). The
    /// length written at `offset` covers everything up to `region_end`.
    pub fn region_start(&mut self) -> usize {
        self.len
    }

    /// Patch a u16 length field at `offset` to cover bytes up to the
    /// current position.
    pub fn region_end(&mut self, offset: usize) {
        let region_len = (self.len - offset) as u16;
        self.buf[offset..offset + 2].copy_from_slice(&region_len.to_ne_bytes());
    }

    /// Patch the message length into the header and return the total
    /// byte count.
    pub fn finish(self) -> usize {
        let len = self.len as u32;
        self.buf[0..4].copy_from_slice(&len.to_ne_bytes());
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fpm::netlink::{nlm_flags, rtm};

    #[test]
    fn test_header_only() {
        let mut buf = [0u8; 64];
        let writer = FrameWriter::new(&mut buf, rtm::NEWROUTE, nlm_flags::REQUEST).unwrap();
        assert!(writer.is_empty());
        let n = writer.finish();
        assert_eq!(n, NLMSG_HDRLEN);
        assert_eq!(u32::from_ne_bytes(buf[0..4].try_into().unwrap()), 16);
        assert_eq!(u16::from_ne_bytes(buf[4..6].try_into().unwrap()), 24);
    }

    #[test]
    fn test_attr_padding() {
        let mut buf = [0u8; 64];
        let mut writer = FrameWriter::new(&mut buf, rtm::NEWROUTE, 0).unwrap();
        writer.put_attr(1, &[0xaa]).unwrap();
        let n = writer.finish();
        // Header + attr header + 1 byte payload padded to 4.
        assert_eq!(n, NLMSG_HDRLEN + 8);
        assert_eq!(buf[NLMSG_HDRLEN], 5); // attr len
        assert_eq!(buf[NLMSG_HDRLEN + 4], 0xaa);
        assert_eq!(&buf[NLMSG_HDRLEN + 5..NLMSG_HDRLEN + 8], &[0, 0, 0]);
    }

    #[test]
    fn test_string_attr_null_terminated() {
        let mut buf = [0u8; 64];
        let mut writer = FrameWriter::new(&mut buf, rtm::NEWROUTE, 0).unwrap();
        writer.put_attr_str(100, "blue").unwrap();
        writer.finish();
        // 4 header + 4 chars + NUL = 9.
        assert_eq!(buf[NLMSG_HDRLEN], 9);
        assert_eq!(&buf[NLMSG_HDRLEN + 4..NLMSG_HDRLEN + 9], b"blue\0");
    }

    #[test]
    fn test_nested_length_patched() {
        let mut buf = [0u8; 64];
        let mut writer = FrameWriter::new(&mut buf, rtm::NEWROUTE, 0).unwrap();
        let nest = writer.nest_start(22).unwrap();
        writer.put_attr_u32(1, 7).unwrap();
        writer.nest_end(nest);
        writer.finish();

        let nest_len = u16::from_ne_bytes(
            buf[NLMSG_HDRLEN..NLMSG_HDRLEN + 2].try_into().unwrap(),
        );
        assert_eq!(nest_len, 4 + 8);
        let nest_type = u16::from_ne_bytes(
            buf[NLMSG_HDRLEN + 2..NLMSG_HDRLEN + 4].try_into().unwrap(),
        );
        assert_eq!(nest_type & 0x7fff, 22);
        assert_ne!(nest_type & 0x8000, 0);
    }

    #[test]
    fn test_overflow_reported() {
        let mut buf = [0u8; 20];
        let mut writer = FrameWriter::new(&mut buf, rtm::NEWROUTE, 0).unwrap();
        let err = writer.put_attr(1, &[0u8; 32]).unwrap_err();
        assert!(err.is_overflow());

        let mut tiny = [0u8; 8];
        assert!(FrameWriter::new(&mut tiny, rtm::NEWROUTE, 0).is_err());
    }

    #[test]
    fn test_overflow_leaves_length_consistent() {
        let mut buf = [0u8; 24];
        let mut writer = FrameWriter::new(&mut buf, rtm::NEWROUTE, 0).unwrap();
        writer.put_attr_u32(6, 20).unwrap();
        let before = writer.len();
        assert!(writer.put_attr(1, &[0u8; 16]).is_err());
        assert_eq!(writer.len(), before);
    }
}
