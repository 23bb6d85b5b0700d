// Helper functions for reading JDWP data types from buffers
//
// All multi-byte values are big-endian. Every reader checks the remaining
// length first and fails with a wire format error instead of panicking.

use crate::error::{JdwpError, JdwpResult};
use crate::types::IdSize;
use bytes::Buf;

fn ensure(buf: &[u8], needed: usize, what: &str) -> JdwpResult<()> {
    if buf.remaining() < needed {
        return Err(JdwpError::WireFormat(format!(
            "Not enough data for {}: expected {}, got {}",
            what,
            needed,
            buf.remaining()
        )));
    }
    Ok(())
}

/// Read a JDWP string (4-byte length prefix + UTF-8 bytes)
pub fn read_string(buf: &mut &[u8]) -> JdwpResult<String> {
    let len = read_u32(buf)? as usize;
    ensure(buf, len, "string")?;

    let bytes = &buf[..len];
    buf.advance(len);

    String::from_utf8(bytes.to_vec())
        .map_err(|e| JdwpError::WireFormat(format!("Invalid UTF-8 in string: {}", e)))
}

/// Read a u8
pub fn read_u8(buf: &mut &[u8]) -> JdwpResult<u8> {
    ensure(buf, 1, "u8")?;
    Ok(buf.get_u8())
}

/// Read a u16
pub fn read_u16(buf: &mut &[u8]) -> JdwpResult<u16> {
    ensure(buf, 2, "u16")?;
    Ok(buf.get_u16())
}

/// Read a u32
pub fn read_u32(buf: &mut &[u8]) -> JdwpResult<u32> {
    ensure(buf, 4, "u32")?;
    Ok(buf.get_u32())
}

/// Read a i32
pub fn read_i32(buf: &mut &[u8]) -> JdwpResult<i32> {
    ensure(buf, 4, "i32")?;
    Ok(buf.get_i32())
}

/// Read a u64
pub fn read_u64(buf: &mut &[u8]) -> JdwpResult<u64> {
    ensure(buf, 8, "u64")?;
    Ok(buf.get_u64())
}

/// Read an identifier of the negotiated width
pub fn read_id(buf: &mut &[u8], size: IdSize) -> JdwpResult<u64> {
    match size {
        IdSize::Two => read_u16(buf).map(u64::from),
        IdSize::Four => read_u32(buf).map(u64::from),
        IdSize::Eight => read_u64(buf),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_string() {
        let data = [0, 0, 0, 5, b'h', b'e', b'l', b'l', b'o', 0xff];
        let mut buf = &data[..];

        assert_eq!(read_string(&mut buf).unwrap(), "hello");
        assert_eq!(buf, &[0xff]);
    }

    #[test]
    fn test_read_string_truncated() {
        let data = [0, 0, 0, 9, b'h', b'i'];
        let mut buf = &data[..];

        assert!(matches!(read_string(&mut buf), Err(JdwpError::WireFormat(_))));
    }

    #[test]
    fn test_read_id_widths() {
        let data = [0x12, 0x34, 0, 0, 0, 7, 0, 0, 0, 0, 0, 0, 0, 9];
        let mut buf = &data[..];

        assert_eq!(read_id(&mut buf, IdSize::Two).unwrap(), 0x1234);
        assert_eq!(read_id(&mut buf, IdSize::Four).unwrap(), 7);
        assert_eq!(read_id(&mut buf, IdSize::Eight).unwrap(), 9);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_short_buffer_is_wire_format_error() {
        let data = [1, 2, 3];
        let mut buf = &data[..];

        assert!(matches!(read_u64(&mut buf), Err(JdwpError::WireFormat(_))));
        // Nothing consumed on failure
        assert_eq!(buf.len(), 3);
    }
}
