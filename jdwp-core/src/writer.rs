// Helper functions for writing JDWP data types into command payloads

use crate::types::IdSize;
use bytes::BufMut;

/// Write a JDWP string (4-byte length prefix + UTF-8 bytes)
pub fn write_string(buf: &mut Vec<u8>, value: &str) {
    let bytes = value.as_bytes();
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
}

/// Write an identifier at the negotiated width, truncating to it
pub fn write_id(buf: &mut Vec<u8>, size: IdSize, id: u64) {
    match size {
        IdSize::Two => buf.put_u16(id as u16),
        IdSize::Four => buf.put_u32(id as u32),
        IdSize::Eight => buf.put_u64(id),
    }
}
