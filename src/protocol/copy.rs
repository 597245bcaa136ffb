//! Binary COPY framing.
//!
//! ```text
//! +-------------------+-----------+---------------+
//! | PGCOPY\n\377\r\n\0| flags i32 | ext len i32   |   header
//! +-------------------+-----------+---------------+
//! | i16 field count | (i32 len | payload)*          |   one per tuple
//! +-------------------------------------------------+
//! | i16 -1                                          |   trailer
//! +-------------------------------------------------+
//! ```
//!
//! Every integer is in network byte order. A field length of -1 marks SQL NULL
//! and carries no payload.

use bytes::{BufMut, BytesMut};

/// The 11-byte signature that opens every binary COPY stream.
pub const SIGNATURE: &[u8; 11] = b"PGCOPY\n\xff\r\n\0";

/// Length sentinel for a NULL field.
pub const NULL_LENGTH: i32 = -1;

/// Field-count sentinel marking the end of the tuple stream.
pub const TRAILER: i16 = -1;

/// Size of the header written by [`put_header`].
pub const HEADER_SIZE: usize = SIGNATURE.len() + 4 + 4;

/// Writes the stream header: signature, flags (no OIDs) and an empty extension area.
pub fn put_header(dst: &mut BytesMut) {
    dst.put_slice(SIGNATURE);
    dst.put_i32(0);
    dst.put_i32(0);
}

/// Starts a tuple with `fields` columns.
pub fn put_tuple_start(dst: &mut BytesMut, fields: i16) {
    dst.put_i16(fields);
}

/// Writes a NULL field.
pub fn put_null(dst: &mut BytesMut) {
    dst.put_i32(NULL_LENGTH);
}

/// Writes the end-of-data marker.
pub fn put_trailer(dst: &mut BytesMut) {
    dst.put_i16(TRAILER);
}

/// Reserves a field length slot and returns its offset so the payload length can be
/// patched in once the payload has been written.
pub fn begin_field(dst: &mut BytesMut) -> usize {
    let at = dst.len();
    dst.put_i32(0);
    at
}

/// Patches the length slot reserved by [`begin_field`].
///
/// Returns `None` when the payload does not fit in an `i32` length.
pub fn end_field(dst: &mut BytesMut, at: usize) -> Option<()> {
    let len = i32::try_from(dst.len() - at - 4).ok()?;
    dst[at..at + 4].copy_from_slice(&len.to_be_bytes());
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut buf = BytesMut::new();
        put_header(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(&buf[..11], b"PGCOPY\n\xff\r\n\0");
        assert_eq!(&buf[11..], &[0, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_field_length_patch() {
        let mut buf = BytesMut::new();
        let at = begin_field(&mut buf);
        buf.put_slice(b"hello");
        end_field(&mut buf, at).unwrap();
        assert_eq!(&buf[..], &[0, 0, 0, 5, b'h', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn test_null_and_trailer() {
        let mut buf = BytesMut::new();
        put_tuple_start(&mut buf, 2);
        put_null(&mut buf);
        put_trailer(&mut buf);
        assert_eq!(&buf[..], &[0, 2, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    }
}
