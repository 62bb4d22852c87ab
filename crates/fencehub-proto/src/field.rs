use fencehub_utils::ByteBuf;

use crate::{KEY_VALUE_SEPARATOR, ProtoError};

/// Appends one length-prefixed field (`len: u16 BE` then `len` bytes)
/// to `buf` at `*offset`, advancing the offset past it.
pub fn write_field(buf: &mut [u8], offset: &mut usize, bytes: &[u8]) -> Result<(), ProtoError> {
    if bytes.len() > u16::MAX as usize {
        return Err(ProtoError::FieldOverflow);
    }
    let end = *offset + 2 + bytes.len();
    if end > buf.len() {
        return Err(ProtoError::FieldOverflow);
    }
    buf[*offset..*offset + 2].copy_from_slice(&(bytes.len() as u16).to_be_bytes());
    buf[*offset + 2..end].copy_from_slice(bytes);
    *offset = end;
    Ok(())
}

/// Reads one length-prefixed field out of `buf[..data_len]` at
/// `*offset` into `out`, advancing the offset past it.
///
/// Fails when fewer than 2 bytes remain for the prefix, when the prefix
/// points past `data_len`, or when the field does not fit `out`.
pub fn read_field<const N: usize>(
    buf: &[u8],
    data_len: usize,
    offset: &mut usize,
    out: &mut ByteBuf<N>,
) -> Result<(), ProtoError> {
    out.clear();
    if *offset >= data_len || data_len - *offset < 2 {
        return Err(ProtoError::TruncatedField);
    }
    let field_len = u16::from_be_bytes([buf[*offset], buf[*offset + 1]]) as usize;
    let remain = data_len - *offset - 2;
    if field_len > remain {
        return Err(ProtoError::TruncatedField);
    }
    out.assign(&buf[*offset + 2..*offset + 2 + field_len])?;
    *offset += field_len + 2;
    Ok(())
}

/// Splits a `key=value` field at the first separator: the value moves
/// into `value`, `field` is truncated to just the key.
pub fn split_key_value<const K: usize, const V: usize>(
    field: &mut ByteBuf<K>,
    value: &mut ByteBuf<V>,
) -> Result<(), ProtoError> {
    let Some(split_idx) = field.index_of(KEY_VALUE_SEPARATOR) else {
        return Err(ProtoError::MissingSeparator);
    };
    let field_len = field.len();
    value.assign(&field.as_slice()[split_idx + 1..field_len])?;
    field.truncate(split_idx);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HEADER_SIZE, KEY_NODENAME};

    #[test]
    fn field_round_trip() {
        let mut buf = [0u8; 64];
        let mut offset = 0;
        write_field(&mut buf, &mut offset, b"NODENAME=node7").unwrap();
        let written = offset;

        let mut out: ByteBuf<32> = ByteBuf::new();
        let mut offset = 0;
        read_field(&buf, written, &mut offset, &mut out).unwrap();
        assert_eq!(out, b"NODENAME=node7");
        assert_eq!(offset, written);
    }

    #[test]
    fn fence_payload_canonical_bytes() {
        // NODENAME=node7 / SECRET=s3cret, as carried after a 4-byte header.
        let mut buf = [0u8; 64];
        let mut offset = HEADER_SIZE;
        write_field(&mut buf, &mut offset, b"NODENAME=node7").unwrap();
        write_field(&mut buf, &mut offset, b"SECRET=s3cret").unwrap();
        assert_eq!(offset, 35);
        assert_eq!(
            &buf[HEADER_SIZE..offset],
            &[
                0x00, 0x0E, 0x4E, 0x4F, 0x44, 0x45, 0x4E, 0x41, 0x4D, 0x45, 0x3D, 0x6E, 0x6F,
                0x64, 0x65, 0x37, //
                0x00, 0x0D, 0x53, 0x45, 0x43, 0x52, 0x45, 0x54, 0x3D, 0x73, 0x33, 0x63, 0x72,
                0x65, 0x74,
            ]
        );
    }

    #[test]
    fn write_rejects_overflowing_field() {
        let mut buf = [0u8; 8];
        let mut offset = 0;
        assert_eq!(
            write_field(&mut buf, &mut offset, b"0123456789"),
            Err(ProtoError::FieldOverflow)
        );
        assert_eq!(offset, 0);
    }

    #[test]
    fn read_rejects_short_remainder() {
        let buf = [0u8; 16];
        let mut out: ByteBuf<16> = ByteBuf::new();

        // No room for the length prefix.
        let mut offset = 15;
        assert_eq!(read_field(&buf, 16, &mut offset, &mut out), Err(ProtoError::TruncatedField));

        // Offset already at the end.
        let mut offset = 16;
        assert_eq!(read_field(&buf, 16, &mut offset, &mut out), Err(ProtoError::TruncatedField));
    }

    #[test]
    fn read_rejects_truncated_body() {
        let mut buf = [0u8; 16];
        buf[0] = 0x00;
        buf[1] = 0x0A; // claims 10 bytes, only 6 remain
        let mut offset = 0;
        let mut out: ByteBuf<16> = ByteBuf::new();
        assert_eq!(read_field(&buf, 8, &mut offset, &mut out), Err(ProtoError::TruncatedField));
    }

    #[test]
    fn read_rejects_oversized_value() {
        let mut buf = [0u8; 16];
        let mut offset = 0;
        write_field(&mut buf, &mut offset, b"0123456789").unwrap();
        let written = offset;

        let mut small: ByteBuf<4> = ByteBuf::new();
        let mut offset = 0;
        assert_eq!(
            read_field(&buf, written, &mut offset, &mut small),
            Err(ProtoError::ValueTooLong)
        );
    }

    #[test]
    fn split_key_value_at_first_separator() {
        let mut field: ByteBuf<32> = ByteBuf::try_from(b"SECRET=a=b".as_slice()).unwrap();
        let mut value: ByteBuf<32> = ByteBuf::new();
        split_key_value(&mut field, &mut value).unwrap();
        assert_eq!(field, b"SECRET");
        assert_eq!(value, b"a=b");
    }

    #[test]
    fn split_requires_separator() {
        let mut field: ByteBuf<32> = ByteBuf::try_from(KEY_NODENAME).unwrap();
        let mut value: ByteBuf<32> = ByteBuf::new();
        assert_eq!(split_key_value(&mut field, &mut value), Err(ProtoError::MissingSeparator));
    }

    #[test]
    fn split_handles_empty_value() {
        let mut field: ByteBuf<32> = ByteBuf::try_from(b"NODENAME=".as_slice()).unwrap();
        let mut value: ByteBuf<32> = ByteBuf::new();
        split_key_value(&mut field, &mut value).unwrap();
        assert_eq!(field, b"NODENAME");
        assert!(value.is_empty());
    }
}
