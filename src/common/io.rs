//! Little-endian codecs for reading and writing fixed- and variable-width fields inside a
//! page's byte buffer. Every multi-byte integer in the on-disk format is little-endian,
//! per `spec.md §6`.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IoError {
    #[error("byte array access out of bounds")]
    Overflow,
    #[error("{0}")]
    Custom(String),
}

type IoResult<T> = Result<T, IoError>;

#[inline]
pub fn read_u32(array: &[u8], offset: u32) -> IoResult<u32> {
    let offset = offset as usize;
    let bytes: [u8; 4] = array
        .get(offset..offset + 4)
        .ok_or(IoError::Overflow)?
        .try_into()
        .unwrap();
    Ok(u32::from_le_bytes(bytes))
}

#[inline]
pub fn write_u32(array: &mut [u8], offset: u32, value: u32) -> IoResult<()> {
    let offset = offset as usize;
    let slot = array.get_mut(offset..offset + 4).ok_or(IoError::Overflow)?;
    slot.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

#[inline]
pub fn read_i32(array: &[u8], offset: u32) -> IoResult<i32> {
    read_u32(array, offset).map(|v| v as i32)
}

#[inline]
pub fn write_i32(array: &mut [u8], offset: u32, value: i32) -> IoResult<()> {
    write_u32(array, offset, value as u32)
}

#[inline]
pub fn read_bool(array: &[u8], offset: u32) -> IoResult<bool> {
    let byte = *array.get(offset as usize).ok_or(IoError::Overflow)?;
    Ok(byte != 0)
}

#[inline]
pub fn write_bool(array: &mut [u8], offset: u32, value: bool) -> IoResult<()> {
    let slot = array.get_mut(offset as usize).ok_or(IoError::Overflow)?;
    *slot = value as u8;
    Ok(())
}

#[inline]
pub fn read_f64(array: &[u8], offset: u32) -> IoResult<f64> {
    let offset = offset as usize;
    let bytes: [u8; 8] = array
        .get(offset..offset + 8)
        .ok_or(IoError::Overflow)?
        .try_into()
        .unwrap();
    Ok(f64::from_le_bytes(bytes))
}

#[inline]
pub fn write_f64(array: &mut [u8], offset: u32, value: f64) -> IoResult<()> {
    let offset = offset as usize;
    let slot = array.get_mut(offset..offset + 8).ok_or(IoError::Overflow)?;
    slot.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Read a length-prefixed string: a 4-byte little-endian length followed by raw UTF-8
/// bytes, per the record encoding in `spec.md §6`.
#[inline]
pub fn read_string(array: &[u8], offset: u32) -> IoResult<String> {
    let len = read_u32(array, offset)?;
    let start = (offset + 4) as usize;
    let end = start + len as usize;
    let bytes = array.get(start..end).ok_or(IoError::Overflow)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| IoError::Custom("string field is not valid UTF-8".to_string()))
}

/// Write a length-prefixed string at `offset`. Returns the number of bytes written
/// (`4 + s.len()`), which callers use to advance their cursor when laying out records.
#[inline]
pub fn write_string(array: &mut [u8], offset: u32, value: &str) -> IoResult<u32> {
    let bytes = value.as_bytes();
    write_u32(array, offset, bytes.len() as u32)?;
    let start = (offset + 4) as usize;
    let end = start + bytes.len();
    let slot = array.get_mut(start..end).ok_or(IoError::Overflow)?;
    slot.copy_from_slice(bytes);
    Ok(4 + bytes.len() as u32)
}

/// Number of bytes a length-prefixed string occupies once encoded.
#[inline]
pub fn string_encoded_len(value: &str) -> u32 {
    4 + value.len() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_u32() {
        let mut buf = [0u8; 64];
        write_u32(&mut buf, 12, 314159).unwrap();
        assert_eq!(read_u32(&buf, 12).unwrap(), 314159);
    }

    #[test]
    fn round_trips_i32_negative() {
        let mut buf = [0u8; 64];
        write_i32(&mut buf, 4, -7).unwrap();
        assert_eq!(read_i32(&buf, 4).unwrap(), -7);
    }

    #[test]
    fn detects_overflow() {
        let buf = [0u8; 8];
        assert_eq!(read_u32(&buf, 6), Err(IoError::Overflow));
        assert_eq!(read_u32(&buf, 5).is_ok(), true);
    }

    #[test]
    fn round_trips_string() {
        let mut buf = [0u8; 64];
        let n = write_string(&mut buf, 0, "hello").unwrap();
        assert_eq!(n, 9);
        assert_eq!(read_string(&buf, 0).unwrap(), "hello");
    }

    #[test]
    fn round_trips_f64() {
        let mut buf = [0u8; 64];
        write_f64(&mut buf, 0, 3.25).unwrap();
        assert_eq!(read_f64(&buf, 0).unwrap(), 3.25);
    }
}
