use std::io::Read;

use crate::error::{Error, Result};

pub trait CimRead: Read {
    fn read_u8(&mut self) -> Result<u8> {
        let mut data = [0; 1];
        self.read_exact(&mut data)?;
        Ok(data[0])
    }

    fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    fn read_u16(&mut self) -> Result<u16> {
        let mut data = [0; 2];
        self.read_exact(&mut data)?;
        Ok(u16::from_le_bytes(data))
    }

    fn read_i16(&mut self) -> Result<i16> {
        let mut data = [0; 2];
        self.read_exact(&mut data)?;
        Ok(i16::from_le_bytes(data))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut data = [0; 4];
        self.read_exact(&mut data)?;
        Ok(u32::from_le_bytes(data))
    }

    fn read_i32(&mut self) -> Result<i32> {
        let mut data = [0; 4];
        self.read_exact(&mut data)?;
        Ok(i32::from_le_bytes(data))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let mut data = [0; 8];
        self.read_exact(&mut data)?;
        Ok(u64::from_le_bytes(data))
    }

    fn read_i64(&mut self) -> Result<i64> {
        let mut data = [0; 8];
        self.read_exact(&mut data)?;
        Ok(i64::from_le_bytes(data))
    }

    fn read_f32(&mut self) -> Result<f32> {
        let mut data = [0; 4];
        self.read_exact(&mut data)?;
        Ok(f32::from_le_bytes(data))
    }

    fn read_f64(&mut self) -> Result<f64> {
        let mut data = [0; 8];
        self.read_exact(&mut data)?;
        Ok(f64::from_le_bytes(data))
    }

    fn read_exact_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut data = vec![0u8; len];
        self.read_exact(&mut data)?;
        Ok(data)
    }

    /// Read `chars` UTF-16LE code units and decode them, dropping any
    /// trailing NUL padding.
    fn read_wide_string(&mut self, chars: usize) -> Result<String> {
        let mut units = Vec::with_capacity(chars);
        for _ in 0..chars {
            units.push(self.read_u16()?);
        }
        while units.last() == Some(&0) {
            units.pop();
        }
        String::from_utf16(&units)
            .map_err(|_| Error::invalid("invalid UTF-16 in wide string"))
    }
}

impl<R: Read> CimRead for R {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn scalars_are_little_endian() {
        let mut input = Cursor::new([0x34, 0x12, 0x78, 0x56, 0x00, 0x00]);
        assert_eq!(input.read_u16().unwrap(), 0x1234);
        assert_eq!(input.read_u32().unwrap(), 0x5678);
    }

    #[test]
    fn wide_string_drops_nul_padding() {
        let mut input = Cursor::new([b'H', 0, b'i', 0, 0, 0, 0, 0]);
        assert_eq!(input.read_wide_string(4).unwrap(), "Hi");
    }

    #[test]
    fn short_reads_fail() {
        let mut input = Cursor::new([0x01u8, 0x02]);
        assert!(input.read_u32().is_err());
    }
}
