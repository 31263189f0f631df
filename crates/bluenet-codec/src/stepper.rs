//! Little-endian cursor over a byte slice.

use crate::error::CodecError;

/// Reads fixed-width little-endian fields from a byte slice in order.
///
/// Every read fails with [`CodecError::InvalidDataLength`] instead of
/// panicking when the slice runs out.
#[derive(Debug, Clone)]
pub struct DataStepper<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> DataStepper<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn skip(&mut self, len: usize) -> Result<(), CodecError> {
        self.take(len).map(|_| ())
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < len {
            return Err(CodecError::InvalidDataLength {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    /// Returns everything not read yet and moves to the end.
    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.position..];
        self.position = self.data.len();
        slice
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0_u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.array::<1>()?[0])
    }

    pub fn i8(&mut self) -> Result<i8, CodecError> {
        Ok(i8::from_le_bytes(self.array()?))
    }

    pub fn u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn i16(&mut self) -> Result<i16, CodecError> {
        Ok(i16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.array()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_fields_in_order() {
        let data = [0x01, 0x34, 0x12, 0xFE, 0x78, 0x56, 0x34, 0x12, 0xAA];
        let mut stepper = DataStepper::new(&data);
        assert_eq!(stepper.u8().unwrap(), 0x01);
        assert_eq!(stepper.u16().unwrap(), 0x1234);
        assert_eq!(stepper.i8().unwrap(), -2);
        assert_eq!(stepper.u32().unwrap(), 0x1234_5678);
        assert_eq!(stepper.remaining(), 1);
        assert_eq!(stepper.rest(), &[0xAA]);
        assert!(stepper.is_empty());
    }

    #[test]
    fn underrun_is_an_error_and_does_not_advance() {
        let data = [0x01, 0x02];
        let mut stepper = DataStepper::new(&data);
        stepper.skip(1).unwrap();
        assert_eq!(
            stepper.u32(),
            Err(CodecError::InvalidDataLength {
                needed: 4,
                remaining: 1
            })
        );
        assert_eq!(stepper.position(), 1);
        assert_eq!(stepper.u8().unwrap(), 0x02);
    }
}
