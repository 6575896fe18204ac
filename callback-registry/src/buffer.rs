//! Argument buffer convention
//!
//! Arguments cross the boundary as raw bytes. The convention used everywhere
//! in this crate:
//! - `length` is a byte count, never an element count
//! - structured payloads are packed little-endian fixed-width values
//! - results that do not fit the `i32` return value are written back in place
//!   into the shared buffer

use crate::types::{RegistryError, Result};
use byteorder::{ByteOrder, LittleEndian};

/// Width of one packed `i32` element in bytes
pub const I32_WIDTH: usize = 4;

/// Mutable view over the argument bytes of one invocation
///
/// The buffer is shared with the caller (and, across the boundary, with
/// native code), so in-place writes are visible once the call returns.
#[derive(Debug)]
pub struct ArgBuffer<'a> {
    bytes: &'a mut [u8],
}

impl<'a> ArgBuffer<'a> {
    /// Wrap an argument region; its length is the byte count of the call
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes }
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut *self.bytes
    }

    /// Number of packed `i32` values, failing if the length is not a multiple of 4
    pub fn i32_count(&self) -> Result<usize> {
        if self.bytes.len() % I32_WIDTH != 0 {
            return Err(RegistryError::InvalidBuffer(format!(
                "{} byte(s) is not a whole number of i32 values",
                self.bytes.len()
            )));
        }
        Ok(self.bytes.len() / I32_WIDTH)
    }

    /// Decode the whole buffer as little-endian `i32` values
    pub fn read_i32s(&self) -> Result<Vec<i32>> {
        let count = self.i32_count()?;
        let mut values = vec![0; count];
        LittleEndian::read_i32_into(&*self.bytes, &mut values);
        Ok(values)
    }

    /// Overwrite the buffer with little-endian `i32` values
    ///
    /// `values` must cover the buffer exactly.
    pub fn write_i32s(&mut self, values: &[i32]) -> Result<()> {
        let count = self.i32_count()?;
        if values.len() != count {
            return Err(RegistryError::InvalidBuffer(format!(
                "cannot write {} i32 value(s) into a buffer of {}",
                values.len(),
                count
            )));
        }
        LittleEndian::write_i32_into(values, &mut *self.bytes);
        Ok(())
    }

    /// Read the `index`-th packed `i32`
    pub fn read_i32(&self, index: usize) -> Result<i32> {
        let range = self.element_range(index)?;
        Ok(LittleEndian::read_i32(&self.bytes[range]))
    }

    /// Write the `index`-th packed `i32`
    pub fn write_i32(&mut self, index: usize, value: i32) -> Result<()> {
        let range = self.element_range(index)?;
        LittleEndian::write_i32(&mut self.bytes[range], value);
        Ok(())
    }

    fn element_range(&self, index: usize) -> Result<std::ops::Range<usize>> {
        let start = index
            .checked_mul(I32_WIDTH)
            .filter(|start| {
                start
                    .checked_add(I32_WIDTH)
                    .map_or(false, |end| end <= self.bytes.len())
            })
            .ok_or_else(|| {
                RegistryError::InvalidBuffer(format!(
                    "i32 index {} out of range for {} byte(s)",
                    index,
                    self.bytes.len()
                ))
            })?;
        Ok(start..start + I32_WIDTH)
    }
}

/// Pack `i32` values little-endian into a fresh byte buffer
pub fn pack_i32s(values: &[i32]) -> Vec<u8> {
    let mut bytes = vec![0; values.len() * I32_WIDTH];
    LittleEndian::write_i32_into(values, &mut bytes);
    bytes
}

/// Unpack little-endian `i32` values from raw bytes
pub fn unpack_i32s(bytes: &[u8]) -> Result<Vec<i32>> {
    if bytes.len() % I32_WIDTH != 0 {
        return Err(RegistryError::InvalidBuffer(format!(
            "{} byte(s) is not a whole number of i32 values",
            bytes.len()
        )));
    }
    let mut values = vec![0; bytes.len() / I32_WIDTH];
    LittleEndian::read_i32_into(bytes, &mut values);
    Ok(values)
}
