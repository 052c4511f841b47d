//! Fixed-size piece bitfield

use bytes::Bytes;

use super::TorrentError;

/// Bit vector recording piece presence.
///
/// Bits are packed most-significant-bit first: piece 0 is the high bit of
/// byte 0. The set-bit count is maintained incrementally and only moves when
/// a bit actually changes, so repeated sets of one piece count once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<u8>,
    bit_count: u32,
    set_count: u32,
}

impl Bitfield {
    /// Creates a zeroed bitfield of `ceil(bit_count / 8)` bytes.
    pub fn new(bit_count: u32) -> Self {
        Self {
            bits: vec![0; (bit_count as usize).div_ceil(8)],
            bit_count,
            set_count: 0,
        }
    }

    /// Builds a bitfield from a remote peer's packed bytes.
    ///
    /// Spare bits past `bit_count` in the final byte are ignored.
    ///
    /// # Errors
    ///
    /// - `TorrentError::ProtocolError` - Byte length does not match `bit_count`
    pub fn from_bytes(bytes: &[u8], bit_count: u32) -> Result<Self, TorrentError> {
        let expected = (bit_count as usize).div_ceil(8);
        if bytes.len() != expected {
            return Err(TorrentError::ProtocolError {
                message: format!(
                    "bitfield has {} bytes, expected {expected} for {bit_count} pieces",
                    bytes.len()
                ),
            });
        }

        let mut bits = bytes.to_vec();
        let spare = expected * 8 - bit_count as usize;
        if let Some(last) = bits.last_mut() {
            *last &= 0xffu8 << spare;
        }
        let set_count = bits.iter().map(|b| b.count_ones()).sum();

        Ok(Self {
            bits,
            bit_count,
            set_count,
        })
    }

    fn locate(&self, index: u32) -> Result<(usize, u8), TorrentError> {
        if index >= self.bit_count {
            return Err(TorrentError::PieceOutOfRange {
                index,
                total: self.bit_count,
            });
        }
        Ok(((index / 8) as usize, 0x80u8 >> (index % 8)))
    }

    /// Sets bit `index`, returning whether it was previously clear.
    ///
    /// # Errors
    ///
    /// - `TorrentError::PieceOutOfRange` - `index >= bit_count`
    pub fn set_bit(&mut self, index: u32) -> Result<bool, TorrentError> {
        let (byte, mask) = self.locate(index)?;
        let newly_set = self.bits[byte] & mask == 0;
        if newly_set {
            self.bits[byte] |= mask;
            self.set_count += 1;
        }
        Ok(newly_set)
    }

    /// Clears bit `index`, returning whether it was previously set.
    ///
    /// # Errors
    ///
    /// - `TorrentError::PieceOutOfRange` - `index >= bit_count`
    pub fn clear_bit(&mut self, index: u32) -> Result<bool, TorrentError> {
        let (byte, mask) = self.locate(index)?;
        let was_set = self.bits[byte] & mask != 0;
        if was_set {
            self.bits[byte] &= !mask;
            self.set_count -= 1;
        }
        Ok(was_set)
    }

    /// Returns whether bit `index` is set. Out-of-range indices read as clear.
    pub fn has_bit(&self, index: u32) -> bool {
        self.locate(index)
            .map(|(byte, mask)| self.bits[byte] & mask != 0)
            .unwrap_or(false)
    }

    pub fn set_bits(&self) -> u32 {
        self.set_count
    }

    pub fn bit_count(&self) -> u32 {
        self.bit_count
    }

    pub fn byte_len(&self) -> usize {
        self.bits.len()
    }

    /// Returns a copy of the packed bytes, as sent in a Bitfield message.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.bits)
    }

    /// Iterates set bit indices in ascending order.
    pub fn iter_set(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.bit_count).filter(|&index| self.has_bit(index))
    }
}
