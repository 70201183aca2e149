// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! RLE+ codec.
//!
//! The wire form is a bit stream, least-significant bit first within each
//! byte: a 2-bit version (always `00`), one bit giving the value of the
//! first run, then alternating run lengths. A length is one of three block
//! types:
//!
//! * `1` — a single bit;
//! * `01` followed by 4 bits — lengths 2..=15;
//! * `00` followed by an unsigned varint — lengths 16 and up.
//!
//! The encoding of any given set is unique; decoding stops at the first
//! zero-valued length.

use std::borrow::Cow;

use fvm_ipld_encoding::strict_bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{BitField, Error};

/// An upper bound on the encoded size accepted when decoding. Keeps a
/// hostile bitfield from expanding into unbounded memory.
pub const MAX_ENCODED_SIZE: usize = 32 << 10;

/// Reads bits from a byte slice, least-significant bit first.
pub struct BitReader<'a> {
    bytes: &'a [u8],
    /// Absolute position of the next unread bit.
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Reads up to 8 bits. Bits past the end of the input read as zero.
    pub fn read(&mut self, num_bits: u32) -> u8 {
        debug_assert!(num_bits <= 8);
        let mut out = 0u8;
        for i in 0..num_bits {
            let byte = self.bytes.get(self.pos / 8).copied().unwrap_or(0);
            out |= ((byte >> (self.pos % 8)) & 1) << i;
            self.pos += 1;
        }
        out
    }

    /// Reads an RLE+ block length. `Ok(None)` marks the end of the stream
    /// (a zero-valued length).
    pub fn read_len(&mut self) -> Result<Option<u64>, Error> {
        if self.read(1) == 1 {
            // single bit
            return Ok(Some(1));
        }
        if self.read(1) == 1 {
            // 4-bit length
            let len = self.read(4) as u64;
            return Ok(if len == 0 { None } else { Some(len) });
        }

        // varint length
        let mut len = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = self.read(8);
            if shift == 63 && byte > 1 {
                return Err(Error::Decode("varint length overflows u64"));
            }
            len |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(if len == 0 { None } else { Some(len) });
            }
        }
        Err(Error::Decode("unterminated varint length"))
    }
}

/// Writes bits to a byte buffer, least-significant bit first.
#[derive(Default, Clone, Debug)]
pub struct BitWriter {
    bytes: Vec<u8>,
    /// Bits not yet flushed into `bytes`.
    bits: u16,
    num_bits: u32,
}

impl BitWriter {
    pub fn new() -> Self {
        Default::default()
    }

    /// Writes the low `num_bits` bits of `byte` to the buffer.
    pub fn write(&mut self, byte: u8, num_bits: u32) {
        debug_assert!(num_bits <= 8);
        debug_assert!(8 - byte.leading_zeros() <= num_bits);

        self.bits |= (byte as u16) << self.num_bits;
        self.num_bits += num_bits;

        if self.num_bits >= 8 {
            self.bytes.push(self.bits as u8);
            self.bits >>= 8;
            self.num_bits -= 8;
        }
    }

    /// Writes a run length in its unique block form.
    pub fn write_len(&mut self, len: u64) {
        debug_assert!(len > 0);

        if len == 1 {
            self.write(1, 1);
        } else if len < 16 {
            // 01 with the least significant bit first
            self.write(2, 2);
            self.write(len as u8, 4);
        } else {
            self.write(0, 2);
            let mut buffer = unsigned_varint::encode::u64_buffer();
            for &byte in unsigned_varint::encode::u64(len, &mut buffer) {
                self.write(byte, 8);
            }
        }
    }

    /// Flushes any pending bits and returns the buffer.
    pub fn finish(mut self) -> Vec<u8> {
        if self.num_bits > 0 {
            self.bytes.push(self.bits as u8);
        }
        // trailing zero bytes carry no information and are never produced by
        // a canonical encoder
        while let Some(0) = self.bytes.last() {
            self.bytes.pop();
        }
        self.bytes
    }
}

impl BitField {
    /// Decodes RLE+ bytes into a bitfield.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() > MAX_ENCODED_SIZE {
            return Err(Error::Decode("encoded bitfield too large"));
        }

        let mut reader = BitReader::new(bytes);

        if reader.read(2) != 0 {
            return Err(Error::Decode("incorrect version"));
        }

        let mut next_value = reader.read(1) == 1;
        let mut ranges = Vec::new();
        let mut index = 0u64;

        while let Some(len) = reader.read_len()? {
            let start = index;
            index = index.checked_add(len).ok_or(Error::Decode("run overflows u64"))?;

            if next_value {
                ranges.push(start..index);
            }
            next_value = !next_value;
        }

        Ok(Self { ranges })
    }

    /// Encodes the bitfield into its unique RLE+ byte form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut iter = self.ranges();

        let first_range = match iter.next() {
            Some(range) => range,
            None => return Vec::new(),
        };

        let mut writer = BitWriter::new();
        writer.write(0, 2); // version 00

        if first_range.start == 0 {
            writer.write(1, 1); // the first run is of 1s
        } else {
            writer.write(0, 1);
            writer.write_len(first_range.start); // leading 0s
        }

        writer.write_len(first_range.end - first_range.start);
        let mut index = first_range.end;

        // each subsequent run of 1s is preceded by the gap of 0s before it
        for range in iter {
            writer.write_len(range.start - index);
            writer.write_len(range.end - range.start);
            index = range.end;
        }

        writer.finish()
    }
}

impl Serialize for BitField {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let bytes = self.to_bytes();
        if bytes.len() > MAX_ENCODED_SIZE {
            return Err(serde::ser::Error::custom(format!(
                "encoded bitfield was too large {}",
                bytes.len()
            )));
        }
        strict_bytes::serialize(&bytes, serializer)
    }
}

impl<'de> Deserialize<'de> for BitField {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Cow<'de, [u8]> = strict_bytes::deserialize(deserializer)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_bits(bits: &[u8]) -> Result<BitField, Error> {
        let mut writer = BitWriter::new();
        for &bit in bits {
            writer.write(bit, 1);
        }
        BitField::from_bytes(&writer.finish())
    }

    #[test]
    fn decodes_known_vectors() {
        // 8 contiguous set bits
        let bf = decode_bits(&[
            0, 0, // version
            1, // starts with 1
            0, 1, // short block
            0, 0, 0, 1, // length 8
        ])
        .unwrap();
        assert_eq!(bf, BitField::from_ranges([0..8]));

        // 4 ones, gap of one, 3 ones
        let bf = decode_bits(&[
            0, 0, // version
            1, // starts with 1
            0, 1, 0, 0, 1, 0, // length 4
            1, // single 0
            0, 1, 1, 1, 0, 0, // length 3
        ])
        .unwrap();
        assert_eq!(bf, BitField::from_ranges([0..4, 5..8]));

        // a long block: 25 ones
        let bf = decode_bits(&[
            0, 0, // version
            1, // starts with 1
            0, 0, // long block
            1, 0, 0, 1, 1, 0, 0, 0, // varint 25
        ])
        .unwrap();
        assert_eq!(bf, BitField::from_ranges([0..25]));

        // a zero length ends the stream
        let bf = decode_bits(&[
            0, 0, // version
            1, // starts with 1
            1, // single 1
            0, 1, 0, 0, 0, 0, // length 0: stop
            1, // ignored
        ])
        .unwrap();
        assert_eq!(bf, BitField::from_ranges([0..1]));
    }

    #[test]
    fn rejects_bad_version() {
        assert!(BitField::from_bytes(&[0b0000_0001]).is_err());
    }

    #[test]
    fn roundtrips() {
        for ranges in [vec![], vec![0..1], vec![0..4, 5..8], vec![3..27], vec![1..2, 100..1000]] {
            let bf = BitField::from_ranges(ranges);
            assert_eq!(BitField::from_bytes(&bf.to_bytes()).unwrap(), bf);
        }
    }
}
