// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! A compressed set of non-negative integers with value semantics.
//!
//! Bits are stored as sorted, disjoint, non-adjacent half-open ranges, which
//! is the in-memory mirror of the canonical RLE+ wire form: every operation
//! is linear in the number of runs rather than the magnitude of the largest
//! element.

use std::ops::{BitAnd, BitOr, BitOrAssign, Range, Sub, SubAssign};

mod rleplus;

pub use rleplus::{BitReader, BitWriter};

/// The maximum value that can be stored. `u64::MAX` is reserved so that the
/// end bound of a run always fits in a `u64`.
pub const MAX_BIT: u64 = u64::MAX - 1;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bitfields may not contain values above {MAX_BIT}")]
    ValueOutOfRange,
    #[error("bitfield has more set bits than the limit of {0}")]
    TooManyBits(u64),
    #[error("not enough set bits to index the slice")]
    SliceOutOfBounds,
    #[error("failed to decode bitfield: {0}")]
    Decode(&'static str),
}

/// A set of `u64`s, held as canonical sorted runs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BitField {
    /// Sorted, non-overlapping, non-adjacent, non-empty ranges of set bits.
    ranges: Vec<Range<u64>>,
}

impl BitField {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a bitfield from ranges that must already be sorted and
    /// non-overlapping. Adjacent ranges are coalesced.
    pub fn from_ranges(iter: impl IntoIterator<Item = Range<u64>>) -> Self {
        let mut ranges: Vec<Range<u64>> = Vec::new();
        for range in iter {
            if range.start >= range.end {
                continue;
            }
            match ranges.last_mut() {
                Some(last) if last.end == range.start => last.end = range.end,
                _ => ranges.push(range),
            }
        }
        Self { ranges }
    }

    /// Builds a bitfield from individual bits, in any order. Fails only if a
    /// bit is out of range.
    pub fn try_from_bits(iter: impl IntoIterator<Item = u64>) -> Result<Self, Error> {
        let mut bits: Vec<u64> = iter.into_iter().collect();
        if bits.iter().any(|&b| b > MAX_BIT) {
            return Err(Error::ValueOutOfRange);
        }
        bits.sort_unstable();
        bits.dedup();
        Ok(Self::from_ranges(ranges_from_bits(bits)))
    }

    /// The ranges of set bits, ascending.
    pub fn ranges(&self) -> impl Iterator<Item = Range<u64>> + '_ {
        self.ranges.iter().cloned()
    }

    /// Iterates the set bits in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.ranges.iter().flat_map(|range| range.clone())
    }

    /// Iterates the set bits, failing if there are more than `max`.
    pub fn bounded_iter(&self, max: u64) -> Result<impl Iterator<Item = u64> + '_, Error> {
        if self.len() > max {
            return Err(Error::TooManyBits(max));
        }
        Ok(self.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// The number of set bits.
    pub fn len(&self) -> u64 {
        self.ranges.iter().map(|range| range.end - range.start).sum()
    }

    /// The lowest set bit, if any.
    pub fn first(&self) -> Option<u64> {
        self.ranges.first().map(|range| range.start)
    }

    /// The highest set bit, if any.
    pub fn last(&self) -> Option<u64> {
        self.ranges.last().map(|range| range.end - 1)
    }

    /// Whether the given bit is set.
    pub fn get(&self, bit: u64) -> bool {
        let i = self.ranges.partition_point(|range| range.end <= bit);
        self.ranges.get(i).map_or(false, |range| range.start <= bit)
    }

    /// Sets a bit.
    pub fn set(&mut self, bit: u64) {
        debug_assert!(bit <= MAX_BIT);
        *self = union_ranges(&self.ranges, &[bit..bit + 1]);
    }

    /// Clears a bit.
    pub fn unset(&mut self, bit: u64) {
        *self = difference_ranges(&self.ranges, &[bit..bit + 1]);
    }

    /// Union of any number of bitfields.
    pub fn union<'a>(fields: impl IntoIterator<Item = &'a Self>) -> Self {
        fields.into_iter().fold(Self::new(), |acc, bf| &acc | bf)
    }

    /// True if every bit of `other` is also set in `self`.
    pub fn contains_all(&self, other: &Self) -> bool {
        let mut i = 0;
        for range in &other.ranges {
            while i < self.ranges.len() && self.ranges[i].end <= range.start {
                i += 1;
            }
            match self.ranges.get(i) {
                Some(own) if own.start <= range.start && range.end <= own.end => {}
                _ => return false,
            }
        }
        true
    }

    /// True if any bit is set in both bitfields.
    pub fn contains_any(&self, other: &Self) -> bool {
        let (mut i, mut j) = (0, 0);
        while i < self.ranges.len() && j < other.ranges.len() {
            let (a, b) = (&self.ranges[i], &other.ranges[j]);
            if a.start < b.end && b.start < a.end {
                return true;
            }
            if a.end <= b.end {
                i += 1;
            } else {
                j += 1;
            }
        }
        false
    }

    /// Returns a bitfield of `count` set bits, starting at the `offset`th set
    /// bit of `self` (both counted in bit rank, not position).
    pub fn slice(&self, offset: u64, count: u64) -> Result<Self, Error> {
        let mut skipped = 0;
        let mut taken = 0;
        let mut ranges = Vec::new();

        for range in &self.ranges {
            let mut start = range.start;
            let len = range.end - range.start;

            // burn through the offset first
            let skip = std::cmp::min(offset - skipped, len);
            skipped += skip;
            start += skip;

            if start < range.end && taken < count {
                let take = std::cmp::min(count - taken, range.end - start);
                ranges.push(start..start + take);
                taken += take;
            }
            if taken == count {
                break;
            }
        }

        if taken < count {
            return Err(Error::SliceOutOfBounds);
        }
        Ok(Self::from_ranges(ranges))
    }

    /// Removes the bits of `other` from `self`, shifting every retained bit
    /// down by the number of removed positions below it. For example,
    /// `{1, 2, 5, 6}.cut({2, 3})` is `{1, 3, 4}`.
    pub fn cut(&self, other: &Self) -> Self {
        let mut bits = Vec::new();
        let mut j = 0;
        let mut cut_below = 0u64;

        for bit in self.iter() {
            while j < other.ranges.len() && other.ranges[j].end <= bit {
                cut_below += other.ranges[j].end - other.ranges[j].start;
                j += 1;
            }
            match other.ranges.get(j) {
                // the bit itself is cut out
                Some(range) if range.start <= bit => continue,
                _ => bits.push(bit - cut_below),
            }
        }

        Self::from_ranges(ranges_from_bits(bits))
    }
}

/// Converts sorted deduplicated bits into canonical ranges.
pub fn ranges_from_bits(bits: impl IntoIterator<Item = u64>) -> Vec<Range<u64>> {
    let mut ranges: Vec<Range<u64>> = Vec::new();
    for bit in bits {
        match ranges.last_mut() {
            Some(last) if last.end == bit => last.end = bit + 1,
            _ => ranges.push(bit..bit + 1),
        }
    }
    ranges
}

fn union_ranges(a: &[Range<u64>], b: &[Range<u64>]) -> BitField {
    let mut ranges: Vec<Range<u64>> = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);

    while i < a.len() || j < b.len() {
        let next = if j >= b.len() || (i < a.len() && a[i].start <= b[j].start) {
            let r = a[i].clone();
            i += 1;
            r
        } else {
            let r = b[j].clone();
            j += 1;
            r
        };

        match ranges.last_mut() {
            // adjacency also merges, to keep the run list canonical
            Some(last) if next.start <= last.end => last.end = std::cmp::max(last.end, next.end),
            _ => ranges.push(next),
        }
    }

    BitField { ranges }
}

fn intersect_ranges(a: &[Range<u64>], b: &[Range<u64>]) -> BitField {
    let mut ranges = Vec::new();
    let (mut i, mut j) = (0, 0);

    while i < a.len() && j < b.len() {
        let start = std::cmp::max(a[i].start, b[j].start);
        let end = std::cmp::min(a[i].end, b[j].end);
        if start < end {
            ranges.push(start..end);
        }
        if a[i].end <= b[j].end {
            i += 1;
        } else {
            j += 1;
        }
    }

    BitField { ranges }
}

fn difference_ranges(a: &[Range<u64>], b: &[Range<u64>]) -> BitField {
    let mut ranges = Vec::new();
    let mut j = 0;

    for range in a {
        let mut start = range.start;
        while j < b.len() && b[j].end <= start {
            j += 1;
        }
        let mut k = j;
        while k < b.len() && b[k].start < range.end {
            if start < b[k].start {
                ranges.push(start..b[k].start);
            }
            start = std::cmp::max(start, b[k].end);
            if b[k].end <= range.end {
                k += 1;
            } else {
                break;
            }
        }
        if start < range.end {
            ranges.push(start..range.end);
        }
    }

    BitField { ranges }
}

impl BitOr<&BitField> for &BitField {
    type Output = BitField;

    fn bitor(self, rhs: &BitField) -> BitField {
        union_ranges(&self.ranges, &rhs.ranges)
    }
}

impl BitOrAssign<&BitField> for BitField {
    fn bitor_assign(&mut self, rhs: &BitField) {
        *self = union_ranges(&self.ranges, &rhs.ranges);
    }
}

impl BitAnd<&BitField> for &BitField {
    type Output = BitField;

    fn bitand(self, rhs: &BitField) -> BitField {
        intersect_ranges(&self.ranges, &rhs.ranges)
    }
}

impl Sub<&BitField> for &BitField {
    type Output = BitField;

    fn sub(self, rhs: &BitField) -> BitField {
        difference_ranges(&self.ranges, &rhs.ranges)
    }
}

impl SubAssign<&BitField> for BitField {
    fn sub_assign(&mut self, rhs: &BitField) {
        *self = difference_ranges(&self.ranges, &rhs.ranges);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bf(bits: &[u64]) -> BitField {
        BitField::try_from_bits(bits.iter().copied()).unwrap()
    }

    #[test]
    fn get_set_unset() {
        let mut field = bf(&[1, 2, 3, 10]);
        assert!(field.get(2));
        assert!(!field.get(4));

        field.set(4);
        assert_eq!(field, bf(&[1, 2, 3, 4, 10]));
        assert_eq!(field.ranges().count(), 2);

        field.unset(3);
        assert_eq!(field, bf(&[1, 2, 4, 10]));
        assert!(!field.get(3));
    }

    #[test]
    fn cut_shifts_down() {
        assert_eq!(bf(&[1, 2, 5, 6]).cut(&bf(&[2, 3])), bf(&[1, 3, 4]));
        assert_eq!(bf(&[0, 1, 2]).cut(&bf(&[0])), bf(&[0, 1]));
        assert_eq!(bf(&[5]).cut(&bf(&[])), bf(&[5]));
        assert_eq!(bf(&[]).cut(&bf(&[5])), bf(&[]));
    }

    #[test]
    fn slice_by_rank() {
        let field = bf(&[2, 3, 7, 8, 9, 20]);
        assert_eq!(field.slice(0, 2).unwrap(), bf(&[2, 3]));
        assert_eq!(field.slice(1, 3).unwrap(), bf(&[3, 7, 8]));
        assert_eq!(field.slice(5, 1).unwrap(), bf(&[20]));
        assert!(field.slice(5, 2).is_err());
        assert_eq!(field.slice(0, 0).unwrap(), bf(&[]));
    }

    #[test]
    fn contains() {
        assert!(bf(&[1, 2, 3]).contains_all(&bf(&[2, 3])));
        assert!(!bf(&[1, 2, 3]).contains_all(&bf(&[3, 4])));
        assert!(bf(&[1, 2, 3]).contains_any(&bf(&[3, 4])));
        assert!(!bf(&[1, 2, 3]).contains_any(&bf(&[4, 5])));
        assert!(!bf(&[]).contains_any(&bf(&[4])));
        assert!(bf(&[4]).contains_all(&bf(&[])));
    }
}
