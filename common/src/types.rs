//! Common Types for the 5G NR uplink receiver
//!
//! Defines fundamental types used throughout the PUSCH pipeline

use serde::{Deserialize, Serialize};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use std::ops::{Add, Neg};

/// Number of subcarriers in a resource block
pub const NRE: usize = 12;

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl Rnti {
    /// Create a new RNTI
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the RNTI value
    pub fn value(&self) -> u16 {
        self.0
    }
}

/// Subcarrier spacing values in kHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum SubcarrierSpacing {
    /// 15 kHz
    Scs15 = 15,
    /// 30 kHz
    Scs30 = 30,
    /// 60 kHz
    Scs60 = 60,
    /// 120 kHz
    Scs120 = 120,
}

impl SubcarrierSpacing {
    /// Numerology index (mu)
    pub fn numerology(&self) -> u8 {
        match self {
            SubcarrierSpacing::Scs15 => 0,
            SubcarrierSpacing::Scs30 => 1,
            SubcarrierSpacing::Scs60 => 2,
            SubcarrierSpacing::Scs120 => 3,
        }
    }

    /// Parse a spacing given in kHz
    pub fn from_khz(khz: u32) -> Option<Self> {
        Self::from_u32(khz)
    }

    /// Number of slots in a 10 ms frame
    pub fn slots_per_frame(&self) -> u16 {
        10 << self.numerology()
    }
}

/// Cyclic prefix type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclicPrefix {
    Normal,
    Extended,
}

impl CyclicPrefix {
    /// Number of OFDM symbols per slot
    pub fn nof_symbols_per_slot(&self) -> usize {
        match self {
            CyclicPrefix::Normal => 14,
            CyclicPrefix::Extended => 12,
        }
    }
}

/// Modulation schemes supported on PUSCH
///
/// The discriminant is the modulation order (bits per symbol).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModulationScheme {
    Qpsk = 2,
    Qam16 = 4,
    Qam64 = 6,
    Qam256 = 8,
}

impl ModulationScheme {
    /// Modulation order Qm
    pub fn bits_per_symbol(&self) -> usize {
        *self as usize
    }

    /// Get the modulation scheme for a modulation order
    pub fn from_bits_per_symbol(qm: usize) -> Option<Self> {
        Self::from_usize(qm)
    }
}

/// Slot point: system frame number and slot index for a numerology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotPoint {
    pub scs: SubcarrierSpacing,
    pub sfn: u16,
    pub slot: u16,
}

impl SlotPoint {
    pub fn new(scs: SubcarrierSpacing, sfn: u16, slot: u16) -> Self {
        Self { scs, sfn, slot }
    }

    /// Slot index within the frame
    pub fn slot_index(&self) -> u16 {
        self.slot
    }

    /// Absolute slot count, wrapping every 1024 frames
    pub fn count(&self) -> u32 {
        self.sfn as u32 * self.scs.slots_per_frame() as u32 + self.slot as u32
    }

    /// Advance by one slot
    pub fn next(&self) -> Self {
        let mut slot = self.slot + 1;
        let mut sfn = self.sfn;
        if slot >= self.scs.slots_per_frame() {
            slot = 0;
            sfn = (sfn + 1) % 1024;
        }
        Self { scs: self.scs, sfn, slot }
    }
}

/// Bit mask over the OFDM symbols of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SymbolMask {
    bits: u16,
    len: usize,
}

impl SymbolMask {
    /// Create an empty mask of the given size
    pub fn new(len: usize) -> Self {
        assert!(len <= 16, "Symbol mask size {} is too large", len);
        Self { bits: 0, len }
    }

    /// Create a mask of the given size with the listed symbols set
    pub fn from_symbols(len: usize, symbols: &[usize]) -> Self {
        let mut mask = Self::new(len);
        for &symbol in symbols {
            mask.set(symbol);
        }
        mask
    }

    pub fn set(&mut self, symbol: usize) {
        assert!(symbol < self.len, "Symbol {} out of mask size {}", symbol, self.len);
        self.bits |= 1 << symbol;
    }

    pub fn test(&self, symbol: usize) -> bool {
        symbol < self.len && (self.bits >> symbol) & 1 != 0
    }

    pub fn size(&self) -> usize {
        self.len
    }

    pub fn none(&self) -> bool {
        self.bits == 0
    }

    pub fn count(&self) -> usize {
        self.bits.count_ones() as usize
    }

    /// Lowest set symbol index
    pub fn find_lowest(&self) -> Option<usize> {
        if self.none() {
            None
        } else {
            Some(self.bits.trailing_zeros() as usize)
        }
    }

    /// Highest set symbol index
    pub fn find_highest(&self) -> Option<usize> {
        if self.none() {
            None
        } else {
            Some(15 - self.bits.leading_zeros() as usize)
        }
    }

    /// Iterate over the set symbol indices in ascending order
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(move |&i| self.test(i))
    }
}

/// Frequency-domain resource allocation, relative to the bandwidth part
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RbAllocation {
    /// Contiguous VRB allocation (type 1)
    Contiguous { start: usize, len: usize },
    /// Explicit list of VRBs (type 0)
    List(Vec<usize>),
}

impl RbAllocation {
    /// Number of allocated resource blocks
    pub fn nof_rb(&self) -> usize {
        match self {
            RbAllocation::Contiguous { len, .. } => *len,
            RbAllocation::List(rbs) => rbs.len(),
        }
    }

    /// Check the allocation fits in the bandwidth part
    pub fn is_bwp_valid(&self, _bwp_start: usize, bwp_size: usize) -> bool {
        match self {
            RbAllocation::Contiguous { start, len } => *len > 0 && start + len <= bwp_size,
            RbAllocation::List(rbs) => {
                !rbs.is_empty() && rbs.iter().all(|&rb| rb < bwp_size)
            }
        }
    }

    /// PRB mask relative to point A, non-interleaved mapping
    pub fn prb_mask(&self, bwp_start: usize, bwp_size: usize) -> Vec<bool> {
        let mut mask = vec![false; bwp_start + bwp_size];
        match self {
            RbAllocation::Contiguous { start, len } => {
                for rb in *start..start + len {
                    mask[bwp_start + rb] = true;
                }
            }
            RbAllocation::List(rbs) => {
                for &rb in rbs {
                    mask[bwp_start + rb] = true;
                }
            }
        }
        mask
    }
}

/// Soft bit (log-likelihood ratio) with 8-bit saturating arithmetic
///
/// Positive values favour a zero bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LogLikelihoodRatio(i8);

impl LogLikelihoodRatio {
    /// Largest magnitude reachable through arithmetic
    pub const MAX: i8 = 120;
    /// Magnitude reserved for bits known with certainty
    pub const INFINITY: i8 = 127;

    pub const fn new(value: i8) -> Self {
        Self(value)
    }

    /// Quantize a real-valued LLR, saturating at `MAX`
    pub fn from_f32(value: f32) -> Self {
        let max = Self::MAX as f32;
        if value.is_nan() {
            return Self(0);
        }
        Self(value.round().clamp(-max, max) as i8)
    }

    pub fn infinity() -> Self {
        Self(Self::INFINITY)
    }

    pub fn value(&self) -> i8 {
        self.0
    }

    pub fn is_infinity(&self) -> bool {
        self.0 == Self::INFINITY || self.0 == -Self::INFINITY
    }

    /// Saturating sum; infinities are absorbing
    pub fn promotion_sum(a: Self, b: Self) -> Self {
        if a.is_infinity() {
            return a;
        }
        if b.is_infinity() {
            return b;
        }
        let sum = a.0 as i16 + b.0 as i16;
        Self(sum.clamp(-(Self::MAX as i16), Self::MAX as i16) as i8)
    }

    /// Hard decision: 1 for negative LLRs, 0 otherwise
    pub fn hard_decision(&self) -> u8 {
        (self.0 < 0) as u8
    }
}

impl Add for LogLikelihoodRatio {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::promotion_sum(self, rhs)
    }
}

impl Neg for LogLikelihoodRatio {
    type Output = Self;

    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl From<i8> for LogLikelihoodRatio {
    fn from(value: i8) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modulation_order() {
        assert_eq!(ModulationScheme::Qam64.bits_per_symbol(), 6);
        assert_eq!(ModulationScheme::from_bits_per_symbol(4), Some(ModulationScheme::Qam16));
        assert_eq!(ModulationScheme::from_bits_per_symbol(3), None);
    }

    #[test]
    fn test_symbol_mask() {
        let mask = SymbolMask::from_symbols(14, &[2, 11]);
        assert_eq!(mask.size(), 14);
        assert_eq!(mask.count(), 2);
        assert_eq!(mask.find_lowest(), Some(2));
        assert_eq!(mask.find_highest(), Some(11));
        assert_eq!(mask.iter_ones().collect::<Vec<_>>(), vec![2, 11]);
        assert!(SymbolMask::new(14).none());
    }

    #[test]
    fn test_rb_allocation() {
        let alloc = RbAllocation::Contiguous { start: 2, len: 4 };
        assert!(alloc.is_bwp_valid(10, 6));
        assert!(!alloc.is_bwp_valid(10, 5));
        let mask = alloc.prb_mask(10, 6);
        assert_eq!(mask.len(), 16);
        assert_eq!(mask.iter().filter(|&&b| b).count(), 4);
        assert!(!mask[11] && mask[12] && mask[15]);

        let mask = RbAllocation::List(vec![0, 5]).prb_mask(3, 6);
        assert_eq!(mask.len(), 9);
        assert!(mask[3] && mask[8] && !mask[4]);
    }

    #[test]
    fn test_llr_saturation() {
        let a = LogLikelihoodRatio::new(100);
        let b = LogLikelihoodRatio::new(50);
        assert_eq!((a + b).value(), LogLikelihoodRatio::MAX);
        assert_eq!((-a + -b).value(), -LogLikelihoodRatio::MAX);
        assert!((LogLikelihoodRatio::infinity() + -a).is_infinity());
        assert_eq!(LogLikelihoodRatio::from_f32(-3.6).value(), -4);
        assert_eq!(LogLikelihoodRatio::new(-1).hard_decision(), 1);
    }

    #[test]
    fn test_slot_point_wrap() {
        let slot = SlotPoint::new(SubcarrierSpacing::Scs30, 1023, 19);
        let next = slot.next();
        assert_eq!(next.sfn, 0);
        assert_eq!(next.slot, 0);
    }

    #[test]
    fn test_slot_point_as_key() {
        let mut seen = std::collections::HashSet::new();
        let slot = SlotPoint::new(SubcarrierSpacing::Scs15, 7, 9);
        assert!(seen.insert(slot));
        assert!(seen.insert(slot.next()));
        assert!(!seen.insert(SlotPoint::new(SubcarrierSpacing::Scs15, 7, 9)));
        assert!(seen.insert(SlotPoint::new(SubcarrierSpacing::Scs30, 7, 9)));
    }
}
