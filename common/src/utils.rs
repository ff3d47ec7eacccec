//! Common Utilities
//!
//! CRC calculators and bit packing helpers shared by the PHY

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

/// CRC generator polynomials of TS 38.212 Section 5.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcPolynomial {
    /// x^16 + x^12 + x^5 + 1
    Crc16,
    /// Transport block CRC for large transport blocks
    Crc24A,
    /// Codeblock CRC for segmented transport blocks
    Crc24B,
}

impl CrcPolynomial {
    /// Polynomial without the leading term
    fn generator(&self) -> u32 {
        match self {
            CrcPolynomial::Crc16 => 0x1021,
            CrcPolynomial::Crc24A => 0x864CFB,
            CrcPolynomial::Crc24B => 0x800063,
        }
    }

    /// Number of parity bits
    pub fn order(&self) -> usize {
        match self {
            CrcPolynomial::Crc16 => 16,
            CrcPolynomial::Crc24A | CrcPolynomial::Crc24B => 24,
        }
    }
}

/// Table-driven CRC calculator with zero initial state
///
/// Checking a message with its CRC appended yields zero.
#[derive(Debug, Clone)]
pub struct CrcCalculator {
    poly: CrcPolynomial,
    table: [u32; 256],
}

impl CrcCalculator {
    pub fn new(poly: CrcPolynomial) -> Self {
        let order = poly.order();
        let mask = (1u32 << order) - 1;
        let top = 1u32 << (order - 1);
        let mut table = [0u32; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            let mut crc = (i as u32) << (order - 8);
            for _ in 0..8 {
                crc = if crc & top != 0 {
                    (crc << 1) ^ poly.generator()
                } else {
                    crc << 1
                };
            }
            *entry = crc & mask;
        }
        Self { poly, table }
    }

    pub fn polynomial(&self) -> CrcPolynomial {
        self.poly
    }

    pub fn order(&self) -> usize {
        self.poly.order()
    }

    /// CRC over packed bytes, MSB first
    pub fn calculate_bytes(&self, data: &[u8]) -> u32 {
        let order = self.order();
        let mask = (1u32 << order) - 1;
        let mut crc = 0u32;
        for &byte in data {
            let idx = ((crc >> (order - 8)) ^ byte as u32) & 0xFF;
            crc = ((crc << 8) ^ self.table[idx as usize]) & mask;
        }
        crc
    }

    /// CRC over unpacked bits, one bit per byte
    pub fn calculate_bits(&self, bits: &[u8]) -> u32 {
        let order = self.order();
        let mask = (1u32 << order) - 1;
        let mut crc = 0u32;

        // Whole bytes go through the table.
        let mut chunks = bits.chunks_exact(8);
        for chunk in &mut chunks {
            let byte = chunk.iter().fold(0u32, |acc, &b| (acc << 1) | (b & 1) as u32);
            let idx = ((crc >> (order - 8)) ^ byte) & 0xFF;
            crc = ((crc << 8) ^ self.table[idx as usize]) & mask;
        }

        for &bit in chunks.remainder() {
            let msb = (crc >> (order - 1)) & 1;
            crc = (crc << 1) & mask;
            if msb ^ (bit & 1) as u32 != 0 {
                crc ^= self.poly.generator();
            }
        }
        crc & mask
    }

    /// Write the CRC of `bits` MSB first into `parity`
    pub fn attach_bits(&self, bits: &[u8], parity: &mut [u8]) {
        assert_eq!(parity.len(), self.order(), "Parity buffer size mismatch");
        let crc = self.calculate_bits(bits);
        let order = self.order();
        for (i, p) in parity.iter_mut().enumerate() {
            *p = ((crc >> (order - 1 - i)) & 1) as u8;
        }
        trace!("Attached {:?} 0x{:06x} to {} bits", self.poly, crc, bits.len());
    }
}

/// Pack unpacked bits into bytes (MSB first)
pub fn pack_bits(bits: &[u8]) -> Bytes {
    let mut bytes = BytesMut::with_capacity((bits.len() + 7) / 8);

    for chunk in bits.chunks(8) {
        let mut byte = 0u8;
        for (i, &bit) in chunk.iter().enumerate() {
            byte |= (bit & 1) << (7 - i);
        }
        bytes.put_u8(byte);
    }

    bytes.freeze()
}

/// Pack unpacked bits into an existing byte buffer (MSB first)
pub fn pack_bits_into(dst: &mut [u8], bits: &[u8]) {
    assert_eq!(dst.len() * 8, bits.len(), "Packed buffer size mismatch");
    for (byte, chunk) in dst.iter_mut().zip(bits.chunks_exact(8)) {
        *byte = chunk.iter().fold(0u8, |acc, &b| (acc << 1) | (b & 1));
    }
}

/// Unpack bytes into bits (MSB first), one bit per byte
pub fn unpack_bits(bytes: &[u8]) -> Vec<u8> {
    let mut bits = Vec::with_capacity(bytes.len() * 8);

    for &byte in bytes {
        for i in 0..8 {
            bits.push((byte >> (7 - i)) & 1);
        }
    }

    bits
}

/// Convert a power ratio in dB to linear amplitude
pub fn db_to_amplitude(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Convert a linear power value to dB
pub fn power_to_db(power: f32) -> f32 {
    10.0 * power.log10()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_bits_match_bytes() {
        let data = b"Hello, uplink";
        let bits = unpack_bits(data);
        for poly in [CrcPolynomial::Crc16, CrcPolynomial::Crc24A, CrcPolynomial::Crc24B] {
            let crc = CrcCalculator::new(poly);
            assert_eq!(crc.calculate_bits(&bits), crc.calculate_bytes(data));
        }
    }

    #[test]
    fn test_crc_residue_is_zero() {
        let crc = CrcCalculator::new(CrcPolynomial::Crc24B);
        // Odd length exercises the bit-serial tail.
        let mut bits: Vec<u8> = (0..53).map(|i| ((i * 7 + 3) % 5 == 0) as u8).collect();
        let mut parity = vec![0u8; 24];
        crc.attach_bits(&bits, &mut parity);
        bits.extend_from_slice(&parity);
        assert_eq!(crc.calculate_bits(&bits), 0);

        bits[10] ^= 1;
        assert_ne!(crc.calculate_bits(&bits), 0);
    }

    #[test]
    fn test_crc16_single_bit() {
        // A lone one bit leaves the generator itself as remainder.
        let crc = CrcCalculator::new(CrcPolynomial::Crc16);
        assert_eq!(crc.calculate_bits(&[1]), 0x1021);
        assert_eq!(crc.calculate_bits(&[]), 0);
    }

    #[test]
    fn test_bit_packing() {
        let bits = vec![1, 0, 1, 0, 1, 0, 1, 0];
        let packed = pack_bits(&bits);
        assert_eq!(packed[0], 0xAA);

        let unpacked = unpack_bits(&packed);
        assert_eq!(unpacked[..8], bits[..]);

        let mut dst = [0u8; 1];
        pack_bits_into(&mut dst, &bits);
        assert_eq!(dst[0], 0xAA);
    }

    #[test]
    fn test_db_conversion() {
        assert!((db_to_amplitude(20.0) - 10.0).abs() < 1e-4);
        assert!((power_to_db(100.0) - 20.0).abs() < 1e-4);
    }
}
