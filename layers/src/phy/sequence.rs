/// Pseudo-random sequences and DM-RS for PUSCH
/// Based on 3GPP TS 38.211 Sections 5.2.1 and 6.4.1.1

use common::types::LogLikelihoodRatio;
use num_complex::Complex32;

/// Sequence offset Nc
const NC: usize = 1600;

/// DMRS Type configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmrsType {
    Type1,
    Type2,
}

impl DmrsType {
    /// Get number of DMRS per resource block
    pub fn nof_dmrs_per_rb(&self) -> usize {
        match self {
            DmrsType::Type1 => 6,  // Every other subcarrier
            DmrsType::Type2 => 4,  // Two groups of 2 consecutive subcarriers
        }
    }
}

/// CDM parameters of a DM-RS type 1 layer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DmrsWeights {
    /// CDM group subcarrier offset, delta
    pub delta: usize,
    /// Frequency domain weights [w_f(0), w_f(1)]
    pub w_f: [f32; 2],
}

/// Get DMRS parameters for PUSCH type 1 (Table 6.4.1.1.3-1)
pub fn get_pusch_dmrs_params(layer: usize) -> DmrsWeights {
    match layer {
        0 => DmrsWeights { delta: 0, w_f: [1.0, 1.0] },
        1 => DmrsWeights { delta: 0, w_f: [1.0, -1.0] },
        2 => DmrsWeights { delta: 1, w_f: [1.0, 1.0] },
        3 => DmrsWeights { delta: 1, w_f: [1.0, -1.0] },
        _ => panic!("Invalid DMRS port {} for Type1", layer),
    }
}

/// Gold sequence generator
#[derive(Debug, Clone)]
pub struct PseudoRandomGenerator {
    x1: u32,
    x2: u32,
}

impl PseudoRandomGenerator {
    /// Create a new generator with initialization value `c_init`
    pub fn new(c_init: u32) -> Self {
        // x1(0) = 1, x1(n) = 0 for n = 1..30
        let mut generator = Self {
            x1: 1,
            x2: c_init & 0x7FFFFFFF,
        };
        for _ in 0..NC {
            generator.advance();
        }
        generator
    }

    /// Advance LFSR state
    fn advance(&mut self) {
        // x1 sequence: x1(n+31) = (x1(n+3) + x1(n)) mod 2
        let x1_new = ((self.x1 >> 3) ^ self.x1) & 1;
        self.x1 = ((self.x1 >> 1) | (x1_new << 30)) & 0x7FFFFFFF;

        // x2 sequence: x2(n+31) = (x2(n+3) + x2(n+2) + x2(n+1) + x2(n)) mod 2
        let x2_new = ((self.x2 >> 3) ^ (self.x2 >> 2) ^ (self.x2 >> 1) ^ self.x2) & 1;
        self.x2 = ((self.x2 >> 1) | (x2_new << 30)) & 0x7FFFFFFF;
    }

    /// Generate next bit from the sequence
    pub fn next_bit(&mut self) -> u8 {
        let c = (self.x1 ^ self.x2) & 1;
        self.advance();
        c as u8
    }

    /// Generate QPSK symbol from sequence
    pub fn next_qpsk_symbol(&mut self, amplitude: f32) -> Complex32 {
        let c0 = self.next_bit();
        let c1 = self.next_bit();

        Complex32::new(
            amplitude * (1.0 - 2.0 * c0 as f32),
            amplitude * (1.0 - 2.0 * c1 as f32),
        )
    }

    /// Skip n bits
    pub fn skip(&mut self, n_bits: usize) {
        for _ in 0..n_bits {
            self.advance();
        }
    }

    /// Scramble hard bits in place
    pub fn apply_xor(&mut self, bits: &mut [u8]) {
        for bit in bits.iter_mut() {
            *bit ^= self.next_bit();
        }
    }

    /// Descramble soft bits in place
    pub fn apply_xor_llr(&mut self, llrs: &mut [LogLikelihoodRatio]) {
        for llr in llrs.iter_mut() {
            if self.next_bit() == 1 {
                *llr = -*llr;
            }
        }
    }
}

/// Calculate PUSCH DMRS initialization value
/// c_init = (2^17 * (N_symb * n_slot + l + 1) * (2 * N_ID + 1) + 2 * N_ID + n_SCID) mod 2^31
pub fn calculate_pusch_dmrs_cinit(slot: u32, symbol: usize, nof_symbols_per_slot: usize, n_id: u16, n_scid: bool) -> u32 {
    let l = symbol as u64;
    let n_symb_slot = nof_symbols_per_slot as u64;
    let scid = if n_scid { 1 } else { 0 };
    let value = (1u64 << 17) * (n_symb_slot * slot as u64 + l + 1) * (2 * n_id as u64 + 1)
        + 2 * n_id as u64
        + scid;
    (value & 0x7FFFFFFF) as u32
}

/// Calculate PUSCH data scrambling initialization value
/// c_init = n_RNTI * 2^15 + n_ID
pub fn calculate_pusch_scrambling_cinit(rnti: u16, n_id: u16) -> u32 {
    ((rnti as u32) << 15) + n_id as u32
}

/// Generate DMRS sequence for given resource blocks
///
/// `rb_mask` starts at common resource block zero; the sequence of skipped
/// blocks is consumed so every allocated block gets its standard values.
pub fn generate_dmrs_sequence(
    rb_mask: &[bool],
    nof_dmrs_per_rb: usize,
    generator: &mut PseudoRandomGenerator,
    amplitude: f32,
) -> Vec<Complex32> {
    let mut sequence = Vec::with_capacity(rb_mask.iter().filter(|&&rb| rb).count() * nof_dmrs_per_rb);
    let mut current_rb = 0;

    for (rb, _) in rb_mask.iter().enumerate().filter(|(_, allocated)| **allocated) {
        // Skip symbols between current position and this RB
        if rb > current_rb {
            generator.skip((rb - current_rb) * nof_dmrs_per_rb * 2);
        }

        // Generate symbols for this RB
        for _ in 0..nof_dmrs_per_rb {
            sequence.push(generator.next_qpsk_symbol(amplitude));
        }

        current_rb = rb + 1;
    }

    sequence
}

/// Apply the frequency domain CDM weights of a layer to a DMRS sequence
pub fn apply_cdm_weights(base_sequence: &[Complex32], weights: &DmrsWeights) -> Vec<Complex32> {
    base_sequence
        .iter()
        .enumerate()
        .map(|(idx, &symbol)| symbol * weights.w_f[idx % 2])
        .collect()
}
