//! UCI short block coding on PUSCH
//!
//! HARQ-ACK and CSI part 1 payloads of 1 to 11 bits (TS 38.212 Section
//! 5.3.3): repetition for one bit, simplex code for two bits and the (32, O)
//! Reed-Muller code for 3 to 11 bits, followed by repetition rate matching
//! (Section 5.4.3). Detection is maximum likelihood over every message.

use super::pusch_decoder::PuschDecoderBuffer;
use super::ulsch_demultiplex::{PLACEHOLDER_PREVIOUS, PLACEHOLDER_REPETITION};
use common::types::{LogLikelihoodRatio, ModulationScheme};
use tracing::debug;

/// Largest payload of the short block code
pub const MAX_UCI_SHORT_BLOCK_BITS: usize = 11;

/// Reed-Muller codeword length
const RM_CODEWORD_LENGTH: usize = 32;

/// Basis sequences M_{i,n} of TS 38.212 Table 5.3.3.3-1
const RM_BASIS: [[u8; MAX_UCI_SHORT_BLOCK_BITS]; RM_CODEWORD_LENGTH] = [
    [1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 1],
    [1, 1, 1, 0, 0, 0, 0, 0, 0, 1, 1],
    [1, 0, 0, 1, 0, 0, 1, 0, 1, 1, 1],
    [1, 0, 1, 1, 0, 0, 0, 0, 1, 0, 1],
    [1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1],
    [1, 1, 0, 0, 1, 0, 1, 1, 1, 0, 1],
    [1, 0, 1, 0, 1, 0, 1, 0, 1, 1, 1],
    [1, 0, 0, 1, 1, 0, 0, 1, 1, 0, 1],
    [1, 1, 0, 1, 1, 0, 0, 1, 0, 1, 1],
    [1, 0, 1, 1, 1, 0, 1, 0, 0, 1, 1],
    [1, 0, 1, 0, 0, 1, 1, 1, 0, 1, 1],
    [1, 1, 1, 0, 0, 1, 1, 0, 1, 0, 1],
    [1, 0, 0, 1, 0, 1, 0, 1, 1, 1, 1],
    [1, 1, 0, 1, 0, 1, 0, 1, 0, 1, 1],
    [1, 0, 0, 0, 1, 1, 0, 1, 0, 0, 1],
    [1, 1, 0, 0, 1, 1, 1, 1, 0, 1, 1],
    [1, 1, 1, 0, 1, 1, 1, 0, 0, 1, 0],
    [1, 0, 0, 1, 1, 1, 0, 0, 1, 0, 0],
    [1, 1, 0, 1, 1, 1, 1, 1, 0, 0, 0],
    [1, 0, 0, 0, 0, 1, 1, 0, 0, 0, 0],
    [1, 0, 1, 0, 0, 0, 1, 0, 0, 0, 1],
    [1, 1, 0, 1, 0, 0, 0, 0, 0, 1, 1],
    [1, 0, 0, 0, 1, 0, 0, 1, 1, 0, 1],
    [1, 1, 1, 0, 1, 0, 0, 0, 1, 1, 1],
    [1, 1, 1, 1, 1, 0, 1, 1, 1, 1, 0],
    [1, 1, 0, 0, 0, 1, 1, 1, 0, 0, 1],
    [1, 0, 1, 1, 0, 1, 0, 0, 1, 1, 0],
    [1, 1, 1, 1, 0, 1, 0, 1, 1, 1, 0],
    [1, 0, 1, 0, 1, 1, 1, 0, 1, 0, 0],
    [1, 0, 1, 1, 1, 1, 1, 1, 1, 0, 0],
    [1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1],
    [1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
];

/// Normalized correlation above which a Reed-Muller detection is trusted
const RM_DETECTION_THRESHOLD: f32 = 0.6;

/// Outcome of a UCI field decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UciStatus {
    /// Not decoded
    #[default]
    Unknown,
    Valid,
    Invalid,
}

/// Decoded UCI field
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UciFieldResult {
    /// Payload bits, one bit per byte
    pub payload: Vec<u8>,
    pub status: UciStatus,
}

/// Short block encoder for test vector generation
#[derive(Debug, Default, Clone)]
pub struct ShortBlockEncoder;

impl ShortBlockEncoder {
    pub fn new() -> Self {
        Self
    }

    /// Encode a payload into its short block codeword
    ///
    /// One and two bit payloads include scrambling placeholders.
    pub fn encode(&self, message: &[u8], modulation: ModulationScheme) -> Vec<u8> {
        let qm = modulation.bits_per_symbol();
        match message.len() {
            1 => {
                let mut codeword = vec![PLACEHOLDER_REPETITION; qm];
                codeword[0] = message[0];
                codeword[1] = PLACEHOLDER_PREVIOUS;
                codeword
            }
            2 => {
                let code = [message[0], message[1], message[0] ^ message[1]];
                let mut codeword = vec![PLACEHOLDER_REPETITION; 3 * qm];
                for (n, bit) in code.iter().cycle().take(6).enumerate() {
                    codeword[(n / 2) * qm + n % 2] = *bit;
                }
                codeword
            }
            3..=MAX_UCI_SHORT_BLOCK_BITS => (0..RM_CODEWORD_LENGTH)
                .map(|i| {
                    message
                        .iter()
                        .zip(RM_BASIS[i].iter())
                        .fold(0u8, |acc, (&bit, &basis)| acc ^ (bit & basis))
                })
                .collect(),
            n => panic!("Invalid UCI short block payload of {} bits", n),
        }
    }

    /// Repetition rate matching to `e` bits
    pub fn rate_match(&self, codeword: &[u8], e: usize) -> Vec<u8> {
        codeword.iter().copied().cycle().take(e).collect()
    }
}

/// UCI decoder
pub trait UciDecoder: Send {
    /// Decode `message.len()` payload bits from the rate matched soft bits
    fn decode(&mut self, message: &mut [u8], llrs: &[LogLikelihoodRatio], modulation: ModulationScheme) -> UciStatus;
}

/// Maximum likelihood short block decoder
#[derive(Debug, Default)]
pub struct ShortBlockDecoder {
    combined: Vec<f32>,
}

impl ShortBlockDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold the soft bits of every repetition onto the codeword positions
    ///
    /// `position` maps a rate matched index to its code bit, or `None` for
    /// placeholders.
    fn combine(&mut self, llrs: &[LogLikelihoodRatio], length: usize, position: impl Fn(usize) -> Option<usize>) {
        self.combined.clear();
        self.combined.resize(length, 0.0);
        for (k, llr) in llrs.iter().enumerate() {
            if let Some(n) = position(k) {
                self.combined[n] += llr.value() as f32;
            }
        }
    }

    /// Pick the candidate with the largest correlation
    fn detect(&self, nof_bits: usize, codeword_bit: impl Fn(usize, usize) -> u8) -> (usize, f32) {
        let energy: f32 = self.combined.iter().map(|v| v.abs()).sum();
        let mut best = (0, f32::NEG_INFINITY);
        for candidate in 0..(1usize << nof_bits) {
            let correlation: f32 = self
                .combined
                .iter()
                .enumerate()
                .map(|(n, &v)| if codeword_bit(candidate, n) == 0 { v } else { -v })
                .sum();
            if correlation > best.1 {
                best = (candidate, correlation);
            }
        }
        let normalized = if energy > 0.0 { best.1 / energy } else { 0.0 };
        (best.0, normalized)
    }
}

/// Message bit `i` of candidate `candidate`, first bit most significant
fn candidate_bit(candidate: usize, nof_bits: usize, i: usize) -> u8 {
    ((candidate >> (nof_bits - 1 - i)) & 1) as u8
}

impl UciDecoder for ShortBlockDecoder {
    fn decode(&mut self, message: &mut [u8], llrs: &[LogLikelihoodRatio], modulation: ModulationScheme) -> UciStatus {
        let nof_bits = message.len();
        let qm = modulation.bits_per_symbol();
        assert!(
            (1..=MAX_UCI_SHORT_BLOCK_BITS).contains(&nof_bits),
            "Invalid UCI short block payload of {} bits",
            nof_bits
        );

        let (candidate, normalized) = match nof_bits {
            1 => {
                self.combine(llrs, 1, |k| (k % qm == 0).then_some(0));
                self.detect(1, |candidate, _| candidate as u8)
            }
            2 => {
                self.combine(llrs, 3, |k| (k % qm < 2).then(|| (2 * (k / qm) + k % qm) % 3));
                self.detect(2, |candidate, n| {
                    let c0 = candidate_bit(candidate, 2, 0);
                    let c1 = candidate_bit(candidate, 2, 1);
                    [c0, c1, c0 ^ c1][n]
                })
            }
            _ => {
                self.combine(llrs, RM_CODEWORD_LENGTH, |k| Some(k % RM_CODEWORD_LENGTH));
                self.detect(nof_bits, |candidate, n| {
                    (0..nof_bits).fold(0u8, |acc, i| acc ^ (candidate_bit(candidate, nof_bits, i) & RM_BASIS[n][i]))
                })
            }
        };

        for (i, bit) in message.iter_mut().enumerate() {
            *bit = candidate_bit(candidate, nof_bits, i);
        }

        // Repetition and simplex codes are accepted whenever there is energy.
        let threshold = if nof_bits <= 2 { 0.0 } else { RM_DETECTION_THRESHOLD };
        let status = if normalized > threshold { UciStatus::Valid } else { UciStatus::Invalid };
        debug!(
            "UCI decode: {} bits from {} soft bits, correlation {:.2}, {:?}",
            nof_bits,
            llrs.len(),
            normalized,
            status
        );
        status
    }
}

/// Receives the decoded UCI field
pub trait PuschUciNotifier {
    fn on_uci_field(&mut self, field: &UciFieldResult);
}

/// Collects the soft bits of one UCI field and decodes them at the end
pub struct PuschUciDecoderWrapper<'a> {
    decoder: &'a mut dyn UciDecoder,
    softbits: &'a mut Vec<LogLikelihoodRatio>,
    nof_bits: usize,
    modulation: ModulationScheme,
    notifier: &'a mut dyn PuschUciNotifier,
}

impl<'a> PuschUciDecoderWrapper<'a> {
    pub fn new(
        decoder: &'a mut dyn UciDecoder,
        softbits: &'a mut Vec<LogLikelihoodRatio>,
        nof_bits: usize,
        modulation: ModulationScheme,
        notifier: &'a mut dyn PuschUciNotifier,
    ) -> Self {
        softbits.clear();
        Self {
            decoder,
            softbits,
            nof_bits,
            modulation,
            notifier,
        }
    }
}

impl PuschDecoderBuffer for PuschUciDecoderWrapper<'_> {
    fn on_new_softbits(&mut self, softbits: &[LogLikelihoodRatio]) {
        self.softbits.extend_from_slice(softbits);
    }

    fn on_end_softbits(&mut self) {
        let mut payload = vec![0u8; self.nof_bits];
        let status = if self.softbits.is_empty() {
            UciStatus::Invalid
        } else {
            self.decoder.decode(&mut payload, self.softbits.as_slice(), self.modulation)
        };
        self.notifier.on_uci_field(&UciFieldResult { payload, status });
    }
}
