//! LDPC rate matching and dematching (TS 38.212 Section 5.4.2)

use super::ldpc::{LdpcBaseGraph, NOF_PUNCTURED_COLUMNS};
use super::ldpc_segmenter::CodeblockMetadata;
use common::types::LogLikelihoodRatio;

/// Starting position of a redundancy version in the circular buffer
pub fn starting_position(metadata: &CodeblockMetadata) -> usize {
    let (numerators, denominator): ([usize; 4], usize) = match metadata.base_graph {
        LdpcBaseGraph::BaseGraph1 => ([0, 17, 33, 56], 66),
        LdpcBaseGraph::BaseGraph2 => ([0, 13, 25, 43], 50),
    };
    let z = metadata.lifting_size;
    let rv = metadata.rv as usize;
    assert!(rv < 4, "Invalid redundancy version {}", rv);
    (numerators[rv] * metadata.ncb / (denominator * z)) * z
}

/// Filler bit positions within the punctured codeblock
fn filler_range(metadata: &CodeblockMetadata) -> std::ops::Range<usize> {
    let k = metadata.message_length();
    let offset = NOF_PUNCTURED_COLUMNS * metadata.lifting_size;
    k - metadata.nof_filler_bits - offset..k - offset
}

/// Visit the circular buffer positions selected for each rate matched bit
fn for_each_selected_bit(metadata: &CodeblockMetadata, mut f: impl FnMut(usize, usize)) {
    let fillers = filler_range(metadata);
    assert!(
        metadata.ncb > fillers.len(),
        "Circular buffer of {} bits holds only filler bits",
        metadata.ncb
    );
    let k0 = starting_position(metadata);
    let mut position = k0;
    let mut k = 0;
    while k < metadata.rm_length {
        if !fillers.contains(&position) {
            f(k, position);
            k += 1;
        }
        position += 1;
        if position == metadata.ncb {
            position = 0;
        }
    }
}

/// Bit interleaver index: output f[i + j * Qm] comes from e[i * E / Qm + j]
fn interleaved_index(k: usize, rm_length: usize, qm: usize) -> usize {
    let columns = rm_length / qm;
    (k % columns) * qm + k / columns
}

/// Transmit side rate matcher
#[derive(Debug, Default, Clone)]
pub struct LdpcRateMatcher;

impl LdpcRateMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Select and interleave `E` bits from an encoded codeblock of `N` bits
    pub fn rate_match(&self, output: &mut [u8], codeblock: &[u8], metadata: &CodeblockMetadata) {
        assert_eq!(output.len(), metadata.rm_length, "Output must hold E bits");
        assert_eq!(codeblock.len(), metadata.full_length, "Codeblock must hold N bits");
        let qm = metadata.modulation.bits_per_symbol();
        assert_eq!(metadata.rm_length % qm, 0, "E must be a multiple of Qm");

        for_each_selected_bit(metadata, |k, position| {
            output[interleaved_index(k, metadata.rm_length, qm)] = codeblock[position];
        });
    }
}

/// Receive side rate dematcher with soft combining
#[derive(Debug, Default, Clone)]
pub struct LdpcRateDematcher;

impl LdpcRateDematcher {
    pub fn new() -> Self {
        Self
    }

    /// Deinterleave and accumulate `E` soft bits into a codeblock of `N` soft bits
    ///
    /// On new data the output is cleared first. Filler positions are set to
    /// known zero bits.
    pub fn rate_dematch(
        &self,
        output: &mut [LogLikelihoodRatio],
        input: &[LogLikelihoodRatio],
        new_data: bool,
        metadata: &CodeblockMetadata,
    ) {
        assert_eq!(input.len(), metadata.rm_length, "Input must hold E soft bits");
        assert_eq!(output.len(), metadata.full_length, "Output must hold N soft bits");
        let qm = metadata.modulation.bits_per_symbol();
        assert_eq!(metadata.rm_length % qm, 0, "E must be a multiple of Qm");

        if new_data {
            output.fill(LogLikelihoodRatio::default());
        }

        for_each_selected_bit(metadata, |k, position| {
            let llr = input[interleaved_index(k, metadata.rm_length, qm)];
            output[position] = output[position] + llr;
        });

        for llr in &mut output[filler_range(metadata)] {
            *llr = LogLikelihoodRatio::infinity();
        }
    }
}
