//! LDPC transport block segmentation
//!
//! Splits a transport block into codeblocks on the transmit side and a
//! soft-bit codeword into per-codeblock spans on the receive side, following
//! TS 38.212 Sections 5.2.2 and 5.4.2.1.

use super::ldpc::{compute_segmentation, LdpcBaseGraph, SegmentationInfo};
use common::types::{LogLikelihoodRatio, ModulationScheme};
use common::utils::{unpack_bits, CrcCalculator, CrcPolynomial};
use std::ops::Range;
use tracing::debug;

/// Per transport block segmentation parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmenterConfig {
    pub base_graph: LdpcBaseGraph,
    /// Redundancy version, 0 to 3
    pub rv: u8,
    pub modulation: ModulationScheme,
    /// Limited buffer rate matching size in bits, zero when unlimited
    pub nref: usize,
    pub nof_layers: usize,
    /// Total number of codeword bits available to the transport block, G
    pub nof_ch_bits: usize,
}

/// Everything rate matching and decoding need to know about one codeblock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CodeblockMetadata {
    pub base_graph: LdpcBaseGraph,
    pub lifting_size: usize,
    pub rv: u8,
    pub modulation: ModulationScheme,
    /// Circular buffer length Ncb
    pub ncb: usize,
    /// Codeblock length after puncturing, N
    pub full_length: usize,
    pub nof_filler_bits: usize,
    pub nof_crc_bits: usize,
    /// Rate matched length E
    pub rm_length: usize,
    /// Offset of the codeblock in the codeword
    pub cw_offset: usize,
}

impl CodeblockMetadata {
    /// Message length K, filler bits included
    pub fn message_length(&self) -> usize {
        self.base_graph.nof_systematic_columns() * self.lifting_size
    }
}

/// Receive side codeblock: soft-bit span of the codeword and its metadata
#[derive(Debug, Clone, PartialEq)]
pub struct DescribedRxCodeblock {
    pub range: Range<usize>,
    pub metadata: CodeblockMetadata,
}

/// Transmit side codeblock: K message bits with CRC and filler bits
#[derive(Debug, Clone, PartialEq)]
pub struct DescribedTxCodeblock {
    pub bits: Vec<u8>,
    pub metadata: CodeblockMetadata,
}

/// Rate matched length of codeblock `cb` (TS 38.212 Section 5.4.2.1)
fn rate_matched_length(cb: usize, nof_codeblocks: usize, config: &SegmenterConfig) -> usize {
    let bits_per_group = config.nof_layers * config.modulation.bits_per_symbol();
    assert_eq!(
        config.nof_ch_bits % bits_per_group,
        0,
        "Codeword of {} bits is not a multiple of NL * Qm = {}",
        config.nof_ch_bits,
        bits_per_group
    );
    let nof_groups = config.nof_ch_bits / bits_per_group;
    if cb < nof_codeblocks - nof_groups % nof_codeblocks {
        bits_per_group * (nof_groups / nof_codeblocks)
    } else {
        bits_per_group * ((nof_groups + nof_codeblocks - 1) / nof_codeblocks)
    }
}

fn circular_buffer_length(full_length: usize, nof_codeblocks: usize, nref: usize) -> usize {
    if nref == 0 {
        return full_length;
    }
    full_length.min(3 * nref / (2 * nof_codeblocks))
}

/// Build the metadata of every codeblock of a segmentation
fn codeblock_metadata(seg: &SegmentationInfo, config: &SegmenterConfig) -> Vec<CodeblockMetadata> {
    let full_length = seg.base_graph.full_length(seg.lifting_size);
    let ncb = circular_buffer_length(full_length, seg.nof_codeblocks, config.nref);
    let nof_crc_bits = if seg.nof_codeblocks > 1 { seg.cb_crc_length } else { seg.tb_crc_length };

    let mut cw_offset = 0;
    (0..seg.nof_codeblocks)
        .map(|cb| {
            let rm_length = rate_matched_length(cb, seg.nof_codeblocks, config);
            let metadata = CodeblockMetadata {
                base_graph: seg.base_graph,
                lifting_size: seg.lifting_size,
                rv: config.rv,
                modulation: config.modulation,
                ncb,
                full_length,
                nof_filler_bits: seg.nof_filler_bits,
                nof_crc_bits,
                rm_length,
                cw_offset,
            };
            cw_offset += rm_length;
            metadata
        })
        .collect()
}

/// Receive side segmenter
#[derive(Debug, Default, Clone)]
pub struct LdpcSegmenterRx;

impl LdpcSegmenterRx {
    pub fn new() -> Self {
        Self
    }

    /// Split a soft-bit codeword into codeblocks
    ///
    /// `codeblocks` is cleared and refilled.
    pub fn segment(
        &self,
        codeblocks: &mut Vec<DescribedRxCodeblock>,
        codeword: &[LogLikelihoodRatio],
        tbs: usize,
        config: &SegmenterConfig,
    ) {
        assert_eq!(
            codeword.len(),
            config.nof_ch_bits,
            "Codeword length {} does not match the configured {} bits",
            codeword.len(),
            config.nof_ch_bits
        );
        let seg = compute_segmentation(tbs, config.base_graph);

        codeblocks.clear();
        codeblocks.extend(codeblock_metadata(&seg, config).into_iter().map(|metadata| {
            DescribedRxCodeblock {
                range: metadata.cw_offset..metadata.cw_offset + metadata.rm_length,
                metadata,
            }
        }));

        debug!(
            "Segmented {} soft bits into {} codeblocks (TBS={}, Z={}, F={})",
            codeword.len(),
            seg.nof_codeblocks,
            tbs,
            seg.lifting_size,
            seg.nof_filler_bits
        );
    }
}

/// Transmit side segmenter
#[derive(Debug, Clone)]
pub struct LdpcSegmenterTx {
    crc16: CrcCalculator,
    crc24a: CrcCalculator,
    crc24b: CrcCalculator,
}

impl Default for LdpcSegmenterTx {
    fn default() -> Self {
        Self::new()
    }
}

impl LdpcSegmenterTx {
    pub fn new() -> Self {
        Self {
            crc16: CrcCalculator::new(CrcPolynomial::Crc16),
            crc24a: CrcCalculator::new(CrcPolynomial::Crc24A),
            crc24b: CrcCalculator::new(CrcPolynomial::Crc24B),
        }
    }

    /// Attach the transport block CRC and segment
    pub fn segment(&self, transport_block: &[u8], config: &SegmenterConfig) -> Vec<DescribedTxCodeblock> {
        let tbs = transport_block.len() * 8;
        let seg = compute_segmentation(tbs, config.base_graph);
        let crc = if seg.tb_crc_length == 24 { &self.crc24a } else { &self.crc16 };

        let mut bits = unpack_bits(transport_block);
        let mut parity = vec![0u8; seg.tb_crc_length];
        crc.attach_bits(&bits, &mut parity);
        bits.extend_from_slice(&parity);

        self.segment_bits(&bits, tbs, config)
    }

    /// Segment transport block bits that already carry their CRC
    ///
    /// The TB CRC is taken as given, which allows building blocks whose
    /// aggregate check fails while every codeblock check passes.
    pub fn segment_bits(&self, tb_and_crc: &[u8], tbs: usize, config: &SegmenterConfig) -> Vec<DescribedTxCodeblock> {
        let seg = compute_segmentation(tbs, config.base_graph);
        assert_eq!(
            tb_and_crc.len(),
            tbs + seg.tb_crc_length,
            "Transport block bits must include the {} bit CRC",
            seg.tb_crc_length
        );
        let nof_data_bits = seg.nof_data_bits_per_cb();

        codeblock_metadata(&seg, config)
            .into_iter()
            .enumerate()
            .map(|(cb, metadata)| {
                let mut bits = vec![0u8; seg.codeblock_size];
                let start = (cb * nof_data_bits).min(tb_and_crc.len());
                let end = ((cb + 1) * nof_data_bits).min(tb_and_crc.len());
                bits[..end - start].copy_from_slice(&tb_and_crc[start..end]);
                if seg.nof_codeblocks > 1 {
                    let (data, rest) = bits.split_at_mut(nof_data_bits);
                    self.crc24b.attach_bits(data, &mut rest[..seg.cb_crc_length]);
                }
                DescribedTxCodeblock { bits, metadata }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(nof_ch_bits: usize) -> SegmenterConfig {
        SegmenterConfig {
            base_graph: LdpcBaseGraph::BaseGraph1,
            rv: 0,
            modulation: ModulationScheme::Qam16,
            nref: 0,
            nof_layers: 1,
            nof_ch_bits,
        }
    }

    #[test]
    fn test_rate_matched_lengths_cover_codeword() {
        // 3 codeblocks over 1001 groups of 4 bits: 333, 334, 334 groups.
        let cfg = config(4004);
        assert_eq!(rate_matched_length(0, 3, &cfg), 1332);
        assert_eq!(rate_matched_length(1, 3, &cfg), 1336);
        assert_eq!(rate_matched_length(2, 3, &cfg), 1336);
    }

    #[test]
    fn test_limited_buffer() {
        assert_eq!(circular_buffer_length(1000, 1, 0), 1000);
        assert_eq!(circular_buffer_length(1000, 2, 800), 600);
        assert_eq!(circular_buffer_length(1000, 1, 8000), 1000);
    }

    #[test]
    fn test_rx_segmentation_ranges() {
        let segmenter = LdpcSegmenterRx::new();
        let cfg = config(40000);
        let codeword = vec![LogLikelihoodRatio::default(); 40000];
        let mut codeblocks = Vec::new();
        segmenter.segment(&mut codeblocks, &codeword, 20000, &cfg);

        assert_eq!(codeblocks.len(), 3);
        assert_eq!(codeblocks[0].range.start, 0);
        assert_eq!(codeblocks.last().map(|cb| cb.range.end), Some(40000));
        for pair in codeblocks.windows(2) {
            assert_eq!(pair[0].range.end, pair[1].range.start);
        }
        assert!(codeblocks.iter().all(|cb| cb.metadata.nof_crc_bits == 24));
    }

    #[test]
    fn test_tx_codeblock_crc() {
        let segmenter = LdpcSegmenterTx::new();
        let tb: Vec<u8> = (0..2500).map(|i| (i * 31 % 251) as u8).collect();
        let codeblocks = segmenter.segment(&tb, &config(60000));
        let seg = compute_segmentation(20000, LdpcBaseGraph::BaseGraph1);
        let crc24b = CrcCalculator::new(CrcPolynomial::Crc24B);

        assert_eq!(codeblocks.len(), seg.nof_codeblocks);
        for cb in &codeblocks {
            assert_eq!(cb.bits.len(), seg.codeblock_size);
            assert_eq!(crc24b.calculate_bits(&cb.bits[..seg.nof_bits_per_cb]), 0);
            assert!(cb.bits[seg.nof_bits_per_cb..].iter().all(|&b| b == 0));
        }
        // First data bits are the transport block itself.
        assert_eq!(&codeblocks[0].bits[..8], &unpack_bits(&tb[..1])[..]);
    }

    #[test]
    fn test_tx_single_codeblock_carries_tb_crc() {
        let segmenter = LdpcSegmenterTx::new();
        let tb = vec![0xA5u8; 40];
        let mut cfg = config(2000);
        cfg.base_graph = LdpcBaseGraph::BaseGraph2;
        let codeblocks = segmenter.segment(&tb, &cfg);

        assert_eq!(codeblocks.len(), 1);
        assert_eq!(codeblocks[0].metadata.nof_crc_bits, 16);
        let crc16 = CrcCalculator::new(CrcPolynomial::Crc16);
        assert_eq!(crc16.calculate_bits(&codeblocks[0].bits[..320 + 16]), 0);
    }
}
