//! UL-SCH transmit chain used to generate receiver test vectors
//!
//! Transport block CRC, segmentation, LDPC encoding and rate matching,
//! producing the G coded bits of one codeword.

use super::ldpc::{LdpcEncoder, LdpcEncoderImpl};
use super::ldpc_rate_matching::LdpcRateMatcher;
use super::ldpc_segmenter::{DescribedTxCodeblock, LdpcSegmenterTx, SegmenterConfig};
use tracing::debug;

pub struct UlschEncoder {
    segmenter: LdpcSegmenterTx,
    encoder: Box<dyn LdpcEncoder>,
    matcher: LdpcRateMatcher,
}

impl Default for UlschEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl UlschEncoder {
    pub fn new() -> Self {
        Self {
            segmenter: LdpcSegmenterTx::new(),
            encoder: Box::new(LdpcEncoderImpl::new()),
            matcher: LdpcRateMatcher::new(),
        }
    }

    /// Encode a transport block into `config.nof_ch_bits` bits
    pub fn encode(&mut self, transport_block: &[u8], config: &SegmenterConfig) -> Vec<u8> {
        let codeblocks = self.segmenter.segment(transport_block, config);
        self.encode_codeblocks(&codeblocks, config)
    }

    /// Encode transport block bits whose CRC is supplied by the caller
    pub fn encode_with_crc_bits(&mut self, tb_and_crc: &[u8], tbs: usize, config: &SegmenterConfig) -> Vec<u8> {
        let codeblocks = self.segmenter.segment_bits(tb_and_crc, tbs, config);
        self.encode_codeblocks(&codeblocks, config)
    }

    fn encode_codeblocks(&mut self, codeblocks: &[DescribedTxCodeblock], config: &SegmenterConfig) -> Vec<u8> {
        let mut codeword = vec![0u8; config.nof_ch_bits];
        let mut encoded = Vec::new();

        for cb in codeblocks {
            let meta = &cb.metadata;
            encoded.clear();
            encoded.resize(meta.full_length, 0);
            self.encoder
                .encode(&mut encoded, &cb.bits, meta.base_graph, meta.lifting_size);
            self.matcher.rate_match(
                &mut codeword[meta.cw_offset..meta.cw_offset + meta.rm_length],
                &encoded,
                meta,
            );
        }

        debug!(
            "UL-SCH encoded {} codeblocks into {} bits",
            codeblocks.len(),
            codeword.len()
        );
        codeword
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::ldpc::LdpcBaseGraph;
    use common::types::ModulationScheme;

    #[test]
    fn test_codeword_length() {
        let config = SegmenterConfig {
            base_graph: LdpcBaseGraph::BaseGraph2,
            rv: 0,
            modulation: ModulationScheme::Qpsk,
            nref: 0,
            nof_layers: 1,
            nof_ch_bits: 1200,
        };
        let codeword = UlschEncoder::new().encode(&[0x3C; 32], &config);
        assert_eq!(codeword.len(), 1200);
        assert!(codeword.iter().all(|&b| b <= 1));
        assert!(codeword.iter().any(|&b| b == 1));
    }
}
