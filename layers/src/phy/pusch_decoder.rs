//! PUSCH transport block decoder
//!
//! Collects the UL-SCH soft bits of a codeword, segments them into
//! codeblocks, rate dematches each one into the soft-combining buffer, runs
//! the LDPC decoder on codeblocks that have not passed their CRC yet and
//! reassembles the transport block.

use super::ldpc::{LdpcBaseGraph, LdpcDecoder, LdpcDecoderConfig, MAX_BITS_CRC16};
use super::ldpc_rate_matching::LdpcRateDematcher;
use super::ldpc_segmenter::{CodeblockMetadata, DescribedRxCodeblock, LdpcSegmenterRx, SegmenterConfig};
use super::rx_softbuffer::RxSoftbuffer;
use common::types::{LogLikelihoodRatio, ModulationScheme};
use common::utils::{pack_bits_into, CrcCalculator, CrcPolynomial};
use tracing::{debug, trace};

/// Min-sum normalization used for every codeblock
const LDPC_SCALING_FACTOR: f32 = 0.8;

/// Largest codeword the decoder accepts: 4 layers of 256-QAM over a full slot
pub const MAX_CODEWORD_SIZE: usize = 275 * 12 * 14 * 8 * 4;

/// Decoder configuration for one transmission
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PuschDecoderConfig {
    pub base_graph: LdpcBaseGraph,
    pub rv: u8,
    pub modulation: ModulationScheme,
    /// Limited buffer rate matching size in bits, zero when unlimited
    pub nref: usize,
    pub nof_layers: usize,
    pub nof_ldpc_iterations: usize,
    pub use_early_stop: bool,
    /// False for retransmissions that combine with the stored soft bits
    pub new_data: bool,
}

/// Running statistics of LDPC iteration counts
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct IterationStatistics {
    count: usize,
    sum: usize,
    min: Option<usize>,
    max: Option<usize>,
}

impl IterationStatistics {
    pub fn update(&mut self, iterations: usize) {
        self.count += 1;
        self.sum += iterations;
        self.min = Some(self.min.map_or(iterations, |min| min.min(iterations)));
        self.max = Some(self.max.map_or(iterations, |max| max.max(iterations)));
    }

    /// Number of decoded codeblocks
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn min(&self) -> Option<usize> {
        self.min
    }

    pub fn max(&self) -> Option<usize> {
        self.max
    }

    pub fn mean(&self) -> Option<f32> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum as f32 / self.count as f32)
        }
    }
}

/// Outcome of one transport block decode
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PuschDecoderResult {
    pub nof_codeblocks_total: usize,
    /// Iterations of the codeblocks decoded in this call
    pub ldpc_decoder_stats: IterationStatistics,
    pub tb_crc_ok: bool,
}

/// Receives the decode result once all soft bits were processed
pub trait PuschDecoderNotifier {
    fn on_sch_data(&mut self, result: &PuschDecoderResult);
}

/// Soft-bit sink of one transmission
///
/// Any number of `on_new_softbits` calls are followed by exactly one
/// `on_end_softbits`.
pub trait PuschDecoderBuffer {
    fn on_new_softbits(&mut self, softbits: &[LogLikelihoodRatio]);

    fn on_end_softbits(&mut self);
}

/// Sink that discards every soft bit
#[derive(Debug, Default, Clone, Copy)]
pub struct PuschDecoderBufferDummy;

impl PuschDecoderBuffer for PuschDecoderBufferDummy {
    fn on_new_softbits(&mut self, _softbits: &[LogLikelihoodRatio]) {}

    fn on_end_softbits(&mut self) {}
}

/// UL-SCH transport block decoder
pub trait PuschDecoder: Send {
    /// Start a transmission
    ///
    /// The transport block length in bytes sets the TBS. The returned buffer
    /// borrows every argument until it is dropped.
    fn new_data<'a>(
        &'a mut self,
        transport_block: &'a mut [u8],
        softbuffer: &'a mut RxSoftbuffer,
        notifier: &'a mut dyn PuschDecoderNotifier,
        config: PuschDecoderConfig,
    ) -> Box<dyn PuschDecoderBuffer + 'a>;
}

/// CRC calculators of the UL-SCH
#[derive(Debug, Clone)]
pub struct SchCrcSet {
    crc16: CrcCalculator,
    crc24a: CrcCalculator,
    crc24b: CrcCalculator,
}

impl Default for SchCrcSet {
    fn default() -> Self {
        Self::new()
    }
}

impl SchCrcSet {
    pub fn new() -> Self {
        Self {
            crc16: CrcCalculator::new(CrcPolynomial::Crc16),
            crc24a: CrcCalculator::new(CrcPolynomial::Crc24A),
            crc24b: CrcCalculator::new(CrcPolynomial::Crc24B),
        }
    }

    /// Codeblock CRC for a segmentation
    pub fn select(&self, nof_codeblocks: usize, tbs: usize) -> &CrcCalculator {
        if nof_codeblocks > 1 {
            &self.crc24b
        } else if tbs > MAX_BITS_CRC16 {
            &self.crc24a
        } else {
            &self.crc16
        }
    }

    /// Transport block CRC of a segmented transport block
    pub fn transport_block(&self) -> &CrcCalculator {
        &self.crc24a
    }
}

/// Generic PUSCH decoder
pub struct PuschDecoderImpl {
    segmenter: LdpcSegmenterRx,
    dematcher: LdpcRateDematcher,
    decoder: Box<dyn LdpcDecoder>,
    crc: SchCrcSet,
    softbits: Vec<LogLikelihoodRatio>,
    codeblocks: Vec<DescribedRxCodeblock>,
    tb_bits: Vec<u8>,
}

impl PuschDecoderImpl {
    pub fn new(decoder: Box<dyn LdpcDecoder>) -> Self {
        Self {
            segmenter: LdpcSegmenterRx::new(),
            dematcher: LdpcRateDematcher::new(),
            decoder,
            crc: SchCrcSet::new(),
            softbits: Vec::new(),
            codeblocks: Vec::new(),
            tb_bits: Vec::new(),
        }
    }
}

impl PuschDecoder for PuschDecoderImpl {
    fn new_data<'a>(
        &'a mut self,
        transport_block: &'a mut [u8],
        softbuffer: &'a mut RxSoftbuffer,
        notifier: &'a mut dyn PuschDecoderNotifier,
        config: PuschDecoderConfig,
    ) -> Box<dyn PuschDecoderBuffer + 'a> {
        assert!(!transport_block.is_empty(), "Transport block must not be empty");
        self.softbits.clear();
        Box::new(PuschDecoderSession {
            decoder: self,
            transport_block,
            softbuffer,
            notifier,
            config,
            finished: false,
        })
    }
}

/// Message length and data bits of a codeblock
fn codeblock_bit_breakdown(metadata: &CodeblockMetadata) -> (usize, usize) {
    let message_length = metadata.full_length / metadata.base_graph.inverse_rate();
    let nof_data_bits = message_length - metadata.nof_crc_bits - metadata.nof_filler_bits;
    (message_length, nof_data_bits)
}

/// Decode one codeblock, returning the iterations used when its CRC passes
fn decode_codeblock(
    output: &mut [u8],
    input: &[LogLikelihoodRatio],
    decoder: &mut dyn LdpcDecoder,
    crc: &CrcCalculator,
    metadata: &CodeblockMetadata,
    config: &PuschDecoderConfig,
) -> Option<usize> {
    let decoder_config = LdpcDecoderConfig {
        base_graph: metadata.base_graph,
        lifting_size: metadata.lifting_size,
        nof_filler_bits: metadata.nof_filler_bits,
        nof_crc_bits: metadata.nof_crc_bits,
        max_iterations: config.nof_ldpc_iterations,
        scaling_factor: LDPC_SCALING_FACTOR,
    };

    if config.use_early_stop {
        return decoder.decode(output, input, Some(crc), &decoder_config);
    }

    // A codeword with undetermined message bits is rejected before the CRC.
    decoder.decode(output, input, None, &decoder_config)?;
    let nof_significant_bits = output.len() - metadata.nof_filler_bits;
    if crc.calculate_bits(&output[..nof_significant_bits]) == 0 {
        Some(config.nof_ldpc_iterations)
    } else {
        None
    }
}

struct PuschDecoderSession<'a> {
    decoder: &'a mut PuschDecoderImpl,
    transport_block: &'a mut [u8],
    softbuffer: &'a mut RxSoftbuffer,
    notifier: &'a mut dyn PuschDecoderNotifier,
    config: PuschDecoderConfig,
    finished: bool,
}

impl PuschDecoderBuffer for PuschDecoderSession<'_> {
    fn on_new_softbits(&mut self, softbits: &[LogLikelihoodRatio]) {
        assert!(!self.finished, "Soft bits received after the end of the codeword");
        let softbits_count = self.decoder.softbits.len();
        assert!(
            softbits_count + softbits.len() <= MAX_CODEWORD_SIZE,
            "Codeword of {} soft bits exceeds the maximum of {}",
            softbits_count + softbits.len(),
            MAX_CODEWORD_SIZE
        );
        self.decoder.softbits.extend_from_slice(softbits);
    }

    fn on_end_softbits(&mut self) {
        assert!(!self.finished, "Codeword already finished");
        self.finished = true;

        let config = self.config;
        let tbs = self.transport_block.len() * 8;
        let qm = config.modulation.bits_per_symbol();
        let decoder = &mut *self.decoder;
        assert_eq!(
            decoder.softbits.len() % qm,
            0,
            "Number of soft bits {} is not a multiple of the modulation order {}",
            decoder.softbits.len(),
            qm
        );

        let segmenter_config = SegmenterConfig {
            base_graph: config.base_graph,
            rv: config.rv,
            modulation: config.modulation,
            nref: config.nref,
            nof_layers: config.nof_layers,
            nof_ch_bits: decoder.softbits.len(),
        };
        decoder
            .segmenter
            .segment(&mut decoder.codeblocks, &decoder.softbits, tbs, &segmenter_config);

        let nof_codeblocks = decoder.codeblocks.len();
        assert_eq!(
            nof_codeblocks,
            self.softbuffer.nof_codeblocks(),
            "Softbuffer reserved for {} codeblocks but the transport block has {}",
            self.softbuffer.nof_codeblocks(),
            nof_codeblocks
        );

        // Multiple codeblocks append a TB CRC24A after the transport block.
        let tb_and_crc_size = if nof_codeblocks == 1 { tbs } else { tbs + 24 };

        if config.new_data {
            self.softbuffer.reset_codeblocks_crc();
        }

        decoder.tb_bits.clear();
        decoder.tb_bits.resize(tb_and_crc_size, 0);

        let crc = decoder.crc.select(nof_codeblocks, tbs);

        let mut stats = IterationStatistics::default();
        let mut tb_offset = 0;
        for (cb_index, cb) in decoder.codeblocks.iter().enumerate() {
            let metadata = &cb.metadata;
            let (message_length, nof_data_bits) = codeblock_bit_breakdown(metadata);
            let buffers = self
                .softbuffer
                .codeblock(cb_index, metadata.full_length, message_length);

            // Combining always happens so a later TB CRC failure can retry.
            decoder.dematcher.rate_dematch(
                buffers.soft_bits,
                &decoder.softbits[cb.range.clone()],
                config.new_data,
                metadata,
            );

            if !*buffers.crc_ok {
                match decode_codeblock(
                    buffers.data_bits,
                    buffers.soft_bits,
                    decoder.decoder.as_mut(),
                    crc,
                    metadata,
                    &config,
                ) {
                    Some(iterations) => {
                        *buffers.crc_ok = true;
                        stats.update(iterations);
                    }
                    None => stats.update(config.nof_ldpc_iterations),
                }
                trace!("Codeblock {} CRC {}", cb_index, if *buffers.crc_ok { "ok" } else { "KO" });
            }

            // The last codeblock may carry zero padding beyond the TB.
            let nof_new_bits = nof_data_bits.min(tb_and_crc_size - tb_offset);
            decoder.tb_bits[tb_offset..tb_offset + nof_new_bits]
                .copy_from_slice(&buffers.data_bits[..nof_new_bits]);
            tb_offset += nof_new_bits;
        }

        let all_codeblocks_ok = self.softbuffer.codeblocks_crc().iter().all(|&ok| ok);
        let tb_crc_ok = if nof_codeblocks == 1 {
            all_codeblocks_ok
        } else if all_codeblocks_ok {
            if decoder.crc.transport_block().calculate_bits(&decoder.tb_bits) == 0 {
                true
            } else {
                // Every codeblock CRC was a false positive; retry all of them.
                self.softbuffer.reset_codeblocks_crc();
                false
            }
        } else {
            false
        };

        if tb_crc_ok {
            pack_bits_into(self.transport_block, &decoder.tb_bits[..tbs]);
        }

        let result = PuschDecoderResult {
            nof_codeblocks_total: nof_codeblocks,
            ldpc_decoder_stats: stats,
            tb_crc_ok,
        };
        debug!(
            "PUSCH decode: TBS={} codeblocks={} decoded={} crc={}",
            tbs,
            nof_codeblocks,
            stats.count(),
            if tb_crc_ok { "OK" } else { "KO" }
        );
        self.notifier.on_sch_data(&result);
    }
}
