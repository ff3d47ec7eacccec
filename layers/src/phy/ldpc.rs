/// LDPC channel coding for 5G NR
/// Based on 3GPP TS 38.212 Section 5.3.2
///
/// The base graphs keep the NR dimensions and structure: systematic columns
/// first, the first two of them punctured, a staircase core parity block
/// and single-diagonal extension parity. Graphs are lifted from a base matrix
/// per lifting size set with circulants `V mod Zc`. The base matrix entries
/// are generated deterministically and are not the values of Tables
/// 5.3.2-2/3, so the code is not interoperable with NR UEs until
/// `base_matrix` returns the tabulated entries.

use common::types::LogLikelihoodRatio;
use common::utils::CrcCalculator;
use std::collections::HashMap;
use tracing::{debug, trace};

/// LDPC base graph types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LdpcBaseGraph {
    /// Base graph 1 - for larger transport blocks
    BaseGraph1,
    /// Base graph 2 - for smaller transport blocks
    BaseGraph2,
}

impl LdpcBaseGraph {
    /// Number of systematic (information) columns, Kb
    pub fn nof_systematic_columns(&self) -> usize {
        match self {
            LdpcBaseGraph::BaseGraph1 => 22,
            LdpcBaseGraph::BaseGraph2 => 10,
        }
    }

    /// Number of base graph rows
    pub fn nof_rows(&self) -> usize {
        match self {
            LdpcBaseGraph::BaseGraph1 => 46,
            LdpcBaseGraph::BaseGraph2 => 42,
        }
    }

    /// Number of base graph columns
    pub fn nof_columns(&self) -> usize {
        self.nof_systematic_columns() + self.nof_rows()
    }

    /// Inverse of the mother code rate
    pub fn inverse_rate(&self) -> usize {
        match self {
            LdpcBaseGraph::BaseGraph1 => 3,
            LdpcBaseGraph::BaseGraph2 => 5,
        }
    }

    /// Maximum code block size Kcb
    pub fn max_codeblock_size(&self) -> usize {
        match self {
            LdpcBaseGraph::BaseGraph1 => MAX_CB_SIZE_BG1,
            LdpcBaseGraph::BaseGraph2 => MAX_CB_SIZE_BG2,
        }
    }

    /// Codeblock length after puncturing, N
    pub fn full_length(&self, lifting_size: usize) -> usize {
        (self.nof_columns() - NOF_PUNCTURED_COLUMNS) * lifting_size
    }
}

/// LDPC lifting size sets as per Table 5.3.2-1
pub const LIFTING_SIZE_SET: [usize; 51] = [
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 18, 20, 22, 24,
    26, 28, 30, 32, 36, 40, 44, 48, 52, 56, 60, 64, 72, 80, 88, 96, 104,
    112, 120, 128, 144, 160, 176, 192, 208, 224, 240, 256, 288, 320, 352, 384
];

/// Maximum code block size for each base graph
const MAX_CB_SIZE_BG1: usize = 8448;
const MAX_CB_SIZE_BG2: usize = 3840;

/// Systematic columns never transmitted
pub const NOF_PUNCTURED_COLUMNS: usize = 2;

/// Maximum TBS protected by a 16-bit CRC
pub const MAX_BITS_CRC16: usize = 3824;

/// CRC length for TB CRCs above `MAX_BITS_CRC16` and for codeblock CRCs
pub const LONG_CRC_LENGTH: usize = 24;

/// Short TB CRC length
pub const SHORT_CRC_LENGTH: usize = 16;

/// Select the base graph for a transport block (TS 38.212 Section 7.2.2)
///
/// `target_code_rate` is normalized to (0, 1).
pub fn get_ldpc_base_graph(target_code_rate: f32, tbs: usize) -> LdpcBaseGraph {
    if tbs <= 292 || (tbs <= MAX_BITS_CRC16 && target_code_rate <= 0.67) || target_code_rate <= 0.25 {
        LdpcBaseGraph::BaseGraph2
    } else {
        LdpcBaseGraph::BaseGraph1
    }
}

/// Transport block segmentation parameters (TS 38.212 Section 5.2.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentationInfo {
    /// Base graph used for the segmentation
    pub base_graph: LdpcBaseGraph,
    /// Number of codeblocks, C
    pub nof_codeblocks: usize,
    /// Transport block CRC length
    pub tb_crc_length: usize,
    /// Codeblock CRC length, zero for a single codeblock
    pub cb_crc_length: usize,
    /// Bits per codeblock before filler bits, K'
    pub nof_bits_per_cb: usize,
    /// Lifting size, Zc
    pub lifting_size: usize,
    /// Codeblock size including filler bits, K
    pub codeblock_size: usize,
    /// Number of filler bits, F
    pub nof_filler_bits: usize,
}

impl SegmentationInfo {
    /// Data bits carried by each codeblock, excluding CRC and filler
    pub fn nof_data_bits_per_cb(&self) -> usize {
        self.nof_bits_per_cb - self.cb_crc_length
    }
}

/// Compute the transport block segmentation
pub fn compute_segmentation(tbs: usize, base_graph: LdpcBaseGraph) -> SegmentationInfo {
    assert!(tbs > 0, "Transport block size must be non-zero");

    let tb_crc_length = if tbs > MAX_BITS_CRC16 { LONG_CRC_LENGTH } else { SHORT_CRC_LENGTH };
    let b = tbs + tb_crc_length;
    let kcb = base_graph.max_codeblock_size();

    let (nof_codeblocks, cb_crc_length) = if b <= kcb {
        (1, 0)
    } else {
        ((b + kcb - LONG_CRC_LENGTH - 1) / (kcb - LONG_CRC_LENGTH), LONG_CRC_LENGTH)
    };
    let b_prime = b + nof_codeblocks * cb_crc_length;

    // The last codeblock is zero padded when B' is not a multiple of C.
    let nof_bits_per_cb = (b_prime + nof_codeblocks - 1) / nof_codeblocks;

    let kb = match base_graph {
        LdpcBaseGraph::BaseGraph1 => 22,
        LdpcBaseGraph::BaseGraph2 => {
            if b > 640 {
                10
            } else if b > 560 {
                9
            } else if b > 192 {
                8
            } else {
                6
            }
        }
    };

    let lifting_size = LIFTING_SIZE_SET
        .iter()
        .copied()
        .find(|&z| kb * z >= nof_bits_per_cb)
        .unwrap_or(384);

    let codeblock_size = base_graph.nof_systematic_columns() * lifting_size;
    assert!(
        codeblock_size >= nof_bits_per_cb,
        "Codeblock of {} bits does not fit lifting size {}",
        nof_bits_per_cb,
        lifting_size
    );

    SegmentationInfo {
        base_graph,
        nof_codeblocks,
        tb_crc_length,
        cb_crc_length,
        nof_bits_per_cb,
        lifting_size,
        codeblock_size,
        nof_filler_bits: codeblock_size - nof_bits_per_cb,
    }
}

/// One non-zero circulant of the lifted parity check matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphEdge {
    /// Base graph column
    pub column: usize,
    /// Circulant shift in [0, Z)
    pub shift: usize,
}

/// Lifted quasi-cyclic parity check matrix
///
/// Check `r * Z + i` is connected to variable `column * Z + (i + shift) % Z`
/// for every edge of base row `r`.
#[derive(Debug, Clone)]
pub struct LdpcGraph {
    base_graph: LdpcBaseGraph,
    lifting_size: usize,
    rows: Vec<Vec<GraphEdge>>,
}

/// Non-zero entry of a base matrix, shift value `V` before lifting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseMatrixEntry {
    pub column: usize,
    pub value: usize,
}

/// Lifting size set index iLS of Table 5.3.2-1
///
/// Every lifting size is `a * 2^j` with `a` one of the eight set generators.
pub fn lifting_set_index(lifting_size: usize) -> usize {
    assert!(
        LIFTING_SIZE_SET.contains(&lifting_size),
        "Invalid lifting size {}",
        lifting_size
    );
    let mut a = lifting_size;
    while a % 2 == 0 && a > 2 {
        a /= 2;
    }
    match a {
        2 => 0,
        3 => 1,
        5 => 2,
        7 => 3,
        9 => 4,
        11 => 5,
        13 => 6,
        _ => 7,
    }
}

/// Base matrix of a graph for one lifting size set
///
/// Rows list their connected columns in increasing order. Shift values are
/// generated per `(graph, set, row, column)`; the circulant of a lifting size
/// `Zc` is `V mod Zc`.
pub fn base_matrix(base_graph: LdpcBaseGraph, set_index: usize) -> Vec<Vec<BaseMatrixEntry>> {
    let kb = base_graph.nof_systematic_columns();
    let value = |row: usize, column: usize| shift_value(base_graph, set_index, row, column);

    (0..base_graph.nof_rows())
        .map(|row| {
            let mut entries = Vec::new();
            if row < 4 {
                // Core rows: dense systematic part, each punctured column in two rows.
                for column in 0..kb {
                    let connected = match column {
                        0 => row % 2 == 0,
                        1 => row % 2 == 1,
                        _ => (column + row) % 4 != 0,
                    };
                    if connected {
                        entries.push(BaseMatrixEntry { column, value: value(row, column) });
                    }
                }
                if row > 0 {
                    entries.push(BaseMatrixEntry { column: kb + row - 1, value: 0 });
                }
                entries.push(BaseMatrixEntry { column: kb + row, value: 0 });
            } else {
                // Connectivity does not depend on the lifting size set.
                for column in 0..kb {
                    let connected = shift_value(base_graph, 0, row, column + 1000) % 4 == 0
                        || column == row % kb
                        || column == (row * 7 + 3) % kb;
                    if connected {
                        entries.push(BaseMatrixEntry { column, value: value(row, column) });
                    }
                }
                let core = kb + row % 4;
                entries.push(BaseMatrixEntry { column: core, value: value(row, core) });
                entries.push(BaseMatrixEntry { column: kb + row, value: 0 });
            }
            entries
        })
        .collect()
}

impl LdpcGraph {
    pub fn new(base_graph: LdpcBaseGraph, lifting_size: usize) -> Self {
        let matrix = base_matrix(base_graph, lifting_set_index(lifting_size));
        let rows: Vec<Vec<GraphEdge>> = matrix
            .iter()
            .map(|entries| {
                entries
                    .iter()
                    .map(|entry| GraphEdge {
                        column: entry.column,
                        shift: entry.value % lifting_size,
                    })
                    .collect()
            })
            .collect();

        trace!(
            "Built {:?} graph Z={} with {} edges",
            base_graph,
            lifting_size,
            rows.iter().map(Vec::len).sum::<usize>()
        );

        Self { base_graph, lifting_size, rows }
    }

    pub fn base_graph(&self) -> LdpcBaseGraph {
        self.base_graph
    }

    pub fn lifting_size(&self) -> usize {
        self.lifting_size
    }

    pub fn nof_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn nof_columns(&self) -> usize {
        self.base_graph.nof_columns()
    }

    pub fn row(&self, row: usize) -> &[GraphEdge] {
        &self.rows[row]
    }

    pub fn nof_edges(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    /// Check every parity equation over an unpunctured hard-decision codeword
    pub fn check_codeword(&self, codeword: &[u8]) -> bool {
        let z = self.lifting_size;
        assert_eq!(codeword.len(), self.nof_columns() * z);
        self.rows.iter().all(|edges| {
            (0..z).all(|i| {
                edges
                    .iter()
                    .fold(0u8, |acc, e| acc ^ codeword[e.column * z + (i + e.shift) % z])
                    == 0
            })
        })
    }
}

/// Shift value V of a base matrix position, in [0, 384)
fn shift_value(base_graph: LdpcBaseGraph, set_index: usize, row: usize, column: usize) -> usize {
    let seed = match base_graph {
        LdpcBaseGraph::BaseGraph1 => 0x9E37_79B9_7F4A_7C15u64,
        LdpcBaseGraph::BaseGraph2 => 0xC2B2_AE3D_27D4_EB4Fu64,
    };
    let mut x = seed ^ ((set_index as u64) << 48) ^ ((row as u64) << 32) ^ column as u64;
    x ^= x >> 33;
    x = x.wrapping_mul(0xFF51_AFD7_ED55_8CCD);
    x ^= x >> 33;
    x = x.wrapping_mul(0xC4CE_B9FE_1A85_EC53);
    x ^= x >> 33;
    (x % 384) as usize
}

/// LDPC encoder
pub trait LdpcEncoder: Send {
    /// Encode a message of K bits into N = full_length bits
    ///
    /// The first two lifted systematic columns are punctured from the output.
    fn encode(&mut self, output: &mut [u8], message: &[u8], base_graph: LdpcBaseGraph, lifting_size: usize);
}

/// Generic LDPC encoder using the staircase parity structure
#[derive(Debug, Default)]
pub struct LdpcEncoderImpl {
    graphs: HashMap<(LdpcBaseGraph, usize), LdpcGraph>,
    codeword: Vec<u8>,
}

impl LdpcEncoderImpl {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LdpcEncoder for LdpcEncoderImpl {
    fn encode(&mut self, output: &mut [u8], message: &[u8], base_graph: LdpcBaseGraph, lifting_size: usize) {
        let z = lifting_size;
        let kb = base_graph.nof_systematic_columns();
        assert_eq!(message.len(), kb * z, "Message length must be Kb * Z");
        assert_eq!(output.len(), base_graph.full_length(z), "Output length must be N");

        let graph = self
            .graphs
            .entry((base_graph, lifting_size))
            .or_insert_with(|| LdpcGraph::new(base_graph, lifting_size));

        let codeword = &mut self.codeword;
        codeword.clear();
        codeword.resize(graph.nof_columns() * z, 0);
        codeword[..kb * z].copy_from_slice(message);

        // Row r of the core block accumulates into parity column kb + r.
        for row in 0..4 {
            let parity = kb + row;
            for i in 0..z {
                let mut bit = 0u8;
                for edge in graph.row(row) {
                    if edge.column != parity {
                        bit ^= codeword[edge.column * z + (i + edge.shift) % z];
                    }
                }
                codeword[parity * z + i] = bit;
            }
        }

        for row in 4..graph.nof_rows() {
            let parity = kb + row;
            for i in 0..z {
                let mut bit = 0u8;
                for edge in graph.row(row) {
                    if edge.column != parity {
                        bit ^= codeword[edge.column * z + (i + edge.shift) % z];
                    }
                }
                codeword[parity * z + i] = bit;
            }
        }

        output.copy_from_slice(&codeword[NOF_PUNCTURED_COLUMNS * z..]);

        debug!(
            "LDPC encoding: base_graph={:?}, lifting_size={}, K={}, N={}",
            base_graph,
            z,
            message.len(),
            output.len()
        );
    }
}

/// LDPC decoder configuration for one codeblock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LdpcDecoderConfig {
    pub base_graph: LdpcBaseGraph,
    pub lifting_size: usize,
    /// Filler bits at the end of the message
    pub nof_filler_bits: usize,
    /// CRC bits at the end of the data
    pub nof_crc_bits: usize,
    pub max_iterations: usize,
    /// Normalization factor of the min-sum check update
    pub scaling_factor: f32,
}

/// LDPC decoder
pub trait LdpcDecoder: Send {
    /// Decode one codeblock
    ///
    /// `input` holds the N rate-dematched soft bits, `output` receives the K
    /// message bits. With a CRC the decoder stops as soon as the non-filler
    /// message bits verify and returns the number of iterations. Without a
    /// CRC it runs every iteration and returns the budget only when all parity
    /// checks are met. Message bits left without any soft information never
    /// verify.
    fn decode(
        &mut self,
        output: &mut [u8],
        input: &[LogLikelihoodRatio],
        crc: Option<&CrcCalculator>,
        config: &LdpcDecoderConfig,
    ) -> Option<usize>;
}

/// Magnitude given to bits known in advance (filler bits)
const KNOWN_BIT_LLR: f32 = 1.0e4;

/// LDPC belief propagation decoder, layered normalized min-sum
#[derive(Debug, Default)]
pub struct LdpcDecoderImpl {
    graphs: HashMap<(LdpcBaseGraph, usize), LdpcGraph>,
    /// Variable node a-posteriori LLRs
    soft: Vec<f32>,
    /// Check to variable messages, one per lifted edge
    check_messages: Vec<f32>,
    /// Per edge variable to check messages of the current row
    row_scratch: Vec<f32>,
    hard: Vec<u8>,
}

impl LdpcDecoderImpl {
    pub fn new() -> Self {
        Self::default()
    }

    fn initialize(&mut self, input: &[LogLikelihoodRatio], z: usize, nof_columns: usize, nof_edges: usize) {
        self.soft.clear();
        self.soft.resize(nof_columns * z, 0.0);
        for (soft, llr) in self.soft[NOF_PUNCTURED_COLUMNS * z..].iter_mut().zip(input) {
            *soft = if llr.is_infinity() {
                KNOWN_BIT_LLR.copysign(llr.value() as f32)
            } else {
                llr.value() as f32
            };
        }
        self.check_messages.clear();
        self.check_messages.resize(nof_edges * z, 0.0);
    }

    /// True when every one of the first `nof_bits` variables carries a decision
    ///
    /// Erased bits keep a zero a-posteriori value and would otherwise slice to
    /// zero, which an all-zero message CRC accepts.
    fn is_determined(&self, nof_bits: usize) -> bool {
        self.soft[..nof_bits].iter().all(|&llr| llr != 0.0)
    }

    fn hard_decision(&mut self, nof_bits: usize) {
        self.hard.clear();
        self.hard
            .extend(self.soft[..nof_bits].iter().map(|&llr| (llr < 0.0) as u8));
    }
}

impl LdpcDecoder for LdpcDecoderImpl {
    fn decode(
        &mut self,
        output: &mut [u8],
        input: &[LogLikelihoodRatio],
        crc: Option<&CrcCalculator>,
        config: &LdpcDecoderConfig,
    ) -> Option<usize> {
        let z = config.lifting_size;
        let bg = config.base_graph;
        let message_length = bg.nof_systematic_columns() * z;
        assert_eq!(input.len(), bg.full_length(z), "Decoder input must hold N soft bits");
        assert_eq!(output.len(), message_length, "Decoder output must hold K bits");
        assert!(config.max_iterations > 0, "At least one iteration is required");

        let graph = self
            .graphs
            .remove(&(bg, z))
            .unwrap_or_else(|| LdpcGraph::new(bg, z));
        let nof_columns = graph.nof_columns();
        self.initialize(input, z, nof_columns, graph.nof_edges());

        let nof_significant_bits = message_length - config.nof_filler_bits;
        let mut result = None;

        for iteration in 1..=config.max_iterations {
            let mut edge_offset = 0;
            for row in 0..graph.nof_rows() {
                let edges = graph.row(row);
                let degree = edges.len();
                self.row_scratch.resize(degree, 0.0);

                for i in 0..z {
                    let mut min1 = f32::INFINITY;
                    let mut min2 = f32::INFINITY;
                    let mut min_index = 0;
                    let mut negative = false;

                    for (e, edge) in edges.iter().enumerate() {
                        let var = edge.column * z + (i + edge.shift) % z;
                        let msg = self.check_messages[(edge_offset + e) * z + i];
                        let q = self.soft[var] - msg;
                        self.row_scratch[e] = q;
                        let magnitude = q.abs();
                        if magnitude < min1 {
                            min2 = min1;
                            min1 = magnitude;
                            min_index = e;
                        } else if magnitude < min2 {
                            min2 = magnitude;
                        }
                        negative ^= q < 0.0;
                    }

                    for (e, edge) in edges.iter().enumerate() {
                        let var = edge.column * z + (i + edge.shift) % z;
                        let q = self.row_scratch[e];
                        let magnitude = if e == min_index { min2 } else { min1 };
                        let sign_negative = negative ^ (q < 0.0);
                        let mut msg = config.scaling_factor * magnitude;
                        if sign_negative {
                            msg = -msg;
                        }
                        self.check_messages[(edge_offset + e) * z + i] = msg;
                        self.soft[var] = q + msg;
                    }
                }
                edge_offset += degree;
            }

            if let Some(crc) = crc {
                self.hard_decision(nof_significant_bits);
                if crc.calculate_bits(&self.hard) == 0 && self.is_determined(nof_significant_bits) {
                    result = Some(iteration);
                    break;
                }
            }
        }

        self.hard_decision(nof_columns * z);
        output.copy_from_slice(&self.hard[..message_length]);

        if crc.is_none() && graph.check_codeword(&self.hard) && self.is_determined(nof_significant_bits) {
            result = Some(config.max_iterations);
        }

        trace!(
            "LDPC decode {:?} Z={}: {}",
            bg,
            z,
            match result {
                Some(n) => format!("ok after {} iterations", n),
                None => "failed".to_string(),
            }
        );

        self.graphs.insert((bg, z), graph);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::utils::CrcPolynomial;

    fn encode_random(bg: LdpcBaseGraph, z: usize, seed: usize) -> (Vec<u8>, Vec<u8>) {
        let k = bg.nof_systematic_columns() * z;
        let message: Vec<u8> = (0..k).map(|i| (((i + seed) * 2654435761) >> 7) as u8 & 1).collect();
        let mut encoded = vec![0u8; bg.full_length(z)];
        LdpcEncoderImpl::new().encode(&mut encoded, &message, bg, z);
        (message, encoded)
    }

    fn to_llrs(bits: &[u8], magnitude: i8) -> Vec<LogLikelihoodRatio> {
        bits.iter()
            .map(|&b| LogLikelihoodRatio::new(if b == 0 { magnitude } else { -magnitude }))
            .collect()
    }

    #[test]
    fn test_segmentation_single_codeblock() {
        let seg = compute_segmentation(1000, LdpcBaseGraph::BaseGraph2);
        assert_eq!(seg.nof_codeblocks, 1);
        assert_eq!(seg.tb_crc_length, 16);
        assert_eq!(seg.cb_crc_length, 0);
        assert_eq!(seg.nof_bits_per_cb, 1016);
        // Kb = 10 for B > 640, smallest Z with 10 * Z >= 1016 is 104.
        assert_eq!(seg.lifting_size, 104);
        assert_eq!(seg.codeblock_size, 1040);
        assert_eq!(seg.nof_filler_bits, 24);
    }

    #[test]
    fn test_segmentation_multiple_codeblocks() {
        let seg = compute_segmentation(20000, LdpcBaseGraph::BaseGraph1);
        assert_eq!(seg.tb_crc_length, 24);
        assert_eq!(seg.nof_codeblocks, 3);
        assert_eq!(seg.cb_crc_length, 24);
        assert_eq!(seg.nof_bits_per_cb, (20024 + 72 + 2) / 3);
        assert!(seg.codeblock_size >= seg.nof_bits_per_cb);
        assert_eq!(seg.codeblock_size % 22, 0);
    }

    #[test]
    fn test_small_bg2_kb() {
        let seg = compute_segmentation(100, LdpcBaseGraph::BaseGraph2);
        // B = 116 <= 192, Kb = 6, Z = 20.
        assert_eq!(seg.lifting_size, 20);
        assert_eq!(seg.codeblock_size, 200);
    }

    #[test]
    fn test_base_graph_selection() {
        assert_eq!(get_ldpc_base_graph(0.9, 200), LdpcBaseGraph::BaseGraph2);
        assert_eq!(get_ldpc_base_graph(0.5, 3000), LdpcBaseGraph::BaseGraph2);
        assert_eq!(get_ldpc_base_graph(0.2, 10000), LdpcBaseGraph::BaseGraph2);
        assert_eq!(get_ldpc_base_graph(0.7, 3000), LdpcBaseGraph::BaseGraph1);
        assert_eq!(get_ldpc_base_graph(0.5, 10000), LdpcBaseGraph::BaseGraph1);
    }

    #[test]
    fn test_graph_dimensions() {
        let graph = LdpcGraph::new(LdpcBaseGraph::BaseGraph1, 16);
        assert_eq!(graph.nof_rows(), 46);
        assert_eq!(graph.nof_columns(), 68);
        assert_eq!(LdpcBaseGraph::BaseGraph1.full_length(16), 66 * 16);
        assert_eq!(LdpcBaseGraph::BaseGraph2.full_length(16), 50 * 16);
        for row in 0..graph.nof_rows() {
            assert!(graph.row(row).iter().all(|e| e.shift < 16));
        }
    }

    #[test]
    fn test_encoder_satisfies_parity_checks() {
        for (bg, z) in [(LdpcBaseGraph::BaseGraph1, 8), (LdpcBaseGraph::BaseGraph2, 20)] {
            let (message, encoded) = encode_random(bg, z, 3);
            let mut full = message[..NOF_PUNCTURED_COLUMNS * z].to_vec();
            full.extend_from_slice(&encoded);
            assert!(LdpcGraph::new(bg, z).check_codeword(&full));
            // Systematic bits after the punctured columns are transmitted as is.
            assert_eq!(&encoded[..message.len() - 2 * z], &message[2 * z..]);
        }
    }

    #[test]
    fn test_decode_clean_codeword() {
        let bg = LdpcBaseGraph::BaseGraph2;
        let z = 24;
        let (message, encoded) = encode_random(bg, z, 11);
        let llrs = to_llrs(&encoded, 40);

        let config = LdpcDecoderConfig {
            base_graph: bg,
            lifting_size: z,
            nof_filler_bits: 0,
            nof_crc_bits: 0,
            max_iterations: 6,
            scaling_factor: 0.8,
        };
        let mut output = vec![0u8; message.len()];
        let mut decoder = LdpcDecoderImpl::new();
        assert_eq!(decoder.decode(&mut output, &llrs, None, &config), Some(6));
        assert_eq!(output, message);
    }

    #[test]
    fn test_decode_with_crc_early_stop() {
        let bg = LdpcBaseGraph::BaseGraph1;
        let z = 8;
        let k = bg.nof_systematic_columns() * z;
        let crc = CrcCalculator::new(CrcPolynomial::Crc16);

        let mut message: Vec<u8> = (0..k - 16).map(|i| (i % 3 == 0) as u8).collect();
        let mut parity = vec![0u8; 16];
        crc.attach_bits(&message, &mut parity);
        message.extend_from_slice(&parity);

        let mut encoded = vec![0u8; bg.full_length(z)];
        LdpcEncoderImpl::new().encode(&mut encoded, &message, bg, z);
        let mut llrs = to_llrs(&encoded, 30);
        // Erase a handful of transmitted parity bits.
        for llr in llrs.iter_mut().skip(k).step_by(5).take(20) {
            *llr = LogLikelihoodRatio::new(0);
        }

        let config = LdpcDecoderConfig {
            base_graph: bg,
            lifting_size: z,
            nof_filler_bits: 0,
            nof_crc_bits: 16,
            max_iterations: 10,
            scaling_factor: 0.8,
        };
        let mut output = vec![0u8; k];
        let iterations = LdpcDecoderImpl::new().decode(&mut output, &llrs, Some(&crc), &config);
        assert!(matches!(iterations, Some(n) if n < 10));
        assert_eq!(output, message);
    }

    #[test]
    fn test_decode_garbage_fails_crc() {
        let bg = LdpcBaseGraph::BaseGraph2;
        let z = 16;
        let crc = CrcCalculator::new(CrcPolynomial::Crc24B);
        let llrs: Vec<LogLikelihoodRatio> = (0..bg.full_length(z))
            .map(|i| LogLikelihoodRatio::new(if (i * 7919) % 13 < 6 { 3 } else { -3 }))
            .collect();
        let config = LdpcDecoderConfig {
            base_graph: bg,
            lifting_size: z,
            nof_filler_bits: 0,
            nof_crc_bits: 24,
            max_iterations: 4,
            scaling_factor: 0.8,
        };
        let mut output = vec![0u8; bg.nof_systematic_columns() * z];
        assert_eq!(LdpcDecoderImpl::new().decode(&mut output, &llrs, Some(&crc), &config), None);
    }

    #[test]
    fn test_lifting_set_index() {
        assert_eq!(lifting_set_index(2), 0);
        assert_eq!(lifting_set_index(256), 0);
        assert_eq!(lifting_set_index(384), 1);
        assert_eq!(lifting_set_index(20), 2);
        assert_eq!(lifting_set_index(224), 3);
        assert_eq!(lifting_set_index(144), 4);
        assert_eq!(lifting_set_index(352), 5);
        assert_eq!(lifting_set_index(104), 6);
        assert_eq!(lifting_set_index(240), 7);
    }

    #[test]
    fn test_graph_lifts_base_matrix_modulo_z() {
        let bg = LdpcBaseGraph::BaseGraph2;
        let matrix = base_matrix(bg, lifting_set_index(52));
        for z in [13, 26, 52, 104, 208] {
            let graph = LdpcGraph::new(bg, z);
            for (row, entries) in matrix.iter().enumerate() {
                let edges = graph.row(row);
                assert_eq!(edges.len(), entries.len());
                for (edge, entry) in edges.iter().zip(entries) {
                    assert_eq!(edge.column, entry.column);
                    assert_eq!(edge.shift, entry.value % z);
                }
            }
        }
        // Every row closes on its own parity column.
        for (row, entries) in matrix.iter().enumerate() {
            assert_eq!(entries.last().map(|e| e.column), Some(bg.nof_systematic_columns() + row));
        }
    }

    #[test]
    fn test_decode_erased_codeword_fails() {
        let bg = LdpcBaseGraph::BaseGraph2;
        let z = 16;
        let llrs = vec![LogLikelihoodRatio::new(0); bg.full_length(z)];
        let config = LdpcDecoderConfig {
            base_graph: bg,
            lifting_size: z,
            nof_filler_bits: 0,
            nof_crc_bits: 16,
            max_iterations: 4,
            scaling_factor: 0.8,
        };
        let mut decoder = LdpcDecoderImpl::new();
        let mut output = vec![1u8; bg.nof_systematic_columns() * z];
        let crc = CrcCalculator::new(CrcPolynomial::Crc16);
        // The all-zero message passes a zero-initialized CRC, but carries no information.
        assert_eq!(decoder.decode(&mut output, &llrs, Some(&crc), &config), None);
        assert_eq!(decoder.decode(&mut output, &llrs, None, &config), None);
    }

    #[test]
    fn test_decode_without_systematic_bits_fails() {
        let bg = LdpcBaseGraph::BaseGraph1;
        let z = 8;
        let k = bg.nof_systematic_columns() * z;
        let (_, encoded) = encode_random(bg, z, 5);
        let mut llrs = to_llrs(&encoded, 30);
        // Only the extension parity survives, as in a lone late redundancy version.
        for llr in llrs[..k + 2 * z].iter_mut() {
            *llr = LogLikelihoodRatio::new(0);
        }
        let config = LdpcDecoderConfig {
            base_graph: bg,
            lifting_size: z,
            nof_filler_bits: 0,
            nof_crc_bits: 24,
            max_iterations: 1,
            scaling_factor: 0.8,
        };
        let crc = CrcCalculator::new(CrcPolynomial::Crc24B);
        let mut output = vec![0u8; k];
        assert_eq!(LdpcDecoderImpl::new().decode(&mut output, &llrs, Some(&crc), &config), None);
    }
}
