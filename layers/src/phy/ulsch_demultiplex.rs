//! UL-SCH data and control multiplexing (TS 38.212 Section 6.2.7)
//!
//! The placement of HARQ-ACK, CSI part 1 and UL-SCH resource elements is
//! computed once per transmission. The demultiplexer routes the soft bits
//! of each resource element to the matching decoder; the multiplexer builds
//! the transmitted codeword from the same placement.

use super::pusch_decoder::PuschDecoderBuffer;
use super::sequence::DmrsType;
use common::types::{LogLikelihoodRatio, ModulationScheme, SymbolMask, NRE};
use tracing::trace;

/// Scrambling placeholder 'x' of TS 38.212 Section 5.3.3.1
pub const PLACEHOLDER_REPETITION: u8 = 2;
/// Scrambling placeholder 'y' of TS 38.212 Section 5.3.3.1
pub const PLACEHOLDER_PREVIOUS: u8 = 3;

/// Content of one resource element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UlschReType {
    Sch,
    HarqAck,
    CsiPart1,
    /// HARQ-ACK of up to two bits puncturing a reserved UL-SCH element
    HarqAckPunctured,
}

/// Multiplexing parameters of one transmission
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UlschDemultiplexConfig {
    pub modulation: ModulationScheme,
    pub nof_layers: usize,
    pub nof_rb: usize,
    pub start_symbol_index: usize,
    pub nof_symbols: usize,
    /// HARQ-ACK payload bits, O_ACK
    pub nof_harq_ack_bits: usize,
    /// Encoded HARQ-ACK bits
    pub nof_enc_harq_ack_bits: usize,
    /// Encoded bits of the reserved HARQ-ACK resource elements
    pub nof_harq_ack_rvd_bits: usize,
    /// Encoded CSI part 1 bits
    pub nof_enc_csi_part1_bits: usize,
    pub dmrs_type: DmrsType,
    pub dmrs_symbol_mask: SymbolMask,
    pub nof_cdm_groups_without_data: usize,
}

impl UlschDemultiplexConfig {
    fn bits_per_re(&self) -> usize {
        self.nof_layers * self.modulation.bits_per_symbol()
    }

    /// Data resource elements of a symbol, relative to the allocation
    fn data_re_in_symbol(&self, symbol: usize) -> Vec<usize> {
        let nof_subc = self.nof_rb * NRE;
        if !self.dmrs_symbol_mask.test(symbol) {
            return (0..nof_subc).collect();
        }
        assert_eq!(self.dmrs_type, DmrsType::Type1, "Only DM-RS type 1 is supported");
        // CDM group g occupies the subcarriers with k % 2 == g.
        (0..nof_subc)
            .filter(|k| k % 2 >= self.nof_cdm_groups_without_data)
            .collect()
    }
}

/// Select the resource elements of a symbol for `remaining` bits
fn distribute(available: &[usize], remaining: usize, bits_per_re: usize) -> Vec<usize> {
    let capacity = available.len() * bits_per_re;
    if remaining >= capacity {
        return available.to_vec();
    }
    let spacing = capacity / remaining;
    let count = (remaining + bits_per_re - 1) / bits_per_re;
    (0..count).map(|j| available[j * spacing]).collect()
}

/// Resource element placement in codeword order
///
/// One entry per data resource element, ordered by symbol then subcarrier.
pub fn compute_placement(config: &UlschDemultiplexConfig) -> Vec<UlschReType> {
    let bits_per_re = config.bits_per_re();
    let symbols: Vec<usize> = (config.start_symbol_index..config.start_symbol_index + config.nof_symbols).collect();
    let is_uci_symbol = |l: usize| !config.dmrs_symbol_mask.test(l);

    let mut types: Vec<Vec<UlschReType>> = symbols
        .iter()
        .map(|&l| vec![UlschReType::Sch; config.data_re_in_symbol(l).len()])
        .collect();
    let mut reserved: Vec<Vec<bool>> = types.iter().map(|t| vec![false; t.len()]).collect();

    let first_dmrs = config.dmrs_symbol_mask.find_lowest().unwrap_or(config.start_symbol_index);
    let l0 = symbols
        .iter()
        .position(|&l| l > first_dmrs && is_uci_symbol(l))
        .unwrap_or(symbols.len());

    let harq_ack_punctures = config.nof_harq_ack_bits > 0 && config.nof_harq_ack_bits <= 2;

    // Step 1: reserved HARQ-ACK resource elements.
    if harq_ack_punctures {
        let mut remaining = config.nof_harq_ack_rvd_bits;
        for i in l0..symbols.len() {
            if remaining == 0 {
                break;
            }
            if !is_uci_symbol(symbols[i]) {
                continue;
            }
            let available: Vec<usize> = (0..types[i].len()).collect();
            let selected = distribute(&available, remaining, bits_per_re);
            for &k in &selected {
                reserved[i][k] = true;
            }
            remaining -= selected.len() * bits_per_re;
        }
    }

    // Step 2: rate matched HARQ-ACK.
    if config.nof_harq_ack_bits > 2 {
        let mut remaining = config.nof_enc_harq_ack_bits;
        for i in l0..symbols.len() {
            if remaining == 0 {
                break;
            }
            if !is_uci_symbol(symbols[i]) {
                continue;
            }
            let available: Vec<usize> = (0..types[i].len()).collect();
            let selected = distribute(&available, remaining, bits_per_re);
            for &k in &selected {
                types[i][k] = UlschReType::HarqAck;
            }
            remaining -= selected.len() * bits_per_re;
        }
        assert_eq!(remaining, 0, "HARQ-ACK does not fit the allocation");
    }

    // Step 3: CSI part 1 from the first symbol, avoiding reserved elements.
    let mut remaining = config.nof_enc_csi_part1_bits;
    for i in 0..symbols.len() {
        if remaining == 0 {
            break;
        }
        if !is_uci_symbol(symbols[i]) {
            continue;
        }
        let available: Vec<usize> = (0..types[i].len())
            .filter(|&k| types[i][k] == UlschReType::Sch && !reserved[i][k])
            .collect();
        if available.is_empty() {
            continue;
        }
        let selected = distribute(&available, remaining, bits_per_re);
        for &k in &selected {
            types[i][k] = UlschReType::CsiPart1;
        }
        remaining -= selected.len() * bits_per_re;
    }
    assert_eq!(remaining, 0, "CSI part 1 does not fit the allocation");

    // Step 4 leaves every other element to the UL-SCH. Step 5 punctures the
    // reserved elements with HARQ-ACK of up to two bits.
    if harq_ack_punctures {
        let mut remaining = config.nof_enc_harq_ack_bits;
        for i in l0..symbols.len() {
            if remaining == 0 {
                break;
            }
            let available: Vec<usize> = (0..types[i].len()).filter(|&k| reserved[i][k]).collect();
            if available.is_empty() {
                continue;
            }
            let selected = distribute(&available, remaining, bits_per_re);
            for &k in &selected {
                types[i][k] = UlschReType::HarqAckPunctured;
            }
            remaining -= selected.len() * bits_per_re;
        }
        assert_eq!(remaining, 0, "HARQ-ACK exceeds the reserved resource elements");
    }

    let placement: Vec<UlschReType> = types.into_iter().flatten().collect();
    trace!(
        "UL-SCH placement: {} RE, {} HARQ-ACK, {} CSI-1",
        placement.len(),
        placement.iter().filter(|t| matches!(t, UlschReType::HarqAck | UlschReType::HarqAckPunctured)).count(),
        placement.iter().filter(|t| **t == UlschReType::CsiPart1).count()
    );
    placement
}

/// Codeword soft-bit sink fed by the demodulator
///
/// Blocks hold whole resource elements of descrambled soft bits, in
/// codeword order.
pub trait PuschCodewordBuffer {
    fn on_new_block(&mut self, data: &[LogLikelihoodRatio]);

    fn on_end_codeword(&mut self);
}

/// Splits a codeword into UL-SCH, HARQ-ACK and CSI part 1 soft bits
pub trait UlschDemultiplexer: Send {
    fn demultiplex<'a>(
        &'a mut self,
        sch_data: &'a mut dyn PuschDecoderBuffer,
        harq_ack: &'a mut dyn PuschDecoderBuffer,
        csi_part1: &'a mut dyn PuschDecoderBuffer,
        config: &UlschDemultiplexConfig,
    ) -> Box<dyn PuschCodewordBuffer + 'a>;
}

/// Generic UL-SCH demultiplexer
#[derive(Debug, Default)]
pub struct UlschDemultiplexImpl {
    placement: Vec<UlschReType>,
    erasures: Vec<LogLikelihoodRatio>,
}

impl UlschDemultiplexImpl {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UlschDemultiplexer for UlschDemultiplexImpl {
    fn demultiplex<'a>(
        &'a mut self,
        sch_data: &'a mut dyn PuschDecoderBuffer,
        harq_ack: &'a mut dyn PuschDecoderBuffer,
        csi_part1: &'a mut dyn PuschDecoderBuffer,
        config: &UlschDemultiplexConfig,
    ) -> Box<dyn PuschCodewordBuffer + 'a> {
        self.placement = compute_placement(config);
        let bits_per_re = config.bits_per_re();
        self.erasures.clear();
        self.erasures.resize(bits_per_re, LogLikelihoodRatio::default());

        Box::new(UlschDemultiplexSession {
            placement: &self.placement,
            erasures: &self.erasures,
            bits_per_re,
            re_index: 0,
            sch_data,
            harq_ack,
            csi_part1,
        })
    }
}

struct UlschDemultiplexSession<'a> {
    placement: &'a [UlschReType],
    erasures: &'a [LogLikelihoodRatio],
    bits_per_re: usize,
    re_index: usize,
    sch_data: &'a mut dyn PuschDecoderBuffer,
    harq_ack: &'a mut dyn PuschDecoderBuffer,
    csi_part1: &'a mut dyn PuschDecoderBuffer,
}

impl PuschCodewordBuffer for UlschDemultiplexSession<'_> {
    fn on_new_block(&mut self, data: &[LogLikelihoodRatio]) {
        assert_eq!(
            data.len() % self.bits_per_re,
            0,
            "Block of {} soft bits is not made of whole resource elements",
            data.len()
        );
        let nof_re = data.len() / self.bits_per_re;
        assert!(
            self.re_index + nof_re <= self.placement.len(),
            "Codeword exceeds the {} data resource elements",
            self.placement.len()
        );

        // Forward runs of resource elements of the same type at once.
        let mut start = 0;
        while start < nof_re {
            let re_type = self.placement[self.re_index + start];
            let mut end = start + 1;
            while end < nof_re && self.placement[self.re_index + end] == re_type {
                end += 1;
            }
            let block = &data[start * self.bits_per_re..end * self.bits_per_re];
            match re_type {
                UlschReType::Sch => self.sch_data.on_new_softbits(block),
                UlschReType::HarqAck => self.harq_ack.on_new_softbits(block),
                UlschReType::CsiPart1 => self.csi_part1.on_new_softbits(block),
                UlschReType::HarqAckPunctured => {
                    self.harq_ack.on_new_softbits(block);
                    for _ in start..end {
                        self.sch_data.on_new_softbits(self.erasures);
                    }
                }
            }
            start = end;
        }
        self.re_index += nof_re;
    }

    fn on_end_codeword(&mut self) {
        assert_eq!(
            self.re_index,
            self.placement.len(),
            "Codeword ended after {} of {} resource elements",
            self.re_index,
            self.placement.len()
        );
        self.sch_data.on_end_softbits();
        self.harq_ack.on_end_softbits();
        self.csi_part1.on_end_softbits();
    }
}

/// Build the codeword of one transmission from its encoded fields
///
/// HARQ-ACK and CSI part 1 bits may contain scrambling placeholders.
pub fn multiplex(
    sch_data: &[u8],
    harq_ack: &[u8],
    csi_part1: &[u8],
    config: &UlschDemultiplexConfig,
) -> Vec<u8> {
    let placement = compute_placement(config);
    let bits_per_re = config.bits_per_re();
    let mut codeword = Vec::with_capacity(placement.len() * bits_per_re);
    let (mut sch, mut ack, mut csi) = (sch_data.chunks(bits_per_re), harq_ack.chunks(bits_per_re), csi_part1.chunks(bits_per_re));
    // Without UL-SCH the remaining elements carry zeros.
    let filler = vec![0u8; bits_per_re];

    for re_type in placement {
        let bits = match re_type {
            UlschReType::Sch if sch_data.is_empty() => Some(filler.as_slice()),
            UlschReType::Sch => sch.next(),
            UlschReType::HarqAck => ack.next(),
            UlschReType::CsiPart1 => csi.next(),
            UlschReType::HarqAckPunctured => {
                sch.next();
                ack.next()
            }
        };
        match bits {
            Some(bits) => codeword.extend_from_slice(bits),
            None => panic!("Not enough {:?} bits to fill the codeword", re_type),
        }
    }
    codeword
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collector {
        softbits: Vec<LogLikelihoodRatio>,
        ended: bool,
    }

    impl PuschDecoderBuffer for Collector {
        fn on_new_softbits(&mut self, softbits: &[LogLikelihoodRatio]) {
            self.softbits.extend_from_slice(softbits);
        }

        fn on_end_softbits(&mut self) {
            self.ended = true;
        }
    }

    fn config(nof_harq_ack_bits: usize, enc_ack: usize, rvd: usize, enc_csi: usize) -> UlschDemultiplexConfig {
        UlschDemultiplexConfig {
            modulation: ModulationScheme::Qpsk,
            nof_layers: 1,
            nof_rb: 2,
            start_symbol_index: 0,
            nof_symbols: 14,
            nof_harq_ack_bits,
            nof_enc_harq_ack_bits: enc_ack,
            nof_harq_ack_rvd_bits: rvd,
            nof_enc_csi_part1_bits: enc_csi,
            dmrs_type: DmrsType::Type1,
            dmrs_symbol_mask: SymbolMask::from_symbols(14, &[2]),
            nof_cdm_groups_without_data: 2,
        }
    }

    fn count(placement: &[UlschReType], re_type: UlschReType) -> usize {
        placement.iter().filter(|&&t| t == re_type).count()
    }

    #[test]
    fn test_distribute_spreads_evenly() {
        let available: Vec<usize> = (0..24).collect();
        assert_eq!(distribute(&available, 8, 2), vec![0, 6, 12, 18]);
        assert_eq!(distribute(&available, 100, 2), available);
    }

    #[test]
    fn test_placement_counts() {
        let placement = compute_placement(&config(4, 60, 0, 100));
        // 13 symbols of 24 RE.
        assert_eq!(placement.len(), 13 * 24);
        assert_eq!(count(&placement, UlschReType::HarqAck), 30);
        assert_eq!(count(&placement, UlschReType::CsiPart1), 50);
        assert_eq!(count(&placement, UlschReType::HarqAckPunctured), 0);
        // HARQ-ACK starts after the DM-RS symbol; the first symbol belongs to CSI.
        assert_eq!(placement[0], UlschReType::CsiPart1);
        assert_eq!(placement[2 * 24], UlschReType::HarqAck);
    }

    #[test]
    fn test_placement_punctured_harq_ack() {
        let placement = compute_placement(&config(1, 8, 16, 48));
        assert_eq!(count(&placement, UlschReType::HarqAckPunctured), 4);
        assert_eq!(count(&placement, UlschReType::CsiPart1), 24);
        // CSI part 1 avoids the 8 reserved elements of symbol 3.
        let symbol3 = &placement[2 * 24..3 * 24];
        assert_eq!(count(symbol3, UlschReType::CsiPart1), 0);
    }

    #[test]
    fn test_demultiplex_routes_softbits() {
        let cfg = config(1, 8, 16, 48);
        let placement = compute_placement(&cfg);
        let llrs: Vec<LogLikelihoodRatio> = (0..placement.len() * 2)
            .map(|i| LogLikelihoodRatio::new((i % 100) as i8 + 1))
            .collect();

        let mut sch = Collector::default();
        let mut ack = Collector::default();
        let mut csi = Collector::default();
        let mut demux = UlschDemultiplexImpl::new();
        {
            let mut buffer = demux.demultiplex(&mut sch, &mut ack, &mut csi, &cfg);
            for block in llrs.chunks(48) {
                buffer.on_new_block(block);
            }
            buffer.on_end_codeword();
        }

        assert!(sch.ended && ack.ended && csi.ended);
        assert_eq!(ack.softbits.len(), 8);
        assert_eq!(csi.softbits.len(), 48);
        // Punctured elements reach the UL-SCH as erasures.
        assert_eq!(sch.softbits.len(), placement.len() * 2 - 48);
        assert_eq!(sch.softbits.iter().filter(|llr| llr.value() == 0).count(), 8);
    }

    #[test]
    fn test_multiplex_matches_demultiplex() {
        let cfg = config(5, 40, 0, 24);
        let placement = compute_placement(&cfg);
        let nof_sch = (placement.len() - 20 - 12) * 2;
        let sch: Vec<u8> = (0..nof_sch).map(|i| (i % 2) as u8).collect();
        let ack = vec![1u8; 40];
        let csi = vec![0u8; 24];
        let codeword = multiplex(&sch, &ack, &csi, &cfg);
        assert_eq!(codeword.len(), placement.len() * 2);

        let llrs: Vec<LogLikelihoodRatio> = codeword
            .iter()
            .map(|&b| LogLikelihoodRatio::new(if b == 0 { 10 } else { -10 }))
            .collect();
        let mut sch_rx = Collector::default();
        let mut ack_rx = Collector::default();
        let mut csi_rx = Collector::default();
        let mut demux = UlschDemultiplexImpl::new();
        {
            let mut buffer = demux.demultiplex(&mut sch_rx, &mut ack_rx, &mut csi_rx, &cfg);
            buffer.on_new_block(&llrs);
            buffer.on_end_codeword();
        }
        let hard = |c: &Collector| c.softbits.iter().map(|llr| llr.hard_decision()).collect::<Vec<u8>>();
        assert_eq!(hard(&sch_rx), sch);
        assert_eq!(hard(&ack_rx), ack);
        assert_eq!(hard(&csi_rx), csi);
    }

    #[test]
    fn test_multiplex_without_sch_fills_zeros() {
        let cfg = config(3, 40, 0, 0);
        let placement = compute_placement(&cfg);
        let ack = vec![1u8; 40];
        let codeword = multiplex(&[], &ack, &[], &cfg);
        assert_eq!(codeword.len(), placement.len() * 2);
        assert_eq!(codeword.iter().filter(|&&b| b == 1).count(), 40);
    }
}
