//! PUSCH modulator used to build receiver test vectors
//!
//! Scrambling with UCI placeholders, modulation, layer mapping and mapping
//! of the data and DM-RS onto the resource grid (TS 38.211 Section 6.3.1).

use super::ldpc_segmenter::SegmenterConfig;
use super::modulation::modulate;
use super::pusch_processor::PuschPdu;
use super::sequence::{
    apply_cdm_weights, calculate_pusch_dmrs_cinit, calculate_pusch_scrambling_cinit, generate_dmrs_sequence,
    get_pusch_dmrs_params, DmrsType, PseudoRandomGenerator,
};
use super::uci_decoder::ShortBlockEncoder;
use super::ulsch_demultiplex::{multiplex, PLACEHOLDER_PREVIOUS, PLACEHOLDER_REPETITION};
use super::ulsch_encoder::UlschEncoder;
use super::ulsch_info::get_ulsch_information;
use common::types::{CyclicPrefix, ModulationScheme, SlotPoint, SymbolMask, NRE};
use interfaces::resource_grid::ResourceGridWriter;
use interfaces::InterfaceError;
use num_complex::Complex32;
use num_traits::Zero;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct PuschModulatorConfig {
    pub slot: SlotPoint,
    pub cp: CyclicPrefix,
    pub rnti: u16,
    /// Data scrambling identity
    pub n_id: u16,
    pub modulation: ModulationScheme,
    /// Allocated PRBs from common resource block zero
    pub rb_mask: Vec<bool>,
    pub start_symbol_index: usize,
    pub nof_symbols: usize,
    pub dmrs_symbol_mask: SymbolMask,
    pub dmrs_type: DmrsType,
    pub dmrs_scrambling_id: u16,
    pub n_scid: bool,
    pub nof_cdm_groups_without_data: usize,
    /// DM-RS amplitude relative to the data
    pub dmrs_scaling: f32,
    /// Grid port of every layer
    pub tx_ports: Vec<usize>,
}

/// Scramble a codeword, resolving UCI placeholders (TS 38.211 6.3.1.1)
pub fn scramble(codeword: &[u8], rnti: u16, n_id: u16) -> Vec<u8> {
    let mut generator = PseudoRandomGenerator::new(calculate_pusch_scrambling_cinit(rnti, n_id));
    let mut scrambled = Vec::with_capacity(codeword.len());
    for &bit in codeword {
        let c = generator.next_bit();
        let value = match bit {
            PLACEHOLDER_REPETITION => 1,
            PLACEHOLDER_PREVIOUS => scrambled.last().copied().unwrap_or(0),
            _ => bit ^ c,
        };
        scrambled.push(value);
    }
    scrambled
}

#[derive(Debug, Default)]
pub struct PuschModulator;

impl PuschModulator {
    pub fn new() -> Self {
        Self
    }

    /// Map one codeword and its DM-RS onto `grid`
    pub fn modulate(
        &self,
        grid: &mut dyn ResourceGridWriter,
        codeword: &[u8],
        config: &PuschModulatorConfig,
    ) -> Result<(), InterfaceError> {
        assert_eq!(config.dmrs_type, DmrsType::Type1, "Only DM-RS type 1 is supported");
        let nof_layers = config.tx_ports.len();
        let qm = config.modulation.bits_per_symbol();
        assert_eq!(
            codeword.len() % (qm * nof_layers),
            0,
            "Codeword of {} bits does not fill whole resource elements",
            codeword.len()
        );

        let scrambled = scramble(codeword, config.rnti, config.n_id);
        let mut symbols = vec![Complex32::zero(); codeword.len() / qm];
        modulate(&mut symbols, &scrambled, config.modulation);

        let nof_subc = config.rb_mask.len() * NRE;
        let allocated: Vec<usize> = (0..config.rb_mask.len()).filter(|&rb| config.rb_mask[rb]).collect();
        let amplitude = config.dmrs_scaling * std::f32::consts::FRAC_1_SQRT_2;
        let re_per_rb_on_dmrs = (0..NRE).filter(|k| k % 2 >= config.nof_cdm_groups_without_data).count();
        let nof_re: usize = (config.start_symbol_index..config.start_symbol_index + config.nof_symbols)
            .map(|l| {
                let per_rb = if config.dmrs_symbol_mask.test(l) { re_per_rb_on_dmrs } else { NRE };
                per_rb * allocated.len()
            })
            .sum();
        assert_eq!(nof_re * nof_layers, symbols.len(), "Codeword does not match the allocation");

        let mut rows = vec![vec![Complex32::zero(); nof_subc]; nof_layers];
        let mut re_count = 0;

        for symbol in config.start_symbol_index..config.start_symbol_index + config.nof_symbols {
            let is_dmrs = config.dmrs_symbol_mask.test(symbol);
            rows.iter_mut().for_each(|row| row.fill(Complex32::zero()));

            for &rb in &allocated {
                for k in 0..NRE {
                    if is_dmrs && k % 2 < config.nof_cdm_groups_without_data {
                        continue;
                    }
                    for (layer, row) in rows.iter_mut().enumerate() {
                        row[rb * NRE + k] = symbols[re_count * nof_layers + layer];
                    }
                    re_count += 1;
                }
            }

            if is_dmrs {
                let c_init = calculate_pusch_dmrs_cinit(
                    config.slot.slot_index() as u32,
                    symbol,
                    config.cp.nof_symbols_per_slot(),
                    config.dmrs_scrambling_id,
                    config.n_scid,
                );
                let mut generator = PseudoRandomGenerator::new(c_init);
                let sequence = generate_dmrs_sequence(&config.rb_mask, config.dmrs_type.nof_dmrs_per_rb(), &mut generator, amplitude);
                for (layer, row) in rows.iter_mut().enumerate() {
                    let weights = get_pusch_dmrs_params(layer);
                    let weighted = apply_cdm_weights(&sequence, &weights);
                    for (i_rb, &rb) in allocated.iter().enumerate() {
                        for j in 0..6 {
                            row[rb * NRE + 2 * j + weights.delta] = weighted[i_rb * 6 + j];
                        }
                    }
                }
            }

            for (row, &port) in rows.iter().zip(&config.tx_ports) {
                grid.put(port, symbol, 0, row)?;
            }
        }

        debug!(
            "PUSCH modulated {} bits onto {} RE and {} layers",
            codeword.len(),
            re_count,
            nof_layers
        );
        Ok(())
    }
}

/// UE side chain producing the grid a PUSCH processor receives
pub struct PuschTransmitter {
    encoder: UlschEncoder,
    uci_encoder: ShortBlockEncoder,
    modulator: PuschModulator,
}

impl PuschTransmitter {
    pub fn new() -> Self {
        Self {
            encoder: UlschEncoder::new(),
            uci_encoder: ShortBlockEncoder::new(),
            modulator: PuschModulator::new(),
        }
    }

    /// Encode, multiplex and map one transmission described by `pdu`
    ///
    /// Layer `i` is written to grid port `i`. Empty UCI slices are only
    /// valid when the PDU carries no bits of that field.
    pub fn transmit(
        &mut self,
        grid: &mut dyn ResourceGridWriter,
        transport_block: &[u8],
        harq_ack: &[u8],
        csi_part1: &[u8],
        pdu: &PuschPdu,
    ) -> Result<(), InterfaceError> {
        assert_eq!(harq_ack.len(), pdu.uci.nof_harq_ack, "HARQ-ACK payload size mismatch");
        assert_eq!(csi_part1.len(), pdu.uci.nof_csi_part1, "CSI part 1 payload size mismatch");
        let tbs = if pdu.codeword.is_some() { transport_block.len() * 8 } else { 0 };
        let info = get_ulsch_information(&pdu.ulsch_configuration(tbs));

        let sch_bits = match pdu.codeword {
            Some(codeword) => self.encoder.encode(
                transport_block,
                &SegmenterConfig {
                    base_graph: codeword.ldpc_base_graph,
                    rv: codeword.rv,
                    modulation: pdu.modulation,
                    nref: pdu.tbs_lbrm_bytes * 8,
                    nof_layers: pdu.nof_tx_layers,
                    nof_ch_bits: info.nof_ul_sch_bits,
                },
            ),
            None => Vec::new(),
        };
        let harq_ack_bits = self.encode_uci(harq_ack, info.nof_harq_ack_bits, pdu);
        let csi_part1_bits = self.encode_uci(csi_part1, info.nof_csi_part1_bits, pdu);
        let codeword = multiplex(&sch_bits, &harq_ack_bits, &csi_part1_bits, &pdu.demultiplex_config(&info));

        self.modulator.modulate(
            grid,
            &codeword,
            &PuschModulatorConfig {
                slot: pdu.slot,
                cp: pdu.cp,
                rnti: pdu.rnti,
                n_id: pdu.n_id,
                modulation: pdu.modulation,
                rb_mask: pdu.rb_mask(),
                start_symbol_index: pdu.start_symbol_index,
                nof_symbols: pdu.nof_symbols,
                dmrs_symbol_mask: pdu.dmrs_symbol_mask,
                dmrs_type: pdu.dmrs_type,
                dmrs_scrambling_id: pdu.scrambling_id,
                n_scid: pdu.n_scid,
                nof_cdm_groups_without_data: pdu.nof_cdm_groups_without_data,
                dmrs_scaling: pdu.dmrs_scaling(),
                tx_ports: (0..pdu.nof_tx_layers).collect(),
            },
        )
    }

    fn encode_uci(&self, payload: &[u8], nof_encoded_bits: usize, pdu: &PuschPdu) -> Vec<u8> {
        if payload.is_empty() {
            return Vec::new();
        }
        let codeword = self.uci_encoder.encode(payload, pdu.modulation);
        self.uci_encoder.rate_match(&codeword, nof_encoded_bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::SubcarrierSpacing;
    use interfaces::resource_grid::{ResourceGrid, ResourceGridReader};

    #[test]
    fn test_placeholder_scrambling() {
        let codeword = [1, PLACEHOLDER_PREVIOUS, PLACEHOLDER_REPETITION, PLACEHOLDER_REPETITION, 0];
        let scrambled = scramble(&codeword, 0x1234, 7);

        let mut sequence = [0u8; 5];
        PseudoRandomGenerator::new(calculate_pusch_scrambling_cinit(0x1234, 7)).apply_xor(&mut sequence);
        assert_eq!(scrambled[0], 1 ^ sequence[0]);
        assert_eq!(scrambled[1], scrambled[0]);
        assert_eq!(scrambled[2], 1);
        assert_eq!(scrambled[3], 1);
        assert_eq!(scrambled[4], sequence[4]);
    }

    #[test]
    fn test_grid_mapping() {
        let mut rb_mask = vec![false; 4];
        rb_mask[1] = true;
        let config = PuschModulatorConfig {
            slot: SlotPoint::new(SubcarrierSpacing::Scs15, 0, 1),
            cp: CyclicPrefix::Normal,
            rnti: 1,
            n_id: 0,
            modulation: ModulationScheme::Qpsk,
            rb_mask,
            start_symbol_index: 0,
            nof_symbols: 14,
            dmrs_symbol_mask: SymbolMask::from_symbols(14, &[2]),
            dmrs_type: DmrsType::Type1,
            dmrs_scrambling_id: 0,
            n_scid: false,
            nof_cdm_groups_without_data: 2,
            dmrs_scaling: 2f32.sqrt(),
            tx_ports: vec![0],
        };
        let codeword = vec![0u8; 13 * 12 * 2];
        let mut grid = ResourceGrid::new(1, 14, 4);
        PuschModulator::new().modulate(&mut grid, &codeword, &config).unwrap();

        // Data has unit power, DM-RS is boosted and only on even subcarriers.
        assert!((grid.get(0, 0, 12).norm() - 1.0).abs() < 1e-5);
        assert_eq!(grid.get(0, 0, 11), Complex32::zero());
        assert!((grid.get(0, 2, 12).norm() - 2f32.sqrt()).abs() < 1e-5);
        assert_eq!(grid.get(0, 2, 13), Complex32::zero());
    }

    #[test]
    #[should_panic(expected = "Codeword does not match the allocation")]
    fn test_codeword_too_short() {
        let config = PuschModulatorConfig {
            slot: SlotPoint::new(SubcarrierSpacing::Scs15, 0, 1),
            cp: CyclicPrefix::Normal,
            rnti: 1,
            n_id: 0,
            modulation: ModulationScheme::Qpsk,
            rb_mask: vec![true],
            start_symbol_index: 0,
            nof_symbols: 1,
            dmrs_symbol_mask: SymbolMask::from_symbols(14, &[2]),
            dmrs_type: DmrsType::Type1,
            dmrs_scrambling_id: 0,
            n_scid: false,
            nof_cdm_groups_without_data: 2,
            dmrs_scaling: 1.0,
            tx_ports: vec![0],
        };
        let mut grid = ResourceGrid::new(1, 14, 1);
        let _ = PuschModulator::new().modulate(&mut grid, &[0u8; 4], &config);
    }
}
