//! PUSCH processor
//!
//! Validates a PUSCH PDU and drives channel estimation, demodulation,
//! UL-SCH/UCI demultiplexing and the field decoders for one transmission.
//! Each requested field is reported once through the result notifier.

use super::channel_estimate::{
    ChannelEstimate, ChannelEstimateDimensions, ChannelStateInformation, SinrCalcMethod, MAX_RX_PORTS, MAX_TX_LAYERS,
};
use super::dmrs_pusch_estimator::{DmrsPuschEstimator, DmrsPuschEstimatorConfig, DmrsPuschEstimatorImpl};
use super::ldpc::{LdpcBaseGraph, LdpcDecoderImpl};
use super::notifier::{PuschProcessorNotifierAdaptor, PuschProcessorResultNotifier};
use super::pusch_decoder::{
    PuschDecoder, PuschDecoderBuffer, PuschDecoderBufferDummy, PuschDecoderConfig, PuschDecoderImpl,
};
use super::pusch_demodulator::{PuschDemodulator, PuschDemodulatorConfig, PuschDemodulatorImpl};
use super::rx_softbuffer::RxSoftbuffer;
use super::sequence::DmrsType;
use super::uci_decoder::{PuschUciDecoderWrapper, ShortBlockDecoder, UciDecoder, MAX_UCI_SHORT_BLOCK_BITS};
use super::ulsch_demultiplex::{UlschDemultiplexConfig, UlschDemultiplexImpl, UlschDemultiplexer};
use super::ulsch_info::{get_ulsch_information, UlschConfiguration, UlschInformation};
use crate::LayerError;
use common::types::{CyclicPrefix, LogLikelihoodRatio, ModulationScheme, RbAllocation, SlotPoint, SymbolMask, NRE};
use common::utils::{db_to_amplitude, power_to_db};
use interfaces::resource_grid::ResourceGridReader;
use tracing::{debug, warn};

/// Largest number of resource blocks of a carrier
pub const MAX_NOF_RB: usize = 275;

/// Codeword of a transmission carrying UL-SCH data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PuschCodewordDescription {
    pub rv: u8,
    pub ldpc_base_graph: LdpcBaseGraph,
    /// False when the transmission is combined with previous ones
    pub new_data: bool,
}

/// UCI multiplexed on the PUSCH
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PuschUciDescription {
    pub nof_harq_ack: usize,
    pub nof_csi_part1: usize,
    pub nof_csi_part2: usize,
    pub alpha_scaling: f32,
    pub beta_offset_harq_ack: f32,
    pub beta_offset_csi_part1: f32,
}

/// Parameters of one PUSCH transmission
#[derive(Debug, Clone, PartialEq)]
pub struct PuschPdu {
    pub slot: SlotPoint,
    pub rnti: u16,
    pub bwp_start_rb: usize,
    pub bwp_size_rb: usize,
    pub cp: CyclicPrefix,
    pub modulation: ModulationScheme,
    /// Target code rate times 1024
    pub target_code_rate: f32,
    /// UL-SCH codeword, absent for UCI only transmissions
    pub codeword: Option<PuschCodewordDescription>,
    pub uci: PuschUciDescription,
    /// Data scrambling identity
    pub n_id: u16,
    pub nof_tx_layers: usize,
    /// Resource grid ports to combine
    pub rx_ports: Vec<usize>,
    pub dmrs_symbol_mask: SymbolMask,
    pub dmrs_type: DmrsType,
    /// DM-RS scrambling identity
    pub scrambling_id: u16,
    pub n_scid: bool,
    pub nof_cdm_groups_without_data: usize,
    /// Allocation relative to the BWP
    pub freq_alloc: RbAllocation,
    pub start_symbol_index: usize,
    pub nof_symbols: usize,
    /// Limited buffer rate matching transport block size in bytes
    pub tbs_lbrm_bytes: usize,
    /// DC subcarrier from point A
    pub dc_position: Option<usize>,
}

impl PuschPdu {
    /// Allocated PRBs from common resource block zero
    pub fn rb_mask(&self) -> Vec<bool> {
        self.freq_alloc.prb_mask(self.bwp_start_rb, self.bwp_size_rb)
    }

    /// UL-SCH sizing parameters for a transport block of `tbs` bits
    pub fn ulsch_configuration(&self, tbs: usize) -> UlschConfiguration {
        UlschConfiguration {
            tbs,
            modulation: self.modulation,
            target_code_rate: self.target_code_rate,
            nof_harq_ack_bits: self.uci.nof_harq_ack,
            nof_csi_part1_bits: self.uci.nof_csi_part1,
            nof_csi_part2_bits: self.uci.nof_csi_part2,
            alpha_scaling: self.uci.alpha_scaling,
            beta_offset_harq_ack: self.uci.beta_offset_harq_ack,
            beta_offset_csi_part1: self.uci.beta_offset_csi_part1,
            nof_rb: self.freq_alloc.nof_rb(),
            start_symbol_index: self.start_symbol_index,
            nof_symbols: self.nof_symbols,
            dmrs_type: self.dmrs_type,
            dmrs_symbol_mask: self.dmrs_symbol_mask,
            nof_cdm_groups_without_data: self.nof_cdm_groups_without_data,
            nof_layers: self.nof_tx_layers,
            base_graph: self
                .codeword
                .map_or(LdpcBaseGraph::BaseGraph2, |codeword| codeword.ldpc_base_graph),
        }
    }

    /// Multiplexing parameters for the computed field sizes
    pub fn demultiplex_config(&self, info: &UlschInformation) -> UlschDemultiplexConfig {
        UlschDemultiplexConfig {
            modulation: self.modulation,
            nof_layers: self.nof_tx_layers,
            nof_rb: self.freq_alloc.nof_rb(),
            start_symbol_index: self.start_symbol_index,
            nof_symbols: self.nof_symbols,
            nof_harq_ack_bits: self.uci.nof_harq_ack,
            nof_enc_harq_ack_bits: info.nof_harq_ack_bits,
            nof_harq_ack_rvd_bits: info.nof_harq_ack_rvd_bits,
            nof_enc_csi_part1_bits: info.nof_csi_part1_bits,
            dmrs_type: self.dmrs_type,
            dmrs_symbol_mask: self.dmrs_symbol_mask,
            nof_cdm_groups_without_data: self.nof_cdm_groups_without_data,
        }
    }

    /// DM-RS amplitude relative to the data
    pub fn dmrs_scaling(&self) -> f32 {
        db_to_amplitude(sch_to_dmrs_ratio_db(self.nof_cdm_groups_without_data))
    }
}

/// UL-SCH to DM-RS EPRE ratio (TS 38.214 Table 6.2.2-1)
pub fn sch_to_dmrs_ratio_db(nof_cdm_groups_without_data: usize) -> f32 {
    match nof_cdm_groups_without_data {
        1 => 0.0,
        2 => 3.0,
        3 => 4.77,
        n => panic!("Invalid number of CDM groups without data: {}", n),
    }
}

/// Processor limits and decoder settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PuschProcessorConfiguration {
    /// Resource blocks of the resource grid
    pub max_nof_rb: usize,
    pub max_nof_layers: usize,
    pub max_nof_rx_ports: usize,
    pub nof_ldpc_iterations: usize,
    pub use_early_stop: bool,
    pub sinr_calc_method: SinrCalcMethod,
}

impl Default for PuschProcessorConfiguration {
    fn default() -> Self {
        Self {
            max_nof_rb: MAX_NOF_RB,
            max_nof_layers: MAX_TX_LAYERS,
            max_nof_rx_ports: MAX_RX_PORTS,
            nof_ldpc_iterations: 6,
            use_early_stop: true,
            sinr_calc_method: SinrCalcMethod::ChannelEstimator,
        }
    }
}

/// PDU checks against the processor limits
#[derive(Debug, Clone, Copy)]
pub struct PuschProcessorValidator {
    max_nof_rb: usize,
    max_nof_layers: usize,
    max_nof_rx_ports: usize,
}

fn ensure(condition: bool, message: impl FnOnce() -> String) -> Result<(), LayerError> {
    if condition {
        Ok(())
    } else {
        Err(LayerError::InvalidConfiguration(message()))
    }
}

impl PuschProcessorValidator {
    pub fn new(config: &PuschProcessorConfiguration) -> Self {
        Self {
            max_nof_rb: config.max_nof_rb,
            max_nof_layers: config.max_nof_layers,
            max_nof_rx_ports: config.max_nof_rx_ports,
        }
    }

    /// Check a PDU, reporting the first violated constraint
    pub fn check(&self, pdu: &PuschPdu) -> Result<(), LayerError> {
        ensure(pdu.bwp_start_rb + pdu.bwp_size_rb <= self.max_nof_rb, || {
            format!(
                "BWP [{}, {}) exceeds the {} resource blocks of the grid",
                pdu.bwp_start_rb,
                pdu.bwp_start_rb + pdu.bwp_size_rb,
                self.max_nof_rb
            )
        })?;
        ensure((1..=self.max_nof_layers).contains(&pdu.nof_tx_layers), || {
            format!("{} layers exceed the maximum of {}", pdu.nof_tx_layers, self.max_nof_layers)
        })?;
        ensure((1..=self.max_nof_rx_ports).contains(&pdu.rx_ports.len()), || {
            format!(
                "{} receive ports exceed the maximum of {}",
                pdu.rx_ports.len(),
                self.max_nof_rx_ports
            )
        })?;
        ensure(pdu.freq_alloc.is_bwp_valid(pdu.bwp_start_rb, pdu.bwp_size_rb), || {
            format!("Frequency allocation {:?} does not fit the BWP", pdu.freq_alloc)
        })?;
        ensure(
            pdu.uci.nof_harq_ack <= MAX_UCI_SHORT_BLOCK_BITS && pdu.uci.nof_csi_part1 <= MAX_UCI_SHORT_BLOCK_BITS,
            || {
                format!(
                    "UCI of {} HARQ-ACK and {} CSI part 1 bits exceeds {} bits",
                    pdu.uci.nof_harq_ack, pdu.uci.nof_csi_part1, MAX_UCI_SHORT_BLOCK_BITS
                )
            },
        )?;
        ensure(pdu.uci.nof_csi_part2 == 0, || "CSI part 2 is not supported".to_string())?;

        let nof_symbols_slot = pdu.cp.nof_symbols_per_slot();
        ensure(
            pdu.dmrs_symbol_mask.size() == nof_symbols_slot && !pdu.dmrs_symbol_mask.none(),
            || {
                format!(
                    "DM-RS symbol mask of size {} with {} symbols for {} symbols per slot",
                    pdu.dmrs_symbol_mask.size(),
                    pdu.dmrs_symbol_mask.count(),
                    nof_symbols_slot
                )
            },
        )?;
        let allocation_end = pdu.start_symbol_index + pdu.nof_symbols;
        ensure(
            pdu.dmrs_symbol_mask
                .find_lowest()
                .is_some_and(|lowest| lowest >= pdu.start_symbol_index),
            || format!("First DM-RS symbol precedes the start symbol {}", pdu.start_symbol_index),
        )?;
        ensure(
            pdu.dmrs_symbol_mask
                .find_highest()
                .is_some_and(|highest| highest < allocation_end),
            || format!("Last DM-RS symbol is beyond the allocation end {}", allocation_end),
        )?;
        ensure(allocation_end <= nof_symbols_slot, || {
            format!("Allocation end {} exceeds {} symbols", allocation_end, nof_symbols_slot)
        })?;
        ensure(
            pdu.dmrs_type == DmrsType::Type1 && pdu.nof_cdm_groups_without_data == 2,
            || {
                format!(
                    "Unsupported DM-RS {:?} with {} CDM groups without data",
                    pdu.dmrs_type, pdu.nof_cdm_groups_without_data
                )
            },
        )?;
        if let Some(dc) = pdu.dc_position {
            ensure(dc < self.max_nof_rb * NRE, || {
                format!("DC position {} is outside the {} subcarriers", dc, self.max_nof_rb * NRE)
            })?;
        }
        Ok(())
    }

    pub fn is_valid(&self, pdu: &PuschPdu) -> bool {
        self.check(pdu).is_ok()
    }
}

/// PUSCH receive processing of one transmission
pub trait PuschProcessor: Send {
    /// Process a valid PDU
    ///
    /// `transport_block` holds the decoded data on success; its length sets
    /// the transport block size.
    fn process(
        &mut self,
        transport_block: &mut [u8],
        softbuffer: &mut RxSoftbuffer,
        notifier: &mut dyn PuschProcessorResultNotifier,
        grid: &dyn ResourceGridReader,
        pdu: &PuschPdu,
    );
}

/// Components used by the processor
pub struct PuschProcessorDependencies {
    pub estimator: Box<dyn DmrsPuschEstimator>,
    pub demodulator: Box<dyn PuschDemodulator>,
    pub demultiplexer: Box<dyn UlschDemultiplexer>,
    pub decoder: Box<dyn PuschDecoder>,
    pub harq_ack_decoder: Box<dyn UciDecoder>,
    pub csi_part1_decoder: Box<dyn UciDecoder>,
}

pub struct PuschProcessorImpl {
    config: PuschProcessorConfiguration,
    validator: PuschProcessorValidator,
    estimator: Box<dyn DmrsPuschEstimator>,
    demodulator: Box<dyn PuschDemodulator>,
    demultiplexer: Box<dyn UlschDemultiplexer>,
    decoder: Box<dyn PuschDecoder>,
    harq_ack_decoder: Box<dyn UciDecoder>,
    csi_part1_decoder: Box<dyn UciDecoder>,
    ch_estimate: ChannelEstimate,
    harq_ack_softbits: Vec<LogLikelihoodRatio>,
    csi_part1_softbits: Vec<LogLikelihoodRatio>,
}

impl PuschProcessorImpl {
    pub fn new(config: PuschProcessorConfiguration, dependencies: PuschProcessorDependencies) -> Self {
        let ch_estimate = ChannelEstimate::new(ChannelEstimateDimensions {
            nof_prb: config.max_nof_rb,
            nof_symbols: CyclicPrefix::Normal.nof_symbols_per_slot(),
            nof_rx_ports: config.max_nof_rx_ports,
            nof_tx_layers: config.max_nof_layers,
        });
        Self {
            validator: PuschProcessorValidator::new(&config),
            config,
            estimator: dependencies.estimator,
            demodulator: dependencies.demodulator,
            demultiplexer: dependencies.demultiplexer,
            decoder: dependencies.decoder,
            harq_ack_decoder: dependencies.harq_ack_decoder,
            csi_part1_decoder: dependencies.csi_part1_decoder,
            ch_estimate,
            harq_ack_softbits: Vec::new(),
            csi_part1_softbits: Vec::new(),
        }
    }

    pub fn validator(&self) -> &PuschProcessorValidator {
        &self.validator
    }

    fn assert_pdu(&self, pdu: &PuschPdu) {
        if let Err(e) = self.validator.check(pdu) {
            panic!("Invalid PUSCH PDU: {}", e);
        }
    }

    /// Channel estimator SINR averaged over the layers
    fn estimator_sinr_db(&self, pdu: &PuschPdu) -> Option<f32> {
        let linear: Vec<f32> = (0..pdu.nof_tx_layers)
            .filter_map(|layer| self.ch_estimate.layer_sinr_db(layer, pdu.rx_ports.len()))
            .map(|sinr_db| 10f32.powf(sinr_db / 10.0))
            .collect();
        if linear.is_empty() {
            None
        } else {
            Some(power_to_db(linear.iter().sum::<f32>() / linear.len() as f32))
        }
    }
}

/// Build a processor with the default components
pub fn create_pusch_processor(config: PuschProcessorConfiguration) -> Result<PuschProcessorImpl, LayerError> {
    if !(1..=MAX_NOF_RB).contains(&config.max_nof_rb) {
        return Err(LayerError::InvalidConfiguration(format!(
            "Grid of {} resource blocks",
            config.max_nof_rb
        )));
    }
    if !(1..=MAX_TX_LAYERS).contains(&config.max_nof_layers) || !(1..=MAX_RX_PORTS).contains(&config.max_nof_rx_ports) {
        return Err(LayerError::InvalidConfiguration(format!(
            "{} layers and {} receive ports",
            config.max_nof_layers, config.max_nof_rx_ports
        )));
    }
    if config.nof_ldpc_iterations == 0 {
        return Err(LayerError::InvalidConfiguration(
            "At least one LDPC iteration is required".to_string(),
        ));
    }

    let dependencies = PuschProcessorDependencies {
        estimator: Box::new(DmrsPuschEstimatorImpl::new()),
        demodulator: Box::new(PuschDemodulatorImpl::new()),
        demultiplexer: Box::new(UlschDemultiplexImpl::new()),
        decoder: Box::new(PuschDecoderImpl::new(Box::new(LdpcDecoderImpl::new()))),
        harq_ack_decoder: Box::new(ShortBlockDecoder::new()),
        csi_part1_decoder: Box::new(ShortBlockDecoder::new()),
    };
    Ok(PuschProcessorImpl::new(config, dependencies))
}

impl PuschProcessor for PuschProcessorImpl {
    fn process(
        &mut self,
        transport_block: &mut [u8],
        softbuffer: &mut RxSoftbuffer,
        notifier: &mut dyn PuschProcessorResultNotifier,
        grid: &dyn ResourceGridReader,
        pdu: &PuschPdu,
    ) {
        self.assert_pdu(pdu);
        let rb_mask = pdu.rb_mask();
        let tbs = if pdu.codeword.is_some() { transport_block.len() * 8 } else { 0 };
        let info = get_ulsch_information(&pdu.ulsch_configuration(tbs));

        self.estimator.estimate(
            &mut self.ch_estimate,
            grid,
            &DmrsPuschEstimatorConfig {
                slot: pdu.slot,
                cp: pdu.cp,
                dmrs_type: pdu.dmrs_type,
                scrambling_id: pdu.scrambling_id,
                n_scid: pdu.n_scid,
                scaling: pdu.dmrs_scaling(),
                first_symbol: pdu.start_symbol_index,
                nof_symbols: pdu.nof_symbols,
                symbols_mask: pdu.dmrs_symbol_mask,
                rb_mask: rb_mask.clone(),
                nof_tx_layers: pdu.nof_tx_layers,
                rx_ports: pdu.rx_ports.clone(),
            },
        );
        if let Some(dc) = pdu.dc_position {
            self.ch_estimate.clear_subcarrier(dc);
        }

        let mut csi = ChannelStateInformation::new(self.config.sinr_calc_method);
        match self.estimator_sinr_db(pdu) {
            Some(sinr_db) => csi.set_sinr_ch_estimator_db(sinr_db),
            None => warn!("PUSCH rnti={:#06x}: no channel estimator SINR", pdu.rnti),
        }

        debug!(
            "PUSCH rnti={:#06x} slot={}: tbs={} G={} ACK={}/{} CSI1={}/{}",
            pdu.rnti,
            pdu.slot.slot_index(),
            tbs,
            info.nof_ul_sch_bits,
            pdu.uci.nof_harq_ack,
            info.nof_harq_ack_bits,
            pdu.uci.nof_csi_part1,
            info.nof_csi_part1_bits
        );

        let adaptor = PuschProcessorNotifierAdaptor::new(notifier, csi);
        let mut sch_notifier = adaptor.sch_notifier();
        let mut harq_ack_notifier = adaptor.harq_ack_notifier();
        let mut csi_part1_notifier = adaptor.csi_part1_notifier();
        let mut demodulator_notifier = adaptor.demodulator_notifier();

        let mut sch_buffer: Box<dyn PuschDecoderBuffer + '_> = match pdu.codeword {
            Some(codeword) => self.decoder.new_data(
                transport_block,
                softbuffer,
                &mut sch_notifier,
                PuschDecoderConfig {
                    base_graph: codeword.ldpc_base_graph,
                    rv: codeword.rv,
                    modulation: pdu.modulation,
                    nref: pdu.tbs_lbrm_bytes * 8,
                    nof_layers: pdu.nof_tx_layers,
                    nof_ldpc_iterations: self.config.nof_ldpc_iterations,
                    use_early_stop: self.config.use_early_stop,
                    new_data: codeword.new_data,
                },
            ),
            None => Box::new(PuschDecoderBufferDummy),
        };

        let mut harq_ack_buffer: Box<dyn PuschDecoderBuffer + '_> = if pdu.uci.nof_harq_ack > 0 {
            Box::new(PuschUciDecoderWrapper::new(
                self.harq_ack_decoder.as_mut(),
                &mut self.harq_ack_softbits,
                pdu.uci.nof_harq_ack,
                pdu.modulation,
                &mut harq_ack_notifier,
            ))
        } else {
            Box::new(PuschDecoderBufferDummy)
        };

        let mut csi_part1_buffer: Box<dyn PuschDecoderBuffer + '_> = if pdu.uci.nof_csi_part1 > 0 {
            Box::new(PuschUciDecoderWrapper::new(
                self.csi_part1_decoder.as_mut(),
                &mut self.csi_part1_softbits,
                pdu.uci.nof_csi_part1,
                pdu.modulation,
                &mut csi_part1_notifier,
            ))
        } else {
            Box::new(PuschDecoderBufferDummy)
        };

        let mut codeword_buffer = self.demultiplexer.demultiplex(
            sch_buffer.as_mut(),
            harq_ack_buffer.as_mut(),
            csi_part1_buffer.as_mut(),
            &pdu.demultiplex_config(&info),
        );

        self.demodulator.demodulate(
            codeword_buffer.as_mut(),
            &mut demodulator_notifier,
            grid,
            &self.ch_estimate,
            &PuschDemodulatorConfig {
                rnti: pdu.rnti,
                rb_mask,
                modulation: pdu.modulation,
                start_symbol_index: pdu.start_symbol_index,
                nof_symbols: pdu.nof_symbols,
                dmrs_symbol_mask: pdu.dmrs_symbol_mask,
                dmrs_type: pdu.dmrs_type,
                nof_cdm_groups_without_data: pdu.nof_cdm_groups_without_data,
                n_id: pdu.n_id,
                nof_tx_layers: pdu.nof_tx_layers,
                rx_ports: pdu.rx_ports.clone(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::ldpc::compute_segmentation;
    use crate::phy::notifier::{PuschProcessorSchResult, PuschProcessorUciResult};
    use crate::phy::pusch_modulator::PuschTransmitter;
    use crate::phy::uci_decoder::UciStatus;
    use common::types::SubcarrierSpacing;
    use interfaces::resource_grid::ResourceGrid;

    #[derive(Default)]
    struct Recorder {
        sch: Vec<PuschProcessorSchResult>,
        harq_ack: Vec<PuschProcessorUciResult>,
        csi_part1: Vec<PuschProcessorUciResult>,
    }

    impl PuschProcessorResultNotifier for Recorder {
        fn on_sch(&mut self, result: &PuschProcessorSchResult) {
            self.sch.push(*result);
        }

        fn on_harq_ack(&mut self, result: &PuschProcessorUciResult) {
            self.harq_ack.push(result.clone());
        }

        fn on_csi_part1(&mut self, result: &PuschProcessorUciResult) {
            self.csi_part1.push(result.clone());
        }
    }

    const GRID_RB: usize = 25;

    fn base_pdu() -> PuschPdu {
        PuschPdu {
            slot: SlotPoint::new(SubcarrierSpacing::Scs30, 12, 5),
            rnti: 0x4601,
            bwp_start_rb: 2,
            bwp_size_rb: 20,
            cp: CyclicPrefix::Normal,
            modulation: ModulationScheme::Qpsk,
            target_code_rate: 120.0,
            codeword: Some(PuschCodewordDescription {
                rv: 0,
                ldpc_base_graph: LdpcBaseGraph::BaseGraph2,
                new_data: true,
            }),
            uci: PuschUciDescription {
                alpha_scaling: 1.0,
                beta_offset_harq_ack: 8.0,
                beta_offset_csi_part1: 4.0,
                ..Default::default()
            },
            n_id: 35,
            nof_tx_layers: 1,
            rx_ports: vec![0],
            dmrs_symbol_mask: SymbolMask::from_symbols(14, &[2]),
            dmrs_type: DmrsType::Type1,
            scrambling_id: 35,
            n_scid: false,
            nof_cdm_groups_without_data: 2,
            freq_alloc: RbAllocation::Contiguous { start: 3, len: 10 },
            start_symbol_index: 0,
            nof_symbols: 14,
            tbs_lbrm_bytes: 0,
            dc_position: None,
        }
    }

    fn processor() -> PuschProcessorImpl {
        create_pusch_processor(PuschProcessorConfiguration {
            max_nof_rb: GRID_RB,
            max_nof_rx_ports: 2,
            ..Default::default()
        })
        .unwrap()
    }

    fn payload(nof_bytes: usize) -> Vec<u8> {
        (0..nof_bytes).map(|i| (i * 37 + 11) as u8).collect()
    }

    fn transmit(pdu: &PuschPdu, tb: &[u8], harq_ack: &[u8], csi_part1: &[u8]) -> ResourceGrid {
        let mut grid = ResourceGrid::new(1, 14, GRID_RB);
        PuschTransmitter::new()
            .transmit(&mut grid, tb, harq_ack, csi_part1, pdu)
            .unwrap();
        grid
    }

    fn softbuffer_for(pdu: &PuschPdu, tb_len: usize) -> RxSoftbuffer {
        let base_graph = pdu.codeword.map_or(LdpcBaseGraph::BaseGraph2, |cw| cw.ldpc_base_graph);
        RxSoftbuffer::new(compute_segmentation(tb_len * 8, base_graph).nof_codeblocks)
    }

    #[test]
    fn test_valid_pdu() {
        let processor = processor();
        assert!(processor.validator().is_valid(&base_pdu()));
    }

    #[test]
    fn test_each_invalid_predicate() {
        let processor = processor();
        let validator = processor.validator();
        let mutations: Vec<(&str, Box<dyn Fn(&mut PuschPdu)>)> = vec![
            ("BWP beyond grid", Box::new(|p| p.bwp_size_rb = 24)),
            ("too many layers", Box::new(|p| p.nof_tx_layers = 5)),
            ("too many ports", Box::new(|p| p.rx_ports = vec![0, 1, 2])),
            ("allocation outside BWP", Box::new(|p| p.freq_alloc = RbAllocation::Contiguous { start: 15, len: 10 })),
            ("HARQ-ACK too long", Box::new(|p| p.uci.nof_harq_ack = 12)),
            ("CSI part 1 too long", Box::new(|p| p.uci.nof_csi_part1 = 12)),
            ("CSI part 2", Box::new(|p| p.uci.nof_csi_part2 = 1)),
            ("short DM-RS mask", Box::new(|p| p.dmrs_symbol_mask = SymbolMask::from_symbols(12, &[2]))),
            ("empty DM-RS mask", Box::new(|p| p.dmrs_symbol_mask = SymbolMask::new(14))),
            ("DM-RS before start", Box::new(|p| {
                p.start_symbol_index = 3;
                p.nof_symbols = 11;
            })),
            ("DM-RS after end", Box::new(|p| p.nof_symbols = 2)),
            ("allocation beyond slot", Box::new(|p| p.nof_symbols = 15)),
            ("DM-RS type 2", Box::new(|p| p.dmrs_type = DmrsType::Type2)),
            ("one CDM group", Box::new(|p| p.nof_cdm_groups_without_data = 1)),
            ("DC outside grid", Box::new(|p| p.dc_position = Some(GRID_RB * NRE))),
        ];
        for (name, mutate) in mutations {
            let mut pdu = base_pdu();
            mutate(&mut pdu);
            assert!(!validator.is_valid(&pdu), "{} should be rejected", name);
        }
    }

    #[test]
    #[should_panic(expected = "Invalid PUSCH PDU")]
    fn test_process_rejects_invalid_pdu() {
        let mut pdu = base_pdu();
        pdu.uci.nof_csi_part2 = 4;
        let grid = ResourceGrid::new(1, 14, GRID_RB);
        let mut softbuffer = RxSoftbuffer::new(1);
        let mut tb = vec![0u8; 64];
        processor().process(&mut tb, &mut softbuffer, &mut Recorder::default(), &grid, &pdu);
    }

    #[test]
    fn test_sch_only() {
        let pdu = base_pdu();
        let tb = payload(64);
        let grid = transmit(&pdu, &tb, &[], &[]);

        let mut processor = processor();
        let mut softbuffer = softbuffer_for(&pdu, tb.len());
        let mut decoded = vec![0u8; tb.len()];
        let mut recorder = Recorder::default();
        processor.process(&mut decoded, &mut softbuffer, &mut recorder, &grid, &pdu);

        assert_eq!(recorder.sch.len(), 1);
        assert!(recorder.harq_ack.is_empty() && recorder.csi_part1.is_empty());
        let result = &recorder.sch[0];
        assert!(result.data.tb_crc_ok);
        assert_eq!(result.data.nof_codeblocks_total, 1);
        assert_eq!(decoded, tb);
        assert!(result.csi.sinr_db().is_some());
        assert!(result.csi.evm().unwrap() < 0.05);
    }

    #[test]
    fn test_sch_with_harq_ack_and_csi_part1() {
        let mut pdu = base_pdu();
        pdu.uci.nof_harq_ack = 3;
        pdu.uci.nof_csi_part1 = 5;
        let tb = payload(64);
        let harq_ack = [1, 0, 1];
        let csi_part1 = [0, 1, 1, 0, 1];
        let grid = transmit(&pdu, &tb, &harq_ack, &csi_part1);

        let mut processor = processor();
        let mut softbuffer = softbuffer_for(&pdu, tb.len());
        let mut decoded = vec![0u8; tb.len()];
        let mut recorder = Recorder::default();
        processor.process(&mut decoded, &mut softbuffer, &mut recorder, &grid, &pdu);

        assert_eq!(recorder.sch.len(), 1);
        assert!(recorder.sch[0].data.tb_crc_ok);
        assert_eq!(decoded, tb);
        assert_eq!(recorder.harq_ack.len(), 1);
        assert_eq!(recorder.harq_ack[0].field.status, UciStatus::Valid);
        assert_eq!(recorder.harq_ack[0].field.payload, harq_ack);
        assert_eq!(recorder.csi_part1.len(), 1);
        assert_eq!(recorder.csi_part1[0].field.status, UciStatus::Valid);
        assert_eq!(recorder.csi_part1[0].field.payload, csi_part1);
    }

    #[test]
    fn test_punctured_single_bit_harq_ack() {
        let mut pdu = base_pdu();
        pdu.uci.nof_harq_ack = 1;
        let tb = payload(64);
        let grid = transmit(&pdu, &tb, &[1], &[]);

        let mut processor = processor();
        let mut softbuffer = softbuffer_for(&pdu, tb.len());
        let mut decoded = vec![0u8; tb.len()];
        let mut recorder = Recorder::default();
        processor.process(&mut decoded, &mut softbuffer, &mut recorder, &grid, &pdu);

        assert!(recorder.sch[0].data.tb_crc_ok);
        assert_eq!(decoded, tb);
        assert_eq!(recorder.harq_ack[0].field.payload, vec![1]);
        assert_eq!(recorder.harq_ack[0].field.status, UciStatus::Valid);
    }

    #[test]
    fn test_uci_only() {
        let mut pdu = base_pdu();
        pdu.codeword = None;
        pdu.uci.nof_harq_ack = 4;
        let grid = transmit(&pdu, &[], &[0, 1, 1, 1], &[]);

        let mut processor = processor();
        let mut softbuffer = RxSoftbuffer::new(0);
        let mut recorder = Recorder::default();
        processor.process(&mut [], &mut softbuffer, &mut recorder, &grid, &pdu);

        assert!(recorder.sch.is_empty());
        assert!(recorder.csi_part1.is_empty());
        assert_eq!(recorder.harq_ack.len(), 1);
        assert_eq!(recorder.harq_ack[0].field.payload, vec![0, 1, 1, 1]);
    }

    #[test]
    fn test_dc_subcarrier_is_nulled() {
        let mut pdu = base_pdu();
        // Third subcarrier of the tenth resource block from point A
        let dc = 9 * NRE + 2;
        pdu.dc_position = Some(dc);
        let tb = payload(64);
        let grid = transmit(&pdu, &tb, &[], &[]);

        let mut processor = processor();
        let mut softbuffer = softbuffer_for(&pdu, tb.len());
        let mut decoded = vec![0u8; tb.len()];
        let mut recorder = Recorder::default();
        processor.process(&mut decoded, &mut softbuffer, &mut recorder, &grid, &pdu);

        for symbol in 0..14 {
            assert_eq!(processor.ch_estimate.get(symbol, 0, 0, dc).norm(), 0.0);
        }
        assert!(processor.ch_estimate.get(4, 0, 0, dc + 1).norm() > 0.5);
        assert!(recorder.sch[0].data.tb_crc_ok);
        assert_eq!(decoded, tb);
    }

    #[test]
    fn test_empty_grid_fails_crc() {
        let pdu = base_pdu();
        let grid = ResourceGrid::new(1, 14, GRID_RB);
        let mut processor = processor();
        let mut softbuffer = softbuffer_for(&pdu, 64);
        let mut decoded = vec![0xA5u8; 64];
        let mut recorder = Recorder::default();
        processor.process(&mut decoded, &mut softbuffer, &mut recorder, &grid, &pdu);

        assert_eq!(recorder.sch.len(), 1);
        assert!(!recorder.sch[0].data.tb_crc_ok);
        assert!(decoded.iter().all(|&b| b == 0xA5));
        assert_eq!(recorder.sch[0].csi.sinr_db(), None);
    }

    #[test]
    fn test_factory_rejects_invalid_configuration() {
        let config = PuschProcessorConfiguration {
            max_nof_layers: 0,
            ..Default::default()
        };
        assert!(matches!(
            create_pusch_processor(config),
            Err(LayerError::InvalidConfiguration(_))
        ));
        let config = PuschProcessorConfiguration {
            nof_ldpc_iterations: 0,
            ..Default::default()
        };
        assert!(create_pusch_processor(config).is_err());
    }
}
