//! Link level simulation of one UE with a single HARQ process

use crate::channel::AwgnChannel;
use crate::config::{SimConfig, UeConfig};
use common::types::{CyclicPrefix, RbAllocation, Rnti, SlotPoint, SymbolMask};
use interfaces::ResourceGrid;
use layers::phy::ldpc::{compute_segmentation, get_ldpc_base_graph};
use layers::phy::{
    create_pusch_processor, DmrsType, PuschCodewordDescription, PuschPdu, PuschProcessor, PuschProcessorConfiguration,
    PuschProcessorImpl, PuschProcessorResultNotifier, PuschProcessorSchResult, PuschProcessorUciResult,
    PuschTransmitter, PuschUciDescription, RxSoftbuffer, RxSoftbufferPool, SoftbufferId, SoftbufferPoolConfig,
    UciStatus,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, trace};

/// Redundancy version of each transmission attempt
const RV_SEQUENCE: [u8; 4] = [0, 2, 3, 1];

const HARQ_ID: u8 = 0;

/// Results of one processed transmission
#[derive(Default)]
struct SlotReport {
    sch: Option<PuschProcessorSchResult>,
    harq_ack: Option<PuschProcessorUciResult>,
    csi_part1: Option<PuschProcessorUciResult>,
}

impl PuschProcessorResultNotifier for SlotReport {
    fn on_sch(&mut self, result: &PuschProcessorSchResult) {
        self.sch = Some(*result);
    }

    fn on_harq_ack(&mut self, result: &PuschProcessorUciResult) {
        self.harq_ack = Some(result.clone());
    }

    fn on_csi_part1(&mut self, result: &PuschProcessorUciResult) {
        self.csi_part1 = Some(result.clone());
    }
}

/// Per UE counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct UeStats {
    pub rnti: u16,
    pub snr_db: f32,
    pub nof_transmissions: usize,
    pub nof_first_transmissions: usize,
    pub nof_first_transmission_errors: usize,
    pub nof_transport_blocks_ok: usize,
    pub nof_transport_blocks_dropped: usize,
    pub nof_harq_ack: usize,
    pub nof_harq_ack_errors: usize,
    pub nof_csi_part1: usize,
    pub nof_csi_part1_errors: usize,
    #[serde(skip)]
    sinr_db_sum: f32,
    #[serde(skip)]
    nof_sinr: usize,
}

impl UeStats {
    /// Block error rate of first transmissions
    pub fn bler(&self) -> f32 {
        if self.nof_first_transmissions == 0 {
            0.0
        } else {
            self.nof_first_transmission_errors as f32 / self.nof_first_transmissions as f32
        }
    }

    /// Ratio of transport blocks dropped after every retransmission
    pub fn residual_bler(&self) -> f32 {
        let total = self.nof_transport_blocks_ok + self.nof_transport_blocks_dropped;
        if total == 0 {
            0.0
        } else {
            self.nof_transport_blocks_dropped as f32 / total as f32
        }
    }

    pub fn mean_sinr_db(&self) -> Option<f32> {
        (self.nof_sinr > 0).then(|| self.sinr_db_sum / self.nof_sinr as f32)
    }
}

/// Transport block waiting for acknowledgement
struct PendingTransportBlock {
    data: Vec<u8>,
    attempt: usize,
}

/// UE transmitter, channel and the gNB processor serving it
pub struct UeSimulator {
    rnti: u16,
    pdu: PuschPdu,
    max_retransmissions: usize,
    transmitter: PuschTransmitter,
    channel: AwgnChannel,
    processor: PuschProcessorImpl,
    pool: RxSoftbufferPool,
    tx_grid: ResourceGrid,
    rx_grid: ResourceGrid,
    rng: StdRng,
    pending: Option<PendingTransportBlock>,
    tbs_bytes: usize,
    stats: UeStats,
}

/// PDU template of a UE, without slot or HARQ state
fn build_pdu(config: &SimConfig, ue: &UeConfig) -> anyhow::Result<PuschPdu> {
    let pusch = &config.pusch;
    let cp = CyclicPrefix::Normal;
    let tbs_bits = pusch.tbs_bytes * 8;
    let codeword = (tbs_bits > 0).then(|| PuschCodewordDescription {
        rv: 0,
        ldpc_base_graph: get_ldpc_base_graph(pusch.target_code_rate / 1024.0, tbs_bits),
        new_data: true,
    });
    let mut dmrs_symbol_mask = SymbolMask::new(cp.nof_symbols_per_slot());
    for &symbol in &pusch.dmrs_symbols {
        if symbol >= cp.nof_symbols_per_slot() {
            return Err(anyhow::anyhow!("DM-RS symbol {} outside the slot", symbol));
        }
        dmrs_symbol_mask.set(symbol);
    }

    Ok(PuschPdu {
        slot: SlotPoint::new(config.carrier.subcarrier_spacing()?, 0, 0),
        rnti: ue.rnti,
        bwp_start_rb: pusch.bwp_start_rb,
        bwp_size_rb: pusch.bwp_size_rb,
        cp,
        modulation: pusch.modulation,
        target_code_rate: pusch.target_code_rate,
        codeword,
        uci: PuschUciDescription {
            nof_harq_ack: pusch.nof_harq_ack,
            nof_csi_part1: pusch.nof_csi_part1,
            nof_csi_part2: 0,
            alpha_scaling: pusch.alpha_scaling,
            beta_offset_harq_ack: pusch.beta_offset_harq_ack,
            beta_offset_csi_part1: pusch.beta_offset_csi_part1,
        },
        n_id: config.carrier.pci,
        nof_tx_layers: pusch.nof_layers,
        rx_ports: (0..config.carrier.rx_ports).collect(),
        dmrs_symbol_mask,
        dmrs_type: DmrsType::Type1,
        scrambling_id: config.carrier.pci,
        n_scid: false,
        nof_cdm_groups_without_data: 2,
        freq_alloc: RbAllocation::Contiguous {
            start: pusch.rb_start,
            len: pusch.nof_rb,
        },
        start_symbol_index: pusch.start_symbol,
        nof_symbols: pusch.nof_symbols,
        tbs_lbrm_bytes: pusch.tbs_lbrm_bytes,
        dc_position: config.carrier.dc_subcarrier,
    })
}

impl UeSimulator {
    pub fn new(config: &SimConfig, ue: &UeConfig, seed: u64) -> anyhow::Result<Self> {
        let processor = create_pusch_processor(PuschProcessorConfiguration {
            max_nof_rb: config.carrier.nof_rb,
            max_nof_rx_ports: config.carrier.rx_ports,
            nof_ldpc_iterations: config.processor.ldpc_iterations,
            use_early_stop: config.processor.early_stop,
            sinr_calc_method: config.processor.sinr_method.into(),
            ..Default::default()
        })?;
        let pdu = build_pdu(config, ue)?;
        processor.validator().check(&pdu)?;

        let nof_symbols = pdu.cp.nof_symbols_per_slot();
        Ok(Self {
            rnti: ue.rnti,
            max_retransmissions: config.pusch.max_retransmissions,
            transmitter: PuschTransmitter::new(),
            channel: AwgnChannel::new(ue.snr_db, seed)?,
            processor,
            pool: RxSoftbufferPool::new(SoftbufferPoolConfig::default()),
            tx_grid: ResourceGrid::new(pdu.nof_tx_layers, nof_symbols, config.carrier.nof_rb),
            rx_grid: ResourceGrid::new(config.carrier.rx_ports, nof_symbols, config.carrier.nof_rb),
            rng: StdRng::seed_from_u64(seed ^ 0x5eed),
            pending: None,
            tbs_bytes: config.pusch.tbs_bytes,
            stats: UeStats {
                rnti: ue.rnti,
                snr_db: ue.snr_db,
                ..Default::default()
            },
            pdu,
        })
    }

    pub fn stats(&self) -> &UeStats {
        &self.stats
    }

    /// Transmit and receive one PUSCH in `slot`
    pub fn run_slot(&mut self, slot: SlotPoint) -> anyhow::Result<()> {
        self.pool.run_slot(slot);
        self.pdu.slot = slot;

        if self.pdu.codeword.is_some() && self.pending.is_none() {
            let data = (0..self.tbs_bytes).map(|_| self.rng.gen()).collect();
            self.pending = Some(PendingTransportBlock { data, attempt: 0 });
        }
        let attempt = self.pending.as_ref().map_or(0, |tb| tb.attempt);
        if let Some(codeword) = self.pdu.codeword.as_mut() {
            codeword.rv = RV_SEQUENCE[attempt % RV_SEQUENCE.len()];
            codeword.new_data = attempt == 0;
        }

        let harq_ack: Vec<u8> = (0..self.pdu.uci.nof_harq_ack).map(|_| self.rng.gen_range(0..2)).collect();
        let csi_part1: Vec<u8> = (0..self.pdu.uci.nof_csi_part1).map(|_| self.rng.gen_range(0..2)).collect();
        let tb_data = self.pending.as_ref().map_or(&[][..], |tb| tb.data.as_slice());

        self.tx_grid.clear();
        self.transmitter
            .transmit(&mut self.tx_grid, tb_data, &harq_ack, &csi_part1, &self.pdu)?;
        self.channel.propagate(&self.tx_grid, &mut self.rx_grid)?;

        let mut report = SlotReport::default();
        let mut decoded = vec![0u8; tb_data.len()];
        match self.pdu.codeword {
            Some(codeword) => {
                let nof_codeblocks = compute_segmentation(decoded.len() * 8, codeword.ldpc_base_graph).nof_codeblocks;
                let id = SoftbufferId {
                    rnti: Rnti::new(self.rnti),
                    harq_id: HARQ_ID,
                };
                let softbuffer = self.pool.reserve(slot, id, nof_codeblocks, codeword.new_data)?;
                self.processor
                    .process(&mut decoded, softbuffer, &mut report, &self.rx_grid, &self.pdu);
            }
            None => {
                let mut softbuffer = RxSoftbuffer::new(0);
                self.processor
                    .process(&mut decoded, &mut softbuffer, &mut report, &self.rx_grid, &self.pdu);
            }
        }

        self.account(slot, &report, &decoded, &harq_ack, &csi_part1);
        Ok(())
    }

    fn account(&mut self, slot: SlotPoint, report: &SlotReport, decoded: &[u8], harq_ack: &[u8], csi_part1: &[u8]) {
        self.stats.nof_transmissions += 1;

        if let Some(sinr_db) = [
            report.sch.as_ref().map(|r| r.csi),
            report.harq_ack.as_ref().map(|r| r.csi),
            report.csi_part1.as_ref().map(|r| r.csi),
        ]
        .into_iter()
        .flatten()
        .find_map(|csi| csi.sinr_db())
        {
            self.stats.sinr_db_sum += sinr_db;
            self.stats.nof_sinr += 1;
        }

        if let Some(pending) = self.pending.as_mut() {
            let crc_ok = report.sch.as_ref().is_some_and(|r| r.data.tb_crc_ok) && decoded == pending.data.as_slice();
            if pending.attempt == 0 {
                self.stats.nof_first_transmissions += 1;
                if !crc_ok {
                    self.stats.nof_first_transmission_errors += 1;
                }
            }
            trace!(
                "UE {:#06x} slot {}: attempt {} CRC {}",
                self.rnti,
                slot.slot_index(),
                pending.attempt,
                if crc_ok { "OK" } else { "KO" }
            );

            let id = SoftbufferId {
                rnti: Rnti::new(self.rnti),
                harq_id: HARQ_ID,
            };
            if crc_ok {
                self.stats.nof_transport_blocks_ok += 1;
                self.pool.free(id);
                self.pending = None;
            } else if pending.attempt >= self.max_retransmissions {
                debug!("UE {:#06x}: transport block dropped after {} attempts", self.rnti, pending.attempt + 1);
                self.stats.nof_transport_blocks_dropped += 1;
                self.pool.free(id);
                self.pending = None;
            } else {
                pending.attempt += 1;
            }
        }

        if !harq_ack.is_empty() {
            self.stats.nof_harq_ack += 1;
            if !uci_matches(report.harq_ack.as_ref(), harq_ack) {
                self.stats.nof_harq_ack_errors += 1;
            }
        }
        if !csi_part1.is_empty() {
            self.stats.nof_csi_part1 += 1;
            if !uci_matches(report.csi_part1.as_ref(), csi_part1) {
                self.stats.nof_csi_part1_errors += 1;
            }
        }
    }
}

fn uci_matches(result: Option<&PuschProcessorUciResult>, sent: &[u8]) -> bool {
    result.is_some_and(|r| r.field.status == UciStatus::Valid && r.field.payload == sent)
}
