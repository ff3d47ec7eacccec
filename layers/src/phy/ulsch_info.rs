//! UL-SCH and UCI resource budgets
//!
//! Number of coded bits of every field multiplexed on PUSCH, following
//! TS 38.212 Section 6.3.2.4 for HARQ-ACK and CSI part 1 and the remaining
//! data resource elements for the UL-SCH.

use super::ldpc::{compute_segmentation, LdpcBaseGraph};
use super::sequence::DmrsType;
use common::types::{ModulationScheme, SymbolMask, NRE};
use tracing::trace;

/// Parameters that size the UL-SCH and UCI fields of one transmission
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UlschConfiguration {
    /// Transport block size in bits, zero without UL-SCH data
    pub tbs: usize,
    pub modulation: ModulationScheme,
    /// Target code rate times 1024
    pub target_code_rate: f32,
    pub nof_harq_ack_bits: usize,
    pub nof_csi_part1_bits: usize,
    pub nof_csi_part2_bits: usize,
    pub alpha_scaling: f32,
    pub beta_offset_harq_ack: f32,
    pub beta_offset_csi_part1: f32,
    pub nof_rb: usize,
    pub start_symbol_index: usize,
    pub nof_symbols: usize,
    pub dmrs_type: DmrsType,
    pub dmrs_symbol_mask: SymbolMask,
    pub nof_cdm_groups_without_data: usize,
    pub nof_layers: usize,
    pub base_graph: LdpcBaseGraph,
}

/// Coded bits and resource elements of every multiplexed field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UlschInformation {
    pub nof_ul_sch_bits: usize,
    pub nof_harq_ack_bits: usize,
    /// Bits of the reserved HARQ-ACK resource elements
    pub nof_harq_ack_rvd_bits: usize,
    pub nof_csi_part1_bits: usize,
    /// HARQ-ACK resource elements per layer, Q'_ACK
    pub nof_harq_ack_re: usize,
    /// Reserved HARQ-ACK resource elements per layer
    pub nof_harq_ack_rvd_re: usize,
    /// CSI part 1 resource elements per layer, Q'_CSI1
    pub nof_csi_part1_re: usize,
    /// Resource elements per layer that may carry data
    pub nof_data_re: usize,
    /// Resource elements per layer occupied by DM-RS
    pub nof_dmrs_re: usize,
}

/// CRC length attached to a UCI payload (TS 38.212 Section 6.3.1.2.1)
pub fn uci_crc_length(nof_bits: usize) -> usize {
    if nof_bits <= 11 {
        0
    } else if nof_bits <= 19 {
        6
    } else {
        11
    }
}

/// Data resource elements per resource block on a DM-RS symbol
fn data_re_per_rb_on_dmrs(dmrs_type: DmrsType, nof_cdm_groups_without_data: usize) -> usize {
    // nof_dmrs_per_rb counts the resource elements of one CDM group.
    NRE.saturating_sub(dmrs_type.nof_dmrs_per_rb() * nof_cdm_groups_without_data)
}

/// Resource elements per layer available to UCI in a symbol, M_sc^UCI(l)
fn uci_re_per_symbol(config: &UlschConfiguration, symbol: usize) -> usize {
    if config.dmrs_symbol_mask.test(symbol) {
        0
    } else {
        config.nof_rb * NRE
    }
}

fn ceil_f64(value: f64) -> usize {
    // Remove rounding noise of products that are exact integers.
    (value - 1e-9).ceil().max(0.0) as usize
}

/// Compute the UL-SCH information of a transmission
pub fn get_ulsch_information(config: &UlschConfiguration) -> UlschInformation {
    assert!(config.nof_layers > 0, "At least one layer is required");
    assert_eq!(config.nof_csi_part2_bits, 0, "CSI part 2 is not supported");
    let qm = config.modulation.bits_per_symbol();
    let symbols = config.start_symbol_index..config.start_symbol_index + config.nof_symbols;

    let first_dmrs = config
        .dmrs_symbol_mask
        .find_lowest()
        .unwrap_or(config.start_symbol_index);
    // First non DM-RS symbol after the first DM-RS symbol.
    let l0 = symbols
        .clone()
        .find(|&l| l > first_dmrs && !config.dmrs_symbol_mask.test(l))
        .unwrap_or(symbols.end);

    let sum_m: usize = symbols.clone().map(|l| uci_re_per_symbol(config, l)).sum();
    let sum_m_from_l0: usize = (l0..symbols.end).map(|l| uci_re_per_symbol(config, l)).sum();

    let nof_dmrs_symbols = symbols.clone().filter(|&l| config.dmrs_symbol_mask.test(l)).count();
    let data_re_on_dmrs = config.nof_rb
        * data_re_per_rb_on_dmrs(config.dmrs_type, config.nof_cdm_groups_without_data);
    let nof_data_re = sum_m + nof_dmrs_symbols * data_re_on_dmrs;
    let nof_dmrs_re = nof_dmrs_symbols * config.nof_rb * NRE - nof_dmrs_symbols * data_re_on_dmrs;

    let has_sch = config.tbs > 0;
    let sum_k = if has_sch {
        let seg = compute_segmentation(config.tbs, config.base_graph);
        seg.nof_codeblocks * seg.codeblock_size
    } else {
        0
    };
    let code_rate = config.target_code_rate as f64 / 1024.0;
    let alpha = config.alpha_scaling as f64;

    // Q'_ACK for a payload of `nof_bits`.
    let harq_ack_re = |nof_bits: usize| -> usize {
        let payload = (nof_bits + uci_crc_length(nof_bits)) as f64;
        let beta = config.beta_offset_harq_ack as f64;
        let limit = ceil_f64(alpha * sum_m_from_l0 as f64);
        let required = if has_sch {
            ceil_f64(payload * beta * sum_m as f64 / sum_k as f64)
        } else {
            ceil_f64(payload * beta / (code_rate * qm as f64))
        };
        required.min(limit)
    };

    let mut info = UlschInformation {
        nof_data_re,
        nof_dmrs_re,
        ..Default::default()
    };

    if config.nof_harq_ack_bits > 0 {
        info.nof_harq_ack_re = harq_ack_re(config.nof_harq_ack_bits);
        if config.nof_harq_ack_bits <= 2 {
            info.nof_harq_ack_rvd_re = harq_ack_re(2);
        }
    }

    if config.nof_csi_part1_bits > 0 {
        let payload = (config.nof_csi_part1_bits + uci_crc_length(config.nof_csi_part1_bits)) as f64;
        let beta = config.beta_offset_csi_part1 as f64;
        let used = if config.nof_harq_ack_bits > 2 {
            info.nof_harq_ack_re
        } else {
            info.nof_harq_ack_rvd_re
        };
        let limit = ceil_f64(alpha * sum_m as f64).saturating_sub(used);
        info.nof_csi_part1_re = if has_sch {
            ceil_f64(payload * beta * sum_m as f64 / sum_k as f64).min(limit)
        } else {
            // Without data and CSI part 2, CSI part 1 takes every remaining RE.
            sum_m.saturating_sub(used)
        };
    }

    let bits_per_re = config.nof_layers * qm;
    info.nof_harq_ack_bits = info.nof_harq_ack_re * bits_per_re;
    info.nof_harq_ack_rvd_bits = info.nof_harq_ack_rvd_re * bits_per_re;
    info.nof_csi_part1_bits = info.nof_csi_part1_re * bits_per_re;

    if has_sch {
        let ack_rate_matched = if config.nof_harq_ack_bits > 2 { info.nof_harq_ack_bits } else { 0 };
        info.nof_ul_sch_bits = (nof_data_re * bits_per_re)
            .saturating_sub(ack_rate_matched)
            .saturating_sub(info.nof_csi_part1_bits);
    }

    trace!("UL-SCH information: {:?}", info);
    info
}
