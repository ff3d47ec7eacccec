//! PUSCH DM-RS channel estimator
//!
//! Least squares estimation over the DM-RS type 1 resource elements
//! (TS 38.211 Section 6.4.1.1), with frequency OCC de-spreading, averaging
//! over each PRB and over all DM-RS symbols of the slot. The noise variance
//! comes from the residual of the fitted model.

use super::channel_estimate::ChannelEstimate;
use super::sequence::{
    calculate_pusch_dmrs_cinit, generate_dmrs_sequence, get_pusch_dmrs_params, DmrsType, PseudoRandomGenerator,
};
use common::types::{CyclicPrefix, SlotPoint, SymbolMask, NRE};
use interfaces::resource_grid::ResourceGridReader;
use ndarray::Array2;
use num_complex::Complex32;
use num_traits::Zero;
use tracing::{debug, trace};

/// Noise variance floor relative to the received DM-RS energy
const NOISE_FLOOR: f32 = 1e-4;

/// DM-RS resource elements per PRB and CDM group
const DMRS_PER_RB: usize = 6;

/// Estimator parameters of one transmission
#[derive(Debug, Clone, PartialEq)]
pub struct DmrsPuschEstimatorConfig {
    pub slot: SlotPoint,
    pub cp: CyclicPrefix,
    pub dmrs_type: DmrsType,
    /// DM-RS scrambling identity
    pub scrambling_id: u16,
    pub n_scid: bool,
    /// DM-RS amplitude relative to the data
    pub scaling: f32,
    pub first_symbol: usize,
    pub nof_symbols: usize,
    /// Symbols carrying DM-RS
    pub symbols_mask: SymbolMask,
    /// Allocated PRBs from common resource block zero
    pub rb_mask: Vec<bool>,
    pub nof_tx_layers: usize,
    /// Grid ports to estimate
    pub rx_ports: Vec<usize>,
}

/// DM-RS based channel estimator
pub trait DmrsPuschEstimator: Send {
    /// Fill `estimate` for every receive port and layer of `config`
    fn estimate(&mut self, estimate: &mut ChannelEstimate, grid: &dyn ResourceGridReader, config: &DmrsPuschEstimatorConfig);
}

/// Least squares estimator with PRB averaging
#[derive(Debug, Default)]
pub struct DmrsPuschEstimatorImpl {
    sequences: Vec<Vec<Complex32>>,
    row: Vec<Complex32>,
}

impl DmrsPuschEstimatorImpl {
    pub fn new() -> Self {
        Self::default()
    }

    fn generate_sequences(&mut self, config: &DmrsPuschEstimatorConfig) {
        let nof_symbols_slot = config.cp.nof_symbols_per_slot();
        let amplitude = config.scaling * std::f32::consts::FRAC_1_SQRT_2;
        self.sequences = config
            .symbols_mask
            .iter_ones()
            .map(|symbol| {
                let c_init = calculate_pusch_dmrs_cinit(
                    config.slot.slot_index() as u32,
                    symbol,
                    nof_symbols_slot,
                    config.scrambling_id,
                    config.n_scid,
                );
                let mut generator = PseudoRandomGenerator::new(c_init);
                generate_dmrs_sequence(&config.rb_mask, config.dmrs_type.nof_dmrs_per_rb(), &mut generator, amplitude)
            })
            .collect();
    }
}

impl DmrsPuschEstimator for DmrsPuschEstimatorImpl {
    fn estimate(&mut self, estimate: &mut ChannelEstimate, grid: &dyn ResourceGridReader, config: &DmrsPuschEstimatorConfig) {
        assert_eq!(config.dmrs_type, DmrsType::Type1, "Only DM-RS type 1 is supported");
        let dims = estimate.dimensions();
        assert!(
            config.rx_ports.len() <= dims.nof_rx_ports && config.nof_tx_layers <= dims.nof_tx_layers,
            "Estimate of {} ports and {} layers cannot hold {} ports and {} layers",
            dims.nof_rx_ports,
            dims.nof_tx_layers,
            config.rx_ports.len(),
            config.nof_tx_layers
        );

        self.generate_sequences(config);
        let dmrs_symbols: Vec<usize> = config.symbols_mask.iter_ones().collect();
        let allocated: Vec<usize> = config
            .rb_mask
            .iter()
            .enumerate()
            .filter(|(_, used)| **used)
            .map(|(rb, _)| rb)
            .collect();
        let nof_layers = config.nof_tx_layers;
        let weights: Vec<_> = (0..nof_layers).map(get_pusch_dmrs_params).collect();
        let cdm_groups: Vec<usize> = if nof_layers > 2 { vec![0, 1] } else { vec![0] };
        self.row.resize(config.rb_mask.len() * NRE, Complex32::zero());

        estimate.clear();
        for (i_port, &port) in config.rx_ports.iter().enumerate() {
            let mut coefficients = Array2::<Complex32>::zeros((nof_layers, allocated.len()));
            let mut energy = 0.0f32;
            let mut nof_energy_samples = 0usize;

            // Least squares with OCC de-spreading, accumulated per PRB.
            for (i_symbol, &symbol) in dmrs_symbols.iter().enumerate() {
                grid.get_range(&mut self.row, port, symbol, 0);
                let sequence = &self.sequences[i_symbol];
                for (layer, w) in weights.iter().enumerate() {
                    for (i_rb, &rb) in allocated.iter().enumerate() {
                        let mut acc = Complex32::zero();
                        for j in 0..DMRS_PER_RB {
                            let reference = sequence[i_rb * DMRS_PER_RB + j];
                            let received = self.row[rb * NRE + 2 * j + w.delta];
                            acc += received * reference.conj() * w.w_f[j % 2] / reference.norm_sqr();
                        }
                        coefficients[(layer, i_rb)] += acc / DMRS_PER_RB as f32;
                    }
                }
                for &group in &cdm_groups {
                    for &rb in &allocated {
                        for j in 0..DMRS_PER_RB {
                            energy += self.row[rb * NRE + 2 * j + group].norm_sqr();
                            nof_energy_samples += 1;
                        }
                    }
                }
            }
            coefficients.mapv_inplace(|h| h / dmrs_symbols.len() as f32);

            // Residual against the fitted model.
            let mut residual = 0.0f32;
            for (i_symbol, &symbol) in dmrs_symbols.iter().enumerate() {
                grid.get_range(&mut self.row, port, symbol, 0);
                let sequence = &self.sequences[i_symbol];
                for &group in &cdm_groups {
                    for (i_rb, &rb) in allocated.iter().enumerate() {
                        for j in 0..DMRS_PER_RB {
                            let reference = sequence[i_rb * DMRS_PER_RB + j];
                            let expected: Complex32 = weights
                                .iter()
                                .enumerate()
                                .filter(|(_, w)| w.delta == group)
                                .map(|(layer, w)| coefficients[(layer, i_rb)] * reference * w.w_f[j % 2])
                                .sum();
                            residual += (self.row[rb * NRE + 2 * j + group] - expected).norm_sqr();
                        }
                    }
                }
            }
            let nof_parameters = nof_layers * allocated.len();
            let degrees_of_freedom = nof_energy_samples.saturating_sub(nof_parameters).max(1);
            let epre = if nof_energy_samples > 0 { energy / nof_energy_samples as f32 } else { 0.0 };
            let noise_var = (residual / degrees_of_freedom as f32).max(epre * NOISE_FLOOR);

            estimate.set_noise_variance(i_port, noise_var);
            estimate.set_epre(i_port, epre);

            for layer in 0..nof_layers {
                for symbol in config.first_symbol..config.first_symbol + config.nof_symbols {
                    let mut row = estimate.symbol_estimate_mut(symbol, i_port, layer);
                    for (i_rb, &rb) in allocated.iter().enumerate() {
                        for k in rb * NRE..(rb + 1) * NRE {
                            row[k] = coefficients[(layer, i_rb)];
                        }
                    }
                }

                let power = if allocated.is_empty() {
                    0.0
                } else {
                    coefficients.row(layer).iter().map(|h| h.norm_sqr()).sum::<f32>() / allocated.len() as f32
                };
                estimate.set_rsrp(i_port, layer, power * config.scaling * config.scaling);
                estimate.set_sinr(i_port, layer, if noise_var > 0.0 { power / noise_var } else { 0.0 });
                trace!(
                    "Port {} layer {}: channel power {:.3e}, noise {:.3e}",
                    port,
                    layer,
                    power,
                    noise_var
                );
            }
        }

        debug!(
            "DM-RS estimation: {} PRB, {} DM-RS symbols, {} ports, {} layers",
            allocated.len(),
            dmrs_symbols.len(),
            config.rx_ports.len(),
            nof_layers
        );
    }
}
