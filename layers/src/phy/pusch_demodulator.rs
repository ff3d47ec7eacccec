//! PUSCH demodulator
//!
//! Reads the data resource elements of every receive port, equalizes them
//! with the channel estimate, computes soft bits and descrambles them
//! (TS 38.211 Sections 6.3.1.1 to 6.3.1.5, receive side). Soft bits are
//! pushed one OFDM symbol at a time.

use super::channel_estimate::{ChannelEstimate, MAX_RX_PORTS, MAX_TX_LAYERS};
use super::modulation::{demodulate_soft, modulate};
use super::sequence::{calculate_pusch_scrambling_cinit, DmrsType, PseudoRandomGenerator};
use super::ulsch_demultiplex::PuschCodewordBuffer;
use common::types::{LogLikelihoodRatio, ModulationScheme, SymbolMask, NRE};
use common::utils::power_to_db;
use interfaces::resource_grid::ResourceGridReader;
use num_complex::Complex32;
use num_traits::Zero;
use tracing::debug;

/// Demodulation parameters of one transmission
#[derive(Debug, Clone, PartialEq)]
pub struct PuschDemodulatorConfig {
    pub rnti: u16,
    /// Allocated PRBs from common resource block zero
    pub rb_mask: Vec<bool>,
    pub modulation: ModulationScheme,
    pub start_symbol_index: usize,
    pub nof_symbols: usize,
    pub dmrs_symbol_mask: SymbolMask,
    pub dmrs_type: DmrsType,
    pub nof_cdm_groups_without_data: usize,
    /// Data scrambling identity
    pub n_id: u16,
    pub nof_tx_layers: usize,
    pub rx_ports: Vec<usize>,
}

/// Post-equalization statistics
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PuschDemodulatorStats {
    pub evm: Option<f32>,
    pub sinr_db: Option<f32>,
}

/// Receives the demodulation statistics before the codeword is closed
pub trait PuschDemodulatorNotifier {
    fn on_end_stats(&mut self, stats: &PuschDemodulatorStats);
}

pub trait PuschDemodulator: Send {
    fn demodulate(
        &mut self,
        codeword: &mut dyn PuschCodewordBuffer,
        notifier: &mut dyn PuschDemodulatorNotifier,
        grid: &dyn ResourceGridReader,
        estimate: &ChannelEstimate,
        config: &PuschDemodulatorConfig,
    );
}

type Matrix = [[Complex32; MAX_TX_LAYERS]; MAX_TX_LAYERS];

/// Invert the leading `n` by `n` block with Gauss-Jordan elimination
fn invert(matrix: &Matrix, n: usize) -> Option<Matrix> {
    let mut a = *matrix;
    let mut inverse = [[Complex32::zero(); MAX_TX_LAYERS]; MAX_TX_LAYERS];
    for (i, row) in inverse.iter_mut().enumerate().take(n) {
        row[i] = Complex32::new(1.0, 0.0);
    }

    for col in 0..n {
        let pivot = (col..n).max_by(|&x, &y| a[x][col].norm_sqr().total_cmp(&a[y][col].norm_sqr()))?;
        if a[pivot][col].norm_sqr() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        inverse.swap(col, pivot);

        let scale = a[col][col].inv();
        for j in 0..n {
            a[col][j] *= scale;
            inverse[col][j] *= scale;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[row][col];
            if factor.is_zero() {
                continue;
            }
            for j in 0..n {
                let (pivot_a, pivot_inv) = (a[col][j], inverse[col][j]);
                a[row][j] -= factor * pivot_a;
                inverse[row][j] -= factor * pivot_inv;
            }
        }
    }
    Some(inverse)
}

/// Equalize one resource element
///
/// `channel[port][layer]` holds the estimate, `noise_vars[port]` the noise of
/// each port. Writes one symbol and one noise variance per layer; singular
/// channels produce infinite noise.
fn equalize(
    symbols: &mut [Complex32],
    eq_noise_vars: &mut [f32],
    received: &[Complex32],
    channel: &[[Complex32; MAX_TX_LAYERS]],
    noise_vars: &[f32],
) {
    let nof_layers = symbols.len();
    let nof_ports = received.len();

    if nof_layers == 1 {
        // Maximum ratio combining
        let gain: f32 = channel.iter().map(|h| h[0].norm_sqr()).sum();
        if gain <= 0.0 {
            symbols[0] = Complex32::zero();
            eq_noise_vars[0] = f32::INFINITY;
            return;
        }
        let combined: Complex32 = channel.iter().zip(received).map(|(h, y)| h[0].conj() * y).sum();
        let noise: f32 = channel.iter().zip(noise_vars).map(|(h, nv)| h[0].norm_sqr() * nv).sum();
        symbols[0] = combined / gain;
        eq_noise_vars[0] = noise / (gain * gain);
        return;
    }

    // Zero forcing: x = (H^H H)^-1 H^H y
    let mut gram: Matrix = [[Complex32::zero(); MAX_TX_LAYERS]; MAX_TX_LAYERS];
    let mut matched = [Complex32::zero(); MAX_TX_LAYERS];
    for i in 0..nof_layers {
        for j in 0..nof_layers {
            gram[i][j] = (0..nof_ports).map(|p| channel[p][i].conj() * channel[p][j]).sum();
        }
        matched[i] = (0..nof_ports).map(|p| channel[p][i].conj() * received[p]).sum();
    }
    let noise_var = noise_vars.iter().sum::<f32>() / nof_ports as f32;

    match invert(&gram, nof_layers) {
        Some(inverse) => {
            for layer in 0..nof_layers {
                symbols[layer] = (0..nof_layers).map(|j| inverse[layer][j] * matched[j]).sum();
                eq_noise_vars[layer] = noise_var * inverse[layer][layer].re;
            }
        }
        None => {
            symbols.fill(Complex32::zero());
            eq_noise_vars.fill(f32::INFINITY);
        }
    }
}

/// Linear equalizer and max-log demapper
#[derive(Debug, Default)]
pub struct PuschDemodulatorImpl {
    received: Vec<Vec<Complex32>>,
    subcarriers: Vec<usize>,
    eq_symbols: Vec<Complex32>,
    eq_noise_vars: Vec<f32>,
    llrs: Vec<LogLikelihoodRatio>,
    hard_bits: Vec<u8>,
    reference: Vec<Complex32>,
}

impl PuschDemodulatorImpl {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Subcarrier mask of the data resource elements of a symbol
fn data_mask(config: &PuschDemodulatorConfig, is_dmrs: bool) -> Vec<bool> {
    assert!(
        !is_dmrs || config.dmrs_type == DmrsType::Type1,
        "Only DM-RS type 1 is supported"
    );
    config
        .rb_mask
        .iter()
        .flat_map(|&allocated| {
            (0..NRE).map(move |k| allocated && (!is_dmrs || k % 2 >= config.nof_cdm_groups_without_data))
        })
        .collect()
}

impl PuschDemodulator for PuschDemodulatorImpl {
    fn demodulate(
        &mut self,
        codeword: &mut dyn PuschCodewordBuffer,
        notifier: &mut dyn PuschDemodulatorNotifier,
        grid: &dyn ResourceGridReader,
        estimate: &ChannelEstimate,
        config: &PuschDemodulatorConfig,
    ) {
        let nof_ports = config.rx_ports.len();
        let nof_layers = config.nof_tx_layers;
        let qm = config.modulation.bits_per_symbol();
        assert!(
            (1..=MAX_RX_PORTS).contains(&nof_ports) && (1..=MAX_TX_LAYERS).contains(&nof_layers),
            "Unsupported {} receive ports and {} layers",
            nof_ports,
            nof_layers
        );

        let data_symbol_mask = data_mask(config, false);
        let dmrs_symbol_mask = data_mask(config, true);
        let noise_vars: Vec<f32> = (0..nof_ports).map(|port| estimate.noise_variance(port)).collect();
        let mut scrambler = PseudoRandomGenerator::new(calculate_pusch_scrambling_cinit(config.rnti, config.n_id));

        self.received.resize(nof_ports, Vec::new());
        let mut error_power = 0.0f32;
        let mut reference_power = 0.0f32;
        let mut noise_sum = 0.0f32;
        let mut nof_valid = 0usize;
        let mut nof_re_total = 0usize;

        for symbol in config.start_symbol_index..config.start_symbol_index + config.nof_symbols {
            let mask = if config.dmrs_symbol_mask.test(symbol) {
                &dmrs_symbol_mask
            } else {
                &data_symbol_mask
            };
            self.subcarriers.clear();
            self.subcarriers
                .extend(mask.iter().enumerate().filter(|(_, used)| **used).map(|(k, _)| k));
            let nof_re = self.subcarriers.len();
            if nof_re == 0 {
                continue;
            }

            for (buffer, &port) in self.received.iter_mut().zip(&config.rx_ports) {
                buffer.resize(nof_re, Complex32::zero());
                grid.get_masked(buffer, port, symbol, 0, mask);
            }

            self.eq_symbols.resize(nof_re * nof_layers, Complex32::zero());
            self.eq_noise_vars.resize(nof_re * nof_layers, 0.0);
            let mut channel = [[Complex32::zero(); MAX_TX_LAYERS]; MAX_RX_PORTS];
            let mut received = [Complex32::zero(); MAX_RX_PORTS];
            for (i_re, &k) in self.subcarriers.iter().enumerate() {
                for port in 0..nof_ports {
                    received[port] = self.received[port][i_re];
                    for layer in 0..nof_layers {
                        channel[port][layer] = estimate.get(symbol, port, layer, k);
                    }
                }
                let range = i_re * nof_layers..(i_re + 1) * nof_layers;
                equalize(
                    &mut self.eq_symbols[range.clone()],
                    &mut self.eq_noise_vars[range],
                    &received[..nof_ports],
                    &channel[..nof_ports],
                    &noise_vars,
                );
            }

            self.llrs.resize(nof_re * nof_layers * qm, LogLikelihoodRatio::default());
            demodulate_soft(&mut self.llrs, &self.eq_symbols, &self.eq_noise_vars, config.modulation);

            // EVM against the nearest constellation points.
            self.hard_bits.clear();
            self.hard_bits.extend(self.llrs.iter().map(|llr| llr.hard_decision()));
            self.reference.resize(self.eq_symbols.len(), Complex32::zero());
            modulate(&mut self.reference, &self.hard_bits, config.modulation);
            for ((equalized, reference), &noise_var) in self.eq_symbols.iter().zip(&self.reference).zip(&self.eq_noise_vars) {
                if noise_var > 0.0 && noise_var.is_finite() {
                    error_power += (equalized - reference).norm_sqr();
                    reference_power += reference.norm_sqr();
                    noise_sum += noise_var;
                    nof_valid += 1;
                }
            }

            scrambler.apply_xor_llr(&mut self.llrs);
            codeword.on_new_block(&self.llrs);
            nof_re_total += nof_re;
        }

        let stats = PuschDemodulatorStats {
            evm: (reference_power > 0.0).then(|| (error_power / reference_power).sqrt()),
            sinr_db: (nof_valid > 0 && noise_sum > 0.0).then(|| power_to_db(nof_valid as f32 / noise_sum)),
        };
        debug!(
            "PUSCH demodulation: {} RE, {} layers, EVM {:?}, SINR {:?} dB",
            nof_re_total,
            nof_layers,
            stats.evm,
            stats.sinr_db
        );
        notifier.on_end_stats(&stats);
        codeword.on_end_codeword();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::channel_estimate::ChannelEstimateDimensions;
    use interfaces::resource_grid::{ResourceGrid, ResourceGridWriter};

    #[derive(Default)]
    struct Capture {
        llrs: Vec<LogLikelihoodRatio>,
        blocks: usize,
        ended: bool,
    }

    impl PuschCodewordBuffer for Capture {
        fn on_new_block(&mut self, data: &[LogLikelihoodRatio]) {
            assert!(!self.ended);
            self.llrs.extend_from_slice(data);
            self.blocks += 1;
        }

        fn on_end_codeword(&mut self) {
            self.ended = true;
        }
    }

    #[derive(Default)]
    struct StatsCapture(Option<PuschDemodulatorStats>);

    impl PuschDemodulatorNotifier for StatsCapture {
        fn on_end_stats(&mut self, stats: &PuschDemodulatorStats) {
            self.0 = Some(*stats);
        }
    }

    fn config() -> PuschDemodulatorConfig {
        let mut rb_mask = vec![false; 6];
        rb_mask[2] = true;
        rb_mask[3] = true;
        PuschDemodulatorConfig {
            rnti: 0x4601,
            rb_mask,
            modulation: ModulationScheme::Qam16,
            start_symbol_index: 0,
            nof_symbols: 14,
            dmrs_symbol_mask: SymbolMask::from_symbols(14, &[2]),
            dmrs_type: DmrsType::Type1,
            nof_cdm_groups_without_data: 2,
            n_id: 10,
            nof_tx_layers: 1,
            rx_ports: vec![0, 1],
        }
    }

    fn flat_estimate(h: &[Complex32], noise_var: f32) -> ChannelEstimate {
        let mut estimate = ChannelEstimate::new(ChannelEstimateDimensions {
            nof_prb: 6,
            nof_symbols: 14,
            nof_rx_ports: h.len(),
            nof_tx_layers: 1,
        });
        for (port, &channel) in h.iter().enumerate() {
            for symbol in 0..14 {
                estimate.symbol_estimate_mut(symbol, port, 0).fill(channel);
            }
            estimate.set_noise_variance(port, noise_var);
        }
        estimate
    }

    #[test]
    fn test_noiseless_mrc_recovers_codeword() {
        let cfg = config();
        let qm = 4;
        let nof_re = 13 * 24;
        let codeword: Vec<u8> = (0..nof_re * qm).map(|i| ((i * 7 + i / 5) % 3 == 0) as u8).collect();

        // Scramble and modulate the codeword
        let mut scrambled = codeword.clone();
        PseudoRandomGenerator::new(calculate_pusch_scrambling_cinit(cfg.rnti, cfg.n_id)).apply_xor(&mut scrambled);
        let mut symbols = vec![Complex32::zero(); nof_re];
        modulate(&mut symbols, &scrambled, cfg.modulation);

        let h = [Complex32::new(0.6, -0.2), Complex32::new(-0.1, 0.9)];
        let mut grid = ResourceGrid::new(2, 14, 6);
        let mut chunks = symbols.chunks(24);
        for symbol in (0..14).filter(|&l| l != 2) {
            let chunk = chunks.next().unwrap();
            for (port, channel) in h.iter().enumerate() {
                let faded: Vec<Complex32> = chunk.iter().map(|s| s * channel).collect();
                grid.put(port, symbol, 24, &faded).unwrap();
            }
        }

        let estimate = flat_estimate(&h, 1e-3);
        let mut capture = Capture::default();
        let mut stats = StatsCapture::default();
        PuschDemodulatorImpl::new().demodulate(&mut capture, &mut stats, &grid, &estimate, &cfg);

        assert!(capture.ended);
        assert_eq!(capture.blocks, 13);
        assert_eq!(capture.llrs.len(), codeword.len());
        for (llr, bit) in capture.llrs.iter().zip(&codeword) {
            assert_eq!(llr.hard_decision(), *bit);
        }
        let stats = stats.0.unwrap();
        assert!(stats.evm.unwrap() < 1e-3);
        assert!(stats.sinr_db.unwrap() > 25.0);
    }

    #[test]
    fn test_zero_channel_gives_erasures() {
        let cfg = config();
        let estimate = flat_estimate(&[Complex32::zero(), Complex32::zero()], 0.1);
        let grid = ResourceGrid::new(2, 14, 6);
        let mut capture = Capture::default();
        let mut stats = StatsCapture::default();
        PuschDemodulatorImpl::new().demodulate(&mut capture, &mut stats, &grid, &estimate, &cfg);

        assert!(capture.llrs.iter().all(|llr| llr.value() == 0));
        assert_eq!(stats.0, Some(PuschDemodulatorStats::default()));
    }

    #[test]
    fn test_zero_forcing_two_layers() {
        let h: [[Complex32; MAX_TX_LAYERS]; 2] = [
            [Complex32::new(1.0, 0.0), Complex32::new(0.3, 0.2), Complex32::zero(), Complex32::zero()],
            [Complex32::new(-0.2, 0.4), Complex32::new(0.9, -0.1), Complex32::zero(), Complex32::zero()],
        ];
        let x = [Complex32::new(0.7, -0.7), Complex32::new(-0.7, -0.7)];
        let y: Vec<Complex32> = h.iter().map(|row| row[0] * x[0] + row[1] * x[1]).collect();

        let mut symbols = [Complex32::zero(); 2];
        let mut noise = [0.0f32; 2];
        equalize(&mut symbols, &mut noise, &y, &h, &[0.01, 0.01]);
        for layer in 0..2 {
            assert!((symbols[layer] - x[layer]).norm() < 1e-4);
            assert!(noise[layer] > 0.0 && noise[layer].is_finite());
        }
    }

    #[test]
    fn test_singular_channel() {
        let h: [[Complex32; MAX_TX_LAYERS]; 2] = [
            [Complex32::new(1.0, 0.0), Complex32::new(1.0, 0.0), Complex32::zero(), Complex32::zero()],
            [Complex32::new(1.0, 0.0), Complex32::new(1.0, 0.0), Complex32::zero(), Complex32::zero()],
        ];
        let mut symbols = [Complex32::new(1.0, 1.0); 2];
        let mut noise = [0.0f32; 2];
        equalize(&mut symbols, &mut noise, &[Complex32::new(1.0, 0.0); 2], &h, &[0.01, 0.01]);
        assert!(noise.iter().all(|nv| nv.is_infinite()));
        assert!(symbols.iter().all(|s| s.is_zero()));
    }
}
