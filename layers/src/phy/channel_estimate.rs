//! Channel estimate storage and channel state information

use common::types::NRE;
use common::utils::power_to_db;
use ndarray::{s, Array2, Array4, ArrayView1, ArrayViewMut1};
use num_complex::Complex32;

/// Maximum number of receive ports
pub const MAX_RX_PORTS: usize = 4;
/// Maximum number of transmission layers
pub const MAX_TX_LAYERS: usize = 4;

/// Dimensions of a channel estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelEstimateDimensions {
    /// Resource blocks from common resource block zero
    pub nof_prb: usize,
    pub nof_symbols: usize,
    pub nof_rx_ports: usize,
    pub nof_tx_layers: usize,
}

/// Channel coefficients and their statistics for one slot
///
/// Coefficients are stored as `[symbol, rx port, layer, subcarrier]`, with
/// subcarriers counted from point A.
#[derive(Debug, Clone)]
pub struct ChannelEstimate {
    dimensions: ChannelEstimateDimensions,
    coefficients: Array4<Complex32>,
    /// Noise variance per receive port
    noise_variance: Vec<f32>,
    /// Received energy per resource element per receive port
    epre: Vec<f32>,
    /// Reference signal received power, `[port, layer]`
    rsrp: Array2<f32>,
    /// Linear SINR, `[port, layer]`
    sinr: Array2<f32>,
}

impl ChannelEstimate {
    pub fn new(dimensions: ChannelEstimateDimensions) -> Self {
        let ChannelEstimateDimensions {
            nof_prb,
            nof_symbols,
            nof_rx_ports,
            nof_tx_layers,
        } = dimensions;
        Self {
            dimensions,
            coefficients: Array4::zeros((nof_symbols, nof_rx_ports, nof_tx_layers, nof_prb * NRE)),
            noise_variance: vec![0.0; nof_rx_ports],
            epre: vec![0.0; nof_rx_ports],
            rsrp: Array2::zeros((nof_rx_ports, nof_tx_layers)),
            sinr: Array2::zeros((nof_rx_ports, nof_tx_layers)),
        }
    }

    pub fn dimensions(&self) -> ChannelEstimateDimensions {
        self.dimensions
    }

    pub fn nof_subc(&self) -> usize {
        self.coefficients.dim().3
    }

    /// Coefficients of one symbol, port and layer
    pub fn symbol_estimate(&self, symbol: usize, port: usize, layer: usize) -> ArrayView1<'_, Complex32> {
        self.coefficients.slice(s![symbol, port, layer, ..])
    }

    pub fn symbol_estimate_mut(&mut self, symbol: usize, port: usize, layer: usize) -> ArrayViewMut1<'_, Complex32> {
        self.coefficients.slice_mut(s![symbol, port, layer, ..])
    }

    pub fn get(&self, symbol: usize, port: usize, layer: usize, subcarrier: usize) -> Complex32 {
        self.coefficients[(symbol, port, layer, subcarrier)]
    }

    /// Zero one subcarrier for every symbol, port and layer
    pub fn clear_subcarrier(&mut self, subcarrier: usize) {
        self.coefficients
            .slice_mut(s![.., .., .., subcarrier])
            .fill(Complex32::new(0.0, 0.0));
    }

    pub fn clear(&mut self) {
        self.coefficients.fill(Complex32::new(0.0, 0.0));
        self.noise_variance.fill(0.0);
        self.epre.fill(0.0);
        self.rsrp.fill(0.0);
        self.sinr.fill(0.0);
    }

    pub fn noise_variance(&self, port: usize) -> f32 {
        self.noise_variance[port]
    }

    pub fn set_noise_variance(&mut self, port: usize, value: f32) {
        self.noise_variance[port] = value;
    }

    pub fn epre(&self, port: usize) -> f32 {
        self.epre[port]
    }

    pub fn set_epre(&mut self, port: usize, value: f32) {
        self.epre[port] = value;
    }

    pub fn rsrp(&self, port: usize, layer: usize) -> f32 {
        self.rsrp[(port, layer)]
    }

    pub fn set_rsrp(&mut self, port: usize, layer: usize, value: f32) {
        self.rsrp[(port, layer)] = value;
    }

    pub fn sinr(&self, port: usize, layer: usize) -> f32 {
        self.sinr[(port, layer)]
    }

    pub fn set_sinr(&mut self, port: usize, layer: usize, value: f32) {
        self.sinr[(port, layer)] = value;
    }

    /// Per-layer SINR in dB after combining the first `nof_rx_ports` ports
    ///
    /// Returns `None` when no port reports a positive SINR.
    pub fn layer_sinr_db(&self, layer: usize, nof_rx_ports: usize) -> Option<f32> {
        let sinr: f32 = (0..nof_rx_ports).map(|port| self.sinr(port, layer)).sum();
        (sinr > 0.0).then(|| power_to_db(sinr))
    }
}

/// Source of the SINR reported in the channel state information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinrCalcMethod {
    /// DM-RS based estimate
    #[default]
    ChannelEstimator,
    /// Estimate after equalization
    PostEqualization,
    /// Derived from the error vector magnitude
    EvmBased,
}

/// Channel state information reported with every decoded field
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChannelStateInformation {
    method: SinrCalcMethod,
    sinr_ch_estimator_db: Option<f32>,
    sinr_post_eq_db: Option<f32>,
    evm: Option<f32>,
}

impl ChannelStateInformation {
    pub fn new(method: SinrCalcMethod) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn set_sinr_ch_estimator_db(&mut self, sinr_db: f32) {
        self.sinr_ch_estimator_db = Some(sinr_db);
    }

    pub fn set_sinr_post_eq_db(&mut self, sinr_db: f32) {
        self.sinr_post_eq_db = Some(sinr_db);
    }

    pub fn set_evm(&mut self, evm: f32) {
        self.evm = Some(evm);
    }

    pub fn evm(&self) -> Option<f32> {
        self.evm
    }

    pub fn sinr_ch_estimator_db(&self) -> Option<f32> {
        self.sinr_ch_estimator_db
    }

    pub fn sinr_post_eq_db(&self) -> Option<f32> {
        self.sinr_post_eq_db
    }

    /// SINR selected by the configured method
    pub fn sinr_db(&self) -> Option<f32> {
        match self.method {
            SinrCalcMethod::ChannelEstimator => self.sinr_ch_estimator_db,
            SinrCalcMethod::PostEqualization => self.sinr_post_eq_db,
            SinrCalcMethod::EvmBased => self
                .evm
                .filter(|evm| *evm > 0.0)
                .map(|evm| -20.0 * evm.log10()),
        }
    }
}
