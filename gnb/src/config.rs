//! TOML configuration of the PUSCH link simulator
//!
//! Every section and field is optional; missing values fall back to a
//! 20 MHz, 30 kHz carrier with one single-layer UE.

use common::types::{ModulationScheme, SubcarrierSpacing};
use layers::phy::SinrCalcMethod;
use serde::{Deserialize, Serialize};

/// Main simulator configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimConfig {
    /// Seed of every random source of the run
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Number of slots to simulate
    #[serde(default = "default_slots")]
    pub slots: usize,
    #[serde(default)]
    pub carrier: CarrierConfig,
    #[serde(default)]
    pub pusch: PuschConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    /// Simulated UEs, all sharing the PUSCH configuration
    #[serde(default = "default_ues")]
    pub ues: Vec<UeConfig>,
}

fn default_seed() -> u64 {
    1
}

fn default_slots() -> usize {
    200
}

fn default_ues() -> Vec<UeConfig> {
    vec![UeConfig {
        rnti: 0x4601,
        snr_db: default_snr_db(),
    }]
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            slots: default_slots(),
            carrier: CarrierConfig::default(),
            pusch: PuschConfig::default(),
            processor: ProcessorConfig::default(),
            ues: default_ues(),
        }
    }
}

/// Carrier and receiver front end
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CarrierConfig {
    /// Subcarrier spacing in kHz
    #[serde(default = "default_scs_khz")]
    pub scs_khz: u32,
    /// Resource blocks of the carrier grid
    #[serde(default = "default_carrier_nof_rb")]
    pub nof_rb: usize,
    #[serde(default = "default_rx_ports")]
    pub rx_ports: usize,
    /// Cell identity, used for data and DM-RS scrambling
    #[serde(default = "default_pci")]
    pub pci: u16,
    /// DC subcarrier from point A
    #[serde(default)]
    pub dc_subcarrier: Option<usize>,
}

fn default_scs_khz() -> u32 {
    30
}

fn default_carrier_nof_rb() -> usize {
    51
}

fn default_rx_ports() -> usize {
    2
}

fn default_pci() -> u16 {
    1
}

impl Default for CarrierConfig {
    fn default() -> Self {
        Self {
            scs_khz: default_scs_khz(),
            nof_rb: default_carrier_nof_rb(),
            rx_ports: default_rx_ports(),
            pci: default_pci(),
            dc_subcarrier: None,
        }
    }
}

impl CarrierConfig {
    pub fn subcarrier_spacing(&self) -> anyhow::Result<SubcarrierSpacing> {
        SubcarrierSpacing::from_khz(self.scs_khz)
            .ok_or_else(|| anyhow::anyhow!("Invalid subcarrier spacing: {} kHz", self.scs_khz))
    }
}

/// PUSCH transmission parameters shared by every UE
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PuschConfig {
    #[serde(default)]
    pub bwp_start_rb: usize,
    #[serde(default = "default_carrier_nof_rb")]
    pub bwp_size_rb: usize,
    /// First allocated resource block within the BWP
    #[serde(default)]
    pub rb_start: usize,
    #[serde(default = "default_nof_rb")]
    pub nof_rb: usize,
    #[serde(default = "default_modulation")]
    pub modulation: ModulationScheme,
    /// Target code rate times 1024
    #[serde(default = "default_target_code_rate")]
    pub target_code_rate: f32,
    /// Transport block size in bytes, zero for UCI only transmissions
    #[serde(default = "default_tbs_bytes")]
    pub tbs_bytes: usize,
    #[serde(default = "default_nof_layers")]
    pub nof_layers: usize,
    #[serde(default)]
    pub start_symbol: usize,
    #[serde(default = "default_nof_symbols")]
    pub nof_symbols: usize,
    #[serde(default = "default_dmrs_symbols")]
    pub dmrs_symbols: Vec<usize>,
    #[serde(default = "default_nof_harq_ack")]
    pub nof_harq_ack: usize,
    #[serde(default = "default_nof_csi_part1")]
    pub nof_csi_part1: usize,
    #[serde(default = "default_alpha_scaling")]
    pub alpha_scaling: f32,
    #[serde(default = "default_beta_offset_harq_ack")]
    pub beta_offset_harq_ack: f32,
    #[serde(default = "default_beta_offset_csi_part1")]
    pub beta_offset_csi_part1: f32,
    /// Limited buffer rate matching size in bytes, zero when unlimited
    #[serde(default)]
    pub tbs_lbrm_bytes: usize,
    /// Retransmissions before a transport block is dropped
    #[serde(default = "default_max_retransmissions")]
    pub max_retransmissions: usize,
}

fn default_nof_rb() -> usize {
    24
}

fn default_modulation() -> ModulationScheme {
    ModulationScheme::Qpsk
}

fn default_target_code_rate() -> f32 {
    378.0
}

fn default_tbs_bytes() -> usize {
    256
}

fn default_nof_layers() -> usize {
    1
}

fn default_nof_symbols() -> usize {
    14
}

fn default_dmrs_symbols() -> Vec<usize> {
    vec![2, 11]
}

fn default_nof_harq_ack() -> usize {
    2
}

fn default_nof_csi_part1() -> usize {
    4
}

fn default_alpha_scaling() -> f32 {
    1.0
}

fn default_beta_offset_harq_ack() -> f32 {
    8.0
}

fn default_beta_offset_csi_part1() -> f32 {
    4.0
}

fn default_max_retransmissions() -> usize {
    3
}

impl Default for PuschConfig {
    fn default() -> Self {
        Self {
            bwp_start_rb: 0,
            bwp_size_rb: default_carrier_nof_rb(),
            rb_start: 0,
            nof_rb: default_nof_rb(),
            modulation: default_modulation(),
            target_code_rate: default_target_code_rate(),
            tbs_bytes: default_tbs_bytes(),
            nof_layers: default_nof_layers(),
            start_symbol: 0,
            nof_symbols: default_nof_symbols(),
            dmrs_symbols: default_dmrs_symbols(),
            nof_harq_ack: default_nof_harq_ack(),
            nof_csi_part1: default_nof_csi_part1(),
            alpha_scaling: default_alpha_scaling(),
            beta_offset_harq_ack: default_beta_offset_harq_ack(),
            beta_offset_csi_part1: default_beta_offset_csi_part1(),
            tbs_lbrm_bytes: 0,
            max_retransmissions: default_max_retransmissions(),
        }
    }
}

/// Receiver processing options
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessorConfig {
    #[serde(default = "default_ldpc_iterations")]
    pub ldpc_iterations: usize,
    #[serde(default = "default_early_stop")]
    pub early_stop: bool,
    #[serde(default)]
    pub sinr_method: SinrMethodConfig,
}

fn default_ldpc_iterations() -> usize {
    6
}

fn default_early_stop() -> bool {
    true
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            ldpc_iterations: default_ldpc_iterations(),
            early_stop: default_early_stop(),
            sinr_method: SinrMethodConfig::default(),
        }
    }
}

/// Source of the reported SINR
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SinrMethodConfig {
    #[default]
    ChannelEstimator,
    PostEqualization,
    EvmBased,
}

impl From<SinrMethodConfig> for SinrCalcMethod {
    fn from(method: SinrMethodConfig) -> Self {
        match method {
            SinrMethodConfig::ChannelEstimator => SinrCalcMethod::ChannelEstimator,
            SinrMethodConfig::PostEqualization => SinrCalcMethod::PostEqualization,
            SinrMethodConfig::EvmBased => SinrCalcMethod::EvmBased,
        }
    }
}

/// One simulated UE
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UeConfig {
    pub rnti: u16,
    /// Per resource element SNR of the AWGN channel
    #[serde(default = "default_snr_db")]
    pub snr_db: f32,
}

fn default_snr_db() -> f32 {
    10.0
}

impl SimConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let config: SimConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the PUSCH processor validator does not cover
    pub fn validate(&self) -> anyhow::Result<()> {
        self.carrier.subcarrier_spacing()?;
        if self.ues.is_empty() {
            return Err(anyhow::anyhow!("At least one UE is required"));
        }
        if self.pusch.nof_layers > self.carrier.rx_ports {
            return Err(anyhow::anyhow!(
                "{} layers cannot be separated with {} receive ports",
                self.pusch.nof_layers,
                self.carrier.rx_ports
            ));
        }
        if self.pusch.tbs_bytes == 0 && self.pusch.nof_harq_ack == 0 && self.pusch.nof_csi_part1 == 0 {
            return Err(anyhow::anyhow!("PUSCH carries neither data nor UCI"));
        }
        let mut rntis: Vec<u16> = self.ues.iter().map(|ue| ue.rnti).collect();
        rntis.sort_unstable();
        rntis.dedup();
        if rntis.len() != self.ues.len() {
            return Err(anyhow::anyhow!("Duplicated UE RNTI"));
        }
        Ok(())
    }
}
