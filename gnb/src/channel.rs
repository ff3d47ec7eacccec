//! Frequency flat AWGN channel between UE layers and gNB receive ports

use interfaces::{InterfaceError, ResourceGrid, ResourceGridReader, ResourceGridWriter};
use num_complex::Complex32;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// Receive port `p` observes layer `p % nof_layers` plus white noise
pub struct AwgnChannel {
    rng: StdRng,
    noise: Normal<f32>,
}

impl AwgnChannel {
    /// Channel with a per resource element SNR for unit power symbols
    pub fn new(snr_db: f32, seed: u64) -> anyhow::Result<Self> {
        let noise_var = 10f32.powf(-snr_db / 10.0);
        Ok(Self {
            rng: StdRng::seed_from_u64(seed),
            noise: Normal::new(0.0, (noise_var / 2.0).sqrt())?,
        })
    }

    pub fn propagate(&mut self, tx: &ResourceGrid, rx: &mut ResourceGrid) -> Result<(), InterfaceError> {
        let nof_layers = tx.nof_ports();
        let mut row = vec![Complex32::new(0.0, 0.0); tx.nof_subc()];
        for port in 0..rx.nof_ports() {
            for symbol in 0..tx.nof_symbols() {
                tx.get_range(&mut row, port % nof_layers, symbol, 0);
                for re in row.iter_mut() {
                    *re += Complex32::new(self.noise.sample(&mut self.rng), self.noise.sample(&mut self.rng));
                }
                rx.put(port, symbol, 0, &row)?;
            }
        }
        Ok(())
    }
}
