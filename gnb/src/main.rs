//! Albor Space PUSCH Link Simulator
//!
//! Drives the gNB PUSCH processor with UEs transmitting over AWGN channels
//! and reports block error rates and UCI detection per UE.

mod channel;
mod config;
mod sim;

use anyhow::Result;
use clap::Parser;
use common::types::SlotPoint;
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::SimConfig;
use crate::sim::{UeSimulator, UeStats};

/// Albor Space PUSCH link simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file, defaults are used when absent
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Number of slots to simulate, overrides the configuration file
    #[arg(long)]
    slots: Option<usize>,

    /// Print the summary as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct UeSummary {
    #[serde(flatten)]
    stats: UeStats,
    bler: f32,
    residual_bler: f32,
    mean_sinr_db: Option<f32>,
}

#[derive(Serialize)]
struct SimSummary {
    slots: usize,
    ues: Vec<UeSummary>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Albor Space PUSCH link simulator");

    let mut config = match &args.config {
        Some(path) => {
            info!("Configuration file: {}", path);
            SimConfig::from_toml_file(path)?
        }
        None => {
            warn!("No configuration file, using defaults");
            SimConfig::default()
        }
    };
    if let Some(slots) = args.slots {
        config.slots = slots;
    }
    config.validate()?;

    let pusch = &config.pusch;
    info!("Simulation configuration:");
    info!("  Slots: {}, seed: {}", config.slots, config.seed);
    info!(
        "  Carrier: {} kHz, {} RB, {} RX ports",
        config.carrier.scs_khz, config.carrier.nof_rb, config.carrier.rx_ports
    );
    info!(
        "  PUSCH: {:?}, R={}/1024, TBS={} bytes, {} RB, {} layers",
        pusch.modulation, pusch.target_code_rate, pusch.tbs_bytes, pusch.nof_rb, pusch.nof_layers
    );
    info!(
        "  UCI: {} HARQ-ACK bits, {} CSI part 1 bits",
        pusch.nof_harq_ack, pusch.nof_csi_part1
    );

    let mut ues = config
        .ues
        .iter()
        .enumerate()
        .map(|(i, ue)| UeSimulator::new(&config, ue, config.seed.wrapping_add(i as u64)))
        .collect::<Result<Vec<_>>>()?;
    info!("{} UEs initialized", ues.len());

    let scs = config.carrier.subcarrier_spacing()?;
    let mut slot = SlotPoint::new(scs, 0, 0);
    for n in 0..config.slots {
        // One blocking worker per UE, the processors are independent
        let workers = ues.into_iter().map(|mut ue| {
            tokio::task::spawn_blocking(move || -> Result<UeSimulator> {
                ue.run_slot(slot)?;
                Ok(ue)
            })
        });
        ues = join_all(workers)
            .await
            .into_iter()
            .map(|joined| joined.map_err(anyhow::Error::from).and_then(|ue| ue))
            .collect::<Result<Vec<_>>>()?;

        if (n + 1) % usize::from(scs.slots_per_frame()) == 0 {
            info!("Frame {} done", slot.sfn);
        }
        slot = slot.next();
    }

    let summary = SimSummary {
        slots: config.slots,
        ues: ues
            .iter()
            .map(|ue| {
                let stats = ue.stats().clone();
                UeSummary {
                    bler: stats.bler(),
                    residual_bler: stats.residual_bler(),
                    mean_sinr_db: stats.mean_sinr_db(),
                    stats,
                }
            })
            .collect(),
    };

    info!("Results:");
    for ue in &summary.ues {
        info!(
            "  UE {:#06x} at {:.1} dB: BLER {:.4}, residual BLER {:.4}, SINR {}",
            ue.stats.rnti,
            ue.stats.snr_db,
            ue.bler,
            ue.residual_bler,
            ue.mean_sinr_db.map_or("n/a".to_string(), |sinr| format!("{:.1} dB", sinr))
        );
        info!(
            "    HARQ-ACK errors {}/{}, CSI part 1 errors {}/{}",
            ue.stats.nof_harq_ack_errors, ue.stats.nof_harq_ack, ue.stats.nof_csi_part1_errors, ue.stats.nof_csi_part1
        );
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    info!("Simulation complete");
    Ok(())
}
