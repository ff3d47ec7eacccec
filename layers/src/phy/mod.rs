//! Physical Layer (PHY) Submodules
//!
//! PUSCH receive chain of the 5G NR physical layer according to
//! 3GPP TS 38.211, TS 38.212 and TS 38.214, plus the matching transmit
//! chain used to generate test signals.

pub mod channel_estimate;
pub mod dmrs_pusch_estimator;
pub mod ldpc;
pub mod ldpc_rate_matching;
pub mod ldpc_segmenter;
pub mod modulation;
pub mod notifier;
pub mod pusch_decoder;
pub mod pusch_demodulator;
pub mod pusch_modulator;
pub mod pusch_processor;
pub mod rx_softbuffer;
pub mod sequence;
pub mod uci_decoder;
pub mod ulsch_demultiplex;
pub mod ulsch_encoder;
pub mod ulsch_info;

// Re-export commonly used types
pub use channel_estimate::{ChannelEstimate, ChannelStateInformation, SinrCalcMethod};
pub use ldpc::LdpcBaseGraph;
pub use notifier::{PuschProcessorResultNotifier, PuschProcessorSchResult, PuschProcessorUciResult};
pub use pusch_decoder::PuschDecoderResult;
pub use pusch_modulator::PuschTransmitter;
pub use pusch_processor::{
    create_pusch_processor, PuschCodewordDescription, PuschPdu, PuschProcessor, PuschProcessorConfiguration,
    PuschProcessorImpl, PuschProcessorValidator, PuschUciDescription,
};
pub use rx_softbuffer::{RxSoftbuffer, RxSoftbufferPool, SoftbufferId, SoftbufferPoolConfig};
pub use sequence::DmrsType;
pub use uci_decoder::{UciFieldResult, UciStatus};
