//! PUSCH processor result notification
//!
//! The processor reports each requested field once: UL-SCH data, HARQ-ACK
//! and CSI part 1. Every report carries the channel state information of the
//! transmission, completed with the demodulator statistics.

use super::channel_estimate::ChannelStateInformation;
use super::pusch_decoder::{PuschDecoderNotifier, PuschDecoderResult};
use super::pusch_demodulator::{PuschDemodulatorNotifier, PuschDemodulatorStats};
use super::uci_decoder::{PuschUciNotifier, UciFieldResult};
use std::cell::RefCell;

/// UL-SCH decode report
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PuschProcessorSchResult {
    pub data: PuschDecoderResult,
    pub csi: ChannelStateInformation,
}

/// UCI field decode report
#[derive(Debug, Clone, PartialEq)]
pub struct PuschProcessorUciResult {
    pub field: UciFieldResult,
    pub csi: ChannelStateInformation,
}

/// Receives the decoded fields of a PUSCH transmission
pub trait PuschProcessorResultNotifier {
    fn on_sch(&mut self, result: &PuschProcessorSchResult);

    fn on_harq_ack(&mut self, result: &PuschProcessorUciResult);

    fn on_csi_part1(&mut self, result: &PuschProcessorUciResult);
}

/// Shares one result notifier between the field decoders of a transmission
pub struct PuschProcessorNotifierAdaptor<'a> {
    notifier: RefCell<&'a mut dyn PuschProcessorResultNotifier>,
    csi: RefCell<ChannelStateInformation>,
}

impl<'a> PuschProcessorNotifierAdaptor<'a> {
    pub fn new(notifier: &'a mut dyn PuschProcessorResultNotifier, csi: ChannelStateInformation) -> Self {
        Self {
            notifier: RefCell::new(notifier),
            csi: RefCell::new(csi),
        }
    }

    pub fn csi(&self) -> ChannelStateInformation {
        *self.csi.borrow()
    }

    pub fn sch_notifier(&self) -> SchNotifierAdaptor<'_, 'a> {
        SchNotifierAdaptor { adaptor: self }
    }

    pub fn harq_ack_notifier(&self) -> UciNotifierAdaptor<'_, 'a> {
        UciNotifierAdaptor {
            adaptor: self,
            field: UciField::HarqAck,
        }
    }

    pub fn csi_part1_notifier(&self) -> UciNotifierAdaptor<'_, 'a> {
        UciNotifierAdaptor {
            adaptor: self,
            field: UciField::CsiPart1,
        }
    }

    pub fn demodulator_notifier(&self) -> DemodulatorNotifierAdaptor<'_, 'a> {
        DemodulatorNotifierAdaptor { adaptor: self }
    }
}

pub struct SchNotifierAdaptor<'s, 'a> {
    adaptor: &'s PuschProcessorNotifierAdaptor<'a>,
}

impl PuschDecoderNotifier for SchNotifierAdaptor<'_, '_> {
    fn on_sch_data(&mut self, result: &PuschDecoderResult) {
        let report = PuschProcessorSchResult {
            data: *result,
            csi: self.adaptor.csi(),
        };
        self.adaptor.notifier.borrow_mut().on_sch(&report);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UciField {
    HarqAck,
    CsiPart1,
}

pub struct UciNotifierAdaptor<'s, 'a> {
    adaptor: &'s PuschProcessorNotifierAdaptor<'a>,
    field: UciField,
}

impl PuschUciNotifier for UciNotifierAdaptor<'_, '_> {
    fn on_uci_field(&mut self, field: &UciFieldResult) {
        let report = PuschProcessorUciResult {
            field: field.clone(),
            csi: self.adaptor.csi(),
        };
        let mut notifier = self.adaptor.notifier.borrow_mut();
        match self.field {
            UciField::HarqAck => notifier.on_harq_ack(&report),
            UciField::CsiPart1 => notifier.on_csi_part1(&report),
        }
    }
}

pub struct DemodulatorNotifierAdaptor<'s, 'a> {
    adaptor: &'s PuschProcessorNotifierAdaptor<'a>,
}

impl PuschDemodulatorNotifier for DemodulatorNotifierAdaptor<'_, '_> {
    fn on_end_stats(&mut self, stats: &PuschDemodulatorStats) {
        let mut csi = self.adaptor.csi.borrow_mut();
        if let Some(evm) = stats.evm {
            csi.set_evm(evm);
        }
        if let Some(sinr_db) = stats.sinr_db {
            csi.set_sinr_post_eq_db(sinr_db);
        }
    }
}
