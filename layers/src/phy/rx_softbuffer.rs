//! Receive soft-combining buffers
//!
//! One [`RxSoftbuffer`] holds the state of a transport block across HARQ
//! retransmissions. The [`RxSoftbufferPool`] hands them out per RNTI and
//! HARQ process and reclaims them once they expire.

use crate::LayerError;
use common::types::{LogLikelihoodRatio, Rnti, SlotPoint};
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
struct CodeblockBuffer {
    soft_bits: Vec<LogLikelihoodRatio>,
    data_bits: Vec<u8>,
}

/// Mutable view over the storage of one codeblock
#[derive(Debug)]
pub struct CodeblockBuffers<'a> {
    /// Rate dematched soft bits, combined across transmissions
    pub soft_bits: &'a mut [LogLikelihoodRatio],
    /// Last decoded message bits
    pub data_bits: &'a mut [u8],
    /// Set once the codeblock passed its CRC
    pub crc_ok: &'a mut bool,
}

/// Soft-combining buffer of one transport block
#[derive(Debug, Clone, Default)]
pub struct RxSoftbuffer {
    codeblocks: Vec<CodeblockBuffer>,
    crc: Vec<bool>,
}

impl RxSoftbuffer {
    /// Create a buffer sized for `nof_codeblocks`
    pub fn new(nof_codeblocks: usize) -> Self {
        let mut buffer = Self::default();
        buffer.reset(nof_codeblocks);
        buffer
    }

    /// Number of codeblocks the buffer is sized for
    pub fn nof_codeblocks(&self) -> usize {
        self.crc.len()
    }

    /// Resize for a new transport block, discarding every stored bit
    pub fn reset(&mut self, nof_codeblocks: usize) {
        self.codeblocks.clear();
        self.codeblocks.resize_with(nof_codeblocks, CodeblockBuffer::default);
        self.crc.clear();
        self.crc.resize(nof_codeblocks, false);
    }

    pub fn codeblocks_crc(&self) -> &[bool] {
        &self.crc
    }

    /// Clear every codeblock CRC flag
    pub fn reset_codeblocks_crc(&mut self) {
        self.crc.fill(false);
    }

    /// Borrow the storage of codeblock `cb`
    ///
    /// Buffers are allocated zeroed on first use, or when the requested
    /// lengths change.
    pub fn codeblock(&mut self, cb: usize, soft_length: usize, data_length: usize) -> CodeblockBuffers<'_> {
        assert!(
            cb < self.codeblocks.len(),
            "Codeblock index {} exceeds the {} reserved codeblocks",
            cb,
            self.codeblocks.len()
        );
        let buffer = &mut self.codeblocks[cb];
        if buffer.soft_bits.len() != soft_length {
            buffer.soft_bits.clear();
            buffer.soft_bits.resize(soft_length, LogLikelihoodRatio::default());
        }
        if buffer.data_bits.len() != data_length {
            buffer.data_bits.clear();
            buffer.data_bits.resize(data_length, 0);
        }
        CodeblockBuffers {
            soft_bits: &mut buffer.soft_bits,
            data_bits: &mut buffer.data_bits,
            crc_ok: &mut self.crc[cb],
        }
    }
}

/// Identifies the transport block a softbuffer belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoftbufferId {
    pub rnti: Rnti,
    pub harq_id: u8,
}

/// Softbuffer pool configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftbufferPoolConfig {
    /// Maximum number of reserved buffers
    pub max_softbuffers: usize,
    /// Slots a reservation survives without being renewed
    pub expire_timeout_slots: u32,
}

impl Default for SoftbufferPoolConfig {
    fn default() -> Self {
        Self {
            max_softbuffers: 64,
            expire_timeout_slots: 100,
        }
    }
}

#[derive(Debug)]
struct PoolEntry {
    buffer: RxSoftbuffer,
    expire_count: u32,
}

/// Pool of softbuffers keyed by RNTI and HARQ process
#[derive(Debug)]
pub struct RxSoftbufferPool {
    config: SoftbufferPoolConfig,
    entries: HashMap<SoftbufferId, PoolEntry>,
}

impl RxSoftbufferPool {
    pub fn new(config: SoftbufferPoolConfig) -> Self {
        Self {
            config,
            entries: HashMap::with_capacity(config.max_softbuffers),
        }
    }

    /// Number of buffers currently reserved
    pub fn nof_reserved(&self) -> usize {
        self.entries.len()
    }

    /// Reserve the buffer of a transport block
    ///
    /// New data resets the buffer. A retransmission keeps the stored soft
    /// bits unless the number of codeblocks changed.
    pub fn reserve(
        &mut self,
        slot: SlotPoint,
        id: SoftbufferId,
        nof_codeblocks: usize,
        new_data: bool,
    ) -> Result<&mut RxSoftbuffer, LayerError> {
        let expire_count = slot.count().wrapping_add(self.config.expire_timeout_slots);

        if !self.entries.contains_key(&id) && self.entries.len() >= self.config.max_softbuffers {
            warn!("Softbuffer pool exhausted, cannot reserve {:?}", id);
            return Err(LayerError::ResourceUnavailable(format!(
                "no softbuffer available for RNTI {:#06x} HARQ {}",
                id.rnti.value(),
                id.harq_id
            )));
        }

        let entry = self.entries.entry(id).or_insert_with(|| PoolEntry {
            buffer: RxSoftbuffer::new(nof_codeblocks),
            expire_count,
        });
        if new_data || entry.buffer.nof_codeblocks() != nof_codeblocks {
            entry.buffer.reset(nof_codeblocks);
        }
        entry.expire_count = expire_count;

        debug!(
            "Reserved softbuffer {:?} with {} codeblocks until slot count {}",
            id, nof_codeblocks, expire_count
        );
        Ok(&mut entry.buffer)
    }

    /// Release a buffer, typically after a successful decode
    pub fn free(&mut self, id: SoftbufferId) {
        self.entries.remove(&id);
    }

    /// Release every buffer whose reservation expired at `slot`
    pub fn run_slot(&mut self, slot: SlotPoint) {
        let now = slot.count();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| (now.wrapping_sub(entry.expire_count) as i32) < 0);
        let expired = before - self.entries.len();
        if expired > 0 {
            debug!("Released {} expired softbuffers at slot {:?}", expired, slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::SubcarrierSpacing;

    fn id(harq_id: u8) -> SoftbufferId {
        SoftbufferId { rnti: Rnti::new(0x4601), harq_id }
    }

    #[test]
    fn test_codeblock_allocation() {
        let mut buffer = RxSoftbuffer::new(2);
        {
            let cb = buffer.codeblock(1, 100, 40);
            assert_eq!(cb.soft_bits.len(), 100);
            assert_eq!(cb.data_bits.len(), 40);
            cb.soft_bits[3] = LogLikelihoodRatio::new(7);
            *cb.crc_ok = true;
        }
        assert_eq!(buffer.codeblocks_crc(), &[false, true]);
        assert_eq!(buffer.codeblock(1, 100, 40).soft_bits[3].value(), 7);

        buffer.reset_codeblocks_crc();
        assert_eq!(buffer.codeblocks_crc(), &[false, false]);
        // Contents survive a CRC reset.
        assert_eq!(buffer.codeblock(1, 100, 40).soft_bits[3].value(), 7);
    }

    #[test]
    fn test_pool_retransmission_keeps_content() {
        let mut pool = RxSoftbufferPool::new(SoftbufferPoolConfig::default());
        let slot = SlotPoint::new(SubcarrierSpacing::Scs30, 0, 0);

        let buffer = pool.reserve(slot, id(0), 1, true).unwrap();
        buffer.codeblock(0, 10, 10).soft_bits[0] = LogLikelihoodRatio::new(5);

        let buffer = pool.reserve(slot.next(), id(0), 1, false).unwrap();
        assert_eq!(buffer.codeblock(0, 10, 10).soft_bits[0].value(), 5);

        let buffer = pool.reserve(slot.next(), id(0), 1, true).unwrap();
        assert_eq!(buffer.codeblock(0, 10, 10).soft_bits[0].value(), 0);
    }

    #[test]
    fn test_pool_exhaustion_and_free() {
        let mut pool = RxSoftbufferPool::new(SoftbufferPoolConfig {
            max_softbuffers: 1,
            expire_timeout_slots: 10,
        });
        let slot = SlotPoint::new(SubcarrierSpacing::Scs15, 3, 0);
        assert!(pool.reserve(slot, id(0), 1, true).is_ok());
        assert!(matches!(
            pool.reserve(slot, id(1), 1, true),
            Err(LayerError::ResourceUnavailable(_))
        ));
        pool.free(id(0));
        assert!(pool.reserve(slot, id(1), 1, true).is_ok());
    }

    #[test]
    fn test_pool_expiry() {
        let mut pool = RxSoftbufferPool::new(SoftbufferPoolConfig {
            max_softbuffers: 4,
            expire_timeout_slots: 2,
        });
        let mut slot = SlotPoint::new(SubcarrierSpacing::Scs15, 0, 0);
        pool.reserve(slot, id(0), 1, true).unwrap();

        slot = slot.next();
        pool.run_slot(slot);
        assert_eq!(pool.nof_reserved(), 1);

        slot = slot.next();
        pool.run_slot(slot);
        assert_eq!(pool.nof_reserved(), 0);
    }
}
