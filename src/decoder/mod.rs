//! Decoder-side recovery: windowed indexing, single-FEC restoration, and
//! the iterative 2-D matrix restorer over the three ordered packet sets.

pub mod store;

use bytes::Bytes;

use crate::bitops::{read_u16_be, read_u32_be, xor_in_place};
use crate::error::Error;
use crate::wire;
pub use store::PacketKind;
use store::DecoderStore;

/// Decoder construction parameters, independent of the session's
/// `packet_size` (learned from `Decoder::new`'s explicit argument instead
/// of from the first packet, since the decoder has no "first write"
/// moment to infer it from).
#[derive(Debug, Clone, Copy)]
pub struct DecoderConfig {
    pub l: u8,
    pub d: u8,
    pub min_packets: u32,
    pub max_packets: u32,
    pub max_packet_gap: u32,
    pub max_fec_packets: u32,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            l: 5,
            d: 5,
            min_packets: 8,
            max_packets: 50,
            max_packet_gap: 60,
            max_fec_packets: 60,
        }
    }
}

impl DecoderConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if !(4..=20).contains(&self.l) || !(4..=20).contains(&self.d) {
            return Err(Error::InvalidArgument(format!(
                "L and D must each be in [4,20], got L={} D={}",
                self.l, self.d
            )));
        }
        if (self.l as u32) * (self.d as u32) > 100 {
            return Err(Error::InvalidArgument(format!(
                "L*D must be <= 100, got {}",
                self.l as u32 * self.d as u32
            )));
        }
        Ok(())
    }
}

/// Decoder-side FEC recovery engine for one Pro-MPEG CoP#3-R2 session.
pub struct Decoder {
    config: DecoderConfig,
    packet_size: usize,
    bitstring_size: usize,
    fec_packet_size: usize,

    store: DecoderStore,

    next_index: u16,
    first_fec_packet_index: u16,
    pending_packets: u32,
    restored_packets: u64,
    failed_packets: u64,

    next_fec_row: Option<Bytes>,
    next_fec_col: Option<Bytes>,

    scratch_bitstring: Vec<u8>,
    tmp_bitstring: Vec<u8>,
    restore_slots: Vec<Option<Bytes>>,
}

impl Decoder {
    pub fn new(config: DecoderConfig, packet_size: usize) -> Result<Self, Error> {
        config.validate()?;
        let bitstring_size = wire::bitstring_size(packet_size);
        let fec_packet_size = wire::fec_packet_size(packet_size);
        let slots = config.l.max(config.d) as usize;
        Ok(Self {
            config,
            packet_size,
            bitstring_size,
            fec_packet_size,
            store: DecoderStore::new(),
            next_index: 0,
            first_fec_packet_index: 0,
            pending_packets: 0,
            restored_packets: 0,
            failed_packets: 0,
            next_fec_row: None,
            next_fec_col: None,
            scratch_bitstring: vec![0u8; bitstring_size],
            tmp_bitstring: vec![0u8; bitstring_size],
            restore_slots: vec![None; slots],
        })
    }

    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    pub fn restored_packets(&self) -> u64 {
        self.restored_packets
    }

    pub fn failed_packets(&self) -> u64 {
        self.failed_packets
    }

    pub fn next_index(&self) -> u16 {
        self.next_index
    }

    pub fn first_fec_packet_index(&self) -> u16 {
        self.first_fec_packet_index
    }

    pub fn media_count(&self) -> usize {
        self.store.count(PacketKind::Media)
    }

    pub fn fec_row_count(&self) -> usize {
        self.store.count(PacketKind::FecRow)
    }

    pub fn fec_col_count(&self) -> usize {
        self.store.count(PacketKind::FecCol)
    }

    fn restored_ratio(&self) -> f64 {
        if self.restored_packets == 0 {
            return -1.0;
        }
        self.restored_packets as f64 / (self.restored_packets + self.failed_packets) as f64 * 100.0
    }

    /// Ingests one media or FEC packet. Rejects a wrong-sized packet with
    /// `InvalidFormat`; all other rejections (outside the active window, or
    /// a FEC set already at capacity) are silent, logged at debug level.
    pub fn add_packet(&mut self, kind: PacketKind, raw: Bytes) -> Result<(), Error> {
        let expected_len = match kind {
            PacketKind::Media => self.packet_size,
            PacketKind::FecRow | PacketKind::FecCol => self.fec_packet_size,
        };
        if raw.len() != expected_len {
            return Err(Error::InvalidFormat(format!(
                "packet of kind {:?} has length {}, expected {}",
                kind,
                raw.len(),
                expected_len
            )));
        }

        let index = match kind {
            PacketKind::Media => read_u16_be(&raw, 2),
            PacketKind::FecRow | PacketKind::FecCol => wire::fec_packet_snbase(&raw),
        };

        if index <= self.first_fec_packet_index {
            tracing::debug!(index, "packet outside the active decode window, dropping");
            return Ok(());
        }

        match kind {
            PacketKind::FecRow => {
                if self.store.count(PacketKind::FecRow) >= self.config.max_fec_packets as usize {
                    tracing::debug!("reached maximum of FEC row packets, dropping new packet");
                    return Ok(());
                }
            }
            PacketKind::FecCol => {
                if self.store.count(PacketKind::FecCol) >= self.config.max_fec_packets as usize {
                    tracing::debug!("reached maximum of FEC col packets, dropping new packet");
                    return Ok(());
                }
            }
            PacketKind::Media => {
                if self.pending_packets == 0 {
                    self.pending_packets = 1;
                }
                if self.next_index == 0
                    || (self.store.count(PacketKind::Media) < self.config.min_packets as usize
                        && self.next_index <= index)
                {
                    self.next_index = index;
                }
            }
        }

        self.store.insert(kind, index, raw)
    }

    fn populate_fec_data(&mut self) {
        if self.next_fec_row.is_none() {
            if let Some(base) = self.store.row_fec_base_for(self.next_index, self.config.l) {
                self.next_fec_row = self.store.find(PacketKind::FecRow, base).cloned();
            }
        }
        if self.next_fec_col.is_none() {
            if let Some(base) =
                self.store.col_fec_base_for(self.next_index, self.config.l, self.config.d)
            {
                self.next_fec_col = self.store.find(PacketKind::FecCol, base).cloned();
            }
        }

        self.first_fec_packet_index = match (&self.next_fec_row, &self.next_fec_col) {
            (Some(row), Some(col)) => {
                let row_base = wire::fec_packet_snbase(row);
                let col_base = wire::fec_packet_snbase(col);
                col_base.wrapping_sub(self.next_index).wrapping_add(row_base)
            }
            _ => self
                .next_index
                .wrapping_sub(self.config.l as u16 * self.config.d as u16),
        };
    }

    /// Restores the single packet missing from an L-wide row or a D-tall
    /// column, given the FEC packet covering it. Returns the restored
    /// index, or `None` if zero or more than one sibling is missing.
    fn restore_generic(
        &mut self,
        base: u16,
        stride: u16,
        count: u8,
        fec_bytes: &Bytes,
        is_row: bool,
    ) -> Option<u16> {
        let count = count as usize;
        let mut present = 0usize;
        let mut missing_index = 0u16;

        for i in 0..count {
            let index = base.wrapping_add(stride.wrapping_mul(i as u16));
            let found = self.store.find(PacketKind::Media, index).cloned();
            if found.is_some() {
                present += 1;
            } else {
                missing_index = index;
            }
            self.restore_slots[i] = found;
        }

        if present != count - 1 {
            return None;
        }

        wire::pack_fec_bitstring_into(&mut self.scratch_bitstring, fec_bytes, self.packet_size)
            .ok()?;

        let mut m_bit = false;
        let mut ssrc = 0u32;
        let mut first = true;
        for slot in self.restore_slots[..count].iter() {
            if let Some(bytes) = slot {
                if first {
                    m_bit = bytes[1] & 0x80 != 0;
                    ssrc = read_u32_be(bytes, 8);
                    first = false;
                }
                wire::pack_media_bitstring_into(&mut self.tmp_bitstring, bytes).ok()?;
                xor_in_place(&mut self.scratch_bitstring, &self.tmp_bitstring);
            }
        }

        let restored = wire::restore_media(
            &self.scratch_bitstring,
            m_bit,
            ssrc,
            missing_index,
            self.packet_size,
        );
        self.store
            .insert(PacketKind::Media, missing_index, Bytes::from(restored))
            .ok()?;

        self.restored_packets += 1;
        self.pending_packets += 1;

        tracing::info!(
            index = missing_index,
            via = if is_row { "row" } else { "col" },
            "restored lost packet"
        );
        tracing::trace!(ratio = self.restored_ratio(), "restored ratio");

        Some(missing_index)
    }

    fn restore_row(&mut self, fec_row: &Bytes) -> Option<u16> {
        let base = wire::fec_packet_snbase(fec_row);
        self.restore_generic(base, 1, self.config.l, fec_row, true)
    }

    fn restore_col(&mut self, fec_col: &Bytes) -> Option<u16> {
        let base = wire::fec_packet_snbase(fec_col);
        self.restore_generic(base, self.config.l as u16, self.config.d, fec_col, false)
    }

    /// Iterative row/column restoration across the whole window, converging
    /// when every unknown is pinned by either its row or its column parity.
    fn restore_matrix(&mut self) -> bool {
        loop {
            let mut restored_this_pass = 0;

            for i in 0..self.config.d as u16 {
                let base = self
                    .first_fec_packet_index
                    .wrapping_add(i.wrapping_mul(self.config.l as u16));
                if let Some(fec) = self.store.find(PacketKind::FecRow, base).cloned() {
                    if let Some(idx) = self.restore_row(&fec) {
                        if idx == self.next_index {
                            return true;
                        }
                        restored_this_pass += 1;
                    }
                }
            }

            for i in 0..self.config.l as u16 {
                let base = self.first_fec_packet_index.wrapping_add(i);
                if let Some(fec) = self.store.find(PacketKind::FecCol, base).cloned() {
                    if let Some(idx) = self.restore_col(&fec) {
                        if idx == self.next_index {
                            return true;
                        }
                        restored_this_pass += 1;
                    }
                }
            }

            if restored_this_pass == 0 {
                return false;
            }
        }
    }

    fn get_next_packet(&mut self) -> Option<Bytes> {
        if let Some(bytes) = self.store.find(PacketKind::Media, self.next_index) {
            return Some(bytes.clone());
        }

        self.populate_fec_data();

        let mut restored = false;
        if let Some(row) = self.next_fec_row.clone() {
            restored = self.restore_row(&row).is_some();
        }
        if !restored {
            if let Some(col) = self.next_fec_col.clone() {
                restored = self.restore_col(&col).is_some();
            }
        }
        if !restored && self.next_fec_row.is_some() && self.next_fec_col.is_some() {
            restored = self.restore_matrix();
        }

        if !restored {
            return None;
        }
        self.store.find(PacketKind::Media, self.next_index).cloned()
    }

    fn return_packet(&mut self, bytes: &Bytes, out: &mut [u8]) {
        out[..bytes.len()].copy_from_slice(bytes);
        let index = read_u16_be(bytes, 2);
        self.next_index = index.wrapping_add(1);
        self.next_fec_row = None;
        self.next_fec_col = None;
        self.pending_packets = self.pending_packets.saturating_sub(1);
        self.populate_fec_data();

        let threshold = self.first_fec_packet_index;
        self.store.prune_below(PacketKind::Media, threshold);
        self.store.prune_below(PacketKind::FecRow, threshold);
        self.store.prune_below(PacketKind::FecCol, threshold);
    }

    /// Produces the next media packet in sequence into `out`, restoring it
    /// via FEC if necessary. Returns the number of bytes written
    /// (`packet_size`), `WouldBlock` if nothing can be emitted yet, or
    /// `InvalidArgument` if `out` is smaller than `packet_size`.
    pub fn read_packet(&mut self, out: &mut [u8]) -> Result<usize, Error> {
        if out.len() < self.packet_size {
            return Err(Error::InvalidArgument(format!(
                "output buffer of {} bytes is smaller than packet_size {}",
                out.len(),
                self.packet_size
            )));
        }
        if self.pending_packets == 0
            || self.store.count(PacketKind::Media) < self.config.min_packets as usize
        {
            return Err(Error::WouldBlock);
        }

        if let Some(bytes) = self.get_next_packet() {
            self.return_packet(&bytes, out);
            return Ok(self.packet_size);
        }

        if self.store.count(PacketKind::Media) < self.config.max_packets as usize {
            return Err(Error::WouldBlock);
        }

        match self.store.first_in_range(PacketKind::Media, self.next_index, u16::MAX) {
            Some(idx) => {
                self.failed_packets += 1;
                tracing::error!(index = self.next_index, "could not restore lost packet");
                tracing::trace!(ratio = self.restored_ratio(), "restored ratio after forced drop");
                let bytes = self
                    .store
                    .find(PacketKind::Media, idx)
                    .expect("index returned by first_in_range must exist")
                    .clone();
                self.return_packet(&bytes, out);
                Ok(self.packet_size)
            }
            None => Err(Error::WouldBlock),
        }
    }
}
