//! Three ordered packet sets keyed by RTP/FEC sequence number, plus the
//! windowed lookups `DecoderRecovery` needs to locate a covering FEC
//! packet for a given media index.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::ops::Bound;

use crate::error::Error;

/// Which of the three ordered sets a stored packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Media,
    FecRow,
    FecCol,
}

/// Ordered stores for media, row-FEC, and column-FEC packets.
///
/// Keys are compared with plain `u16` ordering, not wrap-aware sequence
/// comparison — sessions spanning more than 2^16 packets must reset the
/// engine (see the crate's design notes).
#[derive(Debug, Default)]
pub struct DecoderStore {
    media: BTreeMap<u16, Bytes>,
    fec_row: BTreeMap<u16, Bytes>,
    fec_col: BTreeMap<u16, Bytes>,
}

impl DecoderStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, kind: PacketKind) -> &BTreeMap<u16, Bytes> {
        match kind {
            PacketKind::Media => &self.media,
            PacketKind::FecRow => &self.fec_row,
            PacketKind::FecCol => &self.fec_col,
        }
    }

    fn map_mut(&mut self, kind: PacketKind) -> &mut BTreeMap<u16, Bytes> {
        match kind {
            PacketKind::Media => &mut self.media,
            PacketKind::FecRow => &mut self.fec_row,
            PacketKind::FecCol => &mut self.fec_col,
        }
    }

    /// Inserts a packet under `index`. Rejects a duplicate key with an
    /// error rather than silently discarding it — a deliberate deviation
    /// from the source implementation, which computes this error value but
    /// never returns it (see the crate's design notes).
    pub fn insert(&mut self, kind: PacketKind, index: u16, bytes: Bytes) -> Result<(), Error> {
        let map = self.map_mut(kind);
        if map.contains_key(&index) {
            return Err(Error::InvalidArgument(format!(
                "duplicate packet at index {}",
                index
            )));
        }
        map.insert(index, bytes);
        Ok(())
    }

    pub fn find(&self, kind: PacketKind, index: u16) -> Option<&Bytes> {
        self.map(kind).get(&index)
    }

    pub fn remove(&mut self, kind: PacketKind, index: u16) -> Option<Bytes> {
        self.map_mut(kind).remove(&index)
    }

    pub fn count(&self, kind: PacketKind) -> usize {
        self.map(kind).len()
    }

    /// Smallest key `k` with `min_exclusive < k < max_exclusive`.
    pub fn first_in_range(
        &self,
        kind: PacketKind,
        min_exclusive: u16,
        max_exclusive: u16,
    ) -> Option<u16> {
        self.map(kind)
            .range((Bound::Excluded(min_exclusive), Bound::Excluded(max_exclusive)))
            .next()
            .map(|(k, _)| *k)
    }

    /// Largest row-FEC base `b` with `b <= index < b + l`.
    ///
    /// Every base in `[lo, index]` automatically satisfies the upper bound
    /// too (since `b + l >= lo + l > index` by construction of `lo`), so the
    /// largest key in that range is the unique answer — matching the
    /// source's "last match encountered during an ascending walk" rule.
    pub fn row_fec_base_for(&self, index: u16, l: u8) -> Option<u16> {
        let lo = index.saturating_sub(l.saturating_sub(1) as u16);
        self.fec_row.range(lo..=index).next_back().map(|(k, _)| *k)
    }

    /// Largest column-FEC base `b` with `b + c*l == index` for some
    /// `c in [0, d)`. Candidates are tried from `c = 0` upward (largest `b`
    /// first), so the first present candidate found is already the largest.
    pub fn col_fec_base_for(&self, index: u16, l: u8, d: u8) -> Option<u16> {
        let l = l as u16;
        for c in 0..d as u16 {
            let step = c * l;
            let base = index.checked_sub(step)?;
            if self.fec_col.contains_key(&base) {
                return Some(base);
            }
        }
        None
    }

    /// Removes every entry of `kind` with `0 < index < threshold`.
    pub fn prune_below(&mut self, kind: PacketKind, threshold: u16) -> usize {
        let mut removed = 0;
        while let Some(idx) = self.first_in_range(kind, 0, threshold) {
            self.remove(kind, idx);
            removed += 1;
        }
        removed
    }
}
