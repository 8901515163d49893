//! Sliding L×D encoder matrix: absorbs media packets, emits row-FEC and
//! column-FEC packets to two caller-supplied sinks.

use crate::bitops::{read_u16_be, read_u32_be, xor_in_place};
use crate::error::Error;
use crate::wire::{self, FecKind};

/// Destination for an emitted FEC packet.
///
/// Implemented for any `FnMut(&[u8]) -> Result<(), Error>`, so a closure
/// writing to a socket and a `Vec`-collecting closure in a test both work
/// without a dedicated adapter type.
pub trait FecSink {
    fn send(&mut self, packet: &[u8]) -> Result<(), Error>;
}

impl<F> FecSink for F
where
    F: FnMut(&[u8]) -> Result<(), Error>,
{
    fn send(&mut self, packet: &[u8]) -> Result<(), Error> {
        self(packet)
    }
}

/// Encoder construction parameters.
#[derive(Debug, Clone, Copy)]
pub struct EncoderConfig {
    pub l: u8,
    pub d: u8,
    pub ttl: Option<u32>,
    /// Deterministic `(0, 0)` initial FEC sequence numbers instead of a
    /// random seed, mirroring `AVFMT_FLAG_BITEXACT`.
    pub bitexact: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            l: 5,
            d: 5,
            ttl: None,
            bitexact: false,
        }
    }
}

impl EncoderConfig {
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

#[derive(Debug, Clone)]
struct FecAccumulator {
    sn: u16,
    ts: u32,
    bitstring: Vec<u8>,
}

impl FecAccumulator {
    fn new(bitstring_size: usize) -> Self {
        Self {
            sn: 0,
            ts: 0,
            bitstring: vec![0u8; bitstring_size],
        }
    }

    fn init(&mut self, bitstring: &[u8], sn: u16, ts: u32) {
        self.bitstring.copy_from_slice(bitstring);
        self.sn = sn;
        self.ts = ts;
    }

    fn xor_into(&mut self, bitstring: &[u8]) {
        xor_in_place(&mut self.bitstring, bitstring);
    }
}

/// Row/column FEC encoder for one Pro-MPEG CoP#3-R2 session.
///
/// `packet_size` and `bitstring_size` are learned from the first absorbed
/// packet and fixed for the engine's lifetime; a later packet of a
/// different size is rejected with [`Error::InvalidFormat`].
pub struct Encoder<R: FecSink, C: FecSink> {
    config: EncoderConfig,
    row_sink: R,
    col_sink: C,

    packet_size: Option<usize>,
    bitstring_size: usize,

    packet_idx: usize,
    packet_idx_max: usize,
    first: bool,
    row_initialized: bool,

    fec_row: FecAccumulator,
    fec_col: Vec<FecAccumulator>,
    fec_col_tmp: Vec<FecAccumulator>,

    rtp_col_sn: u16,
    rtp_row_sn: u16,
}

impl<R: FecSink, C: FecSink> Encoder<R, C> {
    pub fn new(config: EncoderConfig, row_sink: R, col_sink: C) -> Result<Self, Error> {
        config.validate()?;
        let (rtp_col_sn, rtp_row_sn) = if config.bitexact {
            (0u16, 0u16)
        } else {
            let seed: u32 = rand::random();
            ((seed & 0x0fff) as u16, ((seed >> 16) & 0x0fff) as u16)
        };
        Ok(Self {
            config,
            row_sink,
            col_sink,
            packet_size: None,
            bitstring_size: 0,
            packet_idx: 0,
            packet_idx_max: config.l as usize * config.d as usize,
            first: true,
            row_initialized: false,
            fec_row: FecAccumulator::new(0),
            fec_col: Vec::new(),
            fec_col_tmp: Vec::new(),
            rtp_col_sn,
            rtp_row_sn,
        })
    }

    pub fn packet_size(&self) -> Option<usize> {
        self.packet_size
    }

    pub fn fec_packet_size(&self) -> Option<usize> {
        self.packet_size.map(wire::fec_packet_size)
    }

    fn ensure_initialized(&mut self, size: usize) -> Result<(), Error> {
        match self.packet_size {
            Some(sz) if sz == size => Ok(()),
            Some(sz) => Err(Error::InvalidFormat(format!(
                "packet size changed mid-stream: expected {}, got {}",
                sz, size
            ))),
            None => {
                let bitstring_size = wire::bitstring_size(size);
                self.packet_size = Some(size);
                self.bitstring_size = bitstring_size;
                self.fec_row = FecAccumulator::new(bitstring_size);
                let l = self.config.l as usize;
                self.fec_col = (0..l).map(|_| FecAccumulator::new(bitstring_size)).collect();
                self.fec_col_tmp = (0..l).map(|_| FecAccumulator::new(bitstring_size)).collect();
                Ok(())
            }
        }
    }

    /// Absorbs one media RTP packet, emitting row/column FEC packets to the
    /// sinks as the sliding matrix crosses row or column boundaries.
    pub fn absorb(&mut self, rtp_pkt: &[u8]) -> Result<(), Error> {
        wire::validate_media_header(rtp_pkt)?;
        self.ensure_initialized(rtp_pkt.len())?;

        let bitstring = wire::pack_media_bitstring(rtp_pkt)?;

        let l = self.config.l as usize;
        let d = self.config.d as usize;
        let col_idx = self.packet_idx % l;
        let row_idx = (self.packet_idx / l) % d;

        let sn = read_u16_be(rtp_pkt, 2);
        let ts = read_u32_be(rtp_pkt, 4);

        if col_idx == 0 {
            if self.row_initialized {
                self.emit_row_fec()?;
            }
            self.fec_row.init(&bitstring, sn, ts);
            self.row_initialized = true;
        } else {
            self.fec_row.xor_into(&bitstring);
        }

        if row_idx == 0 {
            if !self.first {
                std::mem::swap(&mut self.fec_col[col_idx], &mut self.fec_col_tmp[col_idx]);
            }
            self.fec_col_tmp[col_idx].init(&bitstring, sn, ts);
        } else {
            self.fec_col_tmp[col_idx].xor_into(&bitstring);
        }

        // Column-FEC send is spread over D packets per block, one per media
        // packet whose block-local index is a multiple of D.
        if !self.first && self.packet_idx % d == 0 {
            let col_out_idx = self.packet_idx / d;
            self.emit_col_fec(col_out_idx)?;
        }

        self.packet_idx += 1;
        if self.packet_idx >= self.packet_idx_max {
            self.packet_idx = 0;
            self.first = false;
        }

        Ok(())
    }

    fn emit_row_fec(&mut self) -> Result<(), Error> {
        self.rtp_row_sn = self.rtp_row_sn.wrapping_add(1);
        let packet = wire::pack_fec_packet(
            &self.fec_row.bitstring,
            self.rtp_row_sn,
            self.fec_row.sn,
            self.fec_row.ts,
            FecKind::Row,
            self.config.l,
            self.config.d,
        );
        tracing::trace!(base_sn = self.fec_row.sn, "emitting row FEC");
        self.row_sink.send(&packet)
    }

    fn emit_col_fec(&mut self, idx: usize) -> Result<(), Error> {
        self.rtp_col_sn = self.rtp_col_sn.wrapping_add(1);
        let acc = &self.fec_col[idx];
        let packet = wire::pack_fec_packet(
            &acc.bitstring,
            self.rtp_col_sn,
            acc.sn,
            acc.ts,
            FecKind::Col,
            self.config.l,
            self.config.d,
        );
        tracing::trace!(base_sn = acc.sn, "emitting column FEC");
        self.col_sink.send(&packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitops::xor;
    use crate::wire::RTP_HEADER_LEN;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn media_packet(sn: u16, ts: u32, payload_len: usize) -> Vec<u8> {
        let mut pkt = vec![0u8; RTP_HEADER_LEN + payload_len];
        pkt[0] = 0x80;
        pkt[1] = 0x21;
        pkt[2..4].copy_from_slice(&sn.to_be_bytes());
        pkt[4..8].copy_from_slice(&ts.to_be_bytes());
        for (i, b) in pkt[RTP_HEADER_LEN..].iter_mut().enumerate() {
            *b = ((sn as usize + i) & 0xFF) as u8;
        }
        pkt
    }

    fn collecting_sink() -> (Rc<RefCell<Vec<Vec<u8>>>>, impl FnMut(&[u8]) -> Result<(), Error>) {
        let store = Rc::new(RefCell::new(Vec::new()));
        let store_clone = store.clone();
        let sink = move |pkt: &[u8]| -> Result<(), Error> {
            store_clone.borrow_mut().push(pkt.to_vec());
            Ok(())
        };
        (store, sink)
    }

    #[test]
    fn rejects_invalid_matrix_shape() {
        let cfg = EncoderConfig { l: 3, d: 4, ttl: None, bitexact: true };
        assert!(cfg.validate().is_err());
        let cfg = EncoderConfig { l: 20, d: 20, ttl: None, bitexact: true };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn scenario_l4_d4_emits_four_row_and_four_col_fec() {
        let (rows, row_sink) = collecting_sink();
        let (cols, col_sink) = collecting_sink();
        let cfg = EncoderConfig { l: 4, d: 4, ttl: None, bitexact: true };
        let mut enc = Encoder::new(cfg, row_sink, col_sink).unwrap();

        let mut packets = Vec::new();
        for i in 0..16u16 {
            let sn = 1000u16.wrapping_add(i);
            let pkt = media_packet(sn, sn as u32 * 90, 52);
            packets.push(pkt.clone());
            enc.absorb(&pkt).unwrap();
        }

        assert_eq!(rows.borrow().len(), 4);
        assert_eq!(cols.borrow().len(), 4);

        let first_row = &rows.borrow()[0];
        assert_eq!(read_u16_be(first_row, 12), 1000);

        let mut expected = wire::pack_media_bitstring(&packets[0]).unwrap();
        for pkt in &packets[1..4] {
            let bs = wire::pack_media_bitstring(pkt).unwrap();
            let mut out = vec![0u8; expected.len()];
            xor(&expected, &bs, &mut out);
            expected = out;
        }
        assert_eq!(&first_row[28..], &expected[8..]);
    }

    #[test]
    fn rejects_packet_size_change_mid_stream() {
        let (_rows, row_sink) = collecting_sink();
        let (_cols, col_sink) = collecting_sink();
        let cfg = EncoderConfig { l: 4, d: 4, ttl: None, bitexact: true };
        let mut enc = Encoder::new(cfg, row_sink, col_sink).unwrap();

        enc.absorb(&media_packet(1, 90, 52)).unwrap();
        let different_size = media_packet(2, 180, 53);
        assert!(matches!(enc.absorb(&different_size), Err(Error::InvalidFormat(_))));
    }
}
