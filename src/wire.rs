//! # Wire formats
//!
//! RTP media header shape, the 8-byte-header "bitstring" recovery unit, and
//! the 28-byte CoP#3-R2 FEC packet header. All field offsets below mirror
//! §3/§6 of the FEC matrix layout this engine implements.
//!
//! ```text
//! On-wire FEC packet (28 + N bytes, big-endian):
//!  0  V=2,P=0 | bitstring[0]&0x3F
//!  1  M | PT=0x60
//!  2  FEC stream sequence number (u16)
//!  4  TS of first protected packet (u32)
//!  8  SSRC = 0 (u32)
//! 12  SNBase low 16 bits (u16)
//! 14  Length recovery (u16)
//! 16  E=1 | PT-recovery
//! 17  Mask = 0 (3 bytes)
//! 20  TS recovery (u32)
//! 24  D bit: 0x00 COL / 0x40 ROW
//! 25  offset: L (COL) / 1 (ROW)
//! 26  NA: D (COL) / L (ROW)
//! 27  SNBase ext = 0
//! 28  XOR-accumulated payload, N = packet_size - 12
//! ```

use crate::bitops::{read_u16_be, read_u32_be, write_u16_be, write_u32_be};
use crate::error::Error;

/// Size of the RTP header preceding the media payload.
pub const RTP_HEADER_LEN: usize = 12;
/// Size of the bitstring header (before the copied payload).
pub const BITSTRING_HEADER_LEN: usize = 8;
/// Size of the on-wire FEC packet header (before the copied payload).
pub const FEC_HEADER_LEN: usize = 28;

/// Which direction a FEC packet protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FecKind {
    Row,
    Col,
}

/// `bitstring_size` for a session with the given media `packet_size`.
#[inline]
pub fn bitstring_size(packet_size: usize) -> usize {
    BITSTRING_HEADER_LEN + (packet_size - RTP_HEADER_LEN)
}

/// `fec_packet_size` for a session with the given media `packet_size`.
#[inline]
pub fn fec_packet_size(packet_size: usize) -> usize {
    FEC_HEADER_LEN + (packet_size - RTP_HEADER_LEN)
}

/// Checks the strict incoming media shape: `V=2, P=0, X, CC` free, and
/// `PT=0x21` (MPEG-TS). Does not check size beyond the 12-byte RTP header.
pub fn validate_media_header(buf: &[u8]) -> Result<(), Error> {
    if buf.len() < RTP_HEADER_LEN {
        return Err(Error::InvalidFormat(format!(
            "media packet shorter than RTP header: {} bytes",
            buf.len()
        )));
    }
    if buf[0] & 0xC0 != 0x80 {
        return Err(Error::InvalidFormat(
            "expected RTP V=2, P=0 in first header byte".into(),
        ));
    }
    if buf[1] & 0x7F != 0x21 {
        return Err(Error::InvalidFormat(
            "expected MPEG-TS payload type (0x21)".into(),
        ));
    }
    Ok(())
}

/// Writes the 8-byte-header bitstring for a media packet into `dst`,
/// resizing it to `bitstring_size(rtp_pkt.len())`.
pub fn pack_media_bitstring_into(dst: &mut Vec<u8>, rtp_pkt: &[u8]) -> Result<(), Error> {
    if rtp_pkt.len() < RTP_HEADER_LEN {
        return Err(Error::InvalidFormat(format!(
            "media packet shorter than RTP header: {} bytes",
            rtp_pkt.len()
        )));
    }
    let payload_len = rtp_pkt.len() - RTP_HEADER_LEN;
    dst.clear();
    dst.resize(BITSTRING_HEADER_LEN + payload_len, 0);
    dst[0] = rtp_pkt[0] & 0x3F;
    dst[1] = rtp_pkt[1];
    dst[2..6].copy_from_slice(&rtp_pkt[4..8]);
    write_u16_be(dst, 6, payload_len as u16);
    dst[8..].copy_from_slice(&rtp_pkt[RTP_HEADER_LEN..]);
    Ok(())
}

/// Allocating convenience wrapper around [`pack_media_bitstring_into`].
pub fn pack_media_bitstring(rtp_pkt: &[u8]) -> Result<Vec<u8>, Error> {
    let mut dst = Vec::new();
    pack_media_bitstring_into(&mut dst, rtp_pkt)?;
    Ok(dst)
}

/// Extracts the bitstring carried by an arriving on-wire FEC packet into
/// `dst`, resizing it to `bitstring_size(packet_size)`.
///
/// Note the asymmetry with [`pack_media_bitstring_into`]: byte 1 here is
/// masked to 6 bits (the PT-recovery field strips the M bit), whereas a
/// media bitstring's byte 1 carries the full M|PT byte. A bitstring
/// recovered by XORing a FEC bitstring against media bitstrings therefore
/// does not carry a trustworthy M bit — callers must supply one from a
/// sibling packet when reconstructing media (`restore_media`).
pub fn pack_fec_bitstring_into(
    dst: &mut Vec<u8>,
    fec_pkt: &[u8],
    packet_size: usize,
) -> Result<(), Error> {
    let expected = fec_packet_size(packet_size);
    if fec_pkt.len() != expected {
        return Err(Error::InvalidFormat(format!(
            "FEC packet size {} does not match expected {}",
            fec_pkt.len(),
            expected
        )));
    }
    let payload_len = packet_size - RTP_HEADER_LEN;
    dst.clear();
    dst.resize(BITSTRING_HEADER_LEN + payload_len, 0);
    dst[0] = fec_pkt[0] & 0x3F;
    dst[1] = fec_pkt[16] & 0x3F;
    dst[2..6].copy_from_slice(&fec_pkt[20..24]);
    dst[6..8].copy_from_slice(&fec_pkt[14..16]);
    dst[8..].copy_from_slice(&fec_pkt[FEC_HEADER_LEN..]);
    Ok(())
}

/// Allocating convenience wrapper around [`pack_fec_bitstring_into`].
pub fn pack_fec_bitstring(fec_pkt: &[u8], packet_size: usize) -> Result<Vec<u8>, Error> {
    let mut dst = Vec::new();
    pack_fec_bitstring_into(&mut dst, fec_pkt, packet_size)?;
    Ok(dst)
}

/// Reads the SNBase (low 16 bits) carried by an on-wire FEC packet — the
/// key a FEC packet is stored under in the decoder's ordered sets.
#[inline]
pub fn fec_packet_snbase(fec_pkt: &[u8]) -> u16 {
    read_u16_be(fec_pkt, 12)
}

/// Whether an on-wire FEC packet is a row (true) or column (false) packet,
/// per the D bit at offset 24.
#[inline]
pub fn fec_packet_is_row(fec_pkt: &[u8]) -> bool {
    fec_pkt[24] & 0x40 != 0
}

/// Emits the 28-byte-header on-wire FEC packet for an accumulator whose
/// running XOR is `bitstring`, protecting a row/column starting at RTP
/// sequence `base_sn` with first-packet timestamp `ts`. `fec_sn` is this
/// FEC stream's own monotonic sequence number.
pub fn pack_fec_packet(
    bitstring: &[u8],
    fec_sn: u16,
    base_sn: u16,
    ts: u32,
    kind: FecKind,
    l: u8,
    d: u8,
) -> Vec<u8> {
    let payload_len = bitstring.len() - BITSTRING_HEADER_LEN;
    let mut out = vec![0u8; FEC_HEADER_LEN + payload_len];

    out[0] = 0x80 | (bitstring[0] & 0x3F);
    out[1] = (bitstring[1] & 0x80) | 0x60;
    write_u16_be(&mut out, 2, fec_sn);
    write_u32_be(&mut out, 4, ts);
    write_u32_be(&mut out, 8, 0); // SSRC = 0
    write_u16_be(&mut out, 12, base_sn);
    out[14..16].copy_from_slice(&bitstring[6..8]); // length recovery
    out[16] = 0x80 | bitstring[1]; // E=1, PT-recovery
    out[17..20].copy_from_slice(&[0, 0, 0]); // mask
    out[20..24].copy_from_slice(&bitstring[2..6]); // TS recovery

    match kind {
        FecKind::Col => {
            out[24] = 0x00;
            out[25] = l;
            out[26] = d;
        }
        FecKind::Row => {
            out[24] = 0x40;
            out[25] = 1;
            out[26] = l;
        }
    }
    out[27] = 0;
    out[28..].copy_from_slice(&bitstring[BITSTRING_HEADER_LEN..]);
    out
}

/// Rebuilds a `packet_size`-byte media RTP packet from a recovered
/// bitstring, with the M bit and SSRC inherited from a sibling packet in
/// the same row or column, and a target sequence number.
///
/// Note: byte 1 is `bitstring[1] | (m_bit << 7)`, not a masked-then-OR'd
/// value — matching the source's `buf[1] | (m << 7)` exactly. Whatever
/// XOR-accumulated bit happens to sit in `bitstring[1]`'s top bit survives
/// unless `m_bit` sets it; this crate preserves that rather than normalizing
/// it, since the source does not mask it either.
pub fn restore_media(bitstring: &[u8], m_bit: bool, ssrc: u32, index: u16, packet_size: usize) -> Vec<u8> {
    let mut out = vec![0u8; packet_size];
    out[0] = 0x80 | (bitstring[0] & 0x3F);
    out[1] = bitstring[1] | (if m_bit { 0x80 } else { 0x00 });
    write_u16_be(&mut out, 2, index);
    out[4..8].copy_from_slice(&bitstring[2..6]);
    write_u32_be(&mut out, 8, ssrc);
    out[RTP_HEADER_LEN..].copy_from_slice(&bitstring[BITSTRING_HEADER_LEN..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn make_media(sn: u16, ts: u32, ssrc: u32, m: bool, payload: &[u8]) -> Vec<u8> {
        let mut pkt = vec![0u8; RTP_HEADER_LEN + payload.len()];
        pkt[0] = 0x80;
        pkt[1] = 0x21 | if m { 0x80 } else { 0 };
        write_u16_be(&mut pkt, 2, sn);
        write_u32_be(&mut pkt, 4, ts);
        write_u32_be(&mut pkt, 8, ssrc);
        pkt[RTP_HEADER_LEN..].copy_from_slice(payload);
        pkt
    }

    #[test]
    fn validate_rejects_bad_version() {
        let mut pkt = make_media(1, 1, 1, false, b"x");
        pkt[0] = 0x00;
        assert!(validate_media_header(&pkt).is_err());
    }

    #[test]
    fn validate_rejects_bad_pt() {
        let mut pkt = make_media(1, 1, 1, false, b"x");
        pkt[1] = 0x22;
        assert!(validate_media_header(&pkt).is_err());
    }

    #[test]
    fn validate_accepts_good_header() {
        let pkt = make_media(1, 1, 1, true, b"hello");
        assert!(validate_media_header(&pkt).is_ok());
    }

    #[test]
    fn media_bitstring_layout() {
        let payload = b"payload-bytes";
        let pkt = make_media(1000, 90000, 0xdead_beef, true, payload);
        let bs = pack_media_bitstring(&pkt).unwrap();
        assert_eq!(bs.len(), BITSTRING_HEADER_LEN + payload.len());
        assert_eq!(bs[0], pkt[0] & 0x3F);
        assert_eq!(bs[1], pkt[1]);
        assert_eq!(&bs[2..6], &pkt[4..8]);
        assert_eq!(read_u16_be(&bs, 6), payload.len() as u16);
        assert_eq!(&bs[8..], &payload[..]);
    }

    #[test]
    fn fec_packet_roundtrip_fields() {
        let payload = b"0123456789ab";
        let pkt = make_media(1000, 90000, 0, true, payload);
        let bs = pack_media_bitstring(&pkt).unwrap();
        let fec = pack_fec_packet(&bs, 42, 1000, 90000, FecKind::Row, 4, 4);
        assert_eq!(fec_packet_snbase(&fec), 1000);
        assert!(fec_packet_is_row(&fec));
        assert_eq!(read_u16_be(&fec, 2), 42);
        assert_eq!(read_u32_be(&fec, 4), 90000);
        assert_eq!(read_u32_be(&fec, 8), 0);
        assert_eq!(fec[25], 1);
        assert_eq!(fec[26], 4);

        let extracted = pack_fec_bitstring(&fec, pkt.len()).unwrap();
        assert_eq!(extracted.len(), bs.len());
        assert_eq!(&extracted[8..], &bs[8..]); // payload survives exactly
        assert_eq!(&extracted[2..6], &bs[2..6]); // ts survives exactly
    }

    #[test]
    fn restore_media_reproduces_payload_and_header_fields() {
        let payload = b"abcdefgh";
        let pkt = make_media(777, 123456, 0x1234, true, payload);
        let bs = pack_media_bitstring(&pkt).unwrap();
        let restored = restore_media(&bs, true, 0x1234, 777, pkt.len());
        assert_eq!(restored, pkt);
    }

    proptest! {
        #[test]
        fn proptest_media_bitstring_roundtrip_payload(
            sn in any::<u16>(), ts in any::<u32>(), ssrc in any::<u32>(), m in any::<bool>(),
            payload in prop::collection::vec(any::<u8>(), 0..64),
        ) {
            let pkt = make_media(sn, ts, ssrc, m, &payload);
            let bs = pack_media_bitstring(&pkt).unwrap();
            let restored = restore_media(&bs, m, ssrc, sn, pkt.len());
            prop_assert_eq!(restored, pkt);
        }
    }
}
