//! Out-of-band helpers for the transport layer a caller wraps around this
//! core. The core never opens a socket; this module only carries the one
//! piece of validation logic CoP#3's fixed port-offset convention implies,
//! so callers don't have to re-derive it.
//!
//! CoP#3 fixes the FEC ports relative to the media port: given a media port
//! `P`, column-FEC is `P+2` and row-FEC is `P+4`. A base port therefore needs
//! four spare values above it.

use crate::error::Error;

/// Column-FEC port offset from the media base port.
pub const COL_FEC_PORT_OFFSET: u16 = 2;
/// Row-FEC port offset from the media base port.
pub const ROW_FEC_PORT_OFFSET: u16 = 4;

/// Validates a caller-supplied base UDP port against spec §6: it must leave
/// room for the `P+2` (column-FEC) and `P+4` (row-FEC) companion ports.
pub fn validate_base_port(port: u16) -> Result<(), Error> {
    if port < 1 || port > u16::MAX - ROW_FEC_PORT_OFFSET {
        return Err(Error::InvalidArgument(format!(
            "base UDP port {} out of range [1, {}]",
            port,
            u16::MAX - ROW_FEC_PORT_OFFSET
        )));
    }
    Ok(())
}

/// The three ports a CoP#3 session occupies: `(media, col_fec, row_fec)`.
pub fn session_ports(base_port: u16) -> Result<(u16, u16, u16), Error> {
    validate_base_port(base_port)?;
    Ok((
        base_port,
        base_port + COL_FEC_PORT_OFFSET,
        base_port + ROW_FEC_PORT_OFFSET,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_port_zero() {
        assert!(validate_base_port(0).is_err());
    }

    #[test]
    fn rejects_port_too_close_to_the_top_of_the_range() {
        assert!(validate_base_port(u16::MAX).is_err());
        assert!(validate_base_port(u16::MAX - ROW_FEC_PORT_OFFSET).is_ok());
    }

    #[test]
    fn session_ports_derives_the_cop3_offsets() {
        let (media, col, row) = session_ports(5000).unwrap();
        assert_eq!(media, 5000);
        assert_eq!(col, 5002);
        assert_eq!(row, 5004);
    }
}
