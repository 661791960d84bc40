//! WAL position helpers.
//!
//! Positions are carried as `u64` internally and shown in PostgreSQL's
//! `XXXXXXXX/XXXXXXXX` text form in logs and catalog queries.

use crate::error::{PgError, PgResult};

/// Parse an LSN from its "X/Y" text form.
pub fn parse_lsn(lsn: &str) -> PgResult<u64> {
    let invalid = || PgError::InvalidLsn(lsn.to_string());

    let (high, low) = lsn.split_once('/').ok_or_else(invalid)?;
    let high = u32::from_str_radix(high, 16).map_err(|_| invalid())?;
    let low = u32::from_str_radix(low, 16).map_err(|_| invalid())?;

    Ok((u64::from(high) << 32) | u64::from(low))
}

/// Format an LSN as "X/Y".
pub fn format_lsn(lsn: u64) -> String {
    format!("{:X}/{:X}", lsn >> 32, lsn & 0xFFFF_FFFF)
}

pub(crate) fn to_wire(lsn: u64) -> pgwire_replication::Lsn {
    pgwire_replication::Lsn::from(lsn)
}

pub(crate) fn from_wire(lsn: pgwire_replication::Lsn) -> u64 {
    lsn.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lsn() {
        assert_eq!(parse_lsn("0/0").unwrap(), 0);
        assert_eq!(parse_lsn("0/16B3748").unwrap(), 0x16B3748);
        assert_eq!(parse_lsn("2/A0").unwrap(), (2u64 << 32) + 0xA0);
    }

    #[test]
    fn test_parse_lsn_rejects_garbage() {
        assert!(parse_lsn("16B3748").is_err());
        assert!(parse_lsn("0/XYZ").is_err());
        assert!(parse_lsn("1/2/3").is_err());
        assert!(parse_lsn("").is_err());
    }

    #[test]
    fn test_format_lsn() {
        assert_eq!(format_lsn(0), "0/0");
        assert_eq!(format_lsn(0x16B3748), "0/16B3748");
        assert_eq!(format_lsn((1u64 << 32) + 0x16B3748), "1/16B3748");
    }
}
