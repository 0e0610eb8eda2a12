// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change sequence numbers.
//!
//! A CSN is written as 20 hex digits:
//!
//! ```text
//! 5f3a1b2c 0001 0003 0000
//! ───┬──── ──┬─ ──┬─ ──┬─
//!    │       │    │    └── sub-sequence
//!    │       │    └─────── replica ID
//!    │       └──────────── sequence within the second
//!    └──────────────────── timestamp (seconds since epoch)
//! ```
//!
//! CSNs are generated by the nodes; this crate only parses and compares them.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CsnParseError {
    #[error("CSN must be 20 hex digits, got {0}")]
    Length(usize),
    #[error("CSN contains non-hex characters: {0:?}")]
    NotHex(String),
}

/// A change sequence number.
///
/// Field order matters: the derived `Ord` compares timestamp, then sequence,
/// then replica ID, then sub-sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Csn {
    pub timestamp: u32,
    pub sequence: u16,
    pub replica_id: u16,
    pub subsequence: u16,
}

impl Csn {
    pub const LEN: usize = 20;

    pub fn new(timestamp: u32, sequence: u16, replica_id: u16, subsequence: u16) -> Self {
        Self {
            timestamp,
            sequence,
            replica_id,
            subsequence,
        }
    }
}

impl FromStr for Csn {
    type Err = CsnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != Self::LEN {
            return Err(CsnParseError::Length(s.len()));
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CsnParseError::NotHex(s.to_string()));
        }
        let hex16 = |range: std::ops::Range<usize>| u16::from_str_radix(&s[range], 16);
        let not_hex = |_| CsnParseError::NotHex(s.to_string());
        Ok(Self {
            timestamp: u32::from_str_radix(&s[0..8], 16).map_err(not_hex)?,
            sequence: hex16(8..12).map_err(not_hex)?,
            replica_id: hex16(12..16).map_err(not_hex)?,
            subsequence: hex16(16..20).map_err(not_hex)?,
        })
    }
}

impl fmt::Display for Csn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}{:04x}{:04x}{:04x}",
            self.timestamp, self.sequence, self.replica_id, self.subsequence
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fields() {
        let csn: Csn = "5f3a1b2c000100030000".parse().unwrap();
        assert_eq!(csn.timestamp, 0x5f3a1b2c);
        assert_eq!(csn.sequence, 1);
        assert_eq!(csn.replica_id, 3);
        assert_eq!(csn.subsequence, 0);
        assert_eq!(csn.to_string(), "5f3a1b2c000100030000");
    }

    #[test]
    fn test_uppercase_accepted() {
        let csn: Csn = "5F3A1B2C000100030000".parse().unwrap();
        assert_eq!(csn.to_string(), "5f3a1b2c000100030000");
    }

    #[test]
    fn test_rejects_bad_input() {
        assert_eq!("".parse::<Csn>(), Err(CsnParseError::Length(0)));
        assert_eq!("5f3a1b2c00010003".parse::<Csn>(), Err(CsnParseError::Length(16)));
        assert!(matches!(
            "5f3a1b2c00010003000g".parse::<Csn>(),
            Err(CsnParseError::NotHex(_))
        ));
        assert!("+f3a1b2c000100030000".parse::<Csn>().is_err());
    }

    #[test]
    fn test_ordering_timestamp_first() {
        let older = Csn::new(100, 9, 9, 9);
        let newer = Csn::new(101, 0, 0, 0);
        assert!(older < newer);
    }

    #[test]
    fn test_ordering_sequence_then_replica() {
        assert!(Csn::new(100, 1, 9, 0) < Csn::new(100, 2, 1, 0));
        assert!(Csn::new(100, 1, 1, 5) < Csn::new(100, 1, 2, 0));
        assert!(Csn::new(100, 1, 1, 0) < Csn::new(100, 1, 1, 1));
    }
}
