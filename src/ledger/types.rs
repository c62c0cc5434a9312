//! Ledger domain types

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A ledger account address (`0x` + 40 hex chars), stored lowercase
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn parse(raw: &str) -> Result<Self> {
        let lowered = raw.to_lowercase();
        let hex_part = lowered.strip_prefix("0x").ok_or_else(|| Error::Validation {
            field: "address".to_string(),
            message: "must start with 0x".to_string(),
        })?;

        if hex_part.len() != 40 || hex::decode(hex_part).is_err() {
            return Err(Error::Validation {
                field: "address".to_string(),
                message: "must be 0x followed by 40 hex characters".to_string(),
            });
        }

        Ok(Self(lowered))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A transaction hash (`0x` + 64 hex chars)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(String);

impl TxHash {
    pub fn parse(raw: &str) -> Result<Self> {
        let lowered = raw.to_lowercase();
        let hex_part = lowered.strip_prefix("0x").ok_or_else(|| Error::Validation {
            field: "tx_hash".to_string(),
            message: "must start with 0x".to_string(),
        })?;

        if hex_part.len() != 64 || hex::decode(hex_part).is_err() {
            return Err(Error::Validation {
                field: "tx_hash".to_string(),
                message: "must be 0x followed by 64 hex characters".to_string(),
            });
        }

        Ok(Self(lowered))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Execution receipt for a mined transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxReceipt {
    /// true = success, false = reverted
    pub status: bool,
    pub block_number: u64,
    pub gas_used: u64,
}

/// Parse a JSON-RPC hex quantity (`"0x1a"`)
pub fn parse_quantity(raw: &str) -> Result<u128> {
    let hex_part = raw.strip_prefix("0x").unwrap_or(raw);
    u128::from_str_radix(hex_part, 16).map_err(|_| Error::Validation {
        field: "quantity".to_string(),
        message: format!("invalid hex quantity: {}", raw),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parse_normalizes_case() {
        let addr = Address::parse("0xAB5801a7D398351b8bE11C439e05C5b3259aeC9B").unwrap();
        assert_eq!(addr.as_str(), "0xab5801a7d398351b8be11c439e05c5b3259aec9b");
    }

    #[test]
    fn test_address_parse_rejects_bad_input() {
        assert!(Address::parse("ab5801a7d398351b8be11c439e05c5b3259aec9b").is_err());
        assert!(Address::parse("0x1234").is_err());
        assert!(Address::parse("0xzz5801a7d398351b8be11c439e05c5b3259aec9b").is_err());
    }

    #[test]
    fn test_tx_hash_parse() {
        let hash = TxHash::parse(&format!("0x{}", "ab".repeat(32))).unwrap();
        assert_eq!(hash.as_str().len(), 66);
        assert!(TxHash::parse("0x1234").is_err());
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x1a").unwrap(), 26);
        assert!(parse_quantity("0xzz").is_err());
    }
}
