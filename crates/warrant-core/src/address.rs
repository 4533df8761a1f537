use crate::error::{Error, Result};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Maximum accepted address length in bytes
pub const MAX_ADDRESS_LEN: usize = 255;

/// Length of derived contract addresses
pub const CONTRACT_ADDRESS_LEN: usize = 20;

/// Reserved leading byte of derived contract addresses
pub const CONTRACT_ADDRESS_TAG: u8 = b'C';

/// Opaque account identifier, rendered as lowercase hex
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshSerialize, BorshDeserialize)]
pub struct Address(Vec<u8>);

impl Address {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Derive the address of the `counter`-th contract instance.
    ///
    /// Layout is the tag byte followed by the unsigned LEB128 encoding of the
    /// counter, zero padded to twenty bytes.
    pub fn contract(counter: u64) -> Self {
        let mut bytes = vec![0u8; CONTRACT_ADDRESS_LEN];
        bytes[0] = CONTRACT_ADDRESS_TAG;
        let mut value = counter;
        let mut i = 1;
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                bytes[i] = byte;
                break;
            }
            bytes[i] = byte | 0x80;
            i += 1;
        }
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(Error::validation("address must not be empty"));
        }
        if self.0.len() > MAX_ADDRESS_LEN {
            return Err(Error::validation(format!(
                "address longer than {MAX_ADDRESS_LEN} bytes"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        hex::decode(s)
            .map(Self)
            .map_err(|e| Error::validation(format!("invalid address {s:?}: {e}")))
    }
}

impl From<&[u8]> for Address {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = <String as Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_address_layout() {
        let first = Address::contract(0);
        assert_eq!(first.as_bytes().len(), CONTRACT_ADDRESS_LEN);
        assert_eq!(first.as_bytes()[0], b'C');
        assert!(first.as_bytes()[1..].iter().all(|b| *b == 0));
        assert_eq!(first.to_string(), "4300000000000000000000000000000000000000");

        // 300 = 0b1_0010_1100 -> 0xac 0x02
        let big = Address::contract(300);
        assert_eq!(&big.as_bytes()[..3], &[b'C', 0xac, 0x02]);
        assert_ne!(Address::contract(1), Address::contract(2));
    }

    #[test]
    fn test_contract_address_max_counter_fits() {
        let addr = Address::contract(u64::MAX);
        assert_eq!(addr.as_bytes().len(), CONTRACT_ADDRESS_LEN);
        assert_eq!(addr.as_bytes()[10], 0x01);
    }

    #[test]
    fn test_hex_round_trip() {
        let addr = Address::new(b"alice".to_vec());
        let parsed: Address = addr.to_string().parse().unwrap();
        assert_eq!(parsed, addr);

        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"616c696365\"");
        assert!("zz".parse::<Address>().is_err());
    }

    #[test]
    fn test_validate() {
        assert!(Address::default().validate().is_err());
        assert!(Address::new(vec![1u8; 256]).validate().is_err());
        assert!(Address::new(vec![1u8; 20]).validate().is_ok());
    }
}
