use crate::error::{Error, Result};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

// ================================
// Coin
// ================================

/// A single-denomination amount
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    /// Serialized as a decimal string, numbers are accepted on input
    #[serde(serialize_with = "amount_to_string", deserialize_with = "amount_from_any")]
    pub amount: u64,
}

impl Coin {
    pub fn new(denom: impl Into<String>, amount: u64) -> Self {
        Self {
            denom: denom.into(),
            amount,
        }
    }
}

fn amount_to_string<S: Serializer>(amount: &u64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&amount.to_string())
}

fn amount_from_any<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Amount {
        Text(String),
        Number(u64),
    }

    match Amount::deserialize(deserializer)? {
        Amount::Number(n) => Ok(n),
        Amount::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

// ================================
// Coins
// ================================

/// Normalised multi-denomination amount.
///
/// Entries are sorted by denomination, unique, and never zero, so equality
/// and `is_zero` are structural.
#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize)]
#[serde(transparent)]
pub struct Coins(Vec<Coin>);

impl Coins {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn single(denom: impl Into<String>, amount: u64) -> Self {
        Self::normalize(vec![Coin::new(denom, amount)])
    }

    /// Build from arbitrary entries, merging duplicates and dropping zeros.
    /// Fails only if a merged amount overflows.
    pub fn try_from_coins(coins: Vec<Coin>) -> Result<Self> {
        let mut merged: BTreeMap<String, u64> = BTreeMap::new();
        for coin in coins {
            let slot = merged.entry(coin.denom).or_default();
            *slot = slot
                .checked_add(coin.amount)
                .ok_or_else(|| Error::validation("coin amount overflow"))?;
        }
        Ok(Self::from_map(merged))
    }

    fn normalize(coins: Vec<Coin>) -> Self {
        let mut coins: Vec<Coin> = coins.into_iter().filter(|c| c.amount > 0).collect();
        coins.sort_by(|a, b| a.denom.cmp(&b.denom));
        coins.dedup_by(|a, b| a.denom == b.denom);
        Self(coins)
    }

    fn from_map(map: BTreeMap<String, u64>) -> Self {
        Self(
            map.into_iter()
                .filter(|(_, amount)| *amount > 0)
                .map(|(denom, amount)| Coin { denom, amount })
                .collect(),
        )
    }

    fn to_map(&self) -> BTreeMap<String, u64> {
        self.0.iter().map(|c| (c.denom.clone(), c.amount)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Coin> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every denomination is zero (normalised sets store no zeros)
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|c| c.amount == 0)
    }

    pub fn amount_of(&self, denom: &str) -> u64 {
        self.0
            .iter()
            .find(|c| c.denom == denom)
            .map_or(0, |c| c.amount)
    }

    /// Amount of the first denomination, or zero for an empty set
    pub fn first_amount(&self) -> u64 {
        self.0.first().map_or(0, |c| c.amount)
    }

    /// Per-denomination subtraction. `None` if any denomination would go
    /// negative, including denominations absent from `self`.
    pub fn checked_sub(&self, other: &Coins) -> Option<Coins> {
        let mut remaining = self.to_map();
        for coin in &other.0 {
            let slot = remaining.get_mut(&coin.denom)?;
            *slot = slot.checked_sub(coin.amount)?;
        }
        Some(Self::from_map(remaining))
    }

    pub fn checked_add(&self, other: &Coins) -> Option<Coins> {
        let mut total = self.to_map();
        for coin in &other.0 {
            let slot = total.entry(coin.denom.clone()).or_default();
            *slot = slot.checked_add(coin.amount)?;
        }
        Some(Self::from_map(total))
    }

    /// True if `self` covers `other` in every denomination
    pub fn is_all_gte(&self, other: &Coins) -> bool {
        self.checked_sub(other).is_some()
    }

    pub fn validate(&self) -> Result<()> {
        for window in self.0.windows(2) {
            if window[0].denom >= window[1].denom {
                return Err(Error::validation("coins must be sorted and unique"));
            }
        }
        for coin in &self.0 {
            if coin.amount == 0 {
                return Err(Error::validation(format!("zero amount for {}", coin.denom)));
            }
            if !valid_denom(&coin.denom) {
                return Err(Error::validation(format!("invalid denom {:?}", coin.denom)));
            }
        }
        Ok(())
    }
}

fn valid_denom(denom: &str) -> bool {
    (1..=64).contains(&denom.len())
        && denom
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.'))
}

impl<'de> Deserialize<'de> for Coins {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let coins = <Vec<Coin> as Deserialize>::deserialize(deserializer)?;
        Coins::try_from_coins(coins).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Coins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|c| format!("{}{}", c.amount, c.denom))
            .collect();
        f.write_str(&parts.join(","))
    }
}

impl From<Coin> for Coins {
    fn from(coin: Coin) -> Self {
        Self::normalize(vec![coin])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(amount: u64) -> Coins {
        Coins::single("tree", amount)
    }

    #[test]
    fn test_checked_sub() {
        assert_eq!(tree(100).checked_sub(&tree(30)), Some(tree(70)));
        assert!(tree(100).checked_sub(&tree(100)).unwrap().is_zero());
        assert_eq!(tree(100).checked_sub(&tree(101)), None);

        // denominations missing from the minuend cannot be covered
        assert_eq!(tree(100).checked_sub(&Coins::single("earth", 1)), None);
    }

    #[test]
    fn test_multi_denom_sub() {
        let limit = Coins::try_from_coins(vec![Coin::new("tree", 10), Coin::new("earth", 5)]).unwrap();
        let rest = limit.checked_sub(&Coins::single("earth", 5)).unwrap();
        assert_eq!(rest, tree(10));
        assert!(!rest.is_zero());
    }

    #[test]
    fn test_normalisation() {
        let coins = Coins::try_from_coins(vec![
            Coin::new("tree", 3),
            Coin::new("earth", 0),
            Coin::new("tree", 4),
        ])
        .unwrap();
        assert_eq!(coins, tree(7));
        assert!(coins.validate().is_ok());
        assert!(Coins::empty().is_zero());
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_string(&tree(1000)).unwrap();
        assert_eq!(json, r#"[{"denom":"tree","amount":"1000"}]"#);

        let parsed: Coins = serde_json::from_str(r#"[{"denom":"tree","amount":12}]"#).unwrap();
        assert_eq!(parsed, tree(12));
    }

    #[test]
    fn test_first_amount() {
        assert_eq!(Coins::empty().first_amount(), 0);
        assert_eq!(tree(500).first_amount(), 500);
    }
}
