use crate::error::{Error, Result, SandboxError};
use crate::store::{CacheStore, KvStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ================================
// Block Header
// ================================

/// Block metadata visible to every message in the block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub chain_id: String,
    pub height: u64,
    pub time: DateTime<Utc>,
}

impl BlockHeader {
    pub fn new(chain_id: impl Into<String>, height: u64, time: DateTime<Utc>) -> Self {
        Self {
            chain_id: chain_id.into(),
            height,
            time,
        }
    }
}

// ================================
// Execution Context
// ================================

/// Store handle plus block metadata for one state-machine step.
///
/// Execution is single-writer: one context is threaded by `&mut` through
/// every keeper call of a message.
///
/// The optional fuel budget is shared by every contract execution the
/// message triggers, nested ones included. Fuel spent inside a branch stays
/// spent even when the branch is rolled back.
pub struct Context<'a> {
    store: &'a mut dyn KvStore,
    header: BlockHeader,
    depth: u32,
    fuel: Option<u64>,
}

impl<'a> Context<'a> {
    pub fn new(store: &'a mut dyn KvStore, header: BlockHeader) -> Self {
        Self {
            store,
            header,
            depth: 0,
            fuel: None,
        }
    }

    /// Bound the total fuel of this step; `None` leaves it unbounded
    #[must_use]
    pub fn with_fuel(mut self, fuel: Option<u64>) -> Self {
        self.fuel = fuel;
        self
    }

    pub fn store(&self) -> &dyn KvStore {
        &*self.store
    }

    pub fn store_mut(&mut self) -> &mut dyn KvStore {
        &mut *self.store
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn block_time(&self) -> DateTime<Utc> {
        self.header.time
    }

    /// Number of contract executions currently on the call chain
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Fuel left for this step, `None` when unbounded
    pub fn fuel_remaining(&self) -> Option<u64> {
        self.fuel
    }

    /// Draw `amount` from the fuel budget. Fails with `OutOfFuel`, leaving
    /// the budget empty, when less than `amount` remains.
    pub fn consume_fuel(&mut self, amount: u64) -> Result<()> {
        let Some(left) = self.fuel else {
            return Ok(());
        };
        match left.checked_sub(amount) {
            Some(rest) => {
                self.fuel = Some(rest);
                Ok(())
            }
            None => {
                self.fuel = Some(0);
                Err(Error::Sandbox(SandboxError::OutOfFuel))
            }
        }
    }

    /// Run `f` one contract execution deeper
    pub fn descend<T>(&mut self, f: impl FnOnce(&mut Context<'_>) -> Result<T>) -> Result<T> {
        self.depth += 1;
        let out = f(self);
        self.depth -= 1;
        out
    }

    /// Run `f` against a write buffer, committing only if it succeeds
    pub fn branch<T>(&mut self, f: impl FnOnce(&mut Context<'_>) -> Result<T>) -> Result<T> {
        let mut cache = CacheStore::new(&mut *self.store);
        let (out, fuel) = {
            let mut child = Context {
                store: &mut cache,
                header: self.header.clone(),
                depth: self.depth,
                fuel: self.fuel,
            };
            let out = f(&mut child);
            (out, child.fuel)
        };
        self.fuel = fuel;
        if out.is_ok() {
            cache.commit()?;
        }
        out
    }
}

// ================================
// Handler Response
// ================================

/// Key/value annotation emitted by a handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    pub value: String,
}

/// Successful handler result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub data: Vec<u8>,
    pub attributes: Vec<Attribute>,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    /// Append another response's attributes, keeping this response's data
    pub fn merge(&mut self, other: Response) {
        self.attributes.extend(other.attributes);
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.value.as_str())
    }
}
