// Composite store keys.
//
// Every key is a version byte followed by length-prefixed components:
// module, table, then zero or more record components. Components may
// contain any byte, so no separator can be forged, and a key built from the
// first N components is a byte prefix of every key that extends it.

use crate::error::{Error, Result};

/// Current key layout version
pub const KEY_FORMAT_VERSION: u8 = 1;

/// Builder for versioned composite keys
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    buf: Vec<u8>,
}

impl KeyBuilder {
    /// Start a key in `table` of `module`
    pub fn new(module: &str, table: &str) -> Self {
        let mut builder = Self {
            buf: vec![KEY_FORMAT_VERSION],
        };
        builder.append(module.as_bytes());
        builder.append(table.as_bytes());
        builder
    }

    fn append(&mut self, component: &[u8]) {
        self.buf
            .extend_from_slice(&(component.len() as u32).to_be_bytes());
        self.buf.extend_from_slice(component);
    }

    #[must_use]
    pub fn push(mut self, component: &[u8]) -> Self {
        self.append(component);
        self
    }

    #[must_use]
    pub fn push_str(self, component: &str) -> Self {
        self.push(component.as_bytes())
    }

    /// Numeric components are big-endian so numeric and byte order agree
    #[must_use]
    pub fn push_u64(self, value: u64) -> Self {
        self.push(&value.to_be_bytes())
    }

    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}

/// Split a key back into its components (module and table included)
pub fn decode_components(key: &[u8]) -> Result<Vec<&[u8]>> {
    let (version, mut rest) = key
        .split_first()
        .ok_or_else(|| Error::Corruption("empty key".into()))?;
    if *version != KEY_FORMAT_VERSION {
        return Err(Error::Corruption(format!("unknown key version {version}")));
    }

    let mut components = Vec::new();
    while !rest.is_empty() {
        if rest.len() < 4 {
            return Err(Error::Corruption("truncated key length".into()));
        }
        let (len, tail) = rest.split_at(4);
        let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
        if tail.len() < len {
            return Err(Error::Corruption("truncated key component".into()));
        }
        let (component, tail) = tail.split_at(len);
        components.push(component);
        rest = tail;
    }
    Ok(components)
}

/// Encode a counter or id value
pub fn encode_u64(value: u64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

pub fn decode_u64(bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Corruption(format!("expected 8-byte integer, got {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(arr))
}
