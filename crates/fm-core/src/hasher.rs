//! Key to owner-index hashing
//!
//! `Hasher` is a strategy object held by the cluster, so deployments use jump
//! consistent hashing while tests pin placement with `ModHasher` or
//! `ConstHasher`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Default number of partitions shards are folded into
pub const DEFAULT_PARTITION_N: usize = 256;

/// Maps a key onto one of `n` buckets
///
/// Implementations must be pure: equal `(key, n)` always yields the same
/// index.
pub trait Hasher: Send + Sync + fmt::Debug {
    fn hash(&self, key: u64, n: usize) -> usize;
}

/// Jump consistent hash (Lamping & Veach)
///
/// Moving from `n` to `n + 1` buckets relocates roughly `1 / (n + 1)` of the
/// keys, all of them into the new bucket.
#[derive(Debug, Clone, Copy, Default)]
pub struct JumpHasher;

impl Hasher for JumpHasher {
    fn hash(&self, key: u64, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        let mut key = key;
        let mut b: i64 = -1;
        let mut j: i64 = 0;
        while j < n as i64 {
            b = j;
            key = key.wrapping_mul(2862933555777941757).wrapping_add(1);
            j = (((b + 1) as f64) * ((1i64 << 31) as f64 / ((key >> 33) + 1) as f64)) as i64;
        }
        b as usize
    }
}

/// `key % n`
#[derive(Debug, Clone, Copy, Default)]
pub struct ModHasher;

impl Hasher for ModHasher {
    fn hash(&self, key: u64, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        (key % n as u64) as usize
    }
}

/// Always returns the configured index, even when it is `>= n`
#[derive(Debug, Clone, Copy)]
pub struct ConstHasher(pub usize);

impl Hasher for ConstHasher {
    fn hash(&self, _key: u64, _n: usize) -> usize {
        self.0
    }
}

/// Partition of `(index, shard)`: FNV-1a 64 over the index name and the
/// big-endian shard number, modulo `partition_n`.
pub fn partition(index: &str, shard: u64, partition_n: usize) -> usize {
    if partition_n == 0 {
        return 0;
    }
    let mut h = Fnv64a::new();
    h.write(index.as_bytes());
    h.write(&shard.to_be_bytes());
    (h.finish() % partition_n as u64) as usize
}

struct Fnv64a {
    state: u64,
}

impl Fnv64a {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    fn new() -> Self {
        Self {
            state: Self::OFFSET,
        }
    }

    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.state ^= b as u64;
            self.state = self.state.wrapping_mul(Self::PRIME);
        }
    }

    fn finish(&self) -> u64 {
        self.state
    }
}

/// Configurable hasher selection: `jump`, `mod` or `const:<i>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HasherKind {
    #[default]
    Jump,
    Mod,
    Const(usize),
}

impl HasherKind {
    pub fn build(&self) -> Arc<dyn Hasher> {
        match self {
            HasherKind::Jump => Arc::new(JumpHasher),
            HasherKind::Mod => Arc::new(ModHasher),
            HasherKind::Const(i) => Arc::new(ConstHasher(*i)),
        }
    }
}

impl fmt::Display for HasherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HasherKind::Jump => write!(f, "jump"),
            HasherKind::Mod => write!(f, "mod"),
            HasherKind::Const(i) => write!(f, "const:{}", i),
        }
    }
}

impl FromStr for HasherKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jump" => Ok(HasherKind::Jump),
            "mod" => Ok(HasherKind::Mod),
            other => match other.strip_prefix("const:") {
                Some(i) => i
                    .parse::<usize>()
                    .map(HasherKind::Const)
                    .map_err(|_| format!("invalid const hasher index: {}", i)),
                None => Err(format!("unknown hasher: {}", s)),
            },
        }
    }
}

impl TryFrom<String> for HasherKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HasherKind> for String {
    fn from(kind: HasherKind) -> Self {
        kind.to_string()
    }
}
