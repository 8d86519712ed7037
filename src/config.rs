//! Eviction Configuration

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown maxmemory policy '{0}'")]
    UnknownPolicy(String),
    #[error("maxmemory-samples must be at least 1")]
    ZeroSamples,
    #[error("hz must be at least 1")]
    ZeroHz,
    #[error("at least one database is required")]
    ZeroDatabases,
}

/// Key replacement policy applied when memory runs over budget.
///
/// `allkeys-*` policies consider every key; `volatile-*` policies only
/// consider keys carrying a TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxmemoryPolicy {
    /// Refuse to evict; writes fail while over budget
    NoEviction,
    /// Approximate LRU over all keys
    AllkeysLru,
    /// Approximate LRU over keys with a TTL
    VolatileLru,
    /// Approximate LFU over all keys
    AllkeysLfu,
    /// Approximate LFU over keys with a TTL
    VolatileLfu,
    /// Random key among all keys
    AllkeysRandom,
    /// Random key among keys with a TTL
    VolatileRandom,
    /// Key with the nearest expiry
    VolatileTtl,
}

impl Default for MaxmemoryPolicy {
    fn default() -> Self {
        Self::NoEviction
    }
}

impl MaxmemoryPolicy {
    /// Whether candidates come from the full key set rather than the
    /// expiring subset.
    pub fn scans_all_keys(&self) -> bool {
        matches!(
            self,
            Self::AllkeysLru | Self::AllkeysLfu | Self::AllkeysRandom
        )
    }

    pub fn is_lru(&self) -> bool {
        matches!(self, Self::AllkeysLru | Self::VolatileLru)
    }

    pub fn is_lfu(&self) -> bool {
        matches!(self, Self::AllkeysLfu | Self::VolatileLfu)
    }

    pub fn is_random(&self) -> bool {
        matches!(self, Self::AllkeysRandom | Self::VolatileRandom)
    }

    /// Pool-based policies rank sampled candidates by score; random
    /// policies pick directly from the tables.
    pub fn uses_pool(&self) -> bool {
        self.is_lru() || self.is_lfu() || *self == Self::VolatileTtl
    }
}

impl fmt::Display for MaxmemoryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoEviction => "noeviction",
            Self::AllkeysLru => "allkeys-lru",
            Self::VolatileLru => "volatile-lru",
            Self::AllkeysLfu => "allkeys-lfu",
            Self::VolatileLfu => "volatile-lfu",
            Self::AllkeysRandom => "allkeys-random",
            Self::VolatileRandom => "volatile-random",
            Self::VolatileTtl => "volatile-ttl",
        };
        f.write_str(name)
    }
}

impl FromStr for MaxmemoryPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "noeviction" => Ok(Self::NoEviction),
            "allkeys-lru" => Ok(Self::AllkeysLru),
            "volatile-lru" => Ok(Self::VolatileLru),
            "allkeys-lfu" => Ok(Self::AllkeysLfu),
            "volatile-lfu" => Ok(Self::VolatileLfu),
            "allkeys-random" => Ok(Self::AllkeysRandom),
            "volatile-random" => Ok(Self::VolatileRandom),
            "volatile-ttl" => Ok(Self::VolatileTtl),
            other => Err(ConfigError::UnknownPolicy(other.to_string())),
        }
    }
}

/// Runtime configuration for the eviction engine
#[derive(Debug, Clone)]
pub struct Config {
    /// Memory budget in bytes (0 = unlimited)
    pub maxmemory: u64,

    /// Replacement policy
    pub maxmemory_policy: MaxmemoryPolicy,

    /// Keys sampled per populate pass
    pub maxmemory_samples: usize,

    /// LFU increment probability curve factor
    pub lfu_log_factor: u32,

    /// LFU decay period in minutes (0 disables decay)
    pub lfu_decay_time: u64,

    /// Route eviction deletes to the background free worker
    pub lazyfree_lazy_eviction: bool,

    /// Replicas mirror their master's deletions instead of evicting
    pub replica_ignore_maxmemory: bool,

    /// Periodic tick frequency; governs LRU clock caching
    pub hz: u32,

    /// Number of logical databases
    pub dbnum: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            maxmemory: 0,
            maxmemory_policy: MaxmemoryPolicy::default(),
            maxmemory_samples: 5,
            lfu_log_factor: 10,
            lfu_decay_time: 1,
            lazyfree_lazy_eviction: false,
            replica_ignore_maxmemory: true,
            hz: 10,
            dbnum: 16,
        }
    }
}

impl Config {
    pub fn with_maxmemory(mut self, bytes: u64) -> Self {
        self.maxmemory = bytes;
        self
    }

    pub fn with_policy(mut self, policy: MaxmemoryPolicy) -> Self {
        self.maxmemory_policy = policy;
        self
    }

    pub fn with_samples(mut self, samples: usize) -> Self {
        self.maxmemory_samples = samples;
        self
    }

    pub fn with_lfu_log_factor(mut self, factor: u32) -> Self {
        self.lfu_log_factor = factor;
        self
    }

    pub fn with_lfu_decay_time(mut self, minutes: u64) -> Self {
        self.lfu_decay_time = minutes;
        self
    }

    pub fn with_lazy_eviction(mut self, lazy: bool) -> Self {
        self.lazyfree_lazy_eviction = lazy;
        self
    }

    pub fn with_dbnum(mut self, dbnum: usize) -> Self {
        self.dbnum = dbnum;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.maxmemory_samples == 0 {
            return Err(ConfigError::ZeroSamples);
        }
        if self.hz == 0 {
            return Err(ConfigError::ZeroHz);
        }
        if self.dbnum == 0 {
            return Err(ConfigError::ZeroDatabases);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parse_roundtrip() {
        let names = [
            "noeviction",
            "allkeys-lru",
            "volatile-lru",
            "allkeys-lfu",
            "volatile-lfu",
            "allkeys-random",
            "volatile-random",
            "volatile-ttl",
        ];
        for name in names {
            let policy: MaxmemoryPolicy = name.parse().unwrap();
            assert_eq!(policy.to_string(), name);
        }
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let err = "allkeys-ttl".parse::<MaxmemoryPolicy>().unwrap_err();
        assert_eq!(err, ConfigError::UnknownPolicy("allkeys-ttl".to_string()));
    }

    #[test]
    fn test_policy_flags() {
        assert!(MaxmemoryPolicy::AllkeysLru.scans_all_keys());
        assert!(!MaxmemoryPolicy::VolatileTtl.scans_all_keys());
        assert!(MaxmemoryPolicy::VolatileTtl.uses_pool());
        assert!(!MaxmemoryPolicy::AllkeysRandom.uses_pool());
        assert!(!MaxmemoryPolicy::NoEviction.uses_pool());
    }

    #[test]
    fn test_validate() {
        assert!(Config::default().validate().is_ok());
        let bad = Config::default().with_samples(0);
        assert_eq!(bad.validate(), Err(ConfigError::ZeroSamples));
        let bad = Config::default().with_dbnum(0);
        assert_eq!(bad.validate(), Err(ConfigError::ZeroDatabases));
    }
}
