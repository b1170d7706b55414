//! Cache item value object
//!
//! A [`CacheItem`] is one entry in flight: produced by the pool on read,
//! mutated by the caller, handed back for saving. It never touches storage
//! on its own.

use std::collections::BTreeSet;
use std::time::{Duration, SystemTime};

use cachette_common::time::epoch_secs;
use cachette_common::Clock;

use crate::errors::{CacheError, CacheResult};
use crate::key::validate_key;

/// When an item stops being a hit.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Expiry {
    /// Use the pool's configured default lifetime.
    #[default]
    Default,
    /// Persist indefinitely.
    Never,
    /// Absolute wall-clock time, seconds since UNIX epoch.
    At(f64),
}

impl Expiry {
    /// Resolve to an absolute epoch timestamp, `None` meaning "never".
    ///
    /// `default_lifetime` of zero means entries saved with
    /// [`Expiry::Default`] never expire.
    #[must_use]
    pub fn resolve(self, now: f64, default_lifetime: Duration) -> Option<f64> {
        match self {
            Self::Never => None,
            Self::At(at) => Some(at),
            Self::Default if default_lifetime.is_zero() => None,
            Self::Default => Some(now + default_lifetime.as_secs_f64()),
        }
    }
}

/// Metadata stored alongside a value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ItemMetadata {
    /// Absolute expiry recorded at save time, seconds since UNIX epoch
    pub expiry: Option<f64>,
    /// How long the value took to compute, in milliseconds
    pub ctime_ms: Option<u32>,
    /// Invalidation tags
    pub tags: BTreeSet<String>,
}

impl ItemMetadata {
    /// True when nothing beyond the bare value needs to be stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expiry.is_none() && self.ctime_ms.is_none() && self.tags.is_empty()
    }
}

/// One cache entry in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheItem<V> {
    key: String,
    value: Option<V>,
    is_hit: bool,
    expiry: Expiry,
    metadata: ItemMetadata,
    pending_tags: BTreeSet<String>,
    ctime_ms: Option<u32>,
}

impl<V> CacheItem<V> {
    /// Item for a key that was not found.
    pub fn miss(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            is_hit: false,
            expiry: Expiry::Default,
            metadata: ItemMetadata::default(),
            pending_tags: BTreeSet::new(),
            ctime_ms: None,
        }
    }

    /// Item for a key found in storage, carrying the metadata it was saved with.
    pub fn hit(key: impl Into<String>, value: V, metadata: ItemMetadata) -> Self {
        Self { value: Some(value), is_hit: true, metadata, ..Self::miss(key) }
    }

    /// Logical key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current value: the stored one for a hit, or whatever the caller set.
    #[must_use]
    pub const fn get(&self) -> Option<&V> {
        self.value.as_ref()
    }

    /// Consume the item and return its value.
    #[must_use]
    pub fn into_value(self) -> Option<V> {
        self.value
    }

    /// Move the value out, leaving the item empty.
    pub fn take_value(&mut self) -> Option<V> {
        self.value.take()
    }

    /// Whether the value was found and unexpired at fetch time.
    #[must_use]
    pub const fn is_hit(&self) -> bool {
        self.is_hit
    }

    /// Replace the value.
    pub fn set(&mut self, value: V) -> &mut Self {
        self.value = Some(value);
        self
    }

    /// Expire at an absolute wall-clock time, or fall back to the pool
    /// default when `None`.
    pub fn expires_at(&mut self, at: Option<SystemTime>) -> &mut Self {
        self.expiry = at.map_or(Expiry::Default, |at| Expiry::At(epoch_secs(at)));
        self
    }

    /// Expire `ttl` from now as measured by `clock`, or fall back to the pool
    /// default when `None`.
    pub fn expires_after(&mut self, ttl: Option<Duration>, clock: &dyn Clock) -> &mut Self {
        self.expiry =
            ttl.map_or(Expiry::Default, |ttl| Expiry::At(clock.epoch_secs() + ttl.as_secs_f64()));
        self
    }

    /// Set the expiry directly.
    pub fn set_expiry(&mut self, expiry: Expiry) -> &mut Self {
        self.expiry = expiry;
        self
    }

    /// Configured expiry.
    #[must_use]
    pub const fn expiry(&self) -> Expiry {
        self.expiry
    }

    /// Add an invalidation tag stored with the item on its next save.
    ///
    /// # Errors
    ///
    /// Tags follow the same rules as keys; an invalid tag returns
    /// [`CacheError::InvalidKey`].
    pub fn tag(&mut self, tag: impl Into<String>) -> CacheResult<&mut Self> {
        let tag = tag.into();
        validate_key(&tag).map_err(|e| match e {
            CacheError::InvalidKey { reason, .. } => {
                CacheError::invalid_key(tag.clone(), format!("tag {reason}"))
            }
            other => other,
        })?;
        self.pending_tags.insert(tag);
        Ok(self)
    }

    /// Metadata decoded from storage. Empty for a miss.
    #[must_use]
    pub const fn metadata(&self) -> &ItemMetadata {
        &self.metadata
    }

    /// Tags that will be written on the next save.
    #[must_use]
    pub const fn pending_tags(&self) -> &BTreeSet<String> {
        &self.pending_tags
    }

    /// Record how long the value took to compute.
    pub fn set_ctime_ms(&mut self, ctime_ms: Option<u32>) -> &mut Self {
        self.ctime_ms = ctime_ms;
        self
    }

    /// Computation time recorded for the next save.
    #[must_use]
    pub const fn ctime_ms(&self) -> Option<u32> {
        self.ctime_ms
    }
}
