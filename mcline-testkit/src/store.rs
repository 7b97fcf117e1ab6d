//! In-memory item table behind `MockServer`.

use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Relative expirations above this many seconds are absolute Unix times.
const MAX_RELATIVE_EXPIRATION: u64 = 60 * 60 * 24 * 30;

#[derive(Debug, Clone)]
pub(crate) struct Item {
    pub(crate) value: Vec<u8>,
    pub(crate) flags: u32,
    expires_at: Option<Instant>,
}

impl Item {
    fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StoreOutcome {
    Stored,
    NotStored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MutateOutcome {
    Value(u64),
    NotFound,
    NonNumeric,
}

#[derive(Debug, Default)]
pub(crate) struct Store {
    items: HashMap<String, Item>,
}

impl Store {
    /// Returns the live item for `key`, dropping it first if it has expired.
    fn live(&mut self, key: &str) -> Option<&mut Item> {
        let now = Instant::now();
        if self.items.get(key).is_some_and(|item| item.is_expired(now)) {
            self.items.remove(key);
        }
        self.items.get_mut(key)
    }

    pub(crate) fn get(&mut self, key: &str) -> Option<Item> {
        self.live(key).cloned()
    }

    pub(crate) fn store(
        &mut self,
        verb: &str,
        key: &str,
        flags: u32,
        exptime: u64,
        value: Vec<u8>,
    ) -> StoreOutcome {
        let exists = self.live(key).is_some();
        let allowed = match verb {
            "add" => !exists,
            "replace" => exists,
            _ => true,
        };
        if !allowed {
            return StoreOutcome::NotStored;
        }
        self.items.insert(
            key.to_string(),
            Item {
                value,
                flags,
                expires_at: expires_at(exptime),
            },
        );
        StoreOutcome::Stored
    }

    pub(crate) fn delete(&mut self, key: &str) -> bool {
        self.live(key).is_some() && self.items.remove(key).is_some()
    }

    /// incr wraps at 2^64; decr stops at zero.
    pub(crate) fn mutate(&mut self, key: &str, increment: bool, delta: u64) -> MutateOutcome {
        let Some(item) = self.live(key) else {
            return MutateOutcome::NotFound;
        };
        let current = match std::str::from_utf8(&item.value)
            .ok()
            .and_then(|text| text.trim_end().parse::<u64>().ok())
        {
            Some(value) => value,
            None => return MutateOutcome::NonNumeric,
        };
        let next = if increment {
            current.wrapping_add(delta)
        } else {
            current.saturating_sub(delta)
        };
        item.value = next.to_string().into_bytes();
        MutateOutcome::Value(next)
    }

    pub(crate) fn touch(&mut self, key: &str, exptime: u64) -> bool {
        match self.live(key) {
            Some(item) => {
                item.expires_at = expires_at(exptime);
                true
            }
            None => false,
        }
    }

    pub(crate) fn flush(&mut self) {
        self.items.clear();
    }
}

fn expires_at(exptime: u64) -> Option<Instant> {
    if exptime == 0 {
        return None;
    }
    let now = Instant::now();
    if exptime <= MAX_RELATIVE_EXPIRATION {
        return Some(now + Duration::from_secs(exptime));
    }
    let unix_now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    Some(now + Duration::from_secs(exptime.saturating_sub(unix_now)))
}
