//! Sync cursors and the per-user write clock
//!
//! Every write for a user is stamped by that user's clock, and every cursor
//! handed back to a client is read from the same clock. A stamp is always
//! strictly greater than any cursor already issued, so a client that stored
//! cursor `C` can never miss a row by asking for `updated_at > C`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{Error, Result};
use crate::util::{format_timestamp, parse_timestamp};

/// Position in a user's change stream (Unix ms of the last write seen)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SyncCursor(i64);

impl SyncCursor {
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Parse a client-supplied cursor; absent or blank means "from the beginning"
    pub fn parse(raw: Option<&str>) -> Result<Option<Self>> {
        let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
            return Ok(None);
        };
        parse_timestamp(raw)
            .map(|millis| Some(Self(millis)))
            .ok_or_else(|| Error::InvalidInput(format!("lastSyncTime is not RFC 3339: {raw}")))
    }
}

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_timestamp(self.0))
    }
}

/// Registry of per-user clocks
///
/// Holding a user's clock is also that user's sync gate: calls for the same
/// user run one at a time, calls for different users do not contend.
///
/// Only clocks in use stay registered. An idle clock is dropped the next time
/// any clock is locked and its high-water mark is folded into a shared floor,
/// so a re-created clock never stamps at or below a cursor it issued before.
#[derive(Clone, Default)]
pub struct SyncClock {
    users: Arc<Mutex<ClockTable>>,
}

#[derive(Default)]
struct ClockTable {
    clocks: HashMap<String, Arc<Mutex<UserClock>>>,
    floor: Option<i64>,
}

impl ClockTable {
    /// Drop clocks nobody holds, except `keep`
    fn evict_idle(&mut self, keep: &str) {
        let mut floor = self.floor;
        self.clocks.retain(|user_id, clock| {
            if user_id == keep || Arc::strong_count(clock) > 1 {
                return true;
            }
            if let Ok(clock) = clock.try_lock() {
                floor = floor.max(clock.high_water);
            }
            false
        });
        self.floor = floor;
    }
}

impl SyncClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `user_id`'s clock
    pub async fn lock(&self, user_id: &str) -> OwnedMutexGuard<UserClock> {
        let clock = {
            let mut table = self.users.lock().await;
            table.evict_idle(user_id);
            let floor = table.floor;
            Arc::clone(
                table
                    .clocks
                    .entry(user_id.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(UserClock::with_floor(floor)))),
            )
        };
        clock.lock_owned().await
    }

    #[cfg(test)]
    async fn registered(&self) -> usize {
        self.users.lock().await.clocks.len()
    }
}

/// One user's write clock
#[derive(Debug, Default)]
pub struct UserClock {
    high_water: Option<i64>,
    seeded: bool,
}

impl UserClock {
    fn with_floor(floor: Option<i64>) -> Self {
        Self {
            high_water: floor,
            seeded: false,
        }
    }

    /// Whether the clock has learned the user's stored high-water mark yet
    pub const fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Seed from the highest stamp already stored for the user
    pub fn seed(&mut self, stored: Option<i64>) {
        self.high_water = self.high_water.max(stored);
        self.seeded = true;
    }

    /// Stamp for a write happening at wall-clock `now`
    pub fn stamp(&mut self, now: i64) -> i64 {
        let stamp = match self.high_water {
            Some(high_water) => now.max(high_water.saturating_add(1)),
            None => now,
        };
        self.high_water = Some(stamp);
        stamp
    }

    /// Cursor covering every write stamped so far
    pub fn cursor(&mut self, now: i64) -> SyncCursor {
        let cursor = self.high_water.map_or(now, |high_water| now.max(high_water));
        self.high_water = Some(cursor);
        SyncCursor(cursor)
    }
}
