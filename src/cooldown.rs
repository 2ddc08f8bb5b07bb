use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Per-identity dedup gate. Tracks when each identity was last admitted and
/// suppresses repeat sightings inside the cooldown window. State lives for
/// one session and is never persisted.
#[derive(Debug)]
pub struct CooldownGate {
    window: Duration,
    last_admitted: HashMap<i64, Instant>,
}

impl CooldownGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_admitted: HashMap::new(),
        }
    }

    /// Admit or suppress a sighting of `id` at `now`.
    ///
    /// An identity never seen before is always admitted. Otherwise the
    /// sighting is admitted only when strictly more than the window has
    /// elapsed since the last admission. Admission records `now`
    /// immediately, before any delivery is attempted, so a failed delivery
    /// is not retried until the next full window passes.
    pub fn admit(&mut self, id: i64, now: Instant) -> bool {
        if let Some(&last) = self.last_admitted.get(&id) {
            if now.duration_since(last) <= self.window {
                return false;
            }
        }
        self.last_admitted.insert(id, now);
        true
    }
}
