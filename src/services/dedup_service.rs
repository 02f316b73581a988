use std::{
    collections::{HashSet, VecDeque},
    sync::{Mutex, MutexGuard},
};

/// Bounded memory of recently seen Events API `event_id`s.
///
/// Slack delivers events at least once. Remembering the last `capacity` IDs
/// stops a redelivered event from producing a second answer. Eviction is FIFO
/// by first insertion. The window lives in memory only, so a restart forgets
/// it.
pub struct DedupCache {
    window: Mutex<DedupWindow>,
    capacity: usize,
}

struct DedupWindow {
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl DedupWindow {
    fn insert(&mut self, event_id: &str, capacity: usize) -> bool {
        if self.ids.contains(event_id) {
            return false;
        }
        while self.order.len() >= capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.ids.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(event_id.to_string());
        self.ids.insert(event_id.to_string());
        true
    }
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: Mutex::new(DedupWindow {
                order: VecDeque::with_capacity(capacity),
                ids: HashSet::with_capacity(capacity),
            }),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, DedupWindow> {
        // The window stays consistent even if a holder panicked mid-call.
        self.window
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn seen_before(&self, event_id: &str) -> bool {
        self.lock().ids.contains(event_id)
    }

    /// Record `event_id`. Re-remembering an ID keeps its original position.
    pub fn remember(&self, event_id: &str) {
        self.lock().insert(event_id, self.capacity);
    }

    /// Atomically check and record `event_id`.
    ///
    /// Returns `true` the first time an ID is seen and `false` for every
    /// later delivery still inside the window.
    pub fn check_and_remember(&self, event_id: &str) -> bool {
        self.lock().insert(event_id, self.capacity)
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
