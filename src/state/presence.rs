use std::collections::{HashMap, HashSet};

/// eventId → distinct userIds in that event's room. Hub task only.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    events: HashMap<String, HashSet<String>>,
}

impl PresenceRegistry {
    pub fn new() -> Self { Self::default() }

    /// Idempotent: joining twice leaves a single entry.
    pub fn join(&mut self, event_id: &str, user_id: &str) -> usize {
        let users = self.events.entry(event_id.to_owned()).or_default();
        users.insert(user_id.to_owned());
        users.len()
    }

    /// Drops the event entry once its last user leaves.
    pub fn leave(&mut self, event_id: &str, user_id: &str) -> usize {
        let Some(users) = self.events.get_mut(event_id) else { return 0 };
        users.remove(user_id);
        let left = users.len();
        if left == 0 {
            self.events.remove(event_id);
        }
        left
    }

    pub fn count(&self, event_id: &str) -> usize {
        self.events.get(event_id).map_or(0, HashSet::len)
    }

    #[cfg(test)]
    pub fn contains(&self, event_id: &str, user_id: &str) -> bool {
        self.events.get(event_id).is_some_and(|u| u.contains(user_id))
    }

    pub fn events(&self) -> usize { self.events.len() }

    pub fn clear(&mut self) { self.events.clear(); }
}
