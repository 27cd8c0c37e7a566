use std::collections::BTreeSet;

/// Server-reported participant count plus who is typing right now.
///
/// The count is never computed locally; each `users_count` event replaces it.
#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    count: u64,
    typing: BTreeSet<String>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn set_count(&mut self, count: u64) {
        self.count = count;
    }

    /// Participants currently typing, sorted by name.
    pub fn typing(&self) -> Vec<String> {
        self.typing.iter().cloned().collect()
    }

    /// Returns true if the typing set changed.
    pub fn start_typing(&mut self, name: &str) -> bool {
        self.typing.insert(name.to_string())
    }

    /// Remove `name`, or everyone when the server did not say who stopped.
    /// Returns true if the typing set changed.
    pub fn stop_typing(&mut self, name: Option<&str>) -> bool {
        match name {
            Some(name) => self.typing.remove(name),
            None => self.clear_typing(),
        }
    }

    pub fn clear_typing(&mut self) -> bool {
        let changed = !self.typing.is_empty();
        self.typing.clear();
        changed
    }
}
