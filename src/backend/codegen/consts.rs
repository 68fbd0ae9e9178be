//! Method-scoped constant-propagation table.
//!
//! Keys are scalar names or `name-<index>` for array slots with literal
//! indices. Lookups are answered only when optimization is on and
//! generation is not inside a loop body; insertions and removals happen
//! unconditionally so the state stays accurate for the join merges.

use std::collections::HashMap;

/// Key for an array slot with a literal index.
pub fn element_key(name: &str, index: i32) -> String {
    format!("{name}-{index}")
}

#[derive(Debug, Clone, Default)]
pub struct ConstTable {
    values: HashMap<String, i32>,
    snapshots: Vec<HashMap<String, i32>>,
    loop_depth: usize,
    enabled: bool,
}

impl ConstTable {
    pub fn new(enabled: bool) -> Self {
        ConstTable {
            enabled,
            ..ConstTable::default()
        }
    }

    /// Known value of `key`, if propagation may be used here.
    pub fn lookup(&self, key: &str) -> Option<i32> {
        if !self.enabled || self.loop_depth > 0 {
            return None;
        }
        self.values.get(key).copied()
    }

    pub fn set(&mut self, key: &str, value: i32) {
        self.values.insert(key.to_string(), value);
    }

    pub fn clear_key(&mut self, key: &str) {
        self.values.remove(key);
    }

    /// Drops every entry for `name`: the base key and all slot keys.
    /// Used when a store cannot be pinned to one slot.
    pub fn invalidate_array(&mut self, name: &str) {
        let prefix = format!("{name}-");
        self.values
            .retain(|key, _| key != name && !key.starts_with(&prefix));
    }

    /// Adds `delta` to a tracked value, if there is one (the `iinc` case).
    pub fn bump(&mut self, key: &str, delta: i32) {
        if let Some(value) = self.values.get_mut(key) {
            *value = value.wrapping_add(delta);
        }
    }

    // ── Join handling ────────────────────────────────────────────────────

    /// Remembers the state ahead of a branch or loop.
    pub fn push_snapshot(&mut self) {
        self.snapshots.push(self.values.clone());
    }

    /// Merges back at a join point: the snapshot survives minus every
    /// entry whose current value differs or has disappeared.
    pub fn restore(&mut self) {
        let mut snapshot = self.snapshots.pop().unwrap_or_default();
        snapshot.retain(|key, value| self.values.get(key) == Some(value));
        self.values = snapshot;
    }

    /// Loop bodies may never consume propagated values; nesting counts.
    pub fn enter_loop(&mut self) {
        self.loop_depth += 1;
    }

    pub fn exit_loop(&mut self) {
        self.loop_depth = self.loop_depth.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_are_gated() {
        let mut t = ConstTable::new(false);
        t.set("a", 3);
        assert_eq!(t.lookup("a"), None);

        let mut t = ConstTable::new(true);
        t.set("a", 3);
        assert_eq!(t.lookup("a"), Some(3));
        t.enter_loop();
        assert_eq!(t.lookup("a"), None);
        t.exit_loop();
        assert_eq!(t.lookup("a"), Some(3));
    }

    #[test]
    fn merge_keeps_only_unchanged_entries() {
        let mut t = ConstTable::new(true);
        t.set("a", 1);
        t.set("b", 2);
        t.push_snapshot();
        t.set("a", 9); // changed in the branch
        t.clear_key("b"); // gone in the branch
        t.set("c", 3); // new in the branch
        t.restore();
        assert_eq!(t.lookup("a"), None);
        assert_eq!(t.lookup("b"), None);
        assert_eq!(t.lookup("c"), None);
    }

    #[test]
    fn bump_only_touches_tracked_values() {
        let mut t = ConstTable::new(true);
        t.bump("a", 1);
        assert_eq!(t.lookup("a"), None);
        t.set("a", 4);
        t.bump("a", -2);
        assert_eq!(t.lookup("a"), Some(2));
    }

    #[test]
    fn array_invalidation_sweeps_slot_keys() {
        let mut t = ConstTable::new(true);
        t.set("a-0", 1);
        t.set("a-7", 2);
        t.set("ab", 3);
        t.invalidate_array("a");
        assert_eq!(t.lookup("a-0"), None);
        assert_eq!(t.lookup("a-7"), None);
        assert_eq!(t.lookup("ab"), Some(3));
    }
}
