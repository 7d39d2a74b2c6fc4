use crate::error::{Result, RuleSyncError};
use crate::types::{Rule, SyncStatus};
use std::collections::{BTreeMap, BTreeSet};

/// The in-memory view of local rules, ordered by id.
///
/// Removed rules leave a tombstone (their id) until the owner drains them
/// with [`LocalRuleStore::take_removed`] and deletes the backing files.
/// Inserted rules are marked dirty until drained with
/// [`LocalRuleStore::take_dirty`], so only changed files get rewritten.
#[derive(Debug, Default, Clone)]
pub struct LocalRuleStore {
    rules: BTreeMap<String, Rule>,
    removed: Vec<String>,
    dirty: BTreeSet<String>,
}

impl LocalRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store mirroring rules already on disk: nothing starts dirty.
    pub fn from_rules(rules: impl IntoIterator<Item = Rule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| (rule.id().to_string(), rule))
            .collect();
        Self {
            rules,
            ..Self::default()
        }
    }

    /// Insert or replace a rule. Returns the previous copy, if any.
    pub fn insert(&mut self, rule: Rule) -> Option<Rule> {
        let id = rule.id().to_string();
        self.removed.retain(|r| *r != id);
        self.dirty.insert(id.clone());
        self.rules.insert(id, rule)
    }

    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.rules.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Rule> {
        self.rules.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.rules.contains_key(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<Rule> {
        let rule = self.rules.remove(id)?;
        self.dirty.remove(id);
        self.removed.push(id.to_string());
        Some(rule)
    }

    pub fn set_status(&mut self, id: &str, status: SyncStatus) -> Result<()> {
        let rule = self
            .rules
            .get_mut(id)
            .ok_or_else(|| RuleSyncError::RuleNotFound(id.to_string()))?;
        rule.metadata.sync_status = status;
        Ok(())
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.values()
    }

    /// Owned copies, in id order, for handing to reconciliation.
    pub fn snapshot(&self) -> Vec<Rule> {
        self.rules.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Ids of rules removed since the last call.
    pub fn take_removed(&mut self) -> Vec<String> {
        std::mem::take(&mut self.removed)
    }

    /// Rules inserted since the last call, in id order.
    pub fn take_dirty(&mut self) -> Vec<Rule> {
        std::mem::take(&mut self.dirty)
            .into_iter()
            .filter_map(|id| self.rules.get(&id).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn rule(id: &str) -> Rule {
        Rule::new(id, format!("{id}.md"), format!("# {id}\n"), Utc::now()).unwrap()
    }

    #[test]
    fn iteration_is_ordered_by_id() {
        let store = LocalRuleStore::from_rules([rule("zeta"), rule("alpha"), rule("mid")]);
        let ids: Vec<&str> = store.ids().collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn insert_replaces() {
        let mut store = LocalRuleStore::new();
        assert!(store.insert(rule("a")).is_none());
        assert!(store.insert(rule("a")).is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_leaves_tombstone_until_drained() {
        let mut store = LocalRuleStore::from_rules([rule("a"), rule("b")]);
        store.remove("a").unwrap();
        assert!(store.remove("missing").is_none());
        assert_eq!(store.take_removed(), vec!["a".to_string()]);
        assert!(store.take_removed().is_empty());
    }

    #[test]
    fn reinserting_clears_tombstone() {
        let mut store = LocalRuleStore::from_rules([rule("a")]);
        store.remove("a");
        store.insert(rule("a"));
        assert!(store.take_removed().is_empty());
    }

    #[test]
    fn only_inserted_rules_are_dirty() {
        let mut store = LocalRuleStore::from_rules([rule("a"), rule("b")]);
        assert!(store.take_dirty().is_empty());

        store.insert(rule("c"));
        store.insert(rule("b"));
        store.set_status("a", SyncStatus::Synced).unwrap();
        let dirty: Vec<String> = store.take_dirty().iter().map(|r| r.id().to_string()).collect();
        assert_eq!(dirty, vec!["b", "c"]);
        assert!(store.take_dirty().is_empty());
    }

    #[test]
    fn removing_a_dirty_rule_drops_it_from_the_dirty_set() {
        let mut store = LocalRuleStore::new();
        store.insert(rule("a"));
        store.remove("a");
        assert!(store.take_dirty().is_empty());
        assert_eq!(store.take_removed(), vec!["a".to_string()]);
    }

    #[test]
    fn set_status_on_missing_rule_errors() {
        let mut store = LocalRuleStore::new();
        let err = store.set_status("nope", SyncStatus::Synced).unwrap_err();
        assert!(matches!(err, RuleSyncError::RuleNotFound(_)));
    }
}
