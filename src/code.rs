//! Sequential document codes: `{area}-{category}-{type}-{nnn}`
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::document::{Classification, Scope};

/// Prefix shared by every code of one classification, trailing dash included.
pub fn code_prefix(classification: &Classification, default_category: &str) -> String {
    let category = classification
        .category
        .as_deref()
        .unwrap_or(default_category);
    format!(
        "{}-{}-{}-",
        classification.area, category, classification.doc_type
    )
}

/// Next sequence number after the highest numeric suffix among `existing` codes under `prefix`.
///
/// Codes outside the prefix or with a non-numeric suffix are ignored.
pub fn next_sequence<'a>(prefix: &str, existing: impl IntoIterator<Item = &'a str>) -> u32 {
    existing
        .into_iter()
        .filter_map(|code| code.strip_prefix(prefix))
        .filter_map(|suffix| suffix.parse::<u32>().ok())
        .max()
        .map_or(1, |max| max.saturating_add(1))
}

pub fn format_code(prefix: &str, sequence: u32) -> String {
    format!("{prefix}{sequence:03}")
}

/// Category used when a classification leaves it unset.
pub fn default_category<'a>(scope: Scope, internal: &'a str, external: &'a str) -> &'a str {
    match scope {
        Scope::Internal => internal,
        Scope::External => external,
    }
}

/// One lock per code prefix so that read-max-then-write runs serially per prefix.
#[derive(Debug, Default)]
pub struct PrefixLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PrefixLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, prefix: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(prefix.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Holds a prefix lock; a poisoned lock is still usable since it guards no data.
pub fn acquire(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_uses_default_category() {
        let c = Classification::new("MKT", "PR");
        assert_eq!(code_prefix(&c, "GEN"), "MKT-GEN-PR-");
        assert_eq!(code_prefix(&c.with_category("QA"), "GEN"), "MKT-QA-PR-");
    }

    #[test]
    fn sequence_starts_at_one() {
        assert_eq!(next_sequence("MKT-GEN-PR-", []), 1);
    }

    #[test]
    fn sequence_follows_highest_suffix() {
        let codes = ["MKT-GEN-PR-001", "MKT-GEN-PR-007", "MKT-GEN-PR-003", "HR-GEN-PR-042"];
        assert_eq!(next_sequence("MKT-GEN-PR-", codes), 8);
    }

    #[test]
    fn sentinel_and_foreign_suffixes_are_ignored() {
        let codes = ["New", "MKT-GEN-PR-abc", "MKT-GEN-PRX-009", "MKT-GEN-PR-002"];
        assert_eq!(next_sequence("MKT-GEN-PR-", codes), 3);
    }

    #[test]
    fn suffix_is_zero_padded_to_three_digits() {
        assert_eq!(format_code("MKT-GEN-PR-", 4), "MKT-GEN-PR-004");
        assert_eq!(format_code("MKT-GEN-PR-", 1234), "MKT-GEN-PR-1234");
    }

    #[test]
    fn same_prefix_shares_one_lock() {
        let locks = PrefixLocks::new();
        assert!(Arc::ptr_eq(&locks.lock_for("A-"), &locks.lock_for("A-")));
        assert!(!Arc::ptr_eq(&locks.lock_for("A-"), &locks.lock_for("B-")));
    }
}
