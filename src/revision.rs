//! Version chain: computing the next label and spawning a revision from its source
use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::document::{Document, DocumentState, RevisionType};
use crate::types::DocumentId;

/// Next version label after `current`.
///
/// Labels that do not parse as a number count as `1.0`. A minor bump adds one tenth,
/// so minor-bumping `1.9` yields `2.0`, the same label a major bump of `1.x` produces.
pub fn next_version(current: &str, revision_type: RevisionType) -> String {
    let current = current
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(1.0);

    match revision_type {
        RevisionType::Major => format!("{}.0", current.floor() as i64 + 1),
        RevisionType::Minor => format!("{:.1}", current + 0.1),
    }
}

/// Orders version labels numerically, falling back to text order for labels that are not numbers.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or_else(|| a.cmp(b)),
        _ => a.cmp(b),
    }
}

/// Builds the revision that will supersede `source` and links `source` forward to it.
///
/// Classification, scope, owner and role sets are carried over; files, signatures,
/// dates and the change reason start empty.
pub fn spawn_revision(
    source: &mut Document,
    new_id: DocumentId,
    revision_type: RevisionType,
) -> Document {
    let revision = Document {
        id: new_id.clone(),
        title: source.title.clone(),
        code: source.code.clone(),
        version: next_version(&source.version, revision_type),
        sequence_number: source.sequence_number,
        folder_id: source.folder_id.clone(),
        classification: source.classification.clone(),
        scope: source.scope,
        state: DocumentState::Upload,
        predecessor_id: Some(source.id.clone()),
        active_revision_id: None,
        revision_type: Some(revision_type),
        owner_id: source.owner_id.clone(),
        reviewer_ids: source.reviewer_ids.clone(),
        approver_ids: source.approver_ids.clone(),
        reviewed_by: None,
        review_date: None,
        approved_by: None,
        approval_date: None,
        issue_date: None,
        next_review_date: None,
        editable_file: None,
        final_file: None,
        change_reason: None,
        description: source.description.clone(),
        certificate_ref: None,
        open_tasks: BTreeSet::new(),
    };
    source.active_revision_id = Some(new_id);
    revision
}
