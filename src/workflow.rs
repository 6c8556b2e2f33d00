//! Approval state machine.
//!
//! Each transition validates its guards against a document held in memory and either
//! fails without touching it or mutates it and returns an [`Outcome`]: the messages to
//! post on the event log and the best-effort side effects to request once the change
//! is committed.
use chrono::Utc;

use crate::document::{Document, DocumentState, RejectionRecord, RevisionType, Scope};
use crate::error::{LifecycleError, RoleSet, ValidationError};
use crate::revision::spawn_revision;
use crate::types::{DocumentId, TimeStamp, UserId};

/// The acting user and whether the identity service grants them elevated privilege.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user: UserId,
    pub elevated: bool,
}

impl Caller {
    pub fn new(user: UserId, elevated: bool) -> Self {
        Self { user, elevated }
    }
}

/// Lifecycle commands that can be applied to a single document or a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartFlow,
    PublishDirect,
    SubmitReview,
    ReviewPass,
    Approve,
    Reject { reason: String },
}

/// A code chosen by the code generator, applied by the transition that leaves draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedCode {
    pub code: String,
    pub sequence_number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Notify { user: UserId, note: String },
    CloseTask { user: UserId, feedback: String },
    RenderCertificate,
    Watermark { text: String },
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    pub log: Vec<String>,
    pub predecessor_log: Vec<String>,
    pub effects: Vec<Effect>,
}

impl Outcome {
    fn posted(message: impl Into<String>) -> Self {
        Self {
            log: vec![message.into()],
            ..Self::default()
        }
    }
}

fn expect_state(
    doc: &Document,
    action: &'static str,
    allowed: &[DocumentState],
) -> Result<(), LifecycleError> {
    if allowed.contains(&doc.state) {
        Ok(())
    } else {
        Err(LifecycleError::StateTransition {
            action,
            state: doc.state,
        })
    }
}

/// The owner may sit in neither role set unless the caller is elevated.
pub fn ensure_no_conflict(doc: &Document, caller: &Caller) -> Result<(), LifecycleError> {
    if caller.elevated {
        return Ok(());
    }
    let role = if doc.reviewer_ids.contains(&doc.owner_id) {
        RoleSet::Reviewers
    } else if doc.approver_ids.contains(&doc.owner_id) {
        RoleSet::Approvers
    } else {
        return Ok(());
    };
    Err(LifecycleError::ConflictOfInterest {
        owner: doc.owner_id.clone(),
        role,
    })
}

/// Re-derives the open tasks of a document in review or validation after its role sets
/// were edited. Newly responsible users are notified, dropped ones have their task closed.
pub fn reassign_tasks(doc: &mut Document) -> Outcome {
    let (responsible, note) = match doc.state {
        DocumentState::Review => (
            doc.reviewer_ids.clone(),
            format!("Technical review (v{}): {}", doc.version, doc.code),
        ),
        DocumentState::Validate => (
            doc.approver_ids.clone(),
            format!("Approval (v{}): {}", doc.version, doc.code),
        ),
        _ => return Outcome::default(),
    };

    let mut outcome = Outcome::default();
    outcome.effects.extend(
        doc.open_tasks
            .difference(&responsible)
            .map(|user| Effect::CloseTask {
                user: user.clone(),
                feedback: "Reassigned".into(),
            }),
    );
    outcome.effects.extend(
        responsible
            .difference(&doc.open_tasks)
            .map(|user| Effect::Notify {
                user: user.clone(),
                note: note.clone(),
            }),
    );
    if !outcome.effects.is_empty() {
        outcome.log.push("Responsible users changed.".into());
    }
    doc.open_tasks = responsible;
    outcome
}

fn assign_code(doc: &mut Document, assigned: Option<AssignedCode>) -> Result<(), LifecycleError> {
    if doc.has_code() {
        return Ok(());
    }
    let assigned = assigned.ok_or(ValidationError::CodeNotAssigned)?;
    doc.code = assigned.code;
    doc.sequence_number = assigned.sequence_number;
    Ok(())
}

fn stamp_issue(doc: &mut Document, caller: &Caller, now: &TimeStamp<Utc>, review_months: u32) {
    doc.issue_date = Some(now.clone());
    doc.approved_by = Some(caller.user.clone());
    doc.approval_date = Some(now.clone());
    doc.next_review_date = (review_months > 0).then(|| now.plus_months(review_months));
    doc.open_tasks.clear();
}

fn supersede(
    doc: &Document,
    predecessor: Option<&mut Document>,
    outcome: &mut Outcome,
) -> Result<(), LifecycleError> {
    let Some(expected) = &doc.predecessor_id else {
        return Ok(());
    };
    let predecessor = predecessor.ok_or_else(|| LifecycleError::DocumentNotFound(expected.clone()))?;
    predecessor.state = DocumentState::Obsolete;
    predecessor.active_revision_id = None;
    predecessor.open_tasks.clear();
    outcome
        .predecessor_log
        .push(format!("Superseded by v{}", doc.version));
    Ok(())
}

pub fn start_flow(
    doc: &mut Document,
    assigned: Option<AssignedCode>,
) -> Result<Outcome, LifecycleError> {
    expect_state(doc, "start the flow of", &[DocumentState::Draft])?;
    assign_code(doc, assigned)?;
    doc.state = DocumentState::Upload;
    Ok(Outcome::posted(format!(
        "Document flow started under code {}.",
        doc.code
    )))
}

pub fn publish_direct(
    doc: &mut Document,
    caller: &Caller,
    now: &TimeStamp<Utc>,
    review_months: u32,
    assigned: Option<AssignedCode>,
    predecessor: Option<&mut Document>,
) -> Result<Outcome, LifecycleError> {
    expect_state(doc, "publish", &[DocumentState::Draft, DocumentState::Upload])?;
    if doc.scope != Scope::External {
        return Err(ValidationError::NotExternal.into());
    }
    if doc.final_file.is_none() {
        return Err(ValidationError::MissingFinalFile.into());
    }
    assign_code(doc, assigned)?;

    let mut outcome =
        Outcome::posted("External document published directly to the library.");
    supersede(doc, predecessor, &mut outcome)?;
    doc.state = DocumentState::Approved;
    stamp_issue(doc, caller, now, review_months);
    outcome.effects.push(Effect::RenderCertificate);
    Ok(outcome)
}

pub fn submit_review(doc: &mut Document) -> Result<Outcome, LifecycleError> {
    expect_state(doc, "submit for review", &[DocumentState::Upload])?;
    match doc.scope {
        Scope::Internal if doc.editable_file.is_none() || doc.final_file.is_none() => {
            return Err(ValidationError::MissingFiles.into());
        }
        Scope::External if doc.final_file.is_none() => {
            return Err(ValidationError::MissingFinalFile.into());
        }
        _ => {}
    }
    let needs_reason = doc.scope == Scope::Internal && !doc.is_initial_version();
    if needs_reason && doc.change_reason.is_none() {
        return Err(ValidationError::MissingChangeReason {
            version: doc.version.clone(),
        }
        .into());
    }

    let mut outcome = Outcome::default();
    let (responsible, note) = if doc.revision_type == Some(RevisionType::Minor) {
        if doc.approver_ids.is_empty() {
            return Err(ValidationError::NoApprovers.into());
        }
        doc.state = DocumentState::Validate;
        outcome.log.push("Minor revision: skipping technical review.".into());
        (
            doc.approver_ids.clone(),
            format!("Approval (v{}): {}", doc.version, doc.code),
        )
    } else {
        if doc.reviewer_ids.is_empty() {
            return Err(ValidationError::NoReviewers.into());
        }
        doc.state = DocumentState::Review;
        outcome.log.push("Submitted for technical review.".into());
        (
            doc.reviewer_ids.clone(),
            format!("Technical review (v{}): {}", doc.version, doc.code),
        )
    };

    outcome
        .effects
        .extend(responsible.iter().map(|user| Effect::Notify {
            user: user.clone(),
            note: note.clone(),
        }));
    doc.open_tasks = responsible;
    Ok(outcome)
}

pub fn review_pass(
    doc: &mut Document,
    caller: &Caller,
    now: &TimeStamp<Utc>,
) -> Result<Outcome, LifecycleError> {
    expect_state(doc, "pass review of", &[DocumentState::Review])?;
    if !caller.elevated && !doc.reviewer_ids.contains(&caller.user) {
        return Err(LifecycleError::denied(
            &caller.user,
            "pass review",
            format!("not a reviewer of {}", doc.code),
        ));
    }
    if doc.approver_ids.is_empty() {
        return Err(ValidationError::NoApprovers.into());
    }

    doc.state = DocumentState::Validate;
    doc.reviewed_by = Some(caller.user.clone());
    doc.review_date = Some(now.clone());
    doc.open_tasks = doc.approver_ids.clone();

    let mut outcome = Outcome::posted("Technical review passed.");
    outcome.effects.push(Effect::CloseTask {
        user: caller.user.clone(),
        feedback: "Review passed".into(),
    });
    let note = format!("Review passed. Final approval required: {}", doc.code);
    outcome
        .effects
        .extend(doc.approver_ids.iter().map(|user| Effect::Notify {
            user: user.clone(),
            note: note.clone(),
        }));
    Ok(outcome)
}

pub fn approve(
    doc: &mut Document,
    caller: &Caller,
    now: &TimeStamp<Utc>,
    review_months: u32,
    predecessor: Option<&mut Document>,
) -> Result<Outcome, LifecycleError> {
    expect_state(doc, "approve", &[DocumentState::Validate])?;
    if !caller.elevated && !doc.approver_ids.contains(&caller.user) {
        return Err(LifecycleError::denied(
            &caller.user,
            "approve",
            format!("not an approver of {}", doc.code),
        ));
    }

    let mut outcome = Outcome::posted(format!("Version {} officially approved.", doc.version));
    supersede(doc, predecessor, &mut outcome)?;
    doc.state = DocumentState::Approved;
    stamp_issue(doc, caller, now, review_months);
    outcome.effects.extend([
        Effect::CloseTask {
            user: caller.user.clone(),
            feedback: "Approved".into(),
        },
        Effect::RenderCertificate,
        Effect::Watermark {
            text: format!("CONTROLLED COPY v{}", doc.version),
        },
    ]);
    Ok(outcome)
}

pub fn reject(
    doc: &mut Document,
    caller: &Caller,
    record: &RejectionRecord,
) -> Result<Outcome, LifecycleError> {
    expect_state(
        doc,
        "reject",
        &[DocumentState::Review, DocumentState::Validate],
    )?;
    if !caller.elevated && !doc.open_tasks.contains(&caller.user) {
        return Err(LifecycleError::denied(
            &caller.user,
            "reject",
            format!("no open task on {}", doc.code),
        ));
    }

    let reason = record.reason();
    let mut outcome = Outcome::posted(format!(
        "<b>DOCUMENT REJECTED</b><br/><b>Reason:</b> {reason}"
    ));
    outcome.effects.extend([
        Effect::CloseTask {
            user: caller.user.clone(),
            feedback: format!("Rejected: {reason}"),
        },
        Effect::Notify {
            user: doc.owner_id.clone(),
            note: format!(
                "Your document was rejected: {reason}. Please correct it and submit again."
            ),
        },
    ]);
    doc.state = DocumentState::Upload;
    doc.open_tasks = [doc.owner_id.clone()].into();
    Ok(outcome)
}

/// A revision can only be spawned from the live version of a code, and only one at a time.
pub fn ensure_revisable(source: &Document) -> Result<(), LifecycleError> {
    if !source.has_code() {
        return Err(ValidationError::CodeNotAssigned.into());
    }
    expect_state(source, "revise", &[DocumentState::Approved])?;
    if let Some(revision) = &source.active_revision_id {
        return Err(ValidationError::RevisionInProgress {
            version: source.version.clone(),
            revision: revision.clone(),
        }
        .into());
    }
    Ok(())
}

/// Spawns the next revision of `source`.
///
/// The returned outcome's `predecessor_log` belongs to `source`, its `log` to the revision.
pub fn revise(
    source: &mut Document,
    caller: &Caller,
    new_id: DocumentId,
    revision_type: RevisionType,
) -> Result<(Document, Outcome), LifecycleError> {
    ensure_revisable(source)?;

    let revision = spawn_revision(source, new_id, revision_type);
    ensure_no_conflict(&revision, caller)?;

    let kind = match revision_type {
        RevisionType::Major => "major",
        RevisionType::Minor => "minor",
    };
    let outcome = Outcome {
        log: vec![format!(
            "New {kind} revision v{} created from v{}.",
            revision.version, source.version
        )],
        predecessor_log: vec![format!("Revision v{} in progress.", revision.version)],
        effects: Vec::new(),
    };
    Ok((revision, outcome))
}
