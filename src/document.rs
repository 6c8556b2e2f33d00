//! Controlled documents and their payloads
use std::collections::BTreeSet;
use std::fmt;

use chrono::Utc;
use minicbor::bytes::ByteVec;

use crate::error::ValidationError;
use crate::types::{DocumentId, FolderId, TimeStamp, UserId};

/// Code carried by a document until `start_flow` assigns a real one.
pub const UNASSIGNED_CODE: &str = "New";
/// Version label of the first version of every document.
pub const INITIAL_VERSION: &str = "1.0";

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentState {
    #[n(0)]
    Draft,
    #[n(1)]
    Upload,
    #[n(2)]
    Review,
    #[n(3)]
    Validate,
    #[n(4)]
    Approved,
    #[n(5)]
    Rejected,
    #[n(6)]
    Obsolete,
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DocumentState::Draft => "draft",
            DocumentState::Upload => "upload",
            DocumentState::Review => "review",
            DocumentState::Validate => "validate",
            DocumentState::Approved => "approved",
            DocumentState::Rejected => "rejected",
            DocumentState::Obsolete => "obsolete",
        };
        f.write_str(name)
    }
}

/// Internal documents go through review and approval, external ones are published directly.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Scope {
    #[default]
    #[n(0)]
    Internal,
    #[n(1)]
    External,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionType {
    #[n(0)]
    Major,
    #[n(1)]
    Minor,
}

/// An uploaded file. The digest identifies the exact content.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct FilePayload {
    #[n(0)]
    pub filename: String,
    #[n(1)]
    pub content: ByteVec,
    #[n(2)]
    pub digest: String,
}

impl FilePayload {
    pub fn new(filename: impl Into<String>, content: Vec<u8>) -> Self {
        let digest = sha256::digest(content.as_slice());
        Self {
            filename: filename.into(),
            content: ByteVec::from(content),
            digest,
        }
    }
}

/// Short codes the document code is built from.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    #[n(0)]
    pub area: String,
    #[n(1)]
    pub category: Option<String>,
    #[n(2)]
    pub doc_type: String,
}

impl Classification {
    pub fn new(area: &str, doc_type: &str) -> Self {
        Self {
            area: area.to_owned(),
            category: None,
            doc_type: doc_type.to_owned(),
        }
    }
    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_owned());
        self
    }
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_short_code("area", &self.area)?;
        check_short_code("type", &self.doc_type)?;
        if let Some(category) = &self.category {
            check_short_code("category", category)?;
        }
        Ok(())
    }
}

fn check_short_code(field: &'static str, value: &str) -> Result<(), ValidationError> {
    let valid = !value.is_empty()
        && value.len() <= 8
        && value.chars().all(|c| c.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidClassification {
            field,
            value: value.to_owned(),
        })
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Document {
    #[n(0)]
    pub id: DocumentId,
    #[n(1)]
    pub title: String,
    #[n(2)]
    pub code: String,
    #[n(3)]
    pub version: String,
    #[n(4)]
    pub sequence_number: u32,
    #[n(5)]
    pub folder_id: FolderId,
    #[n(6)]
    pub classification: Classification,
    #[n(7)]
    pub scope: Scope,
    #[n(8)]
    pub state: DocumentState,
    #[n(9)]
    pub predecessor_id: Option<DocumentId>,
    #[n(10)]
    pub active_revision_id: Option<DocumentId>,
    #[n(11)]
    pub revision_type: Option<RevisionType>,
    #[n(12)]
    pub owner_id: UserId,
    #[n(13)]
    pub reviewer_ids: BTreeSet<UserId>,
    #[n(14)]
    pub approver_ids: BTreeSet<UserId>,
    #[n(15)]
    pub reviewed_by: Option<UserId>,
    #[n(16)]
    pub review_date: Option<TimeStamp<Utc>>,
    #[n(17)]
    pub approved_by: Option<UserId>,
    #[n(18)]
    pub approval_date: Option<TimeStamp<Utc>>,
    #[n(19)]
    pub issue_date: Option<TimeStamp<Utc>>,
    #[n(20)]
    pub next_review_date: Option<TimeStamp<Utc>>,
    #[n(21)]
    pub editable_file: Option<FilePayload>,
    #[n(22)]
    pub final_file: Option<FilePayload>,
    #[n(23)]
    pub change_reason: Option<String>,
    #[n(24)]
    pub description: Option<String>,
    #[n(25)]
    pub certificate_ref: Option<String>,
    #[n(26)]
    pub open_tasks: BTreeSet<UserId>, // users with a pending activity on this document
}

impl Document {
    /// A fresh draft: unassigned code, version 1.0, no files or signatures.
    pub fn draft(
        id: DocumentId,
        title: String,
        folder_id: FolderId,
        classification: Classification,
        scope: Scope,
        owner_id: UserId,
    ) -> Self {
        Self {
            id,
            title,
            code: UNASSIGNED_CODE.to_string(),
            version: INITIAL_VERSION.to_string(),
            sequence_number: 0,
            folder_id,
            classification,
            scope,
            state: DocumentState::Draft,
            predecessor_id: None,
            active_revision_id: None,
            revision_type: None,
            owner_id,
            reviewer_ids: BTreeSet::new(),
            approver_ids: BTreeSet::new(),
            reviewed_by: None,
            review_date: None,
            approved_by: None,
            approval_date: None,
            issue_date: None,
            next_review_date: None,
            editable_file: None,
            final_file: None,
            change_reason: None,
            description: None,
            certificate_ref: None,
            open_tasks: BTreeSet::new(),
        }
    }
    pub fn has_code(&self) -> bool {
        self.code != UNASSIGNED_CODE
    }
    pub fn is_initial_version(&self) -> bool {
        self.predecessor_id.is_none()
    }
    /// Review-state consistency checked after every edit.
    pub fn review_consistent(&self) -> bool {
        self.state != DocumentState::Review
            || ((self.final_file.is_some() || self.editable_file.is_some())
                && !self.reviewer_ids.is_empty())
    }
}

/// Input for creating a draft.
#[derive(Debug, Clone, Default)]
pub struct NewDocument {
    pub title: String,
    pub folder_id: Option<FolderId>,
    pub classification: Option<Classification>,
    pub scope: Scope,
    pub owner_id: Option<UserId>,
    pub reviewer_ids: BTreeSet<UserId>,
    pub approver_ids: BTreeSet<UserId>,
    pub editable_file: Option<FilePayload>,
    pub final_file: Option<FilePayload>,
}

impl NewDocument {
    pub fn new(title: &str, folder_id: FolderId, classification: Classification) -> Self {
        Self {
            title: title.to_owned(),
            folder_id: Some(folder_id),
            classification: Some(classification),
            ..Self::default()
        }
    }
    pub fn set_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }
    pub fn set_owner(mut self, owner: UserId) -> Self {
        self.owner_id = Some(owner);
        self
    }
    pub fn add_reviewer(mut self, user: UserId) -> Self {
        self.reviewer_ids.insert(user);
        self
    }
    pub fn add_approver(mut self, user: UserId) -> Self {
        self.approver_ids.insert(user);
        self
    }
    pub fn set_editable_file(mut self, file: FilePayload) -> Self {
        self.editable_file = Some(file);
        self
    }
    pub fn set_final_file(mut self, file: FilePayload) -> Self {
        self.final_file = Some(file);
        self
    }
}

/// A partial edit. `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct DocumentPatch {
    pub title: Option<String>,
    pub folder_id: Option<FolderId>,
    pub classification: Option<Classification>,
    pub scope: Option<Scope>,
    pub owner_id: Option<UserId>,
    pub reviewer_ids: Option<BTreeSet<UserId>>,
    pub approver_ids: Option<BTreeSet<UserId>>,
    pub editable_file: Option<Option<FilePayload>>,
    pub final_file: Option<Option<FilePayload>>,
    pub change_reason: Option<String>,
    pub next_review_date: Option<TimeStamp<Utc>>,
}

impl DocumentPatch {
    pub fn touches_roles(&self) -> bool {
        self.owner_id.is_some() || self.reviewer_ids.is_some() || self.approver_ids.is_some()
    }
    pub fn touches_classification(&self) -> bool {
        self.classification.is_some() || self.scope.is_some()
    }
    /// Applies the edit. Code, version, state and the version links are never patched.
    pub fn apply(self, doc: &mut Document) {
        if let Some(title) = self.title {
            doc.title = title;
        }
        if let Some(folder_id) = self.folder_id {
            doc.folder_id = folder_id;
        }
        if let Some(classification) = self.classification {
            doc.classification = classification;
        }
        if let Some(scope) = self.scope {
            doc.scope = scope;
        }
        if let Some(owner) = self.owner_id {
            doc.owner_id = owner;
        }
        if let Some(reviewers) = self.reviewer_ids {
            doc.reviewer_ids = reviewers;
        }
        if let Some(approvers) = self.approver_ids {
            doc.approver_ids = approvers;
        }
        if let Some(file) = self.editable_file {
            doc.editable_file = file;
        }
        if let Some(file) = self.final_file {
            doc.final_file = file;
        }
        if let Some(reason) = self.change_reason {
            doc.change_reason = Some(reason).filter(|r| !r.trim().is_empty());
        }
        if let Some(date) = self.next_review_date {
            doc.next_review_date = Some(date);
        }
    }
}

/// Reason captured when a reviewer or approver sends a document back. Consumed by the reject step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectionRecord {
    document_id: DocumentId,
    reason: String,
}

impl RejectionRecord {
    pub fn new(document_id: DocumentId, reason: &str) -> Result<Self, ValidationError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ValidationError::Empty("rejection reason"));
        }
        Ok(Self {
            document_id,
            reason: reason.to_owned(),
        })
    }
    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }
    pub fn reason(&self) -> &str {
        &self.reason
    }
}
