use std::time::Duration;

use sled::transaction::TransactionError;

use crate::document::DocumentState;
use crate::types::{DocumentId, FolderId, UserId};

/// A precondition on the data carried by a document or folder was not met.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("A final file must be uploaded before this step")]
    MissingFinalFile,
    #[error("Both the editable file and the final file must be uploaded before review")]
    MissingFiles,
    #[error("Assign at least one reviewer")]
    NoReviewers,
    #[error("Assign at least one approver")]
    NoApprovers,
    #[error("A change reason is required for version {version}")]
    MissingChangeReason { version: String },
    #[error("A revision with code {code} and version {version} already exists")]
    DuplicateCodeVersion { code: String, version: String },
    #[error("Document has no code assigned yet")]
    CodeNotAssigned,
    #[error("Classification field {field} must be a short alphanumeric code, got {value:?}")]
    InvalidClassification { field: &'static str, value: String },
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("Direct publication is only valid for external documents")]
    NotExternal,
    #[error("A document under review needs a file and at least one reviewer")]
    ReviewIncomplete,
    #[error("Folder {folder} cannot be moved below its own descendant {target}")]
    FolderCycle { folder: FolderId, target: FolderId },
    #[error("Folder {0} still contains documents")]
    FolderInUse(FolderId),
    #[error("Version {version} is already being revised by {revision}")]
    RevisionInProgress {
        version: String,
        revision: DocumentId,
    },
}

/// Which role set a conflict-of-interest check found the owner in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleSet {
    Reviewers,
    Approvers,
}

impl std::fmt::Display for RoleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoleSet::Reviewers => f.write_str("reviewer"),
            RoleSet::Approvers => f.write_str("approver"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LifecycleError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{user} may not {action}: {reason}")]
    PermissionDenied {
        user: UserId,
        action: &'static str,
        reason: String,
    },
    #[error("Owner {owner} cannot also be a {role} of the document")]
    ConflictOfInterest { owner: UserId, role: RoleSet },
    #[error("Cannot {action} a document in state {state}")]
    StateTransition {
        action: &'static str,
        state: DocumentState,
    },
    #[error("Document {0} not found")]
    DocumentNotFound(DocumentId),
    #[error("Folder {0} not found")]
    FolderNotFound(FolderId),
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("record codec failure: {0}")]
    Codec(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl LifecycleError {
    pub(crate) fn denied(user: &UserId, action: &'static str, reason: impl Into<String>) -> Self {
        LifecycleError::PermissionDenied {
            user: user.clone(),
            action,
            reason: reason.into(),
        }
    }
}

impl From<TransactionError<LifecycleError>> for LifecycleError {
    fn from(value: TransactionError<LifecycleError>) -> Self {
        match value {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => LifecycleError::Storage(e),
        }
    }
}

impl From<minicbor::decode::Error> for LifecycleError {
    fn from(value: minicbor::decode::Error) -> Self {
        LifecycleError::Codec(value.to_string())
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for LifecycleError {
    fn from(value: minicbor::encode::Error<E>) -> Self {
        LifecycleError::Codec(value.to_string())
    }
}

/// Failure of a delegated call. Logged and swallowed by the service.
#[derive(thiserror::Error, Debug)]
pub enum CollaboratorError {
    #[error("{service} failed: {reason}")]
    Failed {
        service: &'static str,
        reason: String,
    },
    #[error("{service} did not answer within {after:?}")]
    TimedOut {
        service: &'static str,
        after: Duration,
    },
    #[error("{0} is not configured")]
    Unavailable(&'static str),
}
