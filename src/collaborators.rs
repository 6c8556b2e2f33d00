//! Services the engine consults or notifies but does not implement
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use crate::document::FilePayload;
use crate::error::CollaboratorError;
use crate::types::{DocumentId, GroupId, UserId};

/// Answers privilege and group-membership questions.
pub trait IdentityOracle: Send + Sync {
    fn has_elevated_privilege(&self, user: &UserId) -> bool;
    fn group_members(&self, group: &GroupId) -> BTreeSet<UserId>;
}

/// Delivers task notifications to users.
pub trait NotificationService: Send + Sync {
    fn schedule(
        &self,
        document: &DocumentId,
        user: &UserId,
        note: &str,
    ) -> Result<(), CollaboratorError>;
    fn close_for_user(
        &self,
        document: &DocumentId,
        user: &UserId,
        feedback: &str,
    ) -> Result<(), CollaboratorError>;
}

/// Renders certificates and stamps files.
pub trait RenderingService: Send + Sync {
    /// Returns a reference to the rendered certificate artifact.
    fn generate_certificate(&self, document: &DocumentId) -> Result<String, CollaboratorError>;
    fn watermark(&self, file: &FilePayload, text: &str) -> Result<FilePayload, CollaboratorError>;
}

pub trait TextGenerationService: Send + Sync {
    fn summarize(&self, prompt: &str) -> Result<String, CollaboratorError>;
}

/// Fixed identity directory: a set of administrators and named groups.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    admins: BTreeSet<UserId>,
    groups: BTreeMap<GroupId, BTreeSet<UserId>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_admin(mut self, user: UserId) -> Self {
        self.admins.insert(user);
        self
    }
    pub fn with_member(mut self, group: GroupId, user: UserId) -> Self {
        self.groups.entry(group).or_default().insert(user);
        self
    }
}

impl IdentityOracle for StaticDirectory {
    fn has_elevated_privilege(&self, user: &UserId) -> bool {
        self.admins.contains(user)
    }
    fn group_members(&self, group: &GroupId) -> BTreeSet<UserId> {
        self.groups.get(group).cloned().unwrap_or_default()
    }
}

/// Stand-in for collaborators that are not wired up; every call reports `Unavailable`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Disconnected;

impl NotificationService for Disconnected {
    fn schedule(&self, _: &DocumentId, _: &UserId, _: &str) -> Result<(), CollaboratorError> {
        Err(CollaboratorError::Unavailable("notification service"))
    }
    fn close_for_user(&self, _: &DocumentId, _: &UserId, _: &str) -> Result<(), CollaboratorError> {
        Err(CollaboratorError::Unavailable("notification service"))
    }
}

impl RenderingService for Disconnected {
    fn generate_certificate(&self, _: &DocumentId) -> Result<String, CollaboratorError> {
        Err(CollaboratorError::Unavailable("rendering service"))
    }
    fn watermark(&self, _: &FilePayload, _: &str) -> Result<FilePayload, CollaboratorError> {
        Err(CollaboratorError::Unavailable("rendering service"))
    }
}

impl TextGenerationService for Disconnected {
    fn summarize(&self, _: &str) -> Result<String, CollaboratorError> {
        Err(CollaboratorError::Unavailable("text generation service"))
    }
}

/// The collaborator set a service is wired with.
#[derive(Clone)]
pub struct Collaborators {
    pub identity: Arc<dyn IdentityOracle>,
    pub notifications: Arc<dyn NotificationService>,
    pub rendering: Arc<dyn RenderingService>,
    pub text: Arc<dyn TextGenerationService>,
}

impl Collaborators {
    pub fn new(identity: Arc<dyn IdentityOracle>) -> Self {
        Self {
            identity,
            notifications: Arc::new(Disconnected),
            rendering: Arc::new(Disconnected),
            text: Arc::new(Disconnected),
        }
    }
}

/// Runs a delegated call on its own thread and gives up after `timeout`.
///
/// A call that times out keeps running detached; its result is dropped.
pub fn call_bounded<T, F>(
    service: &'static str,
    timeout: Duration,
    call: F,
) -> Result<T, CollaboratorError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, CollaboratorError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("{service} call"))
        .spawn(move || {
            let _ = tx.send(call());
        })
        .map_err(|e| CollaboratorError::Failed {
            service,
            reason: e.to_string(),
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(CollaboratorError::TimedOut {
            service,
            after: timeout,
        }),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(CollaboratorError::Failed {
            service,
            reason: "call panicked".into(),
        }),
    }
}
