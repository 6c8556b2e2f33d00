//! Shared fixtures for the integration tests: a throwaway sled database, a small cast of
//! users and stand-in collaborator services.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use document_control::collaborators::{
    Collaborators, NotificationService, RenderingService, StaticDirectory,
    TextGenerationService,
};
use document_control::document::{Classification, Document, FilePayload, NewDocument};
use document_control::error::CollaboratorError;
use document_control::folder::{Folder, NewFolder};
use document_control::types::{DocumentId, GroupId, UserId};
use document_control::{DocumentService, EngineConfig};
use tempfile::{TempDir, tempdir};

pub const OWNER: &str = "ana";
pub const REVIEWER: &str = "rui";
pub const APPROVER: &str = "eva";
pub const ADMIN: &str = "root";
pub const AUDITOR: &str = "ines";

pub fn user(name: &str) -> UserId {
    UserId::from(name)
}

pub fn directory() -> StaticDirectory {
    StaticDirectory::new()
        .with_admin(user(ADMIN))
        .with_member(GroupId::from("quality"), user(OWNER))
        .with_member(GroupId::from("quality"), user(REVIEWER))
}

/// The service and the database behind it. Keep the `TempDir` alive for the whole test.
pub struct Harness {
    pub dir: TempDir,
    pub db: Arc<sled::Db>,
    pub service: Arc<DocumentService>,
}

pub fn harness() -> anyhow::Result<Harness> {
    harness_with(|collaborators| collaborators, EngineConfig::default())
}

pub fn harness_with(
    wire: impl FnOnce(Collaborators) -> Collaborators,
    config: EngineConfig,
) -> anyhow::Result<Harness> {
    // each test gets its own database since sled locks the directory it opens
    let dir = tempdir()?;
    let db = Arc::new(sled::open(dir.path().join("documents.db"))?);
    db.clear()?;

    let collaborators = wire(Collaborators::new(Arc::new(directory())));
    let service = Arc::new(DocumentService::with_collaborators(
        Arc::clone(&db),
        collaborators,
        config,
    ));
    Ok(Harness { dir, db, service })
}

pub fn quality_folder(service: &DocumentService) -> anyhow::Result<Folder> {
    Ok(service.create_folder(&user(ADMIN), NewFolder::root("Quality"))?)
}

pub fn sop() -> Classification {
    Classification::new("QA", "SOP")
}

pub fn editable() -> FilePayload {
    FilePayload::new("procedure.docx", b"editable draft".to_vec())
}

pub fn final_pdf() -> FilePayload {
    FilePayload::new("procedure.pdf", b"%PDF-1.7 procedure".to_vec())
}

/// An internal draft with both files and one reviewer and approver.
pub fn internal_draft(title: &str, folder: &Folder) -> NewDocument {
    NewDocument::new(title, folder.id.clone(), sop())
        .add_reviewer(user(REVIEWER))
        .add_approver(user(APPROVER))
        .set_editable_file(editable())
        .set_final_file(final_pdf())
}

/// Runs an internal draft through the whole flow up to approval.
pub fn approved(service: &DocumentService, folder: &Folder) -> anyhow::Result<Document> {
    let doc = service.create_document(&user(OWNER), internal_draft("Handling of samples", folder))?;
    approve_from_draft(service, &doc.id)
}

pub fn approve_from_draft(service: &DocumentService, id: &DocumentId) -> anyhow::Result<Document> {
    service.start_flow(&user(OWNER), id)?;
    service.submit_review(&user(OWNER), id)?;
    service.review_pass(&user(REVIEWER), id)?;
    Ok(service.approve(&user(APPROVER), id)?)
}

/// Records every notification call.
#[derive(Default)]
pub struct Mailbox {
    pub scheduled: Mutex<Vec<(DocumentId, UserId, String)>>,
    pub closed: Mutex<Vec<(DocumentId, UserId, String)>>,
}

impl NotificationService for Mailbox {
    fn schedule(
        &self,
        document: &DocumentId,
        user: &UserId,
        note: &str,
    ) -> Result<(), CollaboratorError> {
        if let Ok(mut scheduled) = self.scheduled.lock() {
            scheduled.push((document.clone(), user.clone(), note.to_owned()));
        }
        Ok(())
    }

    fn close_for_user(
        &self,
        document: &DocumentId,
        user: &UserId,
        feedback: &str,
    ) -> Result<(), CollaboratorError> {
        if let Ok(mut closed) = self.closed.lock() {
            closed.push((document.clone(), user.clone(), feedback.to_owned()));
        }
        Ok(())
    }
}

/// Appends the stamp text to the file content.
pub struct Stamper;

impl RenderingService for Stamper {
    fn generate_certificate(&self, document: &DocumentId) -> Result<String, CollaboratorError> {
        Ok(format!("certificates/{document}.pdf"))
    }

    fn watermark(&self, file: &FilePayload, text: &str) -> Result<FilePayload, CollaboratorError> {
        let mut content = file.content.to_vec();
        content.extend_from_slice(format!("\n[{text}]").as_bytes());
        Ok(FilePayload::new(file.filename.clone(), content))
    }
}

/// A `Stamper` that also records the text of every watermark it is asked for.
#[derive(Default)]
pub struct StampLog {
    pub stamps: Mutex<Vec<String>>,
}

impl RenderingService for StampLog {
    fn generate_certificate(&self, document: &DocumentId) -> Result<String, CollaboratorError> {
        Stamper.generate_certificate(document)
    }

    fn watermark(&self, file: &FilePayload, text: &str) -> Result<FilePayload, CollaboratorError> {
        if let Ok(mut stamps) = self.stamps.lock() {
            stamps.push(text.to_owned());
        }
        Stamper.watermark(file, text)
    }
}

/// Every call fails.
pub struct Broken;

fn broken<T>(service: &'static str) -> Result<T, CollaboratorError> {
    Err(CollaboratorError::Failed {
        service,
        reason: "connection refused".into(),
    })
}

impl NotificationService for Broken {
    fn schedule(&self, _: &DocumentId, _: &UserId, _: &str) -> Result<(), CollaboratorError> {
        broken("notification service")
    }
    fn close_for_user(&self, _: &DocumentId, _: &UserId, _: &str) -> Result<(), CollaboratorError> {
        broken("notification service")
    }
}

impl RenderingService for Broken {
    fn generate_certificate(&self, _: &DocumentId) -> Result<String, CollaboratorError> {
        broken("rendering service")
    }
    fn watermark(&self, _: &FilePayload, _: &str) -> Result<FilePayload, CollaboratorError> {
        broken("rendering service")
    }
}

/// Answers long after any reasonable timeout.
pub struct Stalled(pub Duration);

impl TextGenerationService for Stalled {
    fn summarize(&self, _: &str) -> Result<String, CollaboratorError> {
        thread::sleep(self.0);
        Ok("too late".into())
    }
}

pub struct Canned(pub &'static str);

impl TextGenerationService for Canned {
    fn summarize(&self, _: &str) -> Result<String, CollaboratorError> {
        Ok(self.0.to_owned())
    }
}
