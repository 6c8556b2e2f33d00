//! Service layer API for document lifecycle operations
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use sled::transaction::ConflictableTransactionError::Abort;
use sled::transaction::TransactionalTree;
use tracing::{debug, info, warn};

use crate::access;
use crate::audit::{self, AuditTrail, Event, TrailRules};
use crate::code::{self, PrefixLocks};
use crate::collaborators::{Collaborators, IdentityOracle, call_bounded};
use crate::config::EngineConfig;
use crate::document::{
    Document, DocumentPatch, DocumentState, NewDocument, RejectionRecord, RevisionType,
};
use crate::error::{CollaboratorError, LifecycleError, ValidationError};
use crate::revision::compare_versions;
use crate::store::{self, TxResult};
use crate::types::{DocumentId, TimeStamp, UserId};
use crate::workflow::{self, AssignedCode, Caller, Command, Effect, Outcome};

mod folders;

pub struct DocumentService {
    instance: Arc<sled::Db>,
    collaborators: Collaborators,
    config: EngineConfig,
    code_locks: PrefixLocks,
    // serializes folder-tree mutations so a cascade sees a stable subtree
    tree_lock: Mutex<()>,
}

impl DocumentService {
    /// Service with default configuration and no rendering, notification or text services.
    pub fn new(instance: Arc<sled::Db>, identity: Arc<dyn IdentityOracle>) -> Self {
        Self::with_collaborators(instance, Collaborators::new(identity), EngineConfig::default())
    }

    pub fn with_collaborators(
        instance: Arc<sled::Db>,
        collaborators: Collaborators,
        config: EngineConfig,
    ) -> Self {
        Self {
            instance,
            collaborators,
            config,
            code_locks: PrefixLocks::new(),
            tree_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn identity(&self) -> &dyn IdentityOracle {
        self.collaborators.identity.as_ref()
    }

    fn caller(&self, actor: &UserId) -> Caller {
        Caller::new(actor.clone(), self.identity().has_elevated_privilege(actor))
    }

    /// Load a document from the database
    pub fn document(&self, id: &DocumentId) -> Result<Document, LifecycleError> {
        store::load(&self.instance, &store::document_key(id))?
            .ok_or_else(|| LifecycleError::DocumentNotFound(id.clone()))
    }

    /// Every version sharing `code`, oldest first.
    pub fn versions(&self, code: &str) -> Result<Vec<Document>, LifecycleError> {
        let prefix = format!("{}{code}/", store::VERSIONS);
        let mut docs = Vec::new();
        for item in self.instance.scan_prefix(prefix.as_bytes()) {
            let (_, raw) = item?;
            let id = DocumentId::from(String::from_utf8_lossy(&raw).into_owned());
            docs.push(self.document(&id)?);
        }
        docs.sort_by(|a, b| compare_versions(&a.version, &b.version));
        Ok(docs)
    }

    /// The document followed by its predecessors back to the first version.
    pub fn version_chain(&self, id: &DocumentId) -> Result<Vec<Document>, LifecycleError> {
        let mut chain = vec![self.document(id)?];
        let mut seen = HashSet::from([id.clone()]);
        while let Some(previous) = chain.last().and_then(|doc| doc.predecessor_id.clone()) {
            if !seen.insert(previous.clone()) {
                break;
            }
            chain.push(self.document(&previous)?);
        }
        Ok(chain)
    }

    /// Event log of one document version, oldest first.
    pub fn events(&self, id: &DocumentId) -> Result<Vec<Event>, LifecycleError> {
        store::scan(&self.instance, &store::event_prefix(id))
    }

    /// Create a draft in a folder the actor can write to
    pub fn create_document(
        &self,
        actor: &UserId,
        new: NewDocument,
    ) -> Result<Document, LifecycleError> {
        let title = new.title.trim().to_owned();
        if title.is_empty() {
            return Err(ValidationError::Empty("title").into());
        }
        let folder_id = new.folder_id.ok_or(ValidationError::Empty("folder"))?;
        let classification = new
            .classification
            .ok_or(ValidationError::Empty("classification"))?;
        classification.validate()?;

        let caller = self.caller(actor);
        let mut doc = Document::draft(
            DocumentId::generate()?,
            title,
            folder_id,
            classification,
            new.scope,
            new.owner_id.unwrap_or_else(|| actor.clone()),
        );
        doc.reviewer_ids = new.reviewer_ids;
        doc.approver_ids = new.approver_ids;
        doc.editable_file = new.editable_file;
        doc.final_file = new.final_file;
        workflow::ensure_no_conflict(&doc, &caller)?;

        // folder deletion checks for documents outside its transaction
        let _tree = self.lock_tree();
        let identity = self.identity();
        let now = TimeStamp::new();
        self.instance.transaction(|tx| -> TxResult<()> {
            let folder = store::folder(tx, &doc.folder_id)?;
            access::check_write(&folder, &caller.user, identity).map_err(Abort)?;
            store::put_document(tx, &doc)?;
            post(tx, &doc.id, &caller.user, &now, &["Document created.".to_string()])
        })?;

        info!(document = %doc.id, folder = %doc.folder_id, owner = %doc.owner_id, "document created");
        Ok(doc)
    }

    /// Edit a document's details. Code, version, state and version links are not editable.
    pub fn update_document(
        &self,
        actor: &UserId,
        id: &DocumentId,
        patch: DocumentPatch,
    ) -> Result<Document, LifecycleError> {
        if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(ValidationError::Empty("title").into());
        }
        if let Some(classification) = &patch.classification {
            classification.validate()?;
        }

        let caller = self.caller(actor);
        let identity = self.identity();
        let _tree = self.lock_tree();
        let now = TimeStamp::new();
        let (doc, outcome) = self.instance.transaction(|tx| -> TxResult<(Document, Outcome)> {
            let mut doc = store::document(tx, id)?;
            if doc.state == DocumentState::Obsolete {
                return store::fail(LifecycleError::StateTransition {
                    action: "edit",
                    state: doc.state,
                });
            }
            if doc.has_code() && patch.touches_classification() {
                return store::fail(LifecycleError::StateTransition {
                    action: "reclassify",
                    state: doc.state,
                });
            }
            let current = store::folder(tx, &doc.folder_id)?;
            access::check_write(&current, &caller.user, identity).map_err(Abort)?;
            if let Some(target) = patch.folder_id.as_ref().filter(|f| **f != doc.folder_id) {
                let target = store::folder(tx, target)?;
                access::check_write(&target, &caller.user, identity).map_err(Abort)?;
            }

            let roles_changed = patch.touches_roles();
            patch.clone().apply(&mut doc);
            let mut outcome = Outcome::default();
            if roles_changed {
                workflow::ensure_no_conflict(&doc, &caller).map_err(Abort)?;
                outcome = workflow::reassign_tasks(&mut doc);
            }
            if !doc.review_consistent() {
                return store::fail(ValidationError::ReviewIncomplete);
            }
            store::put_document(tx, &doc)?;
            post(tx, &doc.id, &caller.user, &now, &outcome.log)?;
            Ok((doc, outcome))
        })?;

        debug!(document = %doc.id, tasks = doc.open_tasks.len(), "document updated");
        Ok(self.dispatch(doc, outcome.effects))
    }

    /// Assigns the document code (if still unset) and moves the draft to upload.
    pub fn start_flow(&self, actor: &UserId, id: &DocumentId) -> Result<Document, LifecycleError> {
        self.execute(actor, id, Command::StartFlow)
    }

    pub fn publish_direct(
        &self,
        actor: &UserId,
        id: &DocumentId,
    ) -> Result<Document, LifecycleError> {
        self.execute(actor, id, Command::PublishDirect)
    }

    pub fn submit_review(
        &self,
        actor: &UserId,
        id: &DocumentId,
    ) -> Result<Document, LifecycleError> {
        self.execute(actor, id, Command::SubmitReview)
    }

    pub fn review_pass(&self, actor: &UserId, id: &DocumentId) -> Result<Document, LifecycleError> {
        self.execute(actor, id, Command::ReviewPass)
    }

    /// Approve a document in validation; a predecessor becomes obsolete in the same commit.
    pub fn approve(&self, actor: &UserId, id: &DocumentId) -> Result<Document, LifecycleError> {
        self.execute(actor, id, Command::Approve)
    }

    /// Send a document under review or validation back to upload.
    pub fn reject(
        &self,
        actor: &UserId,
        record: RejectionRecord,
    ) -> Result<Document, LifecycleError> {
        let reason = record.reason().to_owned();
        self.execute(actor, record.document_id(), Command::Reject { reason })
    }

    /// Run one lifecycle command as a single atomic unit, then request its side effects.
    pub fn execute(
        &self,
        actor: &UserId,
        id: &DocumentId,
        command: Command,
    ) -> Result<Document, LifecycleError> {
        let caller = self.caller(actor);
        let (doc, outcome) = match command {
            Command::StartFlow | Command::PublishDirect => {
                self.commit_with_code(&caller, id, &command)?
            }
            _ => self.commit(&caller, id, &command, None)?,
        };

        info!(
            document = %doc.id,
            code = %doc.code,
            version = %doc.version,
            state = %doc.state,
            actor = %caller.user,
            "lifecycle command committed"
        );
        Ok(self.dispatch(doc, outcome.effects))
    }

    /// Apply the same command to each document independently.
    ///
    /// A failure only affects its own element; callers wanting all-or-nothing must wrap
    /// the batch themselves.
    pub fn execute_batch(
        &self,
        actor: &UserId,
        ids: &[DocumentId],
        command: Command,
    ) -> Vec<(DocumentId, Result<Document, LifecycleError>)> {
        ids.iter()
            .map(|id| (id.clone(), self.execute(actor, id, command.clone())))
            .collect()
    }

    fn commit_with_code(
        &self,
        caller: &Caller,
        id: &DocumentId,
        command: &Command,
    ) -> Result<(Document, Outcome), LifecycleError> {
        let current = self.document(id)?;
        if current.has_code() {
            return self.commit(caller, id, command, None);
        }

        let category = code::default_category(
            current.scope,
            &self.config.internal_category,
            &self.config.external_category,
        );
        let prefix = code::code_prefix(&current.classification, category);
        let lock = self.code_locks.lock_for(&prefix);
        let _guard = code::acquire(&lock);

        let mut attempt = 1;
        loop {
            let existing: Vec<String> =
                store::scan_keys(&self.instance, &format!("{}{prefix}", store::VERSIONS))?
                    .into_iter()
                    .filter_map(|rest| rest.split('/').next().map(|s| format!("{prefix}{s}")))
                    .collect();
            let sequence = code::next_sequence(&prefix, existing.iter().map(String::as_str));
            let assigned = AssignedCode {
                code: code::format_code(&prefix, sequence),
                sequence_number: sequence,
            };

            match self.commit(caller, id, command, Some(assigned)) {
                Err(LifecycleError::Validation(ValidationError::DuplicateCodeVersion {
                    code, ..
                })) if attempt < self.config.code_retries => {
                    warn!(document = %id, %code, attempt, "code taken at commit, retrying");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn commit(
        &self,
        caller: &Caller,
        id: &DocumentId,
        command: &Command,
        assigned: Option<AssignedCode>,
    ) -> Result<(Document, Outcome), LifecycleError> {
        let identity = self.identity();
        let review_months = self.config.next_review_months;
        let now = TimeStamp::new();

        let committed = self.instance.transaction(|tx| -> TxResult<(Document, Outcome)> {
            let mut doc = store::document(tx, id)?;
            let mut predecessor = match (&doc.predecessor_id, command) {
                (Some(previous), Command::Approve | Command::PublishDirect) => {
                    Some(store::document(tx, previous)?)
                }
                _ => None,
            };
            if matches!(
                command,
                Command::StartFlow | Command::PublishDirect | Command::SubmitReview
            ) {
                let folder = store::folder(tx, &doc.folder_id)?;
                access::check_write(&folder, &caller.user, identity).map_err(Abort)?;
            }

            let outcome = match command {
                Command::StartFlow => workflow::start_flow(&mut doc, assigned.clone()),
                Command::PublishDirect => workflow::publish_direct(
                    &mut doc,
                    caller,
                    &now,
                    review_months,
                    assigned.clone(),
                    predecessor.as_mut(),
                ),
                Command::SubmitReview => workflow::submit_review(&mut doc),
                Command::ReviewPass => workflow::review_pass(&mut doc, caller, &now),
                Command::Approve => {
                    workflow::approve(&mut doc, caller, &now, review_months, predecessor.as_mut())
                }
                Command::Reject { reason } => RejectionRecord::new(doc.id.clone(), reason)
                    .map_err(LifecycleError::from)
                    .and_then(|record| workflow::reject(&mut doc, caller, &record)),
            }
            .map_err(Abort)?;

            store::put_document(tx, &doc)?;
            post(tx, &doc.id, &caller.user, &now, &outcome.log)?;
            if let Some(previous) = &predecessor {
                store::put_document(tx, previous)?;
                post(tx, &previous.id, &caller.user, &now, &outcome.predecessor_log)?;
            }
            Ok((doc, outcome))
        })?;

        Ok(committed)
    }

    /// Spawn the next major or minor revision of `source_id`.
    ///
    /// The source's final file is stamped as superseded first; that stamp is best-effort.
    pub fn create_revision(
        &self,
        actor: &UserId,
        source_id: &DocumentId,
        revision_type: RevisionType,
    ) -> Result<Document, LifecycleError> {
        let caller = self.caller(actor);
        let source = self.document(source_id)?;
        access::check_write(&self.folder(&source.folder_id)?, &caller.user, self.identity())?;
        workflow::ensure_revisable(&source)?;

        let stamped = source.final_file.clone().and_then(|file| {
            let digest = file.digest.clone();
            let rendering = Arc::clone(&self.collaborators.rendering);
            self.best_effort("rendering service", source_id, move || {
                rendering.watermark(&file, "SUPERSEDED")
            })
            .map(|stamped| (digest, stamped))
        });

        let new_id = DocumentId::generate()?;
        let identity = self.identity();
        let now = TimeStamp::new();
        let revision = self.instance.transaction(|tx| -> TxResult<Document> {
            let mut source = store::document(tx, source_id)?;
            let folder = store::folder(tx, &source.folder_id)?;
            access::check_write(&folder, &caller.user, identity).map_err(Abort)?;

            let (revision, outcome) =
                workflow::revise(&mut source, &caller, new_id.clone(), revision_type)
                    .map_err(Abort)?;
            if let Some((digest, stamped)) = &stamped {
                if source.final_file.as_ref().is_some_and(|f| &f.digest == digest) {
                    source.final_file = Some(stamped.clone());
                }
            }

            store::put_document(tx, &source)?;
            store::put_document(tx, &revision)?;
            post(tx, &source.id, &caller.user, &now, &outcome.predecessor_log)?;
            post(tx, &revision.id, &caller.user, &now, &outcome.log)?;
            Ok(revision)
        })?;

        info!(
            document = %revision.id,
            source = %source_id,
            code = %revision.code,
            version = %revision.version,
            "revision created"
        );
        Ok(revision)
    }

    /// Append a free comment to a document's event log.
    pub fn post_comment(
        &self,
        actor: &UserId,
        id: &DocumentId,
        body: &str,
    ) -> Result<Event, LifecycleError> {
        if body.trim().is_empty() {
            return Err(ValidationError::Empty("comment").into());
        }
        let event = Event::new(id.clone(), actor.clone(), TimeStamp::new(), body.to_owned());
        self.instance.transaction(|tx| -> TxResult<()> {
            store::document(tx, id)?;
            store::put_event(tx, &event)
        })?;
        Ok(event)
    }

    /// Ask the text generation service for a description and store it.
    ///
    /// Returns `None` when the service fails or times out; the document is left unchanged.
    pub fn describe(
        &self,
        actor: &UserId,
        id: &DocumentId,
    ) -> Result<Option<String>, LifecycleError> {
        let doc = self.document(id)?;
        let folder = self.folder(&doc.folder_id)?;
        access::check_write(&folder, actor, self.identity())?;

        let prompt = format!(
            "Write a two-sentence description of the controlled document \"{}\" \
             (code {}, version {}, area {}, type {}).",
            doc.title,
            doc.code,
            doc.version,
            doc.classification.area,
            doc.classification.doc_type
        );
        let text_service = Arc::clone(&self.collaborators.text);
        let Some(text) = self.best_effort("text generation service", id, move || {
            text_service.summarize(&prompt)
        }) else {
            return Ok(None);
        };
        let text = text.trim().to_owned();
        if text.is_empty() {
            return Ok(None);
        }

        self.instance.transaction(|tx| -> TxResult<()> {
            let mut doc = store::document(tx, id)?;
            doc.description = Some(text.clone());
            store::put_document(tx, &doc)
        })?;
        Ok(Some(text))
    }

    /// History of a document across all of its versions, newest first.
    pub fn audit_trail(&self, id: &DocumentId) -> Result<AuditTrail, LifecycleError> {
        let chain = self.version_chain(id)?;
        let mut versions = Vec::with_capacity(chain.len());
        for doc in &chain {
            versions.push((doc, self.events(&doc.id)?));
        }
        let rules = TrailRules {
            noise_patterns: &self.config.noise_patterns,
            rejection_phrases: &self.config.rejection_phrases,
        };
        Ok(audit::build_trail(versions, rules))
    }

    /// Perform the side effects of a committed command. Failures are logged, never returned.
    fn dispatch(&self, committed: Document, effects: Vec<Effect>) -> Document {
        for effect in effects {
            let doc_id = committed.id.clone();
            match effect {
                Effect::Notify { user, note } => {
                    let notifications = Arc::clone(&self.collaborators.notifications);
                    self.best_effort("notification service", &committed.id, move || {
                        notifications.schedule(&doc_id, &user, &note)
                    });
                }
                Effect::CloseTask { user, feedback } => {
                    let notifications = Arc::clone(&self.collaborators.notifications);
                    self.best_effort("notification service", &committed.id, move || {
                        notifications.close_for_user(&doc_id, &user, &feedback)
                    });
                }
                Effect::RenderCertificate => {
                    let rendering = Arc::clone(&self.collaborators.rendering);
                    let artifact = self.best_effort("rendering service", &committed.id, move || {
                        rendering.generate_certificate(&doc_id)
                    });
                    if let Some(artifact) = artifact {
                        self.amend(&committed.id, |doc| {
                            doc.certificate_ref = Some(artifact.clone());
                            true
                        });
                    }
                }
                Effect::Watermark { text } => {
                    let Some(file) = committed.final_file.clone() else {
                        continue;
                    };
                    let original = file.digest.clone();
                    let rendering = Arc::clone(&self.collaborators.rendering);
                    let stamped = self.best_effort("rendering service", &committed.id, move || {
                        rendering.watermark(&file, &text)
                    });
                    if let Some(stamped) = stamped {
                        self.amend(&committed.id, |doc| {
                            let unchanged =
                                doc.final_file.as_ref().is_some_and(|f| f.digest == original);
                            if unchanged {
                                doc.final_file = Some(stamped.clone());
                            }
                            unchanged
                        });
                    }
                }
            }
        }

        match self.document(&committed.id) {
            Ok(latest) => latest,
            Err(_) => committed,
        }
    }

    fn best_effort<T, F>(&self, service: &'static str, document: &DocumentId, call: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, CollaboratorError> + Send + 'static,
    {
        match call_bounded(service, self.config.collaborator_timeout(), call) {
            Ok(value) => Some(value),
            Err(e @ CollaboratorError::Unavailable(_)) => {
                debug!(document = %document, error = %e, "collaborator skipped");
                None
            }
            Err(e) => {
                warn!(document = %document, error = %e, "collaborator call failed");
                None
            }
        }
    }

    /// Follow-up write after a collaborator call; `change` returns whether anything changed.
    fn amend(&self, id: &DocumentId, change: impl Fn(&mut Document) -> bool) {
        let result = self.instance.transaction(|tx| -> TxResult<()> {
            let mut doc = store::document(tx, id)?;
            if change(&mut doc) {
                store::put_document(tx, &doc)?;
            }
            Ok(())
        });
        if let Err(e) = result {
            let e = LifecycleError::from(e);
            warn!(document = %id, error = %e, "follow-up write failed");
        }
    }
}

fn post(
    tx: &TransactionalTree,
    document: &DocumentId,
    author: &UserId,
    now: &TimeStamp<Utc>,
    messages: &[String],
) -> TxResult<()> {
    for body in messages {
        let event = Event::new(document.clone(), author.clone(), now.clone(), body.clone());
        store::put_event(tx, &event)?;
    }
    Ok(())
}
