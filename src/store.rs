//! Key layout in the sled tree and CBOR record helpers.
//!
//! | key | value |
//! |---|---|
//! | `doc/{document}` | [`Document`] |
//! | `ver/{code}/{version}` | document id, one per `(code, version)` |
//! | `fld/{folder}` | [`Folder`] |
//! | `sub/{parent}/{child}` | empty |
//! | `evt/{document}/{event}` | [`Event`] |
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree};

use crate::audit::Event;
use crate::document::Document;
use crate::error::{LifecycleError, ValidationError};
use crate::folder::Folder;
use crate::types::{DocumentId, FolderId};

pub(crate) type TxResult<T> = ConflictableTransactionResult<T, LifecycleError>;

pub(crate) const DOCUMENTS: &str = "doc/";
pub(crate) const VERSIONS: &str = "ver/";
pub(crate) const FOLDERS: &str = "fld/";

pub(crate) fn document_key(id: &DocumentId) -> String {
    format!("{DOCUMENTS}{id}")
}

pub(crate) fn version_key(code: &str, version: &str) -> String {
    format!("{VERSIONS}{code}/{version}")
}

pub(crate) fn folder_key(id: &FolderId) -> String {
    format!("{FOLDERS}{id}")
}

pub(crate) fn child_prefix(parent: &FolderId) -> String {
    format!("sub/{parent}/")
}

pub(crate) fn child_key(parent: &FolderId, child: &FolderId) -> String {
    format!("sub/{parent}/{child}")
}

pub(crate) fn event_prefix(document: &DocumentId) -> String {
    format!("evt/{document}/")
}

/// Aborts the surrounding transaction with `err`.
pub(crate) fn fail<T>(err: impl Into<LifecycleError>) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(err.into()))
}

pub(crate) fn get<T>(tx: &TransactionalTree, key: &str) -> TxResult<Option<T>>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tx.get(key.as_bytes())? {
        Some(raw) => match minicbor::decode(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => fail(e),
        },
        None => Ok(None),
    }
}

pub(crate) fn put<T: minicbor::Encode<()>>(tx: &TransactionalTree, key: &str, value: &T) -> TxResult<()> {
    let raw = match minicbor::to_vec(value) {
        Ok(raw) => raw,
        Err(e) => return fail(e),
    };
    tx.insert(key.as_bytes(), raw)?;
    Ok(())
}

pub(crate) fn document(tx: &TransactionalTree, id: &DocumentId) -> TxResult<Document> {
    match get(tx, &document_key(id))? {
        Some(doc) => Ok(doc),
        None => fail(LifecycleError::DocumentNotFound(id.clone())),
    }
}

pub(crate) fn folder(tx: &TransactionalTree, id: &FolderId) -> TxResult<Folder> {
    match get(tx, &folder_key(id))? {
        Some(folder) => Ok(folder),
        None => fail(LifecycleError::FolderNotFound(id.clone())),
    }
}

/// Writes a document and claims its `(code, version)` slot once a code is assigned.
pub(crate) fn put_document(tx: &TransactionalTree, doc: &Document) -> TxResult<()> {
    if doc.has_code() {
        let key = version_key(&doc.code, &doc.version);
        match tx.get(key.as_bytes())? {
            Some(owner) if &owner[..] != doc.id.as_str().as_bytes() => {
                return fail(ValidationError::DuplicateCodeVersion {
                    code: doc.code.clone(),
                    version: doc.version.clone(),
                });
            }
            Some(_) => {}
            None => {
                tx.insert(key.as_bytes(), doc.id.as_str().as_bytes())?;
            }
        }
    }
    put(tx, &document_key(&doc.id), doc)
}

pub(crate) fn put_event(tx: &TransactionalTree, event: &Event) -> TxResult<()> {
    let key = format!("{}{}", event_prefix(&event.document_id), event.id);
    put(tx, &key, event)
}

pub(crate) fn load<T>(tree: &sled::Tree, key: &str) -> Result<Option<T>, LifecycleError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tree.get(key.as_bytes())? {
        Some(raw) => Ok(Some(minicbor::decode(&raw)?)),
        None => Ok(None),
    }
}

pub(crate) fn scan<T>(tree: &sled::Tree, prefix: &str) -> Result<Vec<T>, LifecycleError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    tree.scan_prefix(prefix.as_bytes())
        .map(|item| -> Result<T, LifecycleError> {
            let (_, raw) = item?;
            Ok(minicbor::decode(&raw)?)
        })
        .collect()
}

/// Key suffixes after `prefix`, in key order.
pub(crate) fn scan_keys(tree: &sled::Tree, prefix: &str) -> Result<Vec<String>, LifecycleError> {
    tree.scan_prefix(prefix.as_bytes())
        .map(|item| -> Result<String, LifecycleError> {
            let (key, _) = item?;
            Ok(String::from_utf8_lossy(&key[prefix.len()..]).into_owned())
        })
        .collect()
}
