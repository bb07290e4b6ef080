//! # Documents
//!
//! [`DocumentRef`] addresses a stored value; [`Document`] pairs a reference
//! with loaded data. A document is handed out through one of two
//! capabilities:
//!
//! - [`DocumentView`]: read access to the data
//! - [`DocumentMut`]: also edits the data and writes it back
//!
//! `Document` implements both; [`Document::into_view`] gives up the write
//! side.

pub mod errors;
pub mod reference;

use async_trait::async_trait;
use serde_json::Value;

use crate::merge::{merge_overwrite, overwrite_paths};
use crate::store::update::is_operator_update;
use crate::store::Document as Record;

pub use errors::{DocumentError, DocumentResult};
pub use reference::{
    stored_version, DefaultValue, DocumentRef, DocumentRefBuilder, BASE_RECORD_VERSION,
    RECORD_VERSION_FIELD,
};

/// Read-only access to a loaded document
pub trait DocumentView: Send + Sync {
    fn reference(&self) -> &DocumentRef;

    fn data(&self) -> &Value;

    /// Whether the data came from the store rather than a default
    fn exists(&self) -> bool;
}

/// Read-write access to a loaded document
#[async_trait]
pub trait DocumentMut: DocumentView {
    fn data_mut(&mut self) -> &mut Value;

    /// Persist the current data
    async fn save(&mut self) -> DocumentResult<()>;

    /// Deep-merge `partial` into the data, then persist only the fields it
    /// changed
    async fn save_partial(&mut self, partial: Record) -> DocumentResult<()>;

    /// Delete the stored document; the data stays in memory
    async fn delete(&mut self) -> DocumentResult<()>;
}

/// A reference plus its loaded data
#[derive(Debug, Clone)]
pub struct Document {
    reference: DocumentRef,
    data: Value,
    exists: bool,
}

impl Document {
    /// A document not yet stored
    pub fn new(reference: DocumentRef, data: Value) -> Self {
        Self {
            reference,
            data,
            exists: false,
        }
    }

    pub(crate) fn loaded(reference: DocumentRef, data: Value) -> Self {
        Self {
            reference,
            data,
            exists: true,
        }
    }

    /// Drop write access
    pub fn into_view(self) -> Box<dyn DocumentView> {
        Box::new(self)
    }

    pub fn into_data(self) -> Value {
        self.data
    }
}

impl DocumentView for Document {
    fn reference(&self) -> &DocumentRef {
        &self.reference
    }

    fn data(&self) -> &Value {
        &self.data
    }

    fn exists(&self) -> bool {
        self.exists
    }
}

#[async_trait]
impl DocumentMut for Document {
    fn data_mut(&mut self) -> &mut Value {
        &mut self.data
    }

    async fn save(&mut self) -> DocumentResult<()> {
        self.reference.save(&self.data).await?;
        self.exists = true;
        Ok(())
    }

    async fn save_partial(&mut self, partial: Record) -> DocumentResult<()> {
        if self.reference.is_chunked() {
            return Err(DocumentError::ChunkedPartialSave);
        }
        if is_operator_update(&partial) {
            return Err(DocumentError::InvalidPartial(
                "operator updates cannot be merged into loaded data".into(),
            ));
        }

        let paths = overwrite_paths(&self.data, &partial);
        merge_overwrite(&mut self.data, &Value::Object(partial));
        if paths.is_empty() {
            return Ok(());
        }
        self.reference.save_partial(paths).await?;
        self.exists = true;
        Ok(())
    }

    async fn delete(&mut self) -> DocumentResult<()> {
        self.reference.delete().await?;
        self.exists = false;
        Ok(())
    }
}
