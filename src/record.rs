use std::{collections::BTreeMap, fmt::Debug, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::{
    message::{Pres, PresProposal, PresRequest},
    pres_format::PresFormat,
};

/// Durable state of one presentation flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresExRecord {
    pub pres_ex_id: Uuid,
    /// `None` for connectionless exchanges.
    pub connection_id: Option<String>,
    pub thread_id: String,
    pub state: PresExState,
    pub pres_proposal: Option<PresProposal>,
    pub pres_request: Option<PresRequest>,
    pub pres: Option<Pres>,
    /// The format reference of the request attachment this exchange answers.
    pub request_format: Option<PresFormat>,
    pub auto_present: bool,
    pub error_msg: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PresExState {
    ProposalReceived,
    RequestReceived,
    PresentationSent,
    Abandoned,
}

impl PresExRecord {
    pub fn new(
        thread_id: impl Into<String>,
        connection_id: Option<String>,
        state: PresExState,
    ) -> Self {
        Self {
            pres_ex_id: Uuid::new_v4(),
            connection_id,
            thread_id: thread_id.into(),
            state,
            pres_proposal: None,
            pres_request: None,
            pres: None,
            request_format: None,
            auto_present: false,
            error_msg: None,
        }
    }

    /// The filter that locates this record.
    pub fn tag_filter(&self) -> TagFilter {
        TagFilter {
            thread_id: self.thread_id.clone(),
            connection_id: self.connection_id.clone(),
        }
    }

    /// Abandon the exchange, recording `reason`.
    ///
    /// A failure to persist is logged and otherwise ignored.
    pub async fn save_error_state(&mut self, store: &dyn PresExStore, reason: &str) {
        if self.state == PresExState::Abandoned && self.error_msg.as_deref() == Some(reason) {
            return;
        }

        self.state = PresExState::Abandoned;
        self.error_msg = Some(reason.to_owned());

        if let Err(e) = store.save(self, "abandoned").await {
            warn!(
                pres_ex_id = %self.pres_ex_id,
                "failed to save presentation exchange error state: {e}"
            );
        }
    }
}

/// Correlation key of an exchange record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagFilter {
    pub thread_id: String,
    pub connection_id: Option<String>,
}

impl TagFilter {
    pub fn new(thread_id: impl Into<String>, connection_id: Option<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            connection_id,
        }
    }

    pub fn matches(&self, record: &PresExRecord) -> bool {
        record.thread_id == self.thread_id && record.connection_id == self.connection_id
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("no presentation exchange record for {0}")]
    NotFound(String),

    #[error("more than one presentation exchange record for {0}")]
    Duplicate(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Storage interface for exchange records.
///
/// Consistency between concurrent writers of the same record is left to the implementation.
#[async_trait]
pub trait PresExStore: Debug + Send + Sync {
    /// Fetch the single record matching `filter`.
    ///
    /// Fails with [StorageError::NotFound] on a miss and [StorageError::Duplicate] when the
    /// filter is ambiguous.
    async fn retrieve_by_tag_filter(
        &self,
        filter: &TagFilter,
    ) -> Result<PresExRecord, StorageError>;

    async fn retrieve_by_id(&self, pres_ex_id: Uuid) -> Result<PresExRecord, StorageError>;

    /// Insert or replace a record. `reason` is only used for diagnostics.
    async fn save(&self, record: &PresExRecord, reason: &str) -> Result<(), StorageError>;
}

/// A local in-memory store. Not for production use!
///
/// # Warning
/// This in-memory store should only be used for test purposes, it will not work for a distributed
/// deployment.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    store: Arc<Mutex<BTreeMap<Uuid, PresExRecord>>>,
}

impl MemoryStore {
    /// Every record currently held, ordered by id.
    pub async fn records(&self) -> Vec<PresExRecord> {
        self.store.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl PresExStore for MemoryStore {
    async fn retrieve_by_tag_filter(
        &self,
        filter: &TagFilter,
    ) -> Result<PresExRecord, StorageError> {
        let store = self.store.lock().await;
        let mut found = store.values().filter(|record| filter.matches(record));

        let describe = || format!("thread `{}`", filter.thread_id);
        let Some(record) = found.next() else {
            return Err(StorageError::NotFound(describe()));
        };
        if found.next().is_some() {
            return Err(StorageError::Duplicate(describe()));
        }

        Ok(record.clone())
    }

    async fn retrieve_by_id(&self, pres_ex_id: Uuid) -> Result<PresExRecord, StorageError> {
        self.store
            .lock()
            .await
            .get(&pres_ex_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("id `{pres_ex_id}`")))
    }

    async fn save(&self, record: &PresExRecord, reason: &str) -> Result<(), StorageError> {
        debug!(pres_ex_id = %record.pres_ex_id, state = ?record.state, reason, "saving record");
        self.store
            .lock()
            .await
            .insert(record.pres_ex_id, record.clone());

        Ok(())
    }
}
