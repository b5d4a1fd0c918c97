use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{debug, error};

use crate::{
    config::Config,
    core::message::{Pres, PresMessage, PresProposal, PresRequest},
    formats::{request_data, PresFormatHandlerError},
    holder::{HolderCredentialIndex, HolderProver},
    record::{PresExRecord, PresExState, PresExStore, StorageError, TagFilter},
};

/// Drives the prover side of presentation exchanges.
#[derive(Debug, Clone)]
pub struct PresManager {
    store: Arc<dyn PresExStore>,
    index: Arc<dyn HolderCredentialIndex>,
    prover: Arc<dyn HolderProver>,
    config: Config,
}

/// Result of [PresManager::create_presentation].
#[derive(Debug, Clone)]
pub enum PresentationOutcome {
    /// The presentation was built; `message` is ready to be sent.
    Presented { record: PresExRecord, message: Pres },
    /// The exchange could not be completed and has been abandoned.
    Abandoned { record: PresExRecord, reason: String },
}

impl PresentationOutcome {
    pub fn record(&self) -> &PresExRecord {
        match self {
            Self::Presented { record, .. } | Self::Abandoned { record, .. } => record,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PresManagerError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("presentation exchange {pres_ex_id} is {state:?}, expected {expected:?}")]
    InvalidState {
        pres_ex_id: uuid::Uuid,
        state: PresExState,
        expected: PresExState,
    },
}

impl PresManager {
    /// Build a new manager.
    pub fn builder() -> PresManagerBuilder {
        PresManagerBuilder::default()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Record a proposal from the other party, opening a new exchange.
    pub async fn receive_pres_proposal(
        &self,
        message: PresProposal,
        connection_id: Option<&str>,
    ) -> Result<PresExRecord, PresManagerError> {
        let mut record = PresExRecord::new(
            message.thread_id(),
            connection_id.map(ToOwned::to_owned),
            PresExState::ProposalReceived,
        );
        record.auto_present = self.config.auto_present_for(None);
        record.pres_proposal = Some(message);

        self.store
            .save(&record, "receive v2.0 presentation proposal")
            .await?;
        Ok(record)
    }

    /// Record a request, on the exchange of its thread or on a new one.
    ///
    /// Re-delivering a request to an exchange that has already been answered or abandoned
    /// leaves it untouched.
    pub async fn receive_pres_request(
        &self,
        message: PresRequest,
        connection_id: Option<&str>,
    ) -> Result<PresExRecord, PresManagerError> {
        let filter = TagFilter::new(message.thread_id(), connection_id.map(ToOwned::to_owned));

        let mut record = match self.store.retrieve_by_tag_filter(&filter).await {
            Ok(record) => record,
            Err(StorageError::NotFound(_)) => {
                debug!(thread_id = %filter.thread_id, "no exchange for thread, starting one");
                let mut record = PresExRecord::new(
                    filter.thread_id.clone(),
                    filter.connection_id.clone(),
                    PresExState::RequestReceived,
                );
                record.auto_present = self.config.auto_present_for(None);
                record
            }
            Err(e) => return Err(e.into()),
        };

        match record.state {
            PresExState::PresentationSent | PresExState::Abandoned => {
                debug!(
                    pres_ex_id = %record.pres_ex_id,
                    state = ?record.state,
                    "ignoring request for a concluded exchange"
                );
                return Ok(record);
            }
            PresExState::ProposalReceived | PresExState::RequestReceived => {
                record.auto_present = self.config.auto_present_for(Some(record.auto_present));
            }
        }

        record.state = PresExState::RequestReceived;
        record.request_format = message
            .supported_format()
            .map(|(format, _)| format.clone());
        record.pres_request = Some(message);

        self.store
            .save(&record, "receive v2.0 presentation request")
            .await?;
        Ok(record)
    }

    /// Answer the request of `record` with the holder's credentials.
    ///
    /// Failures to match or build a presentation do not fail the call: the record is
    /// abandoned with the reason and returned as [PresentationOutcome::Abandoned].
    pub async fn create_presentation(
        &self,
        mut record: PresExRecord,
    ) -> Result<PresentationOutcome, PresManagerError> {
        if record.state != PresExState::RequestReceived {
            return Err(PresManagerError::InvalidState {
                pres_ex_id: record.pres_ex_id,
                state: record.state,
                expected: PresExState::RequestReceived,
            });
        }

        match self.build_presentation(&record).await {
            Ok(message) => {
                record.state = PresExState::PresentationSent;
                record.pres = Some(message.clone());
                self.store
                    .save(&record, "create v2.0 presentation")
                    .await?;
                Ok(PresentationOutcome::Presented { record, message })
            }
            Err(e) => {
                let reason = e.to_string();
                error!(
                    pres_ex_id = %record.pres_ex_id,
                    thread_id = %record.thread_id,
                    "unable to create presentation: {reason}"
                );
                record
                    .save_error_state(self.store.as_ref(), &reason)
                    .await;
                Ok(PresentationOutcome::Abandoned { record, reason })
            }
        }
    }

    async fn build_presentation(
        &self,
        record: &PresExRecord,
    ) -> Result<Pres, PresFormatHandlerError> {
        let Some(kind) = record.request_format.as_ref().and_then(|format| format.kind()) else {
            return Err(PresFormatHandlerError::UnsupportedFormat);
        };

        let handler = kind.handler();
        let request_data = request_data(record, kind)?;
        let matches = handler
            .get_matching_credentials(self.index.as_ref(), record, &request_data)
            .await?;
        let presentation = handler
            .create_presentation(self.prover.as_ref(), record, &matches)
            .await?;

        Ok(Pres::new(kind, &presentation, record.thread_id.clone())?)
    }
}

/// Builder struct for [PresManager].
#[derive(Debug, Clone, Default)]
pub struct PresManagerBuilder {
    store: Option<Arc<dyn PresExStore>>,
    index: Option<Arc<dyn HolderCredentialIndex>>,
    prover: Option<Arc<dyn HolderProver>>,
    config: Config,
}

impl PresManagerBuilder {
    /// Build the manager.
    pub fn build(self) -> Result<PresManager> {
        let Self {
            store,
            index,
            prover,
            config,
        } = self;

        let Some(store) = store else {
            bail!("record store is required, see `with_store`")
        };

        let Some(index) = index else {
            bail!("credential index is required, see `with_index`")
        };

        let Some(prover) = prover else {
            bail!("prover is required, see `with_prover`")
        };

        Ok(PresManager {
            store,
            index,
            prover,
            config,
        })
    }

    /// Set the [PresExStore] that keeps exchange records across messages.
    pub fn with_store(mut self, store: Arc<dyn PresExStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the [HolderCredentialIndex] searched for matching credentials.
    pub fn with_index(mut self, index: Arc<dyn HolderCredentialIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Set the [HolderProver] that produces presentation proofs.
    pub fn with_prover(mut self, prover: Arc<dyn HolderProver>) -> Self {
        self.prover = Some(prover);
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }
}
