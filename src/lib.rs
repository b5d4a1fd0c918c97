//! This library implements the prover side of the [present-proof 2.0] protocol: receiving
//! presentation requests, matching them against the holder's credentials and answering them
//! with a presentation.
//!
//! [present-proof 2.0]: <https://github.com/hyperledger/aries-rfcs/tree/main/features/0454-present-proof-v2>
//!
//! # Usage
//!
//! Inbound requests go through a [`PresRequestHandler`], built around a [`PresManager`]:
//!
//! ```ignore
//! use present_proof::config::Config;
//! use present_proof::core::message::{PresMessage, PresRequest};
//! use present_proof::handler::{PresRequestHandler, RequestContext};
//! use present_proof::manager::PresManager;
//!
//! // Setup the manager.
//! let manager = PresManager::builder()
//!     .with_store(store)
//!     .with_index(credential_index)
//!     .with_prover(prover)
//!     .with_config(Config {
//!         auto_respond_presentation_request: true,
//!         ..Default::default()
//!     })
//!     .build()?;
//! let handler = PresRequestHandler::new(manager, oob_processor);
//!
//! // Validate and handle an inbound request.
//! let message = PresRequest::from_json(&inbound)?;
//! let context = RequestContext { message, connection: Some(connection) };
//! handler.handle(&context, &responder).await?;
//! ```
//!
//! Proof technologies plug in through [`PresFormatHandler`]; the supported ones are listed in
//! [`FORMATS`]. Storage, the credential index, the prover and the transport are supplied by
//! implementing [`PresExStore`], [`HolderCredentialIndex`], [`HolderProver`], [`OobProcessor`]
//! and [`Responder`].
//!
//! [`PresRequestHandler`]: crate::handler::PresRequestHandler
//! [`PresManager`]: crate::manager::PresManager
//! [`PresFormatHandler`]: crate::formats::PresFormatHandler
//! [`FORMATS`]: crate::core::pres_format::FORMATS
//! [`PresExStore`]: crate::record::PresExStore
//! [`HolderCredentialIndex`]: crate::holder::HolderCredentialIndex
//! [`HolderProver`]: crate::holder::HolderProver
//! [`OobProcessor`]: crate::handler::OobProcessor
//! [`Responder`]: crate::handler::Responder

pub mod config;
pub mod core;
pub mod formats;
pub mod handler;
pub mod holder;
pub mod manager;
pub mod record;
pub mod utils;
