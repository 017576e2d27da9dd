//! Collection service: validates incoming batches and appends them to per-session logs.

/// Append-only per-session storage
pub mod store;

/// HTTP surface
pub mod server;

use crate::{
    config::CollectorConfig,
    signal::{validate_session_id, BatchPayload, IngestReceipt, StoredRecord},
    Error, Result,
};
use chrono::{SecondsFormat, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use store::SignalStore;

/// Liveness report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub ok: bool,
    /// Current UTC time, RFC 3339
    pub time: String,
}

/// Transport-independent collector operations
#[derive(Debug)]
pub struct Collector {
    store: SignalStore,
    config: CollectorConfig,
}

impl Collector {
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the data directory cannot be created
    pub fn new(config: CollectorConfig) -> Result<Self> {
        config.validate()?;
        let store = SignalStore::open(&config.data_dir)?;
        info!("Collector storing session logs in {}", config.data_dir.display());
        Ok(Self { store, config })
    }

    /// Append a batch to the session's log. Nothing is written unless the whole batch is valid.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`] if the session ids differ, the batch is empty, or a signal is
    /// malformed; I/O errors from the store otherwise
    pub fn ingest(&self, session_id: &str, payload: &BatchPayload) -> Result<IngestReceipt> {
        validate_session_id(session_id)?;
        if payload.session_id != session_id {
            return Err(Error::InvalidRequest("session_id mismatch".to_string()));
        }
        if payload.batch.is_empty() {
            return Err(Error::InvalidRequest("empty batch".to_string()));
        }
        for (index, signal) in payload.batch.iter().enumerate() {
            signal
                .validate()
                .map_err(|e| Error::InvalidRequest(format!("batch[{index}]: {e}")))?;
        }

        let receipt = self.store.append(session_id, &payload.batch)?;
        info!(
            "Appended {} signals ({} duplicate) → {}",
            receipt.written,
            receipt.duplicates,
            self.store.log_path(session_id).display()
        );
        Ok(receipt)
    }

    /// Most recent records for a session, oldest first
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the session has no log
    pub fn preview(&self, session_id: &str, limit: Option<usize>) -> Result<Vec<StoredRecord>> {
        if validate_session_id(session_id).is_err() {
            return Err(Error::NotFound(format!("no data for session {session_id}")));
        }
        let limit = limit
            .unwrap_or(self.config.default_preview_limit)
            .min(self.config.max_preview_limit);
        self.store.tail(session_id, limit)
    }

    #[must_use]
    pub fn health(&self) -> Health {
        Health {
            ok: true,
            time: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        }
    }

    #[must_use]
    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }
}
