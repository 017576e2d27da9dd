//! Session-scoped buffers and upload workers.

use crate::{
    batcher::SignalBatcher,
    config::EdgeConfig,
    signal::validate_session_id,
    uploader::{Transport, UploadStats, UploadWorker, Uploader},
    Result,
};
use log::info;
use std::collections::HashMap;
use std::sync::Arc;

struct Session {
    batcher: Arc<SignalBatcher>,
    worker: UploadWorker,
}

/// Owns one batcher and one upload worker per open session. Sessions share nothing
/// but the transport.
pub struct SessionRegistry {
    config: EdgeConfig,
    transport: Arc<dyn Transport>,
    sessions: HashMap<String, Session>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(config: EdgeConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            sessions: HashMap::new(),
        }
    }

    /// Buffer for `session_id`, starting its upload worker on first use
    ///
    /// # Errors
    ///
    /// Returns an error if the session id is invalid or the worker cannot start
    pub fn open(&mut self, session_id: &str) -> Result<Arc<SignalBatcher>> {
        if let Some(session) = self.sessions.get(session_id) {
            return Ok(session.batcher.clone());
        }
        validate_session_id(session_id)?;

        let batcher = Arc::new(SignalBatcher::new(self.config.max_pending, self.config.overflow_policy));
        let uploader = Uploader::new(
            session_id,
            batcher.clone(),
            self.transport.clone(),
            self.config.flush_interval(),
        );
        let worker = UploadWorker::spawn(uploader)?;
        info!(
            "Opened session {} (max {} pending, {:?})",
            session_id, self.config.max_pending, self.config.overflow_policy
        );

        self.sessions.insert(
            session_id.to_string(),
            Session {
                batcher: batcher.clone(),
                worker,
            },
        );
        Ok(batcher)
    }

    /// Stop the session's worker after a final flush
    pub fn close(&mut self, session_id: &str) -> Option<UploadStats> {
        let session = self.sessions.remove(session_id)?;
        let stats = session.worker.shutdown();
        log_stats(session_id, &stats, session.batcher.dropped());
        Some(stats)
    }

    /// Close every session
    pub fn close_all(&mut self) -> Vec<(String, UploadStats)> {
        let ids: Vec<String> = self.sessions.keys().cloned().collect();
        ids.into_iter()
            .filter_map(|id| self.close(&id).map(|stats| (id, stats)))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}

fn log_stats(session_id: &str, stats: &UploadStats, overflowed: u64) {
    info!(
        "Closed session {}: {} delivered, {} failed attempts, {} rejected, {} abandoned, {} lost to overflow",
        session_id, stats.delivered, stats.failures, stats.discarded, stats.abandoned, overflowed
    );
}
