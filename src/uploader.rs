//! Timed delivery of pending signals to the collector.
//!
//! Each flush sends one ordered batch. A flush that succeeds removes exactly the
//! signals it carried; one that fails transiently leaves the buffer untouched so the
//! next tick retries it together with anything appended in the meantime. A batch the
//! collector explicitly rejects is discarded, since resending it cannot succeed.

use crate::{
    batcher::SignalBatcher,
    config::EdgeConfig,
    signal::{BatchPayload, IngestReceipt},
    Error, Result,
};
use log::{debug, error, info, warn};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Delivers one batch to the collector
pub trait Transport: Send + Sync {
    /// Send the batch and wait for the collector's acknowledgement
    ///
    /// # Errors
    ///
    /// [`Error::Transport`] for failures worth retrying, [`Error::Rejected`] when the
    /// collector refused the payload
    fn send(&self, payload: &BatchPayload) -> Result<IngestReceipt>;
}

/// Blocking HTTP transport with a bounded request timeout
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    api_base: String,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn new(api_base: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn from_config(config: &EdgeConfig) -> Result<Self> {
        Self::new(&config.api_base, config.request_timeout())
    }

    #[must_use]
    pub fn signals_url(&self, session_id: &str) -> String {
        format!("{}/v1/sessions/{}/signals", self.api_base, session_id)
    }
}

impl Transport for HttpTransport {
    fn send(&self, payload: &BatchPayload) -> Result<IngestReceipt> {
        let url = self.signals_url(&payload.session_id);
        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .map_err(|e| Error::Transport(format!("POST {url} failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<IngestReceipt>()
                .map_err(|e| Error::Transport(format!("Unreadable acknowledgement: {e}")));
        }

        let code = status.as_u16();
        // Timeouts and throttling are the collector's problem, not the payload's
        if status.is_client_error() && code != 408 && code != 429 {
            let detail = response.text().unwrap_or_default();
            return Err(Error::Rejected { status: code, detail });
        }
        Err(Error::Transport(format!("Collector returned {status}")))
    }
}

/// Where a session's uploader is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploaderState {
    Idle,
    Sending,
}

/// What a single flush attempt did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Not due yet, or nothing to send
    Skipped,
    /// Collector acknowledged the batch; `sent` signals left the buffer
    Delivered { sent: usize, written: usize, duplicates: usize },
    /// Transient failure; everything stays queued for the next tick
    Retained { pending: usize, reason: String },
    /// Collector refused the batch; `count` signals were discarded
    Discarded { count: usize, reason: String },
}

/// Running totals for one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadStats {
    pub attempts: u64,
    pub delivered: u64,
    pub failures: u64,
    pub discarded: u64,
    /// Still queued when the worker stopped
    pub abandoned: u64,
}

/// Flush state machine for one session
pub struct Uploader {
    session_id: String,
    batcher: Arc<SignalBatcher>,
    transport: Arc<dyn Transport>,
    interval: Duration,
    last_attempt: Option<Instant>,
    state: UploaderState,
    stats: UploadStats,
}

impl Uploader {
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        batcher: Arc<SignalBatcher>,
        transport: Arc<dyn Transport>,
        interval: Duration,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            batcher,
            transport,
            interval,
            last_attempt: None,
            state: UploaderState::Idle,
            stats: UploadStats::default(),
        }
    }

    /// Flush if the cadence has elapsed since the last attempt
    pub fn tick(&mut self, now: Instant) -> FlushOutcome {
        let due = self
            .last_attempt
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval);
        if !due || self.batcher.is_empty() {
            return FlushOutcome::Skipped;
        }
        self.last_attempt = Some(now);
        self.flush()
    }

    /// Send everything currently pending in one call
    pub fn flush(&mut self) -> FlushOutcome {
        let Some(snapshot) = self.batcher.snapshot() else {
            return FlushOutcome::Skipped;
        };
        let sent = snapshot.signals.len();
        let payload = BatchPayload {
            session_id: self.session_id.clone(),
            batch: snapshot.signals,
        };

        self.state = UploaderState::Sending;
        self.stats.attempts += 1;
        let started = Instant::now();
        let result = self.transport.send(&payload);
        self.state = UploaderState::Idle;

        match result {
            Ok(receipt) => {
                // Overflow may have evicted part of the snapshot while in flight
                let acknowledged = self.batcher.acknowledge(snapshot.last_seq);
                self.stats.delivered += acknowledged as u64;
                info!(
                    "Session {}: posted {} signals ({} written, {} duplicate) in {:?}",
                    self.session_id,
                    sent,
                    receipt.written,
                    receipt.duplicates,
                    started.elapsed()
                );
                FlushOutcome::Delivered {
                    sent,
                    written: receipt.written,
                    duplicates: receipt.duplicates,
                }
            }
            Err(e) if e.is_transient() => {
                self.stats.failures += 1;
                let pending = self.batcher.len();
                warn!(
                    "Session {}: post of {} signals failed, {} pending for retry: {}",
                    self.session_id, sent, pending, e
                );
                FlushOutcome::Retained {
                    pending,
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                let count = self.batcher.acknowledge(snapshot.last_seq);
                self.stats.failures += 1;
                self.stats.discarded += count as u64;
                error!(
                    "Session {}: collector rejected batch, discarding {} signals: {}",
                    self.session_id, count, e
                );
                FlushOutcome::Discarded {
                    count,
                    reason: e.to_string(),
                }
            }
        }
    }

    #[must_use]
    pub fn state(&self) -> UploaderState {
        self.state
    }

    #[must_use]
    pub fn stats(&self) -> UploadStats {
        self.stats
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Last flush before shutdown; whatever is still queued afterwards is dropped
    fn finish(mut self) -> UploadStats {
        if !self.batcher.is_empty() {
            self.flush();
        }
        let leftover = self.batcher.drain().len();
        if leftover > 0 {
            warn!(
                "Session {}: shutting down with {} undelivered signals",
                self.session_id, leftover
            );
        }
        self.stats.abandoned = leftover as u64;
        self.stats
    }
}

/// Runs an [`Uploader`] on its own thread so the frame loop never waits on the network
pub struct UploadWorker {
    shutdown: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<UploadStats>>,
}

impl UploadWorker {
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned
    pub fn spawn(mut uploader: Uploader) -> Result<Self> {
        let (shutdown, stop) = mpsc::channel::<()>();
        let name = format!("uploader-{}", uploader.session_id());
        let handle = thread::Builder::new().name(name).spawn(move || {
            debug!(
                "Upload worker for session {} started, interval {:?}",
                uploader.session_id(),
                uploader.interval()
            );
            loop {
                match stop.recv_timeout(uploader.interval()) {
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        uploader.tick(Instant::now());
                    }
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
            uploader.finish()
        })?;

        Ok(Self {
            shutdown: Some(shutdown),
            handle: Some(handle),
        })
    }

    /// Stop the ticker, run a final flush, and return the session totals
    pub fn shutdown(mut self) -> UploadStats {
        self.stop()
    }

    fn stop(&mut self) -> UploadStats {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(stats)) => stats,
            Some(Err(_)) => {
                error!("Upload worker panicked");
                UploadStats::default()
            }
            None => UploadStats::default(),
        }
    }
}

impl Drop for UploadWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{batcher::OverflowPolicy, signal::Signal};
    use std::sync::Mutex;

    /// Replays scripted results and records what it was sent
    struct ScriptedTransport {
        script: Mutex<Vec<Result<()>>>,
        sent: Mutex<Vec<BatchPayload>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<()>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    impl Transport for ScriptedTransport {
        fn send(&self, payload: &BatchPayload) -> Result<IngestReceipt> {
            self.sent.lock().unwrap().push(payload.clone());
            let mut script = self.script.lock().unwrap();
            let next = if script.is_empty() { Ok(()) } else { script.remove(0) };
            next.map(|()| IngestReceipt {
                written: payload.batch.len(),
                duplicates: 0,
            })
        }
    }

    fn setup(script: Vec<Result<()>>) -> (Arc<SignalBatcher>, Arc<ScriptedTransport>, Uploader) {
        let batcher = Arc::new(SignalBatcher::new(100, OverflowPolicy::DropOldest));
        let transport = ScriptedTransport::new(script);
        let uploader = Uploader::new("s1", batcher.clone(), transport.clone(), Duration::from_millis(700));
        (batcher, transport, uploader)
    }

    #[test]
    fn test_empty_batch_is_not_sent() {
        let (_batcher, transport, mut uploader) = setup(vec![]);
        assert_eq!(uploader.tick(Instant::now()), FlushOutcome::Skipped);
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_cadence_is_respected() {
        let (batcher, transport, mut uploader) = setup(vec![Err(Error::Transport("down".into()))]);
        let t0 = Instant::now();
        batcher.append(Signal::new(1.0, "all"));

        assert!(matches!(uploader.tick(t0), FlushOutcome::Retained { pending: 1, .. }));
        assert_eq!(uploader.tick(t0 + Duration::from_millis(300)), FlushOutcome::Skipped);
        assert!(matches!(
            uploader.tick(t0 + Duration::from_millis(700)),
            FlushOutcome::Delivered { sent: 1, .. }
        ));
        assert_eq!(transport.sent.lock().unwrap().len(), 2);
        assert_eq!(uploader.state(), UploaderState::Idle);
    }

    #[test]
    fn test_failure_retains_and_success_clears() {
        let (batcher, transport, mut uploader) = setup(vec![Err(Error::Transport("timeout".into()))]);
        batcher.append(Signal::new(1.0, "all"));
        batcher.append(Signal::new(2.0, "all"));

        assert!(matches!(uploader.flush(), FlushOutcome::Retained { pending: 2, .. }));
        batcher.append(Signal::new(3.0, "all"));
        assert!(matches!(uploader.flush(), FlushOutcome::Delivered { sent: 3, .. }));
        assert!(batcher.is_empty());

        let sent = transport.sent.lock().unwrap();
        let retried: Vec<f64> = sent[1].batch.iter().map(|s| s.timestamp).collect();
        assert_eq!(retried, vec![1.0, 2.0, 3.0]);
        assert_eq!(sent[1].session_id, "s1");
        assert_eq!(uploader.stats().delivered, 3);
        assert_eq!(uploader.stats().failures, 1);
    }

    #[test]
    fn test_rejection_discards_batch() {
        let (batcher, _transport, mut uploader) = setup(vec![Err(Error::Rejected {
            status: 400,
            detail: "empty batch".into(),
        })]);
        batcher.append(Signal::new(1.0, "all"));

        assert!(matches!(uploader.flush(), FlushOutcome::Discarded { count: 1, .. }));
        assert!(batcher.is_empty());
        assert_eq!(uploader.stats().discarded, 1);
    }

    #[test]
    fn test_worker_final_flush_on_shutdown() {
        let batcher = Arc::new(SignalBatcher::new(100, OverflowPolicy::DropOldest));
        let transport = ScriptedTransport::new(vec![]);
        let uploader = Uploader::new("s1", batcher.clone(), transport.clone(), Duration::from_secs(3600));
        let worker = UploadWorker::spawn(uploader).unwrap();

        batcher.append(Signal::new(1.0, "all"));
        let stats = worker.shutdown();

        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.abandoned, 0);
        assert!(batcher.is_empty());
    }

    #[test]
    fn test_worker_reports_abandoned_signals() {
        let batcher = Arc::new(SignalBatcher::new(100, OverflowPolicy::DropOldest));
        let transport = ScriptedTransport::new(vec![Err(Error::Transport("down".into()))]);
        let uploader = Uploader::new("s1", batcher.clone(), transport, Duration::from_secs(3600));
        let worker = UploadWorker::spawn(uploader).unwrap();

        batcher.append(Signal::new(1.0, "all"));
        batcher.append(Signal::new(2.0, "all"));
        let stats = worker.shutdown();

        assert_eq!(stats.abandoned, 2);
        assert_eq!(stats.failures, 1);
    }

    /// Appends while the request is in flight, like a busy frame loop
    struct BusyProducerTransport {
        batcher: Arc<SignalBatcher>,
        extra: usize,
    }

    impl Transport for BusyProducerTransport {
        fn send(&self, payload: &BatchPayload) -> Result<IngestReceipt> {
            for i in 0..self.extra {
                self.batcher.append(Signal::new(100.0 + i as f64, "all"));
            }
            Ok(IngestReceipt {
                written: payload.batch.len(),
                duplicates: 0,
            })
        }
    }

    #[test]
    fn test_delivered_counts_only_acknowledged_signals() {
        let batcher = Arc::new(SignalBatcher::new(3, OverflowPolicy::DropOldest));
        let transport = Arc::new(BusyProducerTransport {
            batcher: batcher.clone(),
            extra: 2,
        });
        let mut uploader = Uploader::new("s1", batcher.clone(), transport, Duration::from_millis(700));
        for i in 0..3 {
            batcher.append(Signal::new(f64::from(i), "all"));
        }

        // Two of the three sent signals were evicted before the ack arrived
        assert!(matches!(uploader.flush(), FlushOutcome::Delivered { sent: 3, .. }));
        assert_eq!(uploader.stats().delivered, 1);
        let left: Vec<f64> = batcher.drain().iter().map(|s| s.timestamp).collect();
        assert_eq!(left, vec![100.0, 101.0]);
    }
}
