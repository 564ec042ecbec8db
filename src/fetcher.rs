//! Fetch-with-fallback orchestration for one day of personal-log content.
//!
//! A read that yields nothing displayable may ask the ingestion service to
//! populate the day, at most once per day per session, and then re-reads the
//! day after a settle delay. Every transition is applied under one lock against
//! the latest state, so overlapping calls cannot both pass the auto-fetch gate.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::extract::extract_combined;
use crate::limitless::DigestApi;
use crate::model::{DateKey, FetchState};

struct Session {
    state: FetchState,
    current_date: Option<DateKey>,
    /// Bumped on reset; continuations started under an older epoch are dropped.
    epoch: u64,
    /// Identifies the newest auto-fetch; only it may clear `auto_fetching`.
    auto_fetch_ticket: u64,
}

impl Session {
    fn new() -> Self {
        Self {
            state: FetchState::default(),
            current_date: None,
            epoch: 0,
            auto_fetch_ticket: 0,
        }
    }

    fn is_current(&self, date: &DateKey, epoch: u64) -> bool {
        self.epoch == epoch && self.current_date.as_ref() == Some(date)
    }

    fn may_auto_fetch(&self, date: &DateKey) -> bool {
        !self.state.auto_fetching && !self.state.fetch_attempted.contains(date.as_str())
    }

    // Marked before the trigger request goes out, so a failing job is never retried.
    fn begin_auto_fetch(&mut self, date: &DateKey) -> u64 {
        self.state.auto_fetching = true;
        self.state.fetch_error = None;
        self.state.fetch_attempted.insert(date.to_string());
        self.auto_fetch_ticket += 1;
        self.auto_fetch_ticket
    }

    fn end_auto_fetch(&mut self, ticket: u64) {
        if self.auto_fetch_ticket == ticket {
            self.state.auto_fetching = false;
        }
    }

    fn show_nothing(&mut self) {
        self.state.markdown_content.clear();
        self.state.loading = false;
    }

    fn fail_auto_fetch(&mut self, date: &DateKey, ticket: u64, message: String) {
        self.end_auto_fetch(ticket);
        self.state.loading = false;
        if self.current_date.as_ref() == Some(date) {
            self.state.fetch_error = Some(message);
            self.state.markdown_content.clear();
        }
    }
}

struct Inner {
    api: Arc<dyn DigestApi>,
    settle_delay: Duration,
    session_id: Uuid,
    session: Mutex<Session>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.get_mut().take() {
            handle.abort();
        }
    }
}

impl Inner {
    /// Read the day and run it through the extractor. Shared by the primary
    /// fetch and the delayed re-read after a successful trigger.
    async fn read_content(&self, date: &DateKey) -> anyhow::Result<String> {
        let records = self.api.fetch_records(date).await?;

        let mismatched: Vec<String> = records
            .iter()
            .filter(|r| !r.belongs_to(date))
            .map(|r| r.display_id())
            .collect();
        if !mismatched.is_empty() {
            warn!(
                count = mismatched.len(),
                ids = ?mismatched,
                "server returned records for a different date"
            );
        }

        let combined = extract_combined(&records);
        debug!(records = records.len(), chars = combined.len(), "extracted content");
        Ok(combined)
    }

    async fn run_auto_fetch(this: &Arc<Inner>, date: &DateKey, epoch: u64, ticket: u64) {
        let result = this.api.trigger_ingestion(date).await;

        let mut session = this.session.lock().await;
        if session.epoch != epoch {
            debug!("state was reset while the trigger was in flight");
            return;
        }

        match result {
            Err(err) => {
                warn!(?err, "auto-fetch trigger failed");
                session.fail_auto_fetch(date, ticket, format!("Auto-fetch failed: {:#}", err));
            }
            Ok(resp) if !resp.success => {
                warn!(server_message = %resp.message, "ingestion service declined auto-fetch");
                let message = if resp.message.trim().is_empty() {
                    "Auto-fetch failed".to_string()
                } else {
                    resp.message
                };
                session.fail_auto_fetch(date, ticket, message);
            }
            Ok(resp) => {
                info!(
                    server_message = %resp.message,
                    delay_ms = this.settle_delay.as_millis() as u64,
                    "auto-fetch accepted; scheduling re-read"
                );
                session.state.loading = false;
                drop(session);
                Inner::schedule_reread(this, date.clone(), epoch, ticket).await;
            }
        }
    }

    async fn schedule_reread(this: &Arc<Inner>, date: DateKey, epoch: u64, ticket: u64) {
        let weak: Weak<Inner> = Arc::downgrade(this);
        let delay = this.settle_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.finish_reread(&date, epoch, ticket).await;
            }
        });
        if let Some(previous) = this.pending.lock().await.replace(handle) {
            previous.abort();
        }
    }

    async fn finish_reread(&self, date: &DateKey, epoch: u64, ticket: u64) {
        let result = self.read_content(date).await;

        let mut session = self.session.lock().await;
        if session.epoch != epoch {
            return;
        }
        session.end_auto_fetch(ticket);
        session.state.loading = false;
        if session.current_date.as_ref() != Some(date) {
            debug!(%date, "date changed before the re-read landed; keeping current content");
            return;
        }

        match result {
            Ok(content) if !content.trim().is_empty() => {
                info!(%date, chars = content.len(), "auto-fetched content arrived");
                session.state.markdown_content = content;
                session.state.fetch_error = None;
            }
            Ok(_) => debug!(%date, "re-read after auto-fetch is still empty"),
            Err(err) => warn!(?err, %date, "re-read after auto-fetch failed"),
        }
    }
}

/// Owns the fetch lifecycle for the day currently on display.
///
/// Dropping the fetcher cancels a scheduled re-read that has not fired yet.
pub struct DigestFetcher {
    inner: Arc<Inner>,
}

impl DigestFetcher {
    pub fn new(api: Arc<dyn DigestApi>, settle_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                settle_delay,
                session_id: Uuid::new_v4(),
                session: Mutex::new(Session::new()),
                pending: Mutex::new(None),
            }),
        }
    }

    /// Identifies this fetcher's attempt-tracking scope in logs.
    pub fn session_id(&self) -> Uuid {
        self.inner.session_id
    }

    pub async fn state(&self) -> FetchState {
        self.inner.session.lock().await.state.clone()
    }

    /// Load displayable content for `date`. Failures end up in the state, never
    /// in the return value.
    #[instrument(skip_all, fields(session = %self.inner.session_id, date = %date))]
    pub async fn fetch_data(&self, date: &DateKey, allow_auto_fetch: bool) {
        let epoch = {
            let mut session = self.inner.session.lock().await;
            session.current_date = Some(date.clone());
            session.epoch
        };

        let result = self.inner.read_content(date).await;

        let mut session = self.inner.session.lock().await;
        if !session.is_current(date, epoch) {
            debug!("discarding response for a date that is no longer current");
            return;
        }

        match result {
            Err(err) => {
                warn!(?err, "read failed; showing nothing");
                session.show_nothing();
            }
            Ok(content) if !content.trim().is_empty() => {
                session.state.markdown_content = content;
                session.state.fetch_error = None;
                session.state.loading = false;
            }
            Ok(_) if allow_auto_fetch && session.may_auto_fetch(date) => {
                let ticket = session.begin_auto_fetch(date);
                drop(session);
                info!("no content for date; triggering auto-fetch");
                Inner::run_auto_fetch(&self.inner, date, epoch, ticket).await;
            }
            Ok(_) => {
                debug!(allow_auto_fetch, "no content for date; auto-fetch not permitted");
                session.show_nothing();
            }
        }
    }

    /// Ask the ingestion service to populate `date` and re-read it after the
    /// settle delay. Records the date as attempted even if the request fails.
    #[instrument(skip_all, fields(session = %self.inner.session_id, date = %date))]
    pub async fn trigger_auto_fetch(&self, date: &DateKey) {
        let (epoch, ticket) = {
            let mut session = self.inner.session.lock().await;
            session.current_date = Some(date.clone());
            let ticket = session.begin_auto_fetch(date);
            (session.epoch, ticket)
        };
        Inner::run_auto_fetch(&self.inner, date, epoch, ticket).await;
    }

    /// Wait for a scheduled re-read, if any, to finish.
    pub async fn settle(&self) {
        let handle = self.inner.pending.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    warn!(?err, "delayed re-read task failed");
                }
            }
        }
    }

    /// Return to the freshly-created state, forgetting attempted dates and
    /// cancelling any scheduled re-read.
    pub async fn reset_state(&self) {
        if let Some(handle) = self.inner.pending.lock().await.take() {
            handle.abort();
        }
        let mut session = self.inner.session.lock().await;
        session.state = FetchState::default();
        session.current_date = None;
        session.epoch += 1;
    }

    /// Clear the displayed content and error. Attempted dates and `loading` are kept.
    pub async fn clear_content(&self) {
        let mut session = self.inner.session.lock().await;
        session.state.markdown_content.clear();
        session.state.fetch_error = None;
    }
}
