use anyhow::{anyhow, Result};
use limitless_digest::model::TriggerResponse;
use limitless_digest::{DataRecord, DateKey, DigestApi, DigestFetcher, FetchState};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;

const SETTLE: Duration = Duration::from_millis(20);

#[derive(Clone, Default)]
struct RecordingApi {
    reads: Arc<Mutex<VecDeque<Result<Vec<DataRecord>>>>>,
    triggers: Arc<Mutex<VecDeque<Result<TriggerResponse>>>>,
    read_calls: Arc<Mutex<Vec<String>>>,
    trigger_calls: Arc<Mutex<Vec<String>>>,
    slow_reads: HashMap<String, Duration>,
    slow_triggers: HashMap<String, Duration>,
}

impl RecordingApi {
    fn with_responses(
        reads: Vec<Result<Vec<DataRecord>>>,
        triggers: Vec<Result<TriggerResponse>>,
    ) -> Self {
        Self {
            reads: Arc::new(Mutex::new(VecDeque::from(reads))),
            triggers: Arc::new(Mutex::new(VecDeque::from(triggers))),
            ..Default::default()
        }
    }

    fn slow_for(mut self, date: &str, delay: Duration) -> Self {
        self.slow_reads.insert(date.to_string(), delay);
        self
    }

    fn slow_trigger_for(mut self, date: &str, delay: Duration) -> Self {
        self.slow_triggers.insert(date.to_string(), delay);
        self
    }

    async fn read_calls(&self) -> Vec<String> {
        self.read_calls.lock().await.clone()
    }

    async fn trigger_calls(&self) -> Vec<String> {
        self.trigger_calls.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl DigestApi for RecordingApi {
    async fn fetch_records(&self, date: &DateKey) -> Result<Vec<DataRecord>> {
        self.read_calls.lock().await.push(date.to_string());
        let response = self
            .reads
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()));
        match self.slow_reads.get(date.as_str()) {
            Some(delay) => tokio::time::sleep(*delay).await,
            None => tokio::task::yield_now().await,
        }
        response
    }

    async fn trigger_ingestion(&self, date: &DateKey) -> Result<TriggerResponse> {
        self.trigger_calls.lock().await.push(date.to_string());
        let response = self.triggers.lock().await.pop_front().unwrap_or_else(|| {
            Ok(TriggerResponse {
                success: true,
                message: "ok".into(),
            })
        });
        match self.slow_triggers.get(date.as_str()) {
            Some(delay) => tokio::time::sleep(*delay).await,
            None => tokio::task::yield_now().await,
        }
        response
    }
}

fn date(raw: &str) -> DateKey {
    DateKey::parse(raw).unwrap()
}

fn record(id: &str, day: &str, markdown: &str) -> DataRecord {
    serde_json::from_value(json!({
        "id": id,
        "namespace": "limitless",
        "days_date": day,
        "metadata": { "cleaned_markdown": markdown },
    }))
    .unwrap()
}

fn fetcher(api: &RecordingApi, settle: Duration) -> DigestFetcher {
    DigestFetcher::new(Arc::new(api.clone()), settle)
}

#[tokio::test]
async fn empty_day_triggers_auto_fetch_once_per_session() {
    let api = RecordingApi::default();
    let fetcher = fetcher(&api, SETTLE);
    let day = date("2025-08-24");

    fetcher.fetch_data(&day, true).await;
    fetcher.settle().await;
    assert_eq!(api.trigger_calls().await, vec!["2025-08-24".to_string()]);

    fetcher.fetch_data(&day, true).await;
    fetcher.settle().await;
    assert_eq!(api.trigger_calls().await.len(), 1);

    let state = fetcher.state().await;
    assert!(state.fetch_attempted.contains("2025-08-24"));
    assert_eq!(state.markdown_content, "");
    assert!(!state.auto_fetching);
    assert!(!state.loading);
}

#[tokio::test]
async fn successful_auto_fetch_shows_content_after_settle_delay() {
    let day = "2025-08-24";
    let api = RecordingApi::with_responses(
        vec![Ok(vec![]), Ok(vec![record("x", day, "Hello")])],
        vec![Ok(TriggerResponse {
            success: true,
            message: "ok".into(),
        })],
    );
    let fetcher = fetcher(&api, Duration::from_millis(200));

    fetcher.fetch_data(&date(day), true).await;
    let during = fetcher.state().await;
    assert!(during.auto_fetching);
    assert!(!during.loading);
    assert_eq!(during.markdown_content, "");

    fetcher.settle().await;
    let state = fetcher.state().await;
    assert_eq!(state.markdown_content, "Hello");
    assert!(!state.auto_fetching);
    assert_eq!(state.fetch_error, None);
    assert_eq!(api.trigger_calls().await, vec![day.to_string()]);
    assert_eq!(api.read_calls().await, vec![day.to_string(), day.to_string()]);
}

#[tokio::test]
async fn trigger_http_error_is_surfaced() {
    let api = RecordingApi::with_responses(
        vec![],
        vec![Err(anyhow!("500 Internal Server Error: boom"))],
    );
    let fetcher = fetcher(&api, SETTLE);

    fetcher.fetch_data(&date("2025-08-24"), true).await;
    fetcher.settle().await;

    let state = fetcher.state().await;
    let err = state.fetch_error.expect("error recorded");
    assert!(err.contains("500"), "unexpected error: {err}");
    assert_eq!(state.markdown_content, "");
    assert!(!state.auto_fetching);
    assert!(!state.loading);
    assert_eq!(api.read_calls().await.len(), 1);
}

#[tokio::test]
async fn declined_trigger_uses_server_message() {
    let api = RecordingApi::with_responses(
        vec![],
        vec![Ok(TriggerResponse {
            success: false,
            message: "No lifelogs found for 2025-08-24".into(),
        })],
    );
    let fetcher = fetcher(&api, SETTLE);

    fetcher.fetch_data(&date("2025-08-24"), true).await;

    let state = fetcher.state().await;
    assert_eq!(
        state.fetch_error.as_deref(),
        Some("No lifelogs found for 2025-08-24")
    );
    assert_eq!(state.markdown_content, "");
    assert!(!state.auto_fetching);
}

#[tokio::test]
async fn read_failure_shows_nothing_without_triggering() {
    let api = RecordingApi::with_responses(vec![Err(anyhow!("connection refused"))], vec![]);
    let fetcher = fetcher(&api, SETTLE);

    fetcher.fetch_data(&date("2025-08-24"), true).await;

    let state = fetcher.state().await;
    assert_eq!(state.markdown_content, "");
    assert_eq!(state.fetch_error, None);
    assert!(!state.loading);
    assert!(state.fetch_attempted.is_empty());
    assert!(api.trigger_calls().await.is_empty());
}

#[tokio::test]
async fn existing_content_is_shown_directly() {
    let day = "2025-08-24";
    let api = RecordingApi::with_responses(
        vec![Ok(vec![record("a", day, "Morning"), record("b", day, "Evening")])],
        vec![],
    );
    let fetcher = fetcher(&api, SETTLE);

    fetcher.fetch_data(&date(day), true).await;

    let state = fetcher.state().await;
    assert_eq!(state.markdown_content, "Morning\n\n---\n\nEvening");
    assert!(!state.loading);
    assert!(api.trigger_calls().await.is_empty());
}

#[tokio::test]
async fn artifact_only_day_counts_as_empty() {
    let day = "2025-08-24";
    let api = RecordingApi::with_responses(
        vec![Ok(vec![record("a", day, "Data already exists for this date")])],
        vec![],
    );
    let fetcher = fetcher(&api, SETTLE);

    fetcher.fetch_data(&date(day), true).await;
    fetcher.settle().await;

    assert_eq!(api.trigger_calls().await.len(), 1);
    assert_eq!(fetcher.state().await.markdown_content, "");
}

#[tokio::test]
async fn auto_fetch_can_be_disabled_per_call() {
    let api = RecordingApi::default();
    let fetcher = fetcher(&api, SETTLE);

    fetcher.fetch_data(&date("2025-08-24"), false).await;

    let state = fetcher.state().await;
    assert!(api.trigger_calls().await.is_empty());
    assert!(state.fetch_attempted.is_empty());
    assert!(!state.loading);
}

#[tokio::test]
async fn mismatched_records_are_still_displayed() {
    let api = RecordingApi::with_responses(
        vec![Ok(vec![record("a", "2025-08-23", "Yesterday leaked in")])],
        vec![],
    );
    let fetcher = fetcher(&api, SETTLE);

    fetcher.fetch_data(&date("2025-08-24"), true).await;

    assert_eq!(fetcher.state().await.markdown_content, "Yesterday leaked in");
}

#[tokio::test]
async fn overlapping_fetches_trigger_once() {
    let api = RecordingApi::default();
    let fetcher = fetcher(&api, SETTLE);
    let day = date("2025-08-24");

    futures::join!(fetcher.fetch_data(&day, true), fetcher.fetch_data(&day, true));
    fetcher.settle().await;

    assert_eq!(api.read_calls().await.len(), 3);
    assert_eq!(api.trigger_calls().await.len(), 1);
}

#[tokio::test]
async fn late_response_for_previous_date_is_discarded() {
    let api = RecordingApi::with_responses(
        vec![
            Ok(vec![record("a", "2025-08-23", "Old day")]),
            Ok(vec![record("b", "2025-08-24", "New day")]),
        ],
        vec![],
    )
    .slow_for("2025-08-23", Duration::from_millis(100));
    let fetcher = fetcher(&api, SETTLE);

    let first = date("2025-08-23");
    futures::join!(fetcher.fetch_data(&first, true), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        fetcher.fetch_data(&date("2025-08-24"), true).await;
    });

    assert_eq!(fetcher.state().await.markdown_content, "New day");
}

#[tokio::test]
async fn failed_trigger_is_not_retried_in_session() {
    let api = RecordingApi::with_responses(vec![], vec![Err(anyhow!("503 Service Unavailable: "))]);
    let fetcher = fetcher(&api, SETTLE);
    let day = date("2025-08-24");

    fetcher.trigger_auto_fetch(&day).await;
    assert!(fetcher.state().await.fetch_error.is_some());

    fetcher.fetch_data(&day, true).await;
    assert_eq!(api.trigger_calls().await.len(), 1);
    assert!(fetcher.state().await.fetch_attempted.contains("2025-08-24"));
}

#[tokio::test]
async fn failing_reread_is_swallowed() {
    let api = RecordingApi::with_responses(vec![Ok(vec![]), Err(anyhow!("timeout"))], vec![]);
    let fetcher = fetcher(&api, SETTLE);

    fetcher.fetch_data(&date("2025-08-24"), true).await;
    fetcher.settle().await;

    let state = fetcher.state().await;
    assert_eq!(state.fetch_error, None);
    assert_eq!(state.markdown_content, "");
    assert!(!state.auto_fetching);
    assert_eq!(api.read_calls().await.len(), 2);
}

#[tokio::test]
async fn reset_restores_initial_state_and_forgets_attempts() {
    let api = RecordingApi::with_responses(vec![], vec![Err(anyhow!("500 Internal Server Error: "))]);
    let fetcher = fetcher(&api, SETTLE);
    let day = date("2025-08-24");

    fetcher.fetch_data(&day, true).await;
    assert!(fetcher.state().await.fetch_error.is_some());

    fetcher.reset_state().await;
    assert_eq!(fetcher.state().await, FetchState::default());

    fetcher.fetch_data(&day, true).await;
    fetcher.settle().await;
    assert_eq!(api.trigger_calls().await.len(), 2);
}

#[tokio::test]
async fn reset_cancels_scheduled_reread() {
    let api = RecordingApi::default();
    let fetcher = fetcher(&api, Duration::from_millis(100));

    fetcher.fetch_data(&date("2025-08-24"), true).await;
    fetcher.reset_state().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(api.read_calls().await.len(), 1);
    assert_eq!(fetcher.state().await, FetchState::default());
}

#[tokio::test]
async fn dropping_fetcher_cancels_scheduled_reread() {
    let api = RecordingApi::default();
    let fetcher = fetcher(&api, Duration::from_millis(100));

    fetcher.fetch_data(&date("2025-08-24"), true).await;
    drop(fetcher);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(api.read_calls().await.len(), 1);
}

#[tokio::test]
async fn clear_content_keeps_attempts_and_loading() {
    let api = RecordingApi::with_responses(vec![], vec![Err(anyhow!("500 Internal Server Error: "))]);
    let fetcher = fetcher(&api, SETTLE);

    fetcher.fetch_data(&date("2025-08-24"), true).await;
    fetcher.clear_content().await;

    let state = fetcher.state().await;
    assert_eq!(state.markdown_content, "");
    assert_eq!(state.fetch_error, None);
    assert!(!state.loading);
    assert!(state.fetch_attempted.contains("2025-08-24"));
}

#[tokio::test]
async fn stale_trigger_outcome_does_not_end_newer_auto_fetch() {
    let api = RecordingApi::with_responses(
        vec![],
        vec![
            Err(anyhow!("502 Bad Gateway: ")),
            Ok(TriggerResponse {
                success: true,
                message: "queued".into(),
            }),
        ],
    )
    .slow_trigger_for("2025-08-23", Duration::from_millis(50))
    .slow_trigger_for("2025-08-24", Duration::from_millis(200));
    let fetcher = fetcher(&api, SETTLE);

    let first = date("2025-08-23");
    futures::join!(
        fetcher.trigger_auto_fetch(&first),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            fetcher.trigger_auto_fetch(&date("2025-08-24")).await;
        },
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let state = fetcher.state().await;
            assert!(state.auto_fetching, "older date's failure closed the gate");
            assert_eq!(state.fetch_error, None);
        }
    );
    fetcher.settle().await;

    let state = fetcher.state().await;
    assert!(!state.auto_fetching);
    assert_eq!(api.trigger_calls().await.len(), 2);
    assert!(state.fetch_attempted.contains("2025-08-23"));
    assert!(state.fetch_attempted.contains("2025-08-24"));
}
