//! The relay engine: a single cooperative loop that drains the ingestion
//! buffer, transforms each new message and fans it out to every destination
//! in order, with randomized pacing between messages.
//!
//! Control operations (`stop`, `skip_next_delay`, `clear_all`, config
//! updates) are safe to call from any task at any time. `stop` is a
//! cooperative flag observed at loop, message and destination boundaries;
//! in-flight network calls and pending sleeps are never preempted.

use std::{
    collections::{HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use rand::Rng;
use serde::Serialize;
use tokio::{sync::Mutex, task::JoinHandle, time::sleep};

use crate::{
    config::RelayConfig,
    delivery,
    errors::Error,
    events::{EventBus, LogLevel, Progress},
    message::SourceMessage,
    port::ChannelPort,
    resolver, stats,
    stats::StatsTracker,
    store::MessageStore,
    transform, Result,
};

/// How often the loop re-checks the buffer when idle.
const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Heartbeat log every N empty polls (one per minute at the 5s cadence).
const HEARTBEAT_EVERY: u64 = 12;
/// How many buffered messages one pass may pick up.
const FETCH_LIMIT: usize = 100;
/// Upper bound on remembered message ids per Running session.
const PROCESSED_CAP: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug)]
struct EngineState {
    status: EngineStatus,
    current: u64,
    total: u64,
    remaining_time: u64,
    total_posts_ever: u64,
    total_failures_ever: u64,
}

impl EngineState {
    fn snapshot(&self) -> Progress {
        Progress {
            status: self.status,
            current: self.current,
            total: self.total,
            remaining_time: self.remaining_time,
            total_posts_ever: self.total_posts_ever,
            total_failures_ever: self.total_failures_ever,
        }
    }
}

/// Message ids already handed to delivery within the current Running
/// session. Bounded: past the cap the oldest ids are forgotten, which is
/// acceptable because the buffer they guard against is itself bounded and
/// far smaller.
struct ProcessedRegistry {
    order: VecDeque<i32>,
    seen: HashSet<i32>,
    cap: usize,
}

impl ProcessedRegistry {
    fn new(cap: usize) -> Self {
        Self {
            order: VecDeque::new(),
            seen: HashSet::new(),
            cap,
        }
    }

    fn contains(&self, id: i32) -> bool {
        self.seen.contains(&id)
    }

    fn insert(&mut self, id: i32) {
        if !self.seen.insert(id) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.cap {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
    }
}

struct EngineInner {
    port: Arc<dyn ChannelPort>,
    store: MessageStore,
    stats: StatsTracker,
    events: EventBus,
    config: Mutex<Option<RelayConfig>>,
    state: Mutex<EngineState>,
    stop_requested: AtomicBool,
    skip_next_delay: AtomicBool,
    /// Storage key of the most recent push; lets a username-configured
    /// source (whose key is not derivable from config) still be drained.
    last_ingest_key: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct RelayEngine {
    inner: Arc<EngineInner>,
}

impl RelayEngine {
    pub fn new(port: Arc<dyn ChannelPort>, events: EventBus) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                port,
                store: MessageStore::new(),
                stats: StatsTracker::new(),
                events,
                config: Mutex::new(None),
                state: Mutex::new(EngineState {
                    status: EngineStatus::Idle,
                    current: 0,
                    total: 0,
                    remaining_time: 0,
                    total_posts_ever: 0,
                    total_failures_ever: 0,
                }),
                stop_requested: AtomicBool::new(false),
                skip_next_delay: AtomicBool::new(false),
                last_ingest_key: AtomicU64::new(0),
                task: Mutex::new(None),
            }),
        }
    }

    /// Replace the posting configuration. Validates the pacing window and
    /// seeds zeroed stats for any destination not seen before.
    pub async fn set_config(&self, config: RelayConfig) -> Result<()> {
        config.validate()?;
        for dest in &config.destination_channels {
            self.inner.stats.ensure(&dest.channel_id, &dest.name).await;
        }
        *self.inner.config.lock().await = Some(config);
        Ok(())
    }

    /// Current configuration snapshot, for the persistence collaborator.
    pub async fn config(&self) -> Option<RelayConfig> {
        self.inner.config.lock().await.clone()
    }

    /// Entry point for the ingestion collaborator: buffer one new source
    /// message under its channel's storage key.
    pub async fn push(&self, channel_key: u64, message: SourceMessage) {
        let worth_logging = message.has_content();
        let origin_id = message.origin.message_id.0;
        self.inner.store.store(channel_key, message).await;
        self.inner
            .last_ingest_key
            .store(channel_key, Ordering::SeqCst);
        if worth_logging {
            self.inner.events.log(
                LogLevel::Info,
                format!("📥 New message received from source channel (id {origin_id})"),
            );
        }
    }

    /// Start the posting loop. Refuses unless a source channel, at least one
    /// destination and a valid pacing configuration are present.
    pub async fn start(&self) -> Result<()> {
        {
            let state = self.inner.state.lock().await;
            if state.status == EngineStatus::Running {
                return Err(Error::Config("posting loop is already running".to_string()));
            }
        }

        let config = self.inner.config.lock().await.clone();
        if let Err(e) = check_start_preconditions(config.as_ref()) {
            self.inner.events.log(LogLevel::Error, e.to_string());
            self.set_status(EngineStatus::Idle).await;
            return Err(e);
        }

        self.inner.stop_requested.store(false, Ordering::SeqCst);
        self.inner.skip_next_delay.store(false, Ordering::SeqCst);
        self.set_status(EngineStatus::Running).await;
        self.update_progress(0, 0, 0).await;

        let engine = self.clone();
        let handle = tokio::spawn(async move {
            engine.run_loop().await;
        });
        *self.inner.task.lock().await = Some(handle);

        Ok(())
    }

    /// Request a cooperative stop. The loop observes the flag at its next
    /// boundary; progress is reset immediately.
    pub async fn stop(&self) {
        self.inner.stop_requested.store(true, Ordering::SeqCst);
        self.set_status(EngineStatus::Stopped).await;
        self.update_progress(0, 0, 0).await;
        self.inner
            .events
            .log(LogLevel::Warning, "Stopping posting loop...");
    }

    /// One-shot: the next scheduled inter-message delay is skipped, then the
    /// flag clears itself.
    pub fn skip_next_delay(&self) {
        self.inner.skip_next_delay.store(true, Ordering::SeqCst);
        self.inner.events.log(
            LogLevel::Info,
            "⚡ Next post will go out immediately (delay skipped)",
        );
    }

    /// Drop every buffered message; returns how many were removed.
    pub async fn clear_all(&self) -> usize {
        let count = self.inner.store.clear_all().await;
        self.inner.events.log(
            LogLevel::Info,
            format!("🗑️ {count} message(s) removed from the queue"),
        );
        count
    }

    pub async fn status(&self) -> Progress {
        self.inner.state.lock().await.snapshot()
    }

    pub async fn channel_stats(&self) -> Vec<stats::ChannelStats> {
        let configured = self.configured_destination_ids().await;
        self.inner.stats.snapshot(&configured).await
    }

    pub async fn stats_summary(&self) -> stats::StatsSummary {
        let configured = self.configured_destination_ids().await;
        self.inner.stats.summary(&configured).await
    }

    /// Buffered messages for one channel key (newest last).
    pub async fn messages(&self, channel_key: u64, limit: usize) -> Vec<SourceMessage> {
        self.inner.store.fetch(channel_key, limit).await
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    async fn configured_destination_ids(&self) -> HashSet<String> {
        self.inner
            .config
            .lock()
            .await
            .as_ref()
            .map(|c| {
                c.destination_channels
                    .iter()
                    .map(|d| d.channel_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn stop_requested(&self) -> bool {
        self.inner.stop_requested.load(Ordering::SeqCst)
    }

    async fn set_status(&self, status: EngineStatus) {
        self.inner.state.lock().await.status = status;
    }

    async fn update_progress(&self, current: u64, total: u64, remaining_time: u64) {
        let snapshot = {
            let mut state = self.inner.state.lock().await;
            state.current = current;
            state.total = total;
            state.remaining_time = remaining_time;
            state.snapshot()
        };
        self.inner.events.progress(snapshot);
    }

    async fn bump_totals(&self, success: bool) {
        let mut state = self.inner.state.lock().await;
        if success {
            state.total_posts_ever += 1;
        } else {
            state.total_failures_ever += 1;
        }
    }

    /// Storage key of the configured source channel: derivable directly for
    /// numeric ids, otherwise whatever key the ingestion collaborator last
    /// pushed under.
    fn source_key(&self, source_id: &str) -> Option<u64> {
        resolver::storage_key(source_id).or_else(|| {
            let last = self.inner.last_ingest_key.load(Ordering::SeqCst);
            (last != 0).then_some(last)
        })
    }

    async fn run_loop(self) {
        let events = self.inner.events.clone();
        let mut processed = ProcessedRegistry::new(PROCESSED_CAP);
        let mut empty_polls: u64 = 0;

        events.log(LogLevel::Info, "🚀 Starting automatic posting loop...");
        if let Some(config) = self.inner.config.lock().await.clone() {
            if let Some(source) = &config.source_channel {
                events.log(
                    LogLevel::Info,
                    format!("📥 Monitoring source channel: {}", source.channel_id),
                );
            }
            events.log(
                LogLevel::Info,
                format!(
                    "📤 {} destination channel(s) configured",
                    config.destination_channels.len()
                ),
            );
        }
        events.log(LogLevel::Info, "⏳ Waiting for messages to repost...");

        while !self.stop_requested() {
            let Some(config) = self.inner.config.lock().await.clone() else {
                events.log(LogLevel::Error, "Configuration removed; posting loop exits");
                break;
            };
            let Some(source) = config.source_channel.clone() else {
                events.log(
                    LogLevel::Error,
                    "Source channel no longer configured; posting loop exits",
                );
                break;
            };
            if config.destination_channels.is_empty() {
                events.log(
                    LogLevel::Error,
                    "No destination channels configured; posting loop exits",
                );
                break;
            }

            let batch = match self.source_key(&source.channel_id) {
                Some(key) => self.inner.store.fetch(key, FETCH_LIMIT).await,
                None => Vec::new(),
            };
            let fresh: Vec<SourceMessage> = batch
                .into_iter()
                .filter(|m| m.has_content() && !processed.contains(m.origin.message_id.0))
                .collect();

            if fresh.is_empty() {
                // Make sure stale progress from a previous batch is not shown.
                let stale = {
                    let state = self.inner.state.lock().await;
                    state.current > 0 || state.total > 0
                };
                if stale {
                    self.update_progress(0, 0, 0).await;
                }

                empty_polls += 1;
                if empty_polls == 1 {
                    events.log(
                        LogLevel::Info,
                        "⏳ Waiting for messages from the source channel...",
                    );
                } else if empty_polls % HEARTBEAT_EVERY == 0 {
                    events.log(
                        LogLevel::Info,
                        "⏳ Still waiting for messages... the source channel is being monitored",
                    );
                }

                sleep(POLL_INTERVAL).await;
                continue;
            }

            empty_polls = 0;
            self.process_batch(&config, fresh, &mut processed).await;

            if self.stop_requested() {
                break;
            }

            self.update_progress(0, 0, 0).await;
            events.log(
                LogLevel::Info,
                "✅ All messages processed. Waiting for new ones...",
            );
        }

        let final_status = if self.stop_requested() {
            events.log(LogLevel::Warning, "Posting interrupted by user");
            EngineStatus::Stopped
        } else {
            EngineStatus::Idle
        };
        self.set_status(final_status).await;
        self.update_progress(0, 0, 0).await;
    }

    /// Fan one batch of new messages out to every destination, pacing between
    /// messages (never between destinations of the same message).
    async fn process_batch(
        &self,
        config: &RelayConfig,
        fresh: Vec<SourceMessage>,
        processed: &mut ProcessedRegistry,
    ) {
        let events = self.inner.events.clone();
        let destinations = &config.destination_channels;
        let post_config = &config.post_config;
        let num_messages = fresh.len();

        events.log(
            LogLevel::Info,
            format!("📨 {num_messages} new message(s) found to post"),
        );
        events.log(
            LogLevel::Info,
            format!(
                "📊 {} post operation(s) across {} channel(s)",
                num_messages * destinations.len(),
                destinations.len()
            ),
        );

        let mut current: u64 = 0;
        self.update_progress(0, num_messages as u64, 0).await;

        for (msg_idx, message) in fresh.iter().enumerate() {
            if self.stop_requested() {
                return;
            }

            // At-most-one-delivery-attempt: marked before delivery so a
            // failure is never retried by a later fetch.
            processed.insert(message.origin.message_id.0);

            let payload = transform::process(message, post_config);
            let is_last_message = msg_idx + 1 == num_messages;
            let remaining_messages = (num_messages - msg_idx - 1) as u64;

            for (dest_idx, dest) in destinations.iter().enumerate() {
                if self.stop_requested() {
                    return;
                }
                let is_last_channel = dest_idx + 1 == destinations.len();

                let success = match delivery::resolve_chat(
                    self.inner.port.as_ref(),
                    &dest.channel_id,
                    &events,
                )
                .await
                {
                    Ok(chat) => {
                        delivery::deliver(
                            self.inner.port.as_ref(),
                            &chat,
                            message,
                            &payload,
                            &events,
                        )
                        .await
                    }
                    Err(e) => {
                        events.log(LogLevel::Error, e.to_string());
                        false
                    }
                };

                self.inner
                    .stats
                    .record(&dest.channel_id, &dest.name, success)
                    .await;
                self.bump_totals(success).await;

                // Pacing applies only after the last destination of a
                // non-final message.
                let delay = if is_last_channel && !is_last_message {
                    rand::thread_rng().gen_range(post_config.delay_min..=post_config.delay_max)
                } else {
                    0
                };

                if success {
                    let mut line = format!("✅ SUCCESS: posted to channel '{}'", dest.name);
                    if delay > 0 {
                        line.push_str(&format!(" | next post in {}", format_duration(delay)));
                    }
                    events.log(LogLevel::Success, line);
                } else {
                    let mut line = format!("❌ FAILURE: could not post to channel '{}'", dest.name);
                    if delay > 0 {
                        line.push_str(&format!(" | next attempt in {}", format_duration(delay)));
                    }
                    events.log(LogLevel::Error, line);
                }

                if is_last_channel {
                    current += 1;
                    events.log(
                        LogLevel::Info,
                        format!("📊 Progress: {current}/{num_messages} message(s) processed"),
                    );
                }

                if is_last_channel && !is_last_message {
                    self.update_progress(current, num_messages as u64, remaining_messages * delay)
                        .await;

                    if !self.stop_requested() {
                        if self.inner.skip_next_delay.swap(false, Ordering::SeqCst) {
                            events.log(
                                LogLevel::Info,
                                "⚡ Delay skipped - posting immediately",
                            );
                        } else {
                            sleep(Duration::from_secs(delay)).await;
                        }
                    }
                } else if is_last_channel {
                    self.update_progress(current, num_messages as u64, 0).await;
                } else {
                    // Mid-fan-out estimate uses the configured average delay.
                    self.update_progress(
                        current,
                        num_messages as u64,
                        remaining_messages * post_config.average_delay(),
                    )
                    .await;
                }
            }
        }
    }
}

fn check_start_preconditions(config: Option<&RelayConfig>) -> Result<()> {
    let Some(config) = config else {
        return Err(Error::Config("configuration not set".to_string()));
    };
    if config.source_channel.is_none() {
        return Err(Error::Config("source channel not configured".to_string()));
    }
    if config.destination_channels.is_empty() {
        return Err(Error::Config(
            "no destination channels configured".to_string(),
        ));
    }
    config.validate()
}

fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        return format!("{hours}h {mins}m {secs}s");
    }
    if mins > 0 {
        return format!("{mins}m {secs}s");
    }
    format!("{secs}s")
}
