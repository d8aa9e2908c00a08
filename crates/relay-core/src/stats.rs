//! Per-destination delivery accounting.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelHealth {
    Active,
    Inactive,
    Error,
    Unknown,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChannelStats {
    pub channel_id: String,
    pub name: String,
    pub total_posts: u64,
    pub total_failures: u64,
    pub last_post_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub status: ChannelHealth,
}

impl ChannelStats {
    fn new(channel_id: &str, name: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            name: name.to_string(),
            total_posts: 0,
            total_failures: 0,
            last_post_at: None,
            last_failure_at: None,
            is_active: true,
            status: ChannelHealth::Unknown,
        }
    }

    /// A destination is unhealthy when it has only ever failed, or when
    /// failures outnumber successes by more than 2x.
    fn is_failing(&self) -> bool {
        (self.total_failures > 0 && self.total_posts == 0)
            || self.total_failures > 2 * self.total_posts
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct StatsSummary {
    pub total_channels: usize,
    pub active_channels: usize,
    pub inactive_channels: usize,
    pub channels_with_errors: usize,
    pub total_posts: u64,
    pub total_failures: u64,
    /// Percentage, rounded to 2 decimals. 0 when no attempts were made.
    pub success_rate: f64,
}

#[derive(Default)]
pub struct StatsTracker {
    inner: Mutex<HashMap<String, ChannelStats>>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a zeroed record for a destination so it shows up in stats before
    /// its first delivery attempt.
    pub async fn ensure(&self, channel_id: &str, name: &str) {
        let mut map = self.inner.lock().await;
        map.entry(channel_id.to_string())
            .or_insert_with(|| ChannelStats::new(channel_id, name));
    }

    /// Record one delivery attempt. Creates the record on first sight and
    /// keeps the display name current across renames.
    pub async fn record(&self, channel_id: &str, name: &str, success: bool) {
        let mut map = self.inner.lock().await;
        let stats = map
            .entry(channel_id.to_string())
            .or_insert_with(|| ChannelStats::new(channel_id, name));
        stats.name = name.to_string();

        let now = Utc::now();
        if success {
            stats.total_posts += 1;
            stats.last_post_at = Some(now);
        } else {
            stats.total_failures += 1;
            stats.last_failure_at = Some(now);
        }
    }

    /// All records with health derived at read time: `error` by the failure
    /// rule, otherwise `active`/`inactive` by current config membership.
    pub async fn snapshot(&self, configured: &HashSet<String>) -> Vec<ChannelStats> {
        let map = self.inner.lock().await;
        let mut out: Vec<ChannelStats> = map
            .values()
            .map(|s| {
                let mut s = s.clone();
                s.is_active = configured.contains(&s.channel_id);
                s.status = if s.is_failing() {
                    ChannelHealth::Error
                } else if s.is_active {
                    ChannelHealth::Active
                } else {
                    ChannelHealth::Inactive
                };
                s
            })
            .collect();
        out.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
        out
    }

    pub async fn summary(&self, configured: &HashSet<String>) -> StatsSummary {
        let all = self.snapshot(configured).await;

        let total_posts: u64 = all.iter().map(|s| s.total_posts).sum();
        let total_failures: u64 = all.iter().map(|s| s.total_failures).sum();
        let attempts = total_posts + total_failures;
        let success_rate = if attempts > 0 {
            (total_posts as f64 / attempts as f64 * 10_000.0).round() / 100.0
        } else {
            0.0
        };

        StatsSummary {
            total_channels: all.len(),
            active_channels: all.iter().filter(|s| s.is_active).count(),
            inactive_channels: all.iter().filter(|s| !s.is_active).count(),
            channels_with_errors: all
                .iter()
                .filter(|s| s.status == ChannelHealth::Error)
                .count(),
            total_posts,
            total_failures,
            success_rate,
        }
    }
}
