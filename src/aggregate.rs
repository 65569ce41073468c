use anyhow::{Context, Result};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::browser::TabSnapshot;
use crate::cascade::{Resolution, Resolver};
use crate::constants::constants;
use crate::store::KeyValueStore;
use crate::video_url::{VideoId, extract_video_id};

/// Totals across every open video tab. Rebuilt from scratch on each refresh
/// and stored as one value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
  pub total_tabs: usize,
  pub known_count: usize,
  pub unknown_count: usize,
  pub total_seconds: u64,
  /// Epoch milliseconds.
  pub updated_at: i64,
}

impl Summary {
  pub fn from_resolutions(tabs: &[TabResolution], updated_at: i64) -> Self {
    let known: Vec<u64> = tabs.iter().filter_map(|t| t.resolution.map(|r| r.seconds)).filter(|s| *s > 0).collect();
    Self {
      total_tabs: tabs.len(),
      known_count: known.len(),
      unknown_count: tabs.len() - known.len(),
      total_seconds: known.iter().sum(),
      updated_at,
    }
  }
}

/// Outcome for a single tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabResolution {
  pub tab: TabSnapshot,
  pub video_id: Option<VideoId>,
  pub resolution: Option<Resolution>,
}

#[derive(Debug, Clone)]
pub struct Report {
  pub summary: Summary,
  pub tabs: Vec<TabResolution>,
}

pub struct Aggregator {
  resolver: Resolver,
  store: Arc<dyn KeyValueStore>,
  summary_key: String,
  patterns: Vec<String>,
}

impl Aggregator {
  pub fn new(resolver: Resolver, store: Arc<dyn KeyValueStore>) -> Self {
    let c = constants();
    Self { resolver, store, summary_key: c.summary_key.clone(), patterns: c.tab_url_patterns.clone() }
  }

  pub fn resolver(&self) -> &Resolver {
    &self.resolver
  }

  /// Resolve every open video tab concurrently, then store and return the totals.
  pub async fn refresh_totals(&self) -> Result<Report> {
    self.resolver.cache().load().await;

    let tabs = self.resolver.tabs().query(&self.patterns).await.context("Failed to enumerate video tabs")?;
    let resolutions = join_all(tabs.iter().map(|tab| self.resolver.resolve(tab))).await;

    let tabs: Vec<TabResolution> = tabs
      .into_iter()
      .zip(resolutions)
      .map(|(tab, resolution)| {
        let video_id = tab.url.as_deref().and_then(extract_video_id);
        TabResolution { tab, video_id, resolution }
      })
      .collect();

    let summary = Summary::from_resolutions(&tabs, chrono::Utc::now().timestamp_millis());
    let value = serde_json::to_value(&summary).context("Failed to serialize summary")?;
    self.store.set(&self.summary_key, value).await.context("Failed to store summary")?;

    info!(
      tabs = summary.total_tabs,
      known = summary.known_count,
      unknown = summary.unknown_count,
      seconds = summary.total_seconds,
      "aggregate: totals refreshed"
    );
    Ok(Report { summary, tabs })
  }

  /// The most recently stored summary, if any.
  pub async fn last_summary(&self) -> Result<Option<Summary>> {
    let Some(value) = self.store.get(&self.summary_key).await.context("Failed to read summary")? else {
      return Ok(None);
    };
    let summary = serde_json::from_value(value).context("Stored summary is malformed")?;
    Ok(Some(summary))
  }
}
