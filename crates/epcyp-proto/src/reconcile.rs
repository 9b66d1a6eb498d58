//! Merging fetched YP snapshots into the known channel set.
//!
//! A YP feed is a full snapshot, never a delta: a successful fetch replaces
//! the previous channel list outright, and channels missing from it are gone.
//! The only exception is an empty result, which is treated as a transient
//! hiccup and keeps the last good snapshot.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::channel::{Channel, ChannelKey};
use crate::error::FeedError;
use crate::yp::{parse_index_txt, YpSource};

/// Result of fetching and parsing one source.
#[derive(Debug, Clone)]
pub struct SourceOutcome {
    pub source: YpSource,
    pub result: Result<Vec<Channel>, FeedError>,
}

impl SourceOutcome {
    /// Parse a raw fetch result into channels, keeping the error scoped to
    /// this source.
    pub fn from_fetch(source: YpSource, fetched: Result<String, FeedError>) -> Self {
        let result = fetched.and_then(|text| parse_index_txt(&text, &source));
        Self { source, result }
    }
}

/// A source that contributed nothing to the last merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source: String,
    pub message: String,
}

/// The union of all sources that answered, plus the ones that did not.
#[derive(Debug, Clone, Default)]
pub struct MergedFeed {
    pub channels: Vec<Channel>,
    pub failures: Vec<SourceFailure>,
}

/// Union per-source results in source order.  When two sources list the same
/// channel identity the first one wins.
pub fn merge_sources(outcomes: Vec<SourceOutcome>) -> MergedFeed {
    let mut merged = MergedFeed::default();
    let mut seen: HashSet<ChannelKey> = HashSet::new();

    for outcome in outcomes {
        match outcome.result {
            Ok(channels) => {
                let before = merged.channels.len();
                for ch in channels {
                    if seen.insert(ch.key()) {
                        merged.channels.push(ch);
                    }
                }
                info!(
                    "[feed] {}: {} channel(s)",
                    outcome.source.name,
                    merged.channels.len() - before
                );
            }
            Err(e) => {
                warn!("[feed] {}: {}", outcome.source.name, e);
                merged.failures.push(SourceFailure {
                    source: outcome.source.name,
                    message: e.to_string(),
                });
            }
        }
    }

    merged
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedStatus {
    /// The fresh snapshot replaced the previous one.
    Updated,
    /// The fetch produced no channels; the previous snapshot was kept.
    NoData,
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub merged: Vec<Channel>,
    /// Channels of `merged` whose identity was absent before, in feed order.
    pub newly_arrived: Vec<Channel>,
    pub status: FeedStatus,
}

pub fn reconcile(previous: &[Channel], fresh: Vec<Channel>) -> Reconciliation {
    if fresh.is_empty() {
        return Reconciliation {
            merged: previous.to_vec(),
            newly_arrived: Vec::new(),
            status: FeedStatus::NoData,
        };
    }

    let known: HashSet<ChannelKey> = previous.iter().map(Channel::key).collect();
    let newly_arrived = fresh
        .iter()
        .filter(|ch| !known.contains(&ch.key()))
        .cloned()
        .collect();

    Reconciliation {
        merged: fresh,
        newly_arrived,
        status: FeedStatus::Updated,
    }
}
