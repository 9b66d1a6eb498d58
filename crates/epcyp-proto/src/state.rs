use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::channel::{Channel, ChannelKey};
use crate::favorite::FavoriteMatcher;
use crate::reconcile::{FeedStatus, SourceFailure};
use crate::scheduler::{SchedulerStatus, UpdateScheduler};
use crate::view::{self, SortKey, SortOrder};
use crate::yp::YpSource;

/// Immutable picture of the session handed to readers.  Only the feed core
/// writes; everyone else clones.
#[derive(Debug, Clone)]
pub struct FeedSnapshot {
    /// Monotonic revision counter, bumped on every publish.
    pub rev: u64,
    /// Channels in feed order.
    pub channels: Vec<Channel>,
    pub matcher: Arc<FavoriteMatcher>,
    pub sources: Vec<YpSource>,
    pub scheduler: UpdateScheduler,
    /// Outcome of the last completed fetch; `None` before the first one.
    pub feed_status: Option<FeedStatus>,
    pub source_failures: Vec<SourceFailure>,
    pub sort_key: SortKey,
    pub sort_order: SortOrder,
}

impl FeedSnapshot {
    pub fn new(
        matcher: FavoriteMatcher,
        sources: Vec<YpSource>,
        scheduler: UpdateScheduler,
        sort_key: SortKey,
        sort_order: SortOrder,
    ) -> Self {
        Self {
            rev: 1,
            channels: Vec::new(),
            matcher: Arc::new(matcher),
            sources,
            scheduler,
            feed_status: None,
            source_failures: Vec::new(),
            sort_key,
            sort_order,
        }
    }

    /// All channels in the configured order.
    pub fn current_channels(&self) -> Vec<Channel> {
        view::sort_by(&self.channels, self.sort_key, self.sort_order)
    }

    pub fn favorite_channels(&self) -> Vec<Channel> {
        view::filter_favorites(&self.current_channels(), &self.matcher)
    }

    pub fn search_channels(&self, word: &str) -> Vec<Channel> {
        view::filter_search(&self.current_channels(), word)
    }

    pub fn find(&self, key: &ChannelKey) -> Option<&Channel> {
        self.channels.iter().find(|ch| ch.has_key(key))
    }

    pub fn scheduler_status(&self, now: DateTime<Utc>) -> SchedulerStatus {
        self.scheduler.status(now)
    }
}

pub struct StateManager {
    state: Arc<RwLock<FeedSnapshot>>,
}

impl StateManager {
    pub fn new(initial: FeedSnapshot) -> Self {
        Self {
            state: Arc::new(RwLock::new(initial)),
        }
    }

    pub fn arc(&self) -> Arc<RwLock<FeedSnapshot>> {
        Arc::clone(&self.state)
    }

    pub async fn get_state(&self) -> FeedSnapshot {
        self.state.read().await.clone()
    }

    /// Apply `f` and bump the revision.
    pub async fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut FeedSnapshot),
    {
        let mut state = self.state.write().await;
        f(&mut state);
        state.rev += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::channel;
    use crate::favorite::Favorite;
    use crate::scheduler::SchedulerConfig;

    fn snapshot() -> FeedSnapshot {
        FeedSnapshot::new(
            FavoriteMatcher::new(vec![Favorite::new("fav", "^b")]),
            Vec::new(),
            UpdateScheduler::new(SchedulerConfig::default(), false),
            SortKey::Listeners,
            SortOrder::Desc,
        )
    }

    #[tokio::test]
    async fn test_update_bumps_rev() {
        let manager = StateManager::new(snapshot());
        assert_eq!(manager.get_state().await.rev, 1);
        manager
            .update(|s| s.channels.push(channel("a", "1")))
            .await;
        let state = manager.get_state().await;
        assert_eq!(state.rev, 2);
        assert_eq!(state.channels.len(), 1);
    }

    #[test]
    fn test_projections_use_configured_sort() {
        let mut s = snapshot();
        for (name, listeners) in [("a", 1), ("b1", 30), ("b2", 10)] {
            s.channels.push(Channel {
                listeners,
                ..channel(name, name)
            });
        }
        let names = |xs: Vec<Channel>| xs.into_iter().map(|c| c.name).collect::<Vec<_>>();
        assert_eq!(names(s.current_channels()), ["b1", "b2", "a"]);
        assert_eq!(names(s.favorite_channels()), ["b1", "b2"]);
        assert_eq!(names(s.search_channels("A")), ["a"]);
        assert!(s.search_channels("").is_empty());
        assert!(s
            .find(&ChannelKey {
                name: "b2".into(),
                id: "b2".into()
            })
            .is_some());
    }
}
