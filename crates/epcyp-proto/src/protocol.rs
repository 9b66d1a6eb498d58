use serde::{Deserialize, Serialize};

use crate::channel::{Channel, ChannelKey};
use crate::favorite::{Favorite, FavoriteMatcher, FavoriteStyle};
use crate::reconcile::{FeedStatus, SourceFailure};
use crate::scheduler::SchedulerStatus;
use crate::view::{SortKey, SortOrder};
use crate::yp::YpSource;

/// Requests from the UI layer to the feed core.  Manual refresh is not here:
/// it needs a reply and travels on its own event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    SetAutoUpdate { enabled: bool },
    SetSort { key: SortKey, order: SortOrder },
    /// Append a channel name to a favorite's pattern.
    RegisterFavorite { favorite_idx: usize, channel_name: String },
    /// Replace the whole favorite list (settings window).
    SetFavorites { favorites: Vec<Favorite> },
    SetSources { sources: Vec<YpSource> },
    Play { key: ChannelKey },
    OpenBbs { key: ChannelKey },
}

/// A channel as the list views render it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRow {
    #[serde(flatten)]
    pub channel: Channel,
    pub detail_line: String,
    /// Colours of the first matching favorite, if any.
    pub style: Option<FavoriteStyle>,
}

impl ChannelRow {
    pub fn rows(channels: Vec<Channel>, matcher: &FavoriteMatcher) -> Vec<Self> {
        channels
            .into_iter()
            .map(|channel| Self {
                style: matcher.style_for(&channel),
                detail_line: channel.detail_line(),
                channel,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub rev: u64,
    pub scheduler: SchedulerStatus,
    pub channel_count: usize,
    pub feed_status: Option<FeedStatus>,
    pub source_failures: Vec<SourceFailure>,
    /// Favorites whose pattern failed to compile.
    pub favorite_errors: Vec<String>,
}

/// Body of a rejected manual refresh.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CooldownReport {
    pub seconds_remaining: u64,
}
