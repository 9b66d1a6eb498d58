//! Sorted and filtered projections over a channel snapshot.
//!
//! Every function here returns a fresh vector and leaves its input alone.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::channel::{Channel, ChannelKey};
use crate::favorite::FavoriteMatcher;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    Name,
    Genre,
    Detail,
    #[serde(alias = "listener")]
    Listeners,
    #[serde(alias = "relay")]
    Relays,
    #[serde(alias = "kbps")]
    Bitrate,
    Time,
    Format,
}

impl SortKey {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Genre => "genre",
            Self::Detail => "detail",
            Self::Listeners => "listeners",
            Self::Relays => "relays",
            Self::Bitrate => "bitrate",
            Self::Time => "time",
            Self::Format => "format",
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name" => Ok(Self::Name),
            "genre" => Ok(Self::Genre),
            "detail" => Ok(Self::Detail),
            "listeners" | "listener" => Ok(Self::Listeners),
            "relays" | "relay" => Ok(Self::Relays),
            "bitrate" | "kbps" => Ok(Self::Bitrate),
            "time" => Ok(Self::Time),
            "format" => Ok(Self::Format),
            other => Err(format!("unknown sort key: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(format!("unknown sort order: {other}")),
        }
    }
}

/// Uptime `h:mm` as total minutes.  Anything unparsable sorts as zero.
pub fn time_minutes(time: &str) -> u32 {
    let Some((h, m)) = time.trim().split_once(':') else {
        return time.trim().parse().unwrap_or(0);
    };
    let hours: u32 = h.parse().unwrap_or(0);
    let minutes: u32 = m.parse().unwrap_or(0);
    hours.saturating_mul(60).saturating_add(minutes)
}

/// Format strings compare by raw character codes, independent of locale.
fn cmp_char_codes(a: &str, b: &str) -> Ordering {
    a.chars().map(u32::from).cmp(b.chars().map(u32::from))
}

fn cmp_key(key: SortKey, a: &Channel, b: &Channel) -> Ordering {
    match key {
        SortKey::Name => a.name.cmp(&b.name),
        SortKey::Genre => a.genre.cmp(&b.genre),
        SortKey::Detail => a.detail.cmp(&b.detail),
        SortKey::Listeners => a.listeners.cmp(&b.listeners),
        SortKey::Relays => a.relays.cmp(&b.relays),
        SortKey::Bitrate => a.bitrate.cmp(&b.bitrate),
        SortKey::Time => time_minutes(&a.time).cmp(&time_minutes(&b.time)),
        SortKey::Format => cmp_char_codes(&a.format, &b.format),
    }
}

/// Stable sort.  Descending negates the key comparison rather than reversing
/// the ascending result, so ties keep their input order in both directions.
pub fn sort_by(channels: &[Channel], key: SortKey, order: SortOrder) -> Vec<Channel> {
    let mut sorted = channels.to_vec();
    match order {
        SortOrder::Asc => sorted.sort_by(|a, b| cmp_key(key, a, b)),
        SortOrder::Desc => sorted.sort_by(|a, b| cmp_key(key, b, a)),
    }
    sorted
}

/// Channels matching any favorite, once each, in input order.
pub fn filter_favorites(channels: &[Channel], matcher: &FavoriteMatcher) -> Vec<Channel> {
    let mut seen: HashSet<ChannelKey> = HashSet::new();
    channels
        .iter()
        .filter(|ch| !matcher.match_all(ch).is_empty())
        .filter(|ch| seen.insert(ch.key()))
        .cloned()
        .collect()
}

/// Case-insensitive substring search over name, genre, detail and comment.
/// An empty word means "no active search" and yields nothing.
pub fn filter_search(channels: &[Channel], word: &str) -> Vec<Channel> {
    if word.is_empty() {
        return Vec::new();
    }
    let needle = word.to_lowercase();
    channels
        .iter()
        .filter(|ch| {
            [&ch.name, &ch.genre, &ch.detail, &ch.comment]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle))
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::channel;
    use crate::favorite::Favorite;

    fn with_listeners(name: &str, listeners: i32) -> Channel {
        Channel {
            listeners,
            ..channel(name, name)
        }
    }

    fn names(channels: &[Channel]) -> Vec<&str> {
        channels.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_sort_numeric_both_directions() {
        let xs = vec![
            with_listeners("a", 5),
            with_listeners("b", -1),
            with_listeners("c", 40),
        ];
        assert_eq!(names(&sort_by(&xs, SortKey::Listeners, SortOrder::Asc)), ["b", "a", "c"]);
        assert_eq!(names(&sort_by(&xs, SortKey::Listeners, SortOrder::Desc)), ["c", "a", "b"]);
        // input untouched
        assert_eq!(names(&xs), ["a", "b", "c"]);
    }

    #[test]
    fn test_distinct_keys_desc_is_reverse_of_asc() {
        let xs: Vec<Channel> = [3, 9, 1, 7]
            .iter()
            .map(|&n| with_listeners(&format!("c{n}"), n))
            .collect();
        let mut asc = sort_by(&xs, SortKey::Listeners, SortOrder::Asc);
        asc.reverse();
        assert_eq!(asc, sort_by(&xs, SortKey::Listeners, SortOrder::Desc));
    }

    #[test]
    fn test_ties_keep_input_order_in_both_directions() {
        let xs = vec![
            with_listeners("t1", 5),
            with_listeners("hi", 9),
            with_listeners("t2", 5),
            with_listeners("lo", 1),
            with_listeners("t3", 5),
        ];
        assert_eq!(
            names(&sort_by(&xs, SortKey::Listeners, SortOrder::Asc)),
            ["lo", "t1", "t2", "t3", "hi"]
        );
        assert_eq!(
            names(&sort_by(&xs, SortKey::Listeners, SortOrder::Desc)),
            ["hi", "t1", "t2", "t3", "lo"]
        );
    }

    #[test]
    fn test_time_sorts_by_minutes() {
        let mut a = channel("a", "1");
        a.time = "10:05".to_string();
        let mut b = channel("b", "2");
        b.time = "2:59".to_string();
        let mut c = channel("c", "3");
        c.time = "0:30".to_string();
        let xs = vec![a, b, c];
        assert_eq!(names(&sort_by(&xs, SortKey::Time, SortOrder::Asc)), ["c", "b", "a"]);
        assert_eq!(names(&sort_by(&xs, SortKey::Time, SortOrder::Desc)), ["a", "b", "c"]);
    }

    #[test]
    fn test_time_minutes_parsing() {
        assert_eq!(time_minutes("1:05"), 65);
        assert_eq!(time_minutes("12:30"), 750);
        assert_eq!(time_minutes(""), 0);
        assert_eq!(time_minutes("x:y"), 0);
    }

    #[test]
    fn test_format_sorts_by_char_codes() {
        let fmt = |name: &str, format: &str| Channel {
            format: format.to_string(),
            ..channel(name, name)
        };
        let xs = vec![fmt("w", "WMV"), fmt("f", "FLV"), fmt("m", "MKV"), fmt("l", "flv")];
        assert_eq!(
            names(&sort_by(&xs, SortKey::Format, SortOrder::Asc)),
            ["f", "m", "w", "l"]
        );
    }

    #[test]
    fn test_sort_key_parses_stored_names() {
        assert_eq!("listener".parse::<SortKey>(), Ok(SortKey::Listeners));
        assert_eq!("kbps".parse::<SortKey>(), Ok(SortKey::Bitrate));
        assert!("bogus".parse::<SortKey>().is_err());
        assert_eq!("asc".parse::<SortOrder>(), Ok(SortOrder::Asc));
    }

    #[test]
    fn test_filter_search_empty_word_is_empty() {
        let xs = vec![channel("a", "1"), channel("b", "2")];
        assert!(filter_search(&xs, "").is_empty());
    }

    #[test]
    fn test_filter_search_fields_case_insensitive() {
        let mut by_genre = channel("one", "1");
        by_genre.genre = "Music".to_string();
        let mut by_comment = channel("two", "2");
        by_comment.comment = "live MUSIC tonight".to_string();
        let mut by_url = channel("three", "3");
        by_url.url = "http://music.example/".to_string();
        let xs = vec![by_genre, by_comment, by_url];
        assert_eq!(names(&filter_search(&xs, "music")), ["one", "two"]);
    }

    #[test]
    fn test_filter_search_is_literal() {
        let xs = vec![channel("a.b", "1"), channel("axb", "2")];
        assert_eq!(names(&filter_search(&xs, "a.b")), ["a.b"]);
    }

    #[test]
    fn test_filter_favorites_dedupes_and_keeps_order() {
        let matcher = FavoriteMatcher::new(vec![
            Favorite::new("games", "game"),
            Favorite::new("night", "night"),
            Favorite::new("empty", ""),
        ]);
        let xs = vec![
            channel("other", "0"),
            channel("game night", "1"),
            channel("night owl", "2"),
            channel("game night", "1"),
            channel("game", "3"),
        ];
        assert_eq!(
            names(&filter_favorites(&xs, &matcher)),
            ["game night", "night owl", "game"]
        );
    }
}
