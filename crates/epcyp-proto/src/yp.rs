//! YP sources and the `index.txt` channel list format.
//!
//! One channel per line, fields separated by `<>`:
//!
//! ```text
//!   0 name        5 detail      10 artist       15 uptime (h:mm)
//!   1 id          6 listeners   11 album        16 status
//!   2 tip         7 relays      12 title        17 comment
//!   3 contact     8 bitrate     13 track url    18 direct flag
//!   4 genre       9 type        14 encoded name
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::channel::{Channel, Track};
use crate::error::FeedError;

const FIELD_SEPARATOR: &str = "<>";
const FIELD_COUNT: usize = 19;

/// One configured YP index server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YpSource {
    pub name: String,
    /// Base URL of the YP; `index.txt` is appended unless already present.
    pub url: String,
}

impl YpSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }

    pub fn index_url(&self) -> String {
        if self.url.ends_with(".txt") {
            self.url.clone()
        } else if self.url.ends_with('/') {
            format!("{}index.txt", self.url)
        } else {
            format!("{}/index.txt", self.url)
        }
    }
}

pub fn default_sources() -> Vec<YpSource> {
    vec![
        YpSource::new("SP", "http://bayonet.ddo.jp/sp/"),
        YpSource::new("TP", "http://temp.orz.hm/yp/"),
    ]
}

/// Parse a complete `index.txt` body fetched from `source`.
///
/// Short lines are skipped.  A non-empty body that yields no channel at all
/// and looks like an HTML page is reported as a parse failure.
pub fn parse_index_txt(text: &str, source: &YpSource) -> Result<Vec<Channel>, FeedError> {
    let mut channels = Vec::new();
    let mut skipped = 0usize;

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(line, source) {
            Some(ch) => channels.push(ch),
            None => {
                skipped += 1;
                debug!("[yp] {}: skipping line {}: {:?}", source.name, lineno + 1, line);
            }
        }
    }

    if skipped > 0 {
        warn!(
            "[yp] {}: skipped {} malformed line(s), kept {}",
            source.name,
            skipped,
            channels.len()
        );
    }

    if channels.is_empty() && skipped > 0 && looks_like_html(text) {
        return Err(FeedError::Parse {
            url: source.index_url(),
            message: "response is an HTML page, not index.txt".to_string(),
        });
    }

    Ok(channels)
}

fn parse_line(line: &str, source: &YpSource) -> Option<Channel> {
    let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
    if fields.len() < FIELD_COUNT {
        return None;
    }
    let text = |i: usize| unescape_html(fields[i].trim());
    let name = text(0);
    if name.is_empty() {
        return None;
    }

    Some(Channel {
        name,
        id: text(1),
        tip: text(2),
        url: text(3),
        genre: text(4),
        detail: text(5),
        listeners: parse_count(fields[6]),
        relays: parse_count(fields[7]),
        bitrate: fields[8].trim().parse().unwrap_or(0),
        format: text(9),
        track: Track {
            artist: text(10),
            album: text(11),
            title: text(12),
            contact: text(13),
        },
        time: text(15),
        comment: text(17),
        yp_name: source.name.clone(),
        yp_url: source.url.clone(),
    })
}

fn parse_count(s: &str) -> i32 {
    s.trim().parse().unwrap_or(0)
}

fn looks_like_html(text: &str) -> bool {
    let head = text.trim_start().get(..64).unwrap_or(text.trim_start());
    let head = head.to_ascii_lowercase();
    head.starts_with("<!doctype") || head.starts_with("<html")
}

/// Undo the entity escaping YPs apply to free-text fields.
pub fn unescape_html(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#039;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
