use serde::{Deserialize, Serialize};

/// Identity of a channel across successive YP fetches.  Every other field
/// (listener counts, comment, uptime...) is allowed to change between
/// snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelKey {
    pub name: String,
    pub id: String,
}

/// Track metadata advertised alongside a channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Track {
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub contact: String,
}

/// One advertised stream as listed by a YP.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub id: String,
    /// Tracker endpoint, `host:port`.
    #[serde(default)]
    pub tip: String,
    /// Contact URL (usually a BBS thread).
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub comment: String,
    /// Stream type, e.g. `WMV`, `FLV`, `MKV`.
    #[serde(default)]
    pub format: String,
    /// Negative when the YP hides the count.
    #[serde(default)]
    pub listeners: i32,
    #[serde(default)]
    pub relays: i32,
    /// Bitrate in kbps.
    #[serde(default)]
    pub bitrate: u32,
    #[serde(default)]
    pub track: Track,
    /// Uptime as `h:mm`.
    #[serde(default)]
    pub time: String,
    /// Name of the YP this record was fetched from.
    #[serde(default)]
    pub yp_name: String,
    #[serde(default)]
    pub yp_url: String,
}

impl Channel {
    pub fn key(&self) -> ChannelKey {
        ChannelKey {
            name: self.name.clone(),
            id: self.id.clone(),
        }
    }

    pub fn has_key(&self, key: &ChannelKey) -> bool {
        self.name == key.name && self.id == key.id
    }

    /// Tracker host without the port.
    pub fn host(&self) -> &str {
        match self.tip.rsplit_once(':') {
            Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
                host
            }
            _ => &self.tip,
        }
    }

    /// Secondary line shown under the channel name.
    pub fn detail_line(&self) -> String {
        let genre = if self.detail.is_empty() {
            self.genre.clone()
        } else {
            format!("{} - ", self.genre)
        };
        format!(
            "{}{} {} {}",
            genre, self.detail, self.comment, self.track.artist
        )
    }

    /// `name(listeners/relays)[genre - detail]「comment」`
    pub fn summary_line(&self) -> String {
        let mut text = format!(
            "{}({}/{})[{} - {}]",
            self.name, self.listeners, self.relays, self.genre, self.detail
        );
        if !self.comment.is_empty() {
            text.push_str(&format!("「{}」", self.comment));
        }
        text
    }

    pub fn summary_multiline(&self) -> String {
        let mut text = format!(
            "{}({}/{})\n[{} - {}]",
            self.name, self.listeners, self.relays, self.genre, self.detail
        );
        if !self.comment.is_empty() {
            text.push_str(&format!("\n「{}」", self.comment));
        }
        text
    }

    /// Playlist URL served by the local PeerCast instance.
    pub fn playlist_url(&self, peercast_port: u16) -> String {
        format!(
            "http://127.0.0.1:{}/pls/{}?tip={}",
            peercast_port, self.id, self.tip
        )
    }

    /// Direct stream URL served by the local PeerCast instance.
    pub fn stream_url(&self, peercast_port: u16) -> String {
        format!(
            "http://127.0.0.1:{}/stream/{}.{}",
            peercast_port,
            self.id,
            self.format.to_lowercase()
        )
    }
}

#[cfg(test)]
pub(crate) fn channel(name: &str, id: &str) -> Channel {
    Channel {
        name: name.to_string(),
        id: id.to_string(),
        ..Channel::default()
    }
}
