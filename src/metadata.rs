use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::schedule::Periodic;
use crate::station::StationId;

pub const UNKNOWN_TITLE: &str = "Unknown Title";
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";

/// Separator of the `Artist - Title - Album` stream title convention.
const TITLE_DELIMITER: &str = " - ";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub title: String,
    pub artist: String,
    pub album: String,
}

impl Song {
    /// Empty or missing fields fall back to the `Unknown …` placeholders.
    pub fn from_session(
        title: Option<String>,
        artist: Option<String>,
        album: Option<String>,
    ) -> Self {
        fn or(v: Option<String>, fallback: &str) -> String {
            v.filter(|s| !s.is_empty())
                .unwrap_or_else(|| fallback.to_string())
        }
        Self {
            title: or(title, UNKNOWN_TITLE),
            artist: or(artist, UNKNOWN_ARTIST),
            album: or(album, UNKNOWN_ALBUM),
        }
    }

    /// `Artist - Title[ - Album]`; anything without the delimiter is a bare title.
    pub fn from_stream_title(raw: &str) -> Self {
        let parts: Vec<&str> = raw.split(TITLE_DELIMITER).collect();
        if parts.len() >= 2 {
            Self {
                artist: parts[0].to_string(),
                title: parts[1].to_string(),
                album: parts
                    .get(2)
                    .filter(|a| !a.is_empty())
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| UNKNOWN_ALBUM.to_string()),
            }
        } else {
            Self {
                title: raw.to_string(),
                artist: UNKNOWN_ARTIST.to_string(),
                album: UNKNOWN_ALBUM.to_string(),
            }
        }
    }

    pub fn station_fallback(station: StationId) -> Self {
        Self {
            title: "Live Broadcast".to_string(),
            artist: station.display_name().to_string(),
            album: "Live Stream".to_string(),
        }
    }
}

/// What the UI shows in the song panel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NowPlaying {
    pub song: Option<Song>,
    pub loading: bool,
    /// Bumped on every start/stop of resolution; results from older epochs are dropped.
    pub epoch: u64,
}

/// Shared publication point for [`NowPlaying`].
///
/// All writes go through the watch channel's lock, so an epoch bump and a
/// late cycle result can never interleave.
#[derive(Clone)]
pub struct NowPlayingBoard {
    tx: Arc<watch::Sender<NowPlaying>>,
}

impl NowPlayingBoard {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(NowPlaying::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<NowPlaying> {
        self.tx.subscribe()
    }

    /// Opens a new epoch in the loading state and returns it.
    pub fn begin(&self) -> u64 {
        let mut epoch = 0;
        self.tx.send_modify(|np| {
            np.epoch += 1;
            np.song = None;
            np.loading = true;
            epoch = np.epoch;
        });
        epoch
    }

    /// Invalidates the current epoch and clears the song.
    pub fn clear(&self) {
        self.tx.send_modify(|np| {
            np.epoch += 1;
            np.song = None;
            np.loading = false;
        });
    }

    /// Returns false, without writing, when `epoch` is no longer current.
    pub fn publish(&self, epoch: u64, song: Song) -> bool {
        let mut accepted = false;
        self.tx.send_if_modified(|np| {
            if np.epoch != epoch {
                return false;
            }
            accepted = true;
            let changed = np.loading || np.song.as_ref() != Some(&song);
            np.song = Some(song);
            np.loading = false;
            changed
        });
        accepted
    }

    /// Like [`publish`](Self::publish), but only while `epoch` has no song yet.
    pub fn publish_if_empty(&self, epoch: u64, song: Song) -> bool {
        self.tx.send_if_modified(|np| {
            if np.epoch != epoch || np.song.is_some() {
                return false;
            }
            np.song = Some(song);
            np.loading = false;
            true
        })
    }
}

#[cfg(test)]
impl NowPlayingBoard {
    pub fn current(&self) -> NowPlaying {
        self.tx.borrow().clone()
    }
}

impl Default for NowPlayingBoard {
    fn default() -> Self {
        Self::new()
    }
}

/// Raw answer of one metadata tier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawMetadata {
    Session {
        title: Option<String>,
        artist: Option<String>,
        album: Option<String>,
    },
    StreamTitle(String),
}

impl RawMetadata {
    pub fn into_song(self) -> Song {
        match self {
            RawMetadata::Session {
                title,
                artist,
                album,
            } => Song::from_session(title, artist, album),
            RawMetadata::StreamTitle(raw) => Song::from_stream_title(&raw),
        }
    }
}

/// Context of one playback session, captured when playback starts.
#[derive(Clone, Debug)]
pub struct Session {
    pub station: StationId,
    pub now_playing_url: Option<String>,
    pub stream_title: watch::Receiver<Option<String>>,
}

#[async_trait]
pub trait MetadataSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` means this tier has nothing; the next tier is tried.
    async fn probe(&self, session: &Session) -> Result<Option<RawMetadata>>;
}

/// Session-level metadata from a station's now-playing JSON endpoint.
pub struct NowPlayingApi {
    client: Client,
}

impl NowPlayingApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MetadataSource for NowPlayingApi {
    fn name(&self) -> &'static str {
        "now-playing-api"
    }

    async fn probe(&self, session: &Session) -> Result<Option<RawMetadata>> {
        let Some(url) = session.now_playing_url.as_deref() else {
            return Ok(None);
        };

        let resp = self
            .client
            .get(url)
            .timeout(Duration::from_secs(8))
            .send()
            .await?
            .error_for_status()?;
        let json = resp.json::<Value>().await?;
        Ok(parse_now_playing(&json))
    }
}

/// The ICY `StreamTitle` of the live stream.
pub struct StreamTitleTag;

#[async_trait]
impl MetadataSource for StreamTitleTag {
    fn name(&self) -> &'static str {
        "stream-title"
    }

    async fn probe(&self, session: &Session) -> Result<Option<RawMetadata>> {
        let title = session.stream_title.borrow().clone();
        Ok(title
            .filter(|t| !t.is_empty())
            .map(RawMetadata::StreamTitle))
    }
}

fn parse_now_playing(v: &Value) -> Option<RawMetadata> {
    [
        v.pointer("/now_playing/song"),
        v.get("now_playing"),
        v.pointer("/broadcast/now_playing"),
        v.get("current_song"),
        v.get("current"),
        Some(v),
    ]
    .into_iter()
    .flatten()
    .find_map(extract_song_info)
}

fn extract_song_info(v: &Value) -> Option<RawMetadata> {
    if !v.is_object() {
        return None;
    }

    let text = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| v.get(*k).and_then(|x| x.as_str()))
            .map(|s| s.to_string())
    };

    let title = text(&["title", "song", "track"]);
    let artist = text(&["artist"]);
    let album = text(&["album"]);

    if title.is_some() || artist.is_some() || album.is_some() {
        Some(RawMetadata::Session {
            title,
            artist,
            album,
        })
    } else {
        None
    }
}

/// Tiered now-playing resolution: each source in order, then the station fallback.
pub struct MetadataResolver {
    sources: Vec<Box<dyn MetadataSource>>,
}

impl MetadataResolver {
    pub fn new(sources: Vec<Box<dyn MetadataSource>>) -> Self {
        Self { sources }
    }

    /// Session metadata first, then the in-stream title tag.
    pub fn standard(client: Client) -> Self {
        Self::new(vec![
            Box::new(NowPlayingApi::new(client)),
            Box::new(StreamTitleTag),
        ])
    }

    /// One resolution cycle. `None` when a tier failed: the caller keeps what it
    /// had, or shows the station fallback if it had nothing.
    pub async fn resolve(&self, session: &Session) -> Option<Song> {
        for source in &self.sources {
            match source.probe(session).await {
                Ok(Some(raw)) => {
                    tracing::debug!(source = source.name(), station = %session.station, "metadata resolved");
                    return Some(raw.into_song());
                }
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!(source = source.name(), error = %e, "metadata probe failed");
                    return None;
                }
            }
        }
        Some(Song::station_fallback(session.station))
    }

    /// Starts the repeating cycle for `session`, publishing into `epoch` of `board`.
    pub fn spawn(
        self: &Arc<Self>,
        session: Session,
        board: NowPlayingBoard,
        epoch: u64,
        period: Duration,
    ) -> Periodic {
        let resolver = Arc::clone(self);
        let session = Arc::new(session);
        Periodic::spawn("metadata", period, move || {
            let resolver = Arc::clone(&resolver);
            let session = Arc::clone(&session);
            let board = board.clone();
            async move {
                match resolver.resolve(&session).await {
                    Some(song) => {
                        if !board.publish(epoch, song) {
                            tracing::debug!(epoch, "dropped metadata for a finished session");
                        }
                    }
                    // a failed cycle keeps the last song, but never leaves the session without one
                    None => {
                        let fallback = Song::station_fallback(session.station);
                        if board.publish_if_empty(epoch, fallback) {
                            tracing::debug!(station = %session.station, "metadata failed, showing station fallback");
                        }
                    }
                }
            }
        })
    }
}
