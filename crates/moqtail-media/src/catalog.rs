use moqtail_transport::{SessionError, SubscribeError, SubscribeSend, Subscriber};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Reserved track carrying the catalog document.
pub const CATALOG_TRACK: &str = ".catalog";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("invalid catalog")]
    Invalid,
    #[error("no catalog data")]
    Empty,
    #[error("catalog updates not supported (group {group}, object {object})")]
    Update { group: u64, object: u64 },
    #[error("catalog subscribe failed: {0}")]
    Subscribe(#[from] SubscribeError),
    #[error("catalog session error: {0}")]
    Session(#[from] SessionError),
    #[error("catalog read failed: {0}")]
    Io(String),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

#[derive(Clone, Debug, PartialEq)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub frame_rate: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioParams {
    pub channel_count: u32,
    pub sample_rate: u32,
    pub sample_size: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TrackKind {
    Video(VideoParams),
    Audio(AudioParams),
}

/// One rendition listed in the catalog.
#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    pub container: String,
    /// Track carrying the initialization segment.
    pub init_track: String,
    /// Track carrying media fragments.
    pub data_track: String,
    pub codec: String,
    /// Bits per second, when advertised.
    pub bit_rate: Option<u64>,
    pub kind: TrackKind,
}

impl Track {
    pub fn is_video(&self) -> bool {
        matches!(self.kind, TrackKind::Video(_))
    }

    pub fn is_audio(&self) -> bool {
        matches!(self.kind, TrackKind::Audio(_))
    }

    /// Identity derived from codec and geometry, stable across sessions even
    /// when wire track names change.
    pub fn unique_id(&self) -> String {
        match &self.kind {
            TrackKind::Video(v) => format!(
                "video:{}:{}:{}:{}",
                self.codec,
                v.width,
                v.height,
                v.frame_rate.map(|f| f.to_string()).unwrap_or_default()
            ),
            TrackKind::Audio(a) => format!(
                "audio:{}:{}:{}:{}",
                self.codec, a.channel_count, a.sample_rate, a.sample_size
            ),
        }
    }
}

/// Catalog entry as it appears in JSON. Every field past `kind` and
/// `container` is optional here and checked in `validate`.
#[derive(Debug, Default, Deserialize, Serialize)]
struct TrackEntry {
    kind: String,
    container: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    init_track: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_track: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    frame_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channel_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sample_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sample_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bit_rate: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize)]
struct Document {
    tracks: Vec<TrackEntry>,
}

/// Outcome of checking one entry.
enum Entry {
    Track(Track),
    /// Well-formed but not something this player plays.
    Skipped,
}

impl TrackEntry {
    fn validate(self) -> CatalogResult<Entry> {
        if self.container != "mp4" || !matches!(self.kind.as_str(), "video" | "audio") {
            return Ok(Entry::Skipped);
        }
        let (Some(init_track), Some(data_track), Some(codec)) =
            (self.init_track, self.data_track, self.codec)
        else {
            return Err(CatalogError::Invalid);
        };
        let kind = if self.kind == "video" {
            let (Some(width), Some(height)) = (self.width, self.height) else {
                return Err(CatalogError::Invalid);
            };
            TrackKind::Video(VideoParams {
                width,
                height,
                frame_rate: self.frame_rate,
            })
        } else {
            let (Some(channel_count), Some(sample_rate), Some(sample_size)) =
                (self.channel_count, self.sample_rate, self.sample_size)
            else {
                return Err(CatalogError::Invalid);
            };
            TrackKind::Audio(AudioParams {
                channel_count,
                sample_rate,
                sample_size,
            })
        };
        Ok(Entry::Track(Track {
            container: self.container,
            init_track,
            data_track,
            codec,
            bit_rate: self.bit_rate,
            kind,
        }))
    }
}

impl From<&Track> for TrackEntry {
    fn from(t: &Track) -> Self {
        let mut entry = Self {
            container: t.container.clone(),
            init_track: Some(t.init_track.clone()),
            data_track: Some(t.data_track.clone()),
            codec: Some(t.codec.clone()),
            bit_rate: t.bit_rate,
            ..Self::default()
        };
        match &t.kind {
            TrackKind::Video(v) => {
                entry.kind = "video".into();
                entry.width = Some(v.width);
                entry.height = Some(v.height);
                entry.frame_rate = v.frame_rate;
            }
            TrackKind::Audio(a) => {
                entry.kind = "audio".into();
                entry.channel_count = Some(a.channel_count);
                entry.sample_rate = Some(a.sample_rate);
                entry.sample_size = Some(a.sample_size);
            }
        }
        entry
    }
}

/// Tracks available in a session. Fetched once, read-only afterwards.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Catalog {
    tracks: Vec<Track>,
}

impl Catalog {
    pub fn new(tracks: Vec<Track>) -> Self {
        Self { tracks }
    }

    /// Parse a catalog document. Any malformed entry rejects the whole
    /// catalog.
    pub fn decode(raw: &[u8]) -> CatalogResult<Self> {
        let doc: Document = serde_json::from_slice(raw).map_err(|e| {
            debug!(error = %e, "catalog json rejected");
            CatalogError::Invalid
        })?;

        let mut tracks = Vec::with_capacity(doc.tracks.len());
        for entry in doc.tracks {
            let (kind, container) = (entry.kind.clone(), entry.container.clone());
            match entry.validate()? {
                Entry::Track(track) => tracks.push(track),
                Entry::Skipped => warn!(%kind, %container, "skipping unsupported catalog entry"),
            }
        }
        Ok(Self { tracks })
    }

    pub fn encode(&self) -> CatalogResult<Vec<u8>> {
        let doc = Document {
            tracks: self.tracks.iter().map(TrackEntry::from).collect(),
        };
        serde_json::to_vec(&doc).map_err(|_| CatalogError::Invalid)
    }

    /// Subscribe to the catalog track of `namespace`, read the single
    /// catalog object and close the subscription.
    pub async fn fetch(subscriber: &Subscriber, namespace: &str) -> CatalogResult<Self> {
        let sub = subscriber.subscribe(namespace, CATALOG_TRACK, None).await?;
        debug!(namespace, id = sub.id(), "fetching catalog");

        let raw = read_object(&sub).await;

        if let Err(e) = sub.close().await {
            warn!(error = %e, "failed to close catalog subscription");
        }
        let catalog = Self::decode(&raw?)?;
        debug!(tracks = catalog.tracks.len(), "catalog fetched");
        Ok(catalog)
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(|t| t.is_video())
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(|t| t.is_audio())
    }

    pub fn by_data_track(&self, data_track: &str) -> Option<&Track> {
        self.tracks.iter().find(|t| t.data_track == data_track)
    }
}

async fn read_object(sub: &SubscribeSend) -> CatalogResult<Vec<u8>> {
    let mut object = sub.data().await?.ok_or(CatalogError::Empty)?;
    let (group, object_id) = (object.header.group, object.header.object);
    if group != 0 || object_id != 0 {
        return Err(CatalogError::Update {
            group,
            object: object_id,
        });
    }
    let mut raw = Vec::new();
    object
        .stream
        .read_to_end(&mut raw)
        .await
        .map_err(|e| CatalogError::Io(e.to_string()))?;
    Ok(raw)
}
