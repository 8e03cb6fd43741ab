use std::{collections::HashSet, path::Path, time::Duration};

use anyhow::Context;
use serde::Deserialize;

pub mod handler;
pub mod schedule;
pub mod sequencer;
pub mod speech;
pub mod tui_backend;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimelineError {
    #[error("a song needs at least one lyric segment")]
    Empty,
    #[error("segment `{id}` must last longer than 0ms")]
    ZeroDuration { id: String },
    #[error("segment id `{id}` is used more than once")]
    DuplicateId { id: String },
}

/// One timed lyric line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LyricSegment {
    pub id: String,
    pub text: String,
    #[serde(rename = "duration")]
    pub duration_ms: u32,
    /// Spoken and highlighted, but left out of the lyrics card.
    #[serde(default)]
    pub hidden: bool,
}

impl LyricSegment {
    pub fn new(id: impl Into<String>, text: impl Into<String>, duration_ms: u32) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            duration_ms,
            hidden: false,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms as u64)
    }
}

/// Ordered, validated segments plus their summed duration.
///
/// A `Timeline` can only be obtained through [`Timeline::new`], so every
/// instance is non-empty, has strictly positive durations and unique ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeline {
    segments: Vec<LyricSegment>,
    total_duration: Duration,
}

impl Timeline {
    pub fn new(segments: Vec<LyricSegment>) -> Result<Self, TimelineError> {
        if segments.is_empty() {
            return Err(TimelineError::Empty);
        }
        let mut seen = HashSet::new();
        for segment in &segments {
            if segment.duration_ms == 0 {
                return Err(TimelineError::ZeroDuration {
                    id: segment.id.clone(),
                });
            }
            if !seen.insert(segment.id.as_str()) {
                return Err(TimelineError::DuplicateId {
                    id: segment.id.clone(),
                });
            }
        }
        let total_duration = segments.iter().map(LyricSegment::duration).sum();
        Ok(Self {
            segments,
            total_duration,
        })
    }

    pub fn segments(&self) -> &[LyricSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn total_duration(&self) -> Duration {
        self.total_duration
    }

    pub fn get(&self, index: usize) -> Option<&LyricSegment> {
        self.segments.get(index)
    }

    /// Offset of every segment from the start of the run: the sum of all
    /// durations before it.
    pub fn offsets(&self) -> impl Iterator<Item = (usize, Duration)> + '_ {
        self.segments
            .iter()
            .scan(Duration::ZERO, |acc, segment| {
                let offset = *acc;
                *acc += segment.duration();
                Some(offset)
            })
            .enumerate()
    }
}

#[derive(Debug, Clone)]
pub struct Song {
    pub title: String,
    pub description: String,
    pub timeline: Timeline,
}

impl Song {
    /// The rhyme the peekaboo buddy knows by heart.
    pub fn johny_johny() -> Self {
        let segments = vec![
            LyricSegment::new("intro", "Peekaboo time! Let's sing together!", 2000).hidden(),
            LyricSegment::new("l1", "Johny, Johny", 1800),
            LyricSegment::new("l2", "Yes, Papa", 1800),
            LyricSegment::new("l3", "Eating sugar?", 2000),
            LyricSegment::new("l4", "No, Papa", 1800),
            LyricSegment::new("l5", "Telling lies?", 1900),
            LyricSegment::new("l6", "No, Papa", 1800),
            LyricSegment::new("l7", "Open your mouth", 2000),
            LyricSegment::new("l8", "Ha, ha, ha!", 2000),
        ];
        Self {
            title: "Johny Johny Yes Papa".to_owned(),
            description: "Watch our playful peekaboo buddy perform the classic nursery rhyme \
                          \u{201c}Johny Johny Yes Papa\u{201d} and sing along as the lyrics \
                          light up in rhythm."
                .to_owned(),
            timeline: Timeline::new(segments).expect("built-in song is valid"),
        }
    }

    pub fn from_file(file: SongFile) -> Result<Self, TimelineError> {
        let timeline = Timeline::new(file.segments)?;
        Ok(Self {
            description: file
                .description
                .unwrap_or_else(|| format!("Sing along to \u{201c}{}\u{201d}.", file.title)),
            title: file.title,
            timeline,
        })
    }

    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let str = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read song file {}", path.display()))?;
        let file = SongFile::parse(path, &str)?;
        tracing::info!(
            "Loaded song {:?} with {} segments",
            file.title,
            file.segments.len()
        );
        Song::from_file(file).map_err(anyhow::Error::from)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SongFile {
    pub title: String,
    pub description: Option<String>,
    pub segments: Vec<LyricSegment>,
}

impl SongFile {
    /// Songs are TOML unless the file name ends in `.json`.
    pub fn parse(path: &Path, str: &str) -> anyhow::Result<Self> {
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            serde_json::from_str(str).map_err(anyhow::Error::from)
        } else {
            toml::from_str(str).map_err(anyhow::Error::from)
        }
    }
}
