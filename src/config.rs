use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use home::home_dir;
use ratatui::{style::Color, widgets::BorderType};
use serde::{
    de::{DeserializeOwned, Visitor},
    Deserialize,
};

#[derive(Debug, Clone, Default)]
pub struct PeekabooConfig {
    pub playback: PlaybackConfiguration,
    pub speech: SpeechConfiguration,
    pub theme: ThemeConfiguration,
    /// Song file to sing instead of the built-in rhyme.
    pub song: Option<PathBuf>,
}

impl PeekabooConfig {
    pub fn default_dir() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".config").join("peekaboo"))
    }

    /// Reads `path`, or the default config file if there is one. A missing
    /// default file is not an error.
    pub async fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_dir().map(|dir| dir.join("config.toml")) {
                Some(path) if path.is_file() => path,
                _ => {
                    tracing::debug!("No config file, using defaults");
                    return Ok(Self::default());
                }
            },
        };
        let str = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        tracing::info!("Loaded config from {}", path.display());
        Self::read_from_str(&str, &config_dir)
            .await
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Parses a config, resolving `include` links and the song path against
    /// `config_dir`.
    pub async fn read_from_str(str: &str, config_dir: &Path) -> anyhow::Result<Self> {
        let unresolved = toml::from_str::<PeekabooConfigUnresolved>(str)?;
        let playback = unresolved.playback.resolve(config_dir).await?;
        let speech = unresolved.speech.resolve(config_dir).await?;
        let theme = unresolved.theme.resolve(config_dir).await?;
        if playback.frame_interval_ms == 0 {
            bail!("playback.frame_interval_ms must be greater than 0");
        }
        Ok(Self {
            playback,
            speech,
            theme,
            song: unresolved.song.map(|song| config_dir.join(song)),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfiguration {
    /// How often the progress bar is resampled while singing.
    pub frame_interval_ms: u64,
    pub autoplay: bool,
}

impl Default for PlaybackConfiguration {
    fn default() -> Self {
        Self {
            frame_interval_ms: 16,
            autoplay: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfiguration {
    pub enabled: bool,
    /// Speech program to use. Detected on `PATH` when unset.
    pub program: Option<String>,
    pub lang: String,
    pub pitch: f32,
    pub rate: f32,
    pub volume: f32,
    pub voice_pattern: Option<String>,
}

impl Default for SpeechConfiguration {
    fn default() -> Self {
        Self {
            enabled: true,
            program: None,
            lang: "en-US".to_owned(),
            pitch: 1.45,
            rate: 0.92,
            volume: 0.95,
            voice_pattern: Some("child|girl|boy".to_owned()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThemeConfiguration {
    pub active_text_color: ThemeColor,
    pub inactive_text_color: ThemeColor,
    pub progress_color: ThemeColor,
    pub border_color: ThemeColor,
    pub border_style: BorderStyle,
}

impl Default for ThemeConfiguration {
    fn default() -> Self {
        Self {
            active_text_color: ThemeColor(Color::LightMagenta),
            inactive_text_color: ThemeColor(Color::Gray),
            progress_color: ThemeColor(Color::LightYellow),
            border_color: ThemeColor(Color::DarkGray),
            border_style: BorderStyle(BorderType::Rounded),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct ThemeColor(pub Color);

impl<'de> Deserialize<'de> for ThemeColor {
    fn deserialize<D>(de: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        de.deserialize_str(ColorVisitor)
    }
}

struct ColorVisitor;

impl<'v> Visitor<'v> for ColorVisitor {
    type Value = ThemeColor;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(formatter, "a color name or a #rrggbb hex string")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        if let Some(stripped) = v.strip_prefix('#') {
            let color_rgb = u32::from_str_radix(stripped, 16).map_err(|e| {
                serde::de::Error::custom(format!("Invalid hex string for color {e}"))
            })?;
            let r = (color_rgb & 0xFF0000) >> 16;
            let g = (color_rgb & 0x00FF00) >> 8;
            let b = color_rgb & 0x0000FF;
            Ok(ThemeColor(Color::Rgb(r as u8, g as u8, b as u8)))
        } else {
            v.parse::<Color>()
                .map_err(|e| serde::de::Error::custom(format!("Invalid named color format {e}")))
                .map(ThemeColor)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct BorderStyle(pub BorderType);

impl<'de> Deserialize<'de> for BorderStyle {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(BorderVisitor).map(BorderStyle)
    }
}

struct BorderVisitor;

impl<'v> Visitor<'v> for BorderVisitor {
    type Value = BorderType;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(formatter, "a string representing a border style")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        v.parse::<BorderType>()
            .map_err(|e| serde::de::Error::custom(format!("Invalid border style: {e}")))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PeekabooConfigUnresolved {
    #[serde(default)]
    playback: MaybeLink<PlaybackConfiguration>,
    #[serde(default)]
    speech: MaybeLink<SpeechConfiguration>,
    #[serde(default)]
    theme: MaybeLink<ThemeConfiguration>,
    song: Option<PathBuf>,
}

/// A config section written inline or kept in its own file.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MaybeLink<V> {
    Link { include: PathBuf },
    Explicit(V),
}

impl<V: Default> Default for MaybeLink<V> {
    fn default() -> Self {
        MaybeLink::Explicit(V::default())
    }
}

impl<V: DeserializeOwned> MaybeLink<V> {
    async fn resolve(self, config_dir: &Path) -> anyhow::Result<V> {
        match self {
            MaybeLink::Explicit(value) => Ok(value),
            MaybeLink::Link { include } => {
                let path = config_dir.join(include);
                let str = tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("failed to read included {}", path.display()))?;
                toml::from_str(&str).map_err(anyhow::Error::from)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_config_uses_defaults() {
        let config = PeekabooConfig::read_from_str("", Path::new("."))
            .await
            .unwrap();
        assert_eq!(config.playback.frame_interval_ms, 16);
        assert!(config.speech.enabled);
        assert_eq!(config.speech.lang, "en-US");
        assert!(config.song.is_none());
    }

    #[tokio::test]
    async fn reads_inline_sections() {
        let config = PeekabooConfig::read_from_str(
            r##"
            song = "songs/twinkle.toml"

            [playback]
            frame_interval_ms = 33
            autoplay = true

            [speech]
            enabled = false
            pitch = 1.2

            [theme]
            active_text_color = "#ff9fae"
            border_style = "Double"
            "##,
            Path::new("/etc/peekaboo"),
        )
        .await
        .unwrap();
        assert_eq!(config.playback.frame_interval_ms, 33);
        assert!(config.playback.autoplay);
        assert!(!config.speech.enabled);
        assert_eq!(config.speech.pitch, 1.2);
        assert_eq!(config.speech.rate, 0.92);
        assert_eq!(config.theme.active_text_color, ThemeColor(Color::Rgb(0xff, 0x9f, 0xae)));
        assert_eq!(config.theme.border_style, BorderStyle(BorderType::Double));
        assert_eq!(
            config.song,
            Some(PathBuf::from("/etc/peekaboo/songs/twinkle.toml"))
        );
    }

    #[tokio::test]
    async fn resolves_included_sections() {
        let dir = std::env::temp_dir().join(format!("peekaboo-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("theme.toml"), "progress_color = \"LightBlue\"\n").unwrap();

        let config =
            PeekabooConfig::read_from_str("theme = { include = \"theme.toml\" }\n", &dir)
                .await
                .unwrap();
        assert_eq!(config.theme.progress_color, ThemeColor(Color::LightBlue));
        assert_eq!(
            config.theme.active_text_color,
            ThemeConfiguration::default().active_text_color
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn example_config_parses() {
        let config =
            PeekabooConfig::read_from_str(include_str!("../config.example.toml"), Path::new("."))
                .await
                .unwrap();
        assert_eq!(config.speech.voice_pattern.as_deref(), Some("child|girl|boy"));
        assert_eq!(config.theme.border_style, BorderStyle(BorderType::Rounded));
    }

    #[tokio::test]
    async fn rejects_zero_frame_interval() {
        let err = PeekabooConfig::read_from_str(
            "[playback]\nframe_interval_ms = 0\n",
            Path::new("."),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("frame_interval_ms"));
    }

    #[tokio::test]
    async fn rejects_bad_colors() {
        let err = PeekabooConfig::read_from_str(
            "[theme]\nborder_color = \"#zzzzzz\"\n",
            Path::new("."),
        )
        .await;
        assert!(err.is_err());
    }
}
