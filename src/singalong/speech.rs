use std::{
    env,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    sync::OnceLock,
};

use regex::{Regex, RegexBuilder};

use crate::config::SpeechConfiguration;

/// How the buddy should sound. Mirrors the knobs of a browser utterance:
/// pitch, rate and volume are multipliers around 1.0.
#[derive(Debug, Clone)]
pub struct VoiceHints {
    pub lang: String,
    pub pitch: f32,
    pub rate: f32,
    pub volume: f32,
    pub voice_pattern: Option<Regex>,
}

impl VoiceHints {
    pub fn from_config(config: &SpeechConfiguration) -> anyhow::Result<Self> {
        let voice_pattern = match config.voice_pattern.as_deref() {
            Some(pattern) if !pattern.is_empty() => Some(
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| anyhow::anyhow!("Invalid voice pattern {pattern:?}: {e}"))?,
            ),
            _ => None,
        };
        Ok(Self {
            lang: config.lang.clone(),
            pitch: config.pitch,
            rate: config.rate,
            volume: config.volume,
            voice_pattern,
        })
    }

    fn primary_language(&self) -> String {
        primary_language(&self.lang)
    }
}

impl Default for VoiceHints {
    fn default() -> Self {
        Self::from_config(&SpeechConfiguration::default()).expect("default voice pattern compiles")
    }
}

/// Something that can read a line out loud.
pub trait SpeechSynth: Send {
    /// Starts speaking and returns immediately.
    fn speak(&mut self, text: &str, hints: &VoiceHints);
    /// Silences everything this synth has started.
    fn cancel_all(&mut self);
}

/// The host speech capability, resolved once at startup.
pub enum Speech {
    Available(Box<dyn SpeechSynth>),
    Unavailable,
}

impl std::fmt::Debug for Speech {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Speech::Available(_) => f.write_str("Speech::Available"),
            Speech::Unavailable => f.write_str("Speech::Unavailable"),
        }
    }
}

impl Speech {
    pub fn available(synth: impl SpeechSynth + 'static) -> Self {
        Speech::Available(Box::new(synth))
    }

    /// Looks for a speech program on this host.
    pub fn detect(config: &SpeechConfiguration, hints: &VoiceHints) -> Self {
        if !config.enabled {
            tracing::info!("Speech disabled, singing silently");
            return Speech::Unavailable;
        }
        match ProgramSpeech::detect(config.program.as_deref(), hints) {
            Some(program) => {
                tracing::info!(
                    "Using {} for speech (voice: {})",
                    program.program.display(),
                    program.voice.as_deref().unwrap_or("default")
                );
                Speech::available(program)
            }
            None => {
                tracing::warn!("No speech program found, singing silently");
                Speech::Unavailable
            }
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Speech::Available(_))
    }

    pub fn speak(&mut self, text: &str, hints: &VoiceHints) {
        if let Speech::Available(synth) = self {
            synth.speak(text, hints);
        }
    }

    pub fn cancel_all(&mut self) {
        if let Speech::Available(synth) = self {
            synth.cancel_all();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramKind {
    /// `espeak` and `espeak-ng` share their command line.
    Espeak,
    /// macOS `say`.
    Say,
}

impl ProgramKind {
    const CANDIDATES: [(&'static str, ProgramKind); 3] = [
        ("espeak-ng", ProgramKind::Espeak),
        ("espeak", ProgramKind::Espeak),
        ("say", ProgramKind::Say),
    ];

    fn of(program: &Path) -> Self {
        match program.file_stem().and_then(|it| it.to_str()) {
            Some("say") => ProgramKind::Say,
            _ => ProgramKind::Espeak,
        }
    }

    fn list_voices_args(self) -> &'static [&'static str] {
        match self {
            ProgramKind::Espeak => &["--voices"],
            ProgramKind::Say => &["-v", "?"],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    pub name: String,
    pub lang: String,
}

/// Speaks by spawning an external text-to-speech program per line.
#[derive(Debug)]
pub struct ProgramSpeech {
    program: PathBuf,
    kind: ProgramKind,
    voice: Option<String>,
    current: Option<Child>,
}

impl ProgramSpeech {
    pub fn new(program: PathBuf, kind: ProgramKind, voice: Option<String>) -> Self {
        Self {
            program,
            kind,
            voice,
            current: None,
        }
    }

    fn detect(preferred: Option<&str>, hints: &VoiceHints) -> Option<Self> {
        let (program, kind) = match preferred {
            Some(name) => {
                let program = find_program(name)?;
                let kind = ProgramKind::of(&program);
                (program, kind)
            }
            None => ProgramKind::CANDIDATES
                .iter()
                .find_map(|(name, kind)| find_program(name).map(|it| (it, *kind)))?,
        };
        let voices = list_voices(&program, kind);
        let voice = select_voice(&voices, hints).map(|it| it.name.clone());
        Some(Self::new(program, kind, voice))
    }

    fn command_args(&self, text: &str, hints: &VoiceHints) -> Vec<String> {
        let mut args = Vec::new();
        match self.kind {
            ProgramKind::Espeak => {
                let voice = self
                    .voice
                    .clone()
                    .unwrap_or_else(|| hints.lang.to_ascii_lowercase());
                args.extend(["-v".to_owned(), voice]);
                args.extend([
                    "-p".to_owned(),
                    ((50.0 * hints.pitch).round().clamp(0.0, 99.0) as u32).to_string(),
                ]);
                args.extend([
                    "-s".to_owned(),
                    ((175.0 * hints.rate).round().clamp(80.0, 450.0) as u32).to_string(),
                ]);
                args.extend([
                    "-a".to_owned(),
                    ((100.0 * hints.volume).round().clamp(0.0, 200.0) as u32).to_string(),
                ]);
            }
            ProgramKind::Say => {
                if let Some(voice) = &self.voice {
                    args.extend(["-v".to_owned(), voice.clone()]);
                }
                args.extend([
                    "-r".to_owned(),
                    ((175.0 * hints.rate).round().max(1.0) as u32).to_string(),
                ]);
            }
        }
        args.push(text.to_owned());
        args
    }

    fn reap(&mut self) {
        if let Some(mut child) = self.current.take() {
            match child.try_wait() {
                Ok(Some(_)) => {}
                _ => {
                    let _ = child.kill();
                    let _ = child.wait();
                }
            }
        }
    }
}

impl SpeechSynth for ProgramSpeech {
    fn speak(&mut self, text: &str, hints: &VoiceHints) {
        // Only one utterance may be audible at a time.
        self.reap();
        let spawned = Command::new(&self.program)
            .args(self.command_args(text, hints))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        match spawned {
            Ok(child) => self.current = Some(child),
            Err(e) => tracing::warn!("Failed to spawn {}: {}", self.program.display(), e),
        }
    }

    fn cancel_all(&mut self) {
        self.reap();
    }
}

impl Drop for ProgramSpeech {
    fn drop(&mut self) {
        self.reap();
    }
}

fn find_program(name: &str) -> Option<PathBuf> {
    let as_path = Path::new(name);
    if as_path.components().count() > 1 {
        return as_path.is_file().then(|| as_path.to_path_buf());
    }
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

fn list_voices(program: &Path, kind: ProgramKind) -> Vec<Voice> {
    match Command::new(program)
        .args(kind.list_voices_args())
        .stdin(Stdio::null())
        .output()
    {
        Ok(output) => parse_voices(kind, &String::from_utf8_lossy(&output.stdout)),
        Err(e) => {
            tracing::debug!("Could not list voices of {}: {}", program.display(), e);
            Vec::new()
        }
    }
}

static SAY_VOICE_LINE: OnceLock<Regex> = OnceLock::new();

/// Parses `espeak --voices` or `say -v ?` output.
pub fn parse_voices(kind: ProgramKind, listing: &str) -> Vec<Voice> {
    match kind {
        ProgramKind::Espeak => listing
            .lines()
            .skip(1)
            .filter_map(|line| {
                let mut columns = line.split_whitespace();
                let lang = columns.nth(1)?;
                let name = columns.nth(1)?;
                Some(Voice {
                    name: name.to_owned(),
                    lang: lang.to_owned(),
                })
            })
            .collect(),
        ProgramKind::Say => {
            let line_regex = SAY_VOICE_LINE.get_or_init(|| {
                Regex::new(r"^(?P<name>.+?)\s+(?P<lang>[a-z]{2,3}[_-][A-Za-z0-9]{2,4})\s")
                    .expect("voice line regex compiles")
            });
            listing
                .lines()
                .filter_map(|line| line_regex.captures(line))
                .map(|caps| Voice {
                    name: caps["name"].trim().to_owned(),
                    lang: caps["lang"].to_owned(),
                })
                .collect()
        }
    }
}

/// Picks a voice matching the hint pattern, preferring the exact hinted tag,
/// then its primary language, then any voice. Without a pattern match the
/// exact tag wins over the primary language.
pub fn select_voice<'a>(voices: &'a [Voice], hints: &VoiceHints) -> Option<&'a Voice> {
    let tag = normalize_tag(&hints.lang);
    let language = hints.primary_language();
    let same_tag = |voice: &&Voice| normalize_tag(&voice.lang) == tag;
    let same_language = |voice: &&Voice| primary_language(&voice.lang) == language;
    let matches_pattern = |voice: &&Voice| {
        hints
            .voice_pattern
            .as_ref()
            .map(|pattern| pattern.is_match(&voice.name))
            .unwrap_or(false)
    };
    voices
        .iter()
        .filter(same_tag)
        .find(matches_pattern)
        .or_else(|| voices.iter().filter(same_language).find(matches_pattern))
        .or_else(|| voices.iter().find(matches_pattern))
        .or_else(|| voices.iter().find(same_tag))
        .or_else(|| voices.iter().find(same_language))
}

fn normalize_tag(tag: &str) -> String {
    tag.replace('_', "-").to_ascii_lowercase()
}

fn primary_language(tag: &str) -> String {
    tag.split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use super::{SpeechSynth, VoiceHints};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum SpeechCall {
        Speak(String),
        CancelAll,
    }

    /// Remembers every call so tests can assert on what would have been heard.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingSpeech {
        pub calls: Arc<Mutex<Vec<SpeechCall>>>,
    }

    impl RecordingSpeech {
        pub fn spoken(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter_map(|call| match call {
                    SpeechCall::Speak(text) => Some(text.clone()),
                    SpeechCall::CancelAll => None,
                })
                .collect()
        }

        pub fn last(&self) -> Option<SpeechCall> {
            self.calls.lock().unwrap().last().cloned()
        }
    }

    impl SpeechSynth for RecordingSpeech {
        fn speak(&mut self, text: &str, _hints: &VoiceHints) {
            self.calls
                .lock()
                .unwrap()
                .push(SpeechCall::Speak(text.to_owned()));
        }

        fn cancel_all(&mut self) {
            self.calls.lock().unwrap().push(SpeechCall::CancelAll);
        }
    }
}
