use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use crate::event::ControlEvent;

use super::{
    schedule::RuntimeClock,
    sequencer::{PlaybackSnapshot, Sequencer},
    Song,
};

pub type SyncTracker = Arc<Mutex<SingAlongTracker>>;

/// Everything the UI draws from, refreshed by the sequencer driver.
#[derive(Debug, Clone)]
pub struct SingAlongTracker {
    pub song: Song,
    pub playback: PlaybackSnapshot,
}

impl SingAlongTracker {
    pub fn new(song: Song) -> Self {
        Self {
            song,
            playback: PlaybackSnapshot::default(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.song
            .timeline
            .total_duration()
            .mul_f64(self.playback.progress_ratio.clamp(0.0, 1.0))
    }
}

pub fn lock(tracker: &SyncTracker) -> MutexGuard<'_, SingAlongTracker> {
    tracker.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait::async_trait]
pub trait SingAlongBackend {
    async fn run_backend(
        &mut self,
        tracker: SyncTracker,
        control_tx: flume::Sender<ControlEvent>,
    ) -> anyhow::Result<()>;
}

pub struct SingAlongHandler<T: SingAlongBackend> {
    tracker: SyncTracker,
    backend: T,
    sequencer: Sequencer<RuntimeClock>,
    clock: RuntimeClock,
}

impl<T: SingAlongBackend + Send + Sync + 'static> SingAlongHandler<T> {
    pub fn new(
        backend: T,
        song: Song,
        sequencer: Sequencer<RuntimeClock>,
        clock: RuntimeClock,
    ) -> Self {
        Self {
            tracker: Arc::new(Mutex::new(SingAlongTracker::new(song))),
            backend,
            sequencer,
            clock,
        }
    }

    pub async fn run(self, autoplay: bool) -> anyhow::Result<()> {
        let Self {
            tracker,
            mut backend,
            sequencer,
            clock,
        } = self;
        let (control_tx, control_rx) = flume::unbounded();
        if autoplay {
            control_tx.send(ControlEvent::Play)?;
        }

        let tracker_w = tracker.clone();
        let tracker_r = tracker;
        let driver = tokio::task::spawn(async move {
            run_sequencer(tracker_w, control_rx, sequencer, clock).await
        });
        let backend_handler =
            tokio::task::spawn(async move { backend.run_backend(tracker_r, control_tx).await });
        let (driver, backend) = tokio::join!(driver, backend_handler);
        driver??;
        backend??;
        Ok(())
    }
}

/// Owns the sequencer for the whole session. Sleeps until the next cue or
/// control event, whichever comes first. Ends on `Quit` or once every
/// sender is gone, stopping playback on the way out.
pub(crate) async fn run_sequencer(
    tracker: SyncTracker,
    control_rx: flume::Receiver<ControlEvent>,
    mut sequencer: Sequencer<RuntimeClock>,
    clock: RuntimeClock,
) -> anyhow::Result<()> {
    loop {
        publish(&tracker, &sequencer);
        let deadline = sequencer.next_deadline();
        tokio::select! {
            event = control_rx.recv_async() => match event {
                Ok(ControlEvent::Play) => sequencer.start(),
                Ok(ControlEvent::Pause) => sequencer.stop(),
                Ok(ControlEvent::Quit) | Err(_) => break,
            },
            _ = wait_until(&clock, deadline) => {
                sequencer.tick();
            }
        }
    }
    sequencer.stop();
    publish(&tracker, &sequencer);
    Ok(())
}

async fn wait_until(clock: &RuntimeClock, deadline: Option<Duration>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(clock.instant_at(at)).await,
        None => std::future::pending().await,
    }
}

fn publish(tracker: &SyncTracker, sequencer: &Sequencer<RuntimeClock>) {
    lock(tracker).playback = sequencer.snapshot();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::singalong::{
        speech::{
            testing::{RecordingSpeech, SpeechCall},
            Speech, VoiceHints,
        },
        LyricSegment, Timeline,
    };

    fn song() -> Song {
        Song {
            title: "Test".into(),
            description: String::new(),
            timeline: Timeline::new(vec![
                LyricSegment::new("a", "Line A", 1000),
                LyricSegment::new("b", "Line B", 500),
            ])
            .unwrap(),
        }
    }

    fn spawn_driver() -> (
        SyncTracker,
        flume::Sender<ControlEvent>,
        RecordingSpeech,
        tokio::task::JoinHandle<anyhow::Result<()>>,
    ) {
        let song = song();
        let clock = RuntimeClock::new();
        let speech = RecordingSpeech::default();
        let sequencer = Sequencer::new(
            song.timeline.clone(),
            clock,
            Speech::available(speech.clone()),
            VoiceHints::default(),
            Duration::from_millis(16),
        );
        let tracker = Arc::new(Mutex::new(SingAlongTracker::new(song)));
        let (control_tx, control_rx) = flume::unbounded();
        let driver = tokio::spawn(run_sequencer(
            tracker.clone(),
            control_rx,
            sequencer,
            clock,
        ));
        (tracker, control_tx, speech, driver)
    }

    #[tokio::test(start_paused = true)]
    async fn sings_through_the_song_and_stops() {
        let (tracker, control_tx, speech, driver) = spawn_driver();
        control_tx.send(ControlEvent::Play).unwrap();

        tokio::time::sleep(Duration::from_millis(1200)).await;
        {
            let tracker = lock(&tracker);
            assert!(tracker.playback.is_running);
            assert_eq!(tracker.playback.current_segment_id.as_deref(), Some("b"));
            assert!(tracker.playback.progress_ratio > 0.7);
            assert!(tracker.elapsed() > Duration::from_millis(1000));
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(lock(&tracker).playback, PlaybackSnapshot::default());
        assert_eq!(speech.spoken(), vec!["Line A", "Line B"]);

        control_tx.send(ControlEvent::Quit).unwrap();
        driver.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn pause_cancels_the_run() {
        let (tracker, control_tx, speech, driver) = spawn_driver();
        control_tx.send(ControlEvent::Play).unwrap();
        tokio::time::sleep(Duration::from_millis(700)).await;
        control_tx.send(ControlEvent::Pause).unwrap();

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(lock(&tracker).playback, PlaybackSnapshot::default());
        assert_eq!(speech.spoken(), vec!["Line A"]);

        drop(control_tx);
        driver.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn quitting_mid_song_silences_speech() {
        let (tracker, control_tx, speech, driver) = spawn_driver();
        control_tx.send(ControlEvent::Play).unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        control_tx.send(ControlEvent::Quit).unwrap();
        driver.await.unwrap().unwrap();

        assert!(!lock(&tracker).playback.is_running);
        assert_eq!(speech.last(), Some(SpeechCall::CancelAll));
    }
}
