//! Turns a [`Timeline`] into a run: segment switches, speech and a progress
//! ratio, all driven by timers on one queue.
//!
//! The sequencer never waits. Whoever owns it asks for
//! [`Sequencer::next_deadline`], waits however it likes, then calls
//! [`Sequencer::tick`] to fire everything that is due.

use std::{collections::HashSet, time::Duration};

use super::{
    schedule::{Clock, TimerHandle, TimerQueue},
    speech::{Speech, VoiceHints},
    Timeline,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cue {
    /// Segment at this index becomes current.
    Segment(usize),
    /// Trailing timer after the last segment.
    EndOfSong,
    /// One iteration of the progress sampling loop.
    ProgressFrame,
}

/// What the presentation layer may read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackSnapshot {
    pub is_running: bool,
    pub current_segment: Option<usize>,
    pub current_segment_id: Option<String>,
    pub progress_ratio: f64,
}

#[derive(Debug, Default)]
struct PlaybackState {
    is_running: bool,
    current_segment: Option<usize>,
    progress_ratio: f64,
    pending_timers: HashSet<TimerHandle>,
    sampling_handle: Option<TimerHandle>,
    run_start: Option<Duration>,
}

pub struct Sequencer<C: Clock> {
    timeline: Timeline,
    clock: C,
    timers: TimerQueue<Cue>,
    frame_interval: Duration,
    speech: Speech,
    hints: VoiceHints,
    state: PlaybackState,
}

impl<C: Clock> Sequencer<C> {
    /// `frame_interval` is how often the progress ratio is resampled and
    /// must be non-zero.
    pub fn new(
        timeline: Timeline,
        clock: C,
        speech: Speech,
        hints: VoiceHints,
        frame_interval: Duration,
    ) -> Self {
        Self {
            timeline,
            clock,
            timers: TimerQueue::new(),
            frame_interval: frame_interval.max(Duration::from_millis(1)),
            speech,
            hints,
            state: PlaybackState::default(),
        }
    }

    /// Starts singing from the first segment, tearing down any run in
    /// progress first.
    pub fn start(&mut self) {
        self.stop();

        let now = self.clock.now();
        self.state.is_running = true;
        self.state.run_start = Some(now);
        tracing::info!(
            "Starting run: {} segments over {:?}",
            self.timeline.len(),
            self.timeline.total_duration()
        );

        self.enter_segment(0);
        for (index, offset) in self.timeline.offsets().skip(1) {
            let handle = self.timers.schedule_at(now + offset, Cue::Segment(index));
            self.state.pending_timers.insert(handle);
        }
        self.arm_progress_frame(now);
    }

    /// Cancels every pending timer and any speech, and returns to idle.
    /// Calling it while idle changes nothing.
    pub fn stop(&mut self) {
        for handle in self.state.pending_timers.drain() {
            self.timers.cancel(handle);
        }
        if let Some(handle) = self.state.sampling_handle.take() {
            self.timers.cancel(handle);
        }
        self.speech.cancel_all();

        if self.state.is_running || self.state.current_segment.is_some() {
            tracing::info!("Stopping run");
        }
        self.state = PlaybackState::default();
    }

    /// Fires every cue that is due by now. Returns how many fired.
    pub fn tick(&mut self) -> usize {
        let mut fired = 0;
        while let Some((handle, cue)) = self.timers.pop_due(self.clock.now()) {
            fired += 1;
            self.fire(handle, cue);
        }
        fired
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers.next_deadline()
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running
    }

    pub fn current_segment_id(&self) -> Option<&str> {
        self.state
            .current_segment
            .and_then(|index| self.timeline.get(index))
            .map(|segment| segment.id.as_str())
    }

    pub fn progress_ratio(&self) -> f64 {
        self.state.progress_ratio
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            is_running: self.is_running(),
            current_segment: self.state.current_segment,
            current_segment_id: self.current_segment_id().map(str::to_owned),
            progress_ratio: self.progress_ratio(),
        }
    }

    fn fire(&mut self, handle: TimerHandle, cue: Cue) {
        match cue {
            Cue::ProgressFrame => {
                if self.state.sampling_handle != Some(handle) {
                    return;
                }
                self.state.sampling_handle = None;
                self.sample_progress();
            }
            Cue::Segment(index) => {
                if self.state.pending_timers.remove(&handle) {
                    self.enter_segment(index);
                }
            }
            Cue::EndOfSong => {
                if self.state.pending_timers.remove(&handle) {
                    tracing::info!("Reached the end of the song");
                    self.stop();
                }
            }
        }
    }

    fn enter_segment(&mut self, index: usize) {
        let Some(segment) = self.timeline.get(index) else {
            return;
        };
        tracing::debug!("Segment {} ({:?}) is now current", segment.id, segment.text);
        self.state.current_segment = Some(index);
        self.speech.cancel_all();
        self.speech.speak(&segment.text, &self.hints);

        if index + 1 == self.timeline.len() {
            if let Some(run_start) = self.state.run_start {
                let end = run_start + self.timeline.total_duration();
                let handle = self.timers.schedule_at(end, Cue::EndOfSong);
                self.state.pending_timers.insert(handle);
            }
        }
    }

    fn sample_progress(&mut self) {
        let Some(run_start) = self.state.run_start else {
            return;
        };
        let now = self.clock.now();
        let elapsed = now.saturating_sub(run_start);
        let ratio =
            (elapsed.as_secs_f64() / self.timeline.total_duration().as_secs_f64()).min(1.0);
        self.state.progress_ratio = ratio;

        if ratio >= 1.0 {
            tracing::debug!("Progress reached the end of the song");
            self.state.is_running = false;
        } else if self.state.is_running {
            self.arm_progress_frame(now);
        }
    }

    fn arm_progress_frame(&mut self, now: Duration) {
        let handle = self
            .timers
            .schedule_at(now + self.frame_interval, Cue::ProgressFrame);
        self.state.sampling_handle = Some(handle);
    }

    #[cfg(test)]
    fn pending_timer_count(&self) -> usize {
        self.state.pending_timers.len()
    }

    #[cfg(test)]
    fn scheduled_count(&self) -> usize {
        self.timers.len()
    }
}

impl<C: Clock> Drop for Sequencer<C> {
    fn drop(&mut self) {
        self.stop();
    }
}
