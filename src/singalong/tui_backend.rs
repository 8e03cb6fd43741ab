use std::{io::Stdout, time::Duration};

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Gauge, Paragraph, Wrap},
    Frame, Terminal,
};

use crate::{config::ThemeConfiguration, event::ControlEvent};

use super::handler::{lock, SingAlongBackend, SingAlongTracker, SyncTracker};

type Term = Terminal<CrosstermBackend<Stdout>>;

#[derive(Debug, Clone)]
pub struct TerminalUiBackend {
    theme: ThemeConfiguration,
    poll_interval: Duration,
}

#[async_trait::async_trait]
impl SingAlongBackend for TerminalUiBackend {
    async fn run_backend(
        &mut self,
        tracker: SyncTracker,
        control_tx: flume::Sender<ControlEvent>,
    ) -> anyhow::Result<()> {
        let mut terminal = setup_terminal()?;

        let result = self.tui_loop(&tracker, &control_tx, &mut terminal).await;

        restore_terminal(&mut terminal)?;
        result
    }
}

impl TerminalUiBackend {
    /// Redraws roughly every `frame_interval`, but never faster than a
    /// terminal can keep up with.
    pub fn new(theme: ThemeConfiguration, frame_interval: Duration) -> Self {
        Self {
            theme,
            poll_interval: frame_interval.max(Duration::from_millis(16)),
        }
    }

    async fn tui_loop(
        &self,
        tracker: &SyncTracker,
        control_tx: &flume::Sender<ControlEvent>,
        terminal: &mut Term,
    ) -> anyhow::Result<()> {
        loop {
            terminal.draw(|frame| handle_ui(&lock(tracker), &self.theme, frame))?;
            if event::poll(self.poll_interval)? {
                if let Event::Key(key) = event::read()? {
                    let is_running = lock(tracker).playback.is_running;
                    if let Some(control) = control_for(key, is_running) {
                        control_tx.send(control)?;
                        if control == ControlEvent::Quit {
                            break;
                        }
                    }
                }
            }
            tokio::task::yield_now().await;
        }
        Ok(())
    }
}

/// Play is only offered while idle and pause only while singing.
fn control_for(key: KeyEvent, is_running: bool) -> Option<ControlEvent> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => Some(ControlEvent::Quit),
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(ControlEvent::Quit)
        }
        KeyCode::Char('p') | KeyCode::Enter if !is_running => Some(ControlEvent::Play),
        KeyCode::Char(' ') | KeyCode::Char('s') if is_running => Some(ControlEvent::Pause),
        _ => None,
    }
}

fn handle_ui(
    tracker: &SingAlongTracker,
    theme: &ThemeConfiguration,
    f: &mut Frame<CrosstermBackend<Stdout>>,
) {
    let size = f.size();
    let border_style = Style::default().fg(theme.border_color.0);

    // Layouts
    let vertical_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(4),
                Constraint::Min(8),
                Constraint::Length(3),
                Constraint::Length(3),
            ]
            .as_ref(),
        )
        .split(size);

    let horizontal_layout = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)].as_ref())
        .split(vertical_layout[1]);

    // Title
    let title_block = Block::default()
        .borders(Borders::ALL)
        .border_type(theme.border_style.0)
        .border_style(border_style)
        .title(Span::styled(
            "Peekaboo Sing-Along",
            Style::default()
                .fg(theme.active_text_color.0)
                .add_modifier(Modifier::BOLD),
        ));
    let title_part = Paragraph::new(tracker.song.description.as_str())
        .style(Style::default().fg(theme.inactive_text_color.0))
        .wrap(Wrap { trim: true })
        .block(title_block);
    f.render_widget(title_part, vertical_layout[0]);

    // Lyrics
    let (lines, highlighted) = lyric_lines(tracker, theme);
    let lyrics_block = Block::default()
        .borders(Borders::ALL)
        .border_type(theme.border_style.0)
        .border_style(border_style)
        .title(Line::from(tracker.song.title.as_str()))
        .title_alignment(Alignment::Left);
    let lyrics_part = Paragraph::new(lines)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: false })
        .scroll((highlighted.unwrap_or(0).saturating_sub(4) as u16, 0))
        .block(lyrics_block);
    f.render_widget(lyrics_part, horizontal_layout[0]);

    // Stage
    let singing = tracker.playback.current_segment.is_some();
    let stage_block = Block::default()
        .borders(Borders::ALL)
        .border_type(theme.border_style.0)
        .border_style(border_style)
        .title("Stage")
        .title_alignment(Alignment::Right);
    let stage_part = Paragraph::new(
        buddy(singing)
            .into_iter()
            .map(Line::from)
            .collect::<Vec<_>>(),
    )
    .style(Style::default().fg(theme.active_text_color.0))
    .alignment(Alignment::Center)
    .block(stage_block);
    f.render_widget(stage_part, horizontal_layout[1]);

    // Controls
    let is_running = tracker.playback.is_running;
    let enabled = Style::default()
        .fg(theme.active_text_color.0)
        .add_modifier(Modifier::BOLD);
    let disabled = Style::default()
        .fg(theme.inactive_text_color.0)
        .add_modifier(Modifier::DIM);
    let play_label = if is_running {
        "[ Singing... ]"
    } else {
        "[ Play Performance (p) ]"
    };
    let controls = Line::from(vec![
        Span::styled(play_label, if is_running { disabled } else { enabled }),
        Span::raw("   "),
        Span::styled("[ Pause (space) ]", if is_running { enabled } else { disabled }),
        Span::raw("   "),
        Span::styled("[ Quit (q) ]", Style::default().fg(theme.inactive_text_color.0)),
    ]);
    let controls_part = Paragraph::new(controls).alignment(Alignment::Center).block(
        Block::default()
            .borders(Borders::ALL)
            .border_type(theme.border_style.0)
            .border_style(border_style),
    );
    f.render_widget(controls_part, vertical_layout[2]);

    // Performance progress
    let label = format!(
        "Performance Progress \u{b7} {}% \u{b7} {} / {}",
        progress_percent(tracker.playback.progress_ratio),
        fmt_duration(tracker.elapsed().as_millis() as u32),
        fmt_duration(tracker.song.timeline.total_duration().as_millis() as u32)
    );
    let track_progress = Gauge::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(theme.border_style.0)
                .border_style(border_style),
        )
        .gauge_style(Style::default().fg(theme.progress_color.0))
        .ratio(tracker.playback.progress_ratio.clamp(0.0, 1.0))
        .label(label);
    f.render_widget(track_progress, vertical_layout[3])
}

/// Visible lyric lines, and the position of the highlighted one among them.
fn lyric_lines<'a>(
    tracker: &'a SingAlongTracker,
    theme: &ThemeConfiguration,
) -> (Vec<Line<'a>>, Option<usize>) {
    let current = tracker.playback.current_segment_id.as_deref();
    let mut highlighted = None;
    let lines = tracker
        .song
        .timeline
        .segments()
        .iter()
        .filter(|segment| !segment.hidden)
        .enumerate()
        .map(|(idx, segment)| {
            if Some(segment.id.as_str()) == current {
                highlighted = Some(idx);
                Line::from(Span::styled(
                    segment.text.as_str(),
                    Style::default()
                        .fg(theme.active_text_color.0)
                        .add_modifier(Modifier::BOLD),
                ))
            } else {
                Line::from(Span::styled(
                    segment.text.as_str(),
                    Style::default().fg(theme.inactive_text_color.0),
                ))
            }
        })
        .collect::<Vec<_>>();
    (lines, highlighted)
}

fn buddy(singing: bool) -> Vec<&'static str> {
    let (notes, mouth) = if singing {
        ("\u{266a}    \u{266b}    \u{2669}", "|    ( O )    |")
    } else {
        ("               ", "|    \\___/    |")
    };
    vec![
        notes,
        "  .-\"\"\"\"\"\"\"-.  ",
        " /   o   o   \\ ",
        mouth,
        " \\           / ",
        "  '-._____.-'  ",
        " _/|       |\\_ ",
        "   |_______|   ",
        "    (_)  (_)   ",
    ]
}

fn progress_percent(ratio: f64) -> u16 {
    (ratio.clamp(0.0, 1.0) * 100.0).round() as u16
}

fn fmt_duration(duration_ms: u32) -> String {
    let mut seconds = duration_ms / 1000;
    let minutes = seconds / 60;
    seconds %= 60;
    format!("{minutes:0>2}:{seconds:0>2}")
}

fn setup_terminal() -> anyhow::Result<Term> {
    let mut stdout = std::io::stdout();
    enable_raw_mode()?;
    crossterm::execute!(stdout, EnterAlternateScreen,)?;
    Ok(Terminal::new(CrosstermBackend::new(stdout))?)
}

fn restore_terminal(terminal: &mut Term) -> anyhow::Result<()> {
    disable_raw_mode()?;
    crossterm::execute!(terminal.backend_mut(), LeaveAlternateScreen,)?;
    terminal.show_cursor().map_err(anyhow::Error::from)
}
