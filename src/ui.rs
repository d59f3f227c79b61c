use crate::engine::{Phase, PlaybackEngine, PlaybackState};
use crate::error::PlaybackError;
use crate::metadata::NowPlaying;
use crate::player::AudioBackend;
use crate::station::{StationCatalog, StationId};
use crate::ticker::PriceSnapshot;
use anyhow::Result;
use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use rand::Rng;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph},
    Frame, Terminal,
};
use std::io::stdout;
use std::time::{Duration, Instant};
use tokio::sync::watch;

const PROGRAMS: [&str; 5] = [
    "10:00 - Crypto Talk with Kotarominami",
    "12:00 - Web3 News Update",
    "14:00 - NFT Market Analysis",
    "16:00 - DeFi Deep Dive",
    "18:00 - Blockchain Technology Hour",
];

const TOAST_TTL: Duration = Duration::from_secs(4);
const MARQUEE_STEP: Duration = Duration::from_millis(250);
const FRAME: Duration = Duration::from_millis(200);

/// What a key press asks the player to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intent {
    TogglePlay,
    Select(StationId),
    NextStation,
    PreviousStation,
    VolumeBy(i32),
    ToggleMute,
    Quit,
}

pub fn intent_for_key(code: KeyCode) -> Option<Intent> {
    match code {
        KeyCode::Char('q') | KeyCode::Esc => Some(Intent::Quit),
        KeyCode::Char(' ') => Some(Intent::TogglePlay),
        KeyCode::Char(c @ '1'..='9') => {
            StationId::from_number(c as usize - '0' as usize).map(Intent::Select)
        }
        KeyCode::Right | KeyCode::Tab => Some(Intent::NextStation),
        KeyCode::Left | KeyCode::BackTab => Some(Intent::PreviousStation),
        KeyCode::Char('+') | KeyCode::Char('=') => Some(Intent::VolumeBy(10)),
        KeyCode::Char('-') => Some(Intent::VolumeBy(-10)),
        KeyCode::Up => Some(Intent::VolumeBy(5)),
        KeyCode::Down => Some(Intent::VolumeBy(-5)),
        KeyCode::Char('m') => Some(Intent::ToggleMute),
        _ => None,
    }
}

/// Intents that abandon a connection still in progress.
fn interrupts_connect(intent: Intent) -> bool {
    matches!(
        intent,
        Intent::Quit
            | Intent::TogglePlay
            | Intent::Select(_)
            | Intent::NextStation
            | Intent::PreviousStation
    )
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Toast {
    pub title: String,
    pub body: String,
    pub is_error: bool,
    shown_at: Instant,
}

impl Toast {
    fn info(title: &str, body: String) -> Self {
        Self {
            title: title.to_string(),
            body,
            is_error: false,
            shown_at: Instant::now(),
        }
    }

    fn error(title: &str, body: String) -> Self {
        Self {
            is_error: true,
            ..Self::info(title, body)
        }
    }

    fn expired(&self) -> bool {
        self.shown_at.elapsed() > TOAST_TTL
    }
}

/// Renders the outcome of a `play()` intent for the user.
pub fn play_toast(station: StationId, result: &Result<(), PlaybackError>) -> Option<Toast> {
    match result {
        Ok(()) => Some(Toast::info(
            "Radio playing",
            format!("Now playing {}", station.display_name()),
        )),
        Err(PlaybackError::InvalidTransition { .. }) => None,
        Err(_) => Some(Toast::error(
            "Playback error",
            "There was an error playing this station. Please try again.".to_string(),
        )),
    }
}

pub struct UIState {
    wave_phase: f32,
    last_volume_change: Instant,
    saved_volume: Option<u8>,
    connecting: bool,
    toast: Option<Toast>,
    marquee_offset: usize,
    last_marquee_step: Instant,
}

impl UIState {
    fn new() -> Self {
        Self {
            wave_phase: 0.0,
            last_volume_change: Instant::now()
                .checked_sub(Duration::from_secs(60))
                .unwrap_or_else(Instant::now),
            saved_volume: None,
            connecting: false,
            toast: None,
            marquee_offset: 0,
            last_marquee_step: Instant::now(),
        }
    }

    fn tick(&mut self) {
        if self.last_marquee_step.elapsed() >= MARQUEE_STEP {
            self.marquee_offset = self.marquee_offset.wrapping_add(1);
            self.last_marquee_step = Instant::now();
        }
        if self.toast.as_ref().is_some_and(Toast::expired) {
            self.toast = None;
        }
    }
}

struct View<'a> {
    catalog: &'a StationCatalog,
    state: PlaybackState,
    now_playing: &'a NowPlaying,
    prices: &'a PriceSnapshot,
}

pub async fn run_ui<B: AudioBackend>(
    engine: &mut PlaybackEngine<B>,
    now_playing: watch::Receiver<NowPlaying>,
    prices: watch::Receiver<PriceSnapshot>,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = stdout();
    crossterm::execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut ui_state = UIState::new();
    let mut pending: Option<Intent> = None;

    loop {
        let intent = match pending.take() {
            Some(intent) => intent,
            None => {
                ui_state.tick();
                draw(
                    &mut terminal,
                    engine.catalog(),
                    engine.state(),
                    &now_playing,
                    &prices,
                    &mut ui_state,
                )?;
                match next_intent(FRAME)? {
                    Some(intent) => intent,
                    None => continue,
                }
            }
        };

        match intent {
            Intent::Quit => {
                engine.shutdown();
                break;
            }
            Intent::TogglePlay => {
                if engine.phase() == Phase::Playing {
                    if let Err(e) = engine.pause() {
                        tracing::debug!(error = %e, "pause ignored");
                    }
                } else {
                    pending =
                        connect(&mut terminal, engine, &now_playing, &prices, &mut ui_state)
                            .await?;
                }
            }
            Intent::Select(id) => engine.select_station(id),
            Intent::NextStation => engine.select_station(engine.state().station.next()),
            Intent::PreviousStation => engine.select_station(engine.state().station.previous()),
            Intent::VolumeBy(delta) => {
                engine.set_volume(engine.state().volume as i32 + delta);
                ui_state.last_volume_change = Instant::now();
            }
            Intent::ToggleMute => {
                let current = engine.state().volume;
                if current > 0 {
                    ui_state.saved_volume = Some(current);
                    engine.set_volume(0);
                } else {
                    let restore = ui_state.saved_volume.unwrap_or(50);
                    engine.set_volume(restore as i32);
                }
                ui_state.last_volume_change = Instant::now();
            }
        }
    }

    disable_raw_mode()?;
    crossterm::execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

/// Waits up to `timeout` for a key press that maps to an intent.
fn next_intent(timeout: Duration) -> Result<Option<Intent>> {
    if !event::poll(timeout)? {
        return Ok(None);
    }
    let Event::Key(key) = event::read()? else {
        return Ok(None);
    };
    if key.kind != KeyEventKind::Press {
        return Ok(None);
    }
    Ok(intent_for_key(key.code))
}

enum Connect {
    Done(std::result::Result<(), PlaybackError>),
    Interrupted(Intent),
}

/// Plays the selected station while the screen keeps redrawing.
///
/// Dropping the pending `play()` abandons the connection and leaves the engine
/// idle. An interrupting intent other than play/stop is handed back to the
/// main loop.
async fn connect<B: AudioBackend, T: ratatui::backend::Backend>(
    terminal: &mut Terminal<T>,
    engine: &mut PlaybackEngine<B>,
    now_playing: &watch::Receiver<NowPlaying>,
    prices: &watch::Receiver<PriceSnapshot>,
    ui_state: &mut UIState,
) -> Result<Option<Intent>> {
    let catalog = engine.catalog().clone();
    let state = engine.state();
    ui_state.connecting = true;

    let mut frames = tokio::time::interval(FRAME);
    let outcome = {
        let play = engine.play();
        tokio::pin!(play);
        loop {
            tokio::select! {
                result = &mut play => break Connect::Done(result),
                _ = frames.tick() => {
                    ui_state.tick();
                    draw(terminal, &catalog, state, now_playing, prices, ui_state)?;
                    match next_intent(Duration::ZERO)? {
                        Some(intent) if interrupts_connect(intent) => break Connect::Interrupted(intent),
                        _ => {}
                    }
                }
            }
        }
    };
    ui_state.connecting = false;

    match outcome {
        Connect::Done(result) => {
            if let Some(toast) = play_toast(state.station, &result) {
                ui_state.toast = Some(toast);
            }
            Ok(None)
        }
        Connect::Interrupted(intent) => {
            tracing::info!(station = %state.station, "connection abandoned");
            Ok((intent != Intent::TogglePlay).then_some(intent))
        }
    }
}

fn draw<T: ratatui::backend::Backend>(
    terminal: &mut Terminal<T>,
    catalog: &StationCatalog,
    state: PlaybackState,
    now_playing: &watch::Receiver<NowPlaying>,
    prices: &watch::Receiver<PriceSnapshot>,
    ui_state: &mut UIState,
) -> Result<()> {
    let np = now_playing.borrow().clone();
    let snapshot = prices.borrow().clone();
    let view = View {
        catalog,
        state,
        now_playing: &np,
        prices: &snapshot,
    };

    terminal.draw(|f| {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(40), Constraint::Percentage(60)].as_ref())
            .split(f.size());

        render_left(f, chunks[0], &view);
        render_right(f, chunks[1], &view, ui_state);
    })?;
    Ok(())
}

fn render_left(f: &mut Frame, area: Rect, view: &View) {
    let mut lines = vec![Line::from(Span::styled(
        "Stations",
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    ))];

    for (i, id) in StationId::ALL.iter().enumerate() {
        let selected = *id == view.state.station;
        let marker = if selected { "▶" } else { " " };
        let style = if selected {
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::White)
        };
        lines.push(Line::from(vec![
            Span::styled(format!(" {} ", marker), style),
            Span::styled(format!("{} ", i + 1), Style::default().fg(Color::Yellow)),
            Span::styled(view.catalog.display_name(*id), style),
        ]));
    }

    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "Upcoming",
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    )));
    for program in PROGRAMS {
        lines.push(Line::from(Span::styled(
            format!(" 📻 {}", program),
            Style::default().fg(Color::Green),
        )));
    }

    let left = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .title(" Web3 Radio ")
            .border_style(Style::default().fg(Color::Magenta)),
    );
    f.render_widget(left, area);
}

fn render_right(f: &mut Frame, area: Rect, view: &View, ui_state: &mut UIState) {
    let playing = view.state.is_playing;
    let volume = view.state.volume;
    let (status_icon, status_text, status_style) = if ui_state.connecting {
        ("…", "Connecting", Style::default().fg(Color::Cyan))
    } else if playing {
        (
            "▶",
            "Playing",
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        )
    } else {
        ("⏸", "Stopped", Style::default().fg(Color::Yellow))
    };

    let wave_visual = generate_waveform(&mut ui_state.wave_phase, playing, volume);
    let volume_bar = generate_pretty_volume_bar(volume);
    let volume_recently_changed = ui_state.last_volume_change.elapsed() < Duration::from_secs(2);
    let inner_width = area.width.saturating_sub(4) as usize;

    let label = |s: &'static str| Span::styled(s, Style::default().fg(Color::Cyan));
    let value = |s: String| {
        Span::styled(
            s,
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
    };

    let mut lines = vec![];

    lines.push(Line::from(vec![
        Span::raw("Status:  "),
        Span::styled(format!("{} {}", status_icon, status_text), status_style),
    ]));
    lines.push(Line::from(vec![
        Span::raw("Station: "),
        value(view.catalog.display_name(view.state.station).to_string()),
    ]));
    lines.push(Line::from(""));

    match (&view.now_playing.song, view.now_playing.loading) {
        (Some(song), _) => {
            lines.push(Line::from(vec![label("Title:  "), value(song.title.clone())]));
            lines.push(Line::from(vec![label("Artist: "), value(song.artist.clone())]));
            lines.push(Line::from(vec![label("Album:  "), value(song.album.clone())]));
        }
        (None, true) => {
            lines.push(Line::from(Span::styled(
                "Loading song info…",
                Style::default().fg(Color::Gray),
            )));
            lines.push(Line::from(""));
            lines.push(Line::from(""));
        }
        (None, false) => {
            lines.push(Line::from(Span::styled(
                "No song playing",
                Style::default().fg(Color::Gray).add_modifier(Modifier::DIM),
            )));
            lines.push(Line::from(""));
            lines.push(Line::from(""));
        }
    }

    lines.push(Line::from(""));
    lines.push(Line::from(vec![
        if volume_recently_changed {
            Span::styled("🔊 ", Style::default().fg(Color::Yellow))
        } else {
            Span::raw("")
        },
        Span::styled("Volume: ", Style::default().fg(Color::Magenta)),
        value(format!("{}%", volume)),
    ]));
    lines.push(Line::from(volume_bar));
    lines.push(Line::from(""));

    lines.push(Line::from(wave_visual));
    lines.push(Line::from(""));

    let ticker_text = if view.prices.is_empty() {
        "fetching prices…".to_string()
    } else {
        view.prices.lines().join("   •   ")
    };
    lines.push(Line::from(Span::styled(
        marquee(&ticker_text, inner_width, ui_state.marquee_offset),
        Style::default().fg(Color::Green),
    )));
    lines.push(Line::from(""));

    lines.push(Line::from(Span::styled(
        "─── Controls ───",
        Style::default().fg(Color::Gray).add_modifier(Modifier::DIM),
    )));
    for (keys, what) in [
        ("  Space", " : play/stop"),
        ("    1-5", " : choose station"),
        ("    ←/→", " : previous/next station"),
        ("    +/-", " : volume up/down"),
        ("      m", " : mute/unmute"),
    ] {
        lines.push(Line::from(vec![
            Span::styled(
                keys,
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw(what),
        ]));
    }
    lines.push(Line::from(vec![
        Span::styled(
            "      q",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" : quit"),
    ]));

    if let Some(toast) = &ui_state.toast {
        let color = if toast.is_error { Color::Red } else { Color::Green };
        lines.push(Line::from(""));
        lines.push(Line::from(vec![
            Span::styled(
                format!("{}: ", toast.title),
                Style::default().fg(color).add_modifier(Modifier::BOLD),
            ),
            Span::raw(toast.body.clone()),
        ]));
    }

    let right = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .title(" ☆ Now Playing ☆ ")
            .title_alignment(Alignment::Center)
            .border_style(Style::default().fg(Color::Cyan)),
    );
    f.render_widget(right, area);
}

/// A `width`-wide window into `text` repeated endlessly, shifted by `offset`.
pub fn marquee(text: &str, width: usize, offset: usize) -> String {
    let chars: Vec<char> = text.chars().chain("      ".chars()).collect();
    if width == 0 || text.is_empty() {
        return String::new();
    }
    (0..width)
        .map(|i| chars[(offset + i) % chars.len()])
        .collect()
}

fn generate_waveform(phase: &mut f32, is_playing: bool, volume: u8) -> String {
    let bar_count = 40;
    let level_scale = volume as f32 / 100.0;
    let mut rng = rand::thread_rng();

    if is_playing {
        *phase += 0.2;
    } else {
        *phase *= 0.95;
    }

    let mut bars = String::new();

    for i in 0..bar_count {
        let x = i as f32 / bar_count as f32;

        let wave1 = ((*phase + x * 8.0).sin() * 0.3 + 0.5).abs();
        let wave2 = (((*phase * 1.3) + x * 12.0).sin() * 0.2 + 0.5).abs();
        let wave3 = (((*phase * 0.7) + x * 4.0).cos() * 0.3 + 0.5).abs();

        let noise = rng.gen_range(-0.1..0.1);
        let combined = (wave1 + wave2 + wave3) / 3.0 + noise;
        let level = (combined * level_scale * 20.0).clamp(0.0, 8.0) as u8;

        let final_level = if volume == 0 || !is_playing {
            (level as f32 * 0.2) as u8
        } else {
            level
        };

        let bar_char = match final_level {
            0 => '▁',
            1 => '▂',
            2 => '▃',
            3 => '▄',
            4 => '▅',
            5 => '▆',
            6 => '▇',
            _ => '█',
        };

        bars.push(bar_char);
    }

    bars
}

fn generate_pretty_volume_bar(volume: u8) -> String {
    let vol_percent = volume.min(100) as usize;
    let bar_length = 20;
    let filled = (vol_percent * bar_length / 100).min(bar_length);

    let mut bar = String::new();
    bar.push('│');

    for i in 0..bar_length {
        if i < filled {
            if i < bar_length * 60 / 100 {
                bar.push('▓');
            } else if i < bar_length * 80 / 100 {
                bar.push('▒');
            } else {
                bar.push('░');
            }
        } else {
            bar.push('·');
        }
    }

    bar.push('│');

    if vol_percent == 0 {
        bar.push_str(" 🔇");
    } else if vol_percent < 30 {
        bar.push_str(" 🔈");
    } else if vol_percent < 70 {
        bar.push_str(" 🔉");
    } else {
        bar.push_str(" 🔊");
    }

    bar
}
