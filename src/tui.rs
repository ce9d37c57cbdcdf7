use crate::api::{self, ApiClient, Camera, ConfigInfo, MotionEvent, SnapshotOutcome};
use crate::cache::{self, SnapshotHistory, SnapshotRecord};
use crate::cli::TuiArgs;
use crate::live::{LiveBinding, LiveController, RenderGeometry, ViewPhase};
use crate::theme::{self, ThemePalette};
use anyhow::{anyhow, Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Terminal;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

const UI_IDLE_SLEEP: Duration = Duration::from_millis(16);
const CONFIG_RETRY_INTERVAL: Duration = Duration::from_secs(6);

const GLYPH_ACTIVE: &str = "▸";
const GLYPH_BULLET: &str = "•";

static THEME: OnceLock<ThemePalette> = OnceLock::new();

type AppTerminal = Terminal<CrosstermBackend<io::Stdout>>;

#[derive(Debug, Clone, Copy)]
pub struct DashboardOptions {
    pub camera_poll: Duration,
    pub motion_poll: Duration,
    pub motion_limit: usize,
    pub vertical_scale: usize,
}

impl From<&TuiArgs> for DashboardOptions {
    fn from(args: &TuiArgs) -> Self {
        Self {
            camera_poll: Duration::from_secs(args.camera_poll_secs.max(1)),
            motion_poll: Duration::from_secs(args.motion_poll_secs.max(1)),
            motion_limit: args.motion_limit.max(1),
            vertical_scale: usize::from(args.vertical_scale.max(1)),
        }
    }
}

pub async fn run_dashboard(api: ApiClient, args: &TuiArgs) -> Result<()> {
    let loaded_theme = match theme::load_or_create_theme() {
        Ok(palette) => palette,
        Err(err) => {
            eprintln!("Warning: failed to load theme config ({err:#}). Using defaults.");
            ThemePalette::default()
        }
    };
    let _ = THEME.set(loaded_theme);

    let mut app = App::new(api, DashboardOptions::from(args));
    let mut terminal = init_terminal()?;

    let run_result = run_loop(&mut terminal, &mut app).await;
    let restore_result = restore_terminal(&mut terminal);

    run_result?;
    restore_result?;
    Ok(())
}

async fn run_loop(terminal: &mut AppTerminal, app: &mut App) -> Result<()> {
    let mut running = true;
    let mut force_draw = true;
    let mut last_signature = None;

    while running {
        app.sync_config_lifecycle();
        app.poll_config_result().await;
        app.sync_camera_poll();
        app.poll_camera_result().await;
        app.sync_motion_poll();
        app.poll_motion_result().await;
        app.poll_snapshot_result().await;
        app.sync_live_controllers();

        let signature = app.ui_state_signature();
        let should_draw = force_draw || last_signature.is_none_or(|prev| prev != signature);
        if should_draw {
            terminal
                .draw(|frame| app.draw(frame))
                .context("failed drawing dashboard frame")?;
            last_signature = Some(signature);
            force_draw = false;
        }

        while event::poll(Duration::ZERO).context("failed to poll input")? {
            match event::read().context("failed reading input")? {
                Event::Key(key) => {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    match app.handle_key(key) {
                        AppCommand::None => {}
                        AppCommand::Quit => {
                            running = false;
                            break;
                        }
                    }
                    force_draw = true;
                }
                Event::Resize(_, _) => {
                    force_draw = true;
                    last_signature = None;
                }
                _ => {}
            }
        }

        if !running {
            break;
        }
        tokio::time::sleep(UI_IDLE_SLEEP).await;
    }

    app.stop();
    Ok(())
}

fn init_terminal() -> Result<AppTerminal> {
    enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("failed entering alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend).context("failed creating terminal")
}

fn restore_terminal(terminal: &mut AppTerminal) -> Result<()> {
    disable_raw_mode().context("failed disabling raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed leaving alternate screen")?;
    terminal.show_cursor().context("failed showing cursor")?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AppCommand {
    None,
    Quit,
}

struct App {
    api: ApiClient,
    media_http: reqwest::Client,
    options: DashboardOptions,
    status: String,
    cameras: Vec<Camera>,
    motion_events: Vec<MotionEvent>,
    snapshot_history: SnapshotHistory,
    selected: usize,
    gateway_base: Option<Url>,
    pending_config: Option<JoinHandle<Result<ConfigInfo>>>,
    next_config_attempt_at: Option<Instant>,
    pending_camera_poll: Option<JoinHandle<Result<Vec<Camera>>>>,
    next_camera_poll_at: Option<Instant>,
    pending_motion_poll: Option<JoinHandle<Result<Vec<MotionEvent>>>>,
    next_motion_poll_at: Option<Instant>,
    pending_snapshot: Option<JoinHandle<(String, Result<SnapshotOutcome>)>>,
    controllers: Vec<LiveController>,
    live_bindings: Vec<LiveBinding>,
    geometry_tx: watch::Sender<RenderGeometry>,
    geometry_rx: watch::Receiver<RenderGeometry>,
}

impl App {
    fn new(api: ApiClient, options: DashboardOptions) -> Self {
        let snapshot_history = match cache::load_history() {
            Ok(history) => history,
            Err(err) => {
                eprintln!("Warning: failed to load snapshot history: {err:#}");
                SnapshotHistory::default()
            }
        };
        let (geometry_tx, geometry_rx) = watch::channel(RenderGeometry {
            vertical_scale: options.vertical_scale,
            ..RenderGeometry::default()
        });

        Self {
            api,
            media_http: reqwest::Client::new(),
            options,
            status: String::new(),
            cameras: Vec::new(),
            motion_events: Vec::new(),
            snapshot_history,
            selected: 0,
            gateway_base: None,
            pending_config: None,
            next_config_attempt_at: Some(Instant::now()),
            pending_camera_poll: None,
            next_camera_poll_at: Some(Instant::now()),
            pending_motion_poll: None,
            next_motion_poll_at: Some(Instant::now()),
            pending_snapshot: None,
            controllers: Vec::new(),
            live_bindings: Vec::new(),
            geometry_tx,
            geometry_rx,
        }
    }

    // --- configuration lifecycle -------------------------------------

    /// The gateway base is resolved once; attempts repeat until the
    /// first success, then the value is immutable for the dashboard's
    /// lifetime.
    fn sync_config_lifecycle(&mut self) {
        if self.gateway_base.is_some() || self.pending_config.is_some() {
            return;
        }
        let due = self
            .next_config_attempt_at
            .is_none_or(|at| Instant::now() >= at);
        if !due {
            return;
        }
        let api = self.api.clone();
        self.pending_config = Some(tokio::spawn(async move { api.fetch_config().await }));
    }

    async fn poll_config_result(&mut self) {
        let Some(handle) = self.pending_config.take() else {
            return;
        };
        if !handle.is_finished() {
            self.pending_config = Some(handle);
            return;
        }
        let result = match handle.await {
            Ok(result) => result,
            Err(err) => Err(anyhow!("config task failed: {err}")),
        };
        self.apply_config_result(result);
    }

    fn apply_config_result(&mut self, result: Result<ConfigInfo>) {
        match result.and_then(|config| self.api.resolve_gateway_base(&config)) {
            Ok(base) => {
                self.status = format!("media gateway: {base}");
                self.gateway_base = Some(base);
                self.next_config_attempt_at = None;
            }
            Err(err) => {
                self.status = format!("config fetch failed: {err:#}");
                self.next_config_attempt_at = Some(Instant::now() + CONFIG_RETRY_INTERVAL);
            }
        }
    }

    // --- camera reconciliation ---------------------------------------

    fn sync_camera_poll(&mut self) {
        if self.pending_camera_poll.is_some() {
            return;
        }
        let due = self
            .next_camera_poll_at
            .is_none_or(|at| Instant::now() >= at);
        if !due {
            return;
        }
        let api = self.api.clone();
        self.pending_camera_poll = Some(tokio::spawn(async move { api.list_cameras().await }));
    }

    async fn poll_camera_result(&mut self) {
        let Some(handle) = self.pending_camera_poll.take() else {
            return;
        };
        if !handle.is_finished() {
            self.pending_camera_poll = Some(handle);
            return;
        }
        let result = match handle.await {
            Ok(result) => result,
            Err(err) => Err(anyhow!("camera poll task failed: {err}")),
        };
        self.next_camera_poll_at = Some(Instant::now() + self.options.camera_poll);
        self.apply_camera_poll(result);
    }

    fn apply_camera_poll(&mut self, result: Result<Vec<Camera>>) {
        match result {
            Ok(cameras) => {
                self.cameras = cameras;
                if self.selected >= self.cameras.len() {
                    self.selected = self.cameras.len().saturating_sub(1);
                }
            }
            Err(err) => {
                // Cached collection stays; the interval retries on its own.
                self.status = format!("camera refresh failed: {err:#}");
            }
        }
    }

    // --- motion reconciliation ---------------------------------------

    fn sync_motion_poll(&mut self) {
        if self.pending_motion_poll.is_some() {
            return;
        }
        let due = self
            .next_motion_poll_at
            .is_none_or(|at| Instant::now() >= at);
        if !due {
            return;
        }
        let api = self.api.clone();
        let limit = self.options.motion_limit;
        self.pending_motion_poll = Some(tokio::spawn(async move { api.recent_motion(limit).await }));
    }

    async fn poll_motion_result(&mut self) {
        let Some(handle) = self.pending_motion_poll.take() else {
            return;
        };
        if !handle.is_finished() {
            self.pending_motion_poll = Some(handle);
            return;
        }
        let result = match handle.await {
            Ok(result) => result,
            Err(err) => Err(anyhow!("motion poll task failed: {err}")),
        };
        self.next_motion_poll_at = Some(Instant::now() + self.options.motion_poll);
        self.apply_motion_poll(result);
    }

    fn apply_motion_poll(&mut self, result: Result<Vec<MotionEvent>>) {
        match result {
            Ok(events) => self.motion_events = events,
            Err(err) => {
                self.status = format!("motion refresh failed: {err:#}");
            }
        }
    }

    // --- snapshot action ---------------------------------------------

    fn request_snapshot(&mut self) {
        if self.pending_snapshot.is_some() {
            return;
        }
        let Some(camera) = self.cameras.get(self.selected) else {
            self.status = "no camera selected for snapshot".to_owned();
            return;
        };
        let api = self.api.clone();
        let camera_id = camera.id.clone();
        self.status = format!("capturing snapshot for {camera_id}");
        self.pending_snapshot = Some(tokio::spawn(async move {
            let outcome = api.capture_snapshot(&camera_id).await;
            (camera_id, outcome)
        }));
    }

    async fn poll_snapshot_result(&mut self) {
        let Some(handle) = self.pending_snapshot.take() else {
            return;
        };
        if !handle.is_finished() {
            self.pending_snapshot = Some(handle);
            return;
        }
        match handle.await {
            Ok((camera_id, result)) => self.apply_snapshot_result(camera_id, result),
            Err(err) => {
                self.status = format!("snapshot task failed: {err}");
            }
        }
    }

    fn apply_snapshot_result(&mut self, camera_id: String, result: Result<SnapshotOutcome>) {
        match result {
            Ok(outcome) if outcome.ok => {
                let url = outcome
                    .path
                    .as_deref()
                    .map(|path| api::snapshot_url(self.api.base(), path))
                    .unwrap_or_default();
                self.snapshot_history.prepend(SnapshotRecord {
                    camera_id: camera_id.clone(),
                    ts: cache::now_unix(),
                    url,
                });
                let _ = cache::save_history(&self.snapshot_history);
                self.status = format!("snapshot captured for {camera_id}");
            }
            Ok(_) => {
                self.status = format!("snapshot declined for {camera_id}");
            }
            Err(err) => {
                self.status = format!("snapshot failed for {camera_id}: {err:#}");
            }
        }
    }

    // --- live view lifecycle -----------------------------------------

    fn desired_bindings(&self) -> Vec<LiveBinding> {
        let Some(gateway) = self.gateway_base.as_ref() else {
            // Controllers stay idle until the gateway base is known.
            return Vec::new();
        };
        self.cameras
            .iter()
            .map(|camera| LiveBinding {
                camera_id: camera.id.clone(),
                label: camera.display_name().to_owned(),
                endpoint: api::whep_endpoint(gateway, camera).ok(),
            })
            .collect()
    }

    /// Retires and recreates controllers whenever any binding changes.
    /// Teardown runs before the replacement cycle starts; a stream-path
    /// change therefore forces a rebind rather than mutating a live
    /// controller.
    fn sync_live_controllers(&mut self) {
        let desired = self.desired_bindings();
        if desired == self.live_bindings {
            return;
        }

        for mut controller in self.controllers.drain(..) {
            let _ = controller.teardown();
        }
        self.live_bindings = desired.clone();

        let bearer = self.api.bearer().map(str::to_owned);
        for binding in desired {
            let mut controller = LiveController::new(
                binding,
                self.media_http.clone(),
                bearer.clone(),
                self.geometry_rx.clone(),
            );
            controller.start();
            self.controllers.push(controller);
        }
    }

    fn stop(&mut self) {
        if let Some(handle) = self.pending_config.take() {
            handle.abort();
        }
        if let Some(handle) = self.pending_camera_poll.take() {
            handle.abort();
        }
        if let Some(handle) = self.pending_motion_poll.take() {
            handle.abort();
        }
        if let Some(handle) = self.pending_snapshot.take() {
            handle.abort();
        }
        for mut controller in self.controllers.drain(..) {
            let _ = controller.teardown();
        }
        self.live_bindings.clear();
    }

    // --- input -------------------------------------------------------

    fn handle_key(&mut self, key: KeyEvent) -> AppCommand {
        if key.modifiers.contains(KeyModifiers::CONTROL)
            && matches!(key.code, KeyCode::Char('q') | KeyCode::Char('c'))
        {
            return AppCommand::Quit;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => AppCommand::Quit,
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected = self.selected.saturating_sub(1);
                AppCommand::None
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if self.selected + 1 < self.cameras.len() {
                    self.selected += 1;
                }
                AppCommand::None
            }
            KeyCode::Char('s') => {
                self.request_snapshot();
                AppCommand::None
            }
            _ => AppCommand::None,
        }
    }

    fn ui_state_signature(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.status.hash(&mut hasher);
        self.selected.hash(&mut hasher);
        self.gateway_base.is_some().hash(&mut hasher);
        self.cameras.len().hash(&mut hasher);
        for camera in &self.cameras {
            camera.id.hash(&mut hasher);
            camera.name.hash(&mut hasher);
            camera.status.hash(&mut hasher);
            camera.last_seen.hash(&mut hasher);
            camera.last_motion_at.hash(&mut hasher);
        }
        self.motion_events.len().hash(&mut hasher);
        for event in &self.motion_events {
            event.id.hash(&mut hasher);
        }
        self.snapshot_history.records.len().hash(&mut hasher);
        for controller in &self.controllers {
            let snapshot = controller.tile().snapshot();
            snapshot.camera_label.hash(&mut hasher);
            snapshot.phase.label().hash(&mut hasher);
            snapshot.detail.hash(&mut hasher);
            snapshot.frames_rendered.hash(&mut hasher);
        }
        hasher.finish()
    }

    // --- drawing -----------------------------------------------------

    fn draw(&self, frame: &mut ratatui::Frame<'_>) {
        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(10),
                Constraint::Length(8),
                Constraint::Length(1),
                Constraint::Length(3),
            ])
            .split(frame.area());

        let main = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Length(38), Constraint::Min(24)])
            .split(layout[0]);

        self.draw_camera_panel(frame, main[0]);
        self.draw_live_grid(frame, main[1]);
        self.draw_event_panels(frame, layout[1]);
        self.draw_status_line(frame, layout[2]);
        self.draw_footer(frame, layout[3]);
    }

    fn draw_camera_panel(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let mut lines = Vec::with_capacity(self.cameras.len().max(1));
        if self.cameras.is_empty() {
            lines.push(Line::from(Span::styled(
                "No cameras reported by the backend yet.",
                Style::default().fg(color_muted()),
            )));
        }
        for (idx, camera) in self.cameras.iter().enumerate() {
            let marker = if idx == self.selected {
                GLYPH_ACTIVE
            } else {
                " "
            };
            let name_style = if idx == self.selected {
                Style::default()
                    .fg(color_text())
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(color_text())
            };
            lines.push(Line::from(vec![
                Span::styled(format!("{marker} "), Style::default().fg(color_accent())),
                Span::styled(format!("{:<18}", camera.display_name()), name_style),
                Span::styled(
                    format!("{:<8}", camera.status),
                    Style::default().fg(camera_status_color(&camera.status)),
                ),
                Span::styled(
                    format!("motion {}", format_age(camera.last_motion_at)),
                    Style::default().fg(color_muted()),
                ),
            ]));
        }

        let panel = Paragraph::new(lines)
            .style(Style::default().fg(color_text()))
            .block(panel_block(
                GLYPH_BULLET,
                &format!("Cameras ({})", self.cameras.len()),
                true,
            ))
            .wrap(Wrap { trim: false });
        frame.render_widget(panel, area);
    }

    fn draw_live_grid(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        if self.controllers.is_empty() {
            let message = if self.gateway_base.is_none() {
                "Resolving media gateway address..."
            } else {
                "Live tiles appear when the backend reports cameras."
            };
            let panel = Paragraph::new(Line::from(Span::styled(
                message,
                Style::default().fg(color_muted()),
            )))
            .block(panel_block(GLYPH_BULLET, "Live", false))
            .wrap(Wrap { trim: false });
            frame.render_widget(panel, area);
            return;
        }

        let count = self.controllers.len();
        let (rows, cols) = compute_grid_dimensions(count);
        let grid_rects = build_grid_rects(area, rows, cols);

        if let Some(first) = grid_rects.first() {
            let inner = inner_cell(*first);
            let geometry = RenderGeometry {
                width: usize::from(inner.width.max(2)),
                height: usize::from(inner.height.max(2)),
                vertical_scale: self.options.vertical_scale,
            };
            if *self.geometry_tx.borrow() != geometry {
                let _ = self.geometry_tx.send(geometry);
            }
        }

        let selected_id = self
            .cameras
            .get(self.selected)
            .map(|camera| camera.id.as_str());
        for (idx, controller) in self.controllers.iter().enumerate() {
            if idx >= grid_rects.len() {
                break;
            }
            let area = grid_rects[idx];
            let snapshot = controller.tile().snapshot();
            let phase_style = Style::default().fg(phase_color(snapshot.phase));
            let is_selected = self
                .live_bindings
                .get(idx)
                .is_some_and(|binding| Some(binding.camera_id.as_str()) == selected_id);
            let border_style = if is_selected {
                Style::default().fg(color_border_active())
            } else {
                phase_style
            };

            let title = Line::from(vec![
                Span::styled(
                    format!(" {GLYPH_BULLET}{} ", idx + 1),
                    Style::default()
                        .fg(color_accent())
                        .add_modifier(Modifier::BOLD),
                ),
                Span::styled(
                    snapshot.camera_label.clone(),
                    Style::default()
                        .fg(color_text())
                        .add_modifier(Modifier::BOLD),
                ),
                Span::styled(format!("  {}", snapshot.phase.label()), phase_style),
                Span::styled(
                    format!(
                        "  frames={} decode_errs={}",
                        snapshot.frames_rendered, snapshot.decode_errors
                    ),
                    Style::default().fg(color_muted()),
                ),
            ]);

            let body = if snapshot.phase == ViewPhase::Live && !snapshot.frame_text.is_empty() {
                snapshot.frame_text
            } else if snapshot.detail.is_empty() {
                format!("status: {}", snapshot.phase.label())
            } else {
                format!("status: {}\n{}", snapshot.phase.label(), snapshot.detail)
            };

            let tile = Paragraph::new(body).style(Style::default().fg(color_text())).block(
                Block::default()
                    .title(title)
                    .borders(Borders::ALL)
                    .border_style(border_style),
            );
            frame.render_widget(tile, area);
        }
    }

    fn draw_event_panels(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let halves = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(area);

        let mut motion_lines = Vec::new();
        if self.motion_events.is_empty() {
            motion_lines.push(Line::from(Span::styled(
                "No motion events.",
                Style::default().fg(color_muted()),
            )));
        }
        for event in self.motion_events.iter().take(6) {
            let snapshot_note = if event.snapshot_path.is_some() {
                " [snap]"
            } else {
                ""
            };
            motion_lines.push(Line::from(vec![
                Span::styled(
                    format!("{} ", format_age(Some(event.ts))),
                    Style::default().fg(color_muted()),
                ),
                Span::styled(event.camera_id.clone(), Style::default().fg(color_text())),
                Span::styled(snapshot_note, Style::default().fg(color_accent())),
            ]));
        }
        let motion = Paragraph::new(motion_lines)
            .block(panel_block(
                GLYPH_BULLET,
                &format!("Motion ({})", self.motion_events.len()),
                false,
            ))
            .wrap(Wrap { trim: false });
        frame.render_widget(motion, halves[0]);

        let mut snapshot_lines = Vec::new();
        if self.snapshot_history.records.is_empty() {
            snapshot_lines.push(Line::from(Span::styled(
                "Press s to capture a snapshot.",
                Style::default().fg(color_muted()),
            )));
        }
        for record in self.snapshot_history.records.iter().take(6) {
            snapshot_lines.push(Line::from(vec![
                Span::styled(
                    format!("{} ", format_age(Some(record.ts))),
                    Style::default().fg(color_muted()),
                ),
                Span::styled(record.camera_id.clone(), Style::default().fg(color_text())),
            ]));
        }
        let snapshots = Paragraph::new(snapshot_lines)
            .block(panel_block(
                GLYPH_BULLET,
                &format!("Snapshots ({})", self.snapshot_history.records.len()),
                false,
            ))
            .wrap(Wrap { trim: false });
        frame.render_widget(snapshots, halves[1]);
    }

    fn draw_status_line(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        if self.status.is_empty() {
            return;
        }
        let line = Line::from(vec![
            Span::styled("status ", Style::default().fg(color_muted())),
            Span::styled(
                &self.status,
                status_message_style(&self.status).add_modifier(Modifier::BOLD),
            ),
        ]);
        frame.render_widget(Paragraph::new(line), area);
    }

    fn draw_footer(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let footer_spans = action_hint_spans(&[
            ("j/k", "Select Camera"),
            ("s", "Snapshot"),
            ("q", "Quit"),
        ]);
        let footer = Paragraph::new(Line::from(footer_spans))
            .style(Style::default().fg(color_text()))
            .block(panel_block("⌘", "Actions", false));
        frame.render_widget(footer, area);
    }
}

fn active_theme() -> &'static ThemePalette {
    THEME.get_or_init(ThemePalette::default)
}

fn color_text() -> Color {
    active_theme().text
}

fn color_muted() -> Color {
    active_theme().muted
}

fn color_border() -> Color {
    active_theme().border
}

fn color_border_active() -> Color {
    active_theme().border_active
}

fn color_accent() -> Color {
    active_theme().accent
}

fn color_success() -> Color {
    active_theme().success
}

fn color_warning() -> Color {
    active_theme().warning
}

fn color_error() -> Color {
    active_theme().error
}

fn panel_block<'a>(glyph: &'a str, title: &str, focused: bool) -> Block<'a> {
    let border = if focused {
        color_border_active()
    } else {
        color_border()
    };
    Block::default()
        .title(Line::from(vec![
            Span::styled(
                format!(" {glyph} "),
                Style::default().fg(color_accent()).add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                title.to_owned(),
                Style::default().fg(color_text()).add_modifier(Modifier::BOLD),
            ),
            Span::raw(" "),
        ]))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border))
}

fn action_hint_spans(hints: &[(&'static str, &'static str)]) -> Vec<Span<'static>> {
    let mut spans = Vec::with_capacity(hints.len() * 3);
    for (idx, (keys, label)) in hints.iter().enumerate() {
        if idx > 0 {
            spans.push(Span::styled("  ", Style::default().fg(color_muted())));
        }
        spans.push(Span::styled(
            format!("{keys} "),
            Style::default()
                .fg(color_accent())
                .add_modifier(Modifier::BOLD),
        ));
        spans.push(Span::styled(*label, Style::default().fg(color_text())));
    }
    spans
}

fn phase_color(phase: ViewPhase) -> Color {
    match phase {
        ViewPhase::Live => color_success(),
        ViewPhase::Connecting => color_warning(),
        ViewPhase::Error => color_error(),
        ViewPhase::Idle | ViewPhase::TornDown => color_muted(),
    }
}

fn camera_status_color(status: &str) -> Color {
    match status.to_ascii_lowercase().as_str() {
        "online" => color_success(),
        "offline" => color_error(),
        _ => color_warning(),
    }
}

fn status_message_style(status: &str) -> Style {
    let lowered = status.to_ascii_lowercase();
    if lowered.contains("failed") || lowered.contains("declined") {
        Style::default().fg(color_error())
    } else {
        Style::default().fg(color_success())
    }
}

fn format_age(ts: Option<i64>) -> String {
    let Some(ts) = ts else {
        return "-".to_owned();
    };
    let elapsed = cache::now_unix().saturating_sub(ts);
    if elapsed < 0 {
        return "now".to_owned();
    }
    match elapsed {
        0..=59 => format!("{elapsed}s"),
        60..=3_599 => format!("{}m", elapsed / 60),
        3_600..=86_399 => format!("{}h", elapsed / 3_600),
        _ => format!("{}d", elapsed / 86_400),
    }
}

fn compute_grid_dimensions(count: usize) -> (usize, usize) {
    let count = count.max(1);
    let cols = ceil_sqrt(count).max(1);
    let rows = count.div_ceil(cols);
    (rows, cols)
}

fn ceil_sqrt(value: usize) -> usize {
    let mut root = 1_usize;
    while root.saturating_mul(root) < value {
        root = root.saturating_add(1);
    }
    root
}

fn build_grid_rects(area: Rect, rows: usize, cols: usize) -> Vec<Rect> {
    let row_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(vec![Constraint::Fill(1); rows.max(1)])
        .split(area);

    let mut rects = Vec::with_capacity(rows.saturating_mul(cols));
    for row_area in row_chunks.iter().copied() {
        let col_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(vec![Constraint::Fill(1); cols.max(1)])
            .split(row_area);
        rects.extend(col_chunks.iter().copied());
    }

    rects
}

fn inner_cell(cell: Rect) -> Rect {
    Rect {
        x: cell.x.saturating_add(1),
        y: cell.y.saturating_add(1),
        width: cell.width.saturating_sub(2),
        height: cell.height.saturating_sub(2),
    }
}

#[cfg(test)]
mod tests {
    use super::{compute_grid_dimensions, App, DashboardOptions};
    use crate::api::{ApiClient, Camera, ConfigInfo, MotionEvent, SnapshotOutcome};
    use anyhow::anyhow;
    use std::time::Duration;

    fn test_app() -> App {
        let api = ApiClient::new("http://127.0.0.1:8080", None).unwrap();
        App::new(
            api,
            DashboardOptions {
                camera_poll: Duration::from_secs(5),
                motion_poll: Duration::from_secs(20),
                motion_limit: 50,
                vertical_scale: 2,
            },
        )
    }

    fn camera(id: &str, stream_path: Option<&str>) -> Camera {
        Camera {
            id: id.to_owned(),
            name: format!("Camera {id}"),
            status: "online".to_owned(),
            stream_path: stream_path.map(str::to_owned),
            last_seen: None,
            last_motion_at: None,
        }
    }

    #[tokio::test]
    async fn camera_poll_failure_retains_previous_collection() {
        let mut app = test_app();
        app.apply_camera_poll(Ok(vec![camera("cam1", None), camera("cam2", None)]));
        assert_eq!(app.cameras.len(), 2);

        app.apply_camera_poll(Err(anyhow!("connection refused")));
        assert_eq!(app.cameras.len(), 2);
        assert!(app.status.contains("camera refresh failed"));

        app.apply_camera_poll(Ok(vec![camera("cam3", None)]));
        let ids: Vec<&str> = app.cameras.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["cam3"]);
    }

    #[tokio::test]
    async fn motion_poll_replaces_wholesale_and_retains_on_failure() {
        let mut app = test_app();
        let event = MotionEvent {
            id: "evt1".to_owned(),
            camera_id: "cam1".to_owned(),
            ts: 100,
            snapshot_path: None,
        };
        app.apply_motion_poll(Ok(vec![event]));
        assert_eq!(app.motion_events.len(), 1);

        app.apply_motion_poll(Err(anyhow!("timeout")));
        assert_eq!(app.motion_events.len(), 1);

        app.apply_motion_poll(Ok(Vec::new()));
        assert!(app.motion_events.is_empty());
    }

    #[tokio::test]
    async fn bindings_stay_empty_until_gateway_resolves() {
        let mut app = test_app();
        app.apply_camera_poll(Ok(vec![camera("cam1", None)]));
        assert!(app.desired_bindings().is_empty());

        app.apply_config_result(Ok(ConfigInfo::default()));
        let bindings = app.desired_bindings();
        assert_eq!(bindings.len(), 1);
        assert_eq!(
            bindings[0].endpoint.as_ref().unwrap().as_str(),
            "http://127.0.0.1:8889/cam1/whep"
        );
    }

    #[tokio::test]
    async fn stream_path_change_forces_a_different_binding() {
        let mut app = test_app();
        app.apply_config_result(Ok(ConfigInfo::default()));
        app.apply_camera_poll(Ok(vec![camera("cam1", Some("front"))]));
        let before = app.desired_bindings();

        app.apply_camera_poll(Ok(vec![camera("cam1", Some("front-hq"))]));
        let after = app.desired_bindings();
        assert_ne!(before, after);
        assert_eq!(
            after[0].endpoint.as_ref().unwrap().as_str(),
            "http://127.0.0.1:8889/front-hq/whep"
        );
    }

    #[tokio::test]
    async fn advertised_gateway_base_wins_over_fallback() {
        let mut app = test_app();
        app.apply_config_result(Ok(ConfigInfo {
            webrtc_base: Some("https://media.example".to_owned()),
        }));
        assert_eq!(
            app.gateway_base.as_ref().unwrap().as_str(),
            "https://media.example/"
        );
    }

    #[tokio::test]
    async fn snapshot_success_prepends_without_losing_entries() {
        let mut app = test_app();
        app.snapshot_history.records.clear();
        app.apply_snapshot_result(
            "cam1".to_owned(),
            Ok(SnapshotOutcome {
                ok: true,
                path: Some("/snapshots/cam1/a.jpg".to_owned()),
            }),
        );
        app.apply_snapshot_result(
            "cam2".to_owned(),
            Ok(SnapshotOutcome {
                ok: true,
                path: Some("/snapshots/cam2/b.jpg".to_owned()),
            }),
        );
        assert_eq!(app.snapshot_history.records.len(), 2);
        assert_eq!(app.snapshot_history.records[0].camera_id, "cam2");
        assert_eq!(app.snapshot_history.records[1].camera_id, "cam1");

        app.apply_snapshot_result("cam3".to_owned(), Err(anyhow!("backend down")));
        assert_eq!(app.snapshot_history.records.len(), 2);

        app.apply_camera_poll(Err(anyhow!("poll failed")));
        assert_eq!(app.snapshot_history.records.len(), 2);
    }

    #[tokio::test]
    async fn declined_snapshot_records_nothing() {
        let mut app = test_app();
        app.snapshot_history.records.clear();
        app.apply_snapshot_result(
            "cam1".to_owned(),
            Ok(SnapshotOutcome {
                ok: false,
                path: None,
            }),
        );
        assert!(app.snapshot_history.records.is_empty());
        assert!(app.status.contains("declined"));
    }

    #[test]
    fn grid_dimensions_cover_all_tiles() {
        assert_eq!(compute_grid_dimensions(1), (1, 1));
        assert_eq!(compute_grid_dimensions(2), (1, 2));
        assert_eq!(compute_grid_dimensions(4), (2, 2));
        assert_eq!(compute_grid_dimensions(5), (2, 3));
        let (rows, cols) = compute_grid_dimensions(9);
        assert!(rows * cols >= 9);
    }
}
