use crate::bookmarks::Bookmarks;
use crate::config::Config;
use crate::document::{Document, LineMatch, RopeDocument, ScanDirection};
use crate::engine::{Admission, Decision, Engine, Notification, Request};
use crate::ingest::Ingest;
use crate::ledger::Change;
use crate::line_list::{self, LineListReport};
use crate::pattern::SearchParams;
use crate::renumber::Truncation;
use crate::tasks::{BulkKind, ScanRange};
use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{execute, ExecutableCommand};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, BorderType, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::Terminal;
use std::fs;
use std::io::{self, Stdout};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use unicode_width::UnicodeWidthChar;

const TICK: Duration = Duration::from_millis(50);
const TAB_WIDTH: usize = 4;
const DRAIN_CHUNKS: usize = 8;

const ACCENT: Color = Color::Cyan;
const MUTED: Color = Color::DarkGray;
const LISTED: Color = Color::Green;
const MARKED: Color = Color::Magenta;
const HIT: Color = Color::Yellow;

pub fn run_app(path: PathBuf, config: Config) -> Result<()> {
    let mut app = App::new(path, config)?;

    let mut terminal = setup_terminal()?;
    let _guard = TerminalGuard;

    loop {
        app.pump_input(Instant::now());

        let size = terminal.size()?;
        let layout = app.layout(size);
        app.clamp_views(&layout);

        terminal.draw(|f| ui(f, &mut app, &layout))?;

        if event::poll(app.poll_timeout(Instant::now()))? {
            if let Event::Key(key) = event::read()? {
                if app.handle_key(key, &layout) {
                    break;
                }
            }
        }

        app.run_engine(Instant::now());
    }

    Ok(())
}

struct TerminalGuard;

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = stdout.execute(LeaveAlternateScreen);
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    SearchInput(ScanDirection),
    CommandInput,
    AbortPrompt(BulkKind),
    ImportPrompt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pane {
    Document,
    List,
}

struct LayoutInfo {
    main: Rect,
    status: Rect,
    document: Rect,
    list: Rect,
    document_height: usize,
    list_height: usize,
}

struct App {
    source: String,
    config: Config,
    doc: RopeDocument,
    engine: Engine,
    bookmarks: Bookmarks,
    ingest: Option<Ingest>,
    mode: Mode,
    focus: Pane,
    cursor: usize,
    doc_scroll: usize,
    hscroll: usize,
    selected: usize,
    list_scroll: usize,
    search_input: String,
    command_input: String,
    last_pattern: Option<SearchParams>,
    search_origin: usize,
    inc_match: Option<LineMatch>,
    pending_import: Option<LineListReport>,
    progress: Option<(BulkKind, u8)>,
    status: Option<String>,
}

impl App {
    fn new(path: PathBuf, config: Config) -> Result<Self> {
        let engine = Engine::new(config.scheduler_policy(), &config.tags, &config.frame)
            .context("Invalid tag or frame pattern in config")?;
        let (doc, ingest, source) = if path.as_os_str() == "-" {
            let ingest = Ingest::spawn(io::stdin(), config.ingest_options());
            (RopeDocument::default(), Some(ingest), "<stdin>".to_string())
        } else {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            (
                RopeDocument::from_text(&text),
                None,
                path.to_string_lossy().to_string(),
            )
        };
        tracing::info!(source = %source, lines = doc.line_count(), "document opened");

        Ok(Self {
            source,
            config,
            doc,
            engine,
            bookmarks: Bookmarks::default(),
            ingest,
            mode: Mode::Normal,
            focus: Pane::Document,
            cursor: 1,
            doc_scroll: 1,
            hscroll: 0,
            selected: 0,
            list_scroll: 0,
            search_input: String::new(),
            command_input: String::new(),
            last_pattern: None,
            search_origin: 1,
            inc_match: None,
            pending_import: None,
            progress: None,
            status: Some("F1 for keys".to_string()),
        })
    }

    fn layout(&self, size: Rect) -> LayoutInfo {
        let vertical = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(1)])
            .split(size);
        let main = vertical[0];
        let status = vertical[1];

        let list_pct = self.config.list_height;
        let panes = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Percentage(100 - list_pct),
                Constraint::Percentage(list_pct),
            ])
            .split(main);

        LayoutInfo {
            main,
            status,
            document: panes[0],
            list: panes[1],
            document_height: panes[0].height.saturating_sub(2).max(1) as usize,
            list_height: panes[1].height.saturating_sub(2).max(1) as usize,
        }
    }

    fn clamp_views(&mut self, layout: &LayoutInfo) {
        let count = self.doc.line_count().max(1);
        self.cursor = self.cursor.clamp(1, count);
        if self.cursor < self.doc_scroll {
            self.doc_scroll = self.cursor;
        } else if self.cursor >= self.doc_scroll + layout.document_height {
            self.doc_scroll = self.cursor + 1 - layout.document_height;
        }
        self.doc_scroll = self.doc_scroll.max(1);

        let total = self.engine.match_count();
        self.selected = self.selected.min(total.saturating_sub(1));
        if self.selected < self.list_scroll {
            self.list_scroll = self.selected;
        } else if self.selected >= self.list_scroll + layout.list_height {
            self.list_scroll = self.selected + 1 - layout.list_height;
        }
    }

    fn poll_timeout(&self, now: Instant) -> Duration {
        match self.engine.next_wakeup() {
            Some(at) => at.saturating_duration_since(now).min(TICK),
            None => TICK,
        }
    }

    /// Moves text read by the ingestion thread into the document.
    fn pump_input(&mut self, now: Instant) {
        let Some(ingest) = self.ingest.as_mut() else {
            return;
        };
        let drained = ingest.drain(DRAIN_CHUNKS);
        let bytes = ingest.bytes_read();
        if !drained.text.is_empty() {
            let old_count = self.doc.line_count();
            self.doc.append(&drained.text);
            self.engine.on_lines_appended(&self.doc, old_count, now);
            self.handle_notifications();
        }
        if let Some(err) = drained.error {
            self.status = Some(err.to_string());
        }
        if drained.finished {
            tracing::info!(bytes, lines = self.doc.line_count(), "input complete");
            self.ingest = None;
        }
    }

    fn run_engine(&mut self, now: Instant) {
        let events = self.engine.poll(&self.doc, now);
        self.apply_notifications(events);
    }

    fn handle_notifications(&mut self) {
        let events = self.engine.take_notifications();
        self.apply_notifications(events);
    }

    fn apply_notifications(&mut self, events: Vec<Notification>) {
        for event in events {
            match event {
                Notification::Progress { kind, percent } => self.progress = Some((kind, percent)),
                Notification::Completed { kind } => {
                    self.progress = None;
                    self.status = Some(format!(
                        "{} done, {} lines listed",
                        kind.label(),
                        self.engine.match_count()
                    ));
                }
                Notification::Aborted { kind } => {
                    self.progress = None;
                    self.status = Some(format!("{} aborted", kind.label()));
                }
                Notification::PromptOpened { ongoing } => self.mode = Mode::AbortPrompt(ongoing),
                Notification::PromptDismissed { auto } => {
                    if matches!(self.mode, Mode::AbortPrompt(_)) {
                        self.mode = Mode::Normal;
                    }
                    if auto {
                        self.status = Some("Previous operation finished".to_string());
                    }
                }
                Notification::IncSearchMatch(found) => match found {
                    Some(m) => {
                        self.cursor = m.line;
                        self.inc_match = Some(m);
                    }
                    None => {
                        self.inc_match = None;
                        self.status = Some("Pattern not found".to_string());
                    }
                },
                Notification::HighlightsReady => {}
                Notification::TagsReady => {
                    tracing::debug!(tags = self.engine.tags().len(), "tag table ready");
                }
                Notification::Warning(msg) => self.status = Some(msg),
            }
        }
    }

    fn submit(&mut self, request: Request) {
        match self.engine.request(&self.doc, request, Instant::now()) {
            Ok(Admission::Busy) => {
                self.status = Some("Answer the open prompt first".to_string());
            }
            Ok(Admission::NothingToDo) => self.status = Some("Nothing to do".to_string()),
            Ok(Admission::Applied) => {
                self.status = Some(format!("{} lines listed", self.engine.match_count()));
            }
            Ok(_) => {}
            Err(err) => self.status = Some(err.to_string()),
        }
        self.handle_notifications();
    }

    fn search_all(&mut self, change: Change, range: ScanRange) {
        let Some(params) = self.last_pattern.clone() else {
            self.status = Some("No search pattern, use / first".to_string());
            return;
        };
        self.submit(Request::Search {
            patterns: vec![params],
            change,
            range,
        });
    }

    fn import_tags(&mut self, change: Change) {
        let tags: Vec<usize> = (0..self.engine.tags().len()).collect();
        if tags.is_empty() {
            self.status = Some("No tags configured".to_string());
            return;
        }
        self.submit(Request::TagImport { tags, change });
    }

    /// Line under the cursor in the focused pane.
    fn focused_line(&self) -> Option<usize> {
        match self.focus {
            Pane::Document => (self.doc.line_count() > 0).then_some(self.cursor),
            Pane::List => self.engine.line_at(self.selected),
        }
    }

    fn handle_key(&mut self, key: KeyEvent, layout: &LayoutInfo) -> bool {
        match self.mode {
            Mode::SearchInput(direction) => self.handle_search_input(key, direction),
            Mode::CommandInput => self.handle_command_input(key),
            Mode::AbortPrompt(_) => self.handle_abort_prompt(key),
            Mode::ImportPrompt => self.handle_import_prompt(key),
            Mode::Normal => self.handle_normal(key, layout),
        }
    }

    fn handle_normal(&mut self, key: KeyEvent, layout: &LayoutInfo) -> bool {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('q') => return self.quit_requested(),
            KeyCode::Char('r') if ctrl => self.submit(Request::Redo),
            KeyCode::Tab => {
                self.focus = match self.focus {
                    Pane::Document => {
                        self.selected = self.engine.lower_bound(self.cursor);
                        Pane::List
                    }
                    Pane::List => Pane::Document,
                };
            }
            KeyCode::Down | KeyCode::Char('j') => self.move_by(1),
            KeyCode::Up | KeyCode::Char('k') => self.move_by(-1),
            KeyCode::PageDown => self.move_by(self.page(layout) as isize),
            KeyCode::PageUp => self.move_by(-(self.page(layout) as isize)),
            KeyCode::Home | KeyCode::Char('g') => self.move_by(isize::MIN),
            KeyCode::End | KeyCode::Char('G') => self.move_by(isize::MAX),
            KeyCode::Left | KeyCode::Char('h') => self.hscroll = self.hscroll.saturating_sub(8),
            KeyCode::Right | KeyCode::Char('l') => self.hscroll += 8,
            KeyCode::Enter => {
                if let Some(line) = self.engine.line_at(self.selected) {
                    self.cursor = line;
                    self.focus = Pane::Document;
                }
            }
            KeyCode::Char('/') => self.open_search(ScanDirection::Forward),
            KeyCode::Char('?') => self.open_search(ScanDirection::Backward),
            KeyCode::Char('n') => self.search_next(ScanDirection::Forward),
            KeyCode::Char('N') => self.search_next(ScanDirection::Backward),
            KeyCode::Char('a') => self.search_all(Change::Add, ScanRange::Whole),
            KeyCode::Char('<') => self.search_all(Change::Add, ScanRange::Above(self.cursor)),
            KeyCode::Char('>') => self.search_all(Change::Add, ScanRange::Below(self.cursor)),
            KeyCode::Char('R') => self.search_all(Change::Remove, ScanRange::Whole),
            KeyCode::Char('i') => {
                if let Some(line) = (self.doc.line_count() > 0).then_some(self.cursor) {
                    self.submit(Request::Manual {
                        lines: vec![line],
                        change: Change::Add,
                    });
                }
            }
            KeyCode::Char('x') => {
                if let Some(line) = self.focused_line() {
                    self.submit(Request::Manual {
                        lines: vec![line],
                        change: Change::Remove,
                    });
                }
            }
            KeyCode::Char('t') => self.import_tags(Change::Add),
            KeyCode::Char('T') => self.import_tags(Change::Remove),
            KeyCode::Char('u') => self.submit(Request::Undo),
            KeyCode::Char('C') => {
                let count = self.engine.clear();
                self.handle_notifications();
                self.status = Some(format!("Removed {count} lines from the list"));
            }
            KeyCode::Char('m') => {
                if let Some(line) = self.focused_line() {
                    let marked = self.bookmarks.toggle(&self.doc, line);
                    self.status = Some(if marked {
                        format!("Bookmarked line {line}")
                    } else {
                        format!("Removed bookmark at line {line}")
                    });
                }
            }
            KeyCode::Char('b') | KeyCode::Char('B') => {
                let forward = key.code == KeyCode::Char('b');
                match self.bookmarks.next_from(self.cursor, forward) {
                    Some(line) => {
                        self.cursor = line;
                        self.focus = Pane::Document;
                    }
                    None => self.status = Some("No further bookmark".to_string()),
                }
            }
            KeyCode::Char(':') => {
                self.engine.begin_modal();
                self.mode = Mode::CommandInput;
            }
            KeyCode::Esc => {
                if self.engine.abort(Instant::now()) {
                    self.status = Some("Aborting".to_string());
                } else {
                    self.engine.cancel_search_highlight();
                    self.inc_match = None;
                    self.status = None;
                }
            }
            KeyCode::F(1) => {
                self.status = Some(
                    "/ search, a/</> add matches, R remove, i/x add/remove line, t tags, u undo, ^r redo, C clear, : command"
                        .to_string(),
                );
            }
            _ => {}
        }
        false
    }

    fn page(&self, layout: &LayoutInfo) -> usize {
        match self.focus {
            Pane::Document => layout.document_height,
            Pane::List => layout.list_height,
        }
    }

    fn move_by(&mut self, delta: isize) {
        match self.focus {
            Pane::Document => {
                let max = self.doc.line_count().max(1);
                self.cursor = step(self.cursor, delta).clamp(1, max);
            }
            Pane::List => {
                let max = self.engine.match_count().saturating_sub(1);
                self.selected = step(self.selected, delta).min(max);
            }
        }
    }

    fn open_search(&mut self, direction: ScanDirection) {
        self.search_input.clear();
        self.search_origin = self.cursor;
        self.mode = Mode::SearchInput(direction);
    }

    fn inc_search(&mut self, direction: ScanDirection) {
        if self.search_input.is_empty() {
            self.inc_match = None;
            return;
        }
        let params = self.config.search_params(self.search_input.clone());
        // the line the search started on counts as a hit
        let from = match direction {
            ScanDirection::Forward => self.search_origin.saturating_sub(1),
            ScanDirection::Backward => self.search_origin + 1,
        };
        if let Err(err) = self
            .engine
            .start_inc_search(&params, from, direction, Instant::now())
        {
            self.inc_match = None;
            self.status = Some(err.to_string());
        }
    }

    fn search_next(&mut self, direction: ScanDirection) {
        let Some(params) = self.last_pattern.clone() else {
            self.status = Some("No search pattern".to_string());
            return;
        };
        match self.focus {
            Pane::Document => {
                if let Err(err) =
                    self.engine
                        .start_inc_search(&params, self.cursor, direction, Instant::now())
                {
                    self.status = Some(err.to_string());
                }
            }
            Pane::List => {
                let from = (self.engine.match_count() > 0).then_some(self.selected);
                match self.engine.search_in_list(&self.doc, &params, from, direction) {
                    Ok(Some(idx)) => self.selected = idx,
                    Ok(None) => self.status = Some("No further match in list".to_string()),
                    Err(err) => self.status = Some(err.to_string()),
                }
            }
        }
    }

    fn handle_search_input(&mut self, key: KeyEvent, direction: ScanDirection) -> bool {
        match key.code {
            KeyCode::Esc => {
                self.mode = Mode::Normal;
                self.search_input.clear();
                self.cursor = self.search_origin;
                self.inc_match = None;
            }
            KeyCode::Enter => {
                self.mode = Mode::Normal;
                let query = self.search_input.trim().to_string();
                self.search_input.clear();
                if query.is_empty() {
                    return false;
                }
                let params = self.config.search_params(query);
                match self.engine.start_search_highlight(&params, Instant::now()) {
                    Ok(()) => self.last_pattern = Some(params),
                    Err(err) => self.status = Some(err.to_string()),
                }
            }
            KeyCode::Backspace => {
                self.search_input.pop();
                self.inc_search(direction);
            }
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.search_input.push(c);
                self.inc_search(direction);
            }
            _ => {}
        }
        false
    }

    fn handle_command_input(&mut self, key: KeyEvent) -> bool {
        match key.code {
            KeyCode::Esc => {
                self.leave_command_mode();
                self.command_input.clear();
            }
            KeyCode::Enter => {
                let command = self.command_input.trim().to_string();
                self.command_input.clear();
                self.leave_command_mode();
                return self.execute_command(&command);
            }
            KeyCode::Backspace => {
                self.command_input.pop();
            }
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.command_input.push(c);
            }
            _ => {}
        }
        false
    }

    fn leave_command_mode(&mut self) {
        self.engine.end_modal();
        self.mode = Mode::Normal;
    }

    fn handle_abort_prompt(&mut self, key: KeyEvent) -> bool {
        let decision = match key.code {
            KeyCode::Char('a') | KeyCode::Char('y') => Decision::AbortOngoing,
            KeyCode::Char('c') | KeyCode::Char('n') | KeyCode::Esc => Decision::CancelNew,
            _ => return false,
        };
        let admission = self.engine.resolve_prompt(&self.doc, decision, Instant::now());
        tracing::debug!(?decision, ?admission, "prompt answered");
        self.mode = Mode::Normal;
        self.handle_notifications();
        false
    }

    fn handle_import_prompt(&mut self, key: KeyEvent) -> bool {
        let proceed = match key.code {
            KeyCode::Char('y') | KeyCode::Enter => true,
            KeyCode::Char('n') | KeyCode::Esc => false,
            _ => return false,
        };
        self.engine.end_modal();
        self.mode = Mode::Normal;
        if let Some(report) = self.pending_import.take() {
            if proceed {
                self.submit(Request::FileImport {
                    lines: report.lines,
                });
            } else {
                self.status = Some("Import cancelled".to_string());
            }
        }
        false
    }

    fn execute_command(&mut self, command: &str) -> bool {
        let words = match shell_words::split(command) {
            Ok(words) => words,
            Err(err) => {
                self.status = Some(format!("Bad command: {err}"));
                return false;
            }
        };
        let Some((name, args)) = words.split_first() else {
            return false;
        };
        let path = args.first().map(PathBuf::from);

        match (name.as_str(), path) {
            ("q" | "quit", _) => return self.quit_requested(),
            ("q!" | "quit!", _) => return true,
            ("note", _) => {
                let note = args.join(" ");
                if self.bookmarks.contains(self.cursor) && !note.is_empty() {
                    self.bookmarks.set_note(self.cursor, note);
                } else {
                    self.status = Some("note needs a bookmarked line and some text".to_string());
                }
            }
            ("marklist", _) => {
                let lines: Vec<usize> = self.bookmarks.lines().collect();
                self.submit(Request::Manual {
                    lines,
                    change: Change::Add,
                });
            }
            ("load", Some(path)) => self.load_list(&path),
            ("save", Some(path)) => {
                let result = line_list::save_line_numbers(&path, self.engine.lines());
                self.report_saved(&path, result);
            }
            ("savetext", Some(path)) => {
                let result = line_list::save_with_text(&path, &self.doc, self.engine.lines());
                self.report_saved(&path, result);
            }
            ("marks", Some(path)) => match Bookmarks::read(&path, self.doc.line_count()) {
                Ok(import) => {
                    let report = import.report.clone();
                    self.bookmarks.merge(&self.doc, import);
                    self.status = Some(match report.check() {
                        Ok(()) => format!("{} bookmarks loaded", report.lines.len()),
                        Err(err) => format!("{} bookmarks loaded; {err}", report.lines.len()),
                    });
                }
                Err(err) => self.status = Some(err.to_string()),
            },
            ("savemarks", Some(path)) => {
                let result = self.bookmarks.save(&path);
                self.report_saved(&path, result);
            }
            ("top", _) => self.discard(Truncation::above(self.cursor)),
            ("bottom", _) => self.discard(Truncation::below(self.cursor + 1)),
            ("regex", _) => {
                self.config.search_regex = !self.config.search_regex;
                self.status = Some(format!("regex search {}", on_off(self.config.search_regex)));
            }
            ("case", _) => {
                self.config.search_case_sensitive = !self.config.search_case_sensitive;
                self.status = Some(format!(
                    "case-sensitive search {}",
                    on_off(self.config.search_case_sensitive)
                ));
            }
            ("load" | "save" | "savetext" | "marks" | "savemarks", None) => {
                self.status = Some(format!("{name} needs a file name"));
            }
            _ => self.status = Some(format!("Unknown command: {name}")),
        }
        false
    }

    fn quit_requested(&mut self) -> bool {
        if self.bookmarks.is_modified() {
            self.status =
                Some("Bookmarks not saved (:savemarks FILE, or :q! to quit anyway)".to_string());
            return false;
        }
        true
    }

    fn load_list(&mut self, path: &Path) {
        let report = match line_list::load_line_list(path, self.doc.line_count()) {
            Ok(report) => report,
            Err(err) => {
                self.status = Some(err.to_string());
                return;
            }
        };
        match report.check() {
            Ok(()) => self.submit(Request::FileImport {
                lines: report.lines,
            }),
            Err(err) => {
                self.status = Some(err.to_string());
                self.pending_import = Some(report);
                self.engine.begin_modal();
                self.mode = Mode::ImportPrompt;
            }
        }
    }

    fn report_saved(&mut self, path: &Path, result: crate::error::Result<()>) {
        self.status = Some(match result {
            Ok(()) => format!("Wrote {}", path.display()),
            Err(err) => format!("Save failed: {err}"),
        });
    }

    fn discard(&mut self, cut: Truncation) {
        if cut.is_noop() {
            self.status = Some("Nothing to discard".to_string());
            return;
        }
        let before = self.doc.line_count();
        self.engine.discard_lines(&mut self.doc, cut);
        self.bookmarks.renumber(&cut);
        self.cursor = cut.map_line(self.cursor).unwrap_or(1);
        self.doc_scroll = 1;
        self.inc_match = None;
        self.progress = None;
        self.handle_notifications();
        self.status = Some(format!(
            "Discarded {} lines",
            before.saturating_sub(self.doc.line_count())
        ));
    }

    fn undo_label(&self) -> Option<String> {
        let describe = |name: &str, top: Option<(Change, usize)>| {
            top.map(|(change, count)| format!("{name}: {} of {count}", change.label()))
        };
        let parts: Vec<String> = [
            describe("undo", self.engine.describe_undo()),
            describe("redo", self.engine.describe_redo()),
        ]
        .into_iter()
        .flatten()
        .collect();
        (!parts.is_empty()).then(|| parts.join(", "))
    }

    fn document_lines(&self, height: usize, width: usize) -> Vec<Line<'static>> {
        let count = self.doc.line_count();
        let gutter = if self.config.show_line_numbers {
            count.max(1).to_string().len()
        } else {
            0
        };
        let end = (self.doc_scroll + height).min(count + 1);
        (self.doc_scroll..end)
            .map(|line| {
                let text = self.doc.line_text(line).unwrap_or_default();
                let listed = self.engine.index_of_line(line).is_some();
                let mut spans = Vec::new();
                let mark = if self.bookmarks.contains(line) { '*' } else { ' ' };
                spans.push(Span::styled(mark.to_string(), Style::default().fg(MARKED)));
                if gutter > 0 {
                    let style = if listed {
                        Style::default().fg(LISTED).add_modifier(Modifier::BOLD)
                    } else {
                        Style::default().fg(MUTED)
                    };
                    spans.push(Span::styled(format!("{line:>gutter$} "), style));
                }
                let mut style = Style::default();
                if self.engine.is_highlighted(line) {
                    style = style.fg(HIT);
                }
                if line == self.cursor {
                    style = style.add_modifier(Modifier::REVERSED);
                }
                let room = width.saturating_sub(gutter + 2);
                spans.push(Span::styled(clip(&text, self.hscroll, room), style));
                Line::from(spans)
            })
            .collect()
    }

    fn list_items(&mut self, height: usize, width: usize) -> Vec<ListItem<'static>> {
        let lines = self.engine.lines();
        let end = (self.list_scroll + height).min(lines.len());
        let visible: Vec<usize> = lines[self.list_scroll.min(end)..end].to_vec();
        let gutter = self.doc.line_count().max(1).to_string().len();
        visible
            .into_iter()
            .map(|line| {
                let mut prefix = format!("{line:>gutter$} ");
                if self.engine.has_frames() {
                    if let Some(marker) = self.engine.frame_marker(&self.doc, line) {
                        if marker.frm.is_empty() {
                            prefix.push_str(&format!("[{}] ", marker.val));
                        } else {
                            prefix.push_str(&format!("[{}:{}] ", marker.frm, marker.val));
                        }
                    }
                }
                let text = self.doc.line_text(line).unwrap_or_default();
                let room = width.saturating_sub(prefix.len());
                let style = if self.engine.is_highlighted(line) {
                    Style::default().fg(HIT)
                } else {
                    Style::default()
                };
                ListItem::new(Line::from(vec![
                    Span::styled(prefix, Style::default().fg(MUTED)),
                    Span::styled(clip(&text, self.hscroll, room), style),
                ]))
            })
            .collect()
    }
}

fn step(value: usize, delta: isize) -> usize {
    if delta < 0 {
        value.saturating_sub(delta.unsigned_abs())
    } else {
        value.saturating_add(delta as usize)
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag { "on" } else { "off" }
}

/// Cuts `skip` display columns off the front of `text` and fits the rest into
/// `width` columns. Tabs are expanded.
fn clip(text: &str, skip: usize, width: usize) -> String {
    let mut out = String::new();
    let mut col = 0;
    for ch in text.chars() {
        let (repeat, ch) = if ch == '\t' {
            (TAB_WIDTH - col % TAB_WIDTH, ' ')
        } else {
            (1, ch)
        };
        for _ in 0..repeat {
            let w = ch.width().unwrap_or(0);
            if col >= skip {
                if col + w > skip + width {
                    return out;
                }
                out.push(ch);
            }
            col += w;
        }
    }
    out
}

fn pane_block(title: String, focused: bool) -> Block<'static> {
    let border = if focused { ACCENT } else { MUTED };
    Block::bordered()
        .title(title)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(border))
}

fn ui(f: &mut ratatui::Frame, app: &mut App, layout: &LayoutInfo) {
    f.render_widget(Paragraph::new(app.status_line()), layout.status);

    let doc_width = layout.document.width.saturating_sub(2) as usize;
    let doc_title = format!(" {} ({} lines) ", app.source, app.doc.line_count());
    let doc_lines = app.document_lines(layout.document_height, doc_width);
    f.render_widget(
        Paragraph::new(Text::from(doc_lines))
            .block(pane_block(doc_title, app.focus == Pane::Document)),
        layout.document,
    );

    let list_width = layout.list.width.saturating_sub(2) as usize;
    let list_title = format!(" Matches: {} ", app.engine.match_count());
    let items = app.list_items(layout.list_height, list_width);
    let mut state = ListState::default();
    if !items.is_empty() {
        state.select(Some(app.selected.saturating_sub(app.list_scroll)));
    }
    let list = List::new(items)
        .block(pane_block(list_title, app.focus == Pane::List))
        .highlight_style(Style::default().bg(ACCENT).fg(Color::Black));
    f.render_stateful_widget(list, layout.list, &mut state);

    let prompt = match app.mode {
        Mode::AbortPrompt(ongoing) => Some((
            " Operation running ".to_string(),
            format!(
                "A {} is still running.\n\n[a] abort it and start the new request\n[c] cancel the new request",
                ongoing.label()
            ),
        )),
        Mode::ImportPrompt => app.pending_import.as_ref().map(|report| {
            (
                " Import line list ".to_string(),
                format!(
                    "{} lines outside 1..={}, {} unreadable rows.\n\n[y] import the {} valid lines\n[n] cancel",
                    report.skipped,
                    report.max,
                    report.malformed,
                    report.lines.len()
                ),
            )
        }),
        _ => None,
    };
    if let Some((title, body)) = prompt {
        let popup = centered_rect(50, 30, layout.main);
        f.render_widget(Clear, popup);
        f.render_widget(
            Paragraph::new(body)
                .wrap(Wrap { trim: false })
                .block(pane_block(title, true)),
            popup,
        );
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

impl App {
    fn status_line(&self) -> Line<'static> {
        match self.mode {
            Mode::SearchInput(direction) => {
                let lead = if direction == ScanDirection::Forward { "/" } else { "?" };
                return Line::from(vec![
                    Span::styled(lead, Style::default().fg(ACCENT)),
                    Span::raw(self.search_input.clone()),
                ]);
            }
            Mode::CommandInput => {
                return Line::from(vec![
                    Span::styled(":", Style::default().fg(ACCENT)),
                    Span::raw(self.command_input.clone()),
                ]);
            }
            _ => {}
        }

        let sep = || Span::styled(" | ", Style::default().fg(MUTED));
        let mut parts = vec![Span::styled(
            "trawl",
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
        )];
        parts.push(sep());
        parts.push(Span::raw(format!("line {}/{}", self.cursor, self.doc.line_count())));
        if self.ingest.is_some() {
            parts.push(sep());
            parts.push(Span::styled("reading", Style::default().fg(HIT)));
        }
        let tags = self.engine.tags();
        if !tags.is_complete() {
            parts.push(sep());
            parts.push(Span::styled(
                format!("tags {}%", tags.progress(self.doc.line_count())),
                Style::default().fg(MUTED),
            ));
        } else {
            let names: Vec<&str> = tags
                .tags_at(self.cursor)
                .into_iter()
                .filter_map(|id| tags.name(id))
                .collect();
            if !names.is_empty() {
                parts.push(sep());
                parts.push(Span::styled(names.join(","), Style::default().fg(HIT)));
            }
        }
        if let Some((kind, percent)) = self.progress.or_else(|| self.engine.progress()) {
            parts.push(sep());
            parts.push(Span::styled(
                format!("{} {percent}%", kind.label()),
                Style::default().fg(HIT),
            ));
        }
        if let Some(label) = self.undo_label() {
            parts.push(sep());
            parts.push(Span::styled(label, Style::default().fg(MUTED)));
        }
        if !self.bookmarks.is_empty() {
            parts.push(sep());
            parts.push(Span::styled(
                format!("{} marks", self.bookmarks.len()),
                Style::default().fg(MARKED),
            ));
        }
        if let Some(note) = self.bookmarks.note(self.cursor) {
            parts.push(sep());
            parts.push(Span::styled(note.to_string(), Style::default().fg(MARKED)));
        }
        if let Some(m) = self.inc_match {
            parts.push(sep());
            parts.push(Span::raw(format!("match at {}:{}", m.line, m.offset + 1)));
        }
        if let Some(msg) = &self.status {
            parts.push(sep());
            parts.push(Span::styled(msg.clone(), Style::default().fg(ACCENT)));
        }
        Line::from(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::{clip, step, App};
    use crate::config::Config;

    fn app_with(text: &str) -> (tempfile::TempDir, App) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.log");
        std::fs::write(&path, text).unwrap();
        let app = App::new(path, Config::default()).unwrap();
        (dir, app)
    }

    #[test]
    fn clip_skips_columns_and_expands_tabs() {
        assert_eq!(clip("abcdef", 2, 3), "cde");
        assert_eq!(clip("a\tb", 0, 10), "a   b");
        assert_eq!(clip("short", 0, 0), "");
    }

    #[test]
    fn clip_does_not_split_wide_chars() {
        assert_eq!(clip("日本語", 0, 5), "日本");
    }

    #[test]
    fn step_saturates() {
        assert_eq!(step(3, -10), 0);
        assert_eq!(step(3, isize::MIN), 0);
        assert_eq!(step(usize::MAX, 1), usize::MAX);
    }

    #[test]
    fn quit_waits_for_saved_bookmarks() {
        let (dir, mut app) = app_with("a\nb\nc\n");
        app.cursor = 2;
        app.bookmarks.toggle(&app.doc, 2);
        assert!(!app.execute_command("q"));
        assert!(app.status.as_deref().unwrap_or_default().contains("not saved"));
        assert!(app.execute_command("q!"));

        let marks = dir.path().join("marks.txt");
        assert!(!app.execute_command(&format!("savemarks {}", marks.display())));
        assert!(app.execute_command("q"));
    }

    #[test]
    fn note_and_marklist_use_bookmarks() {
        let (_dir, mut app) = app_with("a\nb\nc\nd\n");
        app.bookmarks.toggle(&app.doc, 2);
        app.bookmarks.toggle(&app.doc, 4);
        app.cursor = 4;
        app.execute_command("note checked by hand");
        assert_eq!(app.bookmarks.note(4), Some("checked by hand"));

        app.cursor = 3;
        app.execute_command("note nothing here");
        assert_eq!(app.bookmarks.note(3), None);

        app.execute_command("marklist");
        assert_eq!(app.engine.lines(), &[2, 4]);
        assert_eq!(app.engine.lower_bound(3), 1);
    }
}
