use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};
use std::io::stdout;
use std::time::Duration;

use crate::models::{format_date, Application, Field, Platform, Status};
use crate::query::{self, Filter, ViewState};
use crate::store::ApplicationStore;
use crate::truncate;

struct BrowseState {
    view: ViewState,
    rows: Vec<i64>,
    selected: usize,
    scroll_offset: u16,
    searching: bool,
    message: Option<String>,
}

impl BrowseState {
    fn new(view: ViewState) -> Self {
        Self {
            view,
            rows: Vec::new(),
            selected: 0,
            scroll_offset: 0,
            searching: false,
            message: None,
        }
    }

    /// Recomputes the visible rows, keeping the selection on the same
    /// application when it is still visible.
    fn refresh(&mut self, store: &ApplicationStore) {
        let current = self.current_id();
        self.rows = query::view(store.applications(), &self.view)
            .iter()
            .map(|app| app.id)
            .collect();
        self.selected = current
            .and_then(|id| self.rows.iter().position(|row| *row == id))
            .unwrap_or(0)
            .min(self.rows.len().saturating_sub(1));
    }

    fn current_id(&self) -> Option<i64> {
        self.rows.get(self.selected).copied()
    }

    fn next(&mut self) {
        if !self.rows.is_empty() && self.selected < self.rows.len() - 1 {
            self.selected += 1;
            self.scroll_offset = 0;
        }
    }

    fn prev(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
            self.scroll_offset = 0;
        }
    }

    fn scroll_down(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_add(3);
    }

    fn scroll_up(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_sub(3);
    }

    fn set_status(&mut self, store: &mut ApplicationStore, status: Status) {
        let Some(id) = self.current_id() else { return };
        self.message = match store.update_field(id, Field::Status, status.label()) {
            Ok(true) => Some(format!("#{} marked {}", id, status)),
            Ok(false) => None,
            Err(e) => Some(e.to_string()),
        };
    }
}

/// Steps All -> first option -> ... -> last option -> All.
fn cycle<T: Clone + PartialEq>(current: &Filter<T>, options: &[T]) -> Filter<T> {
    let next = match current {
        Filter::All => 0,
        Filter::Only(value) => match options.iter().position(|o| o == value) {
            Some(index) => index + 1,
            None => 0,
        },
    };
    options
        .get(next)
        .cloned()
        .map(Filter::Only)
        .unwrap_or(Filter::All)
}

fn status_for_key(code: KeyCode) -> Option<Status> {
    match code {
        KeyCode::Char('a') => Some(Status::Applied),
        KeyCode::Char('S') => Some(Status::Screening),
        KeyCode::Char('I') => Some(Status::InterviewScheduled),
        KeyCode::Char('i') => Some(Status::Interviewed),
        KeyCode::Char('t') => Some(Status::TechnicalTest),
        KeyCode::Char('O') => Some(Status::Offer),
        KeyCode::Char('x') => Some(Status::Rejected),
        KeyCode::Char('w') => Some(Status::Withdrawn),
        KeyCode::Char('f') => Some(Status::FollowUpNeeded),
        _ => None,
    }
}

pub fn run_browse(store: &mut ApplicationStore, view: ViewState) -> Result<()> {
    if store.is_empty() {
        println!("No applications yet. Add one with 'jobtrack add'.");
        return Ok(());
    }

    let mut state = BrowseState::new(view);
    state.refresh(store);

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = run_loop(&mut terminal, &mut state, store);

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    state: &mut BrowseState,
    store: &mut ApplicationStore,
) -> Result<()> {
    let mut list_state = ListState::default();

    loop {
        for event in store.poll_events() {
            if let Some(warning) = event.warning() {
                state.message = Some(warning);
            }
        }

        list_state.select(state.current_id().map(|_| state.selected));
        terminal.draw(|frame| draw(frame, state, store, &mut list_state))?;

        // Poll so save warnings show up without waiting for a key.
        if !event::poll(Duration::from_millis(250))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        if state.searching {
            match key.code {
                KeyCode::Enter | KeyCode::Esc => state.searching = false,
                KeyCode::Backspace => {
                    state.view.search.pop();
                }
                KeyCode::Char(c) => state.view.search.push(c),
                _ => {}
            }
            state.refresh(store);
            continue;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => break,
            KeyCode::Down | KeyCode::Char('j') => state.next(),
            KeyCode::Up | KeyCode::Char('k') => state.prev(),
            KeyCode::Char('J') | KeyCode::PageDown => state.scroll_down(),
            KeyCode::Char('K') | KeyCode::PageUp => state.scroll_up(),
            KeyCode::Char('/') => {
                state.searching = true;
                state.view.search.clear();
            }
            KeyCode::Char('s') => state.view.status = cycle(&state.view.status, Status::ALL),
            KeyCode::Char('p') => state.view.platform = cycle(&state.view.platform, Platform::ALL),
            KeyCode::Char('o') => state.view.sort_by = state.view.sort_by.next(),
            KeyCode::Char('r') => state.view.order = state.view.order.toggle(),
            code => {
                if let Some(status) = status_for_key(code) {
                    state.set_status(store, status);
                }
            }
        }
        state.refresh(store);
    }
    Ok(())
}

fn status_style(status: &Status) -> Style {
    match status {
        Status::Applied => Style::default().fg(Color::Yellow),
        Status::Screening => Style::default().fg(Color::Magenta),
        Status::InterviewScheduled | Status::Interviewed => Style::default().fg(Color::Blue),
        Status::TechnicalTest => Style::default().fg(Color::Cyan),
        Status::Offer => Style::default().fg(Color::Green),
        Status::Rejected => Style::default().fg(Color::Red),
        Status::Withdrawn => Style::default().fg(Color::DarkGray),
        Status::FollowUpNeeded => Style::default().fg(Color::LightRed),
        Status::Unknown(_) => Style::default(),
    }
}

fn draw(frame: &mut Frame, state: &BrowseState, store: &ApplicationStore, list_state: &mut ListState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(frame.area());

    // Header: stats and pending follow-ups
    let today = store.today();
    let stats = query::stats(store.applications(), today);
    let due = query::follow_ups_due(store.applications(), today).len();
    let mut summary = vec![
        Span::raw(format!(
            " Total {}  Applied {}  Screening {}  Interview {}  Offers {}  Rejected {}  Response {}%",
            stats.total,
            stats.count(&Status::Applied),
            stats.count(&Status::Screening),
            stats.interview,
            stats.count(&Status::Offer),
            stats.count(&Status::Rejected),
            stats.response_rate,
        )),
    ];
    if due > 0 {
        summary.push(Span::styled(
            format!("  {} need follow-up!", due),
            Style::default().fg(Color::LightRed).add_modifier(Modifier::BOLD),
        ));
    }
    let status_filter = match &state.view.status {
        Filter::All => format!("All ({})", store.len()),
        Filter::Only(wanted) => {
            let count = query::status_counts(store.applications())
                .into_iter()
                .find(|(status, _)| status == wanted)
                .map(|(_, count)| count)
                .unwrap_or(0);
            format!("{} ({})", wanted, count)
        }
    };
    let header = Paragraph::new(Line::from(summary)).block(
        Block::default().borders(Borders::ALL).title(format!(
            " status: {}  platform: {}  sort: {} {:?} ",
            status_filter,
            state.view.platform,
            state.view.sort_by.name(),
            state.view.order,
        )),
    );
    frame.render_widget(header, rows[0]);

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(40),
            Constraint::Percentage(60),
        ])
        .split(rows[1]);

    // Left panel: application list
    let items: Vec<ListItem> = state
        .rows
        .iter()
        .filter_map(|id| store.get(*id))
        .map(|app| {
            let marker = if app.is_follow_up_due(today) { "!" } else { " " };
            ListItem::new(Line::from(vec![
                Span::raw(format!("{} ", marker)),
                Span::styled(format!("{:<12}", truncate(app.status.label(), 12)), status_style(&app.status)),
                Span::raw(format!(" {} | {}", truncate(&app.company, 20), truncate(&app.position, 24))),
            ]))
        })
        .collect();

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(format!(
            " Applications ({}/{}) ",
            state.rows.len(),
            store.len()
        )))
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, chunks[0], list_state);

    // Right panel: application detail
    let detail = match state.current_id().and_then(|id| store.get(id)) {
        Some(app) => build_detail(app),
        None => Text::raw("No applications match the current filters"),
    };
    let detail_widget = Paragraph::new(detail)
        .block(Block::default().borders(Borders::ALL).title(" Detail "))
        .wrap(Wrap { trim: false })
        .scroll((state.scroll_offset, 0));

    frame.render_widget(detail_widget, chunks[1]);

    // Footer: search prompt, last message or key help
    let footer = if state.searching {
        Paragraph::new(format!(" search: {}_", state.view.search))
    } else if let Some(message) = &state.message {
        Paragraph::new(format!(" {}", message)).style(Style::default().fg(Color::Yellow))
    } else {
        Paragraph::new(
            " j/k:move J/K:scroll /:search s:status p:platform o:sort r:reverse  a S I i t O x w f:set status  q:quit",
        )
        .style(Style::default().fg(Color::DarkGray))
    };
    frame.render_widget(footer, rows[2]);
}

fn build_detail(app: &Application) -> Text<'_> {
    let mut lines: Vec<Line> = Vec::new();

    lines.push(Line::from(Span::styled(
        &app.position,
        Style::default().add_modifier(Modifier::BOLD),
    )));
    lines.push(Line::from(format!("at {}", app.company)));
    lines.push(Line::from(Span::styled(
        format!("Status: {}", app.status),
        status_style(&app.status),
    )));
    lines.push(Line::from(""));

    let fields = [
        ("Platform", app.platform_or_default().to_string()),
        ("Location", app.field_value(Field::Location)),
        ("Applied", format_date(app.date_applied)),
        ("Follow-up", format_date(app.follow_up_date)),
        ("Salary", app.salary.clone()),
        ("Contact", app.contact_person.clone()),
        ("CV version", app.field_value(Field::CvVersion)),
        ("URL", app.job_url.clone()),
        ("Last update", format_date(app.last_update)),
    ];
    for (label, value) in fields {
        if !value.is_empty() {
            lines.push(Line::from(format!("{:<12} {}", label, value)));
        }
    }

    if !app.notes.is_empty() {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "NOTES",
            Style::default().add_modifier(Modifier::BOLD),
        )));
        for line in textwrap::fill(&app.notes, 70).lines() {
            lines.push(Line::from(format!("  {}", line)));
        }
    }

    Text::from(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn store_with(companies: &[&str]) -> ApplicationStore {
        let clock = Arc::new(FixedClock(NaiveDate::from_ymd_opt(2024, 10, 20).unwrap()));
        let mut store = ApplicationStore::new(clock);
        for company in companies {
            let mut draft = store.draft();
            draft.company = company.to_string();
            draft.position = "Engineer".to_string();
            store.add(draft);
        }
        store
    }

    #[test]
    fn test_cycle_filter() {
        let options = [Status::Applied, Status::Offer];
        let first = cycle(&Filter::All, &options);
        assert_eq!(first, Filter::Only(Status::Applied));
        let second = cycle(&first, &options);
        assert_eq!(second, Filter::Only(Status::Offer));
        assert_eq!(cycle(&second, &options), Filter::All);
    }

    #[test]
    fn test_refresh_keeps_selection_on_same_application() {
        let mut store = store_with(&["Acme", "Globex", "Initech"]);
        let mut state = BrowseState::new(ViewState::default());
        state.refresh(&store);
        state.next();
        let selected = state.current_id().unwrap();

        state.set_status(&mut store, Status::Offer);
        state.refresh(&store);
        assert_eq!(state.current_id(), Some(selected));
        assert_eq!(store.get(selected).unwrap().status, Status::Offer);

        state.view.status = Filter::Only(Status::Applied);
        state.refresh(&store);
        assert_eq!(state.rows.len(), 2);
        assert!(state.current_id().is_some());
    }

    #[test]
    fn test_refresh_with_no_matches() {
        let store = store_with(&["Acme"]);
        let mut state = BrowseState::new(ViewState {
            search: "nothing like this".to_string(),
            ..ViewState::default()
        });
        state.refresh(&store);
        assert!(state.rows.is_empty());
        assert_eq!(state.current_id(), None);
    }

    #[test]
    fn test_status_keys() {
        assert_eq!(status_for_key(KeyCode::Char('O')), Some(Status::Offer));
        assert_eq!(status_for_key(KeyCode::Char('x')), Some(Status::Rejected));
        assert_eq!(status_for_key(KeyCode::Char('q')), None);
    }
}
