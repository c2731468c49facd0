mod help;
mod state;

use crate::cli::Cli;
use crate::config::SessionConfig;
use crate::model::AppEvent;
use crate::orchestrator::{self, Orchestrator, UiCommand};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use help::draw_help;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
    Terminal,
};
use state::{Focus, KeyAction, UiState};
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

pub async fn run(args: Cli, cfg: SessionConfig) -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel::<AppEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    let (orch, outcomes) = Orchestrator::from_config(&cfg, event_tx);
    let state = UiState {
        server: cfg.orthanc_base_url.clone(),
        username: args.user.clone(),
        password: args.password.clone(),
        date: args.date.clone().unwrap_or_default(),
        ..Default::default()
    };

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_handle = std::thread::spawn(move || run_threaded(state, event_rx, cmd_tx));

    // Returns once the UI sends Quit or drops its command sender.
    orchestrator::run_controller(orch, outcomes, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }
    Ok(())
}

/// Run the TUI loop on a dedicated thread.
fn run_threaded(
    mut state: UiState,
    mut event_rx: UnboundedReceiver<AppEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();
    let mut dirty = true;

    let res = loop {
        // Drain events without blocking to keep UI responsive.
        while let Ok(ev) = event_rx.try_recv() {
            state.apply_event(ev);
            dirty = true;
        }

        if dirty || last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
            dirty = false;
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                dirty = true;
                match state.on_key(k.modifiers, k.code) {
                    KeyAction::None => {}
                    KeyAction::Send(cmd) => {
                        let _ = cmd_tx.send(cmd);
                    }
                    KeyAction::Quit => {
                        let _ = cmd_tx.send(UiCommand::Quit);
                        break Ok(());
                    }
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

fn border_style(state: &UiState, focus: Focus) -> Style {
    if !state.is_enabled(focus) {
        Style::default().fg(Color::DarkGray)
    } else if state.focus == focus {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    }
}

fn input<'a>(state: &UiState, focus: Focus, title: &'a str, value: String) -> Paragraph<'a> {
    let mut text = value;
    if state.focus == focus {
        text.push('▏');
    }
    Paragraph::new(text).block(
        Block::default()
            .borders(Borders::ALL)
            .title(title)
            .border_style(border_style(state, focus)),
    )
}

fn button<'a>(state: &UiState, focus: Focus, label: &'a str) -> Paragraph<'a> {
    let mut style = Style::default().add_modifier(Modifier::BOLD);
    if !state.is_enabled(focus) {
        style = Style::default().fg(Color::DarkGray);
    }
    Paragraph::new(Span::styled(label, style)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(border_style(state, focus)),
    )
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(area);

    draw_header(rows[0], f, state);

    let login = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(40),
            Constraint::Percentage(40),
            Constraint::Percentage(20),
        ])
        .split(rows[1]);
    f.render_widget(
        input(state, Focus::User, "Username", state.username.clone()),
        login[0],
    );
    f.render_widget(
        input(
            state,
            Focus::Password,
            "Password",
            "*".repeat(state.password.chars().count()),
        ),
        login[1],
    );
    f.render_widget(button(state, Focus::Connect, "Connect"), login[2]);

    let date_title = if state.searching {
        "Study date (YYYYMMDD), searching…"
    } else {
        "Study date (YYYYMMDD)"
    };
    f.render_widget(
        input(state, Focus::Date, date_title, state.date.clone()),
        rows[2],
    );

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(rows[3]);
    draw_studies(body[0], f, state);
    draw_log(body[1], f, state);

    let export_label = if state.processing {
        "Processing… (esc to cancel)"
    } else {
        "Export and process selected studies"
    };
    f.render_widget(button(state, Focus::Export, export_label), rows[4]);

    if state.show_help {
        draw_help(centered(area, 70, 80), f);
    }
}

fn draw_header(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let (status, color) = if state.connected {
        ("connected", Color::Green)
    } else if state.connecting {
        ("connecting…", Color::Yellow)
    } else {
        ("not connected", Color::Red)
    };
    let line = Line::from(vec![
        Span::raw(state.server.as_str()),
        Span::raw("  "),
        Span::styled(status, Style::default().fg(color)),
        Span::raw("    "),
        Span::styled("F1", Style::default().fg(Color::Magenta)),
        Span::raw(" help"),
    ]);
    let p = Paragraph::new(line).block(
        Block::default()
            .borders(Borders::ALL)
            .title("orthanc-icf"),
    );
    f.render_widget(p, area);
}

fn draw_studies(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let items: Vec<ListItem> = state
        .studies
        .iter()
        .map(|s| {
            let mark = if state.is_selected(&s.study_id) {
                "[x] "
            } else {
                "[ ] "
            };
            ListItem::new(format!("{mark}{}", s.label()))
        })
        .collect();
    let title = format!("Studies ({} selected)", state.selected.len());
    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(title)
                .border_style(border_style(state, Focus::Studies)),
        )
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    let mut list_state = ListState::default();
    if state.focus == Focus::Studies {
        list_state.select(Some(state.cursor));
    }
    f.render_stateful_widget(list, area, &mut list_state);
}

fn draw_log(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let visible = area.height.saturating_sub(2) as usize;
    let skip = state.log.len().saturating_sub(visible);
    let lines: Vec<Line> = state
        .log
        .iter()
        .skip(skip)
        .map(|l| {
            Line::from(vec![
                Span::styled(format!("{} ", l.time), Style::default().fg(Color::DarkGray)),
                Span::styled(l.text.as_str(), l.style()),
            ])
        })
        .collect();
    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Log"));
    f.render_widget(p, area);
}

fn centered(area: Rect, percent_x: u16, percent_y: u16) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}
