use crate::model::{AppEvent, Severity, StudyMatch, TaskKind};
use crate::orchestrator::UiCommand;
use crossterm::event::{KeyCode, KeyModifiers};
use ratatui::style::{Color, Style};
use std::collections::VecDeque;
use time::macros::format_description;
use time::OffsetDateTime;

/// Oldest log lines are dropped past this many.
pub const LOG_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    User,
    Password,
    Connect,
    Date,
    Studies,
    Export,
}

impl Focus {
    const ORDER: [Focus; 6] = [
        Focus::User,
        Focus::Password,
        Focus::Connect,
        Focus::Date,
        Focus::Studies,
        Focus::Export,
    ];

    pub fn is_text(self) -> bool {
        matches!(self, Focus::User | Focus::Password | Focus::Date)
    }

    fn index(self) -> usize {
        Self::ORDER.iter().position(|f| *f == self).unwrap_or(0)
    }
}

pub struct LogLine {
    pub time: String,
    pub severity: Severity,
    pub text: String,
}

impl LogLine {
    pub fn style(&self) -> Style {
        match self.severity {
            Severity::Info => Style::default(),
            Severity::Success => Style::default().fg(Color::Green),
            Severity::Error => Style::default().fg(Color::Red),
        }
    }
}

#[derive(Debug)]
pub enum KeyAction {
    None,
    Send(UiCommand),
    Quit,
}

pub struct UiState {
    pub server: String,
    pub focus: Focus,
    pub username: String,
    pub password: String,
    pub date: String,

    pub connected: bool,
    pub connecting: bool,
    pub searching: bool,
    pub processing: bool,

    pub studies: Vec<StudyMatch>,
    pub cursor: usize,
    /// Selected study ids, in the order they were selected.
    pub selected: Vec<String>,

    pub log: VecDeque<LogLine>,
    pub show_help: bool,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            server: String::new(),
            focus: Focus::User,
            username: String::new(),
            password: String::new(),
            date: String::new(),
            connected: false,
            connecting: false,
            searching: false,
            processing: false,
            studies: Vec::new(),
            cursor: 0,
            selected: Vec::new(),
            log: VecDeque::new(),
            show_help: false,
        }
    }
}

fn timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_default()
}

impl UiState {
    pub fn is_enabled(&self, focus: Focus) -> bool {
        match focus {
            Focus::User | Focus::Password | Focus::Connect => true,
            Focus::Date => self.connected,
            Focus::Studies => !self.studies.is_empty(),
            Focus::Export => self.can_export(),
        }
    }

    pub fn can_export(&self) -> bool {
        self.connected && !self.selected.is_empty() && !self.processing
    }

    pub fn is_selected(&self, study_id: &str) -> bool {
        self.selected.iter().any(|s| s == study_id)
    }

    pub fn push_log(&mut self, severity: Severity, text: String) {
        if self.log.len() == LOG_CAPACITY {
            self.log.pop_front();
        }
        self.log.push_back(LogLine {
            time: timestamp(),
            severity,
            text,
        });
    }

    fn focus_step(&mut self, forward: bool) {
        let n = Focus::ORDER.len();
        let mut i = self.focus.index();
        for _ in 0..n {
            i = if forward { (i + 1) % n } else { (i + n - 1) % n };
            if self.is_enabled(Focus::ORDER[i]) {
                self.focus = Focus::ORDER[i];
                return;
            }
        }
    }

    /// Move focus off a control that just became disabled.
    fn settle_focus(&mut self) {
        if !self.is_enabled(self.focus) {
            self.focus = if self.is_enabled(Focus::Date) {
                Focus::Date
            } else {
                Focus::User
            };
        }
    }

    fn clear_studies(&mut self) {
        self.studies.clear();
        self.selected.clear();
        self.cursor = 0;
    }

    pub fn apply_event(&mut self, ev: AppEvent) {
        let (severity, msg) = ev.to_message();
        self.push_log(severity, msg);

        match ev {
            AppEvent::Connecting => self.connecting = true,
            AppEvent::Connected => {
                self.connecting = false;
                self.connected = true;
                self.focus = Focus::Date;
            }
            AppEvent::ConnectFailed { .. } => {
                self.connecting = false;
                self.connected = false;
                self.clear_studies();
            }
            AppEvent::SearchStarted { .. } => {
                self.searching = true;
                self.clear_studies();
            }
            AppEvent::StudiesCleared | AppEvent::SearchFailed { .. } => {
                self.searching = false;
                self.clear_studies();
            }
            AppEvent::SearchCompleted { matches } => {
                self.searching = false;
                self.clear_studies();
                self.studies = matches;
                if !self.studies.is_empty() {
                    self.focus = Focus::Studies;
                }
            }
            AppEvent::WorkflowStarted { .. } => self.processing = true,
            AppEvent::WorkflowDone { .. } => self.processing = false,
            AppEvent::TaskCancelled { kind } => match kind {
                TaskKind::Connect => self.connecting = false,
                TaskKind::Search => self.searching = false,
                TaskKind::Workflow => self.processing = false,
            },
            _ => {}
        }
        self.settle_focus();
    }

    fn connect_command(&self) -> KeyAction {
        KeyAction::Send(UiCommand::Connect {
            username: self.username.clone(),
            password: self.password.clone(),
        })
    }

    fn toggle_current(&mut self) {
        let Some(study) = self.studies.get(self.cursor) else {
            return;
        };
        let id = study.study_id.clone();
        match self.selected.iter().position(|s| *s == id) {
            Some(pos) => {
                self.selected.remove(pos);
            }
            None => self.selected.push(id),
        }
    }

    fn toggle_all(&mut self) {
        if self.selected.len() == self.studies.len() {
            self.selected.clear();
        } else {
            self.selected = self.studies.iter().map(|s| s.study_id.clone()).collect();
        }
    }

    /// Escape cancels the most recent long-running operation.
    fn cancel_running(&self) -> KeyAction {
        let kind = if self.processing {
            TaskKind::Workflow
        } else if self.searching {
            TaskKind::Search
        } else if self.connecting {
            TaskKind::Connect
        } else {
            return KeyAction::None;
        };
        KeyAction::Send(UiCommand::Cancel(kind))
    }

    pub fn on_key(&mut self, modifiers: KeyModifiers, code: KeyCode) -> KeyAction {
        if modifiers.contains(KeyModifiers::CONTROL) && code == KeyCode::Char('c') {
            return KeyAction::Quit;
        }
        if self.show_help {
            if matches!(
                code,
                KeyCode::Esc | KeyCode::F(1) | KeyCode::Char('?') | KeyCode::Char('q')
            ) {
                self.show_help = false;
            }
            return KeyAction::None;
        }

        match code {
            KeyCode::Tab => {
                self.focus_step(true);
                return KeyAction::None;
            }
            KeyCode::BackTab => {
                self.focus_step(false);
                return KeyAction::None;
            }
            KeyCode::F(1) => {
                self.show_help = true;
                return KeyAction::None;
            }
            KeyCode::Esc => return self.cancel_running(),
            _ => {}
        }

        if self.focus.is_text() {
            return self.on_text_key(modifiers, code);
        }

        match (self.focus, code) {
            (_, KeyCode::Char('q')) => return KeyAction::Quit,
            (_, KeyCode::Char('?')) => self.show_help = true,
            (Focus::Connect, KeyCode::Enter | KeyCode::Char(' ')) => return self.connect_command(),
            (Focus::Studies, KeyCode::Up | KeyCode::Char('k')) => {
                self.cursor = self.cursor.saturating_sub(1);
            }
            (Focus::Studies, KeyCode::Down | KeyCode::Char('j')) => {
                if self.cursor + 1 < self.studies.len() {
                    self.cursor += 1;
                }
            }
            (Focus::Studies, KeyCode::Enter | KeyCode::Char(' ')) => self.toggle_current(),
            (Focus::Studies, KeyCode::Char('a')) => self.toggle_all(),
            (Focus::Export, KeyCode::Enter | KeyCode::Char(' ')) if self.can_export() => {
                return KeyAction::Send(UiCommand::Export(self.selected.clone()));
            }
            _ => {}
        }
        KeyAction::None
    }

    fn on_text_key(&mut self, modifiers: KeyModifiers, code: KeyCode) -> KeyAction {
        let field = match self.focus {
            Focus::User => &mut self.username,
            Focus::Password => &mut self.password,
            _ => &mut self.date,
        };
        match code {
            KeyCode::Char(c)
                if !c.is_control()
                    && !modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) =>
            {
                field.push(c);
            }
            KeyCode::Backspace => {
                field.pop();
            }
            KeyCode::Enter => {
                return match self.focus {
                    Focus::Date => KeyAction::Send(UiCommand::SubmitDate(self.date.clone())),
                    _ => self.connect_command(),
                };
            }
            _ => {}
        }
        KeyAction::None
    }
}
