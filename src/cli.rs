use crate::config::SessionConfig;
use crate::logging::{self, LogTarget};
use crate::model::{AppEvent, Severity, WorkflowReport};
use crate::orchestrator::{run_controller, Orchestrator, UiCommand};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "orthanc-icf",
    version,
    about = "Export Orthanc studies and hand them to the ICF utilities, with optional TUI"
)]
pub struct Cli {
    /// Configuration file to use instead of the standard search locations
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log file used while the TUI owns the terminal
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Run without the TUI, driven by the flags below
    #[arg(long)]
    pub text: bool,

    /// Orthanc username; leave username and password empty for anonymous access
    #[arg(long, default_value = "")]
    pub user: String,

    /// Orthanc password
    #[arg(long, env = "ORTHANC_PASSWORD", default_value = "", hide_env_values = true)]
    pub password: String,

    /// Study date to search (YYYYMMDD)
    #[arg(long)]
    pub date: Option<String>,

    /// Study id to process; repeat for several. Defaults to every study found
    #[arg(long = "study", value_name = "STUDY_ID")]
    pub studies: Vec<String>,

    /// Export and process the selected studies after the search
    #[arg(long)]
    pub export: bool,

    /// Print the workflow report as JSON on stdout (text mode)
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    pub fn is_interactive(&self) -> bool {
        cfg!(feature = "tui") && !self.text
    }
}

pub async fn run(args: Cli) -> Result<()> {
    if args.export && args.date.is_none() {
        anyhow::bail!("--export needs --date to find studies to export");
    }
    if args.json && !args.export {
        anyhow::bail!("--json reports a workflow run; use it together with --export");
    }

    let target = if args.is_interactive() {
        LogTarget::File(args.log_file.clone().unwrap_or_else(logging::default_log_file))
    } else {
        LogTarget::Stderr
    };
    let _log_guard = logging::init(&target)?;

    let cfg = SessionConfig::load(args.config.as_deref()).context("cannot start without configuration")?;
    tracing::info!(
        base_url = %cfg.orthanc_base_url,
        icf_image = %cfg.icf_image.display(),
        store = %cfg.store_base_dir.display(),
        "configuration loaded"
    );

    if !args.text {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args, cfg).await;
        }
        #[cfg(not(feature = "tui"))]
        {
            // Fallback when built without TUI support.
            return run_text(args, cfg).await;
        }
    }

    run_text(args, cfg).await
}

/// What the scripted session does next after an event.
#[derive(Debug)]
enum Next {
    Wait,
    Send(UiCommand),
    Finish(Result<Option<WorkflowReport>, String>),
}

/// Drives connect → search → export from the command line flags.
struct TextScript {
    date: Option<String>,
    studies: Vec<String>,
    export: bool,
}

impl TextScript {
    fn new(args: &Cli) -> Self {
        Self {
            date: args.date.clone(),
            studies: args.studies.clone(),
            export: args.export,
        }
    }

    fn on_event(&self, ev: &AppEvent) -> Next {
        match ev {
            AppEvent::Connected => match &self.date {
                Some(date) => Next::Send(UiCommand::SubmitDate(date.clone())),
                None => Next::Finish(Ok(None)),
            },
            AppEvent::ConnectFailed { error } => Next::Finish(Err(format!("connection failed: {error}"))),
            AppEvent::StudiesCleared => Next::Finish(Ok(None)),
            AppEvent::SearchCompleted { matches } => {
                if !self.export || matches.is_empty() {
                    return Next::Finish(Ok(None));
                }
                let ids = if self.studies.is_empty() {
                    matches.iter().map(|m| m.study_id.clone()).collect()
                } else {
                    self.studies.clone()
                };
                Next::Send(UiCommand::Export(ids))
            }
            AppEvent::SearchFailed { error } => Next::Finish(Err(format!("search failed: {error}"))),
            AppEvent::ExportRejected { reason } => Next::Finish(Err(format!("export not started: {reason}"))),
            AppEvent::WorkflowDone { report } => Next::Finish(Ok(Some(report.clone()))),
            _ => Next::Wait,
        }
    }
}

fn format_event(severity: Severity, msg: &str) -> String {
    match severity {
        Severity::Error => format!("error: {msg}"),
        Severity::Info | Severity::Success => msg.to_string(),
    }
}

async fn run_text(args: Cli, cfg: SessionConfig) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<AppEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    let (orch, outcomes) = Orchestrator::from_config(&cfg, event_tx);
    let controller = tokio::spawn(run_controller(orch, outcomes, cmd_rx));

    let script = TextScript::new(&args);
    let _ = cmd_tx.send(UiCommand::Connect {
        username: args.user.clone(),
        password: args.password.clone(),
    });

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let finished = loop {
        tokio::select! {
            ev = event_rx.recv() => {
                let Some(ev) = ev else {
                    break Err("controller stopped unexpectedly".to_string());
                };
                let (severity, msg) = ev.to_message();
                let _ = out_tx.send(OutputLine::Stderr(format_event(severity, &msg)));
                if let AppEvent::SearchCompleted { matches } = &ev {
                    if !args.json {
                        for m in matches {
                            let _ = out_tx.send(OutputLine::Stdout(m.label()));
                        }
                    }
                }
                match script.on_event(&ev) {
                    Next::Wait => {}
                    Next::Send(cmd) => {
                        let _ = cmd_tx.send(cmd);
                    }
                    Next::Finish(res) => break res,
                }
            }
            _ = &mut ctrl_c => {
                tracing::warn!("interrupted");
                break Err("interrupted".to_string());
            }
        }
    };

    // Quit aborts whatever is still running; child processes are killed with their task.
    let _ = cmd_tx.send(UiCommand::Quit);
    let _ = controller.await;

    let outcome = match finished {
        Ok(Some(report)) => {
            if args.json {
                let out = serde_json::to_string_pretty(&report)?;
                let _ = out_tx.send(OutputLine::Stdout(out));
            }
            match report.failed() {
                0 => Ok(()),
                n => Err(anyhow::anyhow!("{n} of {} studies finished with errors", report.studies.len())),
            }
        }
        Ok(None) => Ok(()),
        Err(e) => Err(anyhow::anyhow!(e)),
    };

    drop(out_tx);
    let _ = out_handle.await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StudyMatch;

    fn script(date: Option<&str>, studies: &[&str], export: bool) -> TextScript {
        TextScript {
            date: date.map(str::to_string),
            studies: studies.iter().map(|s| s.to_string()).collect(),
            export,
        }
    }

    fn found() -> AppEvent {
        AppEvent::SearchCompleted {
            matches: vec![StudyMatch::new("P1", "S1"), StudyMatch::new("P2", "S2")],
        }
    }

    #[test]
    fn connect_then_search_the_requested_date() {
        let next = script(Some("20240101"), &[], false).on_event(&AppEvent::Connected);
        assert!(matches!(next, Next::Send(UiCommand::SubmitDate(ref d)) if d == "20240101"));
    }

    #[test]
    fn connect_without_date_only_checks_credentials() {
        let next = script(None, &[], false).on_event(&AppEvent::Connected);
        assert!(matches!(next, Next::Finish(Ok(None))));
    }

    #[test]
    fn export_defaults_to_every_study_found() {
        let next = script(Some("d"), &[], true).on_event(&found());
        assert!(matches!(next, Next::Send(UiCommand::Export(ref ids)) if ids == &["S1", "S2"]));
    }

    #[test]
    fn explicit_studies_are_passed_through() {
        let next = script(Some("d"), &["S2"], true).on_event(&found());
        assert!(matches!(next, Next::Send(UiCommand::Export(ref ids)) if ids == &["S2"]));
    }

    #[test]
    fn listing_only_stops_after_search() {
        let next = script(Some("d"), &[], false).on_event(&found());
        assert!(matches!(next, Next::Finish(Ok(None))));
    }

    #[test]
    fn failures_end_the_session() {
        let s = script(Some("d"), &[], true);
        for ev in [
            AppEvent::ConnectFailed { error: "401".into() },
            AppEvent::SearchFailed { error: "500".into() },
            AppEvent::ExportRejected { reason: "busy".into() },
        ] {
            assert!(matches!(s.on_event(&ev), Next::Finish(Err(_))), "{ev:?}");
        }
    }

    #[test]
    fn step_events_keep_waiting() {
        let next = script(Some("d"), &[], true).on_event(&AppEvent::StudyStarted {
            study_id: "S1".into(),
        });
        assert!(matches!(next, Next::Wait));
    }

    #[test]
    fn flags_parse_into_a_scripted_session() {
        let cli = Cli::try_parse_from([
            "orthanc-icf",
            "--text",
            "--user",
            "alice",
            "--password",
            "secret",
            "--date",
            "20240101",
            "--study",
            "S1",
            "--study",
            "S2",
            "--export",
        ])
        .unwrap();
        assert_eq!(cli.password, "secret");
        assert_eq!(cli.studies, ["S1", "S2"]);
        assert!(!cli.is_interactive());
    }
}
