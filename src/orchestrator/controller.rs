//! Session controller.
//!
//! Owns the session state and the background tasks, turns UI commands into tasks and
//! emits events for presentation layers.

use super::session::Session;
use super::tasks::{TaskRegistry, TaskTicket};
use super::workflow::run_workflow;
use crate::archive::{Archive, ArchiveClient};
use crate::config::SessionConfig;
use crate::error::{AuthenticationError, QueryError};
use crate::model::{AppEvent, Credentials, StudyMatch, TaskKind};
use crate::pipeline::{CommandRunner, IcfPipeline, ProcessRunner};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Commands emitted by UI layers.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Connect { username: String, password: String },
    SubmitDate(String),
    Export(Vec<String>),
    Cancel(TaskKind),
    Quit,
}

/// Results reported back by background tasks.
pub(crate) enum TaskOutcome<A> {
    Connected {
        ticket: TaskTicket,
        result: Result<A, AuthenticationError>,
    },
    Searched {
        ticket: TaskTicket,
        result: Result<Vec<StudyMatch>, QueryError>,
    },
    WorkflowFinished {
        ticket: TaskTicket,
    },
}

pub(crate) type OutcomeReceiver<A> = UnboundedReceiver<TaskOutcome<A>>;

/// Builds a client for a set of credentials and validates it against the server.
pub(crate) type ArchiveFactory<A> =
    Box<dyn Fn(Credentials) -> BoxFuture<'static, Result<A, AuthenticationError>> + Send + Sync>;

pub(crate) struct Orchestrator<A, R> {
    session: Session<A>,
    pipeline: Arc<IcfPipeline<R>>,
    make_archive: ArchiveFactory<A>,
    tasks: TaskRegistry,
    event_tx: UnboundedSender<AppEvent>,
    outcome_tx: UnboundedSender<TaskOutcome<A>>,
}

impl Orchestrator<ArchiveClient, ProcessRunner> {
    /// Orchestrator talking to the configured Orthanc server and ICF image.
    pub(crate) fn from_config(
        cfg: &SessionConfig,
        event_tx: UnboundedSender<AppEvent>,
    ) -> (Self, OutcomeReceiver<ArchiveClient>) {
        let base_url = cfg.orthanc_base_url.clone();
        let export_dir = cfg.export_dir.clone();
        let make_archive: ArchiveFactory<ArchiveClient> = Box::new(move |credentials| {
            let base_url = base_url.clone();
            let export_dir = export_dir.clone();
            async move { ArchiveClient::connect(&base_url, credentials, export_dir).await }.boxed()
        });
        let pipeline = IcfPipeline::new(
            Arc::new(ProcessRunner),
            cfg.icf_image.clone(),
            cfg.store_base_dir.clone(),
        );
        Self::new(make_archive, pipeline, event_tx)
    }
}

impl<A: Archive, R: CommandRunner> Orchestrator<A, R> {
    pub(crate) fn new(
        make_archive: ArchiveFactory<A>,
        pipeline: IcfPipeline<R>,
        event_tx: UnboundedSender<AppEvent>,
    ) -> (Self, OutcomeReceiver<A>) {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let orch = Self {
            session: Session::default(),
            pipeline: Arc::new(pipeline),
            make_archive,
            tasks: TaskRegistry::default(),
            event_tx,
            outcome_tx,
        };
        (orch, outcome_rx)
    }

    fn emit(&self, ev: AppEvent) {
        let _ = self.event_tx.send(ev);
    }

    pub(crate) fn handle_command(&mut self, cmd: UiCommand) {
        match cmd {
            UiCommand::Connect { username, password } => {
                self.on_connect_requested(Credentials::from_input(&username, &password))
            }
            UiCommand::SubmitDate(date) => self.on_date_submitted(&date),
            UiCommand::Export(ids) => self.on_export_requested(&ids),
            UiCommand::Cancel(kind) => self.on_cancel_requested(kind),
            UiCommand::Quit => self.tasks.cancel_all(),
        }
    }

    /// Validate `credentials` in the background. A newer request supersedes this one.
    pub(crate) fn on_connect_requested(&mut self, credentials: Credentials) {
        tracing::info!(
            user = credentials.username.as_deref().unwrap_or("<anonymous>"),
            reconnect = self.session.is_authenticated(),
            "connect requested"
        );
        let connecting = (self.make_archive)(credentials);

        self.emit(AppEvent::Connecting);
        let outcome_tx = self.outcome_tx.clone();
        let started = self.tasks.start(TaskKind::Connect, move |ticket| async move {
            let result = connecting.await;
            let _ = outcome_tx.send(TaskOutcome::Connected { ticket, result });
        });
        if let Err(e) = started {
            self.emit(AppEvent::ConnectFailed {
                error: e.to_string(),
            });
        }
    }

    /// Clear the study list and, for a non-blank date, search it again.
    pub(crate) fn on_date_submitted(&mut self, date: &str) {
        let date = date.trim().to_string();
        self.session.clear_studies();

        if date.is_empty() {
            // Orthanc would treat an empty StudyDate as "any date".
            self.tasks.cancel(TaskKind::Search);
            self.emit(AppEvent::StudiesCleared);
            return;
        }
        let Some(client) = self.session.client() else {
            self.emit(AppEvent::SearchFailed {
                error: "not connected".into(),
            });
            return;
        };

        tracing::info!(%date, "search requested");
        self.emit(AppEvent::SearchStarted { date: date.clone() });
        let outcome_tx = self.outcome_tx.clone();
        let started = self.tasks.start(TaskKind::Search, move |ticket| async move {
            let result = client.search(&date).await;
            let _ = outcome_tx.send(TaskOutcome::Searched { ticket, result });
        });
        if let Err(e) = started {
            self.emit(AppEvent::SearchFailed {
                error: e.to_string(),
            });
        }
    }

    /// Start processing the selected studies, unless a workflow is already running.
    pub(crate) fn on_export_requested(&mut self, selected: &[String]) {
        if self.tasks.is_running(TaskKind::Workflow) {
            self.emit(AppEvent::ExportRejected {
                reason: "a workflow is already running".into(),
            });
            return;
        }
        let Some(client) = self.session.client() else {
            self.emit(AppEvent::ExportRejected {
                reason: "not connected".into(),
            });
            return;
        };

        tracing::info!(
            selected = selected.len(),
            listed = self.session.studies().len(),
            "export requested"
        );
        let (plan, unknown) = self.session.plan_workflow(selected);
        for id in unknown {
            tracing::warn!(study_id = %id, "selected study is not in the current search results");
            self.emit(AppEvent::Info(format!(
                "Ignoring study {id}: not in the current search results"
            )));
        }
        if plan.is_empty() {
            self.emit(AppEvent::ExportRejected {
                reason: "no studies selected".into(),
            });
            return;
        }

        // Announce before spawning so the first study event cannot overtake it.
        self.emit(AppEvent::WorkflowStarted {
            study_ids: plan.iter().map(|p| p.study_id.clone()).collect(),
        });
        let pipeline = self.pipeline.clone();
        let event_tx = self.event_tx.clone();
        let outcome_tx = self.outcome_tx.clone();
        let started = self.tasks.start(TaskKind::Workflow, move |ticket| async move {
            let report = run_workflow(&*client, &*pipeline, plan, &event_tx).await;
            let _ = event_tx.send(AppEvent::WorkflowDone { report });
            let _ = outcome_tx.send(TaskOutcome::WorkflowFinished { ticket });
        });
        if let Err(e) = started {
            self.emit(AppEvent::ExportRejected {
                reason: e.to_string(),
            });
        }
    }

    pub(crate) fn on_cancel_requested(&mut self, kind: TaskKind) {
        if self.tasks.cancel(kind) {
            tracing::info!(?kind, "task cancelled");
            self.emit(AppEvent::TaskCancelled { kind });
        }
    }

    pub(crate) fn handle_outcome(&mut self, outcome: TaskOutcome<A>) {
        match outcome {
            TaskOutcome::Connected { ticket, result } => {
                if !self.tasks.finish(ticket) {
                    return;
                }
                match result {
                    Ok(archive) => {
                        self.session.authenticate(archive);
                        self.emit(AppEvent::Connected);
                    }
                    Err(e) => {
                        self.session.sign_out();
                        self.emit(AppEvent::ConnectFailed {
                            error: e.to_string(),
                        });
                    }
                }
            }
            TaskOutcome::Searched { ticket, result } => {
                if !self.tasks.finish(ticket) {
                    tracing::debug!("discarding superseded search result");
                    return;
                }
                match result {
                    Ok(matches) => {
                        self.session.replace_studies(matches.clone());
                        if self.session.studies().is_empty() {
                            tracing::info!("search matched no studies");
                        }
                        self.emit(AppEvent::SearchCompleted { matches });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "search failed");
                        self.session.clear_studies();
                        self.emit(AppEvent::SearchFailed {
                            error: e.to_string(),
                        });
                    }
                }
            }
            TaskOutcome::WorkflowFinished { ticket } => {
                self.tasks.finish(ticket);
            }
        }
    }
}

/// Route UI commands and task outcomes to the orchestrator until the UI quits.
pub(crate) async fn run_controller<A: Archive, R: CommandRunner>(
    mut orch: Orchestrator<A, R>,
    mut outcome_rx: OutcomeReceiver<A>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) {
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(UiCommand::Quit) | None => break,
                Some(cmd) => orch.handle_command(cmd),
            },
            // The orchestrator holds a sender, so this never yields None while we loop.
            Some(outcome) = outcome_rx.recv() => orch.handle_outcome(outcome),
        }
    }
    orch.handle_command(UiCommand::Quit);
}
