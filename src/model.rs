use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Study id used when a patient identifier carries no study prefix.
pub const UNKNOWN_STUDY: &str = "unknown";

/// Separates the study id from the visit id inside a DICOM PatientID.
const ID_DELIMITER: char = '_';

/// Archive server credentials. Both parts absent means anonymous access.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Build credentials from raw form input. Empty username and password mean anonymous.
    pub fn from_input(username: &str, password: &str) -> Self {
        if username.is_empty() && password.is_empty() {
            return Self::anonymous();
        }
        Self {
            username: Some(username.to_string()),
            password: Some(password.to_string()),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none() && self.password.is_none()
    }
}

// Never print the password.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// One search hit: the DICOM PatientID and the Orthanc study id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyMatch {
    pub patient_id: Option<String>,
    pub study_id: String,
}

impl StudyMatch {
    #[cfg(test)]
    pub fn new(patient_id: impl Into<String>, study_id: impl Into<String>) -> Self {
        Self {
            patient_id: Some(patient_id.into()),
            study_id: study_id.into(),
        }
    }

    /// Label shown to the operator in study lists.
    pub fn label(&self) -> String {
        match &self.patient_id {
            Some(p) => format!("{p}  ({})", self.study_id),
            None => format!("<no PatientID>  ({})", self.study_id),
        }
    }
}

/// Results of the latest search, keyed by study id.
///
/// Replaced wholesale by every search; never merged.
#[derive(Debug, Clone, Default)]
pub struct StudyIndex {
    matches: Vec<StudyMatch>,
    patient_ids: HashMap<String, Option<String>>,
}

impl StudyIndex {
    pub fn from_matches(matches: Vec<StudyMatch>) -> Self {
        let patient_ids = matches
            .iter()
            .map(|m| (m.study_id.clone(), m.patient_id.clone()))
            .collect();
        Self {
            matches,
            patient_ids,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn contains(&self, study_id: &str) -> bool {
        self.patient_ids.contains_key(study_id)
    }

    /// Patient identifier recorded for a study. `None` if the study is unknown or the
    /// server had no PatientID for it.
    pub fn patient_id(&self, study_id: &str) -> Option<&str> {
        self.patient_ids.get(study_id).and_then(|p| p.as_deref())
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

/// Study and visit identifiers derived from a DICOM PatientID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyVisitId {
    pub study: String,
    pub visit: String,
}

impl StudyVisitId {
    /// Split on the first `_`. Without a usable split the whole identifier becomes the
    /// visit id and the study id is [`UNKNOWN_STUDY`].
    pub fn parse(identifier: &str) -> Self {
        match identifier.split_once(ID_DELIMITER) {
            Some((study, visit)) if !visit.is_empty() => Self {
                study: study.to_string(),
                visit: visit.to_string(),
            },
            Some((study, _)) => Self {
                study: UNKNOWN_STUDY.to_string(),
                visit: study.to_string(),
            },
            None => Self {
                study: UNKNOWN_STUDY.to_string(),
                visit: identifier.to_string(),
            },
        }
    }
}

impl std::fmt::Display for StudyVisitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.study, self.visit)
    }
}

/// The ICF utility subcommands run for every exported study, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IcfStep {
    MakeStudyvisitArchive,
    DepositVisitMetadata,
    DepositVisitDataset,
    CatalogifyStudyvisitFromMeta,
}

impl IcfStep {
    pub const ALL: [IcfStep; 4] = [
        IcfStep::MakeStudyvisitArchive,
        IcfStep::DepositVisitMetadata,
        IcfStep::DepositVisitDataset,
        IcfStep::CatalogifyStudyvisitFromMeta,
    ];

    pub fn subcommand(self) -> &'static str {
        match self {
            IcfStep::MakeStudyvisitArchive => "make_studyvisit_archive",
            IcfStep::DepositVisitMetadata => "deposit_visit_metadata",
            IcfStep::DepositVisitDataset => "deposit_visit_dataset",
            IcfStep::CatalogifyStudyvisitFromMeta => "catalogify_studyvisit_from_meta",
        }
    }
}

/// Result of a single ICF invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    Ok,
    Failed { message: String },
}

impl StepOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, StepOutcome::Ok)
    }
}

/// What happened to one selected study during a workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyReport {
    pub study_id: String,
    pub export_dir: Option<PathBuf>,
    /// Set when the study was abandoned before the ICF steps.
    pub aborted: Option<String>,
    pub steps: Vec<(IcfStep, StepOutcome)>,
}

impl StudyReport {
    pub fn succeeded(&self) -> bool {
        self.aborted.is_none() && self.steps.iter().all(|(_, o)| o.is_ok())
    }

    pub fn failed_steps(&self) -> usize {
        self.steps.iter().filter(|(_, o)| !o.is_ok()).count()
    }
}

/// Summary of a finished workflow run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowReport {
    pub studies: Vec<StudyReport>,
}

impl WorkflowReport {
    pub fn succeeded(&self) -> usize {
        self.studies.iter().filter(|s| s.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.studies.len() - self.succeeded()
    }
}

/// Task categories; at most one task of each category runs at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    Connect,
    Search,
    Workflow,
}

/// Events emitted by the orchestrator and consumed by UI/CLI layers.
#[derive(Debug, Clone)]
pub enum AppEvent {
    Connecting,
    Connected,
    ConnectFailed {
        error: String,
    },
    SearchStarted {
        date: String,
    },
    /// The study list was emptied without running a search.
    StudiesCleared,
    SearchCompleted {
        matches: Vec<StudyMatch>,
    },
    SearchFailed {
        error: String,
    },
    WorkflowStarted {
        study_ids: Vec<String>,
    },
    ExportRejected {
        reason: String,
    },
    StudyStarted {
        study_id: String,
    },
    Exported {
        study_id: String,
        path: PathBuf,
    },
    StudyAborted {
        study_id: String,
        error: String,
    },
    StepFinished {
        study_id: String,
        step: IcfStep,
        outcome: StepOutcome,
    },
    WorkflowDone {
        report: WorkflowReport,
    },
    TaskCancelled {
        kind: TaskKind,
    },
    Info(String),
}

/// Severity used by presentation layers to colour log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Error,
}

impl AppEvent {
    /// Render a human-readable message and its severity for UI/CLI logs.
    pub fn to_message(&self) -> (Severity, String) {
        match self {
            AppEvent::Connecting => (Severity::Info, "Connecting…".into()),
            AppEvent::Connected => (Severity::Success, "Connected successfully".into()),
            AppEvent::ConnectFailed { error } => {
                (Severity::Error, format!("Connection failed: {error}"))
            }
            AppEvent::SearchStarted { date } => {
                (Severity::Info, format!("Searching studies for {date}…"))
            }
            AppEvent::StudiesCleared => (Severity::Info, "Study list cleared".into()),
            AppEvent::SearchCompleted { matches } => (
                Severity::Info,
                format!("Found {} matching stud{}", matches.len(), plural_y(matches.len())),
            ),
            AppEvent::SearchFailed { error } => (Severity::Error, format!("Search failed: {error}")),
            AppEvent::WorkflowStarted { study_ids } => (
                Severity::Info,
                format!("Processing {} stud{}", study_ids.len(), plural_y(study_ids.len())),
            ),
            AppEvent::ExportRejected { reason } => {
                (Severity::Error, format!("Export not started: {reason}"))
            }
            AppEvent::StudyStarted { study_id } => {
                (Severity::Info, format!("Processing dicom study id {study_id}"))
            }
            AppEvent::Exported { study_id, path } => (
                Severity::Info,
                format!("Exported {study_id} to {}", path.display()),
            ),
            AppEvent::StudyAborted { study_id, error } => {
                (Severity::Error, format!("Study {study_id} skipped: {error}"))
            }
            AppEvent::StepFinished {
                study_id,
                step,
                outcome,
            } => match outcome {
                StepOutcome::Ok => (
                    Severity::Success,
                    format!("(OK) {} [{study_id}]", step.subcommand()),
                ),
                StepOutcome::Failed { message } => (
                    Severity::Error,
                    format!("(ERROR) {} [{study_id}]: {message}", step.subcommand()),
                ),
            },
            AppEvent::WorkflowDone { report } => {
                let severity = if report.failed() == 0 {
                    Severity::Success
                } else {
                    Severity::Error
                };
                (
                    severity,
                    format!(
                        "DONE: {} succeeded, {} with errors",
                        report.succeeded(),
                        report.failed()
                    ),
                )
            }
            AppEvent::TaskCancelled { kind } => (Severity::Info, format!("{kind:?} cancelled")),
            AppEvent::Info(msg) => (Severity::Info, msg.clone()),
        }
    }
}

fn plural_y(n: usize) -> &'static str {
    if n == 1 {
        "y"
    } else {
        "ies"
    }
}
