//! In-memory stand-ins for the archive and the ICF runner.

use crate::archive::Archive;
use crate::error::{AuthenticationError, ExportError, ProcessError, QueryError};
use crate::model::StudyMatch;
use crate::pipeline::CommandRunner;
use reqwest::StatusCode;
use std::collections::{HashMap, VecDeque};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Clone, Default)]
pub(crate) struct FakeArchive {
    reject: Option<StatusCode>,
    search_status: Option<StatusCode>,
    matches: Vec<StudyMatch>,
    exports: HashMap<String, PathBuf>,
    gate: Option<Arc<Notify>>,
    pub export_calls: Arc<Mutex<Vec<String>>>,
}

impl FakeArchive {
    pub fn rejecting(mut self, status: StatusCode) -> Self {
        self.reject = Some(status);
        self
    }

    pub fn failing_search(mut self, status: StatusCode) -> Self {
        self.search_status = Some(status);
        self
    }

    pub fn with_matches(mut self, matches: Vec<StudyMatch>) -> Self {
        self.matches = matches;
        self
    }

    /// Studies not registered here fail to export with 404.
    pub fn with_export(mut self, study_id: &str, dir: PathBuf) -> Self {
        self.exports.insert(study_id.to_string(), dir);
        self
    }

    /// Every export waits for a permit on `gate` before returning.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn exported(&self) -> Vec<String> {
        self.export_calls.lock().unwrap().clone()
    }
}

impl Archive for FakeArchive {
    async fn validate_credentials(&self) -> Result<(), AuthenticationError> {
        match self.reject {
            Some(status) => Err(AuthenticationError::Rejected(status)),
            None => Ok(()),
        }
    }

    async fn search(&self, _date: &str) -> Result<Vec<StudyMatch>, QueryError> {
        match self.search_status {
            Some(status) => Err(QueryError::Status(status)),
            None => Ok(self.matches.clone()),
        }
    }

    async fn export_study(&self, study_id: &str) -> Result<PathBuf, ExportError> {
        self.export_calls.lock().unwrap().push(study_id.to_string());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.exports
            .get(study_id)
            .cloned()
            .ok_or_else(|| ExportError::Status {
                study_id: study_id.to_string(),
                status: StatusCode::NOT_FOUND,
            })
    }
}

/// Records invocations and answers with queued exit codes, then 0.
#[derive(Default)]
pub(crate) struct FakeRunner {
    codes: Mutex<VecDeque<i32>>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeRunner {
    pub fn with_codes(codes: impl IntoIterator<Item = i32>) -> Self {
        Self {
            codes: Mutex::new(codes.into_iter().collect()),
            calls: Mutex::default(),
        }
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandRunner for FakeRunner {
    async fn run(
        &self,
        _program: &Path,
        subcommand: &str,
        args: &[OsString],
    ) -> Result<(), ProcessError> {
        let args = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        self.calls
            .lock()
            .unwrap()
            .push((subcommand.to_string(), args));
        let code = self.codes.lock().unwrap().pop_front().unwrap_or(0);
        if code == 0 {
            Ok(())
        } else {
            Err(ProcessError::Failed {
                subcommand: subcommand.to_string(),
                code: Some(code),
            })
        }
    }
}

/// Lay out `<root>/<study_id>/<dicom_dir>` the way an unpacked Orthanc archive looks.
pub(crate) fn unpacked_study(root: &Path, study_id: &str, dicom_dirs: &[&str]) -> PathBuf {
    let out = root.join(study_id);
    std::fs::create_dir_all(&out).unwrap();
    for d in dicom_dirs {
        std::fs::create_dir_all(out.join(d)).unwrap();
    }
    out
}
