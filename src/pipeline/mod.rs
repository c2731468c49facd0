//! Hand-off of exported studies to the ICF utilities.
//!
//! Each study goes through the four [`IcfStep`]s, one child process per step.

mod runner;

pub use runner::{CommandRunner, ProcessRunner};

use crate::error::ProcessError;
use crate::model::{IcfStep, StudyVisitId};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Command-line arguments for `step`, after the subcommand itself.
pub fn step_args(
    step: IcfStep,
    store_dir: &Path,
    ids: &StudyVisitId,
    dicom_dir: &Path,
) -> Vec<OsString> {
    // make_studyvisit_archive names its store flag differently from the other steps.
    let dir_flag = match step {
        IcfStep::MakeStudyvisitArchive => "--output-dir",
        _ => "--store-dir",
    };
    let mut args: Vec<OsString> = vec![
        dir_flag.into(),
        store_dir.into(),
        "--id".into(),
        ids.study.clone().into(),
        ids.visit.clone().into(),
    ];
    if step == IcfStep::MakeStudyvisitArchive {
        args.push(dicom_dir.into());
    }
    args
}

pub struct IcfPipeline<R> {
    runner: Arc<R>,
    program: PathBuf,
    store_dir: PathBuf,
}

impl<R: CommandRunner> IcfPipeline<R> {
    pub fn new(runner: Arc<R>, program: PathBuf, store_dir: PathBuf) -> Self {
        Self {
            runner,
            program,
            store_dir,
        }
    }

    pub async fn run_step(
        &self,
        step: IcfStep,
        ids: &StudyVisitId,
        dicom_dir: &Path,
    ) -> Result<(), ProcessError> {
        let args = step_args(step, &self.store_dir, ids, dicom_dir);
        self.runner
            .run(&self.program, step.subcommand(), &args)
            .await
    }
}
