use super::session::PlannedStudy;
use crate::archive::{find_dicom_dir, Archive};
use crate::model::{AppEvent, IcfStep, StepOutcome, StudyReport, StudyVisitId, WorkflowReport};
use crate::pipeline::{CommandRunner, IcfPipeline};
use tokio::sync::mpsc;
use tracing::Instrument;

/// Export and process each planned study in order.
///
/// A study that fails to export, unpack or resolve its identifier is skipped; the next one
/// still runs. Once a study reaches the ICF steps all four are attempted regardless of
/// earlier step failures.
pub async fn run_workflow<A: Archive, R: CommandRunner>(
    archive: &A,
    pipeline: &IcfPipeline<R>,
    plan: Vec<PlannedStudy>,
    event_tx: &mpsc::UnboundedSender<AppEvent>,
) -> WorkflowReport {
    let mut report = WorkflowReport::default();
    for study in plan {
        let span = tracing::info_span!("study", study_id = %study.study_id);
        let study_report = process_study(archive, pipeline, study, event_tx)
            .instrument(span)
            .await;
        report.studies.push(study_report);
    }
    tracing::info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        "workflow finished"
    );
    report
}

async fn process_study<A: Archive, R: CommandRunner>(
    archive: &A,
    pipeline: &IcfPipeline<R>,
    study: PlannedStudy,
    event_tx: &mpsc::UnboundedSender<AppEvent>,
) -> StudyReport {
    let PlannedStudy {
        study_id,
        patient_id,
    } = study;
    let _ = event_tx.send(AppEvent::StudyStarted {
        study_id: study_id.clone(),
    });
    let mut report = StudyReport {
        study_id: study_id.clone(),
        export_dir: None,
        aborted: None,
        steps: Vec::with_capacity(IcfStep::ALL.len()),
    };

    let export_dir = match archive.export_study(&study_id).await {
        Ok(dir) => dir,
        Err(e) => return abort(report, e.to_string(), event_tx),
    };
    report.export_dir = Some(export_dir.clone());
    let _ = event_tx.send(AppEvent::Exported {
        study_id: study_id.clone(),
        path: export_dir.clone(),
    });

    let dicom_dir = match find_dicom_dir(&export_dir).await {
        Ok(dir) => dir,
        Err(e) => return abort(report, e.to_string(), event_tx),
    };
    let ids = match patient_id {
        Some(p) => StudyVisitId::parse(&p),
        None => return abort(report, "no PatientID recorded for this study".into(), event_tx),
    };
    tracing::debug!(%ids, dicom_dir = %dicom_dir.display(), "running ICF steps");

    for step in IcfStep::ALL {
        let outcome = match pipeline.run_step(step, &ids, &dicom_dir).await {
            Ok(()) => StepOutcome::Ok,
            Err(e) => StepOutcome::Failed {
                message: e.to_string(),
            },
        };
        let _ = event_tx.send(AppEvent::StepFinished {
            study_id: study_id.clone(),
            step,
            outcome: outcome.clone(),
        });
        report.steps.push((step, outcome));
    }
    tracing::info!(failed_steps = report.failed_steps(), "study processed");
    report
}

fn abort(
    mut report: StudyReport,
    error: String,
    event_tx: &mpsc::UnboundedSender<AppEvent>,
) -> StudyReport {
    tracing::warn!(study_id = %report.study_id, %error, "study skipped");
    let _ = event_tx.send(AppEvent::StudyAborted {
        study_id: report.study_id.clone(),
        error: error.clone(),
    });
    report.aborted = Some(error);
    report
}
