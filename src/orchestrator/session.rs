use crate::model::{StudyIndex, StudyMatch};
use std::collections::HashSet;
use std::sync::Arc;

/// A study queued for processing, with the identifier captured at queue time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStudy {
    pub study_id: String,
    pub patient_id: Option<String>,
}

/// Per-session state: the authenticated client and the latest search results.
///
/// Owned by the orchestrator; tasks only ever see clones of the client handle or
/// snapshots of the index.
pub struct Session<A> {
    client: Option<Arc<A>>,
    studies: StudyIndex,
}

impl<A> Default for Session<A> {
    fn default() -> Self {
        Self {
            client: None,
            studies: StudyIndex::default(),
        }
    }
}

impl<A> Session<A> {
    pub fn is_authenticated(&self) -> bool {
        self.client.is_some()
    }

    pub fn authenticate(&mut self, client: A) {
        self.client = Some(Arc::new(client));
    }

    pub fn sign_out(&mut self) {
        self.client = None;
    }

    pub fn client(&self) -> Option<Arc<A>> {
        self.client.clone()
    }

    pub fn studies(&self) -> &StudyIndex {
        &self.studies
    }

    pub fn replace_studies(&mut self, matches: Vec<StudyMatch>) {
        self.studies = StudyIndex::from_matches(matches);
    }

    pub fn clear_studies(&mut self) {
        self.studies.clear();
    }

    /// Resolve a selection against the latest search.
    ///
    /// Keeps selection order and drops repeats. Ids the latest search did not return are
    /// handed back separately and never processed.
    pub fn plan_workflow(&self, selected: &[String]) -> (Vec<PlannedStudy>, Vec<String>) {
        let mut seen = HashSet::new();
        let mut planned = Vec::new();
        let mut unknown = Vec::new();
        for id in selected {
            if !seen.insert(id.as_str()) {
                continue;
            }
            if self.studies.contains(id) {
                planned.push(PlannedStudy {
                    study_id: id.clone(),
                    patient_id: self.studies.patient_id(id).map(str::to_string),
                });
            } else {
                unknown.push(id.clone());
            }
        }
        (planned, unknown)
    }
}
