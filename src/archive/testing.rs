//! In-process stand-in for the Orthanc REST API, used by tests.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::io::Write;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub(crate) struct MockStudy {
    id: String,
    patient_id: Option<String>,
    detail_status: StatusCode,
    archive: Option<Vec<u8>>,
}

impl MockStudy {
    pub(crate) fn new(id: &str, patient_id: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            patient_id: patient_id.map(str::to_string),
            detail_status: StatusCode::OK,
            archive: None,
        }
    }

    pub(crate) fn detail_status(mut self, status: StatusCode) -> Self {
        self.detail_status = status;
        self
    }

    pub(crate) fn archive(mut self, bytes: Vec<u8>) -> Self {
        self.archive = Some(bytes);
        self
    }
}

struct MockState {
    system_status: StatusCode,
    find_status: StatusCode,
    studies: Vec<MockStudy>,
    auth_headers: Mutex<Vec<Option<String>>>,
    find_bodies: Mutex<Vec<serde_json::Value>>,
}

impl MockState {
    fn record_auth(&self, headers: &HeaderMap) {
        let auth = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.auth_headers.lock().unwrap().push(auth);
    }

    fn study(&self, id: &str) -> Option<&MockStudy> {
        self.studies.iter().find(|s| s.id == id)
    }
}

pub(crate) struct MockOrthancBuilder {
    system_status: StatusCode,
    find_status: StatusCode,
    studies: Vec<MockStudy>,
}

impl MockOrthancBuilder {
    pub(crate) fn system_status(mut self, status: StatusCode) -> Self {
        self.system_status = status;
        self
    }

    pub(crate) fn find_status(mut self, status: StatusCode) -> Self {
        self.find_status = status;
        self
    }

    pub(crate) fn study(mut self, study: MockStudy) -> Self {
        self.studies.push(study);
        self
    }

    pub(crate) async fn spawn(self) -> MockOrthanc {
        let state = Arc::new(MockState {
            system_status: self.system_status,
            find_status: self.find_status,
            studies: self.studies,
            auth_headers: Mutex::new(Vec::new()),
            find_bodies: Mutex::new(Vec::new()),
        });
        let app = Router::new()
            .route("/system", get(system))
            .route("/tools/find", post(find))
            .route("/studies/:id", get(study_details))
            .route("/studies/:id/archive", get(study_archive))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        MockOrthanc {
            base_url: format!("http://{addr}"),
            state,
        }
    }
}

pub(crate) struct MockOrthanc {
    pub(crate) base_url: String,
    state: Arc<MockState>,
}

impl MockOrthanc {
    pub(crate) fn builder() -> MockOrthancBuilder {
        MockOrthancBuilder {
            system_status: StatusCode::OK,
            find_status: StatusCode::OK,
            studies: Vec::new(),
        }
    }

    /// `Authorization` header of every request received, in order.
    pub(crate) fn auth_headers(&self) -> Vec<Option<String>> {
        self.state.auth_headers.lock().unwrap().clone()
    }

    pub(crate) fn find_bodies(&self) -> Vec<serde_json::Value> {
        self.state.find_bodies.lock().unwrap().clone()
    }
}

async fn system(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    state.record_auth(&headers);
    (
        state.system_status,
        Json(serde_json::json!({"Name": "MockOrthanc", "Version": "1.12.0"})),
    )
        .into_response()
}

async fn find(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    state.record_auth(&headers);
    state.find_bodies.lock().unwrap().push(body);
    if !state.find_status.is_success() {
        return state.find_status.into_response();
    }
    let ids: Vec<String> = state.studies.iter().map(|s| s.id.clone()).collect();
    Json(ids).into_response()
}

async fn study_details(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    state.record_auth(&headers);
    let Some(study) = state.study(&id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if !study.detail_status.is_success() {
        return study.detail_status.into_response();
    }
    let mut tags = serde_json::Map::new();
    if let Some(p) = &study.patient_id {
        tags.insert("PatientID".into(), serde_json::Value::String(p.clone()));
    }
    Json(serde_json::json!({
        "ID": study.id,
        "PatientMainDicomTags": tags,
        "MainDicomTags": {"StudyDate": "20240101"},
    }))
    .into_response()
}

async fn study_archive(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    state.record_auth(&headers);
    match state.study(&id).and_then(|s| s.archive.clone()) {
        Some(bytes) => (
            [(header::CONTENT_TYPE, "application/zip")],
            Body::from(bytes),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Build an in-memory zip. Names ending in `/` become directory entries.
pub(crate) fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, data) in entries {
        let options = zip::write::SimpleFileOptions::default();
        if name.ends_with('/') {
            writer.add_directory(*name, options).unwrap();
        } else {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data.as_bytes()).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}
