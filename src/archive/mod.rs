//! Orthanc archive server client.
//!
//! Validates credentials, searches studies by date and exports study archives to disk.

mod unpack;

#[cfg(test)]
pub(crate) mod testing;

pub use unpack::find_dicom_dir;

use crate::error::{AuthenticationError, ExportError, QueryError};
use crate::model::{Credentials, StudyMatch};
use bytes::Bytes;
use futures::StreamExt;
use reqwest::{Method, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

/// Archive operations the workflow depends on.
pub trait Archive: Send + Sync + 'static {
    fn validate_credentials(&self) -> impl Future<Output = Result<(), AuthenticationError>> + Send;

    fn search(&self, date: &str) -> impl Future<Output = Result<Vec<StudyMatch>, QueryError>> + Send;

    fn export_study(&self, study_id: &str) -> impl Future<Output = Result<PathBuf, ExportError>> + Send;
}

/// Body of `POST /tools/find`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct FindRequest<'a> {
    level: &'static str,
    query: FindQuery<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct FindQuery<'a> {
    study_date: &'a str,
}

/// The part of `GET /studies/{id}` we read.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StudyDetails {
    #[serde(default)]
    patient_main_dicom_tags: PatientTags,
}

#[derive(Debug, Default, Deserialize)]
struct PatientTags {
    #[serde(rename = "PatientID")]
    patient_id: Option<String>,
}

#[derive(Clone)]
pub struct ArchiveClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    export_dir: PathBuf,
}

impl ArchiveClient {
    pub fn new(
        base_url: &str,
        credentials: Credentials,
        export_dir: PathBuf,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(format!("orthanc-icf/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            export_dir,
        })
    }

    /// Build a client and check its credentials against the server.
    pub async fn connect(
        base_url: &str,
        credentials: Credentials,
        export_dir: PathBuf,
    ) -> Result<Self, AuthenticationError> {
        let client =
            Self::new(base_url, credentials, export_dir).map_err(AuthenticationError::Client)?;
        client.validate_credentials().await?;
        Ok(client)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let rb = self.http.request(method, format!("{}{}", self.base_url, path));
        if self.credentials.is_anonymous() {
            return rb;
        }
        rb.basic_auth(
            self.credentials.username.clone().unwrap_or_default(),
            self.credentials.password.clone(),
        )
    }

    /// Find studies acquired on `date`, then look up each study's PatientID.
    ///
    /// Any failed request fails the whole search; no partial result is returned.
    pub async fn search(&self, date: &str) -> Result<Vec<StudyMatch>, QueryError> {
        let body = FindRequest {
            level: "Study",
            query: FindQuery { study_date: date },
        };
        let resp = self
            .request(Method::POST, "/tools/find")
            .json(&body)
            .send()
            .await
            .map_err(QueryError::Request)?;
        if !resp.status().is_success() {
            return Err(QueryError::Status(resp.status()));
        }
        let study_ids: Vec<String> = resp.json().await.map_err(QueryError::Decode)?;
        tracing::debug!(date, count = study_ids.len(), "find returned studies");

        let mut matches = Vec::with_capacity(study_ids.len());
        for study_id in study_ids {
            let patient_id = self.fetch_patient_id(&study_id).await?;
            matches.push(StudyMatch {
                patient_id,
                study_id,
            });
        }
        Ok(matches)
    }

    async fn fetch_patient_id(&self, study_id: &str) -> Result<Option<String>, QueryError> {
        let detail_err = |reason: String| QueryError::Detail {
            study_id: study_id.to_string(),
            reason,
        };
        let resp = self
            .request(Method::GET, &format!("/studies/{study_id}"))
            .send()
            .await
            .map_err(|e| detail_err(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(detail_err(resp.status().to_string()));
        }
        let details: StudyDetails = resp.json().await.map_err(|e| detail_err(e.to_string()))?;
        Ok(details.patient_main_dicom_tags.patient_id)
    }

    /// Download `/studies/{id}/archive` in chunks, unpack it next to the zip and remove
    /// the zip. Returns the unpacked directory.
    ///
    /// On failure, partially written files are left where they are.
    pub async fn export_study(&self, study_id: &str) -> Result<PathBuf, ExportError> {
        let resp = self
            .request(Method::GET, &format!("/studies/{study_id}/archive"))
            .send()
            .await
            .map_err(|source| ExportError::Request {
                study_id: study_id.to_string(),
                source,
            })?;
        if !resp.status().is_success() {
            return Err(ExportError::Status {
                study_id: study_id.to_string(),
                status: resp.status(),
            });
        }

        tokio::fs::create_dir_all(&self.export_dir)
            .await
            .map_err(|e| ExportError::io(&self.export_dir, e))?;
        let zip_path = self.export_dir.join(format!("{study_id}.zip"));
        let out_path = self.export_dir.join(study_id);

        let mut file = tokio::fs::File::create(&zip_path)
            .await
            .map_err(|e| ExportError::io(&zip_path, e))?;
        let mut written = 0u64;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk: Bytes = chunk.map_err(|source| ExportError::Request {
                study_id: study_id.to_string(),
                source,
            })?;
            file.write_all(&chunk)
                .await
                .map_err(|e| ExportError::io(&zip_path, e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| ExportError::io(&zip_path, e))?;
        drop(file);
        tracing::debug!(study_id, bytes = written, path = %zip_path.display(), "archive downloaded");

        unpack::unpack_archive(zip_path.clone(), out_path.clone()).await?;
        tokio::fs::remove_file(&zip_path)
            .await
            .map_err(|e| ExportError::io(&zip_path, e))?;

        tracing::info!(study_id, path = %out_path.display(), "study exported");
        Ok(out_path)
    }
}

impl Archive for ArchiveClient {
    /// There is no login endpoint, so probe the cheap `/system` call instead.
    async fn validate_credentials(&self) -> Result<(), AuthenticationError> {
        let resp = self
            .request(Method::GET, "/system")
            .send()
            .await
            .map_err(AuthenticationError::Unreachable)?;
        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(%status, "credential probe rejected");
            return Err(AuthenticationError::Rejected(status));
        }
        tracing::info!(
            base_url = %self.base_url,
            anonymous = self.credentials.is_anonymous(),
            "credentials accepted"
        );
        Ok(())
    }

    async fn search(&self, date: &str) -> Result<Vec<StudyMatch>, QueryError> {
        ArchiveClient::search(self, date).await
    }

    async fn export_study(&self, study_id: &str) -> Result<PathBuf, ExportError> {
        ArchiveClient::export_study(self, study_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{zip_bytes, MockOrthanc, MockStudy};
    use super::*;
    use reqwest::StatusCode;

    fn client(server: &MockOrthanc, creds: Credentials, export_dir: PathBuf) -> ArchiveClient {
        ArchiveClient::new(&server.base_url, creds, export_dir).unwrap()
    }

    #[tokio::test]
    async fn anonymous_validation_sends_no_authorization() {
        let server = MockOrthanc::builder().spawn().await;
        let dir = tempfile::tempdir().unwrap();
        let c = client(&server, Credentials::from_input("", ""), dir.path().into());

        c.validate_credentials().await.unwrap();
        assert_eq!(server.auth_headers(), vec![None]);
    }

    #[tokio::test]
    async fn any_success_status_accepts_anonymous_access() {
        let server = MockOrthanc::builder()
            .system_status(StatusCode::NO_CONTENT)
            .spawn()
            .await;
        let dir = tempfile::tempdir().unwrap();
        let c = client(&server, Credentials::anonymous(), dir.path().into());

        c.validate_credentials().await.unwrap();
        assert_eq!(server.auth_headers(), vec![None]);
    }

    #[tokio::test]
    async fn credentials_are_sent_on_every_call() {
        let server = MockOrthanc::builder()
            .study(MockStudy::new("S1", Some("P1")))
            .spawn()
            .await;
        let dir = tempfile::tempdir().unwrap();
        let c = ArchiveClient::connect(
            &server.base_url,
            Credentials::from_input("alice", "secret"),
            dir.path().into(),
        )
        .await
        .unwrap();
        c.search("20240101").await.unwrap();

        let expected = Some("Basic YWxpY2U6c2VjcmV0".to_string());
        assert_eq!(server.auth_headers(), vec![expected.clone(); 3]);
    }

    #[tokio::test]
    async fn rejected_validation_carries_the_status() {
        let server = MockOrthanc::builder()
            .system_status(StatusCode::UNAUTHORIZED)
            .spawn()
            .await;
        let dir = tempfile::tempdir().unwrap();
        let c = client(&server, Credentials::from_input("bob", "wrong"), dir.path().into());

        let err = c.validate_credentials().await.unwrap_err();
        assert!(matches!(err, AuthenticationError::Rejected(StatusCode::UNAUTHORIZED)));
    }

    #[tokio::test]
    async fn unreachable_server_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        // Port 9 (discard) on localhost is not expected to run an HTTP server.
        let c = ArchiveClient::new("http://127.0.0.1:9", Credentials::anonymous(), dir.path().into())
            .unwrap();
        let err = c.validate_credentials().await.unwrap_err();
        assert!(matches!(err, AuthenticationError::Unreachable(_)));
    }

    #[tokio::test]
    async fn search_keeps_server_order_and_patient_ids() {
        let server = MockOrthanc::builder()
            .study(MockStudy::new("S2", Some("P2")))
            .study(MockStudy::new("S1", Some("P1")))
            .study(MockStudy::new("S3", None))
            .spawn()
            .await;
        let dir = tempfile::tempdir().unwrap();
        let c = client(&server, Credentials::anonymous(), dir.path().into());

        let matches = c.search("20240101").await.unwrap();
        assert_eq!(
            matches,
            vec![
                StudyMatch::new("P2", "S2"),
                StudyMatch::new("P1", "S1"),
                StudyMatch {
                    patient_id: None,
                    study_id: "S3".into()
                },
            ]
        );
        assert_eq!(
            server.find_bodies(),
            vec![serde_json::json!({"Level": "Study", "Query": {"StudyDate": "20240101"}})]
        );
    }

    #[tokio::test]
    async fn failed_detail_fetch_aborts_the_search() {
        let server = MockOrthanc::builder()
            .study(MockStudy::new("S1", Some("P1")))
            .study(MockStudy::new("S2", Some("P2")).detail_status(StatusCode::INTERNAL_SERVER_ERROR))
            .spawn()
            .await;
        let dir = tempfile::tempdir().unwrap();
        let c = client(&server, Credentials::anonymous(), dir.path().into());

        let err = c.search("20240101").await.unwrap_err();
        assert!(matches!(err, QueryError::Detail { ref study_id, .. } if study_id == "S2"));
    }

    #[tokio::test]
    async fn failed_find_is_a_query_error() {
        let server = MockOrthanc::builder()
            .find_status(StatusCode::BAD_REQUEST)
            .spawn()
            .await;
        let dir = tempfile::tempdir().unwrap();
        let c = client(&server, Credentials::anonymous(), dir.path().into());

        let err = c.search("garbage").await.unwrap_err();
        assert!(matches!(err, QueryError::Status(StatusCode::BAD_REQUEST)));
    }

    #[tokio::test]
    async fn export_unpacks_and_removes_the_zip() {
        let archive = zip_bytes(&[
            ("P1 Doe^John/", ""),
            ("P1 Doe^John/IMG0001.dcm", "DICM-1"),
            ("P1 Doe^John/IMG0002.dcm", "DICM-2"),
        ]);
        let server = MockOrthanc::builder()
            .study(MockStudy::new("S1", Some("P1")).archive(archive))
            .spawn()
            .await;
        let dir = tempfile::tempdir().unwrap();
        let c = client(&server, Credentials::anonymous(), dir.path().into());

        let out = c.export_study("S1").await.unwrap();
        assert_eq!(out, dir.path().join("S1"));
        assert!(!dir.path().join("S1.zip").exists());

        let dicom_dir = find_dicom_dir(&out).await.unwrap();
        assert_eq!(dicom_dir, out.join("P1 Doe^John"));
        assert_eq!(
            std::fs::read(dicom_dir.join("IMG0002.dcm")).unwrap(),
            b"DICM-2".to_vec()
        );
    }

    #[tokio::test]
    async fn export_of_missing_study_fails_with_status() {
        let server = MockOrthanc::builder().spawn().await;
        let dir = tempfile::tempdir().unwrap();
        let c = client(&server, Credentials::anonymous(), dir.path().into());

        let err = c.export_study("nope").await.unwrap_err();
        assert!(matches!(
            err,
            ExportError::Status { status: StatusCode::NOT_FOUND, .. }
        ));
    }

    #[tokio::test]
    async fn corrupt_archive_fails_and_leaves_the_zip_behind() {
        let server = MockOrthanc::builder()
            .study(MockStudy::new("S1", Some("P1")).archive(b"not a zip".to_vec()))
            .spawn()
            .await;
        let dir = tempfile::tempdir().unwrap();
        let c = client(&server, Credentials::anonymous(), dir.path().into());

        let err = c.export_study("S1").await.unwrap_err();
        assert!(matches!(err, ExportError::Unpack { .. }));
        assert!(dir.path().join("S1.zip").exists());
    }
}
