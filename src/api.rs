use std::path::{Path, PathBuf};

use reqwest::blocking::{multipart, Client, RequestBuilder};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::record::RawStudy;
use crate::settings::PortalSettings;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("authentication required (HTTP {0})")]
    Unauthorized(StatusCode),
    #[error("HTTP {status} for {url}: {detail}")]
    Status {
        status: StatusCode,
        url: String,
        detail: String,
    },
    #[error("{0}")]
    Rejected(String),
    #[error("request to {url} failed")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("could not decode response from {url}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not read {}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ApiError {
    /// Failures that should send the user back to sign-in.
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CurrentUser {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub doctor_name: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub center_name: Option<String>,
    #[serde(default)]
    pub institute_name: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl CurrentUser {
    /// Name shown for (and used to query) the signed-in doctor.
    pub fn display_name(&self) -> Option<&str> {
        [&self.doctor_name, &self.full_name, &self.username]
            .into_iter()
            .find_map(|name| name.as_deref().filter(|name| !name.trim().is_empty()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CenterEntry {
    pub name: String,
    #[serde(default)]
    pub id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InstituteInfo {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub institute_name: Option<String>,
    #[serde(default)]
    pub centers: Vec<CenterEntry>,
    #[serde(default)]
    pub center_count: Option<usize>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DoctorStudiesResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    images: Vec<RawStudy>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct InstituteStudiesResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    results: Vec<RawStudy>,
    #[serde(default)]
    error: Option<String>,
}

/// Patient columns of an image listing row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ImagePatient {
    #[serde(default)]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub patient_name: Option<String>,
    #[serde(default)]
    pub patient_sex: Option<String>,
    #[serde(default)]
    pub patient_birth_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ImageListResponse {
    #[serde(default)]
    results: Vec<ImagePatient>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ReceiveResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub duplicate: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Result of one `POST /api/dicom/receive/`, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveReply {
    pub status: StatusCode,
    pub body: Option<ReceiveResponse>,
}

#[derive(Debug, Clone)]
pub struct UploadFields<'a> {
    pub center_name: &'a str,
    pub patient_id: Option<&'a str>,
    pub is_emergency: bool,
}

/// Blocking client for the portal REST API. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PortalClient {
    client: Client,
    base: String,
    token: String,
}

impl PortalClient {
    pub fn new(base_url: &str, token: &str, settings: &PortalSettings) -> Result<Self, ApiError> {
        let base = crate::settings::normalize_server_url(base_url);
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout())
            .timeout(settings.request_timeout())
            .build()
            .map_err(|source| ApiError::Transport {
                url: base.clone(),
                source,
            })?;
        Ok(Self {
            client,
            base,
            token: token.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    pub fn current_user(&self) -> Result<CurrentUser, ApiError> {
        let user: CurrentUser = self.get_json("/api/current-user/", &[])?;
        if !user.success {
            return Err(ApiError::Rejected(
                user.error
                    .unwrap_or_else(|| "Failed to get current user from response".to_string()),
            ));
        }
        Ok(user)
    }

    pub fn studies_by_doctor(&self, doctor_name: &str, page: usize) -> Result<Vec<RawStudy>, ApiError> {
        let page = page.to_string();
        let response: DoctorStudiesResponse = self.get_json(
            "/api/dicom-images/by_doctor/",
            &[("doctor_name", doctor_name), ("page", page.as_str())],
        )?;
        if !response.success {
            return Err(ApiError::Rejected(
                response
                    .error
                    .unwrap_or_else(|| "Failed to fetch assigned studies".to_string()),
            ));
        }
        Ok(response.images)
    }

    pub fn institute_info(&self) -> Result<InstituteInfo, ApiError> {
        let info: InstituteInfo = self.get_json("/api/institute-info/", &[])?;
        if !info.success {
            return Err(ApiError::Rejected(
                info.error
                    .unwrap_or_else(|| "Failed to get institute info from response".to_string()),
            ));
        }
        Ok(info)
    }

    pub fn institute_studies(
        &self,
        page: usize,
        page_size: u32,
        center_name: Option<&str>,
    ) -> Result<Vec<RawStudy>, ApiError> {
        let page = page.to_string();
        let page_size = page_size.to_string();
        let mut query = vec![("page", page.as_str()), ("page_size", page_size.as_str())];
        if let Some(center) = center_name {
            query.push(("center_name", center));
        }
        let response: InstituteStudiesResponse = self.get_json("/api/institute-studies/", &query)?;
        if !response.success {
            return Err(ApiError::Rejected(
                response
                    .error
                    .unwrap_or_else(|| "Failed to fetch studies".to_string()),
            ));
        }
        Ok(response.results)
    }

    pub fn image_patients(&self, page_size: u32) -> Result<Vec<ImagePatient>, ApiError> {
        let page_size = page_size.to_string();
        let response: ImageListResponse =
            self.get_json("/api/dicom-images/", &[("page_size", page_size.as_str())])?;
        Ok(response.results)
    }

    /// Posts one DICOM file. Non-success statuses are returned, not raised,
    /// so the caller can tell duplicates from failures.
    pub fn receive_dicom(&self, path: &Path, fields: &UploadFields<'_>) -> Result<ReceiveReply, ApiError> {
        let url = self.url("/api/dicom/receive/");
        let mut form = multipart::Form::new()
            .file("dicom_file", path)
            .map_err(|source| ApiError::File {
                path: path.to_path_buf(),
                source,
            })?
            .text("center_name", fields.center_name.to_string());
        if let Some(patient_id) = fields.patient_id {
            form = form.text("patient_id", patient_id.to_string());
        }
        if fields.is_emergency {
            form = form.text("is_emergency", "true");
        }

        let response = self
            .authorized(self.client.post(&url))
            .multipart(form)
            .send()
            .map_err(|source| ApiError::Transport {
                url: url.clone(),
                source,
            })?;
        let status = response.status();
        let body = response
            .text()
            .ok()
            .and_then(|text| serde_json::from_str::<ReceiveResponse>(&text).ok());
        Ok(ReceiveReply { status, body })
    }

    /// Downloads an absolute URL (report artifacts) with the session token.
    /// Fetches a file. The token is only sent to the portal's own host.
    pub fn download(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let response = self
            .download_request(url)
            .send()
            .map_err(|source| ApiError::Transport {
                url: url.to_string(),
                source,
            })?;
        let response = check_status(response, url)?;
        response
            .bytes()
            .map(|body| body.to_vec())
            .map_err(|source| ApiError::Transport {
                url: url.to_string(),
                source,
            })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn download_request(&self, url: &str) -> RequestBuilder {
        let request = self.client.get(url);
        if self.is_portal_url(url) {
            self.authorized(request)
        } else {
            log::debug!("Downloading {url} without credentials");
            request
        }
    }

    fn is_portal_url(&self, url: &str) -> bool {
        url.strip_prefix(self.base.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(['/', '?']))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(AUTHORIZATION, format!("Token {}", self.token))
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, ApiError> {
        let url = build_url(&self.base, path, query);
        let response = self
            .authorized(self.client.get(&url))
            .header(ACCEPT, "application/json")
            .send()
            .map_err(|source| ApiError::Transport {
                url: url.clone(),
                source,
            })?;
        let response = check_status(response, &url)?;
        let text = response.text().map_err(|source| ApiError::Transport {
            url: url.clone(),
            source,
        })?;
        decode_json(&text, &url)
    }
}

fn check_status(
    response: reqwest::blocking::Response,
    url: &str,
) -> Result<reqwest::blocking::Response, ApiError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ApiError::Unauthorized(status));
    }
    if !status.is_success() {
        let detail = response
            .text()
            .unwrap_or_else(|_| String::from("unable to read error body"));
        return Err(ApiError::Status {
            status,
            url: url.to_string(),
            detail,
        });
    }
    Ok(response)
}

pub(crate) fn build_url(base: &str, path: &str, query: &[(&str, &str)]) -> String {
    let mut url = format!("{}{}", base.trim_end_matches('/'), path);
    for (index, (key, value)) in query.iter().enumerate() {
        url.push(if index == 0 { '?' } else { '&' });
        url.push_str(key);
        url.push('=');
        url.push_str(&urlencoding::encode(value));
    }
    url
}

pub(crate) fn decode_json<T: DeserializeOwned>(text: &str, url: &str) -> Result<T, ApiError> {
    serde_json::from_str(text).map_err(|source| ApiError::Decode {
        url: url.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> PortalClient {
        PortalClient::new("http://portal.local:8000/", "secret-token", &PortalSettings::default())
            .expect("client should build")
    }

    #[test]
    fn downloads_send_the_token_only_to_the_portal() {
        let client = client();
        let has_token = |url: &str| {
            client
                .download_request(url)
                .build()
                .expect("request should build")
                .headers()
                .contains_key(AUTHORIZATION)
        };
        assert!(has_token("http://portal.local:8000/media/reports/r.pdf"));
        assert!(!has_token("http://127.0.0.1:9000/reports/r.pdf"));
        assert!(!has_token("http://portal.local:8000.evil.test/reports/r.pdf"));
        assert!(!has_token("https://portal.local:8000/media/reports/r.pdf"));
    }

    #[test]
    fn query_values_are_percent_encoded() {
        let url = build_url(
            "http://portal.local/",
            "/api/dicom-images/by_doctor/",
            &[("doctor_name", "Dr. Ada Lovelace"), ("page", "2")],
        );
        assert_eq!(
            url,
            "http://portal.local/api/dicom-images/by_doctor/?doctor_name=Dr.%20Ada%20Lovelace&page=2"
        );
        assert_eq!(build_url("http://h", "/api/x/", &[]), "http://h/api/x/");
    }

    #[test]
    fn current_user_name_prefers_doctor_name() {
        let user: CurrentUser = decode_json(
            r#"{"success": true, "role": "Doctor", "doctor_name": "", "full_name": "Ada", "username": "ada"}"#,
            "test",
        )
        .expect("user should decode");
        assert_eq!(user.display_name(), Some("Ada"));
    }

    #[test]
    fn institute_info_decodes_center_objects() {
        let info: InstituteInfo = decode_json(
            r#"{"success": true, "institute_name": "City Imaging", "centers": [{"name": "North", "id": 1}, {"name": "South", "id": 2}], "center_count": 2, "username": "city"}"#,
            "test",
        )
        .expect("info should decode");
        let names = info.centers.iter().map(|c| c.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["North", "South"]);
        assert_eq!(info.center_count, Some(2));
    }

    #[test]
    fn doctor_studies_decode_with_nulls() {
        let response: DoctorStudiesResponse = decode_json(
            r#"{"success": true, "images": [{"id": 4, "patient_name": null, "is_emergency": true, "images": []}]}"#,
            "test",
        )
        .expect("studies should decode");
        assert!(response.success);
        assert_eq!(response.images.len(), 1);
        assert_eq!(response.images[0].is_emergency, Some(true));
    }

    #[test]
    fn malformed_payload_is_a_decode_error() {
        let error = decode_json::<InstituteInfo>("<html>", "http://portal.local/api/institute-info/")
            .expect_err("payload should not decode");
        assert!(matches!(error, ApiError::Decode { .. }));
        assert!(!error.is_auth());
        assert!(ApiError::Unauthorized(StatusCode::UNAUTHORIZED).is_auth());
    }
}
