use anyhow::{bail, Result};

use crate::record::StudyRecord;

pub const NO_DICOM_FILE: &str = "No DICOM file available";

/// What the external viewer should open for a study.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerTarget {
    Study(String),
    /// Media-relative file name, e.g. `dicom_files/abc.dcm`.
    File(String),
}

impl ViewerTarget {
    /// Prefers the study UID and falls back to the stored DICOM file.
    pub fn for_record(record: &StudyRecord, base_url: &str) -> Result<Self> {
        if let Some(uid) = record
            .study_uid
            .as_deref()
            .map(str::trim)
            .filter(|uid| !uid.is_empty() && *uid != "undefined")
        {
            return Ok(ViewerTarget::Study(uid.to_string()));
        }
        match record.dicom_file_url.as_deref() {
            Some(url) if !url.trim().is_empty() => {
                Ok(ViewerTarget::File(viewer_file_name(url, base_url)))
            }
            _ => bail!(NO_DICOM_FILE),
        }
    }

    pub fn url(&self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        match self {
            ViewerTarget::Study(uid) => {
                format!("{base}/static/viewer.html?study={}", urlencoding::encode(uid))
            }
            ViewerTarget::File(name) => {
                let dicom_path = format!("/dicom/{name}/");
                format!(
                    "{base}/static/viewer.html?file={}",
                    urlencoding::encode(&dicom_path)
                )
            }
        }
    }
}

/// Derives the path the viewer's `/dicom/` route expects from a file URL.
pub fn viewer_file_name(file_url: &str, base_url: &str) -> String {
    let clean = file_url.split('?').next().unwrap_or_default();
    if let Some((_, rest)) = clean.split_once("/media/") {
        return rest.to_string();
    }
    if let Some((_, rest)) = clean.split_once("/dicom_files/") {
        return format!("dicom_files/{rest}");
    }
    let prefix = format!("{}/", base_url.trim_end_matches('/'));
    clean.replacen(&prefix, "", 1)
}
