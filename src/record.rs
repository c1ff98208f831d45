use std::fmt;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;

pub const UNKNOWN_PATIENT: &str = "Unknown";
pub const DEFAULT_CENTER: &str = "Default";
pub const UNKNOWN_INSTITUTE: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StudyStatus {
    NotAssigned,
    Unreported,
    Draft,
    Reviewed,
    Reported,
}

impl StudyStatus {
    pub const ALL: [StudyStatus; 5] = [
        StudyStatus::NotAssigned,
        StudyStatus::Unreported,
        StudyStatus::Draft,
        StudyStatus::Reviewed,
        StudyStatus::Reported,
    ];

    pub fn label(self) -> &'static str {
        match self {
            StudyStatus::NotAssigned => "Not Assigned",
            StudyStatus::Unreported => "Unreported",
            StudyStatus::Draft => "Draft",
            StudyStatus::Reviewed => "Reviewed",
            StudyStatus::Reported => "Reported",
        }
    }

    /// Exact, case-sensitive match against the server labels.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.label() == value)
    }
}

impl fmt::Display for StudyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A preview image reference as the API sends it: either a bare URL or an
/// object carrying `thumbnail_url` / `url`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ImageRef {
    Url(String),
    Object {
        #[serde(default)]
        thumbnail_url: Option<String>,
        #[serde(default)]
        url: Option<String>,
    },
}

impl ImageRef {
    pub fn href(&self) -> &str {
        match self {
            ImageRef::Url(url) => url,
            ImageRef::Object { thumbnail_url, url } => thumbnail_url
                .as_deref()
                .filter(|value| !value.is_empty())
                .or(url.as_deref().filter(|value| !value.is_empty()))
                .unwrap_or("#"),
        }
    }
}

/// Study payload as returned by the study listing endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStudy {
    pub id: i64,
    #[serde(default)]
    pub patient_name: Option<String>,
    #[serde(default)]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub patient_birth_date: Option<String>,
    #[serde(default)]
    pub patient_sex: Option<String>,
    #[serde(default)]
    pub series_description: Option<String>,
    #[serde(default)]
    pub modality: Option<String>,
    #[serde(default)]
    pub center_name: Option<String>,
    #[serde(default)]
    pub institute_name: Option<String>,
    #[serde(default)]
    pub study_date: Option<String>,
    #[serde(default)]
    pub study_time: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub is_emergency: Option<bool>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub reported_by: Option<String>,
    #[serde(default)]
    pub assigned_doctors: Option<String>,
    #[serde(default)]
    pub study_instance_uid: Option<String>,
    #[serde(default)]
    pub study_uid: Option<String>,
    #[serde(default, rename = "StudyInstanceUID")]
    pub study_instance_uid_tag: Option<String>,
    #[serde(default)]
    pub report_file: Option<String>,
    #[serde(default)]
    pub images: Option<Vec<ImageRef>>,
    #[serde(default)]
    pub image_urls: Option<Vec<ImageRef>>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

/// When a study was acquired. Date-only values compare as midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanTime {
    At(NaiveDateTime),
    Day(NaiveDate),
}

impl ScanTime {
    pub fn as_datetime(self) -> NaiveDateTime {
        match self {
            ScanTime::At(at) => at,
            ScanTime::Day(day) => day.and_time(NaiveTime::MIN),
        }
    }
}

impl fmt::Display for ScanTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanTime::At(at) => write!(f, "{}", at.format("%Y-%m-%d %H:%M:%S")),
            ScanTime::Day(day) => write!(f, "{}", day.format("%Y-%m-%d")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudyRecord {
    pub id: i64,
    pub patient_name: String,
    pub patient_id: String,
    pub age: i32,
    pub sex: String,
    pub body_part: String,
    pub modality: String,
    pub center: String,
    pub institute_name: String,
    pub scanned_at: Option<ScanTime>,
    pub status: StudyStatus,
    pub is_emergency: bool,
    pub study_uid: Option<String>,
    pub report_url: Option<String>,
    pub dicom_file_url: Option<String>,
    pub reported_by: String,
    pub assigned_doctors: String,
    pub image_refs: Vec<ImageRef>,
    pub thumbnail_url: Option<String>,
}

impl StudyRecord {
    pub fn scan_display(&self) -> String {
        self.scanned_at.map(|at| at.to_string()).unwrap_or_default()
    }
}

/// Per-view inputs that shape normalization.
#[derive(Debug, Clone)]
pub struct NormalizeContext {
    pub base_url: String,
    pub default_status: StudyStatus,
    /// Institute name used when the payload carries none.
    pub fallback_institute: Option<String>,
    pub today: NaiveDate,
}

impl NormalizeContext {
    pub fn new(base_url: &str, default_status: StudyStatus) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            default_status,
            fallback_institute: None,
            today: chrono::Local::now().date_naive(),
        }
    }

    pub fn with_fallback_institute(mut self, institute: impl Into<String>) -> Self {
        self.fallback_institute = Some(institute.into());
        self
    }
}

pub fn normalize_studies(raw: Vec<RawStudy>, ctx: &NormalizeContext) -> Vec<StudyRecord> {
    raw.into_iter().map(|study| normalize_study(study, ctx)).collect()
}

pub fn normalize_study(raw: RawStudy, ctx: &NormalizeContext) -> StudyRecord {
    let center = non_empty(raw.center_name.clone());
    let institute_name = non_empty(raw.institute_name)
        .or_else(|| ctx.fallback_institute.clone().filter(|name| !name.is_empty()))
        .or_else(|| center.clone())
        .unwrap_or_else(|| UNKNOWN_INSTITUTE.to_string());

    let age = raw
        .patient_birth_date
        .as_deref()
        .and_then(parse_study_date)
        .map(|birth| ctx.today.year() - birth.year())
        .unwrap_or(0);

    let scanned_at = raw.study_date.as_deref().and_then(parse_study_date).map(|day| {
        match raw.study_time.as_deref().and_then(parse_study_time) {
            Some(time) => ScanTime::At(day.and_time(time)),
            None => ScanTime::Day(day),
        }
    });

    let status = raw
        .status
        .as_deref()
        .and_then(StudyStatus::parse)
        .unwrap_or(ctx.default_status);

    let study_uid = [raw.study_instance_uid, raw.study_uid, raw.study_instance_uid_tag]
        .into_iter()
        .find_map(non_empty);

    let report_url = non_empty(raw.report_file).map(|file| resolve_media_url(&ctx.base_url, &file));
    let dicom_file_url = non_empty(raw.file_path)
        .map(|path| format!("{}/media/{}", ctx.base_url, path.trim_start_matches('/')));

    let image_refs = raw
        .images
        .filter(|images| !images.is_empty())
        .or(raw.image_urls)
        .unwrap_or_default();

    StudyRecord {
        id: raw.id,
        patient_name: non_empty(raw.patient_name).unwrap_or_else(|| UNKNOWN_PATIENT.to_string()),
        patient_id: raw.patient_id.unwrap_or_default(),
        age,
        sex: raw.patient_sex.unwrap_or_default(),
        body_part: raw.series_description.unwrap_or_default(),
        modality: raw.modality.unwrap_or_default(),
        center: center.unwrap_or_else(|| DEFAULT_CENTER.to_string()),
        institute_name,
        scanned_at,
        status,
        is_emergency: raw.is_emergency.unwrap_or(false),
        study_uid,
        report_url,
        dicom_file_url,
        reported_by: raw.reported_by.unwrap_or_default(),
        assigned_doctors: raw.assigned_doctors.unwrap_or_default(),
        image_refs,
        thumbnail_url: non_empty(raw.thumbnail_url),
    }
}

/// Resolves a media-relative path (as stored by the server) to an absolute URL.
pub fn resolve_media_url(base_url: &str, file: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if file.starts_with("http://") || file.starts_with("https://") {
        file.to_string()
    } else if file.starts_with("/media/") {
        format!("{base}{file}")
    } else if file.starts_with("media/") {
        format!("{base}/{file}")
    } else {
        format!("{base}/media/{file}")
    }
}

/// Accepts DICOM `YYYYMMDD` and ISO `YYYY-MM-DD`.
pub fn parse_study_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))
        .ok()
}

/// Accepts DICOM `HHMMSS[.ffffff]`, `HHMM` and ISO `HH:MM[:SS[.fff]]`.
pub fn parse_study_time(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let whole = value.split('.').next().unwrap_or(value);
    ["%H%M%S", "%H:%M:%S", "%H%M", "%H:%M"]
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(whole, format).ok())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty() && v != "undefined")
}
