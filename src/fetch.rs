use std::sync::mpsc::Sender;
use std::thread;

use crate::api::{ApiError, PortalClient};
use crate::record::{normalize_studies, NormalizeContext, StudyRecord, StudyStatus};

/// One study listing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StudyQuery {
    Doctor {
        doctor_name: String,
        page: usize,
    },
    Institute {
        institute_name: String,
        page: usize,
        page_size: u32,
        center: Option<String>,
    },
}

impl StudyQuery {
    pub fn default_status(&self) -> StudyStatus {
        match self {
            StudyQuery::Doctor { .. } => StudyStatus::Unreported,
            StudyQuery::Institute { .. } => StudyStatus::NotAssigned,
        }
    }

    fn normalize_context(&self, base_url: &str) -> NormalizeContext {
        let ctx = NormalizeContext::new(base_url, self.default_status());
        match self {
            StudyQuery::Doctor { .. } => ctx,
            StudyQuery::Institute { institute_name, .. } => {
                ctx.with_fallback_institute(institute_name.clone())
            }
        }
    }
}

/// Fetches and normalizes the full record set for `query`.
pub fn fetch_studies(client: &PortalClient, query: &StudyQuery) -> Result<Vec<StudyRecord>, ApiError> {
    let raw = match query {
        StudyQuery::Doctor { doctor_name, page } => client.studies_by_doctor(doctor_name, *page)?,
        StudyQuery::Institute {
            page,
            page_size,
            center,
            ..
        } => client.institute_studies(*page, *page_size, center.as_deref())?,
    };
    Ok(normalize_studies(raw, &query.normalize_context(client.base_url())))
}

/// Hands out increasing sequence numbers and remembers the newest one, so a
/// response that completes after a newer request was issued can be dropped.
#[derive(Debug, Clone, Default)]
pub struct RequestSequencer {
    issued: u64,
}

impl RequestSequencer {
    pub fn issue(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }

    pub fn is_latest(&self, seq: u64) -> bool {
        seq == self.issued
    }

    /// Invalidates every request issued so far.
    pub fn cancel_all(&mut self) {
        self.issued += 1;
    }
}

#[derive(Debug)]
pub struct FetchOutcome {
    pub seq: u64,
    pub maintain_page: bool,
    pub result: Result<Vec<StudyRecord>, FetchFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub message: String,
    pub auth: bool,
}

impl From<ApiError> for FetchFailure {
    fn from(err: ApiError) -> Self {
        Self {
            auth: err.is_auth(),
            message: err.to_string(),
        }
    }
}

pub fn spawn_fetch(
    client: PortalClient,
    query: StudyQuery,
    seq: u64,
    maintain_page: bool,
    tx: Sender<FetchOutcome>,
) {
    thread::spawn(move || {
        let result = fetch_studies(&client, &query).map_err(|err| {
            log::error!("Study fetch #{seq} failed: {err}");
            FetchFailure::from(err)
        });
        let _ = tx.send(FetchOutcome {
            seq,
            maintain_page,
            result,
        });
    });
}
