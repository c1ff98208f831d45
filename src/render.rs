use eframe::egui::{self, Color32, RichText};

use crate::listing::ListEntry;
use crate::record::{StudyRecord, StudyStatus};
use crate::session::PortalView;

const MAX_THUMBNAILS: usize = 3;
pub const NO_REPORT: &str = "No Report";
pub const EMPTY_CELL: &str = "—";

pub const EMERGENCY_TEXT: Color32 = Color32::from_rgb(0xdc, 0x35, 0x45);

pub fn status_fill(status: StudyStatus) -> Color32 {
    match status {
        StudyStatus::Reported => Color32::from_rgb(0xd4, 0xed, 0xda),
        StudyStatus::Reviewed => Color32::from_rgb(0xff, 0xf3, 0xcd),
        StudyStatus::Draft => Color32::from_rgb(0xd1, 0xec, 0xf1),
        StudyStatus::NotAssigned | StudyStatus::Unreported => Color32::from_rgb(0xf8, 0xd7, 0xda),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    View,
    Report,
    Images,
    Name,
    PatientId,
    Studies,
    Age,
    Sex,
    BodyPart,
    Modality,
    Center,
    Institute,
    ScanDateTime,
    Status,
    AssignedDoctors,
}

impl Column {
    pub fn title(self) -> &'static str {
        match self {
            Column::View => "View",
            Column::Report => "Report",
            Column::Images => "Images",
            Column::Name => "Name",
            Column::PatientId => "Patient ID",
            Column::Studies => "Studies",
            Column::Age => "Age",
            Column::Sex => "Sex",
            Column::BodyPart => "Body Part",
            Column::Modality => "Modality",
            Column::Center => "Center",
            Column::Institute => "Institute",
            Column::ScanDateTime => "Scan Date/Time",
            Column::Status => "Status",
            Column::AssignedDoctors => "Assigned Doctors",
        }
    }
}

const DOCTOR_COLUMNS: &[Column] = &[
    Column::Name,
    Column::PatientId,
    Column::Age,
    Column::Sex,
    Column::BodyPart,
    Column::Modality,
    Column::Center,
    Column::Institute,
    Column::ScanDateTime,
    Column::Images,
    Column::Status,
    Column::Report,
    Column::View,
];

const INSTITUTE_COLUMNS: &[Column] = &[
    Column::View,
    Column::Report,
    Column::Images,
    Column::Name,
    Column::PatientId,
    Column::Studies,
    Column::Age,
    Column::Sex,
    Column::BodyPart,
    Column::Modality,
    Column::Center,
    Column::ScanDateTime,
    Column::Status,
    Column::AssignedDoctors,
];

pub fn columns(view: PortalView) -> &'static [Column] {
    match view {
        PortalView::Doctor => DOCTOR_COLUMNS,
        PortalView::Institute => INSTITUTE_COLUMNS,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportAction {
    None,
    Preview(String),
    Download(String),
}

impl ReportAction {
    pub fn for_record(record: &StudyRecord, view: PortalView) -> Self {
        match (record.report_url.clone(), view) {
            (None, _) => ReportAction::None,
            (Some(url), PortalView::Doctor) => ReportAction::Preview(url),
            (Some(url), PortalView::Institute) => ReportAction::Download(url),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReportAction::None => NO_REPORT,
            ReportAction::Preview(_) => "Preview",
            ReportAction::Download(_) => "Download",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThumbnailStrip {
    Images { urls: Vec<String>, more: usize },
    Single(String),
    Empty,
}

impl ThumbnailStrip {
    pub fn for_record(record: &StudyRecord) -> Self {
        if record.image_refs.is_empty() {
            return match record.thumbnail_url.as_ref() {
                Some(url) => ThumbnailStrip::Single(url.clone()),
                None => ThumbnailStrip::Empty,
            };
        }
        ThumbnailStrip::Images {
            urls: record
                .image_refs
                .iter()
                .take(MAX_THUMBNAILS)
                .map(|image| image.href().to_string())
                .collect(),
            more: record.image_refs.len().saturating_sub(MAX_THUMBNAILS),
        }
    }

    pub fn more_label(&self) -> Option<String> {
        match self {
            ThumbnailStrip::Images { more, .. } if *more > 0 => Some(format!("+{more} more")),
            _ => None,
        }
    }
}

/// Display model of one table row.
#[derive(Debug, Clone, PartialEq)]
pub struct StudyRow {
    pub record: StudyRecord,
    pub study_count: usize,
    pub report: ReportAction,
    pub thumbnails: ThumbnailStrip,
}

impl StudyRow {
    pub fn from_entry(entry: &ListEntry, view: PortalView) -> Option<Self> {
        let record = entry.representative()?;
        Some(Self {
            report: ReportAction::for_record(record, view),
            thumbnails: ThumbnailStrip::for_record(record),
            study_count: entry.study_count(),
            record: record.clone(),
        })
    }

    pub fn text(&self, column: Column) -> String {
        let record = &self.record;
        match column {
            Column::Name => record.patient_name.clone(),
            Column::PatientId => record.patient_id.clone(),
            Column::Studies => self.study_count.to_string(),
            Column::Age => record.age.to_string(),
            Column::Sex => record.sex.clone(),
            Column::BodyPart => record.body_part.clone(),
            Column::Modality => record.modality.clone(),
            Column::Center => record.center.clone(),
            Column::Institute => record.institute_name.clone(),
            Column::ScanDateTime => record.scan_display(),
            Column::Status => record.status.label().to_string(),
            Column::AssignedDoctors => {
                if record.assigned_doctors.trim().is_empty() {
                    EMPTY_CELL.to_string()
                } else {
                    record.assigned_doctors.clone()
                }
            }
            Column::Report => self.report.label().to_string(),
            Column::View | Column::Images => String::new(),
        }
    }
}

pub fn rows_for_page(entries: &[ListEntry], view: PortalView) -> Vec<StudyRow> {
    entries
        .iter()
        .filter_map(|entry| StudyRow::from_entry(entry, view))
        .collect()
}

/// Cell text, tinted for emergency studies.
pub fn cell_text(row: &StudyRow, column: Column) -> RichText {
    let text = RichText::new(row.text(column));
    if row.record.is_emergency {
        text.color(EMERGENCY_TEXT).strong()
    } else {
        text
    }
}

pub fn status_badge(ui: &mut egui::Ui, status: StudyStatus) {
    egui::Frame::none()
        .fill(status_fill(status))
        .rounding(4.0)
        .inner_margin(egui::Margin::symmetric(6.0, 2.0))
        .show(ui, |ui| {
            ui.label(RichText::new(status.label()).color(Color32::BLACK).small());
        });
}

pub fn thumbnail_strip(ui: &mut egui::Ui, strip: &ThumbnailStrip) {
    match strip {
        ThumbnailStrip::Images { urls, .. } => {
            for (index, url) in urls.iter().enumerate() {
                ui.hyperlink_to(RichText::new(format!("img {}", index + 1)).small(), url);
            }
            if let Some(more) = strip.more_label() {
                ui.label(RichText::new(more).small().weak());
            }
        }
        ThumbnailStrip::Single(url) => {
            ui.hyperlink_to(RichText::new("Preview").small(), url);
        }
        ThumbnailStrip::Empty => {
            ui.label(RichText::new("No img").small().weak());
        }
    }
}
