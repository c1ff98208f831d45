use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;
use std::time::Duration;

use eframe::egui;
use reqwest::StatusCode;

use crate::api::{ApiError, ImagePatient, PortalClient, ReceiveReply, UploadFields};

pub const SKIPPED_FILES_MESSAGE: &str =
    "Only DICOM (.dcm) files are allowed. Some files were skipped.";
const MAX_LISTED_NAMES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    pub path: PathBuf,
    pub name: String,
    pub size_bytes: u64,
}

impl PendingFile {
    pub fn size_label(&self) -> String {
        format!("{:.2} MB", self.size_bytes as f64 / 1024.0 / 1024.0)
    }
}

pub fn is_dicom_file_name(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
}

/// Files picked for upload but not yet accepted by the server.
#[derive(Debug, Clone, Default)]
pub struct UploadBatch {
    files: Vec<PendingFile>,
}

impl UploadBatch {
    pub fn files(&self) -> &[PendingFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Appends the `.dcm` entries of `paths` and returns how many were skipped.
    pub fn add_paths(&mut self, paths: impl IntoIterator<Item = PathBuf>) -> usize {
        let mut skipped = 0;
        for path in paths {
            if !is_dicom_file_name(&path) {
                skipped += 1;
                continue;
            }
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            let size_bytes = fs::metadata(&path).map(|meta| meta.len()).unwrap_or(0);
            self.files.push(PendingFile {
                path,
                name,
                size_bytes,
            });
        }
        skipped
    }

    pub fn remove(&mut self, index: usize) -> Option<PendingFile> {
        (index < self.files.len()).then(|| self.files.remove(index))
    }

    /// Drops the files the server accepted; the rest stay for a retry.
    pub fn retain_unfinished(&mut self, results: &[(PathBuf, UploadOutcome)]) {
        self.files.retain(|file| {
            !results
                .iter()
                .any(|(path, outcome)| *path == file.path && *outcome == UploadOutcome::Uploaded)
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum UploadFormError {
    #[error("Please select at least one DICOM file.")]
    NoFiles,
    #[error("Center name is required.")]
    MissingCenter,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadForm {
    pub center_name: String,
    /// Existing patient to attach the files to; empty adds a new patient.
    pub patient_id: String,
    pub is_emergency: bool,
}

impl UploadForm {
    pub fn validate(&self, batch: &UploadBatch) -> Result<(), UploadFormError> {
        if batch.is_empty() {
            return Err(UploadFormError::NoFiles);
        }
        if self.center_name.trim().is_empty() {
            return Err(UploadFormError::MissingCenter);
        }
        Ok(())
    }

    fn fields(&self) -> UploadFields<'_> {
        UploadFields {
            center_name: self.center_name.trim(),
            patient_id: Some(self.patient_id.trim()).filter(|id| !id.is_empty()),
            is_emergency: self.is_emergency,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded,
    Duplicate,
    Failed,
}

pub fn classify_upload(reply: &Result<ReceiveReply, ApiError>) -> UploadOutcome {
    let Ok(reply) = reply else {
        return UploadOutcome::Failed;
    };
    let body = reply.body.as_ref();
    if reply.status.is_success() && body.is_some_and(|body| body.success) {
        UploadOutcome::Uploaded
    } else if reply.status == StatusCode::CONFLICT && body.is_some_and(|body| body.duplicate) {
        UploadOutcome::Duplicate
    } else {
        UploadOutcome::Failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// Running tally of one upload batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub duplicates: Vec<String>,
    pub failed: Vec<String>,
}

impl UploadReport {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn record(&mut self, name: &str, outcome: UploadOutcome) {
        self.processed += 1;
        match outcome {
            UploadOutcome::Uploaded => self.succeeded += 1,
            UploadOutcome::Duplicate => self.duplicates.push(name.to_string()),
            UploadOutcome::Failed => self.failed.push(name.to_string()),
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.duplicates.is_empty() && self.failed.is_empty()
    }

    pub fn progress_text(&self) -> String {
        format!(
            "Uploading: {}/{} ({} succeeded, {} duplicates, {} failed)",
            self.processed,
            self.total,
            self.succeeded,
            self.duplicates.len(),
            self.failed.len()
        )
    }

    pub fn summary(&self) -> String {
        if self.all_succeeded() {
            return format!("All {} DICOM files uploaded successfully", self.succeeded);
        }
        let mut message = format!("Upload completed: {} succeeded", self.succeeded);
        if !self.duplicates.is_empty() {
            message.push_str(&format!(", {} duplicates (skipped)", self.duplicates.len()));
            if self.duplicates.len() <= MAX_LISTED_NAMES {
                message.push_str(&format!(". Duplicates: {}", self.duplicates.join(", ")));
            }
        }
        if !self.failed.is_empty() {
            message.push_str(&format!(", {} failed", self.failed.len()));
            if self.failed.len() <= MAX_LISTED_NAMES {
                message.push_str(&format!(". Failed: {}", self.failed.join(", ")));
            }
        }
        message
    }

    pub fn severity(&self) -> Severity {
        if self.all_succeeded() {
            Severity::Success
        } else if self.failed.is_empty() {
            Severity::Warning
        } else {
            Severity::Error
        }
    }
}

#[derive(Debug, Clone)]
pub enum UploadEvent {
    Progress(UploadReport),
    Finished {
        report: UploadReport,
        results: Vec<(PathBuf, UploadOutcome)>,
    },
}

/// Posts `files` one after another on a worker thread. No retries.
pub fn spawn_upload(
    client: PortalClient,
    files: Vec<PendingFile>,
    form: UploadForm,
    tx: Sender<UploadEvent>,
) {
    thread::spawn(move || {
        let fields = form.fields();
        let mut report = UploadReport::new(files.len());
        let mut results = Vec::with_capacity(files.len());
        for file in &files {
            let reply = client.receive_dicom(&file.path, &fields);
            if let Err(err) = &reply {
                log::warn!("Upload of {} failed: {err}", file.name);
            }
            let outcome = classify_upload(&reply);
            report.record(&file.name, outcome);
            results.push((file.path.clone(), outcome));
            let _ = tx.send(UploadEvent::Progress(report.clone()));
        }
        log::info!("{}", report.summary());
        let _ = tx.send(UploadEvent::Finished { report, results });
    });
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownPatient {
    pub patient_id: String,
    pub name: String,
}

impl KnownPatient {
    pub fn label(&self) -> String {
        format!("{} (ID: {})", self.name, self.patient_id)
    }
}

/// One entry per patient id, first occurrence wins; rows without an id are skipped.
pub fn known_patients(rows: Vec<ImagePatient>) -> Vec<KnownPatient> {
    let mut patients = Vec::<KnownPatient>::new();
    for row in rows {
        let Some(patient_id) = row.patient_id.filter(|id| !id.is_empty()) else {
            continue;
        };
        if patients.iter().any(|known| known.patient_id == patient_id) {
            continue;
        }
        patients.push(KnownPatient {
            patient_id,
            name: row
                .patient_name
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| "Unknown".to_string()),
        });
    }
    patients
}

const PATIENT_LIST_SIZE: u32 = 1000;

pub enum PanelEvent {
    None,
    Close,
}

/// Upload screen: pending files, form fields and the running batch.
pub struct UploadPanel {
    client: PortalClient,
    batch: UploadBatch,
    form: UploadForm,
    patients: Vec<KnownPatient>,
    patients_receiver: Option<Receiver<Result<Vec<KnownPatient>, String>>>,
    upload_receiver: Option<Receiver<UploadEvent>>,
    message: Option<(Severity, String)>,
}

impl UploadPanel {
    pub fn new(client: PortalClient, center_name: Option<String>) -> Self {
        let mut panel = Self {
            client,
            batch: UploadBatch::default(),
            form: UploadForm {
                center_name: center_name.unwrap_or_default(),
                ..UploadForm::default()
            },
            patients: Vec::new(),
            patients_receiver: None,
            upload_receiver: None,
            message: None,
        };
        panel.load_patients();
        panel
    }

    pub fn is_uploading(&self) -> bool {
        self.upload_receiver.is_some()
    }

    fn load_patients(&mut self) {
        let client = self.client.clone();
        let (tx, rx) = mpsc::channel::<Result<Vec<KnownPatient>, String>>();
        thread::spawn(move || {
            let result = client
                .image_patients(PATIENT_LIST_SIZE)
                .map(known_patients)
                .map_err(|err| format!("{err:#}"));
            let _ = tx.send(result);
        });
        self.patients_receiver = Some(rx);
    }

    fn pick_files(&mut self) {
        let Some(paths) = rfd::FileDialog::new()
            .add_filter("DICOM", &["dcm", "DCM"])
            .pick_files()
        else {
            return;
        };
        let skipped = self.batch.add_paths(paths);
        self.message = (skipped > 0).then(|| (Severity::Error, SKIPPED_FILES_MESSAGE.to_string()));
    }

    fn submit(&mut self) {
        if let Err(err) = self.form.validate(&self.batch) {
            self.message = Some((Severity::Error, err.to_string()));
            return;
        }
        self.message = Some((
            Severity::Info,
            format!("Uploading {} DICOM file(s)...", self.batch.len()),
        ));
        let (tx, rx) = mpsc::channel::<UploadEvent>();
        spawn_upload(
            self.client.clone(),
            self.batch.files().to_vec(),
            self.form.clone(),
            tx,
        );
        self.upload_receiver = Some(rx);
    }

    fn poll(&mut self, ctx: &egui::Context) {
        if let Some(receiver) = self.patients_receiver.take() {
            match receiver.try_recv() {
                Ok(Ok(patients)) => self.patients = patients,
                Ok(Err(err)) => log::warn!("Could not load existing patients: {err}"),
                Err(TryRecvError::Empty) => {
                    self.patients_receiver = Some(receiver);
                    ctx.request_repaint_after(Duration::from_millis(16));
                }
                Err(TryRecvError::Disconnected) => {}
            }
        }

        let Some(receiver) = self.upload_receiver.take() else {
            return;
        };
        loop {
            match receiver.try_recv() {
                Ok(UploadEvent::Progress(report)) => {
                    self.message = Some((Severity::Info, report.progress_text()));
                }
                Ok(UploadEvent::Finished { report, results }) => {
                    self.message = Some((report.severity(), report.summary()));
                    self.batch.retain_unfinished(&results);
                    if report.all_succeeded() {
                        self.load_patients();
                    }
                    return;
                }
                Err(TryRecvError::Empty) => {
                    self.upload_receiver = Some(receiver);
                    ctx.request_repaint_after(Duration::from_millis(16));
                    return;
                }
                Err(TryRecvError::Disconnected) => {
                    self.message = Some((
                        Severity::Error,
                        "Upload worker disconnected.".to_string(),
                    ));
                    return;
                }
            }
        }
    }

    pub fn ui(&mut self, ctx: &egui::Context) -> PanelEvent {
        self.poll(ctx);
        let mut event = PanelEvent::None;
        let uploading = self.is_uploading();

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.horizontal(|ui| {
                if ui
                    .add_enabled(!uploading, egui::Button::new("< Back"))
                    .clicked()
                {
                    event = PanelEvent::Close;
                }
                ui.heading("Upload DICOM");
            });
            ui.separator();

            egui::Grid::new("upload_form")
                .num_columns(2)
                .spacing([12.0, 8.0])
                .show(ui, |ui| {
                    ui.label("Center");
                    ui.add_enabled(
                        !uploading,
                        egui::TextEdit::singleline(&mut self.form.center_name)
                            .hint_text("Center name"),
                    );
                    ui.end_row();

                    ui.label("Patient");
                    let selected = self
                        .patients
                        .iter()
                        .find(|patient| patient.patient_id == self.form.patient_id)
                        .map(KnownPatient::label)
                        .unwrap_or_else(|| "— Add New Patient —".to_string());
                    ui.add_enabled_ui(!uploading, |ui| {
                        egui::ComboBox::from_id_salt("upload_patient")
                            .selected_text(selected)
                            .width(280.0)
                            .show_ui(ui, |ui| {
                                ui.selectable_value(
                                    &mut self.form.patient_id,
                                    String::new(),
                                    "— Add New Patient —",
                                );
                                for patient in &self.patients {
                                    ui.selectable_value(
                                        &mut self.form.patient_id,
                                        patient.patient_id.clone(),
                                        patient.label(),
                                    );
                                }
                            });
                    });
                    ui.end_row();

                    ui.label("Emergency");
                    ui.add_enabled(
                        !uploading,
                        egui::Checkbox::new(&mut self.form.is_emergency, "Mark as emergency"),
                    );
                    ui.end_row();
                });

            ui.add_space(8.0);
            ui.horizontal(|ui| {
                if ui
                    .add_enabled(!uploading, egui::Button::new("Add Files..."))
                    .clicked()
                {
                    self.pick_files();
                }
                let submit_label = if uploading { "Uploading..." } else { "Submit" };
                if ui
                    .add_enabled(!uploading, egui::Button::new(submit_label))
                    .clicked()
                {
                    self.submit();
                }
            });

            if let Some((severity, text)) = self.message.as_ref() {
                let color = match severity {
                    Severity::Info => ui.visuals().text_color(),
                    Severity::Success => egui::Color32::from_rgb(0x28, 0xa7, 0x45),
                    Severity::Warning => ui.visuals().warn_fg_color,
                    Severity::Error => ui.visuals().error_fg_color,
                };
                ui.add_space(6.0);
                ui.colored_label(color, text);
            }

            ui.add_space(8.0);
            let mut remove = None;
            egui::ScrollArea::vertical()
                .auto_shrink([false, false])
                .show(ui, |ui| {
                    for (index, file) in self.batch.files().iter().enumerate() {
                        ui.horizontal(|ui| {
                            ui.label(format!("{} ({})", file.name, file.size_label()));
                            if ui
                                .add_enabled(!uploading, egui::Button::new("Remove"))
                                .clicked()
                            {
                                remove = Some(index);
                            }
                        });
                    }
                });
            if let Some(index) = remove {
                self.batch.remove(index);
            }
        });
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ReceiveResponse;

    fn reply(status: StatusCode, body: Option<ReceiveResponse>) -> Result<ReceiveReply, ApiError> {
        Ok(ReceiveReply { status, body })
    }

    fn pending(name: &str) -> PendingFile {
        PendingFile {
            path: PathBuf::from(format!("/scans/{name}")),
            name: name.to_string(),
            size_bytes: 0,
        }
    }

    #[test]
    fn only_dcm_files_are_accepted() {
        let mut batch = UploadBatch::default();
        let skipped = batch.add_paths(vec![
            PathBuf::from("/scans/a.dcm"),
            PathBuf::from("/scans/B.DCM"),
            PathBuf::from("/scans/notes.txt"),
            PathBuf::from("/scans/noext"),
        ]);
        assert_eq!(skipped, 2);
        let names = batch.files().iter().map(|f| f.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["a.dcm", "B.DCM"]);
        assert_eq!(batch.remove(0).map(|f| f.name), Some("a.dcm".to_string()));
        assert!(batch.remove(5).is_none());
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn validation_checks_files_then_center() {
        let mut form = UploadForm::default();
        let mut batch = UploadBatch::default();
        assert_eq!(form.validate(&batch), Err(UploadFormError::NoFiles));
        batch.add_paths(vec![PathBuf::from("/scans/a.dcm")]);
        form.center_name = "   ".to_string();
        assert_eq!(form.validate(&batch), Err(UploadFormError::MissingCenter));
        assert_eq!(UploadFormError::MissingCenter.to_string(), "Center name is required.");
        form.center_name = "North".to_string();
        assert_eq!(form.validate(&batch), Ok(()));
    }

    #[test]
    fn replies_are_classified() {
        let ok = ReceiveResponse {
            success: true,
            ..ReceiveResponse::default()
        };
        let duplicate = ReceiveResponse {
            duplicate: true,
            ..ReceiveResponse::default()
        };
        assert_eq!(
            classify_upload(&reply(StatusCode::CREATED, Some(ok.clone()))),
            UploadOutcome::Uploaded
        );
        assert_eq!(
            classify_upload(&reply(StatusCode::CONFLICT, Some(duplicate))),
            UploadOutcome::Duplicate
        );
        assert_eq!(
            classify_upload(&reply(StatusCode::CONFLICT, Some(ok))),
            UploadOutcome::Failed
        );
        assert_eq!(
            classify_upload(&reply(StatusCode::OK, None)),
            UploadOutcome::Failed
        );
        assert_eq!(
            classify_upload(&Err(ApiError::Rejected("boom".to_string()))),
            UploadOutcome::Failed
        );
    }

    #[test]
    fn summary_lists_few_names() {
        let mut report = UploadReport::new(4);
        report.record("a.dcm", UploadOutcome::Uploaded);
        report.record("b.dcm", UploadOutcome::Duplicate);
        assert_eq!(report.progress_text(), "Uploading: 2/4 (1 succeeded, 1 duplicates, 0 failed)");
        assert_eq!(report.severity(), Severity::Warning);
        report.record("c.dcm", UploadOutcome::Failed);
        report.record("d.dcm", UploadOutcome::Uploaded);
        assert_eq!(
            report.summary(),
            "Upload completed: 2 succeeded, 1 duplicates (skipped). Duplicates: b.dcm, 1 failed. Failed: c.dcm"
        );
        assert_eq!(report.severity(), Severity::Error);

        let mut many = UploadReport::new(6);
        for n in 0..6 {
            many.record(&format!("{n}.dcm"), UploadOutcome::Failed);
        }
        assert_eq!(many.summary(), "Upload completed: 0 succeeded, 6 failed");
    }

    #[test]
    fn clean_batch_reports_success() {
        let mut report = UploadReport::new(2);
        report.record("a.dcm", UploadOutcome::Uploaded);
        report.record("b.dcm", UploadOutcome::Uploaded);
        assert_eq!(report.summary(), "All 2 DICOM files uploaded successfully");
        assert_eq!(report.severity(), Severity::Success);
    }

    #[test]
    fn uploaded_files_leave_the_batch() {
        let mut batch = UploadBatch {
            files: vec![pending("a.dcm"), pending("b.dcm"), pending("c.dcm")],
        };
        batch.retain_unfinished(&[
            (PathBuf::from("/scans/a.dcm"), UploadOutcome::Uploaded),
            (PathBuf::from("/scans/b.dcm"), UploadOutcome::Duplicate),
            (PathBuf::from("/scans/c.dcm"), UploadOutcome::Failed),
        ]);
        let names = batch.files().iter().map(|f| f.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["b.dcm", "c.dcm"]);
    }

    #[test]
    fn known_patients_are_deduplicated() {
        let row = |id: Option<&str>, name: Option<&str>| ImagePatient {
            patient_id: id.map(str::to_string),
            patient_name: name.map(str::to_string),
            ..ImagePatient::default()
        };
        let patients = known_patients(vec![
            row(Some("P1"), Some("Jane")),
            row(Some("P1"), Some("Jane Again")),
            row(None, Some("Nobody")),
            row(Some(""), Some("Blank")),
            row(Some("P2"), None),
        ]);
        assert_eq!(patients.len(), 2);
        assert_eq!(patients[0].label(), "Jane (ID: P1)");
        assert_eq!(patients[1].label(), "Unknown (ID: P2)");
    }
}
