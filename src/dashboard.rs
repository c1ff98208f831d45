use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use eframe::egui::{self, RichText};

use crate::api::{InstituteInfo, PortalClient};
use crate::fetch::{spawn_fetch, FetchOutcome, RequestSequencer, StudyQuery};
use crate::filter::{
    doctor_center_options, institute_center_options, retain_center_selection, CenterFilter,
    CenterOption, StatusFilter, StudyFilter, ALL_CENTERS_DOCTOR, ALL_CENTERS_INSTITUTE,
};
use crate::listing::{Listing, ListingConfig};
use crate::paginate::PageControls;
use crate::record::{StudyRecord, StudyStatus};
use crate::refresh::{AutoRefresh, FocusTracker};
use crate::render::{self, Column, ReportAction, StudyRow};
use crate::session::{PortalView, SessionStore};
use crate::settings::PortalSettings;
use crate::viewer::ViewerTarget;

const MISSING_INSTITUTE_NAME: &str = "Institution name not found. Please contact administrator.";

/// Who the dashboard is showing studies for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Doctor {
        name: String,
    },
    Institute {
        name: String,
        centers: Vec<String>,
        center_count: usize,
    },
}

impl Actor {
    pub fn institute(info: InstituteInfo) -> Result<Self, String> {
        let name = info
            .institute_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| MISSING_INSTITUTE_NAME.to_string())?;
        let centers = info
            .centers
            .into_iter()
            .map(|center| center.name)
            .filter(|center| !center.trim().is_empty())
            .collect::<Vec<_>>();
        Ok(Actor::Institute {
            name,
            center_count: info.center_count.unwrap_or(centers.len()),
            centers,
        })
    }

    pub fn view(&self) -> PortalView {
        match self {
            Actor::Doctor { .. } => PortalView::Doctor,
            Actor::Institute { .. } => PortalView::Institute,
        }
    }

    pub fn title(&self) -> String {
        match self {
            Actor::Doctor { name } => format!("Dr. {name}"),
            Actor::Institute { name, .. } => name.clone(),
        }
    }

    pub fn subtitle(&self) -> String {
        match self {
            Actor::Doctor { .. } => "Assigned studies".to_string(),
            Actor::Institute { center_count, .. } => format!("{center_count} Centers"),
        }
    }
}

/// Raw state of the filter controls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterInputs {
    pub name: String,
    pub patient_id: String,
    pub status: StatusFilter,
    pub center: String,
    pub emergency_only: bool,
    pub modalities: Vec<(String, bool)>,
    pub scan_from: String,
    pub scan_to: String,
}

impl FilterInputs {
    pub fn new(modalities: &[String], view: PortalView) -> Self {
        Self {
            name: String::new(),
            patient_id: String::new(),
            status: StatusFilter::All,
            center: all_centers_value(view).to_string(),
            emergency_only: false,
            modalities: modalities
                .iter()
                .map(|modality| (modality.clone(), false))
                .collect(),
            scan_from: String::new(),
            scan_to: String::new(),
        }
    }

    pub fn all_modalities_checked(&self) -> bool {
        !self.modalities.is_empty() && self.modalities.iter().all(|(_, checked)| *checked)
    }

    pub fn set_all_modalities(&mut self, checked: bool) {
        for (_, state) in &mut self.modalities {
            *state = checked;
        }
    }

    /// Unparsable date text leaves that bound unset.
    pub fn to_filter(&self) -> StudyFilter {
        StudyFilter {
            name: self.name.clone(),
            patient_id: self.patient_id.clone(),
            status: self.status,
            center: CenterFilter::from_selection(&self.center),
            emergency_only: self.emergency_only,
            modalities: self
                .modalities
                .iter()
                .filter(|(_, checked)| *checked)
                .map(|(modality, _)| modality.clone())
                .collect(),
            scan_from: parse_filter_date(&self.scan_from),
            scan_to: parse_filter_date(&self.scan_to),
        }
    }

    pub fn has_invalid_date(&self) -> bool {
        [&self.scan_from, &self.scan_to]
            .into_iter()
            .any(|text| !text.trim().is_empty() && parse_filter_date(text).is_none())
    }
}

pub fn parse_filter_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").ok()
}

fn all_centers_value(view: PortalView) -> &'static str {
    match view {
        PortalView::Doctor => ALL_CENTERS_DOCTOR,
        PortalView::Institute => ALL_CENTERS_INSTITUTE,
    }
}

/// Last path segment of a report URL, used as the suggested file name.
pub fn report_file_name(url: &str) -> String {
    url.split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .map(|name| {
            urlencoding::decode(name)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| name.to_string())
        })
        .unwrap_or_else(|| "report.pdf".to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DashboardSignal {
    Alert(String),
    SessionExpired,
}

enum Action {
    FiltersChanged,
    InstituteCenterChanged,
    GoToPage(usize),
    OpenViewer(StudyRecord),
    Report(ReportAction),
    Refresh,
}

/// Owned state of one dashboard, from sign-in until the user navigates away.
pub struct Dashboard {
    actor: Actor,
    client: PortalClient,
    institute_fetch_size: u32,
    listing: Listing,
    inputs: FilterInputs,
    center_options: Vec<CenterOption>,
    sequencer: RequestSequencer,
    pending_seq: Option<u64>,
    fetch_sender: Sender<FetchOutcome>,
    fetch_receiver: Receiver<FetchOutcome>,
    refresh: AutoRefresh,
    focus: FocusTracker,
    report_receiver: Option<Receiver<Result<PathBuf, String>>>,
    status_line: String,
    signals: Vec<DashboardSignal>,
}

impl Dashboard {
    pub fn new(
        actor: Actor,
        client: PortalClient,
        settings: &PortalSettings,
        session: &SessionStore,
    ) -> Self {
        let view = actor.view();
        let config = match view {
            PortalView::Doctor => ListingConfig::doctor(),
            PortalView::Institute => ListingConfig::institute(),
        };
        let initial_page = session.page(view).unwrap_or(1);
        let center_options = match &actor {
            Actor::Doctor { .. } => doctor_center_options(&[]),
            Actor::Institute { centers, .. } => {
                institute_center_options(centers.iter().map(String::as_str))
            }
        };
        let (fetch_sender, fetch_receiver) = mpsc::channel();
        Self {
            inputs: FilterInputs::new(&settings.modalities, view),
            actor,
            client,
            institute_fetch_size: settings.institute_fetch_size,
            listing: Listing::new(config, initial_page),
            center_options,
            sequencer: RequestSequencer::default(),
            pending_seq: None,
            fetch_sender,
            fetch_receiver,
            refresh: AutoRefresh::default(),
            focus: FocusTracker::default(),
            report_receiver: None,
            status_line: String::new(),
            signals: Vec::new(),
        }
    }

    pub fn view(&self) -> PortalView {
        self.actor.view()
    }

    pub fn is_loading(&self) -> bool {
        self.pending_seq.is_some()
    }

    /// Initial load. Keeps the page restored from the session.
    pub fn start(&mut self, now: Instant) {
        log::info!(
            "Opening {} dashboard for {} on page {}",
            self.view().label(),
            self.actor.title(),
            self.listing.current_page()
        );
        self.request_fetch(true);
        if self.view() == PortalView::Doctor {
            self.refresh.start(now);
        }
    }

    pub fn teardown(&mut self) {
        self.refresh.stop();
        self.sequencer.cancel_all();
        self.pending_seq = None;
        self.report_receiver = None;
    }

    fn query(&self) -> StudyQuery {
        match &self.actor {
            Actor::Doctor { name } => StudyQuery::Doctor {
                doctor_name: name.clone(),
                page: self.listing.current_page(),
            },
            Actor::Institute { name, .. } => StudyQuery::Institute {
                institute_name: name.clone(),
                page: 1,
                page_size: self.institute_fetch_size,
                center: self.listing.filter().center.selected().map(str::to_string),
            },
        }
    }

    pub fn request_fetch(&mut self, maintain_page: bool) {
        let seq = self.sequencer.issue();
        self.pending_seq = Some(seq);
        spawn_fetch(
            self.client.clone(),
            self.query(),
            seq,
            maintain_page,
            self.fetch_sender.clone(),
        );
    }

    /// Applies every finished fetch that is still the newest request.
    pub fn apply_fetch_outcome(&mut self, outcome: FetchOutcome, session: &mut SessionStore) {
        if !self.sequencer.is_latest(outcome.seq) {
            log::debug!("Discarding stale study response #{}", outcome.seq);
            return;
        }
        self.pending_seq = None;
        match outcome.result {
            Ok(records) => {
                log::info!("Loaded {} studies (request #{})", records.len(), outcome.seq);
                self.listing.replace_records(records, outcome.maintain_page);
                if self.view() == PortalView::Doctor {
                    self.center_options = doctor_center_options(self.listing.records());
                    let kept =
                        retain_center_selection(&self.listing.filter().center, &self.center_options);
                    if kept != self.listing.filter().center {
                        self.inputs.center = ALL_CENTERS_DOCTOR.to_string();
                        self.listing
                            .replace_filter(self.inputs.to_filter(), outcome.maintain_page);
                    }
                }
                self.status_line.clear();
            }
            Err(failure) => {
                self.listing.clear();
                if failure.auth {
                    self.signals.push(DashboardSignal::SessionExpired);
                } else {
                    let what = match self.view() {
                        PortalView::Doctor => "assigned studies",
                        PortalView::Institute => "institute studies",
                    };
                    self.signals.push(DashboardSignal::Alert(format!(
                        "Error fetching {what}: {}",
                        failure.message
                    )));
                }
            }
        }
        self.persist_page(session);
    }

    pub fn apply_filters(&mut self, session: &mut SessionStore) {
        self.listing.set_filter(self.inputs.to_filter());
        self.persist_page(session);
    }

    /// Institute center changes go back to the server.
    pub fn change_institute_center(&mut self, session: &mut SessionStore) {
        self.apply_filters(session);
        self.request_fetch(false);
    }

    pub fn go_to_page(&mut self, page: usize, session: &mut SessionStore) {
        if self.listing.go_to_page(page) {
            self.persist_page(session);
        }
    }

    fn persist_page(&self, session: &mut SessionStore) {
        session.set_page(self.view(), self.listing.current_page());
    }

    pub fn open_viewer(&mut self, record: &StudyRecord, ctx: &egui::Context, session: &mut SessionStore) {
        match ViewerTarget::for_record(record, self.client.base_url()) {
            Ok(target) => {
                session.set_current_patient_id(record.id);
                let url = target.url(self.client.base_url());
                log::info!("Opening viewer for study {}: {url}", record.id);
                ctx.open_url(egui::OpenUrl::new_tab(url));
                if self.view() == PortalView::Doctor {
                    self.refresh.start(Instant::now());
                }
            }
            Err(err) => self.signals.push(DashboardSignal::Alert(err.to_string())),
        }
    }

    fn start_report_download(&mut self, url: String) {
        if self.report_receiver.is_some() {
            self.status_line = "A report download is already in progress.".to_string();
            return;
        }
        let Some(path) = rfd::FileDialog::new()
            .set_file_name(report_file_name(&url))
            .save_file()
        else {
            return;
        };
        self.status_line = "Downloading report...".to_string();
        let client = self.client.clone();
        let (tx, rx) = mpsc::channel::<Result<PathBuf, String>>();
        thread::spawn(move || {
            let result = save_report(&client, &url, &path)
                .map(|()| path)
                .map_err(|err| format!("{err:#}"));
            let _ = tx.send(result);
        });
        self.report_receiver = Some(rx);
    }

    fn poll_report_download(&mut self, ctx: &egui::Context) {
        let Some(receiver) = self.report_receiver.take() else {
            return;
        };
        match receiver.try_recv() {
            Ok(Ok(path)) => {
                self.status_line = format!("Saved report to {}", path.display());
            }
            Ok(Err(err)) => {
                log::warn!("Report download failed: {err}");
                self.signals
                    .push(DashboardSignal::Alert(format!("Report download failed: {err}")));
                self.status_line.clear();
            }
            Err(TryRecvError::Empty) => {
                self.report_receiver = Some(receiver);
                ctx.request_repaint_after(Duration::from_millis(16));
            }
            Err(TryRecvError::Disconnected) => {
                self.status_line = "Report download worker disconnected.".to_string();
            }
        }
    }

    fn poll_fetches(&mut self, ctx: &egui::Context, session: &mut SessionStore) {
        loop {
            match self.fetch_receiver.try_recv() {
                Ok(outcome) => self.apply_fetch_outcome(outcome, session),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        if self.is_loading() {
            ctx.request_repaint_after(Duration::from_millis(16));
        }
    }

    fn poll_refresh(&mut self, ctx: &egui::Context) {
        let now = Instant::now();
        let focused = ctx.input(|input| input.focused);
        self.refresh_tick(now, focused);
        if let Some(wait) = self.refresh.time_until_due(now) {
            ctx.request_repaint_after(wait);
        }
    }

    /// Timer or focus driven refresh of the doctor view. A fetch already in
    /// flight is left to finish instead of being superseded.
    fn refresh_tick(&mut self, now: Instant, focused: bool) -> bool {
        if self.view() != PortalView::Doctor || !self.refresh.is_running() {
            return false;
        }
        let regained = self.focus.regained(focused);
        if !(self.refresh.poll(now) || regained) {
            return false;
        }
        if self.is_loading() {
            log::debug!("Skipping auto-refresh, a fetch is still running");
            return false;
        }
        log::debug!("Auto-refreshing assigned studies");
        self.request_fetch(true);
        true
    }

    /// Runs one frame and returns what the shell has to act on.
    pub fn update(&mut self, ctx: &egui::Context, session: &mut SessionStore) -> Vec<DashboardSignal> {
        self.poll_fetches(ctx, session);
        self.poll_report_download(ctx);
        self.poll_refresh(ctx);

        let mut actions = Vec::new();
        self.show_filters(ctx, &mut actions);
        self.show_table(ctx, &mut actions);

        for action in actions {
            match action {
                Action::FiltersChanged => self.apply_filters(session),
                Action::InstituteCenterChanged => self.change_institute_center(session),
                Action::GoToPage(page) => self.go_to_page(page, session),
                Action::OpenViewer(record) => self.open_viewer(&record, ctx, session),
                Action::Report(ReportAction::Preview(url)) => {
                    ctx.open_url(egui::OpenUrl::new_tab(url));
                }
                Action::Report(ReportAction::Download(url)) => self.start_report_download(url),
                Action::Report(ReportAction::None) => {}
                Action::Refresh => self.request_fetch(true),
            }
        }
        std::mem::take(&mut self.signals)
    }

    fn show_filters(&mut self, ctx: &egui::Context, actions: &mut Vec<Action>) {
        let view = self.view();
        egui::SidePanel::left("study_filters")
            .resizable(false)
            .default_width(220.0)
            .show(ctx, |ui| {
                ui.add_space(6.0);
                ui.heading("Filters");
                ui.add_space(4.0);
                let mut changed = false;

                ui.label("Patient name");
                changed |= ui
                    .add(egui::TextEdit::singleline(&mut self.inputs.name).hint_text("Search name"))
                    .changed();
                ui.label("Patient ID");
                changed |= ui
                    .add(egui::TextEdit::singleline(&mut self.inputs.patient_id).hint_text("Search ID"))
                    .changed();

                ui.label("Status");
                let before = self.inputs.status;
                egui::ComboBox::from_id_salt("status_filter")
                    .selected_text(self.inputs.status.label())
                    .show_ui(ui, |ui| {
                        ui.selectable_value(&mut self.inputs.status, StatusFilter::All, "All");
                        for status in view_statuses(view) {
                            ui.selectable_value(
                                &mut self.inputs.status,
                                StatusFilter::Only(*status),
                                status.label(),
                            );
                        }
                    });
                changed |= before != self.inputs.status;

                ui.label("Center");
                let before = self.inputs.center.clone();
                let selected_label = self
                    .center_options
                    .iter()
                    .find(|option| option.value == self.inputs.center)
                    .map(|option| option.label.clone())
                    .unwrap_or_else(|| "All Centers".to_string());
                egui::ComboBox::from_id_salt("center_filter")
                    .selected_text(selected_label)
                    .show_ui(ui, |ui| {
                        for option in &self.center_options {
                            ui.selectable_value(
                                &mut self.inputs.center,
                                option.value.clone(),
                                option.label.as_str(),
                            );
                        }
                    });
                if before != self.inputs.center {
                    match view {
                        PortalView::Doctor => changed = true,
                        PortalView::Institute => actions.push(Action::InstituteCenterChanged),
                    }
                }

                changed |= ui
                    .checkbox(&mut self.inputs.emergency_only, "Emergency only")
                    .changed();

                ui.add_space(4.0);
                ui.label("Modality");
                let mut all = self.inputs.all_modalities_checked();
                if ui.checkbox(&mut all, "All").changed() {
                    self.inputs.set_all_modalities(all);
                    changed = true;
                }
                ui.horizontal_wrapped(|ui| {
                    for (modality, checked) in &mut self.inputs.modalities {
                        changed |= ui.checkbox(checked, modality.as_str()).changed();
                    }
                });

                ui.add_space(4.0);
                ui.label("Scan date (YYYY-MM-DD)");
                changed |= ui
                    .add(egui::TextEdit::singleline(&mut self.inputs.scan_from).hint_text("From"))
                    .changed();
                changed |= ui
                    .add(egui::TextEdit::singleline(&mut self.inputs.scan_to).hint_text("To"))
                    .changed();
                if self.inputs.has_invalid_date() {
                    let warn = ui.visuals().warn_fg_color;
                    ui.colored_label(warn, "Dates must be YYYY-MM-DD.");
                }

                ui.add_space(8.0);
                ui.horizontal(|ui| {
                    if ui.button("Reset").clicked() {
                        let modalities = self
                            .inputs
                            .modalities
                            .iter()
                            .map(|(modality, _)| modality.clone())
                            .collect::<Vec<_>>();
                        let center_was_set =
                            self.inputs.center != all_centers_value(view);
                        self.inputs = FilterInputs::new(&modalities, view);
                        if view == PortalView::Institute && center_was_set {
                            actions.push(Action::InstituteCenterChanged);
                        } else {
                            changed = true;
                        }
                    }
                    if ui
                        .add_enabled(!self.is_loading(), egui::Button::new("Refresh"))
                        .clicked()
                    {
                        actions.push(Action::Refresh);
                    }
                });

                if changed {
                    actions.push(Action::FiltersChanged);
                }
            });
    }

    fn show_table(&mut self, ctx: &egui::Context, actions: &mut Vec<Action>) {
        let view = self.view();
        let rows = render::rows_for_page(self.listing.page_entries(), view);
        let controls = self.listing.pager().controls();
        let filtered_out = !self.listing.filter().is_default() && self.listing.entries().is_empty();

        egui::TopBottomPanel::bottom("pagination")
            .show_separator_line(true)
            .show(ctx, |ui| {
                ui.add_space(4.0);
                match controls.as_ref() {
                    Some(controls) => pagination_bar(ui, controls, actions),
                    None => {
                        ui.label(self.listing.pager().summary());
                    }
                }
                if !self.status_line.is_empty() {
                    ui.label(RichText::new(&self.status_line).weak());
                }
                ui.add_space(4.0);
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading(self.actor.title());
                ui.label(RichText::new(self.actor.subtitle()).weak());
                if self.is_loading() {
                    ui.spinner();
                }
            });
            ui.separator();

            if rows.is_empty() {
                ui.add_space(12.0);
                let message = if self.is_loading() {
                    "Loading studies..."
                } else if filtered_out {
                    "No studies match the current filters."
                } else {
                    "No studies to show."
                };
                ui.label(RichText::new(message).weak());
                return;
            }

            egui::ScrollArea::both()
                .auto_shrink([false, false])
                .show(ui, |ui| {
                    egui::Grid::new("study_table")
                        .striped(true)
                        .spacing([12.0, 6.0])
                        .show(ui, |ui| {
                            for column in render::columns(view) {
                                ui.label(RichText::new(column.title()).strong());
                            }
                            ui.end_row();
                            for row in &rows {
                                for column in render::columns(view) {
                                    table_cell(ui, row, *column, actions);
                                }
                                ui.end_row();
                            }
                        });
                });
        });
    }
}

fn view_statuses(view: PortalView) -> &'static [StudyStatus] {
    const DOCTOR_STATUSES: &[StudyStatus] = &[
        StudyStatus::Unreported,
        StudyStatus::Draft,
        StudyStatus::Reviewed,
        StudyStatus::Reported,
    ];
    match view {
        PortalView::Doctor => DOCTOR_STATUSES,
        PortalView::Institute => &StudyStatus::ALL,
    }
}

fn table_cell(ui: &mut egui::Ui, row: &StudyRow, column: Column, actions: &mut Vec<Action>) {
    match column {
        Column::View => {
            if ui.button("📄").on_hover_text("Open in viewer").clicked() {
                actions.push(Action::OpenViewer(row.record.clone()));
            }
        }
        Column::Report => match &row.report {
            ReportAction::None => {
                ui.label(RichText::new(render::NO_REPORT).weak());
            }
            action => {
                if ui.button(action.label()).clicked() {
                    actions.push(Action::Report(action.clone()));
                }
            }
        },
        Column::Images => {
            ui.horizontal(|ui| render::thumbnail_strip(ui, &row.thumbnails));
        }
        Column::Status => render::status_badge(ui, row.record.status),
        other => {
            ui.label(render::cell_text(row, other));
        }
    }
}

fn pagination_bar(ui: &mut egui::Ui, controls: &PageControls, actions: &mut Vec<Action>) {
    ui.horizontal(|ui| {
        ui.label(&controls.summary);
        ui.separator();
        if ui.add_enabled(controls.first_enabled, egui::Button::new("<<")).clicked() {
            actions.push(Action::GoToPage(1));
        }
        if ui.add_enabled(controls.prev_enabled, egui::Button::new("<")).clicked() {
            actions.push(Action::GoToPage(controls.current.saturating_sub(1)));
        }
        for page in controls.pages.clone() {
            if ui
                .selectable_label(page == controls.current, page.to_string())
                .clicked()
            {
                actions.push(Action::GoToPage(page));
            }
        }
        if ui.add_enabled(controls.next_enabled, egui::Button::new(">")).clicked() {
            actions.push(Action::GoToPage(controls.current + 1));
        }
        if ui.add_enabled(controls.last_enabled, egui::Button::new(">>")).clicked() {
            actions.push(Action::GoToPage(controls.total_pages));
        }
    });
}

fn save_report(client: &PortalClient, url: &str, path: &Path) -> Result<()> {
    let bytes = client
        .download(url)
        .with_context(|| format!("Could not download {url}"))?;
    fs::write(path, bytes).with_context(|| format!("Could not write {}", path.display()))?;
    Ok(())
}
