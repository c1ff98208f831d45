use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use eframe::egui::{self, RichText};

use crate::api::PortalClient;
use crate::dashboard::{Actor, Dashboard, DashboardSignal};
use crate::guard::{check_access, check_identity, Access, Landing, Role};
use crate::launch::LaunchOptions;
use crate::session::{PortalView, SessionStore};
use crate::settings::{env_token, normalize_server_url, PortalSettings};
use crate::upload::{PanelEvent, UploadPanel};

const APP_TITLE: &str = "Perspecta Portal";
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_SERVER_URL: &str = "http://localhost:8000";

/// Outcome of the identity check run after sign-in.
enum Resolved {
    Dashboard {
        role: Role,
        actor: Actor,
        center_name: Option<String>,
    },
    Admin,
    Login(String),
}

enum Screen {
    SignIn,
    Checking(Receiver<Resolved>),
    Admin,
    Dashboard(Box<Dashboard>),
}

pub struct PortalApp {
    settings: PortalSettings,
    session: SessionStore,
    screen: Screen,
    server_input: String,
    token_input: String,
    preferred_view: Option<PortalView>,
    client: Option<PortalClient>,
    center_name: Option<String>,
    upload: Option<UploadPanel>,
    alert: Option<String>,
    status_line: String,
}

impl PortalApp {
    pub fn new(
        options: LaunchOptions,
        settings: PortalSettings,
        session: SessionStore,
        initial_status: Option<String>,
    ) -> Self {
        let server_input = options
            .server
            .map(|server| normalize_server_url(&server))
            .or_else(|| settings.resolved_server_url())
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
        let token_input = options
            .token
            .or_else(env_token)
            .or_else(|| session.token().map(str::to_string))
            .unwrap_or_default();
        let preferred_view = options.view.or_else(|| {
            session
                .state()
                .role
                .as_deref()
                .map(Role::parse)
                .and_then(|role| role.home_view())
        });

        let mut app = Self {
            settings,
            session,
            screen: Screen::SignIn,
            server_input,
            token_input,
            preferred_view,
            client: None,
            center_name: None,
            upload: None,
            alert: None,
            status_line: initial_status.unwrap_or_default(),
        };
        if !app.token_input.trim().is_empty() && app.status_line.is_empty() {
            app.sign_in();
        }
        app
    }

    fn sign_in(&mut self) {
        let token = self.token_input.trim().to_string();
        let server = normalize_server_url(&self.server_input);
        if token.is_empty() {
            self.status_line = "No authentication token found. Please login again.".to_string();
            return;
        }
        if server.is_empty() {
            self.status_line = "Server URL is required.".to_string();
            return;
        }

        let client = match PortalClient::new(&server, &token, &self.settings) {
            Ok(client) => client,
            Err(err) => {
                self.status_line = format!("Could not create HTTP client: {err}");
                return;
            }
        };
        if self.session.token() != Some(token.as_str()) {
            self.session.begin(&token);
        }
        log::info!("Signing in to {server}");

        let preferred = self.preferred_view.unwrap_or(PortalView::Doctor);
        let worker_client = client.clone();
        let (tx, rx) = mpsc::channel::<Resolved>();
        thread::spawn(move || {
            let _ = tx.send(resolve_identity(&worker_client, preferred));
        });
        self.client = Some(client);
        self.status_line = "Checking access...".to_string();
        self.screen = Screen::Checking(rx);
    }

    fn logout(&mut self) {
        if let Screen::Dashboard(dashboard) = &mut self.screen {
            dashboard.teardown();
        }
        self.session.clear();
        self.screen = Screen::SignIn;
        self.token_input.clear();
        self.client = None;
        self.center_name = None;
        self.upload = None;
        self.preferred_view = None;
        log::info!("Signed out");
    }

    fn expire_session(&mut self, message: &str) {
        self.logout();
        self.status_line = message.to_string();
    }

    fn poll_identity(&mut self, ctx: &egui::Context) {
        let Screen::Checking(receiver) = &self.screen else {
            return;
        };
        let resolved = match receiver.try_recv() {
            Ok(resolved) => resolved,
            Err(TryRecvError::Empty) => {
                ctx.request_repaint_after(Duration::from_millis(16));
                return;
            }
            Err(TryRecvError::Disconnected) => {
                Resolved::Login("Identity check worker disconnected.".to_string())
            }
        };

        match resolved {
            Resolved::Dashboard {
                role,
                actor,
                center_name,
            } => {
                let Some(client) = self.client.clone() else {
                    self.screen = Screen::SignIn;
                    return;
                };
                self.session.set_role(&role);
                self.preferred_view = Some(actor.view());
                self.center_name = center_name;
                let mut dashboard = Dashboard::new(actor, client, &self.settings, &self.session);
                dashboard.start(Instant::now());
                self.status_line.clear();
                self.screen = Screen::Dashboard(Box::new(dashboard));
            }
            Resolved::Admin => {
                self.session.set_role(&Role::SubAdmin);
                self.status_line.clear();
                self.screen = Screen::Admin;
            }
            Resolved::Login(message) => {
                log::warn!("Sign-in rejected: {message}");
                self.expire_session(&message);
            }
        }
    }

    fn show_top_bar(&mut self, ctx: &egui::Context) {
        let mut logout_clicked = false;
        let mut upload_clicked = false;
        let signed_in = matches!(self.screen, Screen::Dashboard(_) | Screen::Admin);
        let uploading = self.upload.as_ref().is_some_and(UploadPanel::is_uploading);
        let can_upload = self.upload.is_none()
            && matches!(&self.screen, Screen::Dashboard(dashboard) if dashboard.view() == PortalView::Institute);

        egui::TopBottomPanel::top("titlebar")
            .exact_height(32.0)
            .show(ctx, |ui| {
                ui.horizontal_centered(|ui| {
                    ui.label(RichText::new(format!("{APP_TITLE} v{APP_VERSION}")).strong());
                    if let Some(client) = self.client.as_ref() {
                        ui.label(RichText::new(client.base_url()).weak());
                    }
                    ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                        if signed_in
                            && ui
                                .add_enabled(!uploading, egui::Button::new("Logout"))
                                .clicked()
                        {
                            logout_clicked = true;
                        }
                        if can_upload && ui.button("Upload DICOM").clicked() {
                            upload_clicked = true;
                        }
                    });
                });
            });

        if logout_clicked {
            self.logout();
        } else if upload_clicked {
            if let Some(client) = self.client.clone() {
                self.upload = Some(UploadPanel::new(client, self.center_name.clone()));
            }
        }
    }

    fn show_sign_in(&mut self, ctx: &egui::Context) {
        let mut submit = false;
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.add_space(48.0);
            ui.vertical_centered(|ui| {
                ui.heading("Sign in");
                ui.add_space(12.0);
                egui::Grid::new("sign_in_form")
                    .num_columns(2)
                    .spacing([12.0, 8.0])
                    .show(ui, |ui| {
                        ui.label("Server");
                        ui.add(
                            egui::TextEdit::singleline(&mut self.server_input)
                                .hint_text(DEFAULT_SERVER_URL)
                                .desired_width(280.0),
                        );
                        ui.end_row();

                        ui.label("Token");
                        let response = ui.add(
                            egui::TextEdit::singleline(&mut self.token_input)
                                .password(true)
                                .desired_width(280.0),
                        );
                        if response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                            submit = true;
                        }
                        ui.end_row();
                    });
                ui.add_space(8.0);
                if ui.button("Continue").clicked() {
                    submit = true;
                }
                if !self.status_line.is_empty() {
                    ui.add_space(8.0);
                    ui.label(RichText::new(&self.status_line).weak());
                }
            });
        });
        if submit {
            self.sign_in();
        }
    }

    fn show_checking(&self, ctx: &egui::Context) {
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.add_space(48.0);
            ui.vertical_centered(|ui| {
                ui.spinner();
                ui.label(&self.status_line);
            });
        });
    }

    fn show_admin_notice(&self, ctx: &egui::Context) {
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.add_space(48.0);
            ui.vertical_centered(|ui| {
                ui.heading("Administrator account");
                ui.label("Administrator accounts manage the portal from the web admin index.");
                if let Some(client) = self.client.as_ref() {
                    ui.hyperlink_to("Open admin index", format!("{}/static/index.html", client.base_url()));
                }
            });
        });
    }

    fn show_alert(&mut self, ctx: &egui::Context) {
        let Some(message) = self.alert.clone() else {
            return;
        };
        let mut dismissed = false;
        egui::Window::new("Notice")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, egui::vec2(0.0, 0.0))
            .show(ctx, |ui| {
                ui.label(message);
                ui.add_space(8.0);
                if ui.button("OK").clicked() {
                    dismissed = true;
                }
            });
        if dismissed {
            self.alert = None;
        }
    }
}

impl eframe::App for PortalApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_identity(ctx);
        self.show_top_bar(ctx);

        let mut signals = Vec::new();
        match &mut self.screen {
            Screen::SignIn => {}
            Screen::Checking(_) => {}
            Screen::Admin => {}
            Screen::Dashboard(dashboard) => {
                if let Some(panel) = self.upload.as_mut() {
                    if let PanelEvent::Close = panel.ui(ctx) {
                        self.upload = None;
                        dashboard.request_fetch(true);
                    }
                } else {
                    signals = dashboard.update(ctx, &mut self.session);
                }
            }
        }
        match &self.screen {
            Screen::SignIn => self.show_sign_in(ctx),
            Screen::Checking(_) => self.show_checking(ctx),
            Screen::Admin => self.show_admin_notice(ctx),
            Screen::Dashboard(_) => {}
        }

        for signal in signals {
            match signal {
                DashboardSignal::Alert(message) => self.alert = Some(message),
                DashboardSignal::SessionExpired => {
                    self.expire_session("Session expired. Please login again.");
                }
            }
        }
        self.show_alert(ctx);
    }
}

/// Looks up the caller, follows a role redirect to the caller's own
/// dashboard and loads what that dashboard needs up front.
fn resolve_identity(client: &PortalClient, preferred: PortalView) -> Resolved {
    let user = client.current_user();
    let failure = user
        .as_ref()
        .err()
        .map(|err| format!("Could not verify identity: {err}"));
    let known = user.as_ref().ok().cloned();

    let mut view = preferred;
    let mut access = check_identity(view, user);
    let redirect = match (&access, known.as_ref()) {
        (Access::Redirect(Landing::Dashboard(home)), Some(user)) => Some((*home, user)),
        _ => None,
    };
    if let Some((home, user)) = redirect {
        log::info!("Redirecting from {} to {} dashboard", view.label(), home.label());
        view = home;
        access = check_access(view, user);
    }

    let (role, actor) = match access {
        Access::Granted { role, actor } => (role, actor),
        Access::Redirect(Landing::AdminIndex) => return Resolved::Admin,
        Access::Redirect(_) => {
            return Resolved::Login(failure.unwrap_or_else(|| {
                "This account does not have access to the portal.".to_string()
            }))
        }
    };

    let actor = match (view, actor) {
        (PortalView::Doctor, Some(name)) => Actor::Doctor { name },
        (PortalView::Doctor, None) => return Resolved::Login("Doctor name not found.".to_string()),
        (PortalView::Institute, _) => match client.institute_info() {
            Ok(info) => match Actor::institute(info) {
                Ok(actor) => actor,
                Err(message) => return Resolved::Login(message),
            },
            Err(err) if err.is_auth() => {
                return Resolved::Login("Session expired. Please login again.".to_string())
            }
            Err(err) => {
                return Resolved::Login(format!("Failed to load institute information: {err}"))
            }
        },
    };
    log::info!("Signed in as {} ({})", actor.title(), role.as_str());
    Resolved::Dashboard {
        role,
        actor,
        center_name: known.and_then(|user| user.center_name),
    }
}
