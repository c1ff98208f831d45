mod api;
mod app;
mod dashboard;
mod fetch;
mod filter;
mod guard;
mod launch;
mod listing;
mod paginate;
mod record;
mod refresh;
mod render;
mod session;
mod settings;
mod upload;
mod viewer;

fn main() -> eframe::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    let (launch_options, initial_status) = match launch::parse_launch_options_from_args(&cli_args) {
        Ok(options) => (options, None),
        Err(err) => {
            log::error!("Launch URL/args error: {err}");
            (
                launch::LaunchOptions::default(),
                Some(format!("Launch URL/args error: {err}")),
            )
        }
    };
    let settings = settings::PortalSettings::load_or_default();
    let session = session::SessionStore::open_default();

    let native_options = eframe::NativeOptions {
        viewport: eframe::egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 820.0])
            .with_min_inner_size([900.0, 600.0])
            .with_resizable(true),
        ..Default::default()
    };

    eframe::run_native(
        "Perspecta Portal",
        native_options,
        Box::new(move |_cc| {
            Ok(Box::new(app::PortalApp::new(
                launch_options,
                settings,
                session,
                initial_status,
            )))
        }),
    )
}
