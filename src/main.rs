mod app;

use app::IngestApp;
use docbatch::config::AppConfig;
use eframe::CreationContext;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), eframe::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docbatch=info")))
        .init();

    let (config, config_error) = match AppConfig::load() {
        Ok(config) => (config, None),
        Err(e) => {
            error!("[CONFIG] {}", e);
            (AppConfig::default(), Some(e.user_message()))
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    let options = eframe::NativeOptions {
        viewport: eframe::egui::ViewportBuilder::default()
            .with_inner_size([640.0, 640.0])
            .with_min_inner_size([420.0, 500.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Document Batch Uploader",
        options,
        Box::new(move |cc: &CreationContext| Box::new(IngestApp::new(cc, runtime, config, config_error))),
    )
}
