mod state;
mod ui;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use docbatch::config::AppConfig;
use docbatch::upload::{AuthContext, FileSource, HttpIngestClient, IngestSession, RetryCoordinator};
use eframe::{egui, App};
use tokio::runtime::Runtime;
use tracing::{error, info, warn};

pub use state::UiState;

const BUSY_REPAINT: Duration = Duration::from_millis(100);

pub struct IngestApp {
    // Owns the worker threads that submissions and progress streams run on.
    runtime: Runtime,
    config: AppConfig,
    file_source: FileSource,
    session: Option<IngestSession>,
    state: UiState,
}

impl IngestApp {
    pub fn new(
        _cc: &eframe::CreationContext<'_>,
        runtime: Runtime,
        config: AppConfig,
        config_error: Option<String>,
    ) -> Self {
        info!("Initializing document batch uploader");
        let mut state = UiState {
            error_message: config_error,
            ..UiState::default()
        };

        let file_source = FileSource::new(&config.exclude).unwrap_or_else(|e| {
            warn!("[CONFIG] ignoring exclude patterns: {}", e);
            state.error_message = Some(e.user_message());
            FileSource::default()
        });

        let session = Self::build_session(&runtime, &config);
        Self {
            runtime,
            config,
            file_source,
            session,
            state,
        }
    }

    fn build_session(runtime: &Runtime, config: &AppConfig) -> Option<IngestSession> {
        let auth = AuthContext::new(config.api_token.clone());
        let token = auth.token()?.to_string();

        let base_url = match config.server_url() {
            Ok(url) => url,
            Err(e) => {
                error!("[CONFIG] {}", e);
                return None;
            }
        };
        // No overall timeout: progress streams stay open for the whole batch.
        let client = match reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                error!("failed to build HTTP client: {}", e);
                return None;
            }
        };

        let api = Arc::new(HttpIngestClient::new(Arc::new(client), base_url, token));
        IngestSession::mount(
            &auth,
            api,
            RetryCoordinator::new(config.retry_policy()),
            config.upload_limits(),
            config.dismiss_policy(),
            runtime.handle().clone(),
        )
    }

    /// Re-reads the config and tries to mount a session again.
    pub fn reload(&mut self) {
        match AppConfig::load() {
            Ok(config) => {
                self.config = config;
                self.state.clear();
            }
            Err(e) => {
                error!("[CONFIG] {}", e);
                self.state.error_message = Some(e.user_message());
                return;
            }
        }
        if let Ok(source) = FileSource::new(&self.config.exclude) {
            self.file_source = source;
        }
        self.session = Self::build_session(&self.runtime, &self.config);
    }

    pub fn add_paths(&mut self, paths: Vec<PathBuf>) {
        let candidates = self.file_source.from_paths(&paths);
        if let Some(session) = self.session.as_mut() {
            session.add_files(candidates);
        }
    }

    pub fn add_folder(&mut self, root: &Path) {
        let candidates = self.file_source.walk_folder(root);
        if candidates.is_empty() {
            self.state.error_message = Some(format!("No files found in {}", root.display()));
            return;
        }
        if let Some(session) = self.session.as_mut() {
            session.add_files(candidates);
        }
    }

    pub fn start_upload(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        self.state.error_message = None;
        if let Err(e) = session.submit() {
            warn!("[SUBMIT] not started: {}", e);
            self.state.error_message = Some(e.user_message());
        }
    }

    pub fn retry_file(&mut self, id: docbatch::upload::FileId) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Err(e) = session.retry_file(id) {
            warn!("[SUBMIT] retry not started: {}", e);
            self.state.error_message = Some(e.user_message());
        }
    }

    pub fn update_state(&mut self, ctx: &egui::Context) {
        let now = Instant::now();
        let mut busy = false;

        if let Some(session) = self.session.as_mut() {
            if session.pump() > 0 {
                ctx.request_repaint();
            }
            for notification in session.drain_notifications() {
                self.state.push(notification, now);
            }
            busy = session.coordinator().is_busy();
        }

        let next_expiry = self.state.expire(now);
        if busy {
            ctx.request_repaint_after(BUSY_REPAINT);
        } else if let Some(wait) = next_expiry {
            ctx.request_repaint_after(wait);
        }
    }
}

impl App for IngestApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.update_state(ctx);
        self.render(ctx);
    }
}

impl Drop for IngestApp {
    fn drop(&mut self) {
        // Closes any open progress channel before the runtime goes away.
        self.session = None;
    }
}
