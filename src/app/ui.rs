use super::IngestApp;
use docbatch::notify::Severity;
use docbatch::upload::{FileId, FileStatus, TrackedFile};
use docbatch::utils::file_size::format_bytes;
use eframe::egui::{self, Align, Align2, Color32, RichText};
use rfd::FileDialog;

const ACCENT: Color32 = Color32::from_rgb(161, 89, 225);
const GREEN: Color32 = Color32::from_rgb(0, 180, 0);
const MUTED_GREEN: Color32 = Color32::from_rgb(110, 160, 110);
const RED: Color32 = Color32::from_rgb(220, 50, 50);
const GRAY: Color32 = Color32::from_rgb(150, 150, 150);
const AMBER: Color32 = Color32::from_rgb(220, 160, 40);

enum FileAction {
    Retry(FileId),
    Remove(FileId),
}

fn status_style(file: &TrackedFile) -> (&'static str, Color32, &'static str) {
    match file.status() {
        FileStatus::Pending => ("⏳", GRAY, "pending"),
        FileStatus::Uploading => ("📤", ACCENT, "uploading"),
        FileStatus::Completed if file.is_inferred() => ("☑", MUTED_GREEN, "completed (unconfirmed)"),
        FileStatus::Completed => ("✅", GREEN, "completed"),
        FileStatus::Failed => ("❌", RED, "failed"),
        FileStatus::Cancelled => ("⏹", GRAY, "cancelled"),
    }
}

fn severity_color(severity: Severity) -> Color32 {
    match severity {
        Severity::Info => ACCENT,
        Severity::Success => GREEN,
        Severity::Warning => AMBER,
        Severity::Error => RED,
    }
}

impl IngestApp {
    pub fn render(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default().show(ctx, |ui| {
            let total_height = ui.available_height();
            let footer_height = 40.0;
            let footer_margin = 15.0;
            let content_height = total_height - footer_height - footer_margin;

            egui::ScrollArea::vertical()
                .max_height(content_height)
                .show(ui, |ui| {
                    ui.add_space(20.0);
                    ui.vertical_centered(|ui| {
                        ui.heading("Document Batch Uploader");
                        ui.add_space(5.0);
                        ui.label(
                            RichText::new("Send documents for processing and follow them through")
                                .color(ui.visuals().text_color().gamma_multiply(0.7)),
                        );
                    });
                    ui.add_space(20.0);

                    if self.session.is_some() {
                        self.render_session(ui);
                    } else {
                        self.render_sign_in(ui);
                    }
                    ui.add_space(20.0);
                });

            ui.with_layout(egui::Layout::bottom_up(Align::Center), |ui| {
                ui.add_space(footer_margin);
                self.render_footer(ui);
            });
        });

        self.render_toasts(ctx);
    }

    fn render_sign_in(&mut self, ui: &mut egui::Ui) {
        ui.group(|ui| {
            ui.vertical_centered(|ui| {
                ui.label(RichText::new("🔒 Sign in required").strong());
                ui.add_space(5.0);
                let location = docbatch::config::AppConfig::default_path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "the config file".to_string());
                ui.label(format!(
                    "Set {} or api_token in {} to upload documents.",
                    docbatch::config::TOKEN_ENV,
                    location
                ));
                ui.add_space(8.0);
                if ui.button("🔄 Reload configuration").clicked() {
                    self.reload();
                }
            });
        });
    }

    fn render_session(&mut self, ui: &mut egui::Ui) {
        let busy = self.session.as_ref().is_some_and(|s| s.coordinator().is_busy());

        ui.group(|ui| {
            ui.horizontal(|ui| {
                if ui.button("📄 Select Files").clicked() {
                    if let Some(paths) = FileDialog::new().pick_files() {
                        self.add_paths(paths);
                    }
                }
                if ui.button("📁 Select Folder").clicked() {
                    if let Some(path) = FileDialog::new().pick_folder() {
                        self.add_folder(&path);
                    }
                }
            });
            if let Some(session) = &self.session {
                let limits = session.coordinator().limits();
                ui.label(
                    RichText::new(format!(
                        "Up to {} files, {} each, {} in total",
                        limits.max_files,
                        format_bytes(limits.max_file_size),
                        format_bytes(limits.max_total_size)
                    ))
                    .color(GRAY),
                );
            }
        });

        ui.add_space(20.0);

        let (pending, has_files) = self
            .session
            .as_ref()
            .map(|s| (s.coordinator().pending_count(), !s.coordinator().files().is_empty()))
            .unwrap_or((0, false));

        ui.vertical_centered(|ui| {
            ui.add_enabled_ui(pending > 0 && !busy, |ui| {
                let button = egui::Button::new("📤 Upload Files").min_size(egui::vec2(200.0, 40.0));
                if ui.add(button).clicked() {
                    self.start_upload();
                }
            });
            ui.add_space(5.0);
            ui.horizontal(|ui| {
                ui.add_enabled_ui(busy, |ui| {
                    if ui.button("⏹ Cancel").clicked() {
                        if let Some(session) = self.session.as_mut() {
                            session.cancel();
                        }
                    }
                });
                ui.add_enabled_ui(has_files, |ui| {
                    if ui.button("🗑 Clear All").clicked() {
                        if let Some(session) = self.session.as_mut() {
                            session.clear();
                        }
                        self.state.clear();
                    }
                });
            });
        });

        ui.add_space(20.0);

        if let Some(session) = &self.session {
            let coordinator = session.coordinator();
            if coordinator.active_batch().is_some() {
                ui.group(|ui| {
                    let progress_bar = egui::ProgressBar::new(coordinator.progress_fraction())
                        .show_percentage()
                        .animate(busy)
                        .fill(ACCENT);
                    ui.add(progress_bar);
                    ui.label(coordinator.status_text());
                });
            }
        }

        if has_files {
            ui.add_space(10.0);
            self.render_details(ui, busy);
        }
    }

    fn render_details(&mut self, ui: &mut egui::Ui, busy: bool) {
        if ui
            .button(if self.state.show_details {
                "Hide Details"
            } else {
                "Show Details"
            })
            .clicked()
        {
            self.state.show_details = !self.state.show_details;
        }

        if !self.state.show_details {
            return;
        }

        let mut action = None;
        if let Some(session) = &self.session {
            egui::ScrollArea::vertical()
                .id_source("file_list")
                .max_height(240.0)
                .show(ui, |ui| {
                    egui::Frame::none()
                        .fill(ui.style().visuals.extreme_bg_color)
                        .show(ui, |ui| {
                            ui.add_space(8.0);
                            for file in session.coordinator().files() {
                                let (icon, color, label) = status_style(file);
                                ui.horizontal(|ui| {
                                    ui.label(icon);
                                    ui.colored_label(
                                        color,
                                        format!("{} ({}) - {}", file.filename, format_bytes(file.size), label),
                                    );
                                    if file.status() == FileStatus::Failed && !busy && ui.small_button("Retry").clicked() {
                                        action = Some(FileAction::Retry(file.id));
                                    }
                                    if file.status() != FileStatus::Uploading && ui.small_button("✖").clicked() {
                                        action = Some(FileAction::Remove(file.id));
                                    }
                                });
                                if let Some(message) = file.error_message() {
                                    ui.label(RichText::new(format!("    {}", message)).color(color).small());
                                }
                                ui.add_space(4.0);
                            }
                            ui.add_space(8.0);
                        });
                });
        }

        match action {
            Some(FileAction::Retry(id)) => self.retry_file(id),
            Some(FileAction::Remove(id)) => {
                if let Some(session) = self.session.as_mut() {
                    session.remove_file(id);
                }
            }
            None => {}
        }
    }

    fn render_toasts(&mut self, ctx: &egui::Context) {
        if self.state.toasts.is_empty() {
            return;
        }
        let mut dismissed = None;
        egui::Area::new("toasts")
            .anchor(Align2::RIGHT_TOP, [-12.0, 12.0])
            .show(ctx, |ui| {
                for (index, toast) in self.state.toasts.iter().enumerate() {
                    egui::Frame::popup(ui.style()).show(ui, |ui| {
                        ui.set_max_width(320.0);
                        ui.horizontal(|ui| {
                            ui.colored_label(severity_color(toast.severity), &toast.message);
                            if ui.small_button("✖").clicked() {
                                dismissed = Some(index);
                            }
                        });
                    });
                    ui.add_space(4.0);
                }
            });
        if let Some(index) = dismissed {
            self.state.dismiss(index);
        }
    }

    fn render_footer(&self, ui: &mut egui::Ui) {
        ui.horizontal_centered(|ui| {
            ui.label("Server:");
            let server = self.config.server_url.clone();
            if ui
                .add(egui::Label::new(RichText::new(&server).color(ACCENT)).sense(egui::Sense::click()))
                .clicked()
            {
                let _ = open::that(&server);
            }
        });

        if let Some(error) = &self.state.error_message {
            ui.add_space(5.0);
            ui.vertical_centered(|ui| {
                ui.colored_label(RED, error);
            });
        }
    }
}
