use chrono::{DateTime, Local};
use eframe::egui;

use hubchat::common::ChatMessage;
use hubchat::session::Visibility;

/// Renders the message list and returns the id the user asked to reveal.
pub fn render(
    ui: &mut egui::Ui,
    messages: &[ChatMessage],
    current_user: &str,
    visibility: impl Fn(&ChatMessage) -> Visibility,
) -> Option<String> {
    let mut reveal = None;

    egui::ScrollArea::vertical()
        .auto_shrink([false, false])
        .stick_to_bottom(true)
        .show(ui, |ui| {
            if messages.is_empty() {
                ui.label(egui::RichText::new("No messages yet").weak());
            }

            for message in messages {
                ui.group(|ui| {
                    ui.horizontal(|ui| {
                        let author = if message.user == current_user {
                            egui::RichText::new("You").strong()
                        } else {
                            egui::RichText::new(&message.user).strong()
                        };
                        ui.label(author);
                        ui.label(egui::RichText::new(format_time(message.message_time)).weak());
                        if message.is_pending() {
                            ui.label(egui::RichText::new("sending...").weak().italics());
                        }
                    });

                    match visibility(message) {
                        Visibility::Hidden => {
                            if ui.button("Tap to view").clicked() {
                                reveal = Some(message.id.clone());
                            }
                        }
                        Visibility::Visible => {
                            ui.label(&message.content);
                        }
                    }

                    if let (Some(remaining), Some(percentage)) =
                        (message.remaining_time, message.remaining_percentage)
                    {
                        ui.add(
                            egui::ProgressBar::new((percentage / 100.0) as f32)
                                .desired_height(4.0)
                                .text(format!("{remaining}s")),
                        );
                    }
                });
            }
        });

    reveal
}

fn format_time(timestamp: i64) -> String {
    match DateTime::from_timestamp(timestamp, 0) {
        Some(time) if timestamp > 0 => time.with_timezone(&Local).format("%H:%M").to_string(),
        _ => String::new(),
    }
}
