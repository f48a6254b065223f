use chrono::{DateTime, Local};
use eframe::egui;

use hubchat::common::NotificationLevel;

use crate::ui::state::AppState;

pub fn render(ui: &mut egui::Ui, state: &mut AppState) {
    ui.horizontal(|ui| {
        ui.heading("Notifications");
        if ui.small_button("Clear").clicked() {
            state.clear_notifications();
        }
    });
    ui.separator();

    egui::ScrollArea::vertical().show(ui, |ui| {
        for notification in state.notifications.iter().rev() {
            let color = match notification.level {
                NotificationLevel::Success => egui::Color32::GREEN,
                NotificationLevel::Warning => egui::Color32::YELLOW,
                NotificationLevel::Error => egui::Color32::RED,
            };
            let time = DateTime::from_timestamp(notification.created_at, 0)
                .map(|time| time.with_timezone(&Local).format("%H:%M:%S").to_string())
                .unwrap_or_default();

            ui.horizontal_wrapped(|ui| {
                ui.colored_label(color, format!("[{time}]"));
                ui.label(&notification.text);
            });
        }
    });
}
