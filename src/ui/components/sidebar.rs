use eframe::egui;

use hubchat::common::{TypingOptions, UserRoom};

/// Returns `true` when the user asked to leave.
pub fn render(
    ui: &mut egui::Ui,
    identity: &UserRoom,
    users: &[String],
    typing: &TypingOptions,
) -> bool {
    ui.heading(&identity.room);
    ui.label(egui::RichText::new(format!("Signed in as {}", identity.user)).weak());
    ui.separator();

    ui.label(format!("Connected ({})", users.len()));
    if users.is_empty() {
        ui.label(egui::RichText::new("Waiting for the room...").weak());
    }
    for user in users {
        ui.horizontal(|ui| {
            ui.colored_label(egui::Color32::GREEN, "●");
            if *user == identity.user {
                ui.label(format!("{user} (you)"));
            } else {
                ui.label(user);
            }
        });
    }

    if typing.is_typing && typing.username != identity.user {
        ui.separator();
        ui.label(egui::RichText::new(format!("{} is typing...", typing.username)).italics());
    }

    ui.separator();
    ui.button("Leave chat").clicked()
}
