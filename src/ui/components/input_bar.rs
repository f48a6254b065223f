use eframe::egui;

use hubchat::common::DisappearTimer;
use hubchat::session::{Composer, Draft};

#[derive(Default)]
pub struct InputActions {
    pub draft: Option<Draft>,
    /// Typing state the hub has to be told about.
    pub typing: Option<bool>,
}

pub fn render(ui: &mut egui::Ui, composer: &mut Composer) -> InputActions {
    let mut actions = InputActions::default();
    let mut send = false;

    if composer.show_timer_options() {
        ui.horizontal(|ui| {
            ui.label("Disappear after:");
            for timer in DisappearTimer::ALL {
                if ui
                    .selectable_label(composer.timer() == timer, timer.label())
                    .clicked()
                {
                    composer.select_timer(timer);
                }
            }
        });
    }

    ui.horizontal(|ui| {
        let timer_label = match composer.timer() {
            DisappearTimer::Off => "⏱".to_string(),
            timer => format!("⏱ {}", timer.label()),
        };
        if ui.button(timer_label).clicked() {
            composer.toggle_timer_options();
        }

        let response = ui.add(
            egui::TextEdit::singleline(composer.input_mut()).hint_text("Type a message"),
        );
        if response.changed() {
            merge(&mut actions.typing, composer.input_changed());
        }
        if response.gained_focus() {
            merge(&mut actions.typing, composer.on_focus_change(true));
        }
        if response.lost_focus() {
            if ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                send = true;
            } else {
                merge(&mut actions.typing, composer.on_focus_change(false));
            }
        }

        if ui
            .add_enabled(composer.is_valid(), egui::Button::new("Send"))
            .clicked()
        {
            send = true;
        }
    });

    if send && let Some((draft, typing)) = composer.take_draft() {
        actions.draft = Some(draft);
        merge(&mut actions.typing, typing);
    }

    actions
}

/// Later signals in the same frame win.
fn merge(current: &mut Option<bool>, next: Option<bool>) {
    if next.is_some() {
        *current = next;
    }
}
