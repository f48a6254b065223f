use std::time::Duration;

use eframe::egui;
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::TryRecvError};

use hubchat::common::Notification;
use hubchat::session::{ChatSession, Composer, Draft};

use super::components::{chat_area, input_bar, notifications, sidebar};
use super::state::AppState;

const REPAINT_INTERVAL: Duration = Duration::from_millis(200);

pub struct ChatApp {
    state: AppState,
    session: ChatSession,
    composer: Composer,
    notification_receiver: broadcast::Receiver<Notification>,
    runtime: Handle,
}

impl ChatApp {
    pub fn new(_cc: &eframe::CreationContext<'_>, session: ChatSession, runtime: Handle) -> Self {
        Self {
            state: AppState::new(),
            notification_receiver: session.notifications(),
            session,
            composer: Composer::new(),
            runtime,
        }
    }

    fn handle_notifications(&mut self) {
        loop {
            match self.notification_receiver.try_recv() {
                Ok(notification) => self.state.push_notification(notification),
                Err(TryRecvError::Lagged(skipped)) => {
                    log::warn!("Dropped {skipped} notifications");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    fn send_draft(&self, draft: Draft) {
        let session = self.session.clone();
        self.runtime.spawn(async move {
            // Failures are reported through the session's notifications.
            let _ = session.send_message(&draft.content, draft.timer).await;
        });
    }

    fn send_typing(&self, is_typing: bool) {
        let session = self.session.clone();
        self.runtime.spawn(async move {
            if let Err(err) = session.set_typing(is_typing).await {
                log::debug!("Typing update failed: {err}");
            }
        });
    }

    fn leave(&mut self, ctx: &egui::Context) {
        if self.state.leaving {
            return;
        }
        self.state.leaving = true;

        let session = self.session.clone();
        let ctx = ctx.clone();
        self.runtime.spawn(async move {
            if let Err(err) = session.leave().await {
                log::warn!("Leaving the room failed: {err}");
            }
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        });
    }
}

impl eframe::App for ChatApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.handle_notifications();

        let identity = self.session.identity().clone();
        let users = self.session.connected_users().borrow().clone();
        let typing = self.session.typing().borrow().clone();
        let messages = self.session.messages().borrow().clone();

        let mut leave_clicked = false;
        egui::SidePanel::left("users_sidebar")
            .resizable(true)
            .default_width(200.0)
            .show(ctx, |ui| {
                leave_clicked = sidebar::render(ui, &identity, &users, &typing);
            });

        egui::SidePanel::right("notifications_panel")
            .resizable(true)
            .default_width(260.0)
            .show(ctx, |ui| {
                notifications::render(ui, &mut self.state);
            });

        let mut input = input_bar::InputActions::default();
        egui::TopBottomPanel::bottom("input_bar").show(ctx, |ui| {
            ui.add_space(4.0);
            ui.add_enabled_ui(!self.state.leaving, |ui| {
                input = input_bar::render(ui, &mut self.composer);
            });
            ui.add_space(4.0);
        });

        let mut reveal = None;
        egui::CentralPanel::default().show(ctx, |ui| {
            let session = &self.session;
            reveal = chat_area::render(ui, &messages, &identity.user, |message| {
                session.visibility(message)
            });
        });

        if let Some(id) = reveal {
            self.session.reveal(&id);
        }
        if let Some(is_typing) = input.typing {
            self.send_typing(is_typing);
        }
        if let Some(draft) = input.draft {
            self.send_draft(draft);
        }
        if leave_clicked {
            self.leave(ctx);
        }

        ctx.request_repaint_after(REPAINT_INTERVAL);
    }
}
