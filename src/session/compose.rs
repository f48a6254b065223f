use crate::common::DisappearTimer;

/// A message ready to be handed to [`ChatSession::send_message`](super::ChatSession::send_message).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub content: String,
    pub timer: DisappearTimer,
}

/// State behind the send form: the input, the timer picker and the typing
/// signal last relayed to the hub.
///
/// Methods that may change the typing indicator return `Some(is_typing)`
/// when the hub has to be told, `None` otherwise.
#[derive(Debug, Default)]
pub struct Composer {
    input: String,
    timer: DisappearTimer,
    show_timer_options: bool,
    typing_sent: Option<bool>,
}

impl Composer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut String {
        &mut self.input
    }

    /// The input is required; whitespace does not count.
    pub fn is_valid(&self) -> bool {
        !self.input.trim().is_empty()
    }

    pub fn timer(&self) -> DisappearTimer {
        self.timer
    }

    pub fn show_timer_options(&self) -> bool {
        self.show_timer_options
    }

    pub fn on_input_change(&mut self, text: impl Into<String>) -> Option<bool> {
        self.input = text.into();
        self.input_changed()
    }

    /// Same as [`on_input_change`](Self::on_input_change) after the input was
    /// edited in place through [`input_mut`](Self::input_mut).
    pub fn input_changed(&mut self) -> Option<bool> {
        self.relay_typing(self.is_valid())
    }

    pub fn on_focus_change(&mut self, focused: bool) -> Option<bool> {
        if !focused {
            return self.relay_typing(false);
        }
        if self.is_valid() {
            return self.relay_typing(true);
        }
        None
    }

    pub fn toggle_timer_options(&mut self) {
        self.show_timer_options = !self.show_timer_options;
    }

    pub fn select_timer(&mut self, timer: DisappearTimer) {
        self.timer = timer;
        self.show_timer_options = false;
    }

    /// Takes the current input for sending and resets the form.
    pub fn take_draft(&mut self) -> Option<(Draft, Option<bool>)> {
        if !self.is_valid() {
            return None;
        }
        let draft = Draft {
            content: std::mem::take(&mut self.input),
            timer: std::mem::take(&mut self.timer),
        };
        let typing = self.relay_typing(false);
        Some((draft, typing))
    }

    fn relay_typing(&mut self, is_typing: bool) -> Option<bool> {
        if self.typing_sent == Some(is_typing) {
            return None;
        }
        self.typing_sent = Some(is_typing);
        Some(is_typing)
    }
}
