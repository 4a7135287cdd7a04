//! Terminal Render Layer
//!
//! Turns each [`WidgetSnapshot`] into the text that changed since the last
//! one. Streaming messages are printed as their text grows; everything else
//! is printed once.

use std::collections::HashMap;
use std::fmt::Write;

use webchat_core::display::{
    abbreviation, date_label, format_time, group_messages, local_date, WELCOME_TEXT,
};
use webchat_core::{
    ConnectionStatus, Message, MessageId, ProcessingStage, Sender, WidgetSnapshot, WidgetUpdate,
};

/// Incremental printer for widget snapshots
#[derive(Debug, Default)]
pub struct Renderer {
    /// Text already printed per message
    printed: HashMap<MessageId, String>,
    /// Streaming message whose line is still open
    open_line: Option<MessageId>,
    status: ConnectionStatus,
    stage: ProcessingStage,
    expanded: bool,
    welcomed: bool,
    /// Message whose quick replies were listed
    offered: Option<MessageId>,
}

impl Renderer {
    /// Create a renderer that has printed nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Text to print for one update
    pub fn apply(&mut self, update: &WidgetUpdate) -> String {
        match update {
            WidgetUpdate::Render(snapshot) => self.render(snapshot),
            WidgetUpdate::ClearInput => String::new(),
        }
    }

    fn render(&mut self, snapshot: &WidgetSnapshot) -> String {
        let mut out = String::new();

        if snapshot.connection_status != self.status {
            self.status = snapshot.connection_status;
            self.close_line(&mut out);
            let _ = writeln!(out, "({})", self.status);
        }

        if snapshot.is_expanded != self.expanded {
            self.expanded = snapshot.is_expanded;
            self.close_line(&mut out);
            out.push_str(if self.expanded { "(expanded)\n" } else { "(compact)\n" });
        }

        if snapshot.messages.is_empty() && !self.printed.is_empty() {
            self.close_line(&mut out);
            self.printed.clear();
            self.offered = None;
            self.welcomed = false;
            out.push_str("(conversation cleared)\n");
        }

        if snapshot.show_welcome && !self.welcomed {
            self.welcomed = true;
            let _ = writeln!(out, "{WELCOME_TEXT}");
        }

        let today = chrono::Local::now().date_naive();
        let groups = group_messages(&snapshot.messages);
        for (message, group) in snapshot.messages.iter().zip(groups) {
            match self.printed.get(&message.id).cloned() {
                None => {
                    self.close_line(&mut out);
                    if group.needs_date_separator {
                        if let Some(date) = local_date(message.timestamp) {
                            let _ = writeln!(out, "-- {} --", date_label(date, today));
                        }
                    }
                    let name = snapshot.chatbot_name.as_str();
                    self.print_new(&mut out, message, name, group.is_first_in_group);
                }
                Some(previous) if previous == message.text => {}
                Some(previous) => self.print_growth(&mut out, message, &previous),
            }

            if !message.is_streaming && self.open_line == Some(message.id) {
                self.close_line(&mut out);
            }
        }

        if snapshot.processing_stage != self.stage {
            self.stage = snapshot.processing_stage;
            let streaming = snapshot.messages.iter().any(|m| m.is_streaming);
            if let (Some(label), false) = (self.stage.label(), streaming) {
                self.close_line(&mut out);
                let _ = writeln!(out, "... {label}");
            }
        }

        if let Some(last) = snapshot.messages.last() {
            let fresh_offer = !last.is_streaming && !last.quick_replies.is_empty();
            if fresh_offer && self.offered != Some(last.id) {
                self.offered = Some(last.id);
                self.close_line(&mut out);
                let options: Vec<String> = last
                    .quick_replies
                    .iter()
                    .enumerate()
                    .map(|(i, reply)| format!("[{}] {}", i + 1, reply.text))
                    .collect();
                let _ = writeln!(out, "  {}", options.join("  "));
            }
        }

        out
    }

    fn print_new(
        &mut self,
        out: &mut String,
        message: &Message,
        name: &str,
        first_in_group: bool,
    ) {
        self.printed.insert(message.id, message.text.clone());

        match message.sender {
            // The typed line is already on screen
            Sender::User if !message.is_quick_reply => {}
            Sender::User => {
                let _ = writeln!(out, "> {}", message.text);
            }
            Sender::Bot if message.is_error => {
                let _ = writeln!(out, "! {}", message.text);
            }
            Sender::Bot => {
                if first_in_group {
                    let _ = write!(
                        out,
                        "[{}] {} {}: ",
                        abbreviation(name),
                        name,
                        format_time(message.timestamp)
                    );
                } else {
                    out.push_str("    ");
                }
                out.push_str(&message.text);
                if message.is_streaming {
                    self.open_line = Some(message.id);
                } else {
                    out.push('\n');
                }
            }
        }
    }

    fn print_growth(&mut self, out: &mut String, message: &Message, previous: &str) {
        self.printed.insert(message.id, message.text.clone());

        match message.text.strip_prefix(previous) {
            Some(suffix) if self.open_line == Some(message.id) => out.push_str(suffix),
            Some(suffix) => {
                self.close_line(out);
                let _ = writeln!(out, "    {suffix}");
            }
            // Replaced outright, e.g. an unwrapped JSON answer
            None => {
                self.close_line(out);
                let _ = writeln!(out, "    {}", message.text);
            }
        }
    }

    fn close_line(&mut self, out: &mut String) {
        if self.open_line.take().is_some() {
            out.push('\n');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use webchat_core::QuickReply;

    fn snapshot(messages: Vec<Message>) -> WidgetUpdate {
        WidgetUpdate::Render(Box::new(WidgetSnapshot {
            is_open: true,
            is_expanded: false,
            input_enabled: true,
            connection_status: ConnectionStatus::Disconnected,
            processing_stage: ProcessingStage::None,
            show_welcome: messages.is_empty(),
            messages,
            chatbot_name: "Support Bot".to_string(),
            avatar_url: None,
        }))
    }

    #[test]
    fn test_welcome_printed_once() {
        let mut renderer = Renderer::new();
        assert_eq!(renderer.apply(&snapshot(Vec::new())), format!("{WELCOME_TEXT}\n"));
        assert_eq!(renderer.apply(&snapshot(Vec::new())), "");
    }

    #[test]
    fn test_streaming_text_is_printed_as_it_grows() {
        let mut renderer = Renderer::new();
        renderer.apply(&snapshot(Vec::new()));

        let user = Message::user("hello");
        let mut reply = Message::streaming();
        reply.text = "Hi".to_string();

        let first = renderer.apply(&snapshot(vec![user.clone(), reply.clone()]));
        assert!(first.contains("[SB] Support Bot"));
        assert!(first.ends_with("Hi"));
        assert!(!first.contains("hello"));

        reply.text.push_str(" there");
        assert_eq!(
            renderer.apply(&snapshot(vec![user.clone(), reply.clone()])),
            " there"
        );

        reply.is_streaming = false;
        assert_eq!(renderer.apply(&snapshot(vec![user, reply])), "\n");
    }

    #[test]
    fn test_errors_and_quick_replies() {
        let mut renderer = Renderer::new();
        renderer.apply(&snapshot(Vec::new()));

        let mut offer = Message::bot("Which plan?");
        offer.quick_replies = vec![QuickReply::new("Basic", "b"), QuickReply::new("Pro", "p")];
        let out = renderer.apply(&snapshot(vec![Message::user("plans"), offer.clone()]));
        assert!(out.contains("Which plan?\n"));
        assert!(out.ends_with("  [1] Basic  [2] Pro\n"));

        let error = Message::error("boom");
        let out = renderer.apply(&snapshot(vec![Message::user("plans"), offer, error]));
        assert!(out.contains("! boom\n"));
    }

    #[test]
    fn test_reset_is_announced() {
        let mut renderer = Renderer::new();
        renderer.apply(&snapshot(vec![Message::bot("hi")]));

        let out = renderer.apply(&snapshot(Vec::new()));
        assert!(out.starts_with("(conversation cleared)\n"));
        assert!(out.contains(WELCOME_TEXT));
    }
}
