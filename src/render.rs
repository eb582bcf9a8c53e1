//! Terminal rendering of the session display.

use std::fmt;

use crate::lifecycle::{SessionState, Step};
use crate::notify::Notification;

/// Disk type of every launched instance.
pub const DISK_TYPE: &str = "Magnetic disk";

/// A labelled value shown under the status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusItem {
    pub label: &'static str,
    pub value: String,
    pub icon: &'static str,
}

impl fmt::Display for StatusItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value: &str = if self.value.is_empty() { "-" } else { &self.value };
        write!(f, "{:<16}{}", format!("{}:", self.label), value)
    }
}

/// Primary control offered to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affordance {
    Submit,
    Stop,
}

pub fn affordance(state: &SessionState) -> Affordance {
    if state.show_actions() {
        Affordance::Submit
    } else {
        Affordance::Stop
    }
}

pub fn status_items(state: &SessionState) -> [StatusItem; 3] {
    [
        StatusItem {
            label: "Instance type",
            value: state.instance_type.clone(),
            icon: "computer",
        },
        StatusItem {
            label: "Disk type",
            value: DISK_TYPE.to_string(),
            icon: "memory",
        },
        StatusItem {
            label: "Region",
            value: state.region.clone(),
            icon: "location_on",
        },
    ]
}

/// Render the status step as a block of text.
pub fn render_state(state: &SessionState) -> String {
    if state.step == Step::Credentials {
        return "Enter your AWS credentials to launch a server.".to_string();
    }

    let display = state.display();
    let mut lines = Vec::new();
    let spinner = if state.loading { " ..." } else { "" };
    lines.push(format!(
        "[{}] {}{}",
        display.status_color, display.status_name, spinner
    ));
    for item in status_items(state) {
        lines.push(format!("  {item}"));
    }
    if let Some(url) = state.instance_url() {
        lines.push(format!("  {:<16}{}", "Link:", url));
    }
    if affordance(state) == Affordance::Stop {
        lines.push("Press Ctrl-C to stop the server.".to_string());
    }
    lines.join("\n")
}

pub fn render_notification(notification: &Notification) -> String {
    format!("{}  [{}]", notification.message, notification.action)
}
