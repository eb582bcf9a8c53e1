//! Mapping from raw instance state tokens to display categories and labels.

use std::fmt;

/// Display category for an instance state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorCategory {
    MutedPending,
    MutedStopped,
    MutedRunning,
}

impl ColorCategory {
    /// Class name used by the display layer.
    pub fn as_class(self) -> &'static str {
        match self {
            ColorCategory::MutedPending => "muted-pending",
            ColorCategory::MutedStopped => "muted-stopped",
            ColorCategory::MutedRunning => "muted-running",
        }
    }
}

impl fmt::Display for ColorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_class())
    }
}

fn lookup(raw: &str) -> Option<ColorCategory> {
    match raw {
        "pending" | "stopping" => Some(ColorCategory::MutedPending),
        "stopped" => Some(ColorCategory::MutedStopped),
        "running" => Some(ColorCategory::MutedRunning),
        _ => None,
    }
}

/// Map a raw state token to its display category.
///
/// Unrecognised tokens, including the empty string, are shown as stopped.
pub fn map_to_color(raw: &str) -> ColorCategory {
    lookup(raw).unwrap_or(ColorCategory::MutedStopped)
}

/// Human label for a raw state token, empty when the token is unknown.
pub fn status_label(raw: &str) -> &'static str {
    match raw {
        "pending" => "Launching server",
        "running" => "Server up and running",
        "shutting-down" => "Shutting down server",
        "stopped" => "Server stopped",
        "stopping" => "Stopping server",
        "terminated" => "Server is terminated",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_tokens() {
        assert_eq!(map_to_color("pending"), ColorCategory::MutedPending);
        assert_eq!(map_to_color("stopping"), ColorCategory::MutedPending);
        assert_eq!(map_to_color("stopped"), ColorCategory::MutedStopped);
        assert_eq!(map_to_color("running"), ColorCategory::MutedRunning);
    }

    #[test]
    fn test_unknown_tokens_default_to_stopped() {
        for raw in ["", "terminated", "shutting-down", "RUNNING", " running"] {
            assert_eq!(map_to_color(raw), ColorCategory::MutedStopped, "{raw:?}");
        }
    }

    #[test]
    fn test_class_names() {
        assert_eq!(ColorCategory::MutedPending.as_class(), "muted-pending");
        assert_eq!(ColorCategory::MutedStopped.to_string(), "muted-stopped");
        assert_eq!(ColorCategory::MutedRunning.as_class(), "muted-running");
    }

    #[test]
    fn test_labels() {
        assert_eq!(status_label("pending"), "Launching server");
        assert_eq!(status_label("terminated"), "Server is terminated");
        assert_eq!(status_label("rebooting"), "");
    }
}
