use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// One message for the notification surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub severity: Severity,
    pub message: String,
    /// `None` keeps the notification until the user dismisses it.
    pub auto_dismiss: Option<Duration>,
}

/// How long each severity stays on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DismissPolicy {
    pub auto_dismiss: Duration,
}

impl Default for DismissPolicy {
    fn default() -> Self {
        Self {
            auto_dismiss: Duration::from_millis(5000),
        }
    }
}

impl DismissPolicy {
    pub fn build(&self, severity: Severity, message: impl Into<String>) -> Notification {
        let auto_dismiss = match severity {
            Severity::Error => None,
            _ => Some(self.auto_dismiss),
        };
        Notification {
            severity,
            message: message.into(),
            auto_dismiss,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_stay_until_dismissed() {
        let policy = DismissPolicy::default();
        assert_eq!(policy.build(Severity::Error, "boom").auto_dismiss, None);
        assert_eq!(
            policy.build(Severity::Success, "done").auto_dismiss,
            Some(Duration::from_millis(5000))
        );
    }
}
