use std::fmt;

/// Lifecycle state of an audio session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Running,
    Interrupted,
    Stopping,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Interrupted => "Interrupted",
            Self::Stopping => "Stopping",
        }
    }

    /// Whether the hardware session is (or should be) held
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
