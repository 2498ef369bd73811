use std::fmt;

/// Color family of a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tone {
    Positive,
    Negative,
    Info,
    Warning,
}

impl Tone {
    /// Integer RGB color as expected by webhook embeds.
    pub fn color(&self) -> u32 {
        match self {
            Self::Positive => 3_066_993,
            Self::Negative => 15_158_332,
            Self::Info => 3_447_003,
            Self::Warning => 16_776_960,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub description: String,
    pub tone: Tone,
}

impl Notification {
    pub fn new(title: impl Into<String>, description: impl Into<String>, tone: Tone) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            tone,
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title, self.description)
    }
}
