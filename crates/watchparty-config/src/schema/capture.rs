//! Screen capture request settings.

use serde::{Deserialize, Serialize};

/// Preferred capture surface offered to the user by the platform picker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum DisplaySurface {
    #[default]
    Browser,
    Window,
    Monitor,
}

/// Screen capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub video: bool,
    pub audio: bool,
    pub display_surface: DisplaySurface,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            video: true,
            audio: true,
            display_surface: DisplaySurface::Browser,
        }
    }
}
