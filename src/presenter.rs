//! The single persistent status indicator.
//!
//! At most one indicator is visible at a time, always under the configured
//! well-known id. [`StatusPresenter::present`] is idempotent for the
//! lifetime of a task: a second call replaces the content instead of
//! stacking a new indicator. Surface failures and malformed colors are
//! cosmetic and never fail the caller.

use crate::config::NotificationConfig;
use crate::options::{StatusUpdate, TaskIcon, TaskOptions};
use crate::platform::{ChannelSpec, StatusSurface};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Token for the indicator shown by a particular [`StatusPresenter::present`].
///
/// The generation changes every time a fresh indicator is created, so a
/// handle from a torn-down task cannot clear its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusHandle {
    pub id: u32,
    pub generation: u64,
}

/// What the status surface is asked to draw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusContent {
    pub title: String,
    pub description: String,
    /// ARGB accent color.
    pub color: Option<u32>,
    pub icon: TaskIcon,
    pub link_target: Option<String>,
    /// Not dismissable by the user while the task runs.
    pub ongoing: bool,
}

impl StatusContent {
    /// Ongoing content with the given text and no decoration.
    pub fn placeholder(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            color: None,
            icon: TaskIcon::new(""),
            link_target: None,
            ongoing: true,
        }
    }
}

#[derive(Debug, Default)]
struct PresenterState {
    channel_ready: bool,
    active: Option<(StatusHandle, StatusContent)>,
    generation: u64,
}

/// Builds and mutates the status indicator on a [`StatusSurface`].
pub struct StatusPresenter {
    surface: Arc<dyn StatusSurface>,
    config: NotificationConfig,
    state: Mutex<PresenterState>,
}

impl StatusPresenter {
    pub fn new(surface: Arc<dyn StatusSurface>, config: NotificationConfig) -> Self {
        Self {
            surface,
            config,
            state: Mutex::new(PresenterState::default()),
        }
    }

    /// Register the status channel. Safe to call repeatedly.
    pub fn ensure_channel(&self) {
        let mut state = self.lock_state();
        if state.channel_ready {
            return;
        }
        let channel = ChannelSpec {
            id: self.config.channel_id.clone(),
            name: self.config.channel_name.clone(),
            description: self.config.channel_description.clone(),
        };
        match self.surface.create_channel(&channel) {
            Ok(()) => state.channel_ready = true,
            Err(e) => warn!("failed to create status channel '{}': {e:#}", channel.id),
        }
    }

    /// Show the indicator for `options`, replacing the content of the
    /// active indicator if there is one.
    pub fn present(&self, options: &TaskOptions) -> StatusHandle {
        let content = self.content_for(options);
        let mut state = self.lock_state();
        let handle = match state.active.as_ref().map(|(handle, _)| *handle) {
            Some(handle) => handle,
            None => {
                state.generation += 1;
                StatusHandle {
                    id: self.config.notification_id,
                    generation: state.generation,
                }
            }
        };
        self.show(handle, &content);
        state.active = Some((handle, content));
        handle
    }

    /// Apply a partial update to the active indicator.
    ///
    /// A stale or missing `handle` is rebound to the active indicator. With
    /// nothing active, a fresh indicator is built from defaults plus the
    /// fields in `update`.
    pub fn update(&self, handle: Option<StatusHandle>, update: &StatusUpdate) -> StatusHandle {
        let mut state = self.lock_state();
        let Some((active, mut content)) = state.active.take() else {
            drop(state);
            debug!("status update without an active indicator, presenting fresh");
            let mut options = TaskOptions::default();
            options.merge(update);
            return self.present(&options);
        };
        if handle.is_some_and(|h| h != active) {
            debug!("status update with stale handle, using active indicator");
        }
        self.apply(&mut content, update);
        self.show(active, &content);
        state.active = Some((active, content));
        active
    }

    /// Remove the indicator. Returns `false` if `handle` is not the active one.
    pub fn clear(&self, handle: StatusHandle) -> bool {
        let mut state = self.lock_state();
        if !state.active.as_ref().is_some_and(|(active, _)| *active == handle) {
            return false;
        }
        state.active = None;
        self.surface.cancel(handle.id);
        true
    }

    /// Content of the visible indicator, if any.
    pub fn current(&self) -> Option<StatusContent> {
        self.lock_state()
            .active
            .as_ref()
            .map(|(_, content)| content.clone())
    }

    fn content_for(&self, options: &TaskOptions) -> StatusContent {
        StatusContent {
            title: options
                .title
                .clone()
                .unwrap_or_else(|| self.config.default_title.clone()),
            description: options
                .description
                .clone()
                .unwrap_or_else(|| self.config.default_description.clone()),
            color: options.color.as_deref().and_then(lenient_color),
            icon: self.resolve_icon(options.icon.as_ref()),
            link_target: options.link_target.clone(),
            ongoing: true,
        }
    }

    fn apply(&self, content: &mut StatusContent, update: &StatusUpdate) {
        if let Some(title) = &update.title {
            content.title = title.clone();
        }
        if let Some(description) = &update.description {
            content.description = description.clone();
        }
        if let Some(color) = update.color.as_deref().and_then(lenient_color) {
            content.color = Some(color);
        }
        if let Some(icon) = &update.icon {
            content.icon = self.resolve_icon(Some(icon));
        }
    }

    fn resolve_icon(&self, icon: Option<&TaskIcon>) -> TaskIcon {
        match icon {
            Some(icon) if !icon.name.trim().is_empty() => icon.clone(),
            _ => TaskIcon {
                name: self.config.default_icon.clone(),
                kind: "drawable".to_owned(),
            },
        }
    }

    fn show(&self, handle: StatusHandle, content: &StatusContent) {
        if let Err(e) = self.surface.notify(handle.id, content) {
            warn!("failed to show status indicator {}: {e:#}", handle.id);
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PresenterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn lenient_color(raw: &str) -> Option<u32> {
    let parsed = parse_color(raw);
    if parsed.is_none() {
        debug!("ignoring unparseable color {raw:?}");
    }
    parsed
}

/// Parse `#RRGGBB`, `#AARRGGBB` or a named color into ARGB.
pub fn parse_color(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if let Some(hex) = raw.strip_prefix('#') {
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let value = u32::from_str_radix(hex, 16).ok()?;
        return match hex.len() {
            6 => Some(0xFF00_0000 | value),
            8 => Some(value),
            _ => None,
        };
    }
    let argb = match raw.to_ascii_lowercase().as_str() {
        "black" => 0xFF00_0000,
        "darkgray" | "darkgrey" => 0xFF44_4444,
        "gray" | "grey" => 0xFF88_8888,
        "lightgray" | "lightgrey" => 0xFFCC_CCCC,
        "white" => 0xFFFF_FFFF,
        "red" => 0xFFFF_0000,
        "green" => 0xFF00_FF00,
        "blue" => 0xFF00_00FF,
        "yellow" => 0xFFFF_FF00,
        "cyan" | "aqua" => 0xFF00_FFFF,
        "magenta" | "fuchsia" => 0xFFFF_00FF,
        "lime" => 0xFF00_FF00,
        "maroon" => 0xFF80_0000,
        "navy" => 0xFF00_0080,
        "olive" => 0xFF80_8000,
        "purple" => 0xFF80_0080,
        "silver" => 0xFFC0_C0C0,
        "teal" => 0xFF00_8080,
        _ => return None,
    };
    Some(argb)
}
