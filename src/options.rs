//! Task option records shared by the runner, scheduler, store and presenter.
//!
//! Field names are snake_case on the wire; the camelCase keys used by
//! JavaScript callers (`taskTitle`, `taskDesc`, `linkingURI`, ...) are
//! accepted as aliases so host payloads deserialize unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Icon reference for the status indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskIcon {
    /// Resource name (e.g. `"ic_launcher"`).
    pub name: String,
    /// Resource kind; defaults to `"mipmap"`.
    #[serde(default = "default_icon_kind", alias = "type")]
    pub kind: String,
}

fn default_icon_kind() -> String {
    "mipmap".to_owned()
}

impl TaskIcon {
    /// Create an icon reference of the default `mipmap` kind.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: default_icon_kind(),
        }
    }
}

/// Configuration of a background task, as passed to start or schedule.
///
/// Stored by value: the option store keeps its own clone, so later changes
/// made by the caller never leak into persisted state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskOptions {
    /// Optional logical task name.
    #[serde(alias = "taskName", skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
    /// Status indicator title.
    #[serde(alias = "taskTitle")]
    pub title: Option<String>,
    /// Status indicator description.
    #[serde(alias = "taskDesc")]
    pub description: Option<String>,
    /// Status indicator icon.
    #[serde(alias = "taskIcon")]
    pub icon: Option<TaskIcon>,
    /// Accent color (`#RRGGBB`, `#AARRGGBB` or a named color).
    pub color: Option<String>,
    /// Target opened when the indicator is tapped.
    #[serde(alias = "linkingURI")]
    pub link_target: Option<String>,
    /// Opaque payload handed to the consumer.
    pub parameters: Value,
}

impl TaskOptions {
    /// Create options with a title and no other fields.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the accent color.
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    /// Set the icon.
    pub fn with_icon(mut self, icon: TaskIcon) -> Self {
        self.icon = Some(icon);
        self
    }

    /// Set the tap target.
    pub fn with_link_target(mut self, link: impl Into<String>) -> Self {
        self.link_target = Some(link.into());
        self
    }

    /// Set the consumer payload.
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Build the execute event for this task. A missing payload becomes `{}`.
    pub fn execute_event(&self) -> ExecuteEvent {
        let parameters = match &self.parameters {
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other.clone(),
        };
        ExecuteEvent { parameters }
    }

    /// Fold a partial status update into these options.
    pub fn merge(&mut self, update: &StatusUpdate) {
        if let Some(title) = &update.title {
            self.title = Some(title.clone());
        }
        if let Some(description) = &update.description {
            self.description = Some(description.clone());
        }
        if let Some(color) = &update.color {
            self.color = Some(color.clone());
        }
        if let Some(icon) = &update.icon {
            self.icon = Some(icon.clone());
        }
    }
}

/// Partial options used to mutate a visible status indicator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusUpdate {
    #[serde(alias = "taskTitle")]
    pub title: Option<String>,
    #[serde(alias = "taskDesc")]
    pub description: Option<String>,
    pub color: Option<String>,
    #[serde(alias = "taskIcon")]
    pub icon: Option<TaskIcon>,
}

impl StatusUpdate {
    /// Update only the title.
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Update only the description.
    pub fn description(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..Self::default()
        }
    }

    /// Returns `true` when no field is set.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.color.is_none()
            && self.icon.is_none()
    }
}

/// The "task ready to run" signal delivered to the consumer.
///
/// Carries only the `parameters` of the originating [`TaskOptions`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteEvent {
    pub parameters: Value,
}

impl ExecuteEvent {
    pub fn new(parameters: Value) -> Self {
        Self { parameters }
    }
}
