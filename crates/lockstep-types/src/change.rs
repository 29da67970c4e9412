//! Recorded change types.
//!
//! A [`Change`] is one action recorded on the leader, addressed to a frame,
//! together with the signals observed while it ran and a commit flag. The
//! JSON shape is the one the recorder emits and followers consume verbatim.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifies the frame an action was recorded in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameRef {
    /// Alias of the page the frame belongs to (e.g. `"page"`, `"page1"`).
    pub page_alias: String,
    /// Selector chain from the main frame down to the target frame.
    /// Empty for the main frame.
    #[serde(default)]
    pub frame_path: Vec<String>,
}

impl FrameRef {
    /// The main frame of the given page.
    pub fn main(page_alias: impl Into<String>) -> Self {
        Self {
            page_alias: page_alias.into(),
            frame_path: Vec::new(),
        }
    }
}

/// Auxiliary metadata observed while an action ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "camelCase")]
pub enum Signal {
    /// The action triggered a navigation.
    Navigation {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    /// The action opened a popup page.
    Popup {
        #[serde(rename = "popupAlias")]
        popup_alias: String,
    },
    /// The action started a download.
    Download {
        #[serde(rename = "downloadAlias")]
        download_alias: String,
    },
    /// The action opened a dialog.
    Dialog {
        #[serde(rename = "dialogAlias")]
        dialog_alias: String,
    },
}

/// Mouse button used by a click.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Middle,
    Right,
}

/// A recorded UI action, tagged by its `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "camelCase")]
pub enum Action {
    Fill {
        selector: String,
        text: String,
        #[serde(default)]
        signals: Vec<Signal>,
    },
    Click {
        selector: String,
        #[serde(default)]
        button: MouseButton,
        /// Modifier bitmask (Alt=1, Control=2, Meta=4, Shift=8).
        #[serde(default)]
        modifiers: u32,
        #[serde(rename = "clickCount", default = "default_click_count")]
        click_count: u32,
        #[serde(default)]
        signals: Vec<Signal>,
    },
    Navigate {
        url: String,
        #[serde(default)]
        signals: Vec<Signal>,
    },
    Press {
        selector: String,
        key: String,
        #[serde(default)]
        modifiers: u32,
        #[serde(default)]
        signals: Vec<Signal>,
    },
    Check {
        selector: String,
        #[serde(default)]
        signals: Vec<Signal>,
    },
    Uncheck {
        selector: String,
        #[serde(default)]
        signals: Vec<Signal>,
    },
    Select {
        selector: String,
        options: Vec<String>,
        #[serde(default)]
        signals: Vec<Signal>,
    },
    SetInputFiles {
        selector: String,
        files: Vec<String>,
        #[serde(default)]
        signals: Vec<Signal>,
    },
    OpenPage {
        url: String,
        #[serde(default)]
        signals: Vec<Signal>,
    },
    ClosePage {
        #[serde(default)]
        signals: Vec<Signal>,
    },
}

fn default_click_count() -> u32 {
    1
}

impl Action {
    /// The wire name of this action, as matched by block-lists.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Fill { .. } => "fill",
            Self::Click { .. } => "click",
            Self::Navigate { .. } => "navigate",
            Self::Press { .. } => "press",
            Self::Check { .. } => "check",
            Self::Uncheck { .. } => "uncheck",
            Self::Select { .. } => "select",
            Self::SetInputFiles { .. } => "setInputFiles",
            Self::OpenPage { .. } => "openPage",
            Self::ClosePage { .. } => "closePage",
        }
    }

    /// Signals attached to this action.
    pub fn signals(&self) -> &[Signal] {
        match self {
            Self::Fill { signals, .. }
            | Self::Click { signals, .. }
            | Self::Navigate { signals, .. }
            | Self::Press { signals, .. }
            | Self::Check { signals, .. }
            | Self::Uncheck { signals, .. }
            | Self::Select { signals, .. }
            | Self::SetInputFiles { signals, .. }
            | Self::OpenPage { signals, .. }
            | Self::ClosePage { signals } => signals,
        }
    }
}

/// One recorded leader action plus the frame it targets and its commit flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub frame: FrameRef,
    pub action: Action,
    /// `true` once the interaction this action belongs to is finished;
    /// `false` for intermediate states (e.g. a fill still being typed).
    #[serde(default)]
    pub committed: bool,
}

impl Change {
    /// A committed navigation to `url` in `frame` with no signals.
    pub fn navigate(frame: FrameRef, url: impl Into<String>) -> Self {
        Self {
            frame,
            action: Action::Navigate {
                url: url.into(),
                signals: Vec::new(),
            },
            committed: true,
        }
    }

    /// URL of a navigation signal embedded in a fill action, if any.
    ///
    /// Only fills are considered; the first `navigation` signal carrying a
    /// URL wins.
    pub fn embedded_navigation(&self) -> Option<&str> {
        let Action::Fill { signals, .. } = &self.action else {
            return None;
        };
        signals.iter().find_map(|signal| match signal {
            Signal::Navigation { url: Some(url) } => Some(url.as_str()),
            _ => None,
        })
    }
}

/// A change payload exactly as the leader sent it.
///
/// The server relays these without reshaping them, so fields and action
/// kinds that [`Change`] does not model reach followers intact. Use
/// [`RawChange::to_change`] for the typed view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawChange(Value);

impl RawChange {
    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    pub fn from_change(change: &Change) -> Result<Self, serde_json::Error> {
        serde_json::to_value(change).map(Self)
    }

    /// `action.name`, if the payload has one.
    pub fn action_name(&self) -> Option<&str> {
        self.0.get("action")?.get("name")?.as_str()
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Decode into a [`Change`]. Fails for action kinds or shapes the typed
    /// model does not cover.
    pub fn to_change(&self) -> Result<Change, serde_json::Error> {
        Change::deserialize(&self.0)
    }
}
