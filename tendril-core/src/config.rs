//! Context configuration.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Options used when constructing a [`Context`](crate::Context).
///
/// Deserializing fills missing fields with their defaults.
///
/// ```rust
/// use tendril_core::{Context, ContextOptions};
///
/// let cx = Context::with_options(ContextOptions::new().label("editor").trace_effects(true));
/// assert_eq!(cx.label(), "editor");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextOptions {
    /// Name used in log output to tell contexts apart.
    pub label: Cow<'static, str>,

    /// Log the dependency tree of every completed effect run at DEBUG level.
    pub trace_effects: bool,
}

impl ContextOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the context label.
    pub fn label(mut self, label: impl Into<Cow<'static, str>>) -> Self {
        self.label = label.into();
        self
    }

    /// Enable or disable per-run effect tree logging.
    pub fn trace_effects(mut self, enabled: bool) -> Self {
        self.trace_effects = enabled;
        self
    }
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            label: Cow::Borrowed("context"),
            trace_effects: false,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
