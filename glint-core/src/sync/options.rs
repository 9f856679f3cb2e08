//! Syncer configuration.
//!
//! Both option structs deserialize from camelCase JSON with every field
//! optional:
//!
//! ```json
//! { "interval": 0.5, "preserveHistory": true }
//! { "ignoreUnhydrated": false, "missingPaths": "ignore" }
//! ```

use serde::Deserialize;

use super::patch::{ListEncoding, MissingPathPolicy};

/// Server-side options.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerOptions {
    /// Seconds between automatic diffs. `0` diffs on every tick that follows
    /// a change; a negative value disables automatic diffing.
    pub interval: f64,

    /// Send one patch per recorded change instead of a single merged patch.
    pub preserve_history: bool,

    /// Encode list changes as index-keyed objects and validate values
    /// before sending.
    pub auto_serialize: bool,
}

impl ServerOptions {
    pub(crate) fn list_encoding(&self) -> ListEncoding {
        if self.auto_serialize {
            ListEncoding::Indexed
        } else {
            ListEncoding::Sparse
        }
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            interval: 0.0,
            preserve_history: false,
            auto_serialize: true,
        }
    }
}

/// Client-side options.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientOptions {
    /// Drop patches that arrive before the first init payload.
    pub ignore_unhydrated: bool,

    pub missing_paths: MissingPathPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            ignore_unhydrated: true,
            missing_paths: MissingPathPolicy::Create,
        }
    }
}
