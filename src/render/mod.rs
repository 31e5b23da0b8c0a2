//! # Configuration Rendering Module
//!
//! Turns the planned network into the files the forwarding engine and the
//! NAPs read at start-up. All output uses the libconfig syntax
//! (`key = value;`, groups in `{ }`, lists in `( )`, arrays in `[ ]`).
//!
//! ## Key Components
//!
//! - `network.rs`: `mn_icn.cfg`, the merged node and connection graph
//! - `nap.rs`: per-NAP `nap-<label>.cfg` and `httpproxy-<label>.cfg` files
//!   plus the per-cluster endpoint/NAP address lists

pub mod network;
pub mod nap;

use crate::ip::PlanError;
use std::path::PathBuf;

pub use nap::{
    plan_naps, render_httpproxy_config, render_nap_config, write_address_lists,
    write_httpproxy_configs, write_nap_configs, ConfigKind, GeneratedFile, NapEntry,
};
pub use network::{ConfigSerializer, NETWORK_CONFIG_FILE};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Plan(#[from] PlanError),
}

impl RenderError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RenderError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Quote a string value, escaping what libconfig treats specially
pub(crate) fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Text of a JSON value: strings as-is, everything else as compact JSON
pub(crate) fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("plain"), "\"plain\"");
        assert_eq!(quote("a\"b"), "\"a\\\"b\"");
        assert_eq!(quote("c:\\dir"), "\"c:\\\\dir\"");
    }

    #[test]
    fn test_value_text() {
        assert_eq!(value_text(&json!("x")), "x");
        assert_eq!(value_text(&json!(8)), "8");
        assert_eq!(value_text(&json!([1, 2])), "[1,2]");
    }
}
