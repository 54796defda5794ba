//! Kernel command line seed parsing
//!
//! The kernel command line (and the DMI system serial number) may carry a
//! token of the form `ds=nocloud;key=val;key=val`. Short keys are expanded:
//! `h` -> `local-hostname`, `i` -> `instance-id`, `s` -> `seedfrom`.

use super::DsMode;
use serde_yaml::{Mapping, Value};
use tracing::debug;

/// Datasource ids recognised on the command line with their implied mode
const DS_IDS: &[(&str, DsMode)] = &[
    ("ds=nocloud", DsMode::Local),
    ("ds=nocloud-net", DsMode::Network),
];

/// Metadata parsed from a command-line style string
#[derive(Debug, Clone, PartialEq)]
pub struct CmdlineSeed {
    pub metadata: Mapping,
    /// Mode implied by which ds id matched
    pub ds_dsmode: DsMode,
}

/// Look for any NoCloud ds id in `cmdline` and parse its key/value pairs
pub fn load_cmdline_data(cmdline: &str) -> Option<CmdlineSeed> {
    DS_IDS.iter().find_map(|(ds_id, dsmode)| {
        parse_cmdline_data(ds_id, cmdline).map(|metadata| CmdlineSeed {
            metadata,
            ds_dsmode: *dsmode,
        })
    })
}

/// Parse the key/value pairs following `ds_id`.
///
/// Returns `None` when `ds_id` does not appear as a whole token or as a
/// token followed by `;`.
pub fn parse_cmdline_data(ds_id: &str, cmdline: &str) -> Option<Mapping> {
    let with_args = format!("{};", ds_id);
    let token = cmdline
        .split_whitespace()
        .filter(|tok| *tok == ds_id || tok.starts_with(&with_args))
        .last()?;

    debug!("Found seed token on command line: {}", token);

    let mut fill = Mapping::new();
    for item in token.split(';').skip(1) {
        if item.is_empty() {
            continue;
        }
        let (key, value) = match item.split_once('=') {
            Some((k, v)) => (k, Value::from(v)),
            None => (item, Value::Null),
        };
        fill.insert(Value::from(expand_key(key)), value);
    }

    Some(fill)
}

fn expand_key(key: &str) -> &str {
    match key {
        "h" => "local-hostname",
        "i" => "instance-id",
        "s" => "seedfrom",
        other => other,
    }
}
