//! Incident data loader.
//!
//! Reads an incident export from a local file or an `http(s)://` URL and
//! normalizes each record into an [`IncidentRecord`]. Upstream exports use
//! several spellings for the same field (camelCase app exports and raw
//! ServiceNow table rows), so each field is resolved from an ordered list of
//! candidate keys.
//!
//! Accepted shapes:
//!
//! ```text
//! [ { "number": "INC0010001", ... }, ... ]
//! { "result": [ { "incidentNumber": "INC0010001", ... }, ... ], ... }
//! ```
//!
//! Output order follows input order; records without an identifier and
//! repeated identifiers are dropped with a warning.

use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::LoadError;
use crate::models::{IncidentRecord, UNKNOWN_STATE, UNSPECIFIED_PRIORITY};

const ID_KEYS: &[&str] = &["incidentNumber", "number", "id"];
const SHORT_DESCRIPTION_KEYS: &[&str] = &["incidentDescription", "short_description"];
const DESCRIPTION_KEYS: &[&str] = &["description", "long_description"];
const PRIORITY_KEYS: &[&str] = &["severity_priority", "priority"];
const STATE_KEYS: &[&str] = &["stateOfTicket", "state", "incident_state"];
const ASSIGNED_KEYS: &[&str] = &["incidentAssignedTo", "assigned_to"];
const WORK_NOTES_KEYS: &[&str] = &["workNotes", "work_notes"];
const RESOLUTION_KEYS: &[&str] = &["howItWasResolved", "resolution", "close_notes"];
const TAG_KEYS: &[&str] = &["incidentTag", "tag", "category"];
const OPENED_KEYS: &[&str] = &["sys_created_on", "opened_at", "created_at"];
const UPDATED_KEYS: &[&str] = &["sys_updated_on", "updated_at"];

/// Load and normalize incidents from a file path or URL.
pub async fn load_incidents(location: &str, timeout: Duration) -> Result<Vec<IncidentRecord>, LoadError> {
    let raw = if is_url(location) {
        fetch_url(location, timeout).await?
    } else {
        read_file(Path::new(location))?
    };
    parse_incidents(&raw, location)
}

fn is_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

fn read_file(path: &Path) -> Result<String, LoadError> {
    std::fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.display().to_string(),
        source,
    })
}

async fn fetch_url(url: &str, timeout: Duration) -> Result<String, LoadError> {
    let fetch_err = |source: reqwest::Error| LoadError::Fetch {
        url: url.to_string(),
        source,
    };

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(fetch_err)?;

    debug!(url, "fetching incident export");
    let resp = client.get(url).send().await.map_err(fetch_err)?;
    let status = resp.status();
    if !status.is_success() {
        return Err(LoadError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    resp.text().await.map_err(fetch_err)
}

/// Parse raw JSON text into normalized records.
///
/// `origin` is only used for error messages.
pub fn parse_incidents(raw: &str, origin: &str) -> Result<Vec<IncidentRecord>, LoadError> {
    let value: Value = serde_json::from_str(raw).map_err(|source| LoadError::Parse {
        origin: origin.to_string(),
        source,
    })?;

    let items = match &value {
        Value::Array(items) => items,
        Value::Object(obj) => match obj.get("result") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(LoadError::Shape {
                    origin: origin.to_string(),
                    reason: "expected a top-level array or an object with a \"result\" array"
                        .to_string(),
                })
            }
        },
        _ => {
            return Err(LoadError::Shape {
                origin: origin.to_string(),
                reason: "expected a JSON array or object".to_string(),
            })
        }
    };

    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(items.len());

    for (pos, item) in items.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            warn!(position = pos, "skipping non-object incident entry");
            continue;
        };
        let Some(record) = normalize_record(obj) else {
            warn!(position = pos, "skipping incident without an identifier");
            continue;
        };
        if !seen.insert(record.id.clone()) {
            warn!(incident = %record.id, "skipping duplicate incident");
            continue;
        }
        records.push(record);
    }

    debug!(count = records.len(), origin, "normalized incidents");
    Ok(records)
}

/// Map one raw object onto the normalized record. `None` when no id is present.
pub fn normalize_record(obj: &Map<String, Value>) -> Option<IncidentRecord> {
    let id = first_field(obj, ID_KEYS)?;

    Some(IncidentRecord {
        id,
        short_description: first_field(obj, SHORT_DESCRIPTION_KEYS).unwrap_or_default(),
        description: first_field(obj, DESCRIPTION_KEYS),
        priority: first_field(obj, PRIORITY_KEYS).unwrap_or_else(|| UNSPECIFIED_PRIORITY.to_string()),
        state: first_field(obj, STATE_KEYS).unwrap_or_else(|| UNKNOWN_STATE.to_string()),
        assigned_to: first_field(obj, ASSIGNED_KEYS),
        work_notes: first_field(obj, WORK_NOTES_KEYS),
        resolution: first_field(obj, RESOLUTION_KEYS),
        tag: first_field(obj, TAG_KEYS),
        opened_at: first_field(obj, OPENED_KEYS),
        updated_at: first_field(obj, UPDATED_KEYS),
    })
}

/// First non-blank value among `keys`, stringified and trimmed.
fn first_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .filter_map(scalar_to_string)
        .find(|s| !s.is_empty())
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        // ServiceNow reference fields: {"display_value": "...", "link": "..."}
        Value::Object(o) => o
            .get("display_value")
            .or_else(|| o.get("value"))
            .and_then(scalar_to_string),
        _ => None,
    }
}
