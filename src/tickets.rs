//! Async HTTP client for the ServiceNow incident table.
//!
//! Every operation goes through `/api/now/table/incident`. Records are
//! requested with display values so reference fields come back as plain
//! strings, then normalized with the same field mapping the loader uses.
//! Requests are bounded by one configured timeout and are never retried.

use regex::Regex;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{Secrets, TicketsConfig};
use crate::error::TicketServiceError;
use crate::loader::normalize_record;
use crate::models::IncidentRecord;

const TABLE_PATH: &str = "/api/now/table/incident";

/// ServiceNow `state` value for Closed.
pub const CLOSED_STATE: &str = "7";

static INCIDENT_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

/// Reject numbers that could change the meaning of an encoded query.
pub fn validate_number(number: &str) -> Result<&str, TicketServiceError> {
    if INCIDENT_NUMBER.is_match(number) {
        Ok(number)
    } else {
        Err(TicketServiceError::InvalidNumber(number.to_string()))
    }
}

/// Escape a value for a `sysparm_query` condition; `^` separates conditions.
fn escape_query_value(value: &str) -> String {
    value.replace('^', "^^")
}

/// An incident as held by the ticketing system.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Incident {
    pub sys_id: String,
    #[serde(flatten)]
    pub record: IncidentRecord,
}

impl Incident {
    pub fn number(&self) -> &str {
        &self.record.id
    }

    fn from_value(value: &Value) -> Result<Self, TicketServiceError> {
        let obj = value
            .as_object()
            .ok_or_else(|| TicketServiceError::Parse("incident is not a JSON object".to_string()))?;
        let sys_id = obj
            .get("sys_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let record = normalize_record(obj)
            .ok_or_else(|| TicketServiceError::Parse("incident has no number".to_string()))?;
        Ok(Self { sys_id, record })
    }
}

/// Filters for [`TicketClient::list`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncidentFilter {
    pub state: Option<String>,
    pub priority: Option<String>,
    pub limit: Option<usize>,
}

/// Fields for a new incident.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NewIncident {
    pub short_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListEnvelope {
    result: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RecordEnvelope {
    result: Value,
}

/// Client for list/get/create/update/close.
///
/// Cheap to clone; the inner [`reqwest::Client`] is reference counted.
#[derive(Clone)]
pub struct TicketClient {
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    default_limit: usize,
}

impl TicketClient {
    pub fn new(config: &TicketsConfig, secrets: &Secrets) -> Result<Self, TicketServiceError> {
        if config.base_url.trim().is_empty() {
            return Err(TicketServiceError::Transport(
                "ticket service not configured: set [tickets].base_url".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: secrets.ticket_username.clone(),
            password: secrets.ticket_password.clone(),
            default_limit: config.default_limit,
        })
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}{}{}", self.base_url, TABLE_PATH, suffix)
    }

    fn auth(&self, req: RequestBuilder) -> RequestBuilder {
        let req = req.header("Accept", "application/json");
        match &self.username {
            Some(user) => req.basic_auth(user, self.password.as_ref()),
            None => req,
        }
    }

    fn display_params(req: RequestBuilder) -> RequestBuilder {
        req.query(&[
            ("sysparm_display_value", "true"),
            ("sysparm_exclude_reference_link", "true"),
        ])
    }

    /// `GET /api/now/table/incident?sysparm_query=...`, newest first.
    pub async fn list(&self, filter: &IncidentFilter) -> Result<Vec<Incident>, TicketServiceError> {
        let query = list_query(filter);
        let limit = filter.limit.unwrap_or(self.default_limit).max(1);
        debug!(query = %query, limit, "listing incidents");

        let resp = self
            .auth(Self::display_params(self.client.get(self.url(""))))
            .query(&[("sysparm_query", query), ("sysparm_limit", limit.to_string())])
            .send()
            .await?;
        let envelope: ListEnvelope = parse_body(resp).await?;

        let mut incidents = envelope
            .result
            .iter()
            .map(Incident::from_value)
            .collect::<Result<Vec<_>, _>>()?;
        incidents.sort_by(|a, b| b.record.opened_at.cmp(&a.record.opened_at));
        Ok(incidents)
    }

    /// Look an incident up by its number.
    pub async fn get(&self, number: &str) -> Result<Incident, TicketServiceError> {
        let number = validate_number(number)?;
        let resp = self
            .auth(Self::display_params(self.client.get(self.url(""))))
            .query(&[
                ("sysparm_query", format!("number={}", number)),
                ("sysparm_limit", "1".to_string()),
            ])
            .send()
            .await?;
        let envelope: ListEnvelope = parse_body(resp).await?;
        match envelope.result.first() {
            Some(v) => Incident::from_value(v),
            None => Err(TicketServiceError::NotFound(number.to_string())),
        }
    }

    /// `POST /api/now/table/incident`. Returns the created record.
    pub async fn create(&self, new: &NewIncident) -> Result<Incident, TicketServiceError> {
        let resp = self
            .auth(Self::display_params(self.client.post(self.url(""))))
            .json(new)
            .send()
            .await?;
        let envelope: RecordEnvelope = parse_body(resp).await?;
        let incident = Incident::from_value(&envelope.result)?;
        info!(number = incident.number(), "created incident");
        Ok(incident)
    }

    /// Patch arbitrary fields of the incident with `number`.
    pub async fn update(&self, number: &str, fields: &Map<String, Value>) -> Result<Incident, TicketServiceError> {
        let current = self.get(number).await?;
        let resp = self
            .auth(Self::display_params(
                self.client.patch(self.url(&format!("/{}", current.sys_id))),
            ))
            .json(fields)
            .send()
            .await?;
        let envelope: RecordEnvelope = parse_body(resp).await?;
        let incident = Incident::from_value(&envelope.result)?;
        info!(number, fields = fields.len(), "updated incident");
        Ok(incident)
    }

    /// Set the incident to Closed, optionally recording close notes.
    pub async fn close(&self, number: &str, notes: Option<&str>) -> Result<Incident, TicketServiceError> {
        self.update(number, &close_payload(notes)).await
    }
}

fn list_query(filter: &IncidentFilter) -> String {
    let mut parts = Vec::new();
    if let Some(state) = filter.state.as_deref().filter(|s| !s.is_empty()) {
        parts.push(format!("state={}", escape_query_value(state)));
    }
    if let Some(priority) = filter.priority.as_deref().filter(|p| !p.is_empty()) {
        parts.push(format!("priority={}", escape_query_value(priority)));
    }
    parts.push("ORDERBYDESCsys_created_on".to_string());
    parts.join("^")
}

fn close_payload(notes: Option<&str>) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("state".to_string(), json!(CLOSED_STATE));
    payload.insert("incident_state".to_string(), json!(CLOSED_STATE));
    if let Some(notes) = notes.filter(|n| !n.trim().is_empty()) {
        payload.insert("close_notes".to_string(), json!(notes));
    }
    payload
}

/// Non-2xx responses become `Upstream` with the status and body unchanged.
async fn parse_body<T: for<'de> Deserialize<'de>>(resp: Response) -> Result<T, TicketServiceError> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(TicketServiceError::Upstream {
            status: status.as_u16(),
            message: body,
        });
    }
    serde_json::from_str(&body).map_err(|e| TicketServiceError::Parse(e.to_string()))
}
