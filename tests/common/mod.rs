//! In-process fakes of Pinecone, the Mistral API, and ServiceNow, served
//! with axum on ephemeral ports.
#![allow(dead_code)]

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, patch, post},
    Json, Router,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::{Path as FsPath, PathBuf};
use std::sync::{Arc, Mutex};

use incident_rag::config::{Config, Secrets};
use incident_rag::embedding::cosine_similarity;

/// Dimensionality of the fake embedding space.
pub const DIMS: usize = 4096;

/// Hashed bag-of-words embedding: shared tokens mean higher cosine.
pub fn embed_text(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let mut hash: u32 = 2_166_136_261;
        for b in token.to_lowercase().bytes() {
            hash ^= b as u32;
            hash = hash.wrapping_mul(16_777_619);
        }
        v[(hash as usize) % DIMS] += 1.0;
    }
    v
}

pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn reject(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": { "message": message } })))
}

// ============ Pinecone ============

#[derive(Clone, Default)]
pub struct PineconeFake {
    pub vectors: Arc<Mutex<HashMap<String, (Vec<f32>, Value)>>>,
}

impl PineconeFake {
    pub fn len(&self) -> usize {
        self.vectors.lock().unwrap().len()
    }

    pub fn metadata(&self) -> Vec<Value> {
        self.vectors
            .lock()
            .unwrap()
            .values()
            .map(|(_, m)| m.clone())
            .collect()
    }
}

pub async fn start_pinecone() -> (String, PineconeFake) {
    let fake = PineconeFake::default();
    let app = Router::new()
        .route("/vectors/upsert", post(pc_upsert))
        .route("/vectors/delete", post(pc_delete))
        .route("/vectors/list", get(pc_list))
        .route("/query", post(pc_query))
        .route("/describe_index_stats", post(pc_stats))
        .with_state(fake.clone());
    (serve(app).await, fake)
}

fn require_api_key(headers: &HeaderMap) -> Result<(), (StatusCode, Json<Value>)> {
    if headers.contains_key("Api-Key") {
        Ok(())
    } else {
        Err(reject(StatusCode::UNAUTHORIZED, "missing Api-Key"))
    }
}

fn to_vec(value: &Value) -> Vec<f32> {
    value
        .as_array()
        .map(|a| a.iter().filter_map(Value::as_f64).map(|x| x as f32).collect())
        .unwrap_or_default()
}

async fn pc_upsert(State(fake): State<PineconeFake>, headers: HeaderMap, Json(body): Json<Value>) -> ApiResult {
    require_api_key(&headers)?;
    let vectors = body["vectors"].as_array().cloned().unwrap_or_default();
    let mut store = fake.vectors.lock().unwrap();
    for v in &vectors {
        let id = v["id"].as_str().unwrap_or_default().to_string();
        store.insert(id, (to_vec(&v["values"]), v["metadata"].clone()));
    }
    Ok(Json(json!({ "upsertedCount": vectors.len() })))
}

/// Page size cap of the fake list endpoint, small so paging is exercised.
pub const LIST_PAGE_CAP: usize = 2;

/// Serverless indexes refuse metadata-filter deletes; only ids are accepted.
async fn pc_delete(State(fake): State<PineconeFake>, headers: HeaderMap, Json(body): Json<Value>) -> ApiResult {
    require_api_key(&headers)?;
    if body.get("filter").is_some() {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            "Serverless and Starter indexes do not support deleting with metadata filtering",
        ));
    }
    let ids = body["ids"]
        .as_array()
        .ok_or_else(|| reject(StatusCode::BAD_REQUEST, "ids required"))?;
    if ids.len() > 1000 {
        return Err(reject(StatusCode::BAD_REQUEST, "too many ids"));
    }
    let mut store = fake.vectors.lock().unwrap();
    for id in ids.iter().filter_map(Value::as_str) {
        store.remove(id);
    }
    Ok(Json(json!({})))
}

/// Ids by prefix, sorted; `paginationToken` is the offset of the next page.
async fn pc_list(
    State(fake): State<PineconeFake>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    require_api_key(&headers)?;
    let prefix = params.get("prefix").cloned().unwrap_or_default();
    let limit = params
        .get("limit")
        .and_then(|l| l.parse::<usize>().ok())
        .unwrap_or(100)
        .min(LIST_PAGE_CAP);
    let offset: usize = params
        .get("paginationToken")
        .and_then(|t| t.parse().ok())
        .unwrap_or(0);

    let mut ids: Vec<String> = fake
        .vectors
        .lock()
        .unwrap()
        .keys()
        .filter(|id| id.starts_with(&prefix))
        .cloned()
        .collect();
    ids.sort();
    let page: Vec<Value> = ids
        .iter()
        .skip(offset)
        .take(limit)
        .map(|id| json!({ "id": id }))
        .collect();

    let mut body = json!({ "vectors": page, "namespace": params.get("namespace") });
    if offset + limit < ids.len() {
        body["pagination"] = json!({ "next": (offset + limit).to_string() });
    }
    Ok(Json(body))
}

async fn pc_query(State(fake): State<PineconeFake>, headers: HeaderMap, Json(body): Json<Value>) -> ApiResult {
    require_api_key(&headers)?;
    let query = to_vec(&body["vector"]);
    let top_k = body["topK"].as_u64().unwrap_or(10) as usize;
    let include_values = body["includeValues"].as_bool().unwrap_or(false);
    let incident = body["filter"]["incident_number"]["$eq"].as_str();

    let store = fake.vectors.lock().unwrap();
    let mut matches: Vec<(String, f64, &Vec<f32>, &Value)> = store
        .iter()
        .filter(|(_, (_, meta))| incident.is_none() || meta["incident_number"].as_str() == incident)
        .map(|(id, (values, meta))| (id.clone(), cosine_similarity(&query, values) as f64, values, meta))
        .collect();
    matches.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then_with(|| a.0.cmp(&b.0)));
    matches.truncate(top_k);

    let matches: Vec<Value> = matches
        .into_iter()
        .map(|(id, score, values, meta)| {
            let mut m = json!({ "id": id, "score": score, "metadata": meta });
            if include_values {
                m["values"] = json!(values);
            }
            m
        })
        .collect();
    Ok(Json(json!({ "matches": matches, "namespace": body["namespace"] })))
}

async fn pc_stats(State(fake): State<PineconeFake>, headers: HeaderMap) -> ApiResult {
    require_api_key(&headers)?;
    let count = fake.len();
    Ok(Json(json!({
        "namespaces": { "default": { "vectorCount": count } },
        "dimension": DIMS,
        "totalVectorCount": count
    })))
}

// ============ Mistral (embeddings + chat) ============

/// Chat completions fail for any question containing this marker.
pub const FAIL_MARKER: &str = "FAIL";

/// Chat completions stall for [`STALL`] on any question containing this marker.
pub const SLOW_MARKER: &str = "SLOW";

/// How long stalled fakes hold a request before answering.
pub const STALL: std::time::Duration = std::time::Duration::from_secs(3);

/// A server that accepts every request and answers only after [`STALL`].
pub async fn start_stalled_server() -> String {
    let app = Router::new().fallback(|| async {
        tokio::time::sleep(STALL).await;
        Json(json!({}))
    });
    serve(app).await
}

#[derive(Clone, Default)]
pub struct LlmFake {
    pub completions: Arc<Mutex<usize>>,
}

pub async fn start_llm() -> (String, LlmFake) {
    let fake = LlmFake::default();
    let app = Router::new()
        .route("/v1/embeddings", post(llm_embeddings))
        .route("/v1/chat/completions", post(llm_chat))
        .with_state(fake.clone());
    (serve(app).await, fake)
}

fn require_bearer(headers: &HeaderMap) -> Result<(), (StatusCode, Json<Value>)> {
    match headers.get("authorization").and_then(|h| h.to_str().ok()) {
        Some(v) if v.starts_with("Bearer ") => Ok(()),
        _ => Err(reject(StatusCode::UNAUTHORIZED, "Unauthorized")),
    }
}

async fn llm_embeddings(headers: HeaderMap, Json(body): Json<Value>) -> ApiResult {
    require_bearer(&headers)?;
    let inputs = body["input"].as_array().cloned().unwrap_or_default();
    let data: Vec<Value> = inputs
        .iter()
        .enumerate()
        .map(|(i, text)| {
            json!({
                "object": "embedding",
                "index": i,
                "embedding": embed_text(text.as_str().unwrap_or_default()),
            })
        })
        .collect();
    Ok(Json(json!({ "object": "list", "model": body["model"], "data": data })))
}

/// Answers by echoing the context block of the system prompt.
async fn llm_chat(State(fake): State<LlmFake>, headers: HeaderMap, Json(body): Json<Value>) -> ApiResult {
    require_bearer(&headers)?;
    *fake.completions.lock().unwrap() += 1;

    let messages = body["messages"].as_array().cloned().unwrap_or_default();
    let question = messages
        .last()
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default();
    if question.contains(FAIL_MARKER) {
        return Err(reject(StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded"));
    }
    if question.contains(SLOW_MARKER) {
        tokio::time::sleep(STALL).await;
    }
    let system = messages
        .first()
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default();
    let context = system.split("Context:\n").nth(1).unwrap_or_default();

    Ok(Json(json!({
        "id": "cmpl-test",
        "object": "chat.completion",
        "model": body["model"],
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": format!("According to the incident records:\n{}", context),
            },
            "finish_reason": "stop"
        }]
    })))
}

// ============ ServiceNow ============

#[derive(Clone, Default)]
pub struct ServiceNowFake {
    pub records: Arc<Mutex<Vec<Value>>>,
    seq: Arc<Mutex<u32>>,
}

impl ServiceNowFake {
    fn insert(&self, fields: &Map<String, Value>) -> Value {
        let mut seq = self.seq.lock().unwrap();
        *seq += 1;
        let mut record = json!({
            "sys_id": format!("sys{:04}", *seq),
            "number": format!("INC{:07}", 10_000 + *seq),
            "state": "1",
            "priority": "4",
            "sys_created_on": format!("2024-06-01 10:{:02}:00", *seq),
        });
        for (k, v) in fields {
            record[k.as_str()] = v.clone();
        }
        self.records.lock().unwrap().push(record.clone());
        record
    }

    pub fn seed(&self, short_description: &str, state: &str) -> String {
        let mut fields = Map::new();
        fields.insert("short_description".to_string(), json!(short_description));
        fields.insert("state".to_string(), json!(state));
        self.insert(&fields)["number"]
            .as_str()
            .unwrap_or_default()
            .to_string()
    }
}

pub async fn start_servicenow() -> (String, ServiceNowFake) {
    let fake = ServiceNowFake::default();
    let app = Router::new()
        .route("/api/now/table/incident", post(sn_create).get(sn_list))
        .route("/api/now/table/incident/{sys_id}", patch(sn_patch))
        .with_state(fake.clone());
    (serve(app).await, fake)
}

fn require_basic(headers: &HeaderMap) -> Result<(), (StatusCode, Json<Value>)> {
    match headers.get("authorization").and_then(|h| h.to_str().ok()) {
        Some(v) if v.starts_with("Basic ") => Ok(()),
        _ => Err(reject(StatusCode::UNAUTHORIZED, "User Not Authenticated")),
    }
}

async fn sn_list(
    State(fake): State<ServiceNowFake>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    require_basic(&headers)?;
    let query = params.get("sysparm_query").cloned().unwrap_or_default();
    let limit: usize = params
        .get("sysparm_limit")
        .and_then(|l| l.parse().ok())
        .unwrap_or(10_000);
    let conditions: Vec<(String, String)> = query
        .split('^')
        .filter(|p| !p.starts_with("ORDERBY"))
        .filter_map(|p| p.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let records = fake.records.lock().unwrap();
    let mut matched: Vec<Value> = records
        .iter()
        .filter(|r| {
            conditions
                .iter()
                .all(|(k, v)| r[k.as_str()].as_str() == Some(v.as_str()))
        })
        .cloned()
        .collect();
    matched.sort_by(|a, b| {
        b["sys_created_on"]
            .as_str()
            .cmp(&a["sys_created_on"].as_str())
    });
    matched.truncate(limit);
    Ok(Json(json!({ "result": matched })))
}

async fn sn_create(
    State(fake): State<ServiceNowFake>,
    headers: HeaderMap,
    Json(body): Json<Map<String, Value>>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    require_basic(&headers)?;
    let record = fake.insert(&body);
    Ok((StatusCode::CREATED, Json(json!({ "result": record }))))
}

async fn sn_patch(
    State(fake): State<ServiceNowFake>,
    headers: HeaderMap,
    Path(sys_id): Path<String>,
    Json(body): Json<Map<String, Value>>,
) -> ApiResult {
    require_basic(&headers)?;
    let mut records = fake.records.lock().unwrap();
    let record = records
        .iter_mut()
        .find(|r| r["sys_id"].as_str() == Some(sys_id.as_str()))
        .ok_or_else(|| reject(StatusCode::NOT_FOUND, "No Record found"))?;
    for (k, v) in body {
        record[k.as_str()] = v;
    }
    Ok(Json(json!({ "result": record.clone() })))
}

// ============ Configuration and data ============

pub fn test_config(pinecone: &str, llm: &str, tickets: &str, data_path: &FsPath) -> Config {
    let mut cfg = Config::default();
    cfg.data.path = data_path.display().to_string();
    cfg.data.timeout_secs = 5;
    cfg.index.host = pinecone.to_string();
    cfg.index.timeout_secs = 5;
    cfg.embedding.dims = DIMS;
    cfg.embedding.timeout_secs = 5;
    cfg.llm.base_url = llm.to_string();
    cfg.llm.timeout_secs = 5;
    cfg.tickets.base_url = tickets.to_string();
    cfg.tickets.timeout_secs = 5;
    cfg
}

fn lookup(with_ticket_credentials: bool) -> impl Fn(&str) -> Option<String> {
    move |key| {
        let value = match key {
            "PINECONE_API_KEY" => Some("pc-test"),
            "MISTRAL_API_KEY" => Some("mistral-test"),
            "TICKET_USERNAME" if with_ticket_credentials => Some("admin"),
            "TICKET_PASSWORD" if with_ticket_credentials => Some("secret"),
            _ => None,
        };
        value.map(str::to_string)
    }
}

pub fn test_secrets() -> Secrets {
    Secrets::from_lookup(lookup(true)).unwrap()
}

pub fn secrets_without_ticket_credentials() -> Secrets {
    Secrets::from_lookup(lookup(false)).unwrap()
}

pub const SAMPLE_INCIDENTS: &str = r#"{
  "result": [
    {
      "incidentNumber": "INC0000039",
      "incidentDescription": "Mail server not responding",
      "stateOfTicket": "Closed",
      "severity_priority": "1",
      "incidentAssignedTo": "Beth Anglin",
      "howItWasResolved": "Restarted service"
    },
    {
      "incidentNumber": "INC0000040",
      "incidentDescription": "VPN disconnects for remote staff",
      "stateOfTicket": "In Progress",
      "severity_priority": "2",
      "workNotes": "Collected client logs"
    },
    {
      "incidentNumber": "INC0000041",
      "incidentDescription": "Printer jam on third floor",
      "stateOfTicket": "New"
    },
    {
      "incidentDescription": "Record without an identifier"
    }
  ],
  "countOfIncidentsByStatus": { "count": [{ "incidentState": "Closed", "incidentByStateCount": 1 }] },
  "sizeOfTotalIncident": 4
}"#;

/// Write the sample export into `dir` and return its path.
pub fn write_incidents(dir: &FsPath) -> PathBuf {
    let path = dir.join("incidents.json");
    std::fs::write(&path, SAMPLE_INCIDENTS).unwrap();
    path
}
