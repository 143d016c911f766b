//! In-memory stand-ins for the network and the database.

use crate::api::{HttpRequest, HttpResponse, TokenSource, Transport};
use crate::model::{AuthToken, ExtractedRow};
use crate::store::RowSink;
use async_trait::async_trait;
use extractor_core::{Error, Result};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

pub enum Scripted {
    Respond(u16, String),
    Fail(String),
}

/// Replays canned responses in order and records every request it sees.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, status: u16, body: impl Into<String>) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Respond(status, body.into()));
        self
    }

    pub fn fail(self, message: impl Into<String>) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Fail(message.into()));
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Respond(status, body)) => Ok(HttpResponse::new(
                StatusCode::from_u16(status).unwrap(),
                body,
            )),
            Some(Scripted::Fail(message)) => Err(Error::Transport(message)),
            None => panic!("transport script exhausted at request {}", request.url),
        }
    }
}

/// Hands out `token-1`, `token-2`, ... and counts how often it was asked.
#[derive(Default)]
pub struct CountingTokens {
    issued: Mutex<u32>,
    fail: bool,
}

impl CountingTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            issued: Mutex::new(0),
            fail: true,
        }
    }

    pub fn issued(&self) -> u32 {
        *self.issued.lock().unwrap()
    }
}

#[async_trait]
impl TokenSource for CountingTokens {
    async fn fetch_token(&self) -> Result<AuthToken> {
        let issued = {
            let mut issued = self.issued.lock().unwrap();
            *issued += 1;
            *issued
        };
        if self.fail {
            return Err(Error::Auth("token endpoint returned 400".into()));
        }
        Ok(AuthToken::new(format!("token-{}", issued)))
    }
}

/// Keyed by id; a later row replaces an earlier one.
#[derive(Default)]
pub struct MemorySink {
    rows: Mutex<BTreeMap<String, ExtractedRow>>,
    calls: Mutex<Vec<usize>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<ExtractedRow> {
        self.rows.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    /// Row counts passed to each non-empty `upsert` call.
    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RowSink for MemorySink {
    async fn upsert(&self, rows: &[ExtractedRow]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut stored = self.rows.lock().unwrap();
        for row in rows {
            stored.insert(row.id.clone(), row.clone());
        }
        self.calls.lock().unwrap().push(rows.len());
        Ok(rows.len())
    }
}

/// A query response page of `count` records with ids `first_id..`.
pub fn page_body(entity_key: &str, first_id: usize, count: usize) -> String {
    let records: Vec<Value> = (first_id..first_id + count)
        .map(|id| json!({ "Id": id.to_string(), "Name": format!("record {}", id) }))
        .collect();
    let mut response = serde_json::Map::new();
    response.insert(entity_key.to_string(), Value::Array(records));
    response.insert("startPosition".to_string(), json!(first_id));
    json!({ "QueryResponse": response }).to_string()
}

pub fn empty_page_body() -> String {
    json!({ "QueryResponse": {} }).to_string()
}
