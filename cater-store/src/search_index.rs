use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use cater_core::search::{AggregateUpdate, IndexedDoc, SearchIndex};
use cater_core::{CoreError, CoreResult};

const RETRY_ON_CONFLICT: u32 = 5;

const INIT_ID: &str = "if (ctx._source.id == null) { ctx._source.id = params.id; } ";

const APPEND_BOOKING_SCRIPT: &str = "\
if (ctx._source.bookings == null) { ctx._source.bookings = []; } \
if (!ctx._source.bookings.contains(params.booking_id)) { ctx._source.bookings.add(params.booking_id); } \
ctx._source.lastBookingDate = params.date;";

const REMOVE_BOOKING_SCRIPT: &str = "\
if (ctx._source.bookings != null) { ctx._source.bookings.removeIf(b -> b == params.booking_id); }";

/// Elasticsearch-backed mirror. One index per collection, named `{prefix}{collection}`.
/// The domain id doubles as the Elasticsearch `_id`.
pub struct ElasticIndex {
    http: reqwest::Client,
    base_url: String,
    prefix: String,
}

impl ElasticIndex {
    pub fn new(base_url: &str, prefix: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            prefix: prefix.to_string(),
        }
    }

    fn index_url(&self, collection: &str) -> String {
        format!("{}/{}{}", self.base_url, self.prefix, collection)
    }

    fn update_url(&self, collection: &str, id: Uuid) -> String {
        format!(
            "{}/_update/{}?refresh=wait_for&retry_on_conflict={}",
            self.index_url(collection),
            id,
            RETRY_ON_CONFLICT
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> CoreResult<(StatusCode, Value)> {
        let response = request.send().await.map_err(index_error)?;
        let status = response.status();
        let body = if status == StatusCode::NO_CONTENT {
            Value::Null
        } else {
            response.json().await.map_err(index_error)?
        };
        Ok((status, body))
    }
}

fn index_error(err: reqwest::Error) -> CoreError {
    CoreError::StorageError(format!("search index: {err}"))
}

fn failure(status: StatusCode, body: &Value) -> CoreError {
    let reason = body["error"]["reason"]
        .as_str()
        .map(String::from)
        .unwrap_or_else(|| body["error"].to_string());
    CoreError::StorageError(format!("search index returned {status}: {reason}"))
}

/// Scripted upsert body for an aggregate change on the document `id`.
pub fn aggregate_script(id: Uuid, update: &AggregateUpdate) -> Value {
    let (source, params) = match update {
        AggregateUpdate::AppendBooking { booking_id, date } => (
            APPEND_BOOKING_SCRIPT,
            json!({ "id": id, "booking_id": booking_id, "date": date }),
        ),
        AggregateUpdate::RemoveBooking { booking_id } => (
            REMOVE_BOOKING_SCRIPT,
            json!({ "id": id, "booking_id": booking_id }),
        ),
    };
    json!({
        "scripted_upsert": true,
        "upsert": {},
        "script": {
            "lang": "painless",
            "source": format!("{INIT_ID}{source}"),
            "params": params
        }
    })
}

/// Hits of a `_search` response plus the total count. Handles both the
/// `{"value": n}` and the legacy plain-number total.
pub fn parse_hits(body: &Value) -> (Vec<IndexedDoc>, u64) {
    let hits = &body["hits"];
    let total = hits["total"]["value"]
        .as_u64()
        .or_else(|| hits["total"].as_u64())
        .unwrap_or(0);
    let docs = hits["hits"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|hit| {
                    Some(IndexedDoc {
                        internal_id: hit["_id"].as_str()?.to_string(),
                        doc: hit["_source"].clone(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    (docs, total)
}

/// Document of a `GET _doc/{id}` response, if it was found.
pub fn parse_found(body: &Value) -> Option<IndexedDoc> {
    if body["found"].as_bool() != Some(true) {
        return None;
    }
    Some(IndexedDoc {
        internal_id: body["_id"].as_str()?.to_string(),
        doc: body["_source"].clone(),
    })
}

#[async_trait]
impl SearchIndex for ElasticIndex {
    async fn create_doc(&self, collection: &str, doc: &Value) -> CoreResult<IndexedDoc> {
        let request = match doc["id"].as_str() {
            Some(id) => self.http.put(format!(
                "{}/_doc/{}?refresh=wait_for",
                self.index_url(collection),
                id
            )),
            None => self
                .http
                .post(format!("{}/_doc?refresh=wait_for", self.index_url(collection))),
        }
        .json(doc);
        let (status, body) = self.send(request).await?;
        if !status.is_success() {
            return Err(failure(status, &body));
        }

        let internal_id = body["_id"]
            .as_str()
            .ok_or_else(|| CoreError::StorageError("search index: create returned no _id".into()))?
            .to_string();
        debug!(collection, internal_id = %internal_id, "Indexed document");
        Ok(IndexedDoc {
            internal_id,
            doc: doc.clone(),
        })
    }

    async fn get_doc(&self, collection: &str, id: Uuid) -> CoreResult<Option<IndexedDoc>> {
        let request = self
            .http
            .get(format!("{}/_doc/{}", self.index_url(collection), id));
        let (status, body) = self.send(request).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(failure(status, &body));
        }
        Ok(parse_found(&body))
    }

    async fn update_doc(&self, collection: &str, internal_id: &str, partial: &Value) -> CoreResult<()> {
        let request = self
            .http
            .post(format!(
                "{}/_update/{}?refresh=wait_for&retry_on_conflict={}",
                self.index_url(collection),
                internal_id,
                RETRY_ON_CONFLICT
            ))
            .json(&json!({ "doc": partial }));
        let (status, body) = self.send(request).await?;
        if !status.is_success() {
            return Err(failure(status, &body));
        }
        Ok(())
    }

    async fn remove_doc(&self, collection: &str, internal_id: &str) -> CoreResult<()> {
        let request = self.http.delete(format!(
            "{}/_doc/{}?refresh=wait_for",
            self.index_url(collection),
            internal_id
        ));
        let (status, body) = self.send(request).await?;
        // Already gone counts as removed
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(failure(status, &body))
    }

    async fn query(
        &self,
        collection: &str,
        query: &str,
        limit: u32,
        offset: u32,
    ) -> CoreResult<(Vec<IndexedDoc>, u64)> {
        let mut params = vec![
            ("size", limit.to_string()),
            ("from", offset.to_string()),
        ];
        if !query.trim().is_empty() {
            params.push(("q", query.to_string()));
        }

        let request = self
            .http
            .get(format!("{}/_search", self.index_url(collection)))
            .query(&params);
        let (status, body) = self.send(request).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok((Vec::new(), 0));
        }
        if !status.is_success() {
            return Err(failure(status, &body));
        }
        Ok(parse_hits(&body))
    }

    async fn upsert_doc(&self, collection: &str, id: Uuid, doc: &Value) -> CoreResult<()> {
        let request = self
            .http
            .post(self.update_url(collection, id))
            .json(&json!({ "doc": doc, "doc_as_upsert": true }));
        let (status, body) = self.send(request).await?;
        if !status.is_success() {
            return Err(failure(status, &body));
        }
        Ok(())
    }

    async fn apply_aggregate(
        &self,
        collection: &str,
        id: Uuid,
        update: &AggregateUpdate,
    ) -> CoreResult<()> {
        let request = self
            .http
            .post(self.update_url(collection, id))
            .json(&aggregate_script(id, update));
        let (status, body) = self.send(request).await?;
        if !status.is_success() {
            return Err(failure(status, &body));
        }
        Ok(())
    }
}
