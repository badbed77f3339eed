use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use picvault_core::{
    records::EncryptedRecord,
    store::{DocumentStore, StoreError, UserDocument},
};
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT},
    StatusCode, Url,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, instrument};

const DEFAULT_API_BASE: &str = "https://firestore.googleapis.com/v1";
const USERS_COLLECTION: &str = "users";

/// Firestore connection settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct FirestoreConfig {
    pub project_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Firebase ID token of the signed-in user, sent as a bearer token.
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
}

/// Document store over the Firestore REST API. Each user owns `users/{uid}`.
pub struct FirestoreStore {
    cfg: FirestoreConfig,
    client: reqwest::Client,
}

impl FirestoreStore {
    pub fn new(cfg: FirestoreConfig) -> Self {
        Self {
            cfg,
            client: reqwest::Client::new(),
        }
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("picvault"));
        if let Some(token) = &self.cfg.id_token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}"))?,
            );
        }
        Ok(headers)
    }

    fn document_url(&self, user_id: &str) -> Result<Url> {
        let base = self.cfg.api_base.as_deref().unwrap_or(DEFAULT_API_BASE);
        let mut url = Url::parse(base).with_context(|| format!("invalid api base {base}"))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("api base cannot carry a path: {base}"))?
            .pop_if_empty()
            .extend([
                "projects",
                self.cfg.project_id.as_str(),
                "databases",
                "(default)",
                "documents",
                USERS_COLLECTION,
                user_id,
            ]);
        if let Some(key) = &self.cfg.api_key {
            url.query_pairs_mut().append_pair("key", key);
        }
        Ok(url)
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    fn name(&self) -> &'static str {
        "firestore"
    }

    #[instrument(skip_all, fields(project = %self.cfg.project_id))]
    async fn get(&self, user_id: &str) -> Result<Option<UserDocument>, StoreError> {
        let url = self.document_url(user_id).map_err(storage_err)?;
        let resp = self
            .client
            .get(url)
            .headers(self.headers().map_err(storage_err)?)
            .send()
            .await
            .map_err(storage_err)?;

        if resp.status() == StatusCode::NOT_FOUND {
            debug!("no remote document yet");
            return Ok(None);
        }
        let body: Value = check_status(resp).await?.json().await.map_err(storage_err)?;
        document_from_firestore(&body)
            .map(Some)
            .map_err(storage_err)
    }

    #[instrument(skip_all, fields(project = %self.cfg.project_id, records = urls.len()))]
    async fn set_urls(&self, user_id: &str, urls: &[EncryptedRecord]) -> Result<(), StoreError> {
        let mut url = self.document_url(user_id).map_err(storage_err)?;
        // Only `urls` is in the mask, so other fields survive the write.
        url.query_pairs_mut()
            .append_pair("updateMask.fieldPaths", "urls");

        let body = json!({ "fields": { "urls": records_to_firestore(urls) } });
        let resp = self
            .client
            .patch(url)
            .headers(self.headers().map_err(storage_err)?)
            .json(&body)
            .send()
            .await
            .map_err(storage_err)?;
        check_status(resp).await?;
        Ok(())
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let reason = resp.text().await.unwrap_or_default();
    Err(StoreError::Remote {
        status: status.as_u16(),
        reason,
    })
}

fn records_to_firestore(urls: &[EncryptedRecord]) -> Value {
    let values: Vec<Value> = urls
        .iter()
        .map(|record| {
            let tags: Vec<Value> = record
                .tags
                .iter()
                .map(|tag| json!({ "stringValue": tag.as_str() }))
                .collect();
            json!({
                "mapValue": {
                    "fields": {
                        "url": { "stringValue": record.url.as_str() },
                        "liked": { "booleanValue": record.liked },
                        "tags": { "arrayValue": { "values": tags } },
                    }
                }
            })
        })
        .collect();
    json!({ "arrayValue": { "values": values } })
}

fn document_from_firestore(body: &Value) -> Result<UserDocument> {
    let fields = match body.get("fields") {
        Some(Value::Object(fields)) => fields,
        Some(other) => bail!("document fields must be an object, got {other}"),
        None => return Ok(UserDocument::default()),
    };
    let mut plain = Map::new();
    for (name, value) in fields {
        plain.insert(
            name.clone(),
            from_typed_value(value).with_context(|| format!("decoding field {name}"))?,
        );
    }
    serde_json::from_value(Value::Object(plain)).context("document does not match schema")
}

/// Convert a Firestore typed value into plain JSON.
fn from_typed_value(value: &Value) -> Result<Value> {
    let object = value
        .as_object()
        .ok_or_else(|| anyhow!("typed value must be an object"))?;
    let (kind, inner) = object
        .iter()
        .next()
        .ok_or_else(|| anyhow!("typed value is empty"))?;

    Ok(match kind.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" | "doubleValue" | "stringValue" | "timestampValue" | "bytesValue"
        | "referenceValue" | "geoPointValue" => inner.clone(),
        "integerValue" => {
            // Firestore encodes int64 as a string.
            let raw = inner.as_str().map(str::to_owned).unwrap_or_else(|| inner.to_string());
            Value::from(
                raw.parse::<i64>()
                    .with_context(|| format!("bad integerValue {raw}"))?,
            )
        }
        "arrayValue" => Value::Array(
            match inner.get("values") {
                Some(Value::Array(values)) => values
                    .iter()
                    .map(from_typed_value)
                    .collect::<Result<Vec<_>>>()?,
                _ => Vec::new(),
            },
        ),
        "mapValue" => {
            let mut out = Map::new();
            if let Some(Value::Object(fields)) = inner.get("fields") {
                for (name, value) in fields {
                    out.insert(name.clone(), from_typed_value(value)?);
                }
            }
            Value::Object(out)
        }
        other => bail!("unsupported firestore value type {other}"),
    })
}

fn storage_err<E: ToString>(err: E) -> StoreError {
    StoreError::Storage {
        reason: err.to_string(),
    }
}
