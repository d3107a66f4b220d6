// Firebase Firestore REST API client
// Using service account JWT authentication

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error};

use super::store::{Collection, Document, FieldFilter, RemoteStore, SnapshotStream};

/// Firebase service account credentials
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccount {
    pub project_id: String,
    pub private_key: String,
    pub client_email: String,
}

/// JWT claims for Google OAuth2
#[derive(Debug, Serialize)]
struct Claims {
    iss: String,
    sub: String,
    aud: String,
    iat: i64,
    exp: i64,
    scope: String,
}

/// Cached access token
struct CachedToken {
    token: String,
    expires_at: i64,
}

/// Firebase REST API client
#[derive(Clone)]
pub struct FirebaseClient {
    client: Client,
    service_account: Arc<ServiceAccount>,
    token_cache: Arc<RwLock<Option<CachedToken>>>,
    poll_interval: Duration,
}

impl FirebaseClient {
    /// Create a new Firebase client from service account JSON file
    pub fn from_file(client: Client, path: &str, poll_interval: Duration) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let service_account: ServiceAccount = serde_json::from_str(&content)?;

        Ok(Self {
            client,
            service_account: Arc::new(service_account),
            token_cache: Arc::new(RwLock::new(None)),
            poll_interval,
        })
    }

    /// Get access token (with caching)
    async fn get_access_token(&self) -> Result<String> {
        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                // 60s buffer before expiry
                if cached.expires_at > Utc::now().timestamp() + 60 {
                    return Ok(cached.token.clone());
                }
            }
        }

        let token = self.generate_access_token().await?;

        {
            let mut cache = self.token_cache.write().await;
            *cache = Some(CachedToken {
                token: token.clone(),
                expires_at: Utc::now().timestamp() + 3600,
            });
        }

        Ok(token)
    }

    /// Generate a new access token using JWT
    async fn generate_access_token(&self) -> Result<String> {
        let now = Utc::now().timestamp();

        let claims = Claims {
            iss: self.service_account.client_email.clone(),
            sub: self.service_account.client_email.clone(),
            aud: "https://oauth2.googleapis.com/token".to_string(),
            iat: now,
            exp: now + 3600,
            scope: "https://www.googleapis.com/auth/datastore".to_string(),
        };

        let key = EncodingKey::from_rsa_pem(self.service_account.private_key.as_bytes())?;
        let jwt = encode(&Header::new(Algorithm::RS256), &claims, &key)?;

        // Exchange JWT for access token
        let response = self
            .client
            .post("https://oauth2.googleapis.com/token")
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", &jwt),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let body = response.text().await?;
            error!("Failed to get access token: {}", body);
            return Err(anyhow!("Failed to get access token"));
        }

        let data: Value = response.json().await?;
        let token = data["access_token"]
            .as_str()
            .ok_or_else(|| anyhow!("No access_token in response"))?;

        Ok(token.to_string())
    }

    /// Resource path of the database root
    fn documents_root(&self) -> String {
        format!(
            "projects/{}/databases/(default)/documents",
            self.service_account.project_id
        )
    }

    /// Base URL for Firestore REST API
    fn base_url(&self) -> String {
        format!("https://firestore.googleapis.com/v1/{}", self.documents_root())
    }

    /// Fetch a document, None on 404
    async fn fetch(&self, collection: &str, doc_id: &str) -> Result<Option<Value>> {
        let token = self.get_access_token().await?;
        let url = format!("{}/{}/{}", self.base_url(), collection, doc_id);

        let response = self.client.get(&url).bearer_auth(&token).send().await?;

        if response.status() == 404 {
            return Ok(None);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await?;
            debug!("Firebase error: {}", body);
            return Err(anyhow!("Firebase error: {}", status));
        }

        let doc: Value = response.json().await?;
        Ok(Some(from_firestore_document(&doc)))
    }

    /// PATCH a document. With `merge` only the top-level fields present in `data`
    /// are touched; without it the document is replaced.
    async fn patch(&self, collection: &str, doc_id: &str, data: &Value, merge: bool) -> Result<()> {
        let token = self.get_access_token().await?;

        let mut url = format!("{}/{}/{}", self.base_url(), collection, doc_id);
        if merge {
            // Build updateMask from top-level field names
            let field_paths: String = data
                .as_object()
                .map(|obj| {
                    obj.keys()
                        .map(|k| format!("updateMask.fieldPaths={}", urlencoding::encode(k)))
                        .collect::<Vec<_>>()
                        .join("&")
                })
                .unwrap_or_default();
            url = format!("{}?{}", url, field_paths);
        }

        let response = self
            .client
            .patch(&url)
            .bearer_auth(&token)
            .json(&to_firestore_document(data))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await?;
            debug!("Firebase error: {}", body);
            return Err(anyhow!("Firebase error: {}", status));
        }

        Ok(())
    }

    /// List a whole collection, following pagination
    pub async fn list_documents(&self, collection: &str) -> Result<Vec<Document>> {
        let token = self.get_access_token().await?;
        let base_url = format!("{}/{}", self.base_url(), collection);

        let mut all_docs = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = format!("{}?pageSize=300", base_url);
            if let Some(ref t) = page_token {
                url.push_str(&format!("&pageToken={}", urlencoding::encode(t)));
            }

            let response = self.client.get(&url).bearer_auth(&token).send().await?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await?;
                debug!("Firebase error: {}", body);
                return Err(anyhow!("Firebase error: {}", status));
            }

            let result: Value = response.json().await?;

            if let Some(arr) = result["documents"].as_array() {
                for doc in arr {
                    if let Some(id) = document_id(doc) {
                        all_docs.push(Document {
                            id,
                            data: from_firestore_document(doc),
                        });
                    }
                }
            }

            match result.get("nextPageToken").and_then(|t| t.as_str()) {
                Some(t) => page_token = Some(t.to_string()),
                None => break,
            }
        }

        Ok(all_docs)
    }

    /// Run a structured query with equality filters on a top-level collection
    pub async fn run_query(&self, collection: &str, filters: &[FieldFilter]) -> Result<Vec<Document>> {
        let token = self.get_access_token().await?;
        let url = format!(
            "https://firestore.googleapis.com/v1/{}:runQuery",
            self.documents_root()
        );

        let mut query = json!({
            "from": [{ "collectionId": collection }],
        });

        let mut clauses: Vec<Value> = filters
            .iter()
            .map(|f| {
                json!({
                    "fieldFilter": {
                        "field": { "fieldPath": &f.field },
                        "op": "EQUAL",
                        "value": to_firestore_value(&f.value)
                    }
                })
            })
            .collect();

        if clauses.len() == 1 {
            query["where"] = clauses.remove(0);
        } else if !clauses.is_empty() {
            query["where"] = json!({
                "compositeFilter": {
                    "op": "AND",
                    "filters": clauses
                }
            });
        }

        let response = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .json(&json!({ "structuredQuery": query }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await?;
            debug!("Firebase query error: {}", body);
            return Err(anyhow!("Firebase query error: {}", status));
        }

        // Response is an array of { document: {...} } or { readTime: ... }
        let results: Vec<Value> = response.json().await?;
        Ok(results
            .iter()
            .filter_map(|item| item.get("document"))
            .filter_map(|doc| {
                document_id(doc).map(|id| Document {
                    id,
                    data: from_firestore_document(doc),
                })
            })
            .collect())
    }
}

#[async_trait]
impl RemoteStore for FirebaseClient {
    async fn get_profile(&self, uid: &str) -> Result<Option<Value>> {
        self.fetch(Collection::Users.as_str(), uid).await
    }

    async fn set_profile(&self, uid: &str, patch: &Value) -> Result<()> {
        self.patch(Collection::Users.as_str(), uid, patch, true).await
    }

    async fn put_document(&self, collection: Collection, doc_id: &str, data: &Value) -> Result<()> {
        self.patch(collection.as_str(), doc_id, data, false).await
    }

    async fn create_document(&self, collection: Collection, data: &Value) -> Result<String> {
        let token = self.get_access_token().await?;
        let url = format!("{}/{}", self.base_url(), collection);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .json(&to_firestore_document(data))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await?;
            debug!("Firebase error: {}", body);
            return Err(anyhow!("Firebase error: {}", status));
        }

        let result: Value = response.json().await?;
        document_id(&result).ok_or_else(|| anyhow!("No document name in response"))
    }

    async fn update_document(&self, collection: Collection, doc_id: &str, patch: &Value) -> Result<()> {
        self.patch(collection.as_str(), doc_id, patch, true).await
    }

    async fn delete_document(&self, collection: Collection, doc_id: &str) -> Result<()> {
        let token = self.get_access_token().await?;
        let url = format!("{}/{}/{}", self.base_url(), collection, doc_id);

        let response = self.client.delete(&url).bearer_auth(&token).send().await?;

        if !response.status().is_success() && response.status() != 404 {
            let status = response.status();
            let body = response.text().await?;
            debug!("Firebase delete error: {}", body);
            return Err(anyhow!("Firebase delete error: {}", status));
        }

        Ok(())
    }

    async fn get_document(&self, collection: Collection, doc_id: &str) -> Result<Option<Value>> {
        self.fetch(collection.as_str(), doc_id).await
    }

    async fn query(&self, collection: Collection, filters: &[FieldFilter]) -> Result<Vec<Document>> {
        self.run_query(collection.as_str(), filters).await
    }

    /// REST has no listen channel, so snapshots come from polling; unchanged
    /// polls are not re-emitted.
    fn subscribe(&self, collection: Collection) -> SnapshotStream {
        let client = self.clone();

        futures::stream::unfold(
            (client, None::<Vec<Document>>, true),
            move |(client, last, first)| async move {
                if !first {
                    tokio::time::sleep(client.poll_interval).await;
                }
                let mut last = last;
                loop {
                    match client.list_documents(collection.as_str()).await {
                        Ok(docs) if last.as_ref() == Some(&docs) => {
                            tokio::time::sleep(client.poll_interval).await;
                        }
                        Ok(docs) => {
                            last = Some(docs.clone());
                            return Some((Ok(docs), (client, last, false)));
                        }
                        Err(e) => return Some((Err(e), (client, last, false))),
                    }
                }
            },
        )
        .boxed()
    }
}

/// Last path segment of a document resource name
fn document_id(doc: &Value) -> Option<String> {
    doc["name"]
        .as_str()
        .and_then(|name| name.split('/').last())
        .filter(|id| !id.is_empty())
        .map(|s| s.to_string())
}

/// Convert Firestore document to regular JSON
fn from_firestore_document(doc: &Value) -> Value {
    if let Some(fields) = doc.get("fields") {
        from_firestore_value(&json!({ "mapValue": { "fields": fields } }))
    } else {
        json!({})
    }
}

/// Convert Firestore value to regular JSON value
fn from_firestore_value(value: &Value) -> Value {
    if let Some(s) = value.get("stringValue") {
        return s.clone();
    }
    if let Some(n) = value.get("integerValue") {
        if let Some(s) = n.as_str() {
            return Value::Number(s.parse().unwrap_or(0.into()));
        }
        return n.clone();
    }
    if let Some(n) = value.get("doubleValue") {
        return n.clone();
    }
    if let Some(b) = value.get("booleanValue") {
        return b.clone();
    }
    if let Some(ts) = value.get("timestampValue") {
        return ts.clone();
    }
    if value.get("nullValue").is_some() {
        return Value::Null;
    }
    if let Some(arr) = value.get("arrayValue") {
        let values = arr
            .get("values")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().map(from_firestore_value).collect())
            .unwrap_or_default();
        return Value::Array(values);
    }
    if let Some(map) = value.get("mapValue") {
        let fields: serde_json::Map<String, Value> = map
            .get("fields")
            .and_then(|f| f.as_object())
            .map(|obj| {
                obj.iter()
                    .map(|(k, v)| (k.clone(), from_firestore_value(v)))
                    .collect()
            })
            .unwrap_or_default();
        return Value::Object(fields);
    }
    Value::Null
}

/// Convert regular JSON to Firestore document format
fn to_firestore_document(data: &Value) -> Value {
    json!({
        "fields": to_firestore_fields(data)
    })
}

/// Convert JSON object to Firestore fields
fn to_firestore_fields(data: &Value) -> Value {
    if let Some(obj) = data.as_object() {
        let fields: serde_json::Map<String, Value> = obj
            .iter()
            .map(|(k, v)| (k.clone(), to_firestore_value(v)))
            .collect();
        Value::Object(fields)
    } else {
        json!({})
    }
}

/// Convert JSON value to Firestore value format
fn to_firestore_value(value: &Value) -> Value {
    match value {
        Value::String(s) => json!({ "stringValue": s }),
        Value::Number(n) => {
            if n.is_f64() {
                json!({ "doubleValue": n })
            } else {
                json!({ "integerValue": n.to_string() })
            }
        }
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Array(arr) => {
            let values: Vec<Value> = arr.iter().map(to_firestore_value).collect();
            json!({ "arrayValue": { "values": values } })
        }
        Value::Object(obj) => {
            let fields: serde_json::Map<String, Value> = obj
                .iter()
                .map(|(k, v)| (k.clone(), to_firestore_value(v)))
                .collect();
            json!({ "mapValue": { "fields": fields } })
        }
        Value::Null => json!({ "nullValue": null }),
    }
}
