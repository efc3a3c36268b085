//! Firestore REST v1 implementation of [`DocumentStore`].
//!
//! # Endpoints
//!
//! | Operation | Request |
//! |-----------|---------|
//! | query | `POST {documents}:runQuery` with a structured query |
//! | read | `GET {documents}/{collection}/{id}` (404 means absent) |
//! | merge | `PATCH {documents}/{collection}/{id}?updateMask.fieldPaths=...` |
//!
//! Values travel in Firestore's typed encoding (`{"stringValue": ...}`,
//! `{"timestampValue": ...}` and so on); the codec functions below convert
//! between that encoding and the crate's models.
//!
//! # Authentication
//!
//! When `FIRESTORE_EMULATOR_HOST` is set, requests go to the emulator without
//! credentials. Otherwise, in order of preference:
//!
//! 1. an `access_token` field in the credentials file, or `FIRESTORE_ACCESS_TOKEN`
//! 2. the service account's `private_key`: an RS256-signed JWT is exchanged at
//!    `token_uri` for an OAuth access token, cached until shortly before expiry
//!
//! A credentials file offering neither is rejected at startup.

use super::{DocumentStore, PREFERENCES, PreferenceFilter, StoreError, USERS, WriteMode};
use crate::models::{PreferenceRecord, PreferenceUpdate, UserProfile};
use chrono::{DateTime, SecondsFormat, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

const API_ROOT: &str = "https://firestore.googleapis.com/v1";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Refresh a cached token this long before it expires.
const EXPIRY_MARGIN_SECS: i64 = 60;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// The fields this crate reads from a service account key file.
#[derive(Debug, Deserialize)]
struct ServiceAccount {
    project_id: String,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    client_email: Option<String>,
    #[serde(default)]
    private_key: Option<String>,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

/// How requests to Firestore are authorized.
#[derive(Clone)]
pub enum Auth {
    /// No credentials; the emulator accepts anything.
    Emulator,
    /// A ready-made bearer token.
    Static(String),
    /// Tokens minted from a service account key.
    ServiceAccount(Arc<TokenSource>),
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Emulator => f.write_str("Emulator"),
            Auth::Static(_) => f.write_str("Static(..)"),
            Auth::ServiceAccount(source) => f.debug_tuple("ServiceAccount").field(source).finish(),
        }
    }
}

impl Auth {
    /// Choose how to authorize from a parsed key file and an optional
    /// `FIRESTORE_ACCESS_TOKEN`.
    fn from_account(account: &ServiceAccount, env_token: Option<String>) -> Result<Self, Box<dyn Error>> {
        if let Some(token) = account.access_token.clone().or(env_token) {
            return Ok(Auth::Static(token));
        }
        match (&account.client_email, &account.private_key) {
            (Some(email), Some(key)) => Ok(Auth::ServiceAccount(Arc::new(TokenSource::new(
                email,
                key,
                &account.token_uri,
            )?))),
            _ => Err("Firebase credentials have no access_token and no client_email/private_key; \
                      set FIRESTORE_ACCESS_TOKEN or use a service account key file"
                .into()),
        }
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Exchanges signed service-account assertions for OAuth access tokens.
pub struct TokenSource {
    client: Client,
    client_email: String,
    key: EncodingKey,
    token_uri: String,
    cached: Mutex<Option<(String, DateTime<Utc>)>>,
}

impl fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSource")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl TokenSource {
    /// # Errors
    ///
    /// Fails if `private_key_pem` is not an RSA private key in PEM form.
    pub fn new(client_email: &str, private_key_pem: &str, token_uri: &str) -> Result<Self, Box<dyn Error>> {
        let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| format!("invalid service account private_key: {e}"))?;
        Ok(Self {
            client: Client::builder().timeout(Duration::from_secs(10)).build()?,
            client_email: client_email.to_string(),
            key,
            token_uri: token_uri.to_string(),
            cached: Mutex::new(None),
        })
    }

    /// A valid access token, minting a new one when the cached one is stale.
    pub async fn token(&self) -> Result<String, StoreError> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();
        if let Some((token, expires_at)) = cached.as_ref() {
            if (*expires_at - now).num_seconds() > EXPIRY_MARGIN_SECS {
                return Ok(token.clone());
            }
        }

        let (token, expires_at) = self.mint(now).await?;
        *cached = Some((token.clone(), expires_at));
        Ok(token)
    }

    #[instrument(level = "info", skip_all, fields(client_email = %self.client_email))]
    async fn mint(&self, now: DateTime<Utc>) -> Result<(String, DateTime<Utc>), StoreError> {
        let claims = Claims {
            iss: &self.client_email,
            scope: DATASTORE_SCOPE,
            aud: &self.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| StoreError::Auth(format!("signing assertion: {e}")))?;

        let response = self
            .client
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Auth(format!("token endpoint returned HTTP {status}: {body}")));
        }
        let minted: TokenResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Auth(format!("unexpected token response: {e}")))?;
        info!(expires_in = minted.expires_in, "Minted Firestore access token");
        Ok((
            minted.access_token,
            now + chrono::Duration::seconds(minted.expires_in),
        ))
    }
}

#[derive(Debug)]
pub struct FirestoreStore {
    client: Client,
    documents_url: String,
    auth: Auth,
}

impl FirestoreStore {
    /// Connect using a service account key file.
    ///
    /// # Arguments
    ///
    /// * `path` - JSON key file with at least `project_id`
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, lacks `project_id`, or (outside the
    /// emulator) offers neither an access token nor a usable private key.
    pub fn from_credentials_file(path: &str) -> Result<Self, Box<dyn Error>> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("reading Firebase credentials from {path}: {e}"))?;
        let account: ServiceAccount = serde_json::from_str(&raw)
            .map_err(|e| format!("parsing Firebase credentials from {path}: {e}"))?;

        match std::env::var("FIRESTORE_EMULATOR_HOST") {
            Ok(host) => {
                info!(%host, project = %account.project_id, "Using Firestore emulator");
                Self::new(&format!("http://{host}/v1"), &account.project_id, Auth::Emulator)
            }
            Err(_) => {
                let auth = Auth::from_account(&account, std::env::var("FIRESTORE_ACCESS_TOKEN").ok())
                    .map_err(|e| format!("{path}: {e}"))?;
                info!(project = %account.project_id, ?auth, "Using Firestore");
                Self::new(API_ROOT, &account.project_id, auth)
            }
        }
    }

    pub fn new(api_root: &str, project_id: &str, auth: Auth) -> Result<Self, Box<dyn Error>> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            documents_url: format!(
                "{}/projects/{}/databases/(default)/documents",
                api_root.trim_end_matches('/'),
                project_id
            ),
            auth,
        })
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.documents_url,
            collection,
            urlencoding::encode(id)
        )
    }

    async fn authed(&self, request: RequestBuilder) -> Result<RequestBuilder, StoreError> {
        Ok(match &self.auth {
            Auth::Emulator => request,
            Auth::Static(token) => request.bearer_auth(token),
            Auth::ServiceAccount(source) => request.bearer_auth(source.token().await?),
        })
    }

    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let url = self.document_url(collection, id);
        let response = self.authed(self.client.get(&url)).await?.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(%url, "Document not found");
            return Ok(None);
        }
        let response = check_status(response).await?;
        Ok(Some(response.json::<Value>().await?))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Status {
        status: status.as_u16(),
        body,
    })
}

impl DocumentStore for FirestoreStore {
    #[instrument(level = "info", skip_all, fields(?filter))]
    async fn query_preferences(
        &self,
        filter: &PreferenceFilter,
    ) -> Result<Vec<PreferenceRecord>, StoreError> {
        let url = format!("{}:runQuery", self.documents_url);
        let response = self
            .authed(self.client.post(&url))
            .await?
            .json(&run_query_body(filter))
            .send()
            .await?;
        let rows: Vec<Value> = check_status(response).await?.json().await?;

        let records = rows
            .iter()
            .filter_map(|row| row.get("document"))
            .map(decode_preferences)
            .collect::<Result<Vec<_>, _>>()?;
        info!(count = records.len(), "Queried preference records");
        Ok(records)
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        self.get_document(USERS, user_id)
            .await?
            .map(|doc| decode_profile(&doc))
            .transpose()
    }

    async fn get_preferences(
        &self,
        user_id: &str,
    ) -> Result<Option<PreferenceRecord>, StoreError> {
        self.get_document(PREFERENCES, user_id)
            .await?
            .map(|doc| decode_preferences(&doc))
            .transpose()
    }

    #[instrument(level = "info", skip_all, fields(%user_id, fields = ?update.field_paths(), ?mode))]
    async fn merge_preferences(
        &self,
        user_id: &str,
        update: &PreferenceUpdate,
        mode: WriteMode,
    ) -> Result<(), StoreError> {
        let url = self.document_url(PREFERENCES, user_id);
        let response = self
            .authed(self.client.patch(&url))
            .await?
            .query(&patch_params(update, mode))
            .json(&encode_update(update))
            .send()
            .await?;
        if mode == WriteMode::UpdateExisting && response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(user_id.to_string()));
        }
        check_status(response).await?;
        Ok(())
    }
}

/// Body of a `runQuery` request over the preferences collection.
pub(crate) fn run_query_body(filter: &PreferenceFilter) -> Value {
    let mut filters = vec![field_equals("is_active", json!({ "booleanValue": filter.is_active }))];
    if let Some(freq) = filter.notification_frequency {
        filters.push(field_equals(
            "notification_frequency",
            json!({ "stringValue": freq.as_str() }),
        ));
    }

    let where_clause = if filters.len() == 1 {
        filters.remove(0)
    } else {
        json!({ "compositeFilter": { "op": "AND", "filters": filters } })
    };

    json!({
        "structuredQuery": {
            "from": [{ "collectionId": PREFERENCES }],
            "where": where_clause,
        }
    })
}

fn field_equals(path: &str, value: Value) -> Value {
    json!({
        "fieldFilter": {
            "field": { "fieldPath": path },
            "op": "EQUAL",
            "value": value,
        }
    })
}

/// Query string of a `PATCH`: the update mask, plus an existence
/// precondition for [`WriteMode::UpdateExisting`].
pub(crate) fn patch_params(update: &PreferenceUpdate, mode: WriteMode) -> Vec<(&'static str, &'static str)> {
    let mut params: Vec<(&str, &str)> = update
        .field_paths()
        .into_iter()
        .map(|p| ("updateMask.fieldPaths", p))
        .collect();
    if mode == WriteMode::UpdateExisting {
        params.push(("currentDocument.exists", "true"));
    }
    params
}

/// Body of a `PATCH` writing the fields present in `update`.
pub(crate) fn encode_update(update: &PreferenceUpdate) -> Value {
    let mut fields = Map::new();
    if let Some(sports) = &update.sport_preferences {
        let values: Vec<Value> = sports.iter().map(|s| json!({ "stringValue": s })).collect();
        fields.insert(
            "sport_preferences".to_string(),
            json!({ "arrayValue": { "values": values } }),
        );
    }
    if let Some(freq) = update.notification_frequency {
        fields.insert(
            "notification_frequency".to_string(),
            json!({ "stringValue": freq.as_str() }),
        );
    }
    if let Some(at) = update.last_newsletter_sent {
        fields.insert(
            "last_newsletter_sent".to_string(),
            json!({ "timestampValue": at.to_rfc3339_opts(SecondsFormat::Micros, true) }),
        );
    }
    if let Some(active) = update.is_active {
        fields.insert("is_active".to_string(), json!({ "booleanValue": active }));
    }
    json!({ "fields": fields })
}

/// The document id: last segment of the resource name.
fn document_id(doc: &Value) -> Result<String, StoreError> {
    let name = doc
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::Decode("document without a name".to_string()))?;
    let last = name.rsplit('/').next().unwrap_or(name);
    Ok(urlencoding::decode(last)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| last.to_string()))
}

fn field<'a>(doc: &'a Value, name: &str) -> Option<&'a Value> {
    doc.get("fields").and_then(|f| f.get(name))
}

fn string_field(doc: &Value, name: &str) -> Option<String> {
    field(doc, name)
        .and_then(|v| v.get("stringValue"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn bool_field(doc: &Value, name: &str) -> Option<bool> {
    field(doc, name)
        .and_then(|v| v.get("booleanValue"))
        .and_then(Value::as_bool)
}

fn timestamp_field(doc: &Value, name: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
    let Some(raw) = field(doc, name)
        .and_then(|v| v.get("timestampValue"))
        .and_then(Value::as_str)
    else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(raw)
        .map(|t| Some(t.with_timezone(&Utc)))
        .map_err(|e| StoreError::Decode(format!("{name}: bad timestamp {raw:?}: {e}")))
}

fn string_array_field(doc: &Value, name: &str) -> Vec<String> {
    field(doc, name)
        .and_then(|v| v.get("arrayValue"))
        .and_then(|a| a.get("values"))
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(|v| v.get("stringValue").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn decode_preferences(doc: &Value) -> Result<PreferenceRecord, StoreError> {
    let user_id = document_id(doc)?;
    let defaults = PreferenceRecord::defaults_for(&user_id);
    Ok(PreferenceRecord {
        sport_preferences: string_array_field(doc, "sport_preferences"),
        notification_frequency: string_field(doc, "notification_frequency")
            .unwrap_or(defaults.notification_frequency),
        last_newsletter_sent: timestamp_field(doc, "last_newsletter_sent")?,
        is_active: bool_field(doc, "is_active").unwrap_or(defaults.is_active),
        user_id,
    })
}

pub(crate) fn decode_profile(doc: &Value) -> Result<UserProfile, StoreError> {
    Ok(UserProfile {
        user_id: document_id(doc)?,
        email: string_field(doc, "email"),
        name: string_field(doc, "name"),
    })
}
