//! Reference loading: turn a reference string into a parsed JSON value.
//!
//! A reference is one of:
//! - an `http://` / `https://` URL (fetched once with a plain GET),
//! - an inline base64 payload (long strings drawn only from the base64 alphabet),
//! - a filesystem path (`.json` is parsed as JSON, anything else as YAML).

use crate::error::{OpenApiToolsError, Result};
use crate::resolver;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Reference used when none is configured.
pub const DEFAULT_REFERENCE: &str = "reference.yaml";

/// Upper bound on the whole load, including the HTTP fetch.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Strings shorter than this are never treated as inline base64.
const BASE64_MIN_LEN: usize = 64;

/// Digest verification policy.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HashPolicy {
    /// Log a warning if the digest doesn't match.
    #[default]
    Warn,
    /// Fail startup if the digest doesn't match.
    Fail,
    /// Skip verification.
    Ignore,
}

impl FromStr for HashPolicy {
    type Err = OpenApiToolsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "warn" => Ok(Self::Warn),
            "fail" => Ok(Self::Fail),
            "ignore" => Ok(Self::Ignore),
            other => Err(OpenApiToolsError::Config(format!(
                "invalid hash policy '{other}' (expected warn, fail or ignore)"
            ))),
        }
    }
}

/// Where a loaded document came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    /// Fetched over HTTP. The URL is stored with credentials and query removed.
    Url(String),
    /// Decoded from an inline base64 payload.
    Base64,
    /// A base64-looking string that could not be decoded, kept verbatim.
    InlineLiteral,
    /// Read from disk.
    File(PathBuf),
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Url(url) => write!(f, "URL: {url}"),
            Provenance::Base64 => f.write_str("base64"),
            Provenance::InlineLiteral => f.write_str("inline literal"),
            Provenance::File(path) => write!(f, "file: {}", path.display()),
        }
    }
}

/// Knobs for [`ReferenceLoader`].
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Pinned digest, `sha256:<hex>` or bare hex.
    pub expected_sha256: Option<String>,
    pub hash_policy: HashPolicy,
    pub timeout: Duration,
    /// Inline local `$ref`s after parsing.
    pub inline_refs: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            expected_sha256: None,
            hash_policy: HashPolicy::default(),
            timeout: DEFAULT_STARTUP_TIMEOUT,
            inline_refs: true,
        }
    }
}

/// A parsed reference plus what is known about its origin.
#[derive(Debug, Clone)]
pub struct LoadedReference {
    pub value: Value,
    pub provenance: Provenance,
    /// `sha256:<hex>` of the raw bytes the value was parsed from.
    pub sha256: String,
}

#[derive(Debug, Clone)]
pub struct ReferenceLoader {
    client: reqwest::Client,
    options: LoadOptions,
    expected_digest: Option<String>,
}

impl ReferenceLoader {
    /// Create a loader with a default HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the pinned digest is malformed or the HTTP client cannot be built.
    pub fn new(options: LoadOptions) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|e| OpenApiToolsError::Config(format!("failed to build HTTP client: {e}")))?;
        Self::with_client(client, options)
    }

    /// Create a loader that reuses `client` for URL references.
    ///
    /// # Errors
    ///
    /// Returns an error if the pinned digest is malformed.
    pub fn with_client(client: reqwest::Client, options: LoadOptions) -> Result<Self> {
        let expected_digest = options
            .expected_sha256
            .as_deref()
            .map(normalize_digest)
            .transpose()?;
        Ok(Self {
            client,
            options,
            expected_digest,
        })
    }

    /// Load `reference`, or [`DEFAULT_REFERENCE`] when absent or blank.
    ///
    /// # Errors
    ///
    /// Returns [`OpenApiToolsError::ReferenceLoad`] if the source cannot be obtained in time,
    /// [`OpenApiToolsError::ReferenceParse`] if it is neither JSON nor YAML, and
    /// [`OpenApiToolsError::HashMismatch`] if the digest pin fails under [`HashPolicy::Fail`].
    pub async fn load(&self, reference: Option<&str>) -> Result<LoadedReference> {
        let reference = reference
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REFERENCE);

        let (raw, mut value, provenance) =
            match tokio::time::timeout(self.options.timeout, self.load_source(reference)).await {
                Ok(loaded) => loaded?,
                Err(_) => {
                    return Err(OpenApiToolsError::ReferenceLoad {
                        reference: display_reference(reference),
                        reason: format!(
                            "timed out after {}s",
                            self.options.timeout.as_secs_f64()
                        ),
                        status: None,
                    });
                }
            };

        let sha256 = format!("sha256:{}", hex::encode(Sha256::digest(&raw)));
        self.verify_digest(&sha256)?;

        if self.options.inline_refs {
            let stats = resolver::inline_local_refs(&mut value);
            if stats.inlined > 0 || stats.unresolved > 0 {
                tracing::debug!(
                    inlined = stats.inlined,
                    unresolved = stats.unresolved,
                    cyclic = stats.cyclic,
                    "inlined local $refs"
                );
            }
        }

        Ok(LoadedReference {
            value,
            provenance,
            sha256,
        })
    }

    async fn load_source(&self, reference: &str) -> Result<(Vec<u8>, Value, Provenance)> {
        if is_url(reference) {
            self.load_url(reference).await
        } else if is_base64(reference) {
            Ok(load_base64(reference))
        } else {
            load_file(Path::new(reference)).await
        }
    }

    async fn load_url(&self, reference: &str) -> Result<(Vec<u8>, Value, Provenance)> {
        let url = Url::parse(reference).map_err(|e| OpenApiToolsError::ReferenceLoad {
            reference: display_reference(reference),
            reason: format!("invalid URL: {e}"),
            status: None,
        })?;
        let redacted = redact_url(&url);
        tracing::info!(url = %redacted, "fetching OpenAPI reference");

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| OpenApiToolsError::ReferenceLoad {
                reference: redacted.clone(),
                reason: sanitize_reqwest_error(&e),
                status: None,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(OpenApiToolsError::ReferenceLoad {
                reference: redacted,
                reason: "fetch failed".to_string(),
                status: Some(status.as_u16()),
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| OpenApiToolsError::ReferenceLoad {
                reference: redacted.clone(),
                reason: sanitize_reqwest_error(&e),
                status: Some(status.as_u16()),
            })?;

        let value = parse_json_or_yaml(&body, &redacted)?;
        Ok((body.to_vec(), value, Provenance::Url(redacted)))
    }
}

/// `http://` or `https://` prefix.
#[must_use]
pub fn is_url(reference: &str) -> bool {
    reference.starts_with("http://") || reference.starts_with("https://")
}

/// Long strings consisting only of the base64 alphabet.
#[must_use]
pub fn is_base64(reference: &str) -> bool {
    reference.len() > BASE64_MIN_LEN
        && reference
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=')
}

/// Drop credentials, query and fragment from a URL before it is logged or reported.
#[must_use]
pub fn redact_url(url: &Url) -> String {
    let mut u = url.clone();
    let _ = u.set_username("");
    let _ = u.set_password(None);
    u.set_query(None);
    u.set_fragment(None);
    u.to_string()
}

/// Render a reqwest error with any embedded URL redacted.
#[must_use]
pub fn sanitize_reqwest_error(e: &reqwest::Error) -> String {
    let mut msg = e.to_string();
    if let Some(u) = e.url() {
        msg = msg.replace(u.as_str(), &redact_url(u));
    }
    msg
}

fn display_reference(reference: &str) -> String {
    if is_url(reference) {
        if let Ok(url) = Url::parse(reference) {
            return redact_url(&url);
        }
    }
    if is_base64(reference) {
        return "<inline base64>".to_string();
    }
    reference.to_string()
}

fn load_base64(reference: &str) -> (Vec<u8>, Value, Provenance) {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(reference)
        .map_err(|e| e.to_string())
        .and_then(|bytes| {
            serde_json::from_slice::<Value>(&bytes)
                .map(|value| (bytes, value))
                .map_err(|e| e.to_string())
        });

    match decoded {
        Ok((bytes, value)) => (bytes, value, Provenance::Base64),
        Err(reason) => {
            tracing::warn!(
                %reason,
                "reference looks like base64 but is not a base64-encoded JSON document; using it verbatim"
            );
            (
                reference.as_bytes().to_vec(),
                Value::String(reference.to_string()),
                Provenance::InlineLiteral,
            )
        }
    }
}

async fn load_file(path: &Path) -> Result<(Vec<u8>, Value, Provenance)> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| OpenApiToolsError::ReferenceLoad {
            reference: path.display().to_string(),
            reason: e.to_string(),
            status: None,
        })?;

    let location = path.display().to_string();
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let value = if is_json {
        serde_json::from_slice(&bytes).map_err(|e| OpenApiToolsError::ReferenceParse {
            location,
            message: e.to_string(),
        })?
    } else {
        parse_yaml(&bytes, &location)?
    };

    let absolute = tokio::fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf());
    Ok((bytes, value, Provenance::File(absolute)))
}

fn parse_json_or_yaml(body: &[u8], location: &str) -> Result<Value> {
    serde_json::from_slice(body).or_else(|_| parse_yaml(body, location))
}

fn parse_yaml(body: &[u8], location: &str) -> Result<Value> {
    let yaml: serde_yaml::Value =
        serde_yaml::from_slice(body).map_err(|e| OpenApiToolsError::ReferenceParse {
            location: location.to_string(),
            message: e.to_string(),
        })?;
    Ok(yaml_to_json(yaml))
}

/// Convert YAML into JSON, stringifying non-string mapping keys (`200:` response codes).
fn yaml_to_json(yaml: serde_yaml::Value) -> Value {
    match yaml {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map_or(Value::Null, Value::Number)
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(items) => {
            Value::Array(items.into_iter().map(yaml_to_json).collect())
        }
        serde_yaml::Value::Mapping(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (yaml_key(k), yaml_to_json(v)))
                .collect(),
        ),
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

fn yaml_key(key: serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Null => "null".to_string(),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

fn normalize_digest(pin: &str) -> Result<String> {
    let pin = pin.trim();
    let hex_part = pin.strip_prefix("sha256:").unwrap_or(pin);
    if hex_part.len() != 64 || !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(OpenApiToolsError::Config(format!(
            "invalid reference digest '{pin}' (expected sha256:<64 hex chars>)"
        )));
    }
    Ok(format!("sha256:{}", hex_part.to_ascii_lowercase()))
}

impl ReferenceLoader {
    fn verify_digest(&self, actual: &str) -> Result<()> {
        let Some(expected) = &self.expected_digest else {
            return Ok(());
        };
        if expected == actual {
            return Ok(());
        }
        match self.options.hash_policy {
            HashPolicy::Fail => Err(OpenApiToolsError::HashMismatch {
                expected: expected.clone(),
                actual: actual.to_string(),
            }),
            HashPolicy::Warn => {
                tracing::warn!(
                    expected = %expected,
                    actual = %actual,
                    "OpenAPI reference digest mismatch"
                );
                Ok(())
            }
            HashPolicy::Ignore => Ok(()),
        }
    }
}
