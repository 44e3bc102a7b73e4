//! Normalized, read-only view of a loaded `OpenAPI` document.
//!
//! Parsing is best-effort: malformed entries are skipped rather than rejected, because the server
//! only needs enough structure to describe the API. The untouched JSON value is kept alongside the
//! typed view so the `search` runtime sees the document exactly as it was loaded.
//!
//! Both `OpenAPI` 3.x (`servers`, `components.securitySchemes`) and Swagger 2.0 (`host`/`basePath`,
//! `securityDefinitions`) layouts are understood.

use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// HTTP methods that can appear as operations under a path item, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 7] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Patch,
        HttpMethod::Delete,
        HttpMethod::Head,
        HttpMethod::Options,
    ];

    /// Methods scanned for tags and sample endpoints.
    pub const SAMPLED: [HttpMethod; 5] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Patch,
        HttpMethod::Delete,
    ];

    /// Lowercase key used in path items (`get`, `post`, ...).
    #[must_use]
    pub fn as_key(self) -> &'static str {
        match self {
            HttpMethod::Get => "get",
            HttpMethod::Post => "post",
            HttpMethod::Put => "put",
            HttpMethod::Patch => "patch",
            HttpMethod::Delete => "delete",
            HttpMethod::Head => "head",
            HttpMethod::Options => "options",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_key().to_ascii_uppercase())
    }
}

/// `info` block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Info {
    pub title: Option<String>,
    pub version: Option<String>,
}

/// One `servers` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Server {
    pub url: String,
    pub description: Option<String>,
}

/// Parameter location (`in`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterLocation {
    Path,
    Query,
    Header,
    Cookie,
    Body,
    FormData,
    Other(String),
}

impl ParameterLocation {
    fn parse(s: &str) -> Self {
        match s {
            "path" => Self::Path,
            "query" => Self::Query,
            "header" => Self::Header,
            "cookie" => Self::Cookie,
            "body" => Self::Body,
            "formData" => Self::FormData,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub location: ParameterLocation,
    pub required: bool,
    pub schema: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestBody {
    pub required: bool,
    /// Content type → schema, in document order.
    pub content: Vec<(String, Option<Value>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub description: Option<String>,
    pub content: Vec<(String, Option<Value>)>,
}

/// One HTTP-method entry under a path. Identity is `(path, method)`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Operation {
    pub summary: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub parameters: Vec<Parameter>,
    pub request_body: Option<RequestBody>,
    /// Status code → response, in document order.
    pub responses: Vec<(String, Response)>,
}

/// A path template with its operations, in canonical method order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PathItem {
    pub operations: Vec<(HttpMethod, Operation)>,
}

impl PathItem {
    #[must_use]
    pub fn operation(&self, method: HttpMethod) -> Option<&Operation> {
        self.operations
            .iter()
            .find(|(m, _)| *m == method)
            .map(|(_, op)| op)
    }
}

/// Declared type of a security scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecuritySchemeKind {
    /// `type: http` with its `scheme` (lowercased, e.g. `bearer`, `basic`).
    Http { scheme: String },
    /// Swagger 2.0 `type: basic`.
    Basic,
    /// `type: apiKey` placed `in` header/query/cookie under `name`.
    ApiKey { location: String, name: String },
    OAuth2,
    OpenIdConnect,
    /// Anything else (`mutualTLS`, vendor extensions, missing type).
    Other { declared: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityScheme {
    pub kind: SecuritySchemeKind,
    pub bearer_format: Option<String>,
}

/// The normalized API specification.
///
/// Immutable once built; clone the `Arc` to share it.
#[derive(Debug, Clone)]
pub struct SpecDocument {
    raw: Arc<Value>,
    pub info: Info,
    pub servers: Vec<Server>,
    pub paths: Vec<(String, PathItem)>,
    pub security_schemes: Vec<(String, SecurityScheme)>,
}

impl SpecDocument {
    /// Build the typed view over a loaded JSON value.
    ///
    /// Any value is accepted. A non-object (e.g. an opaque literal reference) yields an empty view.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        let info = parse_info(&value);
        let servers = parse_servers(&value);
        let paths = value
            .get("paths")
            .and_then(Value::as_object)
            .map(parse_paths)
            .unwrap_or_default();
        let security_schemes = security_scheme_map(&value)
            .map(parse_security_schemes)
            .unwrap_or_default();

        Self {
            raw: Arc::new(value),
            info,
            servers,
            paths,
            security_schemes,
        }
    }

    /// The document exactly as loaded (after optional `$ref` inlining).
    #[must_use]
    pub fn raw(&self) -> &Arc<Value> {
        &self.raw
    }

    /// `info.title`, or a generic phrase when absent.
    #[must_use]
    pub fn api_name(&self) -> &str {
        self.info.title.as_deref().unwrap_or("the API")
    }

    #[must_use]
    pub fn path_count(&self) -> usize {
        self.paths.len()
    }

    /// Number of (path, method) operations.
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.paths.iter().map(|(_, item)| item.operations.len()).sum()
    }

    /// First server URL, if any.
    #[must_use]
    pub fn base_url(&self) -> Option<&str> {
        self.servers.first().map(|s| s.url.as_str())
    }

    /// Iterate `(path, method, operation)` in document order.
    pub fn operations(&self) -> impl Iterator<Item = (&str, HttpMethod, &Operation)> {
        self.paths.iter().flat_map(|(path, item)| {
            item.operations
                .iter()
                .map(move |(method, op)| (path.as_str(), *method, op))
        })
    }
}

/// Locate the security scheme map: `OpenAPI` 3 first, then Swagger 2.
fn security_scheme_map(value: &Value) -> Option<&Map<String, Value>> {
    value
        .get("components")
        .and_then(|c| c.get("securitySchemes"))
        .and_then(Value::as_object)
        .or_else(|| value.get("securityDefinitions").and_then(Value::as_object))
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn parse_info(value: &Value) -> Info {
    let Some(info) = value.get("info") else {
        return Info::default();
    };
    Info {
        title: str_field(info, "title").filter(|t| !t.is_empty()),
        version: match info.get("version") {
            Some(Value::String(s)) => Some(s.clone()),
            // YAML happily turns `version: 1.0` into a number.
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        },
    }
}

fn parse_servers(value: &Value) -> Vec<Server> {
    if let Some(servers) = value.get("servers").and_then(Value::as_array) {
        return servers
            .iter()
            .filter_map(|s| {
                Some(Server {
                    url: str_field(s, "url")?,
                    description: str_field(s, "description"),
                })
            })
            .collect();
    }

    // Swagger 2.0: synthesize a single server from schemes/host/basePath.
    let Some(host) = value.get("host").and_then(Value::as_str) else {
        return Vec::new();
    };
    let scheme = value
        .get("schemes")
        .and_then(Value::as_array)
        .and_then(|s| {
            s.iter()
                .filter_map(Value::as_str)
                .find(|s| *s == "https")
                .or_else(|| s.first().and_then(Value::as_str))
        })
        .unwrap_or("https");
    let base_path = value
        .get("basePath")
        .and_then(Value::as_str)
        .unwrap_or("");
    vec![Server {
        url: format!("{scheme}://{host}{base_path}"),
        description: None,
    }]
}

fn parse_paths(paths: &Map<String, Value>) -> Vec<(String, PathItem)> {
    paths
        .iter()
        .filter_map(|(path, item)| {
            let item = item.as_object()?;
            let shared_params = item
                .get("parameters")
                .map(parse_parameters)
                .unwrap_or_default();
            let operations = HttpMethod::ALL
                .iter()
                .filter_map(|method| {
                    let op = item.get(method.as_key())?.as_object()?;
                    Some((*method, parse_operation(op, &shared_params)))
                })
                .collect();
            Some((path.clone(), PathItem { operations }))
        })
        .collect()
}

fn parse_operation(op: &Map<String, Value>, shared_params: &[Parameter]) -> Operation {
    let mut parameters = op
        .get("parameters")
        .map(parse_parameters)
        .unwrap_or_default();
    // Path-level parameters apply unless the operation redefines the same (name, in).
    for shared in shared_params {
        if !parameters
            .iter()
            .any(|p| p.name == shared.name && p.location == shared.location)
        {
            parameters.push(shared.clone());
        }
    }

    Operation {
        summary: op.get("summary").and_then(Value::as_str).map(str::to_string),
        description: op
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
        tags: op
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        parameters,
        request_body: op.get("requestBody").and_then(parse_request_body),
        responses: op
            .get("responses")
            .and_then(Value::as_object)
            .map(|responses| {
                responses
                    .iter()
                    .map(|(status, r)| {
                        (
                            status.clone(),
                            Response {
                                description: str_field(r, "description"),
                                content: parse_content(r),
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default(),
    }
}

fn parse_parameters(value: &Value) -> Vec<Parameter> {
    value
        .as_array()
        .map(|params| {
            params
                .iter()
                .filter_map(|p| {
                    Some(Parameter {
                        name: str_field(p, "name")?,
                        location: ParameterLocation::parse(p.get("in")?.as_str()?),
                        required: p.get("required").and_then(Value::as_bool).unwrap_or(false),
                        schema: p.get("schema").cloned(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_request_body(value: &Value) -> Option<RequestBody> {
    // An unresolved `$ref` still declares a body.
    let obj = value.as_object()?;
    Some(RequestBody {
        required: obj
            .get("required")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        content: parse_content(value),
    })
}

fn parse_content(value: &Value) -> Vec<(String, Option<Value>)> {
    value
        .get("content")
        .and_then(Value::as_object)
        .map(|content| {
            content
                .iter()
                .map(|(ct, media)| (ct.clone(), media.get("schema").cloned()))
                .collect()
        })
        .unwrap_or_default()
}

fn parse_security_schemes(schemes: &Map<String, Value>) -> Vec<(String, SecurityScheme)> {
    schemes
        .iter()
        .map(|(name, scheme)| (name.clone(), parse_security_scheme(scheme)))
        .collect()
}

fn parse_security_scheme(scheme: &Value) -> SecurityScheme {
    let declared = str_field(scheme, "type");
    let kind = match declared.as_deref() {
        Some("http") => SecuritySchemeKind::Http {
            scheme: str_field(scheme, "scheme")
                .unwrap_or_default()
                .to_ascii_lowercase(),
        },
        Some("basic") => SecuritySchemeKind::Basic,
        Some("apiKey") => SecuritySchemeKind::ApiKey {
            location: str_field(scheme, "in").unwrap_or_default(),
            name: str_field(scheme, "name").unwrap_or_default(),
        },
        Some("oauth2") => SecuritySchemeKind::OAuth2,
        Some("openIdConnect") => SecuritySchemeKind::OpenIdConnect,
        _ => SecuritySchemeKind::Other { declared },
    };
    SecurityScheme {
        kind,
        bearer_format: str_field(scheme, "bearerFormat"),
    }
}
