//! Tool description synthesis.
//!
//! Descriptions are derived only from the document's shape and the active credentials. They are
//! part of what clients see in `tools/list`, so the output must be byte-identical for the same
//! inputs: no maps with random iteration order, no clocks.
//!
//! Sample endpoints are taken in document order, so the examples reflect whatever order the spec
//! author wrote paths in.

use crate::auth::{AuthResolution, AuthSnippet};
use crate::document::{HttpMethod, SpecDocument};
use std::collections::BTreeSet;
use std::fmt::Write as _;

/// Tags shown before the list is truncated.
pub const MAX_LISTED_TAGS: usize = 30;

pub const EXECUTE_CODE_DESCRIPTION: &str = "JavaScript async arrow function to execute in the sandbox. Has access to Node.js built-ins including fetch() for HTTP requests.";

pub const EXECUTE_TIMEOUT_DESCRIPTION: &str =
    "Timeout in seconds for the execution. Defaults to 30 seconds.";

const TYPES_BLOCK: &str = r"

Types:

interface OperationInfo {
  summary?: string;
  description?: string;
  tags?: string[];
  parameters?: Array<{ name: string; in: string; required?: boolean; schema?: unknown; description?: string }>;
  requestBody?: { required?: boolean; content?: Record<string, { schema?: unknown }> };
  responses?: Record<string, { description?: string; content?: Record<string, { schema?: unknown }> }>;
}

interface PathItem {
  get?: OperationInfo;
  post?: OperationInfo;
  put?: OperationInfo;
  patch?: OperationInfo;
  delete?: OperationInfo;
}

declare const spec: {
  paths: Record<string, PathItem>;
};";

/// Sorted, de-duplicated tags across all sampled operations.
#[must_use]
pub fn collect_tags(doc: &SpecDocument) -> Vec<String> {
    let mut tags = BTreeSet::new();
    for (_, item) in &doc.paths {
        for method in HttpMethod::SAMPLED {
            if let Some(op) = item.operation(method) {
                tags.extend(op.tags.iter().cloned());
            }
        }
    }
    tags.into_iter().collect()
}

/// A tagged (path, method) pair and its first tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedEndpoint {
    pub path: String,
    pub method: HttpMethod,
    pub tag: String,
}

/// Representative endpoints used for worked examples. Any category may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleEndpoints {
    /// First GET path not ending in a `{param}` placeholder.
    pub list: Option<String>,
    /// First GET path.
    pub detail: Option<String>,
    /// First POST path declaring a request body.
    pub write: Option<String>,
    pub tagged: Option<TaggedEndpoint>,
}

impl SampleEndpoints {
    #[must_use]
    pub fn pick(doc: &SpecDocument) -> Self {
        let mut samples = Self::default();

        for (path, item) in &doc.paths {
            let has_get = item.operation(HttpMethod::Get).is_some();
            if samples.list.is_none() && has_get && !path.ends_with('}') {
                samples.list = Some(path.clone());
            }
            if samples.detail.is_none() && has_get {
                samples.detail = Some(path.clone());
            }
            if samples.write.is_none()
                && item
                    .operation(HttpMethod::Post)
                    .is_some_and(|op| op.request_body.is_some())
            {
                samples.write = Some(path.clone());
            }
            if samples.tagged.is_none() {
                samples.tagged = HttpMethod::SAMPLED.iter().find_map(|method| {
                    let tag = item.operation(*method)?.tags.first()?;
                    Some(TaggedEndpoint {
                        path: path.clone(),
                        method: *method,
                        tag: tag.clone(),
                    })
                });
            }
            if samples.is_complete() {
                break;
            }
        }
        samples
    }

    fn is_complete(&self) -> bool {
        self.list.is_some() && self.detail.is_some() && self.write.is_some() && self.tagged.is_some()
    }
}

/// The `servers` block of the `execute` description.
#[must_use]
pub fn server_description(doc: &SpecDocument) -> String {
    fn with_description(url: &str, description: Option<&str>) -> String {
        match description {
            Some(d) if !d.is_empty() => format!("{url} ({d})"),
            _ => url.to_string(),
        }
    }

    match doc.servers.as_slice() {
        [] => String::new(),
        [only] => format!(
            "\nAPI base URL: {}",
            with_description(&only.url, only.description.as_deref())
        ),
        servers => {
            let lines: Vec<String> = servers
                .iter()
                .enumerate()
                .map(|(i, s)| {
                    let label = if i == 0 {
                        " (default)"
                    } else {
                        " (fallback or situational)"
                    };
                    format!(
                        "  - {}{label}",
                        with_description(&s.url, s.description.as_deref())
                    )
                })
                .collect();
            format!(
                "\nAPI servers (use the first one by default, others may serve as fallbacks or for specific use cases):\n{}",
                lines.join("\n")
            )
        }
    }
}

/// `Tags:` and `Paths:` lines shared by both descriptions.
#[must_use]
pub fn overview(doc: &SpecDocument) -> String {
    let mut out = String::new();
    let tags = collect_tags(doc);
    if !tags.is_empty() {
        let shown = tags
            .iter()
            .take(MAX_LISTED_TAGS)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let suffix = if tags.len() > MAX_LISTED_TAGS {
            format!(" ... ({} total)", tags.len())
        } else {
            String::new()
        };
        let _ = write!(out, "\nTags: {shown}{suffix}");
    }

    let _ = write!(
        out,
        "\nPaths: {} total ({} endpoints)",
        doc.path_count(),
        doc.endpoint_count()
    );
    out
}

/// Both tool descriptions plus their synthesized parameter docs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDescriptions {
    pub search: String,
    pub search_code: String,
    pub execute: String,
    pub execute_code: String,
    pub execute_timeout: String,
}

impl ToolDescriptions {
    #[must_use]
    pub fn build(doc: &SpecDocument, auth: &AuthResolution) -> Self {
        let samples = SampleEndpoints::pick(doc);
        Self {
            search: search_description(doc, &samples),
            search_code: search_code_description(&samples),
            execute: execute_description(doc, auth, &samples),
            execute_code: EXECUTE_CODE_DESCRIPTION.to_string(),
            execute_timeout: EXECUTE_TIMEOUT_DESCRIPTION.to_string(),
        }
    }
}

#[must_use]
pub fn search_description(doc: &SpecDocument, samples: &SampleEndpoints) -> String {
    let mut out = format!(
        "Search the {} OpenAPI spec. All $refs are pre-resolved inline.",
        doc.api_name()
    );

    out.push_str(&overview(doc));
    out.push_str(TYPES_BLOCK);
    out.push_str("\n\nExamples:");

    if let Some(tagged) = &samples.tagged {
        let _ = write!(
            out,
            r"

// Find endpoints by tag
async () => {{
  const results = [];
  for (const [path, methods] of Object.entries(spec.paths)) {{
    for (const [method, op] of Object.entries(methods)) {{
      if (op.tags?.some(t => t.toLowerCase() === '{}')) {{
        results.push({{ method: method.toUpperCase(), path, summary: op.summary }});
      }}
    }}
  }}
  return results;
}}",
            js_single_quoted(&tagged.tag.to_lowercase())
        );
    }

    if let Some(path) = &samples.detail {
        let _ = write!(
            out,
            r"

// Get endpoint details
async () => {{
  const op = spec.paths['{}']?.get;
  return {{ summary: op?.summary, parameters: op?.parameters }};
}}",
            js_single_quoted(path)
        );
    }

    if let Some(path) = &samples.write {
        let _ = write!(
            out,
            r"

// Get endpoint with requestBody schema (refs are resolved)
async () => {{
  const op = spec.paths['{}']?.post;
  return {{ summary: op?.summary, requestBody: op?.requestBody }};
}}",
            js_single_quoted(path)
        );
    }

    out
}

/// `code` parameter doc for `search`, citing the detail endpoint when there is one.
#[must_use]
pub fn search_code_description(samples: &SampleEndpoints) -> String {
    let example = match &samples.detail {
        Some(path) => format!("`() => spec.paths['{}'].get`.", js_single_quoted(path)),
        None => "`() => spec.paths['/some/path'].get`.".to_string(),
    };
    format!(
        "JavaScript async arrow function. Has access to `spec` (OpenAPI object with .paths, .components, .servers, .info). \
         Return the data you need, e.g. `() => Object.keys(spec.paths)` or {example}"
    )
}

#[must_use]
pub fn execute_description(
    doc: &SpecDocument,
    auth: &AuthResolution,
    samples: &SampleEndpoints,
) -> String {
    let mut out = format!(
        "Execute JavaScript code against {}. First use the 'search' tool to find the right endpoints, then write code using fetch().",
        doc.api_name()
    );
    out.push_str(&overview(doc));
    out.push_str(&server_description(doc));
    out.push_str(&auth.description());
    out.push_str("\n\nYour code must be an async arrow function that returns the result.");

    let base_url = doc.base_url().filter(|u| !u.is_empty());
    if let (Some(list_path), Some(base_url)) = (&samples.list, base_url) {
        let (query, headers) = match auth.example_snippet() {
            Some(AuthSnippet::Header(header)) => (String::new(), format!("\n      {header}\n    ")),
            Some(AuthSnippet::Query(query)) => (query, String::new()),
            None => (String::new(), String::new()),
        };
        let _ = write!(
            out,
            r"

Example:
async () => {{
  const res = await fetch(`{base_url}{list_path}{query}`, {{
    headers: {{{headers}}}
  }});
  return res.json();
}}"
        );
    }

    out
}

/// Escape a value for embedding inside a single-quoted JS string literal.
fn js_single_quoted(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> SpecDocument {
        SpecDocument::from_value(value)
    }

    fn no_auth() -> AuthResolution {
        AuthResolution::default()
    }

    #[test]
    fn samples_follow_document_order() {
        let d = doc(json!({
            "paths": {
                "/users/{id}": { "get": {} },
                "/users": { "get": { "tags": ["Users"] }, "post": { "requestBody": {} } },
                "/orders": { "get": {}, "post": { "requestBody": {} } }
            }
        }));
        let samples = SampleEndpoints::pick(&d);
        assert_eq!(samples.detail.as_deref(), Some("/users/{id}"));
        assert_eq!(samples.list.as_deref(), Some("/users"));
        assert_eq!(samples.write.as_deref(), Some("/users"));
        assert_eq!(
            samples.tagged,
            Some(TaggedEndpoint {
                path: "/users".to_string(),
                method: HttpMethod::Get,
                tag: "Users".to_string(),
            })
        );
    }

    #[test]
    fn never_fabricates_missing_categories() {
        let d = doc(json!({
            "paths": {
                "/things/{id}": { "get": {} },
                "/things": { "post": { "summary": "no body" } }
            }
        }));
        let samples = SampleEndpoints::pick(&d);
        assert_eq!(samples.list, None);
        assert_eq!(samples.write, None);
        assert_eq!(samples.tagged, None);

        let search = search_description(&d, &samples);
        assert!(!search.contains("Find endpoints by tag"));
        assert!(!search.contains("requestBody schema"));
        assert!(search.contains("spec.paths['/things/{id}']?.get"));
    }

    #[test]
    fn tag_list_is_sorted_and_truncated() {
        let mut paths = serde_json::Map::new();
        for i in 0..35 {
            paths.insert(
                format!("/r{i}"),
                json!({ "get": { "tags": [format!("tag{i:02}")] } }),
            );
        }
        let d = doc(json!({ "paths": paths }));
        let search = search_description(&d, &SampleEndpoints::pick(&d));
        assert!(search.contains("\nTags: tag00, tag01,"));
        assert!(search.contains("tag29 ... (35 total)"));
        assert!(!search.contains("tag30"));

        let exec = execute_description(&d, &no_auth(), &SampleEndpoints::pick(&d));
        assert!(exec.contains("tag29 ... (35 total)\nPaths: 35 total (35 endpoints)"));
    }

    #[test]
    fn search_falls_back_to_generic_name() {
        let d = doc(json!({ "paths": {} }));
        let search = search_description(&d, &SampleEndpoints::pick(&d));
        assert!(search.starts_with("Search the the API OpenAPI spec."));
        assert!(search.contains("\nPaths: 0 total (0 endpoints)"));
        assert!(search.ends_with("Examples:"));
    }

    #[test]
    fn server_block_marks_default_and_fallbacks() {
        let single = doc(json!({ "servers": [{ "url": "https://a.test", "description": "prod" }] }));
        assert_eq!(
            server_description(&single),
            "\nAPI base URL: https://a.test (prod)"
        );

        let multi = doc(json!({
            "servers": [{ "url": "https://a.test" }, { "url": "https://b.test", "description": "eu" }]
        }));
        let block = server_description(&multi);
        assert!(block.contains("  - https://a.test (default)"));
        assert!(block.contains("  - https://b.test (eu) (fallback or situational)"));
    }

    #[test]
    fn execute_example_uses_header_snippet() {
        let d = doc(json!({
            "info": { "title": "Shop" },
            "servers": [{ "url": "https://shop.test/v1" }],
            "paths": { "/items": { "get": {} } },
            "components": { "securitySchemes": { "token": { "type": "http", "scheme": "bearer" } } }
        }));
        let auth = AuthResolution::resolve_with(&d, |name| {
            (name == "AUTH_TOKEN").then(|| "t".to_string())
        });
        let exec = execute_description(&d, &auth, &SampleEndpoints::pick(&d));

        assert!(exec.starts_with("Execute JavaScript code against Shop."));
        assert!(exec.contains("\nAPI base URL: https://shop.test/v1"));
        assert!(exec.contains("\nPaths: 1 total (1 endpoints)"));
        assert!(!exec.contains("Tags:"));
        assert!(!exec.contains("interface OperationInfo"));
        assert!(exec.contains(
            "fetch(`https://shop.test/v1/items`, {\n    headers: {\n      \"Authorization\": `Bearer ${process.env.AUTH_TOKEN}`\n    }\n  });"
        ));
    }

    #[test]
    fn execute_example_appends_query_snippet() {
        let d = doc(json!({
            "servers": [{ "url": "https://q.test" }],
            "paths": { "/search": { "get": {} } },
            "components": { "securitySchemes": { "k": { "type": "apiKey", "in": "query", "name": "apikey" } } }
        }));
        let auth =
            AuthResolution::resolve_with(&d, |name| (name == "AUTH_K").then(|| "v".to_string()));
        let exec = execute_description(&d, &auth, &SampleEndpoints::pick(&d));
        assert!(exec.contains("fetch(`https://q.test/search?apikey=${process.env.AUTH_K}`, {\n    headers: {}\n  });"));
    }

    #[test]
    fn execute_omits_example_without_base_url() {
        let d = doc(json!({ "paths": { "/items": { "get": {} } } }));
        let exec = execute_description(&d, &no_auth(), &SampleEndpoints::pick(&d));
        assert!(!exec.contains("Example:"));
        assert!(exec.ends_with("returns the result."));
    }

    #[test]
    fn code_description_cites_detail_endpoint() {
        let d = doc(json!({ "paths": { "/pets/{id}": { "get": {} } } }));
        let text = search_code_description(&SampleEndpoints::pick(&d));
        assert!(text.ends_with("`() => spec.paths['/pets/{id}'].get`."));

        let empty = search_code_description(&SampleEndpoints::default());
        assert!(empty.contains("'/some/path'"));
    }

    #[test]
    fn descriptions_are_deterministic() {
        let value = json!({
            "info": { "title": "Stable" },
            "servers": [{ "url": "https://s.test" }],
            "paths": {
                "/b": { "get": { "tags": ["z", "a"] } },
                "/a": { "post": { "requestBody": {}, "tags": ["m"] } }
            },
            "components": { "securitySchemes": {
                "one": { "type": "http", "scheme": "bearer" },
                "two": { "type": "apiKey", "in": "header", "name": "X-Two" }
            } }
        });
        let lookup = |name: &str| Some(format!("{name}-value"));
        let first = {
            let d = doc(value.clone());
            ToolDescriptions::build(&d, &AuthResolution::resolve_with(&d, lookup))
        };
        let second = {
            let d = doc(value);
            ToolDescriptions::build(&d, &AuthResolution::resolve_with(&d, lookup))
        };
        assert_eq!(first, second);
        assert!(first.search.contains("\nTags: a, m, z"));
        assert!(first.execute.contains("\nTags: a, m, z\nPaths: 2 total (2 endpoints)"));
    }
}
