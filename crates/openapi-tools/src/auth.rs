//! Credential resolution from the spec's security schemes.
//!
//! Every declared scheme maps to one `AUTH_<NAME>` environment variable. Operators provision the
//! variables they have; the sandbox receives exactly those, and the `execute` description tells
//! the model how to use each one.

use crate::document::{SecurityScheme, SecuritySchemeKind, SpecDocument};
use crate::error::{OpenApiToolsError, Result};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static NON_ALNUM_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9]+").expect("static regex is valid"));

/// Environment variable name for a security scheme: `My-Scheme` → `AUTH_MY_SCHEME`.
#[must_use]
pub fn scheme_env_var(scheme_name: &str) -> String {
    let collapsed = NON_ALNUM_RUN.replace_all(scheme_name, "_");
    format!("AUTH_{}", collapsed.to_ascii_uppercase())
}

/// How a credential is attached to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Usage<'a> {
    Bearer,
    Basic,
    OAuth,
    Header(&'a str),
    Query(&'a str),
    Cookie(&'a str),
    Unsupported,
}

fn usage(scheme: &SecurityScheme) -> Usage<'_> {
    match &scheme.kind {
        SecuritySchemeKind::Http { scheme } if scheme == "bearer" => Usage::Bearer,
        SecuritySchemeKind::Http { scheme } if scheme == "basic" => Usage::Basic,
        SecuritySchemeKind::Basic => Usage::Basic,
        SecuritySchemeKind::ApiKey { location, name } => match location.as_str() {
            "header" => Usage::Header(name),
            "query" => Usage::Query(name),
            "cookie" => Usage::Cookie(name),
            _ => Usage::Unsupported,
        },
        SecuritySchemeKind::OAuth2 | SecuritySchemeKind::OpenIdConnect => Usage::OAuth,
        SecuritySchemeKind::Http { .. } | SecuritySchemeKind::Other { .. } => Usage::Unsupported,
    }
}

fn declared_type(scheme: &SecurityScheme) -> &str {
    match &scheme.kind {
        SecuritySchemeKind::Http { .. } => "http",
        SecuritySchemeKind::Basic => "basic",
        SecuritySchemeKind::ApiKey { .. } => "apiKey",
        SecuritySchemeKind::OAuth2 => "oauth2",
        SecuritySchemeKind::OpenIdConnect => "openIdConnect",
        SecuritySchemeKind::Other { declared } => declared.as_deref().unwrap_or("unknown"),
    }
}

/// The credential snippet used in the authenticated `execute` example.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthSnippet {
    /// A `headers: { ... }` entry, e.g. `"X-API-Key": process.env.AUTH_API_KEY`.
    Header(String),
    /// A query string suffix for the URL template, e.g. `?key=${process.env.AUTH_KEY}`.
    Query(String),
}

/// A scheme whose variable is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveScheme {
    pub scheme_name: String,
    pub env_var: String,
    pub scheme: SecurityScheme,
}

impl ActiveScheme {
    fn description_line(&self) -> String {
        let var = &self.env_var;
        match usage(&self.scheme) {
            Usage::Bearer => format!(
                "- {var}: Bearer token. Use as: headers: {{ \"Authorization\": `Bearer ${{process.env.{var}}}` }}"
            ),
            Usage::Basic => format!(
                "- {var}: Basic auth credentials (base64-encoded user:pass). Use as: headers: {{ \"Authorization\": `Basic ${{process.env.{var}}}` }}"
            ),
            Usage::OAuth => format!(
                "- {var}: OAuth token. Use as: headers: {{ \"Authorization\": `Bearer ${{process.env.{var}}}` }}"
            ),
            Usage::Header(name) => {
                format!("- {var}: API key. Use as: headers: {{ \"{name}\": process.env.{var} }}")
            }
            Usage::Query(name) => {
                format!("- {var}: API key. Append to URL as: ?{name}=${{process.env.{var}}}")
            }
            Usage::Cookie(name) => format!(
                "- {var}: API key cookie. Use as: headers: {{ \"Cookie\": `{name}=${{process.env.{var}}}` }}"
            ),
            Usage::Unsupported => format!(
                "- {var}: Auth credential for scheme \"{}\" (type: {})",
                self.scheme_name,
                declared_type(&self.scheme)
            ),
        }
    }

    fn snippet(&self) -> Option<AuthSnippet> {
        let var = &self.env_var;
        match usage(&self.scheme) {
            Usage::Bearer | Usage::OAuth => Some(AuthSnippet::Header(format!(
                "\"Authorization\": `Bearer ${{process.env.{var}}}`"
            ))),
            Usage::Basic => Some(AuthSnippet::Header(format!(
                "\"Authorization\": `Basic ${{process.env.{var}}}`"
            ))),
            Usage::Header(name) => Some(AuthSnippet::Header(format!(
                "\"{name}\": process.env.{var}"
            ))),
            Usage::Cookie(name) => Some(AuthSnippet::Header(format!(
                "\"Cookie\": `{name}=${{process.env.{var}}}`"
            ))),
            Usage::Query(name) => Some(AuthSnippet::Query(format!(
                "?{name}=${{process.env.{var}}}"
            ))),
            Usage::Unsupported => None,
        }
    }
}

/// Credentials found for the spec's declared schemes. Computed once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthResolution {
    resolved: Vec<(String, String)>,
    expected: Vec<String>,
    active: Vec<ActiveScheme>,
}

impl AuthResolution {
    /// Resolve against the process environment.
    #[must_use]
    pub fn from_env(doc: &SpecDocument) -> Self {
        Self::resolve_with(doc, |name| std::env::var(name).ok())
    }

    /// Resolve using `lookup` as the environment.
    pub fn resolve_with<F>(doc: &SpecDocument, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut out = Self::default();
        for (scheme_name, scheme) in &doc.security_schemes {
            let env_var = scheme_env_var(scheme_name);
            if !out.expected.contains(&env_var) {
                out.expected.push(env_var.clone());
            }

            let Some(value) = lookup(&env_var).filter(|v| !v.is_empty()) else {
                continue;
            };
            if !out.resolved.iter().any(|(name, _)| *name == env_var) {
                out.resolved.push((env_var.clone(), value));
            }
            out.active.push(ActiveScheme {
                scheme_name: scheme_name.clone(),
                env_var,
                scheme: scheme.clone(),
            });
        }
        out
    }

    /// `(variable, value)` pairs that were set, in scheme order.
    #[must_use]
    pub fn resolved(&self) -> &[(String, String)] {
        &self.resolved
    }

    /// Every variable implied by the spec.
    #[must_use]
    pub fn expected(&self) -> &[String] {
        &self.expected
    }

    #[must_use]
    pub fn active_schemes(&self) -> &[ActiveScheme] {
        &self.active
    }

    /// Names of the variables that were set.
    #[must_use]
    pub fn resolved_names(&self) -> Vec<&str> {
        self.resolved.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Resolved credentials as a sandbox environment.
    #[must_use]
    pub fn env(&self) -> HashMap<String, String> {
        self.resolved.iter().cloned().collect()
    }

    /// Refuse to run unauthenticated against an API that declares auth.
    ///
    /// # Errors
    ///
    /// Returns [`OpenApiToolsError::NoCredentials`] if schemes are declared but none is set.
    pub fn require_credentials(&self) -> Result<()> {
        if !self.expected.is_empty() && self.resolved.is_empty() {
            return Err(OpenApiToolsError::NoCredentials {
                expected: self.expected.clone(),
            });
        }
        Ok(())
    }

    /// Usage instructions for the active schemes, or an empty string when there are none.
    #[must_use]
    pub fn description(&self) -> String {
        if self.active.is_empty() {
            return String::new();
        }
        let lines: Vec<String> = self.active.iter().map(ActiveScheme::description_line).collect();
        format!(
            "\nAuthentication (available via process.env in the sandbox):\n{}",
            lines.join("\n")
        )
    }

    /// Snippet for the first active scheme that maps to a header or query parameter.
    #[must_use]
    pub fn example_snippet(&self) -> Option<AuthSnippet> {
        self.active.iter().find_map(ActiveScheme::snippet)
    }
}
