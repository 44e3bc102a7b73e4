//! Everything that happens once, before the listener opens.

use crate::config::{Config, SandboxProviderKind};
use crate::error::{Result, StartupError};
use crate::introspect::SpecEvaluator;
use crate::tools::ToolRegistry;
use codemode_openapi_tools::{
    AuthResolution, LoadedReference, Provenance, ReferenceLoader, SpecDocument, ToolDescriptions,
    describe,
};
use codemode_sandbox::{
    ProcessSandboxProvider, RemoteSandboxProvider, SandboxExecutor, SandboxProvider,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// The loaded API and the tools built from it. Immutable for the life of the process.
pub struct CodeModeApp {
    pub document: Arc<SpecDocument>,
    pub provenance: Provenance,
    pub sha256: String,
    pub descriptions: ToolDescriptions,
    pub registry: Arc<ToolRegistry>,
}

impl CodeModeApp {
    /// Load the reference named by `config`, read credentials from the process environment, and
    /// build the tools.
    ///
    /// # Errors
    ///
    /// Fails when the reference cannot be loaded, when the API declares security schemes but
    /// no `AUTH_*` variable is set, or when the sandbox provider is misconfigured.
    pub async fn bootstrap(config: &Config) -> Result<Self> {
        config.validate()?;
        let loader = ReferenceLoader::new(config.load_options())?;
        let loaded = loader.load(config.reference.as_deref()).await?;
        info!("Loaded reference from {}", loaded.provenance);

        let document = SpecDocument::from_value(loaded.value.clone());
        let auth = AuthResolution::from_env(&document);
        Self::assemble(config, loaded, document, &auth)
    }

    /// Build the app from an already loaded reference and resolved credentials.
    ///
    /// # Errors
    ///
    /// See [`CodeModeApp::bootstrap`].
    pub fn assemble(
        config: &Config,
        loaded: LoadedReference,
        document: SpecDocument,
        auth: &AuthResolution,
    ) -> Result<Self> {
        log_summary(&document, auth);
        auth.require_credentials()?;

        let descriptions = ToolDescriptions::build(&document, auth);
        let executor = Arc::new(SandboxExecutor::new(
            build_provider(config)?,
            config.executor_config(),
        ));
        let evaluator = SpecEvaluator::new(Arc::clone(document.raw()), config.search_limits());
        let credentials: BTreeMap<String, String> = auth.env().into_iter().collect();

        let registry = ToolRegistry::new(
            &descriptions,
            evaluator,
            executor,
            credentials,
            config.execute_max_timeout(),
        );

        Ok(Self {
            document: Arc::new(document),
            provenance: loaded.provenance,
            sha256: loaded.sha256,
            descriptions,
            registry: Arc::new(registry),
        })
    }
}

fn log_summary(document: &SpecDocument, auth: &AuthResolution) {
    info!(
        "API: {} v{}",
        document.api_name(),
        document.info.version.as_deref().unwrap_or("unknown")
    );
    for server in &document.servers {
        match &server.description {
            Some(description) => info!("Server: {} ({description})", server.url),
            None => info!("Server: {}", server.url),
        }
    }
    let tags = describe::collect_tags(document);
    info!(
        paths = document.path_count(),
        tags = tags.len(),
        "Endpoints: {}",
        document.endpoint_count()
    );
    let names = auth.resolved_names();
    if !names.is_empty() {
        info!("Authentication: {}", names.join(", "));
    }
}

/// Create the configured sandbox provider.
///
/// # Errors
///
/// Returns [`StartupError::Config`] when the remote provider has no API URL, and
/// [`StartupError::Sandbox`] when its URL is invalid.
pub fn build_provider(config: &Config) -> Result<Arc<dyn SandboxProvider>> {
    match config.sandbox_provider {
        SandboxProviderKind::Remote => {
            let remote = config.remote_sandbox().ok_or_else(|| {
                StartupError::Config(
                    "SANDBOX_API_URL is required when SANDBOX_PROVIDER=remote".to_string(),
                )
            })?;
            Ok(Arc::new(RemoteSandboxProvider::new(remote)?))
        }
        SandboxProviderKind::Process => {
            warn!("using the process sandbox provider: code runs on this host without isolation");
            Ok(Arc::new(ProcessSandboxProvider::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser as _;
    use codemode_openapi_tools::OpenApiToolsError;
    use codemode_test_support::petstore_spec;
    use std::collections::HashMap;

    fn config(args: &[&str]) -> Config {
        let mut argv = vec!["codemode-mcp-server"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    fn process_config() -> Config {
        config(&["--sandbox-provider", "process"])
    }

    fn loaded() -> LoadedReference {
        LoadedReference {
            value: petstore_spec("https://petstore.example.com/v1"),
            provenance: Provenance::InlineLiteral,
            sha256: "sha256:00".to_string(),
        }
    }

    fn auth_with(doc: &SpecDocument, pairs: &[(&str, &str)]) -> AuthResolution {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        AuthResolution::resolve_with(doc, |name| env.get(name).cloned())
    }

    #[test]
    fn assembles_both_tools_with_credentials() {
        let loaded = loaded();
        let doc = SpecDocument::from_value(loaded.value.clone());
        let auth = auth_with(&doc, &[("AUTH_BEARERAUTH", "t0ken")]);

        let app = CodeModeApp::assemble(&process_config(), loaded, doc, &auth).unwrap();
        let names: Vec<_> = app.registry.tools().iter().map(|t| t.name.as_ref()).collect();
        assert_eq!(names, ["search", "execute"]);
        assert!(app.descriptions.execute.contains("AUTH_BEARERAUTH"));
        assert!(app.descriptions.execute.contains("https://petstore.example.com/v1"));
        assert_eq!(app.document.endpoint_count(), 4);
    }

    #[test]
    fn missing_credentials_abort_startup() {
        let loaded = loaded();
        let doc = SpecDocument::from_value(loaded.value.clone());
        let auth = auth_with(&doc, &[]);

        let err = CodeModeApp::assemble(&process_config(), loaded, doc, &auth)
            .err()
            .unwrap();
        match err {
            StartupError::Reference(OpenApiToolsError::NoCredentials { expected }) => {
                assert_eq!(expected, ["AUTH_API_KEY", "AUTH_BEARERAUTH"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_credentials_count_as_missing() {
        let loaded = loaded();
        let doc = SpecDocument::from_value(loaded.value.clone());
        let auth = auth_with(&doc, &[("AUTH_API_KEY", "")]);
        assert!(CodeModeApp::assemble(&process_config(), loaded, doc, &auth).is_err());
    }

    #[test]
    fn remote_provider_rejects_bad_url() {
        let cfg = config(&["--sandbox-provider", "remote", "--sandbox-api-url", "not a url"]);
        assert!(matches!(build_provider(&cfg), Err(StartupError::Sandbox(_))));
    }
}
