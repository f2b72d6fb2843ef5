use std::env;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};

const DEFAULT_API_VERSION: &str = "2024-02-15-preview";
const DEFAULT_MODEL_SCOPE: &str = "https://cognitiveservices.azure.com/.default";
const DEFAULT_MAX_TURNS: usize = 10;
const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 60;
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

/// How bearer tokens are obtained for the two identity domains.
#[derive(Debug, Clone)]
pub enum CredentialSettings {
    /// Pre-acquired tokens handed in directly.
    Static {
        model_token: String,
        tool_token: String,
    },
    /// OAuth2 client-credentials grant against a shared token endpoint,
    /// with a distinct scope per domain.
    ClientCredentials {
        token_url: String,
        client_id: String,
        client_secret: String,
        model_scope: String,
        tool_scope: String,
    },
}

/// Everything the driver needs to wire up a run, loaded from the
/// environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub endpoint: String,
    pub api_version: String,
    pub deployment: String,
    pub tool_server_url: String,
    pub model_timeout: Duration,
    pub tool_timeout: Duration,
    pub max_turns: usize,
    pub credentials: CredentialSettings,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let endpoint = required("HERON_ENDPOINT")?;
        let deployment = required("HERON_DEPLOYMENT")?;
        let tool_server_url = required("HERON_TOOL_SERVER_URL")?;

        let credentials = match (optional("HERON_MODEL_TOKEN"), optional("HERON_TOOL_TOKEN")) {
            (Some(model_token), Some(tool_token)) => CredentialSettings::Static {
                model_token,
                tool_token,
            },
            (None, None) => CredentialSettings::ClientCredentials {
                token_url: required("HERON_TOKEN_URL")?,
                client_id: required("HERON_CLIENT_ID")?,
                client_secret: required("HERON_CLIENT_SECRET")?,
                model_scope: optional("HERON_MODEL_SCOPE")
                    .unwrap_or_else(|| DEFAULT_MODEL_SCOPE.to_string()),
                tool_scope: required("HERON_TOOL_SCOPE")?,
            },
            _ => bail!("HERON_MODEL_TOKEN and HERON_TOOL_TOKEN must be set together"),
        };

        Ok(Settings {
            endpoint,
            api_version: optional("HERON_API_VERSION")
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            deployment,
            tool_server_url,
            model_timeout: Duration::from_secs(parsed(
                "HERON_MODEL_TIMEOUT_SECS",
                DEFAULT_MODEL_TIMEOUT_SECS,
            )?),
            tool_timeout: Duration::from_secs(parsed(
                "HERON_TOOL_TIMEOUT_SECS",
                DEFAULT_TOOL_TIMEOUT_SECS,
            )?),
            max_turns: parsed("HERON_MAX_TURNS", DEFAULT_MAX_TURNS)?,
            credentials,
        })
    }
}

fn required(name: &str) -> Result<String> {
    optional(name).ok_or_else(|| anyhow!("{name} environment variable is required"))
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match optional(name) {
        Some(value) => value
            .parse()
            .map_err(|_| anyhow!("{name} has an invalid value: {value}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Environment variables are process-global, so the scenarios share one
    // test and run back to back.
    #[test]
    fn settings_load_from_the_environment() {
        let all = [
            "HERON_ENDPOINT",
            "HERON_API_VERSION",
            "HERON_DEPLOYMENT",
            "HERON_TOOL_SERVER_URL",
            "HERON_MODEL_TOKEN",
            "HERON_TOOL_TOKEN",
            "HERON_TOKEN_URL",
            "HERON_CLIENT_ID",
            "HERON_CLIENT_SECRET",
            "HERON_MODEL_SCOPE",
            "HERON_TOOL_SCOPE",
            "HERON_MAX_TURNS",
            "HERON_MODEL_TIMEOUT_SECS",
            "HERON_TOOL_TIMEOUT_SECS",
        ];
        for name in all {
            env::remove_var(name);
        }

        // Missing required variables fail with an actionable message.
        let err = Settings::from_env().unwrap_err();
        assert!(err.to_string().contains("HERON_ENDPOINT"));

        env::set_var("HERON_ENDPOINT", "https://acme.openai.azure.com");
        env::set_var("HERON_DEPLOYMENT", "gpt-4o");
        env::set_var("HERON_TOOL_SERVER_URL", "https://tools.example.com/mcp");
        env::set_var("HERON_MODEL_TOKEN", "mt");
        env::set_var("HERON_TOOL_TOKEN", "tt");

        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.api_version, DEFAULT_API_VERSION);
        assert_eq!(settings.max_turns, DEFAULT_MAX_TURNS);
        assert_eq!(settings.tool_timeout, Duration::from_secs(30));
        assert!(matches!(settings.credentials, CredentialSettings::Static { .. }));

        // A lone static token is a configuration mistake, not a fallback.
        env::remove_var("HERON_TOOL_TOKEN");
        let err = Settings::from_env().unwrap_err();
        assert!(err.to_string().contains("must be set together"));

        // Without static tokens the client-credentials settings apply.
        env::remove_var("HERON_MODEL_TOKEN");
        env::set_var("HERON_TOKEN_URL", "https://login.example.com/token");
        env::set_var("HERON_CLIENT_ID", "client-1");
        env::set_var("HERON_CLIENT_SECRET", "secret");
        env::set_var("HERON_TOOL_SCOPE", "api://tools/.default");
        env::set_var("HERON_MAX_TURNS", "5");

        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.max_turns, 5);
        match settings.credentials {
            CredentialSettings::ClientCredentials { model_scope, tool_scope, .. } => {
                assert_eq!(model_scope, DEFAULT_MODEL_SCOPE);
                assert_eq!(tool_scope, "api://tools/.default");
            }
            other => panic!("expected client-credentials settings, got {other:?}"),
        }

        for name in all {
            env::remove_var(name);
        }
    }
}
