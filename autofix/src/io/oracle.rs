//! Patch oracle: the optional external service that proposes diffs.
//!
//! The [`PatchOracle`] trait decouples the repair loop from the actual
//! backend. Two backends ship: an Azure OpenAI chat-completions deployment
//! and an arbitrary command that reads the prompt on stdin. Tests use
//! scripted oracles that return predetermined completions.
//!
//! The oracle is untrusted. [`OracleClient`] turns every failure mode
//! (no backend, transport error, reply without a diff) into "no proposal".

use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::patch::{DIFF_MARKER, extract_patch};
use crate::core::types::CandidatePatch;
use crate::io::config::{OracleBackend, OracleConfig};
use crate::io::process::{ProcessRunner, display_command};
use crate::io::prompt::{ContextBuilder, RepairContext};

pub const ENV_ENDPOINT: &str = "AZURE_OPENAI_ENDPOINT";
pub const ENV_API_KEY: &str = "AZURE_OPENAI_API_KEY";
pub const ENV_DEPLOYMENT: &str = "AZURE_OPENAI_DEPLOYMENT";
pub const ENV_API_VERSION: &str = "AZURE_OPENAI_API_VERSION";
pub const DEFAULT_API_VERSION: &str = "2024-10-21";

const SYSTEM_MESSAGE: &str = "You generate minimal unified diffs that fix Angular tests.";

/// Abstraction over patch proposal backends.
pub trait PatchOracle {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Send `prompt` and return the raw completion text.
    fn complete(&self, prompt: &str) -> Result<String>;
}

/// Oracle that pipes the prompt into a local command and reads its stdout.
pub struct CommandOracle {
    process: ProcessRunner,
    command: Vec<String>,
}

impl CommandOracle {
    pub fn new(process: ProcessRunner, command: Vec<String>) -> Self {
        Self { process, command }
    }
}

impl PatchOracle for CommandOracle {
    fn name(&self) -> &str {
        "command"
    }

    #[instrument(skip_all)]
    fn complete(&self, prompt: &str) -> Result<String> {
        info!(command = %display_command(&self.command), "invoking oracle command");
        let output = self.process.run(&self.command, Some(prompt.as_bytes()))?;
        if !output.success() {
            bail!(
                "oracle command exited with {}: {}",
                output.exit_code,
                output.stderr.trim()
            );
        }
        Ok(output.stdout)
    }
}

/// Connection settings for an Azure OpenAI deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureOpenAiSettings {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
}

impl AzureOpenAiSettings {
    /// Read settings through `lookup`; `None` unless endpoint, key and deployment are all set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Some(Self {
            endpoint: get(ENV_ENDPOINT)?,
            api_key: get(ENV_API_KEY)?,
            deployment: get(ENV_DEPLOYMENT)?,
            api_version: get(ENV_API_VERSION).unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
        })
    }

    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint.trim_end_matches('/'),
            self.deployment,
            self.api_version
        )
    }
}

/// Oracle backed by one Azure OpenAI chat-completions request per proposal.
pub struct AzureOpenAiOracle {
    client: Client,
    settings: AzureOpenAiSettings,
    temperature: f32,
    max_tokens: u32,
}

impl AzureOpenAiOracle {
    pub fn new(settings: AzureOpenAiSettings, temperature: f32, max_tokens: u32) -> Result<Self> {
        // A slow completion blocks the run like any other collaborator.
        let client = Client::builder()
            .timeout(None::<Duration>)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            settings,
            temperature,
            max_tokens,
        })
    }

    fn request_body<'a>(&self, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_MESSAGE,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

impl PatchOracle for AzureOpenAiOracle {
    fn name(&self) -> &str {
        "azure"
    }

    #[instrument(skip_all, fields(deployment = %self.settings.deployment))]
    fn complete(&self, prompt: &str) -> Result<String> {
        let start = Instant::now();
        let resp = self
            .client
            .post(self.settings.url())
            .header("api-key", &self.settings.api_key)
            .json(&self.request_body(prompt))
            .send()
            .context("send chat completion request")?;

        let status = resp.status();
        let text = resp.text().context("read chat completion response")?;
        debug!(
            status = status.as_u16(),
            latency_ms = start.elapsed().as_millis() as u64,
            "chat completion returned"
        );
        if !status.is_success() {
            bail!("azure openai returned {status}: {}", text.trim());
        }

        let parsed: ChatResponse =
            serde_json::from_str(&text).context("parse chat completion response")?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no choices in chat completion response"))?;
        Ok(choice.message.content.unwrap_or_default())
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Instantiate the configured backend. `Ok(None)` means proposals are disabled.
pub fn build_backend(
    config: &OracleConfig,
    process: &ProcessRunner,
) -> Result<Option<Box<dyn PatchOracle>>> {
    let azure = |settings: AzureOpenAiSettings| -> Result<Option<Box<dyn PatchOracle>>> {
        let oracle = AzureOpenAiOracle::new(settings, config.temperature, config.max_tokens)?;
        Ok(Some(Box::new(oracle)))
    };
    match config.backend {
        OracleBackend::Disabled => Ok(None),
        OracleBackend::Command => Ok(Some(Box::new(CommandOracle::new(
            process.clone(),
            config.command.clone(),
        )))),
        OracleBackend::Azure => match AzureOpenAiSettings::from_env() {
            Some(settings) => azure(settings),
            None => {
                warn!(
                    "azure oracle selected but {ENV_ENDPOINT}, {ENV_API_KEY} or {ENV_DEPLOYMENT} is unset; proposals disabled"
                );
                Ok(None)
            }
        },
        OracleBackend::Auto => match AzureOpenAiSettings::from_env() {
            Some(settings) => azure(settings),
            None => {
                debug!("no oracle configured; proposals disabled");
                Ok(None)
            }
        },
    }
}

/// Renders the repair context, asks the backend, and keeps only usable diffs.
pub struct OracleClient<'a> {
    backend: Option<&'a dyn PatchOracle>,
    prompts: &'a ContextBuilder<'a>,
    preview_chars: usize,
}

impl<'a> OracleClient<'a> {
    pub fn new(
        backend: Option<&'a dyn PatchOracle>,
        prompts: &'a ContextBuilder<'a>,
        preview_chars: usize,
    ) -> Self {
        Self {
            backend,
            prompts,
            preview_chars,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// One proposal for `ctx`, or `None` when the oracle has nothing usable.
    #[instrument(skip_all, fields(runner = %ctx.runner))]
    pub fn propose(&self, ctx: &RepairContext) -> Option<CandidatePatch> {
        let Some(backend) = self.backend else {
            info!("no oracle backend configured");
            return None;
        };
        let prompt = match self.prompts.render(ctx) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to render oracle prompt");
                return None;
            }
        };
        debug!(backend = backend.name(), prompt_bytes = prompt.len(), "requesting patch");

        let completion = match backend.complete(&prompt) {
            Ok(completion) => completion,
            Err(err) => {
                warn!(backend = backend.name(), err = %format!("{err:#}"), "oracle request failed");
                return None;
            }
        };
        let Some(patch) = extract_patch(&completion) else {
            info!(
                backend = backend.name(),
                "oracle reply has no {DIFF_MARKER} marker"
            );
            return None;
        };
        info!(
            backend = backend.name(),
            bytes = patch.as_str().len(),
            "proposed patch:\n{}",
            patch.preview(self.preview_chars)
        );
        Some(patch)
    }
}
