//! User-facing configuration: implementation overrides and execution context settings.
//!
//! Overrides are keyed by [`Attributes::KEY`](crate::executor::Attributes::KEY) and steer which
//! implementation a factory may pick. Context settings size the worker pool, the scratch
//! allocator behaviour and the dispatch memo. Both deserialize from JSON and can be loaded from
//! the environment.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::env;
use crate::error::{ExecutorError, ExecutorResult};

pub const DEFAULT_DISPATCH_CACHE_SIZE: usize = 16;

/// Overrides that steer how factories pick implementations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionOverrides {
    #[serde(flatten)]
    overrides: HashMap<String, PolicySetting>,
}

impl SelectionOverrides {
    /// Returns the policy configured for `key`.
    /// Defaults to [`SelectionPolicy::Default`] when no explicit override exists.
    pub fn policy(&self, key: &str) -> SelectionPolicy {
        self.overrides
            .get(key)
            .cloned()
            .map(SelectionPolicy::from_setting)
            .unwrap_or(SelectionPolicy::Default)
    }

    /// Name of the implementation forced for `key`, if any.
    pub fn priority_for(&self, key: &str) -> Option<&str> {
        match self.overrides.get(key)? {
            PolicySetting::Force(name) if !name.is_empty() => Some(name),
            _ => None,
        }
    }

    /// Forces `implementation` for every factory whose attributes use `key`.
    pub fn force(mut self, key: impl Into<String>, implementation: impl Into<String>) -> Self {
        self.overrides
            .insert(key.into(), PolicySetting::Force(implementation.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    /// Parses overrides from a JSON object such as `{"eltwise": "force=eltwise_ref"}`.
    pub fn from_json_str(raw: &str) -> ExecutorResult<Self> {
        serde_json::from_str(raw)
            .map_err(|err| ExecutorError::config(format!("malformed selection overrides: {err}")))
    }
}

/// Effective policy applied to one attribute key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionPolicy {
    /// Registry priority order decides.
    Default,
    /// Only the named implementation is considered.
    Force { implementation: String },
}

impl SelectionPolicy {
    fn from_setting(setting: PolicySetting) -> Self {
        match setting {
            PolicySetting::Force(name) if name.is_empty() => SelectionPolicy::Default,
            PolicySetting::Force(name) => SelectionPolicy::Force {
                implementation: name,
            },
        }
    }
}

/// Raw setting as written in configuration, before normalisation into a policy.
/// Accepts `force=<name>`, a bare `<name>`, or an empty string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicySetting {
    Force(String),
}

impl<'de> Deserialize<'de> for PolicySetting {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse_policy_string(&raw).map_err(serde::de::Error::custom)
    }
}

impl Serialize for PolicySetting {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            PolicySetting::Force(name) if name.is_empty() => serializer.serialize_str(""),
            PolicySetting::Force(name) => serializer.serialize_str(&format!("force={name}")),
        }
    }
}

fn parse_policy_string(raw: &str) -> Result<PolicySetting, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(PolicySetting::Force(String::new()));
    }

    if let Some(rest) = trimmed.strip_prefix("force=") {
        return Ok(PolicySetting::Force(rest.trim().to_string()));
    }

    // Cost-model selection is not something the engine performs.
    if trimmed.eq_ignore_ascii_case("benchmark") || trimmed.starts_with("benchmark(") {
        return Err(format!(
            "unsupported selection policy '{trimmed}': only 'force=<name>' is recognised"
        ));
    }

    if trimmed.contains('=') {
        return Err(format!("unknown selection policy option: {trimmed}"));
    }

    Ok(PolicySetting::Force(trimmed.to_string()))
}

/// What the scratch allocator does with conversion buffers once a call finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScratchPolicy {
    /// Keep buffers pooled for the next call.
    #[default]
    Recycle,
    /// Free buffers immediately.
    Release,
}

/// Settings used to build an [`ExecutorContext`](crate::executor::ExecutorContext).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Worker threads for kernels; `None` lets rayon decide.
    pub num_threads: Option<usize>,
    pub scratch_policy: ScratchPolicy,
    /// Shape signatures remembered per deferred executor.
    pub dispatch_cache_size: usize,
    pub overrides: SelectionOverrides,
}

impl Default for ContextConfig {
    fn default() -> Self {
        ContextConfig {
            num_threads: None,
            scratch_policy: ScratchPolicy::default(),
            dispatch_cache_size: DEFAULT_DISPATCH_CACHE_SIZE,
            overrides: SelectionOverrides::default(),
        }
    }
}

impl ContextConfig {
    /// Defaults overlaid with `EXECSEL_NUM_THREADS` and `EXECSEL_OVERRIDES`.
    pub fn from_env() -> ExecutorResult<Self> {
        let mut config = ContextConfig::default();
        if let Some(raw) = env::num_threads() {
            let threads = raw.trim().parse::<usize>().map_err(|_| {
                let var = env::NUM_THREADS_VAR;
                ExecutorError::config(format!("{var} must be a thread count, got '{raw}'"))
            })?;
            config.num_threads = Some(threads);
        }
        if let Some(raw) = env::overrides() {
            config.overrides = SelectionOverrides::from_json_str(raw)?;
        }
        Ok(config)
    }

    pub fn from_json_str(raw: &str) -> ExecutorResult<Self> {
        serde_json::from_str(raw)
            .map_err(|err| ExecutorError::config(format!("malformed context config: {err}")))
    }

    pub fn with_overrides(mut self, overrides: SelectionOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    pub fn with_scratch_policy(mut self, policy: ScratchPolicy) -> Self {
        self.scratch_policy = policy;
        self
    }
}
