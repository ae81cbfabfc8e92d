// Module: Context
// Fixture values for a run: suite variables, generated unique ids, interpolation.

use chrono::Utc;
use once_cell::sync::Lazy;
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;

use crate::protocol::Suite;

static INTERPOLATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z0-9_.:-]+)\}").expect("valid interpolation regex")
});

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ContextError {
    #[error("variável de ambiente '{0}' não definida")]
    MissingEnv(String),

    #[error("variável '{0}' não existe no contexto")]
    MissingVariable(String),
}

/// Flat string mapping shared by every workflow of a run.
#[derive(Debug, Default, Clone)]
pub struct Context {
    pub variables: HashMap<String, String>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            variables: HashMap::new(),
        }
    }

    /// Suite variables plus one generated value per `unique_ids` entry.
    pub fn from_suite(suite: &Suite) -> Self {
        let mut ctx = Self::new();
        ctx.extend(&suite.variables);
        for (key, prefix) in &suite.unique_ids {
            ctx.seed_unique(key.clone(), prefix);
        }
        ctx
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(key.into(), value.into());
    }

    pub fn extend(&mut self, entries: &HashMap<String, String>) {
        for (k, v) in entries {
            self.variables.insert(k.clone(), v.clone());
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.variables.get(key).map(String::as_str)
    }

    /// Generates `<prefix>_<epoch millis>_<4 alnum>` and stores it under `key`.
    pub fn seed_unique(&mut self, key: impl Into<String>, prefix: &str) -> String {
        let value = unique_id(prefix);
        self.variables.insert(key.into(), value.clone());
        value
    }

    /// Replaces `${name}` placeholders. `${ENV_X}` reads the environment variable `X`.
    pub fn interpolate_str(&self, input: &str) -> Result<String, ContextError> {
        let mut result = String::with_capacity(input.len());
        let mut last_index = 0;

        for capture in INTERPOLATION_RE.captures_iter(input) {
            let (Some(matched), Some(token)) = (capture.get(0), capture.get(1)) else {
                continue;
            };
            result.push_str(&input[last_index..matched.start()]);
            result.push_str(&self.resolve_token(token.as_str())?);
            last_index = matched.end();
        }

        result.push_str(&input[last_index..]);
        Ok(result)
    }

    fn resolve_token(&self, token: &str) -> Result<String, ContextError> {
        if let Some(rest) = token.strip_prefix("ENV_") {
            std::env::var(rest).map_err(|_| ContextError::MissingEnv(rest.to_string()))
        } else {
            self.variables
                .get(token)
                .cloned()
                .ok_or_else(|| ContextError::MissingVariable(token.to_string()))
        }
    }
}

/// Unique test-data value, e.g. `bot_1718000000000_a9Zq`.
pub fn unique_id(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(4)
        .map(char::from)
        .collect();
    format!("{}_{}_{}", prefix, Utc::now().timestamp_millis(), suffix)
}
