//! HTTP client for a running bridge, used by the CLI subcommands and tests.

use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};

/// Status and parsed body of one bridge response.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: Value,
}

impl Reply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Clone)]
pub struct SkillClient {
    base_url: String,
    http: reqwest::Client,
}

impl SkillClient {
    /// `base_url` may be given with or without a trailing slash.
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Invoke a skill. Non-2xx answers are returned, not raised.
    pub async fn call(&self, name: &str, args: &Value) -> Result<Reply> {
        let url = format!("{}/skill/{}", self.base_url, name);
        let resp = self
            .http
            .post(&url)
            .json(args)
            .send()
            .await
            .with_context(|| format!("POST {url} failed"))?;
        read_reply(resp).await
    }

    /// Fetch the manifest.
    pub async fn skills(&self) -> Result<Value> {
        self.get_ok("/skills").await
    }

    pub async fn health(&self) -> Result<Value> {
        self.get_ok("/health").await
    }

    /// Whether the health endpoint answers and reports the server running.
    pub async fn is_running(&self) -> bool {
        match self.health().await {
            Ok(body) => body["serverRunning"].as_bool().unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Poll the health endpoint until it answers or `timeout` elapses.
    pub async fn wait_for_server(&self, timeout: Duration, interval: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_running().await {
                return Ok(());
            }
            if Instant::now() >= deadline {
                bail!(
                    "bridge at {} did not answer within {:?}",
                    self.base_url,
                    timeout
                );
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn get_ok(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;
        let reply = read_reply(resp).await?;
        if !reply.is_success() {
            bail!("GET {url} returned {}: {}", reply.status, reply.body);
        }
        Ok(reply.body)
    }
}

async fn read_reply(resp: reqwest::Response) -> Result<Reply> {
    let status = resp.status().as_u16();
    let text = resp.text().await.context("failed to read response body")?;
    let body = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };
    Ok(Reply { status, body })
}

/// Parse `key=value` pairs into an argument object. Values become integers,
/// floats or booleans when they parse as such, else strings.
pub fn parse_cli_args(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut args = Map::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("expected key=value, got '{pair}'");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("empty argument name in '{pair}'");
        }
        args.insert(key.to_string(), parse_cli_value(raw));
    }
    Ok(args)
}

fn parse_cli_value(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    if let Some(f) = raw.parse::<f64>().ok().filter(|f| f.is_finite()) {
        return Value::from(f);
    }
    match raw.to_ascii_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}
