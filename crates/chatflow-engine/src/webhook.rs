use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tracing::{debug, info, warn};

use chatflow_core::config::WebhookConfig;
use chatflow_core::context::{IntegrationContext, IntegrationOutcome};
use chatflow_core::error::{FlowError, Result};
use chatflow_core::log::LogEntry;
use chatflow_core::traits::IntegrationExecutor;
use chatflow_core::{
    HttpMethod, IntegrationStep, KeyValue, ResponseVariableMapping, Step, VariableStore, Webhook,
};

const MAX_LOGGED_BODY: usize = 2_000;

/// Performs webhook integrations over HTTP.
pub struct DefaultIntegrationExecutor {
    client: reqwest::Client,
}

impl DefaultIntegrationExecutor {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| FlowError::Webhook(e.to_string()))?;
        Ok(Self { client })
    }

    async fn call(
        &self,
        step: &Step,
        webhook: &Webhook,
        mapping: &[ResponseVariableMapping],
        ctx: &mut IntegrationContext,
    ) -> Result<IntegrationOutcome> {
        let Some(url) = webhook.url.as_deref().filter(|u| !u.trim().is_empty()) else {
            ctx.on_new_log(LogEntry::error("Webhook URL is missing"));
            return Ok(IntegrationOutcome::default());
        };
        let request = PreparedRequest::new(webhook, url, &ctx.api_host, ctx.variables());

        if ctx.is_preview {
            info!(step_id = %step.id, url = %request.url, "Simulating webhook");
            ctx.on_new_log(
                LogEntry::info("Webhook simulated in preview")
                    .with_details(format!("{} {}", request.method, request.url)),
            );
            return Ok(IntegrationOutcome::default());
        }

        debug!(step_id = %step.id, method = %request.method, url = %request.url, "Calling webhook");
        let response = request
            .into_builder(&self.client)
            .send()
            .await
            .map_err(|e| FlowError::Webhook(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| FlowError::Webhook(e.to_string()))?;
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));

        if !status.is_success() {
            warn!(step_id = %step.id, status = status.as_u16(), "Webhook returned an error");
            ctx.on_new_log(
                LogEntry::error("Webhook returned an error")
                    .with_details(format!("HTTP {}: {}", status.as_u16(), truncate(&body))),
            );
            return Ok(IntegrationOutcome::default());
        }

        for entry in mapping {
            let (Some(path), Some(variable_id)) = (&entry.body_path, &entry.variable_id) else {
                continue;
            };
            if let Some(value) = resolve_path(&body, path) {
                ctx.update_variable_value(variable_id, value_to_string(value));
            }
        }
        ctx.on_new_log(
            LogEntry::success("Webhook successfully executed")
                .with_details(format!("HTTP {}: {}", status.as_u16(), truncate(&body))),
        );
        Ok(IntegrationOutcome::default())
    }
}

impl IntegrationExecutor for DefaultIntegrationExecutor {
    fn execute<'a>(
        &'a self,
        step: &'a Step,
        integration: &'a IntegrationStep,
        ctx: &'a mut IntegrationContext,
    ) -> BoxFuture<'a, Result<IntegrationOutcome>> {
        Box::pin(async move {
            match integration {
                IntegrationStep::Webhook {
                    webhook,
                    response_variable_mapping,
                } => self.call(step, webhook, response_variable_mapping, ctx).await,
            }
        })
    }
}

/// A webhook with every variable substituted.
#[derive(Debug, Clone, PartialEq)]
struct PreparedRequest {
    method: reqwest::Method,
    url: String,
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    body: Option<String>,
}

impl PreparedRequest {
    fn new(webhook: &Webhook, url: &str, api_host: &str, variables: &VariableStore) -> Self {
        let url = variables.parse(url.trim());
        let url = if url.starts_with('/') {
            format!("{}{}", api_host.trim_end_matches('/'), url)
        } else {
            url
        };
        let pairs = |items: &[KeyValue]| -> Vec<(String, String)> {
            items
                .iter()
                .filter_map(|kv| {
                    let key = kv.key.as_deref()?;
                    Some((
                        variables.parse(key),
                        variables.parse(kv.value.as_deref().unwrap_or_default()),
                    ))
                })
                .collect()
        };
        Self {
            method: match webhook.method {
                HttpMethod::Get => reqwest::Method::GET,
                HttpMethod::Post => reqwest::Method::POST,
                HttpMethod::Put => reqwest::Method::PUT,
                HttpMethod::Patch => reqwest::Method::PATCH,
                HttpMethod::Delete => reqwest::Method::DELETE,
            },
            url,
            headers: pairs(&webhook.headers),
            query: pairs(&webhook.query_params),
            body: webhook
                .body
                .as_deref()
                .filter(|b| !b.trim().is_empty())
                .map(|b| variables.parse(b)),
        }
    }

    fn into_builder(self, client: &reqwest::Client) -> reqwest::RequestBuilder {
        let mut req = client.request(self.method, &self.url);
        if !self.query.is_empty() {
            req = req.query(&self.query);
        }
        for (key, value) in &self.headers {
            req = req.header(key.as_str(), value.as_str());
        }
        if let Some(body) = self.body {
            if serde_json::from_str::<Value>(&body).is_ok() {
                req = req.header(CONTENT_TYPE, "application/json");
            }
            req = req.body(body);
        }
        req
    }
}

/// Follow a dot path (`user.name`, `items.0.id`) into a JSON value.
pub fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(body: &Value) -> String {
    let mut text = value_to_string(body);
    if text.len() > MAX_LOGGED_BODY {
        let mut end = MAX_LOGGED_BODY;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
        text.push_str("...");
    }
    text
}
