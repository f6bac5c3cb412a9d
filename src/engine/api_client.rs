//! API Client (C3, §4.3): a generic REST invoker with auth, retry, cache,
//! and response transformation.

use std::time::Duration;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::engine::format::{format_template, format_value};
use crate::models::step::{ApiCallConfig, ApiKeyLocation, AuthConfig};

/// The `output` object inside a step result (§4.3's return invariant):
/// `{data, status_code, headers, status, error?}`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiCallOutput {
    pub data: serde_json::Value,
    pub status_code: u16,
    pub headers: std::collections::HashMap<String, String>,
    pub status: &'static str,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApiCallResult {
    pub success: bool,
    pub output: ApiCallOutput,
}

#[derive(Clone)]
struct CacheEntry {
    output: ApiCallOutput,
    expires_at: std::time::Instant,
}

/// Process-wide, keyed by a hash that includes the auth principal so
/// cached responses never leak across distinct credentials (§5's
/// shared-resource policy).
pub struct ApiClient {
    http: reqwest::Client,
    cache: DashMap<String, CacheEntry>,
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            cache: DashMap::new(),
        }
    }

    pub async fn call(
        &self,
        config: &ApiCallConfig,
        variables: &serde_json::Map<String, serde_json::Value>,
    ) -> ApiCallResult {
        let url = format_template(&config.url, variables);
        let query: Vec<(String, String)> = config
            .query_params
            .iter()
            .map(|(k, v)| (k.clone(), crate::engine::format::stringify(&format_value(v, variables))))
            .collect();
        let body = config.body.as_ref().map(|b| format_value(b, variables));

        let cache_key = self.cache_key(config, &url, &query, &body);
        if config.cache.enabled {
            if let Some(entry) = self.cache.get(&cache_key) {
                if entry.expires_at > std::time::Instant::now() {
                    debug!(url = %url, "api client cache hit");
                    return ApiCallResult {
                        success: entry.output.status == "success",
                        output: entry.output.clone(),
                    };
                }
            }
        }

        let max_retries = config.retry.max_retries;
        let mut last_output: Option<ApiCallOutput> = None;
        for attempt in 0..=max_retries {
            if attempt > 0 {
                let delay = config.retry.delay_seconds
                    * config.retry.backoff_factor.powi(attempt as i32 - 1);
                if delay > 0.0 {
                    tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                }
            }

            match self.attempt(config, &url, &query, &body).await {
                Ok(output) => {
                    let retryable = config.retry.retry_on_status.contains(&output.status_code);
                    if !retryable || attempt == max_retries {
                        let success = output.status == "success";
                        if success && config.cache.enabled {
                            self.cache.insert(
                                cache_key.clone(),
                                CacheEntry {
                                    output: output.clone(),
                                    expires_at: std::time::Instant::now()
                                        + Duration::from_secs(config.cache.ttl_seconds),
                                },
                            );
                        }
                        return ApiCallResult { success, output };
                    }
                    last_output = Some(output);
                }
                Err(message) => {
                    warn!(url = %url, attempt, %message, "api client network failure");
                    last_output = Some(ApiCallOutput {
                        data: serde_json::Value::Null,
                        status_code: 0,
                        headers: Default::default(),
                        status: "error",
                        error: Some(message),
                    });
                    if attempt == max_retries {
                        break;
                    }
                }
            }
        }

        let output = last_output.unwrap_or(ApiCallOutput {
            data: serde_json::Value::Null,
            status_code: 0,
            headers: Default::default(),
            status: "error",
            error: Some("no attempt was made".into()),
        });
        ApiCallResult {
            success: false,
            output,
        }
    }

    async fn attempt(
        &self,
        config: &ApiCallConfig,
        url: &str,
        query: &[(String, String)],
        body: &Option<serde_json::Value>,
    ) -> Result<ApiCallOutput, String> {
        let mut request = self
            .http
            .request(config.method.as_reqwest(), url)
            .query(query);

        for (name, value) in default_headers(url) {
            request = request.header(name, value);
        }
        for (name, value) in &config.headers {
            request = request.header(name, value);
        }
        request = apply_auth(request, &config.auth, query);

        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some(secs) = config.timeout_seconds {
            request = request.timeout(Duration::from_secs(secs));
        } else {
            request = request.timeout(Duration::from_secs(30));
        }

        let response = request.send().await.map_err(|e| e.to_string())?;
        let status_code = response.status().as_u16();
        let headers: std::collections::HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let is_json = headers
            .get("content-type")
            .map(|ct| ct.contains("json"))
            .unwrap_or(true);
        let bytes = response.bytes().await.map_err(|e| e.to_string())?;
        let raw_body: serde_json::Value = if is_json {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        } else {
            serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned())
        };

        let data = apply_response_transform(&raw_body, config.response.as_ref());
        let success = (200..300).contains(&status_code);

        Ok(ApiCallOutput {
            data,
            status_code,
            headers,
            status: if success { "success" } else { "error" },
            error: if success {
                None
            } else {
                Some(format!("http {status_code}"))
            },
        })
    }

    fn cache_key(
        &self,
        config: &ApiCallConfig,
        url: &str,
        query: &[(String, String)],
        body: &Option<serde_json::Value>,
    ) -> String {
        let mut sorted_query = query.to_vec();
        sorted_query.sort();
        let principal = auth_principal(&config.auth);
        let mut hasher = Sha256::new();
        hasher.update(config.method.as_reqwest().as_str());
        hasher.update(url);
        for (k, v) in &sorted_query {
            hasher.update(k);
            hasher.update(v);
        }
        if let Some(b) = body {
            hasher.update(b.to_string());
        }
        hasher.update(principal);
        format!("{:x}", hasher.finalize())
    }
}

/// Default headers injected unless the caller overrides them (§4.3):
/// a modern browser-class `User-Agent`, permissive `Accept`, `Accept-Language`,
/// `Cache-Control: no-cache`, and a `Referer` derived from the URL itself.
fn default_headers(url: &str) -> Vec<(&'static str, String)> {
    let mut headers = vec![
        ("User-Agent", "Mozilla/5.0 (compatible; WorkflowEngine/1.0; +https://example.invalid/bot)".to_string()),
        ("Accept", "application/json, text/plain, */*".to_string()),
        ("Accept-Language", "en-US,en;q=0.9".to_string()),
        ("Cache-Control", "no-cache".to_string()),
    ];
    if let Ok(parsed) = url::Url::parse(url) {
        if let Some(host) = parsed.host_str() {
            let scheme = parsed.scheme();
            let port = parsed
                .port()
                .map(|p| format!(":{p}"))
                .unwrap_or_default();
            headers.push(("Referer", format!("{scheme}://{host}{port}/")));
        }
    }
    headers
}

fn apply_auth(
    mut request: reqwest::RequestBuilder,
    auth: &AuthConfig,
    _query: &[(String, String)],
) -> reqwest::RequestBuilder {
    match auth {
        AuthConfig::None => request,
        AuthConfig::ApiKey { key, location, name } => match location {
            ApiKeyLocation::Query => request.query(&[(name.as_str(), key.as_str())]),
            ApiKeyLocation::Header => request.header(name, key),
        },
        AuthConfig::Basic { username, password } => {
            use base64::Engine;
            let token = base64::engine::general_purpose::STANDARD
                .encode(format!("{username}:{password}"));
            request = request.header("Authorization", format!("Basic {token}"));
            request
        }
        AuthConfig::OAuth { token } | AuthConfig::Jwt { token } => {
            request.header("Authorization", format!("Bearer {token}"))
        }
        AuthConfig::Custom { headers } => {
            for (k, v) in headers {
                request = request.header(k, v);
            }
            request
        }
    }
}

fn auth_principal(auth: &AuthConfig) -> String {
    match auth {
        AuthConfig::None => "none".to_string(),
        AuthConfig::ApiKey { key, .. } => format!("apikey:{key}"),
        AuthConfig::OAuth { token } => format!("oauth:{token}"),
        AuthConfig::Jwt { token } => format!("jwt:{token}"),
        AuthConfig::Basic { username, .. } => format!("basic:{username}"),
        AuthConfig::Custom { headers } => format!("custom:{headers:?}"),
    }
}

/// `extract` walks a dotted path, then `map` projects named fields from
/// the (possibly already extracted) value (§4.3).
fn apply_response_transform(
    body: &serde_json::Value,
    transform: Option<&crate::models::step::ResponseTransform>,
) -> serde_json::Value {
    let Some(transform) = transform else {
        return body.clone();
    };
    let extracted = match &transform.extract {
        Some(path) => walk_path(body, path).cloned().unwrap_or(serde_json::Value::Null),
        None => body.clone(),
    };
    match &transform.map {
        Some(mapping) => {
            let mut out = serde_json::Map::new();
            for (dst, src_path) in mapping {
                if let Some(v) = walk_path(&extracted, src_path) {
                    out.insert(dst.clone(), v.clone());
                }
            }
            serde_json::Value::Object(out)
        }
        None => extracted,
    }
}

fn walk_path<'a>(root: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            serde_json::Value::Object(map) => map.get(segment)?,
            serde_json::Value::Array(arr) => arr.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::step::{CacheConfig, HttpMethod};
    use serde_json::json;

    fn base_config(url: &str) -> ApiCallConfig {
        ApiCallConfig {
            method: HttpMethod::Get,
            url: url.to_string(),
            query_params: Default::default(),
            headers: Default::default(),
            body: None,
            auth: AuthConfig::None,
            retry: Default::default(),
            cache: CacheConfig::default(),
            response: None,
            timeout_seconds: None,
        }
    }

    #[test]
    fn default_headers_include_referer_from_url() {
        let headers = default_headers("https://api.example.test:8443/v1/items?x=1");
        let referer = headers.iter().find(|(k, _)| *k == "Referer").unwrap();
        assert_eq!(referer.1, "https://api.example.test:8443/");
    }

    #[test]
    fn response_transform_extract_then_map() {
        let body = json!({"result": {"id": 1, "name": "alpha"}});
        let transform = crate::models::step::ResponseTransform {
            extract: Some("result".to_string()),
            map: Some(
                [("identifier".to_string(), "id".to_string())]
                    .into_iter()
                    .collect(),
            ),
        };
        let out = apply_response_transform(&body, Some(&transform));
        assert_eq!(out, json!({"identifier": 1}));
    }

    #[test]
    fn cache_key_differs_by_auth_principal() {
        let client = ApiClient::new();
        let cfg_a = base_config("https://api.example.test/v1/items");
        let mut cfg_b = base_config("https://api.example.test/v1/items");
        cfg_b.auth = AuthConfig::ApiKey {
            key: "secret".into(),
            location: ApiKeyLocation::Header,
            name: "api_key".into(),
        };
        let key_a = client.cache_key(&cfg_a, &cfg_a.url, &[], &None);
        let key_b = client.cache_key(&cfg_b, &cfg_b.url, &[], &None);
        assert_ne!(key_a, key_b);
    }

    #[test]
    fn cache_key_is_stable_for_identical_requests() {
        let client = ApiClient::new();
        let cfg = base_config("https://api.example.test/v1/items");
        let query = vec![("limit".to_string(), "10".to_string())];
        let a = client.cache_key(&cfg, &cfg.url, &query, &None);
        let b = client.cache_key(&cfg, &cfg.url, &query, &None);
        assert_eq!(a, b);
    }
}
