use serde_json::json;

use crate::{ToolDefinition, ToolParam, ToolProvider, ToolResult};

use super::require_str;

/// Cap on returned versions; the newest are the ones a repair wants to pin.
const MAX_VERSIONS: usize = 40;

/// PyPI package version lookup via the JSON API.
pub struct PackageVersions {
    client: reqwest::Client,
}

impl PackageVersions {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for PackageVersions {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ToolProvider for PackageVersions {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "package_versions".into(),
            description:
                "Look up released versions of a PyPI package as {version, release_date}, newest first."
                    .into(),
            params: vec![ToolParam::typed("package", "str")],
            returns: "list".into(),
        }]
    }

    async fn execute(&self, _name: &str, args: &serde_json::Value) -> ToolResult {
        let package = match require_str(args, "package") {
            Ok(s) => s,
            Err(e) => return e,
        };

        let resp = self
            .client
            .get(format!("https://pypi.org/pypi/{package}/json"))
            .send()
            .await;

        match resp {
            Ok(r) if r.status().is_success() => match r.json::<serde_json::Value>().await {
                Ok(data) => ToolResult::ok(json!(release_index(&data))),
                Err(e) => ToolResult::err_fmt(format_args!("Failed to parse PyPI response: {e}")),
            },
            Ok(r) if r.status().as_u16() == 404 => {
                ToolResult::err_fmt(format_args!("No such package on PyPI: {package}"))
            }
            Ok(r) => ToolResult::err_fmt(format_args!("PyPI error: HTTP {}", r.status())),
            Err(e) => ToolResult::err_fmt(format_args!("Request failed: {e}")),
        }
    }
}

/// Flatten the `releases` map into {version, release_date} entries, newest
/// release first, skipping versions with no uploaded files.
fn release_index(data: &serde_json::Value) -> Vec<serde_json::Value> {
    let mut versions: Vec<(String, String)> = data["releases"]
        .as_object()
        .map(|releases| {
            releases
                .iter()
                .filter_map(|(version, files)| {
                    let first = files.as_array()?.first()?;
                    let uploaded = first["upload_time"].as_str().unwrap_or("");
                    let date = uploaded.split('T').next().unwrap_or("").to_string();
                    Some((version.clone(), date))
                })
                .collect()
        })
        .unwrap_or_default();
    versions.sort_by(|a, b| b.1.cmp(&a.1));
    versions.truncate(MAX_VERSIONS);
    versions
        .into_iter()
        .map(|(version, release_date)| json!({"version": version, "release_date": release_date}))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_index_sorts_newest_first() {
        let data = json!({
            "releases": {
                "1.0.0": [{"upload_time": "2020-01-15T10:00:00"}],
                "2.0.0": [{"upload_time": "2023-06-01T10:00:00"}],
                "1.5.0": [{"upload_time": "2021-03-20T10:00:00"}],
            }
        });
        let index = release_index(&data);
        let versions: Vec<&str> = index.iter().map(|e| e["version"].as_str().unwrap()).collect();
        assert_eq!(versions, vec!["2.0.0", "1.5.0", "1.0.0"]);
        assert_eq!(index[0]["release_date"], "2023-06-01");
    }

    #[test]
    fn release_index_skips_empty_releases() {
        let data = json!({
            "releases": {
                "0.9.0": [],
                "1.0.0": [{"upload_time": "2022-01-01T00:00:00"}],
            }
        });
        let index = release_index(&data);
        assert_eq!(index.len(), 1);
        assert_eq!(index[0]["version"], "1.0.0");
    }

    #[test]
    fn release_index_handles_malformed_payload() {
        assert!(release_index(&json!({})).is_empty());
        assert!(release_index(&json!({"releases": 3})).is_empty());
    }
}
