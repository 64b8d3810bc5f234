use serde_json::json;

use crate::{ToolDefinition, ToolParam, ToolProvider, ToolResult};

use super::require_str;

/// Web search via the Tavily API. Used as a fallback during dependency repair
/// when a package is not found on PyPI.
pub struct WebSearch {
    api_key: String,
    client: reqwest::Client,
}

impl WebSearch {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl ToolProvider for WebSearch {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "search_web".into(),
            description: "Search the web; returns an answer plus {title, url, content} results."
                .into(),
            params: vec![
                ToolParam::typed("query", "str"),
                ToolParam::optional("max_results", "int"),
            ],
            returns: "dict".into(),
        }]
    }

    async fn execute(&self, _name: &str, args: &serde_json::Value) -> ToolResult {
        let query = match require_str(args, "query") {
            Ok(s) => s,
            Err(e) => return e,
        };
        let max_results = args.get("max_results").and_then(|v| v.as_u64()).unwrap_or(3);

        let resp = self
            .client
            .post("https://api.tavily.com/search")
            .json(&json!({
                "api_key": self.api_key,
                "query": query,
                "max_results": max_results,
                "include_answer": true,
            }))
            .send()
            .await;

        match resp {
            Ok(r) if r.status().is_success() => match r.json::<serde_json::Value>().await {
                Ok(data) => {
                    let results: Vec<serde_json::Value> = data["results"]
                        .as_array()
                        .map(|arr| {
                            arr.iter()
                                .map(|r| {
                                    json!({
                                        "title": r["title"].as_str().unwrap_or(""),
                                        "url": r["url"].as_str().unwrap_or(""),
                                        "content": r["content"].as_str().unwrap_or(""),
                                    })
                                })
                                .collect()
                        })
                        .unwrap_or_default();
                    ToolResult::ok(json!({
                        "answer": data["answer"].as_str().unwrap_or(""),
                        "results": results,
                    }))
                }
                Err(e) => ToolResult::err_fmt(format_args!("Failed to parse response: {e}")),
            },
            Ok(r) => {
                let status = r.status();
                let body = r.text().await.unwrap_or_default();
                ToolResult::err_fmt(format_args!("Search API error ({status}): {body}"))
            }
            Err(e) => ToolResult::err_fmt(format_args!("Request failed: {e}")),
        }
    }
}
