// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Kaapi Contributors

//! Catalog search tool
//!
//! Declares the `search_catalog` tool and resolves completed invocations:
//! parse the accumulated argument JSON, coerce the fields the model tends
//! to get loose, query the catalog, and format the rows as lines the model
//! can read back to the user.

use std::sync::Arc;

use crate::catalog::{CatalogItem, CatalogStore, SearchFilters};
use crate::error::{KaapiError, Result};
use crate::llm::provider::{ToolDefinition, ToolInputSchema};

/// The one tool this backend exposes.
pub const SEARCH_TOOL_NAME: &str = "search_catalog";

/// Returned verbatim as the tool result when the catalog has nothing.
pub const NO_RESULTS_MESSAGE: &str = "No coffees found matching those preferences.";

/// How many rows a single invocation feeds back to the model.
const RESULT_LIMIT: usize = 3;

/// Build the search tool declaration.
pub fn search_tool() -> ToolDefinition {
    ToolDefinition {
        name: SEARCH_TOOL_NAME.to_string(),
        description: "Search the coffee database for coffees that match the user's preferences. \
                      Call this as soon as you have the user's brew method AND flavor preferences. \
                      Do not keep asking questions — call the tool and present the results."
            .to_string(),
        input_schema: ToolInputSchema {
            schema_type: "object".to_string(),
            properties: serde_json::json!({
                "brew_method": {
                    "type": "string",
                    "description": "Brewing equipment, e.g. Pour Over, Espresso, French Press, AeroPress, Moka Pot, South Indian Filter, Cold Brew"
                },
                "roast_level": {
                    "type": "string",
                    "description": "Preferred roast level: light, medium-light, medium, medium-dark, dark"
                },
                "flavor_keywords": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Flavor descriptors the user mentioned, e.g. fruity, citrus, chocolate, caramel, floral"
                },
                "max_price": {
                    "type": "number",
                    "description": "Maximum budget in INR per 250g"
                }
            }),
            required: vec![],
        },
    }
}

/// Resolves a completed tool invocation against the catalog.
pub struct SearchResolver {
    catalog: Arc<dyn CatalogStore>,
}

impl SearchResolver {
    pub fn new(catalog: Arc<dyn CatalogStore>) -> Self {
        Self { catalog }
    }

    /// Execute one invocation: parse, coerce, query, format.
    ///
    /// Malformed argument JSON fails the whole turn; there is no silent
    /// empty-result fallback.
    pub async fn resolve(&self, tool_name: &str, arguments_json: &str) -> Result<String> {
        if tool_name != SEARCH_TOOL_NAME {
            return Err(KaapiError::Tool(format!("unknown tool '{}'", tool_name)));
        }

        let args: serde_json::Value = serde_json::from_str(arguments_json)
            .map_err(|e| KaapiError::Tool(format!("unparseable arguments: {}", e)))?;
        if !args.is_object() {
            return Err(KaapiError::Tool("arguments are not an object".to_string()));
        }

        let filters = coerce_filters(&args);
        tracing::info!(
            brew_method = filters.brew_method.as_deref().unwrap_or(""),
            roast_level = filters.roast_level.as_deref().unwrap_or(""),
            flavor_keywords = ?filters.flavor_keywords,
            "tool_call"
        );

        let catalog = Arc::clone(&self.catalog);
        let items = tokio::task::spawn_blocking(move || catalog.search(&filters, RESULT_LIMIT))
            .await
            .map_err(|e| KaapiError::Catalog(e.to_string()))??;

        Ok(format_results(&items))
    }
}

/// Coerce the model-chosen argument bag into structured filters.
fn coerce_filters(args: &serde_json::Value) -> SearchFilters {
    SearchFilters {
        brew_method: string_field(args, "brew_method"),
        roast_level: string_field(args, "roast_level"),
        process: None,
        flavor_keywords: coerce_keywords(&args["flavor_keywords"]),
        max_price: coerce_price(&args["max_price"]),
    }
}

fn string_field(args: &serde_json::Value, key: &str) -> Option<String> {
    args[key]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Accept either a native list or a comma-separated string.
fn coerce_keywords(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        serde_json::Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}

/// Accept a number or a numeric string; anything else means no cap.
fn coerce_price(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Format catalog rows as one line per item.
///
/// The text is read by the model, not parsed downstream, so it stays
/// deliberately plain.
pub fn format_results(items: &[CatalogItem]) -> String {
    if items.is_empty() {
        return NO_RESULTS_MESSAGE.to_string();
    }
    items
        .iter()
        .map(|item| {
            let price = if item.price_min > 0.0 {
                format!("Rs.{}/250g", item.price_min as i64)
            } else {
                String::new()
            };
            format!(
                "- {} | {} | roast:{} | process:{} | origin:{} | flavors:{} | {} | {}",
                item.roaster,
                item.name,
                item.roast_level,
                item.process,
                item.origin,
                item.flavor_notes,
                price,
                item.source_url,
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
