//! Enrichment fan-out: attach drug reference detail to a finished answer.
//!
//! Every distinct drug identifier gets a search-by-name then fetch-by-id
//! lookup. Lookups run concurrently and never cancel each other; a failed
//! lookup is recorded as `None`.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;

use crate::mcp_client::McpClient;
use crate::region::DrugLookup;

use super::answer::{DrugEnrichment, StructuredAnswer};
use super::tool_router::ToolRouter;

/// Enrichment records keyed by lowercased drug identifier.
pub type EnrichmentMap = BTreeMap<String, Option<Arc<DrugEnrichment>>>;

/// Keys tried, after the lookup's own id field, when reading a search hit.
const FALLBACK_ID_KEYS: &[&str] = &["id", "drug_id", "identifier"];

/// Look up every drug named in `answer` and attach the results in place.
pub async fn enrich_answer(
    answer: &mut StructuredAnswer,
    router: &ToolRouter,
    client: &McpClient,
    lookup: &DrugLookup,
) -> EnrichmentMap {
    let drugs = answer.drug_ids();
    if drugs.is_empty() {
        return EnrichmentMap::new();
    }

    tracing::info!(drug_count = drugs.len(), source = %lookup.search_operation, "enrichment start");

    let lookups = drugs
        .iter()
        .map(|drug| lookup_drug(router, client, lookup, drug));
    let found = join_all(lookups).await;

    let records: EnrichmentMap = drugs
        .iter()
        .zip(found)
        .map(|(drug, record)| (drug.to_lowercase(), record.map(Arc::new)))
        .collect();

    answer.attach_enrichment(&records);

    tracing::info!(
        drug_count = records.len(),
        enriched = records.values().filter(|r| r.is_some()).count(),
        "enrichment complete"
    );
    records
}

async fn lookup_drug(
    router: &ToolRouter,
    client: &McpClient,
    lookup: &DrugLookup,
    drug: &str,
) -> Option<DrugEnrichment> {
    let search = router
        .call(
            client,
            &lookup.search_operation,
            single_arg(&lookup.name_field, drug),
        )
        .await;
    if !search.success {
        tracing::warn!(drug, error = ?search.error, "drug search failed");
        return None;
    }

    let Some(source_id) = search
        .content
        .as_ref()
        .and_then(|c| first_identifier(c, &lookup.id_field))
    else {
        tracing::info!(drug, "no drug search hit");
        return None;
    };

    let detail = router
        .call(
            client,
            &lookup.detail_operation,
            single_arg(&lookup.id_field, &source_id),
        )
        .await;
    if !detail.success {
        tracing::warn!(drug, %source_id, error = ?detail.error, "drug detail fetch failed");
        return None;
    }

    tracing::debug!(drug, %source_id, "drug enriched");
    Some(DrugEnrichment {
        drug: drug.to_string(),
        source_id,
        detail: detail.content.unwrap_or(serde_json::Value::Null),
    })
}

fn single_arg(field: &str, value: &str) -> serde_json::Value {
    let mut args = serde_json::Map::new();
    args.insert(field.to_string(), serde_json::Value::String(value.to_string()));
    serde_json::Value::Object(args)
}

/// The identifier of the first search hit.
///
/// Accepts a bare array of hits, an object wrapping one in `results` or
/// `items`, or a single hit object.
fn first_identifier(content: &serde_json::Value, id_field: &str) -> Option<String> {
    use serde_json::Value;

    let hit = match content {
        Value::Array(items) => items.first()?,
        Value::Object(map) => match map.get("results").or_else(|| map.get("items")) {
            Some(Value::Array(items)) => items.first()?,
            _ => content,
        },
        _ => return None,
    };

    std::iter::once(id_field)
        .chain(FALLBACK_ID_KEYS.iter().copied())
        .find_map(|key| match hit.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}
