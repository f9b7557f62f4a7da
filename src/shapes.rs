//! Endpoint orchestration.
//!
//! Each call shape is a direct composition of fetch + sink with
//! shape-specific parameter marshaling: build query params, GET, wrap the
//! payload with its request context, insert. The analyze shape additionally
//! fans the response's `endpoints` array out into per-summary records.

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use std::path::Path;
use std::time::Duration;

use crate::fetch::Fetch;
use crate::store::{Collection, RawStore};

/// Call `/info` and sink the raw response.
pub async fn run_info(fetcher: &dyn Fetch, store: &dyn RawStore) -> Result<()> {
    println!("info: GET /info");
    let data = fetcher.get_json("info", &[]).await?;
    if is_empty_payload(&data) {
        eprintln!("Warning: info returned an empty response");
    }

    let mut record = Map::new();
    record.insert("endpoint".to_string(), json!("info"));
    record.insert("response".to_string(), data);
    store.insert(Collection::Info, &record).await?;

    Ok(())
}

/// Query parameters for one analyze call: `host` always, `startNew=on` only
/// for a forced rescan, `fromCache` always on or off.
pub fn analyze_params(host: &str, start_new: bool, from_cache: bool) -> Vec<(String, String)> {
    let mut params = vec![("host".to_string(), host.to_string())];
    if start_new {
        params.push(("startNew".to_string(), "on".to_string()));
    }
    params.push((
        "fromCache".to_string(),
        if from_cache { "on" } else { "off" }.to_string(),
    ));
    params
}

/// Call `/analyze` for one host and sink the raw response.
///
/// When the response carries an `endpoints` array, every element is also
/// sunk individually as an endpoint summary. Repeated calls for the same
/// host append new records each time; there is no dedup.
pub async fn run_analyze(
    fetcher: &dyn Fetch,
    store: &dyn RawStore,
    host: &str,
    start_new: bool,
    from_cache: bool,
) -> Result<()> {
    let params = analyze_params(host, start_new, from_cache);
    println!("analyze {}: GET /analyze", host);
    let data = fetcher.get_json("analyze", &params).await?;
    if is_empty_payload(&data) {
        eprintln!("Warning: analyze {} returned an empty response", host);
    }

    let mut record = Map::new();
    record.insert("endpoint".to_string(), json!("analyze"));
    record.insert("host".to_string(), json!(host));
    record.insert("params".to_string(), params_object(&params));
    record.insert("response".to_string(), data.clone());
    store.insert(Collection::Analyze, &record).await?;

    if let Some(endpoints) = data.get("endpoints").and_then(Value::as_array) {
        for summary in endpoints {
            let mut entry = Map::new();
            entry.insert("endpoint".to_string(), json!("analyze-endpoint-summary"));
            entry.insert("host".to_string(), json!(host));
            entry.insert("endpoint_summary".to_string(), summary.clone());
            store.insert(Collection::Endpoint, &entry).await?;
        }
    }

    Ok(())
}

/// Call `/getEndpointData` for one host + IP pair and sink the raw response.
pub async fn run_endpoint_data(
    fetcher: &dyn Fetch,
    store: &dyn RawStore,
    host: &str,
    ip: &str,
) -> Result<()> {
    let params = vec![
        ("host".to_string(), host.to_string()),
        ("ip".to_string(), ip.to_string()),
    ];
    println!("endpoint {} {}: GET /getEndpointData", host, ip);
    let data = fetcher.get_json("getEndpointData", &params).await?;
    if is_empty_payload(&data) {
        eprintln!("Warning: getEndpointData {} {} returned an empty response", host, ip);
    }

    let mut record = Map::new();
    record.insert("endpoint".to_string(), json!("getEndpointData"));
    record.insert("host".to_string(), json!(host));
    record.insert("ip".to_string(), json!(ip));
    record.insert("response".to_string(), data);
    store.insert(Collection::Endpoint, &record).await?;

    Ok(())
}

/// Analyze every host in a newline-delimited file, sequentially, with
/// default flags (no forced rescan, cache allowed).
///
/// A failing host is logged and skipped; the remaining hosts still run. The
/// polite delay applies after every host, success or failure.
pub async fn run_batch(
    fetcher: &dyn Fetch,
    store: &dyn RawStore,
    file: &Path,
    wait_between: Duration,
) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read host list: {}", file.display()))?;
    let hosts: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    println!("batch: {} hosts from {}", hosts.len(), file.display());

    let mut failed = 0usize;
    for host in &hosts {
        if let Err(e) = run_analyze(fetcher, store, host, false, true).await {
            failed += 1;
            eprintln!("Warning: batch host {} failed: {:#}", host, e);
        }
        polite_wait(wait_between).await;
    }

    println!("batch done: {} hosts, {} failed", hosts.len(), failed);
    Ok(())
}

/// Courtesy pause between successive remote calls so the connector does not
/// provoke the remote service's own rate limiting.
pub async fn polite_wait(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

fn params_object(params: &[(String, String)]) -> Value {
    Value::Object(
        params
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

fn is_empty_payload(data: &Value) -> bool {
    match data {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
