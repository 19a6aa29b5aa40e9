use std::collections::BTreeMap;
use std::io::BufRead;
use std::net::IpAddr;
use std::path::Path;

use av_model::cve::canonicalize_cve;
use av_model::{Event, EventId, Host};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f%z";

/// Reads the event file in any of the three accepted shapes (§6, C10): a single JSON array,
/// a single JSON object, or JSON-lines where each line may wrap the real object at
/// `result._raw` (a stringified JSON payload that must be re-parsed).
pub fn read_events(path: &Path) -> std::io::Result<Vec<Event>> {
    let text = std::fs::read_to_string(path)?;
    let trimmed = text.trim_start();

    let raw_objects: Vec<Value> = if trimmed.starts_with('[') {
        serde_json::from_str(&text).unwrap_or_default()
    } else if trimmed.starts_with('{') && !trimmed.contains("\n{") {
        serde_json::from_str::<Value>(&text).map(|v| vec![v]).unwrap_or_default()
    } else {
        read_jsonlines(&text)
    };

    Ok(raw_objects.into_iter().map(parse_event).collect())
}

fn read_jsonlines(text: &str) -> Vec<Value> {
    let mut out = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(mut value) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        if let Some(raw) = value.get("result").and_then(|r| r.get("_raw")).and_then(Value::as_str) {
            if let Ok(reparsed) = serde_json::from_str::<Value>(raw) {
                value = reparsed;
            }
        }
        out.push(value);
    }
    out
}

fn parse_event(raw: Value) -> Event {
    let src_ip = field_str(&raw, "src_ip").unwrap_or_else(|| "0.0.0.0".to_string());
    let src_port = field_u16(&raw, "src_port").unwrap_or(0);
    let dst_ip = field_str(&raw, "dest_ip").unwrap_or_else(|| "0.0.0.0".to_string());
    let dst_port = field_u16(&raw, "dest_port").unwrap_or(0);

    let src = Host::new(src_ip.parse::<IpAddr>().unwrap_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)), src_port);
    let dst = Host::new(dst_ip.parse::<IpAddr>().unwrap_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)), dst_port);

    let timestamp = field_str(&raw, "timestamp")
        .and_then(|t| DateTime::parse_from_str(&t, TIMESTAMP_FORMAT).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| {
            debug!("event timestamp missing or unparsable, defaulting to ingestion time");
            Utc::now()
        });

    let cves = extract_cves(&raw);

    let mut map = BTreeMap::new();
    if let Value::Object(obj) = &raw {
        for (k, v) in obj {
            map.insert(k.clone(), v.clone());
        }
    }

    Event {
        id: EventId(0),
        src,
        dst,
        cves,
        timestamp,
        raw: map,
    }
}

fn extract_cves(raw: &Value) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();

    if let Some(alert) = raw.get("alert") {
        if let Some(cve_list) = alert.get("metadata").and_then(|m| m.get("cve")) {
            push_string_or_list(cve_list, &mut candidates);
        }
        if let Some(sig) = alert.get("signature").and_then(Value::as_str) {
            candidates.push(sig.to_string());
        }
    }
    if let Some(cve_field) = raw.get("cve") {
        push_string_or_list(cve_field, &mut candidates);
    }
    if let Some(sig) = raw.get("signature").and_then(Value::as_str) {
        candidates.push(sig.to_string());
    }

    candidates
        .iter()
        .filter_map(|c| canonicalize_cve(c))
        .collect()
}

fn push_string_or_list(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => {
            for item in items {
                if let Some(s) = item.as_str() {
                    out.push(s.to_string());
                }
            }
        }
        _ => {}
    }
}

fn field_str(raw: &Value, key: &str) -> Option<String> {
    raw.get(key).and_then(Value::as_str).map(str::to_string)
}

fn field_u16(raw: &Value, key: &str) -> Option<u16> {
    raw.get(key).and_then(|v| v.as_u64()).map(|n| n as u16)
}
