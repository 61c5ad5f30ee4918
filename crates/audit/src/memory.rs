//! In-memory audit store, used by tests and storeless runs.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use mg_domain::Result;

use crate::record::{round2, ToolRollup};
use crate::store::{collections, AuditStore, FindQuery};

#[derive(Default)]
pub struct MemoryAuditStore {
    rows: RwLock<HashMap<String, Vec<Value>>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection (test helper).
    pub fn count(&self, collection: &str) -> usize {
        self.rows
            .read()
            .get(collection)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

fn field<'a>(doc: &'a Value, name: &str) -> Option<&'a str> {
    doc.get(name).and_then(Value::as_str)
}

fn matches(doc: &Value, query: &FindQuery) -> bool {
    for (f, v) in &query.equals {
        if field(doc, f) != Some(v.as_str()) {
            return false;
        }
    }
    for (f, v) in &query.not_equals {
        if field(doc, f) == Some(v.as_str()) {
            return false;
        }
    }
    if let Some((from, to)) = &query.time_range {
        match field(doc, "timestamp") {
            Some(ts) => {
                if ts < from.as_str() || ts > to.as_str() {
                    return false;
                }
            }
            None => return false,
        }
    }
    true
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, collection: &str, document: Value) -> Result<()> {
        self.rows
            .write()
            .entry(collection.to_string())
            .or_default()
            .push(document);
        Ok(())
    }

    async fn upsert(&self, collection: &str, key: &[(&str, &str)], document: Value) -> Result<()> {
        let mut rows = self.rows.write();
        let docs = rows.entry(collection.to_string()).or_default();
        let existing = docs
            .iter_mut()
            .find(|d| key.iter().all(|(f, v)| field(d, f) == Some(*v)));
        match existing {
            Some(slot) => *slot = document,
            None => docs.push(document),
        }
        Ok(())
    }

    async fn find(&self, collection: &str, query: FindQuery) -> Result<Vec<Value>> {
        let rows = self.rows.read();
        let mut out: Vec<Value> = rows
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| matches(d, &query))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(f) = &query.sort_desc_by {
            out.sort_by(|a, b| field(b, f).unwrap_or("").cmp(field(a, f).unwrap_or("")));
        } else if let Some(f) = &query.sort_asc_by {
            out.sort_by(|a, b| field(a, f).unwrap_or("").cmp(field(b, f).unwrap_or("")));
        }
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn tool_analytics(
        &self,
        server_name: Option<&str>,
        from: &str,
        to: &str,
    ) -> Result<Vec<ToolRollup>> {
        #[derive(Default)]
        struct Acc {
            total: i64,
            success: i64,
            failed: i64,
            denied: i64,
            duration_sum: f64,
            duration_count: i64,
            duration_min: Option<f64>,
            duration_max: Option<f64>,
            output_sum: f64,
            output_count: i64,
        }

        let rows = self.rows.read();
        let mut groups: HashMap<(String, String), Acc> = HashMap::new();

        for doc in rows.get(collections::TOOL_LOGS).into_iter().flatten() {
            if field(doc, "event_type") != Some("completion") {
                continue;
            }
            let Some(server) = field(doc, "server_name") else {
                continue;
            };
            if server_name.is_some_and(|s| s != server) {
                continue;
            }
            let Some(ts) = field(doc, "timestamp") else {
                continue;
            };
            if ts < from || ts > to {
                continue;
            }
            let tool = field(doc, "tool_name").unwrap_or("").to_string();

            let acc = groups
                .entry((server.to_string(), tool))
                .or_default();
            acc.total += 1;
            match field(doc, "status") {
                Some("success") => acc.success += 1,
                Some("error") => acc.failed += 1,
                Some("denied") => acc.denied += 1,
                _ => {}
            }
            if let Some(d) = doc.get("duration_ms").and_then(Value::as_f64) {
                acc.duration_sum += d;
                acc.duration_count += 1;
                acc.duration_min = Some(acc.duration_min.map_or(d, |m: f64| m.min(d)));
                acc.duration_max = Some(acc.duration_max.map_or(d, |m: f64| m.max(d)));
            }
            if let Some(s) = doc.get("output_size").and_then(Value::as_f64) {
                acc.output_sum += s;
                acc.output_count += 1;
            }
        }

        let mut rollups: Vec<ToolRollup> = groups
            .into_iter()
            .map(|((server, tool), acc)| ToolRollup {
                server_name: server,
                tool_name: tool,
                total_calls: acc.total,
                successful_calls: acc.success,
                failed_calls: acc.failed,
                denied_calls: acc.denied,
                success_rate: round2(acc.success as f64 / acc.total.max(1) as f64 * 100.0),
                avg_duration_ms: if acc.duration_count > 0 {
                    round2(acc.duration_sum / acc.duration_count as f64)
                } else {
                    0.0
                },
                max_duration_ms: acc.duration_max.unwrap_or(0.0),
                min_duration_ms: acc.duration_min.unwrap_or(0.0),
                avg_output_size: if acc.output_count > 0 {
                    round2(acc.output_sum / acc.output_count as f64)
                } else {
                    0.0
                },
            })
            .collect();

        rollups.sort_by(|a, b| {
            b.total_calls
                .cmp(&a.total_calls)
                .then_with(|| a.server_name.cmp(&b.server_name))
                .then_with(|| a.tool_name.cmp(&b.tool_name))
        });
        Ok(rollups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn completion(server: &str, tool: &str, status: &str, ts: &str, duration: f64) -> Value {
        json!({
            "session_id": "s",
            "server_name": server,
            "tool_name": tool,
            "event_type": "completion",
            "status": status,
            "timestamp": ts,
            "duration_ms": duration,
            "output_size": 10,
        })
    }

    #[tokio::test]
    async fn insert_and_find_with_filters() {
        let store = MemoryAuditStore::new();
        store
            .insert(collections::TOOL_LOGS, completion("a", "t", "success", "2024-01-01T00:00:01.000Z", 5.0))
            .await
            .unwrap();
        store
            .insert(collections::TOOL_LOGS, completion("b", "t", "error", "2024-01-01T00:00:02.000Z", 5.0))
            .await
            .unwrap();

        let hits = store
            .find(collections::TOOL_LOGS, FindQuery::new().eq("server_name", "a"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);

        let ranged = store
            .find(
                collections::TOOL_LOGS,
                FindQuery::new().between("2024-01-01T00:00:02.000Z", "2024-01-01T00:00:03.000Z"),
            )
            .await
            .unwrap();
        assert_eq!(ranged.len(), 1);
        assert_eq!(ranged[0]["server_name"], "b");
    }

    #[tokio::test]
    async fn find_sorts_desc_and_limits() {
        let store = MemoryAuditStore::new();
        for i in 1..=3 {
            store
                .insert(
                    collections::TOOL_LOGS,
                    completion("a", "t", "success", &format!("2024-01-01T00:00:0{i}.000Z"), 1.0),
                )
                .await
                .unwrap();
        }
        let hits = store
            .find(
                collections::TOOL_LOGS,
                FindQuery::new().sort_desc("timestamp").limit(2),
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0]["timestamp"], "2024-01-01T00:00:03.000Z");
    }

    #[tokio::test]
    async fn not_equals_excludes() {
        let store = MemoryAuditStore::new();
        store
            .insert(collections::GOVERNANCE_LOGS, json!({ "decision": "allowed" }))
            .await
            .unwrap();
        store
            .insert(collections::GOVERNANCE_LOGS, json!({ "decision": "rate_limit" }))
            .await
            .unwrap();
        let hits = store
            .find(
                collections::GOVERNANCE_LOGS,
                FindQuery::new().ne("decision", "allowed"),
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["decision"], "rate_limit");
    }

    #[tokio::test]
    async fn upsert_replaces_by_key() {
        let store = MemoryAuditStore::new();
        store
            .upsert(
                collections::SERVERS,
                &[("server_name", "a")],
                json!({ "server_name": "a", "is_active": true }),
            )
            .await
            .unwrap();
        store
            .upsert(
                collections::SERVERS,
                &[("server_name", "a")],
                json!({ "server_name": "a", "is_active": false }),
            )
            .await
            .unwrap();
        assert_eq!(store.count(collections::SERVERS), 1);
        let hits = store.find(collections::SERVERS, FindQuery::new()).await.unwrap();
        assert_eq!(hits[0]["is_active"], false);
    }

    #[tokio::test]
    async fn analytics_groups_and_rates() {
        let store = MemoryAuditStore::new();
        let ts = "2024-01-01T00:00:01.000Z";
        store.insert(collections::TOOL_LOGS, completion("a", "t", "success", ts, 10.0)).await.unwrap();
        store.insert(collections::TOOL_LOGS, completion("a", "t", "success", ts, 20.0)).await.unwrap();
        store.insert(collections::TOOL_LOGS, completion("a", "t", "denied", ts, 1.0)).await.unwrap();
        store.insert(collections::TOOL_LOGS, completion("b", "u", "error", ts, 5.0)).await.unwrap();

        let rollups = store
            .tool_analytics(None, "2024-01-01T00:00:00.000Z", "2024-01-01T23:59:59.999Z")
            .await
            .unwrap();
        assert_eq!(rollups.len(), 2);
        let top = &rollups[0];
        assert_eq!((top.server_name.as_str(), top.tool_name.as_str()), ("a", "t"));
        assert_eq!(top.total_calls, 3);
        assert_eq!(top.successful_calls, 2);
        assert_eq!(top.denied_calls, 1);
        assert_eq!(top.success_rate, 66.67);
        assert_eq!(top.avg_duration_ms, 10.33);
        assert_eq!(top.max_duration_ms, 20.0);
        assert_eq!(top.min_duration_ms, 1.0);

        let filtered = store
            .tool_analytics(Some("b"), "2024-01-01T00:00:00.000Z", "2024-01-01T23:59:59.999Z")
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].failed_calls, 1);
    }

    #[tokio::test]
    async fn analytics_ignores_invocations_and_out_of_range() {
        let store = MemoryAuditStore::new();
        store
            .insert(
                collections::TOOL_LOGS,
                json!({
                    "server_name": "a", "tool_name": "t",
                    "event_type": "invocation",
                    "timestamp": "2024-01-01T00:00:01.000Z",
                }),
            )
            .await
            .unwrap();
        store
            .insert(
                collections::TOOL_LOGS,
                completion("a", "t", "success", "2023-12-31T00:00:00.000Z", 1.0),
            )
            .await
            .unwrap();
        let rollups = store
            .tool_analytics(None, "2024-01-01T00:00:00.000Z", "2024-01-01T23:59:59.999Z")
            .await
            .unwrap();
        assert!(rollups.is_empty());
    }
}
