//! MongoDB audit store backend.
//!
//! The thin driver layer: connect + ping, index creation, document
//! conversion, and the per-tool rollup aggregation pipeline. Everything
//! above this (bounding, record shapes, merge/summary logic) lives in the
//! gateway so it is identical across backends.

use std::time::Duration;

use async_trait::async_trait;
use bson::{doc, Document};
use futures_util::stream::TryStreamExt;
use mongodb::options::{ClientOptions, FindOptions, IndexOptions, ReplaceOptions};
use mongodb::{Client, Database, IndexModel};
use serde_json::Value;

use mg_domain::{Error, Result};

use crate::record::ToolRollup;
use crate::store::{collections, AuditStore, FindQuery};

pub struct MongoAuditStore {
    database: Database,
}

impl MongoAuditStore {
    /// Connect, ping, and create the required indexes.
    pub async fn connect(uri: &str, database_name: &str) -> Result<Self> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| Error::Store(format!("invalid MongoDB URI: {e}")))?;
        options.server_selection_timeout = Some(Duration::from_secs(5));
        options.max_pool_size = Some(50);
        options.retry_writes = Some(true);

        let client = Client::with_options(options)
            .map_err(|e| Error::Store(format!("failed to build MongoDB client: {e}")))?;

        client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| Error::Store(format!("MongoDB ping failed: {e}")))?;

        let database = client.database(database_name);
        tracing::info!(database = %database_name, "connected to MongoDB");

        let store = Self { database };
        store.create_indexes().await;
        Ok(store)
    }

    fn collection(&self, name: &str) -> mongodb::Collection<Document> {
        self.database.collection::<Document>(name)
    }

    /// Index creation is best-effort: a failure is logged, not fatal.
    async fn create_indexes(&self) {
        let specs: &[(&str, Document, bool)] = &[
            (collections::SERVERS, doc! { "server_name": 1 }, true),
            (collections::SERVERS, doc! { "is_active": 1 }, false),
            (collections::GOVERNANCE_LOGS, doc! { "server_name": 1 }, false),
            (collections::GOVERNANCE_LOGS, doc! { "timestamp": -1 }, false),
            (collections::GOVERNANCE_LOGS, doc! { "decision": 1 }, false),
            (collections::SERVER_TOOLS, doc! { "server_name": 1 }, false),
            (collections::SERVER_TOOLS, doc! { "tool_name": 1 }, false),
            (
                collections::SERVER_TOOLS,
                doc! { "server_name": 1, "tool_name": 1 },
                true,
            ),
            (collections::TOOL_LOGS, doc! { "session_id": 1 }, false),
            (collections::TOOL_LOGS, doc! { "server_name": 1 }, false),
            (collections::TOOL_LOGS, doc! { "tool_name": 1 }, false),
            (collections::TOOL_LOGS, doc! { "timestamp": -1 }, false),
            (collections::TOOL_LOGS, doc! { "event_type": 1 }, false),
            (collections::TOOL_LOGS, doc! { "status": 1 }, false),
            (
                collections::TOOL_LOGS,
                doc! { "server_name": 1, "tool_name": 1, "timestamp": -1 },
                false,
            ),
            (collections::GOVERNANCE_CONFIGS, doc! { "server_name": 1 }, true),
            (collections::SERVER_POLICIES, doc! { "server_name": 1 }, true),
            (collections::DEPLOYMENTS, doc! { "deployment_mode": 1 }, true),
        ];

        for (collection, keys, unique) in specs {
            let options = IndexOptions::builder().unique(*unique).build();
            let model = IndexModel::builder()
                .keys(keys.clone())
                .options(options)
                .build();
            if let Err(e) = self.collection(collection).create_index(model, None).await {
                tracing::error!(collection = %collection, error = %e, "failed to create index");
            }
        }
        tracing::info!("MongoDB indexes ensured");
    }

    fn to_document(value: &Value) -> Result<Document> {
        bson::to_document(value).map_err(|e| Error::Store(format!("document conversion: {e}")))
    }

    fn to_value(doc: &Document) -> Result<Value> {
        serde_json::to_value(doc).map_err(|e| Error::Store(format!("document conversion: {e}")))
    }

    fn build_filter(query: &FindQuery) -> Document {
        let mut filter = Document::new();
        for (f, v) in &query.equals {
            filter.insert(f.clone(), v.clone());
        }
        for (f, v) in &query.not_equals {
            filter.insert(f.clone(), doc! { "$ne": v.clone() });
        }
        if let Some((from, to)) = &query.time_range {
            filter.insert(
                "timestamp",
                doc! { "$gte": from.clone(), "$lte": to.clone() },
            );
        }
        filter
    }

    fn numeric(doc: &Value, field: &str) -> f64 {
        doc.get(field).and_then(Value::as_f64).unwrap_or(0.0)
    }

    fn integral(doc: &Value, field: &str) -> i64 {
        doc.get(field).and_then(Value::as_i64).unwrap_or(0)
    }
}

#[async_trait]
impl AuditStore for MongoAuditStore {
    fn backend(&self) -> &'static str {
        "mongodb"
    }

    async fn insert(&self, collection: &str, document: Value) -> Result<()> {
        let doc = Self::to_document(&document)?;
        self.collection(collection)
            .insert_one(doc, None)
            .await
            .map_err(|e| Error::Store(format!("insert into {collection}: {e}")))?;
        Ok(())
    }

    async fn upsert(&self, collection: &str, key: &[(&str, &str)], document: Value) -> Result<()> {
        let mut filter = Document::new();
        for (f, v) in key {
            filter.insert((*f).to_string(), (*v).to_string());
        }
        let doc = Self::to_document(&document)?;
        let options = ReplaceOptions::builder().upsert(true).build();
        self.collection(collection)
            .replace_one(filter, doc, options)
            .await
            .map_err(|e| Error::Store(format!("upsert into {collection}: {e}")))?;
        Ok(())
    }

    async fn find(&self, collection: &str, query: FindQuery) -> Result<Vec<Value>> {
        let filter = Self::build_filter(&query);

        let mut sort = None;
        if let Some(f) = &query.sort_desc_by {
            let mut d = Document::new();
            d.insert(f.clone(), -1);
            sort = Some(d);
        } else if let Some(f) = &query.sort_asc_by {
            let mut d = Document::new();
            d.insert(f.clone(), 1);
            sort = Some(d);
        }

        let options = FindOptions::builder()
            .sort(sort)
            .limit(query.limit.map(|n| n as i64))
            .projection(doc! { "_id": 0 })
            .build();

        let mut cursor = self
            .collection(collection)
            .find(filter, options)
            .await
            .map_err(|e| Error::Store(format!("find in {collection}: {e}")))?;

        let mut out = Vec::new();
        while let Some(doc) = cursor
            .try_next()
            .await
            .map_err(|e| Error::Store(format!("cursor in {collection}: {e}")))?
        {
            out.push(Self::to_value(&doc)?);
        }
        Ok(out)
    }

    async fn tool_analytics(
        &self,
        server_name: Option<&str>,
        from: &str,
        to: &str,
    ) -> Result<Vec<ToolRollup>> {
        let mut match_doc = Document::new();
        match_doc.insert("event_type", "completion");
        if let Some(server) = server_name {
            match_doc.insert("server_name", server);
        }
        match_doc.insert("timestamp", doc! { "$gte": from, "$lte": to });

        let pipeline = vec![
            doc! { "$match": match_doc },
            doc! { "$group": {
                "_id": { "server_name": "$server_name", "tool_name": "$tool_name" },
                "total_calls": { "$sum": 1 },
                "successful_calls": { "$sum": { "$cond": [ { "$eq": ["$status", "success"] }, 1, 0 ] } },
                "failed_calls": { "$sum": { "$cond": [ { "$eq": ["$status", "error"] }, 1, 0 ] } },
                "denied_calls": { "$sum": { "$cond": [ { "$eq": ["$status", "denied"] }, 1, 0 ] } },
                "avg_duration_ms": { "$avg": "$duration_ms" },
                "max_duration_ms": { "$max": "$duration_ms" },
                "min_duration_ms": { "$min": "$duration_ms" },
                "avg_output_size": { "$avg": "$output_size" },
            }},
            doc! { "$project": {
                "_id": 0,
                "server_name": "$_id.server_name",
                "tool_name": "$_id.tool_name",
                "total_calls": 1,
                "successful_calls": 1,
                "failed_calls": 1,
                "denied_calls": 1,
                "success_rate": { "$round": [
                    { "$multiply": [
                        { "$divide": [ "$successful_calls", { "$max": [ "$total_calls", 1 ] } ] },
                        100,
                    ] },
                    2,
                ] },
                "avg_duration_ms": { "$round": [ { "$ifNull": [ "$avg_duration_ms", 0 ] }, 2 ] },
                "max_duration_ms": { "$ifNull": [ "$max_duration_ms", 0 ] },
                "min_duration_ms": { "$ifNull": [ "$min_duration_ms", 0 ] },
                "avg_output_size": { "$round": [ { "$ifNull": [ "$avg_output_size", 0 ] }, 2 ] },
            }},
            doc! { "$sort": { "total_calls": -1, "server_name": 1, "tool_name": 1 } },
        ];

        let mut cursor = self
            .collection(collections::TOOL_LOGS)
            .aggregate(pipeline, None)
            .await
            .map_err(|e| Error::Store(format!("analytics aggregation: {e}")))?;

        let mut rollups = Vec::new();
        while let Some(doc) = cursor
            .try_next()
            .await
            .map_err(|e| Error::Store(format!("analytics cursor: {e}")))?
        {
            let v = Self::to_value(&doc)?;
            rollups.push(ToolRollup {
                server_name: v
                    .get("server_name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                tool_name: v
                    .get("tool_name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                total_calls: Self::integral(&v, "total_calls"),
                successful_calls: Self::integral(&v, "successful_calls"),
                failed_calls: Self::integral(&v, "failed_calls"),
                denied_calls: Self::integral(&v, "denied_calls"),
                success_rate: Self::numeric(&v, "success_rate"),
                avg_duration_ms: Self::numeric(&v, "avg_duration_ms"),
                max_duration_ms: Self::numeric(&v, "max_duration_ms"),
                min_duration_ms: Self::numeric(&v, "min_duration_ms"),
                avg_output_size: Self::numeric(&v, "avg_output_size"),
            });
        }
        Ok(rollups)
    }
}
