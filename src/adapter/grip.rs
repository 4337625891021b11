//! GRIP adapter - streams graph elements over the bulk query/insert API.
//!
//! A graph dumps to two newline-delimited files (vertices and edges), four
//! when the resource carries a schema-graph companion. Each query is bounded
//! by the configured limit; the adapter does not paginate past it. Restores
//! rewrite records into the bulk-insert call shape and submit fixed-size
//! batches, reporting one aggregate error per resource.

use crate::adapter::{Artifact, ArtifactLocation, BackendKind, Resource, ResourceAdapter};
use crate::config::GripConfig;
use crate::error::{BackupError, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use serde_json::{json, Map, Value};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Elements per bulk-insert call.
const BULK_BATCH_SIZE: usize = 1000;

/// Progress log cadence for long streams.
const PROGRESS_INTERVAL: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Vertex,
    Edge,
}

impl ElementKind {
    fn wire_name(self) -> &'static str {
        match self {
            ElementKind::Vertex => "vertex",
            ElementKind::Edge => "edge",
        }
    }

    fn query_step(self) -> Value {
        match self {
            ElementKind::Vertex => json!({ "v": [] }),
            ElementKind::Edge => json!({ "e": [] }),
        }
    }

    fn file_suffix(self) -> &'static str {
        match self {
            ElementKind::Vertex => "vertices",
            ElementKind::Edge => "edges",
        }
    }
}

/// Wire-level name of a graph's schema companion. Derived here and nowhere
/// else; the rest of the tool sees it only as a resource attribute.
fn schema_graph_name(graph: &str) -> String {
    format!("{graph}__schema__")
}

fn element_file_name(graph: &str, kind: ElementKind) -> String {
    format!("{graph}.{}.ndjson", kind.file_suffix())
}

/// Classify an error status from a reachable server: authentication statuses
/// are fatal, anything else stays scoped to the operation that got it.
fn status_failure(context: &str, status: StatusCode, body: &str) -> BackupError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return BackupError::Auth(format!("{context}: {status}"));
    }
    BackupError::Backend(format!("{context}: {status} {body}"))
}

pub struct GripAdapter {
    config: GripConfig,
    client: Client,
    base_url: String,
}

impl GripAdapter {
    pub fn new(config: GripConfig) -> Result<Self> {
        config.validate()?;
        let base_url = config.base_url();
        Ok(Self {
            config,
            client: Client::new(),
            base_url,
        })
    }

    /// The graphs a resource spans: the graph itself, plus its schema
    /// companion when declared.
    fn graphs_of(&self, resource: &Resource) -> Vec<String> {
        let mut graphs = vec![resource.id.clone()];
        if resource.has_schema_companion {
            graphs.push(schema_graph_name(&resource.id));
        }
        graphs
    }

    /// Fetch up to `limit` elements of one kind from a graph, one JSON
    /// record per element. Used for both dumps and `ls`.
    pub async fn query_elements(&self, graph: &str, kind: ElementKind) -> Result<Vec<Value>> {
        let url = format!("{}/v1/graph/{}/query", self.base_url, graph);
        let query = json!({ "query": [kind.query_step(), { "limit": self.config.limit }] });

        let response = self
            .client
            .post(&url)
            .json(&query)
            .send()
            .await
            .map_err(BackupError::from_http)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let context = format!("query {} of graph '{}'", kind.wire_name(), graph);
            return Err(status_failure(&context, status, &body));
        }

        // The query endpoint streams newline-delimited results.
        let mut elements = Vec::new();
        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(BackupError::from_http)?;
            buffer.extend_from_slice(&chunk);
            while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                if let Some(element) = parse_result_line(&line, kind)? {
                    elements.push(element);
                }
            }
        }
        if let Some(element) = parse_result_line(&buffer, kind)? {
            elements.push(element);
        }

        Ok(elements)
    }

    /// Dump one element kind of one graph to its NDJSON file.
    async fn dump_elements(
        &self,
        graph: &str,
        kind: ElementKind,
        run_dir: &Path,
    ) -> Result<String> {
        let file_name = element_file_name(graph, kind);
        let path = run_dir.join(&file_name);
        debug!("Dumping {} of graph '{}' to '{}'", kind.file_suffix(), graph, path.display());

        let elements = self.query_elements(graph, kind).await.map_err(|e| {
            if e.is_fatal() {
                e
            } else {
                BackupError::DumpFailed {
                    resource: graph.to_string(),
                    cause: e.to_string(),
                }
            }
        })?;

        let mut file = tokio::io::BufWriter::new(tokio::fs::File::create(&path).await?);
        let mut count = 0u64;
        for element in &elements {
            let record = flatten_element(element);
            file.write_all(serde_json::to_string(&record)?.as_bytes()).await?;
            file.write_all(b"\n").await?;
            count += 1;
            if count % PROGRESS_INTERVAL == 0 {
                info!("Dumped {} {} from '{}'", count, kind.file_suffix(), graph);
            }
        }
        file.flush().await?;

        info!("Dumped {} {} from '{}'", count, kind.file_suffix(), graph);
        Ok(file_name)
    }

    /// Create the target graph if it does not exist yet; an already-existing
    /// graph is a valid restore target.
    async fn ensure_graph(&self, graph: &str) -> Result<()> {
        let url = format!("{}/v1/graph/{}", self.base_url, graph);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(BackupError::from_http)?;

        if response.status().is_success() {
            return Ok(());
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if body.to_lowercase().contains("exists") {
            return Ok(());
        }
        Err(status_failure(&format!("create graph '{graph}'"), status, &body))
    }

    /// Replay one element file into a graph via bulk-insert batches. Any
    /// batch failure fails the whole resource; there is no per-record retry.
    async fn restore_elements(
        &self,
        resource_id: &str,
        graph: &str,
        kind: ElementKind,
        path: &Path,
    ) -> Result<u64> {
        if !tokio::fs::try_exists(path).await? {
            return Err(BackupError::ArtifactNotFound(path.display().to_string()));
        }

        let content = tokio::fs::read_to_string(path).await?;
        let mut batch = Vec::with_capacity(BULK_BATCH_SIZE);
        let mut count = 0u64;

        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let record: Value = serde_json::from_str(line)?;
            let element = bulk_element(graph, kind, record).map_err(|e| {
                BackupError::RestoreFailed {
                    resource: resource_id.to_string(),
                    cause: e.to_string(),
                }
            })?;
            batch.push(element);
            count += 1;

            if batch.len() == BULK_BATCH_SIZE {
                self.send_bulk(resource_id, &batch).await?;
                batch.clear();
            }
            if count % PROGRESS_INTERVAL == 0 {
                info!("Loaded {} {} into '{}'", count, kind.file_suffix(), graph);
            }
        }
        if !batch.is_empty() {
            self.send_bulk(resource_id, &batch).await?;
        }

        info!("Loaded {} {} into '{}'", count, kind.file_suffix(), graph);
        Ok(count)
    }

    async fn send_bulk(&self, resource_id: &str, batch: &[Value]) -> Result<()> {
        let mut body = String::new();
        for element in batch {
            body.push_str(&serde_json::to_string(element)?);
            body.push('\n');
        }

        let url = format!("{}/v1/graph", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(BackupError::from_http)?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(match status_failure("bulk insert", status, &detail) {
                fatal @ BackupError::Auth(_) => fatal,
                scoped => BackupError::RestoreFailed {
                    resource: resource_id.to_string(),
                    cause: scoped.to_string(),
                },
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceAdapter for GripAdapter {
    fn backend(&self) -> BackendKind {
        BackendKind::Grip
    }

    async fn list_resources(&self) -> Result<Vec<Resource>> {
        let mut resource = Resource::new(&self.config.graph, BackendKind::Grip);
        if self.config.schema_companion {
            resource = resource.with_schema_companion();
        }
        Ok(vec![resource])
    }

    async fn dump_resource(&self, resource: &Resource, run_dir: &Path) -> Result<Artifact> {
        let mut file_names = Vec::new();
        for graph in self.graphs_of(resource) {
            for kind in [ElementKind::Vertex, ElementKind::Edge] {
                file_names.push(self.dump_elements(&graph, kind, run_dir).await?);
            }
        }
        Artifact::from_files(resource, run_dir, file_names).await
    }

    async fn restore_resource(
        &self,
        resource: &Resource,
        location: &ArtifactLocation,
        dir: &Path,
    ) -> Result<()> {
        let file_names = match location {
            ArtifactLocation::Files(names) if !names.is_empty() => names.clone(),
            _ => self.expected_files(resource),
        };

        // Preflight before mutating the backend: every file must be present.
        for name in &file_names {
            let path = dir.join(name);
            if !tokio::fs::try_exists(&path).await? {
                return Err(BackupError::ArtifactNotFound(path.display().to_string()));
            }
        }

        for graph in self.graphs_of(resource) {
            self.ensure_graph(&graph).await?;
            // Vertices before edges: edges reference vertex endpoints.
            for kind in [ElementKind::Vertex, ElementKind::Edge] {
                let name = element_file_name(&graph, kind);
                if file_names.contains(&name) {
                    self.restore_elements(&resource.id, &graph, kind, &dir.join(&name))
                        .await?;
                }
            }
        }

        Ok(())
    }

    fn expected_files(&self, resource: &Resource) -> Vec<String> {
        let mut names = Vec::new();
        for graph in self.graphs_of(resource) {
            for kind in [ElementKind::Vertex, ElementKind::Edge] {
                names.push(element_file_name(&graph, kind));
            }
        }
        names
    }
}

/// Parse one line of a streamed query response, unwrapping the result
/// envelope down to the element record.
fn parse_result_line(line: &[u8], kind: ElementKind) -> Result<Option<Value>> {
    let text = std::str::from_utf8(line)
        .map_err(|e| BackupError::Connection(format!("invalid query response: {e}")))?
        .trim();
    if text.is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(text)?;
    Ok(value
        .get("result")
        .and_then(|r| r.get(kind.wire_name()))
        .cloned())
}

/// Flatten a wire element into the on-disk record shape: identity and
/// structure fields inline next to the properties.
fn flatten_element(element: &Value) -> Value {
    let mut record = Map::new();
    if let Some(gid) = element.get("gid") {
        record.insert("_id".into(), gid.clone());
    }
    if let Some(label) = element.get("label") {
        record.insert("_label".into(), label.clone());
    }
    if let Some(from) = element.get("from") {
        record.insert("_from".into(), from.clone());
    }
    if let Some(to) = element.get("to") {
        record.insert("_to".into(), to.clone());
    }
    if let Some(Value::Object(data)) = element.get("data") {
        for (key, value) in data {
            record.insert(key.clone(), value.clone());
        }
    }
    Value::Object(record)
}

/// Rewrite an on-disk record into the bulk-insert call shape, stripping the
/// identity/label/endpoint fields out of the payload body - they travel as
/// structured call arguments, not data.
fn bulk_element(graph: &str, kind: ElementKind, record: Value) -> Result<Value> {
    let Value::Object(mut fields) = record else {
        return Err(BackupError::Serialization(serde::de::Error::custom(
            "record is not a JSON object",
        )));
    };

    let gid = take_string(&mut fields, "_id")?;
    let label = take_string(&mut fields, "_label")?;

    let element = match kind {
        ElementKind::Vertex => json!({
            "gid": gid,
            "label": label,
            "data": Value::Object(fields),
        }),
        ElementKind::Edge => {
            let from = take_string(&mut fields, "_from")?;
            let to = take_string(&mut fields, "_to")?;
            json!({
                "gid": gid,
                "label": label,
                "from": from,
                "to": to,
                "data": Value::Object(fields),
            })
        }
    };

    Ok(json!({ "graph": graph, kind.wire_name(): element }))
}

fn take_string(fields: &mut Map<String, Value>, key: &str) -> Result<String> {
    match fields.remove(key) {
        Some(Value::String(s)) => Ok(s),
        _ => Err(BackupError::Serialization(serde::de::Error::custom(
            format!("record missing required field '{key}'"),
        ))),
    }
}
