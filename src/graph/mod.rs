//! Knowledge graph of content, source platforms and topics.
//!
//! Nodes and edges live in flat tables keyed by hex ids, so cycles are just
//! data. The whole graph persists as one JSON document.

use crate::error::Result;
use crate::models::{short_id, Record};
use crate::persist;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Content,
    SourcePlatform,
    Topic,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Content => "content",
            NodeType::SourcePlatform => "source_platform",
            NodeType::Topic => "topic",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    FromSource,
    RelatesTo,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::FromSource => "from_source",
            Relation::RelatesTo => "relates_to",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub node_type: NodeType,
    /// Natural key the id was derived from
    pub key: String,
    pub label: String,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub relation: Relation,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GraphDocument {
    #[serde(default)]
    nodes: BTreeMap<String, Node>,
    #[serde(default)]
    edges: Vec<Edge>,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
}

/// What one `ingest` added
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub nodes_added: usize,
    pub edges_added: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub nodes_by_type: BTreeMap<NodeType, usize>,
    pub total_nodes: usize,
    pub total_edges: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisEdge {
    pub source: String,
    pub target: String,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Visualization {
    pub nodes: Vec<VisNode>,
    pub edges: Vec<VisEdge>,
}

/// `short_id("<type>:<key>")`
pub fn node_id(node_type: NodeType, key: &str) -> String {
    short_id(&format!("{}:{}", node_type.as_str(), key))
}

pub struct KnowledgeGraph {
    path: PathBuf,
    nodes: BTreeMap<String, Node>,
    edges: Vec<Edge>,
    edge_index: HashSet<(String, String, Relation)>,
    archived: Option<PathBuf>,
    dirty: bool,
}

impl KnowledgeGraph {
    /// Load `path`; a corrupt document is archived and the graph starts empty
    pub fn open(path: &Path) -> Self {
        let loaded = persist::load_or_archive::<GraphDocument>(path);
        Self::from_document(path, loaded.value, loaded.archived)
    }

    /// Load for inspection only; a corrupt file stays where it is
    pub fn open_read_only(path: &Path) -> Self {
        Self::from_document(path, persist::load_or_default(path), None)
    }

    fn from_document(path: &Path, doc: GraphDocument, archived: Option<PathBuf>) -> Self {
        let edge_index = doc
            .edges
            .iter()
            .map(|e| (e.source.clone(), e.target.clone(), e.relation))
            .collect();
        debug!(
            "Loaded graph from {:?}: {} nodes, {} edges",
            path,
            doc.nodes.len(),
            doc.edges.len()
        );
        Self {
            path: path.to_path_buf(),
            nodes: doc.nodes,
            edges: doc.edges,
            edge_index,
            archived,
            dirty: false,
        }
    }

    /// Where a corrupt document was moved on open
    pub fn archived(&self) -> Option<&Path> {
        self.archived.as_deref()
    }

    fn upsert(
        &mut self,
        node_type: NodeType,
        key: &str,
        label: &str,
        properties: BTreeMap<String, serde_json::Value>,
        now: DateTime<Utc>,
        summary: &mut IngestSummary,
    ) -> String {
        let id = node_id(node_type, key);
        if !self.nodes.contains_key(&id) {
            self.nodes.insert(
                id.clone(),
                Node {
                    id: id.clone(),
                    node_type,
                    key: key.to_string(),
                    label: label.to_string(),
                    properties,
                    created_at: now,
                },
            );
            summary.nodes_added += 1;
        }
        id
    }

    fn link(
        &mut self,
        source: &str,
        target: &str,
        relation: Relation,
        now: DateTime<Utc>,
        summary: &mut IngestSummary,
    ) {
        let triple = (source.to_string(), target.to_string(), relation);
        if self.edge_index.insert(triple) {
            self.edges.push(Edge {
                source: source.to_string(),
                target: target.to_string(),
                relation,
                created_at: now,
            });
            summary.edges_added += 1;
        }
    }

    /// Add a record's content node, its source platform and one topic per tag
    pub fn ingest(&mut self, record: &Record, now: DateTime<Utc>) -> IngestSummary {
        let mut summary = IngestSummary::default();

        let mut properties = BTreeMap::new();
        properties.insert("content_hash".to_string(), serde_json::json!(record.content_hash));
        properties.insert("kind".to_string(), serde_json::json!(record.kind));
        if !record.attribution_url.is_empty() {
            properties.insert("url".to_string(), serde_json::json!(record.attribution_url));
        }
        if let Some(score) = record.alignment_score {
            properties.insert("alignment_score".to_string(), serde_json::json!(score));
        }

        let key = record.natural_key();
        let label = record.title().unwrap_or(&key).to_string();
        let content = self.upsert(NodeType::Content, &key, &label, properties, now, &mut summary);

        let source = self.upsert(
            NodeType::SourcePlatform,
            &record.source_tag,
            &record.source_tag,
            BTreeMap::new(),
            now,
            &mut summary,
        );
        self.link(&content, &source, Relation::FromSource, now, &mut summary);

        for tag in &record.tags {
            let topic_key = tag.trim().to_lowercase();
            if topic_key.is_empty() {
                continue;
            }
            let topic = self.upsert(NodeType::Topic, &topic_key, tag.trim(), BTreeMap::new(), now, &mut summary);
            self.link(&content, &topic, Relation::RelatesTo, now, &mut summary);
        }

        if summary.nodes_added + summary.edges_added > 0 {
            self.dirty = true;
        }
        summary
    }

    /// Ingest a raw JSON record; anything unparsable is logged and ignored
    pub fn ingest_value(&mut self, value: &serde_json::Value, now: DateTime<Utc>) -> Option<IngestSummary> {
        match serde_json::from_value::<Record>(value.clone()) {
            Ok(record) => Some(self.ingest(&record, now)),
            Err(e) => {
                error!("Rejected unparsable record for graph ingest: {}", e);
                None
            }
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes_of_type(&self, node_type: NodeType) -> Vec<&Node> {
        self.nodes
            .values()
            .filter(|n| n.node_type == node_type)
            .collect()
    }

    /// Ids adjacent to `id` via an edge in either direction
    pub fn neighbors(&self, id: &str) -> Vec<String> {
        let set: BTreeSet<&str> = self
            .edges
            .iter()
            .filter_map(|e| {
                if e.source == id {
                    Some(e.target.as_str())
                } else if e.target == id {
                    Some(e.source.as_str())
                } else {
                    None
                }
            })
            .collect();
        set.into_iter().map(String::from).collect()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn export_visualization(&self) -> Visualization {
        Visualization {
            nodes: self
                .nodes
                .values()
                .map(|n| VisNode {
                    id: n.id.clone(),
                    label: n.label.clone(),
                    node_type: n.node_type,
                })
                .collect(),
            edges: self
                .edges
                .iter()
                .map(|e| VisEdge {
                    source: e.source.clone(),
                    target: e.target.clone(),
                    label: e.relation.as_str().to_string(),
                })
                .collect(),
        }
    }

    pub fn stats(&self) -> GraphStats {
        let mut nodes_by_type = BTreeMap::new();
        for node in self.nodes.values() {
            *nodes_by_type.entry(node.node_type).or_insert(0) += 1;
        }
        GraphStats {
            nodes_by_type,
            total_nodes: self.nodes.len(),
            total_edges: self.edges.len(),
        }
    }

    /// Drop every node and edge; used before a rebuild from the store
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.edges.clear();
        self.edge_index.clear();
        self.dirty = true;
    }

    pub fn persist(&mut self) -> Result<()> {
        if !self.dirty && self.path.exists() {
            return Ok(());
        }
        let doc = GraphDocument {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
            last_updated: Some(Utc::now()),
        };
        persist::save_atomic(&self.path, &doc)?;
        info!(
            "Saved graph: {} nodes, {} edges",
            self.nodes.len(),
            self.edges.len()
        );
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordStub;
    use tempfile::TempDir;

    fn record(tag: &str, id: &str, tags: &[&str]) -> Record {
        let mut stub = RecordStub::new(tag, id).with_field("title", format!("paper {}", id));
        for t in tags {
            stub = stub.with_tag(*t);
        }
        stub.into_record("academic_paper", &[], Utc::now())
    }

    #[test]
    fn test_ingest_creates_nodes_and_edges() {
        let tmp = TempDir::new().unwrap();
        let mut graph = KnowledgeGraph::open(&tmp.path().join("graph.json"));
        let now = Utc::now();

        let summary = graph.ingest(&record("arxiv", "1", &["agents", "Planning"]), now);
        assert_eq!(summary.nodes_added, 4);
        assert_eq!(summary.edges_added, 3);

        let summary = graph.ingest(&record("arxiv", "2", &["agents"]), now);
        assert_eq!(summary.nodes_added, 1);
        assert_eq!(summary.edges_added, 2);

        assert_eq!(graph.nodes_of_type(NodeType::Content).len(), 2);
        assert_eq!(graph.nodes_of_type(NodeType::SourcePlatform).len(), 1);
        assert_eq!(graph.nodes_of_type(NodeType::Topic).len(), 2);

        let topic = node_id(NodeType::Topic, "agents");
        assert_eq!(graph.neighbors(&topic).len(), 2);
        assert_eq!(graph.node(&node_id(NodeType::Topic, "planning")).unwrap().label, "Planning");

        // Re-ingesting is a no-op
        let again = graph.ingest(&record("arxiv", "2", &["agents"]), now);
        assert_eq!(again, IngestSummary::default());
        assert_eq!(graph.edge_count(), 5);
    }

    #[test]
    fn test_id_determines_type_and_key() {
        assert_ne!(node_id(NodeType::Topic, "arxiv"), node_id(NodeType::SourcePlatform, "arxiv"));
        assert_eq!(node_id(NodeType::Topic, "x").len(), 16);
    }

    #[test]
    fn test_persist_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("graph.json");
        let mut graph = KnowledgeGraph::open(&path);
        graph.ingest(&record("github", "a/b", &["llm"]), Utc::now());
        graph.persist().unwrap();

        let reopened = KnowledgeGraph::open(&path);
        assert_eq!(reopened.stats(), graph.stats());
        assert_eq!(reopened.export_visualization(), graph.export_visualization());
        let content = node_id(NodeType::Content, "github:a/b");
        assert_eq!(reopened.neighbors(&content), graph.neighbors(&content));
    }

    #[test]
    fn test_corrupt_graph_is_archived() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("graph.json");
        std::fs::write(&path, "{not json").unwrap();

        let graph = KnowledgeGraph::open(&path);
        assert_eq!(graph.node_count(), 0);
        let archived = graph.archived().unwrap();
        assert!(archived.exists());
        assert!(!path.exists());
    }

    #[test]
    fn test_unparsable_value_leaves_graph_unchanged() {
        let tmp = TempDir::new().unwrap();
        let mut graph = KnowledgeGraph::open(&tmp.path().join("graph.json"));
        assert!(graph
            .ingest_value(&serde_json::json!({"source_tag": 5}), Utc::now())
            .is_none());
        assert_eq!(graph.node_count(), 0);

        let value = serde_json::to_value(record("arxiv", "9", &[])).unwrap();
        assert!(graph.ingest_value(&value, Utc::now()).is_some());
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn test_export_and_stats() {
        let tmp = TempDir::new().unwrap();
        let mut graph = KnowledgeGraph::open(&tmp.path().join("graph.json"));
        graph.ingest(&record("arxiv", "1", &["rl"]), Utc::now());

        let vis = graph.export_visualization();
        assert_eq!(vis.nodes.len(), 3);
        assert!(vis.edges.iter().any(|e| e.label == "from_source"));
        let json = serde_json::to_value(&vis).unwrap();
        assert!(json["nodes"][0].get("type").is_some());

        let stats = graph.stats();
        assert_eq!(stats.nodes_by_type[&NodeType::Topic], 1);
        assert_eq!(stats.total_edges, 2);
    }
}
