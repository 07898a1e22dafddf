//! Graph export and rebuild commands

use crate::config::Config;
use crate::error::Result;
use crate::graph::{GraphStats, KnowledgeGraph, Visualization};
use crate::orchestrator::{Collaborators, Orchestrator};
use crate::persist::RootLock;
use std::path::Path;
use tracing::info;

/// Visualization form of the persisted graph; written to `output` if given
pub fn cmd_export_graph(config: &Config, output: Option<&Path>) -> Result<Visualization> {
    let graph = KnowledgeGraph::open_read_only(&config.paths.graph_file);
    let vis = graph.export_visualization();
    if let Some(path) = output {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&vis)?)?;
        info!(
            "Exported {} nodes and {} edges to {:?}",
            vis.nodes.len(),
            vis.edges.len(),
            path
        );
    }
    Ok(vis)
}

/// Rebuild `graph.json` from every stored record
pub fn cmd_rebuild_graph(config: Config) -> Result<GraphStats> {
    config.ensure_root()?;
    let _lock = RootLock::acquire(&config.paths.lock_file)?;
    let collaborators = Collaborators::for_config(&config)?;
    let mut orchestrator = Orchestrator::open(config, collaborators)?;
    orchestrator.rebuild_graph()
}

pub fn print_graph_stats(stats: &GraphStats) {
    println!("\n🕸 Knowledge graph\n");
    for (kind, count) in &stats.nodes_by_type {
        println!("  {}: {}", kind, count);
    }
    println!("  Nodes: {}", stats.total_nodes);
    println!("  Edges: {}", stats.total_edges);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordStub;
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn test_export_writes_file() {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_root(tmp.path());
        config.ensure_root().unwrap();

        let mut graph = KnowledgeGraph::open(&config.paths.graph_file);
        let mut record = RecordStub::new("arxiv", "1")
            .with_field("title", "t")
            .with_tag("agents")
            .into_record("academic_paper", &["title"], Utc::now());
        record.content_hash = "cd".repeat(32);
        graph.ingest(&record, Utc::now());
        graph.persist().unwrap();

        let out = tmp.path().join("out").join("graph_vis.json");
        let vis = cmd_export_graph(&config, Some(&out)).unwrap();
        assert_eq!(vis.nodes.len(), 3);
        assert_eq!(vis.edges.len(), 2);

        let written: Visualization =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(written, vis);
    }

    #[test]
    fn test_export_does_not_archive_corrupt_graph() {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_root(tmp.path());
        config.ensure_root().unwrap();
        std::fs::write(&config.paths.graph_file, "{not json").unwrap();

        let vis = cmd_export_graph(&config, None).unwrap();
        assert!(vis.nodes.is_empty());
        assert_eq!(
            std::fs::read_to_string(&config.paths.graph_file).unwrap(),
            "{not json"
        );
    }
}
