use crate::allocate::schedule;
use crate::error::{PolicyError, Result};
use crate::graph::TransitionGraph;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use warden_core::digest::content_digest;
use warden_core::{parse_document, to_json_pretty, ClusterDocument};

/// Configuration for the policy engine service
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often the input document is checked for changes
    pub poll_interval: Duration,
    /// Where `transition-<id>.json` files are written
    pub output_dir: PathBuf,
    /// Id of the first transition computed
    pub first_transition_id: u64,
    /// Log every allocation score at info level
    pub show_scores: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            output_dir: PathBuf::from("transitions"),
            first_transition_id: 0,
            show_scores: false,
        }
    }
}

/// Computes transition graphs, one run per input document
pub struct PolicyEngine {
    config: EngineConfig,
    next_transition: AtomicU64,
}

impl PolicyEngine {
    pub fn new(config: EngineConfig) -> Self {
        let next_transition = AtomicU64::new(config.first_transition_id);
        Self {
            config,
            next_transition,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Id the next computed transition will get
    pub fn next_transition_id(&self) -> u64 {
        self.next_transition.load(Ordering::SeqCst)
    }

    /// Run the whole pipeline once
    pub fn compute(&self, doc: &ClusterDocument) -> TransitionGraph {
        let id = self.next_transition.fetch_add(1, Ordering::SeqCst);
        let (_, graph) = schedule(doc, id, self.config.show_scores);
        graph
    }

    /// Read and parse an input document
    pub async fn load(path: &Path) -> Result<ClusterDocument> {
        let data = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PolicyError::io_error(path.display().to_string(), e))?;
        Ok(parse_document(&path.to_string_lossy(), &data)?)
    }

    /// Write a graph as `transition-<id>.json` into the output directory
    pub async fn write_graph(&self, graph: &TransitionGraph) -> Result<PathBuf> {
        let dir = &self.config.output_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| PolicyError::io_error(dir.display().to_string(), e))?;

        let path = dir.join(format!("transition-{}.json", graph.transition_id));
        let json = to_json_pretty(graph)?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| PolicyError::io_error(path.display().to_string(), e))?;
        Ok(path)
    }

    /// Poll `source` and compute a new transition every time its content
    /// changes, until cancelled
    pub async fn run(&self, source: &Path, token: CancellationToken) -> Result<()> {
        info!(
            "Starting policy engine (input: {}, output: {}, interval: {:?})",
            source.display(),
            self.config.output_dir.display(),
            self.config.poll_interval
        );

        let mut interval = tokio::time::interval(self.config.poll_interval);
        let mut last_digest: Option<String> = None;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Policy engine shutting down");
                    return Ok(());
                }
                _ = interval.tick() => {
                    match self.poll(source, last_digest.as_deref()).await {
                        Ok(Some(digest)) => last_digest = Some(digest),
                        Ok(None) => {}
                        Err(e) => error!("Failed to compute a transition: {}", e),
                    }
                }
            }
        }
    }

    /// One poll: returns the digest of new content, whether a transition was
    /// written for it or it was rejected
    async fn poll(&self, source: &Path, last_digest: Option<&str>) -> Result<Option<String>> {
        let data = match tokio::fs::read(source).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Input {} does not exist yet", source.display());
                return Ok(None);
            }
            Err(e) => return Err(PolicyError::io_error(source.display().to_string(), e)),
        };

        let digest = content_digest(&data);
        if last_digest == Some(digest.as_str()) {
            debug!("Input unchanged ({})", digest);
            return Ok(None);
        }

        let text = String::from_utf8_lossy(&data);
        let doc = match parse_document(&source.to_string_lossy(), &text) {
            Ok(doc) => doc,
            Err(e) => {
                error!("Rejected {} ({}): {}", source.display(), digest, e);
                return Ok(Some(digest));
            }
        };
        let graph = self.compute(&doc);
        let path = self.write_graph(&graph).await?;
        info!(
            "Wrote transition {} with {} actions to {}",
            graph.transition_id,
            graph.synapses.len(),
            path.display()
        );
        Ok(Some(digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const DOC: &str = r#"
nodes:
  - id: n1
resources:
  - kind: primitive
    id: db
    type: Dummy
status:
  - id: n1
"#;

    async fn wait_for(path: &Path) -> bool {
        for _ in 0..200 {
            if path.exists() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[test]
    fn test_transition_ids_increase() {
        let engine = PolicyEngine::new(EngineConfig {
            first_transition_id: 5,
            ..Default::default()
        });
        let doc: ClusterDocument = warden_core::from_yaml(DOC).unwrap();

        assert_eq!(engine.compute(&doc).transition_id, 5);
        assert_eq!(engine.compute(&doc).transition_id, 6);
        assert_eq!(engine.next_transition_id(), 7);
    }

    #[tokio::test]
    async fn test_load_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cluster.json");
        tokio::fs::write(&path, "not json").await.unwrap();

        let err = PolicyEngine::load(&path).await.unwrap_err();
        assert!(matches!(err, PolicyError::CoreError(_)));

        let missing = PolicyEngine::load(&dir.path().join("missing.yaml")).await.unwrap_err();
        assert!(matches!(missing, PolicyError::IoError { .. }));
    }

    #[tokio::test]
    async fn test_rejected_input_is_remembered() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("cluster.yaml");
        let engine = PolicyEngine::new(EngineConfig {
            output_dir: dir.path().join("out"),
            ..Default::default()
        });
        tokio::fs::write(&input, "nodes: [").await.unwrap();

        let digest = engine.poll(&input, None).await.unwrap();
        assert!(digest.is_some());
        assert_eq!(engine.poll(&input, digest.as_deref()).await.unwrap(), None);
        assert_eq!(engine.next_transition_id(), 0);

        // a fixed document is picked up on the next poll
        tokio::fs::write(&input, DOC).await.unwrap();
        let fixed = engine.poll(&input, digest.as_deref()).await.unwrap();
        assert!(fixed.is_some() && fixed != digest);
        assert!(dir.path().join("out").join("transition-0.json").exists());
    }

    #[tokio::test]
    async fn test_run_recomputes_on_change() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("cluster.yaml");
        let output = dir.path().join("out");
        tokio::fs::write(&input, DOC).await.unwrap();

        let engine = std::sync::Arc::new(PolicyEngine::new(EngineConfig {
            poll_interval: Duration::from_millis(10),
            output_dir: output.clone(),
            ..Default::default()
        }));
        let token = CancellationToken::new();
        let task = {
            let engine = engine.clone();
            let input = input.clone();
            let token = token.clone();
            tokio::spawn(async move { engine.run(&input, token).await })
        };

        assert!(wait_for(&output.join("transition-0.json")).await);
        // unchanged input: no new transition
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.next_transition_id(), 1);

        tokio::fs::write(&input, DOC.replace("Dummy", "Stateful")).await.unwrap();
        assert!(wait_for(&output.join("transition-1.json")).await);

        token.cancel();
        assert!(task.await.unwrap().is_ok());

        let written = tokio::fs::read_to_string(output.join("transition-0.json")).await.unwrap();
        let graph: TransitionGraph = warden_core::from_json(&written).unwrap();
        assert!(graph.find("db_start_0", Some("n1")).is_some());
    }
}
