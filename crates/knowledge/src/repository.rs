//! Node repository — loads, caches, and invalidates knowledge nodes.
//!
//! Cache hits take a read lock only. Cold loads go through a keyed-wait map
//! (one loader slot per path) so concurrent misses for the same path do not
//! duplicate disk I/O. Nodes are read-mostly; the only writeback is the
//! summary backfill performed by [`NodeRepository::ensure_summaries`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};

use trellis_domain::error::{Error, Result};

use crate::node::{Node, NodeMeta, ToolCatalog};
use crate::summary::SummaryGenerator;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// NodeRepository
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct NodeRepository {
    root_dir: PathBuf,
    cache: RwLock<HashMap<String, Arc<Node>>>,
    /// One loader slot per path. Slots persist for the repository's
    /// lifetime; the map is bounded by the number of distinct paths.
    loading: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    generator: Option<Arc<dyn SummaryGenerator>>,
}

impl std::fmt::Debug for NodeRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRepository")
            .field("root_dir", &self.root_dir)
            .field("has_generator", &self.generator.is_some())
            .finish()
    }
}

impl NodeRepository {
    /// Open a repository over `root_dir` and eagerly load the `root` node.
    ///
    /// A tree without a loadable `root/` directory is a hard error — every
    /// session anchors there.
    pub fn open(
        root_dir: impl Into<PathBuf>,
        generator: Option<Arc<dyn SummaryGenerator>>,
    ) -> Result<Self> {
        let root_dir = root_dir.into();
        let root = read_node_dir(&root_dir, "root")?;

        tracing::info!(
            root_dir = %root_dir.display(),
            root_id = %root.id,
            "knowledge repository opened"
        );

        let mut cache = HashMap::new();
        cache.insert("root".to_string(), Arc::new(root));

        Ok(Self {
            root_dir,
            cache: RwLock::new(cache),
            loading: Mutex::new(HashMap::new()),
            generator,
        })
    }

    /// Load the node at `path`, populating the cache on miss.
    pub async fn load_node(&self, path: &str) -> Result<Arc<Node>> {
        validate_path(path)?;

        if let Some(node) = self.cache.read().get(path) {
            return Ok(node.clone());
        }

        // Cold path: serialize loaders per path, then re-check the cache —
        // a concurrent loader may have committed while we waited.
        let slot = {
            let mut loading = self.loading.lock();
            loading
                .entry(path.to_owned())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _guard = slot.lock().await;

        if let Some(node) = self.cache.read().get(path) {
            return Ok(node.clone());
        }

        let node = Arc::new(read_node_dir(&self.root_dir, path)?);
        self.cache.write().insert(path.to_owned(), node.clone());
        tracing::debug!(path, tools = node.tools.len(), "node loaded");
        Ok(node)
    }

    /// Child node names under `path`, lexicographic, hidden entries excluded.
    pub fn children(&self, path: &str) -> Result<Vec<String>> {
        validate_path(path)?;
        let dir = self.root_dir.join(path);
        if !dir.is_dir() {
            return Err(Error::NotFound(format!("node {path}")));
        }

        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    /// Drop one path from the cache, or everything when `path` is empty.
    /// The next `load_node` re-reads from disk.
    pub fn invalidate(&self, path: &str) {
        let mut cache = self.cache.write();
        if path.is_empty() {
            let n = cache.len();
            cache.clear();
            tracing::info!(evicted = n, "node cache cleared");
        } else if cache.remove(path).is_some() {
            tracing::debug!(path, "node cache entry invalidated");
        }
    }

    /// Backfill summaries depth-first from the root.
    ///
    /// Nodes with prose content and no summary (or all of them, when
    /// `force`) are run through the injected generator; the result is
    /// written back into the node's `node.yaml` and the cached record.
    /// Per-node failures are logged and skipped. Returns the number of
    /// summaries written.
    pub async fn ensure_summaries(&self, force: bool) -> Result<usize> {
        let generator = self
            .generator
            .as_ref()
            .ok_or_else(|| Error::Config("no summary generator configured".into()))?;

        let mut written = 0usize;
        let mut stack = vec!["root".to_string()];

        while let Some(path) = stack.pop() {
            let node = match self.load_node(&path).await {
                Ok(node) => node,
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "skipping unloadable node");
                    continue;
                }
            };

            if !node.content.is_empty() && (force || node.summary.is_empty()) {
                match generator.summarize(&node.title, &node.content).await {
                    Ok(summary) => match self.write_summary(&path, &summary) {
                        Ok(()) => written += 1,
                        Err(e) => {
                            tracing::warn!(path = %path, error = %e, "summary writeback failed")
                        }
                    },
                    Err(e) => {
                        tracing::warn!(path = %path, error = %e, "summary generation failed")
                    }
                }
            }

            match self.children(&path) {
                // Reverse push keeps the traversal lexicographic.
                Ok(children) => {
                    for child in children.iter().rev() {
                        stack.push(format!("{path}/{child}"));
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "child enumeration failed")
                }
            }
        }

        Ok(written)
    }

    /// Persist a generated summary into `node.yaml` and refresh the cache.
    fn write_summary(&self, path: &str, summary: &str) -> Result<()> {
        let meta_path = self.root_dir.join(path).join("node.yaml");
        let raw = std::fs::read_to_string(&meta_path)?;
        let mut doc: serde_yaml::Value = serde_yaml::from_str(&raw)?;

        match &mut doc {
            serde_yaml::Value::Mapping(map) => {
                map.insert("summary".into(), summary.into());
            }
            _ => {
                return Err(Error::Parse(format!(
                    "node {path}: node.yaml is not a mapping"
                )))
            }
        }
        std::fs::write(&meta_path, serde_yaml::to_string(&doc)?)?;

        let mut cache = self.cache.write();
        if let Some(node) = cache.get(path) {
            let mut updated = (**node).clone();
            updated.summary = summary.to_owned();
            cache.insert(path.to_owned(), Arc::new(updated));
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Disk loading
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Load one node directory: metadata, then prose, then catalog, then digest.
fn read_node_dir(root_dir: &Path, path: &str) -> Result<Node> {
    let dir = root_dir.join(path);
    if !dir.is_dir() {
        return Err(Error::NotFound(format!("node {path}")));
    }

    let meta_raw = match std::fs::read_to_string(dir.join("node.yaml")) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound(format!("node {path}: missing node.yaml")))
        }
        Err(e) => return Err(Error::Io(e)),
    };
    let meta: NodeMeta = serde_yaml::from_str(&meta_raw)
        .map_err(|e| Error::Parse(format!("node {path}: node.yaml: {e}")))?;

    let content = read_optional(&dir.join("node.md"))?.unwrap_or_default();

    let tools = match read_optional(&dir.join("tools.json"))? {
        Some(raw) => {
            let catalog: ToolCatalog = serde_json::from_str(&raw)
                .map_err(|e| Error::Parse(format!("node {path}: tools.json: {e}")))?;
            catalog.tools
        }
        None => Vec::new(),
    };

    // Tool names are unique within one node.
    for (i, tool) in tools.iter().enumerate() {
        if tools[..i].iter().any(|t| t.name == tool.name) {
            return Err(Error::Parse(format!(
                "node {path}: duplicate tool {:?} in tools.json",
                tool.name
            )));
        }
    }

    let hash = hex::encode(Sha256::digest(content.as_bytes()));

    Ok(Node {
        path: path.to_owned(),
        id: meta.id,
        title: meta.title,
        description: meta.description,
        content,
        summary: meta.summary,
        tools,
        auth: meta.auth,
        hash,
        loaded_at: Utc::now(),
    })
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Refuse traversal escapes and malformed keys before touching the disk.
fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::NotFound("empty node path".into()));
    }
    if path.starts_with('/')
        || path
            .split('/')
            .any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(Error::Parse(format!("invalid node path {path:?}")));
    }
    if path != "root" && !path.starts_with("root/") {
        return Err(Error::Parse(format!(
            "node path must be under root: {path:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn write_node(dir: &Path, yaml: &str, md: Option<&str>, tools: Option<&str>) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("node.yaml"), yaml).unwrap();
        if let Some(md) = md {
            std::fs::write(dir.join("node.md"), md).unwrap();
        }
        if let Some(tools) = tools {
            std::fs::write(dir.join("tools.json"), tools).unwrap();
        }
    }

    /// root with one child, a hidden sibling, and a grandchild.
    fn fixture() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        write_node(
            &tmp.path().join("root"),
            "id: root\ntitle: Root\ndescription: entry point\n",
            Some("Welcome to the tree."),
            Some(r#"{ "tools": [ { "name": "echo", "description": "repeat" } ] }"#),
        );
        write_node(
            &tmp.path().join("root/billing"),
            "id: billing\ntitle: Billing\n",
            Some("Billing rules."),
            None,
        );
        write_node(
            &tmp.path().join("root/billing/refunds"),
            "id: refunds\nsummary: already summarized\n",
            Some("Refund policy."),
            None,
        );
        write_node(&tmp.path().join("root/.hidden"), "id: hidden\n", None, None);
        tmp
    }

    struct CountingGenerator {
        calls: AtomicUsize,
        fail_on: Option<&'static str>,
    }

    #[async_trait::async_trait]
    impl SummaryGenerator for CountingGenerator {
        async fn summarize(&self, title: &str, _content: &str) -> trellis_domain::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if Some(title) == self.fail_on {
                return Err(Error::Provider {
                    provider: "mock".into(),
                    message: "boom".into(),
                });
            }
            Ok(format!("summary of {title}"))
        }
    }

    #[tokio::test]
    async fn load_and_cache_hit() {
        let tmp = fixture();
        let repo = NodeRepository::open(tmp.path(), None).unwrap();

        let node = repo.load_node("root/billing").await.unwrap();
        assert_eq!(node.id, "billing");
        assert_eq!(node.content, "Billing rules.");
        assert!(!node.hash.is_empty());

        // Mutate the file behind the cache; the hit must not re-read.
        std::fs::write(
            tmp.path().join("root/billing/node.yaml"),
            "id: changed\n",
        )
        .unwrap();
        let cached = repo.load_node("root/billing").await.unwrap();
        assert_eq!(cached.id, "billing");

        repo.invalidate("root/billing");
        let reloaded = repo.load_node("root/billing").await.unwrap();
        assert_eq!(reloaded.id, "changed");
    }

    #[tokio::test]
    async fn invalidate_all_with_empty_path() {
        let tmp = fixture();
        let repo = NodeRepository::open(tmp.path(), None).unwrap();
        repo.load_node("root/billing").await.unwrap();

        std::fs::write(tmp.path().join("root/node.yaml"), "id: root2\n").unwrap();
        repo.invalidate("");
        let root = repo.load_node("root").await.unwrap();
        assert_eq!(root.id, "root2");
    }

    #[tokio::test]
    async fn children_sorted_and_hidden_excluded() {
        let tmp = fixture();
        write_node(&tmp.path().join("root/alpha"), "id: alpha\n", None, None);
        let repo = NodeRepository::open(tmp.path(), None).unwrap();

        let children = repo.children("root").unwrap();
        assert_eq!(children, vec!["alpha".to_string(), "billing".to_string()]);
    }

    #[tokio::test]
    async fn parent_traversal_is_refused() {
        let tmp = fixture();
        let repo = NodeRepository::open(tmp.path(), None).unwrap();
        for bad in ["root/../etc", "..", "root//billing", "/root", "elsewhere"] {
            let err = repo.load_node(bad).await.unwrap_err();
            assert!(
                matches!(err, Error::Parse(_) | Error::NotFound(_)),
                "path {bad:?} gave {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn missing_directory_is_not_found() {
        let tmp = fixture();
        let repo = NodeRepository::open(tmp.path(), None).unwrap();
        let err = repo.load_node("root/nope").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn malformed_catalog_fails_single_load() {
        let tmp = fixture();
        write_node(
            &tmp.path().join("root/broken"),
            "id: broken\n",
            None,
            Some("{ not json"),
        );
        let repo = NodeRepository::open(tmp.path(), None).unwrap();
        assert!(matches!(
            repo.load_node("root/broken").await.unwrap_err(),
            Error::Parse(_)
        ));
        // Other nodes still load.
        assert!(repo.load_node("root/billing").await.is_ok());
    }

    #[tokio::test]
    async fn duplicate_tool_names_rejected() {
        let tmp = fixture();
        write_node(
            &tmp.path().join("root/dup"),
            "id: dup\n",
            None,
            Some(r#"{ "tools": [ { "name": "x" }, { "name": "x" } ] }"#),
        );
        let repo = NodeRepository::open(tmp.path(), None).unwrap();
        assert!(matches!(
            repo.load_node("root/dup").await.unwrap_err(),
            Error::Parse(_)
        ));
    }

    #[tokio::test]
    async fn concurrent_loads_agree() {
        let tmp = fixture();
        let repo = Arc::new(NodeRepository::open(tmp.path(), None).unwrap());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.load_node("root/billing/refunds").await.unwrap()
            }));
        }
        let mut hashes = Vec::new();
        for h in handles {
            hashes.push(h.await.unwrap().hash.clone());
        }
        assert!(hashes.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn ensure_summaries_backfills_and_persists() {
        let tmp = fixture();
        let gen = Arc::new(CountingGenerator {
            calls: AtomicUsize::new(0),
            fail_on: None,
        });
        let repo = NodeRepository::open(tmp.path(), Some(gen.clone())).unwrap();

        let written = repo.ensure_summaries(false).await.unwrap();
        // root + billing need summaries; refunds already has one, .hidden is skipped.
        assert_eq!(written, 2);
        assert_eq!(gen.calls.load(Ordering::SeqCst), 2);

        // Cache reflects the writeback without invalidation.
        let billing = repo.load_node("root/billing").await.unwrap();
        assert_eq!(billing.summary, "summary of Billing");

        // And it survived on disk.
        let raw = std::fs::read_to_string(tmp.path().join("root/billing/node.yaml")).unwrap();
        assert!(raw.contains("summary of Billing"));
    }

    #[tokio::test]
    async fn ensure_summaries_force_regenerates_all() {
        let tmp = fixture();
        let gen = Arc::new(CountingGenerator {
            calls: AtomicUsize::new(0),
            fail_on: None,
        });
        let repo = NodeRepository::open(tmp.path(), Some(gen)).unwrap();
        let written = repo.ensure_summaries(true).await.unwrap();
        // All three content-bearing nodes, including the pre-summarized one.
        assert_eq!(written, 3);
    }

    #[tokio::test]
    async fn ensure_summaries_survives_generator_failure() {
        let tmp = fixture();
        let gen = Arc::new(CountingGenerator {
            calls: AtomicUsize::new(0),
            fail_on: Some("Root"),
        });
        let repo = NodeRepository::open(tmp.path(), Some(gen)).unwrap();
        let written = repo.ensure_summaries(false).await.unwrap();
        // Root fails, billing still gets its summary.
        assert_eq!(written, 1);
    }

    #[tokio::test]
    async fn ensure_summaries_without_generator_is_config_error() {
        let tmp = fixture();
        let repo = NodeRepository::open(tmp.path(), None).unwrap();
        assert!(matches!(
            repo.ensure_summaries(false).await.unwrap_err(),
            Error::Config(_)
        ));
    }

    #[tokio::test]
    async fn empty_content_never_calls_generator() {
        let tmp = tempfile::tempdir().unwrap();
        write_node(&tmp.path().join("root"), "id: root\n", None, None);
        let gen = Arc::new(CountingGenerator {
            calls: AtomicUsize::new(0),
            fail_on: None,
        });
        let repo = NodeRepository::open(tmp.path(), Some(gen.clone())).unwrap();
        let written = repo.ensure_summaries(false).await.unwrap();
        assert_eq!(written, 0);
        assert_eq!(gen.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn open_without_root_is_hard_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            NodeRepository::open(tmp.path(), None).unwrap_err(),
            Error::NotFound(_)
        ));
    }
}
