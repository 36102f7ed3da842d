//! Symmetric perceptual-similarity graph.

use std::collections::{HashMap, HashSet, VecDeque};

use dejavu_hash::{ContentHash, PerceptualHash};

/// Bidirectional adjacency over perceptually close content hashes.
///
/// Nodes carry their perceptual signature; an edge exists between two
/// nodes when their similarity meets the threshold. Every mutation
/// keeps the graph symmetric: an edge is present in both endpoints'
/// sets or in neither.
///
/// Candidate work is bounded by a recency window. Inserts compare the
/// new signature only against the most recent `window` nodes, and
/// [`closest`](Self::closest) scans the same window, trading recall on
/// old entries for predictable cost.
#[derive(Debug)]
pub struct SimilarityIndex {
    threshold: f64,
    window: usize,
    nodes: HashMap<ContentHash, PerceptualHash>,
    edges: HashMap<ContentHash, HashSet<ContentHash>>,
    recent: VecDeque<ContentHash>,
}

impl SimilarityIndex {
    /// Empty index matching at `threshold` over a `window`-sized candidate set.
    #[must_use]
    pub fn new(threshold: f64, window: usize) -> Self {
        Self {
            threshold,
            window,
            nodes: HashMap::new(),
            edges: HashMap::new(),
            recent: VecDeque::new(),
        }
    }

    /// Add a node, linking it to every candidate within the threshold.
    ///
    /// Re-inserting a known hash only refreshes its recency; content
    /// hashes determine the signature, so the graph cannot change.
    pub fn insert(&mut self, hash: ContentHash, signature: PerceptualHash) {
        if self.nodes.contains_key(&hash) {
            self.refresh(&hash);
            return;
        }
        let matched: Vec<ContentHash> = self
            .recent
            .iter()
            .filter(|candidate| {
                self.nodes
                    .get(*candidate)
                    .is_some_and(|sig| signature.similarity(sig) >= self.threshold)
            })
            .cloned()
            .collect();
        for neighbor in matched {
            self.edges
                .entry(hash.clone())
                .or_default()
                .insert(neighbor.clone());
            self.edges.entry(neighbor).or_default().insert(hash.clone());
        }
        self.nodes.insert(hash.clone(), signature);
        self.recent.push_back(hash);
        while self.recent.len() > self.window {
            self.recent.pop_front();
        }
    }

    /// Record an edge between two existing nodes regardless of the window.
    ///
    /// Used when a similarity hit re-caches a value: the measured pair
    /// stays linked even if one endpoint has aged out of the window.
    pub fn connect(&mut self, a: &ContentHash, b: &ContentHash) {
        if a == b || !self.nodes.contains_key(a) || !self.nodes.contains_key(b) {
            return;
        }
        self.edges.entry(a.clone()).or_default().insert(b.clone());
        self.edges.entry(b.clone()).or_default().insert(a.clone());
    }

    /// Neighbors of a node, unordered.
    #[must_use]
    pub fn neighbors(&self, hash: &ContentHash) -> Vec<ContentHash> {
        self.edges
            .get(hash)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Candidates within the threshold of `probe`, best first.
    #[must_use]
    pub fn closest(&self, probe: &PerceptualHash, limit: usize) -> Vec<(ContentHash, f64)> {
        let mut scored: Vec<(ContentHash, f64)> = self
            .recent
            .iter()
            .filter_map(|candidate| {
                let signature = self.nodes.get(candidate)?;
                let similarity = probe.similarity(signature);
                (similarity >= self.threshold).then(|| (candidate.clone(), similarity))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        scored
    }

    /// Remove a node and every edge that references it.
    pub fn remove(&mut self, hash: &ContentHash) {
        self.nodes.remove(hash);
        self.recent.retain(|h| h != hash);
        if let Some(neighbors) = self.edges.remove(hash) {
            for neighbor in neighbors {
                if let Some(set) = self.edges.get_mut(&neighbor) {
                    set.remove(hash);
                    if set.is_empty() {
                        self.edges.remove(&neighbor);
                    }
                }
            }
        }
    }

    /// Whether a node exists for `hash`.
    #[must_use]
    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.nodes.contains_key(hash)
    }

    /// All nodes with their signatures.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(ContentHash, PerceptualHash)> {
        self.nodes
            .iter()
            .map(|(hash, signature)| (hash.clone(), *signature))
            .collect()
    }

    /// Replace the whole graph with a precomputed one.
    ///
    /// Edges naming a hash absent from `nodes` are dropped, so a
    /// rebuild can never resurrect removed keys. The recency window
    /// keeps its order, filtered to surviving nodes.
    pub(crate) fn rebuild(
        &mut self,
        nodes: Vec<(ContentHash, PerceptualHash)>,
        edges: Vec<(ContentHash, ContentHash)>,
    ) {
        self.nodes = nodes.into_iter().collect();
        self.edges.clear();
        let survivors = &self.nodes;
        self.recent.retain(|hash| survivors.contains_key(hash));
        for (a, b) in edges {
            if a != b && self.nodes.contains_key(&a) && self.nodes.contains_key(&b) {
                self.edges.entry(a.clone()).or_default().insert(b.clone());
                self.edges.entry(b).or_default().insert(a);
            }
        }
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of undirected edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(HashSet::len).sum::<usize>() / 2
    }

    /// Drop every node and edge.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.edges.clear();
        self.recent.clear();
    }

    fn refresh(&mut self, hash: &ContentHash) {
        self.recent.retain(|h| h != hash);
        self.recent.push_back(hash.clone());
        while self.recent.len() > self.window {
            self.recent.pop_front();
        }
    }
}
