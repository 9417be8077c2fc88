//! Hierarchical navigable small-world graph over L2-normalized vectors.
//!
//! Nodes are addressed by their insertion index, which doubles as the
//! storage label. Upper layers keep at most `m` links per node, layer 0 keeps
//! `2 * m`. Level assignment uses a seeded LCG so that building the same
//! sequence of vectors twice yields the same graph.

mod codec;

use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
};

use ahash::AHashSet;

const MAX_LEVEL: usize = 16;
const LCG_SEED: u64 = 42;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Scored {
    distance: f32,
    node: u32,
}

impl Eq for Scored {}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.node.cmp(&other.node))
    }
}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone)]
struct Node {
    vector: Vec<f32>,
    // One adjacency list per layer, `0..=level`.
    neighbors: Vec<Vec<u32>>,
}

#[derive(Clone)]
pub struct AnnGraph {
    dim: usize,
    m: usize,
    m_max0: usize,
    ef_construction: usize,
    level_mult: f64,
    nodes: Vec<Node>,
    entry_point: Option<u32>,
    max_level: usize,
    rng_state: u64,
}

impl AnnGraph {
    pub fn new(dim: usize, m: usize, ef_construction: usize) -> Self {
        let m = m.max(2);
        Self {
            dim,
            m,
            m_max0: m * 2,
            ef_construction: ef_construction.max(1),
            level_mult: 1.0 / (m as f64).ln(),
            nodes: Vec::new(),
            entry_point: None,
            max_level: 0,
            rng_state: LCG_SEED,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub const fn dim(&self) -> usize {
        self.dim
    }

    /// Inserts `vector` and returns its label. Callers validate the dimension.
    pub fn insert(&mut self, vector: &[f32]) -> u64 {
        let label = self.nodes.len() as u32;
        let level = self.select_level();
        let query = normalized(vector);
        self.nodes.push(Node {
            vector: query.clone(),
            neighbors: vec![Vec::new(); level + 1],
        });

        let Some(mut entry) = self.entry_point else {
            self.entry_point = Some(label);
            self.max_level = level;
            return u64::from(label);
        };

        for layer in (level + 1..=self.max_level).rev() {
            entry = self.greedy_closest(&query, entry, layer);
        }

        for layer in (0..=level.min(self.max_level)).rev() {
            let found = self.search_layer(&query, entry, self.ef_construction, layer);
            let limit = self.layer_limit(layer);
            let selected = found
                .iter()
                .take(limit)
                .map(|scored| scored.node)
                .collect::<Vec<_>>();
            for &neighbor in &selected {
                self.link(neighbor, label, layer, limit);
            }
            self.nodes[label as usize].neighbors[layer] = selected;
            if let Some(best) = found.first() {
                entry = best.node;
            }
        }

        if level > self.max_level {
            self.entry_point = Some(label);
            self.max_level = level;
        }
        u64::from(label)
    }

    /// The `k` closest labels to `query`, ascending by cosine distance.
    pub fn search(&self, query: &[f32], k: usize, ef: usize) -> Vec<(u64, f32)> {
        if k == 0 {
            return Vec::new();
        }
        let Some(mut entry) = self.entry_point else {
            return Vec::new();
        };
        let query = normalized(query);
        for layer in (1..=self.max_level).rev() {
            entry = self.greedy_closest(&query, entry, layer);
        }
        self.search_layer(&query, entry, ef.max(k), 0)
            .into_iter()
            .take(k)
            .map(|scored| (u64::from(scored.node), scored.distance))
            .collect()
    }

    const fn layer_limit(&self, layer: usize) -> usize {
        if layer == 0 { self.m_max0 } else { self.m }
    }

    fn select_level(&mut self) -> usize {
        self.rng_state = self
            .rng_state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        let uniform = ((self.rng_state >> 11) as f64 / (1u64 << 53) as f64).max(f64::MIN_POSITIVE);
        ((-uniform.ln() * self.level_mult).floor() as usize).min(MAX_LEVEL)
    }

    // Over the limit, keeps the `limit` closest links.
    fn link(&mut self, from: u32, to: u32, layer: usize, limit: usize) {
        let list = &mut self.nodes[from as usize].neighbors[layer];
        list.push(to);
        if list.len() <= limit {
            return;
        }
        let base = &self.nodes[from as usize].vector;
        let mut scored = self.nodes[from as usize].neighbors[layer]
            .iter()
            .map(|&node| Scored {
                distance: distance(base, &self.nodes[node as usize].vector),
                node,
            })
            .collect::<Vec<_>>();
        scored.sort_unstable();
        scored.truncate(limit);
        self.nodes[from as usize].neighbors[layer] =
            scored.into_iter().map(|scored| scored.node).collect();
    }

    fn greedy_closest(&self, query: &[f32], entry: u32, layer: usize) -> u32 {
        let mut current = entry;
        let mut best = distance(query, &self.nodes[current as usize].vector);
        loop {
            let mut changed = false;
            for &neighbor in &self.nodes[current as usize].neighbors[layer] {
                let d = distance(query, &self.nodes[neighbor as usize].vector);
                if d < best {
                    best = d;
                    current = neighbor;
                    changed = true;
                }
            }
            if !changed {
                return current;
            }
        }
    }

    fn search_layer(&self, query: &[f32], entry: u32, ef: usize, layer: usize) -> Vec<Scored> {
        let start = Scored {
            distance: distance(query, &self.nodes[entry as usize].vector),
            node: entry,
        };
        let mut visited = AHashSet::new();
        visited.insert(entry);
        let mut candidates = BinaryHeap::new();
        candidates.push(Reverse(start));
        let mut results = BinaryHeap::new();
        results.push(start);

        while let Some(Reverse(current)) = candidates.pop() {
            let worst = results.peek().map_or(f32::INFINITY, |s: &Scored| s.distance);
            if current.distance > worst && results.len() >= ef {
                break;
            }
            let Some(links) = self.nodes[current.node as usize].neighbors.get(layer) else {
                continue;
            };
            for &neighbor in links {
                if !visited.insert(neighbor) {
                    continue;
                }
                let scored = Scored {
                    distance: distance(query, &self.nodes[neighbor as usize].vector),
                    node: neighbor,
                };
                let worst = results.peek().map_or(f32::INFINITY, |s| s.distance);
                if results.len() < ef || scored.distance < worst {
                    candidates.push(Reverse(scored));
                    results.push(scored);
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out = results.into_vec();
        out.sort_unstable();
        out
    }
}

fn normalized(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return vector.to_vec();
    }
    vector.iter().map(|v| v / norm).collect()
}

/// Cosine distance of two unit vectors.
fn distance(a: &[f32], b: &[f32]) -> f32 {
    let dot = a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
    (1.0 - dot).max(0.0)
}
