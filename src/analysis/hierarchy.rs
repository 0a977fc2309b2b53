//! Agglomerative motif tree and community extraction.
//!
//! Motifs are merged bottom-up, cheapest pair first, where the cost of a pair
//! is their combined usage divided by the transitions between them: rarely
//! used motifs that frequently follow each other merge early.
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyNode {
    /// Motif index for leaves.
    pub motif: Option<usize>,
    /// Left and right child for merge nodes, empty for leaves.
    pub children: Vec<usize>,
    pub usage: f64,
    /// Merge cost; `None` for leaves and for merges of disconnected subtrees.
    pub cost: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hierarchy {
    pub nodes: Vec<HierarchyNode>,
    pub root: usize,
}

impl Hierarchy {
    /// Builds the tree over `usage.len()` motifs.
    ///
    /// `counts[[i, j]]` is the number of observed `i -> j` changes.
    ///
    /// # Errors
    /// Returns [`PipelineError::Shape`] when `counts` is not `n x n`, or when there are no motifs.
    pub fn build(usage: &[f64], counts: &Array2<f64>) -> Result<Self> {
        let n = usage.len();
        if n == 0 || counts.dim() != (n, n) {
            return Err(PipelineError::Shape(format!(
                "hierarchy needs {n} motifs and an {n}x{n} transition matrix, got {:?}",
                counts.dim()
            )));
        }

        let mut nodes: Vec<HierarchyNode> = usage
            .iter()
            .enumerate()
            .map(|(motif, &usage)| HierarchyNode {
                motif: Some(motif),
                children: vec![],
                usage,
                cost: None,
            })
            .collect();

        let mut active: Vec<usize> = (0..n).collect();
        let mut active_usage = usage.to_vec();
        let mut links: Vec<Vec<f64>> = (0..n).map(|i| counts.row(i).to_vec()).collect();

        while active.len() > 1 {
            let (a, b, cost) = cheapest_pair(&active_usage, &links);

            let merged = HierarchyNode {
                motif: None,
                children: vec![active[a], active[b]],
                usage: active_usage[a] + active_usage[b],
                cost,
            };
            nodes.push(merged);

            // Fold b into a, then drop b.
            active[a] = nodes.len() - 1;
            active_usage[a] += active_usage[b];
            let row_b = links[b].clone();
            for (target, value) in links[a].iter_mut().zip(row_b) {
                *target += value;
            }
            for row in &mut links {
                row[a] += row[b];
                row.remove(b);
            }
            links.remove(b);
            active.remove(b);
            active_usage.remove(b);
        }

        Ok(Self {
            root: active[0],
            nodes,
        })
    }

    #[must_use]
    pub fn motif_count(&self) -> usize {
        self.nodes.iter().filter(|node| node.motif.is_some()).count()
    }

    /// Longest root-to-leaf edge count.
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(self.root, 0)];
        while let Some((id, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            for &child in &self.nodes[id].children {
                stack.push((child, depth + 1));
            }
        }
        deepest
    }

    /// Cuts the tree at `cut_tree` and returns the community of every motif.
    ///
    /// Each node at depth `cut_tree`, and each leaf above it, becomes one
    /// community, numbered in left-to-right order.
    ///
    /// # Errors
    /// Returns [`PipelineError::InvalidTreeDepth`] when `cut_tree` exceeds [`Self::depth`].
    pub fn communities(&self, cut_tree: usize) -> Result<Vec<usize>> {
        let depth = self.depth();
        if cut_tree > depth {
            return Err(PipelineError::InvalidTreeDepth {
                requested: cut_tree,
                depth,
            });
        }

        let mut community_of = vec![0; self.motif_count()];
        let mut next_community = 0;
        let mut stack = vec![(self.root, 0)];
        while let Some((id, depth)) = stack.pop() {
            let node = &self.nodes[id];
            if depth == cut_tree || node.children.is_empty() {
                for motif in self.leaves(id) {
                    community_of[motif] = next_community;
                }
                next_community += 1;
                continue;
            }
            // Right pushed first so the left subtree is numbered first.
            for &child in node.children.iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        Ok(community_of)
    }

    /// Motif indices under `id`, left to right.
    #[must_use]
    pub fn leaves(&self, id: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = &self.nodes[current];
            if let Some(motif) = node.motif {
                out.push(motif);
            }
            for &child in node.children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }
}

/// Groups motif indices by community, each group sorted ascending.
#[must_use]
pub fn community_bag(community_of: &[usize]) -> Vec<Vec<usize>> {
    let communities = community_of.iter().max().map_or(0, |max| max + 1);
    let mut bag = vec![Vec::new(); communities];
    for (motif, &community) in community_of.iter().enumerate() {
        bag[community].push(motif);
    }
    bag
}

fn cheapest_pair(usage: &[f64], links: &[Vec<f64>]) -> (usize, usize, Option<f64>) {
    let n = usage.len();
    let mut best: Option<(usize, usize, f64)> = None;
    for i in 0..n {
        for j in (i + 1)..n {
            let flow = links[i][j] + links[j][i];
            if flow <= 0.0 {
                continue;
            }
            let cost = (usage[i] + usage[j]) / flow;
            if best.is_none_or(|(_, _, current)| cost < current) {
                best = Some((i, j, cost));
            }
        }
    }
    if let Some((i, j, cost)) = best {
        return (i, j, Some(cost));
    }

    // Disconnected: merge the least used pair.
    let mut fallback = (0, 1, f64::INFINITY);
    for i in 0..n {
        for j in (i + 1)..n {
            let combined = usage[i] + usage[j];
            if combined < fallback.2 {
                fallback = (i, j, combined);
            }
        }
    }
    (fallback.0, fallback.1, None)
}
