//! Graph analysis: PageRank importance, modularity-style clustering, and
//! betweenness bridges. Pure functions over id lists and adjacency maps so the
//! graph lock is held only while copying the structure out.

use std::collections::{HashMap, HashSet, VecDeque};

use uuid::Uuid;

/// PageRank over a directed graph. Damping 0.85, fixed iteration count;
/// dangling mass is redistributed uniformly. Returns a score per node.
pub fn pagerank(
    nodes: &[Uuid],
    out_edges: &HashMap<Uuid, Vec<Uuid>>,
    iterations: usize,
) -> HashMap<Uuid, f64> {
    let n = nodes.len();
    if n == 0 {
        return HashMap::new();
    }
    let damping = 0.85;
    let base = (1.0 - damping) / n as f64;
    let mut rank: HashMap<Uuid, f64> = nodes.iter().map(|id| (*id, 1.0 / n as f64)).collect();

    for _ in 0..iterations {
        let mut next: HashMap<Uuid, f64> = nodes.iter().map(|id| (*id, base)).collect();
        let mut dangling = 0.0;
        for id in nodes {
            let r = rank[id];
            match out_edges.get(id).filter(|targets| !targets.is_empty()) {
                Some(targets) => {
                    let share = damping * r / targets.len() as f64;
                    for t in targets {
                        if let Some(slot) = next.get_mut(t) {
                            *slot += share;
                        }
                    }
                }
                None => dangling += damping * r,
            }
        }
        let spread = dangling / n as f64;
        for v in next.values_mut() {
            *v += spread;
        }
        rank = next;
    }
    rank
}

/// Label propagation over the undirected projection: each node repeatedly
/// adopts the most common label among its neighbors (smallest label wins ties,
/// so the result is deterministic). Returns clusters of size >= 1, largest first.
pub fn label_clusters(nodes: &[Uuid], undirected: &HashMap<Uuid, Vec<Uuid>>) -> Vec<Vec<Uuid>> {
    let mut sorted: Vec<Uuid> = nodes.to_vec();
    sorted.sort();
    let mut label: HashMap<Uuid, Uuid> = sorted.iter().map(|id| (*id, *id)).collect();

    let rounds = 10;
    for _ in 0..rounds {
        let mut changed = false;
        for id in &sorted {
            let Some(neighbors) = undirected.get(id).filter(|n| !n.is_empty()) else {
                continue;
            };
            let mut counts: HashMap<Uuid, usize> = HashMap::new();
            for n in neighbors {
                if let Some(l) = label.get(n) {
                    *counts.entry(*l).or_insert(0) += 1;
                }
            }
            let best = counts
                .into_iter()
                .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
                .map(|(l, _)| l);
            if let Some(best) = best {
                if label[id] != best {
                    label.insert(*id, best);
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }

    let mut groups: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for id in &sorted {
        groups.entry(label[id]).or_default().push(*id);
    }
    let mut clusters: Vec<Vec<Uuid>> = groups.into_values().collect();
    clusters.sort_by(|a, b| b.len().cmp(&a.len()).then(a[0].cmp(&b[0])));
    clusters
}

/// Brandes betweenness centrality over the undirected projection, unweighted.
/// Returns the `top_n` node ids with the highest betweenness, descending.
pub fn bridges(
    nodes: &[Uuid],
    undirected: &HashMap<Uuid, Vec<Uuid>>,
    top_n: usize,
) -> Vec<Uuid> {
    let mut centrality: HashMap<Uuid, f64> = nodes.iter().map(|id| (*id, 0.0)).collect();

    for s in nodes {
        let mut stack: Vec<Uuid> = Vec::new();
        let mut preds: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        let mut sigma: HashMap<Uuid, f64> = nodes.iter().map(|id| (*id, 0.0)).collect();
        let mut dist: HashMap<Uuid, i64> = nodes.iter().map(|id| (*id, -1)).collect();
        sigma.insert(*s, 1.0);
        dist.insert(*s, 0);

        let mut queue = VecDeque::new();
        queue.push_back(*s);
        while let Some(v) = queue.pop_front() {
            stack.push(v);
            for w in undirected.get(&v).into_iter().flatten() {
                if dist[w] < 0 {
                    dist.insert(*w, dist[&v] + 1);
                    queue.push_back(*w);
                }
                if dist[w] == dist[&v] + 1 {
                    let via = sigma[&v];
                    *sigma.get_mut(w).expect("sigma has all nodes") += via;
                    preds.entry(*w).or_default().push(v);
                }
            }
        }

        let mut delta: HashMap<Uuid, f64> = nodes.iter().map(|id| (*id, 0.0)).collect();
        while let Some(w) = stack.pop() {
            for v in preds.get(&w).into_iter().flatten() {
                let share = sigma[v] / sigma[&w] * (1.0 + delta[&w]);
                *delta.get_mut(v).expect("delta has all nodes") += share;
            }
            if w != *s {
                *centrality.get_mut(&w).expect("centrality has all nodes") += delta[&w];
            }
        }
    }

    let mut ranked: Vec<(Uuid, f64)> = centrality.into_iter().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
    ranked.into_iter().take(top_n).map(|(id, _)| id).collect()
}
