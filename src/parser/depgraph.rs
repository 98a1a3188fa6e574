//! Dependency ordering: SCC detection, ordered build groups, stable topo sort.

use anyhow::Result;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use tracing::{debug, warn};

use crate::error::SkwError;
use crate::plan::BuildEntry;

use super::config::OrderedGroup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Cluster {
    /// A configured ordered group, by group index.
    Group(usize),
    /// A lone entry, by entry index.
    Single(usize),
}

/// Sort the plan so every dependency precedes its dependents.
///
/// Cyclic strongly connected components must be covered by one configured
/// group each; the group's listed order then governs its members. Ties are
/// broken by XML discovery order, so identical inputs always produce the
/// same plan.
pub fn order_entries(entries: Vec<BuildEntry>, groups: &[OrderedGroup]) -> Result<Vec<BuildEntry>> {
    if entries.is_empty() {
        return Ok(entries);
    }

    // Graph over entry indices; edge dep -> dependent.
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let indices: Vec<NodeIndex> = (0..entries.len()).map(|i| graph.add_node(i)).collect();

    let mut by_name: HashMap<String, usize> = HashMap::new();
    for (i, entry) in entries.iter().enumerate() {
        let name = entry.node_name();
        if by_name.contains_key(name) {
            warn!("duplicate package name '{name}' in plan; dependencies bind to the first");
        } else {
            by_name.insert(name.to_string(), i);
        }
    }

    for (i, entry) in entries.iter().enumerate() {
        for dep in &entry.dependencies {
            match by_name.get(dep.as_str()) {
                Some(&dep_idx) => {
                    graph.add_edge(indices[dep_idx], indices[i], ());
                }
                None => debug!(
                    "dependency '{dep}' of '{}' is not in the plan; ignored",
                    entry.node_name()
                ),
            }
        }
    }

    // Cluster assignment: every configured group is contracted as a unit.
    let mut cluster_of: Vec<Cluster> = (0..entries.len()).map(Cluster::Single).collect();
    for (g, group) in groups.iter().enumerate() {
        for name in &group.packages {
            let Some(&idx) = by_name.get(name.as_str()) else {
                warn!("ordered build group names unknown package '{name}'; ignored");
                continue;
            };
            if let Cluster::Group(other) = cluster_of[idx] {
                if other != g {
                    return Err(SkwError::ConfigInvalid(format!(
                        "package '{name}' appears in more than one ordered build group"
                    ))
                    .into());
                }
            }
            cluster_of[idx] = Cluster::Group(g);
        }
    }

    // Every cyclic SCC must be covered by a single group.
    for scc in tarjan_scc(&graph) {
        let members: Vec<usize> = scc.iter().map(|&n| graph[n]).collect();
        let cyclic = members.len() > 1
            || graph.find_edge(scc[0], scc[0]).is_some();
        if !cyclic {
            continue;
        }
        let covered = groups.iter().any(|group| {
            members
                .iter()
                .all(|&m| group.packages.iter().any(|p| p == entries[m].node_name()))
        });
        if !covered {
            let mut packages: Vec<String> = members
                .iter()
                .map(|&m| entries[m].node_name().to_string())
                .collect();
            packages.sort();
            return Err(SkwError::UnhandledCycle { packages }.into());
        }
    }

    // Condensed graph over clusters.
    let cluster_ids: Vec<Cluster> = {
        let mut seen = Vec::new();
        for &c in &cluster_of {
            if !seen.contains(&c) {
                seen.push(c);
            }
        }
        seen
    };
    let position: HashMap<Cluster, usize> = cluster_ids
        .iter()
        .enumerate()
        .map(|(pos, &c)| (c, pos))
        .collect();

    let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); cluster_ids.len()];
    let mut in_degree: Vec<usize> = vec![0; cluster_ids.len()];
    fn add_edge(
        successors: &mut [BTreeSet<usize>],
        in_degree: &mut [usize],
        from: usize,
        to: usize,
    ) {
        if from != to && successors[from].insert(to) {
            in_degree[to] += 1;
        }
    }
    for edge in graph.edge_indices() {
        let (a, b) = graph.edge_endpoints(edge).expect("edge endpoints");
        let from = position[&cluster_of[graph[a]]];
        let to = position[&cluster_of[graph[b]]];
        add_edge(&mut successors, &mut in_degree, from, to);
    }

    // Sort keys: discovery index of the earliest member; anchors override.
    let mut sort_key: Vec<i64> = cluster_ids
        .iter()
        .map(|cluster| match cluster {
            Cluster::Single(i) => *i as i64,
            Cluster::Group(g) => cluster_of
                .iter()
                .enumerate()
                .filter(|(_, c)| **c == Cluster::Group(*g))
                .map(|(i, _)| i as i64)
                .min()
                .unwrap_or(i64::MAX),
        })
        .collect();
    for (g, group) in groups.iter().enumerate() {
        let Some(&pos) = position.get(&Cluster::Group(g)) else {
            continue;
        };
        match group.anchor.as_deref() {
            None => {}
            Some("start") => sort_key[pos] = i64::MIN,
            Some("end") => sort_key[pos] = i64::MAX,
            Some(anchor) => match by_name.get(anchor) {
                Some(&idx) => {
                    let from = position[&cluster_of[idx]];
                    add_edge(&mut successors, &mut in_degree, from, pos);
                }
                None => warn!("ordered build group anchor '{anchor}' is not in the plan; ignored"),
            },
        }
    }

    // Stable Kahn: ready clusters ordered by sort key.
    let mut ready: BinaryHeap<Reverse<(i64, usize)>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(pos, _)| Reverse((sort_key[pos], pos)))
        .collect();

    let mut ordered_clusters = Vec::with_capacity(cluster_ids.len());
    while let Some(Reverse((_, pos))) = ready.pop() {
        ordered_clusters.push(pos);
        for &next in &successors[pos] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse((sort_key[next], next)));
            }
        }
    }

    if ordered_clusters.len() != cluster_ids.len() {
        let mut packages: Vec<String> = (0..entries.len())
            .filter(|&i| {
                let pos = position[&cluster_of[i]];
                !ordered_clusters.contains(&pos)
            })
            .map(|i| entries[i].node_name().to_string())
            .collect();
        packages.sort();
        return Err(SkwError::UnhandledCycle { packages }.into());
    }

    // Expand clusters back into entries.
    let mut slots: Vec<Option<BuildEntry>> = entries.into_iter().map(Some).collect();
    let mut ordered = Vec::with_capacity(slots.len());
    for pos in ordered_clusters {
        match cluster_ids[pos] {
            Cluster::Single(i) => {
                if let Some(entry) = slots[i].take() {
                    ordered.push(entry);
                }
            }
            Cluster::Group(g) => {
                for name in &groups[g].packages {
                    if let Some(&idx) = by_name.get(name.as_str()) {
                        if let Some(entry) = slots[idx].take() {
                            ordered.push(entry);
                        }
                    }
                }
            }
        }
    }
    Ok(ordered)
}
