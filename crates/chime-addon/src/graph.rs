//! Dependency ordering of addons.
//!
//! An addon depends on every addon it names in `hook-addons` or
//! `required-addons`. Dependencies always come before their dependants in
//! the sorted output. Names that do not match a descriptor in the input
//! (host plugins, absent addons) are ignored here.

use std::collections::{HashMap, HashSet};

use crate::descriptor::AddonDescriptor;
use crate::error::AddonError;

/// A descriptor plus the indices of the descriptors that depend on it.
#[derive(Debug)]
pub struct DependencyNode<'a> {
    pub descriptor: &'a AddonDescriptor,
    pub dependants: Vec<usize>,
}

/// Build one node per descriptor, dependants in input order.
pub fn build_graph(descriptors: &[AddonDescriptor]) -> Vec<DependencyNode<'_>> {
    let index: HashMap<&str, usize> = descriptors
        .iter()
        .enumerate()
        .map(|(i, d)| (d.name.as_str(), i))
        .collect();

    let mut nodes: Vec<DependencyNode<'_>> = descriptors
        .iter()
        .map(|descriptor| DependencyNode {
            descriptor,
            dependants: Vec::new(),
        })
        .collect();

    for (dependant, descriptor) in descriptors.iter().enumerate() {
        for dependency in descriptor.addon_dependencies() {
            if let Some(&target) = index.get(dependency.as_str()) {
                if !nodes[target].dependants.contains(&dependant) {
                    nodes[target].dependants.push(dependant);
                }
            }
        }
    }

    nodes
}

/// Order descriptors so every dependency precedes its dependants.
///
/// Each descriptor is emitted once, then its dependants are emitted after
/// it; a dependant already emitted earlier is moved behind. A descriptor
/// reached again while its own dependants are being emitted closes a cycle
/// and fails with [`AddonError::DependencyCycle`].
///
/// Emitting a node always leaves the same run of nodes at the end of the
/// output, whatever came before, so that run is computed once per node.
pub fn sort_descriptors(descriptors: &[AddonDescriptor]) -> Result<Vec<AddonDescriptor>, AddonError> {
    let nodes = build_graph(descriptors);
    let mut settled: Vec<Option<Vec<usize>>> = vec![None; nodes.len()];
    let mut order: Vec<usize> = Vec::with_capacity(nodes.len());
    let mut path: Vec<usize> = Vec::new();

    for node in 0..nodes.len() {
        if !order.contains(&node) {
            let run = emit(node, &nodes, &mut settled, &mut path)?;
            append_moving(&mut order, &run);
        }
    }

    Ok(order.into_iter().map(|i| descriptors[i].clone()).collect())
}

/// The nodes emitting `node` places at the end of the output, in order.
fn emit(
    node: usize,
    nodes: &[DependencyNode<'_>],
    settled: &mut [Option<Vec<usize>>],
    path: &mut Vec<usize>,
) -> Result<Vec<usize>, AddonError> {
    if let Some(start) = path.iter().position(|&n| n == node) {
        let mut names: Vec<&str> = path[start..]
            .iter()
            .map(|&n| nodes[n].descriptor.name.as_str())
            .collect();
        names.push(nodes[node].descriptor.name.as_str());
        // `path` runs dependency -> dependant; report it as "depends on" links.
        names.reverse();
        return Err(AddonError::DependencyCycle(names.join(" -> ")));
    }
    if let Some(run) = &settled[node] {
        return Ok(run.clone());
    }

    path.push(node);
    let mut run = vec![node];
    for &dependant in &nodes[node].dependants {
        let tail = emit(dependant, nodes, settled, path)?;
        append_moving(&mut run, &tail);
    }
    path.pop();

    settled[node] = Some(run.clone());
    Ok(run)
}

/// Append `tail`, removing its nodes from wherever they sat before.
fn append_moving(order: &mut Vec<usize>, tail: &[usize]) {
    let moved: HashSet<usize> = tail.iter().copied().collect();
    order.retain(|n| !moved.contains(n));
    order.extend_from_slice(tail);
}

/// Names of every addon taking part in a cycle, in input order.
pub fn cyclic_addons(descriptors: &[AddonDescriptor]) -> Vec<String> {
    let nodes = build_graph(descriptors);
    let reaches = |from: usize, to: usize| -> bool {
        let mut stack = vec![from];
        let mut seen = vec![false; nodes.len()];
        while let Some(n) = stack.pop() {
            for &next in &nodes[n].dependants {
                if next == to {
                    return true;
                }
                if !seen[next] {
                    seen[next] = true;
                    stack.push(next);
                }
            }
        }
        false
    };

    (0..nodes.len())
        .filter(|&n| reaches(n, n))
        .map(|n| descriptors[n].name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str, hooks: &[&str], requires: &[&str]) -> AddonDescriptor {
        let mut toml = format!("name = \"{name}\"\nmain = \"a.Main\"\nauthor = \"me\"\n");
        if !hooks.is_empty() {
            toml.push_str(&format!(
                "start-time = \"HOOK_ADDONS\"\nhook-addons = \"{}\"\n",
                hooks.join(", ")
            ));
        }
        if !requires.is_empty() {
            toml.push_str(&format!("required-addons = \"{}\"\n", requires.join(", ")));
        }
        AddonDescriptor::parse(&toml).unwrap()
    }

    fn names(sorted: &[AddonDescriptor]) -> Vec<&str> {
        sorted.iter().map(|d| d.name.as_str()).collect()
    }

    fn assert_dependencies_first(sorted: &[AddonDescriptor]) {
        for (i, d) in sorted.iter().enumerate() {
            for dep in d.addon_dependencies() {
                if let Some(j) = sorted.iter().position(|o| o.name == dep) {
                    assert!(j < i, "{dep} must precede {}", d.name);
                }
            }
        }
    }

    #[test]
    fn test_independent_addons_keep_input_order() {
        let input = vec![
            descriptor("Alpha", &[], &[]),
            descriptor("Bravo", &[], &[]),
            descriptor("Charlie", &[], &[]),
        ];
        assert_eq!(
            names(&sort_descriptors(&input).unwrap()),
            vec!["Alpha", "Bravo", "Charlie"]
        );
    }

    #[test]
    fn test_hook_target_precedes_hooker() {
        let input = vec![descriptor("Bravo", &["Alpha"], &[]), descriptor("Alpha", &[], &[])];
        assert_eq!(names(&sort_descriptors(&input).unwrap()), vec!["Alpha", "Bravo"]);
    }

    #[test]
    fn test_requirement_chain() {
        let input = vec![
            descriptor("Delta", &[], &["Charlie"]),
            descriptor("Charlie", &[], &["Bravo"]),
            descriptor("Bravo", &[], &["Alpha"]),
            descriptor("Alpha", &[], &[]),
        ];
        let sorted = sort_descriptors(&input).unwrap();
        assert_eq!(names(&sorted), vec!["Alpha", "Bravo", "Charlie", "Delta"]);
    }

    #[test]
    fn test_diamond() {
        let input = vec![
            descriptor("Delta", &["Bravo"], &["Charlie"]),
            descriptor("Bravo", &[], &["Alpha"]),
            descriptor("Charlie", &["Alpha"], &[]),
            descriptor("Alpha", &[], &[]),
            descriptor("Echo", &[], &[]),
        ];
        let sorted = sort_descriptors(&input).unwrap();
        assert_eq!(sorted.len(), 5);
        assert_dependencies_first(&sorted);
    }

    #[test]
    fn test_unknown_dependencies_ignored() {
        let input = vec![descriptor("Bravo", &["Nowhere"], &["Ghost Addon"])];
        assert_eq!(names(&sort_descriptors(&input).unwrap()), vec!["Bravo"]);
    }

    #[test]
    fn test_two_node_cycle_detected() {
        let input = vec![descriptor("Alpha", &["Bravo"], &[]), descriptor("Bravo", &["Alpha"], &[])];
        let err = sort_descriptors(&input).unwrap_err();
        assert!(matches!(err, AddonError::DependencyCycle(_)));
        let msg = err.to_string();
        assert!(msg.contains("Alpha") && msg.contains("Bravo"));
    }

    #[test]
    fn test_cyclic_addons_lists_only_cycle_members() {
        let input = vec![
            descriptor("Alpha", &[], &[]),
            descriptor("Bravo", &[], &["Charlie", "Alpha"]),
            descriptor("Charlie", &[], &["Bravo"]),
            descriptor("Delta", &[], &["Bravo"]),
        ];
        assert!(sort_descriptors(&input).is_err());
        assert_eq!(cyclic_addons(&input), vec!["Bravo", "Charlie"]);

        let rest: Vec<_> = input
            .into_iter()
            .filter(|d| d.name == "Alpha" || d.name == "Delta")
            .collect();
        assert!(cyclic_addons(&rest).is_empty());
        assert_dependencies_first(&sort_descriptors(&rest).unwrap());
    }

    #[test]
    fn test_dependants_recorded() {
        let input = vec![
            descriptor("Alpha", &[], &[]),
            descriptor("Bravo", &["Alpha"], &["Alpha"]),
            descriptor("Charlie", &[], &["Alpha"]),
        ];
        let graph = build_graph(&input);
        assert_eq!(graph[0].dependants, vec![1, 2]);
        assert!(graph[1].dependants.is_empty());
    }

    #[test]
    fn test_reverse_input_large_chain() {
        let names_in: Vec<String> = (0..20).map(|i| format!("Addon {i}")).collect();
        let input: Vec<AddonDescriptor> = names_in
            .iter()
            .enumerate()
            .rev()
            .map(|(i, name)| {
                if i == 0 {
                    descriptor(name, &[], &[])
                } else {
                    descriptor(name, &[], &[names_in[i - 1].as_str()])
                }
            })
            .collect();
        let sorted = sort_descriptors(&input).unwrap();
        assert_eq!(sorted[0].name, "Addon 0");
        assert_eq!(sorted[19].name, "Addon 19");
        assert_dependencies_first(&sorted);
    }

    #[test]
    fn test_dense_graph_sorts_quickly() {
        let names_in: Vec<String> = (0..60).map(|i| format!("Addon {i}")).collect();
        let input: Vec<AddonDescriptor> = names_in
            .iter()
            .enumerate()
            .rev()
            .map(|(i, name)| {
                let earlier: Vec<&str> = names_in[..i].iter().map(String::as_str).collect();
                descriptor(name, &[], &earlier)
            })
            .collect();

        let started = std::time::Instant::now();
        let sorted = sort_descriptors(&input).unwrap();
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        assert_eq!(names(&sorted), names_in.iter().map(String::as_str).collect::<Vec<_>>());
    }
}
