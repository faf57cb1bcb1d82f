#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Which dependency graph an edge belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    Task,
    Initiative,
}

impl DependencyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Initiative => "initiative",
        }
    }
}

/// If adding `subject -> depends_on` to `edges` (subject mapped to what it
/// depends on) would close a cycle, returns the cycle starting and ending at
/// `subject`.
pub fn find_cycle(
    edges: &BTreeMap<String, Vec<String>>,
    subject: &str,
    depends_on: &str,
) -> Option<Vec<String>> {
    if subject == depends_on {
        return Some(vec![subject.to_string(), subject.to_string()]);
    }

    let mut parent: BTreeMap<&str, &str> = BTreeMap::new();
    let mut seen: BTreeSet<&str> = BTreeSet::from([depends_on]);
    let mut queue: VecDeque<&str> = VecDeque::from([depends_on]);

    while let Some(node) = queue.pop_front() {
        for next in edges.get(node).into_iter().flatten() {
            let next = next.as_str();
            if !seen.insert(next) {
                continue;
            }
            parent.insert(next, node);
            if next == subject {
                let mut path = vec![subject.to_string()];
                let mut cursor = next;
                while let Some(prev) = parent.get(cursor) {
                    path.push(prev.to_string());
                    cursor = *prev;
                }
                path.reverse();
                // path runs depends_on .. subject; prefix the new edge's source.
                path.insert(0, subject.to_string());
                return Some(path);
            }
            queue.push_back(next);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &str)]) -> BTreeMap<String, Vec<String>> {
        let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (from, to) in edges {
            out.entry(from.to_string()).or_default().push(to.to_string());
        }
        out
    }

    #[test]
    fn detects_cycle_through_existing_chain() {
        let edges = graph(&[("B", "C"), ("C", "A")]);
        assert_eq!(
            find_cycle(&edges, "A", "B"),
            Some(vec![
                "A".to_string(),
                "B".to_string(),
                "C".to_string(),
                "A".to_string()
            ])
        );
    }

    #[test]
    fn acyclic_additions_pass() {
        let edges = graph(&[("B", "C"), ("A", "C")]);
        assert_eq!(find_cycle(&edges, "A", "B"), None);
        assert_eq!(find_cycle(&edges, "D", "A"), None);
    }

    #[test]
    fn self_edge_is_a_cycle() {
        assert!(find_cycle(&BTreeMap::new(), "A", "A").is_some());
    }
}
