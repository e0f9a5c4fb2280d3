//! Dependency order for persisting entity tables

use crate::melt::types::EntityHierarchy;
use std::collections::{HashMap, HashSet};

/// Order entity tables so each comes after the tables it depends on.
///
/// A parent depends on its children (per `hierarchy`); only names in
/// `tables` take part. Ties follow the order of `tables`. A cycle is broken
/// at the edge that closes it.
pub fn persistence_order(tables: &[&str], hierarchy: &EntityHierarchy) -> Vec<String> {
    let mut graph: HashMap<&str, Vec<&str>> = tables.iter().map(|t| (*t, Vec::new())).collect();

    for &child in tables {
        if let Some(deps) = hierarchy.get(child).and_then(|p| graph.get_mut(p.as_str())) {
            deps.push(child);
        }
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut order = Vec::with_capacity(tables.len());

    for &start in tables {
        if visited.contains(start) {
            continue;
        }

        // (node, index of the next dependency to look at)
        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
        let mut on_path: HashSet<&str> = HashSet::from([start]);

        while let Some((node, next)) = stack.last_mut() {
            let deps = &graph[*node];
            if let Some(&dep) = deps.get(*next) {
                *next += 1;
                if !visited.contains(dep) && !on_path.contains(dep) {
                    on_path.insert(dep);
                    stack.push((dep, 0));
                }
            } else {
                let node = *node;
                stack.pop();
                on_path.remove(node);
                visited.insert(node);
                order.push(node.to_string());
            }
        }
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hierarchy(pairs: &[(&str, &str)]) -> EntityHierarchy {
        pairs
            .iter()
            .map(|(child, parent)| (child.to_string(), parent.to_string()))
            .collect()
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_children_before_parents() {
        let h = hierarchy(&[("root_user", "root"), ("posts", "root_user"), ("tags", "root")]);
        let order = persistence_order(&["root", "root_user", "posts", "tags"], &h);

        assert_eq!(order.len(), 4);
        assert!(position(&order, "posts") < position(&order, "root_user"));
        assert!(position(&order, "root_user") < position(&order, "root"));
        assert!(position(&order, "tags") < position(&order, "root"));
        assert_eq!(order, vec!["posts", "root_user", "tags", "root"]);
    }

    #[test]
    fn test_unknown_tables_ignored() {
        let h = hierarchy(&[("gone", "root"), ("child", "missing_parent")]);
        let order = persistence_order(&["root", "child"], &h);
        assert_eq!(order, vec!["root", "child"]);
    }

    #[test]
    fn test_self_cycle() {
        let h = hierarchy(&[("children", "children"), ("children_x", "children")]);
        let order = persistence_order(&["children", "children_x"], &h);
        assert_eq!(order, vec!["children_x", "children"]);
    }

    #[test]
    fn test_long_chain() {
        let names: Vec<String> = (0..10_000).map(|i| format!("t{}", i)).collect();
        let h: EntityHierarchy = names
            .windows(2)
            .map(|w| (w[1].clone(), w[0].clone()))
            .collect();
        let tables: Vec<&str> = names.iter().map(String::as_str).collect();

        let order = persistence_order(&tables, &h);
        assert_eq!(order.first().unwrap(), "t9999");
        assert_eq!(order.last().unwrap(), "t0");
    }
}
