//! Stack-based traversals.
//!
//! Placement subtrees can be deep ladders, so nothing here recurses: each
//! traversal keeps an explicit stack of pending node ids.

use super::{NodeId, PhyloTree};

/// Depth-first preorder: a node, then each child subtree in file order.
#[derive(Debug)]
pub struct Preorder<'a> {
    tree: &'a PhyloTree,
    stack: Vec<NodeId>,
}

impl<'a> Preorder<'a> {
    pub(super) fn new(tree: &'a PhyloTree, start: NodeId) -> Self {
        Self {
            tree,
            stack: vec![start],
        }
    }
}

impl Iterator for Preorder<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        // Reversed so the first child is popped first.
        self.stack
            .extend(self.tree.node(id).children().iter().rev().copied());
        Some(id)
    }
}

/// Children-before-parent order, children in file order.
pub fn postorder(tree: &PhyloTree, start: NodeId) -> Vec<NodeId> {
    let mut order = Vec::with_capacity(tree.len());
    let mut stack = vec![(start, false)];
    while let Some((id, expanded)) = stack.pop() {
        if expanded {
            order.push(id);
            continue;
        }
        stack.push((id, true));
        stack.extend(tree.node(id).children().iter().rev().map(|&c| (c, false)));
    }
    order
}

/// Leaves in depth-first order.
pub fn leaves(tree: &PhyloTree, start: NodeId) -> Vec<NodeId> {
    Preorder::new(tree, start)
        .filter(|&id| tree.node(id).is_leaf())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_match_recursive_definitions() {
        let tree = PhyloTree::from_newick("((a,b)x,(c,(d,e)y)z)r;").unwrap();
        let names = |ids: Vec<NodeId>| -> Vec<String> {
            ids.into_iter()
                .map(|id| tree.node(id).name().unwrap_or("").to_string())
                .collect()
        };
        assert_eq!(
            names(tree.preorder().collect()),
            ["r", "x", "a", "b", "z", "c", "y", "d", "e"]
        );
        assert_eq!(
            names(postorder(&tree, tree.root())),
            ["a", "b", "x", "c", "d", "e", "y", "z", "r"]
        );
        assert_eq!(names(leaves(&tree, tree.root())), ["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn deep_ladder_does_not_overflow() {
        let depth = 50_000;
        let mut newick = "(".repeat(depth);
        newick.push_str("leaf");
        for i in 0..depth {
            newick.push_str(&format!(",s{})", i));
        }
        newick.push(';');
        let tree = PhyloTree::from_newick(&newick).unwrap();
        assert_eq!(tree.preorder().count(), 2 * depth + 1);
        assert_eq!(leaves(&tree, tree.root()).len(), depth + 1);
    }
}
