//! Arena node of a mutation-annotated tree.

use crate::genomics::Snv;

/// Index of a node inside the [`PhyloTree`](super::PhyloTree) that created it.
///
/// Ids are only handed out by the tree they belong to and are never valid in
/// another tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(super) usize);

impl NodeId {
    /// Position in the arena (also the order nodes were parsed in).
    pub fn index(self) -> usize {
        self.0
    }
}

/// Tree node: optional name and branch length, links, and the mutation list
/// on the branch above it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhyloNode {
    pub(super) name: Option<String>,
    pub(super) branch_length: Option<f64>,
    pub(super) parent: Option<NodeId>,
    pub(super) children: Vec<NodeId>,
    pub(super) mutations: Option<Vec<Snv>>,
}

impl PhyloNode {
    /// Node label, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Branch length to the parent, if given.
    pub fn branch_length(&self) -> Option<f64> {
        self.branch_length
    }

    /// Parent node; `None` for the root.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in file order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Returns `true` for nodes without children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Mutations on the branch above this node; empty until assigned.
    pub fn mutations(&self) -> &[Snv] {
        self.mutations.as_deref().unwrap_or(&[])
    }

    /// Returns `true` once a mutation list has been attached.
    pub fn has_mutations(&self) -> bool {
        self.mutations.is_some()
    }

    /// Set the mutation list. A node is annotated at most once; a second
    /// assignment hands the list back.
    pub(super) fn assign_mutations(&mut self, snvs: Vec<Snv>) -> Result<(), Vec<Snv>> {
        if self.mutations.is_some() {
            return Err(snvs);
        }
        self.mutations = Some(snvs);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutations_assign_once() {
        let mut node = PhyloNode::default();
        assert!(node.mutations().is_empty());
        assert!(!node.has_mutations());
        let snv: Snv = "C241T".parse().unwrap();
        node.assign_mutations(vec![snv]).unwrap();
        assert_eq!(node.mutations(), &[snv]);
        assert_eq!(node.assign_mutations(Vec::new()), Err(Vec::new()));
        assert_eq!(node.mutations().len(), 1);
    }
}
