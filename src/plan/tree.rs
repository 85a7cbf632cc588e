//! The plan tree: an index-addressed arena of plan nodes plus the
//! tree-surgery primitives every rewrite rule goes through.
//!
//! Nodes are referenced by stable integer handles rather than pointers, so
//! rules can keep handles across mutations. Child ordering is carried on the
//! edges (a join's left child is slot 0, its right child slot 1); every
//! splice primitive updates exactly the parent/child links it touches and
//! preserves the single-parent invariant.

use anyhow::anyhow;
use enumset::EnumSet;
use itertools::Itertools;
use petgraph::prelude::{Direction, NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use petgraph::Directed;
use prettytable::Table;
use smallvec::SmallVec;

use crate::error::OptResult;
use crate::invariant;
use crate::plan::node::{NodeKind, PlanNodeData};

pub type PlanNodeId = NodeIndex<u32>;

type TreeGraph = StableGraph<PlanNodeData, usize, Directed, u32>;

/// Depth-first visit order for plan tree searches.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Traversal {
    PreOrder,
    PostOrder,
}

/// A query plan: a single-rooted tree of plan nodes, mutated in place by the
/// optimizer rules.
#[derive(Clone, Debug)]
pub struct PlanTree {
    graph: TreeGraph,
    root: PlanNodeId,
}

impl PlanTree {
    pub fn with_root(data: PlanNodeData) -> Self {
        let mut graph = TreeGraph::default();
        let root = graph.add_node(data);
        Self { graph, root }
    }

    pub fn root(&self) -> PlanNodeId {
        self.root
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn contains(&self, id: PlanNodeId) -> bool {
        self.graph.contains_node(id)
    }

    pub fn node(&self, id: PlanNodeId) -> &PlanNodeData {
        &self.graph[id]
    }

    pub fn node_mut(&mut self, id: PlanNodeId) -> &mut PlanNodeData {
        &mut self.graph[id]
    }

    pub fn kind(&self, id: PlanNodeId) -> NodeKind {
        self.graph[id].kind
    }

    pub fn parent(&self, id: PlanNodeId) -> Option<PlanNodeId> {
        self.graph
            .neighbors_directed(id, Direction::Incoming)
            .next()
    }

    /// The node's children in order (a join's left child first).
    pub fn children(&self, id: PlanNodeId) -> SmallVec<[PlanNodeId; 2]> {
        let mut slots: SmallVec<[(usize, PlanNodeId); 2]> = self
            .graph
            .edges_directed(id, Direction::Outgoing)
            .map(|e| (*e.weight(), e.target()))
            .collect();
        slots.sort_by_key(|(slot, _)| *slot);
        slots.into_iter().map(|(_, child)| child).collect()
    }

    pub fn child_count(&self, id: PlanNodeId) -> usize {
        self.graph
            .edges_directed(id, Direction::Outgoing)
            .count()
    }

    pub fn first_child(&self, id: PlanNodeId) -> Option<PlanNodeId> {
        self.children(id).first().copied()
    }

    pub fn last_child(&self, id: PlanNodeId) -> Option<PlanNodeId> {
        self.children(id).last().copied()
    }

    /// The node's sole child, if it has exactly one.
    pub fn only_child(&self, id: PlanNodeId) -> Option<PlanNodeId> {
        let children = self.children(id);
        match children.as_slice() {
            [child] => Some(*child),
            _ => None,
        }
    }

    /// Create a new node and attach it as the last child of `parent`.
    pub fn add_child(&mut self, parent: PlanNodeId, data: PlanNodeData) -> PlanNodeId {
        let slot = self.child_count(parent);
        let child = self.graph.add_node(data);
        self.graph.add_edge(parent, child, slot);
        child
    }

    /// Create a new node with no parent; it must subsequently be attached or
    /// spliced in.
    pub fn add_detached(&mut self, data: PlanNodeData) -> PlanNodeId {
        self.graph.add_node(data)
    }

    /// Attach an existing, detached node as the last child of `parent`.
    pub fn attach_child(&mut self, parent: PlanNodeId, child: PlanNodeId) -> OptResult<()> {
        invariant!(
            self.parent(child).is_none(),
            "cannot attach node {:?}: it already has a parent",
            child
        );
        invariant!(
            !self.is_below(parent, child),
            "cannot attach node {:?} below its own descendant {:?}",
            child,
            parent
        );
        let slot = self.child_count(parent);
        self.graph.add_edge(parent, child, slot);
        Ok(())
    }

    /// Detach `id` (and the subtree under it) from its parent, returning the
    /// former parent. The node stays in the arena for re-attachment.
    pub fn remove_from_parent(&mut self, id: PlanNodeId) -> Option<PlanNodeId> {
        let edge = self
            .graph
            .edges_directed(id, Direction::Incoming)
            .map(|e| (e.id(), e.source(), *e.weight()))
            .next();
        let (edge_id, parent, slot) = edge?;
        self.graph.remove_edge(edge_id);
        self.close_slot_gap(parent, slot);
        Some(parent)
    }

    /// After removing the child at `slot`, shift the later siblings down so
    /// slots stay dense.
    fn close_slot_gap(&mut self, parent: PlanNodeId, removed_slot: usize) {
        let later: Vec<_> = self
            .graph
            .edges_directed(parent, Direction::Outgoing)
            .filter(|e| *e.weight() > removed_slot)
            .map(|e| e.id())
            .collect();
        for edge_id in later {
            if let Some(weight) = self.graph.edge_weight_mut(edge_id) {
                *weight -= 1;
            }
        }
    }

    /// Splice `new_parent` into the tree immediately above `existing`:
    /// `new_parent` takes `existing`'s place under its former parent (or
    /// becomes the tree root), and `existing` becomes `new_parent`'s last
    /// child. `new_parent` must itself be detached.
    pub fn insert_as_parent(
        &mut self,
        existing: PlanNodeId,
        new_parent: PlanNodeId,
    ) -> OptResult<()> {
        invariant!(
            self.parent(new_parent).is_none(),
            "new parent {:?} must be detached before splicing",
            new_parent
        );
        invariant!(
            !self.is_below(existing, new_parent),
            "cannot splice node {:?} above its own ancestor",
            new_parent
        );
        let incoming = self
            .graph
            .edges_directed(existing, Direction::Incoming)
            .map(|e| (e.id(), e.source(), *e.weight()))
            .next();
        if let Some((edge_id, parent, slot)) = incoming {
            self.graph.remove_edge(edge_id);
            self.graph.add_edge(parent, new_parent, slot);
        } else {
            debug_assert_eq!(existing, self.root);
            self.root = new_parent;
        }
        let slot = self.child_count(new_parent);
        self.graph.add_edge(new_parent, existing, slot);
        Ok(())
    }

    /// Create a node of the given data and splice it in as `existing`'s new
    /// parent, returning the new node's handle.
    pub fn insert_new_as_parent(
        &mut self,
        existing: PlanNodeId,
        data: PlanNodeData,
    ) -> OptResult<PlanNodeId> {
        let new_parent = self.graph.add_node(data);
        self.insert_as_parent(existing, new_parent)?;
        Ok(new_parent)
    }

    /// Remove `id` from the tree, reconnecting its sole child to its former
    /// parent (or making the child the new root). The node is destroyed.
    ///
    /// It is a fatal invariant violation for the node to have any child
    /// count other than one.
    pub fn extract_from_parent(&mut self, id: PlanNodeId) -> OptResult<PlanNodeId> {
        let children = self.children(id);
        invariant!(
            children.len() == 1,
            "cannot extract node {:?} with {} children; exactly one is required",
            id,
            children.len()
        );
        let child = children[0];
        let incoming = self
            .graph
            .edges_directed(id, Direction::Incoming)
            .map(|e| (e.source(), *e.weight()))
            .next();
        self.graph.remove_node(id);
        match incoming {
            Some((parent, slot)) => {
                self.graph.add_edge(parent, child, slot);
            }
            None => {
                self.root = child;
            }
        }
        Ok(child)
    }

    /// Remove `id` and every node below it from the arena.
    pub fn remove_subtree(&mut self, id: PlanNodeId) {
        self.remove_from_parent(id);
        let doomed = self.find_all_at_or_below(id, EnumSet::all(), Traversal::PostOrder);
        for node in doomed {
            self.graph.remove_node(node);
        }
    }

    /// Replace `existing` (and the subtree under it) with the detached node
    /// `replacement`, which takes its slot under the former parent.
    pub fn replace_subtree(
        &mut self,
        existing: PlanNodeId,
        replacement: PlanNodeId,
    ) -> OptResult<()> {
        invariant!(
            self.parent(replacement).is_none(),
            "replacement node {:?} must be detached",
            replacement
        );
        let incoming = self
            .graph
            .edges_directed(existing, Direction::Incoming)
            .map(|e| (e.source(), *e.weight()))
            .next();
        self.remove_subtree(existing);
        match incoming {
            Some((parent, slot)) => {
                self.graph.add_edge(parent, replacement, slot);
            }
            None => {
                self.root = replacement;
            }
        }
        Ok(())
    }

    /// Swap the order of a node's two children; used to normalize outer
    /// joins.
    pub fn swap_children(&mut self, id: PlanNodeId) -> OptResult<()> {
        let edges: Vec<_> = self
            .graph
            .edges_directed(id, Direction::Outgoing)
            .map(|e| e.id())
            .collect();
        invariant!(
            edges.len() == 2,
            "cannot swap children of node {:?} with {} children",
            id,
            edges.len()
        );
        for edge_id in edges {
            let weight = self
                .graph
                .edge_weight_mut(edge_id)
                .ok_or_else(|| anyhow!("edge vanished while swapping children"))?;
            *weight = 1 - *weight;
        }
        Ok(())
    }

    /// Depth-first search below `start` (inclusive) for nodes of the given
    /// kinds, in the caller's chosen order.
    pub fn find_all_at_or_below(
        &self,
        start: PlanNodeId,
        kinds: EnumSet<NodeKind>,
        order: Traversal,
    ) -> Vec<PlanNodeId> {
        let mut found = Vec::new();
        self.collect(start, kinds, order, &mut found);
        found
    }

    fn collect(
        &self,
        id: PlanNodeId,
        kinds: EnumSet<NodeKind>,
        order: Traversal,
        found: &mut Vec<PlanNodeId>,
    ) {
        if order == Traversal::PreOrder && kinds.contains(self.kind(id)) {
            found.push(id);
        }
        for child in self.children(id) {
            self.collect(child, kinds, order, found);
        }
        if order == Traversal::PostOrder && kinds.contains(self.kind(id)) {
            found.push(id);
        }
    }

    /// The first node of the given kinds at or below `start`, or `None`.
    pub fn find_first_at_or_below(
        &self,
        start: PlanNodeId,
        kinds: EnumSet<NodeKind>,
        order: Traversal,
    ) -> Option<PlanNodeId> {
        self.find_all_at_or_below(start, kinds, order)
            .into_iter()
            .next()
    }

    /// Every node of the tree in pre-order.
    pub fn nodes(&self) -> Vec<PlanNodeId> {
        self.find_all_at_or_below(self.root, EnumSet::all(), Traversal::PreOrder)
    }

    /// True when `possible_ancestor` lies on the parent chain of `id`
    /// (inclusive of `id` itself).
    pub fn is_below(&self, id: PlanNodeId, possible_ancestor: PlanNodeId) -> bool {
        let mut node = Some(id);
        while let Some(n) = node {
            if n == possible_ancestor {
                return true;
            }
            node = self.parent(n);
        }
        false
    }

    pub fn is_above(&self, id: PlanNodeId, possible_descendant: PlanNodeId) -> bool {
        self.is_below(possible_descendant, id)
    }

    pub fn has_ancestor_of_type(&self, id: PlanNodeId, kinds: EnumSet<NodeKind>) -> bool {
        let mut node = self.parent(id);
        while let Some(n) = node {
            if kinds.contains(self.kind(n)) {
                return true;
            }
            node = self.parent(n);
        }
        false
    }

    /// The nodes strictly between `ancestor` and `descendant`, ordered from
    /// the one just under `ancestor` down to the one just above
    /// `descendant`. `None` when the two nodes are not on one ancestry axis.
    pub fn path_between(
        &self,
        ancestor: PlanNodeId,
        descendant: PlanNodeId,
    ) -> Option<Vec<PlanNodeId>> {
        let mut path = Vec::new();
        let mut node = self.parent(descendant)?;
        while node != ancestor {
            path.push(node);
            node = self.parent(node)?;
        }
        path.reverse();
        Some(path)
    }

    /// Deep-copy the subtree rooted at `from` in `source` into this arena,
    /// returning the detached copy's root. Used to instantiate view plans.
    pub fn graft_from(&mut self, source: &PlanTree, from: PlanNodeId) -> PlanNodeId {
        let copy = self.graph.add_node(source.node(from).clone());
        for (slot, child) in source.children(from).into_iter().enumerate() {
            let child_copy = self.graft_from(source, child);
            self.graph.add_edge(copy, child_copy, slot);
        }
        copy
    }

    fn subtree_eq(&self, id: PlanNodeId, other: &PlanTree, other_id: PlanNodeId) -> bool {
        if self.node(id) != other.node(other_id) {
            return false;
        }
        let ours = self.children(id);
        let theirs = other.children(other_id);
        ours.len() == theirs.len()
            && ours
                .iter()
                .zip(theirs.iter())
                .all(|(a, b)| self.subtree_eq(*a, other, *b))
    }

    /// Render the tree as an indented table for logs and debugging.
    pub fn explain(&self) -> String {
        let mut table = Table::new();
        table.set_titles(row!["Node", "Selectors", "Properties"]);
        self.explain_node(self.root, 0, &mut table);
        table.to_string()
    }

    fn explain_node(&self, id: PlanNodeId, depth: usize, table: &mut Table) {
        let data = self.node(id);
        let name = format!("{}{}", "  ".repeat(depth), data.kind);
        let selectors = data.selectors().iter().map(|s| s.as_str()).join(", ");
        let props = data
            .prop_keys()
            .map(|k| format!("{}={:?}", k, data.prop(k).unwrap()))
            .join("; ");
        table.add_row(row![name, selectors, props]);
        for child in self.children(id) {
            self.explain_node(child, depth + 1, table);
        }
    }
}

/// Structural equality from the roots down; node handles are ignored.
impl PartialEq for PlanTree {
    fn eq(&self, other: &Self) -> bool {
        self.subtree_eq(self.root, other, other.root)
    }
}
