//! Host copy of the firmware scheduler tree.
//!
//! Nodes live in an arena and refer to each other by [`NodeId`]. Besides the parent and
//! child links, every node below the traffic class layer is on a per (TC, layer) sibling
//! chain used to look up VSI and aggregator nodes and to spread new nodes over parents.
use std::ops::{Index, IndexMut};

use nicctl_common::constants::{MAX_TOPO_LAYERS, MAX_TRAFFIC_CLASS};
use nicctl_wire::sched::{ElemType, LayerProps, TxSchedElem, TxSchedElemData};

use crate::{binding::Owner, SchedError};

mod bw;
mod ops;
mod topology;

pub(crate) use ops::dflt_elem;

pub(crate) const MAX_LAYERS: usize = MAX_TOPO_LAYERS as usize;
const MAX_TCS: usize = MAX_TRAFFIC_CLASS as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct NodeId(u32);

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) info: TxSchedElemData,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    /// Next node on the same (TC, layer) chain.
    pub(crate) sibling: Option<NodeId>,
    pub(crate) layer: u8,
    pub(crate) tc_num: u8,
    pub(crate) owner: Owner,
    pub(crate) vsi_handle: Option<u16>,
    pub(crate) agg_id: u32,
    pub(crate) in_use: bool,
}

impl Node {
    fn new(info: TxSchedElemData, layer: u8, tc_num: u8) -> Self {
        Self {
            info,
            parent: None,
            children: Vec::new(),
            sibling: None,
            layer,
            tc_num,
            owner: Owner::Lan,
            vsi_handle: None,
            agg_id: 0,
            in_use: true,
        }
    }

    #[inline]
    pub(crate) fn teid(&self) -> u32 {
        self.info.node_teid
    }

    pub(crate) fn elem_type(&self) -> Option<ElemType> {
        self.info.data.elem_type().ok()
    }

    /// Root and traffic class nodes are created by firmware and never removed.
    pub(crate) fn is_fixed(&self) -> bool {
        matches!(self.elem_type(), Some(ElemType::RootPort | ElemType::Tc))
    }
}

/// Snapshot of one node, as returned by [`Scheduler::node`](crate::Scheduler::node).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub teid: u32,
    /// `None` for the root.
    pub parent_teid: Option<u32>,
    pub layer: u8,
    pub tc: u8,
    pub elem: TxSchedElem,
    pub children: Vec<u32>,
    pub owner: Owner,
    pub vsi_handle: Option<u16>,
    pub agg_id: u32,
    pub in_use: bool,
}

/// Roles of the scheduler layers, derived from the layer count and the entry point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerMap {
    num_layers: u8,
    entry: u8,
}

impl LayerMap {
    pub(crate) const fn new(num_layers: u8, entry: u8) -> Self {
        Self { num_layers, entry }
    }

    pub const fn num_layers(&self) -> u8 {
        self.num_layers
    }

    /// First layer software may add nodes to.
    pub const fn entry(&self) -> u8 {
        self.entry
    }

    /// Layer of the queue leaves.
    pub const fn leaf(&self) -> u8 {
        self.num_layers.saturating_sub(1)
    }

    pub const fn qgrp(&self) -> u8 {
        self.num_layers.saturating_sub(2)
    }

    pub const fn vsi(&self) -> u8 {
        match self.num_layers {
            9 => 6,
            5 => self.qgrp(),
            _ => self.entry,
        }
    }

    pub const fn agg(&self) -> u8 {
        match self.num_layers {
            9 => 4,
            _ => self.entry,
        }
    }
}

#[derive(Debug)]
pub(crate) struct SchedTree {
    slots: Vec<Option<Node>>,
    free: Vec<u32>,
    root: Option<NodeId>,
    sib_head: [[Option<NodeId>; MAX_LAYERS]; MAX_TCS],
    pub(crate) layers: LayerMap,
    /// Fan-out of a node on each layer.
    pub(crate) max_children: [u16; MAX_LAYERS],
    pub(crate) layer_props: Vec<LayerProps>,
}

impl Index<NodeId> for SchedTree {
    type Output = Node;

    /// Panics on a stale id. Ids are only held while the tree lock is.
    fn index(&self, id: NodeId) -> &Node {
        match self.slots.get(id.0 as usize) {
            Some(Some(node)) => node,
            _ => panic!("stale node id {id:?}"),
        }
    }
}

impl IndexMut<NodeId> for SchedTree {
    fn index_mut(&mut self, id: NodeId) -> &mut Node {
        match self.slots.get_mut(id.0 as usize) {
            Some(Some(node)) => node,
            _ => panic!("stale node id {id:?}"),
        }
    }
}

impl SchedTree {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: None,
            sib_head: [[None; MAX_LAYERS]; MAX_TCS],
            layers: LayerMap::default(),
            max_children: [0; MAX_LAYERS],
            layer_props: Vec::new(),
        }
    }

    #[inline]
    pub(crate) fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&Node> {
        self.slots.get(id.0 as usize)?.as_ref()
    }

    /// Like [`get`](Self::get), for ids handed in by a caller.
    pub(crate) fn node(&self, id: NodeId) -> Result<&Node, SchedError> {
        self.get(id).ok_or(SchedError::DoesNotExist)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = Some(node);
            return NodeId(idx);
        }
        self.slots.push(Some(node));
        NodeId(self.slots.len() as u32 - 1)
    }

    /// Links a new node under `parent` and, unless it is a root or TC node, at the end of
    /// its sibling chain.
    pub(crate) fn insert(&mut self, parent: Option<NodeId>, mut node: Node) -> NodeId {
        node.parent = parent;
        node.sibling = None;
        let id = self.alloc(node);

        match parent {
            Some(parent) => self[parent].children.push(id),
            None => self.root = Some(id),
        }
        if !self[id].is_fixed() {
            self.chain_append(id);
        }
        id
    }

    /// Unlinks and frees a single node. Its children must already be gone.
    pub(crate) fn release(&mut self, id: NodeId) -> Option<Node> {
        let node = self.get(id)?;
        let parent = node.parent;
        let (tc, layer) = (node.tc_num, node.layer);

        if let Some(parent) = parent {
            self[parent].children.retain(|c| *c != id);
        }
        self.chain_remove(id, tc, layer);
        if self.root == Some(id) {
            self.root = None;
        }

        let node = self.slots.get_mut(id.0 as usize)?.take();
        self.free.push(id.0);
        node
    }

    /// Re-parents `id` under `parent` in the local copy. Both must be in the same TC and
    /// `id` keeps its place on the sibling chain.
    pub(crate) fn reparent(&mut self, id: NodeId, parent: NodeId) -> Result<(), SchedError> {
        let parent_teid = self.node(parent)?.teid();
        if self.node(id)?.tc_num != self[parent].tc_num {
            return Err(SchedError::Param("parent in another traffic class"));
        }
        if let Some(old) = self[id].parent {
            self[old].children.retain(|c| *c != id);
        }
        self[parent].children.push(id);
        let node = &mut self[id];
        node.parent = Some(parent);
        node.info.parent_teid = parent_teid;
        Ok(())
    }

    fn chain_append(&mut self, id: NodeId) {
        let (tc, layer) = (self[id].tc_num as usize, self[id].layer as usize);
        if tc >= MAX_TCS || layer >= MAX_LAYERS {
            return;
        }
        let Some(mut last) = self.sib_head[tc][layer] else {
            self.sib_head[tc][layer] = Some(id);
            return;
        };
        while let Some(next) = self[last].sibling {
            last = next;
        }
        self[last].sibling = Some(id);
    }

    fn chain_remove(&mut self, id: NodeId, tc: u8, layer: u8) {
        let (tc, layer) = (tc as usize, layer as usize);
        if tc >= MAX_TCS || layer >= MAX_LAYERS {
            return;
        }
        let next = self[id].sibling;
        if self.sib_head[tc][layer] == Some(id) {
            self.sib_head[tc][layer] = next;
            return;
        }

        let mut cur = self.sib_head[tc][layer];
        while let Some(c) = cur {
            if self[c].sibling == Some(id) {
                self[c].sibling = next;
                return;
            }
            cur = self[c].sibling;
        }
    }

    /// First node of the (TC, layer) sibling chain.
    pub(crate) fn first_node(&self, tc: u8, layer: u8) -> Option<NodeId> {
        *self.sib_head.get(tc as usize)?.get(layer as usize)?
    }

    /// Walks the (TC, layer) sibling chain.
    pub(crate) fn chain(&self, tc: u8, layer: u8) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.first_node(tc, layer), move |id| self[*id].sibling)
    }

    pub(crate) fn tc_node(&self, tc: u8) -> Option<NodeId> {
        let root = self.root?;
        self[root]
            .children
            .iter()
            .copied()
            .find(|c| self[*c].tc_num == tc && self[*c].elem_type() == Some(ElemType::Tc))
    }

    pub(crate) fn vsi_node(&self, tc: u8, vsi_handle: u16) -> Option<NodeId> {
        self.chain(tc, self.layers.vsi()).find(|id| self[*id].vsi_handle == Some(vsi_handle))
    }

    pub(crate) fn agg_node(&self, tc: u8, agg_id: u32) -> Option<NodeId> {
        self.chain(tc, self.layers.agg()).find(|id| self[*id].agg_id == agg_id && self[*id].vsi_handle.is_none())
    }

    /// Pre-order walk of the subtree at `base`.
    pub(crate) fn subtree(&self, base: NodeId) -> Result<Vec<NodeId>, SchedError> {
        self.node(base)?;
        let mut out = Vec::new();
        let mut stack = vec![(base, 0u8)];
        while let Some((id, depth)) = stack.pop() {
            if depth >= MAX_TOPO_LAYERS {
                return Err(SchedError::DepthExceeded);
            }
            out.push(id);
            stack.extend(self[id].children.iter().rev().map(|c| (*c, depth + 1)));
        }
        Ok(out)
    }

    pub(crate) fn find_by_teid(&self, teid: u32) -> Option<NodeId> {
        self.find_by_teid_from(self.root?, teid)
    }

    /// Depth-bounded search for `teid` below `start`. Leaves aren't descended into.
    pub(crate) fn find_by_teid_from(&self, start: NodeId, teid: u32) -> Option<NodeId> {
        let mut stack = vec![(start, 0u8)];
        while let Some((id, depth)) = stack.pop() {
            let node = &self[id];
            if node.teid() == teid {
                return Some(id);
            }
            if depth + 1 >= MAX_TOPO_LAYERS || node.elem_type() == Some(ElemType::Leaf) {
                continue;
            }
            stack.extend(node.children.iter().rev().map(|c| (*c, depth + 1)));
        }
        None
    }

    /// Returns `true` if `node` is `base` or below it.
    pub(crate) fn in_subtree(&self, base: NodeId, node: NodeId) -> bool {
        let mut cur = Some(node);
        for _ in 0..=MAX_TOPO_LAYERS {
            match cur {
                Some(id) if id == base => return true,
                Some(id) => cur = self[id].parent,
                None => return false,
            }
        }
        false
    }

    /// Number of nodes a parent on `layer` may hold.
    #[inline]
    pub(crate) fn fan_out(&self, layer: u8) -> usize {
        self.max_children.get(layer as usize).copied().unwrap_or_default() as usize
    }

    pub(crate) fn has_room(&self, id: NodeId) -> bool {
        self[id].children.len() < self.fan_out(self[id].layer)
    }

    pub(crate) fn info(&self, id: NodeId) -> NodeInfo {
        let node = &self[id];
        NodeInfo {
            teid: node.teid(),
            parent_teid: node.parent.map(|p| self[p].teid()),
            layer: node.layer,
            tc: node.tc_num,
            elem: node.info.data,
            children: node.children.iter().map(|c| self[*c].teid()).collect(),
            owner: node.owner,
            vsi_handle: node.vsi_handle,
            agg_id: node.agg_id,
            in_use: node.in_use,
        }
    }

    /// Checks the structural invariants of the local copy: layers increase by one from
    /// parent to child, every child points back at its parent, sibling chains hold
    /// exactly the nodes of their (TC, layer) and fan-out limits hold.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        use std::collections::HashSet;

        let Some(root) = self.root else {
            assert_eq!(self.len(), 0);
            return;
        };
        let all = self.subtree(root).unwrap();
        assert_eq!(all.len(), self.len(), "unreachable nodes");

        let mut teids = HashSet::new();
        for id in &all {
            let node = &self[*id];
            assert!(teids.insert(node.teid()), "teid {} twice", node.teid());
            for c in &node.children {
                assert_eq!(self[*c].parent, Some(*id));
                assert_eq!(self[*c].layer, node.layer + 1);
                assert_eq!(self[*c].info.parent_teid, node.teid());
            }
            if node.layer > 0 && node.elem_type() != Some(ElemType::Leaf) {
                assert!(node.children.len() <= self.fan_out(node.layer));
            }
            if !node.is_fixed() {
                assert!(self.chain(node.tc_num, node.layer).any(|s| s == *id), "{} off chain", node.teid());
            }
        }
        for tc in 0..MAX_TRAFFIC_CLASS {
            for layer in 0..MAX_TOPO_LAYERS {
                for id in self.chain(tc, layer) {
                    assert_eq!((self[id].tc_num, self[id].layer), (tc, layer));
                }
            }
        }
    }
}
