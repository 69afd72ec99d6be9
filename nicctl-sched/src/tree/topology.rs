use tracing::{debug, warn};

use nicctl_common::constants::{MAX_BRANCHES, MAX_TOPO_LAYERS};
use nicctl_wire::sched::{ElemType, SchedResources, TeidGroup, TopoBranch};

use super::{LayerMap, Node, NodeId, SchedTree, MAX_LAYERS};
use crate::{aq::Firmware, CommandTransport, SchedError};

impl SchedTree {
    /// Applies the layer count and per-layer properties firmware reported.
    pub(crate) fn apply_resources(&mut self, res: SchedResources) -> Result<(), SchedError> {
        let num_layers = res.generic.logical_levels;
        if num_layers == 0 || num_layers > u16::from(MAX_TOPO_LAYERS) || res.layers.len() != num_layers as usize {
            return Err(SchedError::Cfg("invalid scheduler layer count"));
        }

        self.max_children = [0; MAX_LAYERS];
        for (i, props) in res.layers.iter().enumerate().skip(1) {
            self.max_children[i - 1] = props.max_sibl_grp_sz;
        }
        self.layers = LayerMap::new(num_layers as u8, 0);
        self.layer_props = res.layers;
        Ok(())
    }

    /// Builds the tree from the default topology and strips the default nodes firmware
    /// created below the entry point. Everything added is freed again on error.
    pub(crate) fn init_port<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        branches: &[TopoBranch],
    ) -> Result<(), SchedError> {
        if branches.is_empty() || branches.len() > MAX_BRANCHES as usize {
            return Err(SchedError::Param("default topology branch count"));
        }
        if branches.iter().any(|b| b.elems.is_empty() || b.elems.len() > MAX_TOPO_LAYERS as usize) {
            return Err(SchedError::Param("default topology branch length"));
        }

        let res = self.build_port(fw, branches);
        if res.is_err() {
            if let Some(root) = self.root() {
                if let Err(e) = self.free_node(fw, root) {
                    warn!(err = %e, "failed to unwind partial topology");
                }
            }
        }
        res
    }

    fn build_port<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        branches: &[TopoBranch],
    ) -> Result<(), SchedError> {
        let first = &branches[0].elems;
        let entry = first
            .iter()
            .rposition(|e| e.data.elem_type == ElemType::EntryPoint as u8)
            .unwrap_or_default();
        self.layers = LayerMap::new(self.layers.num_layers(), entry as u8);

        // The root is the first element of every branch and is taken as reported
        self.insert(None, Node::new(first[0], 0, 0));

        for (tc, branch) in branches.iter().enumerate() {
            for (layer, elem) in branch.elems.iter().enumerate().skip(1) {
                let tc_hint = (elem.data.elem_type == ElemType::Tc as u8).then_some(tc as u8);
                self.add_node(fw, layer as u8, elem, tc_hint)?;
            }
        }
        debug!(branches = branches.len(), entry, nodes = self.len(), "default topology loaded");

        for tc in 0..branches.len() as u8 {
            if let Some(tc_node) = self.tc_node(tc) {
                self.rm_dflt_nodes(fw, tc_node)?;
            }
        }
        Ok(())
    }

    /// Removes the default queue leaf of a branch and the default nodes from the entry
    /// point down, keeping the root and TC nodes.
    fn rm_dflt_nodes<T: CommandTransport>(&mut self, fw: &Firmware<T>, tc_node: NodeId) -> Result<(), SchedError> {
        let mut node = tc_node;
        while let Some(child) = self[node].children.first().copied() {
            node = child;
        }
        if self[node].elem_type() == Some(ElemType::Leaf) {
            if let Some(parent) = self[node].parent {
                let group = TeidGroup { parent_teid: self[parent].teid(), teids: vec![self[node].teid()] };
                match fw.delete_elems(&group) {
                    Ok(_) => self.free_node(fw, node)?,
                    Err(e) => warn!(teid = self[node].teid(), err = %e, "failed to remove default leaf"),
                }
            }
        }

        let entry = self.layers.entry();
        let mut cur = Some(tc_node);
        while let Some(id) = cur {
            if self[id].layer >= entry && !self[id].is_fixed() {
                return self.free_node(fw, id);
            }
            cur = self[id].children.first().copied();
        }
        Ok(())
    }

    /// Frees the whole tree. Firmware removals are best effort.
    pub(crate) fn clear<T: CommandTransport>(&mut self, fw: &Firmware<T>) {
        if let Some(root) = self.root() {
            if let Err(e) = self.free_node(fw, root) {
                warn!(err = %e, "failed to free scheduler tree");
            }
        }
        *self = Self::new();
    }
}
