//! A scripted firmware model for tests.
//!
//! [`FakeFirmware`] keeps its own copy of the scheduler tree and the rate limiter
//! profiles and answers scheduler commands the way the device firmware does. It can be
//! used directly as a [`CommandTransport`], or as the [`CommandHandler`] of a
//! [`SimDevice`](nicctl_transport::testing::SimDevice) behind a real control queue.
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::trace;

use nicctl_common::constants::{AQ_MAX_BUF_LEN, MAX_BRANCHES, MAX_TOPO_LAYERS};
use nicctl_transport::{testing::CommandHandler, CtlqError};
use nicctl_wire::{
    decode_list,
    rl::{profile_cmd, RlProfileElem, RlType, PROFILE_INVAL},
    sched::{
        elem_cmd, get_teids, node_attr_cmd, node_to_root_cmd, topo_cmd, valid, ElemGroup, ElemInfoBw,
        ElemType, GenericSchedProps, LayerProps, MoveGroup, NodeAttr, SchedResources, TeidGroup, TopoBranch,
        TxSchedElem, TxSchedElemData, ELEM_FLAG_SUSPEND,
    },
    txq::{AddTxqGroup, DisTxqGroup},
    Descriptor, Opcode, Payload, ReturnCode,
};

use crate::CommandTransport;

/// Parent TEID reported for the root element.
const ROOT_PARENT: u32 = 0xFFFF_FFFF;
const DFLT_SIBL_GRP_SZ: u16 = 8;
const DFLT_PROFILES: u16 = 64;

/// Layer layout and resources reported by a [`FakeFirmware`].
#[derive(Debug, Clone)]
pub struct FwTopology {
    num_tcs: u8,
    layers: Vec<LayerProps>,
}

impl FwTopology {
    /// Nine layers: root, TC, entry point, five generic layers and the queue leaves.
    pub fn nine_layer(num_tcs: u8) -> Self {
        Self::with_layers(MAX_TOPO_LAYERS, num_tcs)
    }

    /// Five layers: root, TC, entry point, one generic layer and the queue leaves.
    pub fn five_layer(num_tcs: u8) -> Self {
        Self::with_layers(5, num_tcs)
    }

    fn with_layers(num_layers: u8, num_tcs: u8) -> Self {
        let layers = (0..num_layers)
            .map(|i| LayerProps {
                logical_layer: i,
                chunk_size: 1,
                max_device_nodes: 1024,
                max_pf_nodes: 256,
                max_sibl_grp_sz: DFLT_SIBL_GRP_SZ,
                max_cir_rl_profiles: DFLT_PROFILES,
                max_eir_rl_profiles: DFLT_PROFILES,
                max_srl_profiles: DFLT_PROFILES,
            })
            .collect();
        Self { num_tcs: num_tcs.clamp(1, MAX_BRANCHES), layers }
    }

    /// Limits the children of nodes on `layer`.
    pub fn with_max_children(mut self, layer: u8, max: u16) -> Self {
        if let Some(props) = self.layers.get_mut(layer as usize + 1) {
            props.max_sibl_grp_sz = max;
        }
        self
    }

    /// Sets the number of profiles of each type firmware accepts on `layer`.
    pub fn with_rl_profiles(mut self, layer: u8, cir: u16, eir: u16, srl: u16) -> Self {
        if let Some(props) = self.layers.get_mut(layer as usize) {
            props.max_cir_rl_profiles = cir;
            props.max_eir_rl_profiles = eir;
            props.max_srl_profiles = srl;
        }
        self
    }

    fn num_layers(&self) -> u8 {
        self.layers.len() as u8
    }

    fn fan_out(&self, layer: u8) -> usize {
        self.layers.get(layer as usize + 1).map_or(0, |p| p.max_sibl_grp_sz as usize)
    }

    fn max_profiles(&self, layer: u8, rl_type: RlType) -> u16 {
        self.layers.get(layer as usize).map_or(0, |p| match rl_type {
            RlType::Cir => p.max_cir_rl_profiles,
            RlType::Eir => p.max_eir_rl_profiles,
            RlType::Srl => p.max_srl_profiles,
        })
    }

    fn resources(&self) -> SchedResources {
        SchedResources {
            generic: GenericSchedProps {
                phys_levels: self.num_layers() as u16,
                logical_levels: self.num_layers() as u16,
                ..Default::default()
            },
            layers: self.layers.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FwNode {
    elem: TxSchedElemData,
    layer: u8,
    txq_id: Option<u16>,
}

#[derive(Debug)]
struct FwModel {
    topo: FwTopology,
    nodes: FxHashMap<u32, FwNode>,
    next_teid: u32,
    root: u32,
    tcs: Vec<u32>,
    profiles: Vec<RlProfileElem>,
    next_profile_id: u16,
    removed_profiles: usize,
    node_attrs: FxHashMap<u32, NodeAttr>,
    /// Opcode, matching commands still to let through, code to fail with.
    failures: Vec<(Opcode, usize, ReturnCode)>,
    commands: FxHashMap<Opcode, usize>,
    last_cfg: Option<TxSchedElemData>,
}

fn elem_data(elem_type: ElemType) -> TxSchedElem {
    let bw = ElemInfoBw { profile_idx: 0, bw_alloc: 4 };
    TxSchedElem {
        elem_type: elem_type as u8,
        valid_sections: valid::GENERIC | valid::CIR | valid::EIR,
        cir: bw,
        eir: bw,
        ..Default::default()
    }
}

impl FwModel {
    fn new(topo: FwTopology) -> Self {
        let mut model = Self {
            topo,
            nodes: FxHashMap::default(),
            next_teid: 1,
            root: 0,
            tcs: Vec::new(),
            profiles: Vec::new(),
            next_profile_id: 1,
            removed_profiles: 0,
            node_attrs: FxHashMap::default(),
            failures: Vec::new(),
            commands: FxHashMap::default(),
            last_cfg: None,
        };

        model.root = model.insert(ROOT_PARENT, 0, elem_data(ElemType::RootPort));
        for _ in 0..model.topo.num_tcs {
            let tc = model.insert(model.root, 1, elem_data(ElemType::Tc));
            model.tcs.push(tc);
            model.add_dflt_chain(tc);
        }
        model
    }

    fn insert(&mut self, parent_teid: u32, layer: u8, data: TxSchedElem) -> u32 {
        let teid = self.next_teid;
        self.next_teid += 1;
        let elem = TxSchedElemData { parent_teid, node_teid: teid, data };
        self.nodes.insert(teid, FwNode { elem, layer, txq_id: None });
        teid
    }

    /// Creates the default nodes below a TC: entry point, generic layers and one leaf.
    fn add_dflt_chain(&mut self, tc: u32) {
        let last = self.topo.num_layers() - 1;
        let mut parent = tc;
        for layer in 2..=last {
            let elem_type = match layer {
                2 => ElemType::EntryPoint,
                l if l == last => ElemType::Leaf,
                _ => ElemType::SeGeneric,
            };
            parent = self.insert(parent, layer, elem_data(elem_type));
        }
    }

    fn children(&self, teid: u32) -> impl Iterator<Item = &FwNode> + '_ {
        self.nodes.values().filter(move |n| n.elem.parent_teid == teid)
    }

    fn first_child(&self, teid: u32) -> Option<u32> {
        self.children(teid).map(|n| n.elem.node_teid).min()
    }

    fn has_room(&self, parent: u32, extra: usize) -> bool {
        self.nodes
            .get(&parent)
            .map_or(false, |p| self.children(parent).count() + extra <= self.topo.fan_out(p.layer))
    }

    /// Removes a node and everything below it.
    fn remove(&mut self, teid: u32) {
        let mut stack = vec![teid];
        while let Some(teid) = stack.pop() {
            stack.extend(self.children(teid).map(|n| n.elem.node_teid));
            self.nodes.remove(&teid);
            self.node_attrs.remove(&teid);
        }
    }

    fn take_failure(&mut self, opcode: Opcode) -> Option<ReturnCode> {
        let pos = self.failures.iter().position(|(op, ..)| *op == opcode)?;
        let skip = &mut self.failures[pos].1;
        if *skip > 0 {
            *skip -= 1;
            return None;
        }
        Some(self.failures.remove(pos).2)
    }

    fn handle(&mut self, desc: &mut Descriptor, buf: &mut Vec<u8>) {
        let opcode = match desc.opcode() {
            Ok(opcode) => opcode,
            Err(_) => {
                desc.retval = ReturnCode::NotImplemented.as_raw() as u16;
                return;
            }
        };
        *self.commands.entry(opcode).or_default() += 1;
        trace!(?opcode, len = buf.len(), "firmware model command");

        if let Some(rc) = self.take_failure(opcode) {
            desc.retval = rc.as_raw() as u16;
            return;
        }

        let res = match opcode {
            Opcode::GetDfltTopo => self.get_dflt_topo(desc, buf),
            Opcode::QuerySchedRes => self.query_sched_res(buf),
            Opcode::AddSchedElems => self.add_elems(desc, buf),
            Opcode::GetSchedElems => self.get_elems(desc, buf),
            Opcode::CfgSchedElems => self.cfg_elems(desc, buf),
            Opcode::MoveSchedElems => self.move_elems(desc, buf),
            Opcode::SuspendSchedElems => self.suspend_resume(desc, buf, true),
            Opcode::ResumeSchedElems => self.suspend_resume(desc, buf, false),
            Opcode::DeleteSchedElems => self.delete_elems(desc, buf),
            Opcode::AddRlProfiles => self.add_profiles(desc, buf),
            Opcode::RemoveRlProfiles => self.remove_profiles(desc, buf),
            Opcode::QueryRlProfiles => self.query_profiles(desc, buf),
            Opcode::QueryNodeToRoot => self.node_to_root(desc, buf),
            Opcode::CfgNodeAttr => self.cfg_node_attr(desc, buf),
            Opcode::AddTxqs => self.add_txqs(buf),
            Opcode::DisTxqs => self.dis_txqs(buf),
            Opcode::GetVersion => Err(ReturnCode::NotImplemented),
        };
        if let Err(rc) = res {
            desc.retval = rc.as_raw() as u16;
        }
    }

    fn get_dflt_topo(&mut self, desc: &mut Descriptor, buf: &mut Vec<u8>) -> Result<(), ReturnCode> {
        // A port that lost its default nodes gets them back, as after a firmware reset
        for tc in self.tcs.clone() {
            if self.first_child(tc).is_none() {
                self.add_dflt_chain(tc);
            }
        }

        let root = self.nodes.get(&self.root).ok_or(ReturnCode::Io)?.elem;
        let mut out = Vec::with_capacity(AQ_MAX_BUF_LEN);
        for tc in &self.tcs {
            let mut elems = vec![root];
            let mut cur = Some(*tc);
            while let Some(teid) = cur {
                let Some(node) = self.nodes.get(&teid) else { break };
                elems.push(node.elem);
                cur = self.first_child(teid);
            }
            TopoBranch { elems }.encode(&mut out);
        }
        desc.params.set_u8(topo_cmd::NUM_BRANCHES, self.tcs.len() as u8);
        write_back(buf, &out)
    }

    fn query_sched_res(&self, buf: &mut Vec<u8>) -> Result<(), ReturnCode> {
        write_back(buf, &self.topo.resources().encode())
    }

    fn add_elems(&mut self, desc: &mut Descriptor, buf: &mut Vec<u8>) -> Result<(), ReturnCode> {
        let mut group = ElemGroup::decode(&buf[..]).map_err(|_| ReturnCode::Invalid)?;
        let parent = *self.nodes.get(&group.parent_teid).ok_or(ReturnCode::Invalid)?;
        if parent.layer + 1 >= self.topo.num_layers() {
            return Err(ReturnCode::Invalid);
        }
        if !self.has_room(group.parent_teid, group.elems.len()) {
            return Err(ReturnCode::NoSpace);
        }

        for elem in &mut group.elems {
            elem.parent_teid = group.parent_teid;
            elem.node_teid = self.insert(group.parent_teid, parent.layer + 1, elem.data);
        }
        desc.params.set_u16(elem_cmd::NUM_ELEM_RESP, 1);
        write_back(buf, &group.encode())
    }

    fn get_elems(&self, desc: &mut Descriptor, buf: &mut Vec<u8>) -> Result<(), ReturnCode> {
        let count = desc.params.u16_at(elem_cmd::NUM_ELEM_REQ) as usize;
        let req: Vec<TxSchedElemData> = decode_list(&mut &buf[..], count).map_err(|_| ReturnCode::Invalid)?;

        let mut out = Vec::with_capacity(count * TxSchedElemData::LEN);
        let mut found = 0u16;
        for elem in req.iter().filter_map(|r| self.nodes.get(&r.node_teid)) {
            elem.elem.encode(&mut out);
            found += 1;
        }
        desc.params.set_u16(elem_cmd::NUM_ELEM_RESP, found);
        write_back(buf, &out)
    }

    fn cfg_elems(&mut self, desc: &mut Descriptor, buf: &mut Vec<u8>) -> Result<(), ReturnCode> {
        let count = desc.params.u16_at(elem_cmd::NUM_ELEM_REQ) as usize;
        let req: Vec<TxSchedElemData> = decode_list(&mut &buf[..], count).map_err(|_| ReturnCode::Invalid)?;

        let mut done = 0u16;
        for r in &req {
            self.last_cfg = Some(*r);
            let Some(node) = self.nodes.get_mut(&r.node_teid) else { continue };
            let (cur, new) = (&mut node.elem.data, &r.data);
            if new.valid_sections & valid::GENERIC != 0 {
                cur.generic = new.generic;
            }
            if new.valid_sections & valid::CIR != 0 {
                cur.cir = new.cir;
            }
            if new.valid_sections & valid::EIR != 0 {
                cur.eir = new.eir;
            }
            if new.valid_sections & valid::SHARED != 0 {
                cur.srl_id = new.srl_id;
            }
            cur.valid_sections |= new.valid_sections;
            done += 1;
        }
        desc.params.set_u16(elem_cmd::NUM_ELEM_RESP, done);
        Ok(())
    }

    fn move_elems(&mut self, desc: &mut Descriptor, buf: &mut Vec<u8>) -> Result<(), ReturnCode> {
        let group = MoveGroup::decode(&buf[..]).map_err(|_| ReturnCode::Invalid)?;
        let dest = *self.nodes.get(&group.dest_parent_teid).ok_or(ReturnCode::Invalid)?;
        if !self.has_room(group.dest_parent_teid, group.teids.len()) {
            return Err(ReturnCode::NoSpace);
        }
        for teid in &group.teids {
            match self.nodes.get(teid) {
                Some(node) if node.layer == dest.layer + 1 => {}
                _ => return Err(ReturnCode::Invalid),
            }
        }

        for teid in &group.teids {
            if let Some(node) = self.nodes.get_mut(teid) {
                node.elem.parent_teid = group.dest_parent_teid;
            }
        }
        desc.params.set_u16(elem_cmd::NUM_ELEM_RESP, 1);
        Ok(())
    }

    fn suspend_resume(&mut self, desc: &mut Descriptor, buf: &mut Vec<u8>, suspend: bool) -> Result<(), ReturnCode> {
        let count = desc.params.u16_at(elem_cmd::NUM_ELEM_REQ) as usize;
        let teids = get_teids(&mut &buf[..], count).map_err(|_| ReturnCode::Invalid)?;

        let mut done = 0u16;
        for teid in &teids {
            let Some(node) = self.nodes.get_mut(teid) else {
                continue;
            };
            if suspend {
                node.elem.data.flags |= ELEM_FLAG_SUSPEND;
            } else {
                node.elem.data.flags &= !ELEM_FLAG_SUSPEND;
            }
            done += 1;
        }
        desc.params.set_u16(elem_cmd::NUM_ELEM_RESP, done);
        Ok(())
    }

    fn delete_elems(&mut self, desc: &mut Descriptor, buf: &mut Vec<u8>) -> Result<(), ReturnCode> {
        let group = TeidGroup::decode(&buf[..]).map_err(|_| ReturnCode::Invalid)?;
        let all_known = group
            .teids
            .iter()
            .all(|t| self.nodes.get(t).map_or(false, |n| n.elem.parent_teid == group.parent_teid));
        if !all_known {
            desc.params.set_u16(elem_cmd::NUM_ELEM_RESP, 0);
            return Ok(());
        }
        for teid in &group.teids {
            self.remove(*teid);
        }
        desc.params.set_u16(elem_cmd::NUM_ELEM_RESP, 1);
        Ok(())
    }

    fn add_profiles(&mut self, desc: &mut Descriptor, buf: &mut Vec<u8>) -> Result<(), ReturnCode> {
        let count = desc.params.u16_at(profile_cmd::NUM_PROFILES) as usize;
        let mut req: Vec<RlProfileElem> = decode_list(&mut &buf[..], count).map_err(|_| ReturnCode::Invalid)?;

        let mut done = 0u16;
        for p in &mut req {
            let rl_type = p.rl_type().map_err(|_| ReturnCode::Invalid)?;
            let layer = p.level.checked_sub(1).ok_or(ReturnCode::Invalid)?;
            let used = self.profiles.iter().filter(|q| q.level == p.level && q.rl_type() == Ok(rl_type)).count();
            if used >= self.topo.max_profiles(layer, rl_type) as usize {
                return Err(ReturnCode::NoSpace);
            }
            p.profile_id = self.next_profile_id;
            self.next_profile_id = self.next_profile_id.wrapping_add(1).max(1);
            self.profiles.push(*p);
            done += 1;
        }
        desc.params.set_u16(profile_cmd::NUM_PROCESSED, done);
        write_back(buf, &encode(&req))
    }

    fn remove_profiles(&mut self, desc: &mut Descriptor, buf: &mut Vec<u8>) -> Result<(), ReturnCode> {
        let count = desc.params.u16_at(profile_cmd::NUM_PROFILES) as usize;
        let req: Vec<RlProfileElem> = decode_list(&mut &buf[..], count).map_err(|_| ReturnCode::Invalid)?;

        let mut done = 0u16;
        for p in &req {
            let before = self.profiles.len();
            self.profiles.retain(|q| !(q.level == p.level && q.profile_id == p.profile_id));
            if self.profiles.len() < before {
                done += 1;
            }
        }
        self.removed_profiles += done as usize;
        desc.params.set_u16(profile_cmd::NUM_PROCESSED, done);
        Ok(())
    }

    fn query_profiles(&self, desc: &mut Descriptor, buf: &mut Vec<u8>) -> Result<(), ReturnCode> {
        let count = desc.params.u16_at(profile_cmd::NUM_PROFILES) as usize;
        let req: Vec<RlProfileElem> = decode_list(&mut &buf[..], count).map_err(|_| ReturnCode::Invalid)?;

        let resp: Vec<RlProfileElem> = req
            .iter()
            .map(|p| {
                self.profiles
                    .iter()
                    .find(|q| q.level == p.level && q.profile_id == p.profile_id)
                    .copied()
                    .unwrap_or(RlProfileElem { flags: p.flags | PROFILE_INVAL, ..*p })
            })
            .collect();
        desc.params.set_u16(profile_cmd::NUM_PROCESSED, resp.len() as u16);
        write_back(buf, &encode(&resp))
    }

    fn node_to_root(&self, desc: &mut Descriptor, buf: &mut Vec<u8>) -> Result<(), ReturnCode> {
        let mut teid = desc.params.u32_at(node_to_root_cmd::TEID);
        let mut out = Vec::with_capacity(MAX_TOPO_LAYERS as usize * TxSchedElemData::LEN);
        let mut count = 0u16;
        while let Some(node) = self.nodes.get(&teid) {
            node.elem.encode(&mut out);
            count += 1;
            teid = node.elem.parent_teid;
        }
        if count == 0 {
            return Err(ReturnCode::NoEntry);
        }
        desc.params.set_u16(node_to_root_cmd::NUM_NODES, count);
        write_back(buf, &out)
    }

    fn cfg_node_attr(&mut self, desc: &mut Descriptor, buf: &mut Vec<u8>) -> Result<(), ReturnCode> {
        let count = desc.params.u16_at(node_attr_cmd::NUM_ENTRIES) as usize;
        let attrs: Vec<NodeAttr> = decode_list(&mut &buf[..], count).map_err(|_| ReturnCode::Invalid)?;
        if attrs.iter().any(|a| !self.nodes.contains_key(&a.node_teid)) {
            return Err(ReturnCode::Invalid);
        }
        for attr in attrs {
            self.node_attrs.insert(attr.node_teid, attr);
        }
        Ok(())
    }

    fn add_txqs(&mut self, buf: &mut Vec<u8>) -> Result<(), ReturnCode> {
        let mut group = AddTxqGroup::decode(&buf[..]).map_err(|_| ReturnCode::Invalid)?;
        let parent = *self.nodes.get(&group.parent_teid).ok_or(ReturnCode::Invalid)?;
        if parent.layer + 2 != self.topo.num_layers() {
            return Err(ReturnCode::Invalid);
        }
        if !self.has_room(group.parent_teid, group.txqs.len()) {
            return Err(ReturnCode::NoSpace);
        }

        for txq in &mut group.txqs {
            let data = TxSchedElem { elem_type: ElemType::Leaf as u8, ..txq.info };
            txq.q_teid = self.insert(group.parent_teid, parent.layer + 1, data);
            if let Some(node) = self.nodes.get_mut(&txq.q_teid) {
                node.txq_id = Some(txq.txq_id);
            }
        }
        write_back(buf, &group.encode())
    }

    fn dis_txqs(&mut self, buf: &mut Vec<u8>) -> Result<(), ReturnCode> {
        let group = DisTxqGroup::decode(&buf[..]).map_err(|_| ReturnCode::Invalid)?;
        for q_id in &group.q_ids {
            let teid = self
                .children(group.parent_teid)
                .find(|n| n.txq_id == Some(*q_id))
                .map(|n| n.elem.node_teid)
                .ok_or(ReturnCode::NoEntry)?;
            self.remove(teid);
        }
        Ok(())
    }
}

fn encode<T: Payload>(items: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(items.len() * T::LEN);
    for item in items {
        item.encode(&mut out);
    }
    out
}

/// Writes a response over the start of the command buffer, growing it if needed.
fn write_back(buf: &mut Vec<u8>, data: &[u8]) -> Result<(), ReturnCode> {
    if buf.len() < data.len() {
        buf.resize(data.len(), 0);
    }
    buf[..data.len()].copy_from_slice(data);
    Ok(())
}

/// Firmware model shared by every clone.
#[derive(Debug, Clone)]
pub struct FakeFirmware {
    inner: Arc<Mutex<FwModel>>,
}

impl FakeFirmware {
    pub fn new(topo: FwTopology) -> Self {
        Self { inner: Arc::new(Mutex::new(FwModel::new(topo))) }
    }

    /// Number of scheduler elements, root and leaves included.
    pub fn node_count(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    /// Number of rate limiter profiles currently defined.
    pub fn profile_count(&self) -> usize {
        self.inner.lock().profiles.len()
    }

    /// Number of profiles removed so far.
    pub fn removed_profiles(&self) -> usize {
        self.inner.lock().removed_profiles
    }

    /// Fails the next command with `opcode`.
    pub fn fail_next(&self, opcode: Opcode, rc: ReturnCode) {
        self.fail_after(opcode, 0, rc);
    }

    /// Lets `skip` commands with `opcode` through, then fails the next one.
    pub fn fail_after(&self, opcode: Opcode, skip: usize, rc: ReturnCode) {
        self.inner.lock().failures.push((opcode, skip, rc));
    }

    /// Number of commands with `opcode` received so far, failed ones included.
    pub fn commands(&self, opcode: Opcode) -> usize {
        self.inner.lock().commands.get(&opcode).copied().unwrap_or_default()
    }

    pub fn parent_of(&self, teid: u32) -> Option<u32> {
        self.inner.lock().nodes.get(&teid).map(|n| n.elem.parent_teid)
    }

    pub fn elem(&self, teid: u32) -> Option<TxSchedElemData> {
        self.inner.lock().nodes.get(&teid).map(|n| n.elem)
    }

    /// The last element of the last configure command, as sent.
    pub fn last_cfg(&self) -> Option<TxSchedElemData> {
        self.inner.lock().last_cfg
    }

    pub fn is_suspended(&self, teid: u32) -> bool {
        self.inner.lock().nodes.get(&teid).map_or(false, |n| n.elem.data.is_suspended())
    }

    pub fn node_attr(&self, teid: u32) -> Option<NodeAttr> {
        self.inner.lock().node_attrs.get(&teid).copied()
    }

    /// Overwrites the generic byte of an element behind the host's back.
    pub fn corrupt_generic(&self, teid: u32, generic: u8) {
        if let Some(node) = self.inner.lock().nodes.get_mut(&teid) {
            node.elem.data.generic = generic;
        }
    }
}

impl CommandHandler for FakeFirmware {
    fn handle(&mut self, desc: &mut Descriptor, buf: &mut Vec<u8>) {
        self.inner.lock().handle(desc, buf);
    }
}

impl CommandTransport for FakeFirmware {
    fn send_command(&self, desc: &mut Descriptor, buf: Option<&mut [u8]>) -> Result<(), CtlqError> {
        let mut data = buf.as_deref().map(<[u8]>::to_vec).unwrap_or_default();
        self.inner.lock().handle(desc, &mut data);

        let rc = desc.return_code();
        if rc != ReturnCode::Ok {
            return Err(CtlqError::Command(rc));
        }
        if let Some(buf) = buf {
            if data.len() > buf.len() {
                return Err(CtlqError::Param("response larger than buffer"));
            }
            buf[..data.len()].copy_from_slice(&data);
        }
        Ok(())
    }
}
