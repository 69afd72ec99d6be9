use nicctl_sched::{testing::FwTopology, Owner, RlType, SchedError, DFLT_BW};
use nicctl_wire::rl::PROFILE_INVAL;

use crate::{assert_consistent, scheduler};

/// Profile id nodes carry when no CIR or EIR limit is set.
const DFLT_PROF_ID: u16 = 0;

#[test]
fn restoring_default_drops_one_reference() {
    let (fake, sched) = scheduler(FwTopology::nine_layer(1));
    let tc = sched.tc_node(0).unwrap();
    let entry = sched.add_nodes(tc.teid, 2, 1).unwrap()[0];
    let nodes = sched.add_nodes(entry, 3, 2).unwrap();

    sched.set_node_bw_lmt(nodes[0], RlType::Cir, 1000).unwrap();
    sched.set_node_bw_lmt(nodes[1], RlType::Cir, 1000).unwrap();
    let profiles = sched.profiles();
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].refs, 2);
    let id = profiles[0].id();
    assert_eq!(sched.node(nodes[0]).unwrap().elem.cir.profile_idx, id);
    assert_eq!(sched.node(nodes[1]).unwrap().elem.cir.profile_idx, id);

    sched.set_node_bw_lmt(nodes[0], RlType::Cir, DFLT_BW).unwrap();
    assert_eq!(sched.node(nodes[0]).unwrap().elem.cir.profile_idx, DFLT_PROF_ID);
    assert_eq!(sched.profiles()[0].refs, 1);
    assert_eq!(fake.removed_profiles(), 0);

    sched.set_node_bw_lmt(nodes[1], RlType::Cir, DFLT_BW).unwrap();
    assert!(sched.profiles().is_empty());
    assert_eq!(fake.removed_profiles(), 1);
    assert_eq!(fake.profile_count(), 0);
    assert!(sched.is_balanced(tc.teid).unwrap());
}

#[test]
fn changing_a_limit_moves_the_reference() {
    let (fake, sched) = scheduler(FwTopology::nine_layer(1));
    let tc = sched.tc_node(0).unwrap();
    let node = sched.add_nodes(tc.teid, 2, 1).unwrap()[0];

    sched.set_node_bw_lmt(node, RlType::Eir, 4000).unwrap();
    sched.set_node_bw_lmt(node, RlType::Eir, 4000).unwrap();
    assert_eq!(sched.profiles()[0].refs, 1);

    sched.set_node_bw_lmt(node, RlType::Eir, 8000).unwrap();
    let profiles = sched.profiles();
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].bw, 8000);
    assert_eq!(fake.profile_count(), 1);
    assert_eq!(fake.elem(node).unwrap().data.eir.profile_idx, profiles[0].id());
}

#[test]
fn out_of_range_bandwidth_changes_nothing() {
    let (fake, sched) = scheduler(FwTopology::nine_layer(1));
    let tc = sched.tc_node(0).unwrap();
    let node = sched.add_nodes(tc.teid, 2, 1).unwrap()[0];

    assert!(sched.set_node_bw_lmt(node, RlType::Cir, 100).is_err());
    assert!(sched.set_node_bw_lmt(node, RlType::Cir, 200_000_000).is_err());
    assert_eq!(sched.node(node).unwrap().elem.cir.profile_idx, DFLT_PROF_ID);
    assert_eq!(fake.profile_count(), 0);
}

#[test]
fn shared_limits_saved_per_tc() {
    let (fake, sched) = scheduler(FwTopology::nine_layer(2));
    sched.cfg_vsi_qs(1, 0b11, &[2; 8], Owner::Lan).unwrap();

    sched.cfg_vsi_bw_shared_lmt(1, 1000, 5000, 3000).unwrap();
    for tc in 0..2 {
        let info = sched.vsi_bw_info(1, tc).unwrap();
        assert_eq!(info.bw(RlType::Cir), Some(1000));
        assert_eq!(info.bw(RlType::Eir), Some(5000));
        assert_eq!(info.bw(RlType::Srl), Some(3000));
        let node = sched.vsi_node(1, tc).unwrap();
        assert_ne!(node.elem.srl_id, 0xffff);
    }
    // Both TCs share one profile per type
    assert_eq!(fake.profile_count(), 3);

    sched.cfg_vsi_bw_shared_lmt(1, DFLT_BW, DFLT_BW, DFLT_BW).unwrap();
    assert!(sched.vsi_bw_info(1, 0).unwrap().is_empty());
    assert_eq!(fake.profile_count(), 0);
    assert_consistent(&fake, &sched);
}

#[test]
fn tc_limit_is_saved() {
    let (fake, sched) = scheduler(FwTopology::nine_layer(2));
    sched.cfg_tc_node_bw_lmt(1, RlType::Eir, 50_000).unwrap();
    assert_eq!(sched.tc_bw_info(1).unwrap().bw(RlType::Eir), Some(50_000));
    assert!(sched.tc_bw_info(0).unwrap().is_empty());

    let tc = sched.tc_node(1).unwrap();
    assert_ne!(tc.elem.eir.profile_idx, DFLT_PROF_ID);
    assert!(sched.is_balanced(tc.teid).unwrap());
    assert!(matches!(sched.cfg_tc_node_bw_lmt(8, RlType::Eir, 50_000), Err(SchedError::Param(_))));
    assert_eq!(fake.profile_count(), 1);
}

#[test]
fn weights_are_saved_for_enabled_tcs() {
    let (_fake, sched) = scheduler(FwTopology::nine_layer(2));
    sched.cfg_vsi_qs(1, 0b11, &[1; 8], Owner::Lan).unwrap();

    let mut weights = [0u16; 8];
    weights[0] = 10;
    weights[1] = 30;
    sched.cfg_vsi_bw_alloc(1, 0b10, RlType::Eir, &weights).unwrap();

    assert_eq!(sched.vsi_node(1, 1).unwrap().elem.eir.bw_alloc, 30);
    assert_eq!(sched.vsi_bw_info(1, 1).unwrap().weight(RlType::Eir), Some(30));
    assert_eq!(sched.vsi_bw_info(1, 0).unwrap().weight(RlType::Eir), None);
    assert!(matches!(sched.cfg_vsi_bw_alloc(9, 0b1, RlType::Eir, &weights), Err(SchedError::Param(_))));
}

#[test]
fn profiles_read_back_from_firmware() {
    let (_fake, sched) = scheduler(FwTopology::nine_layer(1));
    assert!(sched.query_rl_profiles().unwrap().is_empty());

    sched.set_rl_burst_size(4096).unwrap();
    let tc = sched.tc_node(0).unwrap();
    let node = sched.add_nodes(tc.teid, 2, 1).unwrap()[0];
    sched.set_node_bw_lmt(node, RlType::Cir, 2000).unwrap();

    let remote = sched.query_rl_profiles().unwrap();
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].flags & PROFILE_INVAL, 0);
    assert_eq!(remote[0], sched.profiles()[0].elem);
    assert_eq!(remote[0].max_burst_size, 64);

    assert!(matches!(sched.set_rl_burst_size(0), Err(SchedError::Param(_))));
}
