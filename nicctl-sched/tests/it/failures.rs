use nicctl_sched::{testing::FwTopology, Owner, SchedError};
use nicctl_wire::{txq::TXQ_CTX_LEN, Opcode, ReturnCode};

use crate::{assert_consistent, scheduler};

#[test]
fn queue_not_linked_is_stopped() {
    let (fake, sched) = scheduler(FwTopology::nine_layer(1));
    sched.cfg_vsi(1, 0, 2, Owner::Lan, true).unwrap();
    let (nodes, stops) = (fake.node_count(), fake.commands(Opcode::DisTxqs));

    fake.fail_next(Opcode::GetSchedElems, ReturnCode::Io);
    assert!(sched.ena_txq(1, 0, 0, 40, [0; TXQ_CTX_LEN]).is_err());
    assert_eq!(fake.node_count(), nodes);
    assert_eq!(fake.commands(Opcode::DisTxqs), stops + 1);
    assert!(matches!(sched.dis_txq(1, 0, 0), Err(SchedError::DoesNotExist)));
    assert_consistent(&fake, &sched);

    let teid = sched.ena_txq(1, 0, 0, 40, [0; TXQ_CTX_LEN]).unwrap();
    assert!(sched.node(teid).is_some());
    sched.dis_txq(1, 0, 0).unwrap();
    assert_consistent(&fake, &sched);
}

#[test]
fn failed_node_group_is_undone() {
    let (fake, sched) = scheduler(FwTopology::nine_layer(1));
    let tc = sched.tc_node(0).unwrap();

    for skip in 0..3 {
        fake.fail_after(Opcode::GetSchedElems, skip, ReturnCode::Io);
        assert!(sched.add_nodes(tc.teid, tc.layer + 1, 3).is_err());
        assert!(sched.tc_node(0).unwrap().children.is_empty());
        assert_eq!(fake.node_count(), 2);
        assert_consistent(&fake, &sched);
    }

    assert_eq!(sched.add_nodes(tc.teid, tc.layer + 1, 3).unwrap().len(), 3);
    assert!(sched.is_balanced(tc.teid).unwrap());
    assert_consistent(&fake, &sched);
}

#[test]
fn move_to_another_traffic_class_rejected() {
    let (fake, sched) = scheduler(FwTopology::nine_layer(2));
    let (tc0, tc1) = (sched.tc_node(0).unwrap(), sched.tc_node(1).unwrap());
    let p0 = sched.add_nodes(tc0.teid, tc0.layer + 1, 2).unwrap();
    let p1 = sched.add_nodes(tc1.teid, tc1.layer + 1, 1).unwrap()[0];
    let child = sched.add_nodes(p0[0], tc0.layer + 2, 1).unwrap()[0];

    assert!(matches!(sched.move_nodes(p1, &[child]), Err(SchedError::Param(_))));
    let node = sched.node(child).unwrap();
    assert_eq!((node.parent_teid, node.tc), (Some(p0[0]), 0));
    assert_eq!(fake.parent_of(child), Some(p0[0]));
    assert_consistent(&fake, &sched);

    // Same TC is fine
    sched.move_nodes(p0[1], &[child]).unwrap();
    assert_eq!(sched.node(child).unwrap().parent_teid, Some(p0[1]));
    assert_consistent(&fake, &sched);
}

#[test]
fn vsi_setup_failing_at_any_read_back_stays_consistent() {
    let topo = || FwTopology::nine_layer(1).with_max_children(7, 2);
    let (fake, sched) = scheduler(topo());
    let before = fake.commands(Opcode::GetSchedElems);
    sched.cfg_vsi(3, 0, 4, Owner::Lan, true).unwrap();
    let reads = fake.commands(Opcode::GetSchedElems) - before;
    assert!(reads > 0);

    for skip in 0..reads {
        let (fake, sched) = scheduler(topo());
        fake.fail_after(Opcode::GetSchedElems, skip, ReturnCode::Io);
        let _ = sched.cfg_vsi(3, 0, 4, Owner::Lan, true);
        assert_consistent(&fake, &sched);

        sched.cfg_vsi(3, 0, 4, Owner::Lan, true).unwrap();
        assert!(sched.vsi_node(3, 0).is_some());
        assert_consistent(&fake, &sched);
    }
}
