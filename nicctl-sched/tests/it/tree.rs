use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

use nicctl_sched::{testing::FwTopology, SchedError};
use nicctl_wire::sched::NodeAttr;

use crate::{assert_consistent, scheduler, walk};

#[test]
fn tc_fan_out_limit_adds_nothing() {
    let (fake, sched) = scheduler(FwTopology::nine_layer(1).with_max_children(1, 2));
    let tc = sched.tc_node(0).unwrap();

    let err = sched.add_nodes(tc.teid, tc.layer + 1, 3).unwrap_err();
    assert!(matches!(err, SchedError::MaxLimit));
    assert!(err.is_resource_exhausted());
    assert!(sched.tc_node(0).unwrap().children.is_empty());
    assert_eq!(fake.node_count(), 2);

    assert_eq!(sched.add_nodes(tc.teid, tc.layer + 1, 2).unwrap().len(), 2);
    assert_consistent(&fake, &sched);
}

#[test]
fn random_operations_keep_tree_consistent() {
    let (fake, sched) = scheduler(FwTopology::nine_layer(2).with_max_children(3, 3));
    let layers = sched.layers().unwrap();
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for _ in 0..300 {
        let nodes = walk(&sched);
        let parents: Vec<_> =
            nodes.iter().filter(|n| n.layer >= layers.entry() - 1 && n.layer < layers.qgrp()).collect();
        let movable: Vec<_> = nodes.iter().filter(|n| n.layer > layers.entry()).collect();
        let removable: Vec<_> = nodes.iter().filter(|n| n.layer >= layers.entry()).collect();

        match rng.gen_range(0..10) {
            0..=5 => {
                let parent = parents.choose(&mut rng).unwrap();
                match sched.add_nodes(parent.teid, parent.layer + 1, rng.gen_range(1..4)) {
                    Ok(_) | Err(SchedError::MaxLimit) => {}
                    Err(e) => panic!("add failed: {e}"),
                }
            }
            6 | 7 => {
                if let Some(node) = removable.choose(&mut rng) {
                    sched.remove_node(node.teid).unwrap();
                }
            }
            _ => {
                let Some(node) = movable.choose(&mut rng) else { continue };
                let dest = nodes
                    .iter()
                    .filter(|n| n.layer + 1 == node.layer && Some(n.teid) != node.parent_teid)
                    .collect::<Vec<_>>();
                if let Some(dest) = dest.choose(&mut rng) {
                    match sched.move_nodes(dest.teid, &[node.teid]) {
                        Ok(()) | Err(SchedError::AqFull) => {}
                        Err(e) => panic!("move failed: {e}"),
                    }
                }
            }
        }
        assert_consistent(&fake, &sched);
    }

    let tc = sched.tc_node(0).unwrap();
    assert!(sched.is_balanced(tc.teid).unwrap());
}

#[test]
fn moved_node_reports_new_path() {
    let (fake, sched) = scheduler(FwTopology::nine_layer(1));
    let tc = sched.tc_node(0).unwrap();
    let entry = sched.add_nodes(tc.teid, 2, 2).unwrap();
    let child = sched.add_nodes(entry[0], 3, 1).unwrap()[0];

    sched.move_nodes(entry[1], &[child]).unwrap();
    assert_eq!(sched.node(child).unwrap().parent_teid, Some(entry[1]));
    assert!(sched.node(entry[0]).unwrap().children.is_empty());

    let path: Vec<_> = sched.query_node_to_root(child).unwrap().iter().map(|e| e.node_teid).collect();
    assert_eq!(path, vec![child, entry[1], tc.teid, sched.root().unwrap().teid]);

    // A node only moves one layer below its new parent
    assert!(matches!(sched.move_nodes(tc.teid, &[child]), Err(SchedError::Param(_))));
    assert!(matches!(sched.move_nodes(entry[0], &[]), Err(SchedError::Param(_))));
    assert_consistent(&fake, &sched);
}

#[test]
fn removal_takes_the_whole_subtree() {
    let (fake, sched) = scheduler(FwTopology::nine_layer(1));
    let tc = sched.tc_node(0).unwrap();
    let entry = sched.add_nodes(tc.teid, 2, 1).unwrap()[0];
    let mid = sched.add_nodes(entry, 3, 2).unwrap();
    sched.add_nodes(mid[1], 4, 3).unwrap();
    assert_eq!(sched.node_count(), 8);

    sched.remove_node(entry).unwrap();
    assert_eq!(sched.node_count(), 2);
    assert!(sched.node(mid[1]).is_none());
    assert_consistent(&fake, &sched);
}

#[test]
fn fixed_nodes_and_bad_arguments() {
    let (_fake, sched) = scheduler(FwTopology::nine_layer(1));
    let root = sched.root().unwrap();
    let tc = sched.tc_node(0).unwrap();

    assert!(matches!(sched.remove_node(root.teid), Err(SchedError::Param(_))));
    assert!(matches!(sched.remove_node(tc.teid), Err(SchedError::Param(_))));
    assert!(matches!(sched.set_node_priority(tc.teid, 8), Err(SchedError::Param(_))));
    assert!(matches!(sched.add_nodes(0xdead, 2, 1), Err(SchedError::Param(_))));
    assert!(matches!(sched.add_nodes(tc.teid, 3, 1), Err(SchedError::Param(_))));
    assert!(matches!(sched.cfg_node_attr(&[]), Err(SchedError::Param(_))));
}

#[test]
fn suspend_and_resume() {
    let (fake, sched) = scheduler(FwTopology::nine_layer(1));
    let tc = sched.tc_node(0).unwrap();
    let nodes = sched.add_nodes(tc.teid, 2, 2).unwrap();

    sched.suspend_nodes(&nodes).unwrap();
    for teid in &nodes {
        assert!(fake.is_suspended(*teid));
        assert!(sched.node(*teid).unwrap().elem.is_suspended());
    }
    assert!(sched.is_balanced(tc.teid).unwrap());

    sched.resume_nodes(&nodes[..1]).unwrap();
    assert!(!fake.is_suspended(nodes[0]));
    assert!(fake.is_suspended(nodes[1]));
    assert!(sched.is_balanced(tc.teid).unwrap());
}

#[test]
fn priority_and_weight_reach_firmware() {
    let (fake, sched) = scheduler(FwTopology::nine_layer(1));
    let tc = sched.tc_node(0).unwrap();
    let node = sched.add_nodes(tc.teid, 2, 1).unwrap()[0];

    sched.set_node_priority(node, 5).unwrap();
    sched.set_node_weight(node, 20).unwrap();
    let remote = fake.elem(node).unwrap();
    assert_eq!(remote.data.priority(), 5);
    assert_eq!(remote.data.cir.bw_alloc, 20);
    assert_eq!(remote.data.eir.bw_alloc, 20);
    assert!(sched.is_balanced(tc.teid).unwrap());

    fake.corrupt_generic(node, 0);
    assert!(!sched.is_balanced(tc.teid).unwrap());
}

#[test]
fn node_attributes() {
    let (fake, sched) = scheduler(FwTopology::nine_layer(1));
    let tc = sched.tc_node(0).unwrap();
    let node = sched.add_nodes(tc.teid, 2, 1).unwrap()[0];

    let attr = NodeAttr { node_teid: node, max_children: 4, children_level: 3 };
    sched.cfg_node_attr(&[attr]).unwrap();
    assert_eq!(fake.node_attr(node), Some(attr));

    let bad = NodeAttr { node_teid: 0xdead, ..attr };
    assert!(matches!(sched.cfg_node_attr(&[bad]), Err(SchedError::Transport(_))));
}
