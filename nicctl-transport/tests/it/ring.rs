use rand::{rngs::StdRng, Rng, SeedableRng};

use nicctl_transport::{testing::echo, CtlqError, CtlqOptions};
use nicctl_wire::{Descriptor, Opcode};

use crate::ctlq::setup;

/// Random sends against a device that stalls and recovers keep the ring consistent.
#[test]
fn ring_invariants_hold() {
    const DEPTH: u16 = 8;

    let (dev, _dma, queue) = setup(CtlqOptions::default().with_sq(DEPTH, 64), echo);
    queue.init().unwrap();
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut stalled = false;

    for _ in 0..300 {
        if rng.gen_bool(0.1) {
            stalled = !stalled;
            dev.set_stalled(stalled);
        }

        let (_, _, before) = queue.sq_cursors();
        let mut desc = Descriptor::new(Opcode::GetVersion);
        let res = queue.send_command(&mut desc, None);

        let (ntu, ntc, in_flight) = queue.sq_cursors();
        assert!(in_flight <= DEPTH);
        assert_eq!((ntc + in_flight) % DEPTH, ntu);

        match res {
            Ok(()) => assert!(!stalled),
            Err(CtlqError::Timeout) => assert!(stalled),
            Err(CtlqError::QueueFull) => {
                assert!(stalled);
                assert_eq!(before, DEPTH);
                assert_eq!(in_flight, DEPTH);
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}
