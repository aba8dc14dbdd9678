use mesh_forest::algs::communicator::{CommTag, Communicator, LocalComm, Wait, spawn_world};
use mesh_forest::mesh_error::MeshError;
use serial_test::serial;

#[test]
fn local_round_trip() {
    let tag = CommTag(0x1000);
    let comms = LocalComm::world(2);

    let msg = b"hello";
    comms[0].isend(1, tag.base(), msg);
    let got = comms[1].irecv(0, tag.base()).wait().unwrap();
    assert_eq!(&got, msg);
}

#[test]
fn local_fifo_order() {
    let tag = CommTag(0x1001);
    let comms = LocalComm::world(2);

    for i in 0..10u8 {
        comms[0].isend(1, tag.base(), &[i]);
    }
    let mut out = Vec::new();
    for _ in 0..10 {
        out.push(comms[1].irecv(0, tag.base()).wait().unwrap()[0]);
    }
    assert_eq!(out, (0u8..10u8).collect::<Vec<_>>());
}

#[test]
fn tags_do_not_mix() {
    let comms = LocalComm::world(2);
    comms[0].isend(1, 1, &[1]);
    comms[0].isend(1, 2, &[2]);
    assert_eq!(comms[1].irecv(0, 2).wait().unwrap(), vec![2]);
    assert_eq!(comms[1].irecv(0, 1).wait().unwrap(), vec![1]);
}

#[test]
#[serial]
fn collectives_on_four_workers() {
    let results = spawn_world(4, |comm| {
        let tag = CommTag::new(0x2000);
        let rank = comm.rank() as u64;
        let gathered = comm.all_gather(tag, &[comm.rank() as u8]).unwrap();
        let sum = comm.all_reduce_sum(tag.offset(1), rank + 1).unwrap();
        let max = comm.all_reduce_max(tag.offset(2), rank * 3).unwrap();
        let any = comm.any(tag.offset(3), comm.rank() == 2).unwrap();
        let none = comm.any(tag.offset(4), false).unwrap();
        let outgoing = (0..comm.size())
            .map(|dst| vec![comm.rank() as u8, dst as u8])
            .collect();
        let received = comm.all_to_all(tag.offset(5), outgoing).unwrap();
        comm.barrier(tag.offset(6)).unwrap();
        (gathered, sum, max, any, none, received, comm.rank())
    });
    for (gathered, sum, max, any, none, received, rank) in results {
        assert_eq!(gathered, vec![vec![0], vec![1], vec![2], vec![3]]);
        assert_eq!(sum, 10);
        assert_eq!(max, 9);
        assert!(any);
        assert!(!none);
        for (src, buf) in received.iter().enumerate() {
            assert_eq!(buf, &vec![src as u8, rank as u8]);
        }
    }
}

#[test]
#[serial]
fn repeated_collectives_reuse_tags() {
    let sums = spawn_world(3, |comm| {
        let tag = CommTag::new(0x3000);
        (0..20u64)
            .map(|i| comm.all_reduce_sum(tag, i).unwrap())
            .collect::<Vec<_>>()
    });
    for s in sums {
        assert_eq!(s, (0..20u64).map(|i| 3 * i).collect::<Vec<_>>());
    }
}

#[test]
#[serial]
fn departed_worker_surfaces_as_comm_error() {
    let results = spawn_world(2, |comm| {
        if comm.rank() == 1 {
            // Leave without joining the collective.
            return None;
        }
        Some(comm.all_gather(CommTag::new(0x4000), b"x"))
    });
    assert!(results[1].is_none());
    assert!(matches!(
        results[0],
        Some(Err(MeshError::CommError { neighbor: 1, .. }))
    ));
}

#[test]
#[serial]
#[should_panic(expected = "worker 1 failed")]
fn worker_panic_is_propagated() {
    spawn_world(2, |comm| {
        if comm.rank() == 1 {
            panic!("worker 1 failed");
        }
        // Rank 0 observes the failure instead of hanging, then finishes normally.
        assert!(comm.all_gather(CommTag::new(0x5000), b"y").is_err());
    });
}
