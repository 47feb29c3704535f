use crate::net::NetWorld;
use crate::proto::mptcp::{
    self, add_subflow_route, compute_a_scaled, compute_alfa, remove_subflow, total_window, CcAlgo,
    MptcpConfig, MptcpConn, MptcpConnSpec, MptcpStack, SubflowSnap, SubflowSpec,
};
use crate::proto::tcp::{self, TcpConfig, TcpConnSpec};
use crate::sim::{speed_from_mbps, EventList, SimTime};
use crate::topo::multipath::{build_multipath, MultipathPath, PathOpts};

fn snap(cwnd: u64, rtt: SimTime, mss: u32) -> SubflowSnap {
    SubflowSnap { cwnd, rtt, mss }
}

#[test]
fn total_window_sums_effective_windows() {
    let s = [
        snap(10_000, SimTime::from_millis(10), 1000),
        snap(30_000, SimTime::from_millis(20), 1000),
    ];
    assert_eq!(total_window(&s), 40_000);
}

#[test]
fn a_scaled_is_half_scale_for_symmetric_subflows() {
    // two identical subflows: alpha = A_SCALE * 2c * (c*mss^2/r^2) / (2c*mss/r)^2
    //                               = A_SCALE / 2
    let s = [
        snap(20_000, SimTime::from_millis(10), 1000),
        snap(20_000, SimTime::from_millis(10), 1000),
    ];
    assert_eq!(compute_a_scaled(&s), 256);
}

#[test]
fn alfa_is_half_for_symmetric_subflows_at_epsilon_one() {
    let s = [
        snap(20_000, SimTime::from_millis(10), 1000),
        snap(20_000, SimTime::from_millis(10), 1000),
    ];
    let a = compute_alfa(&s, 1.0);
    assert!((a - 0.5).abs() < 1e-9, "alfa = {a}");
}

fn stack_with(algo: CcAlgo, total_bytes: u64, rcv_wnd: u64) -> (MptcpStack, u64) {
    let mut stack = MptcpStack::default();
    let cfg = MptcpConfig {
        algo,
        rcv_wnd_bytes: rcv_wnd,
        ..MptcpConfig::default()
    };
    stack.insert(MptcpConn::new(9, total_bytes, cfg));
    (stack, 9)
}

#[test]
fn fully_coupled_increase_never_exceeds_uncoupled_increase() {
    let sim = EventList::default();
    let mut world = NetWorld::default();
    let s = [
        snap(100_000, SimTime::from_millis(10), 1000),
        snap(100_000, SimTime::from_millis(10), 1000),
    ];

    let (mut coupled, cid) = stack_with(CcAlgo::FullyCoupled, u64::MAX, 1 << 30);
    let (mut uncoupled, uid) = stack_with(CcAlgo::Uncoupled, u64::MAX, 1 << 30);

    let c = coupled.inflate_window(cid, &s, 0, 100_000, 1000, &sim, &mut world.net);
    let u = uncoupled.inflate_window(uid, &s, 0, 100_000, 1000, &sim, &mut world.net);

    // uncoupled adds mss^2/w_i = 10, fully coupled mss^2/w = 5
    assert_eq!(u, 100_010);
    assert_eq!(c, 100_005);
}

#[test]
fn fully_coupled_loss_decrease_uses_the_shared_window() {
    let s = [
        snap(100_000, SimTime::from_millis(10), 1000),
        snap(100_000, SimTime::from_millis(10), 1000),
    ];
    let (mut fully, fid) = stack_with(CcAlgo::FullyCoupled, u64::MAX, 1 << 30);
    let (mut unc, uid) = stack_with(CcAlgo::Uncoupled, u64::MAX, 1 << 30);

    // w_i - w/2 = 0: floored at one mss
    assert_eq!(fully.deflate_window(fid, &s, 100_000, 1000), 1000);
    // local Reno halving
    assert_eq!(unc.deflate_window(uid, &s, 100_000, 1000), 50_000);
}

#[test]
fn data_seq_assignment_respects_the_shared_receive_window() {
    let (mut stack, id) = stack_with(CcAlgo::Uncoupled, u64::MAX, 3_000);

    assert_eq!(stack.get_data_seq(id, 0, 1000, 0), Some((1, 1000)));
    assert_eq!(stack.get_data_seq(id, 0, 1000, 1000), Some((1001, 1000)));
    assert_eq!(stack.get_data_seq(id, 1, 1000, 2000), Some((2001, 1000)));
    // window full: Σ inflight + len would exceed 3000
    assert_eq!(stack.get_data_seq(id, 1, 1000, 3000), None);
}

#[test]
fn removing_a_subflow_requeues_its_outstanding_data() {
    let mut tcp_stack = tcp::TcpStack::default();
    let (mut stack, id) = stack_with(CcAlgo::Uncoupled, u64::MAX, 1 << 30);
    mptcp::add_subflow(&mut tcp_stack, &mut stack, id, 501);
    mptcp::add_subflow(&mut tcp_stack, &mut stack, id, 502);

    // subflow 0 maps [1,1000], subflow 1 maps [1001,2000]
    assert_eq!(stack.get_data_seq(id, 0, 1000, 0), Some((1, 1000)));
    assert_eq!(stack.get_data_seq(id, 1, 1000, 1000), Some((1001, 1000)));

    remove_subflow(&mut tcp_stack, &mut stack, id, 501);

    // the orphaned range is handed to the survivor before fresh data
    assert_eq!(stack.get_data_seq(id, 0, 1000, 1000), Some((1, 1000)));
    assert_eq!(stack.get_data_seq(id, 0, 1000, 2000), Some((2001, 1000)));
    assert!(!stack.get(id).expect("conn").is_reset());
}

#[test]
fn removing_the_last_subflow_resets_the_connection() {
    let mut tcp_stack = tcp::TcpStack::default();
    let (mut stack, id) = stack_with(CcAlgo::Uncoupled, u64::MAX, 1 << 30);
    mptcp::add_subflow(&mut tcp_stack, &mut stack, id, 501);

    remove_subflow(&mut tcp_stack, &mut stack, id, 501);
    assert!(stack.get(id).expect("conn").is_reset());
    assert_eq!(stack.get_data_seq(id, 0, 1000, 0), None);
}

// ---------------------------------------------------------------------------
// end-to-end two-path scenarios
// ---------------------------------------------------------------------------

fn two_paths() -> [PathOpts; 2] {
    [
        // path A: slow, long
        PathOpts {
            rate_bps: speed_from_mbps(1),
            latency: SimTime::from_millis(40),
            queue_pkts: 100,
        },
        // path B: fast, short
        PathOpts {
            rate_bps: speed_from_mbps(5),
            latency: SimTime::from_millis(5),
            queue_pkts: 100,
        },
    ]
}

/// Shallow buffers keep the slow path's queueing delay small so the
/// aggregate-throughput comparison is not polluted by tail stragglers.
fn summation_paths() -> [PathOpts; 2] {
    [
        PathOpts {
            rate_bps: speed_from_mbps(2),
            latency: SimTime::from_millis(20),
            queue_pkts: 20,
        },
        PathOpts {
            rate_bps: speed_from_mbps(5),
            latency: SimTime::from_millis(5),
            queue_pkts: 20,
        },
    ]
}

fn mptcp_over(
    world: &mut NetWorld,
    sim: &mut EventList,
    paths: &[MultipathPath],
    algo: CcAlgo,
    total_bytes: u64,
) -> u64 {
    let subflows = paths
        .iter()
        .enumerate()
        .map(|(i, p)| SubflowSpec {
            id: (i + 1) as u64,
            fwd_hops: p.fwd_hops.clone(),
            rev_hops: p.rev_hops.clone(),
            cfg: TcpConfig::default(),
        })
        .collect();
    mptcp::connect(
        sim,
        &mut world.net,
        MptcpConnSpec {
            id: 100,
            cfg: MptcpConfig {
                algo,
                ..MptcpConfig::default()
            },
            subflows,
            total_bytes,
            start: SimTime::ZERO,
        },
    )
}

#[test]
fn uncoupled_mptcp_beats_the_best_single_path() {
    let total = 1_200_000u64; // 9.6 Mbit

    // reference: plain TCP on the fast path alone
    let single_fct = {
        let mut sim = EventList::default();
        let mut world = NetWorld::default();
        let paths = build_multipath(&mut world, &summation_paths()[1..]);
        let id = tcp::connect(
            &mut sim,
            &mut world.net,
            TcpConnSpec {
                id: 1,
                fwd_hops: paths[0].fwd_hops.clone(),
                rev_hops: paths[0].rev_hops.clone(),
                total_bytes: total,
                cfg: TcpConfig::default(),
                start: SimTime::ZERO,
            },
        );
        sim.run_until(SimTime::from_secs(60), &mut world);
        let conn = world.net.tcp.get(id).expect("conn");
        assert!(conn.is_done(), "single-path reference did not finish");
        conn.done_time().expect("done")
    };

    // both paths in parallel, uncoupled: aggregate ≈ sum of capacities
    let mut sim = EventList::default();
    let mut world = NetWorld::default();
    let paths = build_multipath(&mut world, &summation_paths());
    let mid = mptcp_over(&mut world, &mut sim, &paths, CcAlgo::Uncoupled, total);
    sim.run_until(SimTime::from_secs(60), &mut world);

    let mconn = world.net.mptcp.get(mid).expect("mptcp conn");
    assert!(mconn.is_done(), "mptcp transfer did not finish");
    let mptcp_fct = mconn.done_time().expect("done");

    assert!(
        mptcp_fct < single_fct,
        "uncoupled mptcp ({} ms) not faster than best single path ({} ms)",
        mptcp_fct.as_millis(),
        single_fct.as_millis()
    );

    // both subflows carried data
    for &sub in mconn.subflows() {
        assert!(world.net.tcp.get(sub).expect("subflow").bytes_acked() > 0);
    }
}

#[test]
fn fully_coupled_mptcp_concentrates_on_the_better_path() {
    let mut sim = EventList::default();
    let mut world = NetWorld::default();
    let paths = build_multipath(&mut world, &two_paths());
    let mid = mptcp_over(&mut world, &mut sim, &paths, CcAlgo::FullyCoupled, u64::MAX);
    sim.run_until(SimTime::from_secs(5), &mut world);

    let mconn = world.net.mptcp.get(mid).expect("mptcp conn");
    let subs = mconn.subflows();
    let a = world.net.tcp.get(subs[0]).expect("subflow a").bytes_acked();
    let b = world.net.tcp.get(subs[1]).expect("subflow b").bytes_acked();
    assert!(
        b > 3 * a,
        "traffic did not concentrate on the fast path: a={a} b={b}"
    );
}

#[test]
fn aggregate_inflight_respects_the_shared_receive_window() {
    let mss = 1460u64;
    let mut sim = EventList::default();
    let mut world = NetWorld::default();
    let paths = build_multipath(&mut world, &two_paths());
    let subflows = paths
        .iter()
        .enumerate()
        .map(|(i, p)| SubflowSpec {
            id: (i + 1) as u64,
            fwd_hops: p.fwd_hops.clone(),
            rev_hops: p.rev_hops.clone(),
            cfg: TcpConfig::default(),
        })
        .collect();
    let mid = mptcp::connect(
        &mut sim,
        &mut world.net,
        MptcpConnSpec {
            id: 100,
            cfg: MptcpConfig {
                algo: CcAlgo::Uncoupled,
                rcv_wnd_bytes: 8 * mss,
                ..MptcpConfig::default()
            },
            subflows,
            total_bytes: 40 * mss,
            start: SimTime::ZERO,
        },
    );

    while sim.do_next_event(&mut world) {
        let subs = world.net.mptcp.get(mid).map(|c| c.subflows().to_vec());
        if let Some(subs) = subs {
            let inflight: u64 = subs
                .iter()
                .filter_map(|s| world.net.tcp.get(*s))
                .map(|c| c.inflight_bytes())
                .sum();
            assert!(
                inflight <= 8 * mss,
                "aggregate inflight {inflight} exceeds shared window"
            );
        }
    }
    assert!(world.net.mptcp.get(mid).expect("conn").is_done());
}

#[test]
fn subflows_can_be_added_and_removed_at_runtime() {
    let total = 200_000u64;
    let mut sim = EventList::default();
    let mut world = NetWorld::default();
    let paths = build_multipath(&mut world, &two_paths());

    // start on the fast path only
    let subflows = vec![SubflowSpec {
        id: 1,
        fwd_hops: paths[1].fwd_hops.clone(),
        rev_hops: paths[1].rev_hops.clone(),
        cfg: TcpConfig::default(),
    }];
    let mid = mptcp::connect(
        &mut sim,
        &mut world.net,
        MptcpConnSpec {
            id: 100,
            cfg: MptcpConfig::default(),
            subflows,
            total_bytes: total,
            start: SimTime::ZERO,
        },
    );

    // bring up a second subflow on the slow path at 50 ms
    sim.run_until(SimTime::from_millis(50), &mut world);
    let added = add_subflow_route(
        &mut sim,
        &mut world.net,
        mid,
        SubflowSpec {
            id: 2,
            fwd_hops: paths[0].fwd_hops.clone(),
            rev_hops: paths[0].rev_hops.clone(),
            cfg: TcpConfig::default(),
        },
        SimTime::from_millis(50),
    );

    // tear down the original subflow at 200 ms; its outstanding data must
    // migrate to the survivor
    sim.run_until(SimTime::from_millis(200), &mut world);
    let first = world.net.mptcp.get(mid).expect("conn").subflows()[0];
    let mut tcp_stack = std::mem::take(&mut world.net.tcp);
    let mut mptcp_stack = std::mem::take(&mut world.net.mptcp);
    remove_subflow(&mut tcp_stack, &mut mptcp_stack, mid, first);
    world.net.tcp = tcp_stack;
    world.net.mptcp = mptcp_stack;

    sim.run_until(SimTime::from_secs(30), &mut world);

    let mconn = world.net.mptcp.get(mid).expect("conn");
    assert!(mconn.is_done(), "transfer did not survive subflow churn");
    assert_eq!(mconn.subflows(), &[added]);
    assert!(world.net.tcp.get(first).expect("old subflow").is_stopped());
}
