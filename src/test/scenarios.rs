//! End-to-end scenarios, scaled down from the full experiment drivers so
//! they run quickly in debug builds.

use crate::logger::{LogEventKind, MemoryLogger};
use crate::net::NetWorld;
use crate::proto::tcp::{self, TcpConfig, TcpConnSpec};
use crate::sim::{EventList, SimTime};
use crate::topo::dumbbell::{build_dumbbell, DumbbellOpts};

fn shared_bottleneck(senders: usize, bottleneck_queue_pkts: u64) -> DumbbellOpts {
    DumbbellOpts {
        senders,
        host_link_gbps: 10,
        bottleneck_gbps: 1,
        link_latency: SimTime::from_micros(25),
        access_queue_pkts: 1_000,
        bottleneck_queue_pkts,
    }
}

#[test]
fn single_tcp_fills_the_bottleneck_and_shows_a_sawtooth() {
    let mut sim = EventList::default();
    let mut world = NetWorld::default();

    let mem = MemoryLogger::with_filter(|r| matches!(r.kind, LogEventKind::TcpState { .. }));
    let cwnd_log = mem.handle();
    world.net.logs.attach(Box::new(mem));

    let opts = shared_bottleneck(1, 100);
    let dumbbell = build_dumbbell(&mut world, &opts);

    // long enough that congestion avoidance probes past the buffer at least once
    let total = 5_000_000u64;
    let id = tcp::connect(
        &mut sim,
        &mut world.net,
        TcpConnSpec {
            id: 1,
            fwd_hops: dumbbell.paths[0].fwd_hops.clone(),
            rev_hops: dumbbell.paths[0].rev_hops.clone(),
            total_bytes: total,
            cfg: TcpConfig::default(),
            start: SimTime::ZERO,
        },
    );
    sim.run_until(SimTime::from_millis(500), &mut world);

    let conn = world.net.tcp.get(id).expect("conn");
    assert!(conn.is_done(), "transfer did not finish");
    // at least one loss was needed to find the bottleneck
    assert!(world.net.stats.dropped_pkts >= 1);

    // goodput lands in the right regime: ≥ 30% of the 1 Gbps bottleneck
    let fct = conn
        .done_time()
        .expect("done")
        .saturating_sub(conn.start_time().expect("started"));
    let goodput_bps = total as f64 * 8.0 / fct.as_secs_f64();
    assert!(
        goodput_bps >= 0.3e9,
        "goodput only {:.0} Mbps",
        goodput_bps / 1e6
    );

    // the cwnd trace contains at least one multiplicative decrease
    let log = cwnd_log.lock().expect("lock");
    let cwnds: Vec<u64> = log
        .iter()
        .filter_map(|r| match r.kind {
            LogEventKind::TcpState { cwnd, .. } => Some(cwnd),
            _ => None,
        })
        .collect();
    assert!(
        cwnds.windows(2).any(|w| w[1] < w[0]),
        "no sawtooth in {} cwnd samples",
        cwnds.len()
    );
}

#[test]
fn two_tcps_share_the_bottleneck_roughly_fairly() {
    let mut sim = EventList::default();
    let mut world = NetWorld::default();

    let opts = shared_bottleneck(2, 100);
    let dumbbell = build_dumbbell(&mut world, &opts);

    for (i, path) in dumbbell.paths.iter().enumerate() {
        tcp::connect(
            &mut sim,
            &mut world.net,
            TcpConnSpec {
                id: (i + 1) as u64,
                fwd_hops: path.fwd_hops.clone(),
                rev_hops: path.rev_hops.clone(),
                total_bytes: u64::MAX,
                cfg: TcpConfig::default(),
                start: SimTime::from_millis(5 * i as u64),
            },
        );
    }
    sim.run_until(SimTime::from_millis(500), &mut world);

    let a = world.net.tcp.get(1).expect("conn 1").bytes_acked();
    let b = world.net.tcp.get(2).expect("conn 2").bytes_acked();
    assert!(a > 0 && b > 0);
    let ratio = a.max(b) as f64 / a.min(b) as f64;
    assert!(ratio < 3.0, "unfair split: {a} vs {b} (ratio {ratio:.2})");
}

#[test]
fn incast_causes_drops_and_rtos_but_every_flow_completes() {
    let mut sim = EventList::default();
    let mut world = NetWorld::default();

    let mem = MemoryLogger::with_filter(|r| matches!(r.kind, LogEventKind::TcpRto { .. }));
    let rto_log = mem.handle();
    world.net.logs.attach(Box::new(mem));

    let senders = 8;
    let opts = shared_bottleneck(senders, 50);
    let dumbbell = build_dumbbell(&mut world, &opts);

    let flow_bytes = 100_000u64;
    for (i, path) in dumbbell.paths.iter().enumerate() {
        tcp::connect(
            &mut sim,
            &mut world.net,
            TcpConnSpec {
                id: (i + 1) as u64,
                fwd_hops: path.fwd_hops.clone(),
                rev_hops: path.rev_hops.clone(),
                total_bytes: flow_bytes,
                cfg: TcpConfig::default(),
                start: SimTime::ZERO,
            },
        );
    }
    sim.run_until(SimTime::from_secs(2), &mut world);

    assert!(world.net.stats.dropped_pkts >= 1, "incast without drops");
    assert!(
        !rto_log.lock().expect("lock").is_empty(),
        "incast without a single RTO"
    );

    let mut fcts: Vec<u64> = Vec::new();
    for i in 0..senders {
        let conn = world.net.tcp.get((i + 1) as u64).expect("conn");
        assert!(conn.is_done(), "flow {} unfinished", i + 1);
        fcts.push(
            conn.done_time()
                .expect("done")
                .saturating_sub(conn.start_time().expect("started"))
                .0,
        );
    }
    fcts.sort_unstable();
    // completion times stay within a couple of orders of magnitude
    assert!(fcts[fcts.len() - 1] <= fcts[0].saturating_mul(1_000));
}
