//! Incast 实验
//!
//! 多个发送者同时向一个接收者发送小流，扇入挤爆浅缓冲瓶颈，
//! 观察丢包、RTO 与流完成时间分布。

use clap::Parser;
use mpsim::net::NetWorld;
use mpsim::proto::tcp::{self, TcpConfig, TcpConnSpec};
use mpsim::sim::{EventList, SimTime};
use mpsim::topo::dumbbell::{build_dumbbell, DumbbellOpts};

#[derive(Debug, Parser)]
#[command(name = "incast", about = "Incast 扇入仿真：N 发 1 收，浅缓冲瓶颈")]
struct Args {
    #[arg(long, default_value_t = 15)]
    senders: usize,

    /// 每流数据量（字节）
    #[arg(long, default_value_t = 100_000)]
    flow_bytes: u64,

    #[arg(long, default_value_t = 10)]
    fan_in_gbps: u64,

    /// 共享瓶颈缓冲（包数）
    #[arg(long, default_value_t = 100)]
    queue_pkts: u64,

    #[arg(long, default_value_t = 10)]
    link_latency_us: u64,

    #[arg(long, default_value_t = 1_000)]
    until_ms: u64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut sim = EventList::default();
    let mut world = NetWorld::default();

    let opts = DumbbellOpts {
        senders: args.senders,
        host_link_gbps: args.fan_in_gbps.saturating_mul(4),
        bottleneck_gbps: args.fan_in_gbps,
        link_latency: SimTime::from_micros(args.link_latency_us),
        access_queue_pkts: 1000,
        bottleneck_queue_pkts: args.queue_pkts,
    };
    let dumbbell = build_dumbbell(&mut world, &opts);

    for (i, path) in dumbbell.paths.iter().enumerate() {
        tcp::connect(
            &mut sim,
            &mut world.net,
            TcpConnSpec {
                id: (i + 1) as u64,
                fwd_hops: path.fwd_hops.clone(),
                rev_hops: path.rev_hops.clone(),
                total_bytes: args.flow_bytes,
                cfg: TcpConfig::default(),
                start: SimTime::ZERO,
            },
        );
    }

    sim.run_until(SimTime::from_millis(args.until_ms), &mut world);

    let mut fcts: Vec<u64> = Vec::new();
    for i in 0..args.senders {
        let conn = world.net.tcp.get((i + 1) as u64).expect("conn exists");
        match (conn.start_time(), conn.done_time()) {
            (Some(s), Some(e)) => fcts.push(e.saturating_sub(s).as_micros()),
            _ => println!("  flow {} unfinished: acked={}B", i + 1, conn.bytes_acked()),
        }
    }
    fcts.sort_unstable();
    println!(
        "done @ {} ms: finished {}/{} flows, dropped_pkts={}",
        sim.now().as_millis(),
        fcts.len(),
        args.senders,
        world.net.stats.dropped_pkts
    );
    if !fcts.is_empty() {
        println!(
            "  fct_us: min={} median={} max={}",
            fcts[0],
            fcts[fcts.len() / 2],
            fcts[fcts.len() - 1]
        );
    }
}
