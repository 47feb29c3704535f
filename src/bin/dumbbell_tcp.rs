//! Dumbbell 拓扑 TCP 实验
//!
//! 一条或多条 Reno TCP 流共享一个瓶颈队列，观察吞吐、丢包与 cwnd 锯齿。

use clap::Parser;
use mpsim::logger::{JsonLinesLogger, LogEventKind, MemoryLogger};
use mpsim::net::NetWorld;
use mpsim::proto::tcp::{self, TcpConfig, TcpConnSpec};
use mpsim::queue::FifoQueue;
use mpsim::sim::{EventList, SimTime};
use mpsim::topo::dumbbell::{build_dumbbell, DumbbellOpts};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "dumbbell-tcp", about = "Dumbbell 拓扑仿真：N 条 Reno TCP 流共享瓶颈")]
struct Args {
    /// 发送者数量
    #[arg(long, default_value_t = 1)]
    senders: usize,

    /// 每流要发送的应用数据量（字节）
    #[arg(long, default_value_t = 10_000_000)]
    data_bytes: u64,

    /// MSS（每个 TCP 数据段载荷大小，字节）
    #[arg(long, default_value_t = 1460)]
    mss: u32,

    #[arg(long, default_value_t = 100)]
    host_link_gbps: u64,

    #[arg(long, default_value_t = 10)]
    bottleneck_gbps: u64,

    /// 单向链路传播时延（微秒）
    #[arg(long, default_value_t = 25)]
    link_latency_us: u64,

    /// 瓶颈队列容量（包数）
    #[arg(long, default_value_t = 100)]
    queue_pkts: u64,

    /// 流与流之间的启动间隔（毫秒）
    #[arg(long, default_value_t = 0)]
    stagger_ms: u64,

    /// 仿真运行到多少毫秒
    #[arg(long, default_value_t = 2_000)]
    until_ms: u64,

    /// 把日志记录写成 JSON-lines 文件
    #[arg(long)]
    log_json: Option<PathBuf>,
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

    if let Some(path) = &args.log_json {
        let file = JsonLinesLogger::create(path).expect("create log file");
        world.net.logs.attach(Box::new(file));
    }
    // cwnd 采样也留一份在内存里，结束时打印锯齿概要
    let mem = MemoryLogger::with_filter(|r| matches!(r.kind, LogEventKind::TcpState { .. }));
    let cwnd_log = mem.handle();
    world.net.logs.attach(Box::new(mem));

    let opts = DumbbellOpts {
        senders: args.senders,
        host_link_gbps: args.host_link_gbps,
        bottleneck_gbps: args.bottleneck_gbps,
        link_latency: SimTime::from_micros(args.link_latency_us),
        access_queue_pkts: 1000,
        bottleneck_queue_pkts: args.queue_pkts,
    };
    let dumbbell = build_dumbbell(&mut world, &opts);

    for (i, path) in dumbbell.paths.iter().enumerate() {
        let cfg = TcpConfig {
            mss: args.mss,
            ..TcpConfig::default()
        };
        tcp::connect(
            &mut sim,
            &mut world.net,
            TcpConnSpec {
                id: (i + 1) as u64,
                fwd_hops: path.fwd_hops.clone(),
                rev_hops: path.rev_hops.clone(),
                total_bytes: args.data_bytes,
                cfg,
                start: SimTime::from_millis(args.stagger_ms.saturating_mul(i as u64)),
            },
        );
    }

    sim.run_until(SimTime::from_millis(args.until_ms), &mut world);

    println!("done @ {} ms", sim.now().as_millis());
    for i in 0..args.senders {
        let id = (i + 1) as u64;
        let conn = world.net.tcp.get(id).expect("conn exists");
        let dur = match (conn.start_time(), conn.done_time()) {
            (Some(s), Some(e)) => Some(e.saturating_sub(s)),
            _ => None,
        };
        let gbps = dur.map(|d| {
            if d.0 == 0 {
                0.0
            } else {
                conn.bytes_acked() as f64 * 8.0 / d.0 as f64 * 1e3
            }
        });
        println!(
            "  flow {}: acked={}B done={} pkts={} cwnd={}B ssthresh={}B rtt={}us rto={}us goodput={:?}Gbps",
            id,
            conn.bytes_acked(),
            conn.is_done(),
            conn.packets_sent(),
            conn.cwnd(),
            conn.ssthresh(),
            conn.rtt().as_micros(),
            conn.rto().as_micros(),
            gbps,
        );
    }

    let mut flow_ids: Vec<u64> = world.net.flows.keys().copied().collect();
    flow_ids.sort_unstable();
    for fid in flow_ids {
        let fs = &world.net.flows[&fid];
        println!(
            "  flow {} wire: delivered_pkts={} delivered_bytes={}",
            fid, fs.delivered_pkts, fs.delivered_bytes
        );
    }

    let drops = world
        .net
        .sink(dumbbell.bottleneck_queue)
        .and_then(|s| s.as_any().downcast_ref::<FifoQueue>())
        .map(|q| q.stats().dropped)
        .unwrap_or(0);
    println!(
        "  net: delivered_pkts={} delivered_bytes={} dropped_pkts={} bottleneck_drops={} cwnd_samples={}",
        world.net.stats.delivered_pkts,
        world.net.stats.delivered_bytes,
        world.net.stats.dropped_pkts,
        drops,
        cwnd_log.lock().expect("log lock").len(),
    );
}
