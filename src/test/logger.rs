use crate::logger::{LogEventKind, LogManager, LogRecord, MemoryLogger, TcpCcState};
use crate::sim::SimTime;

fn tcp_state(conn: u64) -> LogEventKind {
    LogEventKind::TcpState {
        conn,
        cwnd: 14_600,
        ssthresh: 7_300,
        state: TcpCcState::CongestionAvoidance,
        rtt_ps: 100_000_000,
        rto_ps: 500_000_000,
    }
}

#[test]
fn manager_fans_out_to_all_attached_loggers() {
    let mut mgr = LogManager::default();
    let a = MemoryLogger::new();
    let got_a = a.handle();
    let b = MemoryLogger::new();
    let got_b = b.handle();
    mgr.attach(Box::new(a));
    mgr.attach(Box::new(b));

    mgr.emit(SimTime::from_millis(1), tcp_state(1));

    assert_eq!(got_a.lock().expect("lock").len(), 1);
    assert_eq!(got_b.lock().expect("lock").len(), 1);
    assert_eq!(got_a.lock().expect("lock")[0].t_ps, 1_000_000_000);
}

#[test]
fn memory_logger_filter_selects_records() {
    let mut mgr = LogManager::default();
    let only_rto = MemoryLogger::with_filter(|r| matches!(r.kind, LogEventKind::TcpRto { .. }));
    let got = only_rto.handle();
    mgr.attach(Box::new(only_rto));

    mgr.emit(SimTime::ZERO, tcp_state(1));
    mgr.emit(
        SimTime::ZERO,
        LogEventKind::TcpRto {
            conn: 1,
            seq: 1461,
            backoff_rto_ps: 1_000_000_000,
        },
    );

    let got = got.lock().expect("lock");
    assert_eq!(got.len(), 1);
    assert!(matches!(got[0].kind, LogEventKind::TcpRto { .. }));
}

#[test]
fn records_serialize_to_tagged_json() {
    let rec = LogRecord {
        t_ps: 42,
        kind: tcp_state(7),
    };
    let json = serde_json::to_string(&rec).expect("serialize");
    assert!(json.contains("\"kind\":\"tcp_state\""));
    assert!(json.contains("\"conn\":7"));

    let back: LogRecord = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back.t_ps, 42);
    assert!(matches!(back.kind, LogEventKind::TcpState { conn: 7, .. }));
}
