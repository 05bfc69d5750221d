//! Integration tests for the probe -> classify -> enrich pipeline
//!
//! The ICMP transport is replaced by a scripted probe and the lookup service
//! by either an in-memory enricher or a one-shot HTTP server on localhost,
//! so no privileges or internet access are needed.

use std::cell::Cell;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, TcpListener};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use hoptrace::lookup::{HopEnricher, IpInfo, IpInfoLookup};
use hoptrace::probe::{EchoProbe, EchoRequest};
use hoptrace::state::ProbeOutcome;
use hoptrace::{Config, TraceEngine, TraceError};

/// Probe that answers per TTL from a script; unscripted TTLs time out
struct ScriptedProbe {
    script: HashMap<u8, ProbeOutcome>,
    probed: Vec<u8>,
}

impl ScriptedProbe {
    fn new(script: &[(u8, ProbeOutcome)]) -> Self {
        Self {
            script: script.iter().copied().collect(),
            probed: Vec::new(),
        }
    }
}

impl EchoProbe for ScriptedProbe {
    fn echo(&mut self, _target: &str, request: &EchoRequest<'_>) -> ProbeOutcome {
        assert_eq!(request.payload.len(), 32);
        assert_eq!(request.timeout, Duration::from_millis(100));
        assert!(request.dont_fragment);
        self.probed.push(request.ttl);
        self.script
            .get(&request.ttl)
            .copied()
            .unwrap_or(ProbeOutcome::TimedOut)
    }
}

/// In-memory lookup table; unknown addresses yield an empty record
#[derive(Default)]
struct TableEnricher {
    table: HashMap<IpAddr, IpInfo>,
    fail_for: Option<IpAddr>,
    calls: Cell<usize>,
}

impl HopEnricher for TableEnricher {
    fn lookup(&self, ip: IpAddr) -> Result<IpInfo, TraceError> {
        self.calls.set(self.calls.get() + 1);
        if self.fail_for == Some(ip) {
            let source = serde_json::from_str::<IpInfo>("<html>").unwrap_err();
            return Err(TraceError::Decode { ip, source });
        }
        Ok(self.table.get(&ip).cloned().unwrap_or_default())
    }
}

fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(a, b, c, d))
}

fn lines(results: &[Result<hoptrace::HopDescriptor, TraceError>]) -> Vec<String> {
    results
        .iter()
        .map(|r| r.as_ref().unwrap().to_string())
        .collect()
}

#[test]
fn test_scenario_a_reached_at_hop_five() {
    let dest = v4(203, 0, 113, 9);
    let mut probe = ScriptedProbe::new(&[
        (1, ProbeOutcome::HopLimitExceeded(v4(192, 168, 1, 1))),
        (5, ProbeOutcome::Reached(dest)),
        (6, ProbeOutcome::Reached(dest)),
    ]);
    let mut enricher = TableEnricher::default();
    enricher.table.insert(
        dest,
        IpInfo {
            ip: Some("203.0.113.9".into()),
            country: Some("US".into()),
            ..Default::default()
        },
    );

    let mut engine = TraceEngine::new(&mut probe, &enricher, &Config::default());
    let hops: Vec<_> = engine.trace("203.0.113.9").collect();

    assert_eq!(hops.len(), 5);
    assert_eq!(
        lines(&hops),
        vec!["1", "2 * * *", "3 * * *", "4 * * *", "5 [203.0.113.9] [US]"]
    );
    // No probing past the destination
    assert_eq!(probe.probed, vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_scenario_b_all_hops_time_out() {
    let mut probe = ScriptedProbe::new(&[]);
    let enricher = TableEnricher::default();

    let mut engine = TraceEngine::new(&mut probe, &enricher, &Config::default());
    let hops: Vec<_> = engine.trace("198.51.100.77").collect();

    assert_eq!(hops.len(), 30);
    for (i, hop) in hops.iter().enumerate() {
        let hop = hop.as_ref().unwrap();
        assert_eq!(hop.ttl as usize, i + 1);
        assert_eq!(hop.to_string(), format!("{} * * *", i + 1));
        assert!(hop.fields().is_none());
    }
    assert_eq!(enricher.calls.get(), 0);
    assert_eq!(probe.probed, (1..=30).collect::<Vec<u8>>());
}

#[test]
fn test_scenario_c_hop_without_fields() {
    let mut probe = ScriptedProbe::new(&[
        (1, ProbeOutcome::HopLimitExceeded(v4(10, 0, 0, 254))),
        (2, ProbeOutcome::HopLimitExceeded(v4(10, 0, 0, 253))),
        (4, ProbeOutcome::HopLimitExceeded(v4(10, 0, 0, 1))),
        (5, ProbeOutcome::Reached(v4(10, 0, 0, 2))),
    ]);
    let mut enricher = TableEnricher::default();
    enricher.table.insert(
        v4(10, 0, 0, 1),
        IpInfo {
            hostname: Some(String::new()),
            org: Some(String::new()),
            ..Default::default()
        },
    );

    let mut engine = TraceEngine::new(&mut probe, &enricher, &Config::default());
    let hops: Vec<_> = engine.trace("10.0.0.2").collect();

    let hops = lines(&hops);
    assert_eq!(hops[2], "3 * * *");
    assert_eq!(hops[3], "4");
    assert_eq!(hops.len(), 5);
}

#[test]
fn test_scenario_d_enrichment_failure_is_fatal() {
    let failing = v4(172, 16, 0, 1);
    let mut probe = ScriptedProbe::new(&[
        (1, ProbeOutcome::HopLimitExceeded(v4(192, 168, 1, 1))),
        (3, ProbeOutcome::HopLimitExceeded(failing)),
        (4, ProbeOutcome::Reached(v4(203, 0, 113, 9))),
    ]);
    let mut enricher = TableEnricher {
        fail_for: Some(failing),
        ..Default::default()
    };
    enricher.table.insert(
        v4(192, 168, 1, 1),
        IpInfo {
            ip: Some("192.168.1.1".into()),
            ..Default::default()
        },
    );

    let mut engine = TraceEngine::new(&mut probe, &enricher, &Config::default());
    let mut trace = engine.trace("203.0.113.9");

    assert_eq!(trace.next().unwrap().unwrap().to_string(), "1 [192.168.1.1]");
    assert_eq!(trace.next().unwrap().unwrap().to_string(), "2 * * *");

    let err = trace.next().unwrap().unwrap_err();
    assert!(matches!(err, TraceError::Decode { .. }));
    assert_eq!(err.ip(), failing);

    assert!(trace.next().is_none());
    assert!(trace.next().is_none());
    drop(trace);

    assert_eq!(probe.probed, vec![1, 2, 3]);
}

#[test]
fn test_other_failure_stops_without_descriptor() {
    let mut probe = ScriptedProbe::new(&[
        (1, ProbeOutcome::HopLimitExceeded(v4(192, 168, 1, 1))),
        (3, ProbeOutcome::OtherFailure),
        (4, ProbeOutcome::Reached(v4(203, 0, 113, 9))),
    ]);
    let enricher = TableEnricher::default();

    let mut engine = TraceEngine::new(&mut probe, &enricher, &Config::default());
    let hops: Vec<_> = engine.trace("203.0.113.9").collect();

    assert_eq!(lines(&hops), vec!["1", "2 * * *"]);
    assert_eq!(probe.probed, vec![1, 2, 3]);
}

#[test]
fn test_unresolvable_target_fails_on_first_hop() {
    let mut probe = ScriptedProbe::new(&[(1, ProbeOutcome::OtherFailure)]);
    let enricher = TableEnricher::default();

    let mut engine = TraceEngine::new(&mut probe, &enricher, &Config::default());
    assert_eq!(engine.trace("no-such-host.invalid").count(), 0);
    assert_eq!(probe.probed, vec![1]);
}

#[test]
fn test_ttls_strictly_increasing() {
    let mut probe = ScriptedProbe::new(&[
        (2, ProbeOutcome::HopLimitExceeded(v4(10, 1, 0, 1))),
        (7, ProbeOutcome::HopLimitExceeded(v4(10, 2, 0, 1))),
        (12, ProbeOutcome::Reached(v4(10, 3, 0, 1))),
    ]);
    let enricher = TableEnricher::default();

    let mut engine = TraceEngine::new(&mut probe, &enricher, &Config::default());
    let ttls: Vec<u8> = engine.trace("10.3.0.1").map(|h| h.unwrap().ttl).collect();

    assert_eq!(ttls, (1..=12).collect::<Vec<u8>>());
    assert_eq!(enricher.calls.get(), 3);
}

#[test]
fn test_last_hop_outcomes_at_max_ttl() {
    let last = v4(203, 0, 113, 30);
    let mut enricher = TableEnricher::default();
    enricher.table.insert(
        last,
        IpInfo {
            ip: Some("203.0.113.30".into()),
            ..Default::default()
        },
    );

    // Destination answers exactly at the final hop
    let mut probe = ScriptedProbe::new(&[(30, ProbeOutcome::Reached(last))]);
    let mut engine = TraceEngine::new(&mut probe, &enricher, &Config::default());
    let mut trace = engine.trace("203.0.113.30");
    let hops: Vec<_> = trace.by_ref().collect();
    assert!(trace.next().is_none());
    drop(trace);

    assert_eq!(hops.len(), 30);
    assert_eq!(lines(&hops[29..]), vec!["30 [203.0.113.30]"]);
    assert_eq!(probe.probed, (1..=30).collect::<Vec<u8>>());

    // A router at the final hop ends the trace silently after its line
    let mut probe = ScriptedProbe::new(&[(30, ProbeOutcome::HopLimitExceeded(last))]);
    let mut engine = TraceEngine::new(&mut probe, &enricher, &Config::default());
    let hops: Vec<_> = engine.trace("198.51.100.1").collect();

    assert_eq!(hops.len(), 30);
    assert!(hops.iter().all(|h| h.is_ok()));
    assert_eq!(lines(&hops[29..]), vec!["30 [203.0.113.30]"]);
    assert_eq!(probe.probed, (1..=30).collect::<Vec<u8>>());
    assert_eq!(enricher.calls.get(), 2);
}

// ============================================================================
// IpInfoLookup against a local HTTP server
// ============================================================================

/// Serve one canned HTTP response; returns the base URL and the request line
fn serve_once(status: &'static str, body: &'static str) -> (String, mpsc::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();

        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        let request = String::from_utf8_lossy(&request).to_string();
        let request_line = request.lines().next().unwrap_or_default().to_string();
        tx.send(request_line).unwrap();

        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).unwrap();
    });

    (format!("http://{}", addr), rx)
}

#[test]
fn test_ipinfo_lookup_success_and_cache() {
    let (base, requests) = serve_once(
        "200 OK",
        r#"{"ip":"203.0.113.9","org":"","country":"US","loc":"37.4,-122.1","readme":"x"}"#,
    );
    let lookup = IpInfoLookup::new(&base, Some("abc".into()), Duration::from_secs(5)).unwrap();
    let ip = v4(203, 0, 113, 9);

    let info = lookup.lookup(ip).unwrap();
    assert_eq!(info.fields(), vec!["203.0.113.9", "US"]);
    assert_eq!(
        requests.recv_timeout(Duration::from_secs(5)).unwrap(),
        "GET /203.0.113.9/json?token=abc HTTP/1.1"
    );

    // Served from cache; the server only answers once
    assert_eq!(lookup.lookup(ip).unwrap(), info);
}

#[test]
fn test_ipinfo_lookup_http_status_error() {
    let (base, _requests) = serve_once("429 Too Many Requests", r#"{"error":"rate limited"}"#);
    let lookup = IpInfoLookup::new(&base, None, Duration::from_secs(5)).unwrap();

    let err = lookup.lookup(v4(198, 51, 100, 1)).unwrap_err();
    match err {
        TraceError::Status { status, .. } => assert_eq!(status.as_u16(), 429),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_ipinfo_lookup_malformed_body() {
    let (base, _requests) = serve_once("200 OK", "<html>not json</html>");
    let lookup = IpInfoLookup::new(&base, None, Duration::from_secs(5)).unwrap();

    let err = lookup.lookup(v4(198, 51, 100, 1)).unwrap_err();
    assert!(matches!(err, TraceError::Decode { .. }));
}

#[test]
fn test_trace_stops_on_network_error() {
    // Bind and drop to get a port nobody listens on
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let lookup = IpInfoLookup::new(
        &format!("http://127.0.0.1:{}", port),
        None,
        Duration::from_secs(2),
    )
    .unwrap();

    let mut probe = ScriptedProbe::new(&[(2, ProbeOutcome::HopLimitExceeded(v4(10, 0, 0, 1)))]);
    let mut engine = TraceEngine::new(&mut probe, &lookup, &Config::default());
    let hops: Vec<_> = engine.trace("10.9.9.9").collect();

    assert_eq!(hops.len(), 2);
    assert_eq!(hops[0].as_ref().unwrap().to_string(), "1 * * *");
    assert!(matches!(hops[1], Err(TraceError::Http { .. })));
    assert_eq!(probe.probed, vec![1, 2]);
}
