// SPDX-License-Identifier: GPL-2.0-or-later

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::models::{
    AddressEntry, DnsRequest, HttpRequest, NetworkInput, NetworkRequest, Protocol, Target,
};
use crate::runtime::{Dialer, RateLimiter};
use crate::vars::Variables;

use super::dns::DnsExecutor;
use super::http::{HttpExecutor, RequestBuilder};
use super::network::NetworkExecutor;
use super::{
    ExecutorOptions, Output, Progress, RequestError, RequestResult, ScanOptions,
};

struct TestOutput;

impl Output for TestOutput {
    fn request(&self, _: &str, _: &str, _: Protocol, _: Option<&RequestError>) {}
    fn write_store_debug_data(&self, _: &str, _: &str, _: Protocol, _: &str) {}
}

#[derive(Default)]
struct TestProgress {
    requests: AtomicUsize,
    failed: AtomicUsize,
}

impl Progress for TestProgress {
    fn increment_requests(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_failed_requests_by(&self, count: usize) {
        self.failed.fetch_add(count, Ordering::SeqCst);
    }
}

fn options_with_progress(progress: Arc<TestProgress>) -> ExecutorOptions {
    ExecutorOptions {
        template_id: "test-template".to_string(),
        template_path: "test-template.yaml".to_string(),
        variables: Variables::new(),
        constants: Variables::new(),
        options: ScanOptions {
            timeout: Duration::from_secs(1),
            ..Default::default()
        },
        output: Arc::new(TestOutput),
        progress,
        interactsh: None,
        operators: None,
        auth: None,
        rate_limiter: Arc::new(RateLimiter::unlimited()),
        dialer: Dialer::new(Duration::from_secs(2)),
        stop_at_first_match: false,
    }
}

fn test_options() -> ExecutorOptions {
    options_with_progress(Arc::new(TestProgress::default()))
}

fn cancel_token() -> super::CancelToken {
    Arc::new(AtomicBool::new(false))
}

async fn drain(mut rx: tokio::sync::mpsc::Receiver<RequestResult>) -> Vec<RequestResult> {
    let mut results = Vec::new();
    while let Some(result) = rx.recv().await {
        results.push(result);
    }
    results
}

/// A listener that answers each connection with a banner, half-closes
/// its write side (so sized reads see EOF instead of idling out the
/// read timeout) and records whether any payload bytes arrived.
async fn banner_server(banner: &'static [u8]) -> (std::net::SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let received = Arc::new(AtomicUsize::new(0));
    let counter = received.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                break;
            };
            let counter = counter.clone();
            tokio::spawn(async move {
                sock.write_all(banner).await.ok();
                sock.shutdown().await.ok();
                let mut buf = [0u8; 1024];
                while let Ok(n) = sock.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                    counter.fetch_add(n, Ordering::SeqCst);
                }
            });
        }
    });
    (addr, received)
}

#[tokio::test]
async fn network_port_scan_dispatches_only_to_open_port() {
    let (addr, _) = banner_server(b"").await;
    // two ports that are certainly closed
    let closed_a = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port_a = closed_a.local_addr().unwrap().port();
    drop(closed_a);
    let closed_b = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port_b = closed_b.local_addr().unwrap().port();
    drop(closed_b);

    let progress = Arc::new(TestProgress::default());
    let request = NetworkRequest {
        ports: vec![addr.port(), port_a, port_b],
        addresses: vec![AddressEntry {
            address: "{{Hostname}}".to_string(),
            tls: false,
        }],
        inputs: vec![NetworkInput {
            data: "PING\n".to_string(),
            ..Default::default()
        }],
        read_size: 16,
        ..Default::default()
    };
    let executor = NetworkExecutor::new(request, options_with_progress(progress.clone()));
    let target = Target::new("127.0.0.1");
    let results = drain(executor.execute_with_results(&target, &Variables::new(), cancel_token())).await;

    let events: Vec<_> = results
        .iter()
        .filter(|r| matches!(r, RequestResult::Event(_)))
        .collect();
    // exactly one request went out, to the open port; the probe errors
    // for the closed ports are logged, not raised
    assert_eq!(events.len(), 1);
    assert!(!results.iter().any(|r| matches!(r, RequestResult::Error(_))));
    assert_eq!(progress.requests.load(Ordering::SeqCst), 1);
    if let RequestResult::Event(event) = events[0] {
        assert_eq!(
            event.internal.get("matched").unwrap().to_string(),
            format!("127.0.0.1:{}", addr.port())
        );
    }
}

#[tokio::test]
#[tracing_test::traced_test]
async fn network_unresolved_variable_aborts_without_wire_bytes() {
    let (addr, received) = banner_server(b"").await;
    let progress = Arc::new(TestProgress::default());
    let request = NetworkRequest {
        ports: vec![addr.port()],
        addresses: vec![AddressEntry {
            address: "{{Hostname}}".to_string(),
            tls: false,
        }],
        inputs: vec![NetworkInput {
            data: "{{missing}}".to_string(),
            ..Default::default()
        }],
        read_size: 4,
        ..Default::default()
    };
    let executor = NetworkExecutor::new(request, options_with_progress(progress.clone()));
    let target = Target::new("127.0.0.1");
    let results = drain(executor.execute_with_results(&target, &Variables::new(), cancel_token())).await;

    // the channel closed (drain returned); the variant failed and the
    // aggregate arrived as the final envelope
    assert!(matches!(
        results.last(),
        Some(RequestResult::Error(RequestError::Unresolved(_)))
    ));
    assert!(logs_contain("could not make network request"));
    assert_eq!(progress.failed.load(Ordering::SeqCst), 1);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(received.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn network_capture_round_trip() {
    let (addr, received) = banner_server(b"BANNER").await;
    let request = NetworkRequest {
        ports: vec![addr.port()],
        addresses: vec![AddressEntry {
            address: "{{Hostname}}".to_string(),
            tls: false,
        }],
        inputs: vec![
            NetworkInput {
                data: "HELLO\n".to_string(),
                read: 6,
                name: Some("banner".to_string()),
                ..Default::default()
            },
            NetworkInput {
                data: "GOT {{banner}}\n".to_string(),
                ..Default::default()
            },
        ],
        read_size: 4,
        ..Default::default()
    };
    let executor = NetworkExecutor::new(request, test_options());
    let target = Target::new("127.0.0.1");
    let results = drain(executor.execute_with_results(&target, &Variables::new(), cancel_token())).await;

    let event = results
        .iter()
        .find_map(|r| match r {
            RequestResult::Event(event) => Some(event),
            _ => None,
        })
        .expect("one event");
    // the capture appears verbatim under its name and was substituted
    // into the later input
    assert_eq!(event.internal.get("banner").unwrap().to_string(), "BANNER");
    assert!(event
        .internal
        .get("request")
        .unwrap()
        .to_string()
        .contains("GOT BANNER"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(received.load(Ordering::SeqCst), b"HELLO\nGOT BANNER\n".len());
}

#[tokio::test]
async fn http_executor_streams_events_and_closes_once() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 2048];
                let _ = sock.read(&mut buf).await;
                sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                    .await
                    .ok();
            });
        }
    });

    let progress = Arc::new(TestProgress::default());
    let request = HttpRequest {
        path: vec!["{{BaseURL}}/health".to_string()],
        ..Default::default()
    };
    let executor = HttpExecutor::new(request, options_with_progress(progress.clone()));
    let target = Target::new(format!("http://127.0.0.1:{}", addr.port()));
    let results = drain(executor.execute_with_results(&target, &Variables::new(), cancel_token())).await;

    assert_eq!(results.len(), 1);
    match &results[0] {
        RequestResult::Event(event) => {
            assert_eq!(event.internal.get("status_code").unwrap().to_string(), "200");
            assert_eq!(event.internal.get("body").unwrap().to_string(), "ok");
            assert!(event
                .internal
                .get("matched")
                .unwrap()
                .to_string()
                .ends_with("/health"));
        }
        RequestResult::Error(e) => panic!("unexpected error envelope: {e}"),
    }
    assert_eq!(progress.requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn http_base_url_port_override() {
    let options = test_options();
    let request = HttpRequest {
        path: vec!["{{BaseURL}}:8080/admin".to_string()],
        ..Default::default()
    };
    let builder = RequestBuilder::new(&request, &options);
    let target = Target::new("http://host.example");
    let generated = builder
        .make(
            &target,
            "{{BaseURL}}:8080/admin",
            Variables::new(),
            &Variables::new(),
        )
        .unwrap();
    assert_eq!(generated.url.as_str(), "http://host.example:8080/admin");
}

#[tokio::test]
async fn building_twice_is_byte_identical_with_pinned_agent() {
    let options = test_options();
    let request = HttpRequest {
        path: vec!["{{BaseURL}}/x".to_string()],
        headers: vec![("User-Agent".to_string(), "probe/1".to_string())],
        body: "payload".to_string(),
        ..Default::default()
    };
    let target = Target::new("http://host.example");
    let first = RequestBuilder::new(&request, &options)
        .make(&target, "{{BaseURL}}/x", Variables::new(), &Variables::new())
        .unwrap();
    let second = RequestBuilder::new(&request, &options)
        .make(&target, "{{BaseURL}}/x", Variables::new(), &Variables::new())
        .unwrap();
    assert_eq!(first.method, second.method);
    assert_eq!(first.url, second.url);
    assert_eq!(first.headers, second.headers);
    assert_eq!(first.body, second.body);
}

#[tokio::test]
async fn dns_rejects_ip_literal_for_non_ptr() {
    let request = DnsRequest {
        name: "{{FQDN}}".to_string(),
        ..Default::default()
    };
    let executor = DnsExecutor::new(request, test_options()).unwrap();
    let target = Target::new("192.0.2.7");
    let results =
        drain(executor.execute_with_results(&target, &Variables::new(), &Variables::new(), cancel_token()))
            .await;
    assert_eq!(results.len(), 1);
    assert!(matches!(
        results[0],
        RequestResult::Error(RequestError::Configuration(_))
    ));
}

#[tokio::test]
async fn pool_follows_the_global_concurrency_knob() {
    let options = test_options();
    options
        .options
        .payload_concurrency
        .store(5, Ordering::SeqCst);
    let (pool, follow_global) = options.pool_for(5);
    assert!(follow_global);
    // the knob changes mid-iteration; the next checkpoint resizes
    options
        .options
        .payload_concurrency
        .store(2, Ordering::SeqCst);
    options.resize_checkpoint(&pool, follow_global);
    assert_eq!(pool.size(), 2);

    // a template with a different thread count never follows the knob
    let (fixed, follow_global) = options.pool_for(3);
    assert!(!follow_global);
    options
        .options
        .payload_concurrency
        .store(9, Ordering::SeqCst);
    options.resize_checkpoint(&fixed, follow_global);
    assert_eq!(fixed.size(), 3);
}

#[tokio::test]
async fn visited_addresses_are_probed_once() {
    let (addr, _) = banner_server(b"").await;
    let progress = Arc::new(TestProgress::default());
    let request = NetworkRequest {
        ports: vec![addr.port()],
        addresses: vec![
            AddressEntry {
                address: "{{Hostname}}".to_string(),
                tls: false,
            },
            AddressEntry {
                address: "{{Hostname}}".to_string(),
                tls: false,
            },
        ],
        inputs: vec![NetworkInput {
            data: "X".to_string(),
            ..Default::default()
        }],
        read_size: 4,
        ..Default::default()
    };
    let executor = NetworkExecutor::new(request, options_with_progress(progress.clone()));
    let target = Target::new("127.0.0.1");
    let results = drain(executor.execute_with_results(&target, &Variables::new(), cancel_token())).await;
    let events = results
        .iter()
        .filter(|r| matches!(r, RequestResult::Event(_)))
        .count();
    assert_eq!(events, 1);
    assert_eq!(progress.requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn payload_iteration_emits_at_most_n_events() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 2048];
                let _ = sock.read(&mut buf).await;
                sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                    .await
                    .ok();
            });
        }
    });
    let request = HttpRequest {
        path: vec!["{{BaseURL}}/{{word}}".to_string()],
        threads: 2,
        payloads: crate::generators::PayloadSet::new(
            crate::generators::AttackType::Pitchfork,
            vec![(
                "word".to_string(),
                vec!["a".into(), "b".into(), "c".into()],
            )],
        ),
        ..Default::default()
    };
    let executor = HttpExecutor::new(request, test_options());
    let target = Target::new(format!("http://127.0.0.1:{}", addr.port()));
    let results = drain(executor.execute_with_results(&target, &Variables::new(), cancel_token())).await;
    let events = results
        .iter()
        .filter(|r| matches!(r, RequestResult::Event(_)))
        .count();
    let errors = results
        .iter()
        .filter(|r| matches!(r, RequestResult::Error(_)))
        .count();
    assert_eq!(events, 3);
    assert!(errors <= 1);
}
