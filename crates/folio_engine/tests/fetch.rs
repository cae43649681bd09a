use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use folio_engine::{
    FailureKind, FetchSettings, Fetcher, HostRule, ReqwestFetcher, SettingsError, CATCH_ALL,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast(rules: Vec<HostRule>) -> FetchSettings {
    FetchSettings {
        rules,
        ..FetchSettings::default()
    }
}

fn at(server: &MockServer, route: &str) -> Url {
    Url::parse(&format!("{}{}", server.uri(), route)).unwrap()
}

fn raw_at(addr: SocketAddr, route: &str) -> Url {
    Url::parse(&format!("http://{addr}{route}")).unwrap()
}

/// Reads until the blank line that ends a request head.
async fn read_request_head(stream: &mut TcpStream) {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        head.extend_from_slice(&buf[..n]);
    }
}

#[tokio::test]
async fn document_is_decoded_with_final_location() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/doc"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("<html>ok</html>", "text/html; charset=utf-8"),
        )
        .mount(&server)
        .await;

    let fetcher = ReqwestFetcher::new(fast(vec![HostRule::new("*", 4, 1000)])).unwrap();
    let url = at(&server, "/doc");

    let doc = fetcher
        .get_document(&CancellationToken::new(), &url)
        .await
        .expect("fetch ok");
    assert_eq!(doc.url, url);
    assert_eq!(doc.html, "<html>ok</html>");
    assert_eq!(doc.encoding, "UTF-8");
}

#[tokio::test]
async fn streamed_body_carries_length() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
        .mount(&server)
        .await;

    let fetcher = ReqwestFetcher::new(fast(vec![HostRule::new("*", 4, 1000)])).unwrap();
    let cancel = CancellationToken::new();
    let mut response = fetcher
        .get(&cancel, &at(&server, "/img.jpg"))
        .await
        .unwrap();
    assert_eq!(response.content_length(), Some(4096));

    let mut total = 0;
    while let Some(chunk) = response.next_chunk(&cancel).await.unwrap() {
        total += chunk.len();
    }
    assert_eq!(total, 4096);
}

#[tokio::test]
async fn http_status_is_typed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fetcher = ReqwestFetcher::new(FetchSettings::default()).unwrap();
    let err = fetcher
        .get(&CancellationToken::new(), &at(&server, "/missing"))
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind, FailureKind::HttpStatus(404));
    assert!(err.is_not_found());
    assert!(!err.is_cancelled());
}

#[tokio::test]
async fn request_timeout_is_typed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(250))
                .set_body_string("slow"),
        )
        .mount(&server)
        .await;

    let settings = FetchSettings {
        request_timeout: Some(Duration::from_millis(50)),
        ..FetchSettings::default()
    };
    let fetcher = ReqwestFetcher::new(settings).unwrap();
    let err = fetcher
        .get(&CancellationToken::new(), &at(&server, "/slow"))
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind, FailureKind::Timeout);
}

#[tokio::test]
async fn concurrency_limit_serializes_requests() {
    folio_logging::initialize_for_tests();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(100))
                .set_body_string("x"),
        )
        .expect(6)
        .mount(&server)
        .await;

    let fetcher = Arc::new(ReqwestFetcher::new(fast(vec![HostRule::new("*", 2, 1000)])).unwrap());
    let cancel = CancellationToken::new();
    let started = Instant::now();

    let mut tasks = Vec::new();
    for i in 0..6 {
        let fetcher = fetcher.clone();
        let cancel = cancel.clone();
        let url = at(&server, &format!("/r{i}"));
        tasks.push(tokio::spawn(async move {
            let response = fetcher.get(&cancel, &url).await?;
            response.read_all(&cancel).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    // Two at a time, 100ms each: three rounds at least.
    assert!(started.elapsed() >= Duration::from_millis(290));
}

#[tokio::test]
async fn concurrency_limit_caps_requests_in_flight() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    {
        let in_flight = in_flight.clone();
        let peak = peak.clone();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    read_request_head(&mut stream).await;
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    // Released before answering so the next admitted request never overlaps.
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    let _ = stream
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\nConnection: close\r\n\r\nx")
                        .await;
                });
            }
        });
    }

    let fetcher = Arc::new(ReqwestFetcher::new(fast(vec![HostRule::new("*", 2, 1000)])).unwrap());
    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();
    for i in 0..8 {
        let fetcher = fetcher.clone();
        let cancel = cancel.clone();
        let url = raw_at(addr, &format!("/n{i}"));
        tasks.push(tokio::spawn(async move {
            let response = fetcher.get(&cancel, &url).await?;
            response.read_all(&cancel).await
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), b"x".to_vec());
    }

    assert_eq!(peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn rate_limit_spaces_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x"))
        .mount(&server)
        .await;

    let fetcher = ReqwestFetcher::new(fast(vec![HostRule::new("*", 10, 20)])).unwrap();
    let cancel = CancellationToken::new();
    let started = Instant::now();
    for i in 0..5 {
        fetcher.get(&cancel, &at(&server, &format!("/t{i}"))).await.unwrap();
    }
    // First tick is immediate, then one every 50ms.
    assert!(started.elapsed() >= Duration::from_millis(190));
}

#[tokio::test]
async fn cancellation_interrupts_waiting_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(5))
                .set_body_string("late"),
        )
        .mount(&server)
        .await;

    let fetcher = ReqwestFetcher::new(fast(vec![HostRule::new("*", 1, 1000)])).unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = fetcher
        .get(&cancel, &at(&server, "/hang"))
        .await
        .err()
        .unwrap();
    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(2));

    let err = fetcher
        .get(&cancel, &at(&server, "/after"))
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind, FailureKind::Cancelled);
}

#[tokio::test]
async fn cancellation_interrupts_stalled_body() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_request_head(&mut stream).await;
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1000000\r\n\r\n0123456789")
            .await
            .unwrap();
        stream.flush().await.unwrap();
        // Headers and a sliver of the body, then nothing.
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let fetcher = ReqwestFetcher::new(fast(vec![HostRule::new("*", 1, 1000)])).unwrap();
    let cancel = CancellationToken::new();
    let mut response = fetcher.get(&cancel, &raw_at(addr, "/stall")).await.unwrap();
    assert_eq!(response.content_length(), Some(1_000_000));

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let mut received = 0;
    let err = loop {
        match response.next_chunk(&cancel).await {
            Ok(Some(chunk)) => received += chunk.len(),
            Ok(None) => panic!("stalled body reported as complete"),
            Err(err) => break err,
        }
    };
    assert!(err.is_cancelled());
    assert!(received <= 10);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn rules_gain_a_catch_all() {
    let fetcher =
        ReqwestFetcher::new(fast(vec![HostRule::new("*.example.com", 2, 5)])).unwrap();
    assert_eq!(fetcher.patterns(), vec!["*.example.com", CATCH_ALL]);

    let fetcher = ReqwestFetcher::new(FetchSettings::default()).unwrap();
    assert_eq!(fetcher.patterns(), vec![CATCH_ALL]);
}

#[test]
fn zero_limits_are_rejected() {
    let err = ReqwestFetcher::new(fast(vec![HostRule::new("*", 0, 5)]))
        .err()
        .unwrap();
    assert!(matches!(err, SettingsError::ZeroConcurrency(_)));

    let err = ReqwestFetcher::new(fast(vec![HostRule::new("*", 3, 0)]))
        .err()
        .unwrap();
    assert!(matches!(err, SettingsError::ZeroRate(_)));
}
