mod support;

use std::thread;

use anyhow::Result;

use support::*;

#[test]
fn second_get_is_served_from_cache() -> Result<()> {
    let upstream = TestUpstream::http_ok("cached-response")?;
    let proxy = TestProxy::start(default_test_settings())?;
    let url = format!("http://127.0.0.1:{}/page", upstream.port());

    let first = proxy.get(&url)?;
    let second = proxy.get(&url)?;

    assert_eq!(status_line(&first), "HTTP/1.0 200 OK");
    assert!(first.ends_with("cached-response"), "{first}");
    assert_eq!(first, second);
    assert_eq!(upstream.request_count(), 1);
    assert_eq!(upstream.request_lines(), vec!["GET /page HTTP/1.0".to_string()]);

    let stats = proxy.handle().cache().stats();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.total_bytes, first.len() as u64);
    proxy.shutdown();
    Ok(())
}

#[test]
fn shutdown_drains_workers_and_frees_the_cache() -> Result<()> {
    let upstream = TestUpstream::http_ok("kept")?;
    let proxy = TestProxy::start(default_test_settings())?;
    proxy.get(&format!("http://127.0.0.1:{}/one", upstream.port()))?;
    proxy.get(&format!("http://127.0.0.1:{}/two", upstream.port()))?;

    let cache = proxy.cache();
    assert_eq!(cache.stats().entries, 2);

    proxy.shutdown();

    let stats = cache.stats();
    assert_eq!(stats.entries, 0);
    assert_eq!(stats.total_bytes, 0);
    Ok(())
}

#[test]
fn distinct_paths_are_cached_separately() -> Result<()> {
    let upstream = TestUpstream::http_ok("body")?;
    let proxy = TestProxy::start(default_test_settings())?;

    proxy.get(&format!("http://127.0.0.1:{}/a", upstream.port()))?;
    proxy.get(&format!("http://127.0.0.1:{}/b", upstream.port()))?;
    proxy.get(&format!("http://127.0.0.1:{}/a", upstream.port()))?;

    assert_eq!(upstream.request_count(), 2);
    assert_eq!(proxy.handle().cache().stats().entries, 2);
    Ok(())
}

#[test]
fn oversized_response_is_relayed_but_not_cached() -> Result<()> {
    let body = "x".repeat(4000);
    let upstream = TestUpstream::http_ok(&body)?;
    let proxy = TestProxy::start(default_test_settings())?;
    let url = format!("http://127.0.0.1:{}/big", upstream.port());

    let first = proxy.get(&url)?;
    assert!(first.ends_with(&body));
    let second = proxy.get(&url)?;
    assert_eq!(first, second);

    assert_eq!(upstream.request_count(), 2);
    assert_eq!(proxy.handle().cache().stats().entries, 0);
    Ok(())
}

#[test]
fn non_get_methods_are_not_implemented() -> Result<()> {
    let upstream = TestUpstream::http_ok("unused")?;
    let proxy = TestProxy::start(default_test_settings())?;

    let response = proxy.send(&format!(
        "POST http://127.0.0.1:{}/form HTTP/1.0\r\nContent-Length: 0\r\n\r\n",
        upstream.port()
    ))?;

    assert!(status_line(&response).starts_with("HTTP/1.0 501"), "{response}");
    assert_eq!(upstream.request_count(), 0);
    Ok(())
}

#[test]
fn malformed_request_gets_bad_request() -> Result<()> {
    let proxy = TestProxy::start(default_test_settings())?;
    let response = proxy.send("NONSENSE\r\n\r\n")?;
    assert!(status_line(&response).starts_with("HTTP/1.0 400"), "{response}");

    let response = proxy.send("GET http://example.com:notaport/ HTTP/1.0\r\n\r\n")?;
    assert!(status_line(&response).starts_with("HTTP/1.0 400"), "{response}");
    Ok(())
}

#[test]
fn unreachable_origin_gets_not_found() -> Result<()> {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.local_addr()?.port()
    };
    let proxy = TestProxy::start(default_test_settings())?;

    let response = proxy.get(&format!("http://127.0.0.1:{port}/"))?;
    assert!(status_line(&response).starts_with("HTTP/1.0 404"), "{response}");
    assert!(response.contains("Proxy couldn't find the server"));
    assert_eq!(proxy.handle().cache().stats().entries, 0);
    Ok(())
}

#[test]
fn concurrent_clients_share_the_cache() -> Result<()> {
    let upstream = TestUpstream::http_ok("shared")?;
    let mut settings = default_test_settings();
    settings.worker_count = 4;
    settings.queue_capacity = 2;
    let proxy = TestProxy::start(settings)?;
    let addr = proxy.addr();
    let port = upstream.port();

    let clients: Vec<_> = (0..16)
        .map(|i| {
            thread::spawn(move || {
                let request =
                    format!("GET http://127.0.0.1:{port}/item/{} HTTP/1.0\r\n\r\n", i % 4);
                send_raw(addr, &request)
            })
        })
        .collect();

    for client in clients {
        let response = client.join().expect("client thread panicked")?;
        assert_eq!(status_line(&response), "HTTP/1.0 200 OK");
        assert!(response.ends_with("shared"), "{response}");
    }

    let stats = proxy.handle().cache().stats();
    assert_eq!(stats.entries, 4);
    assert!(stats.total_bytes <= stats.capacity);
    assert!(upstream.request_count() >= 4);
    assert!(upstream.request_count() <= 16);
    Ok(())
}

#[test]
fn access_log_reports_cache_hits() -> Result<()> {
    let logs = LogCapture::new("info");
    let upstream = TestUpstream::http_ok("logged")?;
    let proxy = TestProxy::start(default_test_settings())?;
    let url = format!("http://127.0.0.1:{}/logged?token=secret", upstream.port());

    proxy.get(&url)?;
    proxy.get(&url)?;
    proxy.shutdown();

    let text = logs.text();
    assert!(text.contains("cache_lookup=\"miss\""), "{text}");
    assert!(text.contains("cache_store=\"stored\""), "{text}");
    assert!(text.contains("cache_lookup=\"hit\""), "{text}");
    assert!(text.contains("path=\"/logged\""), "{text}");
    assert!(!text.contains("secret"), "query string leaked into logs: {text}");
    Ok(())
}
