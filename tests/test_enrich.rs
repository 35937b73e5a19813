//! Tests for forwarding header enrichment

use waymark::config::ProxyConfig;
use waymark::http::request::{Method, Request, RequestBuilder};
use waymark::proxy::enrich::{enrich, local_port, Proto};

fn request(host: &str, tls: bool) -> RequestBuilder {
    RequestBuilder::new()
        .method(Method::GET)
        .path("/index.html")
        .header("Host", host)
        .peer_addr("192.0.2.10:53412")
        .tls(tls)
}

fn build(builder: RequestBuilder) -> Request {
    builder.build().unwrap()
}

#[test]
fn test_plain_request_gets_all_headers() {
    let mut req = build(request("example.com", false));
    enrich(&mut req, &ProxyConfig::default()).unwrap();

    assert_eq!(req.header("X-Real-Ip"), Some("192.0.2.10"));
    assert_eq!(req.header("X-Forwarded-Proto"), Some("http"));
    assert_eq!(req.header("X-Forwarded-Port"), Some("80"));
    assert_eq!(req.header("Forwarded"), Some("for=192.0.2.10; proto=http"));
    // Appended later by the forwarder for non-upgrade requests
    assert_eq!(req.header("X-Forwarded-For"), None);
}

#[test]
fn test_proto_matrix() {
    let cases = [
        (true, true, "wss"),
        (true, false, "ws"),
        (false, true, "https"),
        (false, false, "http"),
    ];

    for (websocket, tls, expected) in cases {
        let mut builder = request("example.com", tls);
        if websocket {
            builder = builder.header("Upgrade", "websocket");
        }
        let mut req = build(builder);
        enrich(&mut req, &ProxyConfig::default()).unwrap();

        assert_eq!(Proto::from_facts(websocket, tls).as_str(), expected);
        assert_eq!(req.header("X-Forwarded-Proto"), Some(expected), "ws={websocket} tls={tls}");
        assert_eq!(
            req.header("Forwarded"),
            Some(format!("for=192.0.2.10; proto={expected}").as_str()),
            "ws={websocket} tls={tls}"
        );
    }
}

#[test]
fn test_websocket_overwrites_x_forwarded_for() {
    let mut req = build(
        request("example.com", false)
            .header("Upgrade", "websocket")
            .header("X-Forwarded-For", "203.0.113.99"),
    );
    enrich(&mut req, &ProxyConfig::default()).unwrap();

    assert_eq!(req.header("X-Forwarded-For"), Some("192.0.2.10"));
}

#[test]
fn test_plain_request_keeps_client_x_forwarded_for() {
    let mut req = build(request("example.com", false).header("X-Forwarded-For", "203.0.113.99"));
    enrich(&mut req, &ProxyConfig::default()).unwrap();

    assert_eq!(req.header("X-Forwarded-For"), Some("203.0.113.99"));
}

#[test]
fn test_existing_headers_are_preserved() {
    let mut req = build(
        request("example.com", true)
            .header("x-real-ip", "198.51.100.1")
            .header("X-Forwarded-Proto", "http")
            .header("X-Forwarded-Port", "8443")
            .header("Forwarded", "for=198.51.100.1; proto=http"),
    );
    enrich(&mut req, &ProxyConfig::default()).unwrap();

    assert_eq!(req.header("X-Real-Ip"), Some("198.51.100.1"));
    assert_eq!(req.header("X-Forwarded-Proto"), Some("http"));
    assert_eq!(req.header("X-Forwarded-Port"), Some("8443"));
    assert_eq!(req.header("Forwarded"), Some("for=198.51.100.1; proto=http"));
    // Replaced in place, not duplicated under another spelling
    assert_eq!(req.headers.iter().filter(|(k, _)| k.eq_ignore_ascii_case("x-real-ip")).count(), 1);
}

#[test]
fn test_empty_values_count_as_absent() {
    let mut req = build(request("example.com", false).header("X-Real-Ip", "").header("Forwarded", ""));
    enrich(&mut req, &ProxyConfig::default()).unwrap();

    assert_eq!(req.header("X-Real-Ip"), Some("192.0.2.10"));
    assert_eq!(req.header("Forwarded"), Some("for=192.0.2.10; proto=http"));
}

#[test]
fn test_client_ip_header_is_overwritten() {
    let config = ProxyConfig {
        client_ip_header: "X-Client-Ip".to_string(),
        ..ProxyConfig::default()
    };
    let mut req = build(request("example.com", false).header("X-Client-Ip", "6.6.6.6"));
    enrich(&mut req, &config).unwrap();

    assert_eq!(req.header("X-Client-Ip"), Some("192.0.2.10"));
}

#[test]
fn test_client_ip_header_reserved_names() {
    for reserved in ["X-Forwarded-For", "X-Real-Ip", "x-real-ip"] {
        let config = ProxyConfig {
            client_ip_header: reserved.to_string(),
            ..ProxyConfig::default()
        };
        let mut req = build(
            request("example.com", false)
                .header("X-Forwarded-For", "203.0.113.99")
                .header("X-Real-Ip", "198.51.100.1"),
        );
        enrich(&mut req, &config).unwrap();

        assert_eq!(req.header("X-Forwarded-For"), Some("203.0.113.99"), "{reserved}");
        assert_eq!(req.header("X-Real-Ip"), Some("198.51.100.1"), "{reserved}");
    }
}

#[test]
fn test_local_ip_extends_forwarded() {
    let config = ProxyConfig {
        local_ip: "10.9.9.9".to_string(),
        ..ProxyConfig::default()
    };

    let mut fresh = build(request("example.com", true));
    enrich(&mut fresh, &config).unwrap();
    assert_eq!(fresh.header("Forwarded"), Some("for=192.0.2.10; proto=https; by=10.9.9.9"));

    let mut existing = build(request("example.com", true).header("Forwarded", "for=198.51.100.1"));
    enrich(&mut existing, &config).unwrap();
    assert_eq!(existing.header("Forwarded"), Some("for=198.51.100.1; by=10.9.9.9"));
}

#[test]
fn test_second_enrichment_only_changes_forwarded_by() {
    let config = ProxyConfig {
        local_ip: "10.9.9.9".to_string(),
        ..ProxyConfig::default()
    };
    let mut req = build(request("example.com:8080", false));

    enrich(&mut req, &config).unwrap();
    let after_first = req.headers.clone();
    enrich(&mut req, &config).unwrap();

    for name in ["X-Real-Ip", "X-Forwarded-Proto", "X-Forwarded-Port"] {
        assert_eq!(req.header(name), after_first.get(name), "{name}");
    }
    // One enrichment per request: a repeat appends another by= element
    assert_eq!(
        req.header("Forwarded"),
        Some("for=192.0.2.10; proto=http; by=10.9.9.9; by=10.9.9.9")
    );
}

#[test]
fn test_second_enrichment_without_local_ip_is_stable() {
    let mut req = build(request("example.com", true));
    enrich(&mut req, &ProxyConfig::default()).unwrap();
    let after_first = req.headers.clone();
    enrich(&mut req, &ProxyConfig::default()).unwrap();

    assert_eq!(req.headers, after_first);
}

#[test]
fn test_tls_header_only_on_tls() {
    let config = ProxyConfig {
        tls_header: "X-Edge-Tls".to_string(),
        tls_header_value: "on".to_string(),
        ..ProxyConfig::default()
    };

    let mut plain = build(request("example.com", false).header("X-Edge-Tls", "spoofed"));
    enrich(&mut plain, &config).unwrap();
    assert_eq!(plain.header("X-Edge-Tls"), Some("spoofed"));

    let mut tls = build(request("example.com", true).header("X-Edge-Tls", "spoofed"));
    enrich(&mut tls, &config).unwrap();
    assert_eq!(tls.header("X-Edge-Tls"), Some("on"));
}

#[test]
fn test_forwarded_port_from_host() {
    let mut explicit = build(request("example.com:8080", false));
    enrich(&mut explicit, &ProxyConfig::default()).unwrap();
    assert_eq!(explicit.header("X-Forwarded-Port"), Some("8080"));

    let mut tls_default = build(request("example.com", true));
    enrich(&mut tls_default, &ProxyConfig::default()).unwrap();
    assert_eq!(tls_default.header("X-Forwarded-Port"), Some("443"));
}

#[test]
fn test_local_port_derivation() {
    assert_eq!(local_port("example.com:8080", false), "8080");
    assert_eq!(local_port("example.com", true), "443");
    assert_eq!(local_port("example.com", false), "80");
    assert_eq!(local_port("[::1]:", false), "80");
    assert_eq!(local_port("[::1]:", true), "443");
    assert_eq!(local_port("example.com:", false), "80");
    assert_eq!(local_port(":8080", true), "443");
    assert_eq!(local_port("", true), "");
}

#[test]
fn test_missing_host_sets_empty_port() {
    let mut req = RequestBuilder::new()
        .method(Method::GET)
        .path("/")
        .peer_addr("192.0.2.10:1")
        .build()
        .unwrap();
    enrich(&mut req, &ProxyConfig::default()).unwrap();

    assert_eq!(req.header("X-Forwarded-Port"), Some(""));
}

#[test]
fn test_ipv6_peer() {
    let mut req = build(request("example.com", false).peer_addr("[2001:db8::7]:40000"));
    enrich(&mut req, &ProxyConfig::default()).unwrap();

    assert_eq!(req.header("X-Real-Ip"), Some("2001:db8::7"));
    assert_eq!(req.header("Forwarded"), Some("for=2001:db8::7; proto=http"));
}

#[test]
fn test_malformed_peer_leaves_request_untouched() {
    let config = ProxyConfig {
        client_ip_header: "X-Client-Ip".to_string(),
        local_ip: "10.9.9.9".to_string(),
        tls_header: "X-Edge-Tls".to_string(),
        tls_header_value: "on".to_string(),
        ..ProxyConfig::default()
    };
    let mut req = build(request("example.com", true).peer_addr("not-an-address"));
    let before = req.headers.clone();

    let err = enrich(&mut req, &config).unwrap_err();

    assert_eq!(err.addr(), "not-an-address");
    assert_eq!(req.headers, before);
}
