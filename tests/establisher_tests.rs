mod common;

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use common::{Call, StubProvider};
use serde_json::json;
use vpnservice::cidr::parse_cidr;
use vpnservice::config::{ConfigResolver, RawConfig};
use vpnservice::tunnel::{CapabilityError, EstablishStep, Establisher};

fn descriptor(resolver: &ConfigResolver) -> vpnservice::TunnelDescriptor {
    let raw = match json!({
        "IPV4_ADDR": "10.1.1.1/24",
        "MTU": 1400,
        "DNS": "9.9.9.9",
        "ROUTES": ["10.0.0.0/8", "192.168.0.0/16"],
        "DISALLOWED_APPLICATIONS": ["com.example.bank", "com.example.mail"],
    }) {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    };
    resolver.resolve(&raw).unwrap()
}

fn ip(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(a, b, c, d))
}

#[test]
fn test_steps_applied_in_order() {
    let provider = StubProvider::new();
    let establisher = Establisher::new(Arc::new(provider.clone()));
    let resolver = ConfigResolver::new("test-session", false).unwrap();

    let handle = establisher.establish(&descriptor(&resolver)).unwrap();
    assert!(handle.raw_fd() >= 0);

    assert_eq!(
        provider.calls(),
        vec![
            Call::Session("test-session".to_string()),
            Call::Blocking(false),
            Call::Address(ip(10, 1, 1, 1), 24),
            Call::Mtu(1400),
            Call::Dns(ip(9, 9, 9, 9)),
            Call::Route(ip(10, 0, 0, 0), 8),
            Call::Route(ip(192, 168, 0, 0), 16),
            Call::Disallow("com.example.bank".to_string()),
            Call::Disallow("com.example.mail".to_string()),
            Call::Establish,
        ]
    );
    assert_eq!(provider.established_count(), 1);
}

#[test]
fn test_metered_hint_only_when_supported() {
    let provider = StubProvider::new().with_metered_support();
    let establisher = Establisher::new(Arc::new(provider.clone()));
    let resolver = ConfigResolver::new("metered", true).unwrap();

    establisher
        .establish(&resolver.resolve(&RawConfig::new()).unwrap())
        .unwrap();

    let calls = provider.calls();
    assert_eq!(calls[calls.len() - 2], Call::Metered(true));
    assert_eq!(calls[calls.len() - 1], Call::Establish);
}

#[test]
fn test_missing_metered_support_is_not_an_error() {
    let provider = StubProvider::new();
    let establisher = Establisher::new(Arc::new(provider.clone()));
    let resolver = ConfigResolver::new("plain", true).unwrap();

    establisher
        .establish(&resolver.resolve(&RawConfig::new()).unwrap())
        .unwrap();

    assert!(!provider
        .calls()
        .iter()
        .any(|call| matches!(call, Call::Metered(_))));
}

#[test]
fn test_rejected_step_is_reported() {
    let provider = StubProvider::failing_on("route");
    let establisher = Establisher::new(Arc::new(provider.clone()));
    let resolver = ConfigResolver::default();

    let err = establisher.establish(&descriptor(&resolver)).unwrap_err();

    assert_eq!(err.step, EstablishStep::Route(parse_cidr("10.0.0.0/8").unwrap()));
    assert!(matches!(err.source, CapabilityError::Rejected(_)));
    assert!(err.to_string().contains("add route 10.0.0.0/8"));

    // Nothing after the failing step, no descriptor, builder discarded
    assert_eq!(provider.calls().last(), Some(&Call::Route(ip(10, 0, 0, 0), 8)));
    assert_eq!(provider.established_count(), 0);
    assert_eq!(provider.builders_dropped(), 1);
}

#[test]
fn test_rejected_commit_is_reported() {
    let provider = StubProvider::failing_on("establish");
    let establisher = Establisher::new(Arc::new(provider.clone()));

    let err = establisher
        .establish(&ConfigResolver::default().resolve(&RawConfig::new()).unwrap())
        .unwrap_err();

    assert_eq!(err.step, EstablishStep::Commit);
    assert_eq!(provider.established_count(), 0);
}

#[test]
fn test_dropping_handle_closes_descriptor() {
    let provider = StubProvider::new();
    let establisher = Establisher::new(Arc::new(provider.clone()));

    let handle = establisher
        .establish(&ConfigResolver::default().resolve(&RawConfig::new()).unwrap())
        .unwrap();
    let fd = handle.raw_fd();
    assert!(!provider.is_closed(fd));

    drop(handle);
    assert!(provider.is_closed(fd));
}
