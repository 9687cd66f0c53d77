use reach_diag::ports::{common_ports, dedup_ports, parse_ports_str};

#[test]
fn parse_single_and_ranges_and_comments() {
    let input = r#"
        # common ports
        22
        80, 443 # web
        8000-8002
        8001  # duplicate
        # blank line follows

    "#;

    let ports = parse_ports_str(input).expect("parse ok");
    // Dedup, preserve order of first appearance
    assert_eq!(ports, vec![22, 80, 443, 8000, 8001, 8002]);
}

#[test]
fn invalid_port_rejected() {
    assert!(parse_ports_str("0\n").is_err());
    assert!(parse_ports_str("22,abc").is_err());
}

#[test]
fn dedup_preserves_first_occurrence() {
    assert_eq!(dedup_ports(&[80, 443, 80, 22]), vec![80, 443, 22]);
}

#[test]
fn presets_are_unique_and_named() {
    let presets = common_ports();
    let ports: Vec<u16> = presets.iter().map(|p| p.port).collect();
    assert_eq!(dedup_ports(&ports).len(), ports.len());
    assert!(presets.iter().all(|p| !p.name.is_empty()));
}
