mod common;

use common::{kasp, kasp_ok};
use regex::Regex;

const POLICY: &str = r#"{
    "name": "lab",
    "description": "Short lived keys",
    "dnskey_ttl": "1h",
    "ksk_ttl": "1d",
    "soa_ttl": "1h",
    "soa_min": "1h",
    "propagation_delay": "5m",
    "ksk_propagation_delay": "10m",
    "publish_safety": 60,
    "retire_safety": 60,
    "zsk_signature_lifetime": "14d",
    "ksk": {"algorithm": 13, "bits": 256, "lifetime": "365d", "repository": "softhsm"},
    "zsk": {"algorithm": 13, "bits": 256, "lifetime": "30d", "repository": "softhsm"}
}"#;

#[test]
fn first_ksk_comes_up() {
    let dir = tempfile::TempDir::new().unwrap();
    let dir = dir.path();
    std::fs::write(dir.join("lab.json"), POLICY).unwrap();

    kasp_ok(dir, &["create"]);
    kasp_ok(dir, &["set", "faketime", "2024-01-01T00:00:00Z"]);
    kasp_ok(dir, &["repository", "add", "softhsm"]);
    kasp_ok(dir, &["policy", "import", "lab.json"]);
    kasp_ok(dir, &["zone", "add", "Example.NET.", "--policy", "lab"]);
    let out = kasp_ok(dir, &["generate", "--interval", "30d"]);
    assert_eq!(out, "lab              4 key(s) generated\n");

    let out = kasp_ok(dir, &["-q", "enforce"]);
    let publish =
        Regex::new(r"(?m)^example\.net +KSK +publish +\d+ +13 2024-01-01 00:00:00$").unwrap();
    assert!(publish.is_match(&out), "{out}");
    let active =
        Regex::new(r"(?m)^example\.net +ZSK +active +\d+ +13 2024-01-01 00:00:00$").unwrap();
    assert!(active.is_match(&out), "{out}");
    assert!(!out.contains("DS records"));

    // The DNSKEY has propagated two days later.
    kasp_ok(dir, &["set", "faketime", "2024-01-03T00:00:00Z"]);
    let out = kasp_ok(dir, &["-q", "enforce"]);
    let ready = Regex::new(r"(?m)^example\.net +KSK +ready +(\d+) ").unwrap();
    let keyid = ready.captures(&out).expect(&out)[1].to_string();
    assert!(out.ends_with("The DS records at the parent need to be updated.\n"));

    kasp_ok(dir, &["-q", "key", "ds-seen", "example.net", &keyid]);
    let out = kasp_ok(dir, &["key", "list", "-z", "example.net"]);
    let active = Regex::new(&format!(
        r"(?m)^example\.net +KSK +active +{keyid} +13 2024-01-03 00:00:00$"
    ))
    .unwrap();
    assert!(active.is_match(&out), "{out}");

    // Nothing has died yet.
    let out = kasp_ok(dir, &["purge"]);
    assert_eq!(out, "0 dead key instance(s) removed, 0 key(s) deleted\n");
}

#[test]
fn errors_exit_non_zero() {
    let dir = tempfile::TempDir::new().unwrap();
    let dir = dir.path();

    let out = kasp(dir, &["zone", "list"]);
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("ERROR:"), "{stderr}");
    assert!(stderr.contains("... while opening datastore kasp.json"), "{stderr}");

    let out = kasp(dir, &["enforce", "--keytype", "csk"]);
    assert_eq!(out.status.code(), Some(2));
}
