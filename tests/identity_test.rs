//! URL identity properties: canonical form, content hash and dedup

use crawlkeeper::identity::{CONTENT_HASH_LEN, CanonicalUrl, DedupIndex, canonicalize, extract_domain};
use proptest::prelude::*;
use std::sync::Arc;

fn hash(raw: &str) -> String {
    canonicalize(raw).unwrap().1
}

fn canonical(raw: &str) -> String {
    canonicalize(raw).unwrap().0
}

#[test]
fn test_path_traversal_resolution() {
    assert_eq!(canonical("https://uconn.edu/a/../b/./c/../d"), "https://uconn.edu/b/d");
    for raw in [
        "https://uconn.edu/../../etc",
        "https://uconn.edu/a/./b/../../c/",
        "https://uconn.edu/x/y/z/../../../..",
    ] {
        let out = canonical(raw);
        assert!(!out.contains("/../"), "{out}");
        assert!(!out.contains("/./"), "{out}");
        assert!(!out.ends_with("/.."), "{out}");
    }
}

#[test]
fn test_case_insensitive_hash_collision() {
    let lower = hash("https://uconn.edu/page");
    assert_eq!(hash("https://uconn.edu/PAGE"), lower);
    assert_eq!(hash("https://uconn.edu/Page"), lower);
    assert_eq!(hash("HTTPS://UCONN.EDU/page"), lower);
    // The canonical string keeps the path's case
    assert_eq!(canonical("https://uconn.edu/Page"), "https://uconn.edu/Page");
}

#[test]
fn test_default_port_removal() {
    assert_eq!(canonical("https://uconn.edu:443/x"), "https://uconn.edu/x");
    assert_eq!(canonical("http://uconn.edu:80/x"), "http://uconn.edu/x");
    assert_eq!(canonical("https://uconn.edu:8443/x"), "https://uconn.edu:8443/x");
    assert_eq!(canonical("http://uconn.edu:443/x"), "http://uconn.edu:443/x");
}

#[test]
fn test_fragment_hash_sensitivity() {
    let (canon_a, hash_a) = canonicalize("https://uconn.edu/p#a").unwrap();
    let (canon_b, hash_b) = canonicalize("https://uconn.edu/p#b").unwrap();
    let (canon_bare, hash_bare) = canonicalize("https://uconn.edu/p").unwrap();

    assert_eq!(canon_a, canon_b);
    assert_eq!(canon_a, canon_bare);
    assert_ne!(hash_a, hash_b);
    assert_ne!(hash_a, hash_bare);
    assert_ne!(hash_b, hash_bare);
}

#[test]
fn test_trailing_slash_preservation() {
    assert_eq!(canonical("https://uconn.edu"), "https://uconn.edu");
    assert_eq!(canonical("https://uconn.edu/"), "https://uconn.edu/");
    assert_eq!(canonical("https://uconn.edu/dir/"), "https://uconn.edu/dir/");
    assert_ne!(hash("https://uconn.edu"), hash("https://uconn.edu/"));
}

#[test]
fn test_query_sort_stability() {
    let sorted = canonical("https://uconn.edu/s?b=2&a=1&c=3");
    assert_eq!(sorted, "https://uconn.edu/s?a=1&b=2&c=3");
    assert_eq!(canonical(&sorted), sorted);
    assert_eq!(hash("https://uconn.edu/s?b=2&a=1&c=3"), hash(&sorted));
}

#[test]
fn test_whitespace_trimmed_and_rejected() {
    assert_eq!(canonical("  https://uconn.edu/x \n"), "https://uconn.edu/x");
    assert!(canonicalize("https://uconn.edu/a b").is_err());
}

#[test]
fn test_extract_domain() {
    assert_eq!(extract_domain("https://Sub.UConn.edu:8443/x").unwrap(), "sub.uconn.edu");
    assert!(extract_domain("not-a-url").is_err());
}

#[test]
fn test_dedup_index_folds_equivalent_urls() {
    let index = DedupIndex::new();
    assert!(index.insert_url("https://uconn.edu/Page").unwrap().is_some());
    assert!(index.insert_url("https://UCONN.edu:443/page").unwrap().is_none());
    assert!(index.insert_url("https://uconn.edu/page#frag").unwrap().is_some());
    assert_eq!(index.len(), 2);

    let reloaded = DedupIndex::from_hashes(index.hashes());
    assert!(!reloaded.is_new(&hash("https://uconn.edu/PAGE")));
}

#[test]
fn test_concurrent_marking_admits_exactly_one() {
    let index = Arc::new(DedupIndex::new());
    let key = hash("https://uconn.edu/contested");
    let winners: usize = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let index = Arc::clone(&index);
                let key = key.clone();
                scope.spawn(move || usize::from(index.check_and_mark(&key)))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });
    assert_eq!(winners, 1);
}

fn url_strategy() -> impl Strategy<Value = String> {
    let scheme = prop_oneof![Just("http"), Just("https"), Just("HTTPS")];
    let host = "[a-zA-Z]{1,8}(\\.[a-zA-Z]{2,4}){1,2}";
    let port = prop_oneof![Just(String::new()), (1u16..65535).prop_map(|p| format!(":{p}"))];
    let segment = prop_oneof!["[a-zA-Z0-9_-]{1,6}", Just(".".to_string()), Just("..".to_string()), Just(String::new())];
    let path = prop::collection::vec(segment, 0..6).prop_map(|segs| {
        segs.iter().map(|s| format!("/{s}")).collect::<String>()
    });
    let param = ("[a-z]{1,4}", "[a-zA-Z0-9]{0,4}").prop_map(|(k, v)| format!("{k}={v}"));
    let query = prop_oneof![
        Just(String::new()),
        prop::collection::vec(param, 1..5).prop_map(|ps| format!("?{}", ps.join("&"))),
    ];
    (scheme, host, port, path, query)
        .prop_map(|(scheme, host, port, path, query)| format!("{scheme}://{host}{port}{path}{query}"))
}

proptest! {
    #[test]
    fn prop_canonicalization_is_idempotent(raw in url_strategy()) {
        let once = canonicalize(&raw).unwrap();
        let twice = canonicalize(&once.0).unwrap();
        prop_assert_eq!(&twice, &once);
        prop_assert_eq!(once.1.len(), CONTENT_HASH_LEN);
        prop_assert!(!once.0.contains("/../") && !once.0.contains("/./"));
    }

    #[test]
    fn prop_fragment_never_in_canonical(raw in url_strategy(), frag in "[a-zA-Z0-9]{1,6}") {
        let with_fragment = CanonicalUrl::parse(&format!("{raw}#{frag}")).unwrap();
        let without = CanonicalUrl::parse(&raw).unwrap();
        prop_assert_eq!(with_fragment.as_str(), without.as_str());
        prop_assert_eq!(with_fragment.fragment(), Some(frag.as_str()));
    }
}
