use rand::Rng;

use super::*;

fn random_version(rng: &mut impl Rng) -> Version {
    let v = Version::new(rng.random(), rng.random());
    if rng.random_bool(0.5) {
        v.eof()
    } else {
        v
    }
}

#[test]
fn test_display_is_fixed_width() {
    assert_eq!(Version::new(1, 0).to_string(), "00000000000000000001.000~");
    assert_eq!(Version::new(42, 7).eof().to_string(), "00000000000000000042.007e");
    assert_eq!(Version::MAX.to_string(), "18446744073709551615.255~");
    assert_eq!(Version::MAX.to_string().len(), ENCODED_LEN);
}

#[test]
fn test_parse_roundtrip_random() {
    let mut rng = rand::rng();
    for _ in 0..1000 {
        let v = random_version(&mut rng);
        let parsed: Version = v.to_string().parse().unwrap();
        assert!(parsed.exact_eq(&v), "{} did not round-trip", v);
    }
}

#[test]
fn test_string_order_matches_compare() {
    let mut rng = rand::rng();
    for _ in 0..1000 {
        // Narrow ranges so equal p values actually occur.
        let a = Version::new(rng.random_range(0..4), rng.random_range(0..4));
        let b = Version::new(rng.random_range(0..4), rng.random_range(0..4));
        assert_eq!(
            a.to_string().cmp(&b.to_string()),
            a.cmp(&b),
            "{} vs {}",
            a,
            b
        );
    }
}

#[test]
fn test_parse_empty_is_zero() {
    let v: Version = "".parse().unwrap();
    assert!(v.is_zero());
    assert_ne!(v, Version::MIN);
}

#[test]
fn test_parse_malformed() {
    for bad in [
        "1.0",
        "00000000000000000001-000~",
        "00000000000000000001.000x",
        "00000000000000000001.256~",
        "99999999999999999999.000~",
        "+0000000000000000001.000~",
        "00000000000000000001.0a0~",
    ] {
        assert!(
            matches!(bad.parse::<Version>(), Err(VersionError::Malformed(_))),
            "{:?} should be malformed",
            bad
        );
    }
}

#[test]
fn test_incr_clears_offset_and_eof() {
    let v = Version::new(5, 9).eof().incr().unwrap();
    assert!(v.exact_eq(&Version::new(6, 0)));
    assert!(!v.is_eof());
}

#[test]
fn test_incr_overflow() {
    assert!(matches!(
        Version::new(u64::MAX, 0).incr(),
        Err(VersionError::LimitExceeded { op: "incr", .. })
    ));
}

#[test]
fn test_decr() {
    assert_eq!(Version::new(5, 3).decr().unwrap(), Version::new(4, 0));
    assert!(matches!(
        Version::new(0, 3).decr(),
        Err(VersionError::InvalidDecrement(_))
    ));
}

#[test]
fn test_add_then_drop_returns_original() {
    let mut rng = rand::rng();
    for _ in 0..500 {
        let v = Version::new(rng.random_range(0..u64::MAX / 2), rng.random_range(0..128));
        let dp = rng.random_range(0..u64::MAX / 2);
        let df = rng.random_range(0..128);
        let back = v.add(dp, df).unwrap().drop(dp, df).unwrap();
        assert_eq!(back, v);
    }
}

#[test]
fn test_add_and_drop_bounds() {
    assert!(Version::new(u64::MAX, 0).add(1, 0).is_err());
    assert!(Version::new(0, 255).add(0, 1).is_err());
    assert!(Version::new(0, 0).drop(1, 0).is_err());
    assert!(Version::new(3, 0).drop(0, 1).is_err());
    assert_eq!(Version::new(1, 254).add(0, 1).unwrap(), Version::new(1, 255));
}

#[test]
fn test_trunc() {
    let v = Version::new(7, 12).eof().trunc();
    assert!(v.exact_eq(&Version::new(7, 0)));
}

#[test]
fn test_compare_ignores_eof() {
    let a = Version::new(3, 2);
    let b = a.eof();
    assert_eq!(a, b);
    assert!(!a.exact_eq(&b));
    assert!(!a.before(&b) && !a.after(&b));
    assert!(Version::new(3, 1).before(&a));
    assert!(Version::new(4, 0).after(&b));
    assert!(a.between(&Version::new(3, 0), &Version::new(3, 2).eof()));
    assert!(!a.between(&Version::new(3, 3), &Version::MAX));
}

#[test]
fn test_next_within_record() {
    assert!(Version::new(1, 1).next(&Version::new(1, 0)));
    assert!(!Version::new(1, 2).next(&Version::new(1, 0)));
    assert!(!Version::new(1, 0).next(&Version::new(1, 0)));
}

#[test]
fn test_next_across_records() {
    // Closing event flagged eof.
    assert!(Version::new(2, 0).next(&Version::new(1, 9).eof()));
    // Single-event record: f == 0 closes it even without the flag.
    assert!(Version::new(2, 0).next(&Version::new(1, 0)));
    // Open record cannot be followed by the next one.
    assert!(!Version::new(2, 0).next(&Version::new(1, 9)));
    // Must start the next record at offset zero.
    assert!(!Version::new(2, 1).next(&Version::new(1, 9).eof()));
    // No skipping record positions.
    assert!(!Version::new(3, 0).next(&Version::new(1, 9).eof()));
}

#[test]
fn test_next_at_limits() {
    assert!(!Version::new(1, 0).next(&Version::new(1, 255)));
    assert!(!Version::new(0, 0).next(&Version::MAX.eof()));
}

#[test]
fn test_serde_uses_string_form() {
    let v = Version::new(9, 1).eof();
    let json = serde_json::to_string(&v).unwrap();
    assert_eq!(json, "\"00000000000000000009.001e\"");
    let back: Version = serde_json::from_str(&json).unwrap();
    assert!(back.exact_eq(&v));
    assert!(serde_json::from_str::<Version>("\"garbage\"").is_err());
}
