//! Literal admission sequences through the sliding-window limiter, as the
//! DHT store path configures it.

use shared_types::{RateLimit, RateLimiter, Timestamp};
use std::collections::BTreeMap;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
enum Kind {
    Store,
    FindNode,
}

fn limiter() -> RateLimiter<Kind> {
    let mut per_kind = BTreeMap::new();
    per_kind.insert(Kind::Store, RateLimit::new(1.0, 2));
    RateLimiter::new(RateLimit::new(1.0, 5), per_kind)
}

#[test]
fn test_store_burst_admission_sequence() {
    let mut limiter = limiter();
    // Six stores at t = 0.0, 0.1, ..., 0.5: the per-kind window admits the
    // first two; the global window still has room for the rest, but the
    // per-kind rejection wins.
    let outcomes: Vec<bool> = (0..6)
        .map(|i| limiter.check_in(Kind::Store, Timestamp::at(0.1 * f64::from(i))))
        .collect();
    assert_eq!(outcomes, vec![true, true, false, false, false, false]);

    // After the first accepted request ages out of the window, one slot
    // reopens.
    assert!(limiter.check_in(Kind::Store, Timestamp::at(1.1)));
}

#[test]
fn test_global_window_caps_unconfigured_kinds() {
    let mut limiter = limiter();
    for i in 0..5 {
        assert!(limiter.check_in(Kind::FindNode, Timestamp::at(0.05 * f64::from(i))));
    }
    assert!(!limiter.check_in(Kind::FindNode, Timestamp::at(0.3)));
    // The sixth admits again once the oldest global entry expires.
    assert!(limiter.check_in(Kind::FindNode, Timestamp::at(1.2)));
}

#[test]
fn test_rejected_stores_do_not_consume_global_budget() {
    let mut limiter = limiter();
    for i in 0..6 {
        limiter.check_in(Kind::Store, Timestamp::at(0.1 * f64::from(i)));
    }
    // Only two stores were recorded globally; three finds still fit.
    for i in 0..3 {
        assert!(limiter.check_in(Kind::FindNode, Timestamp::at(0.6 + 0.01 * f64::from(i))));
    }
}
