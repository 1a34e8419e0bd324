//! Tests for Store.

use tollgate_store::{Claim, IdempotencyStatus, Store, StoreError};

const TTL: i64 = 60_000;

fn store() -> Store {
    Store::in_memory().unwrap()
}

fn claimed(claim: Claim) -> tollgate_store::LeaseToken {
    match claim {
        Claim::Claimed(token) => token,
        other => panic!("expected claim, got {other:?}"),
    }
}

#[test]
fn first_claim_inserts_pending() {
    let s = store();
    let token = claimed(s.claim_idempotency("k1", "fp", 1_000, TTL).unwrap());
    assert_eq!(token.generation, 1);

    let record = s.idempotency("k1").unwrap().unwrap();
    assert_eq!(record.token(), token);
    assert_eq!(record.status, IdempotencyStatus::Pending);
    assert_eq!(record.created_at, 1_000);
    assert_eq!(record.expires_at, 1_000 + TTL);
    assert!(record.response_body.is_none());
}

#[test]
fn second_claim_sees_pending() {
    let s = store();
    claimed(s.claim_idempotency("k1", "fp", 1_000, TTL).unwrap());
    let claim = s.claim_idempotency("k1", "fp", 1_001, TTL).unwrap();
    assert!(matches!(claim, Claim::Pending(r) if r.key == "k1"));
}

#[test]
fn completed_record_is_returned() {
    let s = store();
    let token = claimed(s.claim_idempotency("k1", "fp", 1_000, TTL).unwrap());
    assert!(s.complete_idempotency("k1", token, 201, b"made").unwrap());

    match s.claim_idempotency("k1", "fp", 2_000, TTL).unwrap() {
        Claim::Completed(record) => {
            assert_eq!(record.response_status, Some(201));
            assert_eq!(record.response_body.as_deref(), Some(&b"made"[..]));
        }
        other => panic!("expected completed, got {other:?}"),
    }
}

#[test]
fn different_fingerprint_conflicts() {
    let s = store();
    let token = claimed(s.claim_idempotency("k1", "fp-a", 1_000, TTL).unwrap());
    s.complete_idempotency("k1", token, 200, b"a").unwrap();

    let c = s.claim_idempotency("k1", "fp-b", 1_500, TTL).unwrap();
    assert!(matches!(c, Claim::Conflict(r) if r.fingerprint == "fp-a"));

    // The original result is untouched.
    let record = s.idempotency("k1").unwrap().unwrap();
    assert_eq!(record.status, IdempotencyStatus::Completed);
    assert_eq!(record.response_body.as_deref(), Some(&b"a"[..]));
}

#[test]
fn terminal_states_are_immutable() {
    let s = store();
    let token = claimed(s.claim_idempotency("k1", "fp", 1_000, TTL).unwrap());
    assert!(s.complete_idempotency("k1", token, 200, b"first").unwrap());
    assert!(!s.complete_idempotency("k1", token, 200, b"again").unwrap());
    assert!(!s.fail_idempotency("k1", token, 500).unwrap());

    let record = s.idempotency("k1").unwrap().unwrap();
    assert_eq!(record.response_body.as_deref(), Some(&b"first"[..]));
}

#[test]
fn failed_record_is_reclaimed() {
    let s = store();
    let first = claimed(s.claim_idempotency("k1", "fp", 1_000, TTL).unwrap());
    assert!(s.fail_idempotency("k1", first, 502).unwrap());
    assert_eq!(
        s.idempotency("k1").unwrap().unwrap().status,
        IdempotencyStatus::Failed
    );

    let second = claimed(s.claim_idempotency("k1", "fp", 1_000, TTL).unwrap());
    assert_eq!(second.generation, 2);
    let record = s.idempotency("k1").unwrap().unwrap();
    assert_eq!(record.token(), second);
    assert_ne!(record.token(), first);

    // The stale lease can no longer finalize the record.
    assert!(!s.complete_idempotency("k1", first, 200, b"stale").unwrap());
    assert!(s.complete_idempotency("k1", second, 200, b"fresh").unwrap());
}

#[test]
fn failed_record_with_other_fingerprint_conflicts() {
    let s = store();
    let token = claimed(s.claim_idempotency("k1", "fp-a", 1_000, TTL).unwrap());
    s.fail_idempotency("k1", token, 500).unwrap();
    let claim = s.claim_idempotency("k1", "fp-b", 1_100, TTL).unwrap();
    assert!(matches!(claim, Claim::Conflict(_)));
}

#[test]
fn expired_record_is_replaced_on_claim() {
    let s = store();
    let old = claimed(s.claim_idempotency("k1", "fp-a", 1_000, TTL).unwrap());

    // Even a different fingerprint may claim once the old record expired.
    let now = 1_000 + TTL;
    let fresh = claimed(s.claim_idempotency("k1", "fp-b", now, TTL).unwrap());
    assert_eq!(fresh.created_at, now);
    assert!(!s.complete_idempotency("k1", old, 200, b"stale").unwrap());
}

#[test]
fn sweep_removes_expired_rows() {
    let s = store();
    claimed(s.claim_idempotency("old", "fp", 0, 100).unwrap());
    claimed(s.claim_idempotency("new", "fp", 0, 10_000).unwrap());
    s.append_event("127.0.0.1", "/a", 0, 100).unwrap();
    s.append_event("127.0.0.1", "/b", 0, 10_000).unwrap();

    let stats = s.sweep(100).unwrap();
    assert_eq!(stats.idempotency, 1);
    assert_eq!(stats.events, 1);

    assert!(s.idempotency("old").unwrap().is_none());
    assert!(s.idempotency("new").unwrap().is_some());
    let events = s.events(0, 10).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].path, "/b");
}

#[test]
fn events_are_ordered_by_id() {
    let s = store();
    let a = s.append_event("1.1.1.1", "/a", 10, TTL).unwrap();
    let b = s.append_event("1.1.1.1", "/b", 5, TTL).unwrap();
    let c = s.append_event("2.2.2.2", "/c", 7, TTL).unwrap();
    assert!(a < b && b < c);

    let all = s.events(0, 10).unwrap();
    let paths: Vec<&str> = all.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, ["/a", "/b", "/c"]);

    let tail = s.events(a, 1).unwrap();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].id, b);
}

#[test]
fn close_is_idempotent_and_fails_later_calls() {
    let s = store();
    s.ping().unwrap();
    s.close().unwrap();
    s.close().unwrap();
    assert!(s.is_closed());
    assert!(matches!(s.ping(), Err(StoreError::Closed)));
    assert!(matches!(
        s.claim_idempotency("k", "fp", 0, TTL),
        Err(StoreError::Closed)
    ));
}

#[test]
fn file_store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tollgate.db");

    {
        let s = Store::open(&path).unwrap();
        let token = claimed(s.claim_idempotency("k1", "fp", 1_000, TTL).unwrap());
        s.complete_idempotency("k1", token, 200, b"ok").unwrap();
        s.append_event("127.0.0.1", "/x", 1_000, TTL).unwrap();
    }

    let s = Store::open(&path).unwrap();
    let record = s.idempotency("k1").unwrap().unwrap();
    assert_eq!(record.status, IdempotencyStatus::Completed);
    assert_eq!(s.events(0, 10).unwrap().len(), 1);
}

#[test]
fn concurrent_claims_grant_one_lease() {
    let s = std::sync::Arc::new(store());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let s = s.clone();
            std::thread::spawn(move || s.claim_idempotency("k1", "fp", 1_000 + i, TTL))
        })
        .collect();

    let claims: Vec<Claim> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();
    let winners = claims
        .iter()
        .filter(|c| matches!(c, Claim::Claimed(_)))
        .count();
    assert_eq!(winners, 1);
    assert!(
        claims
            .iter()
            .all(|c| matches!(c, Claim::Claimed(_) | Claim::Pending(_)))
    );
}
