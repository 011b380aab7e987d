//! Integration tests for the constitutional gate
//!
//! - Lockout survives a restart through the file store
//! - No token is issued once a lockout is in effect
//! - Tokens expire and do not survive tampering

use std::sync::Arc;
use std::thread;

use pretty_assertions::assert_eq;

use gasket::core::{ConstitutionalGate, FileLockoutStore, GateSettings, LockoutStore, TokenSigner};
use gasket::types::{ClearanceReason, ClearanceToken, GateState, TokenRejection};

fn file_gate(store: Arc<FileLockoutStore>, key: &[u8]) -> ConstitutionalGate {
    ConstitutionalGate::new(
        GateSettings::default(),
        store,
        TokenSigner::new(key, 500).unwrap(),
    )
}

#[test]
fn test_lockout_restored_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileLockoutStore::new(dir.path().join("lockout.json")));

    {
        let gate = file_gate(store.clone(), b"k");
        let result = gate.issue_token("EXECUTE_TRADE", 0.3);
        assert_eq!(result.reason, ClearanceReason::R504_ENTROPY_SEVERE);
    }

    let restarted = file_gate(Arc::new(FileLockoutStore::new(dir.path().join("lockout.json"))), b"k");
    assert_eq!(restarted.state(), GateState::Locked);
    assert!(restarted
        .status()
        .lockout
        .unwrap()
        .reason
        .starts_with("KINETIC_ENTROPY_SEVERE"));
    assert_eq!(
        restarted.issue_token("EXECUTE_TRADE", 0.0).reason,
        ClearanceReason::R501_SYSTEM_LOCKED
    );
}

#[test]
fn test_reset_removes_file_and_reopens() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lockout.json");
    let gate = file_gate(Arc::new(FileLockoutStore::new(&path)), b"k");

    gate.trigger_lockout("MANUAL");
    assert!(path.exists());

    gate.reset().unwrap();
    assert!(!path.exists());
    assert_eq!(gate.state(), GateState::Open);
    assert!(gate.issue_token("EXECUTE_TRADE", 0.01).is_granted());
}

#[test]
fn test_corrupt_lockout_file_fails_closed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lockout.json");
    std::fs::write(&path, "garbage").unwrap();

    let gate = file_gate(Arc::new(FileLockoutStore::new(&path)), b"k");
    assert!(gate.is_locked());
    assert_eq!(
        gate.issue_token("EXECUTE_TRADE", 0.0).reason,
        ClearanceReason::R501_SYSTEM_LOCKED
    );

    // Repairing the store unlocks; nothing was cached.
    std::fs::remove_file(&path).unwrap();
    assert!(!gate.is_locked());
}

#[test]
fn test_no_token_issued_after_concurrent_lockout() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileLockoutStore::new(dir.path().join("lockout.json")));
    let gate = Arc::new(file_gate(store.clone(), b"k"));

    let issuers: Vec<_> = (0..4)
        .map(|_| {
            let gate = gate.clone();
            thread::spawn(move || {
                (0..200)
                    .filter_map(|_| gate.issue_token("EXECUTE_TRADE", 0.01).token)
                    .collect::<Vec<ClearanceToken>>()
            })
        })
        .collect();

    let locker = {
        let gate = gate.clone();
        thread::spawn(move || gate.trigger_lockout("CONCURRENT_BREACH"))
    };

    let record = locker.join().unwrap();
    let tokens: Vec<ClearanceToken> = issuers
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();

    let locked_at = record.timestamp.timestamp_millis();
    for token in &tokens {
        assert!(token.payload.timestamp_ms <= locked_at);
    }
    assert_eq!(gate.status().tokens_issued as usize, tokens.len());
    assert_eq!(
        gate.issue_token("EXECUTE_TRADE", 0.0).reason,
        ClearanceReason::R501_SYSTEM_LOCKED
    );
    assert_eq!(store.load().unwrap().unwrap().reason, "CONCURRENT_BREACH");
}

#[test]
fn test_token_expires_after_ttl() {
    let signer = TokenSigner::new(b"k", 500).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let gate = file_gate(Arc::new(FileLockoutStore::new(dir.path().join("l.json"))), b"k");

    let token = gate.issue_token("EXECUTE_TRADE", 0.0).token.unwrap();
    let issued = token.payload.timestamp_ms;

    assert_eq!(signer.verify_at(&token, issued + 499), Ok(()));
    assert_eq!(
        signer.verify_at(&token, issued + 501),
        Err(TokenRejection::R513_TOKEN_EXPIRED)
    );
    assert_eq!(
        signer.verify_at(&token, issued - 1_000),
        Err(TokenRejection::R514_TOKEN_FROM_FUTURE)
    );
}

#[test]
fn test_tampered_token_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let gate = file_gate(Arc::new(FileLockoutStore::new(dir.path().join("l.json"))), b"k");
    let token = gate.issue_token("EXECUTE_TRADE", 0.01).token.unwrap();

    let mut forged = token.clone();
    forged.payload.intent = "WITHDRAW_ALL".to_string();
    assert_eq!(gate.verify_token(&forged), Err(TokenRejection::R512_TOKEN_BAD_SIGNATURE));

    let mut hex = token.to_hex();
    let flipped = if hex.ends_with('0') { '1' } else { '0' };
    hex.pop();
    hex.push(flipped);
    assert_eq!(gate.verify_hex(&hex), Err(TokenRejection::R512_TOKEN_BAD_SIGNATURE));
    assert_eq!(gate.verify_hex("zz"), Err(TokenRejection::R511_TOKEN_MALFORMED));

    // A different key never validates.
    let other = file_gate(Arc::new(FileLockoutStore::new(dir.path().join("o.json"))), b"other");
    assert_eq!(other.verify_token(&token), Err(TokenRejection::R512_TOKEN_BAD_SIGNATURE));
}
