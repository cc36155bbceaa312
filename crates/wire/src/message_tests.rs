// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

fn request(sender: &str, matchtag: u32) -> Message {
    Message {
        topic: "svc.exec".to_string(),
        sender: sender.to_string(),
        matchtag,
        streaming: true,
        noresponse: false,
        cred: Cred::user(100),
        payload: json!({}),
    }
}

fn cancel(sender: &str, target_tag: u32) -> Message {
    Message {
        topic: "svc.cancel".to_string(),
        sender: sender.to_string(),
        matchtag: 99,
        streaming: false,
        noresponse: true,
        cred: Cred::user(100),
        payload: json!({"matchtag": target_tag}),
    }
}

#[test]
fn cancel_matches_sender_and_matchtag() {
    let stored = request("route-1", 7);
    assert!(cancel("route-1", 7).cancel_match(&stored));
    assert!(!cancel("route-1", 8).cancel_match(&stored));
    assert!(!cancel("route-2", 7).cancel_match(&stored));
}

#[test]
fn cancel_without_matchtag_matches_nothing() {
    let stored = request("route-1", 7);
    let mut c = cancel("route-1", 7);
    c.payload = json!({});
    assert!(!c.cancel_match(&stored));
}

#[test]
fn disconnect_matches_sender_only() {
    let stored = request("route-1", 7);
    assert!(cancel("route-1", 999).disconnect_match(&stored));
    assert!(!cancel("route-2", 7).disconnect_match(&stored));
}

#[test]
fn method_strips_service_prefix() {
    let msg = request("route-1", 1);
    assert_eq!(msg.method("svc"), Some("exec"));
    assert_eq!(msg.method("svc.exec"), None);
    assert_eq!(msg.method("other"), None);
}

#[test]
fn owner_is_always_authorized() {
    assert!(Cred::owner(0).authorize(1234).is_ok());
    assert!(Cred::user(1234).authorize(1234).is_ok());
    let err = Cred::user(99).authorize(1234).unwrap_err();
    assert_eq!(err.errnum, flux_core::Errnum::Perm);
}

#[test]
fn rpc_error_display_includes_text() {
    let e = RpcError::new(flux_core::Errnum::Perm, Some("not yours"));
    assert_eq!(e.to_string(), "permission denied: not yours");
    let e = RpcError::nodata();
    assert_eq!(e.to_string(), "no more data");
}

#[test]
fn message_roundtrips_through_json() {
    let msg = request("route-1", 42);
    let bytes = serde_json::to_vec(&msg).unwrap();
    let back: Message = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(back, msg);
}

#[test]
fn unpack_rejects_schema_mismatch() {
    #[derive(Debug, serde::Deserialize)]
    struct Wants {
        #[allow(dead_code)]
        pid: i32,
    }
    let msg = request("route-1", 1);
    let err = msg.unpack::<Wants>().unwrap_err();
    assert_eq!(err.errnum, flux_core::Errnum::Proto);
}
