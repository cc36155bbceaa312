// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use flux_core::Errnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role bits carried with every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleMask(pub u32);

impl RoleMask {
    pub const OWNER: RoleMask = RoleMask(1);
    pub const USER: RoleMask = RoleMask(2);

    pub fn has(self, role: RoleMask) -> bool {
        self.0 & role.0 != 0
    }
}

/// Identity of a request sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cred {
    pub userid: u32,
    pub rolemask: RoleMask,
}

impl Cred {
    pub fn owner(userid: u32) -> Self {
        Cred { userid, rolemask: RoleMask::OWNER }
    }

    pub fn user(userid: u32) -> Self {
        Cred { userid, rolemask: RoleMask::USER }
    }

    /// The instance owner may do anything; everyone else must match the
    /// object's userid.
    pub fn authorize(&self, object_userid: u32) -> Result<(), RpcError> {
        if self.rolemask.has(RoleMask::OWNER) || self.userid == object_userid {
            Ok(())
        } else {
            Err(RpcError::new(Errnum::Perm, None))
        }
    }
}

/// Error payload of a failed (or completed-stream) response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{errnum}{}", .text.as_deref().map(|t| format!(": {t}")).unwrap_or_default())]
pub struct RpcError {
    pub errnum: Errnum,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl RpcError {
    pub fn new(errnum: Errnum, text: Option<&str>) -> Self {
        RpcError { errnum, text: text.map(str::to_string) }
    }

    pub fn nodata() -> Self {
        RpcError { errnum: Errnum::Nodata, text: None }
    }

    pub fn is_eof(&self) -> bool {
        self.errnum.is_eof()
    }
}

impl From<Errnum> for RpcError {
    fn from(errnum: Errnum) -> Self {
        RpcError { errnum, text: None }
    }
}

/// A request envelope as seen by a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    pub sender: String,
    pub matchtag: u32,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub noresponse: bool,
    pub cred: Cred,
    #[serde(default)]
    pub payload: Value,
}

impl Message {
    /// The method part of the topic (after the service name).
    pub fn method<'a>(&'a self, service: &str) -> Option<&'a str> {
        self.topic
            .strip_prefix(service)
            .and_then(|rest| rest.strip_prefix('.'))
    }

    /// True when `self` is a cancel request aimed at `stored`: same
    /// sender, and the `matchtag` in the cancel payload names the stored
    /// request's matchtag.
    pub fn cancel_match(&self, stored: &Message) -> bool {
        if self.sender != stored.sender {
            return false;
        }
        self.payload
            .get("matchtag")
            .and_then(Value::as_u64)
            .map(|t| t == stored.matchtag as u64)
            .unwrap_or(false)
    }

    /// True when `self` is a disconnect notification covering `stored`.
    pub fn disconnect_match(&self, stored: &Message) -> bool {
        self.sender == stored.sender
    }

    /// Unpack the payload into a typed struct.
    pub fn unpack<T: serde::de::DeserializeOwned>(&self) -> Result<T, RpcError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| RpcError::new(Errnum::Proto, Some(&e.to_string())))
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
