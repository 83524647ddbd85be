/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: models.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-02 10:12:41
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-06 18:03:15
 */

use serde::{Deserialize, Serialize};
use std::fmt;

pub type FetcherId = u64;
pub type AccountId = u64;

/// Transport security used when connecting to the remote POP3 server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportSecurity {
    #[default]
    None,
    /// TLS from the first byte (POP3S, usually port 995).
    #[serde(alias = "ssl", alias = "tls")]
    Implicit,
    #[serde(alias = "start_tls")]
    StartTls,
}

/// A configured rule for retrieving mail from a remote POP3 mailbox into a
/// local mailbox folder.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherRecord {
    pub id: FetcherId,
    pub owner_user_id: u64,
    pub owner_account_id: AccountId,
    pub enabled: bool,

    pub server: String,
    pub port: u16,
    pub transport_security: TransportSecurity,
    pub login: String,
    /// Stored (encrypted) form of the POP3 password.
    pub password: String,
    pub leave_on_server: bool,
    pub target_folder: String,

    // Outgoing side, not used by the runner.
    pub outgoing_enabled: bool,
    pub name: String,
    pub email: String,
    pub outgoing_server: String,
    pub outgoing_port: u16,
    pub outgoing_security: TransportSecurity,
    pub outgoing_use_auth: bool,
    pub use_signature: bool,
    pub signature: String,

    pub locked: bool,
    pub last_check_epoch_seconds: f64,
    pub check_interval_minutes: i64,
}

impl Default for FetcherRecord {
    fn default() -> Self {
        Self {
            id: 0,
            owner_user_id: 0,
            owner_account_id: 0,
            enabled: true,
            server: String::new(),
            port: 110,
            transport_security: TransportSecurity::None,
            login: String::new(),
            password: String::new(),
            leave_on_server: true,
            target_folder: String::new(),
            outgoing_enabled: false,
            name: String::new(),
            email: String::new(),
            outgoing_server: String::new(),
            outgoing_port: 25,
            outgoing_security: TransportSecurity::None,
            outgoing_use_auth: true,
            use_signature: false,
            signature: String::new(),
            locked: false,
            last_check_epoch_seconds: 0.0,
            check_interval_minutes: 0,
        }
    }
}

impl FetcherRecord {
    /// Short tag used as a log prefix.
    pub fn tag(&self) -> String {
        format!("fetcher {}", self.id)
    }

    /// Copies the given fields from `other` into `self`.
    pub fn apply_fields(&mut self, other: &FetcherRecord, fields: &[FetcherField]) {
        for field in fields {
            match field {
                FetcherField::Locked => self.locked = other.locked,
                FetcherField::LastCheck => {
                    self.last_check_epoch_seconds = other.last_check_epoch_seconds
                }
            }
        }
    }
}

// The password never shows up in logs, even in its stored form.
impl fmt::Debug for FetcherRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetcherRecord")
            .field("id", &self.id)
            .field("owner_user_id", &self.owner_user_id)
            .field("owner_account_id", &self.owner_account_id)
            .field("enabled", &self.enabled)
            .field("server", &self.server)
            .field("port", &self.port)
            .field("transport_security", &self.transport_security)
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .field("leave_on_server", &self.leave_on_server)
            .field("target_folder", &self.target_folder)
            .field("locked", &self.locked)
            .field("last_check_epoch_seconds", &self.last_check_epoch_seconds)
            .field("check_interval_minutes", &self.check_interval_minutes)
            .finish_non_exhaustive()
    }
}

/// Fields the runner changes, handed to the store with an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetcherField {
    Locked,
    LastCheck,
}

/// The mail account a fetcher delivers into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub email: String,
}
