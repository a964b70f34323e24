// src/core/registry.rs

//! The process-wide table of live connections.
//!
//! Students are addressed individually, so at most one session per student identity
//! is kept. Admins are addressed as a group and may hold any number of sessions.

use crate::connection::transport::CloseReason;
use crate::connection::{Connection, ConnectionId};
use crate::core::metrics;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// The addressing partition a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown role '{0}'")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "admin" => Ok(Role::Admin),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

/// Connection counts per partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryCounts {
    pub students: usize,
    pub admins: usize,
}

impl RegistryCounts {
    pub fn total(&self) -> usize {
        self.students + self.admins
    }
}

#[derive(Debug, Default)]
struct Partitions {
    students: HashMap<String, Arc<Connection>>,
    admins: HashMap<ConnectionId, Arc<Connection>>,
}

/// The live connection table. Cheap to share behind an `Arc`.
///
/// The lock guards only the maps. Closing an evicted connection and every send
/// happen after the guard is released.
#[derive(Debug, Default)]
pub struct Registry {
    inner: RwLock<Partitions>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `conn` to its partition.
    ///
    /// A student connection replaces any existing one for the same identity. The
    /// replaced connection is closed with a "replaced" frame and returned.
    pub fn register(&self, conn: Arc<Connection>) -> Option<Arc<Connection>> {
        let previous = {
            let mut inner = self.inner.write();
            match conn.role() {
                Role::Student => inner
                    .students
                    .insert(conn.identity().to_string(), conn.clone()),
                Role::Admin => inner.admins.insert(conn.id(), conn.clone()),
            }
        };

        match previous {
            // Re-registering the same session is a no-op.
            Some(old) if old.id() == conn.id() => None,
            Some(old) => {
                old.close_with(CloseReason::replaced());
                metrics::CONNECTIONS_EVICTED_TOTAL.inc();
                info!(
                    identity = %conn.identity(),
                    old_connection_id = old.id(),
                    new_connection_id = conn.id(),
                    "Evicted previous session for reconnecting student."
                );
                Some(old)
            }
            None => {
                debug!(
                    connection_id = conn.id(),
                    identity = %conn.identity(),
                    role = %conn.role(),
                    "Registered connection."
                );
                None
            }
        }
    }

    /// Removes `conn` if it is still the registered session.
    ///
    /// Returns `false` when it was already removed or has been replaced, so racing
    /// teardown paths never remove a successor.
    pub fn unregister(&self, conn: &Connection) -> bool {
        let removed = {
            let mut inner = self.inner.write();
            match conn.role() {
                Role::Student => {
                    let is_current = inner
                        .students
                        .get(conn.identity())
                        .is_some_and(|c| c.id() == conn.id());
                    is_current && inner.students.remove(conn.identity()).is_some()
                }
                Role::Admin => inner.admins.remove(&conn.id()).is_some(),
            }
        };

        if removed {
            debug!(
                connection_id = conn.id(),
                identity = %conn.identity(),
                role = %conn.role(),
                "Unregistered connection."
            );
        }
        removed
    }

    /// Returns the current session of a student, if any.
    pub fn lookup(&self, identity: &str) -> Option<Arc<Connection>> {
        self.inner.read().students.get(identity).cloned()
    }

    pub fn is_connected(&self, identity: &str) -> bool {
        self.inner.read().students.contains_key(identity)
    }

    /// A point-in-time copy of one partition.
    pub fn snapshot(&self, role: Role) -> Vec<Arc<Connection>> {
        let inner = self.inner.read();
        match role {
            Role::Student => inner.students.values().cloned().collect(),
            Role::Admin => inner.admins.values().cloned().collect(),
        }
    }

    /// A point-in-time copy of both partitions, taken under one read guard.
    pub fn snapshot_all(&self) -> Vec<Arc<Connection>> {
        let inner = self.inner.read();
        inner
            .students
            .values()
            .chain(inner.admins.values())
            .cloned()
            .collect()
    }

    pub fn counts(&self) -> RegistryCounts {
        let inner = self.inner.read();
        RegistryCounts {
            students: inner.students.len(),
            admins: inner.admins.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.counts().total()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes every registered connection with `reason`. Returns how many were
    /// closed by this call. Entries are removed by each session's own teardown.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        self.snapshot_all()
            .into_iter()
            .filter(|conn| conn.close_with(reason.clone()))
            .count()
    }
}
