// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Builder-style configuration for a [`Recovery`](crate::recovery::Recovery) instance.

/// Which congestion-control algorithm a [`Recovery`](crate::recovery::Recovery)
/// instance should drive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum ControllerKind {
    #[default]
    Reno,
    Cubic,
    Vivace,
}

impl ControllerKind {
    #[inline]
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            ControllerKind::Reno => "reno",
            ControllerKind::Cubic => "cubic",
            ControllerKind::Vivace => "vivace",
        }
    }
}

/// Any out-of-range value falls back to [`ControllerKind::Reno`] rather than
/// failing, so a malformed config value never prevents a connection from
/// using some congestion controller at all.
impl From<u8> for ControllerKind {
    fn from(value: u8) -> Self {
        match value {
            1 => ControllerKind::Cubic,
            2 => ControllerKind::Vivace,
            _ => ControllerKind::Reno,
        }
    }
}

/// The connection endpoint a [`Recovery`](crate::recovery::Recovery) is
/// running as. Only used to pick the metric log directory layout and to
/// decide whether the "client has not yet confirmed 1-RTT keys" PTO rule
/// applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Role {
    Client,
    #[default]
    Server,
}

impl Role {
    #[inline]
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Server => "server",
        }
    }
}

/// Configuration for a [`Recovery`](crate::recovery::Recovery) instance.
///
/// Built via the `with_*` methods, mirroring the rest of this crate's
/// preference for explicit builders over field-literal construction.
#[derive(Clone, Copy, Debug)]
pub struct RecoveryConfig {
    controller: ControllerKind,
    role: Role,
    is_client_without_1rtt: bool,
    logging_enabled: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            controller: ControllerKind::Reno,
            role: Role::Server,
            is_client_without_1rtt: false,
            logging_enabled: false,
        }
    }
}

impl RecoveryConfig {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with_controller(mut self, controller: ControllerKind) -> Self {
        self.controller = controller;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Marks this connection as a client that has not yet confirmed 1-RTT
    /// keys, which keeps the PTO timer armed even with no ack-eliciting
    /// packets in flight (the peer may be waiting on a client Finished it
    /// hasn't received yet).
    #[inline]
    #[must_use]
    pub fn with_client_without_1rtt(mut self, value: bool) -> Self {
        self.is_client_without_1rtt = value;
        self
    }

    /// Enables the per-connection `window.log`/`latency.log`/`loss.log`
    /// metric files. Requires the `std` feature; a no-op without it.
    #[inline]
    #[must_use]
    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.logging_enabled = enabled && cfg!(feature = "std");
        self
    }

    #[inline]
    #[must_use]
    pub fn controller(&self) -> ControllerKind {
        self.controller
    }

    #[inline]
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[inline]
    #[must_use]
    pub fn is_client_without_1rtt(&self) -> bool {
        self.is_client_without_1rtt
    }

    #[inline]
    #[must_use]
    pub fn logging_enabled(&self) -> bool {
        self.logging_enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_controller_byte_falls_back_to_reno() {
        assert_eq!(ControllerKind::from(0), ControllerKind::Reno);
        assert_eq!(ControllerKind::from(1), ControllerKind::Cubic);
        assert_eq!(ControllerKind::from(2), ControllerKind::Vivace);
        assert_eq!(ControllerKind::from(255), ControllerKind::Reno);
    }

    #[test]
    fn builder_round_trips() {
        let config = RecoveryConfig::new()
            .with_controller(ControllerKind::Cubic)
            .with_role(Role::Client)
            .with_client_without_1rtt(true);
        assert_eq!(config.controller(), ControllerKind::Cubic);
        assert_eq!(config.role(), Role::Client);
        assert!(config.is_client_without_1rtt());
    }
}
