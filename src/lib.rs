// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Loss detection and congestion control core for a QUIC transport
//! implementation.
//!
//! This crate owns everything between "a packet was handed to the network"
//! and "the congestion window says how much more may be sent": packet-number
//! space bookkeeping, RTT estimation, packet/time-threshold loss detection,
//! the PTO timer, and three pluggable congestion-control algorithms (New
//! Reno, CUBIC, and PCC-Vivace). It does not parse or encode QUIC wire
//! frames, manage connection IDs, or perform any I/O itself — see
//! [`recovery::Recovery`] for the single integration point callers drive.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod config;
pub mod congestion;
#[cfg(feature = "std")]
pub mod error;
#[cfg(feature = "std")]
pub mod metrics;
pub mod pacer;
pub mod packet;
pub mod range_set;
pub mod recovery;
pub mod rtt_monitor;
pub mod space;
pub mod time;

pub use config::{ControllerKind, RecoveryConfig, Role};
pub use recovery::{Epoch, Recovery};
pub use time::{Clock, Timestamp};
