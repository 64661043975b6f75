// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Error types surfaced by this crate.

/// Failures opening or writing a metric log file.
///
/// These are never propagated as far as a connection failure: a
/// [`Recovery`](crate::recovery::Recovery) that can't get its log files open
/// runs unlogged rather than refusing to do loss detection.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum RecoveryError {
    #[error("failed to create metric log directory {path}: {source}")]
    LogDirectoryCreation {
        path: alloc::string::String,
        #[source]
        source: std::io::Error,
    },

    #[error("exhausted {attempts} candidate metric log directories under {base}")]
    LogDirectoryExhausted {
        base: alloc::string::String,
        attempts: u32,
    },

    #[error("failed to open metric log file {path}: {source}")]
    LogFileOpen {
        path: alloc::string::String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write metric log entry: {source}")]
    LogWrite {
        #[source]
        source: std::io::Error,
    },
}
