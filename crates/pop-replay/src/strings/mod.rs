// SPDX-License-Identifier: GPL-3.0

//! Centralized string constants for the pop-replay crate.
//!
//! This module organizes static strings used throughout the crate to improve
//! maintainability and avoid magic strings scattered across the codebase.

pub mod builder;
pub mod executor;
pub mod inherent;
pub mod overrides;
pub mod relay;
pub mod rpc;
pub mod rpc_server;
pub mod txpool;
