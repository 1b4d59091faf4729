// SPDX-License-Identifier: GPL-3.0

//! RPC types for request/response serialization.

mod common;
mod storage;

pub use common::*;
pub use storage::*;
