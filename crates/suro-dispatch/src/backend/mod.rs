// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Remote optimisation backends.

pub mod docloud;
pub mod mock;
mod traits;

pub use docloud::DoCloudBackend;
pub use mock::MockBackend;
pub use traits::*;
