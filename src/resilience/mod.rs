// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote health, the pending-operation queue and start-up retry.

pub mod health;
pub mod queue;
pub mod retry;
