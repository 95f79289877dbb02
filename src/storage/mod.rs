// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage backends.
//!
//! - [`traits::RemoteStore`]: the authoritative store, implemented by
//!   [`postgrest::PostgrestStore`] and the in-process [`memory::MemoryRemote`]
//! - [`local::LocalMirrorStore`]: the SQLite mirror, with typed helpers in `mirror`

pub mod local;
pub mod memory;
mod mirror;
pub mod postgrest;
pub mod query;
pub mod traits;
