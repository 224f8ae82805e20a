// SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
pub mod client;
pub mod daemon;
pub mod wire;

pub use client::RemoteBackend;
pub use daemon::Daemon;
