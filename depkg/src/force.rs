// SPDX-License-Identifier: MPL-2.0

//! Re-exports the force-flag policy from `depkg-archive`, where the
//! pipeline stages that actually consult it live.

pub use depkg_archive::{Disposition, FailureKind, ForcePolicy};
