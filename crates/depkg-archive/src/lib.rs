// SPDX-License-Identifier: MPL-2.0

//! The archive-processing pipeline (§4.7) and its supporting
//! collaborators: the thin archive-container reader seam, the
//! conffile three-way merge engine (§4.8), and the maintainer-script
//! subprocess contract (§6).

pub mod conffile;
pub mod force;
pub mod pipeline;
pub mod reader;
pub mod script;

pub use conffile::{Action as ConffileAction, ConfPolicy};
pub use force::{Disposition, FailureKind, ForcePolicy};
pub use pipeline::{EngineContext, Error, Step, UnpackRequest, unpack_and_commit};
pub use reader::{ArchiveEntryOwned, ArchiveReader, EntryKind, MemoryArchive};
pub use script::{ScriptAction, ScriptContext, ScriptKind};
