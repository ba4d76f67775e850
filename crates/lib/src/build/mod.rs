//! Image bootstrap sequencer.
//!
//! A build turns a base image plus a source tree into a runnable image:
//!
//! ```text
//! INIT -> BASE_SELECTED -> SOURCE_COPIED -> DEPENDENCIES_INSTALLED -> METADATA_DECLARED -> IMAGE_READY
//! ```
//!
//! [`Sequencer`] and [`ImageBuilder`] enforce that order in the type system;
//! [`driver`] replays a descriptor's step list through them and reports
//! misplaced steps as [`BuildError::StepOutOfOrder`].
//!
//! All work is staged under `<store>/tmp`. Layers and the image are only
//! committed by [`ImageBuilder::finish`], so a failed or cancelled build leaves
//! nothing behind.

pub mod driver;
mod error;
mod install;
mod sequencer;
pub mod state;

pub use driver::{BuildOptions, build, build_until};
pub use error::BuildError;
pub use sequencer::{BuildOutcome, ImageBuilder, Sequencer};
pub use state::BuildPhase;
