//! Image vocabulary shared by the sequencer, the store and the runtime.
//!
//! - [`ImageRef`]: `name[:tag]` references for bases and built images
//! - [`ImagePath`]: normalized absolute paths inside an image filesystem
//! - [`BaseConfig`] / [`BaseImage`]: registered base runtime images
//! - [`ImageConfig`] / [`BuiltImage`]: the content-addressed build result

mod path;
mod reference;
mod types;

pub use path::{ImagePath, PathError};
pub use reference::{ImageRef, ReferenceError};
pub use types::*;
