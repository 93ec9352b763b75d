//! Build phases: compiling the sketch, imported libraries and the core,
//! then linking and post-processing the firmware image.

pub mod core;
pub mod libraries;
pub mod link;
pub mod sketch;

pub use self::core::build_core;
pub use self::libraries::build_libraries;
pub use self::link::{link_firmware, run_objcopy_chain};
pub use self::sketch::build_sketch;
