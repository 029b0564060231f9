pub mod enums;
pub mod document;
pub mod metering;

pub use enums::*;
pub use document::*;
pub use metering::*;
