pub mod enums;
pub mod document;
pub mod record;

pub use enums::*;
pub use document::*;
pub use record::*;
