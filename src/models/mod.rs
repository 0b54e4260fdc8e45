pub mod collection;
pub mod source_info;

pub use collection::*;
pub use source_info::*;
