//! In-memory and on-disk index representations.

pub mod binary;
pub mod builder;
pub mod header;
pub mod raw;
pub mod tu;

pub use binary::{IndexBlob, content_hash, serialize};
pub use builder::{IndexBuilder, index_unit};
pub use header::{CONTEXT_BITS, HeaderContext, HeaderIndex};
pub use raw::RawIndex;
pub use tu::TuIndex;
