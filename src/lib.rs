pub mod ast;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod logging;
pub mod lookup;
pub mod registry;
pub mod scheduler;
pub mod symbol;
pub mod types;

pub use config::Settings;
pub use engine::{ContextInfo, HeaderContextGroup, IndexEngine, IncludeFrame};
pub use error::{IndexError, IndexResult};
pub use index::{HeaderIndex, IndexBlob, RawIndex, TuIndex};
pub use lookup::{HierarchyItem, LookupHit, SymbolTarget};
pub use symbol::{Occurrence, Relation, Symbol};
pub use types::{Contextual, FileId, Range, RelationKind, SymbolId, SymbolKind};
