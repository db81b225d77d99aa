//! Core identifier and source-range primitives shared by every index layer.
//!
//! All positions in the engine are UTF-8 byte offsets into a file's content.
//! Line/column arithmetic belongs to the LSP conversion layer, never here.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A byte-offset range into a single file.
///
/// `contains` is intentionally closed on both ends: cursor queries hit the
/// offset immediately after the last byte of an identifier token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Range {
    pub begin: u32,
    pub end: u32,
}

impl Range {
    pub fn new(begin: u32, end: u32) -> Self {
        Self { begin, end }
    }

    pub fn contains(&self, offset: u32) -> bool {
        self.begin <= offset && offset <= self.end
    }

    pub fn intersects(&self, other: &Range) -> bool {
        self.begin <= other.end && other.begin <= self.end
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.begin)
    }

    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.begin, self.end)
    }
}

/// Stable 64-bit identity of a symbol, derived from the canonical textual
/// form of its declaration (a universal symbol reference).
///
/// The id is stable across translation units. Hash collisions are tolerated:
/// lookups pair the id with the symbol name and the name disambiguates.
/// `SymbolId::NONE` (zero) marks a relation with no target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SymbolId(pub u64);

impl SymbolId {
    pub const NONE: SymbolId = SymbolId(0);

    /// Hash a canonical USR string into a symbol id.
    pub fn from_usr(usr: &str) -> Self {
        Self(xxhash_rust::xxh64::xxh64(usr.as_bytes(), 0))
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Index of a file within one translation unit's file table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub u32);

impl FileId {
    pub fn value(&self) -> u32 {
        self.0
    }
}

/// Classification of an indexed symbol. The engine treats this opaquely
/// except for equality; it exists for UI presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SymbolKind {
    Namespace,
    Class,
    Struct,
    Union,
    Enum,
    EnumMember,
    Field,
    Function,
    Method,
    Variable,
    Parameter,
    TypeAlias,
    Concept,
    Macro,
    Module,
    Label,
}

impl SymbolKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Namespace,
            1 => Self::Class,
            2 => Self::Struct,
            3 => Self::Union,
            4 => Self::Enum,
            5 => Self::EnumMember,
            6 => Self::Field,
            7 => Self::Function,
            8 => Self::Method,
            9 => Self::Variable,
            10 => Self::Parameter,
            11 => Self::TypeAlias,
            12 => Self::Concept,
            13 => Self::Macro,
            14 => Self::Module,
            15 => Self::Label,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Namespace => "namespace",
            Self::Class => "class",
            Self::Struct => "struct",
            Self::Union => "union",
            Self::Enum => "enum",
            Self::EnumMember => "enum-member",
            Self::Field => "field",
            Self::Function => "function",
            Self::Method => "method",
            Self::Variable => "variable",
            Self::Parameter => "parameter",
            Self::TypeAlias => "type-alias",
            Self::Concept => "concept",
            Self::Macro => "macro",
            Self::Module => "module",
            Self::Label => "label",
        }
    }
}

impl Default for SymbolKind {
    fn default() -> Self {
        Self::Variable
    }
}

bitflags::bitflags! {
    /// The kind of an edge between a source location and a symbol.
    ///
    /// Kinds are a bit-set so that lookups can filter with a single mask,
    /// e.g. `DECLARATION | DEFINITION` for go-to-definition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RelationKind: u32 {
        const DECLARATION     = 1 << 0;
        const DEFINITION      = 1 << 1;
        const REFERENCE       = 1 << 2;
        const READ            = 1 << 3;
        const WRITE           = 1 << 4;
        const INTERFACE       = 1 << 5;
        const IMPLEMENTATION  = 1 << 6;
        const TYPE_DEFINITION = 1 << 7;
        const BASE            = 1 << 8;
        const DERIVED         = 1 << 9;
        const CONSTRUCTOR     = 1 << 10;
        const DESTRUCTOR      = 1 << 11;
        const CALLER          = 1 << 12;
        const CALLEE          = 1 << 13;
    }
}

impl RelationKind {
    /// Parse a single kind name as used by the CLI, e.g. `definition`.
    pub fn from_cli_name(name: &str) -> Option<Self> {
        Some(match name {
            "declaration" => Self::DECLARATION,
            "definition" => Self::DEFINITION,
            "reference" => Self::REFERENCE,
            "read" => Self::READ,
            "write" => Self::WRITE,
            "interface" => Self::INTERFACE,
            "implementation" => Self::IMPLEMENTATION,
            "type-definition" => Self::TYPE_DEFINITION,
            "base" => Self::BASE,
            "derived" => Self::DERIVED,
            "constructor" => Self::CONSTRUCTOR,
            "destructor" => Self::DESTRUCTOR,
            "caller" => Self::CALLER,
            "callee" => Self::CALLEE,
            _ => return None,
        })
    }
}

/// 128-bit content identity of a serialized index blob.
pub type ContentHash = u128;

/// Tagged index into one of the two context side tables of a header index.
///
/// The low bit selects the table: set for a dependent element (presence
/// varies across canonical contexts), clear for an independent one. The
/// remaining bits are the element id within that table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contextual(u32);

impl Contextual {
    pub fn from(dependent: bool, offset: u32) -> Self {
        Self((offset << 1) | dependent as u32)
    }

    pub fn dependent(offset: u32) -> Self {
        Self::from(true, offset)
    }

    pub fn independent(offset: u32) -> Self {
        Self::from(false, offset)
    }

    pub fn is_dependent(&self) -> bool {
        self.0 & 1 == 1
    }

    pub fn offset(&self) -> u32 {
        self.0 >> 1
    }
}

impl Default for Contextual {
    /// Fresh raw-index elements start as dependent with a placeholder slot;
    /// the real element id is assigned when the element enters a header
    /// index.
    fn default() -> Self {
        Self::dependent(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_contains_is_closed() {
        let range = Range::new(4, 9);

        assert!(range.contains(4));
        assert!(range.contains(7));
        assert!(range.contains(9));

        assert!(!range.contains(3));
        assert!(!range.contains(10));
    }

    #[test]
    fn test_range_intersects() {
        let range = Range::new(10, 20);

        assert!(range.intersects(&Range::new(0, 10)));
        assert!(range.intersects(&Range::new(15, 17)));
        assert!(range.intersects(&Range::new(20, 30)));
        assert!(!range.intersects(&Range::new(21, 30)));
        assert!(!range.intersects(&Range::new(0, 9)));
    }

    #[test]
    fn test_symbol_id_from_usr_is_stable() {
        let a = SymbolId::from_usr("c:@S@Foo@F@bar#");
        let b = SymbolId::from_usr("c:@S@Foo@F@bar#");
        let c = SymbolId::from_usr("c:@S@Foo@F@baz#");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(!a.is_none());
        assert!(SymbolId::NONE.is_none());
    }

    #[test]
    fn test_relation_kind_mask() {
        let mask = RelationKind::DECLARATION | RelationKind::DEFINITION;
        assert!(mask.intersects(RelationKind::DEFINITION));
        assert!(!mask.intersects(RelationKind::REFERENCE));
    }

    #[test]
    fn test_relation_kind_from_name() {
        assert_eq!(
            RelationKind::from_cli_name("definition"),
            Some(RelationKind::DEFINITION)
        );
        assert_eq!(
            RelationKind::from_cli_name("type-definition"),
            Some(RelationKind::TYPE_DEFINITION)
        );
        assert_eq!(RelationKind::from_cli_name("bogus"), None);
    }

    #[test]
    fn test_contextual_tag_round_trip() {
        let dep = Contextual::dependent(42);
        assert!(dep.is_dependent());
        assert_eq!(dep.offset(), 42);

        let ind = Contextual::independent(7);
        assert!(!ind.is_dependent());
        assert_eq!(ind.offset(), 7);
    }
}
