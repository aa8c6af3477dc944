//! Core types for the fragment graph.

pub mod hash;
pub mod value;
mod parse;
pub mod node;
pub mod edge;
pub mod source;
pub mod document;

pub use hash::{ContentHash, ParseHashError, HASH_LEN};
pub use value::{Number, Value, ValueKind};
pub use node::FragmentNode;
pub use edge::{Discriminator, Edge};
pub use source::{Location, SourceFile};
pub use document::{
    ConceptualDocument, DocumentRecord, ReconstructionRecipe, Shredding, DOC_NAME_PREFIX,
};
