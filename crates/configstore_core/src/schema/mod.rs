//! Schema definitions and validation.

mod model;
mod registry;
pub mod validator;

pub use model::{
    FieldEditorType, Schema, SchemaComputedIndex, SchemaField, SchemaFieldEditorInfo,
    SchemaFieldEditorValidator, SchemaIndex, SchemaIndexType, SchemaIndexValue, SchemaKind,
    SchemaKindEditor,
};
pub use registry::SchemaRegistry;
pub use validator::FieldValidator;
