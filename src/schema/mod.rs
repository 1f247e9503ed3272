//! Schema inference for nested JSON records
//!
//! This module turns a stream of decoded objects into one flat relational
//! table definition:
//!
//! - [`KindDetector`] infers a column kind from sampled values
//! - [`EntityTree`] records the nested object shapes seen so far
//! - [`SchemaModel`] ties the two together and buffers record values
//! - [`exec_schema_delta`] applies a built schema to a backend

pub mod columns;
pub mod detect;
pub mod entity;
pub mod model;

pub use columns::column_order_flat;
pub use detect::{Coercion, DatetimeFormat, KindDetector};
pub use entity::{Entity, EntityId, EntityTree, FieldShape};
pub use model::{exec_schema_delta, ImportSchema, ObjectValueSet, SchemaModel};
