//! Trellis Core
//!
//! This crate provides the binding engine of the Trellis declarative markup
//! framework. It keeps a live render tree synchronized with a mutable data
//! model, driven by directive attributes. It implements:
//!
//! - A sandboxed expression evaluator with a compilation cache
//! - The fragment tree mirroring the render tree, with binding data
//!   inheritance and conditional visibility
//! - Keyed list reconciliation
//! - An asynchronous, priority-ordered mutation queue through which every
//!   write to the render tree passes
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `value`: Dynamic values and binding scopes
//! - `expr`: Expression lexer, parser, compiler and evaluator
//! - `content`: Placeholder segmentation and the text/attribute join policy
//! - `dom`: The host render tree, its markup reader and mutation records
//! - `directive`: Directive vocabulary and prefix lookup
//! - `fragment`: The fragment arena and the evaluation protocol
//! - `reconcile`: Keyed repetition
//! - `queue`: Mutation scheduling, batching and frames
//! - `suppress`: Per-fragment suppression of mutation records
//! - `engine`: The façade tying the layers together
//!
//! ```text
//!   data ──▶ Engine::set_binding_data ──▶ FragmentTree::evaluate_all
//!                                              │ (changed values only)
//!                                              ▼
//!   Document ◀── MutationQueue::drain_batch ◀── Mutation + SuppressionGuard
//!       │
//!       └── records from other writers ──▶ Engine::process_mutations
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::{Document, Engine, EngineConfig, scope_from_json};
//! use serde_json::json;
//!
//! let document = Document::parse(
//!     r#"<ul tr-each="users" tr-each-key="id"><li>{{name}}</li></ul>"#,
//! )?;
//! let mut engine = Engine::new(document, EngineConfig::default())?;
//! let root = engine.document().lock().root();
//!
//! engine.scan();
//! engine.set_binding_data(root, scope_from_json(json!({
//!     "users": [{ "id": 1, "name": "A" }, { "id": 2, "name": "B" }]
//! })));
//! engine.settle().await?;
//! // <ul tr-each="users" tr-each-key="id"><li tr-key="1">A</li><li tr-key="2">B</li></ul>
//! ```

pub mod config;
pub mod content;
pub mod directive;
pub mod dom;
pub mod engine;
pub mod error;
pub mod expr;
pub mod fragment;
pub mod log;
pub mod queue;
pub mod reconcile;
pub mod suppress;
pub mod value;

pub use config::{EngineConfig, FrameSource, QueueConfig};
pub use dom::{Document, MutationKind, MutationRecord, NodeHandle};
pub use engine::Engine;
pub use error::{BindError, ConfigError, DomError, EvalError, QueueError};
pub use expr::Evaluator;
pub use fragment::{FragmentId, FragmentTree};
pub use queue::{Mutation, MutationHandle, MutationId, MutationQueue, Priority};
pub use reconcile::ReconcileReport;
pub use value::{scope_from_json, Scope, Value};
