//! View engine: template compilation, the compiled-view cache and the
//! apply / include protocol that builds component trees.
//!
//! # Architecture
//!
//! ```text
//! view id ──► ViewFactory ──► ResourceResolver ──► SourceLocation
//!                  │
//!                  ▼
//!              ViewCache (per contract set, policy-checked)
//!                  │ miss / expired
//!                  ▼
//!             ViewCompiler ──► CompiledView ──apply──► ComponentTree
//! ```

mod cache;
mod client;
mod compiled;
mod compiler;
mod context;
mod el;
mod error;
mod factory;
mod id_mapper;
mod policy;

pub use cache::{CacheKey, CompileMode, TemplateCacheRecord, ViewCache};
pub use client::{ClientHandle, NULL_DEFINITION, TemplateClient};
pub use compiled::{CompiledView, ViewKey};
pub use compiler::{FACET_GROUP_TYPE, METADATA_PANEL_TYPE, ViewCompiler};
pub use context::{ApplyState, ViewEvaluationContext};
pub use el::{ElFunction, FunctionMapper, ValueExpr, VariableResolver};
pub use error::{ViewError, ViewResult};
pub use factory::{ERROR_VIEW_PATH, ViewFactory, ViewOptions};
pub use id_mapper::IdAliasMapper;
pub use policy::{AlwaysRefresh, ExpiryPolicy, NeverRefresh, PeriodicRefresh, policy_for};
