//! Host runtime for scripted quarry apps
//!
//! An app is a compiled unit handed over by an [`Evaluator`]. The
//! [`AppRegistry`] loads apps into [`Host`]s, synthesizes their commands,
//! routes command lines and events into them, and drives debounced
//! persistence of their state blobs. Errors raised inside app code are
//! rendered as source-annotated diagnostics and sent to whoever triggered
//! the call.

pub mod command;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod environment;
pub mod error;
pub mod evaluator;
pub mod host;
mod invoke;
pub mod legacy;
pub mod paths;
pub mod persistence;
pub mod principal;
pub mod registry;
pub mod testing;
pub mod timer;
pub mod value;
pub mod version;

pub use config::{AppConfig, Requirements, Scope};
pub use context::{ExecutionContext, Origin};
pub use diagnostics::{Diagnostic, ErrorReporter};
pub use environment::{DependencyResolver, HostEnvironment, StoreSource};
pub use error::{CommandError, HostError, Result};
pub use evaluator::{
    AppId, Application, CompiledUnit, EvalError, EvalErrorKind, Evaluator, FunctionDef,
    FunctionRef, Token,
};
pub use host::{Host, HostServices, HostState, PauseFlag};
pub use invoke::arity_table;
pub use paths::ProjectPaths;
pub use persistence::{Blob, BlobRef, BlobStore, FileBlobStore};
pub use principal::{Principal, PrincipalKind, PrincipalRef};
pub use registry::{AppRegistry, LoadRequest};
pub use value::Value;

pub use quarry_events::{DispatchGate, EventKind, Hook};
