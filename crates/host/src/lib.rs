//! tether host - registry, dispatcher, and channel endpoint
//!
//! This crate provides the host half of the tether remote-handle protocol:
//! the long-lived process that executes shipped function descriptors and
//! hands out opaque references instead of copied values.
//!
//! - **Registry**: owns every exposed object, dedups repeat registrations,
//!   tracks event subscriptions and reference counts
//! - **Dispatcher**: interprets channel operations against the registry;
//!   concurrent in-flight invocations, replies correlated by id
//! - **ScriptEngine**: strategy for running shipped descriptors; the bundled
//!   [`FunctionTable`] resolves them against registered native functions
//! - **HostServer**: binds and announces the channel endpoint
//!
//! # Example
//!
//! ```ignore
//! let registry = Arc::new(Registry::new(Arc::new(MyApp::new())));
//! let mut functions = FunctionTable::new();
//! functions.define("version", |_app, _args| async move {
//!     Ok(ScriptValue::Data(serde_json::json!(env!("CARGO_PKG_VERSION"))))
//! });
//!
//! let server = HostServer::bind_default().await?;
//! server.announce();
//! server.serve(registry, Arc::new(functions)).await?;
//! ```

pub mod dispatcher;
pub mod emitter;
pub mod engine;
pub mod error;
pub mod object;
pub mod registry;
pub mod server;
pub mod value_cell;

// Re-export key types at crate root
pub use dispatcher::Dispatcher;
pub use emitter::Emitter;
pub use engine::{FunctionTable, InvokeFuture, ScriptArg, ScriptEngine, ScriptValue};
pub use error::{Error, Result};
pub use object::{Disposable, EventSink, EventSource, RemoteObject, Subscription};
pub use registry::Registry;
pub use server::{HOST_ADDR_ENV, HostServer};
pub use value_cell::ValueCell;
