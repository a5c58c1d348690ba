//! # tickrpc
//!
//! A library for exposing procedures of an embedding game host to external
//! clients, with the host's own simulation loop as the scheduler.
//!
//! Services register *descriptors* at startup: plain data records naming
//! each procedure, its typed parameters and defaults, the contexts it may be
//! called from, and a bound invoker. Requests arrive as length-prefixed
//! protobuf frames, are decoded and dispatched by name, and produce exactly
//! one response each. Long-lived host objects cross the boundary as opaque
//! 64-bit handles held in a per-process object store.
//!
//! Procedure names follow a flat grammar: `Name` is a service procedure,
//! `get_Name`/`set_Name` are service properties, `Class_Method` is an
//! instance method, and `Class_get_Name`/`Class_set_Name` are instance
//! properties. Instance members take the receiver handle at position 0.
//!
//! A procedure that needs more than one simulation step returns
//! [`Outcome::Yield`] with a [`Continuation`]; the scheduler re-runs it on
//! following ticks until it completes. A yielding request only delays later
//! requests from the same client, while other clients' queues keep draining.
//!
//! The transport (sockets, framing I/O) and the services themselves live
//! outside this crate: the transport feeds [`Server::submit_frame`] and
//! ships back what [`Server::tick`] returns, and the host calls `tick` once
//! per simulation step on its main thread.
//!
//! # Example
//!
//! ```rust
//! use tickrpc::rpc::{Argument, Request};
//! use tickrpc::{
//!     encode_value, ActivityContext, ClientId, HostContext, Invocation, Outcome,
//!     ProcedureBuilder, Server, ServiceBuilder, TypeDescriptor, Value,
//! };
//!
//! struct Host;
//!
//! impl HostContext for Host {
//!     fn activity(&self) -> ActivityContext {
//!         ActivityContext::Flight
//!     }
//!
//!     fn universal_time(&self) -> f64 {
//!         0.0
//!     }
//! }
//!
//! let greeter = ServiceBuilder::new("Greeter")
//!     .procedure(
//!         ProcedureBuilder::new("Greet", |inv: &mut Invocation<'_>| {
//!             let name = inv.arg(0).as_str().unwrap_or("").to_string();
//!             Ok(Outcome::Value(Value::String(format!("hello, {}", name))))
//!         })
//!         .parameter("name", TypeDescriptor::String)
//!         .returns(TypeDescriptor::String),
//!     )
//!     .build();
//!
//! let mut server = Server::new(vec![greeter]);
//! server.submit(
//!     ClientId(1),
//!     Request {
//!         service: "Greeter".to_string(),
//!         procedure: "Greet".to_string(),
//!         arguments: vec![Argument {
//!             position: 0,
//!             value: encode_value(&Value::String("jeb".to_string()), &TypeDescriptor::String)
//!                 .unwrap(),
//!         }],
//!     },
//! );
//!
//! let responses = server.tick(&Host);
//! assert_eq!(responses[0].1.error, "");
//! ```
#![deny(unused_extern_crates)]
#![deny(missing_docs)]

mod binder;
mod context;
mod dispatcher;
mod encoding;
mod error;
mod objects;
mod registry;
mod scheduler;
mod server;
mod types;

pub mod introspection;
pub mod rpc;

pub use crate::context::{ActivityContext, ClientId, HostContext, RequiredContext};
pub use crate::dispatcher::{Continuation, InvokeResult, Invocation, Invoker, Outcome};
pub use crate::encoding::{decode_value, encode_value};
pub use crate::error::Error;
pub use crate::objects::ObjectStore;
pub use crate::registry::{
    Parameter, ProcedureBuilder, ProcedureKind, ProcedureSignature, Registry, ServiceBuilder,
    ServiceDescriptor,
};
pub use crate::server::{Server, ServerOptions};
pub use crate::types::{ClassId, EnumDescriptor, ObjectRef, TypeDescriptor, Value};
