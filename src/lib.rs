//! A small JSON-RPC dispatcher.
//!
//! Handlers implement [`Service`] to list their operations, a
//! [`RegistryBuilder`] collects them under namespaces and seals them into a
//! [`Registry`], and a [`Dispatcher`] resolves request envelopes against it.
//! Parameters stay raw JSON ([`Param`]) until the resolved operation says
//! which type each position decodes into.

pub mod context;
pub mod dispatcher;
pub mod method;
pub mod net;
pub mod registry;
pub mod types;

pub use context::{CallContext, CancelToken};
pub use dispatcher::{Dispatcher, Reply, TransportStatus};
pub use method::{
    ContextOperation, Fallible, IntoOutputs, InvokeError, Json, MethodDescriptor, Methods,
    Operation, Outcome, Output, OutputKind, OutputSlots, RawMethod, ShapeError,
};
pub use net::{
    client::{Client, ClientError},
    server::Server,
};
pub use registry::{MethodInfo, Registry, RegistryBuilder, RegistrationError, Service};
pub use types::{Param, Request, Response, RpcError};
