use crate::{
    context::CallContext,
    method::InvokeError,
    registry::Registry,
    types::{
        Request, Response, RpcError, HANDLER_ERROR, INTERNAL_ERROR, INVALID_PARAMS,
        METHOD_NOT_FOUND, PARSE_ERROR,
    },
};
use tracing::{trace, warn};

/// Outcome of a transport-level exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    Ok,
    Error,
}

impl TransportStatus {
    /// The HTTP status a transport carrying this reply would use.
    pub fn http_code(self) -> u16 {
        match self {
            TransportStatus::Ok => 200,
            TransportStatus::Error => 500,
        }
    }
}

/// An encoded response ready to be written back.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: TransportStatus,
    pub body: Vec<u8>,
}

/// Resolves requests against a sealed [`Registry`] and runs them.
///
/// Holds no per-call state, so one dispatcher can serve any number of
/// concurrent calls.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Registry,
}

impl Dispatcher {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Decodes one request envelope from `body`, dispatches it and encodes the
    /// response. Returns `None` for notifications.
    pub fn handle(&self, ctx: &CallContext, body: &[u8]) -> Option<Reply> {
        let response = match serde_json::from_slice::<Request>(body) {
            Ok(request) => self.dispatch(ctx, request)?,
            Err(err) => {
                warn!(error = %err, "unparsable request envelope");
                Response::failure(None, RpcError::new(PARSE_ERROR, err.to_string()))
            }
        };
        let status = if response.is_error() {
            TransportStatus::Error
        } else {
            TransportStatus::Ok
        };
        match serde_json::to_vec(&response) {
            Ok(body) => Some(Reply { status, body }),
            Err(err) => {
                // Response holds only strings, integers and already-encoded values.
                warn!(error = %err, "failed to encode response");
                None
            }
        }
    }

    /// Runs one decoded request. Returns `None` for notifications, whatever
    /// the outcome of the call.
    pub fn dispatch(&self, ctx: &CallContext, request: Request) -> Option<Response> {
        let Request {
            id, method, params, ..
        } = request;
        trace!(method = %method, ?id, params = params.len(), "dispatching");

        let Some(descriptor) = self.registry.get(&method) else {
            warn!(method = %method, "method not found");
            let error = RpcError::new(METHOD_NOT_FOUND, "method not found");
            return id.map(|id| Response::failure(Some(id), error));
        };

        if params.len() != descriptor.arity() {
            warn!(
                method = %method,
                expected = descriptor.arity(),
                got = params.len(),
                "wrong params count"
            );
            let error = RpcError::new(
                INVALID_PARAMS,
                format!(
                    "wrong params count: expected {}, got {}",
                    descriptor.arity(),
                    params.len()
                ),
            );
            return id.map(|id| Response::failure(Some(id), error));
        }

        let ctx = ctx.for_request(id);
        let outcome = match descriptor.invoke(&ctx, &params) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(method = %method, error = %err, "call failed");
                let code = match err {
                    InvokeError::Param { .. } => PARSE_ERROR,
                    InvokeError::Arity { .. } => INVALID_PARAMS,
                    InvokeError::Encode(_)
                    | InvokeError::Outputs { .. }
                    | InvokeError::MisplacedOutput { .. } => INTERNAL_ERROR,
                };
                let error = RpcError::new(code, err.to_string());
                return id.map(|id| Response::failure(Some(id), error));
            }
        };

        let id = id?;
        Some(match outcome.error {
            Some(message) => {
                warn!(method = %method, error = %message, "handler returned error");
                Response::failure(Some(id), RpcError::new(HANDLER_ERROR, message))
            }
            None => Response::success(id, outcome.value),
        })
    }
}
