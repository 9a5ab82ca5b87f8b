use crate::{context::CallContext, types::Param};
use serde::{de::DeserializeOwned, Serialize};
use std::{any::type_name, fmt, sync::Arc};
use thiserror::Error;

/// What an operation's output slot carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutputKind {
    Value,
    Error,
}

/// Positions of the value and error outputs of an operation, if any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutputSlots {
    pub value: Option<usize>,
    pub error: Option<usize>,
}

impl OutputSlots {
    /// Accepts `[]`, `[Value]`, `[Error]` and `[Value, Error]`.
    pub fn from_kinds(kinds: &[OutputKind]) -> Result<Self, ShapeError> {
        use OutputKind::*;
        match kinds {
            [] => Ok(Self::default()),
            [Value] => Ok(Self {
                value: Some(0),
                error: None,
            }),
            [Error] => Ok(Self {
                value: None,
                error: Some(0),
            }),
            [Value, Error] => Ok(Self {
                value: Some(0),
                error: Some(1),
            }),
            [_, Value] => Err(ShapeError::SecondNotError),
            [Error, Error] => Err(ShapeError::FirstNotValue),
            _ => Err(ShapeError::TooManyOutputs(kinds.len())),
        }
    }

    /// Number of outputs an invocation must produce.
    pub fn len(&self) -> usize {
        usize::from(self.value.is_some()) + usize::from(self.error.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Picks the value and error out of `outputs`. Every output must sit in the
    /// slot declared for its kind.
    fn outcome(&self, outputs: Vec<Output>) -> Result<Outcome, InvokeError> {
        if outputs.len() != self.len() {
            return Err(InvokeError::Outputs {
                expected: self.len(),
                got: outputs.len(),
            });
        }
        let mut outcome = Outcome::default();
        for (slot, output) in outputs.into_iter().enumerate() {
            match output {
                Output::Value(value) if self.value == Some(slot) => outcome.value = Some(value),
                Output::Error(error) if self.error == Some(slot) => outcome.error = error,
                Output::Value(_) => {
                    return Err(InvokeError::MisplacedOutput {
                        slot,
                        found: OutputKind::Value,
                    })
                }
                Output::Error(_) => {
                    return Err(InvokeError::MisplacedOutput {
                        slot,
                        found: OutputKind::Error,
                    })
                }
            }
        }
        Ok(outcome)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("at most 2 outputs are allowed, found {0}")]
    TooManyOutputs(usize),
    #[error("expected error as second output")]
    SecondNotError,
    #[error("expected value as first of two outputs")]
    FirstNotValue,
}

/// One output produced by an invocation, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Value(serde_json::Value),
    /// `None` is a nil error.
    Error(Option<String>),
}

/// The value and error picked out of an invocation's outputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    pub value: Option<serde_json::Value>,
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("expected {expected} params, got {got}")]
    Arity { expected: usize, got: usize },

    #[error("param {index}: {source}")]
    Param {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("encoding result: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("operation produced {got} outputs, declared {expected}")]
    Outputs { expected: usize, got: usize },

    #[error("operation produced an undeclared {found:?} output at position {slot}")]
    MisplacedOutput { slot: usize, found: OutputKind },
}

/// Return types an operation may have. The output shape is fixed by the type,
/// so typed operations can never be registered with an invalid shape.
pub trait IntoOutputs {
    const KINDS: &'static [OutputKind];

    fn into_outputs(self) -> serde_json::Result<Vec<Output>>;
}

/// Value-only return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Json<T>(pub T);

/// Error-only return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fallible<E>(pub Result<(), E>);

impl<E> From<Result<(), E>> for Fallible<E> {
    fn from(result: Result<(), E>) -> Self {
        Self(result)
    }
}

impl IntoOutputs for () {
    const KINDS: &'static [OutputKind] = &[];

    fn into_outputs(self) -> serde_json::Result<Vec<Output>> {
        Ok(Vec::new())
    }
}

impl<T: Serialize> IntoOutputs for Json<T> {
    const KINDS: &'static [OutputKind] = &[OutputKind::Value];

    fn into_outputs(self) -> serde_json::Result<Vec<Output>> {
        Ok(vec![Output::Value(serde_json::to_value(self.0)?)])
    }
}

impl<E: fmt::Display> IntoOutputs for Fallible<E> {
    const KINDS: &'static [OutputKind] = &[OutputKind::Error];

    fn into_outputs(self) -> serde_json::Result<Vec<Output>> {
        Ok(vec![Output::Error(self.0.err().map(|e| e.to_string()))])
    }
}

impl<T: Serialize, E: fmt::Display> IntoOutputs for Result<T, E> {
    const KINDS: &'static [OutputKind] = &[OutputKind::Value, OutputKind::Error];

    fn into_outputs(self) -> serde_json::Result<Vec<Output>> {
        Ok(match self {
            Ok(value) => vec![Output::Value(serde_json::to_value(value)?), Output::Error(None)],
            Err(e) => vec![
                Output::Value(serde_json::Value::Null),
                Output::Error(Some(e.to_string())),
            ],
        })
    }
}

/// A function `Fn(&H, A1, .., An) -> O` usable as an RPC operation of `H`.
pub trait Operation<H, Args>: Send + Sync + 'static {
    type Output: IntoOutputs;

    fn param_types() -> Vec<&'static str>;

    fn call(&self, handler: &H, params: &[Param]) -> Result<Self::Output, InvokeError>;
}

/// A function `Fn(&H, &CallContext, A1, .., An) -> O`. The context is supplied
/// by the dispatcher and does not count toward the arity.
pub trait ContextOperation<H, Args>: Send + Sync + 'static {
    type Output: IntoOutputs;

    fn param_types() -> Vec<&'static str>;

    fn call(
        &self,
        handler: &H,
        ctx: &CallContext,
        params: &[Param],
    ) -> Result<Self::Output, InvokeError>;
}

macro_rules! count {
    () => { 0usize };
    ($head:ident $(, $tail:ident)*) => { 1usize + count!($($tail),*) };
}

fn check_arity(params: &[Param], arity: usize) -> Result<(), InvokeError> {
    if params.len() == arity {
        Ok(())
    } else {
        Err(InvokeError::Arity {
            expected: arity,
            got: params.len(),
        })
    }
}

/// Decodes the param at `index` and advances it. The caller has already
/// checked the count with [`check_arity`].
fn decode_at<T: DeserializeOwned>(
    params: &[Param],
    arity: usize,
    index: &mut usize,
) -> Result<T, InvokeError> {
    let param = params.get(*index).ok_or(InvokeError::Arity {
        expected: arity,
        got: params.len(),
    })?;
    let decoded = param.decode().map_err(|source| InvokeError::Param {
        index: *index,
        source,
    })?;
    *index += 1;
    Ok(decoded)
}

macro_rules! impl_operation {
    ($($arg:ident),*) => {
        impl<H, F, O, $($arg,)*> Operation<H, ($($arg,)*)> for F
        where
            F: Fn(&H, $($arg,)*) -> O + Send + Sync + 'static,
            O: IntoOutputs,
            $($arg: DeserializeOwned,)*
        {
            type Output = O;

            fn param_types() -> Vec<&'static str> {
                vec![$(type_name::<$arg>()),*]
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn call(&self, handler: &H, params: &[Param]) -> Result<O, InvokeError> {
                const ARITY: usize = count!($($arg),*);
                check_arity(params, ARITY)?;
                let mut index = 0;
                $(let $arg = decode_at::<$arg>(params, ARITY, &mut index)?;)*
                Ok(self(handler, $($arg,)*))
            }
        }

        impl<H, F, O, $($arg,)*> ContextOperation<H, ($($arg,)*)> for F
        where
            F: Fn(&H, &CallContext, $($arg,)*) -> O + Send + Sync + 'static,
            O: IntoOutputs,
            $($arg: DeserializeOwned,)*
        {
            type Output = O;

            fn param_types() -> Vec<&'static str> {
                vec![$(type_name::<$arg>()),*]
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn call(
                &self,
                handler: &H,
                ctx: &CallContext,
                params: &[Param],
            ) -> Result<O, InvokeError> {
                const ARITY: usize = count!($($arg),*);
                check_arity(params, ARITY)?;
                let mut index = 0;
                $(let $arg = decode_at::<$arg>(params, ARITY, &mut index)?;)*
                Ok(self(handler, ctx, $($arg,)*))
            }
        }
    };
}

impl_operation!();
impl_operation!(A1);
impl_operation!(A1, A2);
impl_operation!(A1, A2, A3);
impl_operation!(A1, A2, A3, A4);
impl_operation!(A1, A2, A3, A4, A5);
impl_operation!(A1, A2, A3, A4, A5, A6);

pub(crate) type InvokeFn =
    dyn Fn(&CallContext, &[Param]) -> Result<Vec<Output>, InvokeError> + Send + Sync;

type RawInvokeFn<H> =
    dyn Fn(&H, &CallContext, &[Param]) -> Result<Vec<Output>, InvokeError> + Send + Sync;

/// Hand-written adapter whose output kinds are declared rather than derived
/// from a return type. Its shape is checked when the registry is built.
pub struct RawMethod<H> {
    params: Vec<&'static str>,
    accepts_context: bool,
    outputs: Vec<OutputKind>,
    invoke: Arc<RawInvokeFn<H>>,
}

impl<H> RawMethod<H> {
    pub fn new<F>(params: Vec<&'static str>, outputs: Vec<OutputKind>, invoke: F) -> Self
    where
        F: Fn(&H, &CallContext, &[Param]) -> Result<Vec<Output>, InvokeError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            params,
            accepts_context: false,
            outputs,
            invoke: Arc::new(invoke),
        }
    }

    pub fn with_context(mut self) -> Self {
        self.accepts_context = true;
        self
    }
}

/// An operation listed by a handler but not yet validated.
pub(crate) struct PendingMethod {
    pub(crate) name: String,
    pub(crate) params: Vec<&'static str>,
    pub(crate) accepts_context: bool,
    pub(crate) outputs: Vec<OutputKind>,
    pub(crate) invoke: Arc<InvokeFn>,
}

/// The table a [`Service`](crate::Service) fills with its operations.
pub struct Methods<H> {
    handler: Arc<H>,
    pending: Vec<PendingMethod>,
}

impl<H> Methods<H>
where
    H: Send + Sync + 'static,
{
    pub(crate) fn new(handler: Arc<H>) -> Self {
        Self {
            handler,
            pending: Vec::new(),
        }
    }

    pub(crate) fn into_pending(self) -> Vec<PendingMethod> {
        self.pending
    }

    /// The instance every operation in this table is bound to.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn add<Args, F>(&mut self, name: &str, operation: F) -> &mut Self
    where
        F: Operation<H, Args>,
    {
        let handler = Arc::clone(&self.handler);
        let invoke = move |_ctx: &CallContext, params: &[Param]| {
            operation
                .call(&handler, params)
                .and_then(|output| output.into_outputs().map_err(InvokeError::Encode))
        };
        self.push(
            name,
            F::param_types(),
            false,
            <F::Output as IntoOutputs>::KINDS.to_vec(),
            Arc::new(invoke),
        )
    }

    pub fn add_with_context<Args, F>(&mut self, name: &str, operation: F) -> &mut Self
    where
        F: ContextOperation<H, Args>,
    {
        let handler = Arc::clone(&self.handler);
        let invoke = move |ctx: &CallContext, params: &[Param]| {
            operation
                .call(&handler, ctx, params)
                .and_then(|output| output.into_outputs().map_err(InvokeError::Encode))
        };
        self.push(
            name,
            F::param_types(),
            true,
            <F::Output as IntoOutputs>::KINDS.to_vec(),
            Arc::new(invoke),
        )
    }

    pub fn add_raw(&mut self, name: &str, method: RawMethod<H>) -> &mut Self {
        let handler = Arc::clone(&self.handler);
        let RawMethod {
            params: param_types,
            accepts_context,
            outputs,
            invoke: raw,
        } = method;
        let invoke = move |ctx: &CallContext, params: &[Param]| raw(&*handler, ctx, params);
        self.push(name, param_types, accepts_context, outputs, Arc::new(invoke))
    }

    fn push(
        &mut self,
        name: &str,
        params: Vec<&'static str>,
        accepts_context: bool,
        outputs: Vec<OutputKind>,
        invoke: Arc<InvokeFn>,
    ) -> &mut Self {
        self.pending.push(PendingMethod {
            name: name.to_owned(),
            params,
            accepts_context,
            outputs,
            invoke,
        });
        self
    }
}

/// The validated, immutable call shape of one registered operation.
#[derive(Clone)]
pub struct MethodDescriptor {
    name: String,
    params: Vec<&'static str>,
    accepts_context: bool,
    slots: OutputSlots,
    invoke: Arc<InvokeFn>,
}

impl MethodDescriptor {
    pub(crate) fn new(
        name: String,
        params: Vec<&'static str>,
        accepts_context: bool,
        slots: OutputSlots,
        invoke: Arc<InvokeFn>,
    ) -> Self {
        Self {
            name,
            params,
            accepts_context,
            slots,
            invoke,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn param_types(&self) -> &[&'static str] {
        &self.params
    }

    /// Number of params a request must carry. Excludes the call context.
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn accepts_context(&self) -> bool {
        self.accepts_context
    }

    pub fn slots(&self) -> OutputSlots {
        self.slots
    }

    /// Decodes `params` into the declared types and runs the operation.
    pub fn invoke(&self, ctx: &CallContext, params: &[Param]) -> Result<Outcome, InvokeError> {
        if params.len() != self.arity() {
            return Err(InvokeError::Arity {
                expected: self.arity(),
                got: params.len(),
            });
        }
        let outputs = (self.invoke)(ctx, params)?;
        self.slots.outcome(outputs)
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("accepts_context", &self.accepts_context)
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}
