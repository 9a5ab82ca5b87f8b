use crate::method::{MethodDescriptor, Methods, OutputKind, OutputSlots, ShapeError};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tracing::debug;

/// A handler whose operations can be exposed under a namespace.
///
/// ```ignore
/// impl Service for Calc {
///     fn methods(methods: &mut Methods<Self>) {
///         methods.add("Add", Calc::add).add("Div", Calc::div);
///     }
/// }
/// ```
pub trait Service: Send + Sync + Sized + 'static {
    fn methods(methods: &mut Methods<Self>);
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("method {method}: {source}")]
    Shape {
        method: String,
        #[source]
        source: ShapeError,
    },
}

/// Collects operations from handlers, then seals them into a [`Registry`].
#[derive(Default)]
pub struct RegistryBuilder {
    methods: HashMap<String, MethodDescriptor>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exposes every operation of `handler` as `namespace.Operation`.
    ///
    /// Either every operation of the handler is added or, if one has an invalid
    /// output shape, none is. A name that is already registered is overwritten.
    pub fn register<S: Service>(
        &mut self,
        namespace: &str,
        handler: S,
    ) -> Result<&mut Self, RegistrationError> {
        self.register_shared(namespace, Arc::new(handler))
    }

    pub fn register_shared<S: Service>(
        &mut self,
        namespace: &str,
        handler: Arc<S>,
    ) -> Result<&mut Self, RegistrationError> {
        let mut methods = Methods::new(handler);
        S::methods(&mut methods);

        let descriptors = methods
            .into_pending()
            .into_iter()
            .map(|pending| {
                let name = format!("{namespace}.{}", pending.name);
                match OutputSlots::from_kinds(&pending.outputs) {
                    Ok(slots) => Ok(MethodDescriptor::new(
                        name,
                        pending.params,
                        pending.accepts_context,
                        slots,
                        pending.invoke,
                    )),
                    Err(source) => Err(RegistrationError::Shape {
                        method: name,
                        source,
                    }),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        for descriptor in descriptors {
            debug!(
                method = descriptor.name(),
                arity = descriptor.arity(),
                "registered"
            );
            self.methods.insert(descriptor.name().to_owned(), descriptor);
        }
        Ok(self)
    }

    pub fn build(self) -> Registry {
        Registry {
            methods: Arc::new(self.methods),
        }
    }
}

/// Sealed mapping from `namespace.Operation` to its descriptor.
///
/// Immutable once built and cheap to clone, so it can be shared between any
/// number of concurrent dispatchers.
#[derive(Clone, Default)]
pub struct Registry {
    methods: Arc<HashMap<String, MethodDescriptor>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn get(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.get(name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Every registered operation, sorted by name.
    pub fn methods(&self) -> Vec<MethodInfo> {
        let mut infos: Vec<_> = self
            .methods
            .values()
            .map(|descriptor| MethodInfo {
                name: descriptor.name().to_owned(),
                params: descriptor.param_types().to_vec(),
                accepts_context: descriptor.accepts_context(),
                outputs: outputs_of(descriptor.slots()),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }
}

fn outputs_of(slots: OutputSlots) -> Vec<OutputKind> {
    let mut outputs = Vec::new();
    if slots.value.is_some() {
        outputs.push(OutputKind::Value);
    }
    if slots.error.is_some() {
        outputs.push(OutputKind::Error);
    }
    outputs
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub name: String,
    pub params: Vec<&'static str>,
    pub accepts_context: bool,
    pub outputs: Vec<OutputKind>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::CallContext,
        method::{Fallible, Json, Output, RawMethod},
    };

    struct Greeter;

    impl Greeter {
        fn hello(&self, name: String) -> Json<String> {
            Json(format!("Hello, {name}!"))
        }

        fn tick(&self) {}

        fn check(&self, _ctx: &CallContext, flag: bool) -> Fallible<String> {
            Fallible(if flag { Ok(()) } else { Err("flag unset".into()) })
        }

        fn pair(&self, a: u8, b: u8, c: u8) -> Result<u32, String> {
            Ok(u32::from(a) + u32::from(b) + u32::from(c))
        }
    }

    impl Service for Greeter {
        fn methods(methods: &mut Methods<Self>) {
            methods
                .add("Hello", Greeter::hello)
                .add("Tick", Greeter::tick)
                .add_with_context("Check", Greeter::check)
                .add("Pair", Greeter::pair);
        }
    }

    struct Broken;

    impl Service for Broken {
        fn methods(methods: &mut Methods<Self>) {
            methods.add("Fine", |_: &Broken| ()).add_raw(
                "Triple",
                RawMethod::new(
                    vec![],
                    vec![OutputKind::Value, OutputKind::Error, OutputKind::Error],
                    |_: &Broken, _: &CallContext, _: &[crate::Param]| Ok(Vec::<Output>::new()),
                ),
            );
        }
    }

    #[test]
    fn arity_excludes_receiver_and_context() {
        let mut builder = Registry::builder();
        builder.register("greet", Greeter).unwrap();
        let registry = builder.build();

        assert_eq!(registry.len(), 4);
        assert_eq!(registry.get("greet.Hello").unwrap().arity(), 1);
        assert_eq!(registry.get("greet.Tick").unwrap().arity(), 0);
        assert_eq!(registry.get("greet.Pair").unwrap().arity(), 3);

        let check = registry.get("greet.Check").unwrap();
        assert_eq!(check.arity(), 1);
        assert!(check.accepts_context());
        assert_eq!(check.param_types(), &["bool"]);
    }

    #[test]
    fn listing_is_sorted_and_reports_shapes() {
        let mut builder = Registry::builder();
        builder.register("greet", Greeter).unwrap();
        let names: Vec<_> = builder
            .build()
            .methods()
            .into_iter()
            .map(|info| (info.name, info.outputs))
            .collect();
        assert_eq!(
            names,
            vec![
                ("greet.Check".to_owned(), vec![OutputKind::Error]),
                ("greet.Hello".to_owned(), vec![OutputKind::Value]),
                (
                    "greet.Pair".to_owned(),
                    vec![OutputKind::Value, OutputKind::Error]
                ),
                ("greet.Tick".to_owned(), vec![]),
            ]
        );
    }

    #[test]
    fn listing_serializes_without_shared_pointers() {
        let mut builder = Registry::builder();
        builder.register("greet", Greeter).unwrap();
        let registry = builder.build();
        let hello = registry
            .methods()
            .into_iter()
            .find(|info| info.name == "greet.Hello")
            .unwrap();
        let json = serde_json::to_value(&hello).unwrap();
        assert_eq!(json["name"], "greet.Hello");
        assert_eq!(json["accepts_context"], false);
        assert_eq!(json["outputs"], serde_json::json!(["Value"]));
    }

    #[test]
    fn invalid_shape_rejects_the_whole_handler() {
        let mut builder = Registry::builder();
        let err = builder.register("broken", Broken).err().unwrap();
        assert_eq!(
            err,
            RegistrationError::Shape {
                method: "broken.Triple".into(),
                source: ShapeError::TooManyOutputs(3),
            }
        );
        assert!(builder.build().get("broken.Fine").is_none());
    }

    #[test]
    fn later_registration_overwrites() {
        struct A;
        struct B;
        impl Service for A {
            fn methods(methods: &mut Methods<Self>) {
                methods.add("Who", |_: &A| Json("a"));
            }
        }
        impl Service for B {
            fn methods(methods: &mut Methods<Self>) {
                methods.add("Who", |_: &B| Json("b"));
            }
        }

        let mut builder = Registry::builder();
        builder.register("ns", A).unwrap().register("ns", B).unwrap();
        let registry = builder.build();
        let outcome = registry
            .get("ns.Who")
            .unwrap()
            .invoke(&CallContext::default(), &[])
            .unwrap();
        assert_eq!(outcome.value, Some(serde_json::json!("b")));
    }
}
