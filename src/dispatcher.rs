//! Module for running one request against its target procedure.
use crate::binder;
use crate::context::{ActivityContext, ClientId, HostContext};
use crate::encoding;
use crate::error::Error;
use crate::objects::ObjectStore;
use crate::registry::{ProcedureSignature, Registry};
use crate::rpc;
use crate::types::{ClassId, ObjectRef, TypeDescriptor, Value};
use log::error;
use std::any::Any;
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

static CAPTURE_BACKTRACES: AtomicBool = AtomicBool::new(false);

thread_local!(static PANIC_TRACE: RefCell<Option<String>> = RefCell::new(None));

/// The state handed to an invoker for one run: the bound arguments plus the
/// ambient host state and the object store.
pub struct Invocation<'a> {
    /// The client the request came from.
    pub client: ClientId,
    /// The bound argument values, dense from position 0.
    pub args: Vec<Value>,
    /// The object store, for minting and resolving handles.
    pub objects: &'a mut ObjectStore,
    /// The host's activity context at the time of this run.
    pub context: ActivityContext,
    /// The in-simulation time at the time of this run.
    pub time: f64,
}

impl<'a> Invocation<'a> {
    /// Gets the bound argument at the given position.
    ///
    /// Positions match the signature's parameter list; the binder has
    /// already filled every slot, so an out-of-range position is a bug in
    /// the service and panics (which the dispatcher reports as a failure).
    pub fn arg(&self, position: usize) -> &Value {
        &self.args[position]
    }

    /// Places a host object in the store and returns the value that exposes
    /// it to the calling client.
    pub fn add_object<T: 'static>(&mut self, class: ClassId, object: Rc<T>) -> Result<Value, Error> {
        let object: Rc<dyn Any> = object;
        if !class.matches(&object) {
            return Err(Error::ProcedureFailed(format!(
                "object is not an instance of {}",
                class.name()
            )));
        }
        let handle = self.objects.add(object.clone());
        self.objects.mark_owner(handle, self.client);
        Ok(Value::Object(Some(ObjectRef::new(handle, object))))
    }
}

/// What one run of an invoker produced.
pub enum Outcome {
    /// A return value.
    Value(Value),
    /// No value; null for object returns, nothing for void ones.
    Null,
    /// The run did not finish; the carried continuation resumes it on the
    /// next tick.
    Yield(Continuation),
}

/// The result of one invoker run.
pub type InvokeResult = Result<Outcome, Error>;

/// A bound callable that executes a procedure.
pub type Invoker = Rc<dyn Fn(&mut Invocation<'_>) -> InvokeResult>;

/// A suspended invocation: the invoker to run and the arguments to run it
/// with.
///
/// An invoker that needs more than one tick returns
/// [`Outcome::Yield`] carrying the continuation for its next step, which may
/// target the same invoker with updated arguments or a different one
/// entirely.
pub struct Continuation {
    pub(crate) invoker: Invoker,
    pub(crate) args: Vec<Value>,
}

impl Continuation {
    /// Creates a continuation that runs `invoker` with `args`.
    pub fn new(invoker: Invoker, args: Vec<Value>) -> Continuation {
        Continuation { invoker, args }
    }
}

impl std::fmt::Debug for Continuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Continuation")
            .field("args", &self.args)
            .finish()
    }
}

/// The dispatcher's verdict on one run: either a finished result ready to
/// become a response, or a suspension.
#[derive(Debug)]
pub(crate) enum Dispatched {
    Done(Result<Option<Vec<u8>>, Error>),
    Yielded(Continuation),
}

/// Runs a fresh request: lookup, context gate, bind, invoke.
pub(crate) fn dispatch(
    registry: &Registry,
    store: &mut ObjectStore,
    host: &dyn HostContext,
    client: ClientId,
    request: &rpc::Request,
) -> (Option<Rc<ProcedureSignature>>, Dispatched) {
    let signature = match registry.lookup(&request.service, &request.procedure) {
        Ok(signature) => signature,
        Err(e) => return (None, Dispatched::Done(Err(e))),
    };

    let ambient = host.activity();
    if !signature.required_context.allows(ambient) {
        let error = Error::WrongContext(format!(
            "{} requires {} but the host is in {}",
            signature.fully_qualified_name(),
            signature.required_context,
            ambient
        ));
        return (Some(signature), Dispatched::Done(Err(error)));
    }

    let args = match binder::bind(&signature, &request.arguments, store, client) {
        Ok(args) => args,
        Err(e) => return (Some(signature), Dispatched::Done(Err(e))),
    };

    let continuation = Continuation::new(signature.invoker.clone(), args);
    let dispatched = run(&signature, continuation, store, host, client);
    (Some(signature), dispatched)
}

/// Resumes a previously suspended invocation.
pub(crate) fn resume(
    signature: &ProcedureSignature,
    continuation: Continuation,
    store: &mut ObjectStore,
    host: &dyn HostContext,
    client: ClientId,
) -> Dispatched {
    run(signature, continuation, store, host, client)
}

fn run(
    signature: &ProcedureSignature,
    continuation: Continuation,
    store: &mut ObjectStore,
    host: &dyn HostContext,
    client: ClientId,
) -> Dispatched {
    let Continuation { invoker, args } = continuation;
    let mut invocation = Invocation {
        client,
        args,
        objects: store,
        context: host.activity(),
        time: host.universal_time(),
    };

    let result = catch_unwind(AssertUnwindSafe(|| invoker(&mut invocation)));

    match result {
        Err(payload) => {
            let message = panic_message(&*payload);
            match take_panic_trace() {
                Some(trace) if !trace.is_empty() => error!(
                    "procedure {} panicked with '{}'\n{}",
                    signature.fully_qualified_name(),
                    message,
                    trace
                ),
                _ => error!(
                    "procedure {} panicked with '{}'",
                    signature.fully_qualified_name(),
                    message
                ),
            }
            Dispatched::Done(Err(Error::ProcedureFailed(format!(
                "{} panicked with '{}'",
                signature.fully_qualified_name(),
                message
            ))))
        }
        Ok(Err(e)) => Dispatched::Done(Err(e)),
        Ok(Ok(Outcome::Yield(next))) => Dispatched::Yielded(next),
        Ok(Ok(Outcome::Null)) => match &signature.return_type {
            TypeDescriptor::Void => Dispatched::Done(Ok(None)),
            TypeDescriptor::Object(_) => encode_return(signature, &Value::null()),
            return_type => Dispatched::Done(Err(Error::NullReturn(format!(
                "{} returned null but declares {}",
                signature.fully_qualified_name(),
                return_type
            )))),
        },
        Ok(Ok(Outcome::Value(value))) => match &signature.return_type {
            TypeDescriptor::Void => Dispatched::Done(Ok(None)),
            _ => encode_return(signature, &value),
        },
    }
}

fn encode_return(signature: &ProcedureSignature, value: &Value) -> Dispatched {
    match encoding::encode_value(value, &signature.return_type) {
        Ok(bytes) => Dispatched::Done(Ok(Some(bytes))),
        Err(e) => Dispatched::Done(Err(Error::ProcedureFailed(format!(
            "{} produced an unencodable result: {}",
            signature.fully_qualified_name(),
            e
        )))),
    }
}

pub(crate) fn set_backtrace_capture(enabled: bool) {
    CAPTURE_BACKTRACES.store(enabled, Ordering::Relaxed);
}

/// Called from the panic hook, while the panicking stack is still live. The
/// catch side of [`run`] picks the trace up once the unwind lands there.
pub(crate) fn record_panic_trace() {
    if !CAPTURE_BACKTRACES.load(Ordering::Relaxed) {
        return;
    }
    let trace = procedure_trace();
    PANIC_TRACE.with(|t| *t.borrow_mut() = Some(trace));
}

fn take_panic_trace() -> Option<String> {
    PANIC_TRACE.with(|t| t.borrow_mut().take())
}

// Renders only the frames between the panic machinery and this module's
// catch_unwind, which is the slice that belongs to the procedure itself.
fn procedure_trace() -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut in_procedure = false;

    for frame in backtrace::Backtrace::new().frames() {
        for symbol in frame.symbols() {
            let name = match symbol.name() {
                Some(name) => name.to_string(),
                None => continue,
            };

            if !in_procedure {
                in_procedure = name.starts_with("std::panicking::begin_panic")
                    || name.starts_with("core::panicking::panic");
                continue;
            }
            if name.contains("dispatcher::run") {
                return lines.join("\n");
            }

            let line = match (symbol.filename(), symbol.lineno()) {
                (Some(file), Some(lineno)) => {
                    format!("  {}: {} at {}:{}", lines.len(), name, file.display(), lineno)
                }
                _ => format!("  {}: {}", lines.len(), name),
            };
            lines.push(line);
        }
    }

    lines.join("\n")
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .cloned()
        .unwrap_or_else(|| {
            payload
                .downcast_ref::<String>()
                .map(String::as_str)
                .unwrap_or("<unknown>")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ProcedureBuilder, ServiceBuilder};
    use matches::assert_matches;
    use std::cell::Cell;

    struct TestHost {
        context: ActivityContext,
        time: f64,
    }

    impl HostContext for TestHost {
        fn activity(&self) -> ActivityContext {
            self.context
        }

        fn universal_time(&self) -> f64 {
            self.time
        }
    }

    fn flight_host() -> TestHost {
        TestHost {
            context: ActivityContext::Flight,
            time: 100.0,
        }
    }

    fn echo_registry() -> Registry {
        Registry::new(vec![ServiceBuilder::new("Test")
            .procedure(
                ProcedureBuilder::new("Echo", |inv: &mut Invocation<'_>| {
                    Ok(Outcome::Value(inv.arg(0).clone()))
                })
                .parameter("value", TypeDescriptor::String)
                .returns(TypeDescriptor::String),
            )
            .build()])
    }

    fn request(service: &str, procedure: &str, arguments: Vec<rpc::Argument>) -> rpc::Request {
        rpc::Request {
            service: service.to_string(),
            procedure: procedure.to_string(),
            arguments,
        }
    }

    fn encoded(value: &Value, ty: &TypeDescriptor) -> Vec<u8> {
        encoding::encode_value(value, ty).unwrap()
    }

    #[test]
    fn it_dispatches_and_encodes_the_return_value() {
        let registry = echo_registry();
        let mut store = ObjectStore::new(false);
        let request = request(
            "Test",
            "Echo",
            vec![rpc::Argument {
                position: 0,
                value: encoded(&Value::String("foo".to_string()), &TypeDescriptor::String),
            }],
        );

        let (_, dispatched) = dispatch(&registry, &mut store, &flight_host(), ClientId(1), &request);

        let bytes = match dispatched {
            Dispatched::Done(Ok(Some(bytes))) => bytes,
            _ => panic!("expected a completed dispatch with a return value"),
        };
        assert_eq!(
            encoding::decode_value(&bytes, &TypeDescriptor::String, &store).unwrap(),
            Value::String("foo".to_string())
        );
    }

    #[test]
    fn it_propagates_registry_misses() {
        let registry = echo_registry();
        let mut store = ObjectStore::new(false);
        let request = request("NonExistant", "X", Vec::new());

        let (signature, dispatched) =
            dispatch(&registry, &mut store, &flight_host(), ClientId(1), &request);

        assert!(signature.is_none());
        assert_matches!(dispatched, Dispatched::Done(Err(Error::UnknownService(_))));
    }

    #[test]
    fn it_gates_on_activity_context_without_invoking() {
        let invoked = Rc::new(Cell::new(0));
        let counter = invoked.clone();
        let registry = Registry::new(vec![ServiceBuilder::new("Test")
            .procedure(
                ProcedureBuilder::new("Stage", move |_inv: &mut Invocation<'_>| {
                    counter.set(counter.get() + 1);
                    Ok(Outcome::Null)
                })
                .context(&[ActivityContext::Flight]),
            )
            .build()]);
        let mut store = ObjectStore::new(false);
        let host = TestHost {
            context: ActivityContext::TrackingStation,
            time: 0.0,
        };

        let (_, dispatched) = dispatch(
            &registry,
            &mut store,
            &host,
            ClientId(1),
            &request("Test", "Stage", Vec::new()),
        );

        assert_matches!(dispatched, Dispatched::Done(Err(Error::WrongContext(_))));
        assert_eq!(invoked.get(), 0);
    }

    #[test]
    fn it_reports_null_returns_for_non_nullable_types() {
        let registry = Registry::new(vec![ServiceBuilder::new("Test")
            .procedure(
                ProcedureBuilder::new("Name", |_inv: &mut Invocation<'_>| Ok(Outcome::Null))
                    .returns(TypeDescriptor::String),
            )
            .build()]);
        let mut store = ObjectStore::new(false);

        let (_, dispatched) = dispatch(
            &registry,
            &mut store,
            &flight_host(),
            ClientId(1),
            &request("Test", "Name", Vec::new()),
        );

        assert_matches!(dispatched, Dispatched::Done(Err(Error::NullReturn(_))));
    }

    #[test]
    fn it_encodes_a_null_object_return_as_handle_zero() {
        struct Vessel;
        let class = ClassId::of::<Vessel>("Vessel");
        let registry = Registry::new(vec![ServiceBuilder::new("Test")
            .class(class)
            .procedure(
                ProcedureBuilder::new("Active", move |_inv: &mut Invocation<'_>| Ok(Outcome::Null))
                    .returns(TypeDescriptor::Object(class)),
            )
            .build()]);
        let mut store = ObjectStore::new(false);

        let (_, dispatched) = dispatch(
            &registry,
            &mut store,
            &flight_host(),
            ClientId(1),
            &request("Test", "Active", Vec::new()),
        );

        match dispatched {
            Dispatched::Done(Ok(Some(bytes))) => assert_eq!(bytes, vec![0]),
            _ => panic!("expected an encoded null handle"),
        }
    }

    #[test]
    fn it_reports_a_panicking_invoker_as_a_failure() {
        let registry = Registry::new(vec![ServiceBuilder::new("Test")
            .procedure(ProcedureBuilder::new("Explode", |_inv: &mut Invocation<'_>| {
                panic!("the engine fell off")
            }))
            .build()]);
        let mut store = ObjectStore::new(false);

        let (_, dispatched) = dispatch(
            &registry,
            &mut store,
            &flight_host(),
            ClientId(1),
            &request("Test", "Explode", Vec::new()),
        );

        match dispatched {
            Dispatched::Done(Err(Error::ProcedureFailed(message))) => {
                assert!(message.contains("the engine fell off"));
            }
            _ => panic!("expected a procedure failure"),
        }
    }

    #[test]
    fn it_surfaces_yields_instead_of_completing() {
        let registry = Registry::new(vec![ServiceBuilder::new("Test")
            .procedure(
                ProcedureBuilder::new("Wait", |_inv: &mut Invocation<'_>| {
                    Ok(Outcome::Yield(Continuation::new(
                        Rc::new(|_inv: &mut Invocation<'_>| Ok(Outcome::Null)),
                        Vec::new(),
                    )))
                }),
            )
            .build()]);
        let mut store = ObjectStore::new(false);

        let (signature, dispatched) = dispatch(
            &registry,
            &mut store,
            &flight_host(),
            ClientId(1),
            &request("Test", "Wait", Vec::new()),
        );

        let continuation = match dispatched {
            Dispatched::Yielded(continuation) => continuation,
            _ => panic!("expected a yield"),
        };

        let resumed = resume(
            &signature.unwrap(),
            continuation,
            &mut store,
            &flight_host(),
            ClientId(1),
        );
        assert_matches!(resumed, Dispatched::Done(Ok(None)));
    }
}
