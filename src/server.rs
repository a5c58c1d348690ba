//! Module for the server façade the host embeds.
use crate::context::{ClientId, HostContext};
use crate::dispatcher;
use crate::objects::ObjectStore;
use crate::registry::{Registry, ServiceDescriptor};
use crate::rpc;
use crate::scheduler::Scheduler;
use log::error;
use serde::Deserialize;
use std::panic::{set_hook, PanicInfo};
use std::sync::Once;

static PANIC_HOOK: Once = Once::new();

/// Tunables an embedding host may load from its own configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    /// Whether a client's exclusively held object handles are discarded when
    /// it disconnects.
    pub evict_handles_on_disconnect: bool,
    /// Upper bound on queued requests per client; excess submissions are
    /// answered with an immediate error. Unbounded when `None`.
    pub max_pending_per_client: Option<usize>,
    /// Whether a panicking procedure gets a filtered backtrace captured and
    /// logged alongside its failure. The setting is process-wide; the last
    /// constructed server wins.
    pub capture_panic_backtraces: bool,
}

impl Default for ServerOptions {
    fn default() -> ServerOptions {
        ServerOptions {
            evict_handles_on_disconnect: true,
            max_pending_per_client: None,
            capture_panic_backtraces: false,
        }
    }
}

/// The embedded server: services, object handles, and the request queues,
/// advanced by the host's tick.
///
/// The transport pushes decoded requests (or raw frames) in from its own
/// threads' queues; the host game loop calls [`tick`](Server::tick) once per
/// simulation step on the host thread and ships the returned responses back
/// out. Everything in here runs on that one thread.
pub struct Server {
    registry: Registry,
    objects: ObjectStore,
    scheduler: Scheduler,
    options: ServerOptions,
}

impl Server {
    /// Creates a server over the given services with default options.
    ///
    /// Panics if any descriptor is invalid; see [`Registry::new`].
    pub fn new(services: Vec<ServiceDescriptor>) -> Server {
        Server::with_options(services, ServerOptions::default())
    }

    /// Creates a server over the given services.
    pub fn with_options(services: Vec<ServiceDescriptor>, options: ServerOptions) -> Server {
        dispatcher::set_backtrace_capture(options.capture_panic_backtraces);
        PANIC_HOOK.call_once(|| {
            set_hook(Box::new(handle_panic));
        });

        Server {
            registry: Registry::new(services),
            objects: ObjectStore::new(options.evict_handles_on_disconnect),
            scheduler: Scheduler::new(options.max_pending_per_client),
            options,
        }
    }

    /// Queues a request behind the client's earlier submissions.
    pub fn submit(&mut self, client: ClientId, request: rpc::Request) {
        self.scheduler.submit(client, request);
    }

    /// Decodes a length-prefixed frame and queues the request it carries.
    ///
    /// A malformed frame still produces a response, in arrival order, so the
    /// client learns about the rejection.
    pub fn submit_frame(&mut self, client: ClientId, frame: &[u8]) {
        match rpc::decode_request(frame) {
            Ok(request) => self.scheduler.submit(client, request),
            Err(e) => self.scheduler.reject(client, e),
        }
    }

    /// Runs one scheduler tick and returns the responses finalized during
    /// it, stamped with the host's current universal time.
    pub fn tick(&mut self, host: &dyn HostContext) -> Vec<(ClientId, rpc::Response)> {
        self.scheduler.tick(&self.registry, &mut self.objects, host)
    }

    /// Drops the client's queued and suspended requests and, when enabled,
    /// evicts the object handles only that client holds.
    pub fn disconnect(&mut self, client: ClientId) {
        self.scheduler.disconnect(client);
        if self.options.evict_handles_on_disconnect {
            self.objects.reset_client(client);
        }
    }

    /// Gets the object store, e.g. to seed host objects at startup.
    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    /// Gets the object store mutably.
    pub fn objects_mut(&mut self) -> &mut ObjectStore {
        &mut self.objects
    }

    /// Gets the procedure registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

fn handle_panic(info: &PanicInfo) {
    dispatcher::record_panic_trace();

    let payload = info
        .payload()
        .downcast_ref::<&str>()
        .cloned()
        .unwrap_or_else(|| {
            info.payload()
                .downcast_ref::<String>()
                .map(String::as_str)
                .unwrap_or("")
        });
    match info.location() {
        Some(location) => {
            error!(
                "panicked with '{}', {}:{}:{}",
                payload,
                location.file(),
                location.line(),
                location.column()
            );
        }
        None => {
            error!("panicked with '{}'", payload);
        }
    }
}
