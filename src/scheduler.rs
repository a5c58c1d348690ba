//! Module for the tick-driven scheduler that runs requests as continuations.
//!
//! Each client has a FIFO of pending work. One tick drains every client's
//! queue at most once: finished work becomes a response, a yield parks the
//! queue until the next tick. A yielding request therefore backpressures
//! only its own client; other clients' queues keep draining.
use crate::context::{ClientId, HostContext};
use crate::dispatcher::{self, Continuation, Dispatched};
use crate::error::Error;
use crate::objects::ObjectStore;
use crate::registry::{ProcedureSignature, Registry};
use crate::rpc;
use log::{debug, warn};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

enum Pending {
    Fresh(rpc::Request),
    Suspended {
        signature: Rc<ProcedureSignature>,
        continuation: Continuation,
    },
    Rejected(Error),
}

/// Runs queued requests, one FIFO per client, driven by the host tick.
pub struct Scheduler {
    queues: HashMap<ClientId, VecDeque<Pending>>,
    rotation: Vec<ClientId>,
    max_pending: Option<usize>,
}

impl Scheduler {
    pub(crate) fn new(max_pending: Option<usize>) -> Scheduler {
        Scheduler {
            queues: HashMap::new(),
            rotation: Vec::new(),
            max_pending,
        }
    }

    /// Queues a request behind the client's earlier submissions.
    pub(crate) fn submit(&mut self, client: ClientId, request: rpc::Request) {
        if let Some(limit) = self.max_pending {
            if self.queue_len(client) >= limit {
                warn!("{} exceeded the pending request limit of {}", client, limit);
                self.push(
                    client,
                    Pending::Rejected(Error::ProcedureFailed(format!(
                        "pending request limit of {} exceeded",
                        limit
                    ))),
                );
                return;
            }
        }
        self.push(client, Pending::Fresh(request));
    }

    /// Queues an immediate error response, preserving arrival order.
    pub(crate) fn reject(&mut self, client: ClientId, error: Error) {
        self.push(client, Pending::Rejected(error));
    }

    /// Drops every queued and suspended request of the client without
    /// producing responses.
    pub(crate) fn disconnect(&mut self, client: ClientId) {
        if let Some(queue) = self.queues.remove(&client) {
            debug!("dropped {} pending request(s) for {}", queue.len(), client);
        }
        self.rotation.retain(|c| *c != client);
    }

    /// Runs one tick: drains each client's queue at most once, in rotated
    /// order, and returns the finalized responses.
    pub(crate) fn tick(
        &mut self,
        registry: &Registry,
        store: &mut ObjectStore,
        host: &dyn HostContext,
    ) -> Vec<(ClientId, rpc::Response)> {
        let order = self.rotation.clone();
        let mut responses = Vec::new();

        for client in order {
            let queue = match self.queues.get_mut(&client) {
                Some(queue) => queue,
                None => continue,
            };

            while let Some(pending) = queue.pop_front() {
                match pending {
                    Pending::Rejected(error) => {
                        responses.push((client, finalize(Err(error), host)));
                    }
                    Pending::Fresh(request) => {
                        match dispatcher::dispatch(registry, store, host, client, &request) {
                            (Some(signature), Dispatched::Yielded(continuation)) => {
                                queue.push_front(Pending::Suspended {
                                    signature,
                                    continuation,
                                });
                                break;
                            }
                            (_, Dispatched::Done(result)) => {
                                responses.push((client, finalize(result, host)));
                            }
                            // A yield can only come from a resolved target.
                            (None, Dispatched::Yielded(_)) => unreachable!(),
                        }
                    }
                    Pending::Suspended {
                        signature,
                        continuation,
                    } => {
                        match dispatcher::resume(&signature, continuation, store, host, client) {
                            Dispatched::Yielded(continuation) => {
                                queue.push_front(Pending::Suspended {
                                    signature,
                                    continuation,
                                });
                                break;
                            }
                            Dispatched::Done(result) => {
                                responses.push((client, finalize(result, host)));
                            }
                        }
                    }
                }
            }
        }

        self.prune();
        if self.rotation.len() > 1 {
            self.rotation.rotate_left(1);
        }

        responses
    }

    fn push(&mut self, client: ClientId, pending: Pending) {
        if !self.queues.contains_key(&client) {
            self.rotation.push(client);
        }
        self.queues.entry(client).or_default().push_back(pending);
    }

    fn queue_len(&self, client: ClientId) -> usize {
        self.queues.get(&client).map(VecDeque::len).unwrap_or(0)
    }

    fn prune(&mut self) {
        let queues = &mut self.queues;
        queues.retain(|_, queue| !queue.is_empty());
        self.rotation.retain(|client| queues.contains_key(client));
    }
}

fn finalize(result: Result<Option<Vec<u8>>, Error>, host: &dyn HostContext) -> rpc::Response {
    match result {
        Ok(return_value) => rpc::Response {
            time: host.universal_time(),
            error: String::new(),
            return_value,
        },
        Err(error) => {
            debug!("request failed: {}", error);
            rpc::Response {
                time: host.universal_time(),
                error: error.to_string(),
                return_value: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ActivityContext;
    use crate::dispatcher::{Invocation, InvokeResult, Outcome};
    use crate::encoding::encode_value;
    use crate::registry::{ProcedureBuilder, ServiceBuilder};
    use crate::types::{TypeDescriptor, Value};

    struct TestHost;

    impl HostContext for TestHost {
        fn activity(&self) -> ActivityContext {
            ActivityContext::Flight
        }

        fn universal_time(&self) -> f64 {
            1.0
        }
    }

    fn count(inv: &mut Invocation<'_>) -> InvokeResult {
        let n = inv.arg(0).as_i32().unwrap();
        if n == 0 {
            return Ok(Outcome::Value(Value::Int32(0)));
        }
        Ok(Outcome::Yield(Continuation::new(
            Rc::new(count),
            vec![Value::Int32(n - 1)],
        )))
    }

    fn registry() -> Registry {
        Registry::new(vec![ServiceBuilder::new("Test")
            .procedure(
                ProcedureBuilder::new("Echo", |inv: &mut Invocation<'_>| {
                    Ok(Outcome::Value(inv.arg(0).clone()))
                })
                .parameter("s", TypeDescriptor::String)
                .returns(TypeDescriptor::String),
            )
            .procedure(
                ProcedureBuilder::new("Count", count)
                    .parameter("n", TypeDescriptor::Int32)
                    .returns(TypeDescriptor::Int32),
            )
            .build()])
    }

    fn echo_request(s: &str) -> rpc::Request {
        rpc::Request {
            service: "Test".to_string(),
            procedure: "Echo".to_string(),
            arguments: vec![rpc::Argument {
                position: 0,
                value: encode_value(&Value::String(s.to_string()), &TypeDescriptor::String)
                    .unwrap(),
            }],
        }
    }

    fn count_request(n: i32) -> rpc::Request {
        rpc::Request {
            service: "Test".to_string(),
            procedure: "Count".to_string(),
            arguments: vec![rpc::Argument {
                position: 0,
                value: encode_value(&Value::Int32(n), &TypeDescriptor::Int32).unwrap(),
            }],
        }
    }

    fn clients(responses: &[(ClientId, rpc::Response)]) -> Vec<ClientId> {
        responses.iter().map(|(client, _)| *client).collect()
    }

    #[test]
    fn it_rotates_suspended_clients_between_ticks() {
        let registry = registry();
        let mut store = ObjectStore::new(false);
        let mut scheduler = Scheduler::new(None);

        scheduler.submit(ClientId(1), count_request(1));
        scheduler.submit(ClientId(2), count_request(1));

        // Both heads yield on the first tick, so both clients stay queued
        // and the rotation advances.
        assert!(scheduler.tick(&registry, &mut store, &TestHost).is_empty());

        let responses = scheduler.tick(&registry, &mut store, &TestHost);

        assert_eq!(clients(&responses), vec![ClientId(2), ClientId(1)]);
    }

    #[test]
    fn it_drains_a_client_only_to_its_first_yield() {
        let registry = registry();
        let mut store = ObjectStore::new(false);
        let mut scheduler = Scheduler::new(None);
        let client = ClientId(1);

        scheduler.submit(client, count_request(1));
        scheduler.submit(client, echo_request("after"));

        assert!(scheduler.tick(&registry, &mut store, &TestHost).is_empty());

        let responses = scheduler.tick(&registry, &mut store, &TestHost);

        assert_eq!(clients(&responses), vec![client, client]);
        assert_eq!(responses[0].1.error, "");
        assert_eq!(responses[1].1.error, "");
    }

    #[test]
    fn it_rejects_submissions_over_the_pending_limit() {
        let registry = registry();
        let mut store = ObjectStore::new(false);
        let mut scheduler = Scheduler::new(Some(1));
        let client = ClientId(1);

        scheduler.submit(client, echo_request("first"));
        scheduler.submit(client, echo_request("second"));

        let responses = scheduler.tick(&registry, &mut store, &TestHost);

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].1.error, "");
        assert!(responses[1].1.error.starts_with("ProcedureFailed: "));
    }

    #[test]
    fn it_forgets_drained_clients() {
        let registry = registry();
        let mut store = ObjectStore::new(false);
        let mut scheduler = Scheduler::new(None);

        scheduler.submit(ClientId(1), echo_request("once"));

        assert_eq!(scheduler.tick(&registry, &mut store, &TestHost).len(), 1);
        assert!(scheduler.queues.is_empty());
        assert!(scheduler.rotation.is_empty());
        assert!(scheduler.tick(&registry, &mut store, &TestHost).is_empty());
    }

    #[test]
    fn it_drops_queued_work_on_disconnect() {
        let registry = registry();
        let mut store = ObjectStore::new(false);
        let mut scheduler = Scheduler::new(None);
        let client = ClientId(1);

        scheduler.submit(client, count_request(5));
        scheduler.submit(client, echo_request("never"));
        assert!(scheduler.tick(&registry, &mut store, &TestHost).is_empty());

        scheduler.disconnect(client);

        assert!(scheduler.queues.is_empty());
        assert!(scheduler.rotation.is_empty());
        assert!(scheduler.tick(&registry, &mut store, &TestHost).is_empty());
    }
}
