//! Module for the built-in introspection service.
//!
//! Nothing here is special-cased: `Core` is an ordinary service descriptor
//! a host may mount alongside its own, giving clients a well-known
//! bootstrap point.
use crate::dispatcher::{Invocation, Outcome};
use crate::registry::{ProcedureBuilder, ServiceBuilder, ServiceDescriptor};
use crate::types::{TypeDescriptor, Value};

/// The name the introspection service registers under.
pub const SERVICE_NAME: &str = "Core";

/// Builds the `Core` service over a snapshot of the given descriptors.
///
/// `Core.GetStatus` returns the server name and version. `Core.GetServices`
/// returns a JSON manifest of every service, class, and procedure in
/// `services`, captured at build time. Pass the same descriptor list you
/// hand to the server so the manifest matches what is actually mounted.
pub fn core_service(services: &[ServiceDescriptor]) -> ServiceDescriptor {
    let status = format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    let manifest = serde_json::to_string(services)
        .unwrap_or_else(|e| panic!("could not serialize the service manifest: {}", e));

    ServiceBuilder::new(SERVICE_NAME)
        .procedure(
            ProcedureBuilder::new("GetStatus", move |_inv: &mut Invocation<'_>| {
                Ok(Outcome::Value(Value::String(status.clone())))
            })
            .returns(TypeDescriptor::String),
        )
        .procedure(
            ProcedureBuilder::new("GetServices", move |_inv: &mut Invocation<'_>| {
                Ok(Outcome::Value(Value::String(manifest.clone())))
            })
            .returns(TypeDescriptor::String),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ActivityContext, ClientId, HostContext};
    use crate::encoding::decode_value;
    use crate::rpc;
    use crate::server::Server;
    use serde_json::Value as Json;

    struct Host;

    impl HostContext for Host {
        fn activity(&self) -> ActivityContext {
            ActivityContext::Flight
        }

        fn universal_time(&self) -> f64 {
            0.0
        }
    }

    fn demo_service() -> ServiceDescriptor {
        ServiceBuilder::new("Demo")
            .procedure(
                ProcedureBuilder::new("Ping", |_inv: &mut Invocation<'_>| Ok(Outcome::Null)),
            )
            .build()
    }

    fn call(server: &mut Server, procedure: &str) -> String {
        server.submit(
            ClientId(1),
            rpc::Request {
                service: SERVICE_NAME.to_string(),
                procedure: procedure.to_string(),
                arguments: Vec::new(),
            },
        );
        let responses = server.tick(&Host);
        assert_eq!(responses[0].1.error, "");
        let value = decode_value(
            responses[0].1.return_value.as_ref().unwrap(),
            &TypeDescriptor::String,
            server.objects(),
        )
        .unwrap();
        value.as_str().unwrap().to_string()
    }

    #[test]
    fn it_reports_the_server_version() {
        let services = vec![demo_service()];
        let core = core_service(&services);
        let mut server = Server::new(vec![demo_service(), core]);

        let status = call(&mut server, "GetStatus");

        assert_eq!(
            status,
            format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
        );
    }

    #[test]
    fn it_lists_the_registered_services() {
        let services = vec![demo_service()];
        let core = core_service(&services);
        let mut server = Server::new(vec![demo_service(), core]);

        let manifest = call(&mut server, "GetServices");
        let parsed: Json = serde_json::from_str(&manifest).unwrap();

        assert_eq!(parsed[0]["service"], "Demo");
        assert_eq!(parsed[0]["procedures"][0]["name"], "Ping");
        assert_eq!(parsed[0]["procedures"][0]["returns"], "void");
        assert_eq!(parsed[0]["procedures"][0]["context"], "any");
    }
}
