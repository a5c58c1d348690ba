//! Module for materializing a request's argument list.
//!
//! Arguments arrive positional, sparse, and in any order. The binder fills
//! every parameter slot from the request or the parameter's registered
//! default, decodes each one against the declared type, and rejects the
//! request if a slot stays empty. Binding never suspends.
use crate::context::ClientId;
use crate::encoding;
use crate::error::Error;
use crate::objects::ObjectStore;
use crate::registry::ProcedureSignature;
use crate::rpc;
use crate::types::Value;

pub(crate) fn bind(
    signature: &ProcedureSignature,
    arguments: &[rpc::Argument],
    store: &mut ObjectStore,
    client: ClientId,
) -> Result<Vec<Value>, Error> {
    let arity = signature.parameters.len();
    let mut provided: Vec<Option<&[u8]>> = vec![None; arity];

    for argument in arguments {
        let position = argument.position as usize;
        if position >= arity {
            return Err(Error::InvalidArgument(format!(
                "argument position {} is out of range for {}, which takes {} parameter(s)",
                position,
                signature.fully_qualified_name(),
                arity
            )));
        }
        if provided[position].is_some() {
            return Err(Error::InvalidArgument(format!(
                "duplicate argument at position {}",
                position
            )));
        }
        provided[position] = Some(&argument.value);
    }

    let mut args = Vec::with_capacity(arity);
    for (position, parameter) in signature.parameters.iter().enumerate() {
        let bytes = match provided[position] {
            Some(bytes) => bytes,
            None => match &parameter.default {
                Some(default) => default.as_slice(),
                None => {
                    return Err(Error::MissingArgument(format!(
                        "parameter '{}' of {} (position {})",
                        parameter.name,
                        signature.fully_qualified_name(),
                        position
                    )));
                }
            },
        };
        let value = encoding::decode_value(bytes, &parameter.type_descriptor, store)?;
        mark_owners(&value, store, client);
        args.push(value);
    }

    if signature.kind.has_receiver() && args[0].is_null() {
        return Err(Error::NullReference(format!(
            "{} requires a live instance",
            signature.fully_qualified_name()
        )));
    }

    Ok(args)
}

// Every handle a client passes in counts as seen by that client, including
// handles nested inside collections.
fn mark_owners(value: &Value, store: &mut ObjectStore, client: ClientId) {
    match value {
        Value::Object(Some(r)) => store.mark_owner(r.handle, client),
        Value::List(items) | Value::Set(items) | Value::Tuple(items) => {
            for item in items {
                mark_owners(item, store, client);
            }
        }
        Value::Dictionary(entries) => {
            for (key, entry) in entries {
                mark_owners(key, store, client);
                mark_owners(entry, store, client);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{Invocation, InvokeResult, Outcome};
    use crate::registry::{ProcedureBuilder, ServiceBuilder};
    use crate::types::TypeDescriptor;
    use matches::assert_matches;

    fn noop() -> impl Fn(&mut Invocation<'_>) -> InvokeResult + 'static {
        |_inv: &mut Invocation<'_>| Ok(Outcome::Null)
    }

    fn defaulted_signature() -> ProcedureSignature {
        ServiceBuilder::new("Test")
            .procedure(
                ProcedureBuilder::new("F", noop())
                    .optional("a", TypeDescriptor::Float, Value::Float(1.0))
                    .optional("b", TypeDescriptor::String, Value::String("x".to_string()))
                    .optional("c", TypeDescriptor::Int32, Value::Int32(0)),
            )
            .build()
            .procedures
            .remove(0)
    }

    fn argument(position: u32, value: &Value, ty: &TypeDescriptor) -> rpc::Argument {
        rpc::Argument {
            position,
            value: encoding::encode_value(value, ty).unwrap(),
        }
    }

    #[test]
    fn it_fills_omitted_parameters_from_defaults_in_any_order() {
        let signature = defaulted_signature();
        let mut store = ObjectStore::new(false);
        let arguments = vec![
            argument(2, &Value::Int32(42), &TypeDescriptor::Int32),
            argument(0, &Value::Float(3.14159), &TypeDescriptor::Float),
        ];

        let args = bind(&signature, &arguments, &mut store, ClientId(1)).unwrap();

        assert_eq!(
            args,
            vec![
                Value::Float(3.14159),
                Value::String("x".to_string()),
                Value::Int32(42)
            ]
        );
    }

    #[test]
    fn it_reports_missing_required_arguments() {
        let signature = ServiceBuilder::new("Test")
            .procedure(ProcedureBuilder::new("F", noop()).parameter("a", TypeDescriptor::Int32))
            .build()
            .procedures
            .remove(0);
        let mut store = ObjectStore::new(false);

        assert_matches!(
            bind(&signature, &[], &mut store, ClientId(1)),
            Err(Error::MissingArgument(_))
        );
    }

    #[test]
    fn it_rejects_out_of_range_positions() {
        let signature = defaulted_signature();
        let mut store = ObjectStore::new(false);
        let arguments = vec![argument(3, &Value::Int32(1), &TypeDescriptor::Int32)];

        assert_matches!(
            bind(&signature, &arguments, &mut store, ClientId(1)),
            Err(Error::InvalidArgument(_))
        );
    }

    #[test]
    fn it_rejects_duplicate_positions() {
        let signature = defaulted_signature();
        let mut store = ObjectStore::new(false);
        let arguments = vec![
            argument(0, &Value::Float(1.0), &TypeDescriptor::Float),
            argument(0, &Value::Float(2.0), &TypeDescriptor::Float),
        ];

        assert_matches!(
            bind(&signature, &arguments, &mut store, ClientId(1)),
            Err(Error::InvalidArgument(_))
        );
    }

    #[test]
    fn it_rejects_a_null_receiver() {
        struct Counter;
        let class = crate::types::ClassId::of::<Counter>("Counter");
        let signature = ServiceBuilder::new("Test")
            .class(class)
            .method(class, "Increment", ProcedureBuilder::new("", noop()))
            .build()
            .procedures
            .remove(0);
        let mut store = ObjectStore::new(false);
        let arguments = vec![argument(0, &Value::null(), &TypeDescriptor::Object(class))];

        assert_matches!(
            bind(&signature, &arguments, &mut store, ClientId(1)),
            Err(Error::NullReference(_))
        );
    }

    #[test]
    fn it_marks_resolved_handles_as_seen_by_the_client() {
        struct Counter;
        let class = crate::types::ClassId::of::<Counter>("Counter");
        let mut store = ObjectStore::new(true);
        let handle = store.add(std::rc::Rc::new(Counter) as std::rc::Rc<dyn std::any::Any>);

        let signature = ServiceBuilder::new("Test")
            .class(class)
            .method(class, "Increment", ProcedureBuilder::new("", noop()))
            .build()
            .procedures
            .remove(0);
        let arguments = vec![rpc::Argument {
            position: 0,
            value: vec![handle as u8],
        }];

        bind(&signature, &arguments, &mut store, ClientId(7)).unwrap();
        store.reset_client(ClientId(7));

        assert_matches!(store.get(handle), Err(Error::UnknownHandle(_)));
    }
}
