//! Module for service registration and procedure lookup.
//!
//! Services hand the registry a bundle of procedure signatures at startup.
//! Registration is the only fallible setup step in the crate and every
//! failure there is a programming error, so invalid descriptors panic
//! instead of surfacing on the wire.
use crate::context::{ActivityContext, RequiredContext};
use crate::dispatcher::{Invocation, InvokeResult, Invoker};
use crate::encoding;
use crate::error::Error;
use crate::objects::ObjectStore;
use crate::types::{ClassId, TypeDescriptor, Value};
use log::info;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::borrow::Cow;
use std::collections::HashMap;
use std::rc::Rc;

/// The role a procedure plays, parsed from its name.
///
/// The grammar: `get_X`/`set_X` are service properties, `Class_Method` is an
/// instance method, `Class_get_X`/`Class_set_X` are instance properties, and
/// anything else is a plain procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcedureKind {
    /// A service-level procedure.
    Procedure,
    /// A service property getter.
    PropertyGet {
        /// The property name.
        property: String,
    },
    /// A service property setter.
    PropertySet {
        /// The property name.
        property: String,
    },
    /// An instance method; the first parameter is the receiver.
    ClassMethod {
        /// The class name.
        class: String,
        /// The method name.
        method: String,
    },
    /// An instance property getter; the first parameter is the receiver.
    ClassPropertyGet {
        /// The class name.
        class: String,
        /// The property name.
        property: String,
    },
    /// An instance property setter; the first parameter is the receiver.
    ClassPropertySet {
        /// The class name.
        class: String,
        /// The property name.
        property: String,
    },
}

impl ProcedureKind {
    /// Parses a procedure name against the naming grammar.
    pub fn parse(name: &str) -> ProcedureKind {
        if let Some(property) = name.strip_prefix("get_") {
            return ProcedureKind::PropertyGet {
                property: property.to_string(),
            };
        }
        if let Some(property) = name.strip_prefix("set_") {
            return ProcedureKind::PropertySet {
                property: property.to_string(),
            };
        }
        if let Some(index) = name.find("_get_") {
            return ProcedureKind::ClassPropertyGet {
                class: name[..index].to_string(),
                property: name[index + 5..].to_string(),
            };
        }
        if let Some(index) = name.find("_set_") {
            return ProcedureKind::ClassPropertySet {
                class: name[..index].to_string(),
                property: name[index + 5..].to_string(),
            };
        }
        if let Some(index) = name.find('_') {
            return ProcedureKind::ClassMethod {
                class: name[..index].to_string(),
                method: name[index + 1..].to_string(),
            };
        }
        ProcedureKind::Procedure
    }

    /// Returns whether calls of this kind carry a receiver at position 0.
    pub fn has_receiver(&self) -> bool {
        matches!(
            self,
            ProcedureKind::ClassMethod { .. }
                | ProcedureKind::ClassPropertyGet { .. }
                | ProcedureKind::ClassPropertySet { .. }
        )
    }

    fn class(&self) -> Option<&str> {
        match self {
            ProcedureKind::ClassMethod { class, .. }
            | ProcedureKind::ClassPropertyGet { class, .. }
            | ProcedureKind::ClassPropertySet { class, .. } => Some(class),
            _ => None,
        }
    }
}

/// One parameter of a procedure signature.
#[derive(Clone, Debug)]
pub struct Parameter {
    /// The parameter name, used in diagnostics.
    pub name: Cow<'static, str>,
    /// The declared type.
    pub type_descriptor: TypeDescriptor,
    /// The encoded default value, when the parameter is optional.
    pub default: Option<Vec<u8>>,
}

impl Serialize for Parameter {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(None)?;

        map.serialize_entry("name", &self.name)?;
        map.serialize_entry("type", &self.type_descriptor.to_string())?;
        map.serialize_entry("optional", &self.default.is_some())?;

        map.end()
    }
}

/// The registry's immutable description of one procedure.
#[derive(Clone)]
pub struct ProcedureSignature {
    /// The owning service, stamped when the descriptor is built.
    pub service: Cow<'static, str>,
    /// The procedure name, following the naming grammar.
    pub name: Cow<'static, str>,
    /// The parsed role of the procedure.
    pub kind: ProcedureKind,
    /// The parameters, dense from position 0.
    pub parameters: Vec<Parameter>,
    /// The declared return type.
    pub return_type: TypeDescriptor,
    /// The activity contexts the procedure may be called from.
    pub required_context: RequiredContext,
    /// The bound callable that executes the procedure.
    pub invoker: Invoker,
}

impl ProcedureSignature {
    /// Gets the globally unique `service.procedure` name.
    pub fn fully_qualified_name(&self) -> String {
        format!("{}.{}", self.service, self.name)
    }
}

impl std::fmt::Debug for ProcedureSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcedureSignature")
            .field("service", &self.service)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("parameters", &self.parameters)
            .field("return_type", &self.return_type)
            .field("required_context", &self.required_context)
            .finish()
    }
}

impl Serialize for ProcedureSignature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(None)?;

        map.serialize_entry("name", &self.name)?;
        map.serialize_entry("parameters", &self.parameters)?;
        map.serialize_entry("returns", &self.return_type.to_string())?;
        map.serialize_entry("context", &self.required_context.to_string())?;

        map.end()
    }
}

/// A service's complete registration payload: its name, the classes it owns,
/// and its procedures.
#[derive(Clone)]
pub struct ServiceDescriptor {
    /// The service name.
    pub name: Cow<'static, str>,
    /// The classes the service owns.
    pub classes: Vec<ClassId>,
    /// The procedures, properties, and class members the service exposes.
    pub procedures: Vec<ProcedureSignature>,
}

impl Serialize for ServiceDescriptor {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(None)?;

        map.serialize_entry("service", &self.name)?;
        map.serialize_entry(
            "classes",
            &self.classes.iter().map(ClassId::name).collect::<Vec<_>>(),
        )?;
        map.serialize_entry("procedures", &self.procedures)?;

        map.end()
    }
}

/// Builds one procedure signature: its parameters, return type, required
/// context, and invoker.
pub struct ProcedureBuilder {
    name: Cow<'static, str>,
    parameters: Vec<Parameter>,
    return_type: TypeDescriptor,
    required_context: RequiredContext,
    invoker: Invoker,
}

impl ProcedureBuilder {
    /// Creates a builder for a procedure with the given name and invoker.
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        invoker: impl Fn(&mut Invocation<'_>) -> InvokeResult + 'static,
    ) -> ProcedureBuilder {
        ProcedureBuilder {
            name: name.into(),
            parameters: Vec::new(),
            return_type: TypeDescriptor::Void,
            required_context: RequiredContext::Any,
            invoker: Rc::new(invoker),
        }
    }

    /// Appends a required parameter.
    pub fn parameter(
        mut self,
        name: impl Into<Cow<'static, str>>,
        type_descriptor: TypeDescriptor,
    ) -> ProcedureBuilder {
        self.parameters.push(Parameter {
            name: name.into(),
            type_descriptor,
            default: None,
        });
        self
    }

    /// Appends an optional parameter with a default value.
    ///
    /// The default is encoded once, here; a default that does not fit the
    /// declared type is a registration error and panics.
    pub fn optional(
        mut self,
        name: impl Into<Cow<'static, str>>,
        type_descriptor: TypeDescriptor,
        default: Value,
    ) -> ProcedureBuilder {
        let name = name.into();
        let encoded = encoding::encode_value(&default, &type_descriptor)
            .unwrap_or_else(|e| panic!("invalid default for parameter '{}': {}", name, e));
        self.parameters.push(Parameter {
            name,
            type_descriptor,
            default: Some(encoded),
        });
        self
    }

    /// Declares the return type; the default is void.
    pub fn returns(mut self, type_descriptor: TypeDescriptor) -> ProcedureBuilder {
        self.return_type = type_descriptor;
        self
    }

    /// Restricts the procedure to the given activity contexts.
    pub fn context(mut self, contexts: &'static [ActivityContext]) -> ProcedureBuilder {
        self.required_context = RequiredContext::In(Cow::Borrowed(contexts));
        self
    }
}

/// Builds a service descriptor.
///
/// The property and class helpers generate names following the naming
/// grammar and insert the implicit receiver parameter, so service code never
/// spells `get_`/`set_` prefixes by hand.
pub struct ServiceBuilder {
    name: Cow<'static, str>,
    classes: Vec<ClassId>,
    procedures: Vec<ProcedureBuilder>,
}

impl ServiceBuilder {
    /// Creates a builder for a service with the given name.
    pub fn new(name: impl Into<Cow<'static, str>>) -> ServiceBuilder {
        ServiceBuilder {
            name: name.into(),
            classes: Vec::new(),
            procedures: Vec::new(),
        }
    }

    /// Declares a class owned by this service.
    pub fn class(mut self, class: ClassId) -> ServiceBuilder {
        self.classes.push(class);
        self
    }

    /// Adds a procedure.
    pub fn procedure(mut self, procedure: ProcedureBuilder) -> ServiceBuilder {
        self.procedures.push(procedure);
        self
    }

    /// Adds a service property getter.
    pub fn getter(
        self,
        property: &str,
        type_descriptor: TypeDescriptor,
        invoker: impl Fn(&mut Invocation<'_>) -> InvokeResult + 'static,
    ) -> ServiceBuilder {
        self.procedure(
            ProcedureBuilder::new(format!("get_{}", property), invoker).returns(type_descriptor),
        )
    }

    /// Adds a service property setter.
    pub fn setter(
        self,
        property: &str,
        type_descriptor: TypeDescriptor,
        invoker: impl Fn(&mut Invocation<'_>) -> InvokeResult + 'static,
    ) -> ServiceBuilder {
        self.procedure(
            ProcedureBuilder::new(format!("set_{}", property), invoker)
                .parameter("value", type_descriptor),
        )
    }

    /// Adds an instance method of `class`; the receiver parameter is
    /// inserted at position 0.
    pub fn method(mut self, class: ClassId, method: &str, procedure: ProcedureBuilder) -> ServiceBuilder {
        let mut procedure = procedure;
        procedure.name = Cow::Owned(format!("{}_{}", class.name(), method));
        procedure.parameters.insert(
            0,
            Parameter {
                name: Cow::Borrowed("this"),
                type_descriptor: TypeDescriptor::Object(class),
                default: None,
            },
        );
        self.procedures.push(procedure);
        self
    }

    /// Adds an instance property getter of `class`.
    pub fn class_getter(
        self,
        class: ClassId,
        property: &str,
        type_descriptor: TypeDescriptor,
        invoker: impl Fn(&mut Invocation<'_>) -> InvokeResult + 'static,
    ) -> ServiceBuilder {
        self.class_accessor(class, format!("{}_get_{}", class.name(), property), invoker, |p| {
            p.returns(type_descriptor)
        })
    }

    /// Adds an instance property setter of `class`.
    pub fn class_setter(
        self,
        class: ClassId,
        property: &str,
        type_descriptor: TypeDescriptor,
        invoker: impl Fn(&mut Invocation<'_>) -> InvokeResult + 'static,
    ) -> ServiceBuilder {
        self.class_accessor(class, format!("{}_set_{}", class.name(), property), invoker, |p| {
            p.parameter("value", type_descriptor)
        })
    }

    fn class_accessor(
        mut self,
        class: ClassId,
        name: String,
        invoker: impl Fn(&mut Invocation<'_>) -> InvokeResult + 'static,
        configure: impl FnOnce(ProcedureBuilder) -> ProcedureBuilder,
    ) -> ServiceBuilder {
        let mut procedure = configure(ProcedureBuilder::new(name, invoker));
        procedure.parameters.insert(
            0,
            Parameter {
                name: Cow::Borrowed("this"),
                type_descriptor: TypeDescriptor::Object(class),
                default: None,
            },
        );
        self.procedures.push(procedure);
        self
    }

    /// Finishes the descriptor, stamping the service name and parsing each
    /// procedure name against the grammar.
    pub fn build(self) -> ServiceDescriptor {
        let name = self.name;
        let procedures = self
            .procedures
            .into_iter()
            .map(|p| ProcedureSignature {
                service: name.clone(),
                kind: ProcedureKind::parse(&p.name),
                name: p.name,
                parameters: p.parameters,
                return_type: p.return_type,
                required_context: p.required_context,
                invoker: p.invoker,
            })
            .collect();

        ServiceDescriptor {
            name,
            classes: self.classes,
            procedures,
        }
    }
}

/// The flat `(service, procedure) -> signature` lookup built at startup.
pub struct Registry {
    services: HashMap<String, ServiceEntry>,
}

struct ServiceEntry {
    procedures: HashMap<String, Rc<ProcedureSignature>>,
}

impl Registry {
    /// Ingests the given descriptors.
    ///
    /// Panics on any invalid registration: duplicate service or procedure
    /// names, a required parameter following an optional one, a class member
    /// naming an undeclared class, a malformed accessor signature, or an
    /// undecodable default.
    pub fn new(descriptors: Vec<ServiceDescriptor>) -> Registry {
        let mut services = HashMap::new();

        for descriptor in descriptors {
            let mut procedures = HashMap::new();
            for signature in descriptor.procedures {
                validate_signature(&descriptor.classes, &signature);
                let name = signature.name.clone().into_owned();
                if procedures.insert(name, Rc::new(signature)).is_some() {
                    panic!(
                        "duplicate procedure name present in service '{}'",
                        descriptor.name
                    );
                }
            }

            info!(
                "registered service '{}' with {} procedure(s)",
                descriptor.name,
                procedures.len()
            );

            if services
                .insert(
                    descriptor.name.clone().into_owned(),
                    ServiceEntry { procedures },
                )
                .is_some()
            {
                panic!("duplicate service name '{}' present", descriptor.name);
            }
        }

        Registry { services }
    }

    /// Resolves a `(service, procedure)` pair to its signature.
    pub fn lookup(&self, service: &str, procedure: &str) -> Result<Rc<ProcedureSignature>, Error> {
        let entry = self
            .services
            .get(service)
            .ok_or_else(|| Error::UnknownService(service.to_string()))?;
        entry
            .procedures
            .get(procedure)
            .cloned()
            .ok_or_else(|| Error::UnknownProcedure {
                service: service.to_string(),
                procedure: procedure.to_string(),
            })
    }
}

fn validate_signature(classes: &[ClassId], signature: &ProcedureSignature) {
    let fq = signature.fully_qualified_name();

    if let Some(class) = signature.kind.class() {
        if !classes.iter().any(|c| c.name() == class) {
            panic!("{} names undeclared class '{}'", fq, class);
        }
    }

    if signature.kind.has_receiver() {
        match signature.parameters.first() {
            Some(receiver) => match &receiver.type_descriptor {
                TypeDescriptor::Object(_) if receiver.default.is_none() => {}
                _ => panic!("{} must take a required object receiver at position 0", fq),
            },
            None => panic!("{} must take a required object receiver at position 0", fq),
        }
    }

    let (expected_arity, returns) = match &signature.kind {
        ProcedureKind::PropertyGet { .. } => (Some(0), true),
        ProcedureKind::PropertySet { .. } => (Some(1), false),
        ProcedureKind::ClassPropertyGet { .. } => (Some(1), true),
        ProcedureKind::ClassPropertySet { .. } => (Some(2), false),
        _ => (None, signature.return_type != TypeDescriptor::Void),
    };
    if let Some(arity) = expected_arity {
        if signature.parameters.len() != arity {
            panic!("{} must take exactly {} parameter(s)", fq, arity);
        }
        if returns && signature.return_type == TypeDescriptor::Void {
            panic!("{} must declare a return type", fq);
        }
        if !returns && signature.return_type != TypeDescriptor::Void {
            panic!("{} must not declare a return type", fq);
        }
    }

    let mut optional = false;
    for parameter in &signature.parameters {
        match &parameter.default {
            Some(default) => {
                optional = true;
                let empty = ObjectStore::new(false);
                if let Err(e) = encoding::decode_value(default, &parameter.type_descriptor, &empty)
                {
                    panic!(
                        "parameter '{}' of {} has an undecodable default: {}",
                        parameter.name, fq, e
                    );
                }
            }
            None => {
                if optional {
                    panic!(
                        "required parameter '{}' of {} follows an optional parameter",
                        parameter.name, fq
                    );
                }
            }
        }
    }
}
