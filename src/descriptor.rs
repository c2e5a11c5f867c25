use std::str::FromStr;

use jdescriptor::{MethodDescriptor, TypeDescriptor};

use crate::error::AnalysisError;

/// Coarse classification of a JVM type, which is all the nullness analysis needs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum TypeKind {
    Void,
    Primitive,
    Reference,
}

impl TypeKind {
    pub(crate) fn is_reference(self) -> bool {
        self == TypeKind::Reference
    }
}

/// Parameter and return classification of a method descriptor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MethodShape {
    pub(crate) parameters: Vec<TypeKind>,
    pub(crate) return_kind: TypeKind,
}

/// Classify the parameters and return type of a JVM method descriptor.
pub(crate) fn method_shape(descriptor: &str) -> Result<MethodShape, AnalysisError> {
    let parsed = parse_method(descriptor)?;
    Ok(MethodShape {
        parameters: parsed.parameter_types().iter().map(type_kind).collect(),
        return_kind: type_kind(&parsed.return_type()),
    })
}

/// Classify a field or local variable descriptor such as `I` or `Ljava/lang/String;`.
pub(crate) fn value_type_kind(descriptor: &str) -> Result<TypeKind, AnalysisError> {
    // jdescriptor only exposes a method-level parser; wrap the value type as a lone parameter.
    let parsed = MethodDescriptor::from_str(&format!("({descriptor})V")).map_err(|_| {
        AnalysisError::InvalidDescriptor {
            descriptor: descriptor.to_string(),
        }
    })?;
    let parameters: &[TypeDescriptor] = parsed.parameter_types();
    match parameters {
        [single] => Ok(type_kind(single)),
        _ => Err(AnalysisError::InvalidDescriptor {
            descriptor: descriptor.to_string(),
        }),
    }
}

fn parse_method(descriptor: &str) -> Result<MethodDescriptor, AnalysisError> {
    MethodDescriptor::from_str(descriptor).map_err(|_| AnalysisError::InvalidDescriptor {
        descriptor: descriptor.to_string(),
    })
}

fn type_kind(descriptor: &TypeDescriptor) -> TypeKind {
    match descriptor {
        TypeDescriptor::Void => TypeKind::Void,
        TypeDescriptor::Object(_) | TypeDescriptor::Array(_, _) => TypeKind::Reference,
        _ => TypeKind::Primitive,
    }
}
