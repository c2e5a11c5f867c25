use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::program::{Annotation, ClassDecl, MethodDecl, Program};

/// Declared nullness contract of a declaration.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) enum Contract {
    NonNull,
    Nullable,
    #[default]
    Unspecified,
}

impl Contract {
    /// Resolve the annotations attached to one declaration.
    ///
    /// A conflicting `@NonNull`/`@Nullable` pair carries no contract; it is reported by the
    /// structural annotation check instead.
    pub(crate) fn from_annotations(annotations: &[Annotation]) -> Self {
        let non_null = annotations.contains(&Annotation::NonNull);
        let nullable = annotations.contains(&Annotation::Nullable);
        match (non_null, nullable) {
            (true, false) => Contract::NonNull,
            (false, true) => Contract::Nullable,
            _ => Contract::Unspecified,
        }
    }

    pub(crate) fn is_conflicting(annotations: &[Annotation]) -> bool {
        annotations.contains(&Annotation::NonNull) && annotations.contains(&Annotation::Nullable)
    }
}

/// Contracts of a method signature.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct MethodContract {
    pub(crate) return_contract: Contract,
    pub(crate) parameters: Vec<Contract>,
}

impl MethodContract {
    pub(crate) fn of(method: &MethodDecl) -> Self {
        Self {
            return_contract: Contract::from_annotations(&method.return_annotations),
            parameters: method
                .params
                .iter()
                .map(|param| Contract::from_annotations(&param.annotations))
                .collect(),
        }
    }

    pub(crate) fn parameter(&self, index: usize) -> Contract {
        self.parameters.get(index).copied().unwrap_or_default()
    }
}

/// Lookup of declared contracts by identity across the analyzed program.
///
/// References to classes outside the program resolve to [`Contract::Unspecified`].
pub(crate) struct ContractIndex<'a> {
    classes: BTreeMap<&'a str, &'a ClassDecl>,
}

impl<'a> ContractIndex<'a> {
    pub(crate) fn new(program: &'a Program) -> Self {
        let classes = program
            .classes
            .iter()
            .map(|class| (class.name.as_str(), class))
            .collect();
        Self { classes }
    }

    pub(crate) fn class(&self, name: &str) -> Option<&'a ClassDecl> {
        self.classes.get(name).copied()
    }

    /// Contract of a field, searching the owner and its supertypes.
    pub(crate) fn field(&self, owner: &str, name: &str) -> Contract {
        self.lineage(owner)
            .into_iter()
            .find_map(|class| class.find_field(name))
            .map(|field| Contract::from_annotations(&field.annotations))
            .unwrap_or_default()
    }

    /// Contract of a method, searching the owner and its supertypes.
    pub(crate) fn method(&self, owner: &str, name: &str, descriptor: &str) -> MethodContract {
        self.lineage(owner)
            .into_iter()
            .find_map(|class| class.find_method(name, descriptor))
            .map(MethodContract::of)
            .unwrap_or_default()
    }

    /// The class itself followed by its known supertypes in breadth-first order.
    pub(crate) fn lineage(&self, name: &str) -> Vec<&'a ClassDecl> {
        let mut result = Vec::new();
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([name.to_string()]);
        while let Some(name) = queue.pop_front() {
            if !seen.insert(name.clone()) {
                continue;
            }
            let Some(class) = self.class(&name) else {
                continue;
            };
            result.push(class);
            if let Some(super_name) = &class.super_name {
                queue.push_back(super_name.clone());
            }
            for interface in &class.interfaces {
                queue.push_back(interface.clone());
            }
        }
        result
    }

    /// Supertypes only, excluding the class itself.
    pub(crate) fn supertypes(&self, class: &ClassDecl) -> Vec<&'a ClassDecl> {
        self.lineage(&class.name)
            .into_iter()
            .filter(|candidate| candidate.name != class.name)
            .collect()
    }
}
