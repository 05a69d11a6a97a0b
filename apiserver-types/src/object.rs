//! Generic resource envelope and the accessor trait the store programs against.
use crate::metadata::ObjectMeta;
use serde::{Deserialize, Serialize};

/// An accessor trait for anything the store can persist.
///
/// This mirrors the role `kube::Resource` plays for typed Kubernetes objects,
/// but the store never needs to know the wire kind/group/version -- only
/// that there is a [`ObjectMeta`] to read and write.
pub trait Resource {
    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn name(&self) -> &str {
        &self.meta().name
    }

    fn namespace(&self) -> Option<&str> {
        self.meta().namespace.as_deref()
    }
}

/// A standard resource with a typed `.spec` and an optional typed `.status`.
///
/// `U = ()` is the idiomatic choice for kinds without a status subresource.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceObject<P, U = ()>
where
    P: Clone,
    U: Clone,
{
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: P,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<U>,
}

impl<P: Clone, U: Clone> ResourceObject<P, U> {
    pub fn new(name: impl Into<String>, spec: P) -> Self {
        Self {
            metadata: ObjectMeta {
                name: name.into(),
                ..Default::default()
            },
            spec,
            status: None,
        }
    }
}

impl<P: Clone, U: Clone> Resource for ResourceObject<P, U> {
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
