//! Wire-independent data model for the generic resource store: object
//! metadata, request options, the watch event type, the status/error
//! envelope, and selector compilation.
//!
//! Nothing in this crate knows about HTTP, a wire encoding, or a concrete
//! resource kind -- it is the shared vocabulary that `apiserver-storage` and
//! `apiserver-broadcast` build on.

pub mod error;
pub mod generate_name;
pub mod metadata;
pub mod object;
pub mod params;
pub mod response;
pub mod selector;
pub mod validation;
pub mod watch;

pub use error::{ApiError, Result};
pub use metadata::ObjectMeta;
pub use object::{Resource, ResourceObject};
pub use params::{
    CreateOptions, DeleteOptions, ListOptions, Preconditions, PropagationPolicy,
    ResourceVersionMatch, UpdateOptions, ValidationDirective,
};
pub use response::{Status, StatusCause, StatusDetails, StatusPhase};
pub use selector::Predicate;
pub use watch::Event;
