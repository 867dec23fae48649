pub mod error;
pub mod host;
pub mod outcomes;
pub mod publisher;
pub mod registry;
pub mod resolver;
pub mod run_state;
pub mod types;

pub use error::{ConfigError, CoreError, ErrorKind};
pub use host::HostSession;
pub use outcomes::OutcomeTable;
pub use publisher::{Snapshot, StatePublisher, Subscription, SubscriptionId};
pub use registry::CaseRegistry;
pub use resolver::DependencyResolver;
pub use run_state::RunStateEngine;
