// Domain event plumbing: the in-process bus that CRM mutations publish to.

pub mod bus;

pub use atrium_shared::{EventEnvelope, EventType};
pub use bus::{EventBus, EventListener, SubscriptionId};
