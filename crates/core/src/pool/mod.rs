//! Reusable automation sessions

pub mod lease;
pub mod ports;
pub mod service;

pub use lease::PooledSession;
pub use ports::{AutomationSession, SessionFactory};
pub use service::{PooledResource, ResourceId, ResourcePool, ResourceState};
