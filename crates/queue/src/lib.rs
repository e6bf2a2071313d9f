//! Redis-backed delivery queue for fedigate.
//!
//! [`RedisDeliveryQueue`] persists the [`DeliveryJob`]s produced by the
//! federation layer's `DeliveryComposer` into an apalis Redis storage.
//! Workers consuming that storage sign and send each job.

pub mod delivery;

pub use delivery::{DELIVER_NAMESPACE, RedisDeliveryQueue};
pub use fedigate_federation::DeliveryJob;
