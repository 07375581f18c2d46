//! Application layer: connection registry and the relay router.

pub mod registry;
pub mod router;
