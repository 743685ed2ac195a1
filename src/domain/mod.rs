// Domain layer: data model and ports. Depends only on serde/chrono and the crate error type.

pub mod model;
pub mod ports;
