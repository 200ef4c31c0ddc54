//! External service integrations.

pub mod relay_client {
    pub use crate::relay_client::*;
}

pub mod services {
    pub use crate::services::*;
}

pub mod webhook_models {
    pub use crate::webhook_models::*;
}
