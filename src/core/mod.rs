// Domain-layer modules and shared errors/models
pub mod classifier {
    pub use crate::classifier::*;
}

pub mod quote {
    pub use crate::quote::*;
}

pub mod suggestion {
    pub use crate::suggestion::*;
}

pub mod send_queue {
    pub use crate::send_queue::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
