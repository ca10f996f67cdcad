// Domain-layer modules and shared errors/models
pub mod aggregation {
    pub use crate::aggregation::*;
}

pub mod billing {
    pub use crate::billing::*;
}

pub mod invoices {
    pub use crate::invoices::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
