mod event_tests;
mod operator_tests;
mod utils;

pub mod test_prelude {
    pub use super::utils::*;
    pub use crate::{DatabaseError, RegistryDatabase};
    pub use alloy::primitives::{Address, B256};
    pub use dvt_types::*;
}
