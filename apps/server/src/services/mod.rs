//! Service layer - search orchestration and result assembly

pub mod assembler;
pub mod search;

pub use assembler::{Link, ResultDocument};
pub use search::{Scope, SearchOutcome, SearchService, Strategy};
