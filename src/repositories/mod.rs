pub mod error;
pub mod in_memory_repository;
pub mod json_state_repository;
pub mod state_repository;

pub use error::{RepositoryError, RepositoryResult};
pub use in_memory_repository::InMemoryStateRepository;
pub use json_state_repository::JsonStateRepository;
pub use state_repository::{StateRepository, StoreSnapshot, StoreState};
