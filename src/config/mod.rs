pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{load_api_definition, load_reactor_config};
pub use models::*;
pub use validation::{
    ApiDefinitionValidator, ReactorConfigValidator, ValidationError, ValidationResult,
};
