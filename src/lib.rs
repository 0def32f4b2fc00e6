pub mod error;
pub mod settings;
pub mod model;
pub mod template;
pub mod sheets;
pub mod remote;
pub mod resolver;
pub mod builder;
pub mod lister;
pub mod expiry;
pub mod runner;

pub use error::{AppError, AppResult};
pub use runner::{sync, update_external_share_expiry};
