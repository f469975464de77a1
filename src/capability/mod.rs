pub mod api;
pub mod catalog;
pub mod rule;
pub mod target;

pub use api::StorageApi;
pub use catalog::Catalog;
pub use rule::{NotApplicable, SecurityRule};
pub use target::{extensions_for, PathTemplate, StorageTarget};
