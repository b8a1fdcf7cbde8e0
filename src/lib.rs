pub mod config;
pub mod error;
pub mod extractor;
pub mod maintenance;
pub mod payments;
pub mod premium;
pub mod products;
pub mod profiles;
pub mod routes;
pub mod store;

pub use config::{StoreDriver, STORE_DRIVER};
pub use routes::{api_routes, app};
