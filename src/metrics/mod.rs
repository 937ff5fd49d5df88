//! CloudWatch metric retrieval and the consumers of its results.

mod handlers;
mod models;
mod plot;
mod summary;
mod units;
mod watcher;

pub use handlers::*;
pub use models::*;
pub use plot::*;
pub use summary::*;
pub use units::*;
pub use watcher::*;
