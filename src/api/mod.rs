pub mod handlers;
pub mod requests;
pub mod responses;
pub mod routes;

pub use responses::{ApiResponse, ApiResult};
pub use routes::{create_router, AppState};
