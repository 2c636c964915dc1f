mod api_server;

pub use api_server::{build_router, ApiServer, AppState};
