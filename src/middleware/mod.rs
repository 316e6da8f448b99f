pub mod logging;
pub mod rate_limit;

pub use logging::request_id_middleware;
pub use rate_limit::ip_rate_limit_middleware;
