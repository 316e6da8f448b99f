pub mod extractor;
pub mod ticket;
pub mod tokens;

pub use extractor::AuthUser;
pub use tokens::{TokenService, TokenSubject};
