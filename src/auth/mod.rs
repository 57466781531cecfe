pub mod client_ip;
pub mod credentials;
pub mod guard;
pub mod handler;
pub mod jwt;
pub mod middleware;

pub use credentials::*;
pub use guard::*;
pub use handler::*;
pub use jwt::*;
pub use middleware::*;
