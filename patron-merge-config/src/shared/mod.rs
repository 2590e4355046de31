mod auth;
mod base;
mod connection;
mod job;
mod table;

pub use auth::*;
pub use base::*;
pub use connection::*;
pub use job::*;
pub use table::*;
