// Wire surface shared by the server and client halves.

pub mod codec;
pub mod compress;
pub mod error;
pub mod fixed;
pub mod ident;
pub mod message;
pub mod schema;
