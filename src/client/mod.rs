pub use self::body::Body;
pub use self::client::{Client, ClientBuilder};
pub use self::request::{Request, RequestBuilder};
pub use self::response::Response;

mod body;
#[allow(clippy::module_inception)]
mod client;
mod conn;
mod exec;
mod hijack;
pub(crate) mod request;
mod response;
mod wait;
