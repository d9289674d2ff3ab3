//! HTTP request/response types and the byte-level parser (§3, §4).
pub mod method;
pub mod multipart;
pub mod parser;
pub mod request;
pub mod response;

pub use method::Method;
pub use request::{BodyStream, FilePart, Request};
pub use response::{Cookie, Response, SameSite};
