mod ids;
mod payload;
mod request;
mod response;

pub use ids::{ChannelId, RequestId, RequestType};
pub use payload::Payload;
pub use request::Request;
pub use response::Response;
