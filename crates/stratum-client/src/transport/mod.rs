//! Concrete transports for the call core

mod http;
mod rpc;

pub use self::http::{HttpTransport, REQUEST_ID_HEADER, build_url};
pub use self::rpc::{INVOKE_PATH, Metadata, Payload, RpcTransport, http_status};
