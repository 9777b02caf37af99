pub mod error;
pub mod requests;
pub mod responses;


pub use error::{ErrorCode, GatewayError, Result};
pub use requests::{RequestId, ToolArgs, ToolCallRequest, ToolName};
pub use responses::{BackendReply, ErrorBody, ResponseEnvelope, ToolCallResult, ToolOutcome};
