pub mod extract;
pub mod sse;
pub mod tool_calls;
