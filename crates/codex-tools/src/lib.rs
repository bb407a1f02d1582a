pub mod registry;
pub mod sandbox;
pub mod sub_agent;

pub use registry::{ToolRegistry, DEFAULT_TOOL_TIMEOUT_SECS};
pub use sandbox::TempDirSandbox;
pub use sub_agent::{SubAgentClient, TRIGGER_AGENT_TOOL};
