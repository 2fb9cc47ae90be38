pub mod error;
pub mod registry;
pub mod speech;
pub mod traits;

pub use error::{ToolError, ToolResult};
pub use registry::ToolRegistry;
pub use speech::{GenerateAudioTool, ListVoicesTool, PlayAudioTool};
pub use traits::Tool;
