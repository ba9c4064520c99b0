use crate::executor::coordinator::DisplayBounds;
use crate::llm::types::ToolDef;

/// The computer-use tool, sized to the display the actuator validates against so the
/// service proposes coordinates in the same space.
pub fn computer_use_tool(bounds: DisplayBounds, environment: &str) -> ToolDef {
    ToolDef::ComputerUsePreview {
        display_width: bounds.width,
        display_height: bounds.height,
        environment: environment.to_string(),
    }
}
