pub mod execute_python_code;

use crate::domain::models::ToolBox;
use crate::infrastructure::kernels::KernelConnectivity;

pub struct ToolsManager {}

impl ToolsManager {
    /// Every tool the model may call, in the order they are advertised.
    pub fn get(connectivity: KernelConnectivity) -> Vec<ToolBox> {
        return vec![Box::new(execute_python_code::ExecutePythonCode::new(
            connectivity,
        ))];
    }
}
