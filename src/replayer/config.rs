use std::path::PathBuf;

/// How the device library is located and whether validation is requested.
#[derive(Clone, Debug, Default)]
pub struct DeviceConfig {
    /// Vulkan loader to open. `None` uses the platform's default loader.
    pub library: Option<PathBuf>,
    pub validate: bool,
}

/// Contains configuration options for a replay run
#[derive(Clone, Debug)]
pub struct ReplayConfig {
    pub device: DeviceConfig,
    pub workload: PathBuf,
    /// 0 selects the interactive loop driven by a presentation window.
    pub iterations: u32,
    pub dispatches_per_iteration: u32,
}

impl ReplayConfig {
    pub fn is_interactive(&self) -> bool {
        self.iterations == 0
    }
}
