pub mod cli;
mod interactive;

use color_eyre::Result;
use crate::app::interactive::InteractiveApp;
use crate::replayer::config::ReplayConfig;
use crate::replayer::profiler::RunSummary;
use crate::replayer::vk::VulkanDevice;
use crate::replayer::workload::Workload;
use crate::replayer::Replayer;

/// Loads the workload and replays it in the mode the config selects.
pub fn run(config: &ReplayConfig) -> Result<RunSummary> {
    let workload = Workload::load(&config.workload)?;

    if config.is_interactive() {
        log::info!("Replaying {:?} until the window is closed", config.workload);
        InteractiveApp::new(config, &workload).run()
    } else {
        log::info!(
            "Replaying {:?}: {} iterations of {} dispatches",
            config.workload,
            config.iterations,
            config.dispatches_per_iteration,
        );
        run_batch(config, &workload)
    }
}

fn run_batch(config: &ReplayConfig, workload: &Workload) -> Result<RunSummary> {
    let device = VulkanDevice::new(&config.device, None)?;
    let mut replayer = Replayer::load(device, workload)?;

    for i in 0..config.iterations {
        replayer.execute_iteration(config.dispatches_per_iteration)?;
        log::debug!("Submitted iteration {} of {}", i + 1, config.iterations);
    }

    replayer.finish()
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use naga::front::glsl::{Frontend, Options};
    use naga::valid::{Capabilities, ValidationFlags, Validator};
    use naga::ShaderStage;
    use crate::replayer::device::mock::MockDevice;
    use super::*;

    fn manifest_path(relative: &str) -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join(relative)
    }

    #[test]
    fn demo_kernel_passes_validation() {
        let source = fs::read_to_string(manifest_path("kernels/fill.comp")).unwrap();
        let module = Frontend::default()
            .parse(&Options::from(ShaderStage::Compute), &source)
            .unwrap();
        Validator::new(ValidationFlags::all(), Capabilities::all())
            .validate(&module)
            .unwrap();
    }

    #[test]
    fn demo_workload_loads_and_uploads_its_values() {
        let workload = Workload::load(&manifest_path("demos/fill/workload.json")).unwrap();
        assert_eq!(workload.layout.parameters.len(), workload.document.root_parameters.len());

        let mut replayer = Replayer::load(MockDevice::new(), &workload).unwrap();
        replayer.execute_iteration(1).unwrap();

        let values = replayer.resources().find("values").unwrap();
        let expected = (0..64u32).flat_map(u32::to_le_bytes).collect::<Vec<_>>();
        assert_eq!(*values.allocation.bytes.borrow(), expected);
    }
}
