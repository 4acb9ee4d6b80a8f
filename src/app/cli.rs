use std::path::PathBuf;
use clap::Parser;
use crate::replayer::config::{DeviceConfig, ReplayConfig};

/// Replays a declarative compute workload and reports per-dispatch GPU time.
#[derive(Parser, Debug)]
#[command(name = "dispatch-replay")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Vulkan loader library to open instead of the platform default
    #[arg(long, value_name = "PATH")]
    pub library: Option<PathBuf>,

    /// Workload description file
    #[arg(long, visible_alias = "json", value_name = "PATH")]
    pub workload: PathBuf,

    /// Enable the Vulkan validation layer when it is installed
    #[arg(long)]
    pub validate: bool,

    /// Number of submissions; 0 opens a window and replays until it is closed
    #[arg(long, default_value_t = 0)]
    pub iterations: u32,

    /// Dispatches recorded into each submission
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub dispatches: u32,
}

impl Cli {
    pub fn into_config(self) -> ReplayConfig {
        ReplayConfig {
            device: DeviceConfig {
                library: self.library,
                validate: self.validate,
            },
            workload: self.workload,
            iterations: self.iterations,
            dispatches_per_iteration: self.dispatches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_select_the_interactive_loop() {
        let config = Cli::try_parse_from(["dispatch-replay", "--workload", "w.json"])
            .unwrap()
            .into_config();
        assert!(config.is_interactive());
        assert_eq!(config.dispatches_per_iteration, 1);
        assert_eq!(config.device.library, None);
        assert!(!config.device.validate);
    }

    #[test]
    fn json_is_an_alias_for_workload() {
        let cli = Cli::try_parse_from(["dispatch-replay", "--json", "w.json", "--iterations", "10"]).unwrap();
        assert_eq!(cli.workload, PathBuf::from("w.json"));
        assert_eq!(cli.iterations, 10);
    }

    #[test]
    fn batch_flags_map_onto_the_config() {
        let config = Cli::try_parse_from([
            "dispatch-replay",
            "--library", "/opt/vk/libvulkan.so.1",
            "--workload", "w.json",
            "--validate",
            "--iterations", "100",
            "--dispatches", "4",
        ])
        .unwrap()
        .into_config();
        assert!(!config.is_interactive());
        assert_eq!(config.iterations, 100);
        assert_eq!(config.dispatches_per_iteration, 4);
        assert_eq!(config.device.library, Some(PathBuf::from("/opt/vk/libvulkan.so.1")));
        assert!(config.device.validate);
    }

    #[test]
    fn zero_dispatches_are_rejected() {
        assert!(Cli::try_parse_from(["dispatch-replay", "--workload", "w.json", "--dispatches", "0"]).is_err());
    }

    #[test]
    fn workload_is_required() {
        assert!(Cli::try_parse_from(["dispatch-replay", "--iterations", "1"]).is_err());
    }
}
