//! Build hosts and function runtime platforms.
//!
//! The bundler picks its command sequence from the pair
//! `(HostOs, TargetPlatform)`. The host is detected once per run; the target
//! comes from `[bundle] target` in `stack.toml`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Operating system of the machine running the bundler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HostOs {
    Linux,
    MacOs,
}

impl HostOs {
    /// Detect the current host. Returns the raw OS name when it is not one
    /// the bundler knows how to drive.
    pub fn detect() -> Result<Self, String> {
        Self::from_os_name(std::env::consts::OS)
    }

    /// Map a `std::env::consts::OS` value onto a host.
    pub fn from_os_name(name: &str) -> Result<Self, String> {
        match name {
            "linux" => Ok(Self::Linux),
            "macos" => Ok(Self::MacOs),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for HostOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linux => write!(f, "linux"),
            Self::MacOs => write!(f, "macos"),
        }
    }
}

/// Execution platform of the deployed function.
///
/// Serialized as `linux-x86_64` / `linux-arm64` in `stack.toml`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum TargetPlatform {
    #[default]
    #[serde(rename = "linux-x86_64")]
    LinuxX86_64,
    #[serde(rename = "linux-arm64")]
    LinuxArm64,
}

impl TargetPlatform {
    /// Wheel platform tag accepted by `pip install --platform`.
    pub fn wheel_tag(&self) -> &'static str {
        match self {
            Self::LinuxX86_64 => "manylinux_2_28_x86_64",
            Self::LinuxArm64 => "manylinux_2_28_aarch64",
        }
    }

    /// Value for `docker run --platform`.
    pub fn container_platform(&self) -> &'static str {
        match self {
            Self::LinuxX86_64 => "linux/x86_64",
            Self::LinuxArm64 => "linux/arm64",
        }
    }

    /// Architecture name the function resource declares.
    pub fn architecture(&self) -> &'static str {
        match self {
            Self::LinuxX86_64 => "x86_64",
            Self::LinuxArm64 => "arm64",
        }
    }
}

impl fmt::Display for TargetPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LinuxX86_64 => write!(f, "linux-x86_64"),
            Self::LinuxArm64 => write!(f, "linux-arm64"),
        }
    }
}

impl FromStr for TargetPlatform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linux-x86_64" => Ok(Self::LinuxX86_64),
            "linux-arm64" => Ok(Self::LinuxArm64),
            other => Err(format!("unknown target platform '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_hosts_map() {
        assert_eq!(HostOs::from_os_name("linux"), Ok(HostOs::Linux));
        assert_eq!(HostOs::from_os_name("macos"), Ok(HostOs::MacOs));
    }

    #[test]
    fn unknown_host_keeps_raw_name() {
        assert_eq!(HostOs::from_os_name("windows"), Err("windows".to_string()));
    }

    #[test]
    fn target_tags() {
        assert_eq!(TargetPlatform::LinuxX86_64.wheel_tag(), "manylinux_2_28_x86_64");
        assert_eq!(TargetPlatform::LinuxArm64.container_platform(), "linux/arm64");
        assert_eq!(TargetPlatform::LinuxArm64.architecture(), "arm64");
    }

    #[test]
    fn target_parses_its_display_form() {
        for target in [TargetPlatform::LinuxX86_64, TargetPlatform::LinuxArm64] {
            assert_eq!(target.to_string().parse::<TargetPlatform>(), Ok(target));
        }
        assert!("darwin-arm64".parse::<TargetPlatform>().is_err());
    }

    #[test]
    fn target_deserializes_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            target: TargetPlatform,
        }
        let w: Wrapper = toml::from_str(r#"target = "linux-arm64""#).unwrap();
        assert_eq!(w.target, TargetPlatform::LinuxArm64);
    }
}
