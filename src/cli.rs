use crate::config::ViewerConfigOverrides;
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliOverrides {
    width: Option<u32>,
    height: Option<u32>,
    vsync: Option<bool>,
    model: Option<PathBuf>,
    environment: Option<PathBuf>,
}

impl CliOverrides {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut overrides = CliOverrides::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // program name
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            let Some(key) = flag.strip_prefix("--") else {
                bail!("Unexpected argument '{flag}'. Flags take the form --name <value>.");
            };
            let value =
                iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            match key {
                "width" => {
                    overrides.width = Some(parse_dimension("width", &value)?);
                }
                "height" => {
                    overrides.height = Some(parse_dimension("height", &value)?);
                }
                "vsync" => {
                    overrides.vsync = Some(parse_bool_flag("vsync", &value)?);
                }
                "model" => {
                    overrides.model = Some(parse_path_flag("model", &value)?);
                }
                "environment" => {
                    overrides.environment = Some(parse_path_flag("environment", &value)?);
                }
                _ => bail!(
                    "Unknown flag '{flag}'. Supported flags: --width, --height, --vsync, --model, --environment."
                ),
            }
        }
        Ok(overrides)
    }

    pub fn into_config_overrides(self) -> ViewerConfigOverrides {
        ViewerConfigOverrides {
            width: self.width,
            height: self.height,
            vsync: self.vsync,
            model: self.model,
            environment: self.environment,
        }
    }
}

fn parse_dimension(flag: &str, value: &str) -> Result<u32> {
    let parsed = value.parse::<u32>().with_context(|| format!("Invalid {flag} '{value}'"))?;
    if parsed == 0 {
        bail!("Invalid {flag} '{value}'. Window dimensions must be positive.");
    }
    Ok(parsed)
}

fn parse_bool_flag(flag: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => bail!("Invalid {flag} value '{other}'. Use on/off or true/false."),
    }
}

fn parse_path_flag(flag: &str, value: &str) -> Result<PathBuf> {
    if value.trim().is_empty() || value.starts_with("--") {
        bail!("Expected a file path after '--{flag}', got '{value}'");
    }
    Ok(PathBuf::from(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_window_flags() {
        let args = ["rig_viewer", "--width", "1600", "--height", "900", "--vsync", "off"];
        let overrides = CliOverrides::parse(args).expect("parse overrides").into_config_overrides();
        assert_eq!((overrides.width, overrides.height, overrides.vsync), (Some(1600), Some(900), Some(false)));
        assert!(overrides.model.is_none());
    }

    #[test]
    fn parses_asset_paths() {
        let args = ["rig_viewer", "--model", "robots/bot.gltf", "--environment", "sky.hdr"];
        let overrides = CliOverrides::parse(args).expect("parse overrides").into_config_overrides();
        assert_eq!(overrides.model, Some(PathBuf::from("robots/bot.gltf")));
        assert_eq!(overrides.environment, Some(PathBuf::from("sky.hdr")));
    }

    #[test]
    fn latest_flag_wins() {
        let args = ["rig_viewer", "--width", "800", "--width", "1920", "--vsync", "on", "--vsync", "off"];
        let overrides = CliOverrides::parse(args).expect("parse overrides");
        assert_eq!(overrides.width, Some(1920));
        assert_eq!(overrides.vsync, Some(false));
    }

    #[test]
    fn missing_value_errors() {
        let err = CliOverrides::parse(["rig_viewer", "--width"]).unwrap_err();
        assert!(err.to_string().contains("Expected a value"), "error should mention missing value");
    }

    #[test]
    fn rejects_unknown_flags_and_bare_arguments() {
        let err = CliOverrides::parse(["rig_viewer", "--foo", "bar"]).unwrap_err();
        assert!(err.to_string().contains("Unknown flag"));
        let err = CliOverrides::parse(["rig_viewer", "scene.gltf"]).unwrap_err();
        assert!(err.to_string().contains("Unexpected argument"));
    }

    #[test]
    fn rejects_zero_width_and_flag_as_path() {
        assert!(CliOverrides::parse(["rig_viewer", "--width", "0"]).is_err());
        assert!(CliOverrides::parse(["rig_viewer", "--model", "--vsync"]).is_err());
    }
}
