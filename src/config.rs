use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Kind};
use crate::phase::{Phase, PhaseSet};
use crate::target::{Target, TargetGroup};

/// One target entry inside a [`TargetGroupConfig`].
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct TargetConfig {
    connection_string: String,
    #[serde(default)]
    credential: Option<String>,
}

impl TargetConfig {
    pub fn to_target(&self) -> Target {
        Target::new(self.connection_string.clone(), self.credential.clone())
    }
}

/// One group of targets sharing parallelism limits, as read from TOML.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct TargetGroupConfig {
    #[serde(default)]
    name: Option<String>,
    targets: Vec<TargetConfig>,
    #[serde(default)]
    max_parallelism: usize,
    #[serde(default)]
    max_parallelism_per_target: usize,
}

impl TargetGroupConfig {
    pub fn to_target_group(&self) -> TargetGroup {
        TargetGroup::new(
            self.targets.iter().map(TargetConfig::to_target).collect(),
            self.name.clone(),
            self.max_parallelism,
            self.max_parallelism_per_target,
        )
    }
}

/// Deployment settings, loaded from TOML via [`Config::from_file_location`] or
/// built programmatically with [`Config::new`] and the `with_*` setters.
/// Mirrors the teacher's `config.rs` shape: a private `Main` table, consuming
/// builder setters, and `ConfigError` surfaced through the engine's own
/// [`Error`]/[`Kind`].
#[derive(Serialize, Deserialize, Debug)]
pub struct Config {
    main: Main,
}

#[derive(Serialize, Deserialize, Debug)]
struct Main {
    target_groups: Vec<TargetGroupConfig>,
    #[serde(default)]
    max_parallelism: usize,
    #[serde(default)]
    max_parallelism_per_target: usize,
    #[serde(default)]
    max_error_count: usize,
    #[serde(default = "default_enabled_phases")]
    enabled_phases: Vec<String>,
    #[serde(default)]
    allow_content_in_core_phase: bool,
    #[serde(default)]
    is_what_if_mode: bool,
}

fn default_enabled_phases() -> Vec<String> {
    vec!["pre".into(), "core".into(), "post".into()]
}

impl Config {
    pub fn new() -> Config {
        Config {
            main: Main {
                target_groups: Vec::new(),
                max_parallelism: 0,
                max_parallelism_per_target: 0,
                max_error_count: 0,
                enabled_phases: default_enabled_phases(),
                allow_content_in_core_phase: false,
                is_what_if_mode: false,
            },
        }
    }

    pub fn from_file_location<T: AsRef<Path>>(location: T) -> Result<Config, Error> {
        let file = std::fs::read_to_string(&location).map_err(|err| {
            Error::new(
                Kind::ConfigError(format!("could not open config file, {err}")),
                None,
            )
        })?;

        let config: Config = toml::from_str(&file).map_err(|err| {
            Error::new(
                Kind::ConfigError(format!("could not parse config file, {err}")),
                None,
            )
        })?;

        for phase in &config.main.enabled_phases {
            parse_phase(phase)?;
        }

        Ok(config)
    }

    pub fn target_groups(&self) -> Vec<TargetGroup> {
        self.main
            .target_groups
            .iter()
            .map(TargetGroupConfig::to_target_group)
            .collect()
    }

    pub fn max_parallelism(&self) -> usize {
        self.main.max_parallelism
    }

    pub fn max_parallelism_per_target(&self) -> usize {
        self.main.max_parallelism_per_target
    }

    pub fn max_error_count(&self) -> usize {
        self.main.max_error_count
    }

    pub fn allow_content_in_core_phase(&self) -> bool {
        self.main.allow_content_in_core_phase
    }

    pub fn is_what_if_mode(&self) -> bool {
        self.main.is_what_if_mode
    }

    pub fn enabled_phases(&self) -> Result<PhaseSet, Error> {
        let mut set = PhaseSet::empty();
        for name in &self.main.enabled_phases {
            set.insert(parse_phase(name)?);
        }
        Ok(set)
    }

    pub fn with_target_groups(self, target_groups: Vec<TargetGroupConfig>) -> Config {
        Config {
            main: Main {
                target_groups,
                ..self.main
            },
        }
    }

    pub fn with_max_parallelism(self, max_parallelism: usize) -> Config {
        Config {
            main: Main {
                max_parallelism,
                ..self.main
            },
        }
    }

    pub fn with_max_parallelism_per_target(self, max_parallelism_per_target: usize) -> Config {
        Config {
            main: Main {
                max_parallelism_per_target,
                ..self.main
            },
        }
    }

    pub fn with_max_error_count(self, max_error_count: usize) -> Config {
        Config {
            main: Main {
                max_error_count,
                ..self.main
            },
        }
    }

    pub fn with_enabled_phases(self, enabled_phases: Vec<String>) -> Config {
        Config {
            main: Main {
                enabled_phases,
                ..self.main
            },
        }
    }

    pub fn with_allow_content_in_core_phase(self, allow_content_in_core_phase: bool) -> Config {
        Config {
            main: Main {
                allow_content_in_core_phase,
                ..self.main
            },
        }
    }

    pub fn with_is_what_if_mode(self, is_what_if_mode: bool) -> Config {
        Config {
            main: Main {
                is_what_if_mode,
                ..self.main
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new()
    }
}

fn parse_phase(name: &str) -> Result<Phase, Error> {
    match name.to_ascii_lowercase().as_str() {
        "pre" => Ok(Phase::Pre),
        "core" => Ok(Phase::Core),
        "post" => Ok(Phase::Post),
        other => Err(Error::new(
            Kind::ConfigError(format!("unknown phase \"{other}\", expected pre, core, or post")),
            None,
        )),
    }
}
