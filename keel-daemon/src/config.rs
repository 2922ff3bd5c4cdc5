//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Startup configuration.
//!
//! The configuration is an XML file whose elements set named options under
//! a single `<keel-config>` root. Unknown options are rejected at load time.

use std::path::PathBuf;

use keel_nacm::NacmMode;
use keel_yang::xml;

#[derive(Debug)]
pub struct Config {
    // Directories scanned for *.yang modules, in order.
    pub yang_dirs: Vec<PathBuf>,
    // Single module file loaded in addition to the directories.
    pub yang_main_file: Option<PathBuf>,
    // Enabled features, as "module:feature".
    pub features: Vec<(String, String)>,
    pub xmldb_dir: PathBuf,
    pub xmldb_cache: bool,
    pub sock_path: PathBuf,
    pub startup_mode: StartupMode,
    pub nacm_mode: NacmMode,
    pub nacm_file: Option<PathBuf>,
    pub nacm_recovery_user: Option<String>,
    // Retention of the notification replay buffer, in seconds.
    pub replay_window: u64,
    pub logging: Logging,
}

/// How `running` is initialized at boot.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum StartupMode {
    // Empty running configuration.
    None,
    // Keep the on-disk running datastore.
    #[default]
    Running,
    // Copy the startup datastore over running.
    Startup,
}

#[derive(Debug, Default)]
pub struct Logging {
    pub stdout: LoggingStdout,
    pub file: LoggingFile,
}

#[derive(Debug)]
pub struct LoggingStdout {
    pub enabled: bool,
    pub style: LoggingFmtStyle,
    pub colors: bool,
}

#[derive(Debug)]
pub struct LoggingFile {
    pub enabled: bool,
    pub dir: String,
    pub name: String,
}

#[derive(Debug, Default)]
pub enum LoggingFmtStyle {
    Compact,
    #[default]
    Full,
    Json,
    Pretty,
}

// ===== impl Config =====

impl Config {
    const DFLT_FILEPATH: &'static str = "/etc/keeld.xml";

    pub fn load(config_file: Option<&str>) -> Config {
        let config_file = config_file.unwrap_or(Config::DFLT_FILEPATH);

        match std::fs::read_to_string(config_file) {
            Ok(config_str) => Config::parse(&config_str)
                .expect("Failed to parse configuration file"),
            Err(err) => {
                eprintln!("Failed to load configuration file: {err}");
                eprintln!("Falling back to default configuration...");
                Config::default()
            }
        }
    }

    /// Parses the XML option file. Every element maps to one named option;
    /// anything else is an error.
    pub fn parse(text: &str) -> Result<Config, String> {
        let tree = xml::read(text).map_err(|err| err.to_string())?;
        let root = tree.children(tree.root())[0];
        if tree.node(root).name != "keel-config" {
            return Err(format!(
                "expected <keel-config> root element, found <{}>",
                tree.node(root).name
            ));
        }

        let mut config = Config::default();
        for child in tree.children(root) {
            let node = tree.node(*child);
            let value = node.value.as_deref().unwrap_or_default();
            match node.name.as_str() {
                "yang-dir" => config.yang_dirs.push(PathBuf::from(value)),
                "yang-main-file" => {
                    config.yang_main_file = Some(PathBuf::from(value));
                }
                "feature" => match value.split_once(':') {
                    Some((module, feature)) => config
                        .features
                        .push((module.to_owned(), feature.to_owned())),
                    None => {
                        return Err(format!(
                            "option feature must be \"module:feature\", \
                             found \"{}\"",
                            value
                        ));
                    }
                },
                "xmldb-dir" => config.xmldb_dir = PathBuf::from(value),
                "xmldb-cache" => config.xmldb_cache = value == "true",
                "sock" => config.sock_path = PathBuf::from(value),
                "startup-mode" => {
                    config.startup_mode = match value {
                        "none" => StartupMode::None,
                        "running" => StartupMode::Running,
                        "startup" => StartupMode::Startup,
                        _ => {
                            return Err(format!(
                                "unknown startup-mode \"{}\"",
                                value
                            ));
                        }
                    };
                }
                "nacm-mode" => {
                    config.nacm_mode = NacmMode::from_str(value).ok_or_else(
                        || format!("unknown nacm-mode \"{}\"", value),
                    )?;
                }
                "nacm-file" => config.nacm_file = Some(PathBuf::from(value)),
                "nacm-recovery-user" => {
                    config.nacm_recovery_user = Some(value.to_owned());
                }
                "replay-window" => {
                    config.replay_window = value
                        .parse()
                        .map_err(|_| "invalid replay-window".to_owned())?;
                }
                "log-stdout" => config.logging.stdout.enabled = value == "true",
                "log-style" => {
                    config.logging.stdout.style = match value {
                        "compact" => LoggingFmtStyle::Compact,
                        "full" => LoggingFmtStyle::Full,
                        "json" => LoggingFmtStyle::Json,
                        "pretty" => LoggingFmtStyle::Pretty,
                        _ => {
                            return Err(format!(
                                "unknown log-style \"{}\"",
                                value
                            ));
                        }
                    };
                }
                "log-colors" => config.logging.stdout.colors = value == "true",
                "log-file" => {
                    config.logging.file.enabled = true;
                    config.logging.file.name = value.to_owned();
                }
                "log-dir" => config.logging.file.dir = value.to_owned(),
                name => {
                    return Err(format!("unknown option \"{}\"", name));
                }
            }
        }
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            yang_dirs: vec![],
            yang_main_file: None,
            features: vec![],
            xmldb_dir: PathBuf::from("/var/lib/keel"),
            xmldb_cache: true,
            sock_path: PathBuf::from("/var/run/keel.sock"),
            startup_mode: StartupMode::default(),
            nacm_mode: NacmMode::Internal,
            nacm_file: None,
            nacm_recovery_user: None,
            replay_window: 600,
            logging: Logging::default(),
        }
    }
}

// ===== impl LoggingStdout =====

impl Default for LoggingStdout {
    fn default() -> LoggingStdout {
        LoggingStdout {
            enabled: true,
            style: LoggingFmtStyle::default(),
            colors: false,
        }
    }
}

// ===== impl LoggingFile =====

impl Default for LoggingFile {
    fn default() -> LoggingFile {
        LoggingFile {
            enabled: false,
            dir: "/var/log".to_owned(),
            name: "keeld.log".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_parsed() {
        let config = Config::parse(
            r#"<keel-config>
                 <yang-dir>/usr/share/yang</yang-dir>
                 <yang-dir>/etc/keel/yang</yang-dir>
                 <xmldb-dir>/tmp/keel-db</xmldb-dir>
                 <xmldb-cache>false</xmldb-cache>
                 <sock>/tmp/keel.sock</sock>
                 <startup-mode>startup</startup-mode>
                 <nacm-mode>external</nacm-mode>
                 <nacm-file>/etc/keel/nacm.xml</nacm-file>
                 <feature>example-net:bonding</feature>
               </keel-config>"#,
        )
        .unwrap();
        assert_eq!(config.yang_dirs.len(), 2);
        assert!(!config.xmldb_cache);
        assert_eq!(config.startup_mode, StartupMode::Startup);
        assert_eq!(config.nacm_mode, NacmMode::External);
        assert_eq!(
            config.features,
            vec![("example-net".to_owned(), "bonding".to_owned())]
        );
    }

    #[test]
    fn unknown_option_rejected() {
        let result =
            Config::parse("<keel-config><no-such-option/></keel-config>");
        assert!(result.unwrap_err().contains("unknown option"));
    }
}
