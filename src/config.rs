//! Build-time JSON configuration.
//!
//! The `smol` section of a sea-config file describes what gets embedded in
//! a pressed binary:
//!
//! ```json
//! { "smol": { "update": { "binname": "tool", "command": "self-update" },
//!             "vfs": { "mode": "in-memory" } } }
//! ```
//!
//! Unlike the record encoders in `smol_pack::config`, which truncate, this
//! layer rejects values that would not fit.

use crate::error::{Error, Result};
use serde::Deserialize;
use smol_pack::config::{smfg_limits, svfg_limits, DEFAULT_VFS_PREFIX};
use smol_pack::{SmolUpdateConfig, VfsConfig};
use std::path::Path;

/// VFS modes the runtime understands.
pub const VFS_MODES: [&str; 3] = ["on-disk", "in-memory", "compat"];

/// Mode used when `vfs` is `true` or omits `mode`.
pub const DEFAULT_VFS_MODE: &str = "in-memory";

/// Source used when `vfs` is `true` or omits `source`.
pub const DEFAULT_VFS_SOURCE: &str = "node_modules";

/// Top level of a sea-config file. Other top-level keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeaConfig {
    /// smol-specific settings.
    #[serde(default)]
    pub smol: Option<SmolSection>,
}

/// The `smol` object.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SmolSection {
    /// Update-check settings.
    #[serde(default)]
    pub update: Option<UpdateSection>,
    /// VFS settings.
    #[serde(default)]
    pub vfs: Option<VfsSetting>,
}

/// The `smol.update` object.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct UpdateSection {
    pub binname: Option<String>,
    pub command: Option<String>,
    pub url: Option<String>,
    pub tag: Option<String>,
    pub skip_env: Option<String>,
    pub fake_argv_env: Option<String>,
    pub prompt: Option<bool>,
    pub prompt_default: Option<String>,
    pub interval: Option<i64>,
    pub notify_interval: Option<i64>,
}

/// `smol.vfs`: either a switch or a settings object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum VfsSetting {
    /// `true` enables the defaults, `false` disables the VFS.
    Enabled(bool),
    /// Explicit settings.
    Options(VfsSection),
}

/// The `smol.vfs` object.
#[derive(Debug, Clone, Default, Deserialize)]
#[allow(missing_docs)]
pub struct VfsSection {
    pub mode: Option<String>,
    pub source: Option<String>,
    pub prefix: Option<String>,
}

impl SeaConfig {
    /// Parse a config from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io("read config", path, e))?;
        Self::from_json(&text)
    }

    /// Validated update config, if the file has a `smol.update` section.
    pub fn update_config(&self) -> Result<Option<SmolUpdateConfig>> {
        match self.smol.as_ref().and_then(|s| s.update.as_ref()) {
            Some(section) => section.to_config().map(Some),
            None => Ok(None),
        }
    }

    /// Validated VFS config, if the VFS is enabled.
    pub fn vfs_config(&self) -> Result<Option<VfsConfig>> {
        match self.smol.as_ref().and_then(|s| s.vfs.as_ref()) {
            None | Some(VfsSetting::Enabled(false)) => Ok(None),
            Some(VfsSetting::Enabled(true)) => VfsSection::default().to_config().map(Some),
            Some(VfsSetting::Options(section)) => section.to_config().map(Some),
        }
    }
}

impl UpdateSection {
    /// Apply over the defaults and check every field.
    pub fn to_config(&self) -> Result<SmolUpdateConfig> {
        let mut config = SmolUpdateConfig::default();

        if let Some(prompt) = self.prompt {
            config.prompt = prompt;
        }
        if let Some(answer) = &self.prompt_default {
            config.prompt_default = match answer.to_ascii_lowercase().as_str() {
                "y" | "yes" => 'y',
                "n" | "no" => 'n',
                other => {
                    return Err(Error::config(format!(
                        "smol.update.promptDefault must be \"y\" or \"n\", got {:?}",
                        other
                    )))
                }
            };
        }
        for (name, value, slot) in [
            ("interval", self.interval, &mut config.interval),
            ("notifyInterval", self.notify_interval, &mut config.notify_interval),
        ] {
            if let Some(value) = value {
                if value < 0 {
                    return Err(Error::config(format!(
                        "smol.update.{} must not be negative",
                        name
                    )));
                }
                *slot = value;
            }
        }

        for (slot, value) in [
            (&mut config.binname, &self.binname),
            (&mut config.command, &self.command),
            (&mut config.url, &self.url),
            (&mut config.tag, &self.tag),
            (&mut config.skip_env, &self.skip_env),
            (&mut config.fake_argv_env, &self.fake_argv_env),
        ] {
            if let Some(value) = value {
                *slot = value.clone();
            }
        }

        if !config.url.is_empty()
            && !(config.url.starts_with("http://") || config.url.starts_with("https://"))
        {
            return Err(Error::config(
                "smol.update.url must start with http:// or https://",
            ));
        }

        let values = [
            &config.binname,
            &config.command,
            &config.url,
            &config.tag,
            &config.skip_env,
            &config.fake_argv_env,
        ];
        check_lengths("smol.update", smfg_limits(), &values)?;
        Ok(config)
    }
}

impl VfsSection {
    /// Apply over the defaults and check every field.
    pub fn to_config(&self) -> Result<VfsConfig> {
        let config = VfsConfig {
            mode: self
                .mode
                .clone()
                .unwrap_or_else(|| DEFAULT_VFS_MODE.to_string()),
            source: self
                .source
                .clone()
                .unwrap_or_else(|| DEFAULT_VFS_SOURCE.to_string()),
            prefix: self
                .prefix
                .clone()
                .unwrap_or_else(|| DEFAULT_VFS_PREFIX.to_string()),
        };

        if !VFS_MODES.contains(&config.mode.as_str()) {
            return Err(Error::config(format!(
                "smol.vfs.mode must be one of {}, got {:?}",
                VFS_MODES.join(", "),
                config.mode
            )));
        }
        check_lengths(
            "smol.vfs",
            svfg_limits(),
            &[&config.mode, &config.source, &config.prefix],
        )?;
        Ok(config)
    }
}

fn check_lengths(
    section: &str,
    limits: impl Iterator<Item = (&'static str, usize)>,
    values: &[&String],
) -> Result<()> {
    for ((field, max), value) in limits.zip(values) {
        if value.len() > max {
            return Err(Error::config(format!(
                "{}.{} is {} bytes, limit is {}",
                section,
                field,
                value.len(),
                max
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_update_section() {
        let config = SeaConfig::from_json(
            r#"{
                "main": "app.js",
                "smol": { "update": {
                    "binname": "tool", "command": "upgrade",
                    "url": "https://example.com/releases", "tag": "tool-v*",
                    "skipEnv": "TOOL_NO_UPDATE", "fakeArgvEnv": "TOOL_ARGV",
                    "prompt": true, "promptDefault": "Y",
                    "interval": 3600000, "notifyInterval": 60000
                } }
            }"#,
        )
        .unwrap();

        let update = config.update_config().unwrap().unwrap();
        assert_eq!(update.binname, "tool");
        assert_eq!(update.command, "upgrade");
        assert_eq!(update.tag, "tool-v*");
        assert_eq!(update.skip_env, "TOOL_NO_UPDATE");
        assert_eq!(update.fake_argv_env, "TOOL_ARGV");
        assert!(update.prompt);
        assert_eq!(update.prompt_default, 'y');
        assert_eq!(update.interval, 3_600_000);
        assert_eq!(update.notify_interval, 60_000);
        assert!(config.vfs_config().unwrap().is_none());
    }

    #[test]
    fn test_empty_update_section_uses_defaults() {
        let config = SeaConfig::from_json(r#"{"smol":{"update":{}}}"#).unwrap();
        assert_eq!(
            config.update_config().unwrap(),
            Some(SmolUpdateConfig::default())
        );
    }

    #[test]
    fn test_missing_sections() {
        let config = SeaConfig::from_json("{}").unwrap();
        assert!(config.update_config().unwrap().is_none());
        assert!(config.vfs_config().unwrap().is_none());
    }

    #[test]
    fn test_url_scheme_checked() {
        let config =
            SeaConfig::from_json(r#"{"smol":{"update":{"url":"ftp://example.com"}}}"#).unwrap();
        assert!(matches!(config.update_config(), Err(Error::Config(_))));

        let config = SeaConfig::from_json(r#"{"smol":{"update":{"url":""}}}"#).unwrap();
        assert!(config.update_config().is_ok());
    }

    #[test]
    fn test_overlong_field_rejected() {
        let json = format!(r#"{{"smol":{{"update":{{"binname":"{}"}}}}}}"#, "b".repeat(128));
        let err = SeaConfig::from_json(&json)
            .unwrap()
            .update_config()
            .unwrap_err();
        assert!(err.to_string().contains("smol.update.binname"));

        let json = format!(r#"{{"smol":{{"update":{{"binname":"{}"}}}}}}"#, "b".repeat(127));
        assert!(SeaConfig::from_json(&json).unwrap().update_config().is_ok());
    }

    #[test]
    fn test_bad_prompt_default_and_interval() {
        let config =
            SeaConfig::from_json(r#"{"smol":{"update":{"promptDefault":"maybe"}}}"#).unwrap();
        assert!(config.update_config().is_err());

        let config = SeaConfig::from_json(r#"{"smol":{"update":{"interval":-1}}}"#).unwrap();
        assert!(config.update_config().is_err());
    }

    #[test]
    fn test_vfs_switch() {
        let on = SeaConfig::from_json(r#"{"smol":{"vfs":true}}"#).unwrap();
        let vfs = on.vfs_config().unwrap().unwrap();
        assert_eq!(vfs.mode, DEFAULT_VFS_MODE);
        assert_eq!(vfs.source, DEFAULT_VFS_SOURCE);
        assert_eq!(vfs.prefix, DEFAULT_VFS_PREFIX);

        let off = SeaConfig::from_json(r#"{"smol":{"vfs":false}}"#).unwrap();
        assert!(off.vfs_config().unwrap().is_none());
    }

    #[test]
    fn test_vfs_object() {
        let config = SeaConfig::from_json(
            r#"{"smol":{"vfs":{"mode":"compat","source":"assets","prefix":"/app"}}}"#,
        )
        .unwrap();
        let vfs = config.vfs_config().unwrap().unwrap();
        assert_eq!(vfs.mode, "compat");
        assert_eq!(vfs.source, "assets");
        assert_eq!(vfs.prefix, "/app");

        let bad = SeaConfig::from_json(r#"{"smol":{"vfs":{"mode":"tmpfs"}}}"#).unwrap();
        assert!(bad.vfs_config().is_err());
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            SeaConfig::from_json("{\"smol\":"),
            Err(Error::Config(_))
        ));
        assert!(SeaConfig::from_json(r#"{"smol":{"vfs":"yes"}}"#).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sea-config.json");
        std::fs::write(&path, r#"{"smol":{"update":{"binname":"x"}}}"#).unwrap();
        let update = SeaConfig::load(&path).unwrap().update_config().unwrap().unwrap();
        assert_eq!(update.binname, "x");

        assert!(matches!(
            SeaConfig::load(&dir.path().join("missing.json")),
            Err(Error::Io { .. })
        ));
    }
}
