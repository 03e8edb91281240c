//! Handing control to the extracted binary.
//!
//! Argument filtering, self-path discovery, the child environment and the
//! final exec (or spawn-and-wait on Windows).

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Result, StubError};

/// Internal flag consumed by the stub and never forwarded.
pub const UPDATE_CONFIG_FLAG: &str = "--update-config";

/// Overrides self-path discovery when set to a non-empty value.
pub const STUB_PATH_OVERRIDE_ENV: &str = "SOCKET_SMOL_STUB_PATH";

/// Set in the child to the stub's own path.
pub const STUB_PATH_ENV: &str = "SMOL_STUB_PATH";

/// Set in the child to the payload's cache key.
pub const CACHE_KEY_ENV: &str = "SMOL_CACHE_KEY";

/// Set in the child to the name of the fake-argv variable.
pub const FAKE_ARGV_NAME_ENV: &str = "SMOL_FAKE_ARGV_NAME";

/// Drop `--update-config=<json>` and `--update-config <json>` from `args`.
///
/// `args` excludes argv[0]. A trailing `--update-config` with no value is
/// dropped on its own.
pub fn filter_update_args(args: &[OsString]) -> Vec<OsString> {
    let mut out = Vec::with_capacity(args.len());
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == UPDATE_CONFIG_FLAG {
            iter.next();
            continue;
        }
        if inline_update_value(arg).is_some() {
            continue;
        }
        out.push(arg.clone());
    }
    out
}

/// JSON value of the first `--update-config` occurrence, if any.
pub fn find_update_config_arg(args: &[OsString]) -> Option<String> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == UPDATE_CONFIG_FLAG {
            return iter.next().map(|v| v.to_string_lossy().into_owned());
        }
        if let Some(value) = inline_update_value(arg) {
            return Some(value.to_string());
        }
    }
    None
}

fn inline_update_value(arg: &OsStr) -> Option<&str> {
    arg.to_str()?
        .strip_prefix(UPDATE_CONFIG_FLAG)?
        .strip_prefix('=')
}

/// Resolve the stub's own path from its candidate sources, in order:
/// the override variable, the OS-reported executable, then argv[0].
pub fn resolve_self_path(
    override_path: Option<OsString>,
    current_exe: std::io::Result<PathBuf>,
    argv0: Option<OsString>,
) -> Result<PathBuf> {
    if let Some(path) = override_path.filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    let exe_err = match current_exe {
        Ok(path) => return Ok(path),
        Err(e) => e,
    };
    match argv0.filter(|a| !a.is_empty()) {
        Some(arg) => {
            tracing::debug!(error = %exe_err, "current_exe unavailable, using argv[0]");
            Ok(PathBuf::from(arg))
        }
        None => Err(StubError::SelfPath(exe_err.to_string())),
    }
}

/// Path of the running stub.
pub fn self_path() -> Result<PathBuf> {
    resolve_self_path(
        std::env::var_os(STUB_PATH_OVERRIDE_ENV),
        std::env::current_exe(),
        std::env::args_os().next(),
    )
}

/// Variables to add to the child's environment.
///
/// `lookup` reads the current environment; it decides whether the
/// fake-argv variable is already set.
pub fn child_env<F>(
    stub_path: &Path,
    cache_key: &str,
    fake_argv_env: Option<&str>,
    lookup: F,
) -> Vec<(OsString, OsString)>
where
    F: Fn(&str) -> Option<OsString>,
{
    let mut env = vec![
        (OsString::from(STUB_PATH_ENV), stub_path.as_os_str().to_owned()),
        (OsString::from(CACHE_KEY_ENV), OsString::from(cache_key)),
    ];

    if let Some(name) = fake_argv_env.filter(|n| !n.is_empty()) {
        env.push((OsString::from(FAKE_ARGV_NAME_ENV), OsString::from(name)));
        if lookup(name).is_none() {
            env.push((OsString::from(name), OsString::new()));
        }
    }
    env
}

fn build_command(binary: &Path, args: &[OsString], env: &[(OsString, OsString)]) -> Command {
    let mut cmd = Command::new(binary);
    cmd.args(args);
    for (key, value) in env {
        cmd.env(key, value);
    }
    cmd
}

/// Replace the current process with `binary`.
///
/// Only returns if the exec failed.
#[cfg(unix)]
pub fn exec_binary(binary: &Path, args: &[OsString], env: &[(OsString, OsString)]) -> Result<i32> {
    use std::os::unix::process::CommandExt;

    tracing::debug!(binary = %binary.display(), args = args.len(), "exec");
    let err = build_command(binary, args, env).exec();
    Err(StubError::Exec {
        path: binary.to_path_buf(),
        source: err,
    })
}

/// Run `binary` with inherited stdio and return its exit code.
#[cfg(not(unix))]
pub fn exec_binary(binary: &Path, args: &[OsString], env: &[(OsString, OsString)]) -> Result<i32> {
    tracing::debug!(binary = %binary.display(), args = args.len(), "spawn");
    let status = build_command(binary, args, env)
        .status()
        .map_err(|e| StubError::Exec {
            path: binary.to_path_buf(),
            source: e,
        })?;
    Ok(status.code().unwrap_or(1))
}
