//! Launcher prepended to pressed executables.
//!
//! On every start it:
//! 1. Finds the payload marker in its own file
//! 2. Extracts the compressed program into the shared cache if needed
//! 3. Runs the scheduled update check
//! 4. Replaces itself with the extracted program
//!
//! Any failure before the exec exits with status 1.

mod error;
mod launch;
mod runtime;
mod update;

use std::env;
use std::ffi::OsString;
use std::path::Path;
use std::process::ExitCode;

use smol_pack::cache::now_millis;
use smol_pack::{CacheEnv, ZstdCodec};
use tracing_subscriber::EnvFilter;

use crate::error::Result;
use crate::runtime::{Prepared, StubRuntime};
use crate::update::{OfflineChecker, TerminalUi, UpdateContext};

/// Filter variable for stub diagnostics. Logging is off unless set.
const LOG_ENV: &str = "SMOL_STUB_LOG";

fn main() -> ExitCode {
    init_logging();

    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(error = %e, "launch failed");
            eprintln!("error: {}", e);
            ExitCode::from(1)
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("off"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<i32> {
    let stub_path = launch::self_path()?;
    let args: Vec<OsString> = env::args_os().skip(1).collect();

    let codec = ZstdCodec::default();
    let prepared = StubRuntime::new(&codec, &CacheEnv::from_process()).prepare(&stub_path)?;
    tracing::debug!(
        binary = %prepared.binary.display(),
        cache_hit = prepared.cache_hit,
        "payload ready"
    );

    run_update_check(&prepared, &stub_path, &args);

    let forwarded = launch::filter_update_args(&args);
    let fake_argv = prepared
        .metadata
        .update_config()
        .map(|c| c.fake_argv_env.as_str());
    let child_env = launch::child_env(
        &stub_path,
        prepared.metadata.cache_key(),
        fake_argv,
        |name| env::var_os(name),
    );

    launch::exec_binary(&prepared.binary, &forwarded, &child_env)
}

fn run_update_check(prepared: &Prepared, stub_path: &Path, args: &[OsString]) {
    let argv_json = launch::find_update_config_arg(args);
    let Some(config) =
        update::resolve_update_config(prepared.metadata.update_config(), argv_json.as_deref())
    else {
        return;
    };
    if update::should_skip(&config, |name| env::var_os(name), update::stderr_is_tty()) {
        tracing::debug!("update check skipped");
        return;
    }

    let ctx = UpdateContext {
        cache: &prepared.cache,
        cache_key: prepared.metadata.cache_key(),
        current_version: update::stub_version(),
        stub_path,
        now: i64::try_from(now_millis()).unwrap_or(i64::MAX),
    };
    let mut ui = TerminalUi::detect();
    match update::check_for_updates(&ctx, &config, &OfflineChecker, &mut ui) {
        Ok(outcome) => tracing::debug!(?outcome, "update check finished"),
        Err(e) => tracing::warn!(error = %e, "update check failed"),
    }
}
