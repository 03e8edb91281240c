//! Update-check integration.
//!
//! The stub never blocks on or fails because of an update check: every
//! error in here is logged and swallowed by the caller.

use std::cmp::Ordering;
use std::ffi::OsString;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::process::Command;

use serde::Deserialize;
use smol_pack::{ExtractionCache, SmolUpdateConfig, UpdateCheck};
use tracing::{debug, warn};

/// Releases endpoint used when `--update-config` does not name one.
pub const DEFAULT_RELEASES_URL: &str = "https://api.github.com/repos/SocketDev/socket-btm/releases";

/// Tag pattern used when `--update-config` does not name one.
pub const DEFAULT_TAG_PATTERN: &str = "node-smol-*";

const BOX_WIDTH: usize = 45;

/// Release version of this stub, compared against release tags.
///
/// Release builds set `SMOL_STUB_VERSION` to the version their tag carries
/// (the text matched by the tag pattern's `*`). Local builds fall back to
/// the crate version, which never matches a release tag and so always
/// compares as older.
pub fn stub_version() -> &'static str {
    release_version(option_env!("SMOL_STUB_VERSION"))
}

fn release_version(build_env: Option<&'static str>) -> &'static str {
    match build_env.map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ => env!("CARGO_PKG_VERSION"),
    }
}

/// `--update-config` JSON. Every key is optional; unknown keys are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UpdateConfigArg {
    enabled: Option<bool>,
    interval: Option<i64>,
    notify_interval: Option<i64>,
    prompt: Option<bool>,
    prompt_default: Option<String>,
    binname: Option<String>,
    command: Option<String>,
    url: Option<String>,
    tag: Option<String>,
    skip_env: Option<String>,
}

/// Merge defaults, the embedded record and the argv override.
///
/// Returns `None` when updates are disabled: neither source is present, the
/// override says `"enabled": false`, or no source survives parsing.
pub fn resolve_update_config(
    embedded: Option<&SmolUpdateConfig>,
    argv_json: Option<&str>,
) -> Option<SmolUpdateConfig> {
    let arg = argv_json.and_then(|json| match serde_json::from_str::<UpdateConfigArg>(json) {
        Ok(arg) => Some(arg),
        Err(e) => {
            warn!(error = %e, "ignoring malformed --update-config");
            None
        }
    });

    let mut config = match (embedded, &arg) {
        (Some(embedded), _) => embedded.clone(),
        (None, Some(_)) => SmolUpdateConfig::default(),
        (None, None) => return None,
    };

    let Some(arg) = arg else {
        return Some(config);
    };
    if arg.enabled == Some(false) {
        return None;
    }

    if config.url.is_empty() {
        config.url = DEFAULT_RELEASES_URL.to_string();
    }
    if config.tag.is_empty() {
        config.tag = DEFAULT_TAG_PATTERN.to_string();
    }
    if let Some(v) = arg.interval {
        config.interval = v;
    }
    if let Some(v) = arg.notify_interval {
        config.notify_interval = v;
    }
    if let Some(v) = arg.prompt {
        config.prompt = v;
    }
    if let Some(v) = arg.prompt_default {
        config.prompt_default = if v.starts_with(['y', 'Y']) { 'y' } else { 'n' };
    }
    for (slot, value) in [
        (&mut config.binname, arg.binname),
        (&mut config.command, arg.command),
        (&mut config.url, arg.url),
        (&mut config.tag, arg.tag),
        (&mut config.skip_env, arg.skip_env),
    ] {
        if let Some(value) = value {
            *slot = value;
        }
    }
    Some(config)
}

/// True for unset, empty, `0` and case-insensitive `false`.
pub fn is_falsy(value: Option<&str>) -> bool {
    match value {
        None => true,
        Some(v) => v.is_empty() || v == "0" || v.eq_ignore_ascii_case("false"),
    }
}

/// Whether the update check should be skipped entirely.
pub fn should_skip<F>(config: &SmolUpdateConfig, lookup: F, stderr_is_tty: bool) -> bool
where
    F: Fn(&str) -> Option<OsString>,
{
    if !config.skip_env.is_empty() {
        let value = lookup(&config.skip_env);
        if !is_falsy(value.as_deref().and_then(|v| v.to_str())) {
            debug!(var = %config.skip_env, "update check disabled by environment");
            return true;
        }
    }
    if lookup("CI").is_some() || lookup("CONTINUOUS_INTEGRATION").is_some() {
        return true;
    }
    cfg!(unix) && !stderr_is_tty
}

/// Whether a new release check is due.
pub fn should_check(state: &UpdateCheck, config: &SmolUpdateConfig, now: i64) -> bool {
    now.saturating_sub(state.last_check) >= config.interval
}

/// Whether the user may be notified again.
pub fn should_notify(state: &UpdateCheck, config: &SmolUpdateConfig, now: i64) -> bool {
    now.saturating_sub(state.last_notification) >= config.notify_interval
}

/// Compare two version strings.
///
/// A leading `v` is ignored. Up to four dot-separated numbers are compared;
/// strings with fewer than two such parts are read as `YYYY-MM-DD`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    version_parts(a).cmp(&version_parts(b))
}

fn version_parts(v: &str) -> [u64; 4] {
    let v = v.strip_prefix(['v', 'V']).unwrap_or(v);
    let (parts, n) = leading_numbers(v, '.');
    if n >= 2 {
        return parts;
    }
    let (date, _) = leading_numbers(v, '-');
    [date[0], date[1], date[2], 0]
}

/// Parse up to four `sep`-separated leading integers, stopping at the first
/// component that does not start with a digit.
fn leading_numbers(s: &str, sep: char) -> ([u64; 4], usize) {
    let mut parts = [0u64; 4];
    let mut count = 0;
    for segment in s.split(sep).take(4) {
        let digits: String = segment.chars().take_while(char::is_ascii_digit).collect();
        let Ok(value) = digits.parse() else {
            break;
        };
        parts[count] = value;
        count += 1;
        if digits.len() != segment.len() {
            break;
        }
    }
    (parts, count)
}

/// Glob match supporting `*` (any run) and `?` (one character).
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}

/// Version part of a release tag: the text matched by the pattern's first
/// `*`, or the whole tag when the pattern has none or does not match.
pub fn extract_version_from_tag<'a>(tag: &'a str, pattern: &str) -> &'a str {
    let Some(star) = pattern.find('*') else {
        return tag;
    };
    if !glob_match(pattern, tag) {
        return tag;
    }
    let prefix = &pattern[..star];
    let suffix_literal: String = pattern[star + 1..]
        .chars()
        .take_while(|&c| c != '*' && c != '?')
        .collect();
    let Some(rest) = tag.strip_prefix(prefix) else {
        return tag;
    };
    if suffix_literal.is_empty() {
        return rest;
    }
    match rest.find(&suffix_literal) {
        Some(end) => &rest[..end],
        None => rest,
    }
}

/// Source of release information.
pub trait ReleaseChecker {
    /// Tag of the newest release matching `config.tag`, if known.
    fn latest_release(&self, config: &SmolUpdateConfig) -> Option<String>;
}

/// Checker that never reports a release.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineChecker;

impl ReleaseChecker for OfflineChecker {
    fn latest_release(&self, config: &SmolUpdateConfig) -> Option<String> {
        debug!(url = %config.url, "release lookup not available in this build");
        None
    }
}

/// How notifications reach the user.
pub trait UpdateUi {
    /// Tell the user an update exists.
    fn notify(&mut self, config: &SmolUpdateConfig, current: &str, latest: &str);
    /// Ask whether to update now.
    fn confirm(&mut self, config: &SmolUpdateConfig, latest: &str) -> bool;
    /// Run the update command.
    fn run_update(&mut self, config: &SmolUpdateConfig, stub_path: &Path);
}

/// Stderr/stdin implementation of [`UpdateUi`].
#[derive(Debug, Clone, Copy)]
pub struct TerminalUi {
    utf8: bool,
    tty: bool,
}

impl TerminalUi {
    /// Detect UTF-8 support and whether stderr is a terminal.
    pub fn detect() -> Self {
        Self {
            utf8: supports_utf8(|k| std::env::var(k).ok()),
            tty: stderr_is_tty(),
        }
    }
}

impl UpdateUi for TerminalUi {
    fn notify(&mut self, config: &SmolUpdateConfig, current: &str, latest: &str) {
        let text = render_notification(config, current, latest, self.utf8, self.tty);
        let _ = io::stderr().write_all(text.as_bytes());
    }

    fn confirm(&mut self, config: &SmolUpdateConfig, latest: &str) -> bool {
        let default_yes = config.prompt_default == 'y';
        if !self.tty {
            return default_yes;
        }

        let hint = if default_yes { "[Y/n]" } else { "[y/N]" };
        let mut stderr = io::stderr();
        let _ = write!(stderr, "\x1b[1mUpdate to {}?\x1b[0m {} ", latest, hint);
        let _ = stderr.flush();

        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return default_yes;
        }
        parse_answer(&answer, default_yes)
    }

    fn run_update(&mut self, config: &SmolUpdateConfig, stub_path: &Path) {
        if config.command.is_empty() {
            return;
        }
        eprintln!("Running: \"{}\" {}", stub_path.display(), config.command);
        match Command::new(stub_path)
            .args(config.command.split_whitespace())
            .status()
        {
            Ok(status) if status.success() => {}
            Ok(status) => warn!(%status, "update command failed"),
            Err(e) => warn!(error = %e, "failed to run update command"),
        }
    }
}

fn parse_answer(answer: &str, default_yes: bool) -> bool {
    match answer.trim_start().chars().next() {
        Some('y' | 'Y') => true,
        Some('n' | 'N') => false,
        _ => default_yes,
    }
}

fn supports_utf8<F>(lookup: F) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    let is_utf8 = |v: String| v.contains("UTF-8") || v.contains("utf-8") || v.contains("utf8");
    if lookup("LC_ALL").is_some_and(is_utf8) || lookup("LANG").is_some_and(is_utf8) {
        return true;
    }
    cfg!(not(windows))
}

/// Whether stderr is attached to a terminal.
#[cfg(unix)]
pub fn stderr_is_tty() -> bool {
    // SAFETY: isatty only inspects the descriptor.
    unsafe { libc::isatty(libc::STDERR_FILENO) == 1 }
}

/// Whether stderr is attached to a terminal.
#[cfg(not(unix))]
pub fn stderr_is_tty() -> bool {
    use std::io::IsTerminal;
    io::stderr().is_terminal()
}

/// Boxed "update available" message.
pub fn render_notification(
    config: &SmolUpdateConfig,
    current: &str,
    latest: &str,
    utf8: bool,
    tty: bool,
) -> String {
    let (tl, tr, bl, br, h, v) = if utf8 {
        ("┌", "┐", "└", "┘", "─", "│")
    } else {
        ("+", "+", "+", "+", "-", "|")
    };

    let mut out = String::from("\n");
    out.push_str(&format!("{}{}{}\n", tl, h.repeat(BOX_WIDTH), tr));

    let plain = format!("Update available: {} -> {}", current, latest);
    let styled = if tty {
        format!(
            "\x1b[1mUpdate available:\x1b[0m \x1b[90m{}\x1b[0m -> \x1b[32m{}\x1b[0m",
            current, latest
        )
    } else {
        plain.clone()
    };
    push_box_row(&mut out, v, &plain, &styled);

    if !config.command.is_empty() {
        let display = if config.binname.is_empty() {
            config.command.clone()
        } else {
            format!("{} {}", config.binname, config.command)
        };
        let plain = format!("Run: {}", display);
        let styled = if tty {
            format!("Run: \x1b[36m{}\x1b[0m", display)
        } else {
            plain.clone()
        };
        push_box_row(&mut out, v, &plain, &styled);
    }

    out.push_str(&format!("{}{}{}\n\n", bl, h.repeat(BOX_WIDTH), br));
    out
}

/// Pad by the visible width of `plain`, print `styled`.
fn push_box_row(out: &mut String, border: &str, plain: &str, styled: &str) {
    let padding = BOX_WIDTH.saturating_sub(plain.chars().count() + 4);
    out.push_str(&format!(
        "{}  {}{}  {}\n",
        border,
        styled,
        " ".repeat(padding),
        border
    ));
}

/// Everything the update flow needs from the launch context.
pub struct UpdateContext<'a> {
    /// Cache holding the entry's sidecar.
    pub cache: &'a ExtractionCache,
    /// Entry whose sidecar stores the check state.
    pub cache_key: &'a str,
    /// Version of the running stub.
    pub current_version: &'a str,
    /// Stub to run the update command with.
    pub stub_path: &'a Path,
    /// Current time (ms since epoch).
    pub now: i64,
}

/// What the update flow did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Nothing was due.
    Idle,
    /// A release check ran; carries the newer version if one was found.
    Checked(Option<String>),
    /// A previously seen newer version was announced again.
    Reminded(String),
}

/// Run the scheduled check and notification for one launch.
pub fn check_for_updates(
    ctx: &UpdateContext<'_>,
    config: &SmolUpdateConfig,
    checker: &dyn ReleaseChecker,
    ui: &mut dyn UpdateUi,
) -> smol_pack::Result<UpdateOutcome> {
    let mut state = ctx.cache.read_update_check(ctx.cache_key);

    if !should_check(&state, config, ctx.now) {
        let latest = state.latest_known.clone();
        if latest.is_empty()
            || !should_notify(&state, config, ctx.now)
            || compare_versions(&latest, ctx.current_version) != Ordering::Greater
        {
            return Ok(UpdateOutcome::Idle);
        }
        announce(ctx, config, ui, &latest);
        state.last_notification = ctx.now;
        ctx.cache.write_update_check(ctx.cache_key, &state)?;
        return Ok(UpdateOutcome::Reminded(latest));
    }

    state.last_check = ctx.now;
    let newer = checker
        .latest_release(config)
        .map(|tag| extract_version_from_tag(&tag, &config.tag).to_string())
        .filter(|v| compare_versions(v, ctx.current_version) == Ordering::Greater);

    if let Some(latest) = &newer {
        state.latest_known = latest.clone();
        if should_notify(&state, config, ctx.now) {
            announce(ctx, config, ui, latest);
            state.last_notification = ctx.now;
        }
    }
    ctx.cache.write_update_check(ctx.cache_key, &state)?;
    Ok(UpdateOutcome::Checked(newer))
}

fn announce(ctx: &UpdateContext<'_>, config: &SmolUpdateConfig, ui: &mut dyn UpdateUi, latest: &str) {
    ui.notify(config, ctx.current_version, latest);
    if config.prompt && ui.confirm(config, latest) {
        ui.run_update(config, ctx.stub_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smol_pack::cache::integrity_for;
    use smol_pack::{Platform, StoreRequest};
    use std::collections::HashMap;
    use tempfile::TempDir;

    const KEY: &str = "0123456789abcdef";

    #[test]
    fn test_release_version_prefers_build_setting() {
        assert_eq!(release_version(Some("2025-03-01")), "2025-03-01");
        assert_eq!(release_version(Some(" 24.1.0 ")), "24.1.0");
        assert_eq!(release_version(Some("")), env!("CARGO_PKG_VERSION"));
        assert_eq!(release_version(None), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_release_version_compares_with_tag_version() {
        let tagged = extract_version_from_tag("node-smol-2025-03-01", DEFAULT_TAG_PATTERN);
        assert_eq!(
            compare_versions(tagged, release_version(Some("2025-03-01"))),
            Ordering::Equal
        );
        assert_eq!(
            compare_versions("2025-04-01", release_version(Some("2025-03-01"))),
            Ordering::Greater
        );
    }

    #[derive(Default)]
    struct RecordingUi {
        notified: Vec<(String, String)>,
        answer: bool,
        updates_run: usize,
    }

    impl UpdateUi for RecordingUi {
        fn notify(&mut self, _config: &SmolUpdateConfig, current: &str, latest: &str) {
            self.notified.push((current.to_string(), latest.to_string()));
        }

        fn confirm(&mut self, _config: &SmolUpdateConfig, _latest: &str) -> bool {
            self.answer
        }

        fn run_update(&mut self, _config: &SmolUpdateConfig, _stub_path: &Path) {
            self.updates_run += 1;
        }
    }

    struct FixedChecker(&'static str);

    impl ReleaseChecker for FixedChecker {
        fn latest_release(&self, _config: &SmolUpdateConfig) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    fn cache_with_entry(dir: &TempDir) -> ExtractionCache {
        let cache = ExtractionCache::new(dir.path(), Platform::Linux);
        let data = b"binary".to_vec();
        cache
            .store(&StoreRequest {
                cache_key: KEY,
                data: &data,
                source_path: Path::new("/tmp/stub"),
                integrity: integrity_for(&data),
                compression_algorithm: "zstd",
                compressed_size: 3,
                update_check: None,
            })
            .unwrap();
        cache
    }

    fn ctx<'a>(cache: &'a ExtractionCache, now: i64) -> UpdateContext<'a> {
        UpdateContext {
            cache,
            cache_key: KEY,
            current_version: "1.0.0",
            stub_path: Path::new("/tmp/stub"),
            now,
        }
    }

    fn config() -> SmolUpdateConfig {
        SmolUpdateConfig {
            interval: 1000,
            notify_interval: 1000,
            tag: "v*".to_string(),
            ..SmolUpdateConfig::default()
        }
    }

    #[test]
    fn test_resolve_requires_a_source() {
        assert_eq!(resolve_update_config(None, None), None);

        let embedded = config();
        assert_eq!(resolve_update_config(Some(&embedded), None), Some(embedded));
    }

    #[test]
    fn test_resolve_argv_overrides_embedded() {
        let embedded = config();
        let json = r#"{"prompt":true,"prompt_default":"Y","interval":5,"binname":"tool","unknown":1}"#;
        let resolved = resolve_update_config(Some(&embedded), Some(json)).unwrap();
        assert!(resolved.prompt);
        assert_eq!(resolved.prompt_default, 'y');
        assert_eq!(resolved.interval, 5);
        assert_eq!(resolved.notify_interval, 1000);
        assert_eq!(resolved.binname, "tool");
        assert_eq!(resolved.tag, "v*");
        assert_eq!(resolved.url, DEFAULT_RELEASES_URL);
    }

    #[test]
    fn test_resolve_argv_only_uses_defaults() {
        let resolved = resolve_update_config(None, Some("{}")).unwrap();
        assert_eq!(resolved.url, DEFAULT_RELEASES_URL);
        assert_eq!(resolved.tag, DEFAULT_TAG_PATTERN);
        assert_eq!(resolved.command, smol_pack::config::DEFAULT_UPDATE_COMMAND);

        assert_eq!(resolve_update_config(None, Some(r#"{"enabled":false}"#)), None);
        assert_eq!(resolve_update_config(None, Some("not json")), None);
    }

    #[test]
    fn test_resolve_malformed_argv_keeps_embedded() {
        let embedded = config();
        assert_eq!(
            resolve_update_config(Some(&embedded), Some("{oops")),
            Some(embedded)
        );
    }

    #[test]
    fn test_is_falsy() {
        assert!(is_falsy(None));
        assert!(is_falsy(Some("")));
        assert!(is_falsy(Some("0")));
        assert!(is_falsy(Some("FALSE")));
        assert!(!is_falsy(Some("1")));
        assert!(!is_falsy(Some("yes")));
    }

    #[test]
    fn test_should_skip() {
        let mut cfg = config();
        cfg.skip_env = "TOOL_NO_UPDATE".to_string();

        let env: HashMap<&str, &str> = HashMap::new();
        let lookup = |k: &str| env.get(k).map(OsString::from);
        assert!(!should_skip(&cfg, lookup, true));

        let env: HashMap<&str, &str> = [("TOOL_NO_UPDATE", "1")].into();
        assert!(should_skip(&cfg, |k| env.get(k).map(OsString::from), true));

        let env: HashMap<&str, &str> = [("TOOL_NO_UPDATE", "false")].into();
        assert!(!should_skip(&cfg, |k| env.get(k).map(OsString::from), true));

        let env: HashMap<&str, &str> = [("CI", "true")].into();
        assert!(should_skip(&cfg, |k| env.get(k).map(OsString::from), true));

        let env: HashMap<&str, &str> = [("CONTINUOUS_INTEGRATION", "")].into();
        assert!(should_skip(&cfg, |k| env.get(k).map(OsString::from), true));

        #[cfg(unix)]
        assert!(should_skip(&config(), |_| None, false));
    }

    #[test]
    fn test_scheduling() {
        let cfg = config();
        let state = UpdateCheck {
            last_check: 10_000,
            last_notification: 10_500,
            latest_known: String::new(),
        };
        assert!(!should_check(&state, &cfg, 10_999));
        assert!(should_check(&state, &cfg, 11_000));
        assert!(!should_notify(&state, &cfg, 11_000));
        assert!(should_notify(&state, &cfg, 11_500));
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.2.3", "1.2.3"), Ordering::Equal);
        assert_eq!(compare_versions("v1.10.0", "1.9.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.0", "1.0.1"), Ordering::Less);
        assert_eq!(compare_versions("1.2.3.4", "1.2.3"), Ordering::Greater);
        assert_eq!(compare_versions("2025-01-15", "2024-12-31"), Ordering::Greater);
        assert_eq!(compare_versions("2025-01-15", "2025-02-01"), Ordering::Less);
        assert_eq!(compare_versions("1.2.3-beta", "1.2.3"), Ordering::Equal);
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("node-smol-*", "node-smol-2025-01-15"));
        assert!(glob_match("v?.*", "v1.2"));
        assert!(glob_match("*", ""));
        assert!(glob_match("a*b*c", "aXXbYYc"));
        assert!(!glob_match("node-smol-*", "node-2025"));
        assert!(!glob_match("v?", "v10"));
        assert!(!glob_match("", "x"));
    }

    #[test]
    fn test_extract_version_from_tag() {
        assert_eq!(
            extract_version_from_tag("node-smol-2025-01-15", "node-smol-*"),
            "2025-01-15"
        );
        assert_eq!(extract_version_from_tag("v1.0.0", "v*"), "1.0.0");
        assert_eq!(extract_version_from_tag("1.0.0", ""), "1.0.0");
        assert_eq!(extract_version_from_tag("rel-2.0-final", "rel-*-final"), "2.0");
        assert_eq!(extract_version_from_tag("other", "v*"), "other");
    }

    #[test]
    fn test_render_notification_plain() {
        let mut cfg = config();
        cfg.binname = "tool".to_string();
        let text = render_notification(&cfg, "1.0.0", "1.1.0", false, false);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[1], format!("+{}+", "-".repeat(BOX_WIDTH)));
        assert!(lines[2].starts_with("|  Update available: 1.0.0 -> 1.1.0"));
        assert!(lines[3].starts_with("|  Run: tool self-update"));
        assert_eq!(lines[2].chars().count(), BOX_WIDTH + 2);
        assert_eq!(lines[3].chars().count(), BOX_WIDTH + 2);
        assert!(lines[2].ends_with('|'));
    }

    #[test]
    fn test_render_notification_utf8_tty() {
        let text = render_notification(&config(), "1.0.0", "2.0.0", true, true);
        assert!(text.contains('┌'));
        assert!(text.contains("\x1b[32m2.0.0\x1b[0m"));
        assert!(text.contains("Run: \x1b[36mself-update\x1b[0m"));
    }

    #[test]
    fn test_parse_answer() {
        assert!(parse_answer("y\n", false));
        assert!(parse_answer("Yes", false));
        assert!(!parse_answer("n", true));
        assert!(parse_answer("\n", true));
        assert!(!parse_answer("", false));
        assert!(!parse_answer("maybe", false));
    }

    #[test]
    fn test_supports_utf8() {
        assert!(supports_utf8(|k| (k == "LANG").then(|| "en_US.UTF-8".to_string())));
        assert!(supports_utf8(|k| (k == "LC_ALL").then(|| "C.utf8".to_string())));
        assert_eq!(supports_utf8(|_| None), cfg!(not(windows)));
    }

    #[test]
    fn test_check_records_newer_release() {
        let dir = TempDir::new().unwrap();
        let cache = cache_with_entry(&dir);
        let mut ui = RecordingUi::default();

        let outcome =
            check_for_updates(&ctx(&cache, 50_000), &config(), &FixedChecker("v1.2.0"), &mut ui)
                .unwrap();
        assert_eq!(outcome, UpdateOutcome::Checked(Some("1.2.0".to_string())));
        assert_eq!(ui.notified, vec![("1.0.0".to_string(), "1.2.0".to_string())]);

        let state = cache.read_update_check(KEY);
        assert_eq!(state.last_check, 50_000);
        assert_eq!(state.last_notification, 50_000);
        assert_eq!(state.latest_known, "1.2.0");

        // Other sidecar fields survive.
        let meta = cache.read_metadata(KEY).unwrap().unwrap();
        assert_eq!(meta.size, 6);
    }

    #[test]
    fn test_check_older_release_is_quiet() {
        let dir = TempDir::new().unwrap();
        let cache = cache_with_entry(&dir);
        let mut ui = RecordingUi::default();

        let outcome =
            check_for_updates(&ctx(&cache, 50_000), &config(), &FixedChecker("v0.9.0"), &mut ui)
                .unwrap();
        assert_eq!(outcome, UpdateOutcome::Checked(None));
        assert!(ui.notified.is_empty());
        assert_eq!(cache.read_update_check(KEY).last_check, 50_000);
    }

    #[test]
    fn test_reminder_between_checks() {
        let dir = TempDir::new().unwrap();
        let cache = cache_with_entry(&dir);
        cache
            .write_update_check(
                KEY,
                &UpdateCheck {
                    last_check: 50_000,
                    last_notification: 40_000,
                    latest_known: "1.5.0".to_string(),
                },
            )
            .unwrap();

        let mut cfg = config();
        cfg.interval = 100_000;
        cfg.prompt = true;
        let mut ui = RecordingUi {
            answer: true,
            ..RecordingUi::default()
        };

        let outcome =
            check_for_updates(&ctx(&cache, 50_500), &cfg, &OfflineChecker, &mut ui).unwrap();
        assert_eq!(outcome, UpdateOutcome::Reminded("1.5.0".to_string()));
        assert_eq!(ui.updates_run, 1);

        let state = cache.read_update_check(KEY);
        assert_eq!(state.last_check, 50_000);
        assert_eq!(state.last_notification, 50_500);

        // Notified just now, so the next launch stays quiet.
        let outcome =
            check_for_updates(&ctx(&cache, 50_600), &cfg, &OfflineChecker, &mut ui).unwrap();
        assert_eq!(outcome, UpdateOutcome::Idle);
    }

    #[test]
    fn test_offline_checker_updates_last_check() {
        let dir = TempDir::new().unwrap();
        let cache = cache_with_entry(&dir);
        let mut ui = RecordingUi::default();

        let outcome =
            check_for_updates(&ctx(&cache, 5_000), &config(), &OfflineChecker, &mut ui).unwrap();
        assert_eq!(outcome, UpdateOutcome::Checked(None));
        assert_eq!(cache.read_update_check(KEY).last_check, 5_000);
    }

    #[test]
    fn test_missing_sidecar_is_an_error() {
        let dir = TempDir::new().unwrap();
        let cache = ExtractionCache::new(dir.path(), Platform::Linux);
        let mut ui = RecordingUi::default();
        let result = check_for_updates(&ctx(&cache, 5_000), &config(), &OfflineChecker, &mut ui);
        assert!(result.is_err());
    }
}
