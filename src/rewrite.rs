//! Per-request interpreter for a subset of the Apache mod_rewrite grammar:
//! `RewriteEngine`, `RewriteBase`, `RewriteCond` (only the
//! `%{REQUEST_FILENAME} -f` test) and `RewriteRule`.
//!
//! The rewrite file is re-read and evaluated from scratch on every request;
//! nothing is cached across requests.

use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::{Regex, RegexBuilder};

/// Name of the rewrite file looked up at the root of each mapped directory.
pub const REWRITE_FILENAME: &str = ".htaccess";

// https://httpd.apache.org/docs/2.4/mod/mod_rewrite.html
static CMD_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ *(?P<command>[^ ]+) +(?P<params>.+)$").unwrap());
static ENGINE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?P<onoff>on|off) *$").unwrap());
// RewriteBase url
static BASE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?P<url>[^ ]+)$").unwrap());
// RewriteCond %{REQUEST_FILENAME} !-f
static COND_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<test>[^ ]+) +(?P<not>!)? *(?P<cond>[^ ]+)( +\[(?P<options>.+)\])?$")
        .unwrap()
});
// RewriteRule ^(.*)$ /index.php [ABC]
static RULE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<not>!)? *(?P<pattern>[^ ]+) +(?P<sub>[^ ]+)( +\[(?P<options>.+)\])?$")
        .unwrap()
});

/// Scratch state for one evaluation. Built fresh per request, never shared.
#[derive(Default)]
struct RewriteState {
    engine_on: bool,
    condition_set: bool,
    condition_value: bool,
    or_next: bool,
    base: String,
}

/// Evaluates the rewrite file under `root` (if any) against the original
/// request `url` and the resolved `candidate` path. Returns the rewritten
/// path of the first rule that fires, or `candidate` unchanged when no rule
/// matches, the file is absent, or interpretation aborts.
pub fn apply(root: &Path, url: &str, candidate: PathBuf) -> PathBuf {
    let rewrite_file = root.join(REWRITE_FILENAME);

    let text = match fs::read_to_string(&rewrite_file) {
        Ok(t) => t,
        Err(_) => return candidate,
    };

    let mut state = RewriteState::default();

    for line in text.lines() {
        let caps = match CMD_PATTERN.captures(line) {
            Some(c) => c,
            None => continue,
        };

        let command = &caps["command"];
        if command.starts_with('#') {
            continue;
        }
        let params = &caps["params"];

        match command {
            "RewriteEngine" => {
                // A malformed or disabled engine directive aborts the whole
                // file for this request.
                match ENGINE_PATTERN.captures(params) {
                    Some(c) if c["onoff"].eq_ignore_ascii_case("on") => {
                        state.engine_on = true;
                    }
                    _ => return candidate,
                }
            }

            "RewriteBase" => {
                if let Some(c) = BASE_PATTERN.captures(params) {
                    state.base = c["url"].to_string();
                }
            }

            "RewriteCond" => {
                if !state.engine_on {
                    continue;
                }
                if let Some(c) = COND_PATTERN.captures(params) {
                    evaluate_condition(&mut state, &c, &candidate);
                }
            }

            "RewriteRule" => {
                if !state.engine_on || (state.condition_set && !state.condition_value) {
                    state.condition_set = false;
                    continue;
                }
                state.condition_set = false;

                let c = match RULE_PATTERN.captures(params) {
                    Some(c) => c,
                    None => continue,
                };
                if let Some(rewritten) = evaluate_rule(&state, &c, root, url) {
                    return rewritten;
                }
            }

            _ => {}
        }
    }

    candidate
}

fn evaluate_condition(state: &mut RewriteState, caps: &regex::Captures, candidate: &Path) {
    let test_string = &caps["test"];
    let negate = caps.name("not").is_some();
    let condition = &caps["cond"];
    let options: Vec<&str> = caps
        .name("options")
        .map(|m| m.as_str().split([',', ' ']).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    // NC/nocase is recognized but has no effect on the -f file probe.
    let _nocase = options.contains(&"NC") || options.contains(&"nocase");

    if test_string != "%{REQUEST_FILENAME}" || condition != "-f" {
        return;
    }

    let mut exists = candidate.is_file();
    if negate {
        exists = !exists;
    }

    if !state.condition_set {
        state.condition_set = true;
        state.condition_value = exists;
    } else if state.or_next {
        state.condition_value |= exists;
    } else {
        state.condition_value &= exists;
    }

    // OR applies to the combination with the NEXT condition line.
    state.or_next = options.contains(&"OR") || options.contains(&"ornext");
}

fn evaluate_rule(
    state: &RewriteState,
    caps: &regex::Captures,
    root: &Path,
    url: &str,
) -> Option<PathBuf> {
    let negate = caps.name("not").is_some();
    let pattern = &caps["pattern"];
    let substitution = &caps["sub"];

    // An unparseable pattern skips the rule, it is not fatal to the file.
    let matcher = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .ok()?;

    let mut success = matcher.is_match(url);
    if negate {
        success = !success;
    }
    if !success {
        return None;
    }

    let url_rel = if let Some(stripped) = substitution.strip_prefix('/') {
        stripped.to_string()
    } else {
        let prefixed = format!("{}{}", state.base, substitution);
        prefixed.trim_start_matches('/').to_string()
    };

    let decoded = percent_decode_str(&url_rel).decode_utf8_lossy().into_owned();
    Some(root.join(decoded))
}
