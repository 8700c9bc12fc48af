//! Runs the configured script interpreter as a child process and captures
//! its standard output as the response body.

use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::RegexBuilder;

/// Interpreter location probed relative to the running binary.
const INTERPRETER_LOCATION: &str = "php/php";

pub struct CgiOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
}

/// Locates the script interpreter once at startup: first next to the
/// running binary, then above the build-output directory when running out
/// of `target/debug` or `target/release`. `None` disables script execution
/// for the lifetime of the server.
pub fn probe_interpreter() -> Option<PathBuf> {
    static BASE_DIR_PATTERN: Lazy<regex::Regex> = Lazy::new(|| {
        RegexBuilder::new(r"^(?P<basedir>.*)/target/(debug|release)(/.*)?$")
            .case_insensitive(true)
            .build()
            .unwrap()
    });

    let exe_dir = env::current_exe().ok()?.parent()?.to_path_buf();

    let candidate = exe_dir.join(INTERPRETER_LOCATION);
    if candidate.is_file() {
        return Some(candidate);
    }

    let exe_dir_str = exe_dir.to_string_lossy().into_owned();
    let caps = BASE_DIR_PATTERN.captures(&exe_dir_str)?;
    let candidate = PathBuf::from(&caps["basedir"]).join(INTERPRETER_LOCATION);
    if candidate.is_file() {
        return Some(candidate);
    }

    None
}

/// Spawns `interpreter script` with the document root as working directory,
/// passing the original request URL and the root through the environment,
/// and blocks until the child exits.
///
/// A non-zero exit code is logged but the captured output is still returned
/// to the caller as the response body.
pub fn execute(
    interpreter: &Path,
    root: &Path,
    script: &Path,
    url: &str,
) -> io::Result<CgiOutput> {
    debug!("[CGI] {} {}", interpreter.display(), script.display());

    let output = Command::new(interpreter)
        .arg(script)
        .current_dir(root)
        .env("REQUEST_URI", url)
        .env("DOCUMENT_ROOT", root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()?;

    if !output.status.success() {
        warn!("[CGI] {} exited with {}", script.display(), output.status);
    }

    Ok(CgiOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn passes_request_url_and_root_through_the_environment() {
        let root = TempDir::new().unwrap();
        let script = root.path().join("env.sh");
        fs::write(&script, "#!/bin/sh\nprintf '%s|%s' \"$REQUEST_URI\" \"$DOCUMENT_ROOT\"\n")
            .unwrap();

        let out = execute(Path::new("/bin/sh"), root.path(), &script, "/env.sh?x=1").unwrap();
        assert_eq!(out.exit_code, Some(0));
        let expected = format!("/env.sh?x=1|{}", root.path().display());
        assert_eq!(out.stdout, expected);
    }

    #[test]
    fn runs_with_the_document_root_as_working_directory() {
        let root = TempDir::new().unwrap();
        let script = root.path().join("cwd.sh");
        fs::write(&script, "#!/bin/sh\npwd\n").unwrap();

        let out = execute(Path::new("/bin/sh"), root.path(), &script, "/cwd.sh").unwrap();
        let cwd = PathBuf::from(out.stdout.trim());
        assert_eq!(
            cwd.canonicalize().unwrap(),
            root.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn nonzero_exit_still_returns_captured_output() {
        let root = TempDir::new().unwrap();
        let script = root.path().join("fail.sh");
        fs::write(&script, "#!/bin/sh\necho partial output\nexit 3\n").unwrap();

        let out = execute(Path::new("/bin/sh"), root.path(), &script, "/fail.sh").unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stdout, "partial output\n");
    }

    #[test]
    fn missing_interpreter_is_an_error() {
        let root = TempDir::new().unwrap();
        let script = root.path().join("x.sh");
        fs::write(&script, "").unwrap();
        assert!(execute(Path::new("/no/such/interpreter"), root.path(), &script, "/x.sh").is_err());
    }
}
