//! Archive extraction through an external decompression tool
//!
//! The tool is located once per process: a short list of well-known
//! install locations is probed, and if none exists the bare tool name is
//! left for the OS search path to resolve at spawn time.

use crate::errors::{LauncherError, Result};
use crate::storage::workspace::clear_dir;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::process::Command;

/// Tool name used when no probed location exists
pub const TOOL_NAME: &str = "7z";

#[cfg(windows)]
const PROBE_PATHS: &[&str] = &[
    r"C:\Program Files\7-Zip\7z.exe",
    r"C:\Program Files (x86)\7-Zip\7z.exe",
];

#[cfg(not(windows))]
const PROBE_PATHS: &[&str] = &[
    "/usr/bin/7z",
    "/usr/local/bin/7z",
    "/usr/bin/7za",
    "/opt/homebrew/bin/7z",
];

static DISCOVERED: OnceLock<ExtractorHandle> = OnceLock::new();

/// How the extractor program was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorOrigin {
    /// Found at one of the well-known install locations
    Probed,
    /// Invoked by name, resolved through `PATH`
    SearchPath,
    /// Supplied by configuration
    Explicit,
}

impl std::fmt::Display for ExtractorOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractorOrigin::Probed => write!(f, "probed"),
            ExtractorOrigin::SearchPath => write!(f, "search-path"),
            ExtractorOrigin::Explicit => write!(f, "explicit"),
        }
    }
}

/// Resolved decompression tool
///
/// The tool is called as `<program> [leading args] x <archive> -o<dest> -y [-p<password>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorHandle {
    program: PathBuf,
    leading_args: Vec<String>,
    origin: ExtractorOrigin,
}

impl ExtractorHandle {
    /// Use a specific program
    pub fn explicit(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            leading_args: Vec::new(),
            origin: ExtractorOrigin::Explicit,
        }
    }

    /// Arguments placed before the extraction arguments (e.g. a wrapper script for an interpreter)
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Probe the platform's well-known locations.
    pub fn discover() -> Self {
        let candidates: Vec<&Path> = PROBE_PATHS.iter().map(Path::new).collect();
        Self::probe(&candidates)
    }

    /// First existing candidate wins; otherwise fall back to the bare tool name.
    pub fn probe(candidates: &[&Path]) -> Self {
        for candidate in candidates {
            if candidate.is_file() {
                return Self {
                    program: candidate.to_path_buf(),
                    leading_args: Vec::new(),
                    origin: ExtractorOrigin::Probed,
                };
            }
        }

        Self {
            program: PathBuf::from(TOOL_NAME),
            leading_args: Vec::new(),
            origin: ExtractorOrigin::SearchPath,
        }
    }

    /// Process-wide discovery result, probed on first use.
    pub fn shared() -> &'static ExtractorHandle {
        DISCOVERED.get_or_init(|| {
            let handle = Self::discover();
            info!(
                "Using extractor {} ({})",
                handle.program.display(),
                handle.origin
            );
            handle
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn origin(&self) -> ExtractorOrigin {
        self.origin
    }

    fn command(&self, archive: &Path, dest: &Path, password: Option<&str>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args)
            .arg("x")
            .arg(archive)
            .arg(format!("-o{}", dest.display()))
            .arg("-y");

        if let Some(password) = password.filter(|p| !p.is_empty()) {
            cmd.arg(format!("-p{}", password));
        }

        // No interactive password prompt: a missing password must fail, not hang.
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Unpack `archive` into `dest`, waiting for the tool to finish.
    ///
    /// An empty password means the archive is not encrypted. On failure
    /// `dest` is emptied so no partial bundle survives, and the tool's own
    /// message is returned.
    pub async fn extract(&self, archive: &Path, dest: &Path, password: Option<&str>) -> Result<()> {
        debug!(
            "Extracting {} into {} with {}",
            archive.display(),
            dest.display(),
            self.program.display()
        );

        let output = self
            .command(archive, dest, password)
            .output()
            .await
            .map_err(|e| {
                LauncherError::Extraction(format!(
                    "Failed to run {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            stderr
        };
        let message = if message.is_empty() {
            format!("{} exited with {}", self.program.display(), output.status)
        } else {
            message
        };

        if let Err(e) = clear_dir(dest) {
            warn!("Could not discard partial extraction: {}", e);
        }

        Err(LauncherError::Extraction(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    /// Stand-in for the real tool: writes a partial file, then insists on password "secret".
    const FAKE_TOOL: &str = r#"
dest=""
pw=""
for a in "$@"; do
  case "$a" in
    -o*) dest="${a#-o}" ;;
    -p*) pw="${a#-p}" ;;
  esac
done
mkdir -p "$dest/bot"
echo partial > "$dest/bot/partial.js"
if [ "$pw" != "secret" ]; then
  echo "ERROR: Wrong password : bundle.zip" >&2
  exit 2
fi
echo "console.log('ready')" > "$dest/bot/index.js"
"#;

    fn fake_extractor(dir: &Path) -> ExtractorHandle {
        let script = dir.join("fake-7z.sh");
        fs::write(&script, FAKE_TOOL).unwrap();
        ExtractorHandle::explicit("sh").with_leading_args([script.to_string_lossy().into_owned()])
    }

    #[test]
    fn probe_falls_back_to_search_path() {
        let handle = ExtractorHandle::probe(&[Path::new("/nonexistent/7z")]);
        assert_eq!(handle.origin(), ExtractorOrigin::SearchPath);
        assert_eq!(handle.program(), Path::new(TOOL_NAME));
    }

    #[test]
    fn probe_takes_first_existing_candidate() {
        let tmp = tempdir().unwrap();
        let first = tmp.path().join("a-7z");
        let second = tmp.path().join("b-7z");
        fs::write(&second, b"").unwrap();
        fs::write(&first, b"").unwrap();

        let handle = ExtractorHandle::probe(&[
            Path::new("/nonexistent/7z"),
            first.as_path(),
            second.as_path(),
        ]);
        assert_eq!(handle.origin(), ExtractorOrigin::Probed);
        assert_eq!(handle.program(), first.as_path());
    }

    #[test]
    fn shared_handle_is_cached() {
        let a = ExtractorHandle::shared();
        let b = ExtractorHandle::shared();
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn command_includes_password_only_when_present() {
        let handle = ExtractorHandle::explicit("/usr/bin/7z");
        let with = handle.command(Path::new("a.zip"), Path::new("out"), Some("pw"));
        let args: Vec<String> = with
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, vec!["x", "a.zip", "-oout", "-y", "-ppw"]);

        let without = handle.command(Path::new("a.zip"), Path::new("out"), Some(""));
        assert_eq!(without.as_std().get_args().count(), 4);
    }

    #[tokio::test]
    async fn extract_with_correct_password() {
        let tmp = tempdir().unwrap();
        let dest = tmp.path().join("extracted");
        fs::create_dir_all(&dest).unwrap();
        let handle = fake_extractor(tmp.path());

        handle
            .extract(&tmp.path().join("bundle.zip"), &dest, Some("secret"))
            .await
            .unwrap();
        assert!(dest.join("bot/index.js").exists());
    }

    #[tokio::test]
    async fn wrong_password_fails_and_leaves_nothing_behind() {
        let tmp = tempdir().unwrap();
        let dest = tmp.path().join("extracted");
        fs::create_dir_all(&dest).unwrap();
        let handle = fake_extractor(tmp.path());

        let err = handle
            .extract(&tmp.path().join("bundle.zip"), &dest, Some("guess"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "extraction");
        assert!(err.to_string().contains("Wrong password"));
        assert!(dest.exists());
        assert_eq!(fs::read_dir(&dest).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_tool_is_an_extraction_error() {
        let tmp = tempdir().unwrap();
        let handle = ExtractorHandle::explicit(tmp.path().join("no-such-tool"));

        let err = handle
            .extract(&tmp.path().join("bundle.zip"), tmp.path(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "extraction");
        assert!(err.to_string().contains("Failed to run"));
    }
}
