use crate::error::IbsError;
use crate::region::Region;
use crate::table::SimilarityTable;
use log::debug;
use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Per-window pairwise-similarity source. The pipeline only depends on this
/// trait, so tests drive it with scripted tables instead of a subprocess.
pub trait SimilarityOracle: Sync {
    fn query(&self, window: &Region) -> Result<SimilarityTable, IbsError>;
}

/// Invocation settings for the external `impg similarity` process.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// Program name or path, `impg` by default.
    pub bin: String,
    /// Alignment/sequence source handed to the oracle as-is.
    pub sequence_source: String,
    /// Optional list of haplotype names to restrict comparisons to.
    pub subset_list: Option<String>,
    /// Reference assembly label used to build PanSN region strings.
    pub reference: String,
    /// Haplotype index of the reference in PanSN naming, normally 0.
    pub hap_index: u32,
    /// Pass the oracle's large-region override.
    pub force_large: bool,
    /// Wall-clock limit per invocation; the child is killed on expiry.
    pub timeout: Option<Duration>,
}

/// Boundary adapter: one subprocess invocation per window, stdout parsed as
/// a tab-separated table. All failures are reported as
/// `OracleInvocationError` naming the window; the orchestrator decides
/// whether that aborts the run.
pub struct ImpgOracle {
    config: OracleConfig,
}

impl ImpgOracle {
    pub fn new(config: OracleConfig) -> Self {
        ImpgOracle { config }
    }

    /// Haplotype-qualified coordinate label the oracle expects,
    /// e.g. `CHM13#0#chr20:1-5000`.
    pub fn region_label(&self, window: &Region) -> String {
        format!(
            "{}#{}#{}:{}-{}",
            self.config.reference, self.config.hap_index, window.chrom, window.start, window.end
        )
    }

    fn build_command(&self, window: &Region) -> Command {
        let mut cmd = Command::new(&self.config.bin);
        cmd.arg("similarity")
            .arg("-p")
            .arg(&self.config.sequence_source)
            .arg("-r")
            .arg(self.region_label(window));
        if let Some(subset) = &self.config.subset_list {
            cmd.arg("--subset-sequence-list").arg(subset);
        }
        if self.config.force_large {
            cmd.arg("--force-large-region");
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    fn run_with_timeout(&self, window: &Region) -> Result<Vec<u8>, IbsError> {
        let invocation_error = |reason: String| IbsError::OracleInvocation {
            window: window.to_string(),
            reason,
        };

        let mut child = self
            .build_command(window)
            .spawn()
            .map_err(|e| invocation_error(format!("failed to spawn '{}': {e}", self.config.bin)))?;

        // Drain pipes on threads so a chatty child cannot deadlock the
        // try_wait polling loop below.
        let mut stdout_pipe = child.stdout.take().expect("stdout was piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr was piped");
        let stdout_thread = std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stdout_pipe.read_to_end(&mut buf);
            buf
        });
        let stderr_thread = std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stderr_pipe.read_to_end(&mut buf);
            buf
        });

        let deadline = self.config.timeout.map(|t| Instant::now() + t);
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if let Some(deadline) = deadline {
                        if Instant::now() >= deadline {
                            let _ = child.kill();
                            let _ = child.wait();
                            return Err(invocation_error(format!(
                                "timed out after {:?}",
                                self.config.timeout.unwrap()
                            )));
                        }
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(e) => {
                    let _ = child.kill();
                    return Err(invocation_error(format!("wait failed: {e}")));
                }
            }
        };

        let stdout = stdout_thread.join().unwrap_or_default();
        let stderr = stderr_thread.join().unwrap_or_default();

        if !status.success() {
            return Err(invocation_error(format!(
                "exit status {}: {}",
                status,
                String::from_utf8_lossy(&stderr).trim()
            )));
        }

        Ok(stdout)
    }
}

impl SimilarityOracle for ImpgOracle {
    fn query(&self, window: &Region) -> Result<SimilarityTable, IbsError> {
        debug!("Querying oracle for window {window}");
        let stdout = self.run_with_timeout(window)?;
        let text = String::from_utf8_lossy(&stdout);
        SimilarityTable::parse(&text).map_err(|_| IbsError::OracleInvocation {
            window: window.to_string(),
            reason: "oracle produced no tabular output".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(bin: &str, timeout: Option<Duration>) -> OracleConfig {
        OracleConfig {
            bin: bin.to_string(),
            sequence_source: "alignments.paf".to_string(),
            subset_list: Some("haps.txt".to_string()),
            reference: "CHM13".to_string(),
            hap_index: 0,
            force_large: true,
            timeout,
        }
    }

    #[test]
    fn test_region_label_is_pansn_qualified() {
        let oracle = ImpgOracle::new(config("impg", None));
        let window = Region::new("chr20", 1, 5000).unwrap();
        assert_eq!(oracle.region_label(&window), "CHM13#0#chr20:1-5000");
    }

    #[cfg(unix)]
    fn script_oracle(dir: &tempfile::TempDir, body: &str) -> ImpgOracle {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("fake_impg.sh");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\n{body}").unwrap();
        let mut perms = file.metadata().unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();

        ImpgOracle::new(config(
            path.to_str().unwrap(),
            Some(Duration::from_secs(5)),
        ))
    }

    #[cfg(unix)]
    #[test]
    fn test_query_parses_subprocess_output() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = script_oracle(
            &dir,
            "printf 'chrom\\tstart\\tend\\tgroup.a\\tgroup.b\\testimated.identity\\n\
             chr20\\t1\\t5000\\tHG002#1\\tHG003#1\\t0.999\\n'",
        );
        let window = Region::new("chr20", 1, 5000).unwrap();
        let table = oracle.query(&window).unwrap();
        assert_eq!(table.rows().len(), 1);
        assert!(table.column("estimated.identity").is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_is_invocation_error() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = script_oracle(&dir, "echo 'boom' >&2; exit 3");
        let window = Region::new("chr20", 1, 5000).unwrap();
        match oracle.query(&window) {
            Err(IbsError::OracleInvocation { window, reason }) => {
                assert_eq!(window, "chr20:1-5000");
                assert!(reason.contains("boom"));
            }
            other => panic!("expected OracleInvocation, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let mut oracle = script_oracle(&dir, "sleep 10");
        oracle.config.timeout = Some(Duration::from_millis(100));
        let window = Region::new("chr20", 1, 5000).unwrap();
        match oracle.query(&window) {
            Err(IbsError::OracleInvocation { reason, .. }) => {
                assert!(reason.contains("timed out"));
            }
            other => panic!("expected timeout error, got {other:?}"),
        }
    }
}
