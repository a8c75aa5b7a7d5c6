//! Document conversion to PDF
//!
//! Conversion is best effort. A [`Transcoder`] never fails: it runs its
//! stages and reports where the result should be. Whether conversion worked
//! is decided by the caller from the existence of that file alone.

use async_trait::async_trait;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::config::TranscoderConfig;
use crate::naming;

/// Extension of the portable target format
pub const PORTABLE_EXTENSION: &str = "pdf";

/// File name of the final, compressed output inside the output directory
pub const COMPRESSED_OUTPUT: &str = "compressed.pdf";

/// Whether `name` already is in the portable format (extension compared
/// case-insensitively)
pub fn is_portable(name: &str) -> bool {
    naming::extension(name).is_some_and(|ext| ext.eq_ignore_ascii_case(PORTABLE_EXTENSION))
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Convert `source`, writing into `out_dir`
    ///
    /// Returns the path the converted file is expected at. The path may not
    /// exist afterwards.
    async fn transcode(&self, source: &Path, out_dir: &Path) -> PathBuf;
}

/// Directory inside the output directory that holds the converter profile
pub const PROFILE_DIR_NAME: &str = "profile";

/// `-env:UserInstallation=file://<out_dir>/profile`
///
/// Office suites lock their user profile; two conversions sharing one fail
/// or hand off to each other. A profile per output directory keeps them
/// apart and is removed together with it.
pub fn profile_arg(out_dir: &Path) -> io::Result<OsString> {
    let profile = std::path::absolute(out_dir.join(PROFILE_DIR_NAME))?;
    let url_path = profile
        .to_string_lossy()
        .replace('%', "%25")
        .replace(' ', "%20");
    Ok(OsString::from(format!("-env:UserInstallation=file://{url_path}")))
}

/// Two-stage converter: an office suite renders the document to PDF, then a
/// PostScript tool recompresses it
///
/// At most `max_concurrent` conversions run at once; callers queue on
/// [`Transcoder::transcode`].
pub struct OfficeTranscoder {
    config: TranscoderConfig,
    slots: Semaphore,
}

impl OfficeTranscoder {
    pub fn new(config: TranscoderConfig) -> Self {
        let slots = Semaphore::new(config.max_concurrent.max(1));
        Self { config, slots }
    }

    /// Arguments of the convert stage
    pub fn convert_args(&self, source: &Path, out_dir: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.config.convert_args.iter().map(OsString::from).collect();
        if self.config.isolate_profile {
            match profile_arg(out_dir) {
                Ok(arg) => args.push(arg),
                Err(e) => {
                    warn!(error = %e, out_dir = %out_dir.display(), "Cannot resolve converter profile path, using the shared profile");
                },
            }
        }
        args.push(source.as_os_str().to_os_string());
        args.push(OsString::from("--outdir"));
        args.push(out_dir.as_os_str().to_os_string());
        args
    }

    /// Run one stage to completion or until the stage timeout
    ///
    /// Exit status is logged only.
    async fn run_stage(&self, stage: &str, program: &str, args: Vec<OsString>) {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match timeout(self.config.stage_timeout(), command.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                debug!(stage, program, "Conversion stage finished");
            },
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(
                    stage,
                    program,
                    status = %output.status,
                    stderr = %stderr.trim(),
                    "Conversion stage exited unsuccessfully"
                );
            },
            Ok(Err(e)) => {
                warn!(stage, program, error = %e, "Failed to start conversion stage");
            },
            Err(_) => {
                warn!(
                    stage,
                    program,
                    timeout_secs = self.config.stage_timeout_secs,
                    "Conversion stage timed out and was killed"
                );
            },
        }
    }
}

#[async_trait]
impl Transcoder for OfficeTranscoder {
    #[instrument(skip(self, source, out_dir), fields(source = %source.display()))]
    async fn transcode(&self, source: &Path, out_dir: &Path) -> PathBuf {
        let stem = source.file_stem().unwrap_or(source.as_os_str());
        let intermediate = out_dir.join(Path::new(stem).with_extension(PORTABLE_EXTENSION));
        let output = out_dir.join(COMPRESSED_OUTPUT);

        // The semaphore is never closed.
        let _slot = self.slots.acquire().await.ok();

        let convert_args = self.convert_args(source, out_dir);
        self.run_stage("convert", &self.config.convert_program, convert_args)
            .await;

        // Runs even when the first stage failed; a missing intermediate just
        // leaves no output behind.
        let mut compress_args: Vec<OsString> =
            self.config.compress_args.iter().map(OsString::from).collect();
        compress_args.push(intermediate.into_os_string());
        compress_args.push(output.clone().into_os_string());
        self.run_stage("compress", &self.config.compress_program, compress_args)
            .await;

        output
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_is_portable() {
        assert!(is_portable("item1_2.pdf"));
        assert!(is_portable("item1_2 notes.PDF"));
        assert!(!is_portable("item1_2.docx"));
        assert!(!is_portable("pdf"));
    }

    #[tokio::test]
    async fn test_missing_programs_leave_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("transcode_in.docx");
        std::fs::write(&source, b"not really a document").unwrap();

        let transcoder = OfficeTranscoder::new(TranscoderConfig {
            convert_program: "docsync-test-no-such-converter".to_string(),
            compress_program: "docsync-test-no-such-compressor".to_string(),
            ..TranscoderConfig::default()
        });

        let output = transcoder.transcode(&source, dir.path()).await;
        assert_eq!(output, dir.path().join(COMPRESSED_OUTPUT));
        assert!(!output.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_second_stage_runs_after_first_stage_failure() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("transcode_in.docx");
        std::fs::write(&source, b"doc").unwrap();

        // `false` fails the first stage; `cp <intermediate> <output>` would
        // produce output only if the intermediate exists, so pre-create it.
        std::fs::write(dir.path().join("transcode_in.pdf"), b"%PDF").unwrap();
        let transcoder = OfficeTranscoder::new(TranscoderConfig {
            convert_program: "false".to_string(),
            convert_args: vec![],
            compress_program: "cp".to_string(),
            compress_args: vec![],
            stage_timeout_secs: 10,
            ..TranscoderConfig::default()
        });

        let output = transcoder.transcode(&source, dir.path()).await;
        assert_eq!(std::fs::read(output).unwrap(), b"%PDF");
    }

    #[test]
    fn test_convert_args_use_private_profile() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("transcode_in.docx");
        let transcoder = OfficeTranscoder::new(TranscoderConfig::default());

        let args = transcoder.convert_args(&source, dir.path());
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();

        assert_eq!(&args[..2], &["--convert-to", "pdf:writer_pdf_Export"]);
        let profile = &args[2];
        assert!(profile.starts_with("-env:UserInstallation=file:///"), "{profile}");
        assert!(profile.ends_with(&format!("/{PROFILE_DIR_NAME}")), "{profile}");
        assert!(profile.contains(dir.path().to_string_lossy().as_ref()), "{profile}");
        assert_eq!(
            &args[3..],
            &[
                source.to_string_lossy().into_owned(),
                "--outdir".to_string(),
                dir.path().to_string_lossy().into_owned(),
            ]
        );
    }

    #[test]
    fn test_scratch_directories_get_distinct_profiles() {
        let a = profile_arg(Path::new("run/candidate-a")).unwrap();
        let b = profile_arg(Path::new("run/candidate-b")).unwrap();
        assert_ne!(a, b);

        let spaced = profile_arg(Path::new("/tmp/work dir/candidate-a")).unwrap();
        assert_eq!(
            spaced,
            OsString::from("-env:UserInstallation=file:///tmp/work%20dir/candidate-a/profile")
        );
    }

    #[test]
    fn test_profile_isolation_can_be_disabled() {
        let transcoder = OfficeTranscoder::new(TranscoderConfig {
            isolate_profile: false,
            ..TranscoderConfig::default()
        });
        let args = transcoder.convert_args(Path::new("in.docx"), Path::new("out"));
        assert!(args
            .iter()
            .all(|a| !a.to_string_lossy().starts_with("-env:UserInstallation")));
        assert_eq!(args.len(), 5);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_concurrent_conversions_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let lock = dir.path().join("converter.lock");

        // The fake converter refuses to run while another instance holds the
        // lock directory, like an office suite sharing one profile.
        let script = r#"mkdir "$1" || exit 1; sleep 0.3; rmdir "$1"; cp "$2" "$4/transcode_in.pdf""#;
        let transcoder = OfficeTranscoder::new(TranscoderConfig {
            convert_program: "sh".to_string(),
            convert_args: vec![
                "-c".to_string(),
                script.to_string(),
                "sh".to_string(),
                lock.to_string_lossy().into_owned(),
            ],
            compress_program: "cp".to_string(),
            compress_args: vec![],
            stage_timeout_secs: 10,
            isolate_profile: false,
            max_concurrent: 1,
        });

        let mut jobs = Vec::new();
        for i in 0..3 {
            let out_dir = dir.path().join(format!("candidate-{i}"));
            std::fs::create_dir(&out_dir).unwrap();
            let source = out_dir.join("transcode_in.docx");
            std::fs::write(&source, format!("doc {i}")).unwrap();
            jobs.push((source, out_dir));
        }

        let outputs = futures::future::join_all(
            jobs.iter()
                .map(|(source, out_dir)| transcoder.transcode(source, out_dir)),
        )
        .await;

        for (i, output) in outputs.iter().enumerate() {
            assert_eq!(std::fs::read(output).unwrap(), format!("doc {i}").into_bytes());
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timed_out_stage_is_killed_and_next_stage_runs() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("transcode_in.docx");
        std::fs::write(&source, b"doc").unwrap();
        std::fs::write(dir.path().join("transcode_in.pdf"), b"%PDF").unwrap();

        let transcoder = OfficeTranscoder::new(TranscoderConfig {
            convert_program: "sh".to_string(),
            // Appended arguments become positional parameters of the script
            convert_args: vec!["-c".to_string(), "sleep 5".to_string(), "sh".to_string()],
            compress_program: "cp".to_string(),
            compress_args: vec![],
            stage_timeout_secs: 1,
            ..TranscoderConfig::default()
        });

        let started = std::time::Instant::now();
        let output = transcoder.transcode(&source, dir.path()).await;

        assert!(started.elapsed() < std::time::Duration::from_secs(4));
        assert_eq!(std::fs::read(output).unwrap(), b"%PDF");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timed_out_stages_leave_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("transcode_in.docx");
        std::fs::write(&source, b"doc").unwrap();

        let hang = vec!["-c".to_string(), "sleep 5".to_string(), "sh".to_string()];
        let transcoder = OfficeTranscoder::new(TranscoderConfig {
            convert_program: "sh".to_string(),
            convert_args: hang.clone(),
            compress_program: "sh".to_string(),
            compress_args: hang,
            stage_timeout_secs: 1,
            ..TranscoderConfig::default()
        });

        let started = std::time::Instant::now();
        let output = transcoder.transcode(&source, dir.path()).await;

        assert!(started.elapsed() < std::time::Duration::from_secs(4));
        assert!(!output.exists());
    }
}
