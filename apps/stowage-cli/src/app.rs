//! Application orchestrator: wires the archive job, progress and prompts.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use stowage_archive::ArchiveFormat;
use stowage_file_ops::{FileHandle, FileSet, LocalFile};
use stowage_job::{ArchiveJob, JobContext, JobHandle, JobOutcome, decision_channel};
use stowage_transfer::{ProgressMonitor, ProgressSource, TransferProgress};

use crate::prompt::{self, Policies};

/// Everything needed to run one archive job.
#[derive(Debug, Clone)]
pub struct Plan {
    pub sources: Vec<PathBuf>,
    pub base: Option<PathBuf>,
    pub output: PathBuf,
    pub format: ArchiveFormat,
    pub comment: Option<String>,
    pub throughput_limit: u64,
    pub buffer_size: usize,
    pub progress_interval: Duration,
    pub policies: Policies,
    pub json: bool,
}

/// Formats a one-line progress report.
pub fn render_progress(p: &TransferProgress) -> String {
    let mut line = format!("{} | {}", p.status, human_bytes(p.total_bytes));
    if p.current_file_size > 0 {
        line.push_str(&format!(" | {:.0}%", p.file_percent_done() * 100.0));
    }
    if p.bytes_per_second > 0.0 {
        line.push_str(&format!(" | {}/s", human_bytes(p.bytes_per_second as u64)));
    }
    if p.failures > 0 {
        line.push_str(&format!(" | {} skipped", p.failures));
    }
    line
}

pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn file_set(plan: &Plan) -> anyhow::Result<FileSet> {
    let mut files: Vec<Arc<dyn FileHandle>> = Vec::with_capacity(plan.sources.len());
    for source in &plan.sources {
        let file = LocalFile::handle(source);
        if !file.exists() {
            anyhow::bail!("source not found: {}", source.display());
        }
        files.push(file);
    }
    Ok(match &plan.base {
        Some(base) => FileSet::new(LocalFile::handle(base), files),
        None => FileSet::from_files(files),
    })
}

/// Runs the archive job until it stops.
pub async fn run(plan: Plan) -> anyhow::Result<JobOutcome> {
    let files = file_set(&plan)?;
    tracing::info!(
        files = files.len(),
        base = %files.base_folder_path(),
        output = %plan.output.display(),
        format = %plan.format,
        "archiving"
    );

    let monitor = ProgressMonitor::new(Some(plan.progress_interval));
    let (provider, mut decisions) = decision_channel();
    let context = JobContext::new(Arc::new(provider))
        .with_updates(monitor.control())
        .with_throughput_limit(plan.throughput_limit)
        .with_buffer_size(plan.buffer_size);
    let job = ArchiveJob::new(
        files,
        LocalFile::handle(&plan.output),
        plan.format,
        plan.comment.clone(),
        context,
    );
    let handle = Arc::new(JobHandle::spawn(Arc::new(job)).context("cannot start job")?);

    let json = plan.json;
    monitor.on_progress(Box::new(move |p: TransferProgress| {
        if json {
            if let Ok(line) = serde_json::to_string(&p) {
                println!("{line}");
            }
        } else {
            eprint!("\r\x1b[2K{}", render_progress(&p));
            let _ = std::io::stderr().flush();
        }
    }));
    monitor.track(handle.clone());
    monitor.start();

    let joiner = {
        let handle = Arc::clone(&handle);
        tokio::task::spawn_blocking(move || handle.join())
    };
    tokio::pin!(joiner);

    let outcome = loop {
        tokio::select! {
            joined = &mut joiner => break joined.context("job runner failed")??,
            Some(pending) = decisions.recv() => {
                let request = pending.request().clone();
                let response = match plan.policies.auto_answer(&request) {
                    Some(response) => response,
                    None => tokio::task::spawn_blocking(move || prompt::ask(&request))
                        .await
                        .context("prompt failed")??,
                };
                tracing::debug!(action = ?response.action, "decision answered");
                pending.respond(response);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("SIGINT received, interrupting job");
                handle.interrupt();
            }
        }
    };

    monitor.stop();
    monitor.notify_progress(&handle.id());
    if !json {
        eprintln!();
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CollisionPolicy, ErrorPolicy};
    use std::io::{Cursor, Read};
    use stowage_transfer::TransferState;

    fn plan(tmp: &std::path::Path, format: ArchiveFormat, output: &str) -> Plan {
        let src = tmp.join("src");
        std::fs::create_dir_all(src.join("dir")).unwrap();
        std::fs::write(src.join("a.txt"), b"0123456789").unwrap();
        std::fs::write(src.join("dir/b.txt"), b"abcde").unwrap();
        Plan {
            sources: vec![src.join("a.txt"), src.join("dir")],
            base: None,
            output: tmp.join(output),
            format,
            comment: Some("cli".into()),
            throughput_limit: 0,
            buffer_size: 1024,
            progress_interval: Duration::from_millis(20),
            policies: Policies {
                on_collision: CollisionPolicy::Cancel,
                on_error: ErrorPolicy::Skip,
            },
            json: true,
        }
    }

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(2048), "2.0 KiB");
        assert_eq!(human_bytes(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn progress_line() {
        let p = TransferProgress {
            job_id: "j1".into(),
            state: TransferState::Running,
            status: "indexing 'a.txt'".into(),
            current_file: "a.txt".into(),
            current_file_size: 200,
            current_file_bytes: 50,
            total_bytes: 2048,
            files_processed: 1,
            failures: 2,
            bytes_per_second: 0.0,
            elapsed_ms: 10,
            end_date: 0,
        };
        assert_eq!(
            render_progress(&p),
            "indexing 'a.txt' | 2.0 KiB | 25% | 2 skipped"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn archives_to_zip() {
        let tmp = tempfile::tempdir().unwrap();
        let plan = plan(tmp.path(), ArchiveFormat::Zip, "out.zip");
        let output = plan.output.clone();

        let outcome = run(plan).await.unwrap();
        assert_eq!(outcome.state, TransferState::Finished);
        assert_eq!(outcome.total_bytes, 15);

        let bytes = std::fs::read(output).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut content = String::new();
        archive
            .by_name("a.txt")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "0123456789");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn collision_policy_cancels() {
        let tmp = tempfile::tempdir().unwrap();
        let plan = plan(tmp.path(), ArchiveFormat::Zip, "out.zip");
        std::fs::write(&plan.output, b"keep me").unwrap();
        let output = plan.output.clone();

        let outcome = run(plan).await.unwrap();
        assert_eq!(outcome.state, TransferState::Interrupted);
        assert_eq!(std::fs::read(output).unwrap(), b"keep me");
    }

    #[tokio::test]
    async fn missing_source_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut plan = plan(tmp.path(), ArchiveFormat::Tar, "out.tar");
        plan.sources.push(tmp.path().join("nope"));
        let err = run(plan).await.unwrap_err();
        assert!(err.to_string().contains("source not found"));
    }
}
