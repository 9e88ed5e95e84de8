//! Chunk layout and the chunk upload worker pool.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, mpsc};
use std::thread;

use appdrop_distribution::{DistributionApi, ProtocolStep, UploadTarget};
use appdrop_retry::{Deadline, RetryExecutor, RetryStrategyConfig};

use crate::Reporter;
use crate::upload::UploadError;

/// One chunk of the artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    /// Server-assigned number the chunk is uploaded under
    pub chunk_number: u32,
    /// `[i * chunk_size, (i + 1) * chunk_size)`
    pub declared: Range<u64>,
    /// Declared range clamped to the file length
    pub read: Range<u64>,
}

/// Lay out `chunk_numbers` over a file of `file_len` bytes.
///
/// `chunk_size` must be nonzero.
pub fn plan_chunks(file_len: u64, chunk_size: u64, chunk_numbers: &[u32]) -> Vec<ChunkPlan> {
    chunk_numbers
        .iter()
        .enumerate()
        .map(|(i, &chunk_number)| {
            let start = (i as u64).saturating_mul(chunk_size);
            let end = start.saturating_add(chunk_size);
            ChunkPlan {
                chunk_number,
                declared: start..end,
                read: start.min(file_len)..end.min(file_len),
            }
        })
        .collect()
}

/// Read `range` of the artifact at `path`.
pub fn read_chunk(path: &Path, range: &Range<u64>) -> io::Result<Vec<u8>> {
    let len = range.end.saturating_sub(range.start);
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(range.start))?;

    let mut bytes = Vec::with_capacity(usize::try_from(len).unwrap_or_default());
    file.take(len).read_to_end(&mut bytes)?;
    if bytes.len() as u64 != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("artifact ended before byte {}", range.end),
        ));
    }
    Ok(bytes)
}

pub(crate) struct ChunkJob<'a> {
    pub target: &'a UploadTarget,
    pub artifact: &'a Path,
    pub plans: &'a [ChunkPlan],
    pub concurrency: usize,
    pub retry: &'a RetryStrategyConfig,
    pub deadline: Deadline,
}

enum ChunkEvent {
    Uploaded { chunk_number: u32, bytes: u64 },
    Retrying { chunk_number: u32, attempt: u32 },
}

/// Upload every planned chunk on up to `concurrency` workers.
///
/// The first failure stops workers from picking up further chunks and is
/// returned once in-flight chunks have finished.
pub(crate) fn upload_chunks<A: DistributionApi>(
    api: &A,
    job: &ChunkJob<'_>,
    reporter: &mut dyn Reporter,
) -> Result<(), UploadError> {
    let total = job.plans.len();
    let workers = job.concurrency.clamp(1, total.max(1));
    let next = AtomicUsize::new(0);
    let cancelled = AtomicBool::new(false);
    let failure: Mutex<Option<UploadError>> = Mutex::new(None);
    let (tx, rx) = mpsc::channel::<ChunkEvent>();

    thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let (next, cancelled, failure) = (&next, &cancelled, &failure);
            scope.spawn(move || {
                while !cancelled.load(Ordering::SeqCst) {
                    let idx = next.fetch_add(1, Ordering::SeqCst);
                    let Some(plan) = job.plans.get(idx) else {
                        break;
                    };
                    match send_chunk(api, job, plan, &tx, cancelled) {
                        Ok(()) => {
                            let _ = tx.send(ChunkEvent::Uploaded {
                                chunk_number: plan.chunk_number,
                                bytes: plan.read.end - plan.read.start,
                            });
                        }
                        Err(err) => {
                            cancelled.store(true, Ordering::SeqCst);
                            let mut slot = failure.lock().unwrap_or_else(|e| e.into_inner());
                            slot.get_or_insert(err);
                            break;
                        }
                    }
                }
            });
        }
        drop(tx);

        let mut done = 0;
        for event in rx {
            match event {
                ChunkEvent::Uploaded {
                    chunk_number,
                    bytes,
                } => {
                    done += 1;
                    reporter.info(&format!(
                        "uploaded chunk {chunk_number} ({bytes} bytes), {done}/{total}"
                    ));
                }
                ChunkEvent::Retrying {
                    chunk_number,
                    attempt,
                } => {
                    reporter.warn(&format!(
                        "retrying chunk {chunk_number} (attempt {attempt})"
                    ));
                }
            }
        }
    });

    match failure.into_inner().unwrap_or_else(|e| e.into_inner()) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn send_chunk<A: DistributionApi>(
    api: &A,
    job: &ChunkJob<'_>,
    plan: &ChunkPlan,
    events: &mpsc::Sender<ChunkEvent>,
    cancelled: &AtomicBool,
) -> Result<(), UploadError> {
    if job.deadline.is_expired() {
        return Err(UploadError::TimedOut {
            step: ProtocolStep::UploadChunk,
        });
    }

    let bytes = read_chunk(job.artifact, &plan.read).map_err(|source| UploadError::Artifact {
        path: job.artifact.to_path_buf(),
        source,
    })?;

    RetryExecutor::new(job.retry.clone()).run_within(
        job.deadline,
        |attempt| {
            if attempt > 1 {
                let _ = events.send(ChunkEvent::Retrying {
                    chunk_number: plan.chunk_number,
                    attempt,
                });
            }
            api.upload_chunk(job.target, plan.chunk_number, bytes.clone())
                .map_err(UploadError::from)
        },
        |err| err.is_transient() && !cancelled.load(Ordering::SeqCst),
        || UploadError::TimedOut {
            step: ProtocolStep::UploadChunk,
        },
    )
}
