//! Signing of many independent documents on a bounded pool of threads.

use log::debug;
use rayon::prelude::*;
use secrecy::SecretString;

use crate::{sign_pdf, Error, Result, SignerConfig};

/// One document to sign. The bundle and passphrase are borrowed, so jobs
/// signed with the same certificate share a single copy of them.
pub struct SigningJob<'a> {
    pub pdf: Vec<u8>,
    pub pkcs12: &'a [u8],
    pub passphrase: &'a SecretString,
}

/// Signs every job with `config`, at most `config.worker_threads` at a time.
///
/// The outer error is only for failing to start the pool. Each job has its own
/// result, in the same order as `jobs`, and a failed job does not affect the
/// others.
pub fn sign_all(jobs: Vec<SigningJob<'_>>, config: &SignerConfig) -> Result<Vec<Result<Vec<u8>>>> {
    config.validate()?;

    let num_threads = config.effective_worker_threads();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .thread_name(|i| format!("sign-pdf-{i}"))
        .build()
        .map_err(|e| Error::WorkerPool(e.to_string()))?;
    debug!("signing {} documents on {num_threads} threads", jobs.len());

    Ok(pool.install(|| {
        jobs.into_par_iter()
            .map(|job| sign_pdf(job.pdf, job.pkcs12, job.passphrase, config))
            .collect()
    }))
}
