//! Off-tick SHA-1 verification (spec §5: "the main task does not block on
//! [hasher] computations"). The tick loop submits jobs and polls for
//! finished ones on a later tick; the actual parallelism lives here, not in
//! `Torrent`.

use std::thread;

use bt_sha1w::Sha1Digest;

pub struct HashJob {
    pub info_hash: bt_core::InfoHash,
    pub piece_index: u32,
    pub data: Vec<u8>,
}

pub struct HashResult {
    pub info_hash: bt_core::InfoHash,
    pub piece_index: u32,
    pub digest: Sha1Digest,
}

pub struct HasherPool {
    job_tx: crossbeam_channel::Sender<HashJob>,
    result_rx: crossbeam_channel::Receiver<HashResult>,
    _workers: Vec<thread::JoinHandle<()>>,
}

impl HasherPool {
    pub fn new(worker_count: usize) -> Self {
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<HashJob>();
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<HashResult>();

        let workers = (0..worker_count.max(1))
            .map(|worker_id| {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                thread::Builder::new()
                    .name(format!("bt-hasher-{worker_id}"))
                    .spawn(move || {
                        for job in job_rx {
                            let digest = bt_sha1w::sha1(&job.data);
                            let _ = result_tx.send(HashResult {
                                info_hash: job.info_hash,
                                piece_index: job.piece_index,
                                digest,
                            });
                        }
                    })
                    .expect("spawning a hasher worker thread")
            })
            .collect();

        Self {
            job_tx,
            result_rx,
            _workers: workers,
        }
    }

    pub fn submit(&self, job: HashJob) {
        let _ = self.job_tx.send(job);
    }

    /// Drains every result that has completed since the last poll; called
    /// once per tick.
    pub fn poll_completed(&self) -> Vec<HashResult> {
        self.result_rx.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn submitted_job_eventually_yields_a_matching_digest() {
        let pool = HasherPool::new(2);
        let info_hash = bt_core::InfoHash::from_bytes([3u8; 20]);
        pool.submit(HashJob {
            info_hash,
            piece_index: 5,
            data: b"hello world".to_vec(),
        });

        let expected = bt_sha1w::sha1(b"hello world");
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let results = pool.poll_completed();
            if let Some(r) = results.into_iter().find(|r| r.piece_index == 5) {
                assert_eq!(r.digest, expected);
                assert_eq!(r.info_hash, info_hash);
                break;
            }
            assert!(Instant::now() < deadline, "hasher pool did not respond in time");
            thread::sleep(Duration::from_millis(5));
        }
    }
}
