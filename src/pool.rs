// Copyright 2026 Shardsearch Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bounded worker pool owned by a dispatcher.
//!
//! Each pool wraps its own `rayon::ThreadPool`; nothing here touches rayon's
//! global pool. Dropping the `WorkerPool` lets the workers finish whatever
//! they are running and exit.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::mpsc;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;
use std::time::Instant;

use rayon::ThreadPool;
use rayon::ThreadPoolBuilder;

use crate::error::FanoutError;

#[derive(Debug, PartialEq)]
pub enum JobOutcome<T> {
    Done(T),
    Panicked(String),
    TimedOut,
}

pub struct WorkerPool {
    pool: ThreadPool,
    size: usize,
}

impl WorkerPool {
    pub fn new(shard_count: usize, max_threads: usize) -> Result<Self, FanoutError> {
        let size = shard_count.min(max_threads).max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(|i| format!("shard-worker-{i}"))
            .build()
            .map_err(|err| FanoutError::Pool(err.to_string()))?;
        Ok(Self { pool, size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Runs `task(i)` for every `i in 0..jobs` and blocks until all of them
    /// report. Outcomes come back in job order.
    ///
    /// `deadline` is per job and counts from the moment a worker picks the
    /// job up, so time spent queued behind other jobs does not count. A job
    /// that never starts is given up on once every wave of the pool could
    /// have used its full deadline. Jobs reported as `TimedOut` are left to
    /// finish on their worker; their results are dropped.
    pub fn scatter<T, F>(
        &self,
        jobs: usize,
        deadline: Option<Duration>,
        task: F,
    ) -> Vec<JobOutcome<T>>
    where
        T: Send + 'static,
        F: Fn(usize) -> T + Send + Sync + 'static,
    {
        let task = Arc::new(task);
        let (tx, rx) = mpsc::channel::<JobEvent<T>>();
        for index in 0..jobs {
            let task = Arc::clone(&task);
            let tx = tx.clone();
            self.pool.spawn(move || {
                // Sends fail only when the caller already gave up waiting.
                let _ = tx.send(JobEvent::Started(index, Instant::now()));
                let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| task(index))) {
                    Ok(value) => JobOutcome::Done(value),
                    Err(payload) => JobOutcome::Panicked(panic_message(payload.as_ref())),
                };
                let _ = tx.send(JobEvent::Finished(index, outcome));
            });
        }
        drop(tx);

        let mut outcomes: Vec<Option<JobOutcome<T>>> = (0..jobs).map(|_| None).collect();
        let mut started: Vec<Option<Instant>> = vec![None; jobs];
        let mut pending = jobs;

        let Some(limit) = deadline else {
            while pending > 0 {
                let Ok(event) = rx.recv() else {
                    break;
                };
                record(event, &mut started, &mut outcomes, &mut pending);
            }
            return finish(outcomes);
        };

        let waves = u32::try_from(jobs.div_ceil(self.size)).unwrap_or(u32::MAX);
        let queue_deadline = Instant::now() + limit.saturating_mul(waves);
        while pending > 0 {
            let now = Instant::now();
            for index in 0..jobs {
                if outcomes[index].is_some() {
                    continue;
                }
                let expired = match started[index] {
                    Some(at) => now >= at + limit,
                    None => now >= queue_deadline,
                };
                if expired {
                    outcomes[index] = Some(JobOutcome::TimedOut);
                    pending -= 1;
                }
            }
            if pending == 0 {
                break;
            }

            let next_expiry = (0..jobs)
                .filter(|&index| outcomes[index].is_none())
                .map(|index| match started[index] {
                    Some(at) => at + limit,
                    None => queue_deadline,
                })
                .min()
                .unwrap_or(queue_deadline);
            match rx.recv_timeout(next_expiry.saturating_duration_since(now)) {
                Ok(event) => record(event, &mut started, &mut outcomes, &mut pending),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        finish(outcomes)
    }
}

enum JobEvent<T> {
    Started(usize, Instant),
    Finished(usize, JobOutcome<T>),
}

fn record<T>(
    event: JobEvent<T>,
    started: &mut [Option<Instant>],
    outcomes: &mut [Option<JobOutcome<T>>],
    pending: &mut usize,
) {
    match event {
        JobEvent::Started(index, at) => started[index] = Some(at),
        JobEvent::Finished(index, outcome) => {
            // A job already given up on keeps its TimedOut outcome.
            if outcomes[index].is_none() {
                outcomes[index] = Some(outcome);
                *pending -= 1;
            }
        }
    }
}

fn finish<T>(outcomes: Vec<Option<JobOutcome<T>>>) -> Vec<JobOutcome<T>> {
    outcomes
        .into_iter()
        .map(|outcome| outcome.unwrap_or(JobOutcome::TimedOut))
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
