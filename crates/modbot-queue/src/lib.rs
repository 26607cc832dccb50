//! Redis-backed job broker.
//!
//! Jobs are JSON payloads on a named list: the bot LPUSHes, workers BLMOVE
//! each payload onto a processing list and remove it only after the job has
//! run (the reliable-queue pattern). A worker that dies mid-job leaves the
//! payload on the processing list, and the next startup moves it back onto
//! the queue, so delivery is at least once: a job may run twice, never zero
//! times.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};

use modbot_core::{
    errors::Error,
    ports::{Job, JobDispatcher, JobHandle},
    Result,
};

fn dispatch_err(e: redis::RedisError) -> Error {
    Error::Dispatch(e.to_string())
}

fn queue_key(queue: &str) -> String {
    format!("modbot:queue:{queue}")
}

fn processing_key(queue: &str) -> String {
    format!("modbot:queue:{queue}:processing")
}

fn decode_payload(payload: &str) -> Option<Job> {
    match serde_json::from_str(payload) {
        Ok(job) => Some(job),
        Err(e) => {
            tracing::warn!("dropping undecodable job payload: {e}");
            None
        }
    }
}

/// Producer side: fire-and-forget enqueue from the request-serving process.
#[derive(Clone)]
pub struct RedisDispatcher {
    manager: ConnectionManager,
    queue: String,
}

impl RedisDispatcher {
    pub async fn connect(url: &str, queue: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(dispatch_err)?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(dispatch_err)?;
        Ok(Self {
            manager,
            queue: queue.to_string(),
        })
    }
}

#[async_trait]
impl JobDispatcher for RedisDispatcher {
    async fn enqueue(&self, task: &str, args: serde_json::Value) -> Result<JobHandle> {
        let job = Job {
            id: uuid::Uuid::new_v4().to_string(),
            task: task.to_string(),
            args,
        };
        let payload = serde_json::to_string(&job)?;

        let mut con = self.manager.clone();
        con.lpush::<_, _, ()>(queue_key(&self.queue), payload)
            .await
            .map_err(dispatch_err)?;

        tracing::debug!("enqueued {} as job {}", job.task, job.id);
        Ok(JobHandle {
            id: job.id,
            queue: self.queue.clone(),
        })
    }
}

/// One popped job plus the raw payload needed to acknowledge it.
pub struct Delivery {
    pub job: Job,
    payload: String,
}

/// Consumer side: blocking pop loop for worker processes.
pub struct QueueConsumer {
    manager: ConnectionManager,
    queue: String,
}

impl QueueConsumer {
    /// Connects and pushes any payloads a previous run left on the
    /// processing list back onto the queue. Doing this while another worker
    /// on the same queue is mid-job re-delivers that job; duplicates are
    /// within the delivery contract.
    pub async fn connect(url: &str, queue: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(dispatch_err)?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(dispatch_err)?;
        let consumer = Self {
            manager,
            queue: queue.to_string(),
        };
        consumer.requeue_pending().await?;
        Ok(consumer)
    }

    async fn requeue_pending(&self) -> Result<()> {
        let mut con = self.manager.clone();
        let mut moved = 0u64;
        loop {
            let item: Option<String> = redis::cmd("LMOVE")
                .arg(processing_key(&self.queue))
                .arg(queue_key(&self.queue))
                .arg("RIGHT")
                .arg("LEFT")
                .query_async(&mut con)
                .await
                .map_err(dispatch_err)?;
            if item.is_none() {
                break;
            }
            moved += 1;
        }
        if moved > 0 {
            tracing::info!(moved, "requeued in-flight jobs from a previous run");
        }
        Ok(())
    }

    /// Pop the next job, blocking up to a few seconds.
    ///
    /// Returns `Ok(None)` on timeout so the caller can observe shutdown
    /// signals between polls. The payload is moved to the processing list
    /// atomically with the pop; it survives a worker crash (or a dropped
    /// in-flight poll) and is re-queued on the next `connect`. A payload
    /// that does not deserialize as a `Job` is discarded with a warning
    /// rather than recycled forever.
    pub async fn next_job(&self) -> Result<Option<Delivery>> {
        let mut con = self.manager.clone();
        let popped: Option<String> = redis::cmd("BLMOVE")
            .arg(queue_key(&self.queue))
            .arg(processing_key(&self.queue))
            .arg("RIGHT")
            .arg("LEFT")
            .arg(5)
            .query_async(&mut con)
            .await
            .map_err(dispatch_err)?;

        let Some(payload) = popped else {
            return Ok(None);
        };

        match decode_payload(&payload) {
            Some(job) => Ok(Some(Delivery { job, payload })),
            None => {
                self.remove(&payload).await?;
                Ok(None)
            }
        }
    }

    /// Acknowledge a finished job, removing it from the processing list.
    /// Call only after the job's work is done; an unacked payload is
    /// re-delivered on the next startup.
    pub async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.remove(&delivery.payload).await
    }

    async fn remove(&self, payload: &str) -> Result<()> {
        let mut con = self.manager.clone();
        con.lrem::<_, _, ()>(processing_key(&self.queue), 1, payload)
            .await
            .map_err(dispatch_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_per_queue() {
        assert_eq!(queue_key("default"), "modbot:queue:default");
        assert_eq!(
            processing_key("default"),
            "modbot:queue:default:processing"
        );
    }

    #[test]
    fn decode_accepts_jobs_and_rejects_garbage() {
        let job = decode_payload(
            r#"{"id":"j1","task":"moderation.process_message","args":{"chat_id":100}}"#,
        )
        .unwrap();
        assert_eq!(job.id, "j1");
        assert_eq!(job.task, "moderation.process_message");

        assert!(decode_payload("not json").is_none());
        assert!(decode_payload(r#"{"id":"j1"}"#).is_none());
    }
}
