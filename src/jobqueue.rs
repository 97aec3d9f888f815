//! In-process stand-in for the external job queue between the dispatchers
//! and the sender worker pool. A bounded mpsc channel; the contract (hand
//! off a unit of send work, let a worker pool process it with its own
//! retry/backoff) is what matters, not the transport.

use chrono::NaiveDate;

#[derive(Debug, Clone)]
pub enum SendJob {
    MorningPrompt { user_id: i64, local_date: NaiveDate, attempt: u32 },
    MorningReminder { user_id: i64, local_date: NaiveDate, attempt: i64 },
    EveningPrompt { user_id: i64, local_date: NaiveDate, attempt: u32 },
    EveningReminder { user_id: i64, local_date: NaiveDate, offset_index: u32 },
    CustomReminder { reminder_id: i64 },
}

pub type JobSender = tokio::sync::mpsc::Sender<SendJob>;
pub type JobReceiver = tokio::sync::mpsc::Receiver<SendJob>;

pub fn channel(capacity: usize) -> (JobSender, JobReceiver) {
    tokio::sync::mpsc::channel(capacity)
}
