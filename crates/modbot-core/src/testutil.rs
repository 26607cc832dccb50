//! In-memory fakes for the ports, shared across test modules.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;

use crate::{
    domain::{ChatId, MessageId, MessageRef, UserId},
    errors::Error,
    messaging::{port::MessagingPort, types::InlineKeyboard},
    ports::{AdminApi, ClassifierClient, Job, JobDispatcher, JobHandle},
    store::{AppealLog, AppealLogEntry, ApprovalRecord, ApprovalStore, CounterStore, RuleStore},
    Result,
};

#[derive(Default)]
pub struct MemoryCounters {
    appeals: Mutex<HashMap<i64, i64>>,
    warnings: Mutex<HashMap<(i64, i64), i64>>,
    fail_appeals: AtomicBool,
}

impl MemoryCounters {
    pub fn appeal_count(&self, user_id: UserId) -> i64 {
        self.appeals
            .lock()
            .unwrap()
            .get(&user_id.0)
            .copied()
            .unwrap_or(0)
    }

    pub fn fail_appeals(&self, fail: bool) {
        self.fail_appeals.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CounterStore for MemoryCounters {
    async fn increment_appeals(&self, user_id: UserId) -> Result<i64> {
        if self.fail_appeals.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable("counters offline".to_string()));
        }
        let mut map = self.appeals.lock().unwrap();
        let count = map.entry(user_id.0).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn reset_appeals(&self, user_id: UserId) -> Result<()> {
        if self.fail_appeals.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable("counters offline".to_string()));
        }
        self.appeals.lock().unwrap().remove(&user_id.0);
        Ok(())
    }

    async fn increment_warnings(&self, chat_id: ChatId, user_id: UserId) -> Result<i64> {
        let mut map = self.warnings.lock().unwrap();
        let count = map.entry((chat_id.0, user_id.0)).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn reset_warnings(&self, chat_id: ChatId, user_id: UserId) -> Result<()> {
        self.warnings.lock().unwrap().remove(&(chat_id.0, user_id.0));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryAppealLog {
    entries: Mutex<Vec<AppealLogEntry>>,
}

impl MemoryAppealLog {
    pub fn entries(&self) -> Vec<AppealLogEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AppealLog for MemoryAppealLog {
    async fn log_appeal(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        appeal_text: &str,
        approved: bool,
    ) -> Result<()> {
        self.entries.lock().unwrap().push(AppealLogEntry {
            user_id: user_id.0,
            chat_id: chat_id.0,
            appeal_text: appeal_text.to_string(),
            approved,
            created_at: Utc::now(),
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryApprovals {
    records: Mutex<HashMap<(i64, i64), ApprovalRecord>>,
}

#[async_trait]
impl ApprovalStore for MemoryApprovals {
    async fn approve(&self, chat_id: ChatId, user_id: UserId, approver: UserId) -> Result<()> {
        self.records.lock().unwrap().insert(
            (chat_id.0, user_id.0),
            ApprovalRecord {
                chat_id: chat_id.0,
                user_id: user_id.0,
                approved_by: approver.0,
                approved_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn unapprove(&self, chat_id: ChatId, user_id: UserId) -> Result<()> {
        self.records.lock().unwrap().remove(&(chat_id.0, user_id.0));
        Ok(())
    }

    async fn unapprove_all(&self, chat_id: ChatId) -> Result<u64> {
        let mut map = self.records.lock().unwrap();
        let before = map.len();
        map.retain(|(c, _), _| *c != chat_id.0);
        Ok((before - map.len()) as u64)
    }

    async fn is_approved(&self, chat_id: ChatId, user_id: UserId) -> Result<bool> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .contains_key(&(chat_id.0, user_id.0)))
    }

    async fn count_approved(&self, chat_id: ChatId) -> Result<u64> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .keys()
            .filter(|(c, _)| *c == chat_id.0)
            .count() as u64)
    }
}

#[derive(Default)]
pub struct MemoryRules {
    rules: Mutex<HashMap<i64, Vec<String>>>,
}

#[async_trait]
impl RuleStore for MemoryRules {
    async fn add_rule(&self, chat_id: ChatId, rule: &str) -> Result<()> {
        self.rules
            .lock()
            .unwrap()
            .entry(chat_id.0)
            .or_default()
            .push(rule.to_string());
        Ok(())
    }

    async fn rules_text(&self, chat_id: ChatId) -> Result<String> {
        Ok(self
            .rules
            .lock()
            .unwrap()
            .get(&chat_id.0)
            .map(|rules| {
                rules
                    .iter()
                    .map(|r| format!("- {r}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct RecordingDispatcher {
    jobs: Mutex<Vec<Job>>,
    fail_next: AtomicBool,
}

impl RecordingDispatcher {
    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().unwrap().clone()
    }

    /// Fail only the next enqueue.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobDispatcher for RecordingDispatcher {
    async fn enqueue(&self, task: &str, args: serde_json::Value) -> Result<JobHandle> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::Dispatch("broker unreachable".to_string()));
        }
        let mut jobs = self.jobs.lock().unwrap();
        let id = format!("job-{}", jobs.len());
        jobs.push(Job {
            id: id.clone(),
            task: task.to_string(),
            args,
        });
        Ok(JobHandle {
            id,
            queue: "test".to_string(),
        })
    }
}

#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<(ChatId, String)>>,
    keyboards: Mutex<Vec<(ChatId, String, String)>>,
    edits: Mutex<Vec<(MessageRef, String)>>,
    fail_sends: AtomicBool,
}

impl RecordingMessenger {
    pub fn keyboards(&self) -> Vec<(ChatId, String, String)> {
        self.keyboards.lock().unwrap().clone()
    }

    pub fn edits(&self) -> Vec<(MessageRef, String)> {
        self.edits.lock().unwrap().clone()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::PlatformCall("send failed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessagingPort for RecordingMessenger {
    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.check()?;
        self.sent.lock().unwrap().push((chat_id, html.to_string()));
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(1),
        })
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.check()?;
        self.edits.lock().unwrap().push((msg, html.to_string()));
        Ok(())
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.check()?;
        let data = keyboard
            .buttons
            .first()
            .map(|b| b.callback_data.clone())
            .unwrap_or_default();
        self.keyboards
            .lock()
            .unwrap()
            .push((chat_id, text.to_string(), data));
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(1),
        })
    }

    async fn answer_callback_query(&self, _callback_id: &str, _text: Option<&str>) -> Result<()> {
        Ok(())
    }
}

pub struct FakeAdminApi {
    admins: Mutex<HashMap<i64, Vec<i64>>>,
    list_calls: AtomicUsize,
    member_calls: AtomicUsize,
    list_delay: Mutex<Duration>,
    fail_list: AtomicBool,
    fail_member: AtomicBool,
}

impl FakeAdminApi {
    pub fn with_admins(chat_id: i64, admins: &[i64]) -> Self {
        let mut map = HashMap::new();
        map.insert(chat_id, admins.to_vec());
        Self {
            admins: Mutex::new(map),
            list_calls: AtomicUsize::new(0),
            member_calls: AtomicUsize::new(0),
            list_delay: Mutex::new(Duration::ZERO),
            fail_list: AtomicBool::new(false),
            fail_member: AtomicBool::new(false),
        }
    }

    pub fn set_admins(&self, chat_id: i64, admins: &[i64]) {
        self.admins.lock().unwrap().insert(chat_id, admins.to_vec());
    }

    pub fn set_list_delay(&self, d: Duration) {
        *self.list_delay.lock().unwrap() = d;
    }

    pub fn fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn fail_member(&self, fail: bool) {
        self.fail_member.store(fail, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn member_calls(&self) -> usize {
        self.member_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AdminApi for FakeAdminApi {
    async fn chat_administrators(&self, chat_id: ChatId) -> Result<Vec<UserId>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.list_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(Error::PlatformCall("chat migrated".to_string()));
        }
        Ok(self
            .admins
            .lock()
            .unwrap()
            .get(&chat_id.0)
            .map(|ids| ids.iter().map(|&id| UserId(id)).collect())
            .unwrap_or_default())
    }

    async fn is_chat_admin(&self, chat_id: ChatId, user_id: UserId) -> Result<bool> {
        self.member_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_member.load(Ordering::SeqCst) {
            return Err(Error::PlatformCall("member not found".to_string()));
        }
        Ok(self
            .admins
            .lock()
            .unwrap()
            .get(&chat_id.0)
            .map(|ids| ids.contains(&user_id.0))
            .unwrap_or(false))
    }
}

pub struct FixedClassifier {
    response: String,
}

impl FixedClassifier {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

#[async_trait]
impl ClassifierClient for FixedClassifier {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Ok(self.response.clone())
    }
}

pub struct FailingClassifier;

#[async_trait]
impl ClassifierClient for FailingClassifier {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Err(Error::External("classifier timed out".to_string()))
    }
}
