//! Message classification and the inbound moderation pipeline.
//!
//! Classification runs in the worker process; the request-serving process
//! only checks the allowlist and enqueues. Both classifier entry points are
//! fail-open: any service error, timeout, or unparseable output yields a
//! fixed non-punitive default instead of propagating.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    domain::{ChatId, UserId},
    errors::Error,
    ports::{tasks, ClassifierClient, JobDispatcher, JobHandle},
    store::ApprovalStore,
    Result,
};

/// Closed set of actions the classifier may request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModAction {
    Allow,
    Warn,
    Mute,
    Ban,
    Delete,
}

/// Structured classification result for a group message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub action: ModAction,
    pub reason: String,
    pub category: String,
    pub severity: u8,
    pub should_delete: bool,
}

impl Verdict {
    /// The fixed default applied whenever classification fails.
    ///
    /// Never punitive: a malfunctioning classifier must not cause wrongful
    /// enforcement.
    pub fn default_allow() -> Self {
        Self {
            action: ModAction::Allow,
            reason: "classifier unavailable".to_string(),
            category: "other".to_string(),
            severity: 1,
            should_delete: false,
        }
    }
}

/// Structured result for an appeal-quality review.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppealVerdict {
    pub approve: bool,
    pub reason: String,
}

impl AppealVerdict {
    /// Default on failure: never auto-approve from a broken classifier.
    pub fn default_reject() -> Self {
        Self {
            approve: false,
            reason: "classifier unavailable".to_string(),
        }
    }
}

pub const MODERATION_SYS: &str = "\
You are an AI moderator for a group chat.

Follow:
1. Universal safety rules
2. Custom group rules provided

Actions:
- allow
- warn
- mute
- ban
- delete

Return ONLY a JSON:
{
 \"action\": \"...\",
 \"reason\": \"...\",
 \"category\": \"...\",
 \"severity\": 1-5,
 \"should_delete\": true/false
}";

pub const APPEAL_SYS: &str = "\
You review group chat ban appeals.

Approve if:
- user is genuinely sorry
- promises to follow rules

Reject if:
- still abusive
- fake apology
- trolling

Return only JSON:
{
 \"approve\": true/false,
 \"reason\": \"...\"
}";

/// Assemble the full moderation prompt for one message.
pub fn moderation_prompt(text: &str, user_label: &str, chat_label: &str, rules: &str) -> String {
    let rules = if rules.trim().is_empty() {
        "<no custom rules provided>"
    } else {
        rules
    };
    format!(
        "{MODERATION_SYS}\n\nGROUP RULES:\n{rules}\n\nCHAT:\n{chat_label}\n\nUSER:\n{user_label}\n\nMESSAGE:\n{text}"
    )
}

#[derive(Deserialize)]
struct RawVerdict {
    action: ModAction,
    reason: Option<String>,
    category: Option<String>,
    severity: Option<i64>,
    should_delete: Option<bool>,
}

fn parse_verdict(raw: &str) -> Result<Verdict> {
    let v: RawVerdict = serde_json::from_str(raw.trim())
        .map_err(|e| Error::ClassificationParse(e.to_string()))?;
    Ok(Verdict {
        action: v.action,
        reason: v.reason.unwrap_or_default(),
        category: v.category.unwrap_or_else(|| "other".to_string()),
        severity: v.severity.unwrap_or(1).clamp(1, 5) as u8,
        should_delete: v.should_delete.unwrap_or(false),
    })
}

fn parse_appeal_verdict(raw: &str) -> Result<AppealVerdict> {
    serde_json::from_str::<AppealVerdict>(raw.trim())
        .map_err(|e| Error::ClassificationParse(e.to_string()))
}

/// Classify one group message. Never returns an error: any failure along
/// the way (service, transport, parse) collapses to the allow default.
pub async fn classify_message(
    client: &dyn ClassifierClient,
    text: &str,
    user_label: &str,
    chat_label: &str,
    rules: &str,
) -> Verdict {
    let prompt = moderation_prompt(text, user_label, chat_label, rules);
    match client.generate(&prompt).await {
        Ok(raw) => parse_verdict(&raw).unwrap_or_else(|e| {
            tracing::warn!("unparseable moderation verdict, defaulting to allow: {e}");
            Verdict::default_allow()
        }),
        Err(e) => {
            tracing::warn!("classifier call failed, defaulting to allow: {e}");
            Verdict::default_allow()
        }
    }
}

/// Evaluate an appeal text. Same failure rule as `classify_message`, but the
/// default is a rejection.
pub async fn classify_appeal(client: &dyn ClassifierClient, text: &str) -> AppealVerdict {
    let prompt = format!("{APPEAL_SYS}\n\nUSER APPEAL:\n{text}");
    match client.generate(&prompt).await {
        Ok(raw) => parse_appeal_verdict(&raw).unwrap_or_else(|e| {
            tracing::warn!("unparseable appeal verdict, defaulting to reject: {e}");
            AppealVerdict::default_reject()
        }),
        Err(e) => {
            tracing::warn!("appeal classifier call failed, defaulting to reject: {e}");
            AppealVerdict::default_reject()
        }
    }
}

/// Payload for a `moderation.process_message` job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModerationJobArgs {
    pub chat_id: i64,
    pub user_id: i64,
    pub username: Option<String>,
    pub chat_title: Option<String>,
    pub text: String,
}

/// Payload for a `moderation.evaluate_appeal` job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppealJobArgs {
    pub user_id: i64,
    pub text: String,
}

/// What happened to an inbound message on the request-serving path.
#[derive(Clone, Debug)]
pub enum Disposition {
    /// User is on the allowlist; no classification job was created.
    SkippedApproved,
    Enqueued(JobHandle),
    /// Broker unreachable; the message passes through unclassified.
    DispatchFailed,
}

/// Request-path entry point: allowlist check, then fire-and-forget enqueue.
pub struct Pipeline {
    approvals: Arc<dyn ApprovalStore>,
    dispatcher: Arc<dyn JobDispatcher>,
}

impl Pipeline {
    pub fn new(approvals: Arc<dyn ApprovalStore>, dispatcher: Arc<dyn JobDispatcher>) -> Self {
        Self {
            approvals,
            dispatcher,
        }
    }

    /// Never raises: an unreachable allowlist store falls through to
    /// classification, an unreachable broker falls through to delivery.
    pub async fn handle_message(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        username: Option<&str>,
        chat_title: Option<&str>,
        text: &str,
    ) -> Disposition {
        match self.approvals.is_approved(chat_id, user_id).await {
            Ok(true) => return Disposition::SkippedApproved,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!("allowlist check failed, moderating anyway: {e}");
            }
        }

        let args = ModerationJobArgs {
            chat_id: chat_id.0,
            user_id: user_id.0,
            username: username.map(|s| s.to_string()),
            chat_title: chat_title.map(|s| s.to_string()),
            text: text.to_string(),
        };
        let args = match serde_json::to_value(&args) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!("failed to serialize moderation job: {e}");
                return Disposition::DispatchFailed;
            }
        };

        match self.dispatcher.enqueue(tasks::PROCESS_MESSAGE, args).await {
            Ok(handle) => Disposition::Enqueued(handle),
            Err(e) => {
                tracing::warn!("failed to enqueue moderation job: {e}");
                Disposition::DispatchFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FailingClassifier, FixedClassifier, MemoryApprovals, RecordingDispatcher};

    #[test]
    fn prompt_carries_rules_user_and_message() {
        let p = moderation_prompt("hello there", "@bob (ID: 42)", "lounge", "- no spam\n- english only");
        assert!(p.contains("GROUP RULES:\n- no spam\n- english only"));
        assert!(p.contains("CHAT:\nlounge"));
        assert!(p.contains("USER:\n@bob (ID: 42)"));
        assert!(p.contains("MESSAGE:\nhello there"));
    }

    #[test]
    fn prompt_marks_missing_rules() {
        for rules in ["", "   "] {
            let p = moderation_prompt("hello", "@bob", "lounge", rules);
            assert!(p.contains("GROUP RULES:\n<no custom rules provided>"));
        }
    }

    #[test]
    fn parses_full_verdict() {
        let raw = r#"{"action":"ban","reason":"spam","category":"spam","severity":5,"should_delete":true}"#;
        let v = parse_verdict(raw).unwrap();
        assert_eq!(v.action, ModAction::Ban);
        assert_eq!(v.severity, 5);
        assert!(v.should_delete);
    }

    #[test]
    fn clamps_out_of_range_severity() {
        let raw = r#"{"action":"warn","severity":99}"#;
        let v = parse_verdict(raw).unwrap();
        assert_eq!(v.severity, 5);

        let raw = r#"{"action":"warn","severity":-3}"#;
        let v = parse_verdict(raw).unwrap();
        assert_eq!(v.severity, 1);
    }

    #[test]
    fn rejects_unknown_action() {
        assert!(parse_verdict(r#"{"action":"nuke"}"#).is_err());
        assert!(parse_verdict("not json at all").is_err());
        assert!(parse_verdict(r#"["action"]"#).is_err());
    }

    #[tokio::test]
    async fn classifier_failure_defaults_to_allow() {
        let client = FailingClassifier;
        let v = classify_message(&client, "hi", "@u", "chat", "").await;
        assert_eq!(v, Verdict::default_allow());
        assert_eq!(v.action, ModAction::Allow);
        assert!(!v.should_delete);
    }

    #[tokio::test]
    async fn garbage_output_defaults_to_allow() {
        let client = FixedClassifier::new("I refuse to answer in JSON");
        let v = classify_message(&client, "hi", "@u", "chat", "").await;
        assert_eq!(v.action, ModAction::Allow);
        assert_eq!(v.severity, 1);
    }

    #[tokio::test]
    async fn appeal_failure_defaults_to_reject() {
        let client = FailingClassifier;
        let v = classify_appeal(&client, "please unban me").await;
        assert!(!v.approve);
    }

    #[tokio::test]
    async fn appeal_verdict_parses() {
        let client = FixedClassifier::new(r#"{"approve": true, "reason": "sincere"}"#);
        let v = classify_appeal(&client, "sorry").await;
        assert!(v.approve);
        assert_eq!(v.reason, "sincere");
    }

    #[tokio::test]
    async fn pipeline_skips_approved_users() {
        let approvals = Arc::new(MemoryApprovals::default());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        approvals
            .approve(ChatId(100), UserId(42), UserId(1))
            .await
            .unwrap();

        let pipeline = Pipeline::new(approvals, dispatcher.clone());
        let d = pipeline
            .handle_message(ChatId(100), UserId(42), None, None, "hello")
            .await;
        assert!(matches!(d, Disposition::SkippedApproved));
        assert!(dispatcher.jobs().is_empty());
    }

    #[tokio::test]
    async fn pipeline_enqueues_unapproved_messages() {
        let approvals = Arc::new(MemoryApprovals::default());
        let dispatcher = Arc::new(RecordingDispatcher::default());

        let pipeline = Pipeline::new(approvals, dispatcher.clone());
        let d = pipeline
            .handle_message(ChatId(100), UserId(42), Some("bob"), Some("lounge"), "hello")
            .await;
        assert!(matches!(d, Disposition::Enqueued(_)));

        let jobs = dispatcher.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].task, tasks::PROCESS_MESSAGE);
        let args: ModerationJobArgs = serde_json::from_value(jobs[0].args.clone()).unwrap();
        assert_eq!(args.chat_id, 100);
        assert_eq!(args.text, "hello");
    }

    #[tokio::test]
    async fn pipeline_swallows_dispatch_failure() {
        let approvals = Arc::new(MemoryApprovals::default());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        dispatcher.fail_next();

        let pipeline = Pipeline::new(approvals, dispatcher.clone());
        let d = pipeline
            .handle_message(ChatId(100), UserId(42), None, None, "hello")
            .await;
        assert!(matches!(d, Disposition::DispatchFailed));
    }
}
