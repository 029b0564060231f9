//! Decides whether task failures are transient throttling, and condenses
//! failure messages for the document error list.

use super::types::{AssessmentResult, TaskFailure};

/// Service error codes that signal throttling.
pub const THROTTLING_CODES: &[&str] = &[
    "ThrottlingException",
    "ProvisionedThroughputExceededException",
    "ServiceQuotaExceededException",
    "ServiceUnavailableException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
];

/// Lowercase message fragments that signal throttling.
pub const THROTTLING_KEYWORDS: &[&str] = &[
    "throttling",
    "too many tokens",
    "too many requests",
    "rate exceeded",
    "please wait before trying again",
    "reached max retries",
];

/// Failure messages attached verbatim before switching to a summary.
pub const MAX_DETAILED_ERRORS: usize = 5;

/// True if the code or message names a throttling condition.
pub fn is_throttling(code: Option<&str>, message: &str) -> bool {
    if code.is_some_and(|c| THROTTLING_CODES.contains(&c)) {
        return true;
    }
    let message = message.to_lowercase();
    THROTTLING_KEYWORDS.iter().any(|k| message.contains(k))
}

/// A throttling failure found among task results.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottlingFailure {
    pub task_id: String,
    pub code: Option<String>,
    pub message: String,
}

/// First failed result whose failure is throttling, if any.
pub fn find_throttling<'a, I>(results: I) -> Option<ThrottlingFailure>
where
    I: IntoIterator<Item = &'a AssessmentResult>,
{
    results.into_iter().filter(|r| !r.success).find_map(|r| {
        let (code, message) = match &r.failure {
            Some(TaskFailure::Call(e)) => (e.code().map(str::to_string), e.to_string()),
            Some(TaskFailure::Parse(msg)) => (None, msg.clone()),
            None => (None, r.error_message.clone().unwrap_or_default()),
        };
        is_throttling(code.as_deref(), &message).then(|| ThrottlingFailure {
            task_id: r.task_id.clone(),
            code,
            message,
        })
    })
}

/// Error-list entries for failed results: one per failure up to
/// [`MAX_DETAILED_ERRORS`], a single summary above that.
pub fn summarize_failures(failed: &[&AssessmentResult]) -> Vec<String> {
    let messages: Vec<String> = failed
        .iter()
        .map(|r| {
            format!(
                "Assessment task {} failed: {}",
                r.task_id,
                r.error_message.as_deref().unwrap_or("unknown error")
            )
        })
        .collect();

    if messages.len() <= MAX_DETAILED_ERRORS {
        return messages;
    }

    let parsing = failed
        .iter()
        .filter(|r| r.failure.as_ref().is_some_and(TaskFailure::is_parse))
        .count();
    let other = failed.len() - parsing;
    vec![format!(
        "Granular assessment: {} tasks failed ({parsing} parsing errors, {other} other errors). First error: {}",
        failed.len(),
        messages[0]
    )]
}
