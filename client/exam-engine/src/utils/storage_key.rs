use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::models::{AttemptId, ExamId};

/// Namespace shared by every key this engine writes; nothing outside it is ever touched.
pub const KEY_NAMESPACE: &str = "exam-engine";

// Ids are escaped so a `:` inside an id cannot reach into another key.
const KEY_SEGMENT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn segment(value: &str) -> String {
    utf8_percent_encode(value, KEY_SEGMENT_ENCODE_SET).to_string()
}

pub fn snapshot_key(attempt_id: &AttemptId) -> String {
    format!("{}:snapshot:{}", KEY_NAMESPACE, segment(attempt_id.as_str()))
}

pub fn active_attempt_key(exam_id: &ExamId) -> String {
    format!("{}:active:{}", KEY_NAMESPACE, segment(exam_id.as_str()))
}

pub fn is_engine_key(key: &str) -> bool {
    key.strip_prefix(KEY_NAMESPACE)
        .is_some_and(|rest| rest.starts_with(':'))
}
