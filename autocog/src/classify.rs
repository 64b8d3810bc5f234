use crate::chat::{ChatError, TextGen};
use crate::prompts::{self, LABEL_COMMAND, LABEL_DESCRIPTOR, LABEL_PREDICTOR};

/// Marker denoting the start of actual prediction execution in the command's
/// output; everything before it is build/setup noise.
pub const PREDICTION_MARKER: &str = "Running prediction...";

/// Wrapper-tool panic noise that follows the useful part of the output.
const PANIC_MARKER: &str = "panic: ";

/// Maximum excerpt length fed to classification; the most recent output is the
/// most diagnostic, so the tail is kept.
const MAX_EXCERPT: usize = 10_000;

/// Bound on re-asking when the service answers outside the recognized set.
const MAX_CLASSIFY_ATTEMPTS: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error(
        "could not classify the failure after {attempts} attempts (last answer: {last:?})"
    )]
    Exhausted { attempts: usize, last: String },
    #[error(transparent)]
    Chat(#[from] ChatError),
}

/// Which artifact (or the command) a failure is attributed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultKind {
    Predictor,
    Descriptor,
    Command,
}

impl FaultKind {
    /// Parse a label from the closed set, tolerating wrapping quotes and
    /// backticks.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().trim_matches(['`', '"', '\'']) {
            LABEL_PREDICTOR => Some(FaultKind::Predictor),
            LABEL_DESCRIPTOR => Some(FaultKind::Descriptor),
            LABEL_COMMAND => Some(FaultKind::Command),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FaultKind::Predictor => LABEL_PREDICTOR,
            FaultKind::Descriptor => LABEL_DESCRIPTOR,
            FaultKind::Command => LABEL_COMMAND,
        }
    }
}

/// Result of classifying one failure. The dependency flag is orthogonal to the
/// primary fault: a predictor bug and a missing package can co-occur.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Diagnosis {
    pub fault: FaultKind,
    pub dependency: bool,
}

/// Reduce raw command output to the slice worth showing the classifier: the
/// portion after the prediction marker (whole output if absent), cut before
/// any wrapper panic, tail-truncated to `MAX_EXCERPT`.
pub fn extract_relevant_output(raw: &str) -> String {
    let after_marker = match raw.find(PREDICTION_MARKER) {
        Some(pos) => &raw[pos + PREDICTION_MARKER.len()..],
        None => raw,
    };
    let before_panic = match after_marker.find(PANIC_MARKER) {
        Some(pos) => &after_marker[..pos],
        None => after_marker,
    };
    tail(before_panic.trim(), MAX_EXCERPT).to_string()
}

/// Last `max` bytes of `s`, nudged to a char boundary.
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

/// Ask which artifact is at fault, then independently whether the failure is
/// additionally a package-resolution problem. Answers outside the recognized
/// sets are retried up to the bound; exhaustion is fatal to the caller since
/// no safe default fault kind exists.
pub async fn classify(
    r#gen: &mut dyn TextGen,
    command: &str,
    excerpt: &str,
) -> Result<Diagnosis, ClassifyError> {
    let mut last = String::new();
    for attempt in 1..=MAX_CLASSIFY_ATTEMPTS {
        let answer = r#gen.ask(&prompts::diagnose(command, excerpt)).await?;
        let Some(fault) = FaultKind::parse(&answer) else {
            tracing::warn!(
                answer = answer.trim(),
                "unrecognized fault label (attempt {attempt}/{MAX_CLASSIFY_ATTEMPTS})"
            );
            last = answer;
            continue;
        };

        let answer = r#gen.ask(&prompts::dependency_check(command, excerpt)).await?;
        let Some(dependency) = parse_bool(&answer) else {
            tracing::warn!(
                answer = answer.trim(),
                "unrecognized dependency answer (attempt {attempt}/{MAX_CLASSIFY_ATTEMPTS})"
            );
            last = answer;
            continue;
        };

        return Ok(Diagnosis { fault, dependency });
    }
    Err(ClassifyError::Exhausted {
        attempts: MAX_CLASSIFY_ATTEMPTS,
        last,
    })
}

fn parse_bool(answer: &str) -> Option<bool> {
    match answer.trim().trim_matches(['`', '"', '\'', '.']) {
        s if s.eq_ignore_ascii_case("true") => Some(true),
        s if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct ScriptedGen {
        replies: VecDeque<String>,
        asked: Vec<String>,
    }

    impl ScriptedGen {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: replies.iter().map(|s| s.to_string()).collect(),
                asked: Vec::new(),
            }
        }
    }

    #[async_trait::async_trait]
    impl TextGen for ScriptedGen {
        async fn ask(&mut self, content: &str) -> Result<String, ChatError> {
            self.asked.push(content.to_string());
            Ok(self.replies.pop_front().expect("scripted replies exhausted"))
        }
    }

    // ── extract_relevant_output ──

    #[test]
    fn excerpt_keeps_portion_after_marker() {
        let raw = "building image...\nstep 2\nRunning prediction...\nValueError: bad input\n";
        let e = extract_relevant_output(raw);
        assert_eq!(e, "ValueError: bad input");
    }

    #[test]
    fn excerpt_without_marker_uses_whole_output() {
        let raw = "no marker here\nerror: something\n";
        let e = extract_relevant_output(raw);
        assert!(e.contains("no marker here"));
        assert!(e.contains("error: something"));
    }

    #[test]
    fn excerpt_cuts_wrapper_panic() {
        let raw = "Running prediction...\nreal error\npanic: goroutine stack\nmore noise";
        let e = extract_relevant_output(raw);
        assert!(e.contains("real error"));
        assert!(!e.contains("goroutine"));
    }

    #[test]
    fn excerpt_keeps_the_tail() {
        let mut raw = String::from("Running prediction...\n");
        for i in 0..2000 {
            raw.push_str(&format!("line {i}\n"));
        }
        let e = extract_relevant_output(&raw);
        assert!(e.len() <= 10_000);
        assert!(e.contains("line 1999"));
        assert!(!e.contains("line 0\n"));
    }

    // ── FaultKind parsing ──

    #[test]
    fn parses_recognized_labels() {
        assert_eq!(FaultKind::parse("predict.py"), Some(FaultKind::Predictor));
        assert_eq!(FaultKind::parse("cog.yaml"), Some(FaultKind::Descriptor));
        assert_eq!(FaultKind::parse("cog_predict"), Some(FaultKind::Command));
        assert_eq!(FaultKind::parse(" `predict.py` "), Some(FaultKind::Predictor));
    }

    #[test]
    fn rejects_unrecognized_labels() {
        assert_eq!(FaultKind::parse("the model"), None);
        assert_eq!(FaultKind::parse(""), None);
        assert_eq!(FaultKind::parse("predict.py is broken because"), None);
    }

    #[test]
    fn bool_parsing() {
        assert_eq!(parse_bool("True"), Some(true));
        assert_eq!(parse_bool(" false\n"), Some(false));
        assert_eq!(parse_bool("True."), Some(true));
        assert_eq!(parse_bool("maybe"), None);
    }

    // ── classify ──

    #[tokio::test]
    async fn classify_happy_path() {
        let mut r#gen = ScriptedGen::new(&["predict.py", "False"]);
        let d = classify(&mut r#gen, "cog predict", "boom").await.unwrap();
        assert_eq!(d.fault, FaultKind::Predictor);
        assert!(!d.dependency);
        assert_eq!(r#gen.asked.len(), 2);
    }

    #[tokio::test]
    async fn classify_retries_bad_label() {
        let mut r#gen = ScriptedGen::new(&["no idea", "cog.yaml", "True"]);
        let d = classify(&mut r#gen, "cog predict", "boom").await.unwrap();
        assert_eq!(d.fault, FaultKind::Descriptor);
        assert!(d.dependency);
        assert_eq!(r#gen.asked.len(), 3);
    }

    #[tokio::test]
    async fn classify_retries_bad_dependency_answer() {
        let mut r#gen = ScriptedGen::new(&["cog.yaml", "perhaps", "cog.yaml", "False"]);
        let d = classify(&mut r#gen, "cog predict", "boom").await.unwrap();
        assert_eq!(d.fault, FaultKind::Descriptor);
        assert!(!d.dependency);
    }

    #[tokio::test]
    async fn classify_exhaustion_is_fatal() {
        let mut r#gen = ScriptedGen::new(&["a", "b", "c", "d", "e"]);
        let err = classify(&mut r#gen, "cog predict", "boom").await.unwrap_err();
        match err {
            ClassifyError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 5);
                assert_eq!(last, "e");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
