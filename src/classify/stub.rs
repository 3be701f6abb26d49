use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::backend::{ClassificationError, Classifier, ImageData};

/// One scripted answer.
#[derive(Clone, Debug)]
pub enum StubReply {
    Label(String),
    /// Answer after blocking for the given time.
    Delayed(String, Duration),
    Fail(String),
    /// Panic inside `classify`.
    Panic(String),
}

/// Local classifier for development and tests. Never touches the network.
pub struct StubClassifier {
    fixed: Option<String>,
    script: Mutex<VecDeque<StubReply>>,
    calls: AtomicUsize,
}

impl StubClassifier {
    /// Always answers `label`.
    pub fn fixed(label: impl Into<String>) -> Self {
        Self {
            fixed: Some(label.into()),
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Answers from `replies` in order, then fails.
    pub fn scripted(replies: impl IntoIterator<Item = StubReply>) -> Self {
        Self {
            fixed: None,
            script: Mutex::new(replies.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `classify` invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Classifier for StubClassifier {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn classify(&self, _image: &ImageData, _instruction: &str) -> Result<String, ClassificationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(label) = &self.fixed {
            return Ok(label.clone());
        }
        let reply = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match reply {
            Some(StubReply::Label(label)) => Ok(label),
            Some(StubReply::Delayed(label, delay)) => {
                std::thread::sleep(delay);
                Ok(label)
            }
            Some(StubReply::Fail(reason)) => Err(ClassificationError::Transport(reason)),
            Some(StubReply::Panic(reason)) => panic!("{}", reason),
            None => Err(ClassificationError::Transport(
                "stub script exhausted".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_replies_are_consumed_in_order() {
        let image = ImageData::new(Vec::new(), "image/png");
        let stub = StubClassifier::scripted([
            StubReply::Label("biodegradable".to_string()),
            StubReply::Fail("timeout".to_string()),
        ]);
        assert_eq!(stub.classify(&image, "").unwrap(), "biodegradable");
        assert!(stub.classify(&image, "").is_err());
        assert!(stub.classify(&image, "").is_err());
        assert_eq!(stub.calls(), 3);
    }
}
