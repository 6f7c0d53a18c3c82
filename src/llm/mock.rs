//! Scripted provider for tests

use super::{Completion, CompletionProvider, CompletionRequest};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Returns pre-scripted completions in order and records every request it
/// receives.
#[derive(Default)]
pub struct MockProvider {
    responses: Mutex<VecDeque<Completion>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, completion: Completion) {
        self.responses.lock().unwrap().push_back(completion);
    }

    pub fn push_text(&self, text: &str) {
        self.push_response(Completion {
            text: text.to_string(),
            tool_calls: Vec::new(),
        });
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::Provider("mock provider ran out of responses".to_string()))
    }
}
