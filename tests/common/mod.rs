//! Shared test support: a scripted LLM that plays back canned agent
//! responses keyed on the requesting agent's role.

use async_trait::async_trait;
use insight_engine::error::{InsightError, Result};
use insight_engine::llm::LlmInterface;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub struct ScriptedLlm {
    architect: Mutex<VecDeque<String>>,
    critic: Mutex<VecDeque<String>>,
    pub prompts: Mutex<Vec<(String, String)>>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new(architect: Vec<&str>, critic: Vec<&str>) -> Arc<Self> {
        Arc::new(Self {
            architect: Mutex::new(architect.into_iter().map(String::from).collect()),
            critic: Mutex::new(critic.into_iter().map(String::from).collect()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// User prompts sent to the architect, in order.
    pub fn architect_prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|(system, _)| system.contains("Architect"))
            .map(|(_, user)| user.clone())
            .collect()
    }
}

#[async_trait]
impl LlmInterface for ScriptedLlm {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap()
            .push((system.to_string(), user.to_string()));

        if system.contains("Query Analyst") {
            return Ok("Metrics: revenue. Tables: orders. Filters: time range.".to_string());
        }
        if system.contains("Architect") {
            return self
                .architect
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| InsightError::Llm("architect script exhausted".to_string()));
        }
        if system.contains("Critic") {
            return self
                .critic
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| InsightError::Llm("critic script exhausted".to_string()));
        }
        Ok("Unified insight combining internal metrics with market context.".to_string())
    }
}
