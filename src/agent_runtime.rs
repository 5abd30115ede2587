//! Agent Runtime
//!
//! Minimal agent/task/crew vocabulary wrapping an LLM. Agents are plain
//! data; all "personality" is the prompt bundle the crew passes to the
//! completion interface. Tasks run in dependency order and the final
//! task's textual output is the crew result.

use crate::error::{InsightError, Result};
use crate::llm::LlmInterface;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A capability an agent may invoke while working on a task.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn invoke(&self, args: &serde_json::Value) -> Result<String>;
}

/// An agent persona: role, goal, backstory, tools, and the LLM it runs on.
#[derive(Clone)]
pub struct Agent {
    pub role: String,
    pub goal: String,
    pub backstory: String,
    pub tools: Vec<Arc<dyn Tool>>,
    pub llm: Arc<dyn LlmInterface>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Agent {
    pub fn new(
        role: impl Into<String>,
        goal: impl Into<String>,
        backstory: impl Into<String>,
        llm: Arc<dyn LlmInterface>,
    ) -> Self {
        Self {
            role: role.into(),
            goal: goal.into(),
            backstory: backstory.into(),
            tools: Vec::new(),
            llm,
            temperature: 0.2,
            max_tokens: 1024,
        }
    }

    pub fn with_tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn system_prompt(&self) -> String {
        let mut prompt = format!(
            "You are {}. {}\nGoal: {}",
            self.role, self.backstory, self.goal
        );
        if !self.tools.is_empty() {
            let tool_list: Vec<String> = self
                .tools
                .iter()
                .map(|t| format!("- {}: {}", t.name(), t.description()))
                .collect();
            prompt.push_str(&format!("\nAvailable reference tools:\n{}", tool_list.join("\n")));
        }
        prompt
    }

    /// Run one task description through this agent's LLM.
    pub async fn perform(&self, description: &str, expected_output: &str) -> Result<String> {
        let user = format!(
            "{}\n\nExpected output: {}",
            description, expected_output
        );
        self.llm
            .complete(&self.system_prompt(), &user, self.max_tokens, self.temperature)
            .await
    }
}

/// A unit of crew work with explicit dependencies.
pub struct Task {
    pub id: String,
    pub description: String,
    pub expected_output: String,
    pub agent: Agent,
    pub depends_on: Vec<String>,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        expected_output: impl Into<String>,
        agent: Agent,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            expected_output: expected_output.into(),
            agent,
            depends_on: Vec::new(),
        }
    }

    pub fn after(mut self, task_ids: Vec<String>) -> Self {
        self.depends_on = task_ids;
        self
    }
}

/// Crew scheduling discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Process {
    /// Tasks run in declaration order.
    Sequential,
    /// Tasks run in dependency order; declaration order breaks ties.
    Hierarchical,
}

/// An ordered set of tasks executed against their agents.
pub struct Crew {
    tasks: Vec<Task>,
    process: Process,
}

impl Crew {
    pub fn new(tasks: Vec<Task>, process: Process) -> Self {
        Self { tasks, process }
    }

    /// Run all tasks and return the final task's textual output. Each
    /// task's prompt is appended with the outputs of the tasks it depends
    /// on.
    pub async fn kickoff(self) -> Result<String> {
        let order = match self.process {
            Process::Sequential => (0..self.tasks.len()).collect::<Vec<_>>(),
            Process::Hierarchical => self.dependency_order()?,
        };

        let mut outputs: HashMap<String, String> = HashMap::new();
        let mut last_output = String::new();

        for idx in order {
            let task = &self.tasks[idx];
            let mut description = task.description.clone();
            for dep in &task.depends_on {
                if let Some(prior) = outputs.get(dep) {
                    description.push_str(&format!("\n\nContext from '{}':\n{}", dep, prior));
                }
            }

            debug!("Crew running task '{}' with agent '{}'", task.id, task.agent.role);
            let output = task.agent.perform(&description, &task.expected_output).await?;
            outputs.insert(task.id.clone(), output.clone());
            last_output = output;
        }

        Ok(last_output)
    }

    /// Topological order over `depends_on`, stable w.r.t. declaration order.
    fn dependency_order(&self) -> Result<Vec<usize>> {
        let index_of: HashMap<&str, usize> = self
            .tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.as_str(), i))
            .collect();

        let mut resolved: Vec<usize> = Vec::with_capacity(self.tasks.len());
        let mut done = vec![false; self.tasks.len()];

        while resolved.len() < self.tasks.len() {
            let mut progressed = false;
            for (i, task) in self.tasks.iter().enumerate() {
                if done[i] {
                    continue;
                }
                let ready = task.depends_on.iter().all(|dep| {
                    index_of
                        .get(dep.as_str())
                        .map(|&j| done[j])
                        .unwrap_or(true)
                });
                if ready {
                    resolved.push(i);
                    done[i] = true;
                    progressed = true;
                }
            }
            if !progressed {
                return Err(InsightError::Internal(
                    "crew task dependency cycle detected".to_string(),
                ));
            }
        }

        Ok(resolved)
    }
}
