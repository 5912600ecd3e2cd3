//! Crew: a frozen plan of agents and an ordered task list.
//!
//! A crew owns its agents and tasks by value. The task list, read top to
//! bottom, must be a valid topological order of the dependency graph, and
//! every task must reference an agent of the same crew. [`Crew::validate`]
//! enforces both before a crew is accepted from synthesis or executed.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::Agent;
use crate::errors::ValidationError;
use crate::task::Task;

/// A named team of agents and the tasks they carry out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Crew {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub agents: Vec<Agent>,
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub workspace_id: String,
    pub created_at: DateTime<Utc>,
    /// The crew this one was refined from, if any.
    #[serde(default)]
    pub revision_of: Option<String>,
}

impl Crew {
    /// Create a new crew with a fresh id.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        agents: Vec<Agent>,
        tasks: Vec<Task>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: description.into(),
            agents,
            tasks,
            owner_id: String::new(),
            workspace_id: String::new(),
            created_at: Utc::now(),
            revision_of: None,
        }
    }

    /// Builder: set tenant scope.
    pub fn scoped(mut self, workspace_id: impl Into<String>, owner_id: impl Into<String>) -> Self {
        self.workspace_id = workspace_id.into();
        self.owner_id = owner_id.into();
        self
    }

    pub fn agent(&self, agent_id: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id == agent_id)
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    /// Tasks no other task depends on, in list order.
    pub fn leaf_task_ids(&self) -> Vec<&str> {
        let depended: HashSet<&str> = self
            .tasks
            .iter()
            .flat_map(|t| t.depends_on.iter().map(String::as_str))
            .collect();
        self.tasks
            .iter()
            .map(|t| t.id.as_str())
            .filter(|id| !depended.contains(id))
            .collect()
    }

    /// Content fingerprint of agents and tasks (MD5, hex).
    ///
    /// Ids are excluded so that a refinement that changes nothing but
    /// identifiers yields the same key.
    pub fn key(&self) -> String {
        let mut source: Vec<String> = Vec::new();
        for agent in &self.agents {
            source.push(format!(
                "{}|{}|{}|{}",
                agent.role,
                agent.goal,
                agent.backstory,
                agent.tool_ids.join(",")
            ));
        }
        let roles: HashMap<&str, &str> = self
            .agents
            .iter()
            .map(|a| (a.id.as_str(), a.role.as_str()))
            .collect();
        let positions: HashMap<&str, usize> = self
            .tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.as_str(), i))
            .collect();
        for task in &self.tasks {
            let deps: Vec<String> = task
                .depends_on
                .iter()
                .map(|d| positions.get(d.as_str()).map_or_else(|| d.clone(), |p| p.to_string()))
                .collect();
            source.push(format!(
                "{}|{}|{}|{}",
                task.description,
                task.expected_output,
                roles.get(task.agent_id.as_str()).copied().unwrap_or(""),
                deps.join(",")
            ));
        }
        let mut hasher = Md5::new();
        hasher.update(source.join("\n").as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Check the structural invariants.
    ///
    /// - at least one agent and one task
    /// - agent ids and task ids are unique
    /// - every `Task::agent_id` names an agent of this crew
    /// - every `depends_on` entry names a task defined earlier in the list
    ///
    /// All violations are collected rather than stopping at the first.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.agents.is_empty() {
            issues.push("crew has no agents".to_string());
        }
        if self.tasks.is_empty() {
            issues.push("crew has no tasks".to_string());
        }

        let mut agent_ids = HashSet::new();
        for agent in &self.agents {
            if !agent_ids.insert(agent.id.as_str()) {
                issues.push(format!("duplicate agent id '{}'", agent.id));
            }
        }

        let all_task_ids: HashSet<&str> = self.tasks.iter().map(|t| t.id.as_str()).collect();
        let mut seen: HashSet<&str> = HashSet::new();
        for (index, task) in self.tasks.iter().enumerate() {
            if task.description.trim().is_empty() {
                issues.push(format!("task #{} ('{}') has an empty description", index, task.id));
            }
            if !agent_ids.contains(task.agent_id.as_str()) {
                issues.push(format!(
                    "task '{}' references unknown agent '{}'",
                    task.id, task.agent_id
                ));
            }
            for dep in &task.depends_on {
                if dep == &task.id {
                    issues.push(format!("task '{}' depends on itself", task.id));
                } else if seen.contains(dep.as_str()) {
                    continue;
                } else if all_task_ids.contains(dep.as_str()) {
                    issues.push(format!(
                        "task '{}' depends on '{}' which is defined later in the task list",
                        task.id, dep
                    ));
                } else {
                    issues.push(format!("task '{}' depends on unknown task '{}'", task.id, dep));
                }
            }
            if !seen.insert(task.id.as_str()) {
                issues.push(format!("duplicate task id '{}'", task.id));
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::from_issues(issues))
        }
    }
}

impl std::fmt::Display for Crew {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Crew(id={}, name={}, number_of_agents={}, number_of_tasks={})",
            self.id,
            self.name,
            self.agents.len(),
            self.tasks.len()
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
