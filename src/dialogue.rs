pub mod actions;
pub mod condition;
pub mod confirm;
pub mod context;
pub mod graph;

use std::fmt;
use std::sync::Arc;

use log::{error, info, warn};

use crate::dialogue::actions::ActionDispatcher;
use crate::dialogue::context::{Context, OUTCOME};
use crate::dialogue::graph::{Action, Branch, DecisionGraph, ListenFor, Node};
use crate::error::{ConfigError, DialogueError, GatewayError};
use crate::ledger::CommitReceipt;

pub const DEFAULT_MAX_STEPS: usize = 200;
pub const TIMEOUT_INTENT: &str = "timeout";
pub const ERROR_INTENT: &str = "error";

// ---------------------------------------------------------------------------
// Session outcome
// ---------------------------------------------------------------------------

/// How a traversal ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Reached a node whose action is `end`.
    Completed { node: String },
    /// Reached a node with nothing to do next. A graph configuration error.
    DeadEnd { node: String },
    /// Exceeded the per-session step cap.
    StepLimit { steps: usize },
    /// The stop signal aborted the session.
    Cancelled,
    /// A gateway fault or malformed graph aborted the session.
    Aborted { reason: String },
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOutcome::Completed { node } => write!(f, "completed at '{node}'"),
            SessionOutcome::DeadEnd { node } => write!(f, "dead end at '{node}'"),
            SessionOutcome::StepLimit { steps } => write!(f, "step limit after {steps} steps"),
            SessionOutcome::Cancelled => write!(f, "cancelled"),
            SessionOutcome::Aborted { reason } => write!(f, "aborted: {reason}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub outcome: SessionOutcome,
    pub intent: String,
    pub steps: usize,
    pub eval_failures: usize,
    /// Action recorded by an outcome operation (`open_gate`, ...), if any.
    pub resolved: Option<String>,
    pub receipt: Option<CommitReceipt>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Result of processing one node.
enum Step {
    Advance(String),
    End,
    DeadEnd,
}

/// Walks the decision graph one session at a time.
pub struct DialogueEngine {
    graph: Arc<DecisionGraph>,
    dispatcher: ActionDispatcher,
    max_steps: usize,
}

impl DialogueEngine {
    pub fn new(graph: DecisionGraph, dispatcher: ActionDispatcher) -> Self {
        for op in graph.operations() {
            if !dispatcher.is_registered(op) {
                warn!("Graph uses unregistered operation '{op}'; it will be skipped");
            }
        }
        Self {
            graph: Arc::new(graph),
            dispatcher,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.dispatcher
    }

    pub fn context(&self) -> &Context {
        &self.dispatcher.context
    }

    /// Run one dialogue session from `start` until it ends, then commit it.
    ///
    /// Every exit path commits exactly once. Only a failing commit is
    /// returned as an error.
    pub fn run(&mut self, start: &str, fallback_intent: &str) -> Result<SessionReport, GatewayError> {
        let graph = Arc::clone(&self.graph);
        self.dispatcher.begin_session();

        let mut current = start.to_string();
        let mut steps = 0;

        info!("Session started. Initial node: {current}");

        let outcome = loop {
            if self.dispatcher.stop_requested() {
                break SessionOutcome::Cancelled;
            }
            if steps >= self.max_steps {
                break SessionOutcome::StepLimit { steps };
            }
            steps += 1;

            let Some(node) = graph.get(&current) else {
                break SessionOutcome::Aborted {
                    reason: ConfigError::UnknownNode(current.clone()).to_string(),
                };
            };
            info!("=== NODE: {current} ===");

            match self.step(&current, node) {
                Ok(Step::Advance(next)) => {
                    info!("Transition: {current} -> {next}");
                    current = next;
                }
                Ok(Step::End) => break SessionOutcome::Completed { node: current.clone() },
                Ok(Step::DeadEnd) => break SessionOutcome::DeadEnd { node: current.clone() },
                Err(DialogueError::Gateway(GatewayError::Cancelled)) => {
                    break SessionOutcome::Cancelled
                }
                Err(e) => break SessionOutcome::Aborted { reason: e.to_string() },
            }
        };

        let intent = match &outcome {
            SessionOutcome::Completed { .. } => {
                info!("Dialogue finished at '{current}'");
                fallback_intent
            }
            SessionOutcome::DeadEnd { node } => {
                error!("Configuration error: node '{node}' has no next step");
                fallback_intent
            }
            SessionOutcome::Cancelled => {
                warn!("Session cancelled at '{current}'");
                fallback_intent
            }
            SessionOutcome::StepLimit { steps } => {
                error!("Session exceeded {steps} steps at '{current}', aborting");
                TIMEOUT_INTENT
            }
            SessionOutcome::Aborted { reason } => {
                error!("Session aborted at '{current}': {reason}");
                ERROR_INTENT
            }
        };

        let resolved = self
            .dispatcher
            .context
            .get(OUTCOME)
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let slots = self.dispatcher.context.to_slots();
        let confidence = self.dispatcher.confidence();
        let receipt = self.dispatcher.commit_session(intent, confidence, slots)?;

        Ok(SessionReport {
            outcome,
            intent: intent.to_string(),
            steps,
            eval_failures: self.dispatcher.eval_failures(),
            resolved,
            receipt,
        })
    }

    fn step(&mut self, id: &str, node: &Node) -> Result<Step, DialogueError> {
        match &node.action {
            Some(Action::Say(text)) => self.dispatcher.say(text),
            Some(Action::End) => return Ok(Step::End),
            Some(Action::Operation(name)) => {
                self.dispatcher.perform(name)?;
            }
            None => {}
        }

        if node.listen {
            self.dispatcher
                .listen(node.listen_for == ListenFor::Plate)?;
        }

        if let Some(condition) = &node.condition {
            let verdict = self.dispatcher.evaluate_condition(condition)?;
            let branch = if verdict { &node.yes } else { &node.no };
            let Some(branch) = branch else {
                return Err(ConfigError::MalformedBranch {
                    node: id.to_string(),
                    reason: format!("no '{}' branch", if verdict { "yes" } else { "no" }),
                }
                .into());
            };
            return self.follow(id, branch).map(Step::Advance);
        }

        if let Some(next) = &node.next {
            return Ok(Step::Advance(next.clone()));
        }

        Ok(Step::DeadEnd)
    }

    /// Resolve a `yes`/`no` branch to a node id, running one inline level.
    fn follow(&mut self, id: &str, branch: &Branch) -> Result<String, DialogueError> {
        let inline = match branch {
            Branch::Target(target) => return Ok(target.clone()),
            Branch::Inline(inline) => inline,
        };

        if let Some(counter) = &inline.counter {
            self.dispatcher.perform(counter)?;
        }

        let malformed = |reason: &str| ConfigError::MalformedBranch {
            node: id.to_string(),
            reason: reason.to_string(),
        };
        let condition = inline
            .condition
            .as_deref()
            .ok_or_else(|| malformed("inline branch without condition"))?;
        let target = if self.dispatcher.evaluate_condition(condition)? {
            &inline.yes
        } else {
            &inline.no
        };
        target
            .clone()
            .ok_or_else(|| malformed("inline branch missing target").into())
    }
}
