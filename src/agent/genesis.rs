//! Staged "genesis fill": replays a generated blueprint into the draft form
//! one fragment at a time so the configuration appears to type itself in.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use log::debug;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

use super::config::{AgentConfig, SharedDraft, Skill, SlashCommand, SubAgent, lock_draft};

/// Delay between two consecutive fragments.
pub const DEFAULT_STEP_DELAY: Duration = Duration::from_millis(300);

/// One partial configuration fragment delivered by the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum GenesisStep {
    SystemPrompt(String),
    AllowedTools(Vec<String>),
    Agents(BTreeMap<String, SubAgent>),
    Skills(BTreeMap<String, Skill>),
    Commands(BTreeMap<String, SlashCommand>),
}

/// Splits a generated config into the ordered fragments the scheduler replays.
///
/// Order is fixed: system prompt, tools, sub-agents, skills, commands. A field
/// only yields a step when the config carries it; the prompt must also be non-empty.
pub fn build_genesis_steps(config: &AgentConfig) -> Vec<GenesisStep> {
    let mut steps = Vec::new();
    if let Some(prompt) = config.system_prompt.as_ref().filter(|p| !p.is_empty()) {
        steps.push(GenesisStep::SystemPrompt(prompt.clone()));
    }
    if let Some(tools) = &config.allowed_tools {
        steps.push(GenesisStep::AllowedTools(tools.clone()));
    }
    if let Some(agents) = &config.agents {
        steps.push(GenesisStep::Agents(agents.clone()));
    }
    if let Some(skills) = &config.skills {
        steps.push(GenesisStep::Skills(skills.clone()));
    }
    if let Some(commands) = &config.commands {
        steps.push(GenesisStep::Commands(commands.clone()));
    }
    steps
}

/// How a scheduled fill ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// Every fragment was delivered.
    Completed,
    /// A newer `schedule` call or teardown cancelled the fill before it finished.
    Superseded,
}

type HydrateFn = dyn Fn(GenesisStep) + Send + Sync;

/// Cancellable fixed-delay replay of genesis steps.
///
/// Each `schedule` call bumps a generation counter and aborts the timer task of
/// the previous call, so only the newest schedule ever delivers fragments.
/// Dropping the scheduler clears every pending timer.
pub struct GenesisScheduler {
    generation: Arc<AtomicU64>,
    delay: Duration,
    on_hydrate: Arc<HydrateFn>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl GenesisScheduler {
    pub fn new<F>(delay: Duration, on_hydrate: F) -> Self
    where
        F: Fn(GenesisStep) + Send + Sync + 'static,
    {
        Self {
            generation: Arc::new(AtomicU64::new(0)),
            delay,
            on_hydrate: Arc::new(on_hydrate),
            task: Mutex::new(None),
        }
    }

    /// A scheduler whose fragments are written straight into the shared draft.
    pub fn for_draft(delay: Duration, draft: SharedDraft) -> Self {
        Self::new(delay, move |step| lock_draft(&draft).apply_step(step))
    }

    /// Starts replaying `steps`. Must be called inside a tokio runtime.
    ///
    /// Step `i` fires `delay * (i + 1)` after this call; deadlines are measured
    /// from the call, not from the previous firing.
    pub fn schedule(&self, steps: Vec<GenesisStep>) -> GenesisFill {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.cancel_task();

        if steps.is_empty() {
            return GenesisFill::ready();
        }

        let start = Instant::now();
        let delay = self.delay;
        let current = Arc::clone(&self.generation);
        let on_hydrate = Arc::clone(&self.on_hydrate);
        let (done_tx, done_rx) = oneshot::channel();
        let total = steps.len();
        debug!("genesis fill #{} scheduled with {} steps", generation, total);

        let handle = tokio::spawn(async move {
            for (index, step) in steps.into_iter().enumerate() {
                sleep_until(start + delay * (index as u32 + 1)).await;
                if current.load(Ordering::SeqCst) != generation {
                    return;
                }
                on_hydrate(step);
            }
            let _ = done_tx.send(());
        });
        if let Ok(mut slot) = self.task.lock() {
            *slot = Some(handle);
        }
        GenesisFill::pending(done_rx)
    }

    /// Clears pending timers without scheduling anything new.
    pub fn shutdown(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cancel_task();
    }

    fn cancel_task(&self) {
        let previous = match self.task.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = previous {
            handle.abort();
        }
    }
}

impl Drop for GenesisScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Completion handle returned by [`GenesisScheduler::schedule`].
///
/// Dropping it does not cancel the fill; fragments keep arriving until the
/// schedule is replaced or the scheduler is torn down.
pub struct GenesisFill {
    done: Option<oneshot::Receiver<()>>,
}

impl GenesisFill {
    fn ready() -> Self {
        Self { done: None }
    }

    fn pending(done: oneshot::Receiver<()>) -> Self {
        Self { done: Some(done) }
    }
}

impl Future for GenesisFill {
    type Output = FillOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.done.as_mut() {
            None => Poll::Ready(FillOutcome::Completed),
            Some(done) => match Pin::new(done).poll(cx) {
                Poll::Ready(Ok(())) => Poll::Ready(FillOutcome::Completed),
                Poll::Ready(Err(_)) => Poll::Ready(FillOutcome::Superseded),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}
