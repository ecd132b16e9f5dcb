//! Linear step driver with per-step failure policy
//!
//! Steps run in order against a shared context. A failing [`StepOutcome::Fatal`]
//! step aborts the run; the remaining steps are recorded as not run. Failures of
//! other steps are logged and the run continues.

use crate::types::StepOutcome;
use anyhow::Result;

type StepFn<'a, Ctx> = Box<dyn FnMut(&mut Ctx) -> Result<()> + 'a>;

/// What happened to one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Succeeded,
    Failed { error: String },
    /// A fatal step failed earlier
    NotRun,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub name: String,
    pub outcome: StepOutcome,
    pub status: StepStatus,
}

impl StepRecord {
    pub fn failed(&self) -> bool {
        matches!(self.status, StepStatus::Failed { .. })
    }
}

/// Result of a pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub steps: Vec<StepRecord>,
    /// Name of the fatal step that stopped the run
    pub aborted_at: Option<String>,
}

impl PipelineReport {
    /// No fatal step failed.
    pub fn is_success(&self) -> bool {
        self.aborted_at.is_none()
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(|s| s.failed())
    }

    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// Observer for pipeline progress
pub trait StepObserver {
    /// Called before a step runs
    fn on_step_start(&mut self, name: &str, outcome: StepOutcome);

    /// Called after a step ran
    fn on_step_complete(&mut self, record: &StepRecord);
}

/// No-op observer
pub struct NoObserver;

impl StepObserver for NoObserver {
    fn on_step_start(&mut self, _name: &str, _outcome: StepOutcome) {}
    fn on_step_complete(&mut self, _record: &StepRecord) {}
}

/// Ordered list of named steps
pub struct Pipeline<'a, Ctx> {
    steps: Vec<(String, StepOutcome, StepFn<'a, Ctx>)>,
}

impl<Ctx> Default for Pipeline<'_, Ctx> {
    fn default() -> Self {
        Self { steps: Vec::new() }
    }
}

impl<'a, Ctx> Pipeline<'a, Ctx> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step.
    pub fn step(
        mut self,
        name: impl Into<String>,
        outcome: StepOutcome,
        run: impl FnMut(&mut Ctx) -> Result<()> + 'a,
    ) -> Self {
        self.steps.push((name.into(), outcome, Box::new(run)));
        self
    }

    /// Run every step in order.
    pub fn run<O: StepObserver>(self, ctx: &mut Ctx, observer: &mut O) -> PipelineReport {
        let mut report = PipelineReport::default();

        for (name, outcome, mut run) in self.steps {
            if report.aborted_at.is_some() {
                report.steps.push(StepRecord {
                    name,
                    outcome,
                    status: StepStatus::NotRun,
                });
                continue;
            }

            observer.on_step_start(&name, outcome);

            let status = match run(ctx) {
                Ok(()) => StepStatus::Succeeded,
                Err(e) => {
                    let error = format!("{e:#}");
                    match outcome {
                        StepOutcome::Fatal => {
                            log::error!("{name} failed: {error}");
                            report.aborted_at = Some(name.clone());
                        }
                        StepOutcome::Recoverable => {
                            log::error!("{name} failed, continuing: {error}");
                        }
                        StepOutcome::Informational => log::warn!("{name}: {error}"),
                    }
                    StepStatus::Failed { error }
                }
            };

            let record = StepRecord {
                name,
                outcome,
                status,
            };
            observer.on_step_complete(&record);
            report.steps.push(record);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Trace {
        ran: Vec<&'static str>,
    }

    #[test]
    fn test_all_steps_run_in_order() {
        let mut trace = Trace::default();
        let report = Pipeline::new()
            .step("a", StepOutcome::Fatal, |t: &mut Trace| {
                t.ran.push("a");
                Ok(())
            })
            .step("b", StepOutcome::Recoverable, |t: &mut Trace| {
                t.ran.push("b");
                Ok(())
            })
            .run(&mut trace, &mut NoObserver);

        assert!(report.is_success());
        assert_eq!(trace.ran, vec!["a", "b"]);
        assert_eq!(report.failures().count(), 0);
    }

    #[test]
    fn test_fatal_failure_aborts() {
        let mut trace = Trace::default();
        let report = Pipeline::new()
            .step("auth", StepOutcome::Fatal, |_: &mut Trace| {
                anyhow::bail!("HTTP 401")
            })
            .step("index", StepOutcome::Fatal, |t: &mut Trace| {
                t.ran.push("index");
                Ok(())
            })
            .run(&mut trace, &mut NoObserver);

        assert!(!report.is_success());
        assert_eq!(report.aborted_at.as_deref(), Some("auth"));
        assert!(trace.ran.is_empty());
        assert_eq!(report.step("index").unwrap().status, StepStatus::NotRun);
    }

    #[test]
    fn test_recoverable_and_informational_continue() {
        let mut trace = Trace::default();
        let report = Pipeline::new()
            .step("flow", StepOutcome::Informational, |_: &mut Trace| {
                anyhow::bail!("not found")
            })
            .step("upsert", StepOutcome::Recoverable, |_: &mut Trace| {
                anyhow::bail!("HTTP 500")
            })
            .step("assign", StepOutcome::Fatal, |t: &mut Trace| {
                t.ran.push("assign");
                Ok(())
            })
            .run(&mut trace, &mut NoObserver);

        assert!(report.is_success());
        assert_eq!(trace.ran, vec!["assign"]);
        assert_eq!(report.failures().count(), 2);
    }

    #[test]
    fn test_observer_sees_each_executed_step() {
        struct Counter {
            started: usize,
            completed: usize,
        }
        impl StepObserver for Counter {
            fn on_step_start(&mut self, _: &str, _: StepOutcome) {
                self.started += 1;
            }
            fn on_step_complete(&mut self, _: &StepRecord) {
                self.completed += 1;
            }
        }

        let mut counter = Counter {
            started: 0,
            completed: 0,
        };
        let report = Pipeline::new()
            .step("a", StepOutcome::Fatal, |_: &mut ()| anyhow::bail!("boom"))
            .step("b", StepOutcome::Fatal, |_: &mut ()| Ok(()))
            .run(&mut (), &mut counter);

        assert_eq!(report.steps.len(), 2);
        assert_eq!(counter.started, 1);
        assert_eq!(counter.completed, 1);
    }
}
