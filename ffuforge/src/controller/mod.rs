//! Controller side of a build.
//!
//! [`BuildController::launch`] runs the orchestrator on its own tokio task
//! and hands back a [`BuildHandle`]. The handle only ever polls the
//! channel; it never blocks on the worker. Cancellation is cooperative,
//! with a grace period after which the worker task is aborted and any
//! external tools it started are killed.

mod summary;

pub use summary::{BuildSummary, CleanupStatus};

use crate::channel::{BuildChannel, BuildMessage, BuildState, ChannelOptions, MessageLevel};
use crate::config::BuildConfig;
use crate::imaging::ImagingSteps;
use crate::lock::BuildLock;
use crate::orchestrator::{BuildOrchestrator, BuildReport, BuildSteps};
use crate::provider::{HypervisorProvider, select_provider};
use crate::tools::{ChildTracker, CommandRunner, SystemRunner};
use ffuforge_shared::constants::channel::{DRAIN_BATCH, POLL_INTERVAL_MS};
use ffuforge_shared::constants::sources;
use ffuforge_shared::errors::FfuResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::Instrument;
use ulid::Ulid;

/// Everything needed to start one build.
pub struct BuildController {
    config: Arc<BuildConfig>,
    provider: Arc<dyn HypervisorProvider>,
    steps: Arc<dyn BuildSteps>,
    tracker: ChildTracker,
    channel_options: ChannelOptions,
}

impl BuildController {
    pub fn new(
        config: Arc<BuildConfig>,
        provider: Arc<dyn HypervisorProvider>,
        steps: Arc<dyn BuildSteps>,
    ) -> Self {
        Self {
            config,
            provider,
            steps,
            tracker: ChildTracker::new(),
            channel_options: ChannelOptions::default(),
        }
    }

    /// Wire the configured provider and [`ImagingSteps`] to real processes.
    ///
    /// Fails with `ProviderUnavailable` when the hypervisor is not usable.
    pub async fn for_host(config: BuildConfig) -> FfuResult<Self> {
        let tracker = ChildTracker::new();
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::with_tracker(tracker.clone()));
        let options = config.provider_options().with_runner(runner.clone());
        let provider = select_provider(config.provider, options).await?;
        let steps = Arc::new(ImagingSteps::new(runner));
        Ok(Self::new(Arc::new(config), provider, steps).with_tracker(tracker))
    }

    /// Processes registered here are killed if the worker misses its
    /// cancellation grace period.
    pub fn with_tracker(mut self, tracker: ChildTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_channel_options(mut self, options: ChannelOptions) -> Self {
        self.channel_options = options;
        self
    }

    /// Lock the work directory and start the build.
    ///
    /// Must be called from within a tokio runtime.
    pub fn launch(self) -> FfuResult<BuildHandle> {
        let lock = BuildLock::acquire(&self.config.work_dir)?;
        let id = Ulid::new();
        let channel = BuildChannel::new(self.channel_options);
        let mut orchestrator = BuildOrchestrator::new(
            self.config.clone(),
            self.provider,
            self.steps,
            channel.clone(),
        );

        let span = tracing::info_span!("build", id = %id, vm = %self.config.vm_name);
        let task = tokio::spawn(
            async move {
                let report = orchestrator.run().await;
                drop(lock);
                report
            }
            .instrument(span),
        );
        tracing::info!(id = %id, work_dir = %self.config.work_dir.display(), "Build launched");

        Ok(BuildHandle {
            id,
            channel,
            task,
            tracker: self.tracker,
            last_error: None,
        })
    }
}

/// Controller's view of a running build.
pub struct BuildHandle {
    id: Ulid,
    channel: BuildChannel,
    task: JoinHandle<BuildReport>,
    tracker: ChildTracker,
    last_error: Option<String>,
}

impl BuildHandle {
    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn channel(&self) -> &BuildChannel {
        &self.channel
    }

    pub fn state(&self) -> BuildState {
        self.channel.state()
    }

    /// Ask the worker to stop at its next checkpoint. Idempotent.
    pub fn cancel(&self) -> bool {
        self.channel.request_cancellation()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Take up to `max` queued messages without waiting.
    pub fn drain(&mut self, max: usize) -> Vec<BuildMessage> {
        let messages = self.channel.drain(max);
        if let Some(error) = messages
            .iter()
            .rev()
            .find(|m| m.level >= MessageLevel::Error)
        {
            self.last_error = Some(error.message.clone());
        }
        messages
    }

    /// Poll the channel at 20 Hz, passing every message to `sink`, until
    /// the worker finishes.
    pub async fn follow<F>(&mut self, mut sink: F)
    where
        F: FnMut(&BuildMessage),
    {
        let mut ticker = tokio::time::interval(Duration::from_millis(POLL_INTERVAL_MS));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let finished = self.is_finished();
            loop {
                let batch = self.drain(DRAIN_BATCH);
                if batch.is_empty() {
                    break;
                }
                batch.iter().for_each(&mut sink);
            }
            if finished {
                return;
            }
        }
    }

    /// Request cancellation and keep following for up to `grace`.
    ///
    /// If the worker has not stopped by then, its task is aborted and the
    /// external processes it started are killed. Returns true if the
    /// worker stopped on its own.
    pub async fn cancel_within<F>(&mut self, grace: Duration, sink: F) -> bool
    where
        F: FnMut(&BuildMessage),
    {
        if self.cancel() {
            self.channel
                .warning(sources::CONTROLLER, "Cancellation requested; waiting for the build to stop");
        }
        if tokio::time::timeout(grace, self.follow(sink)).await.is_ok() {
            return true;
        }

        tracing::warn!(id = %self.id, grace = ?grace, "Build did not stop in time; terminating");
        self.task.abort();
        let killed = self.tracker.kill_all();
        if killed > 0 {
            tracing::warn!(killed, "Killed external processes");
        }
        false
    }

    /// Wait for the worker and summarise the build.
    pub async fn wait(mut self) -> BuildSummary {
        let result = (&mut self.task).await;
        // Pick up the terminal messages for last_error.
        while !self.drain(DRAIN_BATCH).is_empty() {}
        match result {
            Ok(report) => BuildSummary::from_report(report, self.last_error),
            Err(e) if e.is_cancelled() => {
                BuildSummary::crashed("build worker was terminated", self.last_error)
            }
            Err(e) => BuildSummary::crashed(format!("build worker panicked: {e}"), self.last_error),
        }
    }
}

impl std::fmt::Debug for BuildHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("finished", &self.is_finished())
            .finish()
    }
}
