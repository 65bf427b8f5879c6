//! Fixed-interval tick loop, one task per entity.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::entity::SimulatedEntity;
use crate::publish::Publisher;

/// Scheduler knobs shared by every entity task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerOptions {
    /// Simulated seconds per wall-clock second.
    pub time_scale: f64,
    /// Stop each entity after this many ticks.
    pub max_ticks: Option<u64>,
    /// Replace every entity's own tick interval.
    pub tick_override: Option<Duration>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            max_ticks: None,
            tick_override: None,
        }
    }
}

/// Per-entity totals reported at shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySummary {
    pub device_id: String,
    pub ticks: u64,
    pub failures: u64,
}

pub struct PublishScheduler {
    publisher: Arc<dyn Publisher>,
    options: SchedulerOptions,
}

impl PublishScheduler {
    pub fn new(publisher: Arc<dyn Publisher>, options: SchedulerOptions) -> Self {
        Self { publisher, options }
    }

    /// Drive every entity until shutdown is signalled or each reaches
    /// `max_ticks`. Returns one summary per entity that exited normally.
    pub async fn run(
        &self,
        entities: Vec<SimulatedEntity>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<EntitySummary> {
        info!(
            entities = entities.len(),
            publisher = self.publisher.name(),
            time_scale = self.options.time_scale,
            "scheduler starting"
        );

        let mut tasks = JoinSet::new();
        for entity in entities {
            tasks.spawn(drive(
                entity,
                Arc::clone(&self.publisher),
                self.options,
                shutdown.clone(),
            ));
        }

        let mut summaries = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(summary) => {
                    info!(
                        device_id = %summary.device_id,
                        ticks = summary.ticks,
                        failures = summary.failures,
                        "entity stopped"
                    );
                    summaries.push(summary);
                }
                Err(e) => error!(error = %e, "entity task aborted"),
            }
        }
        summaries.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        summaries
    }
}

async fn drive(
    mut entity: SimulatedEntity,
    publisher: Arc<dyn Publisher>,
    options: SchedulerOptions,
    mut shutdown: watch::Receiver<bool>,
) -> EntitySummary {
    let period = options.tick_override.unwrap_or_else(|| entity.tick_interval());
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last = Instant::now();
    let mut failures = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = interval.tick() => {}
        }

        let now = Instant::now();
        let elapsed_secs = now.duration_since(last).as_secs_f64() * options.time_scale;
        last = now;

        let packet = entity.tick(elapsed_secs, Utc::now());
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            result = publisher.publish(&packet) => {
                if let Err(e) = result {
                    failures += 1;
                    warn!(
                        device_id = %entity.device_id(),
                        tick = packet.tick,
                        error = %e,
                        "publish failed, continuing"
                    );
                }
            }
        }

        if options.max_ticks.is_some_and(|max| entity.ticks() >= max) {
            break;
        }
    }

    EntitySummary {
        device_id: entity.device_id().to_owned(),
        ticks: entity.ticks(),
        failures,
    }
}
