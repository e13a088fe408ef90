//! Bulk upgrade of every upgradable service instance of one broker.

pub mod ccapi;
pub mod logger;
pub mod validate;
mod workers;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at};

pub use ccapi::{CcApi, LastOperation, Plan, PollSettings, ServiceInstance, UpgradeApi};
pub use logger::{SharedBuffer, UpgradeLogger};

use crate::error::UpgradeError;

pub const DEFAULT_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct UpgradeOptions {
    /// Number of upgrades in flight at once.
    pub batch_size: usize,
    /// Period of the `upgraded X of Y` ticker.
    pub progress_period: Duration,
}

impl Default for UpgradeOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            progress_period: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeTask {
    pub guid: String,
    pub target_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeSummary {
    pub total: usize,
    pub upgradable: usize,
    pub succeeded: usize,
    /// Reason per failed instance GUID.
    pub failed: BTreeMap<String, String>,
}

/// Upgrade every instance of `broker`'s plans that has an upgrade available.
///
/// Per-instance failures are reported and do not stop the pass; only
/// discovery errors are returned.
pub async fn upgrade_all(
    api: Arc<dyn UpgradeApi>,
    broker: &str,
    options: UpgradeOptions,
    logger: Arc<UpgradeLogger>,
) -> Result<UpgradeSummary, UpgradeError> {
    validate::broker_name(broker)?;
    validate::batch_size(options.batch_size)?;
    validate::api_version(&api.api_version().await?)?;

    let plans = api.get_service_plans(broker).await?;
    let plan_versions: HashMap<String, String> = plans
        .iter()
        .map(|p| (p.guid.clone(), p.maintenance_version().to_string()))
        .collect();
    let plan_guids: Vec<String> = plans.into_iter().map(|p| p.guid).collect();

    logger.printf(&format!("discovering service instances for broker: {broker}"));
    let instances = api.get_service_instances(&plan_guids).await?;

    let tasks: Vec<UpgradeTask> = instances
        .iter()
        .filter(|i| i.upgrade_available)
        .map(|i| UpgradeTask {
            guid: i.guid.clone(),
            target_version: plan_versions.get(i.plan_guid()).cloned().unwrap_or_default(),
        })
        .collect();

    let mut summary = UpgradeSummary {
        total: instances.len(),
        upgradable: tasks.len(),
        ..Default::default()
    };

    logger.initial_totals(summary.total, summary.upgradable);
    if tasks.is_empty() {
        logger.printf("no instances available to upgrade");
        return Ok(summary);
    }
    logger.printf("starting upgrade...");

    let ticker = {
        let logger = Arc::clone(&logger);
        let period = options.progress_period;
        tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            loop {
                ticks.tick().await;
                logger.progress();
            }
        })
    };

    let (tx, rx) = mpsc::channel(options.batch_size);
    let producer = tokio::spawn(async move {
        for task in tasks {
            if tx.send(task).await.is_err() {
                break;
            }
        }
    });

    let worker_api = Arc::clone(&api);
    let worker_logger = Arc::clone(&logger);
    workers::run(options.batch_size, rx, move |task: UpgradeTask| {
        let api = Arc::clone(&worker_api);
        let logger = Arc::clone(&worker_logger);
        async move {
            logger.starting(&task.guid);
            let started = Instant::now();
            match api
                .upgrade_service_instance(&task.guid, &task.target_version)
                .await
            {
                Ok(()) => logger.succeeded(&task.guid, started.elapsed()),
                Err(e) => {
                    tracing::warn!(guid = %task.guid, error = %e, "upgrade failed");
                    logger.failed(&task.guid, started.elapsed(), &e.to_string());
                }
            }
        }
    })
    .await;

    ticker.abort();
    if let Err(e) = producer.await {
        tracing::error!(error = %e, "upgrade task producer stopped abnormally");
    }

    logger.final_totals();
    summary.succeeded = logger.succeeded_count();
    summary.failed = logger.failures();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fake platform: records calls, fails instances listed in `failures`,
    /// and tracks how many upgrades overlap.
    #[derive(Default)]
    struct FakeApi {
        plans: Vec<(String, String)>,
        instances: Vec<(String, bool, String)>,
        failures: HashMap<String, String>,
        upgraded: Mutex<Vec<(String, String)>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        fail_discovery: bool,
        api_version: Option<&'static str>,
    }

    #[async_trait]
    impl UpgradeApi for FakeApi {
        async fn api_version(&self) -> Result<String, UpgradeError> {
            Ok(self.api_version.unwrap_or("3.181.0").to_string())
        }

        async fn get_service_plans(&self, _broker: &str) -> Result<Vec<Plan>, UpgradeError> {
            if self.fail_discovery {
                return Err(UpgradeError::Discovery(
                    "error getting service plans: http response: 500".to_string(),
                ));
            }
            Ok(self
                .plans
                .iter()
                .map(|(guid, version)| {
                    serde_json::from_value(serde_json::json!({
                        "guid": guid, "maintenance_info": {"version": version}
                    }))
                    .unwrap()
                })
                .collect())
        }

        async fn get_service_instances(
            &self,
            _plan_guids: &[String],
        ) -> Result<Vec<ServiceInstance>, UpgradeError> {
            Ok(self
                .instances
                .iter()
                .map(|(guid, available, plan)| {
                    serde_json::from_value(serde_json::json!({
                        "guid": guid,
                        "upgrade_available": available,
                        "relationships": {"service_plan": {"data": {"guid": plan}}}
                    }))
                    .unwrap()
                })
                .collect())
        }

        async fn upgrade_service_instance(
            &self,
            guid: &str,
            version: &str,
        ) -> Result<(), UpgradeError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.upgraded
                .lock()
                .push((guid.to_string(), version.to_string()));
            match self.failures.get(guid) {
                Some(description) => Err(UpgradeError::Failed {
                    description: description.clone(),
                }),
                None => Ok(()),
            }
        }
    }

    fn options(batch_size: usize) -> UpgradeOptions {
        UpgradeOptions {
            batch_size,
            progress_period: Duration::from_millis(5),
        }
    }

    fn logger() -> (Arc<UpgradeLogger>, SharedBuffer) {
        let buf = SharedBuffer::default();
        (Arc::new(UpgradeLogger::new(buf.clone())), buf)
    }

    #[tokio::test]
    async fn upgrades_available_instances_and_tabulates_failures() {
        let api = Arc::new(FakeApi {
            plans: vec![("P".into(), "1.0.1".into())],
            instances: vec![
                ("A".into(), true, "P".into()),
                ("B".into(), true, "P".into()),
                ("C".into(), false, "P".into()),
            ],
            failures: HashMap::from([("B".to_string(), "boom".to_string())]),
            ..Default::default()
        });
        let (log, buf) = logger();

        let summary = upgrade_all(api.clone(), "csb", options(10), log).await.unwrap();

        let mut calls = api.upgraded.lock().clone();
        calls.sort();
        assert_eq!(
            calls,
            [("A".to_string(), "1.0.1".to_string()), ("B".to_string(), "1.0.1".to_string())]
        );

        assert_eq!(summary.total, 3);
        assert_eq!(summary.upgradable, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed.get("B").map(String::as_str), Some("boom"));

        let out = buf.contents();
        assert!(out.contains("successfully upgraded 1 instances"));
        assert!(out.contains("failed to upgrade 1 instances"));
        assert!(out.lines().any(|l| l.contains(": B ") && l.ends_with("| boom")));
    }

    #[tokio::test]
    async fn nothing_to_upgrade_is_success() {
        let api = Arc::new(FakeApi {
            plans: vec![("P".into(), "1.0.1".into())],
            instances: vec![("C".into(), false, "P".into())],
            ..Default::default()
        });
        let (log, buf) = logger();

        let summary = upgrade_all(api.clone(), "csb", options(10), log).await.unwrap();

        assert_eq!(summary.upgradable, 0);
        assert!(api.upgraded.lock().is_empty());
        assert!(buf.contents().contains("no instances available to upgrade"));
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_batch_size() {
        let instances = (0..20)
            .map(|i| (format!("instance-{i}"), true, "P".to_string()))
            .collect();
        let api = Arc::new(FakeApi {
            plans: vec![("P".into(), "2.0.0".into())],
            instances,
            ..Default::default()
        });
        let (log, _) = logger();

        let summary = upgrade_all(api.clone(), "csb", options(3), log).await.unwrap();

        assert_eq!(summary.succeeded, 20);
        assert_eq!(api.upgraded.lock().len(), 20);
        assert!(api.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn discovery_errors_are_fatal() {
        let api = Arc::new(FakeApi {
            fail_discovery: true,
            ..Default::default()
        });
        let (log, _) = logger();

        let err = upgrade_all(api, "csb", options(10), log).await.unwrap_err();
        assert!(matches!(err, UpgradeError::Discovery(_)));
    }

    #[tokio::test]
    async fn old_platform_api_is_rejected_before_discovery() {
        let api = Arc::new(FakeApi {
            plans: vec![("P".into(), "1.0.1".into())],
            instances: vec![("A".into(), true, "P".into())],
            api_version: Some("3.98.0"),
            ..Default::default()
        });
        let (log, buf) = logger();

        let err = upgrade_all(api.clone(), "csb", options(10), log).await.unwrap_err();

        assert!(matches!(err, UpgradeError::InvalidInput(_)));
        assert_eq!(err.to_string(), "plugin requires CF API version >= 3.99.0");
        assert!(api.upgraded.lock().is_empty());
        assert!(buf.contents().is_empty());
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_any_call() {
        let api = Arc::new(FakeApi {
            fail_discovery: true,
            ..Default::default()
        });
        let (log, _) = logger();

        let err = upgrade_all(api.clone(), "bad name", options(10), log.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, UpgradeError::InvalidInput(_)));

        let err = upgrade_all(api, "csb", options(0), log).await.unwrap_err();
        assert!(matches!(err, UpgradeError::InvalidInput(_)));
    }
}
