use crate::metrics::{RefreshKind, RefreshMetrics, ThreatMetrics};
use kube_safebrowsing_core::{
    DiscoverRoutes, DomainSet, LookupError, LookupThreats, RoutingRule, ThreatStatus,
};
use parking_lot::Mutex;
use std::{future::Future, sync::Arc};
use tokio::{task::JoinHandle, time};
use tracing::{debug, error, info, info_span, Instrument};

/// Keeps the exported threat metrics in sync with the routes declared in the
/// cluster.
///
/// The reconciler owns the latest snapshot of routing rules and the metric
/// registry. Routes and threat matches are refreshed on independent schedules.
#[derive(Debug)]
pub struct Reconciler<R, T> {
    routes: R,
    threats: T,
    additional_domains: Vec<String>,
    snapshot: Mutex<Vec<RoutingRule>>,
    metrics: ThreatMetrics,
    refreshes: RefreshMetrics,
}

/// Refresh periods for the two reconciliation loops.
#[derive(Copy, Clone, Debug)]
pub struct Intervals {
    pub routes: time::Duration,
    pub threats: time::Duration,
}

/// Owns the reconciliation loops and stops them on shutdown.
#[must_use = "dropping the supervisor does not stop the loops"]
pub struct Supervisor {
    signal: drain::Signal,
    tasks: Vec<JoinHandle<()>>,
}

// === impl Reconciler ===

impl<R, T> Reconciler<R, T>
where
    R: DiscoverRoutes + 'static,
    T: LookupThreats + 'static,
{
    pub fn new(
        routes: R,
        threats: T,
        additional_domains: Vec<String>,
        metrics: ThreatMetrics,
        refreshes: RefreshMetrics,
    ) -> Self {
        Self {
            routes,
            threats,
            additional_domains,
            snapshot: Mutex::new(Vec::new()),
            metrics,
            refreshes,
        }
    }

    /// Performs the initial route and threat refreshes.
    ///
    /// Unlike the periodic loops, a failure here is returned to the caller so
    /// that the process does not start without any knowledge of the cluster.
    pub async fn init(&self) -> Result<(), LookupError> {
        info!("Initializing");
        self.refresh_routes().await?;
        self.refresh_threats().await?;
        Ok(())
    }

    /// Replaces the snapshot with the current routing rules. On error the
    /// previous snapshot is kept.
    pub async fn refresh_routes(&self) -> Result<usize, LookupError> {
        debug!("Updating routes");
        let rules = match self.routes.list_routes().await {
            Ok(rules) => rules,
            Err(error) => {
                self.refreshes.error(RefreshKind::Routes);
                return Err(error);
            }
        };

        let count = rules.len();
        *self.snapshot.lock() = rules;
        self.refreshes.ok(RefreshKind::Routes);
        debug!(routes = count, "Updated routes");
        Ok(count)
    }

    /// Looks up every domain in the current snapshot and updates the metrics.
    /// On error no metric is changed.
    pub async fn refresh_threats(&self) -> Result<ThreatStatus, LookupError> {
        let domains = self.domains();
        debug!(domains = domains.len(), "Updating threat matches");
        let status = match self.threats.lookup(&domains).await {
            Ok(status) => status,
            Err(error) => {
                self.refreshes.error(RefreshKind::Threats);
                return Err(error);
            }
        };

        self.metrics.set_all(&status);
        self.refreshes.ok(RefreshKind::Threats);
        let matched = status.values().filter(|m| **m).count();
        debug!(domains = status.len(), matched, "Updated threat matches");
        Ok(status)
    }

    /// Returns the domains of the current snapshot followed by the additional
    /// domains.
    pub fn domains(&self) -> DomainSet {
        let snapshot = self.snapshot.lock();
        DomainSet::from_rules(snapshot.iter(), &self.additional_domains)
    }

    /// Returns a copy of the current snapshot.
    pub fn snapshot(&self) -> Vec<RoutingRule> {
        self.snapshot.lock().clone()
    }

    pub fn metrics(&self) -> &ThreatMetrics {
        &self.metrics
    }

    /// Spawns the route and threat refresh loops.
    ///
    /// The first iteration of each loop runs one full period after this call,
    /// since [`Reconciler::init`] has already refreshed both.
    pub fn spawn(self: &Arc<Self>, intervals: Intervals) -> Supervisor {
        let (signal, watch) = drain::channel();

        let routes = {
            let this = self.clone();
            tokio::spawn(
                every(intervals.routes, watch.clone(), move || {
                    let this = this.clone();
                    async move {
                        if let Err(error) = this.refresh_routes().await {
                            error!(%error, "Failed to update routes");
                        }
                    }
                })
                .instrument(info_span!("routes")),
            )
        };

        let threats = {
            let this = self.clone();
            tokio::spawn(
                every(intervals.threats, watch, move || {
                    let this = this.clone();
                    async move {
                        if let Err(error) = this.refresh_threats().await {
                            error!(%error, "Failed to update threat matches");
                        }
                    }
                })
                .instrument(info_span!("threats")),
            )
        };

        Supervisor {
            signal,
            tasks: vec![routes, threats],
        }
    }
}

// === impl Supervisor ===

impl Supervisor {
    /// Signals both loops to stop and waits for them to finish their current
    /// iteration.
    pub async fn shutdown(self) {
        let Self { signal, tasks } = self;
        signal.drain().await;
        for task in tasks {
            if let Err(error) = task.await {
                error!(%error, "Reconciliation task failed");
            }
        }
    }
}

/// Runs `f` once per `period` until `drain` is signaled.
async fn every<F, Fut>(period: time::Duration, drain: drain::Watch, mut f: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticks = time::interval_at(time::Instant::now() + period, period);
    ticks.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    tokio::pin! {
        let shutdown = drain.signaled();
    }

    loop {
        tokio::select! {
            _ = ticks.tick() => f().await,
            _ = &mut shutdown => {
                debug!("Stopping");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube_safebrowsing_core::BoxError;
    use maplit::hashmap;
    use pretty_assertions::assert_eq;
    use prometheus_client::registry::Registry;
    use std::collections::VecDeque;

    /// Returns scripted results, repeating the last one once the script is
    /// exhausted.
    #[derive(Clone, Default)]
    struct Scripted<T> {
        results: Arc<Mutex<VecDeque<Result<T, String>>>>,
        calls: Arc<Mutex<Vec<Vec<String>>>>,
    }

    impl<T: Clone> Scripted<T> {
        fn push_ok(&self, value: T) -> &Self {
            self.results.lock().push_back(Ok(value));
            self
        }

        fn push_err(&self, error: &str) -> &Self {
            self.results.lock().push_back(Err(error.to_string()));
            self
        }

        fn next(&self) -> Result<T, LookupError> {
            let mut results = self.results.lock();
            let next = if results.len() > 1 {
                results.pop_front()
            } else {
                results.front().cloned()
            };
            match next.expect("no scripted result") {
                Ok(value) => Ok(value),
                Err(error) => Err(LookupError::Provider(BoxError::from(error))),
            }
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().clone()
        }
    }

    #[async_trait::async_trait]
    impl DiscoverRoutes for Scripted<Vec<RoutingRule>> {
        async fn list_routes(&self) -> Result<Vec<RoutingRule>, LookupError> {
            self.calls.lock().push(vec![]);
            self.next()
        }
    }

    #[async_trait::async_trait]
    impl LookupThreats for Scripted<ThreatStatus> {
        async fn lookup(&self, domains: &DomainSet) -> Result<ThreatStatus, LookupError> {
            self.calls
                .lock()
                .push(domains.iter().map(ToString::to_string).collect());
            self.next()
        }
    }

    type TestReconciler = Reconciler<Scripted<Vec<RoutingRule>>, Scripted<ThreatStatus>>;

    fn mk_reconciler(
        routes: &Scripted<Vec<RoutingRule>>,
        threats: &Scripted<ThreatStatus>,
        additional_domains: &[&str],
    ) -> Arc<TestReconciler> {
        let mut prom = Registry::default();
        let metrics = ThreatMetrics::register(&mut prom);
        let refreshes = RefreshMetrics::register(&mut prom);
        Arc::new(Reconciler::new(
            routes.clone(),
            threats.clone(),
            additional_domains.iter().map(ToString::to_string).collect(),
            metrics,
            refreshes,
        ))
    }

    fn ingress_1() -> Vec<RoutingRule> {
        vec![RoutingRule::new("default", "ingress-1", ["a.example.com"])]
    }

    #[tokio::test]
    async fn unmatched_domain_reads_zero() {
        let routes = Scripted::default();
        routes.push_ok(ingress_1());
        let threats = Scripted::default();
        threats.push_ok(hashmap! { "a.example.com".to_string() => false });

        let reconciler = mk_reconciler(&routes, &threats, &[]);
        reconciler.init().await.unwrap();
        assert_eq!(reconciler.metrics().get("a.example.com"), Some(0.0));
    }

    #[tokio::test]
    async fn matched_domain_reads_one() {
        let routes = Scripted::default();
        routes.push_ok(ingress_1());
        let threats = Scripted::default();
        threats.push_ok(hashmap! { "a.example.com".to_string() => true });

        let reconciler = mk_reconciler(&routes, &threats, &[]);
        reconciler.init().await.unwrap();
        assert_eq!(reconciler.metrics().get("a.example.com"), Some(1.0));
    }

    #[tokio::test]
    async fn lookup_includes_additional_domains() {
        let routes = Scripted::default();
        routes.push_ok(vec![
            RoutingRule::new("default", "ingress-1", ["a.example.com"]),
            RoutingRule::new("other", "ingress-2", ["b.example.com", "a.example.com"]),
        ]);
        let threats = Scripted::default();
        threats.push_ok(ThreatStatus::new());

        let reconciler = mk_reconciler(&routes, &threats, &["extra.example.org", "b.example.com"]);
        reconciler.init().await.unwrap();
        assert_eq!(
            threats.calls(),
            vec![vec![
                "a.example.com".to_string(),
                "b.example.com".to_string(),
                "extra.example.org".to_string(),
            ]],
        );
    }

    #[tokio::test]
    async fn failed_lookup_keeps_previous_values() {
        let routes = Scripted::default();
        routes.push_ok(ingress_1());
        let threats = Scripted::default();
        threats
            .push_ok(hashmap! { "a.example.com".to_string() => true })
            .push_err("provider unavailable");

        let reconciler = mk_reconciler(&routes, &threats, &[]);
        reconciler.init().await.unwrap();
        assert_eq!(reconciler.metrics().get("a.example.com"), Some(1.0));

        reconciler
            .refresh_threats()
            .await
            .expect_err("lookup must fail");
        assert_eq!(reconciler.metrics().get("a.example.com"), Some(1.0));
    }

    #[tokio::test]
    async fn failed_route_refresh_keeps_snapshot() {
        let routes = Scripted::default();
        routes.push_ok(ingress_1()).push_err("apiserver unavailable");
        let threats = Scripted::default();
        threats.push_ok(ThreatStatus::new());

        let reconciler = mk_reconciler(&routes, &threats, &[]);
        reconciler.init().await.unwrap();
        reconciler
            .refresh_routes()
            .await
            .expect_err("listing must fail");
        assert_eq!(reconciler.snapshot(), ingress_1());
    }

    #[tokio::test]
    async fn removed_domain_is_cleared_but_stays_registered() {
        let routes = Scripted::default();
        routes.push_ok(vec![
            RoutingRule::new("default", "ingress-1", ["a.example.com"]),
            RoutingRule::new("default", "ingress-2", ["b.example.com"]),
        ]);
        routes.push_ok(vec![RoutingRule::new("default", "ingress-2", ["b.example.com"])]);
        let threats = Scripted::default();
        threats.push_ok(hashmap! {
            "a.example.com".to_string() => true,
            "b.example.com".to_string() => true,
        });
        threats.push_ok(hashmap! { "b.example.com".to_string() => true });

        let reconciler = mk_reconciler(&routes, &threats, &[]);
        reconciler.init().await.unwrap();
        assert_eq!(reconciler.metrics().get("a.example.com"), Some(1.0));

        reconciler.refresh_routes().await.unwrap();
        reconciler.refresh_threats().await.unwrap();
        assert_eq!(reconciler.metrics().get("a.example.com"), Some(0.0));
        assert_eq!(reconciler.metrics().get("b.example.com"), Some(1.0));
        assert_eq!(reconciler.metrics().len(), 2);
    }

    #[tokio::test]
    async fn init_fails_when_routes_fail() {
        let routes = Scripted::default();
        routes.push_err("apiserver unavailable");
        let threats = Scripted::default();
        threats.push_ok(ThreatStatus::new());

        let reconciler = mk_reconciler(&routes, &threats, &[]);
        reconciler.init().await.expect_err("init must fail");
        assert!(threats.calls().is_empty(), "threats must not be looked up");
    }

    #[tokio::test]
    async fn init_fails_when_lookup_fails() {
        let routes = Scripted::default();
        routes.push_ok(ingress_1());
        let threats = Scripted::default();
        threats.push_err("invalid API key");

        let reconciler = mk_reconciler(&routes, &threats, &[]);
        reconciler.init().await.expect_err("init must fail");
        assert!(reconciler.metrics().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn loops_continue_after_errors_until_shutdown() {
        let routes = Scripted::default();
        routes
            .push_ok(ingress_1())
            .push_err("apiserver unavailable")
            .push_ok(vec![RoutingRule::new("default", "ingress-2", ["b.example.com"])]);
        let threats = Scripted::default();
        threats
            .push_ok(hashmap! { "a.example.com".to_string() => true })
            .push_err("provider unavailable")
            .push_ok(hashmap! { "b.example.com".to_string() => true });

        let reconciler = mk_reconciler(&routes, &threats, &[]);
        reconciler.init().await.unwrap();

        let supervisor = reconciler.spawn(Intervals {
            routes: time::Duration::from_secs(60),
            threats: time::Duration::from_secs(300),
        });

        // Routes refresh at 60s (error) and 120s (ingress-2).
        time::sleep(time::Duration::from_secs(150)).await;
        assert_eq!(
            reconciler.snapshot(),
            vec![RoutingRule::new("default", "ingress-2", ["b.example.com"])],
        );
        assert_eq!(reconciler.metrics().get("a.example.com"), Some(1.0));

        // Threats refresh at 300s (error) and 600s.
        time::sleep(time::Duration::from_secs(200)).await;
        assert_eq!(reconciler.metrics().get("a.example.com"), Some(1.0));
        time::sleep(time::Duration::from_secs(300)).await;
        assert_eq!(reconciler.metrics().get("a.example.com"), Some(0.0));
        assert_eq!(reconciler.metrics().get("b.example.com"), Some(1.0));

        supervisor.shutdown().await;
        let lookups = threats.calls().len();
        time::sleep(time::Duration::from_secs(3600)).await;
        assert_eq!(threats.calls().len(), lookups, "loops must be stopped");
    }
}
