use ahash::AHashMap as HashMap;
use kube_safebrowsing_core::ThreatStatus;
use parking_lot::Mutex;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::{Registry, Unit},
};
use std::sync::atomic::AtomicU64;

pub type ThreatGauge = Gauge<f64, AtomicU64>;

/// Exports one `threat_matches` gauge per domain.
///
/// Gauges are never unregistered. A domain that is no longer looked up keeps
/// its series with a value of 0 so that the exported cardinality only grows.
#[derive(Debug)]
pub struct ThreatMetrics {
    matches: Family<DomainLabels, ThreatGauge>,
    gauges: Mutex<HashMap<String, ThreatGauge>>,
}

/// Tracks the outcome of each refresh so that stale values can be detected.
#[derive(Clone, Debug)]
pub struct RefreshMetrics {
    refreshes: Family<RefreshLabels, Counter>,
    last_success: Family<KindLabels, ThreatGauge>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct DomainLabels {
    domain: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct RefreshLabels {
    kind: &'static str,
    result: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct KindLabels {
    kind: &'static str,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RefreshKind {
    Routes,
    Threats,
}

// === impl ThreatMetrics ===

impl ThreatMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let matches = Family::default();
        reg.register(
            "threat_matches",
            "Whether Safe Browsing reports a threat for the domain (1) or not (0)",
            matches.clone(),
        );

        Self {
            matches,
            gauges: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the gauge for `domain`, registering it on first use.
    pub fn gauge_for(&self, domain: &str) -> ThreatGauge {
        let mut gauges = self.gauges.lock();
        self.get_or_create(&mut gauges, domain)
    }

    /// Sets every domain in `status` to 1 or 0, and every other registered
    /// domain to 0.
    pub fn set_all(&self, status: &ThreatStatus) {
        let mut gauges = self.gauges.lock();
        for (domain, matched) in status {
            let value = if *matched { 1.0 } else { 0.0 };
            self.get_or_create(&mut gauges, domain).set(value);
        }

        for (domain, gauge) in gauges.iter() {
            if !status.contains_key(domain) {
                tracing::debug!(%domain, "Clearing domain");
                gauge.set(0.0);
            }
        }
    }

    /// Returns the current value for `domain` if it has been registered.
    pub fn get(&self, domain: &str) -> Option<f64> {
        self.gauges.lock().get(domain).map(|g| g.get())
    }

    /// Returns the number of registered domains.
    pub fn len(&self) -> usize {
        self.gauges.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.gauges.lock().is_empty()
    }

    fn get_or_create(
        &self,
        gauges: &mut HashMap<String, ThreatGauge>,
        domain: &str,
    ) -> ThreatGauge {
        if let Some(gauge) = gauges.get(domain) {
            return gauge.clone();
        }

        let gauge = self
            .matches
            .get_or_create(&DomainLabels {
                domain: domain.to_string(),
            })
            .clone();
        gauges.insert(domain.to_string(), gauge.clone());
        gauge
    }
}

// === impl RefreshMetrics ===

impl RefreshMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let refreshes = Family::default();
        reg.register(
            "refreshes",
            "Count of route and threat refreshes by result",
            refreshes.clone(),
        );

        let last_success = Family::default();
        reg.register_with_unit(
            "last_success_timestamp",
            "Unix time of the last successful refresh",
            Unit::Seconds,
            last_success.clone(),
        );

        Self {
            refreshes,
            last_success,
        }
    }

    pub fn ok(&self, kind: RefreshKind) {
        self.refreshes
            .get_or_create(&RefreshLabels {
                kind: kind.as_str(),
                result: "ok",
            })
            .inc();

        let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        self.last_success
            .get_or_create(&KindLabels {
                kind: kind.as_str(),
            })
            .set(now);
    }

    pub fn error(&self, kind: RefreshKind) {
        self.refreshes
            .get_or_create(&RefreshLabels {
                kind: kind.as_str(),
                result: "error",
            })
            .inc();
    }
}

// === impl RefreshKind ===

impl RefreshKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Routes => "routes",
            Self::Threats => "threats",
        }
    }
}
