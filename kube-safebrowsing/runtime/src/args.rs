use crate::{
    duration::Interval,
    k8s::ClusterRoutes,
    lookup::SafeBrowsing,
    metrics::{RefreshMetrics, ThreatMetrics},
    reconcile::{Intervals, Reconciler},
};
use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::{net::SocketAddr, sync::Arc};
use tokio::time::Duration;
use tracing::info;

const LIST_TIMEOUT: Duration = Duration::from_secs(30);
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(30);

const VERBOSE_LOG_LEVEL: &str = "kube_safebrowsing=debug,info";

#[derive(Debug, Parser)]
#[clap(
    name = "kube-safebrowsing",
    about = "Exports Google Safe Browsing threat matches for the domains of a cluster's Ingresses",
    version
)]
pub struct Args {
    #[clap(
        long,
        default_value = "kube_safebrowsing=info,warn",
        env = "KUBE_SAFEBROWSING_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    /// Enables debug logging. Overrides `--log-level`.
    #[clap(short, long)]
    verbose: bool,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    /// Address of the admin server, which serves `/metrics`.
    #[clap(long, default_value = "0.0.0.0:1024")]
    metrics_addr: SocketAddr,

    /// How often the domains are checked against Safe Browsing.
    #[clap(long, default_value = "5m")]
    interval: Interval,

    /// How often the cluster's Ingresses are listed.
    #[clap(long, default_value = "1m")]
    routes_interval: Interval,

    /// A domain to check in addition to the Ingress domains. May be repeated.
    #[clap(long = "additional-domains", value_name = "DOMAIN")]
    additional_domains: Vec<String>,

    /// The Safe Browsing API key.
    #[clap(long, env = "GOOGLE_SAFEBROWSING_API_KEY", hide_env_values = true)]
    api_key: String,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            verbose,
            client,
            metrics_addr,
            interval,
            routes_interval,
            additional_domains,
            api_key,
        } = self;

        if api_key.trim().is_empty() {
            bail!("GOOGLE_SAFEBROWSING_API_KEY must not be empty");
        }

        let log_level = if verbose {
            VERBOSE_LOG_LEVEL
                .parse::<kubert::LogFilter>()
                .map_err(|error| anyhow!("invalid log filter: {error}"))?
        } else {
            log_level
        };

        let mut prom = <Registry>::default();
        let safebrowsing = prom.sub_registry_with_prefix("google_safebrowsing");
        let metrics = ThreatMetrics::register(safebrowsing);
        let refreshes = RefreshMetrics::register(safebrowsing);
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let admin = kubert::AdminArgs {
            admin_addr: metrics_addr,
        };
        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await
            .context("failed to initialize the runtime")?;

        let routes = ClusterRoutes::new(runtime.client(), LIST_TIMEOUT);
        let threats = SafeBrowsing::new(api_key, LOOKUP_TIMEOUT)
            .context("failed to build the Safe Browsing client")?;

        info!(
            %interval,
            %routes_interval,
            additional_domains = ?additional_domains,
            "Starting",
        );
        let reconciler = Arc::new(Reconciler::new(
            routes,
            threats,
            additional_domains,
            metrics,
            refreshes,
        ));
        reconciler
            .init()
            .await
            .context("initial reconciliation failed")?;

        let supervisor = reconciler.spawn(Intervals {
            routes: routes_interval.into(),
            threats: interval.into(),
        });

        // Block the main thread on the shutdown signal. Once it fires, stop the
        // reconciliation loops before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }
        supervisor.shutdown().await;

        Ok(())
    }
}
