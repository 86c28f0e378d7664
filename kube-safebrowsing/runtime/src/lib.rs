#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use kube_safebrowsing_core as core;
pub use kube_safebrowsing_k8s as k8s;
pub use kube_safebrowsing_lookup as lookup;

mod args;
pub mod duration;
pub mod metrics;
pub mod reconcile;

pub use self::{
    args::Args,
    reconcile::{Intervals, Reconciler, Supervisor},
};
