#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use netpol_reach_core as core;
pub use netpol_reach_k8s_api as k8s;
pub use netpol_reach_k8s_client as client;

mod args;
mod summary;

pub use self::{
    args::Args,
    summary::{PolicyCheck, WorkloadSummary},
};
