#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod labels;
pub mod network;

pub use self::{
    labels::{Expression, InvalidSelector, Labels, Operator, Selector},
    network::{CidrParseError, Network},
};
pub use ipnet::IpNet;
pub use k8s_openapi::{
    api::{
        self,
        core::v1::{Container, ContainerPort, Pod, PodIP, PodSpec, PodStatus},
        networking::v1::{
            IPBlock, NetworkPolicy, NetworkPolicyEgressRule, NetworkPolicyIngressRule,
            NetworkPolicyPeer, NetworkPolicyPort, NetworkPolicySpec,
        },
    },
    apimachinery::pkg::{
        apis::meta::v1::{LabelSelector, LabelSelectorRequirement, ObjectMeta},
        util::intstr::IntOrString,
    },
};
pub use kube::ResourceExt;
