//! # Reconciliation
//!
//! - `sub_resource`: read-modify-write of collections on an application
//! - `set_diff`: owners and members as object-ID sets

pub mod set_diff;
pub mod sub_resource;

pub use set_diff::{
    reconcile_relationship, ApplicationOwners, ApplyOrder, GroupMembers, GroupOwners,
    RelationshipSet, SetDiff,
};
pub use sub_resource::{DeleteOutcome, SubResource, SubResourceReconciler};
