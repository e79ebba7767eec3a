//! Billing credit accounting
//!
//! One credit covers up to two distinct signers. Form fillers, approvers and
//! receivers are free.

use std::collections::BTreeSet;

use shared_types::ContactId;

use crate::model::{FieldKind, Package};

/// Distinct contacts holding the signer role on a signature field
pub fn signer_contacts(package: &Package) -> BTreeSet<ContactId> {
    package
        .fields
        .iter()
        .filter(|f| f.kind == FieldKind::Signature)
        .flat_map(|f| f.assignees.iter())
        .filter(|a| a.role.is_signer())
        .map(|a| a.contact_id.clone())
        .collect()
}

pub fn credits_for_signers(signers: usize) -> u32 {
    signers.div_ceil(2) as u32
}

pub fn credits_required(package: &Package) -> u32 {
    credits_for_signers(signer_contacts(package).len())
}
