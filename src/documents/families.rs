use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::permissions::Permission;
use crate::seal::{FieldKind, FieldRule, FieldValues, SealStageMachine};
use crate::OrgId;

pub const EMISSION: &str = "EMISSION";
pub const WORK: &str = "WORK";
pub const TRANSPORT: &str = "TRANSPORT";
pub const ACCEPTANCE: &str = "ACCEPTANCE";
pub const OPERATION: &str = "OPERATION";

pub const WASTE_FORM: &str = "waste_form";
pub const ASBESTOS_FORM: &str = "asbestos_form";

/// Who signs a checkpoint: the organization stored in `signer_field`, acting
/// with `permission`.
#[derive(Debug, Clone, Copy)]
pub struct CheckpointPolicy {
    pub name: &'static str,
    pub permission: Permission,
    pub signer_field: &'static str,
}

#[derive(Debug, Clone)]
pub struct DocumentFamily {
    pub name: &'static str,
    pub machine: SealStageMachine,
    pub checkpoints: Vec<CheckpointPolicy>,
    /// Fields holding the org ids of the document's stakeholders.
    pub stakeholder_fields: &'static [&'static str],
    /// Stakeholder fields whose organizations approve revisions as one.
    pub co_approvers: &'static [&'static [&'static str]],
}

impl DocumentFamily {
    pub fn checkpoint(&self, name: &str) -> Option<&CheckpointPolicy> {
        self.checkpoints.iter().find(|policy| policy.name == name)
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.machine.rule(field).is_some()
    }

    pub fn unknown_fields<'a>(&self, values: &'a FieldValues) -> Vec<&'a str> {
        values
            .keys()
            .map(String::as_str)
            .filter(|field| !self.has_field(field))
            .collect()
    }

    /// Distinct, non-blank organizations referenced by stakeholder fields.
    pub fn stakeholders(&self, values: &FieldValues) -> Vec<OrgId> {
        let mut orgs: Vec<OrgId> = Vec::new();
        for field in self.stakeholder_fields {
            if let Some(org) = org_at(values, field) {
                if !orgs.contains(&org) {
                    orgs.push(org);
                }
            }
        }
        orgs
    }

    /// Stakeholders partitioned into approval units: each co-approver group
    /// with at least one present member, then every remaining stakeholder
    /// on its own.
    pub fn approval_units(&self, values: &FieldValues) -> Vec<Vec<OrgId>> {
        let mut units: Vec<Vec<OrgId>> = Vec::new();
        let mut grouped: Vec<OrgId> = Vec::new();

        for group in self.co_approvers {
            let mut unit: Vec<OrgId> = Vec::new();
            for field in *group {
                if let Some(org) = org_at(values, field) {
                    if !unit.contains(&org) && !grouped.contains(&org) {
                        unit.push(org);
                    }
                }
            }
            if !unit.is_empty() {
                grouped.extend(unit.iter().cloned());
                units.push(unit);
            }
        }

        for org in self.stakeholders(values) {
            if !grouped.contains(&org) {
                units.push(vec![org]);
            }
        }
        units
    }
}

fn org_at(values: &FieldValues, field: &str) -> Option<OrgId> {
    values
        .get(field)
        .and_then(Value::as_str)
        .map(OrgId::from)
        .filter(|org| !org.is_blank())
}

#[derive(Debug, Clone, Default)]
pub struct FamilyRegistry {
    families: HashMap<&'static str, Arc<DocumentFamily>>,
}

impl FamilyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(waste_form());
        registry.register(asbestos_form());
        registry
    }

    pub fn register(&mut self, family: DocumentFamily) {
        self.families.insert(family.name, Arc::new(family));
    }

    pub fn get(&self, name: &str) -> Option<Arc<DocumentFamily>> {
        self.families.get(name).cloned()
    }
}

fn has_eco_organisme(values: &FieldValues) -> bool {
    org_at(values, "ecoOrganismeSiret").is_some()
}

fn has_next_destination(values: &FieldValues) -> bool {
    org_at(values, "nextDestinationCompanySiret").is_some()
}

const WASTE_FORM_RULES: &[FieldRule] = &[
    FieldRule::sealed_at("emitterCompanySiret", EMISSION)
        .label("emitter SIRET")
        .required_from(EMISSION),
    FieldRule::sealed_at("emitterCompanyName", EMISSION)
        .kind(FieldKind::Text)
        .label("emitter company name")
        .required_from(EMISSION),
    FieldRule::sealed_at("emitterCompanyAddress", EMISSION)
        .kind(FieldKind::Text)
        .label("emitter company address")
        .required_from(EMISSION),
    FieldRule::sealed_at("ecoOrganismeSiret", TRANSPORT),
    FieldRule::sealed_at("ecoOrganismeName", TRANSPORT)
        .kind(FieldKind::Text)
        .when(has_eco_organisme),
    FieldRule::sealed_at("wasteCode", EMISSION)
        .label("waste code")
        .required_from(EMISSION),
    FieldRule::sealed_at("wasteDescription", EMISSION).kind(FieldKind::Text),
    FieldRule::sealed_at("packagings", EMISSION)
        .kind(FieldKind::UnorderedList)
        .required_from(EMISSION),
    FieldRule::sealed_at("quantity", EMISSION)
        .kind(FieldKind::Number)
        .required_from(EMISSION),
    FieldRule::sealed_at("destinationCompanySiret", EMISSION)
        .label("destination SIRET")
        .required_from(EMISSION),
    FieldRule::sealed_at("destinationPlannedOperationCode", TRANSPORT)
        .label("planned operation code")
        .required_from(EMISSION),
    FieldRule::sealed_at("nextDestinationCompanySiret", TRANSPORT),
    FieldRule::sealed_at("nextDestinationOperationCode", EMISSION).when(has_next_destination),
    FieldRule::sealed_at("transporterCompanySiret", TRANSPORT)
        .label("transporter SIRET")
        .required_from(TRANSPORT),
    FieldRule::sealed_at("transporterPlates", TRANSPORT)
        .kind(FieldKind::UnorderedList)
        .label("transporter plates")
        .required_from(TRANSPORT),
    FieldRule::sealed_at("transporterTakenOverAt", TRANSPORT)
        .kind(FieldKind::DateTime)
        .required_from(TRANSPORT),
    FieldRule::sealed_at("destinationReceptionDate", ACCEPTANCE)
        .kind(FieldKind::Date)
        .required_from(ACCEPTANCE),
    FieldRule::sealed_at("destinationReceptionWeight", ACCEPTANCE)
        .kind(FieldKind::Number)
        .required_from(ACCEPTANCE),
    FieldRule::sealed_at("destinationAcceptationStatus", ACCEPTANCE).required_from(ACCEPTANCE),
    FieldRule::sealed_at("destinationOperationCode", OPERATION)
        .label("operation code")
        .required_from(OPERATION),
    FieldRule::sealed_at("destinationOperationDate", OPERATION)
        .kind(FieldKind::Date)
        .required_from(OPERATION),
    FieldRule::sealed_at("destinationCustomInfo", OPERATION).kind(FieldKind::Text),
];

/// Regular hazardous waste transfer form.
pub fn waste_form() -> DocumentFamily {
    DocumentFamily {
        name: WASTE_FORM,
        machine: SealStageMachine::new(
            &[EMISSION, TRANSPORT, ACCEPTANCE, OPERATION],
            WASTE_FORM_RULES,
        ),
        checkpoints: vec![
            CheckpointPolicy {
                name: EMISSION,
                permission: Permission::BsdCanSignEmission,
                signer_field: "emitterCompanySiret",
            },
            CheckpointPolicy {
                name: TRANSPORT,
                permission: Permission::BsdCanSignTransport,
                signer_field: "transporterCompanySiret",
            },
            CheckpointPolicy {
                name: ACCEPTANCE,
                permission: Permission::BsdCanSignAcceptation,
                signer_field: "destinationCompanySiret",
            },
            CheckpointPolicy {
                name: OPERATION,
                permission: Permission::BsdCanSignOperation,
                signer_field: "destinationCompanySiret",
            },
        ],
        stakeholder_fields: &[
            "emitterCompanySiret",
            "ecoOrganismeSiret",
            "transporterCompanySiret",
            "destinationCompanySiret",
            "nextDestinationCompanySiret",
        ],
        co_approvers: &[&["emitterCompanySiret", "ecoOrganismeSiret"]],
    }
}

const ASBESTOS_FORM_RULES: &[FieldRule] = &[
    FieldRule::sealed_at("emitterCompanySiret", EMISSION)
        .label("emitter SIRET")
        .required_from(EMISSION),
    FieldRule::sealed_at("emitterCompanyName", EMISSION)
        .kind(FieldKind::Text)
        .required_from(EMISSION),
    FieldRule::sealed_at("emitterPickupSiteAddress", EMISSION).kind(FieldKind::Text),
    FieldRule::sealed_at("wasteCode", EMISSION)
        .label("waste code")
        .required_from(EMISSION),
    FieldRule::sealed_at("sealNumbers", WORK)
        .kind(FieldKind::UnorderedList)
        .required_from(WORK),
    FieldRule::sealed_at("packagings", WORK)
        .kind(FieldKind::UnorderedList)
        .required_from(WORK),
    FieldRule::sealed_at("weightValue", WORK)
        .kind(FieldKind::Number)
        .required_from(WORK),
    FieldRule::sealed_at("workerCompanySiret", EMISSION)
        .label("worker SIRET")
        .required_from(EMISSION),
    FieldRule::sealed_at("workerWorkHasEmitterPaperSignature", WORK),
    FieldRule::sealed_at("destinationCompanySiret", EMISSION)
        .label("destination SIRET")
        .required_from(EMISSION),
    FieldRule::sealed_at("destinationCap", TRANSPORT).kind(FieldKind::Text),
    FieldRule::sealed_at("transporterCompanySiret", TRANSPORT).required_from(TRANSPORT),
    FieldRule::sealed_at("transporterPlates", TRANSPORT)
        .kind(FieldKind::UnorderedList)
        .required_from(TRANSPORT),
    FieldRule::sealed_at("destinationReceptionDate", OPERATION)
        .kind(FieldKind::Date)
        .required_from(OPERATION),
    FieldRule::sealed_at("destinationOperationCode", OPERATION).required_from(OPERATION),
    FieldRule::sealed_at("destinationOperationDate", OPERATION)
        .kind(FieldKind::Date)
        .required_from(OPERATION),
];

/// Asbestos waste form, with a worker signature between emission and
/// transport.
pub fn asbestos_form() -> DocumentFamily {
    DocumentFamily {
        name: ASBESTOS_FORM,
        machine: SealStageMachine::new(
            &[EMISSION, WORK, TRANSPORT, OPERATION],
            ASBESTOS_FORM_RULES,
        ),
        checkpoints: vec![
            CheckpointPolicy {
                name: EMISSION,
                permission: Permission::BsdCanSignEmission,
                signer_field: "emitterCompanySiret",
            },
            CheckpointPolicy {
                name: WORK,
                permission: Permission::BsdCanSignWork,
                signer_field: "workerCompanySiret",
            },
            CheckpointPolicy {
                name: TRANSPORT,
                permission: Permission::BsdCanSignTransport,
                signer_field: "transporterCompanySiret",
            },
            CheckpointPolicy {
                name: OPERATION,
                permission: Permission::BsdCanSignOperation,
                signer_field: "destinationCompanySiret",
            },
        ],
        stakeholder_fields: &[
            "emitterCompanySiret",
            "workerCompanySiret",
            "transporterCompanySiret",
            "destinationCompanySiret",
        ],
        co_approvers: &[],
    }
}
