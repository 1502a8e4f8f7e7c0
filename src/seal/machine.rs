use std::collections::BTreeSet;

use tracing::warn;

use super::value::{is_blank, FieldKind};
use super::{FieldValues, SignatureRecord};
use crate::error::{CoreError, CoreResult, SealedField};

/// Extra condition on a seal, evaluated on the document values with the
/// proposed edit applied. It can only narrow the sealed set.
pub type SealCondition = fn(&FieldValues) -> bool;

#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub field: &'static str,
    pub sealed_from: &'static str,
    pub kind: FieldKind,
    pub label: Option<&'static str>,
    pub sealed_when: Option<SealCondition>,
    pub required_from: Option<&'static str>,
}

impl FieldRule {
    pub const fn sealed_at(field: &'static str, checkpoint: &'static str) -> Self {
        Self {
            field,
            sealed_from: checkpoint,
            kind: FieldKind::Scalar,
            label: None,
            sealed_when: None,
            required_from: None,
        }
    }

    pub const fn kind(mut self, kind: FieldKind) -> Self {
        self.kind = kind;
        self
    }

    pub const fn label(mut self, label: &'static str) -> Self {
        self.label = Some(label);
        self
    }

    pub const fn when(mut self, condition: SealCondition) -> Self {
        self.sealed_when = Some(condition);
        self
    }

    pub const fn required_from(mut self, checkpoint: &'static str) -> Self {
        self.required_from = Some(checkpoint);
        self
    }

    fn applies(&self, values: &FieldValues) -> bool {
        self.sealed_when.map_or(true, |condition| condition(values))
    }
}

/// Position of a document in its family's checkpoint order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Initial,
    /// Index of the last passed checkpoint.
    Passed(usize),
}

#[derive(Debug, Clone)]
pub struct SealStageMachine {
    checkpoints: Vec<&'static str>,
    rules: Vec<FieldRule>,
}

impl SealStageMachine {
    /// Panics on a rule naming a checkpoint that is not in `checkpoints`;
    /// tables are static and a typo there is a programming error.
    pub fn new(checkpoints: &[&'static str], rules: &[FieldRule]) -> Self {
        for rule in rules {
            assert!(
                checkpoints.contains(&rule.sealed_from),
                "field {} sealed at unknown checkpoint {}",
                rule.field,
                rule.sealed_from
            );
            if let Some(required) = rule.required_from {
                assert!(
                    checkpoints.contains(&required),
                    "field {} required at unknown checkpoint {required}",
                    rule.field
                );
            }
        }
        Self {
            checkpoints: checkpoints.to_vec(),
            rules: rules.to_vec(),
        }
    }

    pub fn checkpoints(&self) -> &[&'static str] {
        &self.checkpoints
    }

    pub fn rules(&self) -> &[FieldRule] {
        &self.rules
    }

    pub fn rule(&self, field: &str) -> Option<&FieldRule> {
        self.rules.iter().find(|rule| rule.field == field)
    }

    pub fn checkpoint_index(&self, checkpoint: &str) -> Option<usize> {
        self.checkpoints.iter().position(|c| *c == checkpoint)
    }

    /// The latest checkpoint with a timestamp wins: every checkpoint before it
    /// counts as passed even if it was skipped.
    pub fn stage(&self, record: &SignatureRecord) -> Stage {
        self.checkpoints
            .iter()
            .rposition(|checkpoint| record.is_signed(checkpoint))
            .map_or(Stage::Initial, Stage::Passed)
    }

    pub fn passed_checkpoints(&self, record: &SignatureRecord) -> &[&'static str] {
        match self.stage(record) {
            Stage::Initial => &[],
            Stage::Passed(index) => &self.checkpoints[..=index],
        }
    }

    /// Every field whose sealing checkpoint has been passed, ignoring seal
    /// conditions.
    pub fn sealed_fields(&self, record: &SignatureRecord) -> BTreeSet<&'static str> {
        let stage = self.stage(record);
        self.rules
            .iter()
            .filter(|rule| self.is_passed(stage, rule.sealed_from))
            .map(|rule| rule.field)
            .collect()
    }

    /// Like [`Self::sealed_fields`], with seal conditions evaluated on `values`.
    pub fn sealed_fields_for(
        &self,
        record: &SignatureRecord,
        values: &FieldValues,
    ) -> BTreeSet<&'static str> {
        let stage = self.stage(record);
        self.rules
            .iter()
            .filter(|rule| self.is_passed(stage, rule.sealed_from) && rule.applies(values))
            .map(|rule| rule.field)
            .collect()
    }

    /// Rejects an edit that changes any sealed field, naming all of them.
    /// Fields absent from `proposed` are not checked, and resubmitting a
    /// sealed field with its stored value is accepted.
    pub fn check_edit(
        &self,
        record: &SignatureRecord,
        current: &FieldValues,
        proposed: &FieldValues,
    ) -> CoreResult<()> {
        let stage = self.stage(record);
        if stage == Stage::Initial {
            return Ok(());
        }

        let mut merged = current.clone();
        merged.extend(proposed.iter().map(|(k, v)| (k.clone(), v.clone())));

        let violations: Vec<SealedField> = self
            .rules
            .iter()
            .filter(|rule| proposed.contains_key(rule.field))
            .filter(|rule| self.is_passed(stage, rule.sealed_from) && rule.applies(&merged))
            .filter(|rule| !rule.kind.same(current.get(rule.field), proposed.get(rule.field)))
            .map(|rule| SealedField {
                field: rule.field.to_string(),
                label: rule.label.map(str::to_string),
            })
            .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            warn!(
                fields = ?violations.iter().map(|v| v.field.as_str()).collect::<Vec<_>>(),
                "edit rejected on sealed fields"
            );
            Err(CoreError::SealViolation { fields: violations })
        }
    }

    /// Fields required at `checkpoint` or any earlier one that are blank in
    /// `values`.
    pub fn missing_required(&self, checkpoint: &str, values: &FieldValues) -> Vec<&'static str> {
        let Some(target) = self.checkpoint_index(checkpoint) else {
            return Vec::new();
        };
        self.rules
            .iter()
            .filter(|rule| {
                rule.required_from
                    .and_then(|required| self.checkpoint_index(required))
                    .is_some_and(|index| index <= target)
            })
            .filter(|rule| is_blank(values.get(rule.field)))
            .map(|rule| rule.field)
            .collect()
    }

    /// Validates that `checkpoint` can be signed next and returns its index.
    /// Checkpoints may be skipped but never signed out of order or twice.
    pub fn check_signable(
        &self,
        record: &SignatureRecord,
        checkpoint: &str,
        values: &FieldValues,
    ) -> CoreResult<usize> {
        let index = self
            .checkpoint_index(checkpoint)
            .ok_or_else(|| CoreError::InvalidInput(format!("unknown checkpoint {checkpoint}")))?;

        if let Stage::Passed(passed) = self.stage(record) {
            if passed >= index {
                return Err(CoreError::invalid_state(format!(
                    "checkpoint {checkpoint} has already been passed"
                )));
            }
        }

        let missing = self.missing_required(checkpoint, values);
        if !missing.is_empty() {
            return Err(CoreError::MissingFields {
                checkpoint: checkpoint.to_string(),
                fields: missing.into_iter().map(str::to_string).collect(),
            });
        }

        Ok(index)
    }

    fn is_passed(&self, stage: Stage, checkpoint: &str) -> bool {
        match (stage, self.checkpoint_index(checkpoint)) {
            (Stage::Passed(passed), Some(index)) => index <= passed,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    const EMISSION: &str = "EMISSION";
    const WORK: &str = "WORK";
    const TRANSPORT: &str = "TRANSPORT";
    const ACCEPTANCE: &str = "ACCEPTANCE";
    const OPERATION: &str = "OPERATION";

    fn has_destination(values: &FieldValues) -> bool {
        values
            .get("destinationSiret")
            .and_then(Value::as_str)
            .is_some_and(|s| !s.is_empty())
    }

    fn machine() -> SealStageMachine {
        SealStageMachine::new(
            &[EMISSION, WORK, TRANSPORT, ACCEPTANCE, OPERATION],
            &[
                FieldRule::sealed_at("emitterName", EMISSION)
                    .kind(FieldKind::Text)
                    .label("emitter name")
                    .required_from(EMISSION),
                FieldRule::sealed_at("wasteCode", EMISSION).required_from(EMISSION),
                FieldRule::sealed_at("packagings", EMISSION).kind(FieldKind::UnorderedList),
                FieldRule::sealed_at("workerName", WORK).kind(FieldKind::Text),
                FieldRule::sealed_at("plateNumbers", TRANSPORT)
                    .kind(FieldKind::UnorderedList)
                    .required_from(TRANSPORT),
                FieldRule::sealed_at("nextDestination", EMISSION).when(has_destination),
                FieldRule::sealed_at("receivedAt", OPERATION)
                    .kind(FieldKind::DateTime)
                    .required_from(ACCEPTANCE),
                FieldRule::sealed_at("weight", OPERATION).kind(FieldKind::Number),
            ],
        )
    }

    fn values(value: Value) -> FieldValues {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn signed(checkpoints: &[&str]) -> SignatureRecord {
        checkpoints.iter().fold(SignatureRecord::new(), |record, cp| {
            record.with_signature(cp, Utc::now(), "tester")
        })
    }

    #[test]
    fn unsigned_documents_have_no_sealed_fields() {
        let m = machine();
        let record = SignatureRecord::new();
        assert_eq!(m.stage(&record), Stage::Initial);
        assert!(m.sealed_fields(&record).is_empty());
        assert!(m
            .check_edit(&record, &FieldValues::new(), &values(json!({"emitterName": "X"})))
            .is_ok());
    }

    #[test]
    fn sealed_sets_accumulate_along_checkpoints() {
        let m = machine();
        let emission = m.sealed_fields(&signed(&[EMISSION]));
        let transport = m.sealed_fields(&signed(&[EMISSION, TRANSPORT]));

        assert!(emission.contains("emitterName"));
        assert!(!emission.contains("workerName"));
        assert!(emission.is_subset(&transport));
        assert!(transport.contains("workerName"));
        assert!(transport.contains("plateNumbers"));
        assert!(!transport.contains("weight"));
    }

    #[test]
    fn skipped_checkpoints_count_as_passed() {
        let m = machine();
        let record = signed(&[TRANSPORT]);
        assert_eq!(m.stage(&record), Stage::Passed(2));
        assert_eq!(m.passed_checkpoints(&record), &[EMISSION, WORK, TRANSPORT]);
        assert!(m.sealed_fields(&record).contains("emitterName"));
    }

    #[test]
    fn changing_a_sealed_field_is_rejected_and_resubmission_accepted() {
        let m = machine();
        let record = signed(&[EMISSION]);
        let current = values(json!({"emitterName": "Acme"}));

        let err = m
            .check_edit(&record, &current, &values(json!({"emitterName": "Acme2"})))
            .unwrap_err();
        assert_eq!(err.seal_violation_fields(), Some(vec!["emitterName"]));

        assert!(m
            .check_edit(&record, &current, &values(json!({"emitterName": "Acme"})))
            .is_ok());
    }

    #[test]
    fn every_offending_field_is_reported() {
        let m = machine();
        let record = signed(&[EMISSION, WORK]);
        let current = values(json!({
            "emitterName": "Acme",
            "wasteCode": "17 06 05*",
            "workerName": "Builder",
            "weight": 1.5
        }));
        let proposed = values(json!({
            "emitterName": "Other",
            "wasteCode": "17 06 01*",
            "workerName": "Wrecker",
            "weight": 2.0
        }));

        let err = m.check_edit(&record, &current, &proposed).unwrap_err();
        assert_eq!(
            err.seal_violation_fields(),
            Some(vec!["emitterName", "wasteCode", "workerName"])
        );
    }

    #[test]
    fn omitted_sealed_fields_are_not_checked() {
        let m = machine();
        let record = signed(&[EMISSION]);
        let current = values(json!({"emitterName": "Acme", "weight": 1}));
        assert!(m
            .check_edit(&record, &current, &values(json!({"weight": 3})))
            .is_ok());
    }

    #[test]
    fn value_kinds_apply_to_comparisons() {
        let m = machine();
        let record = signed(&[EMISSION, TRANSPORT, OPERATION]);
        let current = values(json!({
            "packagings": ["drum", "bag"],
            "receivedAt": "2024-01-02T10:00:00.250Z",
            "weight": 2
        }));
        let proposed = values(json!({
            "packagings": ["bag", "drum"],
            "receivedAt": "2024-01-02T10:00:00Z",
            "weight": 2.0
        }));
        assert!(m.check_edit(&record, &current, &proposed).is_ok());
    }

    #[test]
    fn conditional_seal_only_applies_when_condition_holds() {
        let m = machine();
        let record = signed(&[EMISSION]);

        let without_destination = values(json!({"nextDestination": "A"}));
        assert!(m
            .check_edit(
                &record,
                &without_destination,
                &values(json!({"nextDestination": "B"}))
            )
            .is_ok());

        let with_destination = values(json!({"nextDestination": "A", "destinationSiret": "123"}));
        let err = m
            .check_edit(
                &record,
                &with_destination,
                &values(json!({"nextDestination": "B"})),
            )
            .unwrap_err();
        assert_eq!(err.seal_violation_fields(), Some(vec!["nextDestination"]));
        assert!(m.sealed_fields(&record).contains("nextDestination"));
        assert!(!m
            .sealed_fields_for(&record, &without_destination)
            .contains("nextDestination"));
    }

    #[test]
    fn signing_requires_every_required_field() {
        let m = machine();
        let err = m
            .check_signable(&signed(&[EMISSION]), TRANSPORT, &values(json!({"emitterName": "A"})))
            .unwrap_err();
        match err {
            CoreError::MissingFields { checkpoint, fields } => {
                assert_eq!(checkpoint, TRANSPORT);
                assert_eq!(fields, vec!["wasteCode", "plateNumbers"]);
            }
            other => panic!("unexpected error {other:?}"),
        }

        let complete = values(json!({
            "emitterName": "A",
            "wasteCode": "17 06 05*",
            "plateNumbers": ["AB-123-CD"]
        }));
        assert_eq!(
            m.check_signable(&signed(&[EMISSION]), TRANSPORT, &complete).unwrap(),
            2
        );
    }

    #[test]
    fn checkpoints_cannot_be_signed_twice_or_backwards() {
        let m = machine();
        let record = signed(&[EMISSION, TRANSPORT]);
        let all = values(json!({"emitterName": "A", "wasteCode": "x", "plateNumbers": ["p"]}));

        assert!(matches!(
            m.check_signable(&record, TRANSPORT, &all),
            Err(CoreError::InvalidState { .. })
        ));
        assert!(matches!(
            m.check_signable(&record, WORK, &all),
            Err(CoreError::InvalidState { .. })
        ));
        assert!(matches!(
            m.check_signable(&record, "UNKNOWN", &all),
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[test]
    #[should_panic(expected = "unknown checkpoint")]
    fn rules_must_reference_known_checkpoints() {
        SealStageMachine::new(&[EMISSION], &[FieldRule::sealed_at("x", "SHIPPING")]);
    }

    fn arb_record() -> impl Strategy<Value = SignatureRecord> {
        prop::collection::vec(any::<bool>(), 5).prop_map(|flags| {
            [EMISSION, WORK, TRANSPORT, ACCEPTANCE, OPERATION]
                .iter()
                .zip(flags)
                .filter(|(_, signed)| *signed)
                .fold(SignatureRecord::new(), |record, (cp, _)| {
                    record.with_signature(cp, Utc::now(), "prop")
                })
        })
    }

    proptest! {
        #[test]
        fn resubmitting_current_values_always_succeeds(
            record in arb_record(),
            name in "[a-zA-Z ]{0,12}",
            weight in 0u32..10_000,
            plates in prop::collection::vec("[A-Z]{2}-[0-9]{3}", 0..4),
        ) {
            let m = machine();
            let current = values(json!({
                "emitterName": name,
                "weight": weight,
                "plateNumbers": plates,
                "destinationSiret": "123",
                "nextDestination": "A"
            }));
            prop_assert!(m.check_edit(&record, &current, &current).is_ok());
        }

        #[test]
        fn sealed_set_only_grows(flags in prop::collection::vec(any::<bool>(), 5), extra in 0usize..5) {
            let m = machine();
            let cps = [EMISSION, WORK, TRANSPORT, ACCEPTANCE, OPERATION];
            let before = cps.iter().zip(flags.iter()).filter(|(_, s)| **s)
                .fold(SignatureRecord::new(), |r, (cp, _)| r.with_signature(cp, Utc::now(), "p"));
            let after = before.clone().with_signature(cps[extra], Utc::now(), "p");
            prop_assert!(m.sealed_fields(&before).is_subset(&m.sealed_fields(&after)));
        }
    }
}
