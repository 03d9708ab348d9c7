//! Property-based tests for model types.

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::model::{ObjectRef, Subject, Tuple, TypeConstraint};

    fn concrete_subject_strategy() -> impl Strategy<Value = String> {
        ("[a-z]{1,10}", "[a-z0-9_-]{1,20}").prop_map(|(t, id)| format!("{t}:{id}"))
    }

    fn userset_subject_strategy() -> impl Strategy<Value = String> {
        ("[a-z]{1,10}", "[a-z0-9]{1,10}", "[a-z_]{1,10}")
            .prop_map(|(t, id, rel)| format!("{t}:{id}#{rel}"))
    }

    proptest! {
        #[test]
        fn test_concrete_subject_parses_and_displays(input in concrete_subject_strategy()) {
            let subject = Subject::parse(&input);
            prop_assert!(subject.is_ok(), "failed for subject: {}", input);
            let subject = subject.unwrap();
            prop_assert!(matches!(subject, Subject::Object(_)));
            prop_assert_eq!(subject.to_string(), input);
        }

        #[test]
        fn test_userset_subject_parses(input in userset_subject_strategy()) {
            let subject = Subject::parse(&input).unwrap();
            prop_assert!(subject.userset_relation().is_some());
            prop_assert_eq!(subject.to_string(), input);
        }

        #[test]
        fn test_string_without_colon_is_rejected(s in "[a-z]{1,20}") {
            prop_assert!(ObjectRef::parse(&s).is_err());
            prop_assert!(Subject::parse(&s).is_err());
        }

        #[test]
        fn test_wildcard_only_grants_its_own_type(
            stored_type in "[a-z]{1,8}",
            requested_type in "[a-z]{1,8}",
            id in "[a-z0-9]{1,8}"
        ) {
            let stored = Subject::wildcard(&stored_type);
            let requested = Subject::object(&requested_type, &id);
            prop_assert_eq!(stored.grants(&requested), stored_type == requested_type);
        }

        #[test]
        fn test_constraint_admits_exactly_its_subject_shape(
            type_name in "[a-z]{1,8}",
            id in "[a-z0-9]{1,8}",
            relation in "[a-z]{1,8}"
        ) {
            let userset = TypeConstraint::userset(&type_name, &relation);
            prop_assert!(userset.admits(&Subject::userset(&type_name, &id, &relation)));
            prop_assert!(!userset.admits(&Subject::object(&type_name, &id)));

            let direct = TypeConstraint::direct(&type_name);
            prop_assert!(direct.admits(&Subject::object(&type_name, &id)));
            prop_assert!(!direct.admits(&Subject::wildcard(&type_name)));
        }

        #[test]
        fn test_tuple_parse_accepts_well_formed_parts(
            object in concrete_subject_strategy(),
            relation in "[a-z_]{1,10}",
            subject in prop_oneof![concrete_subject_strategy(), userset_subject_strategy()]
        ) {
            let tuple = Tuple::parse(&object, &relation, &subject);
            prop_assert!(tuple.is_ok());
            let tuple = tuple.unwrap();
            prop_assert_eq!(tuple.to_string(), format!("{object}#{relation}@{subject}"));
        }
    }
}
