use chrono::{TimeZone, Utc};
use docket_core::{
    derive_key, AnalysisType, CaseId, EntityIdType, JobStatus, ModelTier, Timestamp, VersionStatus,
    ANALYSIS_KEY_LEN,
};
use proptest::prelude::*;

fn arb_hashes() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[0-9a-f]{8,64}", 1..12)
}

fn arb_activity() -> impl Strategy<Value = Option<Timestamp>> {
    prop::option::of((0i64..4_000_000_000).prop_map(|s| Utc.timestamp_opt(s, 0).unwrap()))
}

proptest! {
    #[test]
    fn key_is_permutation_invariant(
        hashes in arb_hashes(),
        model in "[a-z0-9.-]{1,20}",
        prompt in "[A-Za-z@0-9]{1,20}",
        activity in arb_activity(),
        seed in any::<u64>(),
    ) {
        let mut shuffled = hashes.clone();
        // Deterministic rotation + reversal driven by the seed.
        let len = shuffled.len();
        shuffled.rotate_left((seed as usize) % len);
        if seed % 2 == 0 {
            shuffled.reverse();
        }

        let a = derive_key(CaseId::nil(), &hashes, &model, &prompt, activity);
        let b = derive_key(CaseId::nil(), &shuffled, &model, &prompt, activity);
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.as_str().len(), ANALYSIS_KEY_LEN);
    }

    #[test]
    fn newer_activity_always_changes_key(
        hashes in arb_hashes(),
        base in 0i64..3_000_000_000,
        delta_ms in 1i64..10_000_000,
    ) {
        let t0 = Utc.timestamp_opt(base, 0).unwrap();
        let t1 = t0 + chrono::Duration::milliseconds(delta_ms);
        let before = derive_key(CaseId::nil(), &hashes, "m", "p", Some(t0));
        let after = derive_key(CaseId::nil(), &hashes, "m", "p", Some(t1));
        prop_assert_ne!(before, after);
    }

    #[test]
    fn distinct_cases_never_share_a_key(
        hashes in arb_hashes(),
        activity in arb_activity(),
        a in any::<u128>().prop_filter("non-nil", |v| *v != 0),
        b in any::<u128>().prop_filter("non-nil", |v| *v != 0),
    ) {
        prop_assume!(a != b);
        let case_a = CaseId::new(uuid::Uuid::from_u128(a));
        let case_b = CaseId::new(uuid::Uuid::from_u128(b));
        prop_assert_ne!(
            derive_key(case_a, &hashes, "m", "p", activity),
            derive_key(case_b, &hashes, "m", "p", activity)
        );
    }

    #[test]
    fn status_strings_parse_back(idx in 0usize..4) {
        let job = [JobStatus::Queued, JobStatus::Running, JobStatus::Completed, JobStatus::Failed][idx];
        prop_assert_eq!(job.as_db_str().parse::<JobStatus>().unwrap(), job);

        let analysis = AnalysisType::ALL[idx];
        prop_assert_eq!(analysis.to_string().parse::<AnalysisType>().unwrap(), analysis);

        let version = [VersionStatus::Pending, VersionStatus::Completed, VersionStatus::Failed][idx % 3];
        prop_assert_eq!(VersionStatus::from_db_str(version.as_db_str()).unwrap(), version);

        let tier = [ModelTier::Fast, ModelTier::Standard, ModelTier::Deep][idx % 3];
        prop_assert_eq!(ModelTier::from_db_str(tier.as_db_str()).unwrap(), tier);
    }
}
