use cascade_config::CascadeConfig;
use cascade_core::error::{ErrorClass, ErrorOrigin};
use cascade_voter::{
    VoteOutcome, VoteRequest, Voter,
    relation::{STREAMS, VOTES},
};
use proptest::prelude::*;
use std::{collections::BTreeMap, sync::Once};
use tracing_subscriber::EnvFilter;

static LOGGER: Once = Once::new();

fn init_logger() {
    LOGGER.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn config(contestants: u32) -> CascadeConfig {
    let mut config = CascadeConfig::default();
    config.workload.contestant_count = contestants;
    config
}

fn voter_with(config: &CascadeConfig) -> Voter {
    init_logger();
    let voter = Voter::open(config).expect("voter should open");
    voter
        .load_reference(&config.workload)
        .expect("reference data should load");
    voter
}

fn voter() -> Voter {
    voter_with(&config(12))
}

fn assert_streams_empty(voter: &Voter) {
    for stream in STREAMS {
        assert_eq!(
            voter
                .database()
                .stream_len(stream)
                .expect("stream should be readable"),
            0,
            "{stream} must be empty after the transaction"
        );
    }
}

#[test]
fn vote_from_rhode_island_is_tallied_once() {
    let voter = voter();

    let outcome = voter
        .submit(VoteRequest::new(5_551_234, 7).with_area_code(401))
        .expect("vote should be processed");

    assert_eq!(outcome, VoteOutcome::Accepted);
    assert_eq!(voter.votes_for(7, "RI").expect("aggregate readable"), 1);
    assert_eq!(voter.votes_by_phone(5_551_234).expect("count readable"), 1);
    assert_eq!(voter.total_votes().expect("total readable"), 1);
    assert_streams_empty(&voter);

    let recorded = voter
        .database()
        .scan_table(VOTES)
        .expect("votes readable");
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].text("vote_id"), Some("5551234-1"));
    assert_eq!(recorded[0].text("state"), Some("RI"));
}

#[test]
fn area_code_is_derived_from_ten_digit_numbers() {
    let voter = voter();

    voter
        .submit(VoteRequest::new(2_125_550_100, 3))
        .expect("vote should be processed");

    assert_eq!(voter.votes_for(3, "NY").expect("aggregate readable"), 1);
}

#[test]
fn short_number_without_area_code_is_rejected_at_the_interface() {
    let voter = voter();

    let err = voter
        .submit(VoteRequest::new(5_551_234, 1))
        .expect_err("no area code can be derived");

    assert_eq!(err.class, ErrorClass::Unsupported);
    assert_eq!(err.origin, ErrorOrigin::Interface);
}

#[test]
fn fifth_vote_from_one_submitter_is_rejected() {
    let voter = voter();
    let request = VoteRequest::new(5_550_100, 7).with_area_code(401);

    for _ in 0..4 {
        let outcome = voter.submit(request).expect("vote should be processed");
        assert!(outcome.is_accepted());
    }
    let outcome = voter.submit(request).expect("quota rejection is not an error");

    assert!(matches!(outcome, VoteOutcome::Rejected(ref reason) if reason.contains("5550100")));
    assert_eq!(voter.votes_for(7, "RI").expect("aggregate readable"), 4);
    assert_eq!(voter.votes_by_phone(5_550_100).expect("count readable"), 4);
    assert_streams_empty(&voter);
}

#[test]
fn quota_counts_votes_across_contestants() {
    let voter = voter();

    for contestant in [1, 1, 2, 2] {
        let outcome = voter
            .submit(VoteRequest::new(4_015_550_100, contestant))
            .expect("vote should be processed");
        assert!(outcome.is_accepted());
    }
    let outcome = voter
        .submit(VoteRequest::new(4_015_550_100, 3))
        .expect("quota rejection is not an error");

    assert!(!outcome.is_accepted());
    assert_eq!(voter.votes_for(3, "RI").expect("aggregate readable"), 0);
}

#[test]
fn unknown_contestant_aborts_without_residue() {
    let voter = voter_with(&config(6));
    let before = voter.database().snapshot().expect("snapshot");

    let err = voter
        .submit(VoteRequest::new(5_551_234, 7).with_area_code(401))
        .expect_err("contestant 7 is not configured");

    assert_eq!(err.class, ErrorClass::ReferenceIntegrity);
    assert_eq!(voter.database().snapshot().expect("snapshot"), before);
}

#[test]
fn unknown_area_code_at_third_stage_rolls_back_everything() {
    let voter = voter();
    voter
        .submit(VoteRequest::new(5_551_234, 7).with_area_code(401))
        .expect("seed vote should be processed");
    let before = voter.database().snapshot().expect("snapshot");

    let err = voter
        .submit(VoteRequest::new(5_551_234, 7).with_area_code(999))
        .expect_err("area code 999 is not assigned");

    assert!(err.is_reference_integrity());
    assert!(err.message.contains("area_code_state"));
    assert_eq!(
        voter.database().snapshot().expect("snapshot"),
        before,
        "stages one and two must leave no trace"
    );
    assert_eq!(voter.votes_by_phone(5_551_234).expect("count readable"), 1);
    assert_streams_empty(&voter);
}

#[test]
fn results_rank_contestants_by_total() {
    let voter = voter_with(&config(4));

    for (phone, contestant) in [
        (2_125_550_001, 3),
        (2_125_550_002, 3),
        (4_015_550_003, 2),
        (4_015_550_004, 3),
        (2_125_550_005, 2),
        (2_125_550_006, 4),
    ] {
        voter
            .submit(VoteRequest::new(phone, contestant))
            .expect("vote should be processed");
    }

    let results = voter.results().expect("results readable");
    let ranking = results
        .iter()
        .map(|result| (result.contestant_number, result.total_votes))
        .collect::<Vec<_>>();

    assert_eq!(ranking, vec![(3, 3), (2, 2), (4, 1), (1, 0)]);
    assert_eq!(results[0].contestant_name, "Kelly Clauss");

    let json = serde_json::to_value(&results[0]).expect("result should serialize");
    assert_eq!(json["total_votes"], 3);
}

#[test]
fn concurrent_submitters_conserve_totals() {
    let voter = voter();
    let threads = 4_i64;
    let votes_per_thread = 30_i64;

    let accepted = std::thread::scope(|scope| {
        let handles = (0..threads)
            .map(|thread| {
                let voter = &voter;
                scope.spawn(move || {
                    let mut accepted = 0;
                    for n in 0..votes_per_thread {
                        let phone = 4_015_550_000 + thread * 1_000 + n;
                        let request = VoteRequest::new(phone, 1 + (n % 12));
                        loop {
                            match voter.submit(request) {
                                Ok(outcome) => {
                                    accepted += i64::from(outcome.is_accepted());
                                    break;
                                }
                                Err(err) if err.is_conflict() => {}
                                Err(err) => panic!("unexpected failure: {err}"),
                            }
                        }
                    }
                    accepted
                })
            })
            .collect::<Vec<_>>();

        handles
            .into_iter()
            .map(|handle| handle.join().expect("submitter thread should finish"))
            .sum::<i64>()
    });

    assert_eq!(accepted, threads * votes_per_thread);
    assert_eq!(voter.total_votes().expect("total readable"), accepted);
    assert_streams_empty(&voter);
}

#[derive(Clone, Copy, Debug)]
struct Vote {
    phone: i64,
    contestant: i64,
    area_code: i64,
}

fn vote() -> impl Strategy<Value = Vote> {
    (
        prop::sample::select(vec![5_550_001_i64, 5_550_002, 5_550_003]),
        1_i64..=7,
        prop::sample::select(vec![401_i64, 212, 999]),
    )
        .prop_map(|(phone, contestant, area_code)| Vote {
            phone,
            contestant,
            area_code,
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn aggregates_equal_accepted_votes(votes in prop::collection::vec(vote(), 1..30)) {
        let voter = voter_with(&config(6));
        let mut cast = BTreeMap::<i64, i64>::new();
        let mut expected = BTreeMap::<(i64, &str), i64>::new();

        for vote in votes {
            let request = VoteRequest::new(vote.phone, vote.contestant).with_area_code(vote.area_code);
            let result = voter.submit(request);
            let already = cast.get(&vote.phone).copied().unwrap_or(0);

            if vote.contestant > 6 {
                prop_assert_eq!(result.map_err(|err| err.class), Err(ErrorClass::ReferenceIntegrity));
            } else if already >= 4 {
                prop_assert!(matches!(result, Ok(VoteOutcome::Rejected(_))));
            } else if vote.area_code == 999 {
                prop_assert_eq!(result.map_err(|err| err.class), Err(ErrorClass::ReferenceIntegrity));
            } else {
                prop_assert_eq!(result.map_err(|err| err.class), Ok(VoteOutcome::Accepted));
                *cast.entry(vote.phone).or_default() += 1;
                let state = if vote.area_code == 401 { "RI" } else { "NY" };
                *expected.entry((vote.contestant, state)).or_default() += 1;
            }
        }

        for ((contestant, state), count) in &expected {
            prop_assert_eq!(voter.votes_for(*contestant, state).expect("aggregate readable"), *count);
        }
        for (phone, count) in &cast {
            prop_assert_eq!(voter.votes_by_phone(*phone).expect("count readable"), *count);
        }
        prop_assert_eq!(
            voter.total_votes().expect("total readable"),
            expected.values().sum::<i64>()
        );
        for stream in STREAMS {
            prop_assert_eq!(voter.database().stream_len(stream).expect("stream readable"), 0);
        }
    }
}
