use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Duration, TimeZone, Utc};
use farmdse::{
    ConditionGroup, ContextBuilder, CropFact, FactSourceKind, FarmId, FarmRecord, FarmSnapshot,
    FeedbackInput, FeedbackType, FixedClock, InMemoryFarmData, InMemoryRecommendationStore,
    Operator, RecommendationFilters, RecommendationLifecycle, RecommendationQuery,
    RecommendationStatus, RecommendationStore, Rule, RuleCatalog, RuleCategory, RuleScope,
    RulesEngine, SetSource, UserId, UserProfile,
};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 7, 30, 0).unwrap()
}

struct Harness {
    lifecycle: Arc<RecommendationLifecycle>,
    store: Arc<InMemoryRecommendationStore>,
    data: Arc<InMemoryFarmData>,
    clock: Arc<FixedClock>,
    user: UserId,
    farm: FarmId,
}

fn crop(id: &str, farm: FarmId, days: i64) -> CropFact {
    CropFact::new(id, farm, format!("Field {id}"), "maize").planted_at(start() - Duration::days(days))
}

fn harness(crop_days: &[i64]) -> Harness {
    let user = UserId::new();
    let farm = FarmId::new();
    let crops = crop_days
        .iter()
        .enumerate()
        .map(|(i, d)| crop(&format!("c{i}"), farm, *d))
        .collect();
    let data = Arc::new(InMemoryFarmData::from_snapshot(FarmSnapshot {
        users: vec![UserProfile::new(user).with_region("lowlands")],
        farms: vec![FarmRecord {
            id: farm,
            owner_id: user,
            name: "Riverside".to_string(),
            region: None,
            size_hectares: None,
        }],
        crops,
        ..FarmSnapshot::default()
    }));

    let rule = Rule::builder("R1", "Mid-season check")
        .category(RuleCategory::Crop)
        .scope(RuleScope::EachCrop)
        .condition(ConditionGroup::and(vec![
            ConditionGroup::leaf("crop.daysSincePlanting", Operator::GreaterOrEqual, 30),
            ConditionGroup::leaf("crop.daysSincePlanting", Operator::LessThan, 40),
        ]))
        .title("Check {crop.name}")
        .reason("planted {crop.daysSincePlanting} days ago")
        .build()
        .unwrap();
    let engine = Arc::new(RulesEngine::with_default_label(Arc::new(
        RuleCatalog::new(vec![rule]).unwrap(),
    )));

    let store = Arc::new(InMemoryRecommendationStore::new());
    let clock = Arc::new(FixedClock::new(start()));
    let lifecycle = RecommendationLifecycle::new(store.clone(), engine, ContextBuilder::new(data.clone()))
        .with_clock(clock.clone());

    Harness {
        lifecycle: Arc::new(lifecycle),
        store,
        data,
        clock,
        user,
        farm,
    }
}

fn count(store: &InMemoryRecommendationStore, user: UserId, status: RecommendationStatus) -> usize {
    store
        .list(user, &RecommendationQuery::any().with_statuses(vec![status]))
        .unwrap()
        .len()
}

#[test]
fn list_within_window_is_served_from_cache() {
    let h = harness(&[35, 36]);
    let first = h
        .lifecycle
        .get_or_refresh(h.user, None, RecommendationFilters::default())
        .unwrap();
    assert_eq!(first.source, SetSource::Generated);

    h.clock.advance(Duration::minutes(10));
    let second = h
        .lifecycle
        .get_or_refresh(h.user, None, RecommendationFilters::default())
        .unwrap();
    assert_eq!(second.source, SetSource::Cache);

    let ids = |set: &farmdse::RecommendationSet| -> Vec<_> {
        set.recommendations.iter().map(|r| r.id).collect()
    };
    assert_eq!(ids(&first), ids(&second));
}

#[test]
fn empty_set_is_never_fresh() {
    let h = harness(&[5]);
    let first = h
        .lifecycle
        .get_or_refresh(h.user, None, RecommendationFilters::default())
        .unwrap();
    assert!(first.recommendations.is_empty());
    let second = h
        .lifecycle
        .get_or_refresh(h.user, None, RecommendationFilters::default())
        .unwrap();
    assert_eq!(second.source, SetSource::Generated);
}

#[test]
fn refresh_replaces_three_active_with_two_new() {
    let h = harness(&[31, 33, 35]);
    let first = h.lifecycle.refresh(h.user, None).unwrap();
    assert_eq!(first.count(), 3);
    let prior: HashSet<_> = first.inserted.iter().map(|r| r.id).collect();

    h.data
        .update(|s| {
            s.crops = vec![crop("n1", h.farm, 32), crop("n2", h.farm, 38)];
        })
        .unwrap();
    h.clock.advance(Duration::seconds(1));
    let second = h.lifecycle.refresh(h.user, None).unwrap();
    assert_eq!(second.expired, 3);

    assert_eq!(count(&h.store, h.user, RecommendationStatus::Expired), 3);
    assert_eq!(count(&h.store, h.user, RecommendationStatus::Active), 2);

    let active = h.store.list(h.user, &RecommendationQuery::active()).unwrap();
    assert!(active.iter().all(|r| !prior.contains(&r.id)));
    assert!(active.iter().all(|r| r.generation == second.generation));
}

#[test]
fn same_entity_is_not_duplicated_across_refreshes() {
    let h = harness(&[35]);
    for _ in 0..3 {
        h.lifecycle.refresh(h.user, None).unwrap();
        h.clock.advance(Duration::minutes(1));
    }
    let active = h.store.list(h.user, &RecommendationQuery::active()).unwrap();
    let keys: HashSet<_> = active.iter().map(|r| r.card.dedup_key()).collect();
    assert_eq!(keys.len(), active.len());
    assert_eq!(active.len(), 1);
}

#[test]
fn farm_scoped_refresh_leaves_no_older_active_rows() {
    let h = harness(&[35]);
    let other = FarmId::new();
    h.data
        .update(|s| {
            s.farms.push(FarmRecord {
                id: other,
                owner_id: h.user,
                name: "Upland".to_string(),
                region: None,
                size_hectares: None,
            });
            s.crops.push(crop("o1", other, 35));
        })
        .unwrap();

    let first = h.lifecycle.refresh(h.user, None).unwrap();
    assert_eq!(first.count(), 2);

    let scoped = h.lifecycle.refresh(h.user, Some(h.farm)).unwrap();
    assert_eq!(scoped.expired, 2);
    let active = h.store.list(h.user, &RecommendationQuery::active()).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].card.farm_id, Some(h.farm));
    assert_eq!(active[0].generation, scoped.generation);
    assert_eq!(count(&h.store, h.user, RecommendationStatus::Expired), 2);
}

#[test]
fn first_terminal_transition_wins() {
    let h = harness(&[35]);
    let id = h.lifecycle.refresh(h.user, None).unwrap().inserted[0].id;

    let dismissed = h
        .lifecycle
        .apply_feedback(h.user, FeedbackInput::new(id, FeedbackType::Dismissed))
        .unwrap();
    assert!(dismissed.transitioned);

    let completed = h
        .lifecycle
        .apply_feedback(h.user, FeedbackInput::new(id, FeedbackType::Completed))
        .unwrap();
    assert!(!completed.transitioned);
    assert_eq!(completed.recommendation.status, RecommendationStatus::Dismissed);
    assert!(completed.recommendation.completed_at.is_none());
    assert_eq!(h.store.list_feedback(id).unwrap().len(), 2);
}

#[test]
fn sentiment_feedback_does_not_transition() {
    let h = harness(&[35]);
    let id = h.lifecycle.refresh(h.user, None).unwrap().inserted[0].id;
    for kind in [FeedbackType::Helpful, FeedbackType::Incorrect] {
        let outcome = h
            .lifecycle
            .apply_feedback(h.user, FeedbackInput::new(id, kind).with_rating(4))
            .unwrap();
        assert!(!outcome.transitioned);
        assert_eq!(outcome.recommendation.status, RecommendationStatus::Active);
    }
    let not_helpful = h
        .lifecycle
        .apply_feedback(h.user, FeedbackInput::new(id, FeedbackType::NotHelpful))
        .unwrap();
    assert_eq!(not_helpful.recommendation.status, RecommendationStatus::Dismissed);
    assert!(not_helpful.recommendation.dismissed_at.is_some());
}

#[test]
fn degraded_sources_do_not_block_refresh() {
    let h = harness(&[35]);
    h.data.set_failing(FactSourceKind::Weather, true);
    h.data.set_failing(FactSourceKind::Market, true);
    let summary = h.lifecycle.refresh(h.user, None).unwrap();
    assert_eq!(summary.count(), 1);
    assert_eq!(summary.degraded, vec![FactSourceKind::Weather, FactSourceKind::Market]);
}

#[test]
fn identity_failure_surfaces() {
    let h = harness(&[35]);
    h.data.set_failing(FactSourceKind::Identity, true);
    let err = h.lifecycle.refresh(h.user, None).unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(count(&h.store, h.user, RecommendationStatus::Active), 0);
}

#[test]
fn concurrent_refreshes_end_in_one_generation() {
    let h = harness(&[31, 35]);
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let lifecycle = Arc::clone(&h.lifecycle);
            let user = h.user;
            thread::spawn(move || lifecycle.refresh(user, None))
        })
        .collect();
    let mut committed = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(_) => committed += 1,
            Err(e) => assert!(e.is_retryable(), "{e}"),
        }
    }
    assert!(committed >= 1);

    let active = h.store.list(h.user, &RecommendationQuery::active()).unwrap();
    assert_eq!(active.len(), 2);
    assert_eq!(active[0].generation, active[1].generation);
}
