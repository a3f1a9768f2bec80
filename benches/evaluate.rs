use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use farmdse::context::{LivestockFact, MarketPrice, MarketSummary, WeatherSummary};
use farmdse::{
    CropFact, EvaluationContext, FarmId, FarmRecord, RuleCatalog, RulesEngine, UserId, UserProfile,
};

fn make_context(entities: usize) -> EvaluationContext {
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
    let user = UserId::new();
    let farm = FarmId::new();

    // Spread planting dates so every crop rule sees both matches and misses.
    let crops = (0..entities)
        .map(|i| {
            let days = i64::try_from(i % 120).unwrap_or(0);
            CropFact::new(format!("c{i}"), farm, format!("Field {i}"), "maize")
                .planted_at(now - Duration::days(days))
                .expected_harvest_at(now + Duration::days(120 - days))
        })
        .collect();
    let livestock = (0..entities / 4)
        .map(|i| {
            let due = i64::try_from(i % 20).unwrap_or(0) - 5;
            LivestockFact::new(format!("l{i}"), farm, format!("Herd {i}"), "cattle")
                .with_head_count(12)
                .next_vaccination_due(now + Duration::days(due))
        })
        .collect();

    EvaluationContext::new(UserProfile::new(user), now)
        .with_farms(vec![FarmRecord {
            id: farm,
            owner_id: user,
            name: "Bench".to_string(),
            region: None,
            size_hectares: Some(40.0),
        }])
        .with_crops(crops)
        .with_livestock(livestock)
        .with_weather(WeatherSummary {
            available: true,
            temperature_c: Some(31.0),
            ..WeatherSummary::default()
        })
        .with_market(MarketSummary::from_prices([MarketPrice {
            product_type: "maize".to_string(),
            price: 330.0,
            previous_price: Some(290.0),
            unit: "t".to_string(),
            observed_at: now,
        }]))
}

fn bench_evaluate(c: &mut Criterion) {
    let catalog = Arc::new(RuleCatalog::builtin().unwrap());
    let engine = RulesEngine::with_default_label(catalog);

    let mut group = c.benchmark_group("evaluate");
    for entities in [10usize, 100, 1000] {
        let ctx = make_context(entities);
        group.throughput(Throughput::Elements(entities as u64));
        group.bench_with_input(BenchmarkId::from_parameter(entities), &ctx, |b, ctx| {
            b.iter(|| engine.evaluate(ctx));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_evaluate);
criterion_main!(benches);
