use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};

use orgdir_core::directory::{MethodPattern, PolicyRule};
use orgdir_core::engine::{Domain, EngineError, PolicyDecisionPoint, PolicyReader, Subject, Verb};
use orgdir_core::ids::{PolicyId, TenantId, UserId};
use orgdir_core::scope::TenantScope;

struct BenchStore {
    rules: Arc<Vec<PolicyRule>>,
}

impl PolicyReader for BenchStore {
    async fn rules_for_roles(
        &mut self,
        role_codes: &[String],
    ) -> Result<Vec<PolicyRule>, EngineError> {
        Ok(self
            .rules
            .iter()
            .filter(|r| role_codes.contains(&r.role_code))
            .cloned()
            .collect())
    }
}

fn tenant(id: i64) -> Domain {
    Domain::Tenant(TenantId::new(id))
}

/// `roles` tenant roles, each with `per_role` rules over distinct operation
/// prefixes. Only the last rule of the last role matches the request.
fn make_rules(roles: usize, per_role: usize) -> Vec<PolicyRule> {
    let mut rules = Vec::with_capacity(roles * per_role);
    for r in 0..roles {
        for p in 0..per_role {
            rules.push(PolicyRule::new(
                PolicyId::new((r * per_role + p) as i64),
                format!("role_{r}"),
                tenant(7),
                format!("/area_{p}/*"),
                MethodPattern::Verb(Verb::Create),
            ));
        }
    }
    rules
}

fn make_subject(roles: usize) -> Subject {
    (0..roles).fold(
        Subject::new(UserId::new(1), "bench", TenantScope::Tenant(TenantId::new(7))),
        |s, r| s.with_tenant_role(format!("role_{r}")),
    )
}

fn bench_evaluate_single_rule(c: &mut Criterion) {
    let rules = make_rules(1, 1);
    let subject = make_subject(1);

    c.bench_function("evaluate_single_rule", |b| {
        b.iter(|| {
            PolicyDecisionPoint::evaluate(
                &rules,
                &subject,
                tenant(7),
                "/area_0/create",
                Verb::Create,
            )
        });
    });
}

fn bench_evaluate_wide_table(c: &mut Criterion) {
    let rules = make_rules(10, 50);
    let subject = make_subject(10);

    c.bench_function("evaluate_wide_table_500", |b| {
        b.iter(|| {
            PolicyDecisionPoint::evaluate(
                &rules,
                &subject,
                tenant(7),
                "/area_49/create",
                Verb::Create,
            )
        });
    });
}

fn bench_evaluate_deny_cross_tenant(c: &mut Criterion) {
    let rules = make_rules(10, 50);
    let subject = make_subject(10);

    c.bench_function("evaluate_deny_cross_tenant", |b| {
        b.iter(|| {
            PolicyDecisionPoint::evaluate(
                &rules,
                &subject,
                tenant(9),
                "/area_49/create",
                Verb::Create,
            )
        });
    });
}

fn bench_enforce_with_store(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let rules = Arc::new(make_rules(10, 50));
    let subject = make_subject(10);
    let pdp = PolicyDecisionPoint::new();

    c.bench_function("enforce_with_store_500", |b| {
        b.to_async(&rt).iter(|| async {
            let mut store = BenchStore {
                rules: Arc::clone(&rules),
            };
            pdp.enforce(
                &mut store,
                &subject,
                tenant(7),
                "/area_49/create",
                Verb::Create,
            )
            .await
            .unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_evaluate_single_rule,
    bench_evaluate_wide_table,
    bench_evaluate_deny_cross_tenant,
    bench_enforce_with_store,
);
criterion_main!(benches);
