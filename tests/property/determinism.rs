//! Property-based tests for plan resolution determinism and ordering

use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tessera::extension::repository::MemoryExtensionRepository;
use tessera::extension::{Extension, ExtensionDependency, ExtensionGraph, Namespace};
use tessera::plan::resolver::{PlanResolver, TargetExtension};
use tessera::plan::ActionKind;
use tessera::version::{ExtensionId, Version, VersionConstraint};

/// A generated catalog: extension `i` may depend on any subset of the
/// extensions with smaller indices, so the dependency graph is acyclic by
/// construction.
fn catalog_strategy() -> impl Strategy<Value = Vec<Vec<usize>>> {
    (2usize..8).prop_flat_map(|size| {
        let deps: Vec<_> = (0..size)
            .map(|i| proptest::sample::subsequence((0..i).collect::<Vec<_>>(), 0..=i))
            .collect();
        deps
    })
}

fn build_resolver(deps: &[Vec<usize>]) -> (PlanResolver, Vec<String>) {
    let repo = MemoryExtensionRepository::new();
    let names: Vec<String> = (0..deps.len()).map(|i| format!("ext-{i}")).collect();
    for (i, dep_indices) in deps.iter().enumerate() {
        let dependencies = dep_indices
            .iter()
            .map(|&d| {
                ExtensionDependency::new(
                    names[d].clone(),
                    VersionConstraint::AtLeast(Version::new("1.0")),
                )
            })
            .collect();
        repo.register(Extension::with_dependencies(
            ExtensionId::new(names[i].clone(), "1.0"),
            dependencies,
        ));
    }
    (PlanResolver::new(Arc::new(repo)), names)
}

#[test]
fn resolution_is_deterministic_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&catalog_strategy(), |deps| {
            let (resolver, names) = build_resolver(&deps);
            let graph = ExtensionGraph::new();
            let ns = Namespace::root();
            let targets: Vec<TargetExtension> = names
                .iter()
                .map(|name| {
                    TargetExtension::new(ExtensionId::new(name.clone(), "1.0"), ns.clone())
                })
                .collect();

            let first = resolver.resolve(&targets, &graph).unwrap();
            let second = resolver.resolve(&targets, &graph).unwrap();
            prop_assert_eq!(&first, &second);
            Ok(())
        })
        .unwrap();
}

#[test]
fn dependencies_always_precede_dependents_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&catalog_strategy(), |deps| {
            let (resolver, names) = build_resolver(&deps);
            let graph = ExtensionGraph::new();
            let ns = Namespace::root();
            let targets: Vec<TargetExtension> = names
                .iter()
                .map(|name| {
                    TargetExtension::new(ExtensionId::new(name.clone(), "1.0"), ns.clone())
                })
                .collect();

            let plan = resolver.resolve(&targets, &graph).unwrap();
            let positions: HashMap<String, usize> = plan
                .actions()
                .iter()
                .enumerate()
                .map(|(position, action)| (action.extension.id.id.clone(), position))
                .collect();

            for action in plan.actions() {
                prop_assert_eq!(action.action, ActionKind::Install);
                for dep in &action.extension.dependencies {
                    prop_assert!(positions[&dep.id] < positions[&action.extension.id.id]);
                }
            }
            Ok(())
        })
        .unwrap();
}

#[test]
fn every_target_gets_exactly_one_action_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&catalog_strategy(), |deps| {
            let (resolver, names) = build_resolver(&deps);
            let graph = ExtensionGraph::new();
            let ns = Namespace::root();
            let targets: Vec<TargetExtension> = names
                .iter()
                .map(|name| {
                    TargetExtension::new(ExtensionId::new(name.clone(), "1.0"), ns.clone())
                })
                .collect();

            let plan = resolver.resolve(&targets, &graph).unwrap();
            prop_assert_eq!(plan.actions().len(), names.len());
            for name in &names {
                let count = plan
                    .actions()
                    .iter()
                    .filter(|action| &action.extension.id.id == name)
                    .count();
                prop_assert_eq!(count, 1);
            }
            Ok(())
        })
        .unwrap();
}
