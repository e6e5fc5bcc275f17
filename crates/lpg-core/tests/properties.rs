//! Property tests over random inventories.

use std::collections::{HashMap, HashSet};

use lpg_core::discovery::propagate;
use lpg_core::graph::{build_graph, derive_relations};
use lpg_core::layout::{Canvas, LayoutEngine, TieredLayout};
use lpg_core::models::{
    DecayModel, IngressRule, NodeCategory, PortRange, RelationType, Resource, ResourceAttributes,
    ResourceType, RuleSource, Tier, TraversalConfig, UsageStatus, INTERNET_NODE_ID,
};
use proptest::prelude::*;

type ResourceSpec = (u8, Vec<usize>, Option<usize>, Vec<usize>, bool, Vec<usize>);

fn resource_type(kind: u8) -> ResourceType {
    match kind {
        0 => ResourceType::Ec2Instance,
        1 => ResourceType::IamRole,
        2 => ResourceType::SecurityGroup,
        _ => ResourceType::S3Bucket,
    }
}

fn id(index: usize) -> String {
    format!("r{}", index)
}

/// Builds resources `r0..rn`. References may point past the end, which
/// leaves them dangling.
fn build_inventory(specs: Vec<ResourceSpec>) -> Vec<Resource> {
    specs
        .into_iter()
        .enumerate()
        .map(|(i, (kind, groups, role, data, public, sources))| {
            let resource_type = resource_type(kind);
            let mut ingress_rules = Vec::new();
            if resource_type == ResourceType::SecurityGroup {
                if public {
                    ingress_rules.push(IngressRule {
                        protocol: "tcp".into(),
                        ports: PortRange::single(443),
                        source: RuleSource::Cidr("0.0.0.0/0".into()),
                        status: UsageStatus::Unknown,
                    });
                }
                for source in sources {
                    ingress_rules.push(IngressRule {
                        protocol: "tcp".into(),
                        ports: PortRange::single(5432),
                        source: RuleSource::SecurityGroup(id(source)),
                        status: UsageStatus::Used,
                    });
                }
            }
            Resource::new(id(i), resource_type).with_attributes(ResourceAttributes {
                ingress_rules,
                security_groups: groups.into_iter().map(id).collect(),
                role: role.map(id),
                data_access: data.into_iter().map(id).collect(),
                ..Default::default()
            })
        })
        .collect()
}

fn inventory_strategy() -> impl Strategy<Value = Vec<Resource>> {
    (1usize..14)
        .prop_flat_map(|n| {
            let reference = 0..n + 2;
            proptest::collection::vec(
                (
                    0u8..4,
                    proptest::collection::vec(reference.clone(), 0..3),
                    proptest::option::of(reference.clone()),
                    proptest::collection::vec(reference.clone(), 0..2),
                    any::<bool>(),
                    proptest::collection::vec(reference, 0..2),
                ),
                n,
            )
        })
        .prop_map(build_inventory)
}

fn traversal_strategy() -> impl Strategy<Value = TraversalConfig> {
    (1usize..5, 0.05f64..=1.0).prop_map(|(depth, threshold)| {
        TraversalConfig::default()
            .with_max_depth(depth)
            .with_threshold(threshold)
    })
}

proptest! {
    #[test]
    fn discovery_paths_are_consistent(
        inventory in inventory_strategy(),
        config in traversal_strategy(),
        seed_count in 1usize..=5,
    ) {
        let seeds: Vec<Resource> = inventory.iter().take(seed_count).cloned().collect();
        let relations = derive_relations(&inventory);
        let result = propagate(
            "system",
            &seeds,
            &inventory,
            &relations.edges,
            &config,
            &DecayModel::default(),
        );

        let seed_ids: HashSet<&str> = seeds.iter().map(|s| s.id.as_str()).collect();
        let scores: HashMap<&str, f64> = result
            .all()
            .map(|r| (r.resource.id.as_str(), r.membership_score))
            .collect();
        prop_assert_eq!(scores.len(), result.total_count);

        for seed in &result.seeds {
            prop_assert_eq!(seed.membership_score, 1.0);
            prop_assert_eq!(&seed.discovery_path, &vec![seed.resource.id.clone()]);
        }

        for entry in result.discovered.iter().chain(&result.shared_resources) {
            let path = &entry.discovery_path;
            prop_assert!(path.len() >= 2);
            prop_assert!(seed_ids.contains(path[0].as_str()));
            prop_assert_eq!(path.last(), Some(&entry.resource.id));
            prop_assert_eq!(path.len() - 1, entry.depth);
            prop_assert!(entry.depth <= config.max_depth);
            prop_assert!(entry.membership_score >= config.membership_threshold);
            prop_assert!(entry.membership_score <= 1.0);

            let parent = path[path.len() - 2].as_str();
            let parent_score = scores.get(parent).copied();
            prop_assert!(parent_score.is_some());
            prop_assert!(entry.membership_score <= parent_score.unwrap_or(0.0) + 1e-12);
        }
    }

    #[test]
    fn built_graph_has_no_dangling_edges(inventory in inventory_strategy()) {
        let model = build_graph(&inventory, None);
        let ids: HashSet<&str> = model.nodes.iter().map(|n| n.id.as_str()).collect();
        for edge in &model.edges {
            prop_assert!(ids.contains(edge.from.as_str()));
            prop_assert!(ids.contains(edge.to.as_str()));
        }

        let internet_nodes = model.nodes.iter().filter(|n| n.id == INTERNET_NODE_ID).count();
        let any_public = inventory.iter().any(Resource::has_public_ingress);
        prop_assert_eq!(internet_nodes, usize::from(any_public));
        for edge in model.edges.iter().filter(|e| e.relation == RelationType::Internet) {
            prop_assert_eq!(edge.from.as_str(), INTERNET_NODE_ID);
        }
    }

    #[test]
    fn build_is_deterministic(inventory in inventory_strategy()) {
        let first = build_graph(&inventory, None);
        let mut reversed = inventory.clone();
        reversed.reverse();
        let second = build_graph(&inventory, None);
        prop_assert_eq!(&first, &second);

        // Input order does not matter for node and edge sets.
        let shuffled = build_graph(&reversed, None);
        prop_assert_eq!(first.node_ids(), shuffled.node_ids());
        let edges: Vec<&str> = first.edges.iter().map(|e| e.id.as_str()).collect();
        let shuffled_edges: Vec<&str> = shuffled.edges.iter().map(|e| e.id.as_str()).collect();
        prop_assert_eq!(edges, shuffled_edges);
    }

    #[test]
    fn tiers_follow_categories(inventory in inventory_strategy()) {
        let model = build_graph(&inventory, None);
        let result = TieredLayout::new().layout(&model.nodes, &model.edges, &Canvas::default());

        let identity_total = model
            .nodes
            .iter()
            .filter(|n| n.category == NodeCategory::Identity)
            .count();
        let identity_shown = result
            .nodes
            .iter()
            .filter(|n| n.category == NodeCategory::Identity)
            .count();
        prop_assert!(identity_shown <= 10);
        prop_assert_eq!(identity_shown + result.truncated.identity, identity_total);
        prop_assert_eq!(
            result.nodes.len() + result.truncated.total(),
            model.nodes.len()
        );

        for node in &result.nodes {
            let tier = node.tier;
            match node.category {
                NodeCategory::Internet => {
                    prop_assert_eq!(tier, Some(Tier::Internet));
                }
                NodeCategory::SecurityGroup if node.internet_exposed => {
                    prop_assert_eq!(tier, Some(Tier::PublicExposed));
                }
                NodeCategory::SecurityGroup => {
                    prop_assert!(tier != Some(Tier::PublicExposed));
                }
                NodeCategory::Identity | NodeCategory::Compute => {
                    prop_assert_eq!(tier, Some(Tier::AppIdentity));
                }
                NodeCategory::Storage => {
                    prop_assert_eq!(tier, Some(Tier::DataStorage));
                }
                _ => {
                    prop_assert!(tier.is_some());
                }
            }
            prop_assert!(node.position.is_some());
        }
    }
}
