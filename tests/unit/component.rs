//! Unit tests for component passes

use mesh_operator::client::{ClusterClient, Propagation};
use mesh_operator::crd::{ConditionStatus, ConditionType, ResourceKey, reasons};
use mesh_operator::manifest::Manifest;

use crate::common::*;

mod decommission_tests {
    use super::*;

    #[tokio::test]
    async fn test_zero_manifests_deletes_in_reverse_order() {
        let h = Harness::new(pilot(&[
            config_map("x", "1"),
            config_map("y", "1"),
            config_map("z", "1"),
        ]));
        h.settle().await;

        h.renderer.set(renderings(&[(PILOT, vec![])]));
        h.reconcile().await.unwrap();

        assert_eq!(
            h.cluster.calls(),
            vec![
                Call::Delete(cm_key("z"), Propagation::Foreground),
                Call::Delete(cm_key("y"), Propagation::Foreground),
                Call::Delete(cm_key("x"), Propagation::Foreground),
            ]
        );

        let component = h.component(PILOT);
        let reconciled = component.status.get_condition(&ConditionType::Reconciled);
        assert_eq!(reconciled.status, ConditionStatus::False);
        assert_eq!(reconciled.reason, reasons::UNINSTALL_SUCCESSFUL);
        assert_eq!(
            component.status.get_condition(&ConditionType::Installed).status,
            ConditionStatus::False
        );

        // records stay in creation order
        let keys: Vec<String> = component.resource_keys().map(ToString::to_string).collect();
        assert_eq!(keys, vec![cm_key("x"), cm_key("y"), cm_key("z")]);
        assert!(component.resources.iter().all(|r| {
            r.status.get_condition(&ConditionType::Installed).reason == reasons::DELETION_SUCCESSFUL
        }));
    }

    #[tokio::test]
    async fn test_missing_component_is_left_alone() {
        let h = Harness::new(renderings(&[
            (PILOT, vec![manifest("pilot.yaml", &[config_map("p", "1")])]),
            (GALLEY, vec![manifest("galley.yaml", &[config_map("g", "1")])]),
        ]));
        h.settle().await;
        let galley_before = h.component(GALLEY);

        h.renderer.set(pilot(&[config_map("p", "1")]));
        h.reconcile().await.unwrap();

        assert!(h.cluster.calls().is_empty());
        assert!(h.cluster.contains(&cm_key("g")));
        assert_eq!(h.component(GALLEY), galley_before);
    }

    #[tokio::test]
    async fn test_components_reconciled_in_preferred_order() {
        let h = Harness::new(renderings(&[
            (PILOT, vec![manifest("pilot.yaml", &[config_map("p", "1")])]),
            ("istio/charts/zeta", vec![manifest("zeta.yaml", &[config_map("z", "1")])]),
            (GALLEY, vec![manifest("galley.yaml", &[config_map("g", "1")])]),
        ]));
        h.reconcile().await.unwrap();

        assert_eq!(
            h.cluster.calls(),
            vec![
                Call::Create(cm_key("g")),
                Call::Create(cm_key("p")),
                Call::Create(cm_key("z")),
            ]
        );
        let names: Vec<String> = h.status().components.into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec![GALLEY, PILOT, "istio/charts/zeta"]);
    }
}

mod deletion_tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_delete_is_recorded_and_retried() {
        let h = Harness::new(pilot(&[config_map("x", "1"), config_map("y", "1")]));
        h.settle().await;

        h.renderer.set(pilot(&[config_map("x", "1")]));
        h.cluster.fail(Op::Delete, "y");
        let err = h.reconcile().await.unwrap_err();
        assert_eq!(err.flatten().len(), 1);
        assert!(h.cluster.contains(&cm_key("y")));

        let y = h.component(PILOT).resource(&cm_key("y").parse().unwrap()).cloned().unwrap();
        let installed = y.status.get_condition(&ConditionType::Installed);
        assert_eq!(installed.status, ConditionStatus::False);
        assert_eq!(installed.reason, reasons::DELETION_ERROR);
        assert_eq!(
            y.status.get_condition(&ConditionType::Reconciled).status,
            ConditionStatus::False
        );

        h.cluster.heal();
        h.cluster.clear_calls();
        h.reconcile().await.unwrap();
        assert_eq!(h.cluster.deletes(), vec![cm_key("y")]);
        let y = h.component(PILOT).resource(&cm_key("y").parse().unwrap()).cloned().unwrap();
        assert_eq!(
            y.status.get_condition(&ConditionType::Installed).reason,
            reasons::DELETION_SUCCESSFUL
        );
    }

    #[tokio::test]
    async fn test_never_installed_object_is_not_deleted() {
        let h = Harness::new(pilot(&[config_map("a", "1"), config_map("b", "1")]));
        h.cluster.fail(Op::Create, "b");
        h.reconcile().await.unwrap_err();
        let b = h.component(PILOT).resource(&cm_key("b").parse().unwrap()).cloned().unwrap();
        assert_eq!(
            b.status.get_condition(&ConditionType::Installed).reason,
            reasons::INSTALL_ERROR
        );

        h.cluster.heal();
        h.cluster.clear_calls();
        h.renderer.set(pilot(&[config_map("a", "1")]));
        h.reconcile().await.unwrap();

        assert!(h.cluster.deletes().is_empty());
        let keys: Vec<String> = h
            .component(PILOT)
            .resource_keys()
            .map(ToString::to_string)
            .collect();
        assert_eq!(keys, vec![cm_key("a")]);
    }

    #[tokio::test]
    async fn test_already_deleted_counts_as_success() {
        let h = Harness::new(pilot(&[config_map("x", "1"), config_map("y", "1")]));
        h.settle().await;

        // removed behind the controller's back
        let key: ResourceKey = cm_key("y").parse().unwrap();
        h.cluster
            .delete(&key, Propagation::Background)
            .await
            .unwrap();
        h.cluster.clear_calls();

        h.renderer.set(pilot(&[config_map("x", "1")]));
        h.reconcile().await.unwrap();
        assert_eq!(h.cluster.deletes(), vec![cm_key("y")]);
        let y = h.component(PILOT).resource(&key).cloned().unwrap();
        assert_eq!(
            y.status.get_condition(&ConditionType::Installed).reason,
            reasons::DELETION_SUCCESSFUL
        );
    }
}

mod document_tests {
    use super::*;

    #[tokio::test]
    async fn test_list_items_are_managed_individually() {
        let list = format!(
            "apiVersion: v1\nkind: List\nitems:\n  - apiVersion: v1\n    kind: ConfigMap\n    metadata:\n      name: one\n      namespace: {NS}\n  - apiVersion: v1\n    kind: ConfigMap\n    metadata:\n      name: two\n      namespace: {NS}\n"
        );
        let h = Harness::new(pilot(&[list]));
        h.reconcile().await.unwrap();

        assert_eq!(
            h.cluster.calls(),
            vec![Call::Create(cm_key("one")), Call::Create(cm_key("two"))]
        );
        assert_eq!(h.component(PILOT).resources.len(), 2);
    }

    #[tokio::test]
    async fn test_non_yaml_templates_are_skipped() {
        let h = Harness::new(renderings(&[(
            PILOT,
            vec![
                Manifest::new("NOTES.txt", config_map("notes", "1")),
                manifest("cm.yaml", &[config_map("real", "1")]),
            ],
        )]));
        h.reconcile().await.unwrap();
        assert_eq!(h.cluster.calls(), vec![Call::Create(cm_key("real"))]);
    }

    #[tokio::test]
    async fn test_undecodable_object_is_collected() {
        let missing_kind = format!("apiVersion: v1\nmetadata:\n  name: bad\n  namespace: {NS}\n");
        let h = Harness::new(pilot(&[missing_kind, config_map("good", "1")]));

        let err = h.reconcile().await.unwrap_err();
        assert_eq!(err.flatten().len(), 1);
        assert!(h.cluster.contains(&cm_key("good")));
    }

    #[tokio::test]
    async fn test_wrongly_typed_field_aborts_pass() {
        let h = Harness::new(pilot(&[config_map("x", "1"), config_map("y", "1")]));
        h.settle().await;

        let broken = "apiVersion: v1\nkind: ConfigMap\nmetadata: oops\n".to_string();
        h.renderer.set(pilot(&[config_map("x", "1"), broken]));
        let err = h.reconcile().await.unwrap_err();

        assert!(err.flatten().iter().any(|e| e.aborts_pass()));
        assert!(h.cluster.deletes().is_empty());
        assert!(h.cluster.contains(&cm_key("y")));
        let keys: Vec<String> = h
            .component(PILOT)
            .resource_keys()
            .map(ToString::to_string)
            .collect();
        assert_eq!(keys, vec![cm_key("x"), cm_key("y")]);
    }
}
